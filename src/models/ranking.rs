use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::suggestion::SuggestedSlot;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DurationRange {
    pub min: u32,
    pub max: u32,
}

/// User-selected filter criteria. Unset fields do not constrain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct SlotFilter {
    pub min_confidence: Option<f64>,
    pub max_confidence: Option<f64>,
    pub time_range: Option<TimeRange>,
    pub duration_range: Option<DurationRange>,
    pub show_adjusted_only: bool,
    pub show_high_confidence_only: bool,
}

impl SlotFilter {
    pub fn min_confidence(mut self, value: f64) -> Self {
        self.min_confidence = Some(value);
        self
    }

    pub fn max_confidence(mut self, value: f64) -> Self {
        self.max_confidence = Some(value);
        self
    }

    pub fn time_range(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.time_range = Some(TimeRange { start, end });
        self
    }

    pub fn duration_range(mut self, min: u32, max: u32) -> Self {
        self.duration_range = Some(DurationRange { min, max });
        self
    }

    pub fn adjusted_only(mut self) -> Self {
        self.show_adjusted_only = true;
        self
    }

    pub fn high_confidence_only(mut self) -> Self {
        self.show_high_confidence_only = true;
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == SlotFilter::default()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    Confidence,
    Time,
    Duration,
    /// Not wired to deadline context yet; every slot scores 0.
    DeadlineProximity,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SlotSort {
    pub field: SortField,
    pub direction: SortDirection,
}

impl SlotSort {
    pub fn new(field: SortField, direction: SortDirection) -> Self {
        Self { field, direction }
    }
}

/// Pairwise differences between two slots shown side by side.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SlotComparison {
    pub first_index: u32,
    pub second_index: u32,
    pub time_difference_minutes: i64,
    pub confidence_difference: f64,
    pub duration_match: bool,
    pub deadline_proximity: i64,
}

/// Filtered and sorted slots ready for display.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SlotView {
    pub slots: Vec<SuggestedSlot>,
    pub total: usize,
    pub visible: usize,
}

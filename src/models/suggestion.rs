use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

pub const TITLE_MAX_CHARS: usize = 120;
pub const DESCRIPTION_MAX_CHARS: usize = 500;
pub const MIN_DURATION_MINUTES: u32 = 15;
pub const MAX_DURATION_MINUTES: u32 = 180;
pub const DURATION_STEP_MINUTES: u32 = 15;
pub const HIGH_CONFIDENCE_THRESHOLD: f64 = 0.7;
const MEDIUM_CONFIDENCE_THRESHOLD: f64 = 0.4;

/// Time window the user would prefer the task to land in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PreferredWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// What the user typed into the request form. Sent verbatim as `manual_input`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManualInput {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub duration_minutes: u32,
    pub deadline: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_window: Option<PreferredWindow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_task_id: Option<String>,
}

impl ManualInput {
    pub fn new(title: impl Into<String>, duration_minutes: u32, deadline: DateTime<Utc>) -> Self {
        Self {
            title: title.into(),
            description: None,
            duration_minutes,
            deadline,
            preferred_window: None,
            target_task_id: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_preferred_window(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.preferred_window = Some(PreferredWindow { start, end });
        self
    }

    pub fn with_target_task(mut self, task_id: impl Into<String>) -> Self {
        self.target_task_id = Some(task_id.into());
        self
    }

    pub fn validate(&self, now: DateTime<Utc>) -> AppResult<()> {
        let title = self.title.trim();
        if title.is_empty() {
            return Err(AppError::validation_field("title", "Title is required"));
        }
        if title.chars().count() > TITLE_MAX_CHARS {
            return Err(AppError::validation_field(
                "title",
                format!("Title must be at most {TITLE_MAX_CHARS} characters"),
            ));
        }

        if let Some(description) = &self.description {
            if description.chars().count() > DESCRIPTION_MAX_CHARS {
                return Err(AppError::validation_field(
                    "description",
                    format!("Description must be at most {DESCRIPTION_MAX_CHARS} characters"),
                ));
            }
        }

        if !(MIN_DURATION_MINUTES..=MAX_DURATION_MINUTES).contains(&self.duration_minutes)
            || self.duration_minutes % DURATION_STEP_MINUTES != 0
        {
            return Err(AppError::validation_field(
                "duration_minutes",
                format!(
                    "Duration must be between {MIN_DURATION_MINUTES} and {MAX_DURATION_MINUTES} minutes in steps of {DURATION_STEP_MINUTES}"
                ),
            ));
        }

        if self.deadline <= now {
            return Err(AppError::validation_field(
                "deadline",
                "Deadline must be in the future",
            ));
        }

        if let Some(window) = &self.preferred_window {
            if window.start >= window.end {
                return Err(AppError::validation_field(
                    "preferred_window",
                    "Preferred window must start before it ends",
                ));
            }
        }

        Ok(())
    }
}

/// Adjustments the generator applied to fit the slot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct SlotMetadata {
    pub adjusted_duration: bool,
    pub adjusted_deadline: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub adjustment_reasons: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SuggestedSlot {
    /// Stable identifier within the owning suggestion, not a position.
    pub slot_index: u32,
    pub suggested_start_at: DateTime<Utc>,
    pub planned_minutes: u32,
    pub confidence: f64,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<SlotMetadata>,
}

impl SuggestedSlot {
    pub fn ends_at(&self) -> DateTime<Utc> {
        self.suggested_start_at + Duration::minutes(i64::from(self.planned_minutes))
    }

    pub fn is_adjusted(&self) -> bool {
        self.metadata
            .as_ref()
            .map(|meta| meta.adjusted_duration || meta.adjusted_deadline)
            .unwrap_or(false)
    }

    pub fn is_high_confidence(&self) -> bool {
        self.confidence >= HIGH_CONFIDENCE_THRESHOLD
    }

    pub fn confidence_level(&self) -> ConfidenceLevel {
        ConfidenceLevel::from_score(self.confidence)
    }
}

/// Display bucketing of the continuous confidence score.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    Low,
    Medium,
    High,
}

impl ConfidenceLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= HIGH_CONFIDENCE_THRESHOLD {
            ConfidenceLevel::High
        } else if score >= MEDIUM_CONFIDENCE_THRESHOLD {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::Low
        }
    }

    /// The 0/1/2 scale some screens still render.
    pub fn as_legacy_level(self) -> u8 {
        match self {
            ConfidenceLevel::Low => 0,
            ConfidenceLevel::Medium => 1,
            ConfidenceLevel::High => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConfidenceLevel::Low => "low",
            ConfidenceLevel::Medium => "medium",
            ConfidenceLevel::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionStatus {
    #[default]
    Pending,
    Accepted,
    Rejected,
}

impl SuggestionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SuggestionStatus::Pending => "pending",
            SuggestionStatus::Accepted => "accepted",
            SuggestionStatus::Rejected => "rejected",
        }
    }
}

/// Set by the generator when it found nothing worth proposing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct FallbackAutoMode {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AiSuggestion {
    pub id: String,
    pub status: SuggestionStatus,
    pub confidence: f64,
    pub reason: String,
    pub manual_input: ManualInput,
    pub slots: Vec<SuggestedSlot>,
    pub fallback_auto_mode: FallbackAutoMode,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AiSuggestion {
    pub fn slot(&self, slot_index: u32) -> Option<&SuggestedSlot> {
        self.slots.iter().find(|slot| slot.slot_index == slot_index)
    }

    pub fn contains_slot(&self, slot_index: u32) -> bool {
        self.slot(slot_index).is_some()
    }

    /// Copy with a new status; the slot list is carried over untouched.
    pub fn with_status(&self, status: SuggestionStatus, at: DateTime<Utc>) -> Self {
        Self {
            status,
            updated_at: at,
            ..self.clone()
        }
    }
}

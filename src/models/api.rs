//! Wire shapes of the suggestion backend.
//!
//! The generate endpoint answers with a suggestion holding one or more items,
//! each carrying its own slot list. Only one item is produced today, but the
//! nesting is kept so the client flattens whatever it receives.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{AppError, AppResult};
use crate::models::suggestion::{
    AiSuggestion, FallbackAutoMode, ManualInput, SlotMetadata, SuggestedSlot, SuggestionStatus,
};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GenerateSuggestionRequest {
    #[serde(rename = "suggestionType")]
    pub suggestion_type: String,
    pub manual_input: ManualInput,
    pub timezone: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct GenerateSuggestionResponse {
    #[serde(alias = "data")]
    pub suggestion: BackendSuggestion,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct BackendSuggestion {
    pub id: String,
    #[serde(default)]
    pub status: SuggestionStatus,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub items: Vec<BackendSuggestionItem>,
    #[serde(default)]
    pub fallback_auto_mode: FallbackAutoMode,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct BackendSuggestionItem {
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub slots: Vec<BackendSlot>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct BackendSlot {
    pub slot_index: u32,
    pub suggested_start_at: DateTime<Utc>,
    pub planned_minutes: u32,
    pub confidence: f64,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub metadata: Option<SlotMetadata>,
}

impl BackendSuggestion {
    /// Flattens item slots into one list and checks the slot invariants.
    ///
    /// Confidence passes through unchanged; anything outside `[0, 1]` is an
    /// invalid response rather than something to clamp.
    pub fn into_suggestion(
        self,
        manual_input: ManualInput,
        now: DateTime<Utc>,
    ) -> AppResult<AiSuggestion> {
        let mut seen = HashSet::new();
        let mut slots = Vec::new();

        for item in self.items {
            for slot in item.slots {
                if !seen.insert(slot.slot_index) {
                    return Err(AppError::validation_with_details(
                        "Suggestion contains duplicate slot indices",
                        json!({ "suggestionId": self.id, "slotIndex": slot.slot_index }),
                    ));
                }
                if !is_unit_interval(slot.confidence) {
                    return Err(AppError::validation_with_details(
                        "Slot confidence is outside 0.0-1.0",
                        json!({ "slotIndex": slot.slot_index, "confidence": slot.confidence }),
                    ));
                }
                if slot.planned_minutes == 0 {
                    return Err(AppError::validation_with_details(
                        "Slot planned minutes must be positive",
                        json!({ "slotIndex": slot.slot_index }),
                    ));
                }
                slots.push(SuggestedSlot {
                    slot_index: slot.slot_index,
                    suggested_start_at: slot.suggested_start_at,
                    planned_minutes: slot.planned_minutes,
                    confidence: slot.confidence,
                    reason: slot.reason,
                    metadata: slot.metadata,
                });
            }
        }

        let confidence = match self.confidence {
            Some(value) if !is_unit_interval(value) => {
                return Err(AppError::validation_with_details(
                    "Suggestion confidence is outside 0.0-1.0",
                    json!({ "suggestionId": self.id, "confidence": value }),
                ));
            }
            Some(value) => value,
            None => slots
                .iter()
                .map(|slot| slot.confidence)
                .fold(0.0_f64, f64::max),
        };

        let created_at = self.created_at.unwrap_or(now);
        Ok(AiSuggestion {
            id: self.id,
            status: self.status,
            confidence,
            reason: self.reason.unwrap_or_default(),
            manual_input,
            slots,
            fallback_auto_mode: self.fallback_auto_mode,
            created_at,
            updated_at: self.updated_at.unwrap_or(created_at),
        })
    }
}

fn is_unit_interval(value: f64) -> bool {
    (0.0..=1.0).contains(&value)
}

/// Body of the status endpoint (accept / reject / reopen).
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SuggestionStatusUpdate {
    pub status: SuggestionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_slot_index: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_start_at: Option<DateTime<Utc>>,
}

impl SuggestionStatusUpdate {
    pub fn accept(slot: &SuggestedSlot) -> Self {
        Self {
            status: SuggestionStatus::Accepted,
            selected_slot_index: Some(slot.slot_index),
            suggested_start_at: Some(slot.suggested_start_at),
        }
    }

    pub fn reject() -> Self {
        Self {
            status: SuggestionStatus::Rejected,
            selected_slot_index: None,
            suggested_start_at: None,
        }
    }

    pub fn reopen() -> Self {
        Self {
            status: SuggestionStatus::Pending,
            selected_slot_index: None,
            suggested_start_at: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
#[serde(default)]
pub struct StatusUpdateResponse {
    pub schedule_entry_id: Option<String>,
    pub message: Option<String>,
    pub status: Option<SuggestionStatus>,
}

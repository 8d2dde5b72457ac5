use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use crate::error::{ApiErrorCode, AppError};
use crate::models::suggestion::{AiSuggestion, ManualInput};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum WorkflowStep {
    Form,
    Loading,
    Suggestions,
    Confirmation,
    Success,
    Error,
    History,
    Analytics,
}

impl WorkflowStep {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowStep::Form => "form",
            WorkflowStep::Loading => "loading",
            WorkflowStep::Suggestions => "suggestions",
            WorkflowStep::Confirmation => "confirmation",
            WorkflowStep::Success => "success",
            WorkflowStep::Error => "error",
            WorkflowStep::History => "history",
            WorkflowStep::Analytics => "analytics",
        }
    }
}

impl fmt::Display for WorkflowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error shown in the workflow, with enough of the underlying kind kept for
/// the UI to pick a recovery action.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowError {
    pub message: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_code: Option<ApiErrorCode>,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl WorkflowError {
    pub fn from_app_error(error: &AppError) -> Self {
        Self {
            message: error.user_message(),
            code: error.code().to_string(),
            api_code: error.api_code(),
            retryable: error.is_retryable(),
            retry_after_secs: error.api_error().and_then(|api| api.retry_after_secs()),
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: "VALIDATION_ERROR".to_string(),
            api_code: None,
            retryable: false,
            retry_after_secs: None,
        }
    }
}

/// Snapshot of the interaction. Replaced wholesale on every transition.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowState {
    pub current_step: WorkflowStep,
    pub manual_input: Option<ManualInput>,
    pub ai_suggestion: Option<AiSuggestion>,
    pub selected_slot_index: Option<u32>,
    pub locked_slots: BTreeSet<u32>,
    pub comparison_slots: Vec<u32>,
    pub error: Option<WorkflowError>,
    pub is_loading: bool,
    pub is_accepting: bool,
    pub schedule_entry_id: Option<String>,
}

impl Default for WorkflowState {
    fn default() -> Self {
        Self {
            current_step: WorkflowStep::Form,
            manual_input: None,
            ai_suggestion: None,
            selected_slot_index: None,
            locked_slots: BTreeSet::new(),
            comparison_slots: Vec::new(),
            error: None,
            is_loading: false,
            is_accepting: false,
            schedule_entry_id: None,
        }
    }
}

impl WorkflowState {
    pub fn is_locked(&self, slot_index: u32) -> bool {
        self.locked_slots.contains(&slot_index)
    }

    pub fn selected_slot(&self) -> Option<&crate::models::suggestion::SuggestedSlot> {
        let index = self.selected_slot_index?;
        self.ai_suggestion.as_ref()?.slot(index)
    }
}

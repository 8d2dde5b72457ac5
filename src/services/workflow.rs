use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::models::suggestion::{AiSuggestion, ManualInput, SuggestionStatus};
use crate::models::workflow::{WorkflowError, WorkflowState, WorkflowStep};

const MAX_COMPARISON_SLOTS: usize = 2;

/// Owns the interaction state. Every operation installs a fresh
/// `WorkflowState`, so a snapshot handed out earlier never changes underneath
/// its holder.
#[derive(Debug)]
pub struct WorkflowStateMachine {
    state: Arc<WorkflowState>,
    history: Vec<WorkflowStep>,
}

impl Default for WorkflowStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowStateMachine {
    pub fn new() -> Self {
        Self {
            state: Arc::new(WorkflowState::default()),
            history: vec![WorkflowStep::Form],
        }
    }

    pub fn snapshot(&self) -> Arc<WorkflowState> {
        Arc::clone(&self.state)
    }

    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    pub fn current_step(&self) -> WorkflowStep {
        self.state.current_step
    }

    /// Audit trail of visited steps. Append-only.
    pub fn history(&self) -> &[WorkflowStep] {
        &self.history
    }

    pub fn can_go_back(&self) -> bool {
        self.history.len() > 1
            && !matches!(
                self.state.current_step,
                WorkflowStep::Form | WorkflowStep::History
            )
    }

    pub fn can_go_forward(&self) -> bool {
        match self.state.current_step {
            WorkflowStep::Form | WorkflowStep::Error => self.state.manual_input.is_some(),
            WorkflowStep::Suggestions => self.state.selected_slot_index.is_some(),
            WorkflowStep::Confirmation => true,
            WorkflowStep::Loading
            | WorkflowStep::Success
            | WorkflowStep::History
            | WorkflowStep::Analytics => false,
        }
    }

    pub fn go_to_form(&mut self) {
        self.transition(WorkflowStep::Form, |next| {
            next.error = None;
            next.is_loading = false;
            next.is_accepting = false;
        });
    }

    pub fn go_to_loading(&mut self) -> AppResult<()> {
        self.ensure_step(&[WorkflowStep::Form, WorkflowStep::Error], "start loading")?;
        self.transition(WorkflowStep::Loading, |next| {
            next.is_loading = true;
            next.error = None;
        });
        Ok(())
    }

    pub fn go_to_suggestions(&mut self, suggestion: AiSuggestion) -> AppResult<()> {
        self.ensure_step(&[WorkflowStep::Loading], "show suggestions")?;
        self.transition(WorkflowStep::Suggestions, |next| {
            next.ai_suggestion = Some(suggestion);
            next.selected_slot_index = None;
            next.locked_slots.clear();
            next.comparison_slots.clear();
            next.error = None;
            next.is_loading = false;
            next.schedule_entry_id = None;
        });
        Ok(())
    }

    /// Returns to a held pending suggestion after a side excursion or a reopen.
    pub fn resume_suggestions(&mut self) -> AppResult<()> {
        self.ensure_step(
            &[
                WorkflowStep::Form,
                WorkflowStep::History,
                WorkflowStep::Analytics,
            ],
            "resume suggestions",
        )?;
        let pending = self
            .state
            .ai_suggestion
            .as_ref()
            .map(|suggestion| suggestion.status == SuggestionStatus::Pending)
            .unwrap_or(false);
        if !pending {
            return Err(AppError::invalid_transition(
                self.state.current_step,
                "resume suggestions without a pending suggestion",
            ));
        }
        self.transition(WorkflowStep::Suggestions, |next| {
            next.error = None;
            next.is_loading = false;
        });
        Ok(())
    }

    pub fn go_to_confirmation(&mut self, schedule_entry_id: impl Into<String>) -> AppResult<()> {
        self.ensure_step(
            &[WorkflowStep::Suggestions, WorkflowStep::Loading],
            "confirm",
        )?;
        if self.state.selected_slot_index.is_none() {
            return Err(AppError::invalid_transition(
                self.state.current_step,
                "confirm without a selected slot",
            ));
        }
        let schedule_entry_id = schedule_entry_id.into();
        self.transition(WorkflowStep::Confirmation, |next| {
            next.schedule_entry_id = Some(schedule_entry_id);
            next.is_loading = false;
            next.is_accepting = false;
            next.error = None;
        });
        Ok(())
    }

    pub fn go_to_success(&mut self) -> AppResult<()> {
        self.ensure_step(&[WorkflowStep::Confirmation], "finish")?;
        self.transition(WorkflowStep::Success, |_| {});
        Ok(())
    }

    pub fn go_to_error(&mut self, error: WorkflowError) -> AppResult<()> {
        self.ensure_step(
            &[WorkflowStep::Loading, WorkflowStep::Suggestions],
            "report an error",
        )?;
        self.transition(WorkflowStep::Error, |next| {
            next.error = Some(error);
            next.is_loading = false;
            next.is_accepting = false;
        });
        Ok(())
    }

    pub fn go_to_history(&mut self) -> AppResult<()> {
        self.ensure_step(&[WorkflowStep::Form, WorkflowStep::Suggestions], "open history")?;
        self.transition(WorkflowStep::History, |_| {});
        Ok(())
    }

    pub fn go_to_analytics(&mut self) -> AppResult<()> {
        self.ensure_step(
            &[WorkflowStep::Form, WorkflowStep::Suggestions],
            "open analytics",
        )?;
        self.transition(WorkflowStep::Analytics, |_| {});
        Ok(())
    }

    pub fn set_manual_input(&mut self, input: ManualInput) -> AppResult<()> {
        self.ensure_step(&[WorkflowStep::Form, WorkflowStep::Error], "edit the request")?;
        self.replace(|next| next.manual_input = Some(input));
        Ok(())
    }

    /// Selecting leaves comparison mode. A locked or unknown slot is refused.
    pub fn set_selected_slot(&mut self, slot_index: Option<u32>) -> AppResult<()> {
        self.ensure_step(&[WorkflowStep::Suggestions], "select a slot")?;
        if let Some(index) = slot_index {
            self.ensure_known_slot(index)?;
            if self.state.is_locked(index) {
                return Err(AppError::validation_field(
                    "selected_slot_index",
                    format!("Slot {index} is locked"),
                ));
            }
        }
        self.replace(|next| {
            next.selected_slot_index = slot_index;
            if slot_index.is_some() {
                next.comparison_slots.clear();
            }
        });
        Ok(())
    }

    /// Locking the selected slot drops the selection.
    pub fn lock_slot(&mut self, slot_index: u32) -> AppResult<()> {
        self.ensure_step(&[WorkflowStep::Suggestions], "lock a slot")?;
        self.ensure_known_slot(slot_index)?;
        let mut locked = self.state.locked_slots.clone();
        locked.insert(slot_index);
        self.replace(|next| {
            next.locked_slots = locked;
            if next.selected_slot_index == Some(slot_index) {
                next.selected_slot_index = None;
            }
        });
        Ok(())
    }

    pub fn unlock_slot(&mut self, slot_index: u32) -> AppResult<()> {
        self.ensure_step(&[WorkflowStep::Suggestions], "unlock a slot")?;
        let mut locked = self.state.locked_slots.clone();
        locked.remove(&slot_index);
        self.replace(|next| next.locked_slots = locked);
        Ok(())
    }

    /// Adds or removes a slot from the comparison pair. Entering comparison
    /// clears the single selection.
    pub fn toggle_comparison(&mut self, slot_index: u32) -> AppResult<()> {
        self.ensure_step(&[WorkflowStep::Suggestions], "compare slots")?;
        self.ensure_known_slot(slot_index)?;

        let mut comparison = self.state.comparison_slots.clone();
        if let Some(position) = comparison.iter().position(|index| *index == slot_index) {
            comparison.remove(position);
        } else if comparison.len() >= MAX_COMPARISON_SLOTS {
            return Err(AppError::validation_field(
                "comparison_slots",
                format!("At most {MAX_COMPARISON_SLOTS} slots can be compared"),
            ));
        } else {
            comparison.push(slot_index);
        }

        self.replace(|next| {
            next.comparison_slots = comparison;
            next.selected_slot_index = None;
        });
        Ok(())
    }

    /// Records an error without leaving the current step.
    pub fn set_error(&mut self, error: WorkflowError) {
        self.replace(|next| next.error = Some(error));
    }

    pub fn clear_error(&mut self) {
        self.replace(|next| next.error = None);
    }

    pub fn set_accepting(&mut self, accepting: bool) {
        self.replace(|next| next.is_accepting = accepting);
    }

    pub fn update_suggestion_status(&mut self, status: SuggestionStatus, at: DateTime<Utc>) {
        let Some(updated) = self
            .state
            .ai_suggestion
            .as_ref()
            .map(|suggestion| suggestion.with_status(status, at))
        else {
            return;
        };
        self.replace(|next| next.ai_suggestion = Some(updated));
    }

    /// Back to an empty form. History keeps the trail.
    pub fn reset(&mut self) {
        let from = self.state.current_step;
        self.state = Arc::new(WorkflowState::default());
        self.history.push(WorkflowStep::Form);
        debug!(target: "app::workflow", from = %from, to = %WorkflowStep::Form, "workflow reset");
    }

    fn ensure_step(&self, allowed: &[WorkflowStep], action: &'static str) -> AppResult<()> {
        if allowed.contains(&self.state.current_step) {
            Ok(())
        } else {
            Err(AppError::invalid_transition(self.state.current_step, action))
        }
    }

    fn ensure_known_slot(&self, slot_index: u32) -> AppResult<()> {
        let known = self
            .state
            .ai_suggestion
            .as_ref()
            .map(|suggestion| suggestion.contains_slot(slot_index))
            .unwrap_or(false);
        if known {
            Ok(())
        } else {
            Err(AppError::validation_field(
                "selected_slot_index",
                format!("Slot {slot_index} is not part of this suggestion"),
            ))
        }
    }

    fn transition(&mut self, to: WorkflowStep, update: impl FnOnce(&mut WorkflowState)) {
        let from = self.state.current_step;
        let mut next = WorkflowState::clone(&self.state);
        next.current_step = to;
        update(&mut next);
        self.state = Arc::new(next);
        self.history.push(to);
        debug!(target: "app::workflow", from = %from, to = %to, "transition");
    }

    fn replace(&mut self, update: impl FnOnce(&mut WorkflowState)) {
        let mut next = WorkflowState::clone(&self.state);
        update(&mut next);
        self.state = Arc::new(next);
    }
}

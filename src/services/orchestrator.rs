//! Generate and accept use cases driven over the workflow state machine.
//!
//! The machine lives behind a `std::sync::Mutex` that is never held across an
//! `.await`; each use case takes the lock to check guards and transition, drops
//! it for the network call, then re-takes it to apply the result.
//!
//! Every request captures the value of a shared epoch counter before it goes
//! out. `reset()` and each new request bump the counter, and a response whose
//! epoch is no longer current is dropped with `AppError::Superseded`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::Utc;
use serde_json::{json, Value as JsonValue};
use tokio::task::AbortHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};
use crate::models::api::{GenerateSuggestionRequest, SuggestionStatusUpdate};
use crate::models::ranking::{SlotComparison, SlotFilter, SlotSort, SlotView};
use crate::models::suggestion::{ManualInput, SuggestionStatus};
use crate::models::workflow::{WorkflowError, WorkflowState, WorkflowStep};
use crate::services::config::WorkflowConfig;
use crate::services::slot_ranker;
use crate::services::suggestion_api::SuggestionTransport;
use crate::services::workflow::WorkflowStateMachine;

pub type SuccessCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Fire-and-forget event sink. A failing sink never interrupts the workflow.
pub trait AnalyticsSink: Send + Sync {
    fn track(&self, event: &str, properties: JsonValue) -> AppResult<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAnalyticsSink;

impl AnalyticsSink for TracingAnalyticsSink {
    fn track(&self, event: &str, properties: JsonValue) -> AppResult<()> {
        info!(target: "app::analytics", event, properties = %properties, "analytics event");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAnalyticsSink;

impl AnalyticsSink for NoopAnalyticsSink {
    fn track(&self, _event: &str, _properties: JsonValue) -> AppResult<()> {
        Ok(())
    }
}

/// Handle to the pending confirmation-to-success transition.
#[derive(Debug)]
pub struct AutoAdvanceHandle {
    abort: AbortHandle,
}

impl AutoAdvanceHandle {
    pub fn cancel(&self) {
        self.abort.abort();
    }
}

#[derive(Debug, Clone)]
struct AcceptRequest {
    suggestion_id: String,
    update: SuggestionStatusUpdate,
}

struct Inner {
    machine: Mutex<WorkflowStateMachine>,
    transport: Arc<dyn SuggestionTransport>,
    analytics: Arc<dyn AnalyticsSink>,
    on_success: Option<SuccessCallback>,
    config: WorkflowConfig,
    last_generate: Mutex<Option<ManualInput>>,
    last_accept: Mutex<Option<AcceptRequest>>,
    auto_advance: Mutex<Option<AbortHandle>>,
    epoch: AtomicU64,
}

impl Inner {
    fn machine(&self) -> MutexGuard<'_, WorkflowStateMachine> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts a new epoch. Call with the machine lock held.
    fn supersede(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    fn track(&self, event: &str, properties: JsonValue) {
        if let Err(err) = self.analytics.track(event, properties) {
            warn!(target: "app::analytics", event, error = %err, "analytics sink failed");
        }
    }

    fn cancel_auto_advance(&self) {
        let pending = lock(&self.auto_advance).take();
        if let Some(handle) = pending {
            handle.abort();
            debug!(target: "app::orchestrator", "auto-advance cancelled");
        }
    }

    fn complete_auto_advance(&self, schedule_entry_id: &str) {
        {
            let mut machine = self.machine();
            let state = machine.state();
            if state.current_step != WorkflowStep::Confirmation
                || state.schedule_entry_id.as_deref() != Some(schedule_entry_id)
            {
                debug!(
                    target: "app::orchestrator",
                    step = %state.current_step,
                    "auto-advance found the workflow elsewhere, skipping"
                );
                return;
            }
            if let Err(err) = machine.go_to_success() {
                warn!(target: "app::orchestrator", error = %err, "auto-advance transition failed");
                return;
            }
        }
        lock(&self.auto_advance).take();

        self.track(
            "suggestion_completed",
            json!({ "scheduleEntryId": schedule_entry_id }),
        );
        if let Some(callback) = &self.on_success {
            callback(schedule_entry_id);
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.auto_advance).take() {
            handle.abort();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct SuggestionOrchestratorBuilder {
    transport: Arc<dyn SuggestionTransport>,
    analytics: Arc<dyn AnalyticsSink>,
    on_success: Option<SuccessCallback>,
    config: WorkflowConfig,
}

impl SuggestionOrchestratorBuilder {
    pub fn analytics(mut self, analytics: Arc<dyn AnalyticsSink>) -> Self {
        self.analytics = analytics;
        self
    }

    pub fn on_success(mut self, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(callback));
        self
    }

    pub fn config(mut self, config: WorkflowConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> SuggestionOrchestrator {
        SuggestionOrchestrator {
            inner: Arc::new(Inner {
                machine: Mutex::new(WorkflowStateMachine::new()),
                transport: self.transport,
                analytics: self.analytics,
                on_success: self.on_success,
                config: self.config,
                last_generate: Mutex::new(None),
                last_accept: Mutex::new(None),
                auto_advance: Mutex::new(None),
                epoch: AtomicU64::new(0),
            }),
        }
    }
}

/// Cheap to clone; clones share one workflow.
#[derive(Clone)]
pub struct SuggestionOrchestrator {
    inner: Arc<Inner>,
}

impl SuggestionOrchestrator {
    pub fn new(transport: Arc<dyn SuggestionTransport>) -> Self {
        Self::builder(transport).build()
    }

    pub fn builder(transport: Arc<dyn SuggestionTransport>) -> SuggestionOrchestratorBuilder {
        SuggestionOrchestratorBuilder {
            transport,
            analytics: Arc::new(TracingAnalyticsSink),
            on_success: None,
            config: WorkflowConfig::default(),
        }
    }

    pub fn state(&self) -> Arc<WorkflowState> {
        self.inner.machine().snapshot()
    }

    pub fn history(&self) -> Vec<WorkflowStep> {
        self.inner.machine().history().to_vec()
    }

    pub fn can_go_back(&self) -> bool {
        self.inner.machine().can_go_back()
    }

    pub fn can_go_forward(&self) -> bool {
        self.inner.machine().can_go_forward()
    }

    /// Validates `input`, then asks the backend for slots.
    ///
    /// Returns `AppError::Superseded` when `reset()` or another request took
    /// over while this one was in flight; the workflow is left untouched.
    pub async fn generate(&self, input: ManualInput) -> AppResult<Arc<WorkflowState>> {
        let epoch = {
            let mut machine = self.inner.machine();
            if machine.state().is_loading {
                return Err(AppError::busy("generate"));
            }
            if let Err(err) = input.validate(Utc::now()) {
                machine.set_error(WorkflowError::from_app_error(&err));
                return Err(err);
            }
            machine.set_manual_input(input.clone())?;
            machine.go_to_loading()?;
            *lock(&self.inner.last_generate) = Some(input.clone());
            self.inner.supersede()
        };

        let request = GenerateSuggestionRequest {
            suggestion_type: self.inner.config.suggestion_type.clone(),
            manual_input: input.clone(),
            timezone: self.inner.config.timezone.clone(),
        };
        info!(
            target: "app::orchestrator",
            duration_minutes = input.duration_minutes,
            "generating suggestions"
        );

        let outcome = match self.inner.transport.generate(&request).await {
            Ok(backend) => backend.into_suggestion(input, Utc::now()),
            Err(err) => Err(err),
        };

        let suggestion = match outcome {
            Ok(suggestion) => suggestion,
            Err(err) => return Err(self.fail(epoch, "generate", err)),
        };

        let suggestion_id = suggestion.id.clone();
        let slot_count = suggestion.slots.len();
        let fallback = suggestion.fallback_auto_mode.enabled;
        let snapshot = {
            let mut machine = self.inner.machine();
            if !self.inner.is_current(epoch) || machine.current_step() != WorkflowStep::Loading {
                return Err(AppError::superseded("generate"));
            }
            machine.go_to_suggestions(suggestion)?;
            lock(&self.inner.last_accept).take();
            machine.snapshot()
        };

        self.inner.track(
            "suggestion_generated",
            json!({
                "suggestionId": suggestion_id,
                "slotCount": slot_count,
                "fallbackAutoMode": fallback,
            }),
        );
        Ok(snapshot)
    }

    /// Re-runs the last generate request.
    pub async fn retry(&self) -> AppResult<Arc<WorkflowState>> {
        let input = lock(&self.inner.last_generate).clone();
        match input {
            Some(input) => self.generate(input).await,
            None => Err(AppError::nothing_to_retry("generate")),
        }
    }

    pub fn select_slot(&self, slot_index: Option<u32>) -> AppResult<()> {
        self.inner.machine().set_selected_slot(slot_index)
    }

    pub fn lock_slot(&self, slot_index: u32) -> AppResult<()> {
        self.inner.machine().lock_slot(slot_index)
    }

    pub fn unlock_slot(&self, slot_index: u32) -> AppResult<()> {
        self.inner.machine().unlock_slot(slot_index)
    }

    pub fn toggle_comparison(&self, slot_index: u32) -> AppResult<()> {
        self.inner.machine().toggle_comparison(slot_index)
    }

    /// Filtered, sorted slots of the current suggestion.
    pub fn view(&self, filter: &SlotFilter, sort: SlotSort) -> Option<SlotView> {
        let state = self.state();
        let suggestion = state.ai_suggestion.as_ref()?;
        Some(slot_ranker::build_view(&suggestion.slots, filter, sort))
    }

    pub fn comparison(&self) -> Option<SlotComparison> {
        let state = self.state();
        let suggestion = state.ai_suggestion.as_ref()?;
        slot_ranker::compare_selected(&suggestion.slots, &state.comparison_slots)
    }

    /// Accepts the currently selected slot.
    pub async fn accept(&self) -> AppResult<AutoAdvanceHandle> {
        let selected = self.state().selected_slot_index;
        match selected {
            Some(slot_index) => self.accept_slot(slot_index).await,
            None => {
                let err = AppError::validation_field("selected_slot_index", "No slot selected");
                self.inner
                    .machine()
                    .set_error(WorkflowError::from_app_error(&err));
                Err(err)
            }
        }
    }

    /// Accepts `slot_index`. Unknown or locked slots are refused before any
    /// network call and leave the step unchanged.
    pub async fn accept_slot(&self, slot_index: u32) -> AppResult<AutoAdvanceHandle> {
        let (request, epoch) = {
            let mut machine = self.inner.machine();
            let state = machine.snapshot();
            if state.is_accepting {
                return Err(AppError::busy("accept"));
            }
            if state.current_step != WorkflowStep::Suggestions {
                return Err(AppError::invalid_transition(state.current_step, "accept"));
            }

            let request = match prepare_accept(&state, slot_index) {
                Ok(request) => request,
                Err(err) => {
                    machine.set_error(WorkflowError::from_app_error(&err));
                    return Err(err);
                }
            };
            if state.selected_slot_index != Some(slot_index) {
                machine.set_selected_slot(Some(slot_index))?;
            }
            machine.clear_error();
            machine.set_accepting(true);
            *lock(&self.inner.last_accept) = Some(request.clone());
            (request, self.inner.supersede())
        };

        self.run_accept(request, epoch).await
    }

    /// Re-issues the last accept request exactly. Only valid from the error
    /// step while the suggestion it was made for is still held.
    pub async fn retry_accept(&self) -> AppResult<AutoAdvanceHandle> {
        let (request, epoch) = {
            let mut machine = self.inner.machine();
            let state = machine.snapshot();
            if state.is_accepting || state.is_loading {
                return Err(AppError::busy("accept"));
            }
            if state.current_step != WorkflowStep::Error {
                return Err(AppError::invalid_transition(
                    state.current_step,
                    "retry accept",
                ));
            }

            let held = state.ai_suggestion.as_ref().map(|s| s.id.as_str());
            let remembered = lock(&self.inner.last_accept).take();
            let request = match remembered {
                Some(request) if held == Some(request.suggestion_id.as_str()) => request,
                _ => return Err(AppError::nothing_to_retry("accept")),
            };
            *lock(&self.inner.last_accept) = Some(request.clone());

            machine.go_to_loading()?;
            machine.set_accepting(true);
            (request, self.inner.supersede())
        };

        self.run_accept(request, epoch).await
    }

    async fn run_accept(
        &self,
        request: AcceptRequest,
        epoch: u64,
    ) -> AppResult<AutoAdvanceHandle> {
        info!(
            target: "app::orchestrator",
            suggestion_id = %request.suggestion_id,
            slot_index = ?request.update.selected_slot_index,
            "accepting slot"
        );

        let response = match self
            .inner
            .transport
            .update_status(&request.suggestion_id, &request.update)
            .await
        {
            Ok(response) => response,
            Err(err) => return Err(self.fail(epoch, "accept", err)),
        };

        let Some(schedule_entry_id) = response
            .schedule_entry_id
            .filter(|id| !id.trim().is_empty())
        else {
            let err = AppError::validation_with_details(
                "Accept response did not include a schedule entry",
                json!({ "suggestionId": request.suggestion_id }),
            );
            return Err(self.fail(epoch, "accept", err));
        };

        let confirmed = {
            let mut machine = self.inner.machine();
            if !self.inner.is_current(epoch) {
                warn!(
                    target: "app::orchestrator",
                    schedule_entry_id = %schedule_entry_id,
                    "accept committed after the workflow moved on"
                );
                return Err(AppError::superseded("accept"));
            }
            let confirmed = machine.go_to_confirmation(schedule_entry_id.clone());
            if confirmed.is_ok() {
                machine.update_suggestion_status(SuggestionStatus::Accepted, Utc::now());
            }
            confirmed
        };
        if let Err(err) = confirmed {
            return Err(self.fail(epoch, "accept", err));
        }

        self.inner.track(
            "suggestion_accepted",
            json!({
                "suggestionId": request.suggestion_id,
                "slotIndex": request.update.selected_slot_index,
                "scheduleEntryId": schedule_entry_id,
            }),
        );
        Ok(self.schedule_auto_advance(schedule_entry_id))
    }

    fn schedule_auto_advance(&self, schedule_entry_id: String) -> AutoAdvanceHandle {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let delay = self.inner.config.auto_advance_delay();

        let task = tokio::spawn(async move {
            sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.complete_auto_advance(&schedule_entry_id);
            }
        });

        let previous = lock(&self.inner.auto_advance).replace(task.abort_handle());
        if let Some(previous) = previous {
            previous.abort();
        }
        debug!(
            target: "app::orchestrator",
            delay_ms = self.inner.config.auto_advance_delay_ms,
            "auto-advance scheduled"
        );

        AutoAdvanceHandle {
            abort: task.abort_handle(),
        }
    }

    /// Marks the held suggestion rejected and returns to the form.
    pub async fn reject(&self) -> AppResult<Arc<WorkflowState>> {
        let (suggestion_id, epoch) = {
            let machine = self.inner.machine();
            let state = machine.state();
            if state.is_accepting {
                return Err(AppError::busy("accept"));
            }
            if state.current_step != WorkflowStep::Suggestions {
                return Err(AppError::invalid_transition(state.current_step, "reject"));
            }
            (held_suggestion_id(state)?, self.inner.supersede())
        };

        if let Err(err) = self
            .inner
            .transport
            .update_status(&suggestion_id, &SuggestionStatusUpdate::reject())
            .await
        {
            return Err(self.fail(epoch, "reject", err));
        }

        let snapshot = {
            let mut machine = self.inner.machine();
            if !self.inner.is_current(epoch) {
                return Err(AppError::superseded("reject"));
            }
            machine.update_suggestion_status(SuggestionStatus::Rejected, Utc::now());
            machine.go_to_form();
            machine.snapshot()
        };
        self.inner
            .track("suggestion_rejected", json!({ "suggestionId": suggestion_id }));
        Ok(snapshot)
    }

    /// Puts a rejected suggestion back to pending and shows it again.
    pub async fn reopen(&self) -> AppResult<Arc<WorkflowState>> {
        let (suggestion_id, epoch) = {
            let machine = self.inner.machine();
            let state = machine.state();
            if !matches!(
                state.current_step,
                WorkflowStep::Form | WorkflowStep::History | WorkflowStep::Analytics
            ) {
                return Err(AppError::invalid_transition(state.current_step, "reopen"));
            }
            let rejected = state
                .ai_suggestion
                .as_ref()
                .map(|suggestion| suggestion.status == SuggestionStatus::Rejected)
                .unwrap_or(false);
            if !rejected {
                return Err(AppError::validation(
                    "Only a rejected suggestion can be reopened",
                ));
            }
            (held_suggestion_id(state)?, self.inner.supersede())
        };

        if let Err(err) = self
            .inner
            .transport
            .update_status(&suggestion_id, &SuggestionStatusUpdate::reopen())
            .await
        {
            return Err(self.fail(epoch, "reopen", err));
        }

        let resumed = {
            let mut machine = self.inner.machine();
            if !self.inner.is_current(epoch) {
                return Err(AppError::superseded("reopen"));
            }
            machine.update_suggestion_status(SuggestionStatus::Pending, Utc::now());
            machine.resume_suggestions().map(|()| machine.snapshot())
        };
        let snapshot = match resumed {
            Ok(snapshot) => snapshot,
            Err(err) => return Err(self.fail(epoch, "reopen", err)),
        };
        self.inner
            .track("suggestion_reopened", json!({ "suggestionId": suggestion_id }));
        Ok(snapshot)
    }

    pub fn back_to_form(&self) {
        self.inner.machine().go_to_form();
    }

    pub fn resume_suggestions(&self) -> AppResult<()> {
        self.inner.machine().resume_suggestions()
    }

    pub fn open_history(&self) -> AppResult<()> {
        self.inner.machine().go_to_history()
    }

    pub fn open_analytics(&self) -> AppResult<()> {
        self.inner.machine().go_to_analytics()
    }

    /// Cancels a pending auto-advance and starts over with an empty form.
    pub fn reset(&self) {
        self.inner.cancel_auto_advance();
        {
            let mut machine = self.inner.machine();
            self.inner.supersede();
            machine.reset();
            lock(&self.inner.last_generate).take();
            lock(&self.inner.last_accept).take();
        }
        info!(target: "app::orchestrator", "workflow reset");
    }

    /// Moves to the error step when a request was in flight there, otherwise
    /// records the error in place and clears the in-flight flag. A failure of
    /// a superseded request is dropped. Returns the error to hand back.
    fn fail(&self, epoch: u64, operation: &'static str, err: AppError) -> AppError {
        let error = WorkflowError::from_app_error(&err);
        {
            let mut machine = self.inner.machine();
            if !self.inner.is_current(epoch) {
                debug!(target: "app::orchestrator", operation, error = %err, "ignoring failure of a superseded request");
                return AppError::superseded(operation);
            }
            match machine.current_step() {
                WorkflowStep::Loading | WorkflowStep::Suggestions => {
                    if let Err(transition) = machine.go_to_error(error) {
                        warn!(target: "app::orchestrator", error = %transition, "could not enter error step");
                    }
                }
                _ => {
                    machine.set_error(error);
                    machine.set_accepting(false);
                }
            }
        }

        self.inner.track(
            "workflow_error",
            json!({
                "operation": operation,
                "code": err.code(),
                "retryable": err.is_retryable(),
                "correlationId": err.correlation_id(),
            }),
        );
        err
    }
}

fn prepare_accept(state: &WorkflowState, slot_index: u32) -> AppResult<AcceptRequest> {
    let suggestion = state
        .ai_suggestion
        .as_ref()
        .ok_or_else(|| AppError::validation("There is no suggestion to accept"))?;
    let slot = suggestion.slot(slot_index).ok_or_else(|| {
        AppError::validation_field(
            "selected_slot_index",
            format!("Slot {slot_index} is not part of this suggestion"),
        )
    })?;
    if state.is_locked(slot_index) {
        return Err(AppError::validation_field(
            "selected_slot_index",
            format!("Slot {slot_index} is locked"),
        ));
    }

    Ok(AcceptRequest {
        suggestion_id: suggestion.id.clone(),
        update: SuggestionStatusUpdate::accept(slot),
    })
}

fn held_suggestion_id(state: &WorkflowState) -> AppResult<String> {
    state
        .ai_suggestion
        .as_ref()
        .map(|suggestion| suggestion.id.clone())
        .ok_or_else(|| AppError::validation("There is no suggestion to update"))
}

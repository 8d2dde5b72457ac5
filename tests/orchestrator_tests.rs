use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::Value as JsonValue;
use slotflow_core::error::{ApiError, ApiErrorCode, AppError, AppResult};
use slotflow_core::models::api::{
    BackendSlot, BackendSuggestion, BackendSuggestionItem, GenerateSuggestionRequest,
    StatusUpdateResponse, SuggestionStatusUpdate,
};
use slotflow_core::models::ranking::{SlotFilter, SlotSort};
use slotflow_core::models::suggestion::{FallbackAutoMode, ManualInput, SuggestionStatus};
use slotflow_core::models::workflow::WorkflowStep;
use slotflow_core::services::orchestrator::{AnalyticsSink, SuggestionOrchestrator};
use slotflow_core::services::suggestion_api::SuggestionTransport;

/// Hands out queued responses in order and records every call.
#[derive(Default)]
struct ScriptedTransport {
    generate_results: Mutex<VecDeque<AppResult<BackendSuggestion>>>,
    status_results: Mutex<VecDeque<AppResult<StatusUpdateResponse>>>,
    generate_requests: Mutex<Vec<GenerateSuggestionRequest>>,
    status_requests: Mutex<Vec<(String, SuggestionStatusUpdate)>>,
    generate_calls: AtomicUsize,
}

impl ScriptedTransport {
    fn with_generate(self, result: AppResult<BackendSuggestion>) -> Self {
        self.generate_results.lock().unwrap().push_back(result);
        self
    }

    fn with_status(self, result: AppResult<StatusUpdateResponse>) -> Self {
        self.status_results.lock().unwrap().push_back(result);
        self
    }

    fn generate_calls(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }

    fn status_requests(&self) -> Vec<(String, SuggestionStatusUpdate)> {
        self.status_requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl SuggestionTransport for ScriptedTransport {
    async fn generate(&self, request: &GenerateSuggestionRequest) -> AppResult<BackendSuggestion> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        self.generate_requests.lock().unwrap().push(request.clone());
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        self.generate_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AppError::other("no scripted generate response")))
    }

    async fn update_status(
        &self,
        suggestion_id: &str,
        update: &SuggestionStatusUpdate,
    ) -> AppResult<StatusUpdateResponse> {
        self.status_requests
            .lock()
            .unwrap()
            .push((suggestion_id.to_string(), update.clone()));
        tokio::time::sleep(StdDuration::from_millis(5)).await;
        self.status_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AppError::other("no scripted status response")))
    }
}

#[derive(Default)]
struct RecordingAnalytics {
    events: Mutex<Vec<(String, JsonValue)>>,
}

impl RecordingAnalytics {
    fn names(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }
}

impl AnalyticsSink for RecordingAnalytics {
    fn track(&self, event: &str, properties: JsonValue) -> AppResult<()> {
        self.events
            .lock()
            .unwrap()
            .push((event.to_string(), properties));
        Ok(())
    }
}

struct FailingAnalytics;

impl AnalyticsSink for FailingAnalytics {
    fn track(&self, _event: &str, _properties: JsonValue) -> AppResult<()> {
        Err(AppError::other("analytics backend offline"))
    }
}

fn manual_input() -> ManualInput {
    ManualInput::new("Write release notes", 60, Utc::now() + Duration::days(2))
}

fn backend_suggestion(confidences: &[f64]) -> BackendSuggestion {
    let start = Utc::now() + Duration::hours(2);
    BackendSuggestion {
        id: "sugg-1".into(),
        status: SuggestionStatus::Pending,
        confidence: None,
        reason: Some("Quiet calendar".into()),
        items: vec![BackendSuggestionItem {
            task_id: None,
            slots: confidences
                .iter()
                .enumerate()
                .map(|(position, confidence)| BackendSlot {
                    slot_index: position as u32,
                    suggested_start_at: start + Duration::hours(position as i64),
                    planned_minutes: 60,
                    confidence: *confidence,
                    reason: "Free block".into(),
                    metadata: None,
                })
                .collect(),
        }],
        fallback_auto_mode: FallbackAutoMode::default(),
        created_at: None,
        updated_at: None,
    }
}

fn scheduled(entry: &str) -> AppResult<StatusUpdateResponse> {
    Ok(StatusUpdateResponse {
        schedule_entry_id: Some(entry.into()),
        message: Some("Scheduled".into()),
        status: Some(SuggestionStatus::Accepted),
    })
}

fn orchestrator(transport: &Arc<ScriptedTransport>) -> SuggestionOrchestrator {
    SuggestionOrchestrator::new(transport.clone())
}

#[tokio::test]
async fn generate_shows_slots_with_the_requested_duration() {
    let transport = Arc::new(ScriptedTransport::default().with_generate(Ok(backend_suggestion(&[
        0.9, 0.7, 0.4,
    ]))));
    let analytics = Arc::new(RecordingAnalytics::default());
    let orchestrator = SuggestionOrchestrator::builder(transport.clone())
        .analytics(analytics.clone())
        .build();

    let state = orchestrator
        .generate(manual_input())
        .await
        .expect("generate succeeds");

    assert_eq!(state.current_step, WorkflowStep::Suggestions);
    let suggestion = state.ai_suggestion.as_ref().expect("suggestion stored");
    assert!(!suggestion.slots.is_empty());
    assert!(suggestion.slots.iter().all(|slot| slot.planned_minutes == 60));
    assert!(!state.is_loading);

    let requests = transport.generate_requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].manual_input.duration_minutes, 60);
    assert_eq!(requests[0].suggestion_type, "manual");
    assert_eq!(requests[0].timezone, "UTC");
    assert_eq!(analytics.names(), vec!["suggestion_generated".to_string()]);
    assert_eq!(
        orchestrator.history(),
        vec![
            WorkflowStep::Form,
            WorkflowStep::Loading,
            WorkflowStep::Suggestions
        ]
    );
}

#[tokio::test]
async fn invalid_input_never_reaches_the_transport() {
    let transport = Arc::new(ScriptedTransport::default());
    let orchestrator = orchestrator(&transport);

    let mut input = manual_input();
    input.duration_minutes = 50;
    let error = orchestrator
        .generate(input)
        .await
        .expect_err("off-grid duration");

    assert!(matches!(error, AppError::Validation { .. }));
    assert_eq!(transport.generate_calls(), 0);
    let state = orchestrator.state();
    assert_eq!(state.current_step, WorkflowStep::Form);
    assert_eq!(
        state.error.as_ref().map(|e| e.code.as_str()),
        Some("VALIDATION_ERROR")
    );
}

#[tokio::test]
async fn out_of_range_slot_is_rejected_before_any_network_call() {
    let transport = Arc::new(
        ScriptedTransport::default().with_generate(Ok(backend_suggestion(&[0.8, 0.6, 0.5]))),
    );
    let orchestrator = orchestrator(&transport);
    orchestrator.generate(manual_input()).await.expect("generate");

    let error = orchestrator
        .accept_slot(5)
        .await
        .expect_err("slot 5 does not exist");

    assert!(matches!(error, AppError::Validation { .. }));
    assert!(transport.status_requests().is_empty());
    let state = orchestrator.state();
    assert_eq!(state.current_step, WorkflowStep::Suggestions);
    let shown = state.error.as_ref().expect("validation error shown");
    assert_eq!(shown.code, "VALIDATION_ERROR");
    assert!(!state.is_accepting);
}

#[tokio::test]
async fn locked_or_missing_selection_is_rejected_locally() {
    let transport = Arc::new(
        ScriptedTransport::default().with_generate(Ok(backend_suggestion(&[0.8, 0.6]))),
    );
    let orchestrator = orchestrator(&transport);
    orchestrator.generate(manual_input()).await.expect("generate");

    assert!(orchestrator.accept().await.is_err());

    orchestrator.lock_slot(1).expect("lock");
    assert!(orchestrator.select_slot(Some(1)).is_err());
    assert!(orchestrator.accept_slot(1).await.is_err());

    assert!(transport.status_requests().is_empty());
    assert_eq!(orchestrator.state().current_step, WorkflowStep::Suggestions);
}

#[tokio::test]
async fn exhausted_rate_limit_is_reported_as_rate_limiting() {
    let rate_limited = AppError::api(
        ApiError::RateLimited {
            retry_after_secs: Some(900),
            limit: None,
            message: "Too many requests".into(),
        },
        Some("corr-1"),
    );
    let transport = Arc::new(ScriptedTransport::default().with_generate(Err(rate_limited)));
    let analytics = Arc::new(RecordingAnalytics::default());
    let orchestrator = SuggestionOrchestrator::builder(transport.clone())
        .analytics(analytics.clone())
        .build();

    let error = orchestrator
        .generate(manual_input())
        .await
        .expect_err("429");
    assert_eq!(error.api_code(), Some(ApiErrorCode::RateLimited));

    let state = orchestrator.state();
    assert_eq!(state.current_step, WorkflowStep::Error);
    let shown = state.error.as_ref().expect("error stored");
    assert_eq!(shown.api_code, Some(ApiErrorCode::RateLimited));
    assert_eq!(shown.retry_after_secs, Some(900));
    assert!(shown.retryable);
    assert!(shown.message.starts_with("Too many requests"));
    assert!(shown.message.contains("15 minutes"));
    assert!(!state.is_loading);
    assert_eq!(analytics.names(), vec!["workflow_error".to_string()]);
}

#[tokio::test]
async fn concurrent_generate_calls_issue_one_request() {
    let transport = Arc::new(
        ScriptedTransport::default()
            .with_generate(Ok(backend_suggestion(&[0.9])))
            .with_generate(Ok(backend_suggestion(&[0.9]))),
    );
    let orchestrator = orchestrator(&transport);

    let (first, second) = futures::join!(
        orchestrator.generate(manual_input()),
        orchestrator.generate(manual_input())
    );

    assert!(first.is_ok());
    assert!(matches!(
        second,
        Err(AppError::Busy {
            operation: "generate"
        })
    ));
    assert_eq!(transport.generate_calls(), 1);
}

#[tokio::test]
async fn retry_reissues_the_last_input() {
    let transport = Arc::new(
        ScriptedTransport::default()
            .with_generate(Err(AppError::from(ApiError::Network {
                message: "offline".into(),
            })))
            .with_generate(Ok(backend_suggestion(&[0.75]))),
    );
    let orchestrator = orchestrator(&transport);

    assert!(matches!(
        orchestrator.retry().await,
        Err(AppError::NothingToRetry { .. })
    ));

    orchestrator
        .generate(manual_input())
        .await
        .expect_err("network failure");
    let state = orchestrator.state();
    assert_eq!(state.current_step, WorkflowStep::Error);
    assert!(orchestrator.can_go_forward());

    let state = orchestrator.retry().await.expect("retry succeeds");
    assert_eq!(state.current_step, WorkflowStep::Suggestions);
    assert_eq!(transport.generate_calls(), 2);
    let requests = transport.generate_requests.lock().unwrap().clone();
    assert_eq!(requests[0].manual_input, requests[1].manual_input);
}

#[tokio::test(start_paused = true)]
async fn accept_confirms_then_advances_to_success_after_the_delay() {
    let transport = Arc::new(
        ScriptedTransport::default()
            .with_generate(Ok(backend_suggestion(&[0.9, 0.8, 0.3])))
            .with_status(scheduled("entry-77")),
    );
    let completed = Arc::new(Mutex::new(Vec::<String>::new()));
    let sink = completed.clone();
    let orchestrator = SuggestionOrchestrator::builder(transport.clone())
        .on_success(move |entry: &str| sink.lock().unwrap().push(entry.to_string()))
        .build();

    orchestrator.generate(manual_input()).await.expect("generate");
    orchestrator.select_slot(Some(1)).expect("select");
    orchestrator.accept().await.expect("accept succeeds");

    let state = orchestrator.state();
    assert_eq!(state.current_step, WorkflowStep::Confirmation);
    assert_eq!(state.schedule_entry_id.as_deref(), Some("entry-77"));
    assert_eq!(
        state.ai_suggestion.as_ref().map(|s| s.status),
        Some(SuggestionStatus::Accepted)
    );

    let requests = transport.status_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].0, "sugg-1");
    assert_eq!(requests[0].1.status, SuggestionStatus::Accepted);
    assert_eq!(requests[0].1.selected_slot_index, Some(1));
    let selected_start = state.selected_slot().map(|slot| slot.suggested_start_at);
    assert_eq!(requests[0].1.suggested_start_at, selected_start);

    tokio::time::sleep(StdDuration::from_millis(2_990)).await;
    assert_eq!(orchestrator.state().current_step, WorkflowStep::Confirmation);
    assert!(completed.lock().unwrap().is_empty());

    tokio::time::sleep(StdDuration::from_millis(20)).await;
    assert_eq!(orchestrator.state().current_step, WorkflowStep::Success);
    assert_eq!(*completed.lock().unwrap(), vec!["entry-77".to_string()]);
    assert_eq!(
        orchestrator.history().last().copied(),
        Some(WorkflowStep::Success)
    );
}

#[tokio::test(start_paused = true)]
async fn reset_cancels_the_pending_auto_advance() {
    let transport = Arc::new(
        ScriptedTransport::default()
            .with_generate(Ok(backend_suggestion(&[0.9])))
            .with_status(scheduled("entry-1")),
    );
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let orchestrator = SuggestionOrchestrator::builder(transport.clone())
        .on_success(move |_: &str| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .build();

    orchestrator.generate(manual_input()).await.expect("generate");
    orchestrator.accept_slot(0).await.expect("accept");
    orchestrator.reset();

    tokio::time::sleep(StdDuration::from_secs(10)).await;
    let state = orchestrator.state();
    assert_eq!(state.current_step, WorkflowStep::Form);
    assert!(state.ai_suggestion.is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn cancelled_handle_keeps_the_confirmation_step() {
    let transport = Arc::new(
        ScriptedTransport::default()
            .with_generate(Ok(backend_suggestion(&[0.9])))
            .with_status(scheduled("entry-2")),
    );
    let orchestrator = orchestrator(&transport);

    orchestrator.generate(manual_input()).await.expect("generate");
    let handle = orchestrator.accept_slot(0).await.expect("accept");
    handle.cancel();

    tokio::time::sleep(StdDuration::from_secs(10)).await;
    assert_eq!(orchestrator.state().current_step, WorkflowStep::Confirmation);
}

#[tokio::test]
async fn retry_accept_reissues_the_same_request() {
    let transport = Arc::new(
        ScriptedTransport::default()
            .with_generate(Ok(backend_suggestion(&[0.9, 0.8, 0.7])))
            .with_status(Err(AppError::from(ApiError::Server {
                status: 503,
                message: "unavailable".into(),
            })))
            .with_status(scheduled("entry-5")),
    );
    let orchestrator = orchestrator(&transport);

    orchestrator.generate(manual_input()).await.expect("generate");
    orchestrator
        .accept_slot(2)
        .await
        .expect_err("server unavailable");

    let state = orchestrator.state();
    assert_eq!(state.current_step, WorkflowStep::Error);
    assert!(!state.is_accepting);
    assert_eq!(
        state.error.as_ref().and_then(|e| e.api_code),
        Some(ApiErrorCode::Server)
    );

    let _handle = orchestrator.retry_accept().await.expect("retry succeeds");
    let state = orchestrator.state();
    assert_eq!(state.current_step, WorkflowStep::Confirmation);
    assert_eq!(state.schedule_entry_id.as_deref(), Some("entry-5"));

    let requests = transport.status_requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0], requests[1]);
    assert_eq!(requests[1].1.selected_slot_index, Some(2));
}

#[tokio::test]
async fn accept_without_schedule_entry_never_confirms() {
    let transport = Arc::new(
        ScriptedTransport::default()
            .with_generate(Ok(backend_suggestion(&[0.9])))
            .with_status(Ok(StatusUpdateResponse::default())),
    );
    let orchestrator = orchestrator(&transport);

    orchestrator.generate(manual_input()).await.expect("generate");
    orchestrator
        .accept_slot(0)
        .await
        .expect_err("missing schedule entry");

    assert_eq!(orchestrator.state().current_step, WorkflowStep::Error);
    assert!(!orchestrator
        .history()
        .iter()
        .any(|step| matches!(step, WorkflowStep::Confirmation | WorkflowStep::Success)));
}

#[tokio::test]
async fn reject_then_reopen_round_trips_the_suggestion() {
    let transport = Arc::new(
        ScriptedTransport::default()
            .with_generate(Ok(backend_suggestion(&[0.9, 0.5])))
            .with_status(Ok(StatusUpdateResponse::default()))
            .with_status(Ok(StatusUpdateResponse::default())),
    );
    let analytics = Arc::new(RecordingAnalytics::default());
    let orchestrator = SuggestionOrchestrator::builder(transport.clone())
        .analytics(analytics.clone())
        .build();

    orchestrator.generate(manual_input()).await.expect("generate");
    assert!(orchestrator.reopen().await.is_err());

    let state = orchestrator.reject().await.expect("reject");
    assert_eq!(state.current_step, WorkflowStep::Form);
    assert_eq!(
        state.ai_suggestion.as_ref().map(|s| s.status),
        Some(SuggestionStatus::Rejected)
    );
    assert!(orchestrator.resume_suggestions().is_err());

    let state = orchestrator.reopen().await.expect("reopen");
    assert_eq!(state.current_step, WorkflowStep::Suggestions);
    assert_eq!(
        state.ai_suggestion.as_ref().map(|s| s.status),
        Some(SuggestionStatus::Pending)
    );

    let statuses: Vec<SuggestionStatus> = transport
        .status_requests()
        .iter()
        .map(|(_, update)| update.status)
        .collect();
    assert_eq!(
        statuses,
        vec![SuggestionStatus::Rejected, SuggestionStatus::Pending]
    );
    let names = analytics.names();
    assert!(names.contains(&"suggestion_rejected".to_string()));
    assert!(names.contains(&"suggestion_reopened".to_string()));
}

#[tokio::test]
async fn failing_analytics_does_not_interrupt_the_workflow() {
    let transport = Arc::new(
        ScriptedTransport::default().with_generate(Ok(backend_suggestion(&[0.6]))),
    );
    let orchestrator = SuggestionOrchestrator::builder(transport.clone())
        .analytics(Arc::new(FailingAnalytics))
        .build();

    let state = orchestrator
        .generate(manual_input())
        .await
        .expect("generate succeeds");
    assert_eq!(state.current_step, WorkflowStep::Suggestions);
}

#[tokio::test]
async fn comparison_and_selection_are_exclusive_modes() {
    let transport = Arc::new(
        ScriptedTransport::default().with_generate(Ok(backend_suggestion(&[0.3, 0.6, 0.8, 0.9]))),
    );
    let orchestrator = orchestrator(&transport);
    orchestrator.generate(manual_input()).await.expect("generate");

    orchestrator.select_slot(Some(3)).expect("select");
    orchestrator.toggle_comparison(0).expect("compare first");
    assert_eq!(orchestrator.state().selected_slot_index, None);
    assert!(orchestrator.comparison().is_none());

    orchestrator.toggle_comparison(2).expect("compare second");
    let comparison = orchestrator.comparison().expect("two slots chosen");
    assert_eq!(comparison.time_difference_minutes, 120);
    assert!((comparison.confidence_difference - 0.5).abs() < 1e-9);
    assert!(comparison.duration_match);
    assert!(orchestrator.toggle_comparison(1).is_err());

    orchestrator.select_slot(Some(1)).expect("select again");
    assert!(orchestrator.state().comparison_slots.is_empty());

    let view = orchestrator
        .view(&SlotFilter::default().min_confidence(0.7), SlotSort::default())
        .expect("suggestion held");
    assert_eq!(view.total, 4);
    assert_eq!(view.visible, 2);
}

fn backend_suggestion_with_id(id: &str, confidences: &[f64]) -> BackendSuggestion {
    let mut suggestion = backend_suggestion(confidences);
    suggestion.id = id.into();
    suggestion
}

fn unavailable() -> AppError {
    AppError::from(ApiError::Server {
        status: 503,
        message: "unavailable".into(),
    })
}

#[tokio::test(start_paused = true)]
async fn response_from_before_a_reset_is_not_applied() {
    let transport = Arc::new(
        ScriptedTransport::default()
            .with_generate(Ok(backend_suggestion_with_id("stale", &[0.9])))
            .with_generate(Ok(backend_suggestion_with_id("fresh", &[0.8]))),
    );
    let orchestrator = orchestrator(&transport);

    let first = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.generate(manual_input()).await }
    });
    tokio::time::sleep(StdDuration::from_millis(5)).await;
    orchestrator.reset();

    let second = orchestrator
        .generate(manual_input())
        .await
        .expect("second generate applies");
    let first = first.await.expect("first task joins");

    assert!(matches!(
        first,
        Err(AppError::Superseded {
            operation: "generate"
        })
    ));
    assert_eq!(
        second.ai_suggestion.as_ref().map(|s| s.id.as_str()),
        Some("fresh")
    );
    let state = orchestrator.state();
    assert_eq!(state.current_step, WorkflowStep::Suggestions);
    assert_eq!(
        state.ai_suggestion.as_ref().map(|s| s.id.as_str()),
        Some("fresh")
    );
    assert_eq!(transport.generate_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn failure_from_before_a_reset_does_not_fail_the_new_request() {
    let transport = Arc::new(
        ScriptedTransport::default()
            .with_generate(Err(AppError::from(ApiError::Network {
                message: "offline".into(),
            })))
            .with_generate(Ok(backend_suggestion_with_id("fresh", &[0.8]))),
    );
    let analytics = Arc::new(RecordingAnalytics::default());
    let orchestrator = SuggestionOrchestrator::builder(transport.clone())
        .analytics(analytics.clone())
        .build();

    let first = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.generate(manual_input()).await }
    });
    tokio::time::sleep(StdDuration::from_millis(5)).await;
    orchestrator.reset();

    let state = orchestrator
        .generate(manual_input())
        .await
        .expect("second generate applies");
    let first = first.await.expect("first task joins");

    assert!(matches!(first, Err(AppError::Superseded { .. })));
    assert_eq!(state.current_step, WorkflowStep::Suggestions);
    assert!(state.error.is_none());
    assert!(!orchestrator.history().contains(&WorkflowStep::Error));
    assert_eq!(analytics.names(), vec!["suggestion_generated".to_string()]);
}

#[tokio::test]
async fn new_suggestion_forgets_the_previous_accept() {
    let transport = Arc::new(
        ScriptedTransport::default()
            .with_generate(Ok(backend_suggestion(&[0.9, 0.8])))
            .with_generate(Ok(backend_suggestion(&[0.7, 0.6])))
            .with_status(Err(unavailable()))
            .with_status(Err(unavailable())),
    );
    let orchestrator = orchestrator(&transport);

    orchestrator.generate(manual_input()).await.expect("generate");
    orchestrator.accept_slot(1).await.expect_err("accept fails");
    assert_eq!(orchestrator.state().current_step, WorkflowStep::Error);

    orchestrator.retry().await.expect("fresh suggestion");
    orchestrator.reject().await.expect_err("reject fails");
    assert_eq!(orchestrator.state().current_step, WorkflowStep::Error);

    assert!(matches!(
        orchestrator.retry_accept().await,
        Err(AppError::NothingToRetry { operation: "accept" })
    ));
    assert_eq!(transport.status_requests().len(), 2);
}

#[tokio::test]
async fn retry_accept_only_runs_from_the_error_step() {
    let transport = Arc::new(
        ScriptedTransport::default()
            .with_generate(Ok(backend_suggestion(&[0.9, 0.8])))
            .with_generate(Ok(backend_suggestion(&[0.9, 0.8])))
            .with_status(Err(unavailable())),
    );
    let orchestrator = orchestrator(&transport);

    orchestrator.generate(manual_input()).await.expect("generate");
    orchestrator.accept_slot(0).await.expect_err("accept fails");
    orchestrator.back_to_form();

    let error = orchestrator
        .retry_accept()
        .await
        .expect_err("not from the form");
    assert!(matches!(
        error,
        AppError::InvalidTransition {
            from: WorkflowStep::Form,
            ..
        }
    ));
    assert_eq!(transport.status_requests().len(), 1);

    let state = orchestrator.state();
    assert!(!state.is_loading);
    assert!(!state.is_accepting);
    let state = orchestrator
        .generate(manual_input())
        .await
        .expect("workflow is not stuck");
    assert_eq!(state.current_step, WorkflowStep::Suggestions);
}

#[tokio::test(start_paused = true)]
async fn accept_landing_after_navigation_does_not_leave_the_workflow_busy() {
    let transport = Arc::new(
        ScriptedTransport::default()
            .with_generate(Ok(backend_suggestion(&[0.9])))
            .with_generate(Ok(backend_suggestion(&[0.9])))
            .with_status(scheduled("entry-9")),
    );
    let orchestrator = orchestrator(&transport);
    orchestrator.generate(manual_input()).await.expect("generate");

    let accept = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.accept_slot(0).await.map(|_| ()) }
    });
    tokio::time::sleep(StdDuration::from_millis(1)).await;
    orchestrator.back_to_form();

    let result = accept.await.expect("accept task joins");
    assert!(matches!(result, Err(AppError::InvalidTransition { .. })));

    let state = orchestrator.state();
    assert_eq!(state.current_step, WorkflowStep::Form);
    assert!(!state.is_accepting);
    assert!(!state.is_loading);
    assert_eq!(
        state.error.as_ref().map(|e| e.code.as_str()),
        Some("INVALID_TRANSITION")
    );

    let state = orchestrator
        .generate(manual_input())
        .await
        .expect("generate after the interrupted accept");
    assert_eq!(state.current_step, WorkflowStep::Suggestions);
}

#[tokio::test(start_paused = true)]
async fn reset_during_accept_drops_the_late_confirmation() {
    let transport = Arc::new(
        ScriptedTransport::default()
            .with_generate(Ok(backend_suggestion(&[0.9])))
            .with_status(scheduled("entry-4")),
    );
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let orchestrator = SuggestionOrchestrator::builder(transport.clone())
        .on_success(move |_: &str| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .build();
    orchestrator.generate(manual_input()).await.expect("generate");

    let accept = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.accept_slot(0).await.map(|_| ()) }
    });
    tokio::time::sleep(StdDuration::from_millis(1)).await;
    orchestrator.reset();

    let result = accept.await.expect("accept task joins");
    assert!(matches!(
        result,
        Err(AppError::Superseded { operation: "accept" })
    ));

    tokio::time::sleep(StdDuration::from_secs(10)).await;
    let state = orchestrator.state();
    assert_eq!(state.current_step, WorkflowStep::Form);
    assert!(state.schedule_entry_id.is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

use super::*;
use std::{
    convert::Infallible,
    sync::atomic::{AtomicUsize, Ordering},
};

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response as AxumResponse},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use storage::MemoryStorage;
use tokio::{net::TcpListener, sync::Mutex};

use crate::{
    request::build_review_request,
    roles::{NewRole, RoleSet},
    settings::{LlmConfig, SettingsStore},
    view::ResultsLayout,
};

#[derive(Clone)]
struct BackendState {
    stream_status: StatusCode,
    list_status: StatusCode,
    stream_chunks: Arc<Vec<String>>,
    stream_bodies: Arc<Mutex<Vec<Value>>>,
    list_calls: Arc<AtomicUsize>,
}

impl BackendState {
    fn streaming(chunks: Vec<String>) -> Self {
        Self {
            stream_status: StatusCode::OK,
            list_status: StatusCode::OK,
            stream_chunks: Arc::new(chunks),
            stream_bodies: Arc::new(Mutex::new(Vec::new())),
            list_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn failing(status: StatusCode) -> Self {
        Self {
            stream_status: status,
            ..Self::streaming(Vec::new())
        }
    }
}

fn sse(event: Value) -> String {
    format!("data: {event}\n\n")
}

fn conversation_json(id: &str) -> Value {
    json!({
        "id": id,
        "created_at": "2026-10-17T14:05:09.123456",
        "title": "New Conversation",
        "messages": []
    })
}

fn stage1_event() -> Value {
    json!({"type": "stage1_complete", "data": [
        {"model": "academic", "response": "Link each step to NMC proficiency 4.2."},
        {"model": "clinical_mentor", "response": "Add a ward scenario with a sliding scale."}
    ]})
}

fn stage2_event() -> Value {
    json!({"type": "stage2_complete", "data": [
        {"model": "academic", "ranking": "FINAL RANKING:\n1. Response B\n2. Response A", "parsed_ranking": ["Response B", "Response A"]},
        {"model": "clinical_mentor", "ranking": "FINAL RANKING:\n1. Response A\n2. Response B", "parsed_ranking": ["Response A", "Response B"]}
    ], "metadata": {
        "label_to_model": {"Response A": "academic", "Response B": "clinical_mentor"},
        "aggregate_rankings": [
            {"model": "academic", "average_rank": 1.5, "rankings_count": 2},
            {"model": "clinical_mentor", "average_rank": 1.5, "rankings_count": 2}
        ]
    }})
}

fn stage3_event() -> Value {
    json!({"type": "stage3_complete", "data": {
        "model": "chairman",
        "response": "Approve with a ward scenario and explicit NMC mapping."
    }})
}

fn full_review_stream() -> Vec<String> {
    vec![
        sse(json!({"type": "stage1_start"})),
        sse(stage1_event()),
        sse(json!({"type": "stage2_start"})),
        sse(stage2_event()),
        sse(json!({"type": "stage3_start"})),
        sse(stage3_event()),
        sse(json!({"type": "title_complete", "data": {"title": "Insulin Administration"}})),
        sse(json!({"type": "complete"})),
    ]
}

async fn handle_health() -> Json<Value> {
    Json(json!({"status": "ok", "service": "Nursing Council Agent API"}))
}

async fn handle_list(State(state): State<BackendState>) -> AxumResponse {
    state.list_calls.fetch_add(1, Ordering::SeqCst);
    if state.list_status != StatusCode::OK {
        return (state.list_status, Json(json!({"detail": "history store offline"}))).into_response();
    }
    Json(json!([{
        "id": "conv-1",
        "created_at": "2026-10-17T14:05:09.123456",
        "title": "Insulin Administration",
        "message_count": 2
    }]))
    .into_response()
}

async fn handle_create(Json(body): Json<Value>) -> Json<Value> {
    assert_eq!(body, json!({}));
    Json(conversation_json("conv-1"))
}

async fn handle_get(Path(id): Path<String>) -> AxumResponse {
    if id == "missing" {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"detail": "Conversation not found"})),
        )
            .into_response();
    }
    Json(json!({
        "id": id,
        "created_at": "2026-10-17T14:05:09.123456",
        "title": "Insulin Administration",
        "messages": [
            {"role": "user", "content": "Explain insulin administration"},
            {"role": "assistant",
             "stage1": stage1_event()["data"],
             "stage2": stage2_event()["data"],
             "stage3": stage3_event()["data"]},
            {"role": "user", "content": "Follow-up"},
            {"role": "assistant", "stage1": [], "stage2": [], "stage3": "Second answer"}
        ]
    }))
    .into_response()
}

async fn handle_message(Json(body): Json<Value>) -> Json<Value> {
    assert!(body["content"].is_string());
    Json(json!({
        "stage1": stage1_event()["data"],
        "stage2": stage2_event()["data"],
        "stage3": stage3_event()["data"],
        "metadata": stage2_event()["metadata"]
    }))
}

async fn handle_stream(
    State(state): State<BackendState>,
    Path(_id): Path<String>,
    Json(body): Json<Value>,
) -> AxumResponse {
    state.stream_bodies.lock().await.push(body);
    if state.stream_status != StatusCode::OK {
        return (
            state.stream_status,
            Json(json!({"detail": "council unavailable"})),
        )
            .into_response();
    }
    let chunks: Vec<Result<String, Infallible>> =
        state.stream_chunks.iter().cloned().map(Ok).collect();
    (
        [(header::CONTENT_TYPE, "text/event-stream")],
        Body::from_stream(futures::stream::iter(chunks)),
    )
        .into_response()
}

async fn handle_export(Path(id): Path<String>) -> AxumResponse {
    let disposition = if id == "traversal" {
        "attachment; filename=\"../../.bashrc\""
    } else {
        "attachment; filename=\"Insulin_Administration.pdf\""
    };
    (
        [
            (header::CONTENT_TYPE, "application/pdf"),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        b"%PDF-1.4 council".to_vec(),
    )
        .into_response()
}

async fn spawn_backend(state: BackendState) -> Result<String> {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let app = Router::new()
        .route("/api/health", get(handle_health))
        .route("/api/conversations", get(handle_list).post(handle_create))
        .route("/api/conversations/:id", get(handle_get))
        .route("/api/conversations/:id/message", post(handle_message))
        .route("/api/conversations/:id/message/stream", post(handle_stream))
        .route("/api/conversations/:id/export/pdf", post(handle_export))
        .with_state(state);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(format!("http://{addr}"))
}

fn drain(events: &mut broadcast::Receiver<ClientEvent>) -> Vec<ClientEvent> {
    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        received.push(event);
    }
    received
}

fn insulin_request() -> ReviewRequest {
    build_review_request("Explain insulin administration", &RoleSet::with_builtins(), None)
        .expect("request")
}

#[tokio::test]
async fn health_reports_backend_status() {
    let base = spawn_backend(BackendState::streaming(Vec::new()))
        .await
        .expect("spawn backend");
    let client = CouncilClient::new(base);

    let health = client.health().await.expect("health");
    assert_eq!(health.status, "ok");
    assert_eq!(health.service.as_deref(), Some("Nursing Council Agent API"));
}

#[tokio::test]
async fn conversation_endpoints_decode_backend_shapes() {
    let state = BackendState::streaming(Vec::new());
    let base = spawn_backend(state.clone()).await.expect("spawn backend");
    let client = CouncilClient::new(format!("{base}/"));
    let mut events = client.subscribe_events();

    let created = client.create_conversation().await.expect("create");
    assert_eq!(created.id.as_str(), "conv-1");
    assert!(created.messages.is_empty());

    let listed = client.refresh_conversations().await.expect("list");
    assert_eq!(listed[0].message_count, 2);
    assert_eq!(state.list_calls.load(Ordering::SeqCst), 1);
    assert!(matches!(
        drain(&mut events).as_slice(),
        [ClientEvent::ConversationsListed(list)] if list.len() == 1
    ));

    let conversation = client
        .get_conversation(&ConversationId::from("conv-9"))
        .await
        .expect("get");
    assert_eq!(conversation.message_count(), 4);
}

#[tokio::test]
async fn insulin_review_publishes_three_updates_then_completion() {
    let state = BackendState::streaming(full_review_stream());
    let base = spawn_backend(state.clone()).await.expect("spawn backend");
    let client = CouncilClient::new(base);
    let mut events = client.subscribe_events();

    let run = client
        .submit_review(insulin_request())
        .await
        .expect("review");

    assert_eq!(run.conversation_id.as_str(), "conv-1");
    assert_eq!(run.title.as_deref(), Some("Insulin Administration"));
    assert!(run.outcome.is_completed());

    let received = drain(&mut events);
    let updates: Vec<ReviewStage> = received
        .iter()
        .filter_map(|event| match event {
            ClientEvent::ReviewUpdated { stage, .. } => Some(*stage),
            _ => None,
        })
        .collect();
    assert_eq!(
        updates,
        vec![ReviewStage::Stage1, ReviewStage::Stage2, ReviewStage::Stage3]
    );
    let completions = received
        .iter()
        .filter(|event| matches!(event, ClientEvent::ReviewCompleted { .. }))
        .count();
    assert_eq!(completions, 1);
    assert!(received
        .iter()
        .any(|event| matches!(event, ClientEvent::ConversationsListed(_))));
    assert_eq!(state.list_calls.load(Ordering::SeqCst), 1);

    let snapshot = run.outcome.snapshot();
    assert_eq!(snapshot.stage1.as_ref().map(Vec::len), Some(2));
    assert_eq!(snapshot.stage2.as_ref().map(Vec::len), Some(2));
    assert_eq!(
        snapshot
            .stage2_metadata
            .as_ref()
            .map(|metadata| metadata.aggregate_rankings.len()),
        Some(2)
    );

    let mut layout = ResultsLayout::from_snapshot(snapshot, &RoleSet::with_builtins());
    assert_eq!(
        layout.synthesis().map(|card| card.body.as_str()),
        Some("Approve with a ward scenario and explicit NMC mapping.")
    );
    assert_eq!(layout.perspectives().len(), 2);
    assert!(layout.visible_rankings().is_empty());
    layout.expand_rankings();
    assert_eq!(layout.visible_rankings().len(), 2);
}

#[tokio::test]
async fn line_split_across_chunks_is_reassembled() {
    let joined = full_review_stream().concat();
    let chunks: Vec<String> = joined
        .as_bytes()
        .chunks(37)
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect();
    // The fixture is ASCII, so byte chunks stay valid UTF-8.
    assert_eq!(chunks.concat(), joined);

    let base = spawn_backend(BackendState::streaming(chunks))
        .await
        .expect("spawn backend");
    let client = CouncilClient::with_framing(base, LineFraming::Buffered);

    let run = client.submit_review(insulin_request()).await.expect("review");
    assert!(run.outcome.is_completed());
    assert!(run.outcome.snapshot().stage3.is_some());
}

#[tokio::test]
async fn non_success_status_fails_before_streaming() {
    let base = spawn_backend(BackendState::failing(StatusCode::INTERNAL_SERVER_ERROR))
        .await
        .expect("spawn backend");
    let client = CouncilClient::new(base);
    let mut events = client.subscribe_events();

    let err = client
        .submit_review(insulin_request())
        .await
        .expect_err("must fail");

    let client_err = err.downcast_ref::<ClientError>().expect("client error");
    assert_eq!(client_err.status(), Some(500));
    assert!(err.to_string().contains("council unavailable"));
    assert!(drain(&mut events).is_empty());
}

#[tokio::test]
async fn stream_without_terminal_event_is_interrupted() {
    let base = spawn_backend(BackendState::streaming(vec![
        sse(json!({"type": "stage1_start"})),
        sse(stage1_event()),
    ]))
    .await
    .expect("spawn backend");
    let client = CouncilClient::new(base);
    let mut events = client.subscribe_events();

    let run = client.submit_review(insulin_request()).await.expect("review");

    match &run.outcome {
        ReviewOutcome::Interrupted(review) => {
            assert_eq!(review.latest_stage(), Some(ReviewStage::Stage1));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    let received = drain(&mut events);
    assert!(matches!(
        received.last(),
        Some(ClientEvent::ReviewInterrupted { .. })
    ));
    assert!(!received
        .iter()
        .any(|event| matches!(event, ClientEvent::ReviewCompleted { .. })));
}

#[tokio::test]
async fn error_event_ends_review_without_refreshing_history() {
    let state = BackendState::streaming(vec![
        sse(stage1_event()),
        "data: {not json\n\n".to_string(),
        sse(json!({"type": "error", "message": "Rate limit reached for gpt-4o"})),
        sse(stage2_event()),
    ]);
    let base = spawn_backend(state.clone()).await.expect("spawn backend");
    let client = CouncilClient::new(base);
    let mut events = client.subscribe_events();

    let run = client.submit_review(insulin_request()).await.expect("review");

    match &run.outcome {
        ReviewOutcome::Failed { message, partial } => {
            assert_eq!(message, "Rate limit reached for gpt-4o");
            assert!(partial.stage1.is_some());
            assert!(partial.stage2.is_none());
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    let received = drain(&mut events);
    assert!(received
        .iter()
        .any(|event| matches!(event, ClientEvent::ReviewFailed { .. })));
    assert!(!received
        .iter()
        .any(|event| matches!(event, ClientEvent::ReviewCompleted { .. })));
    assert_eq!(state.list_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn request_body_carries_custom_roles_and_saved_settings_only() {
    let state = BackendState::streaming(full_review_stream());
    let base = spawn_backend(state.clone()).await.expect("spawn backend");
    let client = CouncilClient::new(base);
    let settings = SettingsStore::new(Arc::new(MemoryStorage::new()));

    let mut roles = RoleSet::with_builtins();
    roles
        .add_custom(NewRole::new("The Policy Expert", "Local trust policy").with_icon("💼"))
        .expect("role");

    let saved = settings.saved().await.expect("saved");
    let request = build_review_request("Explain insulin administration", &roles, saved.as_ref())
        .expect("request");
    client.submit_review(request).await.expect("first review");

    settings
        .save(&LlmConfig::new("anthropic", "claude-3-opus-20240229", "sk-ant-x"))
        .await
        .expect("save");
    let saved = settings.saved().await.expect("saved");
    let request = build_review_request("Explain insulin administration", &roles, saved.as_ref())
        .expect("request");
    client.submit_review(request).await.expect("second review");

    let bodies = state.stream_bodies.lock().await;
    assert_eq!(bodies.len(), 2);

    let first = &bodies[0];
    assert_eq!(first["content"], "Explain insulin administration");
    let custom_roles = first["custom_roles"].as_array().expect("roles");
    assert_eq!(custom_roles.len(), 1);
    assert_eq!(custom_roles[0]["name"], "The Policy Expert");
    assert_eq!(custom_roles[0]["icon"], "💼");
    assert!(custom_roles[0]["id"]
        .as_str()
        .is_some_and(|id| id.starts_with("custom_")));
    assert!(first.get("llm_config").is_none());

    assert_eq!(
        bodies[1]["llm_config"],
        json!({"provider": "anthropic", "model": "claude-3-opus-20240229", "api_key": "sk-ant-x"})
    );
}

#[tokio::test]
async fn opening_conversation_uses_first_assistant_message() {
    let base = spawn_backend(BackendState::streaming(Vec::new()))
        .await
        .expect("spawn backend");
    let client = CouncilClient::new(base);
    let mut events = client.subscribe_events();

    let opened = client
        .open_conversation(&ConversationId::from("conv-1"))
        .await
        .expect("open");

    let review = opened.review.expect("stored review");
    assert_eq!(
        review.stage3.map(|stage3| stage3.response).as_deref(),
        Some("Approve with a ward scenario and explicit NMC mapping.")
    );
    assert!(matches!(
        drain(&mut events).as_slice(),
        [ClientEvent::ConversationOpened(_)]
    ));
}

#[tokio::test]
async fn missing_conversation_maps_to_not_found() {
    let base = spawn_backend(BackendState::streaming(Vec::new()))
        .await
        .expect("spawn backend");
    let client = CouncilClient::new(base);

    let err = client
        .open_conversation(&ConversationId::from("missing"))
        .await
        .expect_err("must fail");
    let client_err = err.downcast_ref::<ClientError>().expect("client error");
    assert!(client_err.is_not_found());
    assert!(err.to_string().contains("Conversation not found"));
}

#[tokio::test]
async fn synchronous_message_returns_all_stages() {
    let base = spawn_backend(BackendState::streaming(Vec::new()))
        .await
        .expect("spawn backend");
    let client = CouncilClient::new(base);

    let response = client
        .send_message(&ConversationId::from("conv-1"), &insulin_request())
        .await
        .expect("message");
    let snapshot = ReviewSnapshot::from(response);
    assert_eq!(snapshot.latest_stage(), Some(ReviewStage::Stage3));
    assert!(snapshot.stage2_metadata.is_some());
}

#[tokio::test]
async fn export_uses_filename_from_content_disposition() {
    let base = spawn_backend(BackendState::streaming(Vec::new()))
        .await
        .expect("spawn backend");
    let client = CouncilClient::new(base);

    let export = client
        .export_pdf(&ConversationId::from("conv-1"))
        .await
        .expect("export");
    assert_eq!(export.filename, "Insulin_Administration.pdf");
    assert!(export.bytes.starts_with(b"%PDF"));
}

#[tokio::test]
async fn blank_content_is_rejected_without_contacting_backend() {
    let state = BackendState::streaming(full_review_stream());
    let base = spawn_backend(state.clone()).await.expect("spawn backend");
    let client = CouncilClient::new(base);

    let request = ReviewRequest {
        content: "   ".to_string(),
        custom_roles: Vec::new(),
        llm_config: None,
    };
    let err = client.submit_review(request).await.expect_err("must fail");
    assert!(matches!(
        err.downcast_ref::<ClientError>(),
        Some(ClientError::Validation(_))
    ));
    assert!(state.stream_bodies.lock().await.is_empty());
}

#[tokio::test]
async fn history_refresh_failure_after_review_is_published() {
    let state = BackendState {
        list_status: StatusCode::SERVICE_UNAVAILABLE,
        ..BackendState::streaming(full_review_stream())
    };
    let base = spawn_backend(state.clone()).await.expect("spawn backend");
    let client = CouncilClient::new(base);
    let mut events = client.subscribe_events();

    let run = client.submit_review(insulin_request()).await.expect("review");

    assert!(run.outcome.is_completed());
    assert_eq!(state.list_calls.load(Ordering::SeqCst), 1);
    let received = drain(&mut events);
    let completed_at = received
        .iter()
        .position(|event| matches!(event, ClientEvent::ReviewCompleted { .. }))
        .expect("completion event");
    let error_at = received
        .iter()
        .position(|event| {
            matches!(event, ClientEvent::Error(message) if message.contains("review history"))
        })
        .expect("history error event");
    assert!(completed_at < error_at);
}

#[test]
fn attachment_filename_handles_quoted_and_bare_values() {
    assert_eq!(
        attachment_filename("attachment; filename=\"Review.pdf\"").as_deref(),
        Some("Review.pdf")
    );
    assert_eq!(
        attachment_filename("attachment;filename=plain.pdf").as_deref(),
        Some("plain.pdf")
    );
    assert_eq!(attachment_filename("inline"), None);
}

#[test]
fn attachment_filename_keeps_only_the_final_path_component() {
    assert_eq!(
        attachment_filename("attachment; filename=\"/tmp/owned.pdf\"").as_deref(),
        Some("owned.pdf")
    );
    assert_eq!(
        attachment_filename("attachment; filename=\"..\\reports\\review.pdf\"").as_deref(),
        Some("review.pdf")
    );
    assert_eq!(
        attachment_filename("attachment; filename=\"../../.bashrc\""),
        None
    );
    assert_eq!(attachment_filename("attachment; filename=\"..\""), None);
    assert_eq!(attachment_filename("attachment; filename=\"reports/\""), None);
}

#[tokio::test]
async fn export_falls_back_when_server_filename_escapes_directory() {
    let base = spawn_backend(BackendState::streaming(Vec::new()))
        .await
        .expect("spawn backend");
    let client = CouncilClient::new(base);

    let export = client
        .export_pdf(&ConversationId::from("traversal"))
        .await
        .expect("export");

    assert_eq!(export.filename, "council-review-traversal.pdf");
    let target = std::path::Path::new("/home/u/Downloads").join(&export.filename);
    assert!(target.starts_with("/home/u/Downloads"));
}

#[tokio::test]
async fn handle_trait_delegates_to_client() {
    let base = spawn_backend(BackendState::streaming(full_review_stream()))
        .await
        .expect("spawn backend");
    let handle: Arc<dyn CouncilHandle> = Arc::new(CouncilClient::new(base));
    let mut events = handle.subscribe_events();

    let run = handle.submit_review(insulin_request()).await.expect("review");
    assert!(run.outcome.is_completed());
    assert!(!drain(&mut events).is_empty());
}

//! HTTP route handlers for the TruthLens agent API.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::chat::{
    ChatError, Conversation, ConversationId, Exchange, Message, MessageView, RejectReason,
    SendOutcome, SyncStatus,
};

use super::state::AppState;

type ApiError = (StatusCode, String);

/// Create the API router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(
            "/api/conversations",
            get(list_conversations).post(create_conversation),
        )
        .route(
            "/api/conversations/{id}",
            axum::routing::delete(delete_conversation),
        )
        .route(
            "/api/selection",
            get(get_selection).put(put_selection).delete(clear_selection),
        )
        .route("/api/messages", get(list_messages))
        .route("/api/chat", post(chat))
        .route("/api/events", get(events))
        .with_state(state)
}

fn api_error(err: &ChatError) -> ApiError {
    let status = match err {
        ChatError::ConversationNotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        warn!(error = %err, "Request failed");
    }
    (status, err.to_string())
}

fn parse_id(raw: &str) -> Result<ConversationId, ApiError> {
    raw.parse()
        .map_err(|err| (StatusCode::BAD_REQUEST, format!("invalid conversation id: {err}")))
}

/// Health check endpoint.
async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "truthlens-agent",
        "version": env!("CARGO_PKG_VERSION"),
        "model": state.model_name,
        "busy": state.engine.is_busy()
    }))
}

async fn list_conversations(State(state): State<Arc<AppState>>) -> Json<Vec<Conversation>> {
    Json(state.engine.conversations())
}

async fn create_conversation(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<Conversation>), ApiError> {
    match state.engine.start_new_conversation().await {
        Ok(Some(conversation)) => Ok((StatusCode::CREATED, Json(conversation))),
        Ok(None) => Err((
            StatusCode::CONFLICT,
            "a message is being sent".to_string(),
        )),
        Err(err) => Err(api_error(&err)),
    }
}

async fn delete_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let conversation_id = parse_id(&id)?;
    state
        .engine
        .delete_conversation(conversation_id)
        .await
        .map_err(|err| api_error(&err))?;
    Ok(StatusCode::NO_CONTENT)
}

/// Selected conversation and subscription health.
#[derive(Debug, Serialize)]
pub struct SelectionResponse {
    /// Selected conversation, if any.
    pub conversation_id: Option<ConversationId>,
    /// Subscription health.
    pub status: SyncStatus,
}

/// Selection change request.
#[derive(Debug, Deserialize)]
pub struct SelectionRequest {
    /// Conversation to select; `null` clears the selection.
    pub conversation_id: Option<ConversationId>,
}

fn selection(state: &AppState) -> SelectionResponse {
    SelectionResponse {
        conversation_id: state.engine.selected(),
        status: state.engine.status(),
    }
}

async fn get_selection(State(state): State<Arc<AppState>>) -> Json<SelectionResponse> {
    Json(selection(&state))
}

async fn put_selection(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SelectionRequest>,
) -> Result<Json<SelectionResponse>, ApiError> {
    state
        .engine
        .select_conversation(request.conversation_id)
        .await
        .map_err(|err| api_error(&err))?;
    Ok(Json(selection(&state)))
}

async fn clear_selection(State(state): State<Arc<AppState>>) -> StatusCode {
    state.engine.clear_selection();
    StatusCode::NO_CONTENT
}

/// Messages of the selected conversation.
#[derive(Debug, Serialize)]
pub struct MessagesResponse {
    /// Selected conversation, if any.
    pub conversation_id: Option<ConversationId>,
    /// Messages, oldest first.
    pub messages: Vec<Message>,
}

impl From<MessageView> for MessagesResponse {
    fn from(view: MessageView) -> Self {
        Self {
            conversation_id: view.conversation_id,
            messages: view.messages,
        }
    }
}

async fn list_messages(State(state): State<Arc<AppState>>) -> Json<MessagesResponse> {
    Json(state.engine.message_view().into())
}

/// Chat request.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// The user's message.
    pub message: String,
}

#[tracing::instrument(skip(state, request), fields(chars = request.message.chars().count()))]
async fn chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<Exchange>, ApiError> {
    match state.engine.send_text(&request.message).await {
        Ok(SendOutcome::Completed(exchange)) => Ok(Json(exchange)),
        Ok(SendOutcome::Rejected(RejectReason::EmptyInput)) => {
            Err((StatusCode::BAD_REQUEST, "message is empty".to_string()))
        }
        Ok(SendOutcome::Rejected(RejectReason::Busy)) => Err((
            StatusCode::CONFLICT,
            "another message is being sent".to_string(),
        )),
        Err(err) => Err(api_error(&err)),
    }
}

struct EventSources {
    conversations: watch::Receiver<Vec<Conversation>>,
    messages: watch::Receiver<MessageView>,
}

fn snapshot_event<T: Serialize>(name: &str, payload: &T) -> Event {
    Event::default()
        .event(name)
        .json_data(payload)
        .unwrap_or_else(|err| Event::default().event("error").data(err.to_string()))
}

/// Server-sent events carrying full snapshots of both views, current state
/// first.
async fn events(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut sources = EventSources {
        conversations: state.engine.watch_conversations(),
        messages: state.engine.watch_messages(),
    };
    sources.conversations.mark_changed();
    sources.messages.mark_changed();
    debug!("Event stream opened");

    let stream = futures::stream::unfold(sources, |mut sources| async move {
        let event = tokio::select! {
            biased;
            changed = sources.conversations.changed() => {
                changed.ok()?;
                let snapshot = sources.conversations.borrow_and_update().clone();
                snapshot_event("conversations", &snapshot)
            }
            changed = sources.messages.changed() => {
                changed.ok()?;
                let view = sources.messages.borrow_and_update().clone();
                snapshot_event("messages", &MessagesResponse::from(view))
            }
        };
        Some((Ok::<_, Infallible>(event), sources))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use futures::StreamExt;
    use serde_json::Value;
    use tokio::sync::Semaphore;
    use tower::ServiceExt;

    use super::*;
    use crate::chat::{ChatBackends, ChatConfig, ChatEngine, MemoryDocumentStore, MockCompletionService};

    async fn app_with(completion: MockCompletionService) -> (Arc<ChatEngine>, Router) {
        let engine = Arc::new(
            ChatEngine::new(
                ChatConfig::default(),
                ChatBackends {
                    store: Arc::new(MemoryDocumentStore::new()),
                    completion: Arc::new(completion),
                },
            )
            .unwrap(),
        );
        engine.start().await.unwrap();
        let router = create_router(AppState::new(Arc::clone(&engine)));
        (engine, router)
    }

    async fn app() -> (Arc<ChatEngine>, Router) {
        app_with(MockCompletionService::echo()).await
    }

    fn json_request(method: &str, uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn empty_request(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_model() {
        let (_engine, router) = app().await;
        let response = router.oneshot(empty_request("GET", "/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["model"], "gpt-4o");
    }

    #[tokio::test]
    async fn test_chat_persists_exchange() {
        let (engine, router) = app().await;
        let response = router
            .oneshot(json_request("POST", "/api/chat", r#"{"message":"test"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["created_conversation"], true);
        assert_eq!(body["user_message"]["content"], "test");
        assert_eq!(body["reply"]["role"], "assistant");
        assert_eq!(body["reply_source"], "completion");
        assert_eq!(
            body["conversation_id"].as_str().map(str::to_string),
            engine.selected().map(|id| id.to_string())
        );
    }

    #[tokio::test]
    async fn test_blank_chat_is_bad_request() {
        let (engine, router) = app().await;
        let response = router
            .oneshot(json_request("POST", "/api/chat", r#"{"message":"   "}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(engine.selected(), None);
    }

    #[tokio::test]
    async fn test_chat_while_busy_is_conflict() {
        let gate = Arc::new(Semaphore::new(0));
        let (engine, router) =
            app_with(MockCompletionService::replying("done").with_gate(Arc::clone(&gate))).await;

        let pending = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.send_text("first").await })
        };
        while !engine.is_busy() {
            tokio::task::yield_now().await;
        }

        let response = router
            .clone()
            .oneshot(json_request("POST", "/api/chat", r#"{"message":"second"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let response = router
            .oneshot(empty_request("POST", "/api/conversations"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        gate.add_permits(1);
        assert!(matches!(
            pending.await.unwrap().unwrap(),
            SendOutcome::Completed(_)
        ));
    }

    #[tokio::test]
    async fn test_conversation_lifecycle() {
        let (engine, router) = app().await;

        let response = router
            .clone()
            .oneshot(empty_request("POST", "/api/conversations"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = body_json(response).await;
        let id = created["id"].as_str().unwrap().to_string();
        assert_eq!(created["title"], "محادثة جديدة");

        let response = router
            .clone()
            .oneshot(empty_request("GET", "/api/selection"))
            .await
            .unwrap();
        let selection = body_json(response).await;
        assert_eq!(selection["conversation_id"], id.as_str());
        assert_eq!(selection["status"]["messages"]["state"], "live");

        let response = router
            .clone()
            .oneshot(empty_request("DELETE", &format!("/api/conversations/{id}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(engine.selected(), None);

        let response = router
            .clone()
            .oneshot(empty_request("DELETE", &format!("/api/conversations/{id}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = router
            .oneshot(empty_request("DELETE", "/api/conversations/not-a-uuid"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_selection_routes() {
        let (engine, router) = app().await;
        let conversation = engine.start_new_conversation().await.unwrap().unwrap();
        engine.send_text("claim").await.unwrap();
        engine.clear_selection();

        let response = router
            .clone()
            .oneshot(json_request(
                "PUT",
                "/api/selection",
                &format!(r#"{{"conversation_id":"{}"}}"#, conversation.id),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .clone()
            .oneshot(empty_request("GET", "/api/messages"))
            .await
            .unwrap();
        let messages = body_json(response).await;
        assert_eq!(messages["messages"].as_array().unwrap().len(), 2);

        let response = router
            .clone()
            .oneshot(json_request(
                "PUT",
                "/api/selection",
                &format!(r#"{{"conversation_id":"{}"}}"#, ConversationId::generate()),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = router
            .oneshot(empty_request("DELETE", "/api/selection"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(engine.messages().is_empty());
    }

    #[tokio::test]
    async fn test_event_stream_starts_with_current_conversations() {
        let (_engine, router) = app().await;
        let response = router.oneshot(empty_request("GET", "/api/events")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["content-type"],
            "text/event-stream"
        );

        let mut body = response.into_body().into_data_stream();
        let first = body.next().await.unwrap().unwrap();
        let text = String::from_utf8(first.to_vec()).unwrap();
        assert!(text.contains("event: conversations"));
        assert!(text.contains("data: []"));
    }
}

//! HTTP intake gateway for requests filed outside the chat.
//!
//! A trusted website posts JSON here; valid submissions become pending
//! applications with synthetic negative submitter ids so they can never
//! collide with real chat accounts.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
    routing::post,
    Router,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crewdesk_chat::IntakeService;
use crewdesk_core::domain::application::{ActorId, ApplicationSource, NewApplication};

const SECRET_HEADER: &str = "x-intake-secret";

#[derive(Clone)]
pub struct WebhookState {
    service: Arc<IntakeService>,
    shared_secret: SecretString,
}

#[derive(Debug, Deserialize)]
pub struct WebhookRequest {
    pub name: String,
    pub phone: String,
    pub address: String,
    pub task: String,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub photo_ref: Option<String>,
    #[serde(default)]
    pub external_user_id: Option<i64>,
}

#[derive(Debug, Serialize)]
struct WebhookAccepted {
    status: &'static str,
    application_id: i64,
}

#[derive(Debug, Serialize)]
struct WebhookRejected {
    error: String,
}

pub fn router(service: Arc<IntakeService>, shared_secret: SecretString) -> Router {
    Router::new()
        .route("/webhook/application", post(submit))
        .with_state(WebhookState { service, shared_secret })
}

pub async fn submit(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    Json(payload): Json<WebhookRequest>,
) -> impl IntoResponse {
    let presented = headers.get(SECRET_HEADER).and_then(|value| value.to_str().ok());
    if presented != Some(state.shared_secret.expose_secret()) {
        warn!(event_name = "ingress.webhook.rejected", reason = "bad secret", "webhook refused");
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::to_value(WebhookRejected { error: "invalid secret".to_string() })
                .unwrap_or_default()),
        );
    }

    if let Some(field) = first_missing_field(&payload) {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(serde_json::to_value(WebhookRejected {
                error: format!("missing or blank field: {field}"),
            })
            .unwrap_or_default()),
        );
    }

    // Site visitors get negative ids so webhook submitters can never
    // shadow a chat account. saturating_abs keeps i64::MIN, whose plain
    // abs has no i64 representation, from panicking.
    let submitter_id =
        ActorId(payload.external_user_id.map(|id| -id.saturating_abs()).unwrap_or(-1));

    let new = NewApplication {
        submitter_id,
        submitter_name: payload.name.trim().to_string(),
        address: payload.address.trim().to_string(),
        phone: payload.phone.trim().to_string(),
        task: payload.task.trim().to_string(),
        comment: payload
            .comment
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(str::to_string),
        photo_ref: payload.photo_ref.filter(|text| !text.trim().is_empty()),
        source: ApplicationSource::Webhook,
    };

    match state.service.submit_application(new).await {
        Ok(application) => {
            info!(
                event_name = "ingress.webhook.accepted",
                application_id = %application.id,
                "webhook application created"
            );
            (
                StatusCode::CREATED,
                Json(
                    serde_json::to_value(WebhookAccepted {
                        status: "success",
                        application_id: application.id.0,
                    })
                    .unwrap_or_default(),
                ),
            )
        }
        Err(error) => {
            warn!(
                event_name = "ingress.webhook.failed",
                error = %error,
                "webhook application could not be persisted"
            );
            (
                StatusCode::BAD_GATEWAY,
                Json(
                    serde_json::to_value(WebhookRejected {
                        error: "could not store application".to_string(),
                    })
                    .unwrap_or_default(),
                ),
            )
        }
    }
}

fn first_missing_field(payload: &WebhookRequest) -> Option<&'static str> {
    [
        ("name", payload.name.as_str()),
        ("phone", payload.phone.as_str()),
        ("address", payload.address.as_str()),
        ("task", payload.task.as_str()),
    ]
    .into_iter()
    .find(|(_, value)| value.trim().is_empty())
    .map(|(field, _)| field)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::Duration;
    use tower::util::ServiceExt;

    use crewdesk_chat::messenger::NoopMessenger;
    use crewdesk_chat::{DispatchNotifier, IntakeService};
    use crewdesk_core::access::AccessTokenIssuer;
    use crewdesk_core::domain::application::{ActorId, ApplicationStatus};
    use crewdesk_core::intake::FormEngine;
    use crewdesk_db::repositories::{ApplicationRepository, InMemoryApplicationRepository};

    use super::router;

    const SECRET: &str = "webhook-secret";

    fn service_with_repo() -> (Arc<IntakeService>, Arc<InMemoryApplicationRepository>) {
        let repository = Arc::new(InMemoryApplicationRepository::default());
        let messenger = Arc::new(NoopMessenger);
        let tokens = Arc::new(AccessTokenIssuer::new(Duration::minutes(10)));
        let notifier =
            DispatchNotifier::new(messenger.clone(), -1001, Arc::clone(&tokens), None);
        let service = Arc::new(IntakeService::new(
            FormEngine::new(Duration::minutes(15)),
            repository.clone(),
            notifier,
            messenger,
            tokens,
            false,
        ));
        (service, repository)
    }

    fn request(secret: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/webhook/application")
            .header("content-type", "application/json");
        if let Some(secret) = secret {
            builder = builder.header("x-intake-secret", secret);
        }
        builder.body(Body::from(body.to_string())).expect("request")
    }

    #[tokio::test]
    async fn valid_submission_creates_a_pending_application() {
        let (service, repository) = service_with_repo();
        let app = router(service, SECRET.to_string().into());

        let response = app
            .oneshot(request(
                Some(SECRET),
                r#"{"name":"Site visitor","phone":"+15559999","address":"9 Oak Ave",
                   "task":"Leaky tap","comment":"mornings only","external_user_id":42}"#,
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::CREATED);

        let pending = repository.list_pending().await.expect("list");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].submitter_id, ActorId(-42));
        assert_eq!(pending[0].status, ApplicationStatus::Pending);
        assert_eq!(pending[0].comment.as_deref(), Some("mornings only"));
    }

    #[tokio::test]
    async fn missing_secret_is_unauthorized() {
        let (service, repository) = service_with_repo();
        let app = router(service, SECRET.to_string().into());

        let response = app
            .oneshot(request(
                None,
                r#"{"name":"n","phone":"p","address":"a","task":"t"}"#,
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(repository.list_pending().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn wrong_secret_is_unauthorized() {
        let (service, _) = service_with_repo();
        let app = router(service, SECRET.to_string().into());

        let response = app
            .oneshot(request(
                Some("guess"),
                r#"{"name":"n","phone":"p","address":"a","task":"t"}"#,
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn blank_required_field_is_rejected_before_persistence() {
        let (service, repository) = service_with_repo();
        let app = router(service, SECRET.to_string().into());

        let response = app
            .oneshot(request(
                Some(SECRET),
                r#"{"name":"Site visitor","phone":"  ","address":"9 Oak Ave","task":"Leaky tap"}"#,
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(repository.list_pending().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn extreme_external_user_id_is_clamped_not_panicked() {
        let (service, repository) = service_with_repo();
        let app = router(service, SECRET.to_string().into());

        let response = app
            .oneshot(request(
                Some(SECRET),
                r#"{"name":"Edge case","phone":"+15551111","address":"2 Birch Ln",
                   "task":"Check meter","external_user_id":-9223372036854775808}"#,
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::CREATED);
        let pending = repository.list_pending().await.expect("list");
        assert_eq!(pending[0].submitter_id, ActorId(-i64::MAX));
    }

    #[tokio::test]
    async fn absent_external_user_id_falls_back_to_minus_one() {
        let (service, repository) = service_with_repo();
        let app = router(service, SECRET.to_string().into());

        let response = app
            .oneshot(request(
                Some(SECRET),
                r#"{"name":"Anon","phone":"+15550000","address":"1 Pine Rd","task":"Paint fence"}"#,
            ))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::CREATED);
        let pending = repository.list_pending().await.expect("list");
        assert_eq!(pending[0].submitter_id, ActorId(-1));
    }
}

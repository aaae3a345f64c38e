//! API router: patient/clinician REST surface plus the bridge webhook.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::api::endpoints;
use crate::api::middleware;
use crate::api::ApiContext;
use crate::service::PlatformService;

/// Build the full router. Patient- and clinician-facing routes are
/// nested under `/api`; the bridge webhook stays at the root per the
/// bridge operator's contract.
pub fn api_router(service: Arc<PlatformService>) -> Router {
    let ctx = ApiContext { service };

    let api = Router::new()
        .route("/health", get(endpoints::health::check))
        .route("/patients", post(endpoints::patients::register))
        .route(
            "/patients/enhanced",
            post(endpoints::patients::register_enhanced),
        )
        .route(
            "/patients/{id}/active",
            post(endpoints::patients::set_active),
        )
        .route(
            "/patients/{id}/queries",
            get(endpoints::patients::list_queries),
        )
        .route("/clinicians", post(endpoints::patients::register_clinician))
        .route("/queries", post(endpoints::queries::submit))
        .route("/queries/process", post(endpoints::queries::process))
        .route("/queries/pending", get(endpoints::queries::pending))
        .route("/queries/{id}", get(endpoints::queries::get))
        .route("/queries/{id}/respond", post(endpoints::queries::respond))
        .route("/queries/{id}/take", post(endpoints::queries::take))
        .route("/queries/{id}/review", post(endpoints::queries::review))
        .route(
            "/queries/{id}/request-info",
            post(endpoints::queries::request_info),
        )
        .route("/queries/{id}/reply", post(endpoints::queries::reply))
        .route("/queries/{id}/cancel", post(endpoints::queries::cancel))
        .route("/queries/{id}/rate", post(endpoints::queries::rate))
        .route("/stats", get(endpoints::stats::stats))
        .with_state(ctx.clone());

    let bridge = Router::new()
        .route("/bridge/webhook", post(endpoints::bridge::webhook))
        .with_state(ctx);

    Router::new()
        .nest("/api", api)
        .merge(bridge)
        .layer(axum::middleware::from_fn(
            middleware::access_log::log_access,
        ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use crate::bridge::{AiBridge, BridgeConfig, MockLlmClient};
    use crate::config::Config;
    use crate::reconciler::BridgeReconciler;
    use crate::store::RecordStore;

    const SECRET: &str = "router-secret";

    fn test_service() -> Arc<PlatformService> {
        let mut config = Config::default();
        config.bridge_shared_secret = SECRET.into();

        let store = Arc::new(RecordStore::open_in_memory().unwrap());
        let bridge = Arc::new(AiBridge::new(
            Arc::new(MockLlmClient::new(
                "You are due for a routine visit soon.",
            )),
            BridgeConfig::default(),
        ));
        let reconciler = Arc::new(BridgeReconciler::new(
            Arc::clone(&store),
            SECRET.into(),
            24,
        ));
        Arc::new(PlatformService::new(store, bridge, reconciler, config))
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), 1 << 20).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let app = api_router(test_service());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["read_only"], false);
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let app = api_router(test_service());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/nonexistent")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn register_then_process_severe_hypoglycemia() {
        let service = test_service();
        let app = api_router(Arc::clone(&service));

        let response = app
            .clone()
            .oneshot(post_json(
                "/api/patients",
                serde_json::json!({
                    "fullName": "Route Patient",
                    "consents": {
                        "treatment": true,
                        "privacyAcknowledged": true,
                        "dataProcessing": true
                    }
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let patient_id = json_body(response).await["patientId"]
            .as_str()
            .unwrap()
            .to_string();

        let response = app
            .oneshot(post_json(
                "/api/queries/process",
                serde_json::json!({
                    "patientId": patient_id,
                    "queryText": "I feel shaky and dizzy",
                    "vitals": { "bloodGlucose": 52 }
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["safetyScore"], 25);
        assert_eq!(json["urgency"], "high");
        assert_eq!(json["requiresReview"], true);
        assert!(json["content"].as_str().unwrap().contains("care team"));
    }

    #[tokio::test]
    async fn get_unknown_query_is_404() {
        let app = api_router(test_service());
        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/api/queries/{}", uuid::Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn webhook_rejects_bad_secret_and_regression() {
        let service = test_service();
        let app = api_router(Arc::clone(&service));

        // Set up a query with a registered bridge entry
        let patient_id = service
            .register_patient(
                "Hook",
                None,
                crate::models::patient::ConsentFlags::granted(),
            )
            .unwrap();
        let query_id = service
            .submit_query(&patient_id, "T", "Question", None, None, None)
            .unwrap();
        service.reconciler().register(&query_id).unwrap();

        // Bad secret → 401
        let response = app
            .clone()
            .oneshot(post_json(
                "/bridge/webhook",
                serde_json::json!({
                    "queryId": query_id,
                    "status": "processing",
                    "secret": "wrong"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        // Valid completion → 200 applied
        let response = app
            .clone()
            .oneshot(post_json(
                "/bridge/webhook",
                serde_json::json!({
                    "queryId": query_id,
                    "status": "completed",
                    "response": "analysis text",
                    "safetyScore": 88,
                    "urgency": "LOW",
                    "secret": SECRET
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["applied"], true);

        // Regression to processing → 409 INVALID_TRANSITION
        let response = app
            .oneshot(post_json(
                "/bridge/webhook",
                serde_json::json!({
                    "queryId": query_id,
                    "status": "processing",
                    "secret": SECRET
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let json = json_body(response).await;
        assert_eq!(json["error"]["code"], "INVALID_TRANSITION");
    }

    #[tokio::test]
    async fn webhook_replay_is_ok_but_not_applied() {
        let service = test_service();
        let app = api_router(Arc::clone(&service));

        let patient_id = service
            .register_patient(
                "Replay",
                None,
                crate::models::patient::ConsentFlags::granted(),
            )
            .unwrap();
        let query_id = service
            .submit_query(&patient_id, "T", "Question", None, None, None)
            .unwrap();
        service.reconciler().register(&query_id).unwrap();

        let hook = serde_json::json!({
            "queryId": query_id,
            "status": "processing",
            "secret": SECRET
        });
        let first = app
            .clone()
            .oneshot(post_json("/bridge/webhook", hook.clone()))
            .await
            .unwrap();
        assert_eq!(json_body(first).await["applied"], true);

        let second = app
            .oneshot(post_json("/bridge/webhook", hook))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::OK);
        assert_eq!(json_body(second).await["applied"], false);
    }

    #[tokio::test]
    async fn invalid_enum_in_submit_is_400() {
        let service = test_service();
        let app = api_router(Arc::clone(&service));
        let patient_id = service
            .register_patient(
                "Bad Enum",
                None,
                crate::models::patient::ConsentFlags::granted(),
            )
            .unwrap();

        let response = app
            .oneshot(post_json(
                "/api/queries",
                serde_json::json!({
                    "patientId": patient_id,
                    "title": "T",
                    "description": "D",
                    "category": "not_a_category"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = json_body(response).await;
        assert_eq!(json["error"]["code"], "INVALID");
    }
}

//! Daemon status endpoints.

use std::time::Duration;

use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use ipnet::Ipv4Net;
use serde::Serialize;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use vrouter_common::{LeaseSnapshot, SubnetBlock};

use crate::registry::OverlayRegistry;
use crate::store::Store;

mod health;

/// State shared by the status handlers
#[derive(Clone)]
pub struct StatusState {
    pub registry: OverlayRegistry<Store>,
    pub hostname: String,
    pub block: SubnetBlock,
    pub interface: Option<Ipv4Net>,
    /// Latest lease transition, published by the lease manager
    pub lease: watch::Receiver<LeaseSnapshot>,
}

/// Create the status router
pub fn create_router(state: StatusState, request_timeout: Duration) -> Router {
    let routes = Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::ready_check))
        .route("/status", get(status));

    with_middleware(routes, request_timeout).with_state(state)
}

/// Request tracing, and 408 for handlers that outlive `request_timeout`
fn with_middleware<S>(router: Router<S>, request_timeout: Duration) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(TimeoutLayer::with_status_code(
                StatusCode::REQUEST_TIMEOUT,
                request_timeout,
            )),
    )
}

#[derive(Serialize)]
struct StatusResponse {
    hostname: String,
    block: SubnetBlock,
    #[serde(skip_serializing_if = "Option::is_none")]
    interface: Option<String>,
    lease: LeaseSnapshot,
    version: &'static str,
}

async fn status(State(state): State<StatusState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        hostname: state.hostname.clone(),
        block: state.block,
        interface: state.interface.map(|ip| ip.to_string()),
        lease: state.lease.borrow().clone(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;
    use vrouter_common::LeaseState;

    fn router(lease: watch::Receiver<LeaseSnapshot>) -> Router {
        let state = StatusState {
            registry: OverlayRegistry::new(Store::Memory(MemoryStore::new()), "/vrouter"),
            hostname: "h1".to_string(),
            block: "10.0.64.0/18".parse().unwrap(),
            interface: None,
            lease,
        };
        create_router(state, Duration::from_secs(1))
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let resp = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_status_reports_lease() {
        let (tx, rx) = watch::channel(LeaseSnapshot {
            key: "/vrouter/host/h1".to_string(),
            state: LeaseState::Claimed,
            revision: Some(7),
            last_renewed: None,
        });

        let (code, body) = get_json(router(rx.clone()), "/status").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["block"], "10.0.64.0/18");
        assert_eq!(body["lease"]["state"], "claimed");
        assert_eq!(body["lease"]["revision"], 7);

        tx.send_modify(|s| s.state = LeaseState::Lost);
        let (_, body) = get_json(router(rx), "/status").await;
        assert_eq!(body["lease"]["state"], "lost");
    }

    #[tokio::test]
    async fn test_slow_handler_times_out() {
        let slow = Router::new().route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "done"
            }),
        );
        let app = with_middleware(slow, Duration::from_millis(20));

        let resp = app
            .oneshot(Request::builder().uri("/slow").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::REQUEST_TIMEOUT);
    }

    #[tokio::test]
    async fn test_ready_pings_store() {
        let (_tx, rx) = watch::channel(LeaseSnapshot::default());
        let (code, body) = get_json(router(rx.clone()), "/ready").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["store"], "memory");

        let (code, body) = get_json(router(rx), "/health").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }
}

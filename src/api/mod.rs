//! HTTP surface

pub mod services;

use axum::Router;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};

use crate::middleware::logging::{request_logging_middleware, UuidRequestId};

pub use services::ApiState;

/// Full application router with request id and logging layers
pub fn app(state: ApiState) -> Router {
    services::routes().with_state(state).layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
            .layer(axum::middleware::from_fn(request_logging_middleware))
            .layer(PropagateRequestIdLayer::x_request_id()),
    )
}

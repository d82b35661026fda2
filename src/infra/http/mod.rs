//! HTTP front: every request is resolved against the origin and served
//! through the controlling resource cache manager.

mod middleware;
mod proxy;

use axum::http::HeaderName;

pub use middleware::RequestContext;
pub use proxy::{HttpState, STATUS_PATH, StatusBody, build_router};

/// Response header naming how a request was served: `hit`, `miss` or `bypass`.
pub static X_PRECACHE: HeaderName = HeaderName::from_static("x-precache");

pub const OUTCOME_BYPASS: &str = "bypass";

use std::sync::Arc;

use axum::{
    Json, Router,
    body::{self, Body},
    extract::State,
    http::{HeaderName, HeaderValue, Request, StatusCode, Uri, header::CONTENT_LENGTH},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use url::Url;

use crate::{
    application::error::HttpError,
    cache::{
        CacheStorage, CachedResponse, FetchOutcome, Fetcher, Registration, ResourceRequest,
        WorkerState,
    },
    infra::origin::is_hop_by_hop,
};

use super::{
    OUTCOME_BYPASS, X_PRECACHE,
    middleware::{log_responses, set_request_context},
};

pub const STATUS_PATH: &str = "/__precache/status";

#[derive(Clone)]
pub struct HttpState {
    pub registration: Arc<Registration>,
    pub storage: Arc<dyn CacheStorage>,
    pub fetcher: Arc<dyn Fetcher>,
    pub origin: Url,
    pub max_body_bytes: usize,
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route(STATUS_PATH, get(status))
        .fallback(proxy)
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

/// Body of the status endpoint. Fields are `None` while nothing controls.
#[derive(Debug, Serialize)]
pub struct StatusBody {
    pub version: Option<String>,
    pub bucket: Option<String>,
    pub state: Option<WorkerState>,
    pub buckets: Vec<String>,
}

async fn status(State(state): State<HttpState>) -> Response {
    let buckets = match state.storage.bucket_names().await {
        Ok(names) => names,
        Err(err) => {
            return HttpError::from_error(
                "infra::http::status",
                StatusCode::SERVICE_UNAVAILABLE,
                "Storage unavailable",
                &err,
            )
            .into_response();
        }
    };

    let controller = state.registration.controller();
    let body = StatusBody {
        version: controller.as_ref().map(|m| m.config().version.clone()),
        bucket: controller.as_ref().map(|m| m.bucket().to_string()),
        state: controller.as_ref().map(|m| m.state()),
        buckets,
    };
    Json(body).into_response()
}

async fn proxy(State(state): State<HttpState>, request: Request<Body>) -> Response {
    let (parts, body) = request.into_parts();

    let url = match target_url(&state.origin, &parts.uri) {
        Ok(url) => url,
        Err(err) => return err.into_response(),
    };

    let body = match body::to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(err) => {
            return HttpError::from_error(
                "infra::http::proxy",
                StatusCode::PAYLOAD_TOO_LARGE,
                "Request body too large",
                &err,
            )
            .into_response();
        }
    };

    let request = ResourceRequest::new(parts.method, url)
        .with_headers(parts.headers)
        .with_body(body);

    match state.registration.handle_fetch(request).await {
        // Dropping the background handle lets bucket work finish on its own.
        Ok(FetchOutcome::Served(served)) => into_response(served.response, served.source.as_str()),
        Ok(FetchOutcome::Passthrough(request)) => forward(&state, request).await,
        Err(err) => HttpError::from(err).into_response(),
    }
}

async fn forward(state: &HttpState, request: ResourceRequest) -> Response {
    match state.fetcher.fetch(&request).await {
        Ok(response) => into_response(response, OUTCOME_BYPASS),
        Err(err) => HttpError::from_error(
            "infra::http::forward",
            StatusCode::BAD_GATEWAY,
            "Origin unreachable",
            &err,
        )
        .into_response(),
    }
}

/// Resolve the request target against the origin.
///
/// Both absolute-form targets and scheme-relative paths can name another
/// host; those are refused rather than forwarded.
fn target_url(origin: &Url, uri: &Uri) -> Result<Url, HttpError> {
    let url = if uri.scheme().is_some() {
        Url::parse(&uri.to_string()).map_err(|err| {
            HttpError::from_error(
                "infra::http::target_url",
                StatusCode::BAD_REQUEST,
                "Invalid request target",
                &err,
            )
        })?
    } else {
        let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        origin.join(path).map_err(|err| {
            HttpError::from_error(
                "infra::http::target_url",
                StatusCode::BAD_REQUEST,
                "Invalid request target",
                &err,
            )
        })?
    };

    if url.origin() != origin.origin() {
        return Err(HttpError::new(
            "infra::http::target_url",
            StatusCode::MISDIRECTED_REQUEST,
            "Misdirected request",
            format!("`{url}` is not served by this origin"),
        ));
    }
    Ok(url)
}

fn into_response(cached: CachedResponse, outcome: &'static str) -> Response {
    let status = StatusCode::from_u16(cached.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response = Response::new(Body::from(cached.body));
    *response.status_mut() = status;

    let headers = response.headers_mut();
    for (name, value) in &cached.headers {
        if is_hop_by_hop(name) || name.eq_ignore_ascii_case(CONTENT_LENGTH.as_str()) {
            continue;
        }
        let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) else {
            continue;
        };
        headers.append(name, value);
    }
    headers.insert(X_PRECACHE.clone(), HeaderValue::from_static(outcome));
    response
}

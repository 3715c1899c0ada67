//! axum front for [`RequestHandler`]: one route, every method.

use std::{collections::HashMap, sync::Arc};

use axum::{
    body::{Body, Bytes},
    extract::{rejection::BytesRejection, DefaultBodyLimit, Query, State},
    http::{header::CONTENT_LENGTH, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use tokio::net::TcpListener;

use crate::handler::{rejection_response, InboundRequest, OutboundResponse, RequestHandler};

pub fn router(handler: Arc<RequestHandler>) -> Router {
    let path = handler.config().endpoint_path.clone();
    let body_limit = handler.config().max_body_bytes;
    Router::new()
        .route(&path, any(handle_proxy))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(handler)
}

pub async fn run(
    listener: TcpListener,
    handler: Arc<RequestHandler>,
) -> Result<(), std::io::Error> {
    axum::serve(listener, router(handler)).await
}

pub async fn handle_proxy(
    State(handler): State<Arc<RequestHandler>>,
    method: Method,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            tracing::warn!(
                status = %rejection.status(),
                error = %rejection,
                "request body refused"
            );
            return into_response(rejection_response(rejection.status(), rejection.body_text()));
        }
    };
    let request = inbound_request(method, headers, params, body);
    into_response(handler.handle(request).await)
}

fn inbound_request(
    method: Method,
    headers: HeaderMap,
    query: HashMap<String, String>,
    body: Bytes,
) -> InboundRequest {
    let (body, is_base64_encoded) = if body.is_empty() {
        (None, false)
    } else {
        match String::from_utf8(body.to_vec()) {
            Ok(text) => (Some(text), false),
            Err(_) => (Some(STANDARD.encode(&body)), true),
        }
    };

    InboundRequest {
        method,
        headers,
        query,
        body,
        is_base64_encoded,
    }
}

fn into_response(outbound: OutboundResponse) -> Response {
    let bytes = match outbound.body_bytes() {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::error!(error = %err, "outbound body is not valid base64");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response();
        }
    };

    let OutboundResponse {
        status,
        mut headers,
        ..
    } = outbound;
    // Rewritten bodies change length; hyper computes the real one.
    headers.remove(CONTENT_LENGTH);

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

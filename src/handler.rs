//! Transport-agnostic request handler.
//!
//! One invocation walks a fixed sequence: read the target, check the
//! access key (when one is configured), validate the target URL and host,
//! fetch it once, transform the body and shape the response. Any failure
//! short-circuits into an error response that still carries the
//! cross-origin header, so the calling page can read it.
//!
//! `OPTIONS` never enters that sequence and gets the preflight reply.

use std::{any::Any, collections::HashMap, panic::AssertUnwindSafe, sync::Arc};

use anyhow::Context;
use axum::http::{
    header::{
        ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
        ACCESS_CONTROL_EXPOSE_HEADERS, CONTENT_TYPE,
    },
    HeaderMap, HeaderValue, Method, StatusCode,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::Bytes;
use futures::FutureExt;
use tracing::Instrument;
use url::Url;
use uuid::Uuid;

use crate::{
    config::ProxyConfig,
    error::{ProxyError, ProxyResult},
    guard,
    rewrite::LinkRewriter,
    transform::{transform, TransformedBody, HTML_CONTENT_TYPE},
    upstream::{Upstream, UpstreamRequest},
};

/// Header carrying the access key; the `key` query parameter is the alternative.
pub const PROXY_KEY_HEADER: &str = "x-proxy-key";

/// Upstream response headers never relayed to the client.
const DROPPED_RESPONSE_HEADERS: &[&str] = &[
    "content-security-policy",
    "content-security-policy-report-only",
    "x-frame-options",
    "set-cookie",
    "transfer-encoding",
];

const PREFLIGHT_METHODS: &str = "GET, POST, PUT, PATCH, DELETE, OPTIONS";
const PREFLIGHT_HEADERS: &str = "Content-Type, X-Proxy-Key";
const ERROR_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// An inbound call as handed over by the hosting transport.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    pub headers: HeaderMap,
    pub query: HashMap<String, String>,
    pub body: Option<String>,
    /// `body` holds base64 of the raw bytes rather than text.
    pub is_base64_encoded: bool,
}

impl InboundRequest {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            headers: HeaderMap::new(),
            query: HashMap::new(),
            body: None,
            is_base64_encoded: false,
        }
    }

    pub fn with_query(mut self, name: &str, value: &str) -> Self {
        self.query.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.insert(name, value);
        }
        self
    }

    pub fn with_text_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self.is_base64_encoded = false;
        self
    }

    pub fn with_binary_body(mut self, body: &[u8]) -> Self {
        self.body = Some(STANDARD.encode(body));
        self.is_base64_encoded = true;
        self
    }

    /// The `url` query parameter, else a `url` string field of a JSON body.
    pub fn target(&self) -> Option<String> {
        if let Some(url) = self.query.get("url").filter(|u| !u.is_empty()) {
            return Some(url.clone());
        }
        if self.is_base64_encoded {
            return None;
        }
        let body: serde_json::Value = serde_json::from_str(self.body.as_deref()?).ok()?;
        body.get("url")?
            .as_str()
            .filter(|u| !u.is_empty())
            .map(str::to_string)
    }

    fn presents_key(&self, expected: &str) -> bool {
        let header = self
            .headers
            .get(PROXY_KEY_HEADER)
            .and_then(|v| v.to_str().ok());
        let query = self.query.get("key").map(String::as_str);
        header == Some(expected) || query == Some(expected)
    }

    fn body_bytes(&self) -> anyhow::Result<Option<Bytes>> {
        match &self.body {
            None => Ok(None),
            Some(body) if self.is_base64_encoded => {
                let raw = STANDARD
                    .decode(body)
                    .context("request body is not valid base64")?;
                Ok(Some(Bytes::from(raw)))
            }
            Some(body) => Ok(Some(Bytes::from(body.clone()))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundBody {
    Empty,
    Text(String),
    /// Base64 of an opaque payload.
    Base64(String),
}

/// The single artifact returned to the hosting transport.
#[derive(Debug, Clone)]
pub struct OutboundResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: OutboundBody,
}

impl OutboundResponse {
    pub fn is_base64_encoded(&self) -> bool {
        matches!(self.body, OutboundBody::Base64(_))
    }

    /// Raw bytes to put on the wire.
    pub fn body_bytes(&self) -> Result<Bytes, base64::DecodeError> {
        match &self.body {
            OutboundBody::Empty => Ok(Bytes::new()),
            OutboundBody::Text(text) => Ok(Bytes::from(text.clone())),
            OutboundBody::Base64(encoded) => STANDARD.decode(encoded).map(Bytes::from),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

pub struct RequestHandler {
    config: ProxyConfig,
    upstream: Arc<dyn Upstream>,
}

impl RequestHandler {
    pub fn new(config: ProxyConfig, upstream: Arc<dyn Upstream>) -> Self {
        Self { config, upstream }
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub async fn handle(&self, request: InboundRequest) -> OutboundResponse {
        if request.method == Method::OPTIONS {
            return preflight_response();
        }

        let span = tracing::info_span!(
            "relay",
            request_id = %Uuid::new_v4(),
            method = %request.method,
            target = tracing::field::Empty,
        );

        let outcome = AssertUnwindSafe(self.relay(request).instrument(span.clone()))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                Err(ProxyError::Unexpected(anyhow::anyhow!(
                    "relay panicked: {}",
                    panic_message(payload.as_ref())
                )))
            });

        match outcome {
            Ok(response) => response,
            Err(err) => {
                span.in_scope(|| match &err {
                    ProxyError::Unexpected(_) => tracing::error!(error = %err, "relay failed"),
                    _ => tracing::warn!(status = %err.status(), error = %err, "relay rejected"),
                });
                error_response(&err)
            }
        }
    }

    async fn relay(&self, request: InboundRequest) -> ProxyResult<OutboundResponse> {
        let target = request.target().ok_or(ProxyError::MissingTarget)?;
        tracing::Span::current().record("target", target.as_str());

        if let Some(expected) = self.config.access_key.as_deref() {
            if !request.presents_key(expected) {
                return Err(ProxyError::Unauthorized);
            }
        }

        let url = parse_target(&target)?;
        if guard::is_blocked(url.host_str()) {
            return Err(ProxyError::BlockedHost(
                url.host_str().unwrap_or_default().to_string(),
            ));
        }

        let body = request.body_bytes()?;
        let response = self
            .upstream
            .fetch(UpstreamRequest {
                method: request.method,
                url,
                headers: request.headers,
                body,
            })
            .await?;

        let rewriter = LinkRewriter::new(self.config.endpoint_path.clone(), response.final_url);
        let body = transform(response.body, &rewriter).context("transforming upstream body")?;
        let outbound = assemble(response.status, &response.headers, body)?;

        tracing::info!(
            status = %outbound.status,
            base64 = outbound.is_base64_encoded(),
            "relayed"
        );
        Ok(outbound)
    }
}

fn parse_target(target: &str) -> ProxyResult<Url> {
    let url = Url::parse(target)
        .map_err(|err| ProxyError::InvalidTarget(format!("{target} ({err})")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(ProxyError::InvalidTarget(format!(
            "{target} (unsupported scheme {scheme})"
        ))),
    }
}

fn is_dropped(name: &str) -> bool {
    DROPPED_RESPONSE_HEADERS.contains(&name)
}

fn assemble(
    status: StatusCode,
    upstream_headers: &HeaderMap,
    body: TransformedBody,
) -> anyhow::Result<OutboundResponse> {
    let mut headers = HeaderMap::with_capacity(upstream_headers.len() + 2);
    for (name, value) in upstream_headers {
        if !is_dropped(name.as_str()) {
            headers.append(name.clone(), value.clone());
        }
    }

    let body = match body {
        TransformedBody::Html(text) => {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(HTML_CONTENT_TYPE));
            OutboundBody::Text(text)
        }
        TransformedBody::Binary(bytes) => OutboundBody::Base64(STANDARD.encode(&bytes)),
    };

    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    let exposed = headers
        .keys()
        .map(|name| name.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    headers.insert(
        ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_str(&exposed).context("building expose-headers list")?,
    );

    Ok(OutboundResponse {
        status,
        headers,
        body,
    })
}

fn preflight_response() -> OutboundResponse {
    let mut headers = HeaderMap::new();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(PREFLIGHT_METHODS),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(PREFLIGHT_HEADERS),
    );
    OutboundResponse {
        status: StatusCode::NO_CONTENT,
        headers,
        body: OutboundBody::Empty,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

fn error_response(err: &ProxyError) -> OutboundResponse {
    rejection_response(err.status(), err.to_string())
}

/// Plain-text error reply that the calling page can still read cross-origin.
///
/// Also used by the transport for requests it refuses before the handler runs.
pub fn rejection_response(status: StatusCode, message: impl Into<String>) -> OutboundResponse {
    let mut headers = HeaderMap::new();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(ERROR_CONTENT_TYPE));
    OutboundResponse {
        status,
        headers,
        body: OutboundBody::Text(message.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upstream_headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.append(*name, HeaderValue::from_static(*value));
        }
        headers
    }

    #[test]
    fn target_prefers_query_parameter() {
        let req = InboundRequest::new(Method::POST)
            .with_query("url", "https://a.example/")
            .with_text_body(r#"{"url":"https://b.example/"}"#);
        assert_eq!(req.target().as_deref(), Some("https://a.example/"));
    }

    #[test]
    fn target_falls_back_to_json_body() {
        let req =
            InboundRequest::new(Method::POST).with_text_body(r#"{"url":"https://b.example/"}"#);
        assert_eq!(req.target().as_deref(), Some("https://b.example/"));
    }

    #[test]
    fn target_missing_when_body_is_not_json() {
        let req = InboundRequest::new(Method::POST).with_text_body("url=https://b.example/");
        assert_eq!(req.target(), None);
        assert_eq!(InboundRequest::new(Method::GET).target(), None);
        let req = InboundRequest::new(Method::GET).with_query("url", "");
        assert_eq!(req.target(), None);
    }

    #[test]
    fn key_accepted_from_header_or_query() {
        let by_header = InboundRequest::new(Method::GET).with_header(PROXY_KEY_HEADER, "k");
        let by_query = InboundRequest::new(Method::GET).with_query("key", "k");
        let mixed = InboundRequest::new(Method::GET)
            .with_header(PROXY_KEY_HEADER, "x")
            .with_query("key", "k");
        assert!(by_header.presents_key("k"));
        assert!(by_query.presents_key("k"));
        assert!(mixed.presents_key("k"));
        assert!(!InboundRequest::new(Method::GET).presents_key("k"));
    }

    #[test]
    fn binary_request_body_is_decoded() {
        let req = InboundRequest::new(Method::PUT).with_binary_body(&[0, 159, 146, 150]);
        assert_eq!(
            req.body_bytes().unwrap(),
            Some(Bytes::from_static(&[0, 159, 146, 150]))
        );
    }

    #[test]
    fn assemble_drops_embedding_breaking_headers() {
        let headers = upstream_headers(&[
            ("content-security-policy", "default-src 'self'"),
            ("content-security-policy-report-only", "default-src 'self'"),
            ("x-frame-options", "DENY"),
            ("set-cookie", "a=1"),
            ("set-cookie", "b=2"),
            ("transfer-encoding", "chunked"),
            ("cache-control", "max-age=60"),
            ("content-type", "text/html; charset=iso-8859-1"),
        ]);
        let out = assemble(
            StatusCode::OK,
            &headers,
            TransformedBody::Html("<p>x</p>".into()),
        )
        .unwrap();

        for dropped in DROPPED_RESPONSE_HEADERS {
            assert!(out.headers.get(*dropped).is_none(), "{dropped} leaked");
        }
        assert_eq!(out.header("cache-control"), Some("max-age=60"));
        assert_eq!(out.header("content-type"), Some(HTML_CONTENT_TYPE));
        assert_eq!(out.header("access-control-allow-origin"), Some("*"));
        assert_eq!(
            out.header("access-control-expose-headers"),
            Some("cache-control, content-type, access-control-allow-origin")
        );
    }

    #[test]
    fn assemble_base64_encodes_binary_and_keeps_status() {
        let headers = upstream_headers(&[("content-type", "image/png")]);
        let out = assemble(
            StatusCode::NOT_FOUND,
            &headers,
            TransformedBody::Binary(Bytes::from_static(b"\x89PNG")),
        )
        .unwrap();
        assert_eq!(out.status, StatusCode::NOT_FOUND);
        assert!(out.is_base64_encoded());
        assert_eq!(out.header("content-type"), Some("image/png"));
        assert_eq!(out.body_bytes().unwrap(), Bytes::from_static(b"\x89PNG"));
    }

    #[test]
    fn non_http_schemes_are_invalid() {
        assert!(matches!(
            parse_target("ftp://example.com/file"),
            Err(ProxyError::InvalidTarget(_))
        ));
        assert!(matches!(parse_target("not a url"), Err(ProxyError::InvalidTarget(_))));
        assert!(parse_target("https://example.com/").is_ok());
    }

    #[test]
    fn error_response_is_readable_cross_origin() {
        let out = error_response(&ProxyError::MissingTarget);
        assert_eq!(out.status, StatusCode::BAD_REQUEST);
        assert_eq!(out.header("access-control-allow-origin"), Some("*"));
        assert_eq!(out.body, OutboundBody::Text("Missing url parameter".into()));
    }

    #[test]
    fn panic_payloads_become_messages() {
        let text: Box<dyn Any + Send> = Box::new("static message");
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned message"));
        let other: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(text.as_ref()), "static message");
        assert_eq!(panic_message(owned.as_ref()), "owned message");
        assert_eq!(panic_message(other.as_ref()), "unknown panic");
    }
}

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use bytes::Bytes;
use relay_proxy::{
    upstream::{UpstreamBody, UpstreamRequest, UpstreamResponse},
    ProxyConfig, RequestHandler, Upstream, UpstreamError,
};
use url::Url;

/// Canned upstream that records every request it receives.
pub struct StubUpstream {
    reply: Result<UpstreamResponse, String>,
    calls: Mutex<Vec<UpstreamRequest>>,
}

impl StubUpstream {
    pub fn html(final_url: &str, body: &str) -> Arc<Self> {
        Self::with_headers(
            final_url,
            StatusCode::OK,
            &[("content-type", "text/html; charset=utf-8")],
            UpstreamBody::Text(body.to_string()),
        )
    }

    pub fn binary(final_url: &str, content_type: &'static str, body: &'static [u8]) -> Arc<Self> {
        Self::with_headers(
            final_url,
            StatusCode::OK,
            &[("content-type", content_type)],
            UpstreamBody::Bytes(Bytes::from_static(body)),
        )
    }

    pub fn with_headers(
        final_url: &str,
        status: StatusCode,
        headers: &[(&'static str, &'static str)],
        body: UpstreamBody,
    ) -> Arc<Self> {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.append(*name, HeaderValue::from_static(*value));
        }
        let content_type = map
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        Arc::new(Self {
            reply: Ok(UpstreamResponse {
                status,
                headers: map,
                content_type,
                body,
                final_url: Url::parse(final_url).unwrap(),
            }),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Err(message.to_string()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<UpstreamRequest> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Upstream for StubUpstream {
    async fn fetch(&self, request: UpstreamRequest) -> Result<UpstreamResponse, UpstreamError> {
        self.calls.lock().unwrap().push(request);
        self.reply.clone().map_err(UpstreamError::new)
    }
}

pub fn handler(config: ProxyConfig, upstream: Arc<StubUpstream>) -> RequestHandler {
    RequestHandler::new(config, upstream)
}

/// Upstream whose fetch panics, standing in for a bug deep in the pipeline.
pub struct PanickingUpstream;

#[async_trait]
impl Upstream for PanickingUpstream {
    async fn fetch(&self, _request: UpstreamRequest) -> Result<UpstreamResponse, UpstreamError> {
        panic!("upstream exploded");
    }
}

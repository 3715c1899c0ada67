//! Single-endpoint web relay.
//!
//! Fetches a URL on behalf of a browser, rewrites links in HTML responses so
//! navigation keeps flowing through the relay, and passes every other payload
//! through untouched. Requests for loopback and private-network hosts are
//! refused.

pub mod config;
pub mod error;
pub mod guard;
pub mod handler;
pub mod logging;
pub mod proxy;
pub mod rewrite;
pub mod transform;
pub mod upstream;

pub use config::ProxyConfig;
pub use error::{ProxyError, ProxyResult};
pub use handler::{InboundRequest, OutboundBody, OutboundResponse, RequestHandler};
pub use upstream::{HttpUpstream, Upstream, UpstreamError};

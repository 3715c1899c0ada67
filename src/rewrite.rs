//! Attribute value rewriting for relayed HTML.
//!
//! A navigable value is resolved against the page's effective base URL and
//! re-encoded as a link back to the relay endpoint, with the absolute target
//! carried in a single percent-encoded `url` query parameter:
//!
//! ```text
//! /about  (base https://example.com/)  ->  /proxy?url=https%3A%2F%2Fexample.com%2Fabout
//! ```
//!
//! Rewriting is best-effort. Anything that cannot be resolved is returned
//! untouched so one bad attribute never breaks the rest of the page.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use url::Url;

/// Characters left alone by `encodeURIComponent`; everything else is escaped.
const URL_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Values starting with these (after trim + lowercase) are never rewritten.
const PASSTHROUGH_PREFIXES: &[&str] = &["data:", "javascript:", "mailto:", "#"];

/// Whether `value` points somewhere the browser would navigate or fetch.
pub fn should_rewrite(value: &str) -> bool {
    let value = value.trim().to_ascii_lowercase();
    !PASSTHROUGH_PREFIXES
        .iter()
        .any(|prefix| value.starts_with(prefix))
}

/// Builds `<endpoint>?url=<percent-encoded target>`.
pub fn proxy_link(endpoint: &str, target: &str) -> String {
    format!("{endpoint}?url={}", utf8_percent_encode(target, URL_COMPONENT))
}

/// Extracts the absolute target embedded in a link produced by [`proxy_link`].
///
/// Returns `None` when `link` is not a relay link for `endpoint` or when the
/// embedded value is not an absolute URL.
pub fn decode_proxy_link(link: &str, endpoint: &str) -> Option<String> {
    let query = link.strip_prefix(endpoint)?.strip_prefix('?')?;
    let raw = query
        .split('&')
        .find_map(|pair| pair.strip_prefix("url="))?;
    let target = percent_decode_str(raw).decode_utf8().ok()?.into_owned();
    Url::parse(&target).ok()?;
    Some(target)
}

/// Rewrites attribute values relative to one document.
#[derive(Debug, Clone)]
pub struct LinkRewriter {
    endpoint: String,
    base: Url,
}

impl LinkRewriter {
    pub fn new(endpoint: impl Into<String>, base: Url) -> Self {
        Self {
            endpoint: endpoint.into(),
            base,
        }
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Returns the relay link for `value`, or `value` itself when it is
    /// empty, non-navigable, or cannot be resolved.
    pub fn rewrite(&self, value: &str) -> String {
        if value.is_empty() || !should_rewrite(value) {
            return value.to_string();
        }

        // Already one of ours: re-emit the embedded target instead of nesting it.
        if let Some(target) = decode_proxy_link(value.trim(), &self.endpoint) {
            return proxy_link(&self.endpoint, &target);
        }

        match self.base.join(value) {
            Ok(resolved) => proxy_link(&self.endpoint, resolved.as_str()),
            Err(err) => {
                tracing::debug!(value, error = %err, "leaving unresolvable attribute value");
                value.to_string()
            }
        }
    }
}

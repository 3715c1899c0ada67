//! Response body transformation.
//!
//! HTML documents are streamed through `lol_html`, which tolerates whatever
//! markup real sites send. Link-bearing attributes are rewritten through
//! [`LinkRewriter`], `<meta http-equiv=refresh>` targets are rewritten, and
//! a small banner is prepended to `<body>`. Everything else is relayed as-is.

use std::cell::Cell;

use bytes::Bytes;
use lol_html::{element, end, html_content::ContentType, HtmlRewriter, Settings};

use crate::rewrite::LinkRewriter;
use crate::upstream::UpstreamBody;

/// Content type reported for every rewritten HTML document.
pub const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";

/// Elements and attributes carrying a navigable URL, visited in this order.
pub const LINK_ATTRIBUTES: &[(&str, &str)] = &[
    ("a", "href"),
    ("link", "href"),
    ("script", "src"),
    ("img", "src"),
    ("iframe", "src"),
    ("form", "action"),
    ("source", "src"),
    ("video", "src"),
    ("audio", "src"),
];

const BANNER_HTML: &str = concat!(
    r#"<div id="relay-proxy-banner" aria-hidden="true" style="position:fixed;top:0;right:0;"#,
    r#"z-index:2147483647;padding:2px 8px;font:11px/1.4 sans-serif;color:#fff;"#,
    r#"background:rgba(0,0,0,.6);border-bottom-left-radius:4px;pointer-events:none;">"#,
    "Viewing through relay proxy",
    "</div>"
);

/// Elements that may precede an implied `<body>` without opening it.
const PRE_BODY_TAGS: &[&str] = &[
    "html", "head", "title", "base", "meta", "link", "style", "script", "noscript", "template",
];

/// `text/html` and nothing else, parameters ignored.
pub fn is_html(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(|media| media.trim().eq_ignore_ascii_case("text/html"))
        .unwrap_or(false)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformedBody {
    Html(String),
    Binary(Bytes),
}

/// Rewrites HTML bodies against `rewriter`'s base and passes other bodies through.
pub fn transform(body: UpstreamBody, rewriter: &LinkRewriter) -> anyhow::Result<TransformedBody> {
    match body {
        UpstreamBody::Text(html) => Ok(TransformedBody::Html(rewrite_html(&html, rewriter)?)),
        UpstreamBody::Bytes(bytes) => Ok(TransformedBody::Binary(bytes)),
    }
}

/// Rewrites `<delay>;url=<target>` and leaves delay-only values alone.
pub fn rewrite_refresh(content: &str, rewriter: &LinkRewriter) -> Option<String> {
    let (delay, target) = content.split_once(';')?;
    let target = target.trim();
    let target = match target.get(..4) {
        Some(prefix) if prefix.eq_ignore_ascii_case("url=") => &target[4..],
        _ => target,
    };
    Some(format!("{delay};url={}", rewriter.rewrite(target)))
}

pub fn rewrite_html(html: &str, rewriter: &LinkRewriter) -> anyhow::Result<String> {
    let mut handlers = Vec::with_capacity(LINK_ATTRIBUTES.len() + 2);

    for &(tag, attr) in LINK_ATTRIBUTES {
        handlers.push(element!(format!("{tag}[{attr}]"), move |el| {
            if let Some(value) = el.get_attribute(attr) {
                el.set_attribute(attr, &rewriter.rewrite(&value))?;
            }
            Ok(())
        }));
    }

    handlers.push(element!("meta[http-equiv][content]", move |el| {
        let is_refresh = el
            .get_attribute("http-equiv")
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("refresh"));
        if !is_refresh {
            return Ok(());
        }
        if let Some(content) = el.get_attribute("content") {
            if let Some(rewritten) = rewrite_refresh(&content, rewriter) {
                el.set_attribute("content", &rewritten)?;
            }
        }
        Ok(())
    }));

    // Pages may omit <body>; the banner then goes before the first element
    // that implies it, or at the end of the document if there is none.
    let banner_pending = Cell::new(true);
    let banner_pending = &banner_pending;
    handlers.push(element!("*", move |el| {
        if !banner_pending.get() {
            return Ok(());
        }
        let tag = el.tag_name();
        if tag.eq_ignore_ascii_case("body") {
            el.prepend(BANNER_HTML, ContentType::Html);
            banner_pending.set(false);
        } else if !PRE_BODY_TAGS.iter().any(|t| tag.eq_ignore_ascii_case(t)) {
            el.before(BANNER_HTML, ContentType::Html);
            banner_pending.set(false);
        }
        Ok(())
    }));

    let mut output = Vec::with_capacity(html.len());
    let mut html_rewriter = HtmlRewriter::new(
        Settings {
            element_content_handlers: handlers,
            document_content_handlers: vec![end!(move |end| {
                if banner_pending.get() {
                    end.append(BANNER_HTML, ContentType::Html);
                    banner_pending.set(false);
                }
                Ok(())
            })],
            ..Settings::default()
        },
        |chunk: &[u8]| output.extend_from_slice(chunk),
    );
    html_rewriter.write(html.as_bytes())?;
    html_rewriter.end()?;

    Ok(String::from_utf8(output)?)
}

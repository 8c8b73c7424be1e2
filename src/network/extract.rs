//! Payload extraction shared by every backend.
//!
//! Text/HTML-returning backends hand back whatever the origin rendered. A
//! browser surface wraps JSON in `<pre>`, challenge walls replace content with
//! an interstitial, and the gatekeeper relay may gzip its body. These helpers
//! turn all of that into either a validated payload or a typed error.

use std::cell::RefCell;
use std::io::Read as _;
use std::rc::Rc;

use flate2::read::GzDecoder;
use lol_html::{RewriteStrSettings, rewrite_str, text};

use crate::error::{Error, Result};

/// Substrings that identify a bot-challenge interstitial
pub const CHALLENGE_MARKERS: &[&str] = &[
    "Verifying you are human",
    "cf-challenge-running",
    "Just a moment...",
    "challenge-platform",
    "cf_chl_opt",
    "Checking your browser before accessing",
];

/// Two-byte gzip magic number
pub const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];

/// Whether the body is a bot-challenge page instead of content
pub fn is_challenge_page(body: &str) -> bool {
    CHALLENGE_MARKERS.iter().any(|marker| body.contains(marker))
}

/// Fail with [`Error::VerificationRequired`] when `body` is a challenge page
pub fn ensure_not_challenge(url: &str, body: &str) -> Result<()> {
    if is_challenge_page(body) {
        tracing::warn!(url = %url, "bot-challenge page intercepted request");
        return Err(Error::VerificationRequired {
            url: url.to_string(),
        });
    }
    Ok(())
}

/// Text of the first `<pre>` element, entity-decoded; `None` when absent
pub fn pre_text(html: &str) -> Option<String> {
    // Cheap precheck; most JSON bodies are not HTML at all
    if !html.contains("<pre") && !html.contains("<PRE") {
        return None;
    }

    let captured: Rc<RefCell<Option<String>>> = Rc::new(RefCell::new(None));
    let finished = Rc::new(RefCell::new(false));

    let result = rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![text!("pre", {
                let captured = Rc::clone(&captured);
                let finished = Rc::clone(&finished);
                move |chunk| {
                    if *finished.borrow() {
                        return Ok(());
                    }
                    captured
                        .borrow_mut()
                        .get_or_insert_with(String::new)
                        .push_str(chunk.as_str());
                    if chunk.last_in_text_node() {
                        *finished.borrow_mut() = true;
                    }
                    Ok(())
                }
            })],
            ..RewriteStrSettings::default()
        },
    );

    if let Err(e) = result {
        tracing::debug!(error = %e, "could not scan body for <pre> payload");
        return None;
    }

    let text = captured.borrow().clone();
    text.map(|t| decode_entities(&t))
}

/// Unwrap a JSON payload from a possibly HTML-enveloped body
///
/// Looks for a `<pre>`-wrapped body first, falls back to the whole text, and
/// only accepts the result if it starts with `{` or `[`.
pub fn unwrap_json_payload(body: &str) -> Result<String> {
    let candidate = pre_text(body).unwrap_or_else(|| body.to_string());
    let trimmed = candidate.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        Ok(trimmed.to_string())
    } else {
        let preview: String = trimmed.chars().take(80).collect();
        Err(Error::MalformedResponse(format!(
            "expected JSON payload, got: {preview}"
        )))
    }
}

/// Transparently gunzip a relay body that carries the gzip magic prefix
pub fn decode_relay_body(bytes: Vec<u8>) -> Result<Vec<u8>> {
    if !bytes.starts_with(&GZIP_MAGIC) {
        return Ok(bytes);
    }
    let mut decoder = GzDecoder::new(bytes.as_slice());
    let mut out = Vec::with_capacity(bytes.len() * 4);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| Error::MalformedResponse(format!("corrupt gzip body: {e}")))?;
    Ok(out)
}

/// Decode the handful of entities a browser emits inside `<pre>` text
fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

//! Per-operation collection of `X-Cf-Warnings` headers
//!
//! The dispatcher wraps each host operation in [`collect`]; every response
//! received inside that scope contributes its warnings. Outside a scope the
//! warnings are only logged.

use std::cell::RefCell;
use std::future::Future;

tokio::task_local! {
    static WARNINGS: RefCell<Vec<String>>;
}

/// Run `fut` and return its output with every warning it raised.
pub async fn collect<F: Future>(fut: F) -> (F::Output, Vec<String>) {
    WARNINGS
        .scope(RefCell::new(Vec::new()), async move {
            let out = fut.await;
            let warnings = WARNINGS.with(|w| std::mem::take(&mut *w.borrow_mut()));
            (out, warnings)
        })
        .await
}

/// Record a warning in the current operation.
pub fn push(message: impl Into<String>) {
    let message = message.into();
    tracing::warn!(warning = %message, "platform warning");
    let _ = WARNINGS.try_with(|w| w.borrow_mut().push(message));
}

/// Record every warning carried by an `X-Cf-Warnings` header value.
pub fn push_header(value: &str) {
    for warning in parse_header(value) {
        push(warning);
    }
}

/// Split a URL-encoded, comma separated `X-Cf-Warnings` value.
pub fn parse_header(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|part| percent_decode(part.trim()))
        .filter(|w| !w.is_empty())
        .collect()
}

fn percent_decode(s: &str) -> String {
    // Query-escaped: spaces may arrive as '+'.
    let s = s.replace('+', " ");
    match urlencoding::decode(&s) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => s,
    }
}

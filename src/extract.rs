use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::debug;

// (?s): `.` also matches newlines, so statements may span several lines.
static STATEMENT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)(WITH|SELECT|INSERT|UPDATE|DELETE|CREATE|DROP|ALTER)\s+.*?;")
        .expect("statement pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Could not extract a SQL statement from the model reply")]
pub struct ExtractionFailed;

/// Returns the first keyword-led, semicolon-terminated span of `reply`, verbatim.
pub fn extract_statement(reply: &str) -> Result<&str, ExtractionFailed> {
    match STATEMENT_PATTERN.find(reply) {
        Some(found) => {
            debug!(start = found.start(), end = found.end(), "Extracted SQL statement");
            Ok(found.as_str())
        }
        None => Err(ExtractionFailed),
    }
}

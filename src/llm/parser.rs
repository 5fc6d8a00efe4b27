//! Defensive JSON parsing for reasoning-service output.
//!
//! Responses are requested as JSON but never guaranteed to be. Parsing walks
//! an explicit ladder: the whole text, then the outermost `{...}` span, then
//! failure. Which rung succeeded is part of the result.

use serde::de::DeserializeOwned;

/// How a response was turned into a value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome<T> {
    /// The whole response parsed as JSON.
    Direct(T),
    /// Only the embedded `{...}` span parsed.
    Extracted(T),
    /// Nothing parsed.
    Failed {
        /// Why the last rung failed.
        reason: String,
    },
}

impl<T> ParseOutcome<T> {
    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Direct(_) => "direct",
            Self::Extracted(_) => "extracted",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Parses a response into `T`.
///
/// Direct parse is attempted on the trimmed text. On failure, the span from
/// the first `{` to the last `}` is parsed instead, which recovers JSON
/// wrapped in prose or markdown fences.
pub fn parse_json_response<T: DeserializeOwned>(response: &str) -> ParseOutcome<T> {
    let trimmed = response.trim();
    if trimmed.is_empty() {
        return ParseOutcome::Failed {
            reason: "empty response".to_string(),
        };
    }

    let direct_error = match serde_json::from_str::<T>(trimmed) {
        Ok(value) => return ParseOutcome::Direct(value),
        Err(e) => e,
    };

    let Some(span) = extract_object_span(trimmed) else {
        return ParseOutcome::Failed {
            reason: format!("no JSON object found: {}", direct_error),
        };
    };

    match serde_json::from_str::<T>(span) {
        Ok(value) => ParseOutcome::Extracted(value),
        Err(e) => ParseOutcome::Failed {
            reason: format!("embedded JSON did not parse: {}", e),
        },
    }
}

/// Returns the greedy span from the first `{` to the last `}`.
fn extract_object_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(&text[start..=end])
}

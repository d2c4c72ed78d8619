//! Lenient decoding of structured LLM output.

use serde::de::DeserializeOwned;
use tracing::warn;

/// Characters of raw output kept in parse-failure logs.
const PREVIEW_CHARS: usize = 500;

/// Slice from the first `{` to the last `}`, if both exist in that order.
///
/// Handles markdown fences and chatter around the object.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Decode `raw` into `T`, or log a parse failure and return `fallback(raw)`.
///
/// Never errors. The second element is `false` when the fallback was used.
pub fn parse_or_fallback<T, F>(raw: &str, context: &str, fallback: F) -> (T, bool)
where
    T: DeserializeOwned,
    F: FnOnce(&str) -> T,
{
    let Some(json) = extract_json_object(raw) else {
        warn!(
            context,
            preview = %preview(raw),
            "LLM output parse failure: no JSON object found"
        );
        return (fallback(raw), false);
    };

    match serde_json::from_str::<T>(json) {
        Ok(value) => (value, true),
        Err(e) => {
            warn!(
                context,
                error = %e,
                preview = %preview(raw),
                "LLM output parse failure"
            );
            (fallback(raw), false)
        }
    }
}

fn preview(raw: &str) -> String {
    raw.chars().take(PREVIEW_CHARS).collect()
}

//! Content sanitizer: turns raw email bodies into plain text that is safe to
//! put in an LLM prompt.
//!
//! Every step is total. Nothing here returns an error or panics on input.

use regex::Regex;

use crate::config::SanitizerConfig;
use crate::pipeline::types::BodyFormat;

const ELLIPSIS: &str = "...";

/// Line width handed to the HTML renderer. Wide enough that it never wraps;
/// whitespace is collapsed afterwards anyway.
const RENDER_WIDTH: usize = 10_000;

/// Zero-width spaces, joiners and the byte-order mark.
fn is_invisible(c: char) -> bool {
    matches!(c, '\u{200B}'..='\u{200D}' | '\u{FEFF}')
}

/// Strips markup and invisible characters, cuts footers, caps length.
#[derive(Debug, Clone)]
pub struct Sanitizer {
    max_chars: usize,
    footers: Vec<Regex>,
}

impl Sanitizer {
    /// Compile footer patterns. Invalid patterns are logged and skipped.
    pub fn new(config: &SanitizerConfig) -> Self {
        let footers = config
            .footer_patterns
            .iter()
            .filter_map(|pattern| match Regex::new(pattern) {
                Ok(re) => Some(re),
                Err(e) => {
                    tracing::warn!(pattern = %pattern, error = %e, "Skipping invalid footer pattern");
                    None
                }
            })
            .collect();
        Self {
            max_chars: config.max_chars,
            footers,
        }
    }

    /// Full pipeline for a message body.
    pub fn sanitize(&self, raw: &str, format: BodyFormat) -> String {
        let text = remove_invisible(raw);
        let text = match format {
            BodyFormat::Markup => html_to_text(&text),
            BodyFormat::Plain => decode_entities(&text),
        };
        // Numeric entities can spell out invisible characters too.
        let text = remove_invisible(&text);
        let text = collapse_whitespace(&text);
        let text = self.cut_footer(&text);
        let text = drop_control_chars(&text);
        truncate_chars(text.trim(), self.max_chars)
    }

    fn cut_footer(&self, text: &str) -> String {
        let cut = self
            .footers
            .iter()
            .filter_map(|re| re.find(text).map(|m| m.start()))
            .min();
        match cut {
            Some(idx) => text[..idx].trim_end().to_string(),
            None => text.to_string(),
        }
    }
}

/// Light cleanup for single-line metadata (subjects, sender names).
pub fn clean_text(raw: &str) -> String {
    let text = remove_invisible(raw);
    let text = collapse_whitespace(&text);
    drop_control_chars(&text).trim().to_string()
}

/// Cut to `max_chars` characters, appending `...` when anything was dropped.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}{ELLIPSIS}", &text[..idx]),
        None => text.to_string(),
    }
}

fn remove_invisible(text: &str) -> String {
    text.chars().filter(|c| !is_invisible(*c)).collect()
}

/// Render markup to text: tags dropped, `<script>`/`<style>` content
/// skipped, entities decoded. On renderer failure the input is kept.
fn html_to_text(html: &str) -> String {
    match html2text::from_read(html.as_bytes(), RENDER_WIDTH) {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(error = %e, "HTML conversion failed, keeping raw body");
            html.to_string()
        }
    }
}

/// Decode entities in plain text. Angle brackets are escaped first so the
/// renderer treats them as text rather than tags.
fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    html_to_text(&text.replace('<', "&lt;").replace('>', "&gt;"))
}

fn collapse_whitespace(text: &str) -> String {
    text.replace('\u{00A0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn drop_control_chars(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control() || matches!(c, '\t' | '\n' | '\r'))
        .collect()
}

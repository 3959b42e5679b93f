//! Compatibility with producers that predate typed tool events.
//!
//! Older backends announced tool usage as a plain `loading` update reading
//! `"Using tool: <name>..."` and stamped the call counter into the text as
//! `[call_<n>_<suffix>]`. Everything here can go once no producer emits that.

use std::sync::OnceLock;

use regex::Regex;

use crate::models::{StreamEvent, ToolStatus};

fn tool_usage_regex() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    CACHED.get_or_init(|| {
        Regex::new(r"(?i)using tool:\s*([^.:\[]+?)\s*(?:\.\.\.|[.:]|\[|$)")
            .expect("tool usage regex must compile")
    })
}

fn call_marker_regex() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    CACHED.get_or_init(|| {
        Regex::new(r"\[call_([0-9A-Za-z-]+?)(?:_[0-9a-f]+)?\]").expect("call marker regex must compile")
    })
}

/// Pull `<name>` out of `"using tool: <name>..."`, stopping at `.`, `:` or `...`.
pub fn extract_tool_name(text: &str) -> Option<String> {
    let captures = tool_usage_regex().captures(text)?;
    let name = captures.get(1)?.as_str().trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Call counter embedded as `[call_<n>_<hex>]` by older tool notifications.
pub fn extract_call_id(text: &str) -> Option<String> {
    call_marker_regex()
        .captures(text)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().to_string())
}

/// Re-tag a generic loading line that is really a tool start.
pub fn retag_loading(content: String) -> StreamEvent {
    match extract_tool_name(&content) {
        Some(tool_name) => {
            let call_id = extract_call_id(&content);
            StreamEvent::Tool {
                tool_name,
                status: ToolStatus::Starting,
                content,
                call_id,
            }
        }
        None => StreamEvent::Loading { content },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_name_before_ellipsis() {
        assert_eq!(
            extract_tool_name("Using tool: text_to_sql..."),
            Some("text_to_sql".to_string())
        );
    }

    #[test]
    fn extracts_name_before_colon_or_period() {
        assert_eq!(extract_tool_name("using tool: search: running"), Some("search".to_string()));
        assert_eq!(extract_tool_name("USING TOOL: vision."), Some("vision".to_string()));
        assert_eq!(extract_tool_name("Using tool: forecasting"), Some("forecasting".to_string()));
    }

    #[test]
    fn ignores_plain_loading_text() {
        assert_eq!(extract_tool_name("Generating response..."), None);
        assert_eq!(extract_tool_name("Using tool: ..."), None);
    }

    #[test]
    fn reads_call_marker() {
        assert_eq!(
            extract_call_id("Using tool: search... [call_3_a1b2c3]"),
            Some("3".to_string())
        );
        assert_eq!(extract_call_id("Tool search completed"), None);
    }
}

//! Decoding of ask payloads into prompt-ready descriptions.
//!
//! Payload shapes are owned by the message source and drift over time, so
//! every decoder here degrades to `None` (or plain text) instead of failing.

use serde::Deserialize;
use serde_json::Value;

/// Tool approval payload (`ask: "tool"`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolPayload {
    pub tool: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub is_protected: bool,
}

/// MCP access payload (`ask: "use_mcp_server"`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpPayload {
    pub server_name: String,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub uri: Option<String>,
}

/// Follow-up question with optional suggested answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowupQuestion {
    pub question: String,
    pub suggestions: Vec<String>,
}

#[derive(Deserialize)]
struct RawFollowup {
    question: String,
    #[serde(default)]
    suggest: Vec<RawSuggestion>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawSuggestion {
    Plain(String),
    Answer { answer: String },
}

pub fn parse_tool(text: Option<&str>) -> Option<ToolPayload> {
    serde_json::from_str(text?).ok()
}

pub fn parse_mcp(text: Option<&str>) -> Option<McpPayload> {
    serde_json::from_str(text?).ok()
}

/// Decode a follow-up; non-JSON text is the question itself.
pub fn parse_followup(text: Option<&str>) -> FollowupQuestion {
    let raw = text.unwrap_or_default();
    match serde_json::from_str::<RawFollowup>(raw) {
        Ok(parsed) => FollowupQuestion {
            question: parsed.question,
            suggestions: parsed
                .suggest
                .into_iter()
                .map(|suggestion| match suggestion {
                    RawSuggestion::Plain(answer) | RawSuggestion::Answer { answer } => answer,
                })
                .filter(|answer| !answer.trim().is_empty())
                .collect(),
        },
        Err(_) => FollowupQuestion {
            question: raw.to_string(),
            suggestions: Vec::new(),
        },
    }
}

/// True when a JSON payload flags the action as protected.
pub fn is_protected(text: Option<&str>) -> bool {
    let Some(raw) = text else {
        return false;
    };
    matches!(
        serde_json::from_str::<Value>(raw),
        Ok(Value::Object(fields)) if fields.get("isProtected") == Some(&Value::Bool(true))
    )
}

/// Map a typed answer to the text sent back: a bare 1-based index selects a
/// suggestion, anything else is sent verbatim.
pub fn resolve_followup_answer(input: &str, suggestions: &[String]) -> String {
    let trimmed = input.trim();
    match trimmed.parse::<usize>() {
        Ok(index) if (1..=suggestions.len()).contains(&index) => suggestions[index - 1].clone(),
        _ => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tool_payload() {
        let tool = parse_tool(Some(
            r#"{"tool":"editedExistingFile","path":"src/main.rs","isProtected":true,"diff":"..."}"#,
        ))
        .expect("tool");
        assert_eq!(tool.tool, "editedExistingFile");
        assert_eq!(tool.path.as_deref(), Some("src/main.rs"));
        assert!(tool.is_protected);
        assert!(parse_tool(Some("not json")).is_none());
        assert!(parse_tool(None).is_none());
    }

    #[test]
    fn parses_mcp_payload() {
        let mcp = parse_mcp(Some(
            r#"{"type":"use_mcp_tool","serverName":"github","toolName":"search"}"#,
        ))
        .expect("mcp");
        assert_eq!(mcp.server_name, "github");
        assert_eq!(mcp.tool_name.as_deref(), Some("search"));
        assert!(mcp.uri.is_none());
    }

    /// Suggestions may be objects with `answer` or bare strings.
    #[test]
    fn parses_followup_suggestions() {
        let question = parse_followup(Some(
            r#"{"question":"Which db?","suggest":[{"answer":"sqlite"},"postgres",{"answer":" "}]}"#,
        ));
        assert_eq!(question.question, "Which db?");
        assert_eq!(question.suggestions, vec!["sqlite", "postgres"]);
    }

    #[test]
    fn plain_followup_is_the_question() {
        let question = parse_followup(Some("What next?"));
        assert_eq!(question.question, "What next?");
        assert!(question.suggestions.is_empty());
    }

    #[test]
    fn protected_flag_detection() {
        assert!(is_protected(Some(r#"{"tool":"x","isProtected":true}"#)));
        assert!(!is_protected(Some(r#"{"tool":"x","isProtected":false}"#)));
        assert!(!is_protected(Some("rm -rf /")));
        assert!(!is_protected(None));
    }

    /// A bare in-range index selects a suggestion; anything else is verbatim.
    #[test]
    fn index_shortcut_selects_suggestion() {
        let suggestions = vec!["sqlite".to_string(), "postgres".to_string()];
        assert_eq!(resolve_followup_answer("2", &suggestions), "postgres");
        assert_eq!(resolve_followup_answer(" 1 ", &suggestions), "sqlite");
        assert_eq!(resolve_followup_answer("3", &suggestions), "3");
        assert_eq!(resolve_followup_answer("0", &suggestions), "0");
        assert_eq!(resolve_followup_answer("use mysql", &suggestions), "use mysql");
    }
}

//! Prompt assembly for the model call.
//!
//! Sections appear in a fixed order: persona, location, similar past
//! exchanges, recent conversation, per-tool data, then the current query.
//! Empty sections are omitted.

use std::fmt::Write;

use serde::{Deserialize, Serialize};

use juno_core::records::{ConversationRecord, Role};

use crate::context::ContextSnippet;

/// Tool payloads above this many bytes are cut at a char boundary.
pub const MAX_TOOL_DATA_BYTES: usize = 16 * 1024;

pub const NO_DATA: &str = "no data available";

const PERSONA: &str = "\
You are Juno, a warm, empathetic, and intelligent AI companion. You are a \
supportive friend who genuinely cares about the user's well-being across all \
aspects of their life.

## Your Core Personality:
- Empathetic and caring: acknowledge emotions and offer support when needed
- Encouraging: help users feel motivated about their goals
- Conversational: chat like a close friend who remembers previous conversations
- Balanced: an all-around companion first, with financial expertise when relevant

## Interaction Guidelines:
- For non-financial requests, focus on the actual request and do not redirect to finances
- For financial questions, ground your answer in the financial data provided below
- If a data source is marked as unavailable, say so briefly instead of guessing numbers
- Reference previous conversations naturally when they are relevant";

/// Optional client-reported location.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

impl LocationContext {
    /// `City: X, State: Y, Country: Z`, skipping blank parts. `None` when
    /// every part is blank.
    pub fn describe(&self) -> Option<String> {
        let parts: Vec<String> = [("City", &self.city), ("State", &self.state), ("Country", &self.country)]
            .into_iter()
            .filter_map(|(label, value)| {
                value
                    .as_deref()
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(|v| format!("{label}: {v}"))
            })
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(", "))
        }
    }
}

/// Data fetched for one tool. `None` means the call failed or timed out.
#[derive(Clone, Debug)]
pub struct ToolSection<'a> {
    pub tool_name: &'a str,
    pub data: Option<&'a str>,
}

#[derive(Clone, Debug, Default)]
pub struct PromptInput<'a> {
    pub query: &'a str,
    pub location: Option<&'a LocationContext>,
    pub similar: &'a [ContextSnippet],
    pub recent: &'a [ConversationRecord],
    pub tools: &'a [ToolSection<'a>],
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::User => "User",
        Role::Assistant => "Assistant",
    }
}

/// Cut `text` to at most `max_bytes`, backing off to a char boundary.
pub fn truncate_at_boundary(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

pub fn build_prompt(input: &PromptInput<'_>) -> String {
    let mut out = String::with_capacity(PERSONA.len() + input.query.len() + 512);
    out.push_str(PERSONA);
    out.push_str("\n\n");

    if let Some(location) = input.location.and_then(LocationContext::describe) {
        let _ = writeln!(out, "USER'S CURRENT LOCATION: {location}");
        out.push_str("Consider the user's location for region-specific advice.\n\n");
    }

    if !input.similar.is_empty() {
        out.push_str("RELEVANT PAST CONVERSATIONS:\n");
        for snippet in input.similar {
            let _ = writeln!(out, "- {}: {}", role_label(snippet.role), snippet.text);
        }
        out.push('\n');
    }

    if !input.recent.is_empty() {
        out.push_str("RECENT CONVERSATION:\n");
        for record in input.recent {
            let _ = writeln!(out, "- {}: {}", role_label(record.role), record.text);
        }
        out.push('\n');
    }

    if !input.tools.is_empty() {
        out.push_str("FINANCIAL DATA:\n");
        for section in input.tools {
            match section.data {
                Some(data) => {
                    let cut = truncate_at_boundary(data, MAX_TOOL_DATA_BYTES);
                    let _ = writeln!(out, "[{}]\n{}", section.tool_name, cut);
                    if cut.len() < data.len() {
                        out.push_str("... (truncated)\n");
                    }
                }
                None => {
                    let _ = writeln!(out, "[{}]\n{NO_DATA}", section.tool_name);
                }
            }
        }
        out.push('\n');
    }

    let _ = write!(out, "CURRENT USER QUERY: {}\n\nRespond as Juno would.", input.query);
    out
}

#[cfg(test)]
mod tests {
    use juno_core::tenant::TenantIdentity;

    use super::*;

    fn record(role: Role, text: &str) -> ConversationRecord {
        ConversationRecord::new(TenantIdentity::new("uid42", "1111111111"), role, text, Vec::new())
    }

    #[test]
    fn bare_prompt_has_persona_and_query_only() {
        let prompt = build_prompt(&PromptInput {
            query: "hello",
            ..Default::default()
        });
        assert!(prompt.starts_with("You are Juno"));
        assert!(prompt.contains("CURRENT USER QUERY: hello"));
        assert!(!prompt.contains("RELEVANT PAST CONVERSATIONS:"));
        assert!(!prompt.contains("RECENT CONVERSATION:"));
        assert!(!prompt.contains("FINANCIAL DATA:"));
        assert!(!prompt.contains("LOCATION"));
    }

    #[test]
    fn sections_in_order() {
        let similar = vec![ContextSnippet {
            role: Role::User,
            text: "what's my balance".into(),
            similarity: 0.91,
        }];
        let recent = vec![record(Role::User, "hi"), record(Role::Assistant, "hello there")];
        let tools = [
            ToolSection {
                tool_name: "fetch_net_worth",
                data: Some("Net worth: 12,00,000"),
            },
            ToolSection {
                tool_name: "fetch_credit_report",
                data: None,
            },
        ];
        let location = LocationContext {
            city: Some("Pune".into()),
            state: None,
            country: Some("India".into()),
        };
        let prompt = build_prompt(&PromptInput {
            query: "can I afford a car",
            location: Some(&location),
            similar: &similar,
            recent: &recent,
            tools: &tools,
        });

        let pos = |needle: &str| prompt.find(needle).unwrap_or_else(|| panic!("missing {needle}"));
        assert!(pos("USER'S CURRENT LOCATION: City: Pune, Country: India") < pos("RELEVANT PAST CONVERSATIONS:"));
        assert!(pos("RELEVANT PAST CONVERSATIONS:") < pos("RECENT CONVERSATION:"));
        assert!(pos("RECENT CONVERSATION:") < pos("FINANCIAL DATA:"));
        assert!(pos("FINANCIAL DATA:") < pos("CURRENT USER QUERY: can I afford a car"));
        assert!(prompt.contains("- User: what's my balance"));
        assert!(prompt.contains("- Assistant: hello there"));
        assert!(prompt.contains("[fetch_net_worth]\nNet worth: 12,00,000"));
        assert!(prompt.contains("[fetch_credit_report]\nno data available"));
    }

    #[test]
    fn blank_location_is_omitted() {
        let location = LocationContext {
            city: Some("  ".into()),
            ..Default::default()
        };
        assert_eq!(location.describe(), None);
        let prompt = build_prompt(&PromptInput {
            query: "q",
            location: Some(&location),
            ..Default::default()
        });
        assert!(!prompt.contains("LOCATION"));
    }

    #[test]
    fn location_deserializes_partial() {
        let loc: LocationContext = serde_json::from_str(r#"{"city":"Mumbai"}"#).unwrap();
        assert_eq!(loc.describe().as_deref(), Some("City: Mumbai"));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "ab₹cd";
        // '₹' spans bytes 2..5
        assert_eq!(truncate_at_boundary(text, 3), "ab");
        assert_eq!(truncate_at_boundary(text, 5), "ab₹");
        assert_eq!(truncate_at_boundary(text, 100), text);
    }

    #[test]
    fn oversized_tool_data_is_marked() {
        let big = "x".repeat(MAX_TOOL_DATA_BYTES + 10);
        let tools = [ToolSection {
            tool_name: "fetch_bank_transactions",
            data: Some(&big),
        }];
        let prompt = build_prompt(&PromptInput {
            query: "q",
            tools: &tools,
            ..Default::default()
        });
        assert!(prompt.contains("... (truncated)"));
        assert!(prompt.len() < big.len() + PERSONA.len());
    }
}

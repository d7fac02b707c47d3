use crate::client::AdapterConfig;
use crate::specs::openai::*;
use crate::types::*;
use std::collections::HashMap;

/// Projects typed conversation history into the outgoing wire schema.
pub struct RequestProjection;

impl RequestProjection {
    pub fn project(
        config: &AdapterConfig,
        history: &[TurnRecord],
        tools: Option<Vec<OpenAiTool>>,
        stream: bool,
    ) -> OpenAiRequest {
        tracing::debug!(
            target: "wire",
            "projecting {} history turns for model {}",
            history.len(),
            config.model
        );

        OpenAiRequest {
            model: config.model.clone(),
            messages: Self::transform_messages(history),
            stream: Some(stream),
            temperature: config.temperature,
            top_p: config.top_p,
            max_tokens: config.max_tokens,
            tools,
            stop: config.stop.clone(),
            extra: HashMap::new(),
        }
    }

    fn transform_messages(history: &[TurnRecord]) -> Vec<OpenAiMessage> {
        history
            .iter()
            .map(|record| match record.role {
                Role::System => Self::transform_system_message(record),
                Role::User => Self::transform_user_message(record),
                Role::Assistant => Self::transform_assistant_message(record),
                Role::Tool => Self::transform_tool_message(record, history),
            })
            .collect()
    }

    fn transform_system_message(record: &TurnRecord) -> OpenAiMessage {
        OpenAiMessage::System {
            content: Self::content_to_text(&record.content),
        }
    }

    fn transform_user_message(record: &TurnRecord) -> OpenAiMessage {
        OpenAiMessage::User {
            content: Self::content_to_text(&record.content),
        }
    }

    fn transform_assistant_message(record: &TurnRecord) -> OpenAiMessage {
        let mut tool_calls = Vec::new();
        let mut text_parts = Vec::new();

        for part in &record.content {
            match part {
                MessagePart::Text { content } => {
                    text_parts.push(content.clone());
                }
                // Thought parts are presentation-side only and never
                // replayed upstream.
                MessagePart::Thought { .. } => {}
                MessagePart::ToolCall {
                    id,
                    name,
                    arguments,
                } => {
                    tool_calls.push(OpenAiToolCall {
                        id: id.clone(),
                        r#type: "function".to_string(),
                        function: OpenAiFunctionCall {
                            name: name.clone(),
                            arguments: arguments.to_string(),
                        },
                    });
                }
                MessagePart::ToolResult { .. } => {}
            }
        }

        let text_content = text_parts.join("\n");
        OpenAiMessage::Assistant {
            content: if text_content.is_empty() {
                None
            } else {
                Some(text_content)
            },
            tool_calls,
        }
    }

    fn transform_tool_message(record: &TurnRecord, history: &[TurnRecord]) -> OpenAiMessage {
        let (tool_call_id, name) = match record.tool_call_id.as_ref() {
            Some(id) => {
                let name = record.content.iter().find_map(|p| {
                    if let MessagePart::ToolResult { name, .. } = p {
                        name.clone()
                    } else {
                        None
                    }
                });
                (id.clone(), name)
            }
            None => record
                .content
                .iter()
                .find_map(|p| {
                    if let MessagePart::ToolResult {
                        tool_call_id, name, ..
                    } = p
                    {
                        Some((tool_call_id.clone(), name.clone()))
                    } else {
                        None
                    }
                })
                .unwrap_or_else(|| ("missing_id".to_string(), None)),
        };

        // Providers want the function name on the tool result; recover it
        // from the originating call when the result part omitted it.
        let final_name = name.unwrap_or_else(|| {
            history
                .iter()
                .find_map(|r| {
                    r.content.iter().find_map(|p| {
                        if let MessagePart::ToolCall { id, name, .. } = p {
                            if id == &tool_call_id {
                                Some(name.clone())
                            } else {
                                None
                            }
                        } else {
                            None
                        }
                    })
                })
                .unwrap_or_else(|| "unknown_tool".to_string())
        });

        OpenAiMessage::Tool {
            content: Self::content_to_text(&record.content),
            tool_call_id,
            name: final_name,
        }
    }

    fn content_to_text(content: &[MessagePart]) -> String {
        content
            .iter()
            .filter_map(|p| match p {
                MessagePart::Text { content } => Some(content.clone()),
                MessagePart::ToolResult { content, .. } => Some(content.clone()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> AdapterConfig {
        AdapterConfig {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: Some(0.7),
            top_p: None,
            max_tokens: None,
            stop: None,
        }
    }

    #[test]
    fn test_assistant_replay_keeps_tool_calls_drops_thoughts() {
        let history = vec![TurnRecord {
            role: Role::Assistant,
            content: vec![
                MessagePart::Thought {
                    content: "pondering".into(),
                },
                MessagePart::Text {
                    content: "Reading the file.".into(),
                },
                MessagePart::ToolCall {
                    id: "call_1".into(),
                    name: "read_file".into(),
                    arguments: json!({"path": "a.txt"}),
                },
            ],
            tool_call_id: None,
        }];

        let request = RequestProjection::project(&config(), &history, None, true);
        let wire = serde_json::to_value(&request).expect("serializes");

        let message = &wire["messages"][0];
        assert_eq!(message["role"], "assistant");
        assert_eq!(message["content"], "Reading the file.");
        assert_eq!(message["tool_calls"][0]["id"], "call_1");
        assert_eq!(message["tool_calls"][0]["function"]["name"], "read_file");
        // Arguments travel as a JSON-encoded string.
        let args = message["tool_calls"][0]["function"]["arguments"]
            .as_str()
            .expect("string arguments");
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(args).expect("parses"),
            json!({"path": "a.txt"})
        );
        assert!(message.get("thought").is_none());
        assert!(message.get("reasoning").is_none());
    }

    #[test]
    fn test_tool_result_name_recovered_from_originating_call() {
        let history = vec![
            TurnRecord {
                role: Role::Assistant,
                content: vec![MessagePart::ToolCall {
                    id: "call_7".into(),
                    name: "grep".into(),
                    arguments: json!({}),
                }],
                tool_call_id: None,
            },
            TurnRecord {
                role: Role::Tool,
                content: vec![MessagePart::ToolResult {
                    tool_call_id: "call_7".into(),
                    name: None,
                    content: "3 matches".into(),
                    is_error: false,
                }],
                tool_call_id: Some("call_7".into()),
            },
        ];

        let request = RequestProjection::project(&config(), &history, None, true);
        let wire = serde_json::to_value(&request).expect("serializes");

        assert_eq!(wire["messages"][1]["role"], "tool");
        assert_eq!(wire["messages"][1]["tool_call_id"], "call_7");
        assert_eq!(wire["messages"][1]["name"], "grep");
        assert_eq!(wire["messages"][1]["content"], "3 matches");
    }

    #[test]
    fn test_unset_knobs_stay_off_the_wire() {
        let history = vec![
            TurnRecord::system("Be terse."),
            TurnRecord::user("hello"),
        ];
        let request = RequestProjection::project(&config(), &history, None, false);
        let wire = serde_json::to_value(&request).expect("serializes");

        assert_eq!(wire["stream"], false);
        assert_eq!(wire["temperature"], 0.7);
        assert!(wire.get("top_p").is_none());
        assert!(wire.get("max_tokens").is_none());
        assert!(wire.get("tools").is_none());
        assert!(wire.get("stop").is_none());
        assert_eq!(wire["messages"][0]["role"], "system");
        assert_eq!(wire["messages"][1]["content"], "hello");
    }
}

use crate::types::ChatChunk;
use tracing::info;

/// Per-response stream counters, logged once when the stream finishes.
#[derive(Default)]
pub struct StreamMetric {
    pub chunks: usize,
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub tool_fragments: usize,
    pub text_chars: usize,
    pub tool_names: Vec<String>,
}

impl StreamMetric {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_chunk(&mut self, chunk: &ChatChunk) {
        self.chunks += 1;
        if let Some(usage) = &chunk.usage {
            self.prompt_tokens = usage.prompt_tokens as usize;
            self.completion_tokens = usage.completion_tokens as usize;
        }
        for choice in &chunk.choices {
            if let Some(content) = &choice.delta.content {
                self.text_chars += content.len();
            }
            if let Some(tools) = &choice.delta.tool_calls {
                self.tool_fragments += tools.len();
                for t in tools {
                    if let Some(f) = &t.function {
                        if let Some(name) = &f.name {
                            if !name.is_empty() {
                                self.tool_names.push(name.clone());
                            }
                        }
                    }
                }
            }
        }
    }

    pub fn log_summary(&self, response_id: &str) {
        let tools_str = if self.tool_names.is_empty() {
            format!("{}", self.tool_fragments)
        } else {
            format!("{} ({})", self.tool_fragments, self.tool_names.join(", "))
        };

        info!(
            target: "stream",
            "[STREAM END] Response: {} | Chunks: {} | Tools: {} | Text: {} chars | Tokens: {}p/{}c",
            response_id,
            self.chunks,
            tools_str,
            self.text_chars,
            self.prompt_tokens,
            self.completion_tokens
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChunkChoice, ChunkDelta, FunctionDelta, ToolCallDelta, Usage};

    #[test]
    fn test_record_chunk_counts() {
        let chunk = ChatChunk {
            id: "r1".into(),
            model: "m".into(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta {
                    content: Some("hello".into()),
                    role: None,
                    tool_calls: Some(vec![ToolCallDelta {
                        index: 0,
                        id: Some("call_1".into()),
                        function: Some(FunctionDelta {
                            name: Some("search".into()),
                            arguments: None,
                        }),
                        extra: serde_json::Map::new(),
                    }]),
                    extra: serde_json::Map::new(),
                },
                finish_reason: None,
            }],
            usage: Some(Usage {
                prompt_tokens: 7,
                completion_tokens: 3,
                total_tokens: 10,
            }),
        };

        let mut metric = StreamMetric::new();
        metric.record_chunk(&chunk);

        assert_eq!(metric.chunks, 1);
        assert_eq!(metric.text_chars, 5);
        assert_eq!(metric.tool_fragments, 1);
        assert_eq!(metric.tool_names, vec!["search".to_string()]);
        assert_eq!(metric.prompt_tokens, 7);
        assert_eq!(metric.completion_tokens, 3);
    }
}

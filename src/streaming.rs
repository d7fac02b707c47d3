use crate::constants::{
    FINISH_REASON_TOOL_CALLS, MAX_SSE_LINE_BYTES, MAX_STREAM_LINES, SSE_DATA_PREFIX,
    SSE_DONE_SENTINEL,
};
use crate::logging::StreamMetric;
use crate::think_split::ThinkSplitter;
use crate::types::{
    parse_data_payload, ChatChunk, LineEvent, ProgressSink, StreamUnit, ToolCallAccumulator, Usage,
};
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::{Stream, StreamExt};
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;

type TransportLines =
    FramedRead<StreamReader<BoxStream<'static, std::io::Result<Bytes>>, Bytes>, LinesCodec>;

enum LineOutcome {
    Chunk(ChatChunk),
    Done,
    Skip,
}

/// Pull-based decoder over the SSE transport. Yields one protocol chunk at a
/// time until the `[DONE]` sentinel, transport closure, or cancellation.
/// Dropping it drops the transport body, which closes the upstream
/// connection.
pub struct ChunkStream {
    lines: TransportLines,
    cancel: CancellationToken,
    finished: bool,
    lines_seen: u64,
}

impl ChunkStream {
    pub fn new(
        bytes: impl Stream<Item = std::io::Result<Bytes>> + Send + 'static,
        cancel: CancellationToken,
    ) -> Self {
        let reader = StreamReader::new(bytes.boxed());
        let lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_SSE_LINE_BYTES));
        Self {
            lines,
            cancel,
            finished: false,
            lines_seen: 0,
        }
    }

    pub fn from_response(response: reqwest::Response, cancel: CancellationToken) -> Self {
        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(std::io::Error::other));
        Self::new(bytes, cancel)
    }

    /// Next decoded chunk, or `None` once the stream is over. Cancellation is
    /// observed between reads and ends the sequence without error.
    pub async fn next_chunk(&mut self) -> Option<ChatChunk> {
        if self.finished {
            return None;
        }
        loop {
            if self.cancel.is_cancelled() {
                tracing::debug!(target: "stream", "cancellation observed, releasing transport");
                self.finished = true;
                return None;
            }

            let next_line = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    tracing::debug!(target: "stream", "cancellation observed mid-read, releasing transport");
                    self.finished = true;
                    return None;
                }
                line = self.lines.next() => line,
            };

            let line = match next_line {
                Some(Ok(line)) => line,
                Some(Err(codec_err)) => {
                    tracing::warn!(
                        target: "stream",
                        "transport read failed mid-stream, treating as closure: {}",
                        codec_err
                    );
                    self.finished = true;
                    return None;
                }
                None => {
                    self.finished = true;
                    return None;
                }
            };

            self.lines_seen += 1;
            if self.lines_seen > MAX_STREAM_LINES {
                tracing::error!(
                    target: "stream",
                    "aborting runaway stream after {} lines",
                    self.lines_seen
                );
                self.finished = true;
                return None;
            }

            match self.decode_line(&line) {
                LineOutcome::Chunk(chunk) => return Some(chunk),
                LineOutcome::Done => {
                    self.finished = true;
                    return None;
                }
                LineOutcome::Skip => continue,
            }
        }
    }

    fn decode_line(&self, raw: &str) -> LineOutcome {
        let line = raw.trim();
        if line.is_empty() {
            return LineOutcome::Skip;
        }
        let payload = match line.strip_prefix(SSE_DATA_PREFIX) {
            Some(rest) => rest.trim(),
            // Comment and event-name lines are framing, not data.
            None => return LineOutcome::Skip,
        };
        if payload == SSE_DONE_SENTINEL {
            tracing::debug!(target: "stream", "termination sentinel received");
            return LineOutcome::Done;
        }
        match parse_data_payload(payload) {
            LineEvent::Chunk(chunk) => LineOutcome::Chunk(chunk),
            LineEvent::Error(err) => {
                // An error record must not kill an otherwise healthy stream.
                tracing::warn!(
                    target: "stream",
                    "upstream error record in stream (code {:?}): {}",
                    err.error.code,
                    err.error.message
                );
                LineOutcome::Skip
            }
            LineEvent::Unknown(_) => LineOutcome::Skip,
        }
    }
}

/// What a consumed response stream amounted to.
#[derive(Debug, Clone)]
pub struct StreamOutcome {
    pub chunks: usize,
    pub usage: Option<Usage>,
    pub cancelled: bool,
}

/// Owns the per-response mutable state and routes every decoded chunk: text
/// deltas go through the think splitter straight to the sink, tool-call
/// deltas into the accumulator, with a flush on each `tool_calls` finish
/// signal and once more at natural stream end.
pub struct StreamDriver {
    splitter: ThinkSplitter,
    tools: ToolCallAccumulator,
    metric: StreamMetric,
    cancel: CancellationToken,
    response_id: String,
}

impl StreamDriver {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            splitter: ThinkSplitter::new(),
            tools: ToolCallAccumulator::new(),
            metric: StreamMetric::new(),
            cancel,
            response_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Consumes the whole stream. Cancellation is a normal outcome, not an
    /// error: the driver stops at the next chunk boundary and abandons any
    /// in-flight partial state without emitting it.
    pub async fn run(
        mut self,
        mut source: ChunkStream,
        sink: &mut dyn ProgressSink,
    ) -> StreamOutcome {
        let short_id = crate::str_utils::prefix_chars(&self.response_id, 8).to_string();
        tracing::info!(target: "stream", "[{}] response stream opened", short_id);

        let mut usage: Option<Usage> = None;

        while let Some(chunk) = source.next_chunk().await {
            if self.cancel.is_cancelled() {
                return self.abandon(&short_id);
            }
            self.metric.record_chunk(&chunk);
            if let Some(u) = &chunk.usage {
                usage = Some(u.clone());
            }

            for choice in &chunk.choices {
                if let Some(content) = &choice.delta.content {
                    let visible = self.splitter.push(content);
                    if !visible.is_empty() {
                        sink.emit(StreamUnit::Text(visible));
                    }
                }
                if let Some(fragments) = &choice.delta.tool_calls {
                    for fragment in fragments {
                        self.tools.collect(fragment);
                    }
                }
                if choice.finish_reason.as_deref() == Some(FINISH_REASON_TOOL_CALLS) {
                    tracing::debug!(
                        target: "stream",
                        "[{}] finish signal requested tool flush",
                        short_id
                    );
                    flush_tools(&mut self.tools, sink);
                }
            }
        }

        // next_chunk() returns None on cancellation too; only a run that got
        // here without the token firing counts as a natural end.
        if self.cancel.is_cancelled() {
            return self.abandon(&short_id);
        }

        if self.splitter.inside_block() {
            tracing::debug!(
                target: "stream",
                "[{}] stream ended inside an unterminated reasoning block",
                short_id
            );
        }
        let tail = self.splitter.finish();
        if !tail.is_empty() {
            sink.emit(StreamUnit::Text(tail));
        }
        // Covers providers that end the stream without a tool_calls finish
        // signal. Right after a mid-stream flush this is a no-op.
        flush_tools(&mut self.tools, sink);

        self.metric.log_summary(&short_id);
        StreamOutcome {
            chunks: self.metric.chunks,
            usage,
            cancelled: false,
        }
    }

    fn abandon(self, short_id: &str) -> StreamOutcome {
        if self.tools.pending() > 0 {
            tracing::debug!(
                target: "stream",
                "[{}] discarding {} unflushed tool call builders",
                short_id,
                self.tools.pending()
            );
        }
        tracing::info!(
            target: "stream",
            "[{}] cancelled after {} chunks, in-flight state discarded",
            short_id,
            self.metric.chunks
        );
        StreamOutcome {
            chunks: self.metric.chunks,
            usage: None,
            cancelled: true,
        }
    }
}

fn flush_tools(tools: &mut ToolCallAccumulator, sink: &mut dyn ProgressSink) {
    for invocation in tools.flush() {
        tracing::info!(
            target: "stream",
            "tool call finalized: {} ({})",
            invocation.name,
            invocation.id
        );
        sink.emit(StreamUnit::ToolCall(invocation));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    fn byte_stream(parts: Vec<&'static str>) -> impl Stream<Item = std::io::Result<Bytes>> {
        stream::iter(
            parts
                .into_iter()
                .map(|p| Ok::<_, std::io::Error>(Bytes::from(p))),
        )
    }

    #[tokio::test]
    async fn test_sentinel_ends_stream() {
        let source = byte_stream(vec![
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"hi\"}}]}\n\n",
            "data: [DONE]\n\n",
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"never\"}}]}\n\n",
        ]);
        let mut chunks = ChunkStream::new(source, CancellationToken::new());

        let first = chunks.next_chunk().await;
        assert!(first.is_some());
        assert!(chunks.next_chunk().await.is_none());
        // Finished streams stay finished.
        assert!(chunks.next_chunk().await.is_none());
    }

    #[tokio::test]
    async fn test_non_data_lines_are_skipped() {
        let source = byte_stream(vec![
            ": keep-alive\n",
            "event: message\n",
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"x\"}}]}\n",
        ]);
        let mut chunks = ChunkStream::new(source, CancellationToken::new());
        let chunk = chunks.next_chunk().await.expect("one chunk");
        assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("x"));
        assert!(chunks.next_chunk().await.is_none());
    }
}

use bytes::Bytes;
use futures_util::{stream, Stream, StreamExt};
use prism::streaming::ChunkStream;
use tokio_util::sync::CancellationToken;

fn byte_stream(parts: Vec<String>) -> impl Stream<Item = std::io::Result<Bytes>> + Send {
    stream::iter(
        parts
            .into_iter()
            .map(|p| Ok::<_, std::io::Error>(Bytes::from(p))),
    )
}

fn text_chunk(content: &str) -> String {
    format!(
        "data: {}\n\n",
        serde_json::json!({"choices": [{"index": 0, "delta": {"content": content}}]})
    )
}

async fn collect_contents(mut chunks: ChunkStream) -> Vec<String> {
    let mut contents = Vec::new();
    while let Some(chunk) = chunks.next_chunk().await {
        for choice in &chunk.choices {
            if let Some(content) = &choice.delta.content {
                contents.push(content.clone());
            }
        }
    }
    contents
}

#[tokio::test]
async fn test_malformed_record_between_two_good_yields_exactly_two() {
    let source = byte_stream(vec![
        text_chunk("one"),
        "data: {this is not json\n\n".to_string(),
        text_chunk("two"),
        "data: [DONE]\n\n".to_string(),
    ]);
    let chunks = ChunkStream::new(source, CancellationToken::new());

    let contents = collect_contents(chunks).await;
    assert_eq!(contents, vec!["one", "two"]);
}

#[tokio::test]
async fn test_error_record_is_skipped_not_fatal() {
    let source = byte_stream(vec![
        text_chunk("before"),
        "data: {\"error\":{\"message\":\"overloaded\",\"code\":529}}\n\n".to_string(),
        text_chunk("after"),
        "data: [DONE]\n\n".to_string(),
    ]);
    let chunks = ChunkStream::new(source, CancellationToken::new());

    let contents = collect_contents(chunks).await;
    assert_eq!(contents, vec!["before", "after"]);
}

#[tokio::test]
async fn test_done_sentinel_ends_decoding_before_later_records() {
    let source = byte_stream(vec![
        text_chunk("kept"),
        "data: [DONE]\n\n".to_string(),
        text_chunk("never seen"),
    ]);
    let chunks = ChunkStream::new(source, CancellationToken::new());

    let contents = collect_contents(chunks).await;
    assert_eq!(contents, vec!["kept"]);
}

#[tokio::test]
async fn test_framing_lines_are_skipped() {
    let source = byte_stream(vec![
        ": keep-alive\n".to_string(),
        "\n".to_string(),
        "event: message\n".to_string(),
        text_chunk("payload"),
        "data: [DONE]\n".to_string(),
    ]);
    let chunks = ChunkStream::new(source, CancellationToken::new());

    let contents = collect_contents(chunks).await;
    assert_eq!(contents, vec!["payload"]);
}

#[tokio::test]
async fn test_record_split_across_transport_reads() {
    // One logical line arriving in three byte chunks must decode once the
    // newline lands.
    let whole = text_chunk("reassembled");
    let (a, rest) = whole.split_at(9);
    let (b, c) = rest.split_at(14);
    let source = byte_stream(vec![a.to_string(), b.to_string(), c.to_string()]);
    let chunks = ChunkStream::new(source, CancellationToken::new());

    let contents = collect_contents(chunks).await;
    assert_eq!(contents, vec!["reassembled"]);
}

#[tokio::test]
async fn test_crlf_line_endings_tolerated() {
    let payload = serde_json::json!({"choices": [{"index": 0, "delta": {"content": "crlf"}}]});
    let source = byte_stream(vec![
        format!("data: {}\r\n", payload),
        "data: [DONE]\r\n".to_string(),
    ]);
    let chunks = ChunkStream::new(source, CancellationToken::new());

    let contents = collect_contents(chunks).await;
    assert_eq!(contents, vec!["crlf"]);
}

#[tokio::test]
async fn test_cancellation_stops_reads_of_available_data() {
    let cancel = CancellationToken::new();
    let source = byte_stream(vec![
        text_chunk("first"),
        text_chunk("second"),
        text_chunk("third"),
    ]);
    let mut chunks = ChunkStream::new(source, cancel.clone());

    assert!(chunks.next_chunk().await.is_some());
    cancel.cancel();
    assert!(chunks.next_chunk().await.is_none());
    assert!(chunks.next_chunk().await.is_none());
}

#[tokio::test]
async fn test_cancellation_interrupts_a_pending_read() {
    let cancel = CancellationToken::new();
    // A transport that never produces another byte; only cancellation can
    // end the read.
    let source = byte_stream(vec![text_chunk("only")]).chain(stream::pending());
    let mut chunks = ChunkStream::new(source, cancel.clone());

    assert!(chunks.next_chunk().await.is_some());

    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        canceller.cancel();
    });
    assert!(chunks.next_chunk().await.is_none());
}

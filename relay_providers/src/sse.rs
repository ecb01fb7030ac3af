//! Server-sent event lines of an OpenAI-compatible streaming completion.

use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// A piece of generated text.
    Delta(String),
    /// `data: [DONE]`, the end of the stream.
    Done,
    /// Blank lines, comments, other fields and chunks without content.
    Skip,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    error: Option<StreamError>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Option<Delta>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamError {
    message: String,
}

/// Interpret one line of the event stream.
///
/// An `error` payload inside the stream is returned as an error.
pub fn parse_sse_line(line: &str) -> anyhow::Result<SseEvent> {
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(SseEvent::Skip);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(SseEvent::Done);
    }
    if data.is_empty() {
        return Ok(SseEvent::Skip);
    }

    let chunk: StreamChunk = serde_json::from_str(data)
        .map_err(|e| anyhow::anyhow!("Failed to parse stream chunk: {e}"))?;
    if let Some(error) = chunk.error {
        anyhow::bail!("Provider reported an error mid-stream: {}", error.message);
    }

    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta)
        .and_then(|delta| delta.content)
        .map_or(SseEvent::Skip, SseEvent::Delta))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_delta() {
        let line = r#"data: {"id":"x","choices":[{"index":0,"delta":{"content":"Hel"}}]}"#;
        assert_eq!(
            parse_sse_line(line).unwrap(),
            SseEvent::Delta("Hel".to_string())
        );
    }

    #[test]
    fn role_only_and_empty_choices_are_skipped() {
        let role = r#"data: {"choices":[{"index":0,"delta":{"role":"assistant"}}]}"#;
        let usage = r#"data: {"choices":[],"x_groq":{"usage":{"total_tokens":12}}}"#;
        assert_eq!(parse_sse_line(role).unwrap(), SseEvent::Skip);
        assert_eq!(parse_sse_line(usage).unwrap(), SseEvent::Skip);
    }

    #[test]
    fn done_marker() {
        assert_eq!(parse_sse_line("data: [DONE]").unwrap(), SseEvent::Done);
    }

    #[test]
    fn non_data_lines_are_skipped() {
        assert_eq!(parse_sse_line("").unwrap(), SseEvent::Skip);
        assert_eq!(parse_sse_line(": keep-alive").unwrap(), SseEvent::Skip);
        assert_eq!(parse_sse_line("event: message").unwrap(), SseEvent::Skip);
    }

    #[test]
    fn error_payload_fails() {
        let line = r#"data: {"error":{"message":"rate limited","type":"requests"}}"#;
        let err = parse_sse_line(line).unwrap_err();
        assert!(err.to_string().contains("rate limited"));
    }

    #[test]
    fn garbage_fails() {
        assert!(parse_sse_line("data: {not json").is_err());
    }
}

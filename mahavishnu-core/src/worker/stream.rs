//! Worker output stream parsing.
//!
//! Worker stdout/peer-stream is a sequence of length-delimited JSON-shaped
//! records: a big-endian `u32` byte length followed by that many bytes of
//! JSON. The parser never aborts on malformed input — unrecognized frames
//! become `log(level=warn)`, and outright length/JSON corruption becomes a
//! synthetic `completion(failed)` plus a sticky `faulted` worker state
//! (applied by the caller, see `worker::manager`).

use crate::error::StreamParseError;
use crate::model::{LogLevel, ResultStatus, StreamFrame};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    AwaitingFrameBoundary,
    AccumulatingFrame { needed: usize },
    DrainingAfterCompletion,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum RawFrame {
    ContentChunk { bytes: Vec<u8> },
    ToolCall { name: String, args: serde_json::Value },
    Progress { percent: u8 },
    Completion { status: RawStatus },
    Log { level: RawLevel, text: String },
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
enum RawStatus {
    Completed,
    Failed,
    TimedOut,
    Cancelled,
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
enum RawLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<RawStatus> for ResultStatus {
    fn from(value: RawStatus) -> Self {
        match value {
            RawStatus::Completed => ResultStatus::Completed,
            RawStatus::Failed => ResultStatus::Failed,
            RawStatus::TimedOut => ResultStatus::TimedOut,
            RawStatus::Cancelled => ResultStatus::Cancelled,
        }
    }
}

impl From<RawLevel> for LogLevel {
    fn from(value: RawLevel) -> Self {
        match value {
            RawLevel::Trace => LogLevel::Trace,
            RawLevel::Debug => LogLevel::Debug,
            RawLevel::Info => LogLevel::Info,
            RawLevel::Warn => LogLevel::Warn,
            RawLevel::Error => LogLevel::Error,
        }
    }
}

/// Incremental length-delimited frame parser. Feed raw bytes with `push`;
/// drain completed frames with `poll`. Never panics on malformed input.
pub struct StreamFrameParser {
    state: ParserState,
    buffer: Vec<u8>,
    completed: bool,
}

impl Default for StreamFrameParser {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamFrameParser {
    pub fn new() -> Self {
        Self {
            state: ParserState::AwaitingFrameBoundary,
            buffer: Vec::new(),
            completed: false,
        }
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Drains as many complete frames as the buffer currently contains.
    /// A malformed length prefix or invalid JSON body yields exactly one
    /// `Err(StreamParseError)` and stops draining further frames (the
    /// caller is expected to treat this as terminal — inject a synthetic
    /// `completion(failed)` and mark the worker `faulted`).
    pub fn poll(&mut self) -> Vec<Result<StreamFrame, StreamParseError>> {
        let mut out = Vec::new();
        loop {
            match self.state {
                ParserState::DrainingAfterCompletion => break,
                ParserState::AwaitingFrameBoundary => {
                    if self.buffer.len() < 4 {
                        break;
                    }
                    let len_bytes: [u8; 4] = self.buffer[0..4].try_into().unwrap();
                    let needed = u32::from_be_bytes(len_bytes) as usize;
                    if needed > 64 * 1024 * 1024 {
                        out.push(Err(StreamParseError(format!(
                            "frame length {needed} exceeds sanity bound"
                        ))));
                        self.state = ParserState::DrainingAfterCompletion;
                        break;
                    }
                    self.buffer.drain(0..4);
                    self.state = ParserState::AccumulatingFrame { needed };
                }
                ParserState::AccumulatingFrame { needed } => {
                    if self.buffer.len() < needed {
                        break;
                    }
                    let frame_bytes: Vec<u8> = self.buffer.drain(0..needed).collect();
                    self.state = ParserState::AwaitingFrameBoundary;
                    match serde_json::from_slice::<RawFrame>(&frame_bytes) {
                        Ok(raw) => {
                            let frame = match raw {
                                RawFrame::ContentChunk { bytes } => {
                                    StreamFrame::ContentChunk(bytes)
                                }
                                RawFrame::ToolCall { name, args } => {
                                    StreamFrame::ToolCall { name, args }
                                }
                                RawFrame::Progress { percent } => StreamFrame::Progress(percent),
                                RawFrame::Completion { status } => {
                                    self.completed = true;
                                    StreamFrame::Completion(status.into())
                                }
                                RawFrame::Log { level, text } => StreamFrame::Log {
                                    level: level.into(),
                                    text,
                                },
                            };
                            if self.completed {
                                self.state = ParserState::DrainingAfterCompletion;
                            }
                            out.push(Ok(frame));
                        }
                        Err(_) => {
                            // Unrecognized shape: classify as a warning log
                            // frame rather than aborting the stream.
                            let raw_text = String::from_utf8_lossy(&frame_bytes).into_owned();
                            out.push(Ok(StreamFrame::Log {
                                level: LogLevel::Warn,
                                text: raw_text,
                            }));
                        }
                    }
                }
            }
        }
        out
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self.state, ParserState::DrainingAfterCompletion)
    }
}

pub fn encode_frame(json: &serde_json::Value) -> Vec<u8> {
    let body = serde_json::to_vec(json).expect("frame json is always serializable");
    let mut out = (body.len() as u32).to_be_bytes().to_vec();
    out.extend_from_slice(&body);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_r::test;

    #[test]
    fn parses_framed_sequence_ending_in_completion() {
        let mut parser = StreamFrameParser::new();
        parser.push(&encode_frame(&json!({"type": "progress", "percent": 10})));
        parser.push(&encode_frame(
            &json!({"type": "completion", "status": "completed"}),
        ));
        let frames: Vec<_> = parser.poll().into_iter().map(|f| f.unwrap()).collect();
        assert_eq!(frames, vec![
            StreamFrame::Progress(10),
            StreamFrame::Completion(ResultStatus::Completed),
        ]);
        assert!(parser.is_terminated());
    }

    #[test]
    fn unrecognized_frame_becomes_warn_log_not_an_error() {
        let mut parser = StreamFrameParser::new();
        parser.push(&encode_frame(&json!({"type": "something-unknown"})));
        let frames = parser.poll();
        assert_eq!(frames.len(), 1);
        match frames[0].as_ref().unwrap() {
            StreamFrame::Log { level, .. } => assert_eq!(*level, LogLevel::Warn),
            other => panic!("expected log frame, got {other:?}"),
        }
    }

    #[test]
    fn oversized_length_prefix_is_a_parse_error() {
        let mut parser = StreamFrameParser::new();
        parser.push(&(u32::MAX).to_be_bytes());
        let frames = parser.poll();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].is_err());
        assert!(parser.is_terminated());
    }

    #[test]
    fn partial_frame_yields_no_output_until_complete() {
        let mut parser = StreamFrameParser::new();
        let full = encode_frame(&json!({"type": "progress", "percent": 5}));
        parser.push(&full[..full.len() - 2]);
        assert!(parser.poll().is_empty());
        parser.push(&full[full.len() - 2..]);
        assert_eq!(parser.poll().len(), 1);
    }
}

//! Upstream event-stream decoding: frames to chunks, errors and the
//! end-of-stream sentinel, plus the queue that feeds the relay.

use std::collections::VecDeque;
use std::pin::Pin;

use futures::StreamExt as _;
use futures::stream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::errors::{RelayError, UpstreamError};
use crate::frame::FrameDecoder;
use crate::model::Chunk;

pub const KEEP_ALIVE: &str = ": keep-alive";
pub const COMMENT_PREFIX: &str = ": ";
pub const DATA_PREFIX: &str = "data: ";
pub const DONE_SENTINEL: &str = "[DONE]";

/// Raw upstream body.
pub type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, RelayError>> + Send + 'static>>;

/// Parsed unit delivered through the chunk queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpstreamItem {
    Chunk(Chunk),
    /// In-band business error; deliverable data, not a transport failure.
    Error(UpstreamError),
}

/// Receiving end of the chunk queue. Closed once the upstream is exhausted
/// or after the first fatal error.
pub type ChunkReceiver = mpsc::Receiver<Result<UpstreamItem, RelayError>>;

/// Classifies frames. Remembers whether the sentinel has been seen.
#[derive(Debug, Default)]
pub struct ChunkParser {
    done: bool,
}

impl ChunkParser {
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Parses every line of one frame, in order.
    ///
    /// Parsing stops at the first fatal line. Its error is the last entry,
    /// after every item decoded before it.
    pub fn parse_frame(&mut self, frame: &str) -> Vec<Result<UpstreamItem, RelayError>> {
        let mut items = Vec::new();
        for line in frame.split('\n') {
            match self.parse_line(line) {
                Ok(Some(item)) => items.push(Ok(item)),
                Ok(None) => {}
                Err(err) => {
                    items.push(Err(err));
                    break;
                }
            }
        }
        items
    }

    fn parse_line(&mut self, line: &str) -> Result<Option<UpstreamItem>, RelayError> {
        if line.is_empty() || line == KEEP_ALIVE || line.starts_with(COMMENT_PREFIX) {
            return Ok(None);
        }
        let payload = line.strip_prefix(DATA_PREFIX);
        if payload == Some(DONE_SENTINEL) {
            if self.done {
                debug!("repeated [DONE] ignored");
            }
            self.done = true;
            return Ok(None);
        }
        if self.done {
            return Err(RelayError::AfterDone {
                frame: line.to_string(),
            });
        }

        if let Some(payload) = payload {
            let chunk: Chunk =
                serde_json::from_str(payload).map_err(|e| RelayError::decode(&e))?;
            return Ok(Some(UpstreamItem::Chunk(chunk)));
        }

        match serde_json::from_str::<UpstreamError>(line) {
            Ok(err) => {
                warn!(error = %err, "upstream reported an in-band error");
                Ok(Some(UpstreamItem::Error(err)))
            }
            Err(_) => Err(RelayError::Format {
                frame: line.to_string(),
            }),
        }
    }
}

/// Lazily decodes a byte stream into parsed items.
///
/// Items decoded before a fatal error are yielded first, then the error, then
/// the stream ends and the byte source is dropped with it.
pub fn item_stream(
    bytes_stream: ByteStream,
) -> impl futures::Stream<Item = Result<UpstreamItem, RelayError>> + Send {
    struct State {
        bytes_stream: ByteStream,
        decoder: FrameDecoder,
        parser: ChunkParser,
        pending: VecDeque<Result<UpstreamItem, RelayError>>,
        exhausted: bool,
        failed: bool,
    }

    stream::unfold(
        State {
            bytes_stream,
            decoder: FrameDecoder::default(),
            parser: ChunkParser::default(),
            pending: VecDeque::new(),
            exhausted: false,
            failed: false,
        },
        |mut state| async move {
            loop {
                if let Some(next) = state.pending.pop_front() {
                    return Some((next, state));
                }
                if state.failed {
                    return None;
                }
                if state.exhausted {
                    if !state.parser.is_done() {
                        debug!("upstream body ended without [DONE]");
                    }
                    return None;
                }

                let frames = match state.bytes_stream.next().await {
                    Some(Ok(bytes)) => state.decoder.push_chunk(&bytes),
                    Some(Err(err)) => {
                        state.failed = true;
                        return Some((Err(err), state));
                    }
                    None => {
                        state.exhausted = true;
                        state.decoder.finish().into_iter().collect()
                    }
                };
                for frame in frames {
                    for next in state.parser.parse_frame(&frame) {
                        state.failed |= next.is_err();
                        state.pending.push_back(next);
                    }
                    if state.failed {
                        break;
                    }
                }
            }
        },
    )
}

/// Spawns the producer task that drains `bytes_stream` into a bounded queue.
///
/// The task stops at the first fatal error, when `deadline` expires, or when
/// the receiver is dropped. The byte source is released on every path.
pub fn spawn_chunk_pump(
    bytes_stream: ByteStream,
    deadline: Option<Instant>,
    capacity: usize,
) -> ChunkReceiver {
    let (tx, rx) = mpsc::channel(capacity);
    tokio::spawn(async move {
        let items = item_stream(bytes_stream);
        futures::pin_mut!(items);
        loop {
            let read = async {
                match deadline {
                    Some(deadline) => match tokio::time::timeout_at(deadline, items.next()).await {
                        Ok(next) => next,
                        Err(_) => Some(Err(RelayError::DeadlineExceeded)),
                    },
                    None => items.next().await,
                }
            };
            let next = tokio::select! {
                next = read => next,
                _ = tx.closed() => {
                    debug!("chunk queue receiver dropped while reading upstream");
                    break;
                }
            };
            let Some(next) = next else {
                break;
            };
            let fatal = next.is_err();
            if tx.send(next).await.is_err() {
                debug!("chunk queue receiver dropped, stopping upstream drain");
                break;
            }
            if fatal {
                break;
            }
        }
    });
    rx
}

//! Review event stream reader.
//!
//! The backend answers a streaming review with `text/event-stream`: one
//! `data: {json}` line per event. The reader turns the response body into
//! typed [`StreamEvent`]s delivered over a single-consumer channel.

use std::{fmt, str::FromStr};

use futures::{Stream, StreamExt};
use shared::protocol::StreamEvent;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, warn};

pub const DATA_PREFIX: &str = "data: ";
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// How incoming body chunks are split into lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineFraming {
    /// Carries an incomplete trailing line over to the next chunk.
    #[default]
    Buffered,
    /// Splits every chunk on its own. A `data:` line that straddles two
    /// chunks is lost, matching the browser client this replaces.
    PerChunk,
}

impl FromStr for LineFraming {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "buffered" => Ok(Self::Buffered),
            "per_chunk" | "per-chunk" | "perchunk" => Ok(Self::PerChunk),
            other => Err(format!(
                "unknown stream framing '{other}' (expected 'buffered' or 'per_chunk')"
            )),
        }
    }
}

impl fmt::Display for LineFraming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buffered => f.write_str("buffered"),
            Self::PerChunk => f.write_str("per_chunk"),
        }
    }
}

/// Splits body chunks into lines and yields the payload of every `data: ` line.
#[derive(Debug, Default)]
pub struct SseLineDecoder {
    framing: LineFraming,
    pending: Vec<u8>,
}

impl SseLineDecoder {
    pub fn new(framing: LineFraming) -> Self {
        Self {
            framing,
            pending: Vec::new(),
        }
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        match self.framing {
            LineFraming::Buffered => {
                self.pending.extend_from_slice(chunk);
                let mut payloads = Vec::new();
                while let Some(newline) = self.pending.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = self.pending.drain(..=newline).collect();
                    if let Some(payload) = data_payload(&String::from_utf8_lossy(&line[..newline]))
                    {
                        payloads.push(payload);
                    }
                }
                payloads
            }
            LineFraming::PerChunk => String::from_utf8_lossy(chunk)
                .split('\n')
                .filter_map(data_payload)
                .collect(),
        }
    }

    /// Flushes a final line that arrived without a newline.
    pub fn finish(&mut self) -> Vec<String> {
        if self.pending.is_empty() {
            return Vec::new();
        }
        let line = std::mem::take(&mut self.pending);
        data_payload(&String::from_utf8_lossy(&line))
            .into_iter()
            .collect()
    }
}

fn data_payload(line: &str) -> Option<String> {
    line.strip_prefix(DATA_PREFIX)
        .map(|payload| payload.trim_end_matches('\r').to_string())
}

/// Parses one `data:` payload. Malformed records are logged and skipped.
pub fn parse_event_payload(payload: &str) -> Option<StreamEvent> {
    match serde_json::from_str::<StreamEvent>(payload) {
        Ok(event) => Some(event),
        Err(err) => {
            warn!(error = %err, payload_len = payload.len(), "failed to parse review stream event");
            None
        }
    }
}

/// Typed events of one streaming review, read by a background task.
///
/// Dropping the stream stops the reader.
pub struct ReviewStream {
    events: mpsc::Receiver<StreamEvent>,
    reader: JoinHandle<()>,
}

impl ReviewStream {
    pub fn from_response(response: reqwest::Response, framing: LineFraming) -> Self {
        Self::from_byte_stream(response.bytes_stream(), framing)
    }

    pub fn from_byte_stream<S, B, E>(body: S, framing: LineFraming) -> Self
    where
        S: Stream<Item = Result<B, E>> + Send + Unpin + 'static,
        B: AsRef<[u8]> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let (tx, events) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let reader = tokio::spawn(pump_events(body, framing, tx));
        Self { events, reader }
    }

    /// Next event, or `None` once the body has ended.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }
}

impl Drop for ReviewStream {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn pump_events<S, B, E>(mut body: S, framing: LineFraming, tx: mpsc::Sender<StreamEvent>)
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: fmt::Display,
{
    let mut decoder = SseLineDecoder::new(framing);
    let mut bytes_received = 0usize;

    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(err) => {
                warn!(error = %err, bytes_received, "review stream transport error; closing stream");
                return;
            }
        };
        bytes_received += chunk.as_ref().len();
        if !forward(decoder.push(chunk.as_ref()), &tx).await {
            return;
        }
    }

    forward(decoder.finish(), &tx).await;
    debug!(bytes_received, "review stream body ended");
}

async fn forward(payloads: Vec<String>, tx: &mpsc::Sender<StreamEvent>) -> bool {
    for payload in payloads {
        let Some(event) = parse_event_payload(&payload) else {
            continue;
        };
        debug!(event_type = event.kind(), "review stream event");
        if tx.send(event).await.is_err() {
            debug!("review stream consumer dropped");
            return false;
        }
    }
    true
}

use crate::codec::decode_chunk_line;
use crate::error::{ChatError, Result};
use crate::models::StreamEvent;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::time::Duration;
use tokio::time::timeout;
use tracing::warn;

/// Splits a chunked body into lines and decodes each complete one.
///
/// Bytes are buffered until a newline arrives, so a frame (or a multi-byte
/// character) split across chunks decodes intact.
#[derive(Debug, Default)]
pub struct ChunkDecoder {
    incomplete_line: Vec<u8>,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.incomplete_line.extend_from_slice(chunk);

        let Some(last_newline_pos) = self.incomplete_line.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };
        let rest = self.incomplete_line.split_off(last_newline_pos + 1);
        let complete = std::mem::replace(&mut self.incomplete_line, rest);

        complete
            .split(|b| *b == b'\n')
            .filter_map(|line| decode_line(&String::from_utf8_lossy(line)))
            .collect()
    }

    /// Decode whatever is left once the body ends without a trailing newline.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let rest = std::mem::take(&mut self.incomplete_line);
        decode_line(&String::from_utf8_lossy(&rest)).into_iter().collect()
    }

    pub fn is_empty_buffer(&self) -> bool {
        self.incomplete_line.iter().all(|b| b.is_ascii_whitespace())
    }
}

fn decode_line(line: &str) -> Option<StreamEvent> {
    match decode_chunk_line(line) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "dropping malformed chunk");
            None
        }
    }
}

/// Drive a chunked body to the end, handing every decoded event to `on_event`.
///
/// Stops early (without error) once `on_event` returns `false`. A chunk gap
/// longer than `chunk_timeout` is a transport failure.
pub async fn decode_body<S, E, F>(mut body: S, chunk_timeout: Duration, mut on_event: F) -> Result<()>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
    E: Into<ChatError>,
    F: FnMut(StreamEvent) -> bool,
{
    let mut decoder = ChunkDecoder::new();

    loop {
        match timeout(chunk_timeout, body.next()).await {
            Ok(Some(chunk)) => {
                let chunk = chunk.map_err(Into::<ChatError>::into)?;
                for event in decoder.feed(&chunk) {
                    if !on_event(event) {
                        return Ok(());
                    }
                }
            }
            Ok(None) => break,
            Err(_) => {
                return Err(ChatError::Transport(format!(
                    "no data received for {} seconds",
                    chunk_timeout.as_secs()
                )));
            }
        }
    }

    for event in decoder.finish() {
        if !on_event(event) {
            break;
        }
    }
    Ok(())
}

//! Tasks that keep a child's pipes moving.
//!
//! Every pipe of a running child gets its own pump so that a full stdout
//! buffer can never stall the child while nobody reads stderr (or the other
//! way round). Pumps swallow their own I/O errors: a broken stream ends that
//! pump and nothing else.

use crate::config::PumpConfig;
use crate::listener::{ListenerRegistry, StreamKind};
use std::io::ErrorKind;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_stream::StreamExt;
use tokio_util::bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, FramedRead};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Splits a byte stream into text lines.
///
/// Lines end at `\n`; a trailing `\r` is dropped. Invalid UTF-8 is replaced
/// rather than rejected. Lines longer than `max_length` bytes are cut and the
/// remainder up to the next newline is thrown away.
#[derive(Debug, Clone)]
pub struct LineCodec {
    max_length: usize,
    next_index: usize,
    discarding: bool,
}

impl LineCodec {
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
            discarding: false,
        }
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let read_to = src.len();
            let newline = src[self.next_index..read_to]
                .iter()
                .position(|b| *b == b'\n')
                .map(|offset| offset + self.next_index);

            match (self.discarding, newline) {
                (true, Some(pos)) => {
                    src.advance(pos + 1);
                    self.discarding = false;
                    self.next_index = 0;
                }
                (true, None) => {
                    src.advance(read_to);
                    self.next_index = 0;
                    return Ok(None);
                }
                (false, Some(pos)) => {
                    let line = src.split_to(pos + 1);
                    self.next_index = 0;
                    let end = pos.min(self.max_length);
                    return Ok(Some(decode_line(&line[..end])));
                }
                (false, None) if read_to > self.max_length => {
                    let line = src.split_to(self.max_length);
                    self.discarding = true;
                    self.next_index = 0;
                    return Ok(Some(decode_line(&line)));
                }
                (false, None) => {
                    self.next_index = read_to;
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        if src.is_empty() {
            return Ok(None);
        }
        // last line without a terminating newline
        let line = src.split_to(src.len());
        self.next_index = 0;
        Ok(Some(decode_line(&line)))
    }
}

/// Read `reader` line by line and notify the listeners of `stream`.
///
/// Runs until end of stream, a read error, or `cancel`. Returns the number
/// of lines dispatched.
pub async fn pump_lines<R>(
    reader: R,
    stream: StreamKind,
    listeners: ListenerRegistry,
    config: &PumpConfig,
    cancel: CancellationToken,
) -> usize
where
    R: AsyncRead + Unpin,
{
    let mut frames = FramedRead::with_capacity(
        reader,
        LineCodec::new(config.max_line_length),
        config.read_buffer_capacity,
    );
    let mut count = 0;

    loop {
        let frame = tokio::select! {
            biased;
            frame = frames.next() => frame,
            _ = cancel.cancelled() => {
                debug!(stream = %stream, lines = count, "Pump cancelled before end of stream");
                break;
            }
        };

        match frame {
            Some(Ok(line)) => {
                listeners.dispatch(stream, &line);
                count += 1;
            }
            Some(Err(e)) => {
                warn!(stream = %stream, error = %e, "Stopped reading child stream");
                break;
            }
            None => break,
        }
    }

    debug!(stream = %stream, lines = count, "Pump finished");
    count
}

/// Copy `input` into the child's stdin, then close it.
///
/// A child that exits without reading everything closes the pipe; that ends
/// the copy quietly. Returns the number of bytes written.
pub async fn pump_input<R, W>(mut input: R, mut stdin: W, cancel: CancellationToken) -> u64
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let copied = tokio::select! {
        result = tokio::io::copy(&mut input, &mut stdin) => result,
        _ = cancel.cancelled() => {
            debug!("Input pump cancelled");
            return 0;
        }
    };

    let written = match copied {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::BrokenPipe => {
            debug!("Child closed stdin before all input was written");
            0
        }
        Err(e) => {
            warn!(error = %e, "Failed to feed child stdin");
            0
        }
    };

    if let Err(e) = stdin.shutdown().await {
        debug!(error = %e, "Closing child stdin failed");
    }
    debug!(bytes = written, "Input pump finished");
    written
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::LineCollector;
    use tokio::io::AsyncReadExt;

    fn decode_all(codec: &mut LineCodec, data: &[u8]) -> Vec<String> {
        let mut buf = BytesMut::from(data);
        let mut lines = Vec::new();
        while let Some(line) = codec.decode(&mut buf).unwrap() {
            lines.push(line);
        }
        while let Some(line) = codec.decode_eof(&mut buf).unwrap() {
            lines.push(line);
        }
        lines
    }

    #[test]
    fn test_codec_splits_lines() {
        let mut codec = LineCodec::new(1024);
        let lines = decode_all(&mut codec, b"one\r\ntwo\n\nthree");
        assert_eq!(lines, vec!["one", "two", "", "three"]);
    }

    #[test]
    fn test_codec_waits_for_newline_across_chunks() {
        let mut codec = LineCodec::new(1024);
        let mut buf = BytesMut::from(&b"hel"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"lo\nwor");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some("hello".to_string()));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), Some("wor".to_string()));
    }

    #[test]
    fn test_codec_truncates_long_lines() {
        let mut codec = LineCodec::new(4);
        let lines = decode_all(&mut codec, b"abcdefghij\nxy\nlonger\n");
        assert_eq!(lines, vec!["abcd", "xy", "long"]);
    }

    #[test]
    fn test_codec_replaces_invalid_utf8() {
        let mut codec = LineCodec::new(1024);
        let lines = decode_all(&mut codec, b"ok \xff\n");
        assert_eq!(lines, vec!["ok \u{fffd}"]);
    }

    #[tokio::test]
    async fn test_pump_lines_dispatches_in_order() {
        let registry = ListenerRegistry::new();
        let collector = LineCollector::new();
        registry.add_output_listener(collector.clone());

        let data: &[u8] = b"first\nsecond\nthird\n";
        let count = pump_lines(
            data,
            StreamKind::Output,
            registry,
            &PumpConfig::default(),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(count, 3);
        assert_eq!(collector.lines(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_pump_lines_empty_stream() {
        let registry = ListenerRegistry::new();
        let collector = LineCollector::new();
        registry.add_error_listener(collector.clone());

        let data: &[u8] = b"";
        let count = pump_lines(
            data,
            StreamKind::Error,
            registry,
            &PumpConfig::default(),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(count, 0);
        assert!(collector.lines().is_empty());
    }

    #[tokio::test]
    async fn test_pump_lines_stops_on_cancel() {
        let (_writer, reader) = tokio::io::duplex(64);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let count = pump_lines(
            reader,
            StreamKind::Output,
            ListenerRegistry::new(),
            &PumpConfig::default(),
            cancel,
        )
        .await;
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_pump_input_copies_and_closes() {
        let (stdin, mut child_side) = tokio::io::duplex(64);
        let input: &[u8] = b"fed to the child";

        let written = pump_input(input, stdin, CancellationToken::new()).await;
        assert_eq!(written, 16);

        let mut received = String::new();
        child_side.read_to_string(&mut received).await.unwrap();
        assert_eq!(received, "fed to the child");
    }

    #[tokio::test]
    async fn test_pump_input_tolerates_closed_child() {
        let (stdin, child_side) = tokio::io::duplex(8);
        drop(child_side);
        let input = vec![b'x'; 1024];

        let written = pump_input(&input[..], stdin, CancellationToken::new()).await;
        assert_eq!(written, 0);
    }
}

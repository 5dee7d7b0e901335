//! Log relay — merges a subprocess's two output streams into one
//! sequence of timestamped [`LogRecord`]s.
//!
//! One pump task per stream reads raw chunks and decodes them to UTF-8
//! incrementally, carrying partial multi-byte sequences over to the next
//! chunk. Each decoded chunk becomes one record, tagged by source and
//! stamped at capture time. The channel is unbounded so a slow consumer
//! can never back-pressure the pipes into stalling the subprocess.
//!
//! The sequence is finite: it ends once both streams have closed. A
//! decode or read fault ends it with an error item instead of silently
//! truncating it.

use anyhow::{anyhow, Result};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{ChildStderr, ChildStdout};
use tokio::sync::mpsc;

use crate::api::{LogRecord, LogSource};

const CHUNK_SIZE: usize = 8192;

/// Receiving end of a relayed log sequence. `None` means both streams
/// closed; an `Err` item means the sequence ended on a fault.
pub type LogReceiver = mpsc::UnboundedReceiver<Result<LogRecord>>;

/// Starts draining both streams. Runs independently of the caller's
/// exit/cancel/timeout race.
pub fn relay(stdout: ChildStdout, stderr: ChildStderr) -> LogReceiver {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(pump(stdout, LogSource::Stdout, tx.clone()));
    tokio::spawn(pump(stderr, LogSource::Stderr, tx));
    rx
}

/// Returns an already-closed, empty sequence. Used when execution fails
/// before the subprocess is spawned.
pub fn closed() -> LogReceiver {
    let (_tx, rx) = mpsc::unbounded_channel();
    rx
}

async fn pump<R: AsyncRead + Unpin>(
    mut reader: R,
    source: LogSource,
    tx: mpsc::UnboundedSender<Result<LogRecord>>,
) {
    let mut carry: Vec<u8> = Vec::new();
    let mut chunk = [0u8; CHUNK_SIZE];

    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                carry.extend_from_slice(&chunk[..n]);
                match decode_prefix(&mut carry) {
                    Ok(text) => {
                        if !text.is_empty()
                            && tx.send(Ok(LogRecord::now(source, text))).is_err()
                        {
                            // Consumer gone, keep draining the pipe so the
                            // subprocess never blocks on a full buffer.
                            while matches!(reader.read(&mut chunk).await, Ok(n) if n > 0) {}
                            return;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e));
                        return;
                    }
                }
            }
            Err(e) => {
                let _ = tx.send(Err(anyhow!("failed to read {source}: {e}")));
                return;
            }
        }
    }

    // EOF with bytes left in the carry: a multi-byte sequence was cut off.
    if !carry.is_empty() {
        let _ = tx.send(Err(anyhow!("truncated UTF-8 sequence on {source}")));
    }
}

/// Decodes the longest valid UTF-8 prefix of `carry`, leaving at most one
/// incomplete trailing sequence behind. Invalid bytes are a hard error.
fn decode_prefix(carry: &mut Vec<u8>) -> Result<String> {
    match std::str::from_utf8(carry) {
        Ok(text) => {
            let text = text.to_string();
            carry.clear();
            Ok(text)
        }
        Err(e) if e.error_len().is_none() => {
            // Incomplete sequence at the end of the chunk; decode up to it
            // and carry the tail into the next read.
            let valid = e.valid_up_to();
            let text = std::str::from_utf8(&carry[..valid])
                .expect("valid_up_to prefix is valid UTF-8")
                .to_string();
            carry.drain(..valid);
            Ok(text)
        }
        Err(e) => Err(anyhow!("invalid UTF-8 in subprocess output: {e}")),
    }
}

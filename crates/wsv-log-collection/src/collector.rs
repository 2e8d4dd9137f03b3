//! Stream readers for worker stdout/stderr.

use crate::types::{OutputLine, StreamType};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Receives every non-blank line in arrival order.
pub type LineHandler = Arc<dyn Fn(OutputLine) + Send + Sync>;

/// What a reader saw before its stream closed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineReaderStats {
    pub lines: u64,
    pub bytes: u64,
    pub skipped_blank: u64,
    pub failed: bool,
}

/// Spawns a task that reads `stream` line by line until EOF or cancellation.
///
/// Whitespace-only lines are dropped. Invalid UTF-8 is decoded lossily so a
/// single bad byte never stops capture. Read errors end the task and are
/// logged; they are never propagated to the supervisor.
pub fn spawn_line_reader<R>(
    stream: R,
    stream_type: StreamType,
    handler: LineHandler,
    cancel_token: CancellationToken,
) -> JoinHandle<LineReaderStats>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move { read_lines(stream, stream_type, handler, cancel_token).await })
}

async fn read_lines<R>(
    stream: R,
    stream_type: StreamType,
    handler: LineHandler,
    cancel_token: CancellationToken,
) -> LineReaderStats
where
    R: AsyncRead + Unpin,
{
    debug!(stream = %stream_type, "Line reader started");
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::with_capacity(256);
    let mut stats = LineReaderStats::default();

    loop {
        buf.clear();
        tokio::select! {
            _ = cancel_token.cancelled() => {
                debug!(stream = %stream_type, "Line reader cancelled");
                break;
            }
            result = reader.read_until(b'\n', &mut buf) => {
                match result {
                    Ok(0) => break,
                    Ok(read) => {
                        stats.bytes += read as u64;
                        let text = String::from_utf8_lossy(&buf);
                        let text = text.trim_end_matches(['\r', '\n']);
                        if text.trim().is_empty() {
                            stats.skipped_blank += 1;
                            continue;
                        }
                        stats.lines += 1;
                        handler(OutputLine::new(stream_type, text));
                    }
                    Err(e) => {
                        error!(stream = %stream_type, error = %e, "Error reading worker output");
                        stats.failed = true;
                        break;
                    }
                }
            }
        }
    }

    debug!(stream = %stream_type, lines = stats.lines, "Line reader finished");
    stats
}

//! The Reader stage: decodes frames off the socket and feeds them to the
//! worker pool via a bounded queue.

use bytes::BytesMut;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::{mpsc, watch};
use tracing::{debug, instrument, trace, warn};

use crate::error::ConnectionError;
use crate::frame::Decoder;
use crate::pool::BodyPool;
use crate::settings::{BufferSizing, Settings};
use std::sync::Arc;

/// Drive one connection's read half until EOF, a framing error, an idle
/// timeout, or an external shutdown signal.
///
/// Dropping the returned `in_tx` sender (which happens when this function
/// returns, since it's moved in) is what closes `inQueue` for the worker
/// pool — see the module-level lifecycle description in [`crate::connect`].
#[instrument(skip_all, fields(stage = "reader"))]
pub async fn run(
    mut read_half: OwnedReadHalf,
    settings: Arc<Settings>,
    in_tx: mpsc::Sender<crate::frame::Frame>,
    body_pool: Arc<BodyPool>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ConnectionError> {
    let decoder = Decoder::new(settings.max_length);
    let mut sizing = settings.read_buffer;
    let mut buf = BytesMut::with_capacity(sizing.start);
    let mut accum = BytesMut::new();

    loop {
        if *shutdown.borrow() {
            debug!("reader observed shutdown signal");
            break;
        }

        buf.clear();
        buf.resize(sizing.current, 0);

        let read_result = tokio::select! {
            biased;
            _ = shutdown.changed() => {
                debug!("reader unblocked by shutdown signal");
                break;
            }
            result = tokio::time::timeout(settings.idle_timeout, read_half.read(&mut buf)) => result,
        };

        let n = match read_result {
            Ok(Ok(0)) => {
                debug!("peer closed connection (EOF)");
                break;
            }
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(ConnectionError::Io(e)),
            Err(_elapsed) => return Err(ConnectionError::ReadTimeout(settings.idle_timeout)),
        };

        accum.extend_from_slice(&buf[..n]);

        loop {
            match decoder.decode(&mut accum) {
                Ok(Some(mut frame)) => {
                    trace!(message_id = frame.message_id, len = frame.body.len(), "decoded frame");
                    // Re-home the body in a pooled buffer rather than keeping
                    // it sliced out of the read accumulator, so the
                    // accumulator's allocation doesn't stay pinned alive by
                    // frames downstream still holding a view into it.
                    if !frame.body.is_empty() {
                        let mut pooled = body_pool.get(frame.body.len());
                        pooled.extend_from_slice(&frame.body);
                        frame.body = pooled;
                    }
                    if let Err(e) = try_send(&in_tx, frame).await {
                        debug!("inQueue closed while reader had a frame ready: {e}");
                        return Ok(());
                    }
                }
                Ok(None) => break,
                Err(e) => return Err(ConnectionError::Frame(e)),
            }
        }

        sizing.adapt(n, buf.len());
    }

    Ok(())
}

/// Try a non-blocking send first; fall back to a blocking send and log the
/// backpressure, per the spec's try-then-block handoff policy.
async fn try_send(
    tx: &mpsc::Sender<crate::frame::Frame>,
    frame: crate::frame::Frame,
) -> Result<(), mpsc::error::SendError<crate::frame::Frame>> {
    match tx.try_send(frame) {
        Ok(()) => Ok(()),
        Err(mpsc::error::TrySendError::Full(frame)) => {
            warn!("inQueue full, blocking reader");
            tx.send(frame).await
        }
        Err(mpsc::error::TrySendError::Closed(frame)) => tx.send(frame).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_grows_on_full_read() {
        let mut sizing = BufferSizing::new(512, 128, 65536);
        sizing.adapt(512, 512);
        assert_eq!(sizing.current, 1024);
    }

    #[test]
    fn buffer_shrinks_on_sparse_read() {
        let mut sizing = BufferSizing::new(2048, 128, 65536);
        sizing.adapt(100, 2048);
        assert_eq!(sizing.current, 1024);
    }

    #[test]
    fn buffer_does_not_grow_past_max() {
        let mut sizing = BufferSizing::new(65536, 128, 65536);
        sizing.adapt(65536, 65536);
        assert_eq!(sizing.current, 65536);
    }

    #[test]
    fn buffer_does_not_shrink_past_min() {
        let mut sizing = BufferSizing::new(128, 128, 65536);
        sizing.adapt(1, 128);
        assert_eq!(sizing.current, 128);
    }
}

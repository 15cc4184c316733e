//! The Writer stage: coalesces frames drained from `outQueue` into a growable
//! buffer and flushes to the socket, batching opportunistically when more
//! frames are already queued.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::mpsc;
use tracing::{debug, instrument, trace};

use crate::error::ConnectionError;
use crate::frame::Frame;
use crate::pool::{is_pool_owned, BodyPool, FramePool};
use crate::settings::Settings;

/// Drive one connection's write half until `out_rx` closes and is drained.
#[instrument(skip_all, fields(stage = "writer"))]
pub async fn run(
    mut write_half: OwnedWriteHalf,
    settings: Arc<Settings>,
    mut out_rx: mpsc::Receiver<Frame>,
    frame_pool: Arc<FramePool>,
    body_pool: Arc<BodyPool>,
) -> Result<(), ConnectionError> {
    let mut sizing = settings.write_buffer;
    let mut buf = BytesMut::with_capacity(sizing.current);

    loop {
        match out_rx.try_recv() {
            Ok(frame) => append(frame, &mut buf, &mut sizing, &mut write_half, &frame_pool, &body_pool).await?,
            Err(mpsc::error::TryRecvError::Empty) => {
                if !buf.is_empty() {
                    let flushed = buf.len();
                    flush(&mut write_half, &mut buf).await?;
                    sizing.adapt(flushed, sizing.current);
                }
                match out_rx.recv().await {
                    Some(frame) => append(frame, &mut buf, &mut sizing, &mut write_half, &frame_pool, &body_pool).await?,
                    None => break,
                }
            }
            Err(mpsc::error::TryRecvError::Disconnected) => break,
        }
    }

    if !buf.is_empty() {
        flush(&mut write_half, &mut buf).await?;
    }
    debug!("outQueue closed and drained, shutting down write half");
    write_half.shutdown().await?;
    Ok(())
}

async fn append(
    frame: Frame,
    buf: &mut BytesMut,
    sizing: &mut crate::settings::BufferSizing,
    write_half: &mut OwnedWriteHalf,
    frame_pool: &FramePool,
    body_pool: &BodyPool,
) -> Result<(), ConnectionError> {
    let frame_len = frame.encoded_len();

    if buf.len() + frame_len > sizing.current {
        flush(write_half, buf).await?;
        if sizing.current < sizing.max {
            sizing.current = (sizing.current * 2).max(frame_len).min(sizing.max);
            trace!(new_size = sizing.current, "write buffer grown");
        }
    }

    frame.encode(buf);

    let (shell, body) = frame.into_parts();
    frame_pool.put(shell);
    if is_pool_owned(&body) {
        body_pool.put(body);
    }

    Ok(())
}

async fn flush(write_half: &mut OwnedWriteHalf, buf: &mut BytesMut) -> Result<(), ConnectionError> {
    write_half.write_all(buf).await?;
    write_half.flush().await?;
    buf.clear();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::BufferSizing;

    #[test]
    fn grows_when_frame_does_not_fit() {
        let mut sizing = BufferSizing::new(32, 16, 128);
        // Simulate the growth decision in `append` directly.
        let frame_len = 48usize;
        if frame_len > sizing.current {
            sizing.current = (sizing.current * 2).max(frame_len).min(sizing.max);
        }
        assert_eq!(sizing.current, 64);
    }

    #[test]
    fn never_grows_past_configured_max() {
        let mut sizing = BufferSizing::new(64, 16, 80);
        let frame_len = 1000usize;
        sizing.current = (sizing.current * 2).max(frame_len).min(sizing.max);
        assert_eq!(sizing.current, 80);
    }
}

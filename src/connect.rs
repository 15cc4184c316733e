//! Per-connection lifecycle: wires the Reader, worker pool, and Writer
//! together and sequences graceful shutdown (the "Supervisor" of the design).
//!
//! State machine: `Running -> Draining -> Closed`.
//!
//! `Running -> Draining` is triggered either externally (the server's exit
//! signal fires) or internally (the Reader exits on its own — EOF, a framing
//! error, or an idle timeout). Either way:
//!
//! 1. The Reader stops reading (it selects on the shutdown signal alongside
//!    the socket read) and drops its `inQueue` sender, closing the queue.
//! 2. Workers drain `inQueue`, finish in-flight handler calls, push results
//!    to `outQueue`, and exit; the pool's internal `outQueue` sender clones
//!    go with them.
//! 3. Once every worker clone of `outQueue`'s sender is dropped, the Writer's
//!    receiver closes; the Writer flushes any pending bytes, shuts down the
//!    write half, and exits.
//!
//! No frame enqueued before step 1 is lost: it either reaches the socket or
//! is explicitly dropped by the handler (frame handler returning `None`, or
//! an oversize reply coerced to empty).

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::{info, instrument, warn};

use crate::pool::{BodyPool, FramePool};
use crate::settings::Settings;
use crate::worker::Handler;

/// Run one accepted connection to completion.
///
/// `exit_rx` is the server-wide shutdown signal (see [`crate::server`]);
/// this function returns once the connection has fully drained and closed,
/// regardless of which side triggered the shutdown.
#[instrument(skip_all, fields(stage = "supervisor"))]
pub async fn run(
    stream: TcpStream,
    settings: Arc<Settings>,
    handler: Handler,
    frame_pool: Arc<FramePool>,
    body_pool: Arc<BodyPool>,
    exit_rx: watch::Receiver<bool>,
) {
    let peer: Option<SocketAddr> = stream.peer_addr().ok();
    info!(?peer, "connection accepted");

    let (read_half, write_half) = stream.into_split();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (in_tx, in_rx) = mpsc::channel(settings.queue_size);
    let (out_tx, out_rx) = mpsc::channel(settings.queue_size);

    let watcher = tokio::spawn(watch_exit(exit_rx, shutdown_tx));

    let reader_handle = tokio::spawn(crate::reader::run(
        read_half,
        settings.clone(),
        in_tx,
        body_pool.clone(),
        shutdown_rx,
    ));

    let pool_handle = tokio::spawn(crate::worker::run_pool(
        settings.clone(),
        in_rx,
        out_tx,
        handler,
        body_pool.clone(),
    ));

    let writer_handle = tokio::spawn(crate::writer::run(
        write_half,
        settings,
        out_rx,
        frame_pool,
        body_pool,
    ));

    match reader_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(?peer, "reader exited with error: {e}"),
        Err(e) => warn!(?peer, "reader task panicked: {e}"),
    }

    if let Err(e) = pool_handle.await {
        warn!(?peer, "worker pool task panicked: {e}");
    }

    match writer_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(?peer, "writer exited with error: {e}"),
        Err(e) => warn!(?peer, "writer task panicked: {e}"),
    }

    watcher.abort();
    info!(?peer, "connection closed");
}

/// Forward the server-wide exit signal into this connection's own shutdown
/// channel, so the Reader can select on a `watch::Receiver` scoped to one
/// connection rather than cloning the server-wide one into every stage.
async fn watch_exit(mut exit_rx: watch::Receiver<bool>, shutdown_tx: watch::Sender<bool>) {
    loop {
        if *exit_rx.borrow() {
            let _ = shutdown_tx.send(true);
            return;
        }
        if exit_rx.changed().await.is_err() {
            return;
        }
    }
}

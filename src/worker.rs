//! The worker pool: drains `inQueue`, invokes the configured handler, and
//! forwards results to `outQueue`. Ping frames bypass the handler entirely.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinSet, Id};
use tracing::{error, instrument, trace, warn};

use crate::frame::Frame;
use crate::pool::BodyPool;
use crate::settings::Settings;

/// The two handler shapes a server may configure. Exactly one must be set —
/// enforced at build time by [`crate::server::ServerBuilder`].
#[derive(Clone)]
pub enum Handler {
    /// Transforms a frame's body in place; `messageId`/`reserved` are copied
    /// through unchanged by the pool.
    Body(Arc<dyn Fn(BytesMut) -> BytesMut + Send + Sync>),
    /// Full control over the reply frame. Returning `None` drops the frame
    /// (no reply is written).
    Frame(Arc<dyn Fn(Frame) -> Option<Frame> + Send + Sync>),
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Handler::Body(_) => f.write_str("Handler::Body(..)"),
            Handler::Frame(_) => f.write_str("Handler::Frame(..)"),
        }
    }
}

/// Run the worker pool to completion: spawns `settings.processors` workers
/// against a shared `inQueue`, respawning any that panic, and returns once
/// `in_rx` is closed and fully drained by every worker (including any
/// respawned replacements). The caller must not retain its own clone of
/// `out_tx`, so that `outQueue` closes once every worker here has exited.
#[instrument(skip_all, fields(stage = "pool", processors = settings.processors))]
pub async fn run_pool(
    settings: Arc<Settings>,
    in_rx: mpsc::Receiver<Frame>,
    out_tx: mpsc::Sender<Frame>,
    handler: Handler,
    body_pool: Arc<BodyPool>,
) {
    let in_rx = Arc::new(Mutex::new(in_rx));
    let mut set: JoinSet<usize> = JoinSet::new();
    let mut senders: HashMap<Id, (usize, mpsc::Sender<Frame>)> = HashMap::new();

    for id in 0..settings.processors {
        let worker_out = out_tx.clone();
        spawn_worker(
            &mut set,
            &mut senders,
            id,
            in_rx.clone(),
            worker_out,
            handler.clone(),
            body_pool.clone(),
            settings.max_length,
        );
    }
    drop(out_tx);

    while let Some(res) = set.join_next_with_id().await {
        match res {
            Ok((task_id, _id)) => {
                senders.remove(&task_id);
            }
            Err(join_err) => {
                let task_id = join_err.id();
                if join_err.is_panic() {
                    if let Some((id, worker_out)) = senders.remove(&task_id) {
                        warn!(worker = id, "worker panicked, respawning");
                        spawn_worker(
                            &mut set,
                            &mut senders,
                            id,
                            in_rx.clone(),
                            worker_out,
                            handler.clone(),
                            body_pool.clone(),
                            settings.max_length,
                        );
                    }
                } else {
                    error!("worker task was cancelled before completion");
                }
            }
        }
    }
}

fn spawn_worker(
    set: &mut JoinSet<usize>,
    senders: &mut HashMap<Id, (usize, mpsc::Sender<Frame>)>,
    id: usize,
    in_rx: Arc<Mutex<mpsc::Receiver<Frame>>>,
    out_tx: mpsc::Sender<Frame>,
    handler: Handler,
    body_pool: Arc<BodyPool>,
    max_length: u32,
) {
    let out_for_loop = out_tx.clone();
    let abort = set.spawn(worker_loop(id, in_rx, out_for_loop, handler, body_pool, max_length));
    senders.insert(abort.id(), (id, out_tx));
}

async fn worker_loop(
    id: usize,
    in_rx: Arc<Mutex<mpsc::Receiver<Frame>>>,
    out_tx: mpsc::Sender<Frame>,
    handler: Handler,
    body_pool: Arc<BodyPool>,
    max_length: u32,
) -> usize {
    loop {
        let frame = {
            let mut rx = in_rx.lock().await;
            rx.recv().await
        };
        let Some(frame) = frame else {
            trace!(worker = id, "inQueue drained and closed");
            return id;
        };

        if let Some(reply) = process(frame, &handler, &body_pool, max_length) {
            send_reply(&out_tx, reply).await;
        }
    }
}

/// Try a non-blocking send first; fall back to a blocking send and log the
/// backpressure, matching the Reader's handoff policy.
async fn send_reply(out_tx: &mpsc::Sender<Frame>, frame: Frame) {
    match out_tx.try_send(frame) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(frame)) => {
            warn!("outQueue full, blocking worker");
            let _ = out_tx.send(frame).await;
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {}
    }
}

fn process(frame: Frame, handler: &Handler, body_pool: &BodyPool, max_length: u32) -> Option<Frame> {
    if frame.is_ping() {
        return Some(frame);
    }

    let caught = std::panic::catch_unwind(AssertUnwindSafe(|| apply_handler(frame, handler)));
    let reply = match caught {
        Ok(reply) => reply,
        Err(_) => {
            error!("handler panicked while processing a frame; dropping it");
            None
        }
    };

    // The two handler shapes have distinct, documented oversize-reply policies:
    // a Body handler's reply is coerced to empty, a Frame handler's is truncated.
    reply.map(|reply| match handler {
        Handler::Body(_) => coerce_oversize(reply, body_pool, max_length),
        Handler::Frame(_) => truncate_oversize(reply, max_length),
    })
}

fn apply_handler(frame: Frame, handler: &Handler) -> Option<Frame> {
    match handler {
        Handler::Body(f) => {
            let (shell, body) = frame.into_parts();
            let original_ptr = body.as_ptr();
            // `body` is moved into `f` here; if it builds a different buffer
            // and drops the original, that drop happens inside `f` and isn't
            // observable from here, so the original can't be recycled — see
            // the ownership hand-off note in DESIGN.md.
            let new_body = f(body);
            if new_body.as_ptr() != original_ptr {
                trace!("handler replaced the body buffer");
            }
            Some(Frame::from_shell(shell, new_body))
        }
        Handler::Frame(f) => f(frame),
    }
}

/// If a Body handler's reply would exceed `MaxLength`, coerce it to an empty
/// body rather than dropping the connection — this is the documented,
/// deliberately surprising policy carried over from the source design.
fn coerce_oversize(mut frame: Frame, body_pool: &BodyPool, max_length: u32) -> Frame {
    if frame.body.len() as u32 > max_length {
        warn!(
            message_id = frame.message_id,
            len = frame.body.len(),
            "handler reply exceeds max length, coercing to empty body"
        );
        let discarded = std::mem::replace(&mut frame.body, BytesMut::new());
        body_pool.put(discarded);
    }
    frame
}

/// If a Frame handler's reply would exceed `MaxLength`, truncate the body to
/// `MaxLength` bytes and log, rather than coercing it to empty — a separate,
/// deliberately distinct policy from the Body handler's.
fn truncate_oversize(mut frame: Frame, max_length: u32) -> Frame {
    if frame.body.len() as u32 > max_length {
        warn!(
            message_id = frame.message_id,
            len = frame.body.len(),
            max_length,
            "frame handler reply exceeds max length, truncating"
        );
        frame.body.truncate(max_length as usize);
    }
    frame
}

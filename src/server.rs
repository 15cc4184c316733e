//! `Server`/`ServerBuilder`: the thin accept loop and its configuration.
//!
//! This is deliberately the least interesting module in the crate — the
//! accept loop itself does nothing but hand sockets to
//! [`crate::connect::run`] and track them for graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, instrument};

use crate::error::ConfigError;
use crate::frame::Frame;
use crate::pool::{BodyPool, FramePool};
use crate::settings::{BufferSizing, Settings};
use crate::worker::Handler;

/// Builds a [`Server`], validating that exactly one handler shape is set.
pub struct ServerBuilder {
    host: String,
    port: u16,
    max_length: u32,
    queue_size: usize,
    processors: usize,
    read_buffer: BufferSizing,
    write_buffer: Option<BufferSizing>,
    idle_timeout: Duration,
    body_handler: Option<Arc<dyn Fn(BytesMut) -> BytesMut + Send + Sync>>,
    frame_handler: Option<Arc<dyn Fn(Frame) -> Option<Frame> + Send + Sync>>,
}

impl ServerBuilder {
    pub fn new(host: impl Into<String>, port: u16) -> ServerBuilder {
        let defaults = Settings::default();
        ServerBuilder {
            host: host.into(),
            port,
            max_length: defaults.max_length,
            queue_size: defaults.queue_size,
            processors: defaults.processors,
            read_buffer: defaults.read_buffer,
            write_buffer: None,
            idle_timeout: defaults.idle_timeout,
            body_handler: None,
            frame_handler: None,
        }
    }

    pub fn max_length(mut self, max_length: u32) -> Self {
        self.max_length = max_length;
        self
    }

    pub fn queue_size(mut self, queue_size: usize) -> Self {
        self.queue_size = queue_size;
        self
    }

    pub fn processors(mut self, processors: usize) -> Self {
        self.processors = processors;
        self
    }

    pub fn read_buffer(mut self, sizing: BufferSizing) -> Self {
        self.read_buffer = sizing;
        self
    }

    pub fn write_buffer(mut self, sizing: BufferSizing) -> Self {
        self.write_buffer = Some(sizing);
        self
    }

    pub fn idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Configure a body-in/body-out handler. Conflicts with [`Self::handle_frame`].
    pub fn handle<F>(mut self, f: F) -> Self
    where
        F: Fn(BytesMut) -> BytesMut + Send + Sync + 'static,
    {
        self.body_handler = Some(Arc::new(f));
        self
    }

    /// Configure a frame-in/frame-out handler. Conflicts with [`Self::handle`].
    pub fn handle_frame<F>(mut self, f: F) -> Self
    where
        F: Fn(Frame) -> Option<Frame> + Send + Sync + 'static,
    {
        self.frame_handler = Some(Arc::new(f));
        self
    }

    pub fn build(self) -> Result<Server, ConfigError> {
        if self.processors == 0 {
            return Err(ConfigError::ZeroProcessors);
        }
        let handler = match (self.body_handler, self.frame_handler) {
            (Some(_), Some(_)) => return Err(ConfigError::ConflictingHandlers),
            (None, None) => return Err(ConfigError::MissingHandler),
            (Some(f), None) => Handler::Body(f),
            (None, Some(f)) => Handler::Frame(f),
        };

        let write_buffer = self.write_buffer.unwrap_or_else(|| {
            BufferSizing::new(512, 128, Settings::min_write_buffer_max(self.max_length))
        });

        let settings = Arc::new(Settings {
            max_length: self.max_length,
            queue_size: self.queue_size,
            processors: self.processors,
            read_buffer: self.read_buffer,
            write_buffer,
            idle_timeout: self.idle_timeout,
        });

        let (exit_tx, exit_rx) = watch::channel(false);
        let (closed_tx, closed_rx) = watch::channel(false);

        Ok(Server {
            host: self.host,
            port: self.port,
            settings,
            handler,
            frame_pool: Arc::new(FramePool::default()),
            body_pool: Arc::new(BodyPool::default()),
            exit_tx,
            exit_rx,
            closed_tx,
            closed_rx,
        })
    }
}

/// A listening socket plus the configuration every accepted connection
/// inherits. Construct with [`ServerBuilder`].
pub struct Server {
    host: String,
    port: u16,
    settings: Arc<Settings>,
    handler: Handler,
    frame_pool: Arc<FramePool>,
    body_pool: Arc<BodyPool>,
    exit_tx: watch::Sender<bool>,
    exit_rx: watch::Receiver<bool>,
    closed_tx: watch::Sender<bool>,
    closed_rx: watch::Receiver<bool>,
}

impl Server {
    pub fn builder(host: impl Into<String>, port: u16) -> ServerBuilder {
        ServerBuilder::new(host, port)
    }

    /// Bind the listener and run the accept loop until [`Server::close`] is
    /// called or the listener itself fails. Every accepted connection is
    /// spawned onto its own supervisor task (see [`crate::connect`]) and
    /// tracked so this function doesn't return until all of them have
    /// finished draining.
    #[instrument(skip_all, fields(host = %self.host, port = self.port))]
    pub async fn start(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind((self.host.as_str(), self.port)).await?;
        info!("listening");

        let mut exit_rx = self.exit_rx.clone();
        let mut connections: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                biased;
                changed = exit_rx.changed() => {
                    match changed {
                        Ok(()) if *exit_rx.borrow() => break,
                        Ok(()) => continue,
                        Err(_) => break,
                    }
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _addr)) => {
                            connections.spawn(crate::connect::run(
                                stream,
                                self.settings.clone(),
                                self.handler.clone(),
                                self.frame_pool.clone(),
                                self.body_pool.clone(),
                                self.exit_rx.clone(),
                            ));
                        }
                        Err(e) => error!("accept failed: {e}"),
                    }
                }
            }
        }

        while connections.join_next().await.is_some() {}
        info!("listener closed, all connections drained");
        let _ = self.closed_tx.send(true);
        Ok(())
    }

    /// Signal graceful shutdown and wait for [`Server::start`] to finish
    /// draining every live connection.
    pub async fn close(&self) {
        let _ = self.exit_tx.send(true);
        let mut rx = self.closed_rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }
}

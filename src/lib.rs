//! A reusable TCP server framework that multiplexes fixed-format,
//! length-prefixed frames over a single connection, dispatching each one
//! through a caller-supplied handler on a pool of worker tasks.
//!
//! The pieces:
//!
//! - [`frame`]: the wire codec — a 16-byte header plus an opaque body.
//! - [`reader`]/[`writer`]/[`worker`]: the three pipeline stages.
//! - [`connect`]: per-connection lifecycle (the "Supervisor").
//! - [`pool`]: process-wide frame-shell and body-buffer recycling.
//! - [`server`]: the listener, its builder, and accept loop.
//! - [`client`]: a thin synchronous request/response helper for tools and tests.
//!
//! # Example
//!
//! ```rust,no_run
//! use frametcp::server::Server;
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let server = Server::builder("127.0.0.1", 9000)
//!         .handle(|body| {
//!             // Echo the body back, uppercased.
//!             body.iter().map(u8::to_ascii_uppercase).collect::<Vec<u8>>().into()
//!         })
//!         .build()
//!         .expect("exactly one handler is configured");
//!
//!     server.start().await
//! }
//! ```

pub mod client;
pub mod connect;
pub mod error;
pub mod frame;
pub mod pool;
pub mod reader;
pub mod server;
pub mod settings;
pub mod worker;
pub mod writer;

pub use client::{Client, ClientBuilder};
pub use error::{ConfigError, ConnectionError, FrameError};
pub use frame::{BodyType, Decoder, Frame};
pub use server::{Server, ServerBuilder};
pub use settings::{BufferSizing, Settings};
pub use worker::Handler;

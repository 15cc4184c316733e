//! Runs an echo server: bodies are uppercased and sent back, with the
//! original `messageId`/`reserved` preserved.

use argh::FromArgs;
use frametcp::Server;

#[derive(FromArgs)]
/// A demo frametcp echo server.
struct Args {
    /// address to listen on
    #[argh(option, default = "String::from(\"127.0.0.1\")")]
    host: String,

    /// port to listen on
    #[argh(option, default = "9000")]
    port: u16,
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt::init();
    let args: Args = argh::from_env();

    let server = Server::builder(args.host.clone(), args.port)
        .handle(|body| body.iter().map(u8::to_ascii_uppercase).collect::<Vec<u8>>().into())
        .build()
        .expect("exactly one handler is configured");

    tracing::info!(host = %args.host, port = args.port, "starting echo server");
    server.start().await
}

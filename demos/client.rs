//! Sends one frame to a frametcp server and prints the reply.

use argh::FromArgs;
use bytes::BytesMut;
use frametcp::Client;

#[derive(FromArgs)]
/// A demo frametcp client.
struct Args {
    /// server address to connect to
    #[argh(option, default = "String::from(\"127.0.0.1\")")]
    host: String,

    /// server port to connect to
    #[argh(option, default = "9000")]
    port: u16,

    /// message body to send
    #[argh(option, default = "String::from(\"hello\")")]
    body: String,

    /// send a ping frame instead of an application frame
    #[argh(switch)]
    ping: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let args: Args = argh::from_env();

    let client = Client::connect((args.host.as_str(), args.port)).await?;

    if args.ping {
        client.ping().await?;
        println!("ping acknowledged");
    } else {
        let reply = client.send(BytesMut::from(args.body.as_bytes())).await?;
        println!("{}", String::from_utf8_lossy(&reply));
    }

    client.close().await?;
    Ok(())
}

use clap::Parser;
use client::input::{BotInput, IdleInput};
use client::network::Client;
use log::info;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Session host address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Player name shown to other peers
    #[arg(short = 'n', long, default_value = "bot")]
    name: String,

    /// Simulate network latency in milliseconds
    #[arg(short = 'l', long, default_value = "0")]
    fake_ping: u64,

    /// Seconds to wait for the host to answer the join
    #[arg(long, default_value = "5")]
    join_timeout: u64,

    /// Seed for the bot's decisions
    #[arg(long)]
    seed: Option<u64>,

    /// Stand still instead of playing
    #[arg(long)]
    idle: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Peer '{}' joining {}", args.name, args.server);
    if args.fake_ping > 0 {
        info!("Simulating {}ms latency", args.fake_ping);
    }

    let client = Client::new(&args.server, &args.name, args.fake_ping)
        .await?
        .with_join_timeout(Duration::from_secs(args.join_timeout));
    let mut client = match (args.idle, args.seed) {
        (true, _) => client.with_input(IdleInput),
        (false, Some(seed)) => client.with_input(BotInput::with_seed(seed)),
        (false, None) => client,
    };
    client.run().await?;

    Ok(())
}

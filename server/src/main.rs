use clap::Parser;
use log::{error, info};
use server::network::Server;
use shared::SessionConfig;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// JSON session config; command line values override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Session ticks per second
    #[arg(short, long)]
    tick_rate: Option<u32>,

    /// Maximum number of players
    #[arg(short, long)]
    max_players: Option<usize>,

    /// Countdown before a match, in seconds
    #[arg(long)]
    countdown_secs: Option<f32>,

    /// Match length, in seconds
    #[arg(long)]
    match_secs: Option<f32>,

    /// Grace period after a match, in seconds
    #[arg(long)]
    end_game_secs: Option<f32>,

    /// How long results stay up, in seconds
    #[arg(long)]
    results_secs: Option<f32>,
}

impl Args {
    fn session_config(&self) -> Result<SessionConfig, shared::ConfigError> {
        let mut config = match &self.config {
            Some(path) => SessionConfig::from_json_file(path)?,
            None => SessionConfig::default(),
        };

        if let Some(tick_rate) = self.tick_rate {
            config.tick_rate = tick_rate;
        }
        if let Some(max_players) = self.max_players {
            config.max_players = max_players;
        }
        if let Some(secs) = self.countdown_secs {
            config.countdown_secs = secs;
        }
        if let Some(secs) = self.match_secs {
            config.match_secs = secs;
        }
        if let Some(secs) = self.end_game_secs {
            config.end_game_secs = secs;
        }
        if let Some(secs) = self.results_secs {
            config.results_secs = secs;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();
    let config = match args.session_config() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid session config: {}", e);
            return Err(e.into());
        }
    };

    info!(
        "Starting session host: {} Hz, up to {} players, {}s matches",
        config.tick_rate, config.max_players, config.match_secs
    );

    let address = format!("{}:{}", args.host, args.port);
    let mut server = Server::new(&address, config).await?;
    let shutdown = server.shutdown_handle();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down");
            let _ = shutdown.send(server::network::ServerMessage::Shutdown);
        }
    });

    server.run().await?;
    Ok(())
}

use arena_server::bot::BotTuning;
use arena_server::network::{Server, ServerConfig};
use clap::Parser;
use log::info;
use std::time::Duration;

/// Authoritative server for 3 vs 3 volleyball matches
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port to listen on
    #[clap(short, long, default_value = "8080")]
    port: u16,
    /// Maximum number of concurrent connections
    #[clap(short, long, default_value = "64")]
    max_clients: usize,
    /// Seconds of silence before a connection is dropped
    #[clap(long, default_value = "5")]
    client_timeout_secs: u64,
    /// Milliseconds between bot decisions
    #[clap(long, default_value = "150")]
    bot_reaction_ms: u64,
    /// Fraction of bot landing predictions that are not perturbed
    #[clap(long, default_value = "0.85")]
    bot_accuracy: f32,
    /// Chance that a bot gives up on a reachable ball
    #[clap(long, default_value = "0.1")]
    bot_mistake_rate: f32,
}

impl Args {
    fn config(&self) -> ServerConfig {
        let bot_tuning = BotTuning {
            prediction_accuracy: self.bot_accuracy.clamp(0.0, 1.0),
            mistake_probability: self.bot_mistake_rate.clamp(0.0, 1.0),
            ..BotTuning::from_reaction(Duration::from_millis(self.bot_reaction_ms))
        };

        ServerConfig {
            bind_addr: format!("{}:{}", self.host, self.port),
            max_clients: self.max_clients,
            client_timeout: Duration::from_secs(self.client_timeout_secs),
            bot_tuning,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut server = Server::new(args.config()).await?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}

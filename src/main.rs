//! Parley - multi-provider chat with resumable history
//!
#![doc = "Main entry point for the Parley command-line client."]

use anyhow::Result;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use parley::cli::{Cli, Commands};
use parley::commands::{self, AppContext};
use parley::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    init_tracing(cli.verbose);

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path, &cli)?;
    config.validate()?;

    match cli.command {
        Commands::Chat {
            provider,
            resume,
            no_stream,
        } => {
            tracing::info!("Starting interactive chat mode");
            if let Some(r) = &resume {
                tracing::debug!("Resuming conversation: {}", r);
            }
            let streaming = config.chat.streaming && !no_stream;
            let ctx = AppContext::new(config)?;
            commands::chat::run_chat(&ctx, &provider, resume, streaming).await?;
            Ok(())
        }
        Commands::Send {
            provider,
            thread,
            no_stream,
            message,
        } => {
            let streaming = config.chat.streaming && !no_stream;
            let ctx = AppContext::new(config)?;
            commands::send::run_send(&ctx, &provider, thread, streaming, message.join(" ")).await?;
            Ok(())
        }
        Commands::History { command } => {
            let ctx = AppContext::new(config)?;
            commands::history::handle_history(&ctx.engine, &ctx.storage, command).await?;
            Ok(())
        }
        Commands::Providers { json } => {
            commands::providers::list_providers(&config, json)?;
            Ok(())
        }
    }
}

/// Initialize tracing to stderr
///
/// `RUST_LOG` wins when set; otherwise `parley=info`, or `parley=debug`
/// with `--verbose`.
fn init_tracing(verbose: bool) {
    let default = if verbose { "parley=debug" } else { "parley=info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

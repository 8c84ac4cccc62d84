mod submit_cmd;
mod terminal_output;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use ocrforge_config::{config_dir, config_file_path, load_and_prepare, ConfigOverrides, LoggingConfig};
use ocrforge_supervisor::{
    install_panic_hook, spawn_signal_listener, OcrService, RestartPolicy, Supervisor,
    SupervisorError,
};

#[derive(Parser)]
#[command(name = "ocrforge")]
#[command(about = "Streaming OCR compute server")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the OCR server until interrupted
    Serve {
        /// Config file (default: $OCRFORGE_CONFIG_DIR/config.yaml or ~/.ocrforge/config.yaml)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// IP address to listen on
        #[arg(long)]
        address: Option<String>,
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
        /// Worker threads (and recognizer slots)
        #[arg(short, long)]
        threads: Option<usize>,
        /// Largest accepted frame, in bytes
        #[arg(long)]
        max_message_size: Option<usize>,
    },
    /// Send images to a running server and print the results
    Submit {
        /// Server address
        #[arg(short, long, default_value = "127.0.0.1:50051")]
        server: String,
        /// Print one JSON object per result instead of text
        #[arg(long)]
        json: bool,
        /// Image files, or directories to scan one level deep
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let outcome = match cli.command {
        Commands::Serve {
            config,
            address,
            port,
            threads,
            max_message_size,
        } => {
            let overrides = ConfigOverrides {
                address,
                port,
                threads,
                max_message_size,
            };
            run_server(config, overrides).await
        }
        Commands::Submit { server, json, paths } => {
            let quiet = LoggingConfig {
                level: "warn".to_string(),
                ..LoggingConfig::default()
            };
            match ocrforge_logging::init_logger(&quiet) {
                Ok(()) => submit_cmd::run(&server, json, &paths).await,
                Err(e) => Err(e),
            }
        }
    };

    match outcome {
        Ok(code) => code,
        Err(e) => {
            terminal_output::note_error(&format!("{e:#}"));
            ExitCode::FAILURE
        }
    }
}

async fn run_server(config_path: Option<PathBuf>, overrides: ConfigOverrides) -> Result<ExitCode> {
    let path = config_path.unwrap_or_else(|| config_file_path(&config_dir()));
    let config = load_and_prepare(&path, &overrides)
        .await
        .with_context(|| format!("failed to load config from {}", path.display()))?;

    ocrforge_logging::init_logger(&config.logging)?;
    install_panic_hook();

    let addr: SocketAddr = config.server.socket_addr()?;
    info!(
        config = %path.display(),
        address = %addr,
        threads = config.workers.threads,
        engine = %config.engine.command,
        "Starting ocrforge"
    );

    let shutdown = CancellationToken::new();
    let signals = spawn_signal_listener(shutdown.clone());

    let policy = RestartPolicy::new(config.supervisor.max_restarts, config.supervisor.backoff());
    let supervisor = Supervisor::new(policy, shutdown.clone());
    let service = OcrService::with_tesseract(config);

    let outcome = supervisor.run(&service).await;
    shutdown.cancel();
    let _ = signals.await;

    match outcome {
        Ok(report) => {
            info!(
                attempts = report.attempts,
                restarts = report.restarts,
                "ocrforge stopped"
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(e @ SupervisorError::RestartLimitExceeded { .. }) => {
            error!(error = %e, "ocrforge giving up");
            Ok(ExitCode::FAILURE)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_flags_parse_into_overrides() {
        let cli = Cli::try_parse_from([
            "ocrforge", "serve", "--port", "6000", "--threads", "8", "--max-message-size", "1024",
        ])
        .unwrap();
        let Commands::Serve {
            config,
            port,
            threads,
            max_message_size,
            address,
        } = cli.command
        else {
            panic!("expected serve");
        };
        assert!(config.is_none());
        assert!(address.is_none());
        assert_eq!(port, Some(6000));
        assert_eq!(threads, Some(8));
        assert_eq!(max_message_size, Some(1024));
    }

    #[test]
    fn submit_requires_a_path() {
        assert!(Cli::try_parse_from(["ocrforge", "submit"]).is_err());

        let cli = Cli::try_parse_from(["ocrforge", "submit", "--json", "scan.png"]).unwrap();
        let Commands::Submit { server, json, paths } = cli.command else {
            panic!("expected submit");
        };
        assert_eq!(server, "127.0.0.1:50051");
        assert!(json);
        assert_eq!(paths, vec![PathBuf::from("scan.png")]);
    }
}

//! mcp-engine: Model Context Protocol server
//!
//! Serves the built-in demonstration features over stdio or HTTP. Embedders
//! use the library and register their own tools, resources and prompts.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use mcp_engine::builtin;
use mcp_engine::config::{self, Config, TransportKind};
use mcp_engine::error::TransportError;
use mcp_engine::mcp::server::McpServer;
use mcp_engine::mcp::transport::{HttpTransport, StdioTransport};

/// Model Context Protocol server engine.
///
/// Exposes tools, resources and prompts to MCP clients over stdio or HTTP.
#[derive(Parser, Debug)]
#[command(name = "mcp-engine")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(value_name = "CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Transport to serve on (overrides the configuration file)
    #[arg(long, value_enum)]
    transport: Option<TransportKind>,

    /// HTTP bind address as HOST:PORT (overrides the configuration file)
    #[arg(long, value_name = "HOST:PORT")]
    bind: Option<String>,

    /// Increase logging verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease logging verbosity (only show errors)
    #[arg(short, long)]
    quiet: bool,
}

/// Determines the log level from CLI arguments.
#[allow(clippy::match_same_arms)] // Explicit "warn" arm for clarity
fn get_log_level(verbose: u8, quiet: bool, config_level: &str) -> Level {
    if quiet {
        return Level::ERROR;
    }

    match verbose {
        0 => match config_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::WARN, // Default to warn for unknown levels
        },
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Initialises the tracing subscriber for logging.
///
/// Logs go to stderr; stdout belongs to the stdio transport.
fn init_tracing(level: Level) {
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Resolves when the process receives SIGINT or SIGTERM (Ctrl+C on Windows).
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (Ok(mut sigint), Ok(mut sigterm)) =
            (signal(SignalKind::interrupt()), signal(SignalKind::terminate()))
        else {
            error!("Failed to install signal handlers");
            return std::future::pending().await;
        };

        tokio::select! {
            _ = sigint.recv() => info!("Received SIGINT"),
            _ = sigterm.recv() => info!("Received SIGTERM"),
        }
    }

    #[cfg(windows)]
    {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C");
        } else {
            error!("Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    }
}

/// Runs the server on the configured transport until shutdown.
async fn serve(server: &mut McpServer, cfg: &Config) -> Result<(), TransportError> {
    match cfg.transport.kind {
        TransportKind::Stdio => {
            info!("Serving on stdio");
            let mut transport = StdioTransport::stdio();
            server.run_until(&mut transport, shutdown_signal()).await
        }
        TransportKind::Http => {
            let mut transport =
                HttpTransport::bind(&cfg.transport.bind_addr(), &cfg.transport.path).await?;
            info!(addr = %transport.local_addr(), path = %cfg.transport.path, "Serving on HTTP");
            server.run_until(&mut transport, shutdown_signal()).await
        }
    }
}

/// Applies CLI overrides on top of the loaded configuration.
fn apply_overrides(cfg: &mut Config, args: &Args) -> Result<(), String> {
    if let Some(kind) = args.transport {
        cfg.transport.kind = kind;
    }

    if let Some(bind) = &args.bind {
        let (host, port) = bind
            .rsplit_once(':')
            .ok_or_else(|| format!("Invalid bind address '{bind}'. Expected HOST:PORT"))?;
        cfg.transport.port = port
            .parse()
            .map_err(|_| format!("Invalid port in bind address '{bind}'"))?;
        cfg.transport.host = host.to_string();
    }

    Ok(())
}

/// Entry point for the mcp-engine server.
fn main() -> ExitCode {
    let args = Args::parse();

    // Load configuration
    let config_path = args.config.as_deref();
    let mut cfg = match config::load_config(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            if config_path.is_none() {
                if let Some(default_path) = config::default_config_path() {
                    eprintln!("\nConfig read from: {}", default_path.display());
                }
            }
            return ExitCode::FAILURE;
        }
    };

    if let Err(message) = apply_overrides(&mut cfg, &args) {
        eprintln!("{message}");
        return ExitCode::FAILURE;
    }

    // Initialise logging
    let log_level = get_log_level(args.verbose, args.quiet, &cfg.logging.level);
    init_tracing(log_level);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        transport = ?cfg.transport.kind,
        "Starting mcp-engine server"
    );

    // Create MCP server
    let mut server = McpServer::new(cfg.server_options());
    if cfg.features.builtins {
        builtin::register_builtins(&mut server);
    }

    // Run the server
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to create Tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(serve(&mut server, &cfg));

    match result {
        Ok(()) => {
            info!("Server shut down gracefully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Server error");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }

    #[test]
    fn log_level_precedence() {
        assert_eq!(get_log_level(0, true, "trace"), Level::ERROR);
        assert_eq!(get_log_level(2, false, "error"), Level::DEBUG);
        assert_eq!(get_log_level(0, false, "info"), Level::INFO);
        assert_eq!(get_log_level(0, false, "bogus"), Level::WARN);
    }

    #[test]
    fn bind_override() {
        let args = Args::parse_from(["mcp-engine", "--transport", "http", "--bind", "0.0.0.0:9001"]);
        let mut cfg = Config::default();
        apply_overrides(&mut cfg, &args).unwrap();
        assert_eq!(cfg.transport.kind, TransportKind::Http);
        assert_eq!(cfg.transport.bind_addr(), "0.0.0.0:9001");

        let args = Args::parse_from(["mcp-engine", "--bind", "nohost"]);
        assert!(apply_overrides(&mut Config::default(), &args).is_err());
    }
}

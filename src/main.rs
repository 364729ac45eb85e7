//! llcp - logical link control session runner
//!
//! Brings up two link engines over an in-memory link, connects a service,
//! echoes a payload through it and prints a summary.

mod config;
mod session;

use clap::Parser;
use colored::Colorize;
use config::Config;
use session::SessionReport;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "llcp")]
#[command(about = "Run a two-peer logical link session and report what happened")]
#[command(version)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, env = "LLCP_CONFIG")]
    config: Option<PathBuf>,

    /// Payload size to echo through the connection
    #[arg(short, long)]
    payload_bytes: Option<usize>,

    /// Service address used on both peers
    #[arg(short, long)]
    service: Option<u8>,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(c) => {
            if let Some(path) = &cli.config {
                tracing::info!("Loaded config from {}", path.display());
            }
            c
        }
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            return Err(e.into());
        }
    };

    // Command line flags override file and environment
    if let Some(bytes) = cli.payload_bytes {
        config.session.payload_bytes = bytes;
    }
    if let Some(sap) = cli.service {
        config.session.service_sap = sap;
    }

    if let Err(e) = config.validate() {
        tracing::error!("{}", e);
        return Err(e.into());
    }

    tracing::info!("Starting llcp session");
    tracing::info!(
        "  Local: version {} miux {} rw {} lto {}ms",
        config.local.version,
        config.local.miux,
        config.local.rw,
        config.local.lto_ms
    );
    tracing::info!(
        "  Service address: {}, payload: {} bytes",
        config.session.service_sap,
        config.session.payload_bytes
    );

    let report = match session::run(&config) {
        Ok(report) => report,
        Err(e) => {
            tracing::error!("Session failed: {}", e);
            return Err(e.into());
        }
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if !report.echo_matches {
        return Err("echoed payload differs from the one sent".into());
    }
    Ok(())
}

fn print_report(report: &SessionReport) {
    let verdict = if report.echo_matches {
        "OK".green()
    } else {
        "MISMATCH".red()
    };
    println!("{} {}", "Session".bold(), verdict);
    println!(
        "  service {}  link MIU {}  connection MIU {}  window {}",
        report.service_sap.to_string().cyan(),
        report.link_miu,
        report.connection_miu,
        report.window
    );
    println!(
        "  {} bytes sent, {} echoed in {} turns",
        report.bytes_sent, report.bytes_echoed, report.ticks
    );
    for (role, peer) in [("initiator", &report.initiator), ("target", &report.target)] {
        let stats = &peer.stats;
        println!(
            "  {:<9}  frames {}/{}  I {}/{}  SYMM {}/{}  errors {}  connects {}  disconnects {}",
            role.cyan(),
            stats.frames_sent,
            stats.frames_received,
            stats.info_frames_sent,
            stats.info_frames_received,
            stats.keepalives_sent,
            stats.keepalives_received,
            stats.protocol_errors,
            peer.connects,
            peer.disconnects
        );
    }
}

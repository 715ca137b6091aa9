use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use jobdrop::config::{self, AppConfig};
use jobdrop::context::AppContext;
use jobdrop::core::RetentionManager;
use jobdrop::logging::{self, LogConfig};
use jobdrop::web::WebServer;
use serde::Serialize;
use std::net::{IpAddr, UdpSocket};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "jobdrop")]
#[command(about = "Trigger long-running jobs remotely and download their output", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the TOML configuration file
    #[arg(long, global = true, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the control server
    Serve(ServerArgs),
    /// Archive a job's output directory now
    Archive { job: String },
    /// Delete archives older than the retention window
    Cleanup {
        #[arg(long)]
        days: Option<u64>,
    },
    /// Print the effective configuration
    Config,
}

#[derive(Args, Serialize)]
struct ServerArgs {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    bind_address: Option<IpAddr>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    http_port: Option<u16>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    archive_directory: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    retention_days: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    job_timeout_secs: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    verbose: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    json_logs: Option<bool>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.command {
        Commands::Serve(args) => AppConfig::new(&cli.config, Some(args))?,
        _ => AppConfig::new(&cli.config, None::<&ServerArgs>)?,
    };

    logging::init(LogConfig {
        json: config.json_logs,
        verbose: config.verbose,
    });

    match cli.command {
        Commands::Serve(_) => run_server(AppContext::new(config))
            .await
            .context("Control server failed")?,
        Commands::Archive { job } => run_archive(AppContext::new(config), &job)
            .await
            .with_context(|| format!("Failed to archive {}", job))?,
        Commands::Cleanup { days } => run_cleanup(AppContext::new(config), days).await,
        Commands::Config => print_config(&config)?,
    }

    Ok(())
}

async fn run_server(ctx: AppContext) -> Result<()> {
    let addr = ctx.config.socket_addr();
    announce(&ctx, addr.port()).await;

    let runs = ctx.runs.clone();
    let server = WebServer::new(ctx, addr);
    let serve = server.start();
    tokio::pin!(serve);

    tokio::select! {
        result = &mut serve => return result,
        _ = tokio::signal::ctrl_c() => {
            let active = runs.active_count().await;
            if active > 0 {
                warn!(active, "Shutting down with jobs still running");
            }
            info!("Received Ctrl-C, shutting down");
            server.shutdown();
        }
    }

    serve.await
}

/// Log where to reach the server and what is downloadable right now.
async fn announce(ctx: &AppContext, port: u16) {
    if let Some(ip) = lan_address() {
        info!(url = %format!("http://{}:{}", ip, port), "Open on a phone on the same network");
    }
    info!(url = %format!("http://localhost:{}", port), "Open locally");
    info!(jobs = ?ctx.registry.names().collect::<Vec<_>>(), "Registered jobs");

    match ctx.archives.list().await {
        Ok(archives) => {
            info!(count = archives.len(), "Downloadable archives");
            for entry in archives {
                info!(archive = %entry.name, size = %entry.formatted_size, "Archive available");
            }
        }
        Err(e) => warn!(error = %e, "Failed to list archives"),
    }
}

/// Address of the interface that would route to the outside world.
/// Connecting a UDP socket sends no packets.
fn lan_address() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    Some(socket.local_addr().ok()?.ip())
}

async fn run_archive(ctx: AppContext, job: &str) -> Result<()> {
    let descriptor = ctx.registry.get(job)?;
    let report = ctx.archives.compress(descriptor).await;

    if !report.success {
        bail!(report.message);
    }
    println!("{}", report.message);
    Ok(())
}

async fn run_cleanup(ctx: AppContext, days: Option<u64>) {
    let retention = match days {
        Some(days) => RetentionManager::with_days(ctx.archives.clone(), days),
        None => ctx.retention(),
    };
    let report = retention.cleanup().await;
    println!("{}", report.message);
}

fn print_config(config: &AppConfig) -> Result<()> {
    let content = toml::to_string_pretty(config).context("Failed to serialize config")?;
    print!("{}", content);
    Ok(())
}

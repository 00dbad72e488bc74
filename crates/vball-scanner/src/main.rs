//! `scan-match`: segment one match video into rallies.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

use vball_models::MatchId;
use vball_scanner::config::validate_window_size;
use vball_scanner::{
    init_tracing, LogFormat, MatchScanner, ModelConfig, PipelineContext, ScanOverrides,
    ScanResult, ScanSummary, SetupConfig,
};
use vball_store::SqliteGateway;

#[derive(Parser, Debug)]
#[command(name = "scan-match", about = "Segment a volleyball match video into rallies")]
struct Cli {
    /// Match to scan
    #[arg(long)]
    match_id: i64,

    /// Model configuration (YAML)
    #[arg(long, value_name = "PATH")]
    model_config: PathBuf,

    /// Court and output setup (YAML)
    #[arg(long, value_name = "PATH")]
    setup_config: PathBuf,

    /// Frames per classified window; defaults to the model config (30)
    #[arg(long, value_name = "N")]
    buffer_size: Option<usize>,

    /// Clip output root; defaults to output.base_dir
    #[arg(long, value_name = "PATH")]
    output_dir: Option<PathBuf>,

    /// Write clips without state overlays
    #[arg(long)]
    no_overlay: bool,

    /// Log format: pretty or json
    #[arg(long, env = "LOG_FORMAT", default_value = "pretty")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    info!(match_id = cli.match_id, "Starting scan-match");

    let code = match run(cli).await {
        Ok(summary) => {
            info!(
                rallies = summary.rallies_emitted,
                lost = summary.rallies_lost,
                discarded = summary.rallies_discarded,
                invalid_windows = summary.invalid_windows,
                "Scan finished"
            );
            0
        }
        Err(e) => {
            error!(error = %e, exit_code = e.exit_code(), "Scan failed");
            e.exit_code()
        }
    };

    std::process::exit(code);
}

async fn run(cli: Cli) -> ScanResult<ScanSummary> {
    let models = ModelConfig::load(&cli.model_config)?;
    let setup = SetupConfig::load(&cli.setup_config)?;
    if let Some(window_size) = cli.buffer_size {
        validate_window_size(window_size)?;
    }

    let gateway = SqliteGateway::connect(&setup.database_url()?).await?;

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            cancel_tx.send(true).ok();
        }
    });

    let overrides = ScanOverrides {
        window_size: cli.buffer_size,
        output_dir: cli.output_dir,
        no_overlay: cli.no_overlay,
    };
    let ctx = PipelineContext::load(
        &models,
        &setup,
        Arc::new(gateway),
        &overrides,
        Some(cancel_rx.clone()),
    )?;

    MatchScanner::new(Arc::new(ctx))
        .with_cancel(cancel_rx)
        .scan(MatchId(cli.match_id))
        .await
}

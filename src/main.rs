/// Incremental daily-price sync for a list of instrument codes
use anyhow::Context;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use histsync::{
    config::{load_config, load_keys, LogFormat, SourceKind, SyncConfig},
    data::CsvStore,
    source::{DataSource, FallbackSource, HeaderPool, TpexBoard, TpexDailySource, TwseDailySource},
    sync::SyncEngine,
};

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }
}

fn build_source(config: &SyncConfig) -> histsync::Result<Arc<dyn DataSource>> {
    let headers = HeaderPool::with_user_agents(config.user_agents.clone());
    let timeout = config.request_timeout();

    let source: Arc<dyn DataSource> = match config.source {
        SourceKind::Twse => Arc::new(TwseDailySource::new(timeout, headers)?),
        SourceKind::TpexOtc => Arc::new(TpexDailySource::new(TpexBoard::Otc, timeout, headers)?),
        SourceKind::TpexEmerging => Arc::new(TpexDailySource::new(TpexBoard::Emerging, timeout, headers)?),
        SourceKind::Auto => {
            let chain: Vec<Arc<dyn DataSource>> = vec![
                Arc::new(TwseDailySource::new(timeout, headers.clone())?),
                Arc::new(TpexDailySource::new(TpexBoard::Otc, timeout, headers.clone())?),
                Arc::new(TpexDailySource::new(TpexBoard::Emerging, timeout, headers)?),
            ];
            Arc::new(FallbackSource::new(chain)?)
        }
    };
    Ok(source)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let config = load_config(&config_path).with_context(|| format!("loading {}", config_path))?;

    init_logging(config.log_format);

    info!("🚀 histsync - incremental daily price sync");
    info!("📋 Configuration loaded from {}", config_path);

    let keys = load_keys(&config.keys_file)
        .with_context(|| format!("loading keys from {}", config.keys_file.display()))?;
    info!("📋 {} keys from {}", keys.len(), config.keys_file.display());

    let source = build_source(&config)?;
    let store = Arc::new(
        CsvStore::new(config.data_dir.clone(), config.date_style).with_calendar(config.calendar()),
    );

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    warn!("⚠️  Ctrl+C received - finishing in-flight periods and stopping");
                    cancel.cancel();
                }
                Err(e) => error!("❌ Failed to listen for Ctrl+C: {}", e),
            }
        });
    }

    let engine = SyncEngine::new(config, source, store);
    let report = match engine.run_all(keys, &cancel).await {
        Ok(report) => report,
        Err(e) if e.is_fatal() => {
            error!("❌ Invalid configuration ({}): {}", e.error_code(), e);
            return Err(e.into());
        }
        Err(e) => {
            error!("❌ Sync run failed ({}): {}", e.error_code(), e);
            return Err(e.into());
        }
    };

    if report.totals.interrupted > 0 {
        warn!("⚠️  Run interrupted; {} keys incomplete", report.totals.interrupted);
    }

    if report.all_succeeded() {
        info!("✅ All {} keys synced", report.totals.keys);
    } else {
        warn!(
            "⚠️  {} of {} keys did not complete",
            report.totals.failed + report.totals.cancelled,
            report.totals.keys
        );
    }

    Ok(())
}

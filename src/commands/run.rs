use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::catalog::{Catalog, S3Catalog};
use crate::commands::CommandReport;
use crate::recovery::config::load_config;
use crate::recovery::{ledger, pipeline};

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub prefix: Option<String>,
    pub dry_run: bool,
}

pub async fn run(opts: &RunOptions) -> Result<CommandReport> {
    let mut config = load_config()?;
    if let Some(prefix) = &opts.prefix {
        config.pipeline.archive_prefix = prefix.clone();
    }
    let config = Arc::new(config);

    let mut report = CommandReport::new("run");
    report.detail(format!("bucket={}", config.store.bucket));
    report.detail(format!("archive_prefix={}", config.pipeline.archive_prefix));
    report.detail(format!("worker_count={}", config.pipeline.worker_count));

    let catalog: Arc<dyn Catalog> = Arc::new(S3Catalog::new(&config)?);
    let cancel = CancellationToken::new();
    spawn_ctrl_c_handler(cancel.clone());

    if opts.dry_run {
        let ledger = ledger::load(catalog.as_ref(), &config, &cancel).await?;
        let candidates =
            pipeline::discover(catalog.as_ref(), &config, &ledger, &cancel).await?;
        report.detail(format!("dry-run: {} archive(s) would be processed", candidates.len()));
        for object in candidates {
            report.detail(format!("  {} ({} bytes)", object.key, object.size));
        }
        return Ok(report);
    }

    let outcome = pipeline::run_recovery(config, catalog, cancel.clone()).await?;
    report.detail(format!("archives discovered: {}", outcome.discovered));
    report.detail(format!("documents uploaded: {}", outcome.uploaded));
    for failure in &outcome.failures {
        report.issue(format!("{}: {}", failure.unit, failure.message));
    }
    if cancel.is_cancelled() {
        report.detail("*** execution was cancelled ***");
    }
    Ok(report)
}

fn spawn_ctrl_c_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("cancellation requested; letting in-flight work settle");
            cancel.cancel();
        }
    });
}

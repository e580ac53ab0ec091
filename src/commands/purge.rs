use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::catalog::{Catalog, S3Catalog};
use crate::commands::CommandReport;
use crate::recovery::archive::RECOVERED_PREFIX;
use crate::recovery::config::load_config;
use crate::recovery::pipeline::{UnitFailure, WorkPool};

#[derive(Debug, Clone, Default)]
pub struct PurgeOptions {
    pub yes: bool,
}

/// Deletes every previously recovered object under the `by-po/` prefix,
/// through the same bounded pool the pipeline uses. The ledger is left
/// untouched; purging exists to clean up misfiled uploads, not to reset
/// processing state.
pub async fn run(opts: &PurgeOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("purge");
    if !opts.yes {
        report.issue("refusing to delete recovered objects without --yes");
        return Ok(report);
    }

    let config = load_config()?;
    let catalog: Arc<dyn Catalog> = Arc::new(S3Catalog::new(&config)?);
    let cancel = CancellationToken::new();

    let objects = catalog.list(RECOVERED_PREFIX, &cancel).await?;
    report.detail(format!(
        "{} object(s) under {RECOVERED_PREFIX}/",
        objects.len()
    ));

    let pool = WorkPool::new(config.pipeline.worker_count);
    for object in objects {
        let catalog = catalog.clone();
        let cancel = cancel.clone();
        let unit = object.key.clone();
        pool.submit(async move {
            catalog
                .remove(&object.key, &cancel)
                .await
                .map(|_| ())
                .map_err(|err| UnitFailure::new(unit, err.into()))
        });
    }

    let failures = pool.drain().await;
    for failure in &failures {
        report.issue(format!("{}: {}", failure.unit, failure.message));
    }
    if failures.is_empty() {
        report.detail("purge complete");
    }
    Ok(report)
}

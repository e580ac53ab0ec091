use anyhow::Result;
use tokio_util::sync::CancellationToken;

use crate::catalog::S3Catalog;
use crate::commands::CommandReport;
use crate::recovery::config::load_config;
use crate::recovery::ledger;

#[derive(Debug, Clone, Default)]
pub struct StatusOptions {
    pub export: bool,
}

/// Summarizes the durable ledger, or with `export` dumps one
/// `archiveKey|token` line per recovered document for downstream tooling.
pub async fn run(opts: &StatusOptions) -> Result<CommandReport> {
    let config = load_config()?;
    let mut report = CommandReport::new("status");

    let catalog = S3Catalog::new(&config)?;
    let cancel = CancellationToken::new();
    let ledger = ledger::load(&catalog, &config, &cancel).await?;

    if opts.export {
        for (archive, documents) in ledger.snapshot() {
            for document in documents {
                report.detail(format!("{archive}|{}", document.render_token()));
            }
        }
        return Ok(report);
    }

    report.detail(format!("processed archives: {}", ledger.archive_count()));
    report.detail(format!("recovered documents: {}", ledger.document_count()));
    for (archive, documents) in ledger.snapshot() {
        report.detail(format!("  {archive}: {} document(s)", documents.len()));
    }
    Ok(report)
}

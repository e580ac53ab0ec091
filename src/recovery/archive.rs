use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::catalog::{Catalog, RemoteObject};
use crate::recovery::config::RecoveryConfig;
use crate::recovery::csv_index::CsvIndex;
use crate::recovery::document::DocumentRecord;
use crate::recovery::ledger::Ledger;
use crate::recovery::pipeline::{UnitFailure, WorkPool};
use crate::recovery::warn::{self, WarnEvent};

/// Recovered documents are re-uploaded under this prefix, keyed by code.
pub const RECOVERED_PREFIX: &str = "by-po";

/// Everything one archive unit needs. The pool is included because an
/// archive unit spawns one further unit per contained document, drawn from
/// the same pool of permits as the archives themselves.
pub struct ArchiveContext {
    pub config: Arc<RecoveryConfig>,
    pub catalog: Arc<dyn Catalog>,
    pub ledger: Arc<Ledger>,
    pub pool: Arc<WorkPool>,
    pub cancel: CancellationToken,
}

#[derive(Debug, Default)]
struct ExtractedEntries {
    metadata: Vec<PathBuf>,
    documents: Vec<PathBuf>,
}

/// Processes one discovered archive: download (or reuse the cached copy),
/// extract, build the metadata index, then hand each document to the pool.
/// The archive's own ledger entry materializes document by document as the
/// spawned units complete.
pub async fn process_archive(ctx: ArchiveContext, object: RemoteObject) -> Result<()> {
    if ctx.cancel.is_cancelled() {
        return Ok(());
    }

    let local_zip = ctx.config.pipeline.temp_root.join(&object.key);
    if let Some(parent) = local_zip.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    if !local_copy_is_fresh(&local_zip, &object)
        && !ctx
            .catalog
            .fetch(&object.key, &local_zip, &ctx.cancel)
            .await?
    {
        // Listed but gone by the time we fetched it. Not this run's problem.
        warn::emit(WarnEvent {
            code: "ARCHIVE_MISSING",
            stage: "download",
            archive: &object.key,
            key: &object.key,
            err: "object vanished between listing and download",
        });
        return Ok(());
    }
    restore_remote_mtime(&local_zip, &object)?;

    let scratch = Arc::new(
        tempfile::tempdir_in(&ctx.config.pipeline.temp_root).with_context(|| {
            format!("failed to create extraction dir for {}", object.key)
        })?,
    );
    {
        let zip_path = local_zip.clone();
        let dest = scratch.path().to_path_buf();
        tokio::task::spawn_blocking(move || extract_zip(&zip_path, &dest))
            .await
            .context("extraction task failed")??;
    }

    let entries = classify_entries(scratch.path())?;
    if entries.documents.is_empty() {
        return Ok(());
    }

    let index = CsvIndex::build(&entries.metadata, &ctx.cancel)?;

    for document in entries.documents {
        if ctx.cancel.is_cancelled() {
            break;
        }
        let Some(name) = document
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
        else {
            continue;
        };
        let code = index.code_for(&name, ctx.config.pipeline.ignore_name_case);

        let catalog = ctx.catalog.clone();
        let ledger = ctx.ledger.clone();
        let config = ctx.config.clone();
        let cancel = ctx.cancel.clone();
        let scratch = scratch.clone();
        let archive_key = object.key.clone();
        let unit = name.clone();
        ctx.pool.submit(async move {
            let result = upload_document(
                catalog.as_ref(),
                &ledger,
                &config,
                &archive_key,
                &document,
                &name,
                &code,
                &cancel,
            )
            .await;
            // The extraction dir lives until the last document unit drops it.
            drop(scratch);
            result.map_err(|err| UnitFailure::new(unit, err))
        });
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn upload_document(
    catalog: &dyn Catalog,
    ledger: &Ledger,
    config: &RecoveryConfig,
    archive_key: &str,
    path: &Path,
    name: &str,
    code: &str,
    cancel: &CancellationToken,
) -> Result<()> {
    if cancel.is_cancelled() {
        return Ok(());
    }

    let created_at = local_creation_time(path)?;
    let record = DocumentRecord::new(name, created_at, code, config.pipeline.code_padding);
    let object_key = recovered_object_key(&record);

    if !catalog.store(&object_key, path, cancel).await? {
        bail!("object store rejected upload of {object_key}");
    }
    ledger.append(archive_key, record);
    Ok(())
}

pub fn recovered_object_key(record: &DocumentRecord) -> String {
    format!("{RECOVERED_PREFIX}/{}/{}", record.code, record.name)
}

/// Creation time of the extracted file itself, not anything embedded in its
/// content. Filesystems without birth times fall back to the mtime.
fn local_creation_time(path: &Path) -> Result<DateTime<Utc>> {
    let meta = fs::metadata(path)
        .with_context(|| format!("failed to stat {}", path.display()))?;
    let stamp = meta
        .created()
        .or_else(|_| meta.modified())
        .with_context(|| format!("no usable timestamp for {}", path.display()))?;
    Ok(stamp.into())
}

/// A local copy counts as fresh when size and modification time both match
/// the descriptor. No content hash; a retimestamped identical object is
/// re-downloaded, which is the accepted tradeoff.
fn local_copy_is_fresh(local: &Path, object: &RemoteObject) -> bool {
    let Ok(meta) = fs::metadata(local) else {
        return false;
    };
    if !meta.is_file() || meta.len() != object.size {
        return false;
    }
    let Ok(modified) = meta.modified() else {
        return false;
    };
    DateTime::<Utc>::from(modified).timestamp() == object.last_modified.timestamp()
}

/// Stamps the descriptor's timestamp onto the freshly downloaded copy so the
/// freshness check can ever succeed on the next run.
fn restore_remote_mtime(local: &Path, object: &RemoteObject) -> Result<()> {
    let mtime = filetime::FileTime::from_system_time(object.last_modified.into());
    filetime::set_file_mtime(local, mtime)
        .with_context(|| format!("failed to set mtime on {}", local.display()))
}

fn extract_zip(zip_path: &Path, dest: &Path) -> Result<()> {
    let file = fs::File::open(zip_path)
        .with_context(|| format!("failed to open {}", zip_path.display()))?;
    let mut archive = zip::ZipArchive::new(file)
        .with_context(|| format!("failed to read zip {}", zip_path.display()))?;
    archive
        .extract(dest)
        .with_context(|| format!("failed to extract {}", zip_path.display()))?;
    Ok(())
}

/// Splits the extracted top-level entries into metadata files and documents
/// by suffix, case-insensitively. Anything else is ignored.
fn classify_entries(dir: &Path) -> Result<ExtractedEntries> {
    let mut out = ExtractedEntries::default();
    let read_dir =
        fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))?;
    for entry in read_dir {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => out.metadata.push(path),
            Some(ext) if ext.eq_ignore_ascii_case("pdf") => out.documents.push(path),
            _ => {}
        }
    }
    out.metadata.sort();
    out.documents.sort();
    Ok(out)
}

use anyhow::{Context, Result, bail};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::catalog::Catalog;
use crate::recovery::config::RecoveryConfig;
use crate::recovery::document::DocumentRecord;
use crate::recovery::warn::{self, WarnEvent};

/// Key of the durable ledger object in the bucket.
pub const LEDGER_OBJECT_KEY: &str = "metadata.db";

/// Record of which archives have been fully processed and which documents
/// resulted. An archive key either has no entry (unprocessed) or a complete
/// one; there is no in-progress state. Appends from concurrently completing
/// document uploads go through one mutex, never held across I/O.
#[derive(Debug, Default)]
pub struct Ledger {
    entries: Mutex<BTreeMap<String, Vec<DocumentRecord>>>,
}

impl Ledger {
    /// Parses the durable text form, one `archiveKey<TAB>doc\doc...` line
    /// per archive. All-or-nothing: any malformed line discards the whole
    /// load and yields an empty ledger, never a partially populated one.
    pub fn parse(text: &str) -> Self {
        let mut entries = BTreeMap::new();
        for line in text.lines() {
            let Some((key, documents)) = parse_line(line) else {
                return Self::default();
            };
            entries.insert(key, documents);
        }
        Self {
            entries: Mutex::new(entries),
        }
    }

    /// Serializes every archive with its documents, one line per archive,
    /// in key order.
    pub fn render(&self) -> String {
        let entries = self.lock_entries();
        let mut out = String::new();
        for (key, documents) in entries.iter() {
            out.push_str(key);
            out.push('\t');
            let tokens: Vec<String> = documents.iter().map(DocumentRecord::render_token).collect();
            out.push_str(&tokens.join("\\"));
            out.push('\n');
        }
        out
    }

    /// An archive present here is considered fully processed and is never
    /// reselected. `ignore_case` is the same mode that governs CSV-name
    /// matching.
    pub fn contains_archive(&self, key: &str, ignore_case: bool) -> bool {
        let entries = self.lock_entries();
        if ignore_case {
            entries.keys().any(|known| known.eq_ignore_ascii_case(key))
        } else {
            entries.contains_key(key)
        }
    }

    /// Appends one document under `archive_key`, creating the entry on the
    /// first append. Safe to call from many workers at once.
    pub fn append(&self, archive_key: &str, document: DocumentRecord) {
        let mut entries = self.lock_entries();
        entries
            .entry(archive_key.to_string())
            .or_default()
            .push(document);
    }

    pub fn archive_count(&self) -> usize {
        self.lock_entries().len()
    }

    pub fn document_count(&self) -> usize {
        self.lock_entries().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_entries().is_empty()
    }

    pub fn snapshot(&self) -> BTreeMap<String, Vec<DocumentRecord>> {
        self.lock_entries().clone()
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<DocumentRecord>>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn parse_line(line: &str) -> Option<(String, Vec<DocumentRecord>)> {
    let mut pieces = line.split('\t');
    let key = pieces.next()?;
    let documents_field = pieces.next()?;
    if pieces.next().is_some() {
        return None;
    }

    let documents: Option<Vec<DocumentRecord>> = documents_field
        .split('\\')
        .map(DocumentRecord::parse_token)
        .collect();
    let documents = documents?;
    if documents.is_empty() {
        return None;
    }
    Some((key.to_string(), documents))
}

fn local_ledger_path(config: &RecoveryConfig) -> PathBuf {
    config.pipeline.temp_root.join(LEDGER_OBJECT_KEY)
}

/// Fetches the durable ledger from the bucket, falling back to an empty one
/// when the object is absent or unparsable.
pub async fn load(
    catalog: &dyn Catalog,
    config: &RecoveryConfig,
    cancel: &CancellationToken,
) -> Result<Ledger> {
    let local = local_ledger_path(config);
    if !catalog.fetch(LEDGER_OBJECT_KEY, &local, cancel).await? {
        return Ok(Ledger::default());
    }

    let raw = fs::read_to_string(&local)
        .with_context(|| format!("failed to read {}", local.display()))?;
    let ledger = Ledger::parse(&raw);
    if ledger.is_empty() && !raw.trim().is_empty() {
        warn::emit(WarnEvent {
            code: "LEDGER_RESET",
            stage: "load-ledger",
            archive: LEDGER_OBJECT_KEY,
            key: LEDGER_OBJECT_KEY,
            err: "durable ledger did not parse; starting from an empty ledger",
        });
    }
    Ok(ledger)
}

/// Persists the ledger back to the bucket. A failed upload is a hard error:
/// losing the ledger would make every processed archive look unprocessed.
pub async fn save(
    catalog: &dyn Catalog,
    config: &RecoveryConfig,
    ledger: &Ledger,
    cancel: &CancellationToken,
) -> Result<()> {
    let local = local_ledger_path(config);
    if let Some(parent) = local.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(&local, ledger.render())
        .with_context(|| format!("failed to write {}", local.display()))?;

    if !catalog.store(LEDGER_OBJECT_KEY, &local, cancel).await? {
        bail!(
            "unexpected error saving ledger to the object store! bucket: {}, key: {}",
            config.store.bucket,
            LEDGER_OBJECT_KEY
        );
    }
    Ok(())
}

use anyhow::Result;
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::catalog::{Catalog, RemoteObject};
use crate::recovery::archive::{self, ArchiveContext};
use crate::recovery::config::RecoveryConfig;
use crate::recovery::ledger::{self, Ledger};

/// One archive's or one document's failure. Captured and reported after the
/// drain; never aborts sibling units.
#[derive(Debug)]
pub struct UnitFailure {
    pub unit: String,
    pub message: String,
}

impl UnitFailure {
    pub fn new(unit: impl Into<String>, err: anyhow::Error) -> Self {
        Self {
            unit: unit.into(),
            message: format!("{err:#}"),
        }
    }
}

#[derive(Debug)]
pub struct RecoveryOutcome {
    pub discovered: usize,
    pub uploaded: usize,
    pub failures: Vec<UnitFailure>,
}

/// Bounded pool shared by archive-level and document-level units. The permit
/// count caps both kinds of work together, so a document-heavy archive can
/// starve other archives' downloads; that resource sharing is intentional.
///
/// Because an archive unit spawns its document units only once it is already
/// running, the outstanding set grows while it is being drained. [`drain`]
/// therefore loops: await the currently known handles, then re-check for
/// ones added in the meantime, until a pass finds the set empty.
///
/// [`drain`]: WorkPool::drain
pub struct WorkPool {
    permits: Arc<Semaphore>,
    outstanding: Mutex<Vec<JoinHandle<Result<(), UnitFailure>>>>,
}

impl WorkPool {
    pub fn new(permit_count: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(permit_count.max(1))),
            outstanding: Mutex::new(Vec::new()),
        }
    }

    /// Submits one unit. It runs only after acquiring a permit and releases
    /// the permit when it finishes, success or failure. Running units may
    /// submit more units onto the same pool.
    pub fn submit<F>(&self, unit: F)
    where
        F: Future<Output = Result<(), UnitFailure>> + Send + 'static,
    {
        let permits = self.permits.clone();
        let handle = tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return Ok(());
            };
            unit.await
        });
        self.lock_outstanding().push(handle);
    }

    /// Waits until every tracked unit, including units spawned mid-drain,
    /// has finished. Returns every captured failure.
    pub async fn drain(&self) -> Vec<UnitFailure> {
        let mut failures = Vec::new();
        loop {
            let batch: Vec<_> = {
                let mut outstanding = self.lock_outstanding();
                outstanding.drain(..).collect()
            };
            if batch.is_empty() {
                break;
            }
            for handle in batch {
                match handle.await {
                    Ok(Ok(())) => {}
                    Ok(Err(failure)) => failures.push(failure),
                    Err(join_err) => failures.push(UnitFailure {
                        unit: "worker".to_string(),
                        message: format!("unit panicked: {join_err}"),
                    }),
                }
            }
        }
        failures
    }

    fn lock_outstanding(
        &self,
    ) -> MutexGuard<'_, Vec<JoinHandle<Result<(), UnitFailure>>>> {
        self.outstanding
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn is_archive_key(key: &str) -> bool {
    Path::new(key)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"))
}

/// Lists candidate archives under the configured prefix and drops everything
/// that is not a zip or is already ledgered under the case mode.
pub async fn discover(
    catalog: &dyn Catalog,
    config: &RecoveryConfig,
    ledger: &Ledger,
    cancel: &CancellationToken,
) -> Result<Vec<RemoteObject>> {
    let objects = catalog
        .list(&config.pipeline.archive_prefix, cancel)
        .await?;
    Ok(objects
        .into_iter()
        .filter(|object| {
            is_archive_key(&object.key)
                && !ledger.contains_archive(&object.key, config.pipeline.ignore_name_case)
        })
        .collect())
}

/// The whole run: load the ledger, process every unprocessed archive through
/// the bounded pool, and persist the ledger again no matter how processing
/// went, so work completed before a failure is never redone.
pub async fn run_recovery(
    config: Arc<RecoveryConfig>,
    catalog: Arc<dyn Catalog>,
    cancel: CancellationToken,
) -> Result<RecoveryOutcome> {
    let ledger = Arc::new(ledger::load(catalog.as_ref(), &config, &cancel).await?);
    let documents_before = ledger.document_count();

    let processed = process_archives(&config, &catalog, &ledger, &cancel).await;
    let saved = ledger::save(catalog.as_ref(), &config, &ledger, &cancel).await;

    let mut outcome = match (processed, saved) {
        (Ok(outcome), Ok(())) => outcome,
        (Ok(_), Err(save_err)) => return Err(save_err),
        (Err(process_err), Ok(())) => return Err(process_err),
        (Err(process_err), Err(save_err)) => {
            return Err(process_err
                .context(format!("ledger save also failed: {save_err:#}")));
        }
    };
    outcome.uploaded = ledger.document_count().saturating_sub(documents_before);
    Ok(outcome)
}

async fn process_archives(
    config: &Arc<RecoveryConfig>,
    catalog: &Arc<dyn Catalog>,
    ledger: &Arc<Ledger>,
    cancel: &CancellationToken,
) -> Result<RecoveryOutcome> {
    let candidates = discover(catalog.as_ref(), config, ledger, cancel).await?;
    let discovered = candidates.len();

    let pool = Arc::new(WorkPool::new(config.pipeline.worker_count));
    for object in candidates {
        let ctx = ArchiveContext {
            config: config.clone(),
            catalog: catalog.clone(),
            ledger: ledger.clone(),
            pool: pool.clone(),
            cancel: cancel.clone(),
        };
        let unit = object.key.clone();
        pool.submit(async move {
            archive::process_archive(ctx, object)
                .await
                .map_err(|err| UnitFailure::new(unit, err))
        });
    }

    let failures = pool.drain().await;
    Ok(RecoveryOutcome {
        discovered,
        uploaded: 0,
        failures,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::S3Catalog;
    use crate::error::CatalogError;
    use crate::recovery::config::StoreConfig;
    use crate::recovery::ledger::LEDGER_OBJECT_KEY;
    use async_trait::async_trait;
    use object_store::memory::InMemory;
    use object_store::ObjectStore;
    use std::io::Write;
    use tempfile::tempdir;

    fn test_config(temp_root: &Path, worker_count: usize) -> Arc<RecoveryConfig> {
        let mut cfg = RecoveryConfig::default();
        cfg.pipeline.worker_count = worker_count;
        cfg.pipeline.temp_root = temp_root.to_path_buf();
        cfg.pipeline.archive_prefix = "stmts".to_string();
        cfg.store = StoreConfig {
            access_key_id: "test".to_string(),
            secret_access_key: "test".to_string(),
            region: "test".to_string(),
            bucket: "test-bucket".to_string(),
        };
        Arc::new(cfg)
    }

    fn build_zip(path: &Path, documents: &[&str], csv: Option<&str>) {
        let file = std::fs::File::create(path).expect("create zip");
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        for name in documents {
            writer.start_file(*name, options).expect("start entry");
            writer.write_all(b"%PDF-1.4 test").expect("write entry");
        }
        if let Some(csv) = csv {
            writer.start_file("index.csv", options).expect("start csv");
            writer.write_all(csv.as_bytes()).expect("write csv");
        }
        writer.finish().expect("finish zip");
    }

    async fn seed_archives(catalog: &dyn Catalog, staging: &Path) {
        let cancel = CancellationToken::new();
        for (key, docs, csv) in [
            (
                "stmts/jan.zip",
                ["jan-a.pdf", "jan-b.pdf"],
                "PO Number~Attachment List\n11~jan-a.pdf\n12~batch/jan-b.pdf\n",
            ),
            (
                "stmts/feb.zip",
                ["feb-a.pdf", "feb-b.pdf"],
                "PO Number~Attachment List\n21~feb-a.pdf\n22~feb-b.pdf\n",
            ),
            (
                "stmts/mar.zip",
                ["mar-a.pdf", "mar-b.pdf"],
                "PO Number~Attachment List\n31~mar-a.pdf\n32~mar-b.pdf\n",
            ),
        ] {
            let local = staging.join(Path::new(key).file_name().expect("zip name"));
            build_zip(&local, &docs, Some(csv));
            catalog.store(key, &local, &cancel).await.expect("seed zip");
        }
    }

    async fn reload_ledger(catalog: &dyn Catalog, dest: &Path) -> Ledger {
        let cancel = CancellationToken::new();
        let local = dest.join("reloaded.db");
        assert!(
            catalog
                .fetch(LEDGER_OBJECT_KEY, &local, &cancel)
                .await
                .expect("fetch ledger")
        );
        Ledger::parse(&std::fs::read_to_string(&local).expect("read ledger"))
    }

    /// Fails every upload whose key contains the marker, leaving siblings
    /// untouched.
    struct FlakyCatalog {
        inner: S3Catalog,
        fail_key_contains: String,
    }

    #[async_trait]
    impl Catalog for FlakyCatalog {
        async fn list(
            &self,
            prefix: &str,
            cancel: &CancellationToken,
        ) -> Result<Vec<RemoteObject>, CatalogError> {
            self.inner.list(prefix, cancel).await
        }

        async fn fetch(
            &self,
            key: &str,
            dest: &Path,
            cancel: &CancellationToken,
        ) -> Result<bool, CatalogError> {
            self.inner.fetch(key, dest, cancel).await
        }

        async fn store(
            &self,
            key: &str,
            source: &Path,
            cancel: &CancellationToken,
        ) -> Result<bool, CatalogError> {
            if key.contains(&self.fail_key_contains) {
                return Err(CatalogError::transport(
                    "uploading to",
                    "test-bucket",
                    key,
                    "injected transport failure",
                ));
            }
            self.inner.store(key, source, cancel).await
        }

        async fn remove(
            &self,
            key: &str,
            cancel: &CancellationToken,
        ) -> Result<bool, CatalogError> {
            self.inner.remove(key, cancel).await
        }
    }

    /// Every transport call fails; the ledger fetch alone reports a clean
    /// "nothing stored yet".
    struct BrokenCatalog;

    #[async_trait]
    impl Catalog for BrokenCatalog {
        async fn list(
            &self,
            prefix: &str,
            _cancel: &CancellationToken,
        ) -> Result<Vec<RemoteObject>, CatalogError> {
            Err(CatalogError::transport(
                "listing",
                "test-bucket",
                prefix,
                "injected listing failure",
            ))
        }

        async fn fetch(
            &self,
            _key: &str,
            _dest: &Path,
            _cancel: &CancellationToken,
        ) -> Result<bool, CatalogError> {
            Ok(false)
        }

        async fn store(
            &self,
            key: &str,
            _source: &Path,
            _cancel: &CancellationToken,
        ) -> Result<bool, CatalogError> {
            Err(CatalogError::transport(
                "uploading to",
                "test-bucket",
                key,
                "injected upload failure",
            ))
        }

        async fn remove(
            &self,
            _key: &str,
            _cancel: &CancellationToken,
        ) -> Result<bool, CatalogError> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn failed_run_still_surfaces_a_failed_ledger_save() {
        let tmp = tempdir().expect("tempdir");
        let config = test_config(tmp.path(), 1);

        let err = run_recovery(config, Arc::new(BrokenCatalog), CancellationToken::new())
            .await
            .expect_err("run must fail");

        let message = format!("{err:#}");
        assert!(message.contains("injected listing failure"), "{message}");
        assert!(message.contains("injected upload failure"), "{message}");
    }

    #[tokio::test]
    async fn single_permit_pool_completes_every_document_exactly_once() {
        let tmp = tempdir().expect("tempdir");
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let catalog: Arc<dyn Catalog> =
            Arc::new(S3Catalog::with_store(store, "test-bucket", 100));
        seed_archives(catalog.as_ref(), tmp.path()).await;

        let config = test_config(tmp.path(), 1);
        let outcome = run_recovery(config, catalog.clone(), CancellationToken::new())
            .await
            .expect("run");

        assert_eq!(outcome.discovered, 3);
        assert_eq!(outcome.uploaded, 6);
        assert!(outcome.failures.is_empty(), "{:?}", outcome.failures);

        let recovered = catalog
            .list("by-po", &CancellationToken::new())
            .await
            .expect("list recovered");
        assert_eq!(recovered.len(), 6);
        assert!(
            recovered
                .iter()
                .any(|o| o.key == "by-po/0000000011/jan-a.pdf")
        );
        assert!(
            recovered
                .iter()
                .any(|o| o.key == "by-po/0000000012/jan-b.pdf")
        );

        let ledger = reload_ledger(catalog.as_ref(), tmp.path()).await;
        let snapshot = ledger.snapshot();
        assert_eq!(snapshot.len(), 3);
        for key in ["stmts/jan.zip", "stmts/feb.zip", "stmts/mar.zip"] {
            assert_eq!(snapshot[key].len(), 2, "documents under {key}");
        }
    }

    #[tokio::test]
    async fn one_upload_failure_does_not_stop_sibling_documents() {
        let tmp = tempdir().expect("tempdir");
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let inner = S3Catalog::with_store(store, "test-bucket", 100);
        let catalog: Arc<dyn Catalog> = Arc::new(FlakyCatalog {
            inner,
            fail_key_contains: "feb-b.pdf".to_string(),
        });
        seed_archives(catalog.as_ref(), tmp.path()).await;

        let config = test_config(tmp.path(), 4);
        let outcome = run_recovery(config, catalog.clone(), CancellationToken::new())
            .await
            .expect("run");

        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].unit, "feb-b.pdf");
        assert_eq!(outcome.uploaded, 5);

        let ledger = reload_ledger(catalog.as_ref(), tmp.path()).await;
        assert_eq!(ledger.document_count(), 5);
        assert_eq!(ledger.snapshot()["stmts/feb.zip"].len(), 1);
    }

    #[tokio::test]
    async fn rerun_never_reselects_a_ledgered_archive() {
        let tmp = tempdir().expect("tempdir");
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let catalog: Arc<dyn Catalog> =
            Arc::new(S3Catalog::with_store(store, "test-bucket", 100));
        seed_archives(catalog.as_ref(), tmp.path()).await;

        let config = test_config(tmp.path(), 2);
        let first = run_recovery(config.clone(), catalog.clone(), CancellationToken::new())
            .await
            .expect("first run");
        assert_eq!(first.discovered, 3);

        let second = run_recovery(config, catalog, CancellationToken::new())
            .await
            .expect("second run");
        assert_eq!(second.discovered, 0);
        assert_eq!(second.uploaded, 0);
        assert!(second.failures.is_empty());
    }

    #[tokio::test]
    async fn discovery_skips_non_archives() {
        let tmp = tempdir().expect("tempdir");
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let catalog = S3Catalog::with_store(store, "test-bucket", 100);

        let cancel = CancellationToken::new();
        let stray = tmp.path().join("notes.txt");
        std::fs::write(&stray, b"not a zip").expect("write stray");
        catalog
            .store("stmts/notes.txt", &stray, &cancel)
            .await
            .expect("store stray");
        catalog
            .store("stmts/real.ZIP", &stray, &cancel)
            .await
            .expect("store zip");

        let config = test_config(tmp.path(), 1);
        let ledger = Ledger::default();
        let candidates = discover(&catalog, &config, &ledger, &cancel)
            .await
            .expect("discover");
        let keys: Vec<_> = candidates.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, ["stmts/real.ZIP"]);
    }
}

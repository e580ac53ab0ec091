use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// Field delimiter of the statement metadata files. The attachment column
/// holds comma-separated path references, which is why the files cannot use
/// a comma themselves.
pub const FIELD_DELIMITER: u8 = b'~';

const CODE_COLUMN: &str = "PO Number";
const ATTACHMENT_COLUMN: &str = "Attachment List";

/// Ephemeral per-archive map from canonical document filename to
/// purchase-order code. Built fresh for every archive, never persisted.
#[derive(Debug, Default)]
pub struct CsvIndex {
    entries: BTreeMap<String, String>,
}

impl CsvIndex {
    /// Reads every metadata file into one index. A file whose header lacks
    /// either required column contributes nothing; that is a normal skip,
    /// not an error. Unreadable files are errors and fail the archive.
    pub fn build(files: &[PathBuf], cancel: &CancellationToken) -> Result<Self> {
        let mut index = Self::default();
        for file in files {
            if cancel.is_cancelled() {
                break;
            }
            let text = fs::read_to_string(file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            index.absorb(&text);
        }
        Ok(index)
    }

    /// Quoting is off: a `"` is an ordinary character in this format, the
    /// rows are plain delimiter-separated text. Flexible rows keep short
    /// lines readable instead of erroring the whole file.
    fn absorb(&mut self, text: &str) {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(FIELD_DELIMITER)
            .has_headers(true)
            .quoting(false)
            .flexible(true)
            .from_reader(text.as_bytes());

        let Some((attachment_idx, code_idx)) =
            reader.headers().ok().and_then(locate_columns)
        else {
            return;
        };

        for record in reader.records() {
            let Ok(record) = record else {
                continue;
            };
            let Some(attachments) = record.get(attachment_idx) else {
                continue;
            };
            let code = record.get(code_idx).unwrap_or_default();
            for reference in attachments.split(',') {
                let name = canonical_file_name(reference);
                if !name.is_empty() {
                    self.insert(name, code);
                }
            }
        }
    }

    /// When the same filename shows up in more than one row the ordinary
    /// string-comparison minimum of the competing codes wins ("10" < "9").
    /// The reference data contains such duplicates and this is the resolution
    /// the downstream consumers expect; do not change it to a numeric
    /// minimum.
    fn insert(&mut self, name: &str, code: &str) {
        match self.entries.get_mut(name) {
            Some(existing) => {
                if code < existing.as_str() {
                    *existing = code.to_string();
                }
            }
            None => {
                self.entries.insert(name.to_string(), code.to_string());
            }
        }
    }

    /// Resolves the code for one extracted document. Keys are canonical bare
    /// filenames, so the exact mode is a plain map lookup; the ignore-case
    /// mode scans. No match resolves to the empty string.
    pub fn code_for(&self, name: &str, ignore_case: bool) -> String {
        if ignore_case {
            self.entries
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, code)| code.clone())
                .unwrap_or_default()
        } else {
            self.entries.get(name).cloned().unwrap_or_default()
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn locate_columns(header: &csv::StringRecord) -> Option<(usize, usize)> {
    let mut attachment_idx = None;
    let mut code_idx = None;
    for (idx, column) in header.iter().enumerate() {
        if column.eq_ignore_ascii_case(CODE_COLUMN) {
            code_idx.get_or_insert(idx);
        } else if column.eq_ignore_ascii_case(ATTACHMENT_COLUMN) {
            attachment_idx.get_or_insert(idx);
        }
    }
    Some((attachment_idx?, code_idx?))
}

/// Final path segment of an attachment reference, treating `/` and `\` as
/// separators regardless of the host platform.
pub fn canonical_file_name(reference: &str) -> &str {
    reference.rsplit(['/', '\\']).next().unwrap_or(reference)
}

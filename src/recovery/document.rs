use chrono::{DateTime, NaiveDateTime, Timelike, Utc};

/// Wire format of a document token inside a ledger line, and of the
/// timestamp within it: `2024-03-01 17:05:09Z|statement.pdf|0000000011`.
const TOKEN_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%SZ";

/// One recovered document. Equality and hashing are structural over the
/// three fields; nothing is derived from the rendered token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentRecord {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub code: String,
}

impl DocumentRecord {
    /// Builds a record with the code zero-left-padded to `padding` digits.
    /// Timestamps are truncated to whole seconds, matching what the token
    /// format can carry.
    pub fn new(
        name: impl Into<String>,
        created_at: DateTime<Utc>,
        code: &str,
        padding: usize,
    ) -> Self {
        Self {
            name: name.into(),
            created_at: truncate_to_seconds(created_at),
            code: pad_code(code, padding),
        }
    }

    pub fn render_token(&self) -> String {
        format!(
            "{}|{}|{}",
            self.created_at.format(TOKEN_TIME_FORMAT),
            self.name,
            self.code
        )
    }

    /// Parses one `timestamp|name|code` token. The code is kept exactly as
    /// written; a saved ledger already carries padded codes.
    pub fn parse_token(token: &str) -> Option<Self> {
        let mut pieces = token.split('|');
        let timestamp = pieces.next()?;
        let name = pieces.next()?;
        let code = pieces.next()?;
        if pieces.next().is_some() {
            return None;
        }

        let created_at = NaiveDateTime::parse_from_str(timestamp, TOKEN_TIME_FORMAT)
            .ok()?
            .and_utc();
        Some(Self {
            name: name.to_string(),
            created_at,
            code: code.to_string(),
        })
    }
}

pub fn pad_code(code: &str, padding: usize) -> String {
    format!("{code:0>padding$}")
}

fn truncate_to_seconds(value: DateTime<Utc>) -> DateTime<Utc> {
    value.with_nanosecond(0).unwrap_or(value)
}

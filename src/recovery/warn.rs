/// One structured warning line on stderr. Warnings cover conditions the run
/// survives (an archive vanishing between listing and download, a ledger
/// that fails to parse); hard failures go through the failure report instead.
#[derive(Debug, Clone, Copy)]
pub struct WarnEvent<'a> {
    pub code: &'a str,
    pub stage: &'a str,
    pub archive: &'a str,
    pub key: &'a str,
    pub err: &'a str,
}

fn sanitize_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut prev_sep = false;
    for ch in value.chars() {
        if ch.is_ascii_whitespace() {
            if !out.is_empty() && !prev_sep {
                out.push('_');
                prev_sep = true;
            }
        } else if ch.is_ascii_graphic() {
            out.push(ch);
            prev_sep = false;
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "na".to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn emit(event: WarnEvent<'_>) {
    eprintln!(
        "RESTAT_WARN code={} stage={} archive={} key={} err={}",
        sanitize_value(event.code),
        sanitize_value(event.stage),
        sanitize_value(event.archive),
        sanitize_value(event.key),
        sanitize_value(event.err),
    );
}

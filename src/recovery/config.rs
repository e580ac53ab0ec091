use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub pagination_size: usize,
    pub code_padding: usize,
    pub ignore_name_case: bool,
    pub worker_count: usize,
    pub temp_root: PathBuf,
    pub archive_prefix: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pagination_size: 100,
            code_padding: 10,
            ignore_name_case: false,
            worker_count: 8,
            temp_root: PathBuf::from("."),
            archive_prefix: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
    pub bucket: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecoveryConfig {
    pub pipeline: PipelineConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PartialRecoveryConfig {
    pipeline: Option<PipelineConfig>,
    store: Option<StoreConfig>,
}

fn env_or_usize(var: &str, fallback: usize) -> usize {
    match env::var(var) {
        Ok(v) => v.trim().parse::<usize>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_bool(var: &str, fallback: bool) -> bool {
    match env::var(var) {
        Ok(v) => match v.trim() {
            "1" | "true" | "TRUE" | "yes" | "on" => true,
            "0" | "false" | "FALSE" | "no" | "off" => false,
            _ => fallback,
        },
        Err(_) => fallback,
    }
}

fn env_or_string(var: &str, fallback: &str) -> String {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => fallback.to_string(),
    }
}

fn env_or_string_first(vars: &[&str], fallback: &str) -> String {
    for var in vars {
        if let Ok(v) = env::var(var) {
            let trimmed = v.trim();
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
        }
    }
    fallback.to_string()
}

fn missing_store_settings(store: &StoreConfig) -> Vec<&'static str> {
    let mut missing = Vec::new();
    if store.access_key_id.trim().is_empty() {
        missing.push("store.access_key_id");
    }
    if store.secret_access_key.trim().is_empty() {
        missing.push("store.secret_access_key");
    }
    if store.region.trim().is_empty() {
        missing.push("store.region");
    }
    if store.bucket.trim().is_empty() {
        missing.push("store.bucket");
    }
    missing
}

fn validate(cfg: &RecoveryConfig) -> Result<()> {
    if cfg.pipeline.pagination_size == 0 {
        return Err(anyhow!("invalid pagination size: must be >= 1"));
    }
    if cfg.pipeline.code_padding == 0 {
        return Err(anyhow!("invalid code padding width: must be >= 1"));
    }
    if cfg.pipeline.worker_count == 0 {
        return Err(anyhow!("invalid worker count: must be >= 1"));
    }

    let missing = missing_store_settings(&cfg.store);
    if !missing.is_empty() {
        return Err(anyhow!(
            "these settings must be defined before execution:\n\t{}\nset them in the config file, the environment, or a .env file",
            missing.join("\n\t")
        ));
    }
    Ok(())
}

fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(custom) = env::var("RESTAT_CONFIG_PATH") {
        let trimmed = custom.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }

    let home = dirs::home_dir()?;
    Some(home.join(".restat").join("restat.toml"))
}

fn merge_file_config(base: &mut RecoveryConfig) -> Result<()> {
    let Some(path) = resolve_config_path() else {
        return Ok(());
    };
    if !path.exists() {
        return Ok(());
    }

    let raw = fs::read_to_string(&path)?;
    let parsed: PartialRecoveryConfig = toml::from_str(&raw)
        .map_err(|err| anyhow!("failed to parse restat config {}: {err}", path.display()))?;
    if let Some(pipeline) = parsed.pipeline {
        base.pipeline = pipeline;
    }
    if let Some(store) = parsed.store {
        base.store = store;
    }
    Ok(())
}

pub fn load_config() -> Result<RecoveryConfig> {
    let mut cfg = RecoveryConfig::default();
    merge_file_config(&mut cfg)?;

    cfg.pipeline.pagination_size =
        env_or_usize("RESTAT_PAGINATION_SIZE", cfg.pipeline.pagination_size);
    cfg.pipeline.code_padding = env_or_usize("RESTAT_CODE_PADDING", cfg.pipeline.code_padding);
    cfg.pipeline.ignore_name_case =
        env_or_bool("RESTAT_IGNORE_NAME_CASE", cfg.pipeline.ignore_name_case);
    cfg.pipeline.worker_count = env_or_usize("RESTAT_WORKER_COUNT", cfg.pipeline.worker_count);
    cfg.pipeline.temp_root = PathBuf::from(env_or_string(
        "RESTAT_TEMP_ROOT",
        &cfg.pipeline.temp_root.to_string_lossy(),
    ));
    cfg.pipeline.archive_prefix =
        env_or_string("RESTAT_ARCHIVE_PREFIX", &cfg.pipeline.archive_prefix);

    cfg.store.access_key_id = env_or_string_first(
        &["RESTAT_ACCESS_KEY_ID", "AWS_ACCESS_KEY_ID"],
        &cfg.store.access_key_id,
    );
    cfg.store.secret_access_key = env_or_string_first(
        &["RESTAT_SECRET_ACCESS_KEY", "AWS_SECRET_ACCESS_KEY"],
        &cfg.store.secret_access_key,
    );
    cfg.store.region = env_or_string_first(
        &["RESTAT_BUCKET_REGION", "AWS_REGION"],
        &cfg.store.region,
    );
    cfg.store.bucket = env_or_string("RESTAT_BUCKET_NAME", &cfg.store.bucket);

    validate(&cfg)?;
    Ok(cfg)
}

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::action::{KeywordConfig, PaginationPolicy, QueryParamNames};
use crate::response::ContentType;

/// Default cache entry lifetime in seconds.
const DEFAULT_CACHE_TTL_SECS: u64 = 60;
/// Default upper bound on cached entries.
const DEFAULT_CACHE_MAX_KEYS: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheOptions {
    /// Cache reads unless an action says otherwise.
    pub enabled: bool,
    pub ttl_seconds: u64,
    pub max_keys: usize,
    /// Flush every section on any write instead of only the written one.
    pub invalidate_lists_on_write: bool,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl_seconds: DEFAULT_CACHE_TTL_SECS,
            max_keys: DEFAULT_CACHE_MAX_KEYS,
            invalidate_lists_on_write: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportOptions {
    /// Header selecting the output format.
    pub header: String,
    /// Formats honoured; anything else falls back to JSON.
    pub allowed: Vec<ContentType>,
    /// Nested-object levels flattened into columns.
    pub flatten_depth: usize,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            header: "x-content-type".to_string(),
            allowed: vec![ContentType::Json, ContentType::Csv, ContentType::Excel],
            flatten_depth: 1,
        }
    }
}

/// Defaults applied to every upload entry that does not override them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadDefaults {
    /// Storage backend used when an entry names none.
    pub storage: Option<String>,
    pub key_prefix: Option<String>,
    /// Remove the previous file when an update replaces it.
    pub delete_on_replace: bool,
    pub image_max_size_mb: Option<f64>,
    pub file_max_size_mb: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UpdateMethod {
    #[default]
    Patch,
    Put,
}

impl FromStr for UpdateMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PATCH" => Ok(Self::Patch),
            "PUT" => Ok(Self::Put),
            other => Err(format!("unknown update method '{other}'")),
        }
    }
}

/// Process-wide options, fixed once the registry is built.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleOptions {
    pub cache: CacheOptions,
    pub export: ExportOptions,
    pub uploads: UploadDefaults,
    pub params: QueryParamNames,
    pub pagination: PaginationPolicy,
    pub keyword: KeywordConfig,
    pub update_method: UpdateMethod,
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    if let Ok(value) = raw.trim().parse() {
        Some(value)
    } else {
        tracing::warn!(key = %key, value = %raw, "Ignoring unparsable environment value");
        None
    }
}

impl ModuleOptions {
    /// Load options from the environment (and a `.env` file, if present).
    ///
    /// | Env Var                           | Default                |
    /// |-----------------------------------|------------------------|
    /// | `CRUDMAN_CACHE_ENABLED`           | `false`                |
    /// | `CRUDMAN_CACHE_TTL_SECS`          | `60`                   |
    /// | `CRUDMAN_CACHE_MAX_KEYS`          | `1000`                 |
    /// | `CRUDMAN_CACHE_INVALIDATE_ALL`    | `false`                |
    /// | `CRUDMAN_EXPORT_TYPES`            | `json,csv,excel`       |
    /// | `CRUDMAN_CONTENT_TYPE_HEADER`     | `x-content-type`       |
    /// | `CRUDMAN_DEFAULT_PER_PAGE`        | `30`                   |
    /// | `CRUDMAN_MAX_PER_PAGE`            | --                     |
    /// | `CRUDMAN_UPLOAD_STORAGE`          | --                     |
    /// | `CRUDMAN_IMAGE_MAX_SIZE_MB`       | --                     |
    /// | `CRUDMAN_FILE_MAX_SIZE_MB`        | --                     |
    /// | `CRUDMAN_UPDATE_METHOD`           | `PATCH`                |
    ///
    /// Unparsable values are logged and replaced by the default.
    #[must_use]
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let mut options = Self::default();

        if let Some(enabled) = env_parse("CRUDMAN_CACHE_ENABLED") {
            options.cache.enabled = enabled;
        }
        if let Some(ttl) = env_parse("CRUDMAN_CACHE_TTL_SECS") {
            options.cache.ttl_seconds = ttl;
        }
        if let Some(max) = env_parse("CRUDMAN_CACHE_MAX_KEYS") {
            options.cache.max_keys = max;
        }
        if let Some(all) = env_parse("CRUDMAN_CACHE_INVALIDATE_ALL") {
            options.cache.invalidate_lists_on_write = all;
        }
        if let Ok(types) = std::env::var("CRUDMAN_EXPORT_TYPES") {
            options.export.allowed = types
                .split(',')
                .filter_map(|t| {
                    let parsed = ContentType::from_alias(t);
                    if parsed.is_none() {
                        tracing::warn!(content_type = %t, "Ignoring unknown export type");
                    }
                    parsed
                })
                .collect();
        }
        if let Ok(header) = std::env::var("CRUDMAN_CONTENT_TYPE_HEADER") {
            options.export.header = header.trim().to_ascii_lowercase();
        }
        if let Some(per_page) = env_parse("CRUDMAN_DEFAULT_PER_PAGE") {
            options.pagination.default_per_page = per_page;
        }
        options.pagination.max_per_page = env_parse("CRUDMAN_MAX_PER_PAGE");
        options.uploads.storage = std::env::var("CRUDMAN_UPLOAD_STORAGE").ok();
        options.uploads.image_max_size_mb = env_parse("CRUDMAN_IMAGE_MAX_SIZE_MB");
        options.uploads.file_max_size_mb = env_parse("CRUDMAN_FILE_MAX_SIZE_MB");
        if let Some(method) = env_parse("CRUDMAN_UPDATE_METHOD") {
            options.update_method = method;
        }

        options
    }
}

//! # Upload Pipeline
//!
//! Write actions may carry files, either as multipart parts or as `data:` URLs inside the JSON
//! body. Each declared [`UploadMapEntry`] runs through the same stages:
//!
//! 1. **detect**: expand shorthand declarations (`"image-avatar[]:base64"`) and merge limits,
//!    most specific first: entry > section default > global limit > type-hint preset.
//! 2. **collect**: gather files and decoded `data:` URLs for the source field. Fields with
//!    nothing incoming are skipped.
//! 3. **validate**: size, extension, MIME type and (for avatar hints) image dimensions. Every
//!    violation of every field is collected; any violation stops the action before anything is
//!    stored.
//! 4. **persist**: hand each file to its named [`FileStorage`] backend (filename mode only).
//! 5. **rewrite**: write keys, URLs, data URLs or raw bytes back into the body.
//!
//! ```rust,ignore
//! let uploads = UploadSpec::new()
//!     .field("logo", "image-avatar")
//!     .entry(UploadMapEntry::new("attachments").array().key_url(Some("attachment_keys"), None))
//!     .storage("local");
//! ```

mod avif;
pub mod presets;
pub mod storage;

pub use presets::{AVATAR, ImageRules, TypePreset};
pub use storage::{FileStorage, LocalDiskStorage, MemoryStorage, SaveInput, StoredFile};

use axum::body::Bytes;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::io::Cursor;
use std::str::FromStr;
use std::sync::Arc;

use crate::config::UploadDefaults;
use crate::errors::{CrudError, ErrorEntry, StorageError};
use crate::models::{UploadedFile, same_name};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// How an accepted file ends up in the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageMode {
    /// Stored through a backend; the body gets its URL (or key).
    #[default]
    Filename,
    /// Inlined as a `data:` URL string.
    Base64,
    /// Inlined as a byte array, with its MIME type in a sibling field.
    Blob,
}

impl FromStr for StorageMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "filename" | "file" => Ok(Self::Filename),
            "base64" => Ok(Self::Base64),
            "blob" => Ok(Self::Blob),
            other => Err(format!("unknown storage mode '{other}'")),
        }
    }
}

/// Body field(s) receiving the result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadTarget {
    /// One field. Blob mode also writes `<field>_mime`.
    Field(String),
    /// Separate key and URL fields. Array entries write parallel lists.
    KeyUrl { key: Option<String>, url: Option<String> },
    /// Explicit blob and MIME fields.
    Blob { blob: String, mime: String },
}

/// Size, type and image constraints. Unset values fall through to the next, less specific layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadLimits {
    pub max_size_mb: Option<f64>,
    pub extensions: Option<Vec<String>>,
    pub mime_types: Option<Vec<String>>,
    pub image: Option<ImageRules>,
}

impl UploadLimits {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn max_size_mb(mut self, max: f64) -> Self {
        self.max_size_mb = Some(max);
        self
    }

    #[must_use]
    pub fn extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions = Some(extensions.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn mime_types<I, S>(mut self, mime_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mime_types = Some(mime_types.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn image(mut self, rules: ImageRules) -> Self {
        self.image = Some(rules);
        self
    }

    /// Values set on `self` win.
    #[must_use]
    pub fn or(&self, fallback: &UploadLimits) -> UploadLimits {
        UploadLimits {
            max_size_mb: self.max_size_mb.or(fallback.max_size_mb),
            extensions: self.extensions.clone().or_else(|| fallback.extensions.clone()),
            mime_types: self.mime_types.clone().or_else(|| fallback.mime_types.clone()),
            image: self.image.or(fallback.image),
        }
    }

    fn from_preset(preset: &TypePreset) -> Self {
        let list = |items: &[&str]| {
            (!items.is_empty()).then(|| items.iter().map(|s| (*s).to_string()).collect())
        };
        Self {
            max_size_mb: preset.max_size_mb,
            extensions: list(preset.extensions),
            mime_types: list(preset.mime_types),
            image: preset.image,
        }
    }
}

/// How one request field becomes a stored file reference.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadMapEntry {
    pub source_field: String,
    pub target: UploadTarget,
    pub is_array: bool,
    pub mode: StorageMode,
    /// Storage backend name; falls back to the section, then the module default.
    pub storage: Option<String>,
    pub type_hint: Option<String>,
    pub limits: UploadLimits,
    pub key_prefix: Option<String>,
    pub delete_on_replace: Option<bool>,
}

impl UploadMapEntry {
    /// Entry writing back into its own field, filename mode, no limits.
    pub fn new(field: impl Into<String>) -> Self {
        let field = field.into();
        Self {
            target: UploadTarget::Field(field.clone()),
            source_field: field,
            is_array: false,
            mode: StorageMode::Filename,
            storage: None,
            type_hint: None,
            limits: UploadLimits::default(),
            key_prefix: None,
            delete_on_replace: None,
        }
    }

    /// Expand a `type[]:mode` declaration (`"image"`, `"video-mp4[]"`, `"pdf:base64"`).
    ///
    /// Unknown hints and modes are logged and ignored.
    pub fn shorthand(field: impl Into<String>, declaration: &str) -> Self {
        let field = field.into();
        let (hint, mode) = match declaration.split_once(':') {
            Some((hint, mode)) => (hint.trim(), Some(mode)),
            None => (declaration.trim(), None),
        };
        let (hint, is_array) = match hint.strip_suffix("[]") {
            Some(hint) => (hint, true),
            None => (hint, false),
        };

        let mut entry = Self::new(field);
        entry.is_array = is_array;
        if let Some(mode) = mode {
            match mode.parse() {
                Ok(mode) => entry.mode = mode,
                Err(err) => tracing::warn!(field = %entry.source_field, error = %err, "Using filename mode"),
            }
        }
        if !hint.is_empty() && hint != "any" {
            if presets::lookup(hint).is_none() {
                tracing::warn!(field = %entry.source_field, hint = %hint, "Unknown upload type hint");
            }
            entry.type_hint = Some(hint.to_ascii_lowercase());
        }
        entry
    }

    #[must_use]
    pub fn target(mut self, field: impl Into<String>) -> Self {
        self.target = UploadTarget::Field(field.into());
        self
    }

    #[must_use]
    pub fn key_url(mut self, key: Option<&str>, url: Option<&str>) -> Self {
        self.target = UploadTarget::KeyUrl {
            key: key.map(str::to_string),
            url: url.map(str::to_string),
        };
        self
    }

    #[must_use]
    pub fn blob(mut self, blob: impl Into<String>, mime: impl Into<String>) -> Self {
        self.target = UploadTarget::Blob {
            blob: blob.into(),
            mime: mime.into(),
        };
        self.mode = StorageMode::Blob;
        self
    }

    #[must_use]
    pub fn array(mut self) -> Self {
        self.is_array = true;
        self
    }

    #[must_use]
    pub fn mode(mut self, mode: StorageMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn storage(mut self, name: impl Into<String>) -> Self {
        self.storage = Some(name.into());
        self
    }

    #[must_use]
    pub fn type_hint(mut self, hint: impl Into<String>) -> Self {
        self.type_hint = Some(hint.into());
        self
    }

    #[must_use]
    pub fn limits(mut self, limits: UploadLimits) -> Self {
        self.limits = limits;
        self
    }

    #[must_use]
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    #[must_use]
    pub fn delete_on_replace(mut self, delete: bool) -> Self {
        self.delete_on_replace = Some(delete);
        self
    }

    /// Field receiving the key, URL, data URL or bytes.
    fn primary_field(&self) -> &str {
        match &self.target {
            UploadTarget::Field(field) => field,
            UploadTarget::KeyUrl { key, url } => key
                .as_deref()
                .or(url.as_deref())
                .unwrap_or(&self.source_field),
            UploadTarget::Blob { blob, .. } => blob,
        }
    }

    fn mime_field(&self) -> String {
        match &self.target {
            UploadTarget::Blob { mime, .. } => mime.clone(),
            _ => format!("{}_mime", self.primary_field()),
        }
    }

    /// Every body field this entry may write.
    #[must_use]
    pub fn target_fields(&self) -> Vec<String> {
        let mut fields = match (&self.target, self.mode) {
            (UploadTarget::KeyUrl { key, url }, StorageMode::Filename) => {
                key.iter().chain(url.iter()).cloned().collect()
            }
            (UploadTarget::Blob { blob, mime }, _) => vec![blob.clone(), mime.clone()],
            _ => vec![self.primary_field().to_string()],
        };
        if self.mode == StorageMode::Blob && !matches!(self.target, UploadTarget::Blob { .. }) {
            fields.push(self.mime_field());
        }
        fields
    }

    fn is_image_hint(&self) -> bool {
        self.type_hint.as_deref().is_some_and(|h| h.starts_with("image"))
    }
}

/// Upload declarations for one action.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadSpec {
    pub entries: Vec<UploadMapEntry>,
    /// Section-level limits applied under each entry's own.
    pub defaults: UploadLimits,
    /// Backend for entries naming none.
    pub storage: Option<String>,
}

impl UploadSpec {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn entry(mut self, entry: UploadMapEntry) -> Self {
        self.entries.push(entry);
        self
    }

    /// Shorthand declaration, see [`UploadMapEntry::shorthand`].
    #[must_use]
    pub fn field(self, field: impl Into<String>, declaration: &str) -> Self {
        self.entry(UploadMapEntry::shorthand(field, declaration))
    }

    #[must_use]
    pub fn defaults(mut self, limits: UploadLimits) -> Self {
        self.defaults = limits;
        self
    }

    #[must_use]
    pub fn storage(mut self, name: impl Into<String>) -> Self {
        self.storage = Some(name.into());
        self
    }

    #[must_use]
    pub fn target_fields(&self) -> Vec<String> {
        self.entries.iter().flat_map(UploadMapEntry::target_fields).collect()
    }

    /// Whether the stored record must be loaded so replaced files can be deleted.
    #[must_use]
    pub fn wants_previous(&self, defaults: &UploadDefaults) -> bool {
        self.entries.iter().any(|entry| {
            entry.mode == StorageMode::Filename
                && entry.delete_on_replace.unwrap_or(defaults.delete_on_replace)
        })
    }

    /// Bytes of file content one request may carry for these entries.
    ///
    /// `None` when an entry has no size cap or accepts a list of files.
    #[must_use]
    pub fn max_upload_bytes(&self, global: &UploadDefaults) -> Option<u64> {
        self.entries.iter().try_fold(0_u64, |total, entry| {
            if entry.is_array {
                return None;
            }
            let max_mb = self.limits_for(entry, global).max_size_mb?;
            Some(total.saturating_add(mb_to_bytes(max_mb)))
        })
    }

    /// Effective limits for an entry, most specific layer first.
    #[must_use]
    pub fn limits_for(&self, entry: &UploadMapEntry, global: &UploadDefaults) -> UploadLimits {
        let preset = entry
            .type_hint
            .as_deref()
            .and_then(presets::lookup)
            .map(UploadLimits::from_preset)
            .unwrap_or_default();
        let global = UploadLimits {
            max_size_mb: if entry.is_image_hint() {
                global.image_max_size_mb
            } else {
                global.file_max_size_mb
            },
            ..UploadLimits::default()
        };
        entry.limits.or(&self.defaults).or(&global).or(&preset)
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// Registered backends and module defaults available to the pipeline.
pub struct UploadEnv<'a> {
    pub storages: &'a BTreeMap<String, Arc<dyn FileStorage>>,
    pub defaults: &'a UploadDefaults,
    /// Stored record being replaced, when `delete_on_replace` applies.
    pub previous: Option<&'a Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UploadOutcome {
    /// Body rewritten with every stored reference.
    Applied(Map<String, Value>),
    /// Nothing was stored.
    Rejected(Vec<ErrorEntry>),
}

/// One incoming file, whatever its transport.
#[derive(Debug, Clone)]
struct Incoming {
    data: Bytes,
    mime: Option<String>,
    filename: Option<String>,
    extension: Option<String>,
}

impl Incoming {
    fn from_file(file: &UploadedFile) -> Self {
        Self {
            data: file.data.clone(),
            mime: Some(file.content_type.clone()).filter(|m| !m.is_empty()),
            extension: file.extension(),
            filename: Some(file.filename.clone()),
        }
    }

    fn label(&self) -> &str {
        self.filename.as_deref().unwrap_or("inline file")
    }

    fn data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.mime.as_deref().unwrap_or("application/octet-stream"),
            STANDARD.encode(&self.data)
        )
    }
}

/// `None` when the text is not a `data:` URL at all.
fn parse_data_url(text: &str) -> Option<Result<Incoming, String>> {
    let rest = text.trim().strip_prefix("data:")?;
    Some(decode_data_url(rest))
}

fn decode_data_url(rest: &str) -> Result<Incoming, String> {
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| "missing payload".to_string())?;
    let meta = meta
        .strip_suffix(";base64")
        .ok_or_else(|| "only base64 data URLs are accepted".to_string())?;
    let mime = meta
        .split(';')
        .next()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_ascii_lowercase);
    let data = STANDARD.decode(payload.trim()).map_err(|e| e.to_string())?;
    Ok(Incoming {
        extension: mime
            .as_deref()
            .and_then(presets::extension_for_mime)
            .map(str::to_string),
        data: Bytes::from(data),
        mime,
        filename: None,
    })
}

/// Files and decoded data URLs for one entry. Returns whether the body value was consumed.
fn collect(
    entry: &UploadMapEntry,
    files: &BTreeMap<String, Vec<UploadedFile>>,
    body: &Map<String, Value>,
    errors: &mut Vec<ErrorEntry>,
) -> (Vec<Incoming>, bool) {
    let field = &entry.source_field;
    let mut items: Vec<Incoming> = files
        .iter()
        .filter(|(name, _)| same_name(name, field))
        .flat_map(|(_, files)| files.iter().map(Incoming::from_file))
        .collect();

    let strings: Vec<&str> = match body.get(field) {
        Some(Value::String(text)) => vec![text.as_str()],
        Some(Value::Array(values)) => values.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    };
    let mut consumed = false;
    for text in strings {
        match parse_data_url(text) {
            Some(Ok(item)) => {
                items.push(item);
                consumed = true;
            }
            Some(Err(reason)) => {
                consumed = true;
                errors.push(ErrorEntry::for_field(
                    field.clone(),
                    "fileEncoding",
                    format!("Invalid data URL for '{field}': {reason}"),
                ));
            }
            None => {}
        }
    }

    if !entry.is_array && items.len() > 1 {
        tracing::debug!(field = %field, count = items.len(), "Single upload field received several files; keeping the first");
        items.truncate(1);
    }
    (items, consumed)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn mb_to_bytes(mb: f64) -> u64 {
    let bytes = (mb * BYTES_PER_MB).ceil();
    if bytes > 0.0 { bytes as u64 } else { 0 }
}

fn allowed_list(items: &[String]) -> String {
    items.join(", ")
}

#[allow(clippy::cast_precision_loss)]
fn check_item(field: &str, item: &Incoming, limits: &UploadLimits, errors: &mut Vec<ErrorEntry>) {
    let label = item.label();

    if let Some(max) = limits.max_size_mb {
        let size_mb = item.data.len() as f64 / BYTES_PER_MB;
        if size_mb > max {
            errors.push(ErrorEntry::for_field(
                field,
                "fileSize",
                format!("File too large: '{label}' is {size_mb:.2} MB, the limit is {max} MB"),
            ));
        }
    }

    if let Some(allowed) = &limits.extensions {
        let accepted = item
            .extension
            .as_deref()
            .is_some_and(|ext| allowed.iter().any(|a| a.trim_start_matches('.').eq_ignore_ascii_case(ext)));
        if !accepted {
            let ext = item.extension.as_deref().unwrap_or("");
            errors.push(ErrorEntry::for_field(
                field,
                "fileExtension",
                format!(
                    "Invalid extension '.{ext}' for '{field}'. Allowed: {}",
                    allowed_list(allowed)
                ),
            ));
        }
    }

    if let Some(allowed) = &limits.mime_types {
        let accepted = item
            .mime
            .as_deref()
            .is_some_and(|mime| allowed.iter().any(|a| a.eq_ignore_ascii_case(mime)));
        if !accepted {
            let mime = item.mime.as_deref().unwrap_or("unknown");
            errors.push(ErrorEntry::for_field(
                field,
                "fileMime",
                format!(
                    "Invalid MIME type '{mime}' for '{field}'. Allowed: {}",
                    allowed_list(allowed)
                ),
            ));
        }
    }

    if let Some(rules) = &limits.image {
        check_image(field, label, &item.data, rules, errors);
    }
}

/// Pixel size of an encoded image, when its format can be recognized.
fn image_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    image::ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .ok()
        .and_then(|reader| reader.into_dimensions().ok())
        .or_else(|| avif::dimensions(data))
}

fn check_image(field: &str, label: &str, data: &[u8], rules: &ImageRules, errors: &mut Vec<ErrorEntry>) {
    let Some((width, height)) = image_dimensions(data) else {
        errors.push(ErrorEntry::for_field(
            field,
            "imageDimensions",
            format!("Could not read image dimensions of '{label}'"),
        ));
        return;
    };
    let too_small = width < rules.min_width || height < rules.min_height;
    let too_large = width > rules.max_width || height > rules.max_height;
    if too_small || too_large {
        errors.push(ErrorEntry::for_field(
            field,
            "imageDimensions",
            format!(
                "Invalid image dimensions {width}x{height} for '{label}'. Expected between {}x{} and {}x{}",
                rules.min_width, rules.min_height, rules.max_width, rules.max_height
            ),
        ));
    }

    if let Some(expected) = rules.aspect_ratio
        && height > 0
    {
        let ratio = f64::from(width) / f64::from(height);
        if ((ratio - expected) / expected).abs() > rules.aspect_tolerance {
            errors.push(ErrorEntry::for_field(
                field,
                "imageAspectRatio",
                format!(
                    "Invalid aspect ratio {ratio:.2} for '{label}'. Expected {expected:.2} within {:.0}%",
                    rules.aspect_tolerance * 100.0
                ),
            ));
        }
    }
}

fn resolve_storage(
    entry: &UploadMapEntry,
    spec: &UploadSpec,
    env: &UploadEnv<'_>,
) -> Result<Arc<dyn FileStorage>, CrudError> {
    let name = entry
        .storage
        .as_deref()
        .or(spec.storage.as_deref())
        .or(env.defaults.storage.as_deref())
        .unwrap_or("default");
    env.storages
        .get(name)
        .cloned()
        .ok_or_else(|| CrudError::missing_storage(name))
}

fn pack(values: Vec<Value>, is_array: bool) -> Value {
    if is_array {
        Value::Array(values)
    } else {
        values.into_iter().next().unwrap_or(Value::Null)
    }
}

fn rewrite_stored(body: &mut Map<String, Value>, entry: &UploadMapEntry, stored: &[StoredFile]) {
    let keys = || stored.iter().map(|s| Value::from(s.key.clone())).collect::<Vec<_>>();
    let urls = || {
        stored
            .iter()
            .map(|s| s.url.clone().map_or(Value::Null, Value::from))
            .collect::<Vec<_>>()
    };
    match &entry.target {
        UploadTarget::KeyUrl { key, url } => {
            if let Some(key) = key {
                body.insert(key.clone(), pack(keys(), entry.is_array));
            }
            if let Some(url) = url {
                body.insert(url.clone(), pack(urls(), entry.is_array));
            }
        }
        _ => {
            let references = stored
                .iter()
                .map(|s| Value::from(s.url.clone().unwrap_or_else(|| s.key.clone())))
                .collect();
            body.insert(entry.primary_field().to_string(), pack(references, entry.is_array));
        }
    }
}

fn rewrite_inline(body: &mut Map<String, Value>, entry: &UploadMapEntry, items: &[Incoming]) {
    let field = entry.primary_field().to_string();
    match entry.mode {
        StorageMode::Base64 => {
            let urls = items.iter().map(|i| Value::from(i.data_url())).collect();
            body.insert(field, pack(urls, entry.is_array));
        }
        StorageMode::Blob => {
            let blobs = items
                .iter()
                .map(|i| Value::Array(i.data.iter().map(|b| Value::from(*b)).collect()))
                .collect();
            let mimes = items
                .iter()
                .map(|i| i.mime.clone().map_or(Value::Null, Value::from))
                .collect();
            body.insert(field, pack(blobs, entry.is_array));
            body.insert(entry.mime_field(), pack(mimes, entry.is_array));
        }
        StorageMode::Filename => {}
    }
}

/// Previous keys written by a filename-mode entry, for deletion after replacement.
fn previous_keys(entry: &UploadMapEntry, previous: &Value) -> Vec<String> {
    let field = match &entry.target {
        UploadTarget::KeyUrl { key: Some(key), .. } => key.as_str(),
        UploadTarget::KeyUrl { .. } => return Vec::new(),
        _ => entry.primary_field(),
    };
    let values = match previous.get(field) {
        Some(Value::String(key)) => vec![key.clone()],
        Some(Value::Array(keys)) => keys.iter().filter_map(Value::as_str).map(str::to_string).collect(),
        _ => Vec::new(),
    };
    // URLs cannot be mapped back to keys
    values.into_iter().filter(|k| !k.is_empty() && !k.contains("://")).collect()
}

async fn delete_replaced(storage: &dyn FileStorage, keys: Vec<String>) {
    for key in keys {
        match storage.delete(&key).await {
            Ok(()) => tracing::debug!(key = %key, "Deleted replaced upload"),
            Err(StorageError::Unsupported(_)) => {
                tracing::debug!(key = %key, "Storage backend cannot delete; keeping replaced upload");
            }
            Err(err) => tracing::warn!(key = %key, error = %err, "Failed to delete replaced upload"),
        }
    }
}

/// Run every upload entry against the request.
///
/// Missing storage backends fail the call. File problems come back as
/// [`UploadOutcome::Rejected`] with nothing stored.
pub async fn process(
    spec: &UploadSpec,
    files: &BTreeMap<String, Vec<UploadedFile>>,
    mut body: Map<String, Value>,
    env: &UploadEnv<'_>,
) -> Result<UploadOutcome, CrudError> {
    let mut errors = Vec::new();
    let mut batches = Vec::new();

    for entry in &spec.entries {
        let (items, consumed) = collect(entry, files, &body, &mut errors);
        if items.is_empty() {
            if consumed {
                body.remove(&entry.source_field);
            }
            continue;
        }
        let storage = match entry.mode {
            StorageMode::Filename => Some(resolve_storage(entry, spec, env)?),
            StorageMode::Base64 | StorageMode::Blob => None,
        };
        let limits = spec.limits_for(entry, env.defaults);
        for item in &items {
            check_item(&entry.source_field, item, &limits, &mut errors);
        }
        batches.push((entry, items, storage, consumed));
    }

    if !errors.is_empty() {
        tracing::debug!(count = errors.len(), "Upload validation failed; nothing stored");
        return Ok(UploadOutcome::Rejected(errors));
    }

    for (entry, items, storage, consumed) in batches {
        let targets = entry.target_fields();
        if consumed && !targets.contains(&entry.source_field) {
            body.remove(&entry.source_field);
        }

        let Some(storage) = storage else {
            rewrite_inline(&mut body, entry, &items);
            continue;
        };

        let mut stored = Vec::with_capacity(items.len());
        for item in items {
            stored.push(
                storage
                    .save(SaveInput {
                        data: item.data,
                        mime: item.mime,
                        filename: item.filename,
                        extension: item.extension,
                        key_prefix: entry.key_prefix.clone().or_else(|| env.defaults.key_prefix.clone()),
                    })
                    .await?,
            );
        }
        rewrite_stored(&mut body, entry, &stored);

        if entry.delete_on_replace.unwrap_or(env.defaults.delete_on_replace)
            && let Some(previous) = env.previous
        {
            delete_replaced(storage.as_ref(), previous_keys(entry, previous)).await;
        }
    }

    Ok(UploadOutcome::Applied(body))
}

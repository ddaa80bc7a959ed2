//! # Section Registry
//!
//! The registry is assembled once at startup and read-only afterwards. It owns the resource
//! sections, module options, the default validation engine, named upload storage backends,
//! the cache backend and an optional application state handed to hooks.
//!
//! ```rust,ignore
//! let registry = Registry::builder()
//!     .options(ModuleOptions::from_env())
//!     .storage("local", LocalDiskStorage::new("./uploads"))
//!     .section(companies)
//!     .build();
//!
//! for route in registry.routes() {
//!     println!("{} {} -> {}:{}", route.method, route.path, route.section, route.action);
//! }
//! ```

use axum::http::Method;
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::cache::{CacheBackend, MemoryCache};
use crate::config::{ActionKind, ModuleOptions, ResourceSection, UpdateMethod};
use crate::upload::FileStorage;
use crate::validation::{SchemaValidator, ValidationEngine};

/// Body allowance for requests without files, axum's own default.
const FORM_BODY_BYTES: u64 = 2 * 1024 * 1024;

/// One bound endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    pub method: Method,
    pub path: String,
    pub section: String,
    pub action: ActionKind,
}

pub struct Registry {
    sections: BTreeMap<String, ResourceSection>,
    options: ModuleOptions,
    validator: Arc<dyn ValidationEngine>,
    storages: BTreeMap<String, Arc<dyn FileStorage>>,
    cache: Arc<dyn CacheBackend>,
    state: Option<Arc<dyn Any + Send + Sync>>,
}

impl Registry {
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    #[must_use]
    pub fn section(&self, name: &str) -> Option<&ResourceSection> {
        self.sections.get(name)
    }

    pub fn sections(&self) -> impl Iterator<Item = &ResourceSection> {
        self.sections.values()
    }

    #[must_use]
    pub fn options(&self) -> &ModuleOptions {
        &self.options
    }

    /// The section's own engine, or the registry default.
    #[must_use]
    pub fn validator_for(&self, section: &ResourceSection) -> Arc<dyn ValidationEngine> {
        section
            .validator
            .clone()
            .unwrap_or_else(|| Arc::clone(&self.validator))
    }

    #[must_use]
    pub fn storages(&self) -> &BTreeMap<String, Arc<dyn FileStorage>> {
        &self.storages
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<dyn CacheBackend> {
        &self.cache
    }

    #[must_use]
    pub fn state(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.state.clone()
    }

    /// Largest request body the router accepts, in bytes; `None` lifts the limit.
    ///
    /// Room for the biggest upload set any write declares (a third more for base64 `data:` URLs)
    /// on top of the plain form allowance, so oversized files reach the upload checks.
    #[must_use]
    pub fn body_limit(&self) -> Option<usize> {
        let mut largest = 0_u64;
        for section in self.sections.values() {
            for action in ActionKind::ALL {
                if !action.accepts_input() || !section.is_enabled(action) {
                    continue;
                }
                if let Some(uploads) = section.action_config(action).uploads {
                    largest = largest.max(uploads.max_upload_bytes(&self.options.uploads)?);
                }
            }
        }
        let encoded = largest.saturating_add(largest.div_ceil(3));
        Some(usize::try_from(encoded.saturating_add(FORM_BODY_BYTES)).unwrap_or(usize::MAX))
    }

    /// Route table for every enabled action of every section.
    #[must_use]
    pub fn routes(&self) -> Vec<RouteEntry> {
        let update_method = match self.options.update_method {
            UpdateMethod::Patch => Method::PATCH,
            UpdateMethod::Put => Method::PUT,
        };
        let mut routes = Vec::new();
        for section in self.sections.values() {
            let collection = format!("/{}", section.name);
            let member = format!("/{}/{{{}}}", section.name, identity_field(section));
            for action in ActionKind::ALL {
                if !section.is_enabled(action) {
                    continue;
                }
                let (method, path) = match action {
                    ActionKind::List => (Method::GET, &collection),
                    ActionKind::Details => (Method::GET, &member),
                    ActionKind::Create => (Method::POST, &collection),
                    ActionKind::Update => (update_method.clone(), &member),
                    ActionKind::Save => (Method::PUT, &collection),
                    ActionKind::Delete => (Method::DELETE, &member),
                };
                routes.push(RouteEntry {
                    method,
                    path: path.clone(),
                    section: section.name.clone(),
                    action,
                });
            }
        }
        routes
    }
}

/// Identity field of a section: the adapter's, falling back to the schema's.
#[must_use]
pub fn identity_field(section: &ResourceSection) -> String {
    section.adapter.as_ref().map_or_else(
        || section.schema.identity_field.clone(),
        |adapter| adapter.identity_field().to_string(),
    )
}

#[derive(Default)]
pub struct RegistryBuilder {
    sections: BTreeMap<String, ResourceSection>,
    options: ModuleOptions,
    validator: Option<Arc<dyn ValidationEngine>>,
    storages: BTreeMap<String, Arc<dyn FileStorage>>,
    cache: Option<Arc<dyn CacheBackend>>,
    state: Option<Arc<dyn Any + Send + Sync>>,
}

impl RegistryBuilder {
    #[must_use]
    pub fn options(mut self, options: ModuleOptions) -> Self {
        self.options = options;
        self
    }

    /// Register a section. A later section with the same name replaces the earlier one.
    #[must_use]
    pub fn section(mut self, section: ResourceSection) -> Self {
        if self.sections.contains_key(&section.name) {
            tracing::warn!(section = %section.name, "Replacing previously registered section");
        }
        self.sections.insert(section.name.clone(), section);
        self
    }

    /// Default validation engine. [`SchemaValidator`] when unset.
    #[must_use]
    pub fn validator(mut self, validator: impl ValidationEngine + 'static) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    #[must_use]
    pub fn storage(mut self, name: impl Into<String>, storage: impl FileStorage + 'static) -> Self {
        self.storages.insert(name.into(), Arc::new(storage));
        self
    }

    #[must_use]
    pub fn shared_storage(mut self, name: impl Into<String>, storage: Arc<dyn FileStorage>) -> Self {
        self.storages.insert(name.into(), storage);
        self
    }

    /// Cache backend. An in-memory cache sized from the options when unset.
    #[must_use]
    pub fn cache(mut self, cache: Arc<dyn CacheBackend>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Application state exposed to hooks through [`HookContext::state`](crate::HookContext::state).
    #[must_use]
    pub fn state<T: Any + Send + Sync>(mut self, state: T) -> Self {
        self.state = Some(Arc::new(state));
        self
    }

    #[must_use]
    pub fn build(self) -> Registry {
        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(MemoryCache::new(self.options.cache.max_keys)));
        for section in self.sections.values() {
            if section.adapter.is_none() {
                tracing::warn!(section = %section.name, "Section registered without a storage adapter");
            }
        }
        tracing::debug!(
            sections = self.sections.len(),
            storages = self.storages.len(),
            "Built section registry"
        );
        Registry {
            sections: self.sections,
            options: self.options,
            validator: self.validator.unwrap_or_else(|| Arc::new(SchemaValidator::new())),
            storages: self.storages,
            cache,
            state: self.state,
        }
    }
}

//! # crudman
//!
//! Declarative CRUD endpoints for Axum. Each resource is a [`ResourceSection`]: a model schema,
//! a [`StorageAdapter`] and per-action settings. One [`CrudService`] then serves list, details,
//! create, update, save and delete for every section, with:
//!
//! - filtering, sorting, keyword search and pagination from query parameters
//! - validation rules generated from the schema, plus uniqueness checks
//! - multipart and data-URL uploads with size, type and image-dimension limits
//! - lifecycle hooks around every phase
//! - an optional response cache
//! - JSON, CSV and (with the `xlsx` feature) spreadsheet responses
//!
//! ```rust,ignore
//! let companies = ResourceSection::new("companies", ModelSchema::from_entity::<company::Entity>())
//!     .adapter(SeaOrmAdapter::<company::Entity, company::ActiveModel>::new(db.clone()))
//!     .action(ActionKind::Create, ActionConfig::new().unique(["name"], Combinator::Or));
//!
//! let registry = Registry::builder()
//!     .options(ModuleOptions::from_env())
//!     .section(companies)
//!     .build();
//!
//! let app = Router::new().nest("/api", crudman::router(Arc::new(CrudService::new(registry))));
//! ```

pub mod adapter;
pub mod cache;
pub mod config;
pub mod errors;
pub mod filtering;
pub mod hooks;
pub mod models;
pub mod registry;
pub mod response;
pub mod routes;
pub mod schema;
pub mod service;
pub mod upload;
pub mod validation;

pub use adapter::{ListPage, MemoryAdapter, SeaOrmAdapter, StorageAdapter};
pub use cache::{CacheBackend, MemoryCache};
pub use config::{
    ActionConfig, ActionKind, CachePolicy, KeywordConfig, ModuleOptions, PaginationPolicy,
    QueryParamNames, ResourceSection, UpdateMethod,
};
pub use errors::{CrudError, ErrorEntry, StorageError};
pub use filtering::{
    Combinator, FilterItem, FilterOperator, PaginationInfo, Predicate, QueryDescriptor, SortItem,
    SortOrder,
};
pub use hooks::{HookContext, HookFlow, Hooks};
pub use models::{CrudRequest, UploadedFile};
pub use registry::{Registry, RegistryBuilder, RouteEntry};
pub use response::{ContentType, Envelope, RenderedResponse};
pub use routes::router;
pub use schema::{FieldKind, FieldSpec, ModelSchema};
pub use service::{ActionOutcome, CapturedResponse, CrudService};
pub use upload::{FileStorage, LocalDiskStorage, MemoryStorage, UploadSpec};
pub use validation::{FieldRule, RuleSet, RuleType, SchemaValidator, ValidationEngine};
pub use serde_with;

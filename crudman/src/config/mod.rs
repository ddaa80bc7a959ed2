//! # Configuration
//!
//! Resource sections, per-action settings and process-wide options. Everything here is built
//! once at startup and read-only afterwards.

pub mod action;
pub mod options;
pub mod section;

pub use action::{
    ActionConfig, ActionKind, CachePolicy, KeywordConfig, OperatorNames, PaginationPolicy,
    QueryParamNames,
};
pub use options::{CacheOptions, ExportOptions, ModuleOptions, UpdateMethod, UploadDefaults};
pub use section::ResourceSection;

//! # Lifecycle Hooks
//!
//! Hooks are optional async callbacks stored on an [`ActionConfig`](crate::ActionConfig). Each
//! one takes ownership of the value it may rewrite and hands it back, so a hook can inspect,
//! replace or (where documented) stop the pipeline:
//!
//! | Hook                 | Receives            | Returns                          |
//! |----------------------|---------------------|----------------------------------|
//! | `before_action`      | request             | [`HookFlow`] of the request      |
//! | `final_rules`        | generated rules     | rules                            |
//! | `before_validate`    | body                | [`HookFlow`] of the body         |
//! | `after_validate`     | body                | [`HookFlow`] of the body         |
//! | `before_query`       | query descriptor    | descriptor                       |
//! | `after_fetch`        | fetched records     | records                          |
//! | `additional_response`| envelope (computed) | object merged into `meta`        |
//! | `after_action`       | envelope            | envelope                         |
//! | `get_relations`      | context             | relations to load                |
//! | `context`            | request             | extra values exposed to hooks    |
//!
//! An `Err` from any hook propagates unchanged to the caller.
//!
//! ```rust,ignore
//! let hooks = Hooks::new()
//!     .before_action(|ctx, request| async move {
//!         if ctx.state::<AppState>().is_some_and(|s| s.read_only) {
//!             return Ok(HookFlow::Reject(vec![ErrorEntry::message("read-only mode")]));
//!         }
//!         Ok(HookFlow::Proceed(request))
//!     })
//!     .after_fetch(|_ctx, mut rows| async move {
//!         rows.retain(|row| row["archived"] != true);
//!         Ok(rows)
//!     });
//! ```

use futures::future::BoxFuture;
use serde_json::{Map, Value};
use std::any::Any;
use std::future::Future;
use std::sync::Arc;

use crate::config::ActionKind;
use crate::errors::{CrudError, ErrorEntry};
use crate::filtering::QueryDescriptor;
use crate::models::CrudRequest;
use crate::response::Envelope;
use crate::schema::ModelSchema;
use crate::validation::RuleSet;

/// Outcome of a hook that may stop the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum HookFlow<T> {
    /// Continue with the (possibly rewritten) value.
    Proceed(T),
    /// Stop silently. The caller owns the response.
    Abort,
    /// Stop with a failure envelope carrying these errors.
    Reject(Vec<ErrorEntry>),
}

/// What hooks can see about the running action.
pub struct HookContext {
    pub section: String,
    pub action: ActionKind,
    pub schema: Arc<ModelSchema>,
    pub request: CrudRequest,
    /// Values produced by the `context` hook.
    pub extras: Map<String, Value>,
    state: Option<Arc<dyn Any + Send + Sync>>,
}

impl HookContext {
    pub fn new(
        section: impl Into<String>,
        action: ActionKind,
        schema: Arc<ModelSchema>,
        request: CrudRequest,
    ) -> Self {
        Self {
            section: section.into(),
            action,
            schema,
            request,
            extras: Map::new(),
            state: None,
        }
    }

    #[must_use]
    pub fn with_state(mut self, state: Option<Arc<dyn Any + Send + Sync>>) -> Self {
        self.state = state;
        self
    }

    #[must_use]
    pub fn with_extras(mut self, extras: Map<String, Value>) -> Self {
        self.extras = extras;
        self
    }

    /// Application state injected into the registry, if it has type `T`.
    #[must_use]
    pub fn state<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.state.as_deref()?.downcast_ref::<T>()
    }
}

pub type Ctx = Arc<HookContext>;
type HookResult<T> = BoxFuture<'static, Result<T, CrudError>>;

pub type BeforeActionHook = Arc<dyn Fn(Ctx, CrudRequest) -> HookResult<HookFlow<CrudRequest>> + Send + Sync>;
pub type AfterActionHook = Arc<dyn Fn(Ctx, Envelope) -> HookResult<Envelope> + Send + Sync>;
pub type BeforeQueryHook = Arc<dyn Fn(Ctx, QueryDescriptor) -> HookResult<QueryDescriptor> + Send + Sync>;
pub type AfterFetchHook = Arc<dyn Fn(Ctx, Vec<Value>) -> HookResult<Vec<Value>> + Send + Sync>;
pub type RulesHook = Arc<dyn Fn(Ctx, RuleSet) -> HookResult<RuleSet> + Send + Sync>;
pub type ValidateHook = Arc<dyn Fn(Ctx, Map<String, Value>) -> HookResult<HookFlow<Map<String, Value>>> + Send + Sync>;
pub type RelationsHook = Arc<dyn Fn(Ctx) -> HookResult<Vec<String>> + Send + Sync>;
pub type ContextHook = Arc<dyn Fn(CrudRequest) -> HookResult<Map<String, Value>> + Send + Sync>;
pub type MetaHook = Arc<dyn Fn(Ctx, Envelope) -> HookResult<Map<String, Value>> + Send + Sync>;
pub type CacheKeyFn = Arc<dyn Fn(&HookContext) -> String + Send + Sync>;

/// Extra response metadata, merged into the envelope's `meta`.
#[derive(Clone)]
pub enum AdditionalResponse {
    Static(Map<String, Value>),
    Computed(MetaHook),
}

impl AdditionalResponse {
    pub async fn resolve(&self, ctx: Ctx, envelope: &Envelope) -> Result<Map<String, Value>, CrudError> {
        match self {
            Self::Static(map) => Ok(map.clone()),
            Self::Computed(hook) => hook(ctx, envelope.clone()).await,
        }
    }
}

/// Optional lifecycle callbacks for one action.
#[derive(Clone, Default)]
pub struct Hooks {
    pub before_action: Option<BeforeActionHook>,
    pub after_action: Option<AfterActionHook>,
    pub before_query: Option<BeforeQueryHook>,
    pub after_fetch: Option<AfterFetchHook>,
    pub final_rules: Option<RulesHook>,
    pub before_validate: Option<ValidateHook>,
    pub after_validate: Option<ValidateHook>,
    pub additional_response: Option<AdditionalResponse>,
    pub get_relations: Option<RelationsHook>,
    pub context: Option<ContextHook>,
    pub cache_key: Option<CacheKeyFn>,
}

macro_rules! hook_setter {
    ($(#[$doc:meta])* $name:ident, ($($arg:ident: $ty:ty),*) -> $out:ty) => {
        $(#[$doc])*
        #[must_use]
        pub fn $name<F, Fut>(mut self, hook: F) -> Self
        where
            F: Fn($($ty),*) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = Result<$out, CrudError>> + Send + 'static,
        {
            self.$name = Some(Arc::new(move |$($arg: $ty),*| -> HookResult<$out> {
                Box::pin(hook($($arg),*))
            }));
            self
        }
    };
}

impl Hooks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    hook_setter!(
        /// Runs before anything else touches the request. `Abort` stops silently.
        before_action, (ctx: Ctx, request: CrudRequest) -> HookFlow<CrudRequest>
    );
    hook_setter!(
        /// Last chance to rewrite the envelope before rendering.
        after_action, (ctx: Ctx, envelope: Envelope) -> Envelope
    );
    hook_setter!(before_query, (ctx: Ctx, descriptor: QueryDescriptor) -> QueryDescriptor);
    hook_setter!(after_fetch, (ctx: Ctx, records: Vec<Value>) -> Vec<Value>);
    hook_setter!(final_rules, (ctx: Ctx, rules: RuleSet) -> RuleSet);
    hook_setter!(before_validate, (ctx: Ctx, body: Map<String, Value>) -> HookFlow<Map<String, Value>>);
    hook_setter!(after_validate, (ctx: Ctx, body: Map<String, Value>) -> HookFlow<Map<String, Value>>);
    hook_setter!(get_relations, (ctx: Ctx) -> Vec<String>);
    hook_setter!(context, (request: CrudRequest) -> Map<String, Value>);

    #[must_use]
    pub fn static_meta(mut self, meta: Map<String, Value>) -> Self {
        self.additional_response = Some(AdditionalResponse::Static(meta));
        self
    }

    #[must_use]
    pub fn computed_meta<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Ctx, Envelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Map<String, Value>, CrudError>> + Send + 'static,
    {
        let hook: MetaHook = Arc::new(move |ctx: Ctx, envelope: Envelope| -> HookResult<Map<String, Value>> {
            Box::pin(hook(ctx, envelope))
        });
        self.additional_response = Some(AdditionalResponse::Computed(hook));
        self
    }

    #[must_use]
    pub fn cache_key<F>(mut self, key: F) -> Self
    where
        F: Fn(&HookContext) -> String + Send + Sync + 'static,
    {
        self.cache_key = Some(Arc::new(key));
        self
    }

    /// Hooks set on `self` win over those on `base`.
    #[must_use]
    pub fn merged_over(&self, base: &Hooks) -> Hooks {
        Hooks {
            before_action: self.before_action.clone().or_else(|| base.before_action.clone()),
            after_action: self.after_action.clone().or_else(|| base.after_action.clone()),
            before_query: self.before_query.clone().or_else(|| base.before_query.clone()),
            after_fetch: self.after_fetch.clone().or_else(|| base.after_fetch.clone()),
            final_rules: self.final_rules.clone().or_else(|| base.final_rules.clone()),
            before_validate: self.before_validate.clone().or_else(|| base.before_validate.clone()),
            after_validate: self.after_validate.clone().or_else(|| base.after_validate.clone()),
            additional_response: self
                .additional_response
                .clone()
                .or_else(|| base.additional_response.clone()),
            get_relations: self.get_relations.clone().or_else(|| base.get_relations.clone()),
            context: self.context.clone().or_else(|| base.context.clone()),
            cache_key: self.cache_key.clone().or_else(|| base.cache_key.clone()),
        }
    }
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("before_action", &self.before_action.is_some())
            .field("after_action", &self.after_action.is_some())
            .field("before_query", &self.before_query.is_some())
            .field("after_fetch", &self.after_fetch.is_some())
            .field("final_rules", &self.final_rules.is_some())
            .field("before_validate", &self.before_validate.is_some())
            .field("after_validate", &self.after_validate.is_some())
            .field("additional_response", &self.additional_response.is_some())
            .field("get_relations", &self.get_relations.is_some())
            .field("context", &self.context.is_some())
            .field("cache_key", &self.cache_key.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> Ctx {
        Arc::new(HookContext::new(
            "companies",
            ActionKind::List,
            Arc::new(ModelSchema::new("companies")),
            CrudRequest::new(),
        ))
    }

    #[tokio::test]
    async fn test_hook_setters_wrap_async_closures() {
        let hooks = Hooks::new().after_fetch(|_ctx, mut rows: Vec<Value>| async move {
            rows.push(json!({ "id": 99 }));
            Ok(rows)
        });
        let hook = hooks.after_fetch.unwrap();
        let rows = hook(ctx(), vec![]).await.unwrap();
        assert_eq!(rows, vec![json!({ "id": 99 })]);
    }

    #[tokio::test]
    async fn test_merge_prefers_action_hooks() {
        let base = Hooks::new()
            .get_relations(|_ctx| async { Ok(vec!["base".to_string()]) })
            .static_meta(Map::new());
        let action = Hooks::new().get_relations(|_ctx| async { Ok(vec!["action".to_string()]) });

        let merged = action.merged_over(&base);
        let relations = (merged.get_relations.unwrap())(ctx()).await.unwrap();
        assert_eq!(relations, vec!["action"]);
        assert!(merged.additional_response.is_some());
    }

    #[test]
    fn test_state_downcast() {
        struct AppState {
            tenant: u32,
        }
        let state: Arc<dyn Any + Send + Sync> = Arc::new(AppState { tenant: 4 });
        let ctx = HookContext::new(
            "companies",
            ActionKind::Create,
            Arc::new(ModelSchema::new("companies")),
            CrudRequest::new(),
        )
        .with_state(Some(state));
        assert_eq!(ctx.state::<AppState>().map(|s| s.tenant), Some(4));
        assert!(ctx.state::<String>().is_none());
    }

    #[tokio::test]
    async fn test_additional_response_static_and_computed() {
        let mut meta = Map::new();
        meta.insert("version".to_string(), json!(2));
        let envelope = Envelope::single(json!({ "id": 1 }));

        let resolved = AdditionalResponse::Static(meta.clone())
            .resolve(ctx(), &envelope)
            .await
            .unwrap();
        assert_eq!(resolved, meta);

        let hooks = Hooks::new().computed_meta(|_ctx, envelope: Envelope| async move {
            let mut meta = Map::new();
            meta.insert("ok".to_string(), json!(envelope.success));
            Ok(meta)
        });
        let resolved = hooks
            .additional_response
            .unwrap()
            .resolve(ctx(), &envelope)
            .await
            .unwrap();
        assert_eq!(resolved["ok"], json!(true));
    }
}

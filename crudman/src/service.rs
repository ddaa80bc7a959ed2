//! # Action Orchestration
//!
//! [`CrudService`] runs the same ordered pipeline for every section and action:
//!
//! 1. **uploads** (create, update, save): files are checked and stored, the body rewritten
//! 2. **validation** (create, update, save): generated rules, `final_rules`, `before_validate`,
//!    the engine, `after_validate`, then uniqueness
//! 3. **`before_action`**: may rewrite the request, reject it, or abort silently
//! 4. **cache lookup** (list, details)
//! 5. **query**: translation, `before_query`, the adapter call, `after_fetch`
//! 6. **invalidation** (writes)
//! 7. **assembly**: envelope, `additional_response` merged into `meta`, `after_action`
//! 8. **cache write** (list, details)
//!
//! The first phase producing errors ends the pipeline with a failure envelope. Hook errors
//! propagate unchanged.

use axum::http::{HeaderMap, StatusCode};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::adapter::{StorageAdapter, loose_eq};
use crate::cache::{cache_key, section_prefix};
use crate::config::{ActionConfig, ActionKind, CachePolicy, QueryParamNames, ResourceSection};
use crate::errors::{CrudError, ErrorEntry};
use crate::filtering::{QueryDescriptor, TranslateOptions, Whitelist, build_info, translate};
use crate::hooks::{Ctx, HookContext, HookFlow};
use crate::models::{CrudRequest, same_name};
use crate::registry::{Registry, identity_field};
use crate::response::{ContentType, Envelope, RenderedResponse, negotiate, render};
use crate::upload::{self, UploadEnv, UploadOutcome};
use crate::validation::{FieldRule, RuleSet, RuleType};

/// Result of running an action.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    /// A hook aborted the action and owns the response.
    Handled,
    Completed(Envelope),
}

/// A response captured as data instead of being sent.
#[derive(Debug, Clone)]
pub struct CapturedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub content_type: ContentType,
    /// Parsed JSON body, the text of a CSV body, or null for binary and empty bodies.
    pub data: Value,
    pub body: Vec<u8>,
}

impl CapturedResponse {
    fn from_rendered(rendered: RenderedResponse) -> Self {
        let data = match rendered.content_type {
            ContentType::Json => serde_json::from_slice(&rendered.body).unwrap_or(Value::Null),
            ContentType::Csv => Value::String(String::from_utf8_lossy(&rendered.body).into_owned()),
            ContentType::Excel => Value::Null,
        };
        Self {
            status: rendered.status,
            headers: rendered.headers,
            content_type: rendered.content_type,
            data,
            body: rendered.body,
        }
    }

    fn handled() -> Self {
        Self {
            status: StatusCode::NO_CONTENT,
            headers: HeaderMap::new(),
            content_type: ContentType::Json,
            data: Value::Null,
            body: Vec::new(),
        }
    }
}

/// Per-request view of one section's action.
struct ActionRun<'a> {
    section: &'a ResourceSection,
    action: ActionKind,
    config: ActionConfig,
    adapter: Arc<dyn StorageAdapter>,
    identity: String,
    extras: Map<String, Value>,
}

impl ActionRun<'_> {
    fn names<'n>(&'n self, registry: &'n Registry) -> &'n QueryParamNames {
        self.config.params.as_ref().unwrap_or(&registry.options().params)
    }
}

pub struct CrudService {
    registry: Arc<Registry>,
}

impl CrudService {
    #[must_use]
    pub fn new(registry: Registry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    #[must_use]
    pub fn from_shared(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    // ============================================================================
    // Entry points
    // ============================================================================

    /// Run an action and render its envelope. `None` when a hook aborted.
    ///
    /// Reads are rendered in the negotiated format; writes always answer JSON.
    pub async fn respond(
        &self,
        section: &str,
        action: ActionKind,
        request: CrudRequest,
    ) -> Result<Option<RenderedResponse>, CrudError> {
        let content_type = if action.is_read() {
            let names = self
                .registry
                .section(section)
                .and_then(|s| s.action_config(action).params)
                .unwrap_or_else(|| self.registry.options().params.clone());
            negotiate(&request, &self.registry.options().export, &names)
        } else {
            ContentType::Json
        };
        let depth = self.registry.options().export.flatten_depth;

        Ok(match self.execute(section, action, request).await? {
            ActionOutcome::Handled => None,
            ActionOutcome::Completed(envelope) => Some(render(&envelope, content_type, depth)),
        })
    }

    /// Run an action and capture what would have been sent. Raised errors become failure
    /// envelopes with their status.
    pub async fn call_action(&self, section: &str, action: ActionKind, request: CrudRequest) -> CapturedResponse {
        match self.respond(section, action, request).await {
            Ok(Some(rendered)) => CapturedResponse::from_rendered(rendered),
            Ok(None) => CapturedResponse::handled(),
            Err(err) => {
                err.log_internal();
                CapturedResponse::from_rendered(RenderedResponse::json(err.status_code(), &err.to_envelope()))
            }
        }
    }

    /// Run the full pipeline for one action.
    pub async fn execute(
        &self,
        section_name: &str,
        action: ActionKind,
        request: CrudRequest,
    ) -> Result<ActionOutcome, CrudError> {
        let section = self
            .registry
            .section(section_name)
            .ok_or_else(|| CrudError::section_not_found(section_name))?;
        if !section.is_enabled(action) {
            return Err(CrudError::ActionDisabled {
                section: section.name.clone(),
                action: action.to_string(),
            });
        }
        let adapter = section
            .adapter
            .clone()
            .ok_or_else(|| CrudError::repository_unavailable(&section.name))?;
        let config = section.action_config(action);
        let extras = match &config.hooks.context {
            Some(hook) => hook(request.clone()).await?,
            None => Map::new(),
        };
        let run = ActionRun {
            section,
            action,
            identity: identity_field(section),
            config,
            adapter,
            extras,
        };
        tracing::debug!(section = %section.name, action = %action, "Running action");

        let mut request = request;
        if action.accepts_input() {
            match self.prepare_input(&run, request).await? {
                Ok(prepared) => request = prepared,
                Err(outcome) => return Ok(outcome),
            }
        }

        if let Some(hook) = &run.config.hooks.before_action {
            match hook(self.context(&run, &request), request).await? {
                HookFlow::Proceed(next) => request = next,
                HookFlow::Abort => {
                    tracing::debug!(section = %section.name, action = %action, "Action aborted by before_action");
                    return Ok(ActionOutcome::Handled);
                }
                HookFlow::Reject(errors) => return Ok(ActionOutcome::Completed(Envelope::failure(errors))),
            }
        }

        let cache_key = self.cache_key_for(&run, &request).await?;
        if let Some(key) = &cache_key
            && let Some(hit) = self.registry.cache().get(key).await
        {
            tracing::debug!(section = %section.name, action = %action, "Cache hit");
            return Ok(ActionOutcome::Completed(hit));
        }

        let envelope = match action {
            ActionKind::List => self.list(&run, &request).await?,
            ActionKind::Details => self.details(&run, &request).await?,
            ActionKind::Create => Envelope::single(run.adapter.create(request.body.clone()).await?),
            ActionKind::Update => self.update(&run, &request).await?,
            ActionKind::Save => match run.adapter.save(&request.params, request.body.clone()).await? {
                Some(saved) => Envelope::single(saved),
                None => Envelope::not_found(),
            },
            ActionKind::Delete => self.delete(&run, &request).await?,
        };

        if action.is_write() && envelope.success {
            self.invalidate(&section.name).await;
        }

        let envelope = self.assemble(&run, &request, envelope).await?;

        if let Some(key) = cache_key
            && envelope.success
        {
            let ttl = self.cache_policy(&run).ttl_seconds.unwrap_or(self.registry.options().cache.ttl_seconds);
            self.registry.cache().set(&key, envelope.clone(), Duration::from_secs(ttl)).await;
        }

        Ok(ActionOutcome::Completed(envelope))
    }

    // ============================================================================
    // Phases
    // ============================================================================

    fn context(&self, run: &ActionRun<'_>, request: &CrudRequest) -> Ctx {
        Arc::new(
            HookContext::new(
                run.section.name.clone(),
                run.action,
                Arc::clone(&run.section.schema),
                request.clone(),
            )
            .with_state(self.registry.state())
            .with_extras(run.extras.clone()),
        )
    }

    /// Uploads, normalization, validation and uniqueness. `Err` carries the terminal outcome.
    async fn prepare_input(
        &self,
        run: &ActionRun<'_>,
        mut request: CrudRequest,
    ) -> Result<Result<CrudRequest, ActionOutcome>, CrudError> {
        let identity = request.identity(&run.identity);
        let is_update = match run.action {
            ActionKind::Update => true,
            ActionKind::Save => identity.is_some(),
            _ => false,
        };

        if let Some(spec) = &run.config.uploads {
            let defaults = &self.registry.options().uploads;
            let previous = match &identity {
                Some(id) if is_update && spec.wants_previous(defaults) => {
                    run.adapter.details(id, &QueryDescriptor::default()).await?
                }
                _ => None,
            };
            let env = UploadEnv {
                storages: self.registry.storages(),
                defaults,
                previous: previous.as_ref(),
            };
            let body = std::mem::take(&mut request.body);
            match upload::process(spec, &request.files, body, &env).await? {
                UploadOutcome::Applied(body) => request.body = body,
                UploadOutcome::Rejected(errors) => {
                    return Ok(Err(ActionOutcome::Completed(Envelope::failure(errors))));
                }
            }
        }

        request.body = run.adapter.normalize_input(std::mem::take(&mut request.body));

        if let Err(outcome) = self.validate(run, &mut request, is_update).await? {
            return Ok(Err(outcome));
        }

        let errors = self.check_uniqueness(run, &request.body, identity.as_ref().filter(|_| is_update)).await?;
        if !errors.is_empty() {
            return Ok(Err(ActionOutcome::Completed(Envelope::failure(errors))));
        }
        Ok(Ok(request))
    }

    async fn validate(
        &self,
        run: &ActionRun<'_>,
        request: &mut CrudRequest,
        is_update: bool,
    ) -> Result<Result<(), ActionOutcome>, CrudError> {
        let engine = self.registry.validator_for(run.section);
        let mut rules = engine.generate_rules(&run.section.schema, is_update).await;
        if let Some(spec) = &run.config.uploads {
            rules = with_upload_targets(rules, &spec.target_fields());
        }
        let hooks = &run.config.hooks;
        if let Some(hook) = &hooks.final_rules {
            rules = hook(self.context(run, request), rules).await?;
        }

        if let Some(hook) = &hooks.before_validate {
            let body = std::mem::take(&mut request.body);
            match hook(self.context(run, request), body).await? {
                HookFlow::Proceed(body) => request.body = body,
                HookFlow::Abort => {
                    return Ok(Err(ActionOutcome::Completed(Envelope::failure(vec![ErrorEntry::message(
                        "Validation stopped by before_validate",
                    )]))));
                }
                HookFlow::Reject(errors) => return Ok(Err(ActionOutcome::Completed(Envelope::failure(errors)))),
            }
        }

        let input = self.validation_input(run, request);
        if let Err(errors) = engine.validate(&input, &rules).await {
            tracing::debug!(section = %run.section.name, errors = errors.len(), "Validation failed");
            return Ok(Err(ActionOutcome::Completed(Envelope::failure(errors))));
        }

        if let Some(hook) = &hooks.after_validate {
            let body = std::mem::take(&mut request.body);
            match hook(self.context(run, request), body).await? {
                HookFlow::Proceed(body) => request.body = body,
                HookFlow::Abort => {
                    return Ok(Err(ActionOutcome::Completed(Envelope::failure(vec![ErrorEntry::message(
                        "Validation stopped by after_validate",
                    )]))));
                }
                HookFlow::Reject(errors) => return Ok(Err(ActionOutcome::Completed(Envelope::failure(errors)))),
            }
        }
        Ok(Ok(()))
    }

    /// Body overlaid with path parameters, which win on conflict. The identity parameter is
    /// left out; the lookup checks it.
    fn validation_input(&self, run: &ActionRun<'_>, request: &CrudRequest) -> Map<String, Value> {
        let params: Map<String, Value> = request
            .params
            .iter()
            .filter(|(key, _)| !same_name(key, &run.identity))
            .map(|(key, value)| (key.clone(), Value::String(value.clone())))
            .collect();
        let mut input = request.body.clone();
        input.extend(run.adapter.normalize_input(params));
        input
    }

    async fn check_uniqueness(
        &self,
        run: &ActionRun<'_>,
        body: &Map<String, Value>,
        exclude: Option<&Value>,
    ) -> Result<Vec<ErrorEntry>, CrudError> {
        let Some(fields) = run.config.unique_fields.as_deref().filter(|f| !f.is_empty()) else {
            return Ok(Vec::new());
        };
        let combinator = run.config.unique_combinator.unwrap_or_default();
        let Some(predicate) = run.adapter.build_uniqueness_predicate(exclude, fields, body, combinator) else {
            return Ok(Vec::new());
        };
        let Some(existing) = run.adapter.find_one(&predicate).await? else {
            return Ok(Vec::new());
        };

        let mut errors: Vec<ErrorEntry> = fields
            .iter()
            .filter(|field| match (body.get(*field), existing.get(*field)) {
                (Some(new), Some(old)) => !new.is_null() && loose_eq(new, old),
                _ => false,
            })
            .map(|field| unique_error(field))
            .collect();
        if errors.is_empty() {
            errors.push(unique_error(&fields.join(", ")));
        }
        tracing::debug!(section = %run.section.name, conflicts = errors.len(), "Uniqueness check failed");
        Ok(errors)
    }

    fn cache_policy(&self, run: &ActionRun<'_>) -> CachePolicy {
        run.config.cache.unwrap_or(CachePolicy {
            enabled: self.registry.options().cache.enabled,
            ttl_seconds: None,
        })
    }

    async fn cache_key_for(&self, run: &ActionRun<'_>, request: &CrudRequest) -> Result<Option<String>, CrudError> {
        if !run.action.is_read() || !self.cache_policy(run).enabled {
            return Ok(None);
        }
        if let Some(key_fn) = &run.config.hooks.cache_key {
            let ctx = self.context(run, request);
            return Ok(Some(format!("{}{}", section_prefix(&run.section.name), key_fn(ctx.as_ref()))));
        }
        let relations = self.relations(run, request).await?;
        Ok(Some(cache_key(
            &run.section.name,
            run.action,
            &request.params,
            &request.query,
            &request.body,
            &relations,
        )))
    }

    async fn relations(&self, run: &ActionRun<'_>, request: &CrudRequest) -> Result<Vec<String>, CrudError> {
        match &run.config.hooks.get_relations {
            Some(hook) => hook(self.context(run, request)).await,
            None => Ok(run.config.relations.clone().unwrap_or_default()),
        }
    }

    async fn list(&self, run: &ActionRun<'_>, request: &CrudRequest) -> Result<Envelope, CrudError> {
        let options = self.registry.options();
        let schema = &run.section.schema;
        let whitelist = Whitelist::new(
            run.config
                .whitelist
                .clone()
                .filter(|w| !w.is_empty())
                .unwrap_or_else(|| schema.column_names()),
        );
        let relations = self.relations(run, request).await?;
        let searchable = schema.textual_fields();
        let default_order = run.config.order_by.clone().unwrap_or_default();
        let translate_options = TranslateOptions {
            whitelist: &whitelist,
            names: run.names(&self.registry),
            pagination: run.config.pagination.as_ref().unwrap_or(&options.pagination),
            keyword: run.config.keyword.as_ref().unwrap_or(&options.keyword),
            searchable_fields: &searchable,
            base_filter: run.config.base_filter.as_ref(),
            default_order: &default_order,
            relations: &relations,
            attributes: run.config.attributes.as_deref(),
        };

        let mut descriptor = translate(&request.query, &translate_options);
        if let Some(hook) = &run.config.hooks.before_query {
            descriptor = hook(self.context(run, request), descriptor).await?;
        }

        let page = run.adapter.list(&descriptor).await?;
        let mut items = page.items;
        if let Some(hook) = &run.config.hooks.after_fetch {
            items = hook(self.context(run, request), items).await?;
        }

        let pagination = build_info(&descriptor.page, page.total, items.len());
        Ok(Envelope::list(items, pagination, descriptor.filters, descriptor.sorting))
    }

    async fn details(&self, run: &ActionRun<'_>, request: &CrudRequest) -> Result<Envelope, CrudError> {
        let Some(id) = request.identity(&run.identity) else {
            return Ok(missing_identity(&run.identity));
        };
        let relations = self.relations(run, request).await?;
        let mut descriptor = QueryDescriptor::for_record(&relations, run.config.attributes.as_deref());
        if let Some(hook) = &run.config.hooks.before_query {
            descriptor = hook(self.context(run, request), descriptor).await?;
        }

        let Some(record) = run.adapter.details(&id, &descriptor).await? else {
            tracing::debug!(section = %run.section.name, id = %id, "Record not found");
            return Ok(Envelope::not_found());
        };
        let record = match &run.config.hooks.after_fetch {
            Some(hook) => hook(self.context(run, request), vec![record]).await?.into_iter().next(),
            None => Some(record),
        };
        Ok(record.map_or_else(Envelope::not_found, Envelope::single))
    }

    async fn update(&self, run: &ActionRun<'_>, request: &CrudRequest) -> Result<Envelope, CrudError> {
        let Some(id) = request.identity(&run.identity) else {
            return Ok(missing_identity(&run.identity));
        };
        Ok(match run.adapter.update(&id, request.body.clone()).await? {
            Some(updated) => Envelope::single(updated),
            None => Envelope::not_found(),
        })
    }

    async fn delete(&self, run: &ActionRun<'_>, request: &CrudRequest) -> Result<Envelope, CrudError> {
        let Some(id) = request.identity(&run.identity) else {
            return Ok(missing_identity(&run.identity));
        };
        if run.adapter.delete(&id).await? == 0 {
            tracing::debug!(section = %run.section.name, id = %id, "Nothing to delete");
            return Ok(Envelope::not_found());
        }
        Ok(Envelope::message("Successfully deleted"))
    }

    async fn invalidate(&self, section: &str) {
        let cache = self.registry.cache();
        if self.registry.options().cache.invalidate_lists_on_write {
            cache.flush().await;
        } else {
            cache.invalidate_prefix(&section_prefix(section)).await;
        }
    }

    async fn assemble(
        &self,
        run: &ActionRun<'_>,
        request: &CrudRequest,
        mut envelope: Envelope,
    ) -> Result<Envelope, CrudError> {
        let hooks = &run.config.hooks;
        if let Some(extra) = &hooks.additional_response {
            let meta = extra.resolve(self.context(run, request), &envelope).await?;
            envelope.merge_meta(meta);
        }
        if let Some(hook) = &hooks.after_action {
            envelope = hook(self.context(run, request), envelope).await?;
        }
        Ok(envelope)
    }
}

fn unique_error(field: &str) -> ErrorEntry {
    ErrorEntry::for_field(field, "unique", format!("The '{field}' value already exists"))
}

fn missing_identity(field: &str) -> Envelope {
    Envelope::failure(vec![ErrorEntry::for_field(
        field,
        "required",
        format!("The '{field}' field is required."),
    )])
}

/// Upload targets may be written by the pipeline; keep strict rule sets from rejecting them.
fn with_upload_targets(mut rules: RuleSet, targets: &[String]) -> RuleSet {
    for target in targets {
        if rules.get(target).is_none() {
            rules
                .fields
                .insert(target.clone(), FieldRule::new(RuleType::Any).optional().nullable());
        }
    }
    rules
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MemoryAdapter;
    use crate::config::ModuleOptions;
    use crate::filtering::Combinator;
    use crate::hooks::Hooks;
    use crate::schema::{FieldKind, FieldSpec, ModelSchema};
    use crate::upload::{MemoryStorage, UploadSpec};
    use crate::models::UploadedFile;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn schema() -> ModelSchema {
        ModelSchema::new("companies")
            .with_field(FieldSpec::new("id", FieldKind::Integer).primary())
            .with_field(FieldSpec::new("name", FieldKind::String))
            .with_field(FieldSpec::new("employees", FieldKind::Integer).nullable())
            .with_field(FieldSpec::new("logo", FieldKind::String).nullable())
    }

    fn seeded() -> MemoryAdapter {
        MemoryAdapter::with_records(
            "id",
            vec![
                json!({ "id": 1, "name": "Acme", "employees": 10, "logo": null }),
                json!({ "id": 2, "name": "Globex", "employees": 200, "logo": null }),
                json!({ "id": 3, "name": "Initech", "employees": 50, "logo": null }),
            ],
        )
    }

    fn service_with(section: ResourceSection, options: ModuleOptions) -> CrudService {
        CrudService::new(
            Registry::builder()
                .options(options)
                .storage("memory", MemoryStorage::new())
                .section(section)
                .build(),
        )
    }

    fn service(section: ResourceSection) -> CrudService {
        service_with(section, ModuleOptions::default())
    }

    fn companies() -> ResourceSection {
        ResourceSection::new("companies", schema()).adapter(seeded())
    }

    fn completed(outcome: ActionOutcome) -> Envelope {
        match outcome {
            ActionOutcome::Completed(envelope) => envelope,
            ActionOutcome::Handled => panic!("action was aborted"),
        }
    }

    #[tokio::test]
    async fn test_list_filters_sorts_and_paginates() {
        let service = service(companies());
        let request = CrudRequest::new()
            .with_query("employees.min", "20")
            .with_query("sort.employees", "desc")
            .with_query("perPage", "1");
        let envelope = completed(service.execute("companies", ActionKind::List, request).await.unwrap());

        assert!(envelope.success);
        assert_eq!(envelope.data, json!([{ "id": 2, "name": "Globex", "employees": 200, "logo": null }]));
        let pagination = envelope.pagination.unwrap();
        assert_eq!(pagination.total_items_count, 2);
        assert!(pagination.is_having_next_page);
    }

    #[tokio::test]
    async fn test_unknown_section_and_missing_adapter() {
        let service = service(ResourceSection::new("bare", schema()));
        let err = service.execute("ghosts", ActionKind::List, CrudRequest::new()).await.unwrap_err();
        assert_eq!(err.user_message(), "Invalid section");

        let err = service.execute("bare", ActionKind::List, CrudRequest::new()).await.unwrap_err();
        assert!(matches!(err, CrudError::RepositoryUnavailable { .. }));

        let captured = service.call_action("ghosts", ActionKind::List, CrudRequest::new()).await;
        assert_eq!(captured.data["success"], false);
        assert_eq!(captured.data["errors"][0]["message"], "Invalid section");
    }

    #[tokio::test]
    async fn test_create_validates_and_checks_uniqueness() {
        let section = companies().action(ActionKind::Create, ActionConfig::new().unique(["name"], Combinator::Or));
        let service = service(section);

        let bad = CrudRequest::new().with_body(json!({ "employees": "many" }));
        let envelope = completed(service.execute("companies", ActionKind::Create, bad).await.unwrap());
        let kinds: Vec<_> = envelope.errors.iter().filter_map(|e| e.kind.as_deref()).collect();
        assert_eq!(kinds, vec!["number", "required"]);

        let duplicate = CrudRequest::new().with_body(json!({ "name": "Acme" }));
        let envelope = completed(service.execute("companies", ActionKind::Create, duplicate).await.unwrap());
        assert_eq!(envelope.errors[0].kind.as_deref(), Some("unique"));
        assert_eq!(envelope.errors[0].field.as_deref(), Some("name"));

        let good = CrudRequest::new().with_body(json!({ "name": "Hooli", "employees": 5 }));
        let envelope = completed(service.execute("companies", ActionKind::Create, good).await.unwrap());
        assert!(envelope.success);
        assert_eq!(envelope.data["id"], 4);
    }

    #[tokio::test]
    async fn test_update_excludes_itself_from_uniqueness() {
        let section = companies().defaults(ActionConfig::new().unique(["name"], Combinator::Or));
        let service = service(section);
        let request = CrudRequest::new()
            .with_param("id", "1")
            .with_body(json!({ "name": "Acme", "employees": 11 }));
        let envelope = completed(service.execute("companies", ActionKind::Update, request).await.unwrap());
        assert!(envelope.success, "{:?}", envelope.errors);
        assert_eq!(envelope.data["employees"], 11);
    }

    #[tokio::test]
    async fn test_delete_messages() {
        let service = service(companies());
        let request = CrudRequest::new().with_param("id", "2");
        let envelope = completed(service.execute("companies", ActionKind::Delete, request.clone()).await.unwrap());
        assert_eq!(envelope.data, json!({ "message": "Successfully deleted" }));

        let envelope = completed(service.execute("companies", ActionKind::Delete, request).await.unwrap());
        assert!(!envelope.success);
    }

    #[tokio::test]
    async fn test_details_not_found_has_null_data() {
        let service = service(companies());
        let request = CrudRequest::new().with_param("id", "99");
        let envelope = completed(service.execute("companies", ActionKind::Details, request).await.unwrap());
        assert!(!envelope.success);
        assert!(envelope.errors.is_empty());
        assert_eq!(envelope.data, Value::Null);
    }

    #[tokio::test]
    async fn test_before_action_abort_and_reject() {
        let section = companies()
            .action(
                ActionKind::List,
                ActionConfig::new().hooks(Hooks::new().before_action(|_ctx, _req| async { Ok(HookFlow::Abort) })),
            )
            .action(
                ActionKind::Details,
                ActionConfig::new().hooks(Hooks::new().before_action(|_ctx, _req| async {
                    Ok(HookFlow::Reject(vec![ErrorEntry::message("closed")]))
                })),
            );
        let service = service(section);

        let outcome = service.execute("companies", ActionKind::List, CrudRequest::new()).await.unwrap();
        assert_eq!(outcome, ActionOutcome::Handled);
        let captured = service.call_action("companies", ActionKind::List, CrudRequest::new()).await;
        assert_eq!(captured.status, StatusCode::NO_CONTENT);

        let request = CrudRequest::new().with_param("id", "1");
        let envelope = completed(service.execute("companies", ActionKind::Details, request).await.unwrap());
        assert_eq!(envelope.errors, vec![ErrorEntry::message("closed")]);
    }

    #[tokio::test]
    async fn test_cache_hits_and_write_invalidation() {
        let fetches = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fetches);
        let section = companies().action(
            ActionKind::List,
            ActionConfig::new().cache(Some(60)).hooks(Hooks::new().after_fetch(move |_ctx, rows| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move { Ok(rows) }
            })),
        );
        let service = service(section);

        for _ in 0..2 {
            service.execute("companies", ActionKind::List, CrudRequest::new()).await.unwrap();
        }
        assert_eq!(fetches.load(Ordering::SeqCst), 1);

        let create = CrudRequest::new().with_body(json!({ "name": "Hooli" }));
        service.execute("companies", ActionKind::Create, create).await.unwrap();
        let envelope = completed(service.execute("companies", ActionKind::List, CrudRequest::new()).await.unwrap());
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
        assert_eq!(envelope.pagination.unwrap().total_items_count, 4);
    }

    #[tokio::test]
    async fn test_meta_and_after_action() {
        let section = companies().defaults(ActionConfig::new().hooks(
            Hooks::new()
                .static_meta(json!({ "version": 2 }).as_object().cloned().unwrap())
                .after_action(|_ctx, mut envelope: Envelope| async move {
                    envelope.merge_meta(json!({ "seen": true }).as_object().cloned().unwrap());
                    Ok(envelope)
                }),
        ));
        let service = service(section);
        let request = CrudRequest::new().with_param("id", "1");
        let envelope = completed(service.execute("companies", ActionKind::Details, request).await.unwrap());
        assert_eq!(envelope.meta, json!({ "version": 2, "seen": true }).as_object().cloned());
    }

    #[tokio::test]
    async fn test_save_is_idempotent_on_identity() {
        let service = service(companies());
        let request = CrudRequest::new().with_body(json!({ "id": 3, "name": "Initrode" }));
        for _ in 0..2 {
            let envelope = completed(service.execute("companies", ActionKind::Save, request.clone()).await.unwrap());
            assert!(envelope.success, "{:?}", envelope.errors);
            assert_eq!(envelope.data["name"], "Initrode");
        }
        let list = completed(service.execute("companies", ActionKind::List, CrudRequest::new()).await.unwrap());
        assert_eq!(list.pagination.unwrap().total_items_count, 3);
    }

    #[tokio::test]
    async fn test_path_params_override_body_during_validation() {
        let service = service(companies());
        let request = CrudRequest::new()
            .with_param("name", "Hooli")
            .with_body(json!({ "name": 42, "employees": 5 }));
        let envelope = completed(service.execute("companies", ActionKind::Create, request).await.unwrap());
        assert!(envelope.success, "{:?}", envelope.errors);

        let request = CrudRequest::new().with_body(json!({ "name": 42, "employees": 5 }));
        let envelope = completed(service.execute("companies", ActionKind::Create, request).await.unwrap());
        assert_eq!(envelope.errors[0].field.as_deref(), Some("name"));
        assert_eq!(envelope.errors[0].kind.as_deref(), Some("string"));
    }

    #[tokio::test]
    async fn test_upload_targets_pass_strict_validation() {
        let section = companies().action(
            ActionKind::Create,
            ActionConfig::new().uploads(UploadSpec::new().field("logo", "image").storage("memory")),
        );
        let service = service(section);

        let request = CrudRequest::new()
            .with_body(json!({ "name": "Pied Piper" }))
            .with_file("logo", UploadedFile::new("logo.exe", "application/x-msdownload", vec![0u8; 4]));
        let envelope = completed(service.execute("companies", ActionKind::Create, request).await.unwrap());
        assert!(envelope.errors[0].message.starts_with("Invalid extension"));

        let request = CrudRequest::new()
            .with_body(json!({ "name": "Pied Piper" }))
            .with_file("logo", UploadedFile::new("logo.png", "image/png", vec![0u8; 4]));
        let envelope = completed(service.execute("companies", ActionKind::Create, request).await.unwrap());
        assert!(envelope.success, "{:?}", envelope.errors);
        assert!(envelope.data["logo"].as_str().unwrap().starts_with("memory://"));
    }

    #[tokio::test]
    async fn test_writes_always_answer_json() {
        let service = service(companies());
        let request = CrudRequest::new()
            .with_header("x-content-type", "csv")
            .with_body(json!({ "name": "Hooli" }));
        let rendered = service.respond("companies", ActionKind::Create, request).await.unwrap().unwrap();
        assert_eq!(rendered.content_type, ContentType::Json);

        let request = CrudRequest::new().with_header("x-content-type", "csv");
        let rendered = service.respond("companies", ActionKind::List, request).await.unwrap().unwrap();
        assert_eq!(rendered.content_type, ContentType::Csv);
    }
}

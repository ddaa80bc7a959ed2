use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use super::action::{ActionConfig, ActionKind};
use crate::adapter::StorageAdapter;
use crate::schema::ModelSchema;
use crate::validation::ValidationEngine;

/// A named CRUD-enabled resource: its schema, collaborators and per-action settings.
///
/// ```rust,ignore
/// let companies = ResourceSection::new("companies", ModelSchema::from_entity::<company::Entity>())
///     .adapter(SeaOrmAdapter::<company::Entity, company::ActiveModel>::new(db.clone()))
///     .defaults(ActionConfig::new().whitelist(["name", "employees"]))
///     .action(ActionKind::Create, ActionConfig::new().unique(["name"], Combinator::Or));
/// ```
#[derive(Clone)]
pub struct ResourceSection {
    pub name: String,
    pub schema: Arc<ModelSchema>,
    pub adapter: Option<Arc<dyn StorageAdapter>>,
    pub validator: Option<Arc<dyn ValidationEngine>>,
    pub defaults: ActionConfig,
    pub actions: BTreeMap<ActionKind, ActionConfig>,
    pub enabled: BTreeSet<ActionKind>,
}

impl ResourceSection {
    /// Section with every action enabled and no adapter yet.
    pub fn new(name: impl Into<String>, schema: ModelSchema) -> Self {
        Self {
            name: name.into(),
            schema: Arc::new(schema),
            adapter: None,
            validator: None,
            defaults: ActionConfig::default(),
            actions: BTreeMap::new(),
            enabled: ActionKind::ALL.into_iter().collect(),
        }
    }

    #[must_use]
    pub fn adapter(mut self, adapter: impl StorageAdapter + 'static) -> Self {
        self.adapter = Some(Arc::new(adapter));
        self
    }

    #[must_use]
    pub fn shared_adapter(mut self, adapter: Arc<dyn StorageAdapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    /// Replace the registry-wide validation engine for this section.
    #[must_use]
    pub fn validator(mut self, validator: impl ValidationEngine + 'static) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    #[must_use]
    pub fn defaults(mut self, defaults: ActionConfig) -> Self {
        self.defaults = defaults;
        self
    }

    #[must_use]
    pub fn action(mut self, kind: ActionKind, config: ActionConfig) -> Self {
        self.actions.insert(kind, config);
        self
    }

    /// Restrict the section to these actions.
    #[must_use]
    pub fn only(mut self, kinds: &[ActionKind]) -> Self {
        self.enabled = kinds.iter().copied().collect();
        self
    }

    #[must_use]
    pub fn is_enabled(&self, kind: ActionKind) -> bool {
        self.enabled.contains(&kind)
    }

    /// Section defaults overridden by the action's own settings.
    #[must_use]
    pub fn action_config(&self, kind: ActionKind) -> ActionConfig {
        match self.actions.get(&kind) {
            Some(config) => config.merged_over(&self.defaults),
            None => self.defaults.clone(),
        }
    }
}

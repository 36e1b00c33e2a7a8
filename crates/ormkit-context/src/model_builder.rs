//! Code-first model description

use std::collections::HashSet;

use ormkit_core::{
    CompiledModel, DbProviderInfo, EntitySet, EntityType, MetadataWorkspace, OrmError, Result,
};

/// Keep only characters that are valid in a model namespace or container name
pub fn strip_invalid_characters(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '.')
        .collect()
}

/// Describes a model in code before it is compiled.
///
/// Entity types are registered with [`ModelBuilder::entity`]; a root type
/// without an explicit set gets one from the pipeline's naming convention.
#[derive(Debug, Clone, Default)]
pub struct ModelBuilder {
    namespace: Option<String>,
    container_name: Option<String>,
    default_schema: Option<String>,
    entity_types: Vec<EntityType>,
    entity_sets: Vec<EntitySet>,
}

impl ModelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.set_namespace(namespace);
        self
    }

    pub fn with_container_name(mut self, container_name: impl Into<String>) -> Self {
        self.set_container_name(container_name);
        self
    }

    pub fn set_namespace(&mut self, namespace: impl Into<String>) -> &mut Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn set_container_name(&mut self, container_name: impl Into<String>) -> &mut Self {
        self.container_name = Some(container_name.into());
        self
    }

    pub fn has_default_schema(&mut self, schema: impl Into<String>) -> &mut Self {
        self.default_schema = Some(schema.into());
        self
    }

    /// Register an entity type, replacing an earlier registration of the same name
    pub fn entity(&mut self, entity_type: EntityType) -> &mut Self {
        match self
            .entity_types
            .iter_mut()
            .find(|existing| existing.name == entity_type.name)
        {
            Some(existing) => *existing = entity_type,
            None => self.entity_types.push(entity_type),
        }
        self
    }

    /// Register an entity type with its own set name
    pub fn entity_set(&mut self, set_name: impl Into<String>, entity_type: EntityType) -> &mut Self {
        let set = EntitySet::new(set_name, entity_type.name.clone());
        self.entity(entity_type);
        self.entity_sets.retain(|existing| existing.element_type != set.element_type);
        self.entity_sets.push(set);
        self
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn container_name(&self) -> Option<&str> {
        self.container_name.as_deref()
    }

    pub fn default_schema(&self) -> Option<&str> {
        self.default_schema.as_deref()
    }

    pub fn entity_types(&self) -> &[EntityType] {
        &self.entity_types
    }

    pub fn entity_sets(&self) -> &[EntitySet] {
        &self.entity_sets
    }

    pub(crate) fn add_entity_set(&mut self, set: EntitySet) {
        self.entity_sets.push(set);
    }

    /// Turn the description into a workspace, checking that it is consistent
    pub fn to_workspace(&self) -> Result<MetadataWorkspace> {
        let container_name = self
            .container_name
            .clone()
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| OrmError::ModelBuild("the model has no container name".into()))?;

        let mut names = HashSet::new();
        for entity_type in &self.entity_types {
            if entity_type.name.trim().is_empty() {
                return Err(OrmError::ModelBuild("an entity type has an empty name".into()));
            }
            if !names.insert(entity_type.name.as_str()) {
                return Err(OrmError::ModelBuild(format!(
                    "the entity type '{}' is registered twice",
                    entity_type.name
                )));
            }
        }

        let workspace = MetadataWorkspace {
            namespace: self.namespace.clone().unwrap_or_default(),
            container_name,
            entity_types: self.entity_types.clone(),
            entity_sets: self.entity_sets.clone(),
            default_schema: self.default_schema.clone(),
        };

        for entity_type in &workspace.entity_types {
            if let Some(base) = &entity_type.base_type
                && workspace.entity_type(base).is_none()
            {
                return Err(OrmError::ModelBuild(format!(
                    "the base type '{base}' of '{}' is not part of the model",
                    entity_type.name
                )));
            }
            if workspace.root_type(&entity_type.name).is_none() {
                return Err(OrmError::ModelBuild(format!(
                    "the inheritance chain of '{}' is cyclic",
                    entity_type.name
                )));
            }
        }

        let mut set_names = HashSet::new();
        for set in &workspace.entity_sets {
            if !set_names.insert(set.name.as_str()) {
                return Err(OrmError::ModelBuild(format!(
                    "the entity set '{}' is declared twice",
                    set.name
                )));
            }
            match workspace.entity_type(&set.element_type) {
                Some(element) if element.base_type.is_none() => {}
                Some(_) => {
                    return Err(OrmError::ModelBuild(format!(
                        "the entity set '{}' must hold a root type, not '{}'",
                        set.name, set.element_type
                    )));
                }
                None => {
                    return Err(OrmError::ModelBuild(format!(
                        "the entity set '{}' holds the unknown type '{}'",
                        set.name, set.element_type
                    )));
                }
            }
        }

        Ok(workspace)
    }

    /// Compile the model for a provider
    pub fn build(&self, provider_info: DbProviderInfo) -> Result<CompiledModel> {
        CompiledModel::compile(provider_info, self.to_workspace()?)
    }
}

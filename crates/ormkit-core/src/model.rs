//! Model identity and compiled model types

use std::any::TypeId;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{OrmError, Result};

/// Identity of a user context type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextType {
    id: TypeId,
    path: &'static str,
}

impl ContextType {
    pub fn of<C: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<C>(),
            path: std::any::type_name::<C>(),
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.id
    }

    /// The Rust type path, e.g. `blog::data::BloggingContext`
    pub fn path(&self) -> &'static str {
        self.path
    }

    /// Dotted name used as the conventional connection name,
    /// e.g. `blog.data.BloggingContext`. Generic arguments are dropped.
    pub fn database_name(&self) -> String {
        let path = self.path.split('<').next().unwrap_or(self.path);
        path.replace("::", ".")
    }

    /// Type name without its module path
    pub fn name(&self) -> &'static str {
        let path = self.path.split('<').next().unwrap_or(self.path);
        path.rsplit("::").next().unwrap_or(path)
    }

    /// Module path of the type, used as the model namespace
    pub fn namespace(&self) -> Option<String> {
        let path = self.path.split('<').next().unwrap_or(self.path);
        path.rfind("::").map(|index| path[..index].replace("::", "."))
    }
}

impl fmt::Display for ContextType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.database_name())
    }
}

/// Process-unique identity of a compiled model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelId(u64);

impl ModelId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "model#{}", self.0)
    }
}

/// Key of the process-wide model cache.
///
/// Two contexts of the same type talking to the same provider share one
/// compiled model unless they also report different schemas.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelCacheKey {
    context_type: ContextType,
    provider_name: String,
    schema: Option<String>,
}

impl ModelCacheKey {
    pub fn new(
        context_type: ContextType,
        provider_name: impl Into<String>,
        schema: Option<String>,
    ) -> Result<Self> {
        let provider_name = provider_name.into();
        if provider_name.trim().is_empty() {
            return Err(OrmError::Configuration(format!(
                "a model cache key for '{context_type}' requires a provider name"
            )));
        }
        Ok(Self {
            context_type,
            provider_name,
            schema,
        })
    }

    pub fn context_type(&self) -> &ContextType {
        &self.context_type
    }

    pub fn provider_name(&self) -> &str {
        &self.provider_name
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }
}

/// Provider details a model is built against
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DbProviderInfo {
    pub provider_invariant_name: String,
    pub provider_manifest_token: String,
}

impl DbProviderInfo {
    pub fn new(
        provider_invariant_name: impl Into<String>,
        provider_manifest_token: impl Into<String>,
    ) -> Self {
        Self {
            provider_invariant_name: provider_invariant_name.into(),
            provider_manifest_token: provider_manifest_token.into(),
        }
    }
}

/// An entity type in the conceptual model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityType {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_type: Option<String>,
    #[serde(default = "default_key")]
    pub key: String,
}

fn default_key() -> String {
    "Id".to_string()
}

impl EntityType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_type: None,
            key: default_key(),
        }
    }

    pub fn derived_from(mut self, base_type: impl Into<String>) -> Self {
        self.base_type = Some(base_type.into());
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }
}

/// An entity set holding instances of a root entity type and its derived types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySet {
    pub name: String,
    pub element_type: String,
}

impl EntitySet {
    pub fn new(name: impl Into<String>, element_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            element_type: element_type.into(),
        }
    }
}

/// The entity set an entity type belongs to, together with the root type of that set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySetTypePair {
    pub entity_set: EntitySet,
    pub base_type: String,
}

/// Model metadata: conceptual types and the sets that hold them
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataWorkspace {
    pub namespace: String,
    pub container_name: String,
    #[serde(default)]
    pub entity_types: Vec<EntityType>,
    #[serde(default)]
    pub entity_sets: Vec<EntitySet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_schema: Option<String>,
}

impl MetadataWorkspace {
    pub fn entity_type(&self, name: &str) -> Option<&EntityType> {
        self.entity_types.iter().find(|t| t.name == name)
    }

    pub fn entity_set(&self, name: &str) -> Option<&EntitySet> {
        self.entity_sets.iter().find(|s| s.name == name)
    }

    /// Walk up the inheritance chain to the root type
    pub fn root_type<'a>(&'a self, name: &'a str) -> Option<&'a str> {
        let mut current = self.entity_type(name)?;
        let mut depth = 0;
        while let Some(base) = current.base_type.as_deref() {
            current = self.entity_type(base)?;
            depth += 1;
            if depth > self.entity_types.len() {
                return None;
            }
        }
        Some(current.name.as_str())
    }

    /// Find the entity set that holds a type, and the root type of that set
    pub fn entity_set_and_base_type_for_type(&self, name: &str) -> Option<EntitySetTypePair> {
        let root = self.root_type(name)?;
        let set = self.entity_sets.iter().find(|s| s.element_type == root)?;
        Some(EntitySetTypePair {
            entity_set: set.clone(),
            base_type: root.to_string(),
        })
    }

    /// Merge another fragment into this workspace
    pub fn merge(&mut self, other: MetadataWorkspace) {
        if self.namespace.is_empty() {
            self.namespace = other.namespace;
        }
        if self.container_name.is_empty() {
            self.container_name = other.container_name;
        }
        if self.default_schema.is_none() {
            self.default_schema = other.default_schema;
        }
        for entity_type in other.entity_types {
            if self.entity_type(&entity_type.name).is_none() {
                self.entity_types.push(entity_type);
            }
        }
        for entity_set in other.entity_sets {
            if self.entity_set(&entity_set.name).is_none() {
                self.entity_sets.push(entity_set);
            }
        }
    }
}

/// An immutable model produced once per [`ModelCacheKey`]
#[derive(Debug)]
pub struct CompiledModel {
    id: ModelId,
    provider_info: DbProviderInfo,
    workspace: Arc<MetadataWorkspace>,
    hash: String,
}

impl CompiledModel {
    /// Compile a workspace for a provider, computing its SHA-256 model hash
    pub fn compile(provider_info: DbProviderInfo, workspace: MetadataWorkspace) -> Result<Self> {
        #[derive(Serialize)]
        struct HashInput<'a> {
            provider: &'a DbProviderInfo,
            workspace: &'a MetadataWorkspace,
        }

        let bytes = serde_json::to_vec(&HashInput {
            provider: &provider_info,
            workspace: &workspace,
        })?;
        let digest = ring::digest::digest(&ring::digest::SHA256, &bytes);

        Ok(Self {
            id: ModelId::next(),
            provider_info,
            workspace: Arc::new(workspace),
            hash: hex::encode(digest.as_ref()),
        })
    }

    pub fn id(&self) -> ModelId {
        self.id
    }

    pub fn provider_info(&self) -> &DbProviderInfo {
        &self.provider_info
    }

    pub fn workspace(&self) -> &Arc<MetadataWorkspace> {
        &self.workspace
    }

    pub fn default_schema(&self) -> Option<&str> {
        self.workspace.default_schema.as_deref()
    }

    /// Hex-encoded SHA-256 hash of the model, stored in the history table
    pub fn hash(&self) -> &str {
        &self.hash
    }
}

//! Turning a model description into a compiled model

use ormkit_core::{CompiledModel, DbProviderInfo, EntitySet, Result};

use crate::ModelBuilder;

/// Builds and compiles the model described by a [`ModelBuilder`]
pub trait ModelPipeline: Send + Sync {
    fn build(&self, builder: ModelBuilder, provider_info: DbProviderInfo) -> Result<CompiledModel>;
}

/// Pluralized set name used for root types that were registered without one
pub fn pluralize(name: &str) -> String {
    let lower = name.to_ascii_lowercase();
    if lower.ends_with('y')
        && !lower.ends_with("ay")
        && !lower.ends_with("ey")
        && !lower.ends_with("oy")
        && !lower.ends_with("uy")
    {
        format!("{}ies", &name[..name.len() - 1])
    } else if ["s", "x", "z", "ch", "sh"].iter().any(|suffix| lower.ends_with(suffix)) {
        format!("{name}es")
    } else {
        format!("{name}s")
    }
}

/// Default pipeline: adds an entity set for every root type that has none,
/// then compiles
#[derive(Debug, Default)]
pub struct ConventionModelPipeline;

impl ConventionModelPipeline {
    pub fn new() -> Self {
        Self
    }
}

impl ModelPipeline for ConventionModelPipeline {
    #[tracing::instrument(skip(self, builder, provider_info), fields(container = builder.container_name().unwrap_or_default(), provider = %provider_info.provider_invariant_name))]
    fn build(&self, mut builder: ModelBuilder, provider_info: DbProviderInfo) -> Result<CompiledModel> {
        let missing: Vec<EntitySet> = builder
            .entity_types()
            .iter()
            .filter(|entity_type| entity_type.base_type.is_none())
            .filter(|entity_type| {
                !builder
                    .entity_sets()
                    .iter()
                    .any(|set| set.element_type == entity_type.name)
            })
            .map(|entity_type| EntitySet::new(pluralize(&entity_type.name), entity_type.name.clone()))
            .collect();

        for set in missing {
            tracing::debug!(entity_set = %set.name, entity_type = %set.element_type, "added conventional entity set");
            builder.add_entity_set(set);
        }

        builder.build(provider_info)
    }
}

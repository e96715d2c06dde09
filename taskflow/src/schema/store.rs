//! Schema store trait and the in-memory implementation.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;

use super::PipelineSchema;
use crate::errors::SchemaResolutionError;

/// Resolves a feature id to its pipeline schema.
#[async_trait]
pub trait SchemaStore: Send + Sync {
    /// Returns the validated schema of a feature.
    async fn get_schema(&self, feature_id: &str) -> Result<PipelineSchema, SchemaResolutionError>;
}

#[derive(Debug, Deserialize)]
struct FeatureDefinition {
    feature_id: String,
    #[serde(default)]
    pipeline_schema_ref: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SchemaDocument {
    #[serde(default)]
    feature_definitions: Vec<FeatureDefinition>,
    #[serde(default)]
    pipeline_schemas: Vec<PipelineSchema>,
}

/// Schema store backed by two in-memory tables, mirroring the
/// `feature_definitions` and `pipeline_schemas` records.
#[derive(Debug, Default)]
pub struct InMemorySchemaStore {
    features: RwLock<HashMap<String, Option<String>>>,
    schemas: RwLock<HashMap<String, PipelineSchema>>,
}

impl InMemorySchemaStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a store from a JSON document of the form
    /// `{"feature_definitions": [...], "pipeline_schemas": [...]}`.
    pub fn from_json_str(json: &str) -> Result<Self, SchemaResolutionError> {
        let document: SchemaDocument =
            serde_json::from_str(json).map_err(|e| SchemaResolutionError::Store(e.to_string()))?;

        let store = Self::new();
        for schema in document.pipeline_schemas {
            store.insert_schema(schema);
        }
        for feature in document.feature_definitions {
            store.define_feature(feature.feature_id, feature.pipeline_schema_ref);
        }
        Ok(store)
    }

    /// Registers a feature and its schema reference.
    pub fn define_feature(&self, feature_id: impl Into<String>, schema_ref: Option<String>) {
        self.features.write().insert(feature_id.into(), schema_ref);
    }

    /// Stores a schema under its pipeline id.
    pub fn insert_schema(&self, schema: PipelineSchema) {
        self.schemas.write().insert(schema.pipeline_id.clone(), schema);
    }

    /// Stores a schema and points a feature at it.
    #[must_use]
    pub fn with_pipeline(self, feature_id: impl Into<String>, schema: PipelineSchema) -> Self {
        self.define_feature(feature_id, Some(schema.pipeline_id.clone()));
        self.insert_schema(schema);
        self
    }

    /// Returns the number of stored schemas.
    #[must_use]
    pub fn schema_count(&self) -> usize {
        self.schemas.read().len()
    }
}

#[async_trait]
impl SchemaStore for InMemorySchemaStore {
    async fn get_schema(&self, feature_id: &str) -> Result<PipelineSchema, SchemaResolutionError> {
        let pipeline_id = self
            .features
            .read()
            .get(feature_id)
            .cloned()
            .flatten()
            .ok_or_else(|| SchemaResolutionError::NoSchemaReference {
                feature_id: feature_id.to_string(),
            })?;

        let schema = self.schemas.read().get(&pipeline_id).cloned().ok_or_else(|| {
            SchemaResolutionError::NotFound {
                feature_id: feature_id.to_string(),
                pipeline_id: pipeline_id.clone(),
            }
        })?;

        schema.validate()?;
        Ok(schema)
    }
}

//! Build coordination for local search indexes.
//!
//! Each locally-indexed source has exactly one metadata descriptor,
//! persisted by the host through `MetadataRepository`, and a versioned
//! artifact stored immortally at `idx:<sourceId>:<docVersion>`.
//! `ensure_index` reconciles the two: rebuild when the document
//! version moved, metadata-only update when only the display fields
//! drifted, no-op otherwise.
//!
//! The artifact is always written before the metadata. If the process
//! dies in between, the orphaned artifact is invisible (no metadata
//! points at it) and eventually removed by age-based pruning.

use lexicache_core::{
    now_unix, BuildError, CacheKey, IndexBuilder, LexicacheResult, SourceDescriptor, SourceKind,
    UnixSeconds,
};
use lexicache_storage::CacheStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

// =============================================================================
// METADATA
// =============================================================================

/// Descriptor of one built index, persisted by the host.
///
/// Superseded on rebuild, never mutated in place. `id` and `uuid` are
/// generated once when the source is first indexed and survive every
/// later rebuild.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMetadata {
    /// Short stable identifier, first 8 hex chars of `uuid`.
    pub id: String,
    /// Full stable identifier.
    pub uuid: String,
    /// Document version the current artifact was built from.
    pub doc_version: i64,
    /// Document kind, stable string form.
    pub kind: String,
    /// Display title at build time.
    pub title: String,
    /// Display description at build time.
    pub description: Option<String>,
    /// Number of searchable entries in the artifact.
    pub item_count: usize,
    /// Unix seconds when the artifact was built.
    pub built_at: UnixSeconds,
}

/// Host-side persistence for index metadata.
///
/// The host decides where descriptors live (next to its own config,
/// typically); the coordinator only loads and saves them.
#[async_trait::async_trait]
pub trait MetadataRepository: Send + Sync {
    async fn load(&self, source_id: &str) -> LexicacheResult<Option<IndexMetadata>>;
    async fn save(&self, source_id: &str, metadata: &IndexMetadata) -> LexicacheResult<()>;
}

// =============================================================================
// OUTCOME
// =============================================================================

/// What `ensure_index` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    /// The artifact was rebuilt and new metadata saved.
    Rebuilt,
    /// Only title/description drifted; metadata updated, artifact kept.
    MetadataUpdated,
    /// Artifact and metadata already match the descriptor.
    Unchanged,
}

/// Outcome of one `ensure_index` call.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildReport {
    pub outcome: BuildOutcome,
    pub metadata: IndexMetadata,
    /// Non-fatal condition worth surfacing, e.g. an empty artifact.
    pub warning: Option<String>,
}

// =============================================================================
// COORDINATOR
// =============================================================================

/// Keeps local index artifacts and their metadata descriptors in step
/// with the source registry.
pub struct BuildCoordinator {
    store: CacheStore,
    repository: Arc<dyn MetadataRepository>,
    builders: Vec<Arc<dyn IndexBuilder>>,
}

impl BuildCoordinator {
    pub fn new(
        store: CacheStore,
        repository: Arc<dyn MetadataRepository>,
        builders: Vec<Arc<dyn IndexBuilder>>,
    ) -> Self {
        Self {
            store,
            repository,
            builders,
        }
    }

    fn builder_for(&self, kind: SourceKind) -> Option<&Arc<dyn IndexBuilder>> {
        self.builders.iter().find(|b| b.kind() == kind)
    }

    /// Bring the index for `source` up to date with its descriptor.
    ///
    /// Safe to call on every search: unchanged sources short-circuit
    /// without touching the cache.
    pub async fn ensure_index(&self, source: &SourceDescriptor) -> LexicacheResult<BuildReport> {
        let existing = self.repository.load(&source.source_id).await?;

        match existing {
            Some(metadata) if metadata.doc_version == source.doc_version => {
                let drifted = metadata.title != source.title
                    || metadata.description != source.description;
                if drifted {
                    self.update_metadata(source, metadata).await
                } else {
                    Ok(BuildReport {
                        outcome: BuildOutcome::Unchanged,
                        metadata,
                        warning: None,
                    })
                }
            }
            existing => self.rebuild(source, existing).await,
        }
    }

    /// Refresh display fields without rebuilding the artifact.
    async fn update_metadata(
        &self,
        source: &SourceDescriptor,
        previous: IndexMetadata,
    ) -> LexicacheResult<BuildReport> {
        let metadata = IndexMetadata {
            title: source.title.clone(),
            description: source.description.clone(),
            // item_count and built_at describe the artifact, which is
            // untouched here.
            ..previous
        };
        self.repository.save(&source.source_id, &metadata).await?;

        tracing::info!(
            source_id = %source.source_id,
            doc_version = source.doc_version,
            "Index metadata updated without rebuild"
        );
        Ok(BuildReport {
            outcome: BuildOutcome::MetadataUpdated,
            metadata,
            warning: None,
        })
    }

    /// Run the matching builder and persist artifact then metadata.
    async fn rebuild(
        &self,
        source: &SourceDescriptor,
        previous: Option<IndexMetadata>,
    ) -> LexicacheResult<BuildReport> {
        let builder = self
            .builder_for(source.kind)
            .ok_or_else(|| BuildError::NoBuilder {
                kind: source.kind.to_string(),
            })?;

        let artifact = builder.build(source).await?;
        let item_count = artifact.item_count();

        let warning = if item_count == 0 {
            tracing::warn!(
                source_id = %source.source_id,
                doc_version = source.doc_version,
                "Index build produced 0 searchable items"
            );
            Some("produced 0 searchable items".to_string())
        } else {
            None
        };

        // Artifact first. A crash before the metadata save leaves an
        // orphan under a version-qualified key, which pruning removes.
        let key = CacheKey::index(&source.source_id, source.doc_version);
        let payload = serde_json::to_value(&artifact).map_err(|e| {
            lexicache_core::CacheError::Serialization {
                key: key.to_string(),
                reason: e.to_string(),
            }
        })?;
        self.store.set_payload(&key, payload, 0, None).await?;

        let (id, uuid) = match &previous {
            Some(previous) => (previous.id.clone(), previous.uuid.clone()),
            None => {
                let uuid = Uuid::now_v7().simple().to_string();
                (uuid[..8].to_string(), uuid)
            }
        };
        let metadata = IndexMetadata {
            id,
            uuid,
            doc_version: source.doc_version,
            kind: source.kind.as_str().to_string(),
            title: source.title.clone(),
            description: source.description.clone(),
            item_count,
            built_at: now_unix(),
        };
        self.repository.save(&source.source_id, &metadata).await?;

        tracing::info!(
            source_id = %source.source_id,
            doc_version = source.doc_version,
            item_count,
            "Index rebuilt"
        );
        Ok(BuildReport {
            outcome: BuildOutcome::Rebuilt,
            metadata,
            warning,
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================

//! Collaborator traits and source descriptors.
//!
//! The host application owns the domain model; Lexicache only sees it
//! through these seams: a registry resolving a source id to its
//! backing descriptor, a rate-limited remote search client, and a
//! pluggable index builder per document kind.

use crate::error::{BuildError, RemoteError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The document kind of a logical source.
///
/// Determines which index builder handles a local build and whether a
/// source is served by remote lookups instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    /// Flat list of coded values maintained in a local document.
    ValueList,
    /// Hierarchical concept scheme maintained in a local document.
    ConceptScheme,
    /// Served by a remote terminology service; no local index.
    RemoteLookup,
}

impl SourceKind {
    /// Stable string form used in metadata descriptors.
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::ValueList => "value_list",
            SourceKind::ConceptScheme => "concept_scheme",
            SourceKind::RemoteLookup => "remote_lookup",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Parameters identifying the underlying remote request for a source.
///
/// Two sources with equal `lookup_type` and `params` share one remote
/// dispatch per poll cycle; results are fanned back out per source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteParams {
    /// The kind of remote lookup (the batching key).
    pub lookup_type: String,
    /// Extra request parameters, sorted for deterministic hashing.
    pub params: BTreeMap<String, String>,
}

/// Backing descriptor for a logical source, resolved by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    /// Stable source id, e.g. `src_abc`.
    pub source_id: String,
    /// Version of the backing document; a change forces a rebuild.
    pub doc_version: i64,
    /// Document kind.
    pub kind: SourceKind,
    /// Resolved display title.
    pub title: String,
    /// Resolved description, if any.
    pub description: Option<String>,
    /// Remote lookup parameters; `None` for purely local sources.
    pub remote: Option<RemoteParams>,
}

/// One hit returned by a search, local or remote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Code system the hit belongs to.
    pub system: String,
    /// The code itself.
    pub code: String,
    /// Human-readable display text.
    pub display: String,
    /// Relevance score, higher is better.
    pub score: f64,
    /// Optional hit type discriminator.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub hit_type: Option<String>,
}

/// One searchable entry extracted from a source document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Code system of the entry.
    pub system: String,
    /// The code.
    pub code: String,
    /// Primary display text.
    pub display: String,
    /// Additional matchable terms.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub synonyms: Vec<String>,
}

/// The versioned, cached output of transforming a source document
/// into a searchable payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildArtifact {
    /// All searchable entries extracted from the document.
    pub entries: Vec<IndexEntry>,
}

impl BuildArtifact {
    /// Number of extracted entries.
    pub fn item_count(&self) -> usize {
        self.entries.len()
    }
}

/// Resolves a source id to its backing descriptor.
pub trait SourceRegistry: Send + Sync {
    /// Resolve one source, or `None` if unknown.
    fn resolve(&self, source_id: &str) -> Option<SourceDescriptor>;

    /// All registered source ids, used when a search names none.
    fn source_ids(&self) -> Vec<String>;
}

/// Client for rate-limited external terminology lookups.
///
/// One call per distinct `(lookup_type, params, query)` per poll
/// cycle; implementations may be invoked redundantly for the same
/// logical request and must tolerate that.
#[async_trait]
pub trait RemoteSearchClient: Send + Sync {
    async fn search(
        &self,
        lookup_type: &str,
        query: &str,
        params: &BTreeMap<String, String>,
    ) -> Result<Vec<SearchHit>, RemoteError>;
}

/// Pluggable component producing a build artifact for one document
/// kind. The builder owns document access for its kind.
#[async_trait]
pub trait IndexBuilder: Send + Sync {
    /// The document kind this builder handles.
    fn kind(&self) -> SourceKind;

    /// Build the searchable artifact for the descriptor's current
    /// document version. Must be safe to run redundantly.
    async fn build(&self, descriptor: &SourceDescriptor) -> Result<BuildArtifact, BuildError>;
}

//! The repository client contract the ingesters drive.
//!
//! The repository itself is an external collaborator; everything here is the
//! consumed surface: transaction control, identity-based lookup, resource
//! upserts and a bounded-parallel [`map_bounded`] primitive. A thin HTTP
//! implementation lives in [`http`]; tests run against the in-memory
//! implementation in [`crate::fixture`].

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::rdf::{MetadataNode, NamedNode, Term};
use crate::schema::Schema;

pub mod error;
pub mod http;
pub mod map;

pub use error::RepoError;
pub use http::HttpRepository;
pub use map::map_bounded;

/// A handle to a repository resource: its URI plus locally cached metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoResource {
    /// The repository-internal URI.
    pub uri: NamedNode,
    /// Metadata as of the last response that carried it.
    pub meta: MetadataNode,
}

impl RepoResource {
    /// All identifiers of the resource under the schema's id predicate.
    pub fn ids(&self, schema: &Schema) -> Vec<NamedNode> {
        let mut ids = self.meta.ids(&schema.id);
        if !ids.contains(&self.uri) {
            ids.push(self.uri.clone());
        }
        ids
    }

    /// Whether the cached metadata claims a non-empty binary payload.
    pub fn has_binary(&self, schema: &Schema) -> bool {
        self.meta
            .first_str(&schema.binary_size)
            .and_then(|v| v.parse::<u64>().ok())
            .is_some_and(|size| size > 0)
    }
}

/// Outcome of an identity lookup. A miss routes control flow; it is not an
/// error.
#[derive(Debug, Clone)]
pub enum LookupResult {
    /// A resource carrying at least one of the requested ids.
    Found(RepoResource),
    /// No resource carries any of the requested ids.
    NotFound,
}

impl LookupResult {
    /// The resource, if the lookup hit.
    pub fn found(self) -> Option<RepoResource> {
        match self {
            LookupResult::Found(res) => Some(res),
            LookupResult::NotFound => None,
        }
    }
}

/// How [`Repository::update_metadata`] combines submitted metadata with
/// what is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    /// Union the submitted triples with the stored ones.
    Merge,
    /// Replace the stored description with the submitted one.
    Overwrite,
}

/// One `(predicate, object)` condition for [`Repository::search`].
///
/// A multi-term search returns the union of per-term matches.
#[derive(Debug, Clone)]
pub struct SearchTerm {
    /// The predicate to match on.
    pub predicate: NamedNode,
    /// The object value to match.
    pub value: Term,
}

/// Where an upload body comes from.
#[derive(Debug, Clone)]
pub enum BinarySource {
    /// Stream from a file on disk.
    Path(PathBuf),
    /// An in-memory body.
    Bytes(Vec<u8>),
}

/// An upload body plus its transport metadata.
#[derive(Debug, Clone)]
pub struct BinaryPayload {
    /// The body.
    pub source: BinarySource,
    /// Media type, when known.
    pub mime: Option<String>,
    /// Original file name, when known.
    pub file_name: Option<String>,
}

impl BinaryPayload {
    /// A payload backed by a file on disk.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            source: BinarySource::Path(path.into()),
            mime: None,
            file_name: None,
        }
    }

    /// A payload backed by an in-memory buffer.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            source: BinarySource::Bytes(bytes),
            mime: None,
            file_name: None,
        }
    }

    /// Set the media type.
    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }

    /// Set the original file name.
    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    /// Read the whole body into memory.
    pub fn read(&self) -> std::io::Result<Vec<u8>> {
        match &self.source {
            BinarySource::Path(path) => std::fs::read(path),
            BinarySource::Bytes(bytes) => Ok(bytes.clone()),
        }
    }
}

/// The transactional repository API.
///
/// Transactions are process-wide: one open transaction at a time, shared by
/// every request the client makes. The ingesters commit/begin only at chunk
/// boundaries; individual tasks never touch transaction state.
#[async_trait]
pub trait Repository: Send + Sync + fmt::Debug {
    /// The repository's schema handles.
    fn schema(&self) -> &Schema;

    /// URI prefix identifying repository-internal resources.
    fn base_url(&self) -> &str;

    /// Open a transaction.
    async fn begin(&self) -> Result<(), RepoError>;

    /// Commit the open transaction.
    async fn commit(&self) -> Result<(), RepoError>;

    /// Abort the open transaction, discarding uncommitted changes.
    async fn rollback(&self) -> Result<(), RepoError>;

    /// Extend the open transaction's lifetime.
    async fn prolong(&self) -> Result<(), RepoError>;

    /// Create a resource from `meta`, optionally with a binary payload.
    async fn create_resource(
        &self,
        meta: &MetadataNode,
        binary: Option<&BinaryPayload>,
    ) -> Result<RepoResource, RepoError>;

    /// Find the resource carrying any of `ids`.
    async fn resource_by_ids(&self, ids: &[NamedNode]) -> Result<LookupResult, RepoError>;

    /// All resources matching any of `terms`.
    async fn search(&self, terms: &[SearchTerm]) -> Result<Vec<RepoResource>, RepoError>;

    /// Write `meta` onto an existing resource.
    async fn update_metadata(
        &self,
        resource: &RepoResource,
        mode: UpdateMode,
        meta: &MetadataNode,
    ) -> Result<RepoResource, RepoError>;

    /// Replace the resource's binary payload.
    async fn update_content(
        &self,
        resource: &RepoResource,
        binary: &BinaryPayload,
    ) -> Result<RepoResource, RepoError>;

    /// Delete the resource, optionally dropping references to it and
    /// deleting its children recursively.
    async fn delete(
        &self,
        resource: &RepoResource,
        with_references: bool,
        with_children: bool,
    ) -> Result<(), RepoError>;
}

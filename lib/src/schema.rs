//! Predicate and class URIs configured by the target repository.
//!
//! The repository publishes which predicates it uses for identifiers,
//! labels, parent links and so on; every ingester reads them from here
//! instead of hard-coding URIs.

use serde::{Deserialize, Serialize};

use crate::rdf::NamedNode;

/// The repository's schema handles, as served by its `describe` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    /// Predicate under which alternate identifiers are published.
    pub id: NamedNode,
    /// Predicate for human-readable labels.
    pub label: NamedNode,
    /// Predicate linking a resource to its parent collection.
    pub parent: NamedNode,
    /// Predicate storing the binary payload hash as `<algo>:<hex>`.
    pub hash: NamedNode,
    /// Predicate for persistent identifiers.
    pub pid: NamedNode,
    /// Predicate storing the binary payload's last modification timestamp.
    pub modification_date: NamedNode,
    /// Predicate storing the binary payload size in bytes.
    pub binary_size: NamedNode,
    /// Predicate storing the binary payload's media type.
    pub mime: NamedNode,
    /// Predicate storing the original file name.
    pub file_name: NamedNode,
    /// Predicate linking a version to the resource it supersedes.
    pub is_new_version_of: NamedNode,
    /// Predicate linking a superseded resource to its successor.
    pub is_prev_version_of: NamedNode,
    /// `rdf:type` asserted on directory resources.
    pub collection_class: NamedNode,
    /// `rdf:type` asserted on file resources.
    pub binary_class: NamedNode,
    /// URI prefix reserved for synthetic ids attached to old versions.
    pub vid_namespace: String,
}

impl Schema {
    /// The schema of the reference ACDH deployment.
    ///
    /// Used as the fixture schema in tests and as a fallback when a
    /// repository predates the `describe` endpoint.
    pub fn arche_defaults() -> Self {
        const NS: &str = "https://vocabs.acdh.oeaw.ac.at/schema#";
        let p = |local: &str| NamedNode::new(format!("{NS}{local}"));
        Schema {
            id: p("hasIdentifier"),
            label: p("hasTitle"),
            parent: p("isPartOf"),
            hash: p("hasHash"),
            pid: p("hasPid"),
            modification_date: p("hasUpdatedDate"),
            binary_size: p("hasBinarySize"),
            mime: p("hasFormat"),
            file_name: p("hasFilename"),
            is_new_version_of: p("isNewVersionOf"),
            is_prev_version_of: p("isPrevVersionOf"),
            collection_class: p("Collection"),
            binary_class: p("Resource"),
            vid_namespace: "https://id.acdh.oeaw.ac.at/vid/".to_string(),
        }
    }

    /// Mint a fresh dummy identifier in the `vid:` namespace.
    pub fn mint_vid(&self) -> NamedNode {
        NamedNode::new(format!("{}{}", self.vid_namespace, uuid::Uuid::new_v4()))
    }
}

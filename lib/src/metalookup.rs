//! External metadata sources for ingested files.
//!
//! A lookup is handed the file's path and its derived identifiers and
//! answers with a metadata node. The three shipped variants cover the usual
//! setups: one node for everything, a sidecar file next to each ingested
//! file, and a metadata graph keyed by identifier.

use std::fmt;
use std::path::Path;

use crate::rdf::{Graph, MetadataNode, NamedNode, RdfFormat, Term};

/// A failed metadata lookup.
#[derive(Debug, thiserror::Error)]
pub enum MetaLookupError {
    /// No metadata was found and the caller required some.
    #[error("no metadata found for {0}")]
    NotFound(String),
    /// More than one metadata node matched.
    #[error("metadata for {0} is ambiguous")]
    Ambiguous(String),
    /// A sidecar file exists but cannot be read.
    #[error("cannot read metadata file {path}: {source}")]
    Io {
        /// The sidecar path.
        path: String,
        /// The underlying error.
        source: std::io::Error,
    },
    /// A sidecar file exists but does not parse.
    #[error(transparent)]
    Parse(#[from] crate::rdf::ntriples::ParseError),
}

/// Capability of resolving file metadata from an external source.
pub trait MetaLookup: Send + Sync + fmt::Debug {
    /// Return the metadata node for `path`, known under `identifiers`.
    ///
    /// When nothing is found and `require` is false, an empty node bound to
    /// the first identifier is returned instead of an error.
    fn get(
        &self,
        path: &Path,
        identifiers: &[NamedNode],
        require: bool,
    ) -> Result<MetadataNode, MetaLookupError>;
}

fn none_found(
    path: &Path,
    identifiers: &[NamedNode],
    require: bool,
) -> Result<MetadataNode, MetaLookupError> {
    if require {
        return Err(MetaLookupError::NotFound(path.display().to_string()));
    }
    let subject = identifiers
        .first()
        .map(|id| Term::Named(id.clone()))
        .ok_or_else(|| MetaLookupError::NotFound(path.display().to_string()))?;
    Ok(MetadataNode::new(subject))
}

/// Returns a clone of one preset node for every file.
#[derive(Debug, Clone)]
pub struct ConstantMetaLookup {
    node: MetadataNode,
}

impl ConstantMetaLookup {
    /// Use `node` as the answer to every lookup.
    pub fn new(node: MetadataNode) -> Self {
        Self { node }
    }
}

impl MetaLookup for ConstantMetaLookup {
    fn get(
        &self,
        _path: &Path,
        _identifiers: &[NamedNode],
        _require: bool,
    ) -> Result<MetadataNode, MetaLookupError> {
        Ok(self.node.clone())
    }
}

/// Scans configured locations for a `basename + extension` sidecar file.
#[derive(Debug, Clone)]
pub struct FileSidecarMetaLookup {
    /// Directories to scan; relative ones are resolved against the ingested
    /// file's directory.
    locations: Vec<std::path::PathBuf>,
    /// Appended verbatim to the file's basename, e.g. `.meta.nt`.
    extension: String,
    format: RdfFormat,
}

impl FileSidecarMetaLookup {
    /// Look for `basename(file) + extension` in each of `locations`.
    pub fn new(
        locations: Vec<std::path::PathBuf>,
        extension: impl Into<String>,
        format: RdfFormat,
    ) -> Self {
        Self {
            locations,
            extension: extension.into(),
            format,
        }
    }

    fn candidate(&self, location: &Path, file: &Path) -> Option<std::path::PathBuf> {
        let base = file.file_name()?;
        let mut name = base.to_os_string();
        name.push(&self.extension);
        let dir = if location.is_absolute() {
            location.to_path_buf()
        } else {
            file.parent()?.join(location)
        };
        Some(dir.join(name))
    }
}

impl MetaLookup for FileSidecarMetaLookup {
    fn get(
        &self,
        path: &Path,
        identifiers: &[NamedNode],
        require: bool,
    ) -> Result<MetadataNode, MetaLookupError> {
        for location in &self.locations {
            let Some(candidate) = self.candidate(location, path) else {
                continue;
            };
            if !candidate.is_file() {
                continue;
            }
            let content =
                std::fs::read_to_string(&candidate).map_err(|source| MetaLookupError::Io {
                    path: candidate.display().to_string(),
                    source,
                })?;
            let graph = self.format.parse(&content)?;
            let mut subjects = graph.subjects();
            let Some(subject) = subjects.next() else {
                continue;
            };
            if subjects.next().is_some() {
                return Err(MetaLookupError::Ambiguous(candidate.display().to_string()));
            }
            return Ok(graph.node(subject).expect("subject is present"));
        }
        none_found(path, identifiers, require)
    }
}

/// Resolves metadata from a preloaded graph by identifier.
#[derive(Debug, Clone)]
pub struct GraphMetaLookup {
    graph: Graph,
    id_predicate: NamedNode,
}

impl GraphMetaLookup {
    /// Wrap a metadata graph.
    ///
    /// Every non-blank subject that carries properties is additionally
    /// asserted as its own identifier, so URI-addressed nodes are findable
    /// without an explicit id triple.
    pub fn new(mut graph: Graph, id_predicate: NamedNode) -> Self {
        let subjects: Vec<Term> = graph
            .subjects()
            .filter(|s| s.is_named())
            .cloned()
            .collect();
        for subject in subjects {
            graph.insert(subject.clone(), id_predicate.clone(), subject);
        }
        Self {
            graph,
            id_predicate,
        }
    }
}

impl MetaLookup for GraphMetaLookup {
    fn get(
        &self,
        path: &Path,
        identifiers: &[NamedNode],
        require: bool,
    ) -> Result<MetadataNode, MetaLookupError> {
        let mut matches: Vec<&Term> = Vec::new();
        for id in identifiers {
            let id = Term::Named(id.clone());
            for subject in self.graph.subjects_with(&self.id_predicate, &id) {
                if !matches.contains(&subject) {
                    matches.push(subject);
                }
            }
        }
        match matches.as_slice() {
            [] => none_found(path, identifiers, require),
            [subject] => Ok(self.graph.node(subject).expect("subject is present")),
            _ => Err(MetaLookupError::Ambiguous(path.display().to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::*;

    fn id_pred() -> NamedNode {
        NamedNode::new("https://vocabs.acdh.oeaw.ac.at/schema#hasIdentifier")
    }

    #[test]
    fn constant_ignores_inputs() {
        let mut node = MetadataNode::new(Term::named("https://example.org/n"));
        node.add(id_pred(), Term::named("https://example.org/n"));
        let lookup = ConstantMetaLookup::new(node.clone());
        let got = lookup
            .get(Path::new("/whatever"), &[], true)
            .unwrap();
        assert_eq!(got, node);
    }

    #[test]
    fn sidecar_found_next_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, "payload").unwrap();
        let mut sidecar = std::fs::File::create(dir.path().join("a.txt.nt")).unwrap();
        writeln!(
            sidecar,
            "<https://example.org/a> <https://example.org/p> \"v\" ."
        )
        .unwrap();
        let lookup = FileSidecarMetaLookup::new(
            vec![std::path::PathBuf::from(".")],
            ".nt",
            RdfFormat::NTriples,
        );
        let node = lookup
            .get(&file, &[NamedNode::new("https://example.org/id")], true)
            .unwrap();
        assert_eq!(node.subject(), &Term::named("https://example.org/a"));
    }

    #[test]
    fn sidecar_with_two_subjects_is_ambiguous() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, "payload").unwrap();
        std::fs::write(
            dir.path().join("a.txt.nt"),
            "<https://example.org/a> <https://example.org/p> \"v\" .\n\
             <https://example.org/b> <https://example.org/p> \"w\" .\n",
        )
        .unwrap();
        let lookup = FileSidecarMetaLookup::new(
            vec![std::path::PathBuf::from(".")],
            ".nt",
            RdfFormat::NTriples,
        );
        let err = lookup
            .get(&file, &[NamedNode::new("https://example.org/id")], true)
            .unwrap_err();
        assert!(matches!(err, MetaLookupError::Ambiguous(_)));
    }

    #[test]
    fn sidecar_missing_yields_empty_node_when_not_required() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, "payload").unwrap();
        let lookup =
            FileSidecarMetaLookup::new(Vec::new(), ".nt", RdfFormat::NTriples);
        let id = NamedNode::new("https://example.org/id");
        let node = lookup.get(&file, &[id.clone()], false).unwrap();
        assert_eq!(node.subject(), &Term::Named(id.clone()));
        assert!(node.is_empty());
        assert!(lookup.get(&file, &[id], true).is_err());
    }

    #[test]
    fn graph_lookup_by_own_uri() {
        let mut graph = Graph::new();
        graph.insert(
            Term::named("https://example.org/a"),
            NamedNode::new("https://example.org/p"),
            Term::literal("v"),
        );
        let lookup = GraphMetaLookup::new(graph, id_pred());
        let node = lookup
            .get(
                Path::new("/f"),
                &[NamedNode::new("https://example.org/a")],
                true,
            )
            .unwrap();
        assert!(node.has(&id_pred()));
    }

    #[test]
    fn graph_lookup_ambiguous_when_two_subjects_share_id() {
        let shared = Term::named("https://example.org/shared");
        let mut graph = Graph::new();
        graph.insert(Term::named("https://example.org/a"), id_pred(), shared.clone());
        graph.insert(Term::named("https://example.org/b"), id_pred(), shared);
        let lookup = GraphMetaLookup::new(graph, id_pred());
        let err = lookup
            .get(
                Path::new("/f"),
                &[NamedNode::new("https://example.org/shared")],
                true,
            )
            .unwrap_err();
        assert!(matches!(err, MetaLookupError::Ambiguous(_)));
    }
}

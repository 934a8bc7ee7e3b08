//! A minimal RDF data model: terms, a flat triple store, the N-Triples
//! serialization and identifier-URI normalization.

pub mod graph;
pub mod normalize;
pub mod ntriples;
pub mod term;

pub use graph::{Description, Graph, MetadataNode, Resource};
pub use normalize::UriNormalizer;
pub use term::{BlankNode, Literal, NamedNode, Term};

/// Well-known vocabulary IRIs used by the ingesters.
pub mod vocab {
    /// `rdf:type`.
    pub const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";
    /// The XSD `anyURI` datatype.
    pub const XSD_ANY_URI: &str = "http://www.w3.org/2001/XMLSchema#anyURI";

    /// The SKOS namespace prefix.
    pub const SKOS_NS: &str = "http://www.w3.org/2004/02/skos/core#";
    /// `skos:ConceptScheme`.
    pub const SKOS_CONCEPT_SCHEME: &str = "http://www.w3.org/2004/02/skos/core#ConceptScheme";
    /// `skos:Collection`.
    pub const SKOS_COLLECTION: &str = "http://www.w3.org/2004/02/skos/core#Collection";
    /// `skos:OrderedCollection`.
    pub const SKOS_ORDERED_COLLECTION: &str =
        "http://www.w3.org/2004/02/skos/core#OrderedCollection";
    /// `skos:inScheme`.
    pub const SKOS_IN_SCHEME: &str = "http://www.w3.org/2004/02/skos/core#inScheme";
    /// `skos:exactMatch`.
    pub const SKOS_EXACT_MATCH: &str = "http://www.w3.org/2004/02/skos/core#exactMatch";
    /// `skos:prefLabel`.
    pub const SKOS_PREF_LABEL: &str = "http://www.w3.org/2004/02/skos/core#prefLabel";
    /// `skos:altLabel`.
    pub const SKOS_ALT_LABEL: &str = "http://www.w3.org/2004/02/skos/core#altLabel";
    /// The `skos:semanticRelation` predicates subject to relation filtering.
    pub const SKOS_SEMANTIC_RELATIONS: &[&str] = &[
        "http://www.w3.org/2004/02/skos/core#semanticRelation",
        "http://www.w3.org/2004/02/skos/core#broader",
        "http://www.w3.org/2004/02/skos/core#narrower",
        "http://www.w3.org/2004/02/skos/core#related",
        "http://www.w3.org/2004/02/skos/core#broaderTransitive",
        "http://www.w3.org/2004/02/skos/core#narrowerTransitive",
        "http://www.w3.org/2004/02/skos/core#broadMatch",
        "http://www.w3.org/2004/02/skos/core#narrowMatch",
        "http://www.w3.org/2004/02/skos/core#relatedMatch",
        "http://www.w3.org/2004/02/skos/core#closeMatch",
        "http://www.w3.org/2004/02/skos/core#mappingRelation",
    ];

    /// `foaf:Person`.
    pub const FOAF_PERSON: &str = "http://xmlns.com/foaf/0.1/Person";
    /// `foaf:Agent`.
    pub const FOAF_AGENT: &str = "http://xmlns.com/foaf/0.1/Agent";
}

/// Serializations the crate can read natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RdfFormat {
    /// N-Triples (`.nt`, `application/n-triples`).
    NTriples,
}

impl RdfFormat {
    /// Resolve a format from a file extension or media type.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim_start_matches('.') {
            "nt" | "ntriples" | "application/n-triples" => Some(Self::NTriples),
            _ => None,
        }
    }

    /// Parse a document in this format.
    pub fn parse(self, input: &str) -> Result<Graph, ntriples::ParseError> {
        match self {
            Self::NTriples => ntriples::parse_str(input),
        }
    }
}

impl std::str::FromStr for RdfFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| format!("unsupported RDF format: {s}"))
    }
}

//! Canonicalization of identifier URIs.
//!
//! Authority-file references arrive in many spellings (http vs https,
//! `www.` hosts, trailing path junk). The normalizer rewrites them into the
//! single canonical spelling the repository indexes, via an ordered
//! first-match-wins rule table.

use std::sync::OnceLock;

use regex::Regex;

use super::graph::MetadataNode;
use super::term::{NamedNode, Term};

/// The built-in rule table: `(pattern, replacement)` pairs.
///
/// Patterns are anchored; replacements use `$n` capture references.
const STANDARD_RULES: &[(&str, &str)] = &[
    (
        r"^https?://(?:[a-zA-Z0-9-]+\.)?geonames\.org/([0-9]+)(?:/.*)?$",
        "https://sws.geonames.org/$1/",
    ),
    (
        r"^https?://pleiades\.stoa\.org/places/([0-9]+)(?:/.*)?$",
        "https://pleiades.stoa.org/places/$1",
    ),
    (
        r"^https?://(?:www\.)?viaf\.org/viaf/([0-9]+)(?:/.*)?$",
        "https://viaf.org/viaf/$1",
    ),
    (
        r"^https?://(?:www\.)?d-nb\.info/gnd/([0-9]*-?[0-9xX]?)$",
        "https://d-nb.info/gnd/$1",
    ),
    (
        r"^https?://(?:www\.)?orcid\.org/([0-9]{4}-[0-9]{4}-[0-9]{4}-[0-9]{3}[0-9xX])(?:/.*)?$",
        "https://orcid.org/$1",
    ),
    (
        r"^https?://(?:www\.)?wikidata\.org/(?:wiki|entity)/(Q[0-9]+)$",
        "http://www.wikidata.org/entity/$1",
    ),
    (
        r"^http://id\.acdh\.oeaw\.ac\.at/(.*)$",
        "https://id.acdh.oeaw.ac.at/$1",
    ),
];

/// An ordered URI rewrite rule table.
#[derive(Debug)]
pub struct UriNormalizer {
    rules: Vec<(Regex, String)>,
}

impl UriNormalizer {
    /// Compile a rule table. Order matters; the first matching rule wins.
    pub fn new<'a>(
        rules: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<Self, regex::Error> {
        let rules = rules
            .into_iter()
            .map(|(pattern, replacement)| Ok((Regex::new(pattern)?, replacement.to_string())))
            .collect::<Result<_, regex::Error>>()?;
        Ok(Self { rules })
    }

    /// The process-wide table built from [`STANDARD_RULES`], compiled once.
    pub fn standard() -> &'static UriNormalizer {
        static STANDARD: OnceLock<UriNormalizer> = OnceLock::new();
        STANDARD.get_or_init(|| {
            UriNormalizer::new(STANDARD_RULES.iter().copied())
                .expect("built-in rule table must compile")
        })
    }

    /// Rewrite `uri` by the first matching rule, or return it unchanged.
    pub fn normalize(&self, uri: &str) -> String {
        for (pattern, replacement) in &self.rules {
            if pattern.is_match(uri) {
                return pattern.replace(uri, replacement.as_str()).into_owned();
            }
        }
        uri.to_string()
    }

    /// True when any rule matches `uri`.
    pub fn matches(&self, uri: &str) -> bool {
        self.rules.iter().any(|(pattern, _)| pattern.is_match(uri))
    }

    /// Normalize every named-node object of `predicate` on the node.
    pub fn normalize_objects(&self, node: &mut MetadataNode, predicate: &NamedNode) {
        let Some(objects) = node.remove(predicate) else {
            return;
        };
        for object in objects {
            let object = match object {
                Term::Named(n) => Term::named(self.normalize(n.as_str())),
                other => other,
            };
            node.add(predicate.clone(), object);
        }
    }
}

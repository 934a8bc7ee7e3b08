//! RDF term types: named nodes, blank nodes and literals.

use std::fmt::{self, Write as _};

/// An IRI-identified node.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct NamedNode(String);

impl NamedNode {
    /// Wrap an IRI string.
    pub fn new(iri: impl Into<String>) -> Self {
        Self(iri.into())
    }

    /// The IRI as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Unwrap into the IRI string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for NamedNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", self.0)
    }
}

impl From<&str> for NamedNode {
    fn from(iri: &str) -> Self {
        Self::new(iri)
    }
}

impl From<String> for NamedNode {
    fn from(iri: String) -> Self {
        Self::new(iri)
    }
}

/// A blank (anonymous) node with a document-scoped label.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlankNode(String);

impl BlankNode {
    /// Wrap a blank node label (without the `_:` prefix).
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    /// The label without the `_:` prefix.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlankNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "_:{}", self.0)
    }
}

/// A literal value with optional language tag or datatype.
///
/// A language-tagged literal never carries an explicit datatype; a plain
/// literal carries neither.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Literal {
    value: String,
    lang: Option<String>,
    datatype: Option<NamedNode>,
}

impl Literal {
    /// A plain literal.
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            lang: None,
            datatype: None,
        }
    }

    /// A language-tagged literal.
    pub fn with_lang(value: impl Into<String>, lang: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            lang: Some(lang.into()),
            datatype: None,
        }
    }

    /// A typed literal.
    pub fn with_datatype(value: impl Into<String>, datatype: impl Into<NamedNode>) -> Self {
        Self {
            value: value.into(),
            lang: None,
            datatype: Some(datatype.into()),
        }
    }

    /// The lexical value.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// The language tag, if any.
    pub fn lang(&self) -> Option<&str> {
        self.lang.as_deref()
    }

    /// The datatype IRI, if any.
    pub fn datatype(&self) -> Option<&NamedNode> {
        self.datatype.as_ref()
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_char('"')?;
        escape_into(f, &self.value)?;
        f.write_char('"')?;
        if let Some(lang) = &self.lang {
            write!(f, "@{lang}")?;
        } else if let Some(dt) = &self.datatype {
            write!(f, "^^{dt}")?;
        }
        Ok(())
    }
}

/// Any RDF term.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Term {
    /// An IRI-identified node.
    Named(NamedNode),
    /// A blank node.
    Blank(BlankNode),
    /// A literal value.
    Literal(Literal),
}

impl Term {
    /// Shorthand for a named term.
    pub fn named(iri: impl Into<String>) -> Self {
        Term::Named(NamedNode::new(iri))
    }

    /// Shorthand for a plain literal term.
    pub fn literal(value: impl Into<String>) -> Self {
        Term::Literal(Literal::new(value))
    }

    /// True for blank nodes.
    pub fn is_blank(&self) -> bool {
        matches!(self, Term::Blank(_))
    }

    /// True for named nodes.
    pub fn is_named(&self) -> bool {
        matches!(self, Term::Named(_))
    }

    /// The named node, if this term is one.
    pub fn as_named(&self) -> Option<&NamedNode> {
        match self {
            Term::Named(n) => Some(n),
            _ => None,
        }
    }

    /// The literal, if this term is one.
    pub fn as_literal(&self) -> Option<&Literal> {
        match self {
            Term::Literal(l) => Some(l),
            _ => None,
        }
    }

    /// The IRI of a named node, or the lexical value of a literal.
    ///
    /// Blank nodes yield their label; callers that must distinguish use
    /// [`Term::is_blank`] first.
    pub fn lexical(&self) -> &str {
        match self {
            Term::Named(n) => n.as_str(),
            Term::Blank(b) => b.as_str(),
            Term::Literal(l) => l.value(),
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Named(n) => n.fmt(f),
            Term::Blank(b) => b.fmt(f),
            Term::Literal(l) => l.fmt(f),
        }
    }
}

impl From<NamedNode> for Term {
    fn from(n: NamedNode) -> Self {
        Term::Named(n)
    }
}

impl From<Literal> for Term {
    fn from(l: Literal) -> Self {
        Term::Literal(l)
    }
}

impl From<BlankNode> for Term {
    fn from(b: BlankNode) -> Self {
        Term::Blank(b)
    }
}

fn escape_into(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    for c in s.chars() {
        match c {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\r' => f.write_str("\\r")?,
            '\t' => f.write_str("\\t")?,
            c => f.write_char(c)?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_forms() {
        assert_eq!(
            Term::named("https://example.org/a").to_string(),
            "<https://example.org/a>"
        );
        assert_eq!(Term::Blank(BlankNode::new("b0")).to_string(), "_:b0");
        assert_eq!(Term::literal("plain").to_string(), "\"plain\"");
        assert_eq!(
            Term::Literal(Literal::with_lang("Wien", "de")).to_string(),
            "\"Wien\"@de"
        );
        assert_eq!(
            Term::Literal(Literal::with_datatype(
                "42",
                "http://www.w3.org/2001/XMLSchema#integer"
            ))
            .to_string(),
            "\"42\"^^<http://www.w3.org/2001/XMLSchema#integer>"
        );
    }

    #[test]
    fn literal_escaping() {
        let l = Literal::new("a \"b\"\n\\c");
        assert_eq!(l.to_string(), "\"a \\\"b\\\"\\n\\\\c\"");
    }
}

//! Flat triple store and the per-subject metadata unit submitted to the
//! repository.
//!
//! The store is keyed subject-first, so "the description of a node" (all
//! triples sharing a subject) is a cheap index lookup rather than a scan.
//! Traversals that follow object references (reachability pruning, reference
//! rewriting) walk the index explicitly; there are no owning links between
//! nodes, so cyclic graphs need no special treatment.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use super::term::{NamedNode, Term};

/// All triples sharing one subject, keyed by predicate.
pub type Description = BTreeMap<NamedNode, BTreeSet<Term>>;

/// An RDF dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Graph {
    nodes: BTreeMap<Term, Description>,
}

impl Graph {
    /// An empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one triple.
    pub fn insert(&mut self, subject: impl Into<Term>, predicate: NamedNode, object: Term) {
        self.nodes
            .entry(subject.into())
            .or_default()
            .entry(predicate)
            .or_default()
            .insert(object);
    }

    /// Remove one triple. Returns whether it was present.
    pub fn remove(&mut self, subject: &Term, predicate: &NamedNode, object: &Term) -> bool {
        let Some(desc) = self.nodes.get_mut(subject) else {
            return false;
        };
        let Some(objects) = desc.get_mut(predicate) else {
            return false;
        };
        let removed = objects.remove(object);
        if objects.is_empty() {
            desc.remove(predicate);
        }
        if desc.is_empty() {
            self.nodes.remove(subject);
        }
        removed
    }

    /// Remove a whole subject, returning its description as an owned node.
    pub fn take(&mut self, subject: &Term) -> Option<MetadataNode> {
        self.nodes.remove(subject).map(|props| MetadataNode {
            subject: subject.clone(),
            props,
        })
    }

    /// Keep only triples for which `f` returns true.
    pub fn retain<F>(&mut self, mut f: F)
    where
        F: FnMut(&Term, &NamedNode, &Term) -> bool,
    {
        self.nodes.retain(|subject, desc| {
            desc.retain(|predicate, objects| {
                objects.retain(|object| f(subject, predicate, object));
                !objects.is_empty()
            });
            !desc.is_empty()
        });
    }

    /// Iterate over distinct subjects.
    pub fn subjects(&self) -> impl Iterator<Item = &Term> {
        self.nodes.keys()
    }

    /// The description of `subject`, if present.
    pub fn description(&self, subject: &Term) -> Option<&Description> {
        self.nodes.get(subject)
    }

    /// A borrowed view of `subject` plus its description.
    pub fn resource<'g>(&'g self, subject: &Term) -> Option<Resource<'g>> {
        self.nodes
            .get_key_value(subject)
            .map(|(subject, props)| Resource { subject, props })
    }

    /// True when `subject` has at least one triple.
    pub fn contains(&self, subject: &Term) -> bool {
        self.nodes.contains_key(subject)
    }

    /// Objects of `(subject, predicate, ?)`.
    pub fn objects<'g>(
        &'g self,
        subject: &Term,
        predicate: &NamedNode,
    ) -> impl Iterator<Item = &'g Term> {
        self.nodes
            .get(subject)
            .and_then(|desc| desc.get(predicate))
            .into_iter()
            .flatten()
    }

    /// First object of `(subject, predicate, ?)` in term order.
    pub fn first_object(&self, subject: &Term, predicate: &NamedNode) -> Option<&Term> {
        self.objects(subject, predicate).next()
    }

    /// Subjects of `(?, predicate, object)`. Linear in the store size.
    pub fn subjects_with<'g>(&'g self, predicate: &NamedNode, object: &Term) -> Vec<&'g Term> {
        self.nodes
            .iter()
            .filter(|(_, desc)| desc.get(predicate).is_some_and(|o| o.contains(object)))
            .map(|(subject, _)| subject)
            .collect()
    }

    /// Clone the description of `subject` into an owned node.
    pub fn node(&self, subject: &Term) -> Option<MetadataNode> {
        self.nodes.get(subject).map(|props| MetadataNode {
            subject: subject.clone(),
            props: props.clone(),
        })
    }

    /// Merge an owned node's triples into the graph.
    pub fn add_node(&mut self, node: MetadataNode) {
        let desc = self.nodes.entry(node.subject).or_default();
        for (predicate, objects) in node.props {
            desc.entry(predicate).or_default().extend(objects);
        }
    }

    /// Total triple count.
    pub fn len(&self) -> usize {
        self.nodes.values().flat_map(|d| d.values()).map(BTreeSet::len).sum()
    }

    /// True when the graph holds no triples.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterate over all triples in subject-major order.
    pub fn iter(&self) -> impl Iterator<Item = (&Term, &NamedNode, &Term)> {
        self.nodes.iter().flat_map(|(subject, desc)| {
            desc.iter().flat_map(move |(predicate, objects)| {
                objects.iter().map(move |object| (subject, predicate, object))
            })
        })
    }
}

/// A borrowed "subject plus description" view into a [`Graph`].
#[derive(Debug, Clone, Copy)]
pub struct Resource<'g> {
    subject: &'g Term,
    props: &'g Description,
}

impl<'g> Resource<'g> {
    /// The subject term.
    pub fn subject(&self) -> &'g Term {
        self.subject
    }

    /// Objects under `predicate`.
    pub fn objects(&self, predicate: &NamedNode) -> impl Iterator<Item = &'g Term> {
        self.props.get(predicate).into_iter().flatten()
    }

    /// First object under `predicate` in term order.
    pub fn first(&self, predicate: &NamedNode) -> Option<&'g Term> {
        self.objects(predicate).next()
    }

    /// True when the subject carries `predicate`.
    pub fn has(&self, predicate: &NamedNode) -> bool {
        self.props.contains_key(predicate)
    }

    /// Iterate over `(predicate, object)` pairs.
    pub fn properties(&self) -> impl Iterator<Item = (&'g NamedNode, &'g Term)> {
        self.props
            .iter()
            .flat_map(|(predicate, objects)| objects.iter().map(move |o| (predicate, o)))
    }

    /// Number of distinct predicates.
    pub fn predicate_count(&self) -> usize {
        self.props.len()
    }
}

/// A subject node plus the set of triples whose subject it is.
///
/// This is the owned, mutable unit that metadata lookups produce, the
/// ingesters enrich and the repository client submits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataNode {
    subject: Term,
    props: Description,
}

impl MetadataNode {
    /// An empty node bound to `subject`.
    pub fn new(subject: impl Into<Term>) -> Self {
        Self {
            subject: subject.into(),
            props: Description::default(),
        }
    }

    /// The subject term.
    pub fn subject(&self) -> &Term {
        &self.subject
    }

    /// Rebind the node to another subject, keeping its properties.
    pub fn set_subject(&mut self, subject: impl Into<Term>) {
        self.subject = subject.into();
    }

    /// Add one `(predicate, object)` pair.
    pub fn add(&mut self, predicate: NamedNode, object: impl Into<Term>) {
        self.props.entry(predicate).or_default().insert(object.into());
    }

    /// Replace all objects under `predicate` with a single one.
    pub fn set(&mut self, predicate: NamedNode, object: impl Into<Term>) {
        let objects = self.props.entry(predicate).or_default();
        objects.clear();
        objects.insert(object.into());
    }

    /// Drop `predicate` entirely, returning its objects.
    pub fn remove(&mut self, predicate: &NamedNode) -> Option<BTreeSet<Term>> {
        self.props.remove(predicate)
    }

    /// Drop a single `(predicate, object)` pair.
    pub fn remove_value(&mut self, predicate: &NamedNode, object: &Term) -> bool {
        let Some(objects) = self.props.get_mut(predicate) else {
            return false;
        };
        let removed = objects.remove(object);
        if objects.is_empty() {
            self.props.remove(predicate);
        }
        removed
    }

    /// Objects under `predicate`.
    pub fn objects<'a>(&'a self, predicate: &NamedNode) -> impl Iterator<Item = &'a Term> {
        self.props.get(predicate).into_iter().flatten()
    }

    /// First object under `predicate` in term order.
    pub fn first(&self, predicate: &NamedNode) -> Option<&Term> {
        self.objects(predicate).next()
    }

    /// First literal or named-node value under `predicate`, as a string.
    pub fn first_str(&self, predicate: &NamedNode) -> Option<&str> {
        self.first(predicate).map(Term::lexical)
    }

    /// True when the node carries `predicate`.
    pub fn has(&self, predicate: &NamedNode) -> bool {
        self.props.contains_key(predicate)
    }

    /// Named-node identifiers published under the id predicate.
    ///
    /// Literal-valued ids are not identifiers and are skipped.
    pub fn ids(&self, id_predicate: &NamedNode) -> Vec<NamedNode> {
        self.objects(id_predicate)
            .filter_map(Term::as_named)
            .cloned()
            .collect()
    }

    /// Union the other node's properties into this one.
    pub fn merge(&mut self, other: &MetadataNode) {
        for (predicate, objects) in &other.props {
            self.props
                .entry(predicate.clone())
                .or_default()
                .extend(objects.iter().cloned());
        }
    }

    /// Keep only `(predicate, object)` pairs for which `f` returns true.
    pub fn retain<F>(&mut self, mut f: F)
    where
        F: FnMut(&NamedNode, &Term) -> bool,
    {
        self.props.retain(|predicate, objects| {
            objects.retain(|object| f(predicate, object));
            !objects.is_empty()
        });
    }

    /// Iterate over `(predicate, object)` pairs.
    pub fn properties(&self) -> impl Iterator<Item = (&NamedNode, &Term)> {
        self.props
            .iter()
            .flat_map(|(predicate, objects)| objects.iter().map(move |o| (predicate, o)))
    }

    /// Iterate over distinct predicates.
    pub fn predicates(&self) -> impl Iterator<Item = &NamedNode> {
        self.props.keys()
    }

    /// Number of distinct predicates.
    pub fn predicate_count(&self) -> usize {
        self.props.len()
    }

    /// True when the node carries no properties at all.
    pub fn is_empty(&self) -> bool {
        self.props.is_empty()
    }
}

impl fmt::Display for MetadataNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (predicate, object) in self.properties() {
            writeln!(f, "{} {} {} .", self.subject, predicate, object)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(s: &str) -> NamedNode {
        NamedNode::new(s)
    }

    #[test]
    fn insert_remove_roundtrip() {
        let mut g = Graph::new();
        let s = Term::named("https://example.org/s");
        g.insert(s.clone(), named("https://example.org/p"), Term::literal("v"));
        g.insert(s.clone(), named("https://example.org/p"), Term::literal("w"));
        assert_eq!(g.len(), 2);
        assert!(g.remove(&s, &named("https://example.org/p"), &Term::literal("v")));
        assert_eq!(g.len(), 1);
        assert!(g.remove(&s, &named("https://example.org/p"), &Term::literal("w")));
        assert!(g.is_empty());
        assert!(!g.contains(&s));
    }

    #[test]
    fn subjects_with_scans_objects() {
        let mut g = Graph::new();
        let p = named("https://example.org/ref");
        let target = Term::named("https://example.org/t");
        g.insert(Term::named("https://example.org/a"), p.clone(), target.clone());
        g.insert(Term::named("https://example.org/b"), p.clone(), Term::literal("x"));
        let hits = g.subjects_with(&p, &target);
        assert_eq!(hits, vec![&Term::named("https://example.org/a")]);
    }

    #[test]
    fn node_merge_unions() {
        let p = named("https://example.org/p");
        let mut a = MetadataNode::new(Term::named("https://example.org/s"));
        a.add(p.clone(), Term::literal("1"));
        let mut b = MetadataNode::new(Term::named("https://example.org/s"));
        b.add(p.clone(), Term::literal("1"));
        b.add(p.clone(), Term::literal("2"));
        a.merge(&b);
        assert_eq!(a.objects(&p).count(), 2);
    }

    #[test]
    fn set_replaces_all_objects() {
        let p = named("https://example.org/p");
        let mut n = MetadataNode::new(Term::named("https://example.org/s"));
        n.add(p.clone(), Term::literal("1"));
        n.add(p.clone(), Term::literal("2"));
        n.set(p.clone(), Term::literal("3"));
        assert_eq!(n.objects(&p).count(), 1);
        assert_eq!(n.first_str(&p), Some("3"));
    }

    #[test]
    fn ids_skip_literals_and_blanks() {
        let id = named("https://example.org/id");
        let mut n = MetadataNode::new(Term::named("https://example.org/s"));
        n.add(id.clone(), Term::named("https://example.org/alt"));
        n.add(id.clone(), Term::literal("not-an-id"));
        let ids = n.ids(&id);
        assert_eq!(ids, vec![named("https://example.org/alt")]);
    }
}

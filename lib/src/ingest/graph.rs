//! Generic RDF-graph importer: reconcile node identities with the
//! repository, rewrite cross-references and upsert node by node.

use std::collections::HashMap;

use super::{ChunkItem, ErrorMode, IngestError, IngestOutcome, Scheduler};
use crate::rdf::{vocab, Graph, MetadataNode, NamedNode, Term, UriNormalizer};
use crate::repo::{LookupResult, RepoResource, Repository, UpdateMode};

/// What to do with nodes that carry nothing but an identifier and live
/// outside the configured namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutOfNamespace {
    /// Import them like everything else.
    #[default]
    Add,
    /// Leave them out; references to them keep pointing at the original URI.
    Skip,
}

/// Configuration of a graph ingest.
#[derive(Debug)]
pub struct GraphIngestOpts {
    /// The id namespace of resources this ingest owns.
    pub namespace: String,
    /// Policy for property-less out-of-namespace nodes.
    pub single_out_namespace: OutOfNamespace,
    /// Optional parent resource asserted on every imported node.
    pub parent: Option<NamedNode>,
    /// Commit-then-begin after each this many processed resources; 0 is off.
    pub auto_commit: usize,
    /// Fatal-error routing.
    pub error_mode: ErrorMode,
    /// Maximum in-flight repository requests.
    pub concurrency: usize,
    /// Maximum re-enqueues per node.
    pub retries: u32,
}

impl Default for GraphIngestOpts {
    fn default() -> Self {
        Self {
            namespace: String::new(),
            single_out_namespace: OutOfNamespace::Add,
            parent: None,
            auto_commit: 0,
            error_mode: ErrorMode::Fail,
            concurrency: 4,
            retries: 3,
        }
    }
}

#[derive(Debug, Clone)]
struct UpsertItem {
    node: MetadataNode,
    resource: RepoResource,
    created: bool,
    attempts: u32,
}

impl ChunkItem for UpsertItem {
    fn describe(&self) -> String {
        self.node.subject().lexical().to_string()
    }

    fn attempts(&self) -> u32 {
        self.attempts
    }

    fn bump_attempts(&mut self) {
        self.attempts += 1;
    }
}

/// Imports an arbitrary RDF graph as a set of repository resources.
#[derive(Debug)]
pub struct GraphIngester {
    opts: GraphIngestOpts,
}

impl GraphIngester {
    /// Build an ingester with the given options.
    pub fn new(opts: GraphIngestOpts) -> Self {
        Self { opts }
    }

    /// Import `graph` within the caller's open transaction.
    ///
    /// Running the same graph twice touches the same resource set; no
    /// duplicates are created.
    pub async fn import(
        &self,
        repo: &dyn Repository,
        mut graph: Graph,
    ) -> Result<Vec<IngestOutcome>, IngestError> {
        let schema = repo.schema().clone();
        let normalizer = UriNormalizer::standard();

        remove_literal_ids(&mut graph, &schema.id);
        promote_uris_to_ids(&mut graph, &schema.id);
        let subjects = self.filter(&graph, &schema.id);
        tracing::info!(
            nodes = subjects.len(),
            triples = graph.len(),
            "graph filtered for import"
        );

        let mut rewrite = HashMap::new();
        let mut items = Vec::with_capacity(subjects.len());
        for subject in &subjects {
            normalize_ids(&mut graph, subject, &schema.id, normalizer);
            let (resource, created) = self
                .assure_resource(repo, &graph, subject, &schema.id, &schema.label)
                .await?;
            for id in graph
                .objects(subject, &schema.id)
                .filter_map(Term::as_named)
            {
                rewrite.insert(id.as_str().to_string(), resource.uri.clone());
            }
            items.push((subject.clone(), resource, created));
        }

        rewrite_references(&mut graph, &schema.id, &rewrite);

        let items: Vec<UpsertItem> = items
            .into_iter()
            .map(|(subject, resource, created)| UpsertItem {
                node: graph.node(&subject).expect("imported subject is present"),
                resource,
                created,
                attempts: 0,
            })
            .collect();

        let scheduler = Scheduler {
            repo,
            concurrency: self.opts.concurrency,
            retries: self.opts.retries,
            auto_commit: self.opts.auto_commit,
            error_mode: self.opts.error_mode,
        };
        let opts = &self.opts;
        let schema = &schema;
        scheduler
            .run(items, |item| async move {
                let node = sanitize(item.node, schema, opts, normalizer)?;
                let res = repo
                    .update_metadata(&item.resource, UpdateMode::Merge, &node)
                    .await?;
                Ok(if item.created {
                    IngestOutcome::Created(res)
                } else {
                    IngestOutcome::Updated(res)
                })
            })
            .await
    }

    /// Select the subjects worth importing.
    ///
    /// A node must carry an id; nodes that carry nothing else are dropped
    /// when they merely repeat an id assigned elsewhere, or (by policy) when
    /// they live outside the configured namespace.
    fn filter(&self, graph: &Graph, id_predicate: &NamedNode) -> Vec<Term> {
        let mut out = Vec::new();
        for subject in graph.subjects() {
            if subject.is_blank() {
                continue;
            }
            let ids: Vec<&NamedNode> = graph
                .objects(subject, id_predicate)
                .filter_map(Term::as_named)
                .collect();
            if ids.is_empty() {
                continue;
            }
            let only_ids = graph
                .description(subject)
                .is_some_and(|desc| desc.keys().all(|p| p == id_predicate));
            if only_ids {
                let assigned_elsewhere = graph
                    .subjects_with(id_predicate, subject)
                    .iter()
                    .any(|s| *s != subject);
                if assigned_elsewhere {
                    continue;
                }
                let in_namespace = !self.opts.namespace.is_empty()
                    && ids.iter().any(|id| id.as_str().starts_with(&self.opts.namespace));
                if !in_namespace && self.opts.single_out_namespace == OutOfNamespace::Skip {
                    continue;
                }
            }
            out.push(subject.clone());
        }
        out
    }

    /// Find or create the repository resource behind a graph node.
    async fn assure_resource(
        &self,
        repo: &dyn Repository,
        graph: &Graph,
        subject: &Term,
        id_predicate: &NamedNode,
        label_predicate: &NamedNode,
    ) -> Result<(RepoResource, bool), IngestError> {
        let ids: Vec<NamedNode> = graph
            .objects(subject, id_predicate)
            .filter_map(Term::as_named)
            .cloned()
            .collect();
        match repo.resource_by_ids(&ids).await? {
            LookupResult::Found(res) => Ok((res, false)),
            LookupResult::NotFound => {
                let mut stub = MetadataNode::new(subject.clone());
                for id in &ids {
                    stub.add(id_predicate.clone(), Term::Named(id.clone()));
                }
                // Creation requires a label; prefer the node's own over a
                // synthesized one.
                match graph.first_object(subject, label_predicate) {
                    Some(label) => stub.add(label_predicate.clone(), label.clone()),
                    None => stub.add(
                        label_predicate.clone(),
                        Term::literal(self.synthetic_label(&ids)),
                    ),
                }
                let res = repo.create_resource(&stub, None).await?;
                tracing::debug!(subject = %subject, uri = %res.uri, "created stub resource");
                Ok((res, true))
            }
        }
    }

    /// A label derived from the node's id, with the namespace stripped.
    fn synthetic_label(&self, ids: &[NamedNode]) -> String {
        let namespace = &self.opts.namespace;
        for id in ids {
            if !namespace.is_empty() {
                if let Some(rest) = id.as_str().strip_prefix(namespace.as_str()) {
                    return rest.to_string();
                }
            }
        }
        ids.first()
            .map(|id| id.as_str().to_string())
            .unwrap_or_default()
    }
}

/// Drop id triples whose object is a literal. Identifiers are URIs; a
/// literal there is input noise.
fn remove_literal_ids(graph: &mut Graph, id_predicate: &NamedNode) {
    graph.retain(|_, p, o| !(p == id_predicate && matches!(o, Term::Literal(_))));
}

/// Make every URI-addressed node findable by its own URI.
fn promote_uris_to_ids(graph: &mut Graph, id_predicate: &NamedNode) {
    let subjects: Vec<Term> = graph
        .subjects()
        .filter(|s| s.is_named())
        .cloned()
        .collect();
    for subject in subjects {
        graph.insert(subject.clone(), id_predicate.clone(), subject);
    }
}

/// Apply the normalizer to a node's id set inside the graph.
fn normalize_ids(
    graph: &mut Graph,
    subject: &Term,
    id_predicate: &NamedNode,
    normalizer: &UriNormalizer,
) {
    let ids: Vec<NamedNode> = graph
        .objects(subject, id_predicate)
        .filter_map(Term::as_named)
        .cloned()
        .collect();
    for id in ids {
        let normalized = normalizer.normalize(id.as_str());
        if normalized != id.as_str() {
            graph.remove(subject, id_predicate, &Term::Named(id));
            graph.insert(subject.clone(), id_predicate.clone(), Term::named(normalized));
        }
    }
}

/// Replace object references that are known aliases with the canonical
/// repository URI of their node.
fn rewrite_references(
    graph: &mut Graph,
    id_predicate: &NamedNode,
    rewrite: &HashMap<String, NamedNode>,
) {
    let mut changes = Vec::new();
    for (subject, predicate, object) in graph.iter() {
        if predicate == id_predicate {
            continue;
        }
        if let Term::Named(uri) = object {
            if let Some(canonical) = rewrite.get(uri.as_str()) {
                if canonical != uri {
                    changes.push((
                        subject.clone(),
                        predicate.clone(),
                        object.clone(),
                        Term::Named(canonical.clone()),
                    ));
                }
            }
        }
    }
    for (subject, predicate, old, new) in changes {
        graph.remove(&subject, &predicate, &old);
        graph.insert(subject, predicate, new);
    }
}

/// Final per-node cleanup before the upsert.
fn sanitize(
    mut node: MetadataNode,
    schema: &crate::schema::Schema,
    opts: &GraphIngestOpts,
    normalizer: &UriNormalizer,
) -> Result<MetadataNode, IngestError> {
    // Standardize leftover authority-file references in object position.
    let updates: Vec<(NamedNode, Term, Term)> = node
        .properties()
        .filter(|(p, _)| *p != &schema.id)
        .filter_map(|(p, o)| match o {
            Term::Named(uri) if normalizer.matches(uri.as_str()) => Some((
                p.clone(),
                o.clone(),
                Term::named(normalizer.normalize(uri.as_str())),
            )),
            _ => None,
        })
        .collect();
    for (predicate, old, new) in updates {
        node.remove_value(&predicate, &old);
        node.add(predicate, new);
    }

    let blank = node
        .properties()
        .find(|(p, o)| *p != &schema.id && o.is_blank())
        .map(|(_, o)| o.clone());
    if blank.is_some() {
        return Err(IngestError::WrongReference {
            subject: node.subject().lexical().to_string(),
        });
    }

    if !node.has(&schema.label) {
        let first_id = node
            .ids(&schema.id)
            .first()
            .map(|id| id.as_str().to_string())
            .unwrap_or_default();
        node.add(schema.label.clone(), Term::literal(first_id));
    }

    let rdf_type = NamedNode::new(vocab::RDF_TYPE);
    let is_person = node
        .objects(&rdf_type)
        .filter_map(Term::as_named)
        .any(|t| t.as_str() == vocab::FOAF_PERSON || t.as_str() == vocab::FOAF_AGENT);
    if is_person {
        node.add(rdf_type, Term::named(vocab::FOAF_AGENT));
    }

    if let Some(parent) = &opts.parent {
        node.add(schema.parent.clone(), Term::Named(parent.clone()));
    }
    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schema;

    fn id() -> NamedNode {
        Schema::arche_defaults().id
    }

    #[test]
    fn literal_ids_removed() {
        let mut g = Graph::new();
        g.insert(Term::named("https://a"), id(), Term::literal("junk"));
        g.insert(Term::named("https://a"), id(), Term::named("https://b"));
        remove_literal_ids(&mut g, &id());
        assert_eq!(g.len(), 1);
    }

    #[test]
    fn uris_promoted_to_ids() {
        let mut g = Graph::new();
        g.insert(
            Term::named("https://a"),
            NamedNode::new("https://p"),
            Term::literal("v"),
        );
        promote_uris_to_ids(&mut g, &id());
        assert_eq!(
            g.first_object(&Term::named("https://a"), &id()),
            Some(&Term::named("https://a"))
        );
    }

    #[test]
    fn filter_drops_alias_only_nodes() {
        let ns = "https://id.acdh.oeaw.ac.at/";
        let mut g = Graph::new();
        // A real node whose id set includes an external alias.
        g.insert(
            Term::named("https://id.acdh.oeaw.ac.at/x"),
            NamedNode::new("https://p"),
            Term::literal("v"),
        );
        g.insert(
            Term::named("https://id.acdh.oeaw.ac.at/x"),
            id(),
            Term::named("https://viaf.org/viaf/1"),
        );
        // The alias also shows up as a property-less subject.
        g.insert(
            Term::named("https://viaf.org/viaf/1"),
            id(),
            Term::named("https://viaf.org/viaf/1"),
        );
        promote_uris_to_ids(&mut g, &id());
        let ingester = GraphIngester::new(GraphIngestOpts {
            namespace: ns.to_string(),
            single_out_namespace: OutOfNamespace::Skip,
            ..GraphIngestOpts::default()
        });
        let subjects = ingester.filter(&g, &id());
        assert_eq!(subjects, vec![Term::named("https://id.acdh.oeaw.ac.at/x")]);
    }

    #[test]
    fn filter_keeps_out_of_namespace_when_adding() {
        let mut g = Graph::new();
        g.insert(
            Term::named("https://elsewhere.org/a"),
            id(),
            Term::named("https://elsewhere.org/a"),
        );
        let ingester = GraphIngester::new(GraphIngestOpts {
            namespace: "https://id.acdh.oeaw.ac.at/".to_string(),
            single_out_namespace: OutOfNamespace::Add,
            ..GraphIngestOpts::default()
        });
        assert_eq!(ingester.filter(&g, &id()).len(), 1);
    }

    #[test]
    fn references_rewritten_to_canonical() {
        let mut g = Graph::new();
        let p = NamedNode::new("https://p/ref");
        g.insert(
            Term::named("https://a"),
            p.clone(),
            Term::named("https://alias/b"),
        );
        let mut map = HashMap::new();
        map.insert(
            "https://alias/b".to_string(),
            NamedNode::new("https://repo/2"),
        );
        rewrite_references(&mut g, &id(), &map);
        assert_eq!(
            g.first_object(&Term::named("https://a"), &p),
            Some(&Term::named("https://repo/2"))
        );
    }

    #[test]
    fn sanitize_rejects_blank_objects() {
        let schema = Schema::arche_defaults();
        let mut node = MetadataNode::new(Term::named("https://a"));
        node.add(schema.id.clone(), Term::named("https://a"));
        node.add(
            NamedNode::new("https://p"),
            Term::Blank(crate::rdf::BlankNode::new("b0")),
        );
        let err = sanitize(
            node,
            &schema,
            &GraphIngestOpts::default(),
            UriNormalizer::standard(),
        )
        .unwrap_err();
        assert!(matches!(err, IngestError::WrongReference { .. }));
    }

    #[test]
    fn sanitize_adds_label_agent_and_parent() {
        let schema = Schema::arche_defaults();
        let rdf_type = NamedNode::new(vocab::RDF_TYPE);
        let mut node = MetadataNode::new(Term::named("https://a"));
        node.add(schema.id.clone(), Term::named("https://a"));
        node.add(rdf_type.clone(), Term::named(vocab::FOAF_PERSON));
        let opts = GraphIngestOpts {
            parent: Some(NamedNode::new("https://parent")),
            ..GraphIngestOpts::default()
        };
        let node = sanitize(node, &schema, &opts, UriNormalizer::standard()).unwrap();
        assert_eq!(node.first_str(&schema.label), Some("https://a"));
        assert!(node
            .objects(&rdf_type)
            .any(|t| t == &Term::named(vocab::FOAF_AGENT)));
        assert_eq!(node.first(&schema.parent), Some(&Term::named("https://parent")));
    }
}

//! SKOS vocabulary ingestion: preprocessing of the concept graph, delegation
//! to the generic graph importer, and cleanup of concepts that vanished from
//! the vocabulary.

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;

use super::graph::{GraphIngestOpts, GraphIngester, OutOfNamespace};
use super::task::digest_bytes;
use super::{ChunkItem, ErrorMode, IngestError, IngestOutcome, Scheduler};
use crate::rdf::{vocab, Graph, Literal, NamedNode, RdfFormat, Term};
use crate::repo::{
    BinaryPayload, LookupResult, RepoResource, Repository, SearchTerm,
};
use crate::schema::Schema;

/// Handling of `skos:exactMatch` triples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ExactMatchMode {
    /// Leave the triple as is.
    Keep,
    /// Delete the triple.
    Drop,
    /// Retype the object as an `xsd:anyURI` literal.
    Literal,
    /// Fold the matched node (and its exactMatch closure) into the subject.
    Merge,
}

/// Handling of the remaining `skos:semanticRelation` predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum RelationMode {
    /// Leave the triple as is.
    Keep,
    /// Delete the triple.
    Drop,
    /// Retype the object as an `xsd:anyURI` literal.
    Literal,
}

/// Freshness of the repository copy relative to the vocabulary file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VocabularyState {
    /// The scheme is not in the repository yet.
    New,
    /// The stored file hash matches; nothing to do.
    Ok,
    /// The stored file hash differs; re-ingest.
    Update,
}

/// Configuration of a vocabulary ingest.
#[derive(Debug)]
pub struct SkosIngestOpts {
    /// Also ingest `skos:Collection` / `skos:OrderedCollection` entities.
    pub import_collections: bool,
    /// `skos:exactMatch` handling when the object belongs to the vocabulary.
    pub exact_match_in_vocabulary: ExactMatchMode,
    /// `skos:exactMatch` handling for external objects.
    pub exact_match_not_in_vocabulary: ExactMatchMode,
    /// Semantic-relation handling when the object belongs to the vocabulary.
    pub relations_in_vocabulary: RelationMode,
    /// Semantic-relation handling for external objects.
    pub relations_not_in_vocabulary: RelationMode,
    /// Ordered sources for labels of label-less entities.
    pub title_properties: Vec<NamedNode>,
    /// When set, only properties from these namespaces survive (identifier,
    /// label and `rdf:type` always do).
    pub allowed_namespaces: Option<Vec<String>>,
    /// Assert `parent = scheme` on every non-scheme entity.
    pub add_parents: bool,
    /// Re-ingest even when the stored hash says the copy is current.
    pub force_update: bool,
    /// Commit-then-begin after each this many processed resources; 0 is off.
    pub auto_commit: usize,
    /// Fatal-error routing.
    pub error_mode: ErrorMode,
    /// Maximum in-flight repository requests.
    pub concurrency: usize,
    /// Maximum re-enqueues per work item.
    pub retries: u32,
}

impl Default for SkosIngestOpts {
    fn default() -> Self {
        Self {
            import_collections: false,
            exact_match_in_vocabulary: ExactMatchMode::Merge,
            exact_match_not_in_vocabulary: ExactMatchMode::Literal,
            relations_in_vocabulary: RelationMode::Keep,
            relations_not_in_vocabulary: RelationMode::Drop,
            title_properties: vec![
                NamedNode::new(vocab::SKOS_PREF_LABEL),
                NamedNode::new(vocab::SKOS_ALT_LABEL),
            ],
            allowed_namespaces: None,
            add_parents: true,
            force_update: false,
            auto_commit: 0,
            error_mode: ErrorMode::Fail,
            concurrency: 4,
            retries: 3,
        }
    }
}

#[derive(Debug, Clone)]
struct DeleteItem {
    resource: RepoResource,
    attempts: u32,
}

impl ChunkItem for DeleteItem {
    fn describe(&self) -> String {
        self.resource.uri.as_str().to_string()
    }

    fn attempts(&self) -> u32 {
        self.attempts
    }

    fn bump_attempts(&mut self) {
        self.attempts += 1;
    }
}

/// Ingests a SKOS vocabulary file as a concept scheme plus its entities.
#[derive(Debug)]
pub struct SkosIngester {
    path: PathBuf,
    format: RdfFormat,
    opts: SkosIngestOpts,
    // Keeps a downloaded vocabulary alive for the ingester's lifetime.
    _temp: Option<tempfile::TempPath>,
}

impl SkosIngester {
    /// Ingest a local vocabulary file; the format is inferred from the
    /// extension when not given.
    pub fn from_file(
        path: impl Into<PathBuf>,
        format: Option<RdfFormat>,
        opts: SkosIngestOpts,
    ) -> Result<Self, IngestError> {
        let path = path.into();
        let format = match format {
            Some(f) => f,
            None => path
                .extension()
                .and_then(|e| e.to_str())
                .and_then(RdfFormat::from_name)
                .unwrap_or(RdfFormat::NTriples),
        };
        Ok(Self {
            path,
            format,
            opts,
            _temp: None,
        })
    }

    /// Download a vocabulary into a temporary file and ingest that.
    pub async fn from_url(
        url: &str,
        format: RdfFormat,
        opts: SkosIngestOpts,
    ) -> Result<Self, IngestError> {
        let body = reqwest::get(url)
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| crate::repo::RepoError::Network(e.to_string()))?
            .bytes()
            .await
            .map_err(|e| crate::repo::RepoError::Network(e.to_string()))?;
        let temp = tempfile::NamedTempFile::new().map_err(|source| IngestError::Io {
            path: "temporary vocabulary file".to_string(),
            source,
        })?;
        std::fs::write(temp.path(), &body).map_err(|source| IngestError::Io {
            path: temp.path().display().to_string(),
            source,
        })?;
        let temp = temp.into_temp_path();
        Ok(Self {
            path: temp.to_path_buf(),
            format,
            opts,
            _temp: Some(temp),
        })
    }

    /// Compare the stored file hash with a freshly computed one.
    pub async fn state(
        &self,
        repo: &dyn Repository,
        scheme: &NamedNode,
        content: &[u8],
    ) -> Result<VocabularyState, IngestError> {
        let schema = repo.schema();
        let scheme_res = repo
            .resource_by_ids(std::slice::from_ref(scheme))
            .await?
            .found();
        let Some(scheme_res) = scheme_res else {
            return Ok(VocabularyState::New);
        };
        let Some(stored) = scheme_res.meta.first_str(&schema.hash) else {
            return Ok(VocabularyState::Update);
        };
        let Some((algo, stored_hex)) = stored.split_once(':') else {
            return Ok(VocabularyState::Update);
        };
        let local = digest_bytes(algo, content)?;
        Ok(if local.eq_ignore_ascii_case(stored_hex) {
            VocabularyState::Ok
        } else {
            VocabularyState::Update
        })
    }

    /// Validate, preprocess and import the vocabulary; then upload the raw
    /// file onto the scheme resource and delete obsolete children.
    pub async fn import(
        &self,
        repo: &dyn Repository,
    ) -> Result<Vec<IngestOutcome>, IngestError> {
        let content = std::fs::read(&self.path).map_err(|source| IngestError::Io {
            path: self.path.display().to_string(),
            source,
        })?;
        let text = String::from_utf8_lossy(&content);
        let mut graph = self.format.parse(&text)?;
        let schema = repo.schema().clone();
        let scheme = concept_scheme(&graph)?;
        tracing::info!(scheme = %scheme, "vocabulary parsed");

        let state = self.state(repo, &scheme, &content).await?;
        if state == VocabularyState::Ok && !self.opts.force_update {
            tracing::info!(scheme = %scheme, "vocabulary unchanged, nothing to do");
            return Ok(Vec::new());
        }

        self.preprocess(&mut graph, &scheme, &schema)?;

        let ingester = GraphIngester::new(GraphIngestOpts {
            namespace: String::new(),
            single_out_namespace: OutOfNamespace::Add,
            parent: None,
            auto_commit: self.opts.auto_commit,
            error_mode: self.opts.error_mode,
            concurrency: self.opts.concurrency,
            retries: self.opts.retries,
        });
        let mut outcomes = ingester.import(repo, graph).await?;

        // The raw vocabulary becomes the scheme resource's binary payload;
        // the hash the repository derives from it is the freshness oracle
        // for the next run.
        let scheme_res = match repo
            .resource_by_ids(std::slice::from_ref(&scheme))
            .await?
        {
            LookupResult::Found(res) => res,
            LookupResult::NotFound => {
                return Err(crate::repo::RepoError::Protocol(
                    "scheme resource vanished during import".into(),
                )
                .into())
            }
        };
        let payload = BinaryPayload::from_bytes(content)
            .with_mime("application/n-triples")
            .with_file_name(
                self.path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "vocabulary.nt".to_string()),
            );
        let scheme_res = repo.update_content(&scheme_res, &payload).await?;

        let imported: Vec<NamedNode> = outcomes
            .iter()
            .filter_map(IngestOutcome::resource)
            .map(|r| r.uri.clone())
            .collect();
        let deleted = self
            .remove_obsolete(repo, &scheme, &scheme_res, &imported, &schema)
            .await?;
        outcomes.extend(deleted);
        Ok(outcomes)
    }

    /// The preprocessing pipeline run on the raw vocabulary graph.
    fn preprocess(
        &self,
        graph: &mut Graph,
        scheme: &NamedNode,
        schema: &Schema,
    ) -> Result<(), IngestError> {
        let mut entities = self.collect_entities(graph, scheme);
        self.process_exact_matches(graph, &mut entities, schema);
        self.process_relations(graph, &entities);
        self.assure_titles(graph, &entities, schema);
        self.drop_properties(graph, &entities, schema);
        self.assure_literals(graph, &entities, schema);
        if self.opts.add_parents {
            for entity in &entities {
                if entity.as_str() != scheme.as_str() {
                    graph.insert(
                        Term::Named(entity.clone()),
                        schema.parent.clone(),
                        Term::Named(scheme.clone()),
                    );
                }
            }
        }
        drop_unreachable(graph, &entities);
        Ok(())
    }

    /// The scheme, its concepts and (optionally) its collections.
    fn collect_entities(&self, graph: &Graph, scheme: &NamedNode) -> Vec<NamedNode> {
        let mut entities = vec![scheme.clone()];
        let in_scheme = NamedNode::new(vocab::SKOS_IN_SCHEME);
        for subject in graph.subjects_with(&in_scheme, &Term::Named(scheme.clone())) {
            if let Some(n) = subject.as_named() {
                if !entities.contains(n) {
                    entities.push(n.clone());
                }
            }
        }
        if self.opts.import_collections {
            let rdf_type = NamedNode::new(vocab::RDF_TYPE);
            for class in [vocab::SKOS_COLLECTION, vocab::SKOS_ORDERED_COLLECTION] {
                for subject in graph.subjects_with(&rdf_type, &Term::named(class)) {
                    if let Some(n) = subject.as_named() {
                        if !entities.contains(n) {
                            entities.push(n.clone());
                        }
                    }
                }
            }
        }
        entities
    }

    fn process_exact_matches(
        &self,
        graph: &mut Graph,
        entities: &mut Vec<NamedNode>,
        schema: &Schema,
    ) {
        let exact_match = NamedNode::new(vocab::SKOS_EXACT_MATCH);
        let triples: Vec<(NamedNode, NamedNode)> = graph
            .iter()
            .filter(|(s, p, _)| {
                *p == &exact_match && s.as_named().is_some_and(|n| entities.contains(n))
            })
            .filter_map(|(s, _, o)| {
                Some((s.as_named()?.clone(), o.as_named()?.clone()))
            })
            .collect();
        for (subject, object) in triples {
            if !entities.contains(&subject) {
                // The subject itself was merged away in an earlier step.
                continue;
            }
            let mode = if entities.contains(&object) {
                self.opts.exact_match_in_vocabulary
            } else {
                self.opts.exact_match_not_in_vocabulary
            };
            let s = Term::Named(subject.clone());
            let o = Term::Named(object.clone());
            match mode {
                ExactMatchMode::Keep => {}
                ExactMatchMode::Drop => {
                    graph.remove(&s, &exact_match, &o);
                }
                ExactMatchMode::Literal => {
                    graph.remove(&s, &exact_match, &o);
                    graph.insert(
                        s,
                        exact_match.clone(),
                        Term::Literal(Literal::with_datatype(
                            object.as_str(),
                            vocab::XSD_ANY_URI,
                        )),
                    );
                }
                ExactMatchMode::Merge => {
                    graph.remove(&s, &exact_match, &o);
                    merge_closure(graph, entities, &subject, &object, &exact_match, schema);
                }
            }
        }
    }

    fn process_relations(&self, graph: &mut Graph, entities: &[NamedNode]) {
        for predicate in vocab::SKOS_SEMANTIC_RELATIONS {
            let predicate = NamedNode::new(*predicate);
            let triples: Vec<(Term, Term)> = graph
                .iter()
                .filter(|(s, p, _)| {
                    *p == &predicate && s.as_named().is_some_and(|n| entities.contains(n))
                })
                .map(|(s, _, o)| (s.clone(), o.clone()))
                .collect();
            for (subject, object) in triples {
                let in_vocab = object
                    .as_named()
                    .is_some_and(|n| entities.contains(n));
                let mode = if in_vocab {
                    self.opts.relations_in_vocabulary
                } else {
                    self.opts.relations_not_in_vocabulary
                };
                match mode {
                    RelationMode::Keep => {}
                    RelationMode::Drop => {
                        graph.remove(&subject, &predicate, &object);
                    }
                    RelationMode::Literal => {
                        graph.remove(&subject, &predicate, &object);
                        graph.insert(
                            subject.clone(),
                            predicate.clone(),
                            Term::Literal(Literal::with_datatype(
                                object.lexical(),
                                vocab::XSD_ANY_URI,
                            )),
                        );
                    }
                }
            }
        }
    }

    /// Every entity gets a label: from the configured title sources in
    /// order, or synthesized from its URI.
    fn assure_titles(&self, graph: &mut Graph, entities: &[NamedNode], schema: &Schema) {
        for entity in entities {
            let subject = Term::Named(entity.clone());
            if graph.first_object(&subject, &schema.label).is_some() {
                continue;
            }
            let mut title: Option<Literal> = None;
            for source in &self.opts.title_properties {
                if let Some(Term::Literal(l)) =
                    graph.first_object(&subject, source).cloned()
                {
                    title = Some(match l.lang() {
                        Some(_) => l,
                        None => Literal::with_lang(l.value(), "und"),
                    });
                    break;
                }
            }
            let title = title.unwrap_or_else(|| {
                let uri = entity.as_str();
                let tail = uri
                    .rsplit(['/', '#'])
                    .next()
                    .filter(|t| !t.is_empty())
                    .unwrap_or(uri);
                Literal::with_lang(tail, "und")
            });
            graph.insert(subject, schema.label.clone(), Term::Literal(title));
        }
    }

    /// Apply the namespace allow-list, keeping identifier, label and type.
    fn drop_properties(&self, graph: &mut Graph, entities: &[NamedNode], schema: &Schema) {
        let Some(allowed) = &self.opts.allowed_namespaces else {
            return;
        };
        let rdf_type = NamedNode::new(vocab::RDF_TYPE);
        graph.retain(|s, p, _| {
            let is_entity = s.as_named().is_some_and(|n| entities.contains(n));
            if !is_entity {
                return true;
            }
            if p == &schema.id || p == &schema.label || p == &rdf_type {
                return true;
            }
            allowed.iter().any(|ns| p.as_str().starts_with(ns.as_str()))
        });
    }

    /// Object-typed values outside the small structural set become
    /// `xsd:anyURI` literals; the repository only accepts references it can
    /// resolve.
    fn assure_literals(&self, graph: &mut Graph, entities: &[NamedNode], schema: &Schema) {
        let rdf_type = NamedNode::new(vocab::RDF_TYPE);
        let mut changes = Vec::new();
        for (subject, predicate, object) in graph.iter() {
            let is_entity = subject
                .as_named()
                .is_some_and(|n| entities.contains(n));
            if !is_entity || !object.is_named() {
                continue;
            }
            if predicate == &schema.id
                || predicate == &schema.parent
                || predicate == &rdf_type
                || predicate.as_str().starts_with(vocab::SKOS_NS)
            {
                continue;
            }
            changes.push((subject.clone(), predicate.clone(), object.clone()));
        }
        for (subject, predicate, object) in changes {
            graph.remove(&subject, &predicate, &object);
            graph.insert(
                subject,
                predicate,
                Term::Literal(Literal::with_datatype(object.lexical(), vocab::XSD_ANY_URI)),
            );
        }
    }

    /// Delete repository children of the scheme that the current ingest did
    /// not produce.
    async fn remove_obsolete(
        &self,
        repo: &dyn Repository,
        scheme: &NamedNode,
        scheme_res: &RepoResource,
        imported: &[NamedNode],
        schema: &Schema,
    ) -> Result<Vec<IngestOutcome>, IngestError> {
        let terms = vec![
            SearchTerm {
                predicate: NamedNode::new(vocab::SKOS_IN_SCHEME),
                value: Term::Named(scheme.clone()),
            },
            SearchTerm {
                predicate: schema.parent.clone(),
                value: Term::Named(scheme.clone()),
            },
            SearchTerm {
                predicate: schema.parent.clone(),
                value: Term::Named(scheme_res.uri.clone()),
            },
        ];
        let children = repo.search(&terms).await?;
        let obsolete: Vec<DeleteItem> = children
            .into_iter()
            .filter(|child| {
                child.uri != scheme_res.uri && !imported.contains(&child.uri)
            })
            .map(|resource| DeleteItem {
                resource,
                attempts: 0,
            })
            .collect();
        if obsolete.is_empty() {
            return Ok(Vec::new());
        }
        tracing::info!(count = obsolete.len(), "removing obsolete vocabulary entities");
        let scheduler = Scheduler {
            repo,
            concurrency: self.opts.concurrency,
            retries: self.opts.retries,
            auto_commit: 0,
            error_mode: self.opts.error_mode,
        };
        scheduler
            .run(obsolete, |item| async move {
                repo.delete(&item.resource, true, true).await?;
                Ok(IngestOutcome::Deleted(item.resource.uri.clone()))
            })
            .await
    }
}

/// The graph must contain exactly one `skos:ConceptScheme`.
fn concept_scheme(graph: &Graph) -> Result<NamedNode, IngestError> {
    let rdf_type = NamedNode::new(vocab::RDF_TYPE);
    let schemes = graph.subjects_with(&rdf_type, &Term::named(vocab::SKOS_CONCEPT_SCHEME));
    let mut named = schemes.iter().filter_map(|s| s.as_named());
    let Some(first) = named.next() else {
        return Err(IngestError::NoConceptScheme);
    };
    if named.next().is_some() {
        return Err(IngestError::MultipleConceptSchemes);
    }
    Ok(first.clone())
}

/// Fold `object` and its whole exactMatch closure into `subject`: their ids
/// migrate onto the subject, their descriptions are dropped, and they leave
/// the work set.
fn merge_closure(
    graph: &mut Graph,
    entities: &mut Vec<NamedNode>,
    subject: &NamedNode,
    object: &NamedNode,
    exact_match: &NamedNode,
    schema: &Schema,
) {
    let mut queue = VecDeque::from([object.clone()]);
    let mut seen: HashSet<NamedNode> = HashSet::new();
    seen.insert(subject.clone());
    while let Some(current) = queue.pop_front() {
        if !seen.insert(current.clone()) {
            continue;
        }
        let term = Term::Named(current.clone());
        for next in graph
            .objects(&term, exact_match)
            .filter_map(Term::as_named)
        {
            queue.push_back(next.clone());
        }
        graph.take(&term);
        graph.insert(
            Term::Named(subject.clone()),
            schema.id.clone(),
            Term::Named(current.clone()),
        );
        entities.retain(|e| e != &current);
    }
}

/// Keep only triples whose subject is reachable from the entity set via
/// named-node objects.
fn drop_unreachable(graph: &mut Graph, entities: &[NamedNode]) {
    let mut reachable: HashSet<Term> = HashSet::new();
    let mut queue: VecDeque<Term> =
        entities.iter().map(|e| Term::Named(e.clone())).collect();
    while let Some(subject) = queue.pop_front() {
        if !reachable.insert(subject.clone()) {
            continue;
        }
        let Some(desc) = graph.description(&subject) else {
            continue;
        };
        for objects in desc.values() {
            for object in objects {
                if object.is_named() && !reachable.contains(object) {
                    queue.push_back(object.clone());
                }
            }
        }
    }
    graph.retain(|s, _, _| reachable.contains(s));
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEME: &str = "https://vocabs.example.org/voc";

    fn vocab_graph(concepts: &[&str]) -> Graph {
        let mut g = Graph::new();
        g.insert(
            Term::named(SCHEME),
            NamedNode::new(vocab::RDF_TYPE),
            Term::named(vocab::SKOS_CONCEPT_SCHEME),
        );
        for c in concepts {
            g.insert(
                Term::named(*c),
                NamedNode::new(vocab::SKOS_IN_SCHEME),
                Term::named(SCHEME),
            );
            g.insert(
                Term::named(*c),
                NamedNode::new(vocab::SKOS_PREF_LABEL),
                Term::Literal(Literal::with_lang("label", "en")),
            );
        }
        g
    }

    fn ingester(opts: SkosIngestOpts) -> SkosIngester {
        SkosIngester {
            path: PathBuf::from("/nonexistent.nt"),
            format: RdfFormat::NTriples,
            opts,
            _temp: None,
        }
    }

    #[test]
    fn scheme_validation() {
        let g = vocab_graph(&[]);
        assert_eq!(concept_scheme(&g).unwrap().as_str(), SCHEME);

        let empty = Graph::new();
        assert!(matches!(
            concept_scheme(&empty),
            Err(IngestError::NoConceptScheme)
        ));

        let mut two = vocab_graph(&[]);
        two.insert(
            Term::named("https://vocabs.example.org/other"),
            NamedNode::new(vocab::RDF_TYPE),
            Term::named(vocab::SKOS_CONCEPT_SCHEME),
        );
        assert!(matches!(
            concept_scheme(&two),
            Err(IngestError::MultipleConceptSchemes)
        ));
    }

    #[test]
    fn exact_match_merge_folds_closure() {
        let schema = Schema::arche_defaults();
        let a = "https://vocabs.example.org/voc/a";
        let b = "https://vocabs.example.org/voc/b";
        let mut g = vocab_graph(&[a, b]);
        let em = NamedNode::new(vocab::SKOS_EXACT_MATCH);
        g.insert(Term::named(a), em.clone(), Term::named(b));
        // b chains on to an external match which must fold in as well.
        g.insert(Term::named(b), em.clone(), Term::named("https://ext/x"));

        let ing = ingester(SkosIngestOpts {
            exact_match_in_vocabulary: ExactMatchMode::Merge,
            exact_match_not_in_vocabulary: ExactMatchMode::Keep,
            ..SkosIngestOpts::default()
        });
        let mut entities = ing.collect_entities(&g, &NamedNode::new(SCHEME));
        assert_eq!(entities.len(), 3);
        ing.process_exact_matches(&mut g, &mut entities, &schema);

        // b is gone as a node and as an entity; a carries b and the external
        // match as extra ids.
        assert!(!entities.contains(&NamedNode::new(b)));
        assert!(graph_has_id(&g, &schema, a, b));
        assert!(graph_has_id(&g, &schema, a, "https://ext/x"));
        assert!(g.description(&Term::named(b)).is_none());
    }

    fn graph_has_id(g: &Graph, schema: &Schema, subject: &str, id: &str) -> bool {
        g.objects(&Term::named(subject), &schema.id)
            .any(|o| o == &Term::named(id))
    }

    #[test]
    fn exact_match_literal_retypes_external() {
        let schema = Schema::arche_defaults();
        let a = "https://vocabs.example.org/voc/a";
        let mut g = vocab_graph(&[a]);
        let em = NamedNode::new(vocab::SKOS_EXACT_MATCH);
        g.insert(Term::named(a), em.clone(), Term::named("https://ext/x"));
        let ing = ingester(SkosIngestOpts {
            exact_match_not_in_vocabulary: ExactMatchMode::Literal,
            ..SkosIngestOpts::default()
        });
        let mut entities = ing.collect_entities(&g, &NamedNode::new(SCHEME));
        ing.process_exact_matches(&mut g, &mut entities, &schema);
        let obj = g.first_object(&Term::named(a), &em).unwrap();
        match obj {
            Term::Literal(l) => {
                assert_eq!(l.value(), "https://ext/x");
                assert_eq!(l.datatype().unwrap().as_str(), vocab::XSD_ANY_URI);
            }
            other => panic!("expected literal, got {other:?}"),
        }
    }

    #[test]
    fn relations_dropped_when_external() {
        let a = "https://vocabs.example.org/voc/a";
        let mut g = vocab_graph(&[a]);
        let broader = NamedNode::new("http://www.w3.org/2004/02/skos/core#broader");
        g.insert(Term::named(a), broader.clone(), Term::named("https://ext/up"));
        let ing = ingester(SkosIngestOpts {
            relations_not_in_vocabulary: RelationMode::Drop,
            ..SkosIngestOpts::default()
        });
        let entities = ing.collect_entities(&g, &NamedNode::new(SCHEME));
        ing.process_relations(&mut g, &entities);
        assert!(g.first_object(&Term::named(a), &broader).is_none());
    }

    #[test]
    fn titles_copied_tagged_or_synthesized() {
        let schema = Schema::arche_defaults();
        let tagged = "https://vocabs.example.org/voc/tagged";
        let untagged = "https://vocabs.example.org/voc/untagged";
        let bare = "https://vocabs.example.org/voc/bare";
        let mut g = vocab_graph(&[tagged, untagged, bare]);
        // Replace the fixture labels with the shapes under test.
        let pref = NamedNode::new(vocab::SKOS_PREF_LABEL);
        g.retain(|_, p, _| p != &pref);
        g.insert(
            Term::named(tagged),
            pref.clone(),
            Term::Literal(Literal::with_lang("Wien", "de")),
        );
        g.insert(Term::named(untagged), pref.clone(), Term::literal("plain"));

        let ing = ingester(SkosIngestOpts::default());
        let entities = ing.collect_entities(&g, &NamedNode::new(SCHEME));
        ing.assure_titles(&mut g, &entities, &schema);

        let get = |s: &str| match g.first_object(&Term::named(s), &schema.label) {
            Some(Term::Literal(l)) => (l.value().to_string(), l.lang().map(str::to_string)),
            other => panic!("no label for {s}: {other:?}"),
        };
        assert_eq!(get(tagged), ("Wien".into(), Some("de".into())));
        assert_eq!(get(untagged), ("plain".into(), Some("und".into())));
        assert_eq!(get(bare), ("bare".into(), Some("und".into())));
    }

    #[test]
    fn allow_list_keeps_structural_properties() {
        let schema = Schema::arche_defaults();
        let a = "https://vocabs.example.org/voc/a";
        let mut g = vocab_graph(&[a]);
        g.insert(Term::named(a), schema.id.clone(), Term::named(a));
        g.insert(
            Term::named(a),
            NamedNode::new("https://other.example.org/ns#note"),
            Term::literal("dropped"),
        );
        let ing = ingester(SkosIngestOpts {
            allowed_namespaces: Some(vec![vocab::SKOS_NS.to_string()]),
            ..SkosIngestOpts::default()
        });
        let entities = ing.collect_entities(&g, &NamedNode::new(SCHEME));
        ing.drop_properties(&mut g, &entities, &schema);
        let a_term = Term::named(a);
        assert!(g.first_object(&a_term, &schema.id).is_some());
        assert!(g
            .first_object(&a_term, &NamedNode::new("https://other.example.org/ns#note"))
            .is_none());
        assert!(g
            .first_object(&a_term, &NamedNode::new(vocab::SKOS_IN_SCHEME))
            .is_some());
    }

    #[test]
    fn foreign_references_become_any_uri_literals() {
        let schema = Schema::arche_defaults();
        let a = "https://vocabs.example.org/voc/a";
        let mut g = vocab_graph(&[a]);
        let creator = NamedNode::new("http://purl.org/dc/terms/creator");
        g.insert(Term::named(a), creator.clone(), Term::named("https://orcid.org/x"));
        let ing = ingester(SkosIngestOpts::default());
        let entities = ing.collect_entities(&g, &NamedNode::new(SCHEME));
        ing.assure_literals(&mut g, &entities, &schema);
        match g.first_object(&Term::named(a), &creator).unwrap() {
            Term::Literal(l) => assert_eq!(l.datatype().unwrap().as_str(), vocab::XSD_ANY_URI),
            other => panic!("expected literal, got {other:?}"),
        }
    }

    #[test]
    fn unreachable_nodes_dropped() {
        let a = "https://vocabs.example.org/voc/a";
        let mut g = vocab_graph(&[a]);
        g.insert(
            Term::named("https://stray.example.org/n"),
            NamedNode::new("https://p"),
            Term::literal("orphan"),
        );
        // Reachable through the concept.
        g.insert(
            Term::named(a),
            NamedNode::new("https://p/ref"),
            Term::named("https://linked.example.org/n"),
        );
        g.insert(
            Term::named("https://linked.example.org/n"),
            NamedNode::new("https://p"),
            Term::literal("kept"),
        );
        let ing = ingester(SkosIngestOpts::default());
        let entities = ing.collect_entities(&g, &NamedNode::new(SCHEME));
        drop_unreachable(&mut g, &entities);
        assert!(g.description(&Term::named("https://stray.example.org/n")).is_none());
        assert!(g
            .description(&Term::named("https://linked.example.org/n"))
            .is_some());
    }
}

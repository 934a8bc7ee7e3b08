//! In-memory repository fixture. Should only be used by this library's test
//! suite.
//!
//! Implements the full [`Repository`] contract with transaction snapshots,
//! id-uniqueness conflicts and scripted fault injection, so the drivers can
//! be exercised without a live repository.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::ingest::task::digest_bytes;
use crate::rdf::{MetadataNode, NamedNode, Term};
use crate::repo::{
    BinaryPayload, LookupResult, RepoError, RepoResource, Repository, SearchTerm, UpdateMode,
};
use crate::schema::Schema;

#[derive(Debug, Clone)]
struct Stored {
    meta: MetadataNode,
    binary: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
struct State {
    resources: BTreeMap<String, Stored>,
    snapshot: Option<BTreeMap<String, Stored>>,
    tx_open: bool,
    commits: usize,
    prolongs: usize,
}

/// A deterministic in-memory stand-in for the repository.
#[derive(Debug)]
pub struct InMemoryRepository {
    base_url: String,
    schema: Schema,
    next_id: AtomicU64,
    state: Mutex<State>,
    // Per-operation queues; `None` entries let a call pass through.
    faults: Mutex<HashMap<String, VecDeque<Option<RepoError>>>>,
}

impl InMemoryRepository {
    /// An empty repository rooted at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            schema: Schema::arche_defaults(),
            next_id: AtomicU64::new(1),
            state: Mutex::new(State::default()),
            faults: Mutex::new(HashMap::new()),
        }
    }

    /// Queue an error for the next call of `op` (`begin`, `commit`,
    /// `rollback`, `prolong`, `create`, `lookup`, `search`, `update`,
    /// `content`, `delete`).
    pub fn fail_next(&self, op: &str, err: RepoError) {
        self.fail_after(op, 0, err);
    }

    /// Queue an error for the call of `op` after `pass` successful ones.
    pub fn fail_after(&self, op: &str, pass: usize, err: RepoError) {
        let mut faults = self.faults.lock().expect("fixture lock poisoned");
        let queue = faults.entry(op.to_string()).or_default();
        for _ in 0..pass {
            queue.push_back(None);
        }
        queue.push_back(Some(err));
    }

    fn take_fault(&self, op: &str) -> Result<(), RepoError> {
        let fault = self
            .faults
            .lock()
            .expect("fixture lock poisoned")
            .get_mut(op)
            .and_then(VecDeque::pop_front);
        match fault {
            Some(Some(err)) => Err(err),
            _ => Ok(()),
        }
    }

    /// Number of stored resources.
    pub fn resource_count(&self) -> usize {
        self.state
            .lock()
            .expect("fixture lock poisoned")
            .resources
            .len()
    }

    /// Fetch a stored resource by URI.
    pub fn get(&self, uri: &str) -> Option<RepoResource> {
        let state = self.state.lock().expect("fixture lock poisoned");
        state.resources.get(uri).map(|stored| RepoResource {
            uri: NamedNode::new(uri),
            meta: stored.meta.clone(),
        })
    }

    /// Fetch a stored resource by any of its identifiers.
    pub fn get_by_id(&self, id: &str) -> Option<RepoResource> {
        let state = self.state.lock().expect("fixture lock poisoned");
        state.resources.iter().find_map(|(uri, stored)| {
            let matches = uri == id
                || stored
                    .meta
                    .ids(&self.schema.id)
                    .iter()
                    .any(|i| i.as_str() == id);
            matches.then(|| RepoResource {
                uri: NamedNode::new(uri.as_str()),
                meta: stored.meta.clone(),
            })
        })
    }

    /// The stored binary payload of a resource.
    pub fn binary(&self, uri: &str) -> Option<Vec<u8>> {
        let state = self.state.lock().expect("fixture lock poisoned");
        state.resources.get(uri).and_then(|s| s.binary.clone())
    }

    /// How many transactions have been committed.
    pub fn commit_count(&self) -> usize {
        self.state.lock().expect("fixture lock poisoned").commits
    }

    /// How often `prolong` was called.
    pub fn prolong_count(&self) -> usize {
        self.state.lock().expect("fixture lock poisoned").prolongs
    }

    /// Whether a transaction is currently open.
    pub fn tx_open(&self) -> bool {
        self.state.lock().expect("fixture lock poisoned").tx_open
    }

    fn require_tx(state: &State) -> Result<(), RepoError> {
        if state.tx_open {
            Ok(())
        } else {
            Err(RepoError::NoTransaction)
        }
    }

    /// Stamp the metadata the way the repository does on a binary upload.
    fn stamp_binary(&self, meta: &mut MetadataNode, data: &[u8], payload: &BinaryPayload) {
        let hash = digest_bytes("sha1", data).expect("sha1 is supported");
        meta.set(self.schema.hash.clone(), Term::literal(format!("sha1:{hash}")));
        meta.set(
            self.schema.binary_size.clone(),
            Term::literal(data.len().to_string()),
        );
        meta.set(
            self.schema.modification_date.clone(),
            Term::literal(
                chrono::Local::now()
                    .format("%Y-%m-%dT%H:%M:%S")
                    .to_string(),
            ),
        );
        if let Some(mime) = &payload.mime {
            meta.set(self.schema.mime.clone(), Term::literal(mime.clone()));
        }
        if let Some(name) = &payload.file_name {
            meta.set(self.schema.file_name.clone(), Term::literal(name.clone()));
        }
    }

    fn find_by_ids(state: &State, schema: &Schema, ids: &[NamedNode]) -> Option<String> {
        state.resources.iter().find_map(|(uri, stored)| {
            let stored_ids = stored.meta.ids(&schema.id);
            let hit = ids
                .iter()
                .any(|id| id.as_str() == uri || stored_ids.contains(id));
            hit.then(|| uri.clone())
        })
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn begin(&self) -> Result<(), RepoError> {
        self.take_fault("begin")?;
        let mut state = self.state.lock().expect("fixture lock poisoned");
        if state.tx_open {
            return Err(RepoError::Protocol("transaction already open".into()));
        }
        state.snapshot = Some(state.resources.clone());
        state.tx_open = true;
        Ok(())
    }

    async fn commit(&self) -> Result<(), RepoError> {
        self.take_fault("commit")?;
        let mut state = self.state.lock().expect("fixture lock poisoned");
        Self::require_tx(&state)?;
        state.snapshot = None;
        state.tx_open = false;
        state.commits += 1;
        Ok(())
    }

    async fn rollback(&self) -> Result<(), RepoError> {
        self.take_fault("rollback")?;
        let mut state = self.state.lock().expect("fixture lock poisoned");
        Self::require_tx(&state)?;
        let snapshot = state.snapshot.take().expect("open tx has a snapshot");
        state.resources = snapshot;
        state.tx_open = false;
        Ok(())
    }

    async fn prolong(&self) -> Result<(), RepoError> {
        self.take_fault("prolong")?;
        let mut state = self.state.lock().expect("fixture lock poisoned");
        Self::require_tx(&state)?;
        state.prolongs += 1;
        Ok(())
    }

    async fn create_resource(
        &self,
        meta: &MetadataNode,
        binary: Option<&BinaryPayload>,
    ) -> Result<RepoResource, RepoError> {
        self.take_fault("create")?;
        let data = binary
            .map(|payload| payload.read())
            .transpose()
            .map_err(|e| RepoError::Network(format!("reading upload body: {e}")))?;
        let mut state = self.state.lock().expect("fixture lock poisoned");
        Self::require_tx(&state)?;
        let ids = meta.ids(&self.schema.id);
        if ids.is_empty() {
            return Err(RepoError::Validation(
                "resource carries no identifier".into(),
            ));
        }
        if Self::find_by_ids(&state, &self.schema, &ids).is_some() {
            return Err(RepoError::Conflict(
                "duplicate key value violates unique constraint".into(),
            ));
        }
        let uri = format!(
            "{}/{}",
            self.base_url,
            self.next_id.fetch_add(1, Ordering::Relaxed)
        );
        let mut meta = meta.clone();
        meta.set_subject(Term::named(uri.as_str()));
        if let (Some(data), Some(payload)) = (&data, binary) {
            self.stamp_binary(&mut meta, data, payload);
        }
        state.resources.insert(
            uri.clone(),
            Stored {
                meta: meta.clone(),
                binary: data,
            },
        );
        Ok(RepoResource {
            uri: NamedNode::new(uri),
            meta,
        })
    }

    async fn resource_by_ids(&self, ids: &[NamedNode]) -> Result<LookupResult, RepoError> {
        self.take_fault("lookup")?;
        let state = self.state.lock().expect("fixture lock poisoned");
        match Self::find_by_ids(&state, &self.schema, ids) {
            Some(uri) => {
                let stored = &state.resources[&uri];
                Ok(LookupResult::Found(RepoResource {
                    uri: NamedNode::new(uri.as_str()),
                    meta: stored.meta.clone(),
                }))
            }
            None => Ok(LookupResult::NotFound),
        }
    }

    async fn search(&self, terms: &[SearchTerm]) -> Result<Vec<RepoResource>, RepoError> {
        self.take_fault("search")?;
        let state = self.state.lock().expect("fixture lock poisoned");
        let mut out = Vec::new();
        for (uri, stored) in &state.resources {
            let hit = terms.iter().any(|term| {
                stored
                    .meta
                    .objects(&term.predicate)
                    .any(|o| o == &term.value)
            });
            if hit {
                out.push(RepoResource {
                    uri: NamedNode::new(uri.as_str()),
                    meta: stored.meta.clone(),
                });
            }
        }
        Ok(out)
    }

    async fn update_metadata(
        &self,
        resource: &RepoResource,
        mode: UpdateMode,
        meta: &MetadataNode,
    ) -> Result<RepoResource, RepoError> {
        self.take_fault("update")?;
        let mut state = self.state.lock().expect("fixture lock poisoned");
        Self::require_tx(&state)?;
        let uri = resource.uri.as_str().to_string();
        let Some(stored) = state.resources.get_mut(&uri) else {
            return Err(RepoError::Validation(format!("no such resource: {uri}")));
        };
        match mode {
            UpdateMode::Merge => stored.meta.merge(meta),
            UpdateMode::Overwrite => {
                let mut meta = meta.clone();
                meta.set_subject(Term::named(uri.as_str()));
                stored.meta = meta;
            }
        }
        Ok(RepoResource {
            uri: resource.uri.clone(),
            meta: stored.meta.clone(),
        })
    }

    async fn update_content(
        &self,
        resource: &RepoResource,
        binary: &BinaryPayload,
    ) -> Result<RepoResource, RepoError> {
        self.take_fault("content")?;
        let data = binary
            .read()
            .map_err(|e| RepoError::Network(format!("reading upload body: {e}")))?;
        let mut state = self.state.lock().expect("fixture lock poisoned");
        Self::require_tx(&state)?;
        let uri = resource.uri.as_str().to_string();
        let Some(stored) = state.resources.get_mut(&uri) else {
            return Err(RepoError::Validation(format!("no such resource: {uri}")));
        };
        let mut meta = stored.meta.clone();
        self.stamp_binary(&mut meta, &data, binary);
        stored.meta = meta.clone();
        stored.binary = Some(data);
        Ok(RepoResource {
            uri: resource.uri.clone(),
            meta,
        })
    }

    async fn delete(
        &self,
        resource: &RepoResource,
        with_references: bool,
        with_children: bool,
    ) -> Result<(), RepoError> {
        self.take_fault("delete")?;
        let mut state = self.state.lock().expect("fixture lock poisoned");
        Self::require_tx(&state)?;
        let mut doomed = vec![resource.uri.as_str().to_string()];
        if with_children {
            let mut frontier = doomed.clone();
            while let Some(parent_uri) = frontier.pop() {
                let parent = Term::named(parent_uri.as_str());
                for (uri, stored) in &state.resources {
                    if doomed.contains(uri) {
                        continue;
                    }
                    if stored.meta.objects(&self.schema.parent).any(|o| o == &parent) {
                        doomed.push(uri.clone());
                        frontier.push(uri.clone());
                    }
                }
            }
        }
        for uri in &doomed {
            if state.resources.remove(uri).is_none() {
                return Err(RepoError::Validation(format!("no such resource: {uri}")));
            }
        }
        if with_references {
            let doomed: Vec<Term> = doomed
                .iter()
                .map(|uri| Term::named(uri.as_str()))
                .collect();
            for stored in state.resources.values_mut() {
                stored.meta.retain(|_, o| !doomed.contains(o));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str) -> MetadataNode {
        let schema = Schema::arche_defaults();
        let mut n = MetadataNode::new(Term::named(id));
        n.add(schema.id, Term::named(id));
        n
    }

    #[tokio::test]
    async fn create_lookup_roundtrip() {
        let repo = InMemoryRepository::new("https://repo.example.org/api");
        repo.begin().await.unwrap();
        let res = repo
            .create_resource(&node("https://id.example.org/a"), None)
            .await
            .unwrap();
        let found = repo
            .resource_by_ids(&[NamedNode::new("https://id.example.org/a")])
            .await
            .unwrap()
            .found()
            .unwrap();
        assert_eq!(found.uri, res.uri);
    }

    #[tokio::test]
    async fn duplicate_ids_conflict() {
        let repo = InMemoryRepository::new("https://repo.example.org/api");
        repo.begin().await.unwrap();
        repo.create_resource(&node("https://id.example.org/a"), None)
            .await
            .unwrap();
        let err = repo
            .create_resource(&node("https://id.example.org/a"), None)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn rollback_restores_precommit_state() {
        let repo = InMemoryRepository::new("https://repo.example.org/api");
        repo.begin().await.unwrap();
        repo.create_resource(&node("https://id.example.org/kept"), None)
            .await
            .unwrap();
        repo.commit().await.unwrap();
        repo.begin().await.unwrap();
        repo.create_resource(&node("https://id.example.org/doomed"), None)
            .await
            .unwrap();
        repo.rollback().await.unwrap();
        assert!(repo.get_by_id("https://id.example.org/kept").is_some());
        assert!(repo.get_by_id("https://id.example.org/doomed").is_none());
    }

    #[tokio::test]
    async fn writes_require_a_transaction() {
        let repo = InMemoryRepository::new("https://repo.example.org/api");
        let err = repo
            .create_resource(&node("https://id.example.org/a"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::NoTransaction));
    }

    #[tokio::test]
    async fn content_upload_stamps_hash_and_size() {
        let repo = InMemoryRepository::new("https://repo.example.org/api");
        let schema = repo.schema().clone();
        repo.begin().await.unwrap();
        let res = repo
            .create_resource(
                &node("https://id.example.org/a"),
                Some(&BinaryPayload::from_bytes(b"content".to_vec())),
            )
            .await
            .unwrap();
        assert_eq!(
            res.meta.first_str(&schema.hash),
            Some("sha1:040f06fd774092478d450774f5ba30c5da78acc8")
        );
        assert_eq!(res.meta.first_str(&schema.binary_size), Some("7"));
        assert_eq!(repo.binary(res.uri.as_str()).unwrap(), b"content");
    }

    #[tokio::test]
    async fn scripted_faults_fire_once() {
        let repo = InMemoryRepository::new("https://repo.example.org/api");
        repo.begin().await.unwrap();
        repo.fail_next("create", RepoError::Conflict("Resource 9 locked".into()));
        let err = repo
            .create_resource(&node("https://id.example.org/a"), None)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        repo.create_resource(&node("https://id.example.org/a"), None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn recursive_delete_with_references() {
        let repo = InMemoryRepository::new("https://repo.example.org/api");
        let schema = repo.schema().clone();
        repo.begin().await.unwrap();
        let parent = repo
            .create_resource(&node("https://id.example.org/parent"), None)
            .await
            .unwrap();
        let mut child = node("https://id.example.org/child");
        child.add(schema.parent.clone(), Term::Named(parent.uri.clone()));
        repo.create_resource(&child, None).await.unwrap();
        let mut peer = node("https://id.example.org/peer");
        peer.add(
            NamedNode::new("https://example.org/sees"),
            Term::Named(parent.uri.clone()),
        );
        let peer = repo.create_resource(&peer, None).await.unwrap();
        repo.delete(&parent, true, true).await.unwrap();
        assert!(repo.get_by_id("https://id.example.org/child").is_none());
        let peer = repo.get(peer.uri.as_str()).unwrap();
        assert!(!peer
            .meta
            .has(&NamedNode::new("https://example.org/sees")));
    }
}

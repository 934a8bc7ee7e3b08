//! Per-file upsert task: decide skip / update / new-version / create and
//! execute the decision against the repository.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Local, NaiveDateTime};
use digest::Digest;

use super::file::FileIngestOpts;
use super::{ChunkItem, IngestError, IngestOutcome, SkipMode, VersioningMode};
use crate::fileid;
use crate::progress::ProgressMeter;
use crate::rdf::{vocab, MetadataNode, NamedNode, Term, UriNormalizer};
use crate::repo::{BinaryPayload, LookupResult, RepoResource, Repository, UpdateMode};

/// One filesystem entry scheduled for ingestion.
#[derive(Debug, Clone)]
pub(crate) struct FileRecord {
    pub path: PathBuf,
    pub is_dir: bool,
    pub size: u64,
    pub modified: Option<SystemTime>,
    /// Depth below the ingested root; 0 for direct children of the root.
    pub level: usize,
    pub attempts: u32,
}

impl ChunkItem for FileRecord {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn attempts(&self) -> u32 {
        self.attempts
    }

    fn bump_attempts(&mut self) {
        self.attempts += 1;
    }
}

/// Shared, read-only context for all file tasks of one ingest.
pub(crate) struct TaskContext<'a> {
    pub repo: &'a dyn Repository,
    pub meter: &'a ProgressMeter,
    pub progress_id: &'a str,
    pub directory: &'a Path,
    pub id_prefix: &'a str,
    pub opts: &'a FileIngestOpts,
    pub normalizer: &'a UriNormalizer,
}

impl TaskContext<'_> {
    /// Run the state machine for one record.
    pub async fn execute(&self, rec: FileRecord) -> Result<IngestOutcome, IngestError> {
        let meta = self.build_metadata(&rec)?;
        let schema = self.repo.schema();
        let ids = meta.ids(&schema.id);
        let outcome = match self.repo.resource_by_ids(&ids).await? {
            LookupResult::Found(res) => self.on_existing(&rec, meta, res).await?,
            LookupResult::NotFound => self.on_missing(&rec, meta, &ids).await?,
        };
        let n = self.meter.increment(self.progress_id);
        let uri = outcome
            .resource()
            .map(|r| r.uri.as_str().to_string())
            .unwrap_or_default();
        tracing::info!(
            "{}",
            self.meter.format(
                self.progress_id,
                n,
                &format!(
                    "Processing {} ({{n}}/{{t}} {{p}}%): {} {uri}",
                    rec.path.display(),
                    outcome.action()
                ),
            )
        );
        Ok(outcome)
    }

    /// Derive the id, run the metadata lookup and enrich the node with the
    /// filesystem-derived properties.
    fn build_metadata(&self, rec: &FileRecord) -> Result<MetadataNode, IngestError> {
        let schema = self.repo.schema();
        let id = NamedNode::new(fileid::derive(&rec.path, self.directory, self.id_prefix)?);
        let mut meta = match &self.opts.meta_lookup {
            Some(lookup) => lookup.get(
                &rec.path,
                std::slice::from_ref(&id),
                self.opts.meta_lookup_require,
            )?,
            None => MetadataNode::new(Term::Named(id.clone())),
        };
        meta.add(schema.id.clone(), Term::Named(id.clone()));
        if let Some(name) = rec.path.file_name() {
            meta.add(
                schema.file_name.clone(),
                Term::literal(name.to_string_lossy()),
            );
        }
        let rdf_type = NamedNode::new(vocab::RDF_TYPE);
        if !meta.has(&rdf_type) {
            let class = if rec.is_dir {
                self.opts
                    .collection_class
                    .clone()
                    .unwrap_or_else(|| schema.collection_class.clone())
            } else {
                self.opts
                    .binary_class
                    .clone()
                    .unwrap_or_else(|| schema.binary_class.clone())
            };
            meta.add(rdf_type, Term::Named(class));
        }
        let parent = if self.opts.flat_structure || rec.level == 0 {
            self.opts.parent.clone()
        } else {
            // Last literal `/` in the percent-encoded id; encoded `%2F`
            // stays inside its segment.
            id.as_str()
                .rfind('/')
                .map(|pos| NamedNode::new(&id.as_str()[..pos]))
        };
        if let Some(parent) = parent {
            meta.add(schema.parent.clone(), Term::Named(parent));
        }
        if !rec.is_dir {
            meta.add(
                schema.binary_size.clone(),
                Term::literal(rec.size.to_string()),
            );
            if let Some(mime) = guess_mime(&rec.path) {
                meta.add(schema.mime.clone(), Term::literal(mime));
            }
        }
        self.normalizer.normalize_objects(&mut meta, &schema.id);
        Ok(meta)
    }

    async fn on_missing(
        &self,
        rec: &FileRecord,
        meta: MetadataNode,
        ids: &[NamedNode],
    ) -> Result<IngestOutcome, IngestError> {
        if self.opts.skip_mode.contains(SkipMode::NOT_EXIST) {
            return Ok(skipped(ids));
        }
        self.create(rec, meta).await
    }

    async fn on_existing(
        &self,
        rec: &FileRecord,
        meta: MetadataNode,
        res: RepoResource,
    ) -> Result<IngestOutcome, IngestError> {
        let schema = self.repo.schema();
        if self.opts.skip_mode.contains(SkipMode::EXIST) {
            return Ok(IngestOutcome::Skipped {
                id: res.uri.as_str().to_string(),
            });
        }
        if self.opts.skip_mode.contains(SkipMode::BINARY_EXIST) && res.has_binary(schema) {
            return Ok(IngestOutcome::Skipped {
                id: res.uri.as_str().to_string(),
            });
        }
        if self.opts.versioning != VersioningMode::None && !rec.is_dir {
            if self.version_check(rec, &res)? {
                return self.spawn_new_version(rec, meta, res).await;
            }
            // Binary unchanged: refresh metadata only.
            let res = self
                .repo
                .update_metadata(&res, UpdateMode::Merge, &meta)
                .await?;
            return Ok(IngestOutcome::Updated(res));
        }
        self.update(rec, meta, res).await
    }

    async fn update(
        &self,
        rec: &FileRecord,
        meta: MetadataNode,
        mut res: RepoResource,
    ) -> Result<IngestOutcome, IngestError> {
        if self.uploadable(rec) {
            res = self
                .repo
                .update_content(&res, &self.payload(rec, &meta))
                .await?;
        }
        let res = self
            .repo
            .update_metadata(&res, UpdateMode::Merge, &meta)
            .await?;
        Ok(IngestOutcome::Updated(res))
    }

    async fn create(
        &self,
        rec: &FileRecord,
        mut meta: MetadataNode,
    ) -> Result<IngestOutcome, IngestError> {
        self.assure_label(rec, &mut meta);
        let binary = self.uploadable(rec).then(|| self.payload(rec, &meta));
        let res = self.repo.create_resource(&meta, binary.as_ref()).await?;
        Ok(IngestOutcome::Created(res))
    }

    /// Decide whether the repository copy is outdated.
    fn version_check(&self, rec: &FileRecord, res: &RepoResource) -> Result<bool, IngestError> {
        let schema = self.repo.schema();
        match self.opts.versioning {
            VersioningMode::None => Ok(false),
            VersioningMode::Always => Ok(true),
            VersioningMode::Date => {
                let Some(modified) = rec.modified else {
                    return Ok(false);
                };
                let local = DateTime::<Local>::from(modified)
                    .format("%Y-%m-%dT%H:%M:%S")
                    .to_string();
                match res.meta.first_str(&schema.modification_date) {
                    Some(remote) => Ok(local > normalize_date(remote)),
                    None => Ok(true),
                }
            }
            VersioningMode::Digest => {
                let Some(remote) = res.meta.first_str(&schema.hash) else {
                    return Ok(false);
                };
                let Some((algo, remote_hex)) = remote.split_once(':') else {
                    return Ok(false);
                };
                let local_hex = digest_file(algo, &rec.path)?;
                Ok(!local_hex.eq_ignore_ascii_case(remote_hex))
            }
        }
    }

    /// Supersede `old` with a new resource carrying the non-repo ids.
    async fn spawn_new_version(
        &self,
        rec: &FileRecord,
        local_meta: MetadataNode,
        old: RepoResource,
    ) -> Result<IngestOutcome, IngestError> {
        let schema = self.repo.schema();
        let base_url = self.repo.base_url();
        let pid_pass = self.opts.pid_pass;

        let pids: Vec<String> = old
            .meta
            .objects(&schema.pid)
            .map(|t| t.lexical().to_string())
            .collect();

        // The new resource inherits everything but the identifiers (and the
        // pids, when they are to stay behind).
        let mut new_meta = MetadataNode::new(local_meta.subject().clone());
        for (predicate, object) in old.meta.properties() {
            if predicate == &schema.id {
                continue;
            }
            if !pid_pass && predicate == &schema.pid {
                continue;
            }
            new_meta.add(predicate.clone(), object.clone());
        }
        new_meta.add(
            schema.is_new_version_of.clone(),
            Term::Named(old.uri.clone()),
        );

        // Repo-internal ids stay on the old resource; the rest migrates.
        // Pids only migrate when the pid is passed on.
        let mut kept = Vec::new();
        for id in old.meta.ids(&schema.id) {
            let is_pid = pids.iter().any(|p| p == id.as_str());
            if id.as_str().starts_with(base_url) || (!pid_pass && is_pid) {
                kept.push(id);
            } else {
                new_meta.add(schema.id.clone(), Term::Named(id));
            }
        }

        let mut reduced = old.meta.clone();
        reduced.remove(&schema.parent);
        if pid_pass {
            reduced.remove(&schema.pid);
        }
        reduced.remove(&schema.id);
        for id in kept {
            reduced.add(schema.id.clone(), Term::Named(id));
        }
        // The old resource must still carry a non-repo id.
        reduced.add(schema.id.clone(), Term::Named(schema.mint_vid()));
        let old = self
            .repo
            .update_metadata(&old, UpdateMode::Overwrite, &reduced)
            .await?;

        new_meta.merge(&local_meta);
        let binary = self.uploadable(rec).then(|| self.payload(rec, &new_meta));
        let new = self
            .repo
            .create_resource(&new_meta, binary.as_ref())
            .await?;

        let mut link = MetadataNode::new(Term::Named(old.uri.clone()));
        link.add(
            schema.is_prev_version_of.clone(),
            Term::Named(new.uri.clone()),
        );
        self.repo
            .update_metadata(&old, UpdateMode::Merge, &link)
            .await?;
        Ok(IngestOutcome::Versioned(new))
    }

    /// A resource created without a label gets its file name, untagged.
    fn assure_label(&self, rec: &FileRecord, meta: &mut MetadataNode) {
        let schema = self.repo.schema();
        if meta.has(&schema.label) {
            return;
        }
        let name = rec
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| rec.path.display().to_string());
        meta.add(
            schema.label.clone(),
            Term::Literal(crate::rdf::Literal::with_lang(name, "und")),
        );
    }

    fn uploadable(&self, rec: &FileRecord) -> bool {
        if rec.is_dir {
            return false;
        }
        let limit = self.opts.upload_size_limit;
        limit < 0 || rec.size < limit as u64
    }

    fn payload(&self, rec: &FileRecord, meta: &MetadataNode) -> BinaryPayload {
        let schema = self.repo.schema();
        let mut payload = BinaryPayload::from_path(&rec.path);
        if let Some(mime) = meta.first_str(&schema.mime) {
            payload = payload.with_mime(mime);
        }
        if let Some(name) = rec.path.file_name() {
            payload = payload.with_file_name(name.to_string_lossy());
        }
        payload
    }
}

fn skipped(ids: &[NamedNode]) -> IngestOutcome {
    IngestOutcome::Skipped {
        id: ids
            .first()
            .map(|id| id.as_str().to_string())
            .unwrap_or_default(),
    }
}

/// Reduce an ISO-8601 timestamp to its comparable `Y-m-dTH:M:S` prefix.
fn normalize_date(s: &str) -> String {
    let trimmed = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return dt.format("%Y-%m-%dT%H:%M:%S").to_string();
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f") {
        return dt.format("%Y-%m-%dT%H:%M:%S").to_string();
    }
    trimmed.chars().take(19).collect()
}

/// Compute `algo` over a file's content, hex-encoded.
pub(crate) fn digest_file(algo: &str, path: &Path) -> Result<String, IngestError> {
    let data = std::fs::read(path).map_err(|source| IngestError::Io {
        path: path.display().to_string(),
        source,
    })?;
    digest_bytes(algo, &data)
}

/// Compute `algo` over a byte buffer, hex-encoded.
pub(crate) fn digest_bytes(algo: &str, data: &[u8]) -> Result<String, IngestError> {
    fn finish<D: Digest>(data: &[u8]) -> String {
        let mut hasher = D::new();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }
    match algo.to_ascii_lowercase().as_str() {
        "md5" => Ok(finish::<md5::Md5>(data)),
        "sha1" => Ok(finish::<sha1::Sha1>(data)),
        "sha256" => Ok(finish::<sha2::Sha256>(data)),
        "sha512" => Ok(finish::<sha2::Sha512>(data)),
        other => Err(IngestError::UnsupportedHash(other.to_string())),
    }
}

/// Media type by file name table, falling back to content probing.
fn guess_mime(path: &Path) -> Option<String> {
    if let Some(mime) = mime_guess::from_path(path).first_raw() {
        return Some(mime.to_string());
    }
    let bytes = std::fs::read(path).ok()?;
    if bytes.is_empty() {
        return None;
    }
    Some(if std::str::from_utf8(&bytes).is_ok() {
        "text/plain".to_string()
    } else {
        "application/octet-stream".to_string()
    })
}

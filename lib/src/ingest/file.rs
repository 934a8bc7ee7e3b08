//! Directory-tree ingestion: walk, filter, derive ids and drive the chunked
//! upload pipeline.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use tokio::time::Instant;

use super::task::{FileRecord, TaskContext};
use super::{ErrorMode, IngestError, IngestOutcome, Scheduler, SkipMode, VersioningMode};
use crate::metalookup::MetaLookup;
use crate::progress::ProgressMeter;
use crate::rdf::{NamedNode, UriNormalizer};
use crate::repo::Repository;

/// How often the walker prolongs an open transaction during a long scan.
const PROLONG_INTERVAL: Duration = Duration::from_secs(10);

/// Configuration of a directory ingest.
#[derive(Debug)]
pub struct FileIngestOpts {
    /// Accept only basenames matching this pattern (directories are exempt).
    pub filter_match: Option<Regex>,
    /// Reject basenames matching this pattern (directories are exempt).
    pub filter_skip: Option<Regex>,
    /// Skip per-directory collection resources; every file becomes a direct
    /// child of `parent`.
    pub flat_structure: bool,
    /// Maximum recursion depth; 0 ingests only the root directory's entries.
    pub depth: usize,
    /// Create resources for directories without (ingested) children.
    pub include_empty_dirs: bool,
    /// Files of at least this many bytes are ingested metadata-only;
    /// negative means no limit.
    pub upload_size_limit: i64,
    /// Skip policy against pre-existing repository state.
    pub skip_mode: SkipMode,
    /// Re-ingest versioning policy.
    pub versioning: VersioningMode,
    /// Move pids onto new versions instead of leaving them behind.
    pub pid_pass: bool,
    /// Commit-then-begin after each this many processed resources; 0 is off.
    pub auto_commit: usize,
    /// External metadata source.
    pub meta_lookup: Option<Arc<dyn MetaLookup>>,
    /// Fail when the metadata source has nothing for a file.
    pub meta_lookup_require: bool,
    /// `rdf:type` for directory resources; defaults to the schema's.
    pub collection_class: Option<NamedNode>,
    /// `rdf:type` for file resources; defaults to the schema's.
    pub binary_class: Option<NamedNode>,
    /// Parent of top-level records (and of everything under `flat_structure`).
    pub parent: Option<NamedNode>,
    /// Fatal-error routing.
    pub error_mode: ErrorMode,
    /// Maximum in-flight repository requests.
    pub concurrency: usize,
    /// Maximum re-enqueues per task.
    pub retries: u32,
}

impl Default for FileIngestOpts {
    fn default() -> Self {
        Self {
            filter_match: None,
            filter_skip: None,
            flat_structure: false,
            depth: usize::MAX,
            include_empty_dirs: false,
            upload_size_limit: -1,
            skip_mode: SkipMode::empty(),
            versioning: VersioningMode::None,
            pid_pass: false,
            auto_commit: 0,
            meta_lookup: None,
            meta_lookup_require: false,
            collection_class: None,
            binary_class: None,
            parent: None,
            error_mode: ErrorMode::Fail,
            concurrency: 4,
            retries: 3,
        }
    }
}

/// Ingests a directory tree as repository resources with path-derived ids.
#[derive(Debug)]
pub struct FileIngester {
    directory: PathBuf,
    id_prefix: String,
    opts: FileIngestOpts,
}

impl FileIngester {
    /// Ingest `directory`, deriving resource ids under `id_prefix`.
    pub fn new(
        directory: impl Into<PathBuf>,
        id_prefix: impl Into<String>,
        opts: FileIngestOpts,
    ) -> Self {
        Self {
            directory: directory.into(),
            id_prefix: id_prefix.into(),
            opts,
        }
    }

    /// Walk, then upsert everything within the caller's open transaction.
    ///
    /// The returned list preserves scheduling order: chunk by chunk, input
    /// order within each chunk, retried tasks at the tail.
    pub async fn import(
        &self,
        repo: &dyn Repository,
    ) -> Result<Vec<IngestOutcome>, IngestError> {
        let records = self.walk(repo).await?;
        tracing::info!(
            directory = %self.directory.display(),
            files = records.len(),
            "directory scan finished"
        );
        let meter = ProgressMeter::new();
        let progress_id = self.directory.display().to_string();
        meter.init(&progress_id, records.len());
        let ctx = TaskContext {
            repo,
            meter: &meter,
            progress_id: &progress_id,
            directory: &self.directory,
            id_prefix: &self.id_prefix,
            opts: &self.opts,
            normalizer: UriNormalizer::standard(),
        };
        let scheduler = Scheduler {
            repo,
            concurrency: self.opts.concurrency,
            retries: self.opts.retries,
            auto_commit: self.opts.auto_commit,
            error_mode: self.opts.error_mode,
        };
        scheduler.run(records, |rec| ctx.execute(rec)).await
    }

    fn accepts(&self, name: &str) -> bool {
        if let Some(skip) = &self.opts.filter_skip {
            if skip.is_match(name) {
                return false;
            }
        }
        match &self.opts.filter_match {
            Some(keep) => keep.is_match(name),
            None => true,
        }
    }

    /// Pre-order files, post-order directory records, depth-bounded.
    ///
    /// The scan may run inside an open transaction for a long time, so it
    /// prolongs the transaction roughly every ten seconds.
    async fn walk(&self, repo: &dyn Repository) -> Result<Vec<FileRecord>, IngestError> {
        struct Frame {
            path: PathBuf,
            level: usize,
            entries: std::vec::IntoIter<std::fs::DirEntry>,
            had_children: bool,
        }

        let mut records = Vec::new();
        let mut last_prolong = Instant::now();
        let mut stack = vec![Frame {
            path: self.directory.clone(),
            level: 0,
            entries: read_dir_sorted(&self.directory)?,
            had_children: false,
        }];

        while let Some(frame) = stack.last_mut() {
            if last_prolong.elapsed() >= PROLONG_INTERVAL {
                repo.prolong().await?;
                last_prolong = Instant::now();
            }
            let Some(entry) = frame.entries.next() else {
                // Directory finished: decide whether it becomes a record.
                let frame = stack.pop().expect("frame is present");
                let emit = !self.opts.flat_structure
                    && frame.level > 0
                    && (frame.had_children || self.opts.include_empty_dirs);
                if emit {
                    records.push(FileRecord {
                        path: frame.path,
                        is_dir: true,
                        size: 0,
                        modified: None,
                        level: frame.level - 1,
                        attempts: 0,
                    });
                }
                if let Some(parent) = stack.last_mut() {
                    parent.had_children |= frame.had_children || emit;
                }
                continue;
            };
            let path = entry.path();
            let file_type = entry.file_type().map_err(|source| IngestError::Io {
                path: path.display().to_string(),
                source,
            })?;
            if file_type.is_dir() {
                if frame.level < self.opts.depth {
                    let level = frame.level + 1;
                    stack.push(Frame {
                        entries: read_dir_sorted(&path)?,
                        path,
                        level,
                        had_children: false,
                    });
                }
                continue;
            }
            let name = entry.file_name();
            if !self.accepts(&name.to_string_lossy()) {
                continue;
            }
            let metadata = entry.metadata().map_err(|source| IngestError::Io {
                path: path.display().to_string(),
                source,
            })?;
            records.push(FileRecord {
                path,
                is_dir: false,
                size: metadata.len(),
                modified: metadata.modified().ok(),
                level: frame.level,
                attempts: 0,
            });
            frame.had_children = true;
        }
        Ok(records)
    }
}

fn read_dir_sorted(path: &Path) -> Result<std::vec::IntoIter<std::fs::DirEntry>, IngestError> {
    let mut entries: Vec<std::fs::DirEntry> = std::fs::read_dir(path)
        .and_then(|it| it.collect::<Result<_, _>>())
        .map_err(|source| IngestError::Io {
            path: path.display().to_string(),
            source,
        })?;
    entries.sort_by_key(std::fs::DirEntry::file_name);
    Ok(entries.into_iter())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts_with_filters(keep: Option<&str>, skip: Option<&str>) -> FileIngestOpts {
        FileIngestOpts {
            filter_match: keep.map(|p| Regex::new(p).unwrap()),
            filter_skip: skip.map(|p| Regex::new(p).unwrap()),
            ..FileIngestOpts::default()
        }
    }

    #[test]
    fn filters_apply_to_basenames() {
        let ingester = FileIngester::new(
            "/data",
            "x:/",
            opts_with_filters(Some(r"txt|xml"), Some(r"^skiptest\.txt$")),
        );
        assert!(ingester.accepts("a.txt"));
        assert!(ingester.accepts("a.xml"));
        assert!(!ingester.accepts("a.png"));
        assert!(!ingester.accepts("skiptest.txt"));
    }

    #[test]
    fn empty_filters_accept_everything() {
        let ingester = FileIngester::new("/data", "x:/", FileIngestOpts::default());
        assert!(ingester.accepts("anything.bin"));
    }

    #[tokio::test]
    async fn walk_respects_depth_and_emits_dirs_post_order() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::write(root.join("a.txt"), "a").unwrap();
        std::fs::create_dir_all(root.join("sub/deep")).unwrap();
        std::fs::write(root.join("sub/b.txt"), "b").unwrap();
        std::fs::write(root.join("sub/deep/c.txt"), "c").unwrap();

        let repo = crate::fixture::InMemoryRepository::new("https://repo.example.org/api");
        let ingester = FileIngester::new(
            root,
            "x:/",
            FileIngestOpts {
                depth: 1,
                ..FileIngestOpts::default()
            },
        );
        let records = ingester.walk(&repo).await.unwrap();
        let names: Vec<String> = records
            .iter()
            .map(|r| {
                r.path
                    .strip_prefix(root)
                    .unwrap()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();
        // deep/ is beyond depth 1; sub/ itself is recorded after its files.
        assert_eq!(names, vec!["a.txt", "sub/b.txt", "sub"]);
        assert!(records[2].is_dir);
        assert_eq!(records[2].level, 0);
        assert_eq!(records[1].level, 1);
    }

    #[tokio::test]
    async fn walk_skips_empty_dirs_unless_asked() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir(root.join("empty")).unwrap();
        let repo = crate::fixture::InMemoryRepository::new("https://repo.example.org/api");

        let ingester = FileIngester::new(root, "x:/", FileIngestOpts::default());
        assert!(ingester.walk(&repo).await.unwrap().is_empty());

        let ingester = FileIngester::new(
            root,
            "x:/",
            FileIngestOpts {
                include_empty_dirs: true,
                ..FileIngestOpts::default()
            },
        );
        let records = ingester.walk(&repo).await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].is_dir);
    }

    #[tokio::test]
    async fn flat_walk_emits_no_directory_records() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir(root.join("sub")).unwrap();
        std::fs::write(root.join("sub/a.txt"), "a").unwrap();
        let repo = crate::fixture::InMemoryRepository::new("https://repo.example.org/api");
        let ingester = FileIngester::new(
            root,
            "x:/",
            FileIngestOpts {
                flat_structure: true,
                ..FileIngestOpts::default()
            },
        );
        let records = ingester.walk(&repo).await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(!records[0].is_dir);
    }
}

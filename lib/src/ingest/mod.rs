//! The ingestion drivers: directory trees, RDF graphs and SKOS vocabularies.
//!
//! All three build a work list up front and hand it to a shared chunked
//! scheduler that drives bounded-parallel repository calls, re-enqueues
//! retryable failures, commits at chunk boundaries and routes fatal errors
//! according to the configured error mode.

use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;

use bitflags::bitflags;

use crate::fileid::PathEncodingUnknown;
use crate::metalookup::MetaLookupError;
use crate::rdf::NamedNode;
use crate::repo::{map_bounded, RepoError, RepoResource, Repository};

pub mod file;
pub mod graph;
pub mod skos;
pub(crate) mod task;

pub use file::{FileIngestOpts, FileIngester};
pub use graph::{GraphIngestOpts, GraphIngester, OutOfNamespace};
pub use skos::{ExactMatchMode, RelationMode, SkosIngestOpts, SkosIngester, VocabularyState};

/// How long the scheduler pauses after a chunk that saw a transport failure.
pub const NETWORKERROR_SLEEP: Duration = Duration::from_secs(3);

bitflags! {
    /// Pre-existing-state situations that make a task skip instead of act.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SkipMode: u32 {
        /// Skip files without a repository counterpart (no creations).
        const NOT_EXIST = 0x1;
        /// Skip files that already have a repository counterpart.
        const EXIST = 0x2;
        /// Skip files whose counterpart already carries a binary payload.
        const BINARY_EXIST = 0x4;
    }
}

/// When re-ingesting an existing resource, how to decide between updating it
/// in place and spawning a new version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum VersioningMode {
    /// Always update in place.
    #[default]
    None,
    /// Always spawn a new version.
    Always,
    /// Spawn a new version when the binary digest differs.
    Digest,
    /// Spawn a new version when the local file is newer.
    Date,
}

/// What to do when a task fails with a non-retryable error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ErrorMode {
    /// Abort on the first fatal error.
    #[default]
    Fail,
    /// Keep going, then fail with a summary if anything went wrong.
    Pass,
    /// Keep going and interleave error records into the result list.
    Include,
    /// Like `Include`, but intermediate commits also proceed across errors.
    Continue,
}

/// What one work item ended up doing.
#[derive(Debug, Clone)]
pub enum IngestOutcome {
    /// A new repository resource was created.
    Created(RepoResource),
    /// An existing resource was updated in place.
    Updated(RepoResource),
    /// A new version was created, superseding an existing resource.
    Versioned(RepoResource),
    /// Policy decided not to act.
    Skipped {
        /// The identifier the task was working under.
        id: String,
    },
    /// An obsolete resource was deleted.
    Deleted(NamedNode),
    /// The task failed; present only under `Include`/`Continue` error modes.
    Failed {
        /// The identifier the task was working under.
        id: String,
        /// The rendered error.
        message: String,
    },
}

impl IngestOutcome {
    /// The touched repository resource, when the outcome produced one.
    pub fn resource(&self) -> Option<&RepoResource> {
        match self {
            IngestOutcome::Created(res)
            | IngestOutcome::Updated(res)
            | IngestOutcome::Versioned(res) => Some(res),
            _ => None,
        }
    }

    /// Short action word for progress lines.
    pub fn action(&self) -> &'static str {
        match self {
            IngestOutcome::Created(_) => "create",
            IngestOutcome::Updated(_) => "update",
            IngestOutcome::Versioned(_) => "new version",
            IngestOutcome::Skipped { .. } => "skip",
            IngestOutcome::Deleted(_) => "delete",
            IngestOutcome::Failed { .. } => "error",
        }
    }
}

/// A failed ingest or a failed work item.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Host path could not be converted to UTF-8.
    #[error(transparent)]
    PathEncoding(#[from] PathEncodingUnknown),
    /// Metadata lookup failed.
    #[error(transparent)]
    MetaLookup(#[from] MetaLookupError),
    /// A repository call failed.
    #[error(transparent)]
    Repo(#[from] RepoError),
    /// A graph node references a blank node, which cannot be ingested.
    #[error("node {subject} references a blank node")]
    WrongReference {
        /// The offending subject.
        subject: String,
    },
    /// The vocabulary graph contains no `skos:ConceptScheme`.
    #[error("the graph contains no skos:ConceptScheme")]
    NoConceptScheme,
    /// The vocabulary graph contains more than one `skos:ConceptScheme`.
    #[error("the graph contains more than one skos:ConceptScheme")]
    MultipleConceptSchemes,
    /// A remote hash names an algorithm this build cannot compute.
    #[error("unsupported hash algorithm {0:?}")]
    UnsupportedHash(String),
    /// A local file could not be read.
    #[error("cannot read {path}: {source}")]
    Io {
        /// The offending path.
        path: String,
        /// The underlying error.
        source: std::io::Error,
    },
    /// An input document could not be parsed.
    #[error(transparent)]
    Parse(#[from] crate::rdf::ntriples::ParseError),
    /// Fatal error under the `Fail` error mode.
    ///
    /// Carries the resources already committed by intermediate commits; the
    /// open transaction is the caller's to roll back.
    #[error("ingest aborted: {source}")]
    Aborted {
        /// Resources committed before the abort.
        committed: Vec<RepoResource>,
        /// The error that aborted the ingest.
        source: Box<IngestError>,
    },
    /// Deferred failure under the `Pass` error mode.
    #[error("{} of {} tasks failed", messages.len(), total)]
    Summary {
        /// Total number of scheduled tasks.
        total: usize,
        /// One rendered message per failed task.
        messages: Vec<String>,
        /// Resources committed by intermediate commits.
        committed: Vec<RepoResource>,
    },
}

impl IngestError {
    /// Whether re-running the failed work item may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, IngestError::Repo(e) if e.is_retryable())
    }

    /// Whether the failure was transport-level (drives post-chunk backoff).
    pub fn is_network(&self) -> bool {
        matches!(self, IngestError::Repo(e) if e.is_network())
    }

    /// Resources known to be committed despite the failure.
    pub fn committed(&self) -> &[RepoResource] {
        match self {
            IngestError::Aborted { committed, .. } | IngestError::Summary { committed, .. } => {
                committed
            }
            _ => &[],
        }
    }
}

/// A work item the scheduler can re-enqueue.
pub(crate) trait ChunkItem: Clone {
    /// Identifier used in progress lines and error messages.
    fn describe(&self) -> String;
    /// How often this item has been re-enqueued.
    fn attempts(&self) -> u32;
    /// Count one more re-enqueue.
    fn bump_attempts(&mut self);
}

/// Shared chunked retry scheduler.
pub(crate) struct Scheduler<'a> {
    pub repo: &'a dyn Repository,
    pub concurrency: usize,
    pub retries: u32,
    pub auto_commit: usize,
    pub error_mode: ErrorMode,
}

impl Scheduler<'_> {
    fn chunk_size(&self, total: usize) -> usize {
        if self.auto_commit > 0 {
            self.auto_commit
        } else {
            total.min(100 * self.concurrency.max(1)).max(1)
        }
    }

    /// Drive all items to completion.
    ///
    /// Results are appended chunk by chunk, preserving input order within
    /// each chunk; re-enqueued items form later chunks of their own.
    pub async fn run<T, F, Fut>(
        &self,
        items: Vec<T>,
        exec: F,
    ) -> Result<Vec<IngestOutcome>, IngestError>
    where
        T: ChunkItem,
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<IngestOutcome, IngestError>>,
    {
        let total = items.len();
        let chunk_size = self.chunk_size(total);
        let mut queue: VecDeque<T> = items.into();
        let mut out = Vec::with_capacity(total);
        let mut committed: Vec<RepoResource> = Vec::new();
        let mut uncommitted: Vec<RepoResource> = Vec::new();
        let mut messages: Vec<String> = Vec::new();
        let mut chunk_index = 0usize;
        let mut sleep_pending = false;

        while !queue.is_empty() {
            let take = chunk_size.min(queue.len());
            let chunk: Vec<T> = queue.drain(..take).collect();
            let may_commit = messages.is_empty() || self.error_mode == ErrorMode::Continue;
            if self.auto_commit > 0 && chunk_index > 0 && may_commit {
                self.repo.commit().await?;
                committed.append(&mut uncommitted);
                self.repo.begin().await?;
            }
            if sleep_pending {
                tracing::warn!(
                    "transient network failure, sleeping {}s before the next chunk",
                    NETWORKERROR_SLEEP.as_secs()
                );
                tokio::time::sleep(NETWORKERROR_SLEEP).await;
                sleep_pending = false;
            }
            let results = map_bounded(chunk.clone(), self.concurrency, &exec).await;
            for (mut item, result) in chunk.into_iter().zip(results) {
                match result {
                    Ok(outcome) => {
                        if let Some(res) = outcome.resource() {
                            uncommitted.push(res.clone());
                        }
                        out.push(outcome);
                    }
                    Err(e) if e.is_retryable() && item.attempts() < self.retries => {
                        if e.is_network() {
                            sleep_pending = true;
                        }
                        tracing::warn!(item = %item.describe(), error = %e, "retrying");
                        item.bump_attempts();
                        queue.push_back(item);
                    }
                    Err(e) => {
                        let label = item.describe();
                        match self.error_mode {
                            ErrorMode::Fail => {
                                return Err(IngestError::Aborted {
                                    committed,
                                    source: Box::new(e),
                                });
                            }
                            ErrorMode::Pass | ErrorMode::Include | ErrorMode::Continue => {
                                tracing::error!(item = %label, error = %e, "task failed");
                                messages.push(format!("{label}: {e}"));
                                out.push(IngestOutcome::Failed {
                                    id: label,
                                    message: e.to_string(),
                                });
                            }
                        }
                    }
                }
            }
            chunk_index += 1;
        }

        if !messages.is_empty() && self.error_mode == ErrorMode::Pass {
            return Err(IngestError::Summary {
                total,
                messages,
                committed,
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skip_mode_combinations() {
        let combined = SkipMode::EXIST | SkipMode::BINARY_EXIST;
        assert!(combined.contains(SkipMode::EXIST));
        assert!(combined.contains(SkipMode::BINARY_EXIST));
        assert!(!combined.contains(SkipMode::NOT_EXIST));
        assert_eq!(SkipMode::default(), SkipMode::empty());
        // The numeric encoding is part of the configuration surface.
        assert_eq!(SkipMode::NOT_EXIST.bits(), 1);
        assert_eq!(SkipMode::EXIST.bits(), 2);
        assert_eq!(SkipMode::BINARY_EXIST.bits(), 4);
    }

    #[test]
    fn retryability_follows_repo_errors() {
        let e = IngestError::Repo(RepoError::Network("timeout".into()));
        assert!(e.is_retryable());
        assert!(e.is_network());
        let e = IngestError::Repo(RepoError::Conflict("Resource 7 locked".into()));
        assert!(e.is_retryable());
        assert!(!e.is_network());
        let e = IngestError::NoConceptScheme;
        assert!(!e.is_retryable());
    }
}

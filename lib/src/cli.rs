//! Command line surface, driven from the `arche-ingest` binary.

use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use fn_error_context::context;
use regex::Regex;
use serde::Deserialize;
use url::Url;

use crate::ingest::{
    ErrorMode, ExactMatchMode, FileIngestOpts, FileIngester, GraphIngestOpts, GraphIngester,
    IngestOutcome, OutOfNamespace, RelationMode, SkipMode, SkosIngestOpts, SkosIngester,
    VersioningMode,
};
use crate::metalookup::{FileSidecarMetaLookup, GraphMetaLookup, MetaLookup};
use crate::rdf::{NamedNode, RdfFormat};
use crate::repo::{HttpRepository, Repository};

/// Ingest data into an ARCHE repository.
#[derive(Debug, Parser)]
#[command(name = "arche-ingest", version)]
pub(crate) struct Cli {
    #[clap(flatten)]
    connection: ConnectionOpts,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct ConnectionOpts {
    /// Repository API base URL.
    #[clap(long, global = true)]
    repo_url: Option<Url>,
    /// User for HTTP basic authentication.
    #[clap(long, global = true)]
    user: Option<String>,
    /// Password for HTTP basic authentication.
    #[clap(long, global = true, env = "ARCHE_PASSWORD", hide_env_values = true)]
    password: Option<String>,
    /// TOML configuration file; command line flags take precedence.
    #[clap(long, global = true)]
    config: Option<PathBuf>,
}

/// Connection values loadable from a TOML file.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct ConfigFile {
    repo_url: Option<Url>,
    user: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Ingest a directory tree as binary resources.
    Dir(DirOpts),
    /// Ingest an RDF metadata graph.
    Graph(GraphOpts),
    /// Ingest a SKOS vocabulary.
    Vocabulary(VocabularyOpts),
    /// Print the repository schema.
    Schema,
}

#[derive(Debug, Args)]
struct CommonOpts {
    /// Maximum in-flight repository requests.
    #[clap(long, default_value_t = 4)]
    concurrency: usize,
    /// Maximum retries per failed work item.
    #[clap(long, default_value_t = 3)]
    retries: u32,
    /// Commit after each N processed resources (0 disables).
    #[clap(long, default_value_t = 0)]
    auto_commit: usize,
    /// What to do on a fatal per-item error.
    #[clap(long, value_enum, default_value_t)]
    error_mode: ErrorMode,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SkipFlag {
    NotExist,
    Exist,
    BinaryExist,
}

#[derive(Debug, Args)]
struct DirOpts {
    /// The directory to ingest.
    directory: PathBuf,
    /// Prefix under which file ids are minted.
    id_prefix: String,
    #[clap(flatten)]
    common: CommonOpts,
    /// Ingest only files whose basename matches this pattern.
    #[clap(long)]
    filter_match: Option<Regex>,
    /// Skip files whose basename matches this pattern.
    #[clap(long)]
    filter_skip: Option<Regex>,
    /// Do not create per-directory collections.
    #[clap(long)]
    flat_structure: bool,
    /// Maximum recursion depth (0 ingests only the root's entries).
    #[clap(long)]
    depth: Option<usize>,
    /// Create resources for empty directories.
    #[clap(long)]
    include_empty_dirs: bool,
    /// Files of at least this many bytes stay metadata-only (-1: no limit).
    #[clap(long, default_value_t = -1)]
    upload_size_limit: i64,
    /// Skip policy, comma separated.
    #[clap(long, value_enum, value_delimiter = ',')]
    skip: Vec<SkipFlag>,
    /// Versioning policy on re-ingest.
    #[clap(long, value_enum, default_value_t)]
    versioning: VersioningMode,
    /// Move pids onto new versions.
    #[clap(long)]
    pid_pass: bool,
    /// Parent resource of the top-level records.
    #[clap(long)]
    parent: Option<String>,
    /// Override the collection class.
    #[clap(long)]
    collection_class: Option<String>,
    /// Override the binary class.
    #[clap(long)]
    binary_class: Option<String>,
    /// Directories scanned for metadata sidecar files.
    #[clap(long)]
    meta_location: Vec<PathBuf>,
    /// Suffix of sidecar files, e.g. `.meta.nt`.
    #[clap(long, default_value = ".meta.nt")]
    meta_extension: String,
    /// N-Triples file with per-file metadata, matched by id.
    #[clap(long, conflicts_with = "meta_location")]
    meta_graph: Option<PathBuf>,
    /// Fail on files without external metadata.
    #[clap(long)]
    meta_require: bool,
}

#[derive(Debug, Args)]
struct GraphOpts {
    /// The graph file to ingest (N-Triples).
    file: PathBuf,
    #[clap(flatten)]
    common: CommonOpts,
    /// Id namespace of the resources this ingest owns.
    #[clap(long, default_value = "")]
    namespace: String,
    /// Policy for property-less nodes outside the namespace.
    #[clap(long, value_enum, default_value_t)]
    out_of_namespace: OutOfNamespace,
    /// Parent resource asserted on every imported node.
    #[clap(long)]
    parent: Option<String>,
}

#[derive(Debug, Args)]
struct VocabularyOpts {
    /// Vocabulary file path or URL.
    source: String,
    #[clap(flatten)]
    common: CommonOpts,
    /// Serialization of the vocabulary file.
    #[clap(long)]
    format: Option<RdfFormat>,
    /// Also ingest skos:Collection entities.
    #[clap(long)]
    import_collections: bool,
    /// skos:exactMatch handling inside the vocabulary.
    #[clap(long, value_enum, default_value_t = ExactMatchMode::Merge)]
    exact_match: ExactMatchMode,
    /// skos:exactMatch handling for external targets.
    #[clap(long, value_enum, default_value_t = ExactMatchMode::Literal)]
    exact_match_external: ExactMatchMode,
    /// Semantic-relation handling inside the vocabulary.
    #[clap(long, value_enum, default_value_t = RelationMode::Keep)]
    relations: RelationMode,
    /// Semantic-relation handling for external targets.
    #[clap(long, value_enum, default_value_t = RelationMode::Drop)]
    relations_external: RelationMode,
    /// Keep only properties from these namespaces.
    #[clap(long)]
    allowed_namespace: Vec<String>,
    /// Do not assert `parent = scheme` on vocabulary entities.
    #[clap(long)]
    no_parents: bool,
    /// Re-ingest even when the stored hash is current.
    #[clap(long)]
    force_update: bool,
}

/// Parse arguments and run the selected command.
pub async fn run_from_iter<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);
    let repo = connect(&cli.connection).await?;
    match cli.command {
        Command::Dir(opts) => ingest_dir(&repo, opts).await,
        Command::Graph(opts) => ingest_graph(&repo, opts).await,
        Command::Vocabulary(opts) => ingest_vocabulary(&repo, opts).await,
        Command::Schema => {
            let rendered = serde_json::to_string_pretty(repo.schema())
                .context("Serializing schema")?;
            println!("{rendered}");
            Ok(())
        }
    }
}

#[context("Connecting to the repository")]
async fn connect(opts: &ConnectionOpts) -> Result<HttpRepository> {
    let config: ConfigFile = match &opts.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Reading config file {}", path.display()))?;
            toml::from_str(&raw)
                .with_context(|| format!("Parsing config file {}", path.display()))?
        }
        None => ConfigFile::default(),
    };
    let url = opts
        .repo_url
        .clone()
        .or(config.repo_url)
        .context("No repository URL given (use --repo-url or a config file)")?;
    let user = opts.user.clone().or(config.user);
    let password = opts.password.clone().or(config.password);
    let auth = match (user, password) {
        (Some(user), Some(password)) => Some((user, password)),
        (Some(user), None) => Some((user, String::new())),
        (None, _) => None,
    };
    HttpRepository::connect(url, auth).await
}

/// Run `f` inside a repository transaction, rolling back on failure.
async fn transactional<F, Fut>(repo: &dyn Repository, f: F) -> Result<Vec<IngestOutcome>>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<Vec<IngestOutcome>, crate::ingest::IngestError>>,
{
    repo.begin().await.context("Opening transaction")?;
    match f().await {
        Ok(outcomes) => {
            repo.commit().await.context("Committing transaction")?;
            Ok(outcomes)
        }
        Err(e) => {
            let committed = e.committed().len();
            if let Err(rollback) = repo.rollback().await {
                tracing::warn!(error = %rollback, "rollback failed");
            }
            if committed > 0 {
                tracing::warn!(committed, "some resources were already committed");
            }
            Err(e.into())
        }
    }
}

fn report(outcomes: &[IngestOutcome]) {
    let count = |action: &str| {
        outcomes
            .iter()
            .filter(|o| o.action() == action)
            .count()
    };
    println!(
        "created {}, updated {}, new versions {}, skipped {}, deleted {}, failed {}",
        count("create"),
        count("update"),
        count("new version"),
        count("skip"),
        count("delete"),
        count("error"),
    );
}

async fn ingest_dir(repo: &HttpRepository, opts: DirOpts) -> Result<()> {
    let meta_lookup: Option<Arc<dyn MetaLookup>> = if let Some(graph_path) = &opts.meta_graph {
        let raw = std::fs::read_to_string(graph_path)
            .with_context(|| format!("Reading metadata graph {}", graph_path.display()))?;
        let graph = crate::rdf::ntriples::parse_str(&raw)
            .with_context(|| format!("Parsing metadata graph {}", graph_path.display()))?;
        Some(Arc::new(GraphMetaLookup::new(
            graph,
            repo.schema().id.clone(),
        )))
    } else if !opts.meta_location.is_empty() {
        Some(Arc::new(FileSidecarMetaLookup::new(
            opts.meta_location.clone(),
            opts.meta_extension.clone(),
            RdfFormat::NTriples,
        )))
    } else {
        None
    };
    let skip_mode = opts
        .skip
        .iter()
        .fold(SkipMode::empty(), |acc, flag| match flag {
            SkipFlag::NotExist => acc | SkipMode::NOT_EXIST,
            SkipFlag::Exist => acc | SkipMode::EXIST,
            SkipFlag::BinaryExist => acc | SkipMode::BINARY_EXIST,
        });
    let ingester = FileIngester::new(
        &opts.directory,
        opts.id_prefix.as_str(),
        FileIngestOpts {
            filter_match: opts.filter_match.clone(),
            filter_skip: opts.filter_skip.clone(),
            flat_structure: opts.flat_structure,
            depth: opts.depth.unwrap_or(usize::MAX),
            include_empty_dirs: opts.include_empty_dirs,
            upload_size_limit: opts.upload_size_limit,
            skip_mode,
            versioning: opts.versioning,
            pid_pass: opts.pid_pass,
            auto_commit: opts.common.auto_commit,
            meta_lookup,
            meta_lookup_require: opts.meta_require,
            collection_class: opts.collection_class.as_deref().map(NamedNode::new),
            binary_class: opts.binary_class.as_deref().map(NamedNode::new),
            parent: opts.parent.as_deref().map(NamedNode::new),
            error_mode: opts.common.error_mode,
            concurrency: opts.common.concurrency,
            retries: opts.common.retries,
        },
    );
    let outcomes = transactional(repo, || ingester.import(repo)).await?;
    report(&outcomes);
    Ok(())
}

async fn ingest_graph(repo: &HttpRepository, opts: GraphOpts) -> Result<()> {
    let raw = std::fs::read_to_string(&opts.file)
        .with_context(|| format!("Reading graph {}", opts.file.display()))?;
    let graph = crate::rdf::ntriples::parse_str(&raw)
        .with_context(|| format!("Parsing graph {}", opts.file.display()))?;
    let ingester = GraphIngester::new(GraphIngestOpts {
        namespace: opts.namespace.clone(),
        single_out_namespace: opts.out_of_namespace,
        parent: opts.parent.as_deref().map(NamedNode::new),
        auto_commit: opts.common.auto_commit,
        error_mode: opts.common.error_mode,
        concurrency: opts.common.concurrency,
        retries: opts.common.retries,
    });
    let outcomes = transactional(repo, || ingester.import(repo, graph)).await?;
    report(&outcomes);
    Ok(())
}

async fn ingest_vocabulary(repo: &HttpRepository, opts: VocabularyOpts) -> Result<()> {
    let skos_opts = SkosIngestOpts {
        import_collections: opts.import_collections,
        exact_match_in_vocabulary: opts.exact_match,
        exact_match_not_in_vocabulary: opts.exact_match_external,
        relations_in_vocabulary: opts.relations,
        relations_not_in_vocabulary: opts.relations_external,
        allowed_namespaces: (!opts.allowed_namespace.is_empty())
            .then(|| opts.allowed_namespace.clone()),
        add_parents: !opts.no_parents,
        force_update: opts.force_update,
        auto_commit: opts.common.auto_commit,
        error_mode: opts.common.error_mode,
        concurrency: opts.common.concurrency,
        retries: opts.common.retries,
        ..SkosIngestOpts::default()
    };
    let ingester = if opts.source.starts_with("http://") || opts.source.starts_with("https://") {
        SkosIngester::from_url(
            &opts.source,
            opts.format.unwrap_or(RdfFormat::NTriples),
            skos_opts,
        )
        .await?
    } else {
        SkosIngester::from_file(PathBuf::from(&opts.source), opts.format, skos_opts)?
    };
    let outcomes = transactional(repo, || ingester.import(repo)).await?;
    report(&outcomes);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_dir_command() {
        let cli = Cli::parse_from([
            "arche-ingest",
            "--repo-url",
            "https://repo.example.org/api",
            "dir",
            "/data",
            "https://id.example.org/corpus",
            "--filter-match",
            "txt|xml",
            "--skip",
            "exist,binary-exist",
            "--versioning",
            "digest",
            "--pid-pass",
            "--auto-commit",
            "50",
        ]);
        let Command::Dir(opts) = cli.command else {
            panic!("expected dir command");
        };
        assert_eq!(opts.directory, PathBuf::from("/data"));
        assert_eq!(opts.versioning, VersioningMode::Digest);
        assert!(opts.pid_pass);
        assert_eq!(opts.common.auto_commit, 50);
        assert_eq!(opts.skip.len(), 2);
    }

    #[test]
    fn cli_parses_vocabulary_command() {
        let cli = Cli::parse_from([
            "arche-ingest",
            "--repo-url",
            "https://repo.example.org/api",
            "vocabulary",
            "https://vocabs.example.org/voc.nt",
            "--exact-match-external",
            "drop",
            "--force-update",
        ]);
        let Command::Vocabulary(opts) = cli.command else {
            panic!("expected vocabulary command");
        };
        assert_eq!(opts.exact_match_external, ExactMatchMode::Drop);
        assert!(opts.force_update);
    }

    #[test]
    fn config_file_parses() {
        let cfg: ConfigFile = toml::from_str(
            "repo-url = \"https://repo.example.org/api\"\nuser = \"ingest\"\npassword = \"s3cret\"\n",
        )
        .unwrap();
        assert_eq!(
            cfg.repo_url.unwrap().as_str(),
            "https://repo.example.org/api"
        );
        assert_eq!(cfg.user.as_deref(), Some("ingest"));
    }
}

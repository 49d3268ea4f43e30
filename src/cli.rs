use std::path::PathBuf;

#[derive(clap::Parser)]
#[command(
    name = "regraft",
    version,
    about = "Convert Subversion dump streams into a Git repository"
)]
pub(crate) struct Cli {
    #[arg(
        value_name = "INPUT",
        required = true,
        help = "Dump file(s) in revision order, or an svnadmin repository directory; \
                compressed files (gzip, bzip2, xz, zstd, lz4) are detected"
    )]
    pub(crate) inputs: Vec<PathBuf>,

    #[arg(
        long = "target-repository",
        short = 'd',
        value_name = "PATH",
        help = "Bare Git repository to create (or update with --append-to-refs/--prune-refs)"
    )]
    pub(crate) target_repository: Option<PathBuf>,

    #[arg(
        long = "config",
        short = 'c',
        value_name = "FILE",
        help = "XML file with conversion rules"
    )]
    pub(crate) config: Option<PathBuf>,

    #[arg(
        long = "end-revision",
        short = 'e',
        value_name = "REV",
        help = "Stop after loading this revision"
    )]
    pub(crate) end_revision: Option<u64>,

    #[arg(
        long = "path-filter",
        value_name = "GLOB",
        help = "Process only matching paths ('!' negates; repeatable)"
    )]
    pub(crate) path_filter: Vec<String>,

    #[arg(
        long = "project",
        value_name = "NAME",
        help = "Convert only the named project(s) from the config (repeatable)"
    )]
    pub(crate) project: Vec<String>,

    #[arg(
        long = "decorate-commit-message",
        value_name = "TAGLINE",
        value_enum,
        help = "Append taglines to every commit message (repeatable)"
    )]
    pub(crate) decorate_commit_message: Vec<Decorate>,

    #[arg(
        long = "create-revision-refs",
        help = "Create refs/revisions/<branch>/r<N> for every converted revision"
    )]
    pub(crate) create_revision_refs: bool,

    #[arg(
        long = "link-orphan-revs",
        help = "Link parentless root commits with overlapping trees"
    )]
    pub(crate) link_orphan_revs: bool,

    #[arg(
        long = "add-branch-tree-prefix",
        help = "Give branches created from a subdirectory copy a matching tree prefix"
    )]
    pub(crate) add_branch_tree_prefix: bool,

    #[arg(
        long = "replace-svn-keywords",
        help = "Expand SVN keywords ($Id$, $Revision$, ...) in file content"
    )]
    pub(crate) replace_svn_keywords: bool,

    #[arg(
        long = "retab-only",
        help = "Restrict the source reformatter to tab adjustment"
    )]
    pub(crate) retab_only: bool,

    #[arg(long = "no-indent-reformat", help = "Disable the source reformatter")]
    pub(crate) no_indent_reformat: bool,

    #[arg(
        long = "append-to-refs",
        help = "Keep refs already present in the target repository"
    )]
    pub(crate) append_to_refs: bool,

    #[arg(
        long = "prune-refs",
        help = "Delete refs in the target repository this run did not produce"
    )]
    pub(crate) prune_refs: bool,

    #[arg(
        long = "authors-map",
        value_name = "FILE",
        help = "JSON map of SVN usernames to Git identities"
    )]
    pub(crate) authors_map: Option<PathBuf>,

    #[arg(
        long = "sha1-map",
        value_name = "FILE",
        help = "Blob SHA1 reuse cache, read before and written after the run"
    )]
    pub(crate) sha1_map: Option<PathBuf>,

    #[arg(
        long = "extract-file",
        value_name = "PATH[@REV]",
        help = "Write one file from the loaded tree to stdout instead of converting"
    )]
    pub(crate) extract_file: Option<String>,

    #[arg(
        long = "compare-to",
        short = 'C',
        value_name = "DUMP",
        help = "Compare the converted head tree against another dump's head tree"
    )]
    pub(crate) compare_to: Option<PathBuf>,

    #[arg(
        long = "verify-data-hash",
        short = 'V',
        help = "Verify declared MD5/SHA1 checksums of file content"
    )]
    pub(crate) verify_data_hash: bool,

    #[arg(long = "no-gitignore", help = "Do not convert svn:ignore to .gitignore")]
    pub(crate) no_gitignore: bool,

    #[arg(
        long = "trunk",
        value_name = "DIR",
        default_value = "trunk",
        help = "Trunk directory name for the built-in mappings"
    )]
    pub(crate) trunk: String,

    #[arg(
        long = "branches",
        value_name = "DIR",
        default_value = "branches",
        help = "Branches directory name for the built-in mappings"
    )]
    pub(crate) branches: String,

    #[arg(
        long = "user-branches",
        value_name = "DIR",
        help = "User branch container(s), default users/branches and branches/users"
    )]
    pub(crate) user_branches: Vec<String>,

    #[arg(
        long = "tags",
        value_name = "DIR",
        default_value = "tags",
        help = "Tags directory name for the built-in mappings"
    )]
    pub(crate) tags: String,

    #[arg(
        long = "map-trunk-to",
        value_name = "NAME",
        default_value = "main",
        help = "Git branch name the trunk maps to"
    )]
    pub(crate) map_trunk_to: String,

    #[arg(
        long = "no-default-config",
        help = "Do not install the built-in trunk/branches/tags mappings"
    )]
    pub(crate) no_default_config: bool,

    #[arg(
        long = "blob-workers",
        value_name = "N",
        default_value_t = 8,
        help = "Blob writer threads; also sizes the commit worker pool"
    )]
    pub(crate) blob_workers: usize,

    #[arg(
        long = "stderr-log-level",
        value_name = "LEVEL",
        value_enum,
        help = "Maximum stderr log level (warn by default)"
    )]
    pub(crate) stderr_log_level: Option<LogLevel>,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        help = "File to write logs (besides stderr)"
    )]
    pub(crate) log_file: Option<PathBuf>,

    #[arg(
        long = "file-log-level",
        value_name = "LEVEL",
        value_enum,
        help = "Maximum file log level (debug by default)"
    )]
    pub(crate) file_log_level: Option<LogLevel>,

    #[arg(
        long = "verbose",
        short = 'v',
        value_name = "CHANNEL",
        value_enum,
        help = "Enable a debug output channel (repeatable)"
    )]
    pub(crate) verbose: Vec<Verbose>,

    #[arg(long = "no-progress", help = "Do not print the progress line")]
    pub(crate) no_progress: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, clap::ValueEnum)]
pub(crate) enum Decorate {
    #[value(name = "revision-id")]
    RevisionId,
    #[value(name = "change-id")]
    ChangeId,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, clap::ValueEnum)]
pub(crate) enum Verbose {
    #[value(name = "dump")]
    Dump,
    #[value(name = "dump_all")]
    DumpAll,
    #[value(name = "revs")]
    Revs,
    #[value(name = "commits")]
    Commits,
    #[value(name = "merges")]
    Merges,
    #[value(name = "all")]
    All,
}

#[derive(Copy, Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogLevel {
    #[value(name = "error")]
    Error,
    #[value(name = "warn")]
    Warn,
    #[value(name = "info")]
    Info,
    #[value(name = "debug")]
    Debug,
    #[value(name = "trace")]
    Trace,
}

impl LogLevel {
    pub(crate) fn to_level(self) -> tracing::Level {
        match self {
            Self::Error => tracing::Level::ERROR,
            Self::Warn => tracing::Level::WARN,
            Self::Info => tracing::Level::INFO,
            Self::Debug => tracing::Level::DEBUG,
            Self::Trace => tracing::Level::TRACE,
        }
    }
}

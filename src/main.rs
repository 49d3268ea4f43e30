#![warn(
    rust_2018_idioms,
    trivial_casts,
    trivial_numeric_casts,
    unreachable_pub,
    unused_qualifications
)]
#![allow(clippy::type_complexity)]

use std::collections::BTreeMap;
use std::io::Write as _;
use std::process::ExitCode;

mod authors;
mod cli;
mod config;
mod git;
mod history;
mod output;
mod refmap;
mod sha1_cache;
mod svn;
mod transform;
mod tree;

use git::ObjectStore;
use output::OutputSink;

enum RunError {
    Generic,
    Usage,
}

impl From<history::ConvertError> for RunError {
    fn from(_: history::ConvertError) -> Self {
        Self::Generic
    }
}

fn main() -> ExitCode {
    match main_inner() {
        Ok(()) => ExitCode::SUCCESS,
        Err(RunError::Generic) => ExitCode::from(1),
        Err(RunError::Usage) => ExitCode::from(2),
    }
}

fn main_inner() -> Result<(), RunError> {
    let start = std::time::Instant::now();

    let args = match <cli::Cli as clap::Parser>::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                clap::error::ErrorKind::DisplayHelp
                | clap::error::ErrorKind::DisplayVersion => Ok(()),
                _ => Err(RunError::Usage),
            };
        }
    };

    let term = output::init(start, !args.no_progress);
    let sink = term.sink();

    let stderr_log_level = match args.stderr_log_level {
        Some(level) => level.to_level(),
        None if args.verbose.contains(&cli::Verbose::DumpAll) => tracing::Level::TRACE,
        None if !args.verbose.is_empty() => tracing::Level::DEBUG,
        None => tracing::Level::WARN,
    };
    let file_log_level = args.file_log_level.map(cli::LogLevel::to_level);

    if let Err(e) = init_logger(
        stderr_log_level,
        args.log_file.as_deref(),
        file_log_level,
        sink.clone(),
    ) {
        eprintln!("failed to initialize logging: {e}");
        return Err(RunError::Generic);
    }

    let result = run(&args, &sink);
    term.finish();
    result
}

fn run(args: &cli::Cli, sink: &OutputSink) -> Result<(), RunError> {
    // ---- configuration
    let config_text = args
        .config
        .as_deref()
        .map(|path| {
            std::fs::read_to_string(path).map_err(|e| {
                tracing::error!("failed to read {path:?}: {e}");
                RunError::Generic
            })
        })
        .transpose()?;

    let load_opts = config::LoadOptions {
        trunk: args.trunk.clone(),
        branches: args.branches.clone(),
        user_branches: if args.user_branches.is_empty() {
            config::LoadOptions::default().user_branches
        } else {
            args.user_branches.clone()
        },
        tags: args.tags.clone(),
        map_trunk_to: args.map_trunk_to.clone(),
        use_default_config: !args.no_default_config,
        project_filter: args.project.clone(),
    };
    let config = config::Config::load(config_text.as_deref(), &load_opts).map_err(|e| {
        tracing::error!("bad configuration: {e}");
        RunError::Generic
    })?;
    let mapper = refmap::RefMapper::new(config);

    // ---- collaborator inputs
    let authors = match args.authors_map.as_deref() {
        None => authors::AuthorsMap::new(),
        Some(path) => {
            let mut file = std::fs::OpenOptions::new()
                .read(true)
                .open(path)
                .map_err(|e| {
                    tracing::error!("failed to open authors map {path:?}: {e}");
                    RunError::Generic
                })?;
            authors::AuthorsMap::parse(&mut file).map_err(|e| {
                tracing::error!("failed to read authors map {path:?}: {e}");
                RunError::Generic
            })?
        }
    };

    let sha1_cache = args
        .sha1_map
        .as_deref()
        .map(|path| match std::fs::OpenOptions::new().read(true).open(path) {
            Ok(file) => {
                sha1_cache::Sha1Cache::load(&mut std::io::BufReader::new(file)).map_err(|e| {
                    tracing::error!("failed to read sha1 map {path:?}: {e}");
                    RunError::Generic
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(sha1_cache::Sha1Cache::new()),
            Err(e) => {
                tracing::error!("failed to open sha1 map {path:?}: {e}");
                Err(RunError::Generic)
            }
        })
        .transpose()?;

    let mut spec_tags = Vec::new();
    if args.retab_only {
        spec_tags.push("retab-only");
    }
    if args.no_indent_reformat {
        spec_tags.push("no-indent-reformat");
    }
    let inner: Box<dyn transform::ContentTransformer> = if args.replace_svn_keywords {
        Box::new(transform::KeywordExpander)
    } else {
        Box::new(transform::IdentityTransformer)
    };
    let transformer: Box<dyn transform::ContentTransformer> = if spec_tags.is_empty() {
        inner
    } else {
        Box::new(transform::SpecTagged::new(inner, &spec_tags))
    };

    let mut path_filter = config::GlobList::empty();
    for raw in args.path_filter.iter() {
        path_filter
            .extend(raw, config::MatchMode::FilePath)
            .map_err(|(pattern, e)| {
                tracing::error!("invalid --path-filter \"{pattern}\": {e}");
                RunError::Usage
            })?;
    }

    let options = history::Options {
        end_revision: args.end_revision,
        path_filter,
        create_revision_refs: args.create_revision_refs,
        link_orphan_revs: args.link_orphan_revs,
        add_branch_tree_prefix: args.add_branch_tree_prefix,
        generate_gitignore: !args.no_gitignore,
        decorate_revision_id: args
            .decorate_commit_message
            .contains(&cli::Decorate::RevisionId),
        decorate_change_id: args
            .decorate_commit_message
            .contains(&cli::Decorate::ChangeId),
        preferred_head: format!("refs/heads/{}", args.map_trunk_to),
    };

    let sequencer = output::LogSequencer::new(sink.clone());
    let extract = args.extract_file.as_deref().map(parse_extract_spec);

    // ---- conversion
    let outcome = if let Some(target) = args
        .target_repository
        .as_deref()
        .filter(|_| extract.is_none())
    {
        let allow_existing = args.append_to_refs || args.prune_refs;
        let store = git::LooseStore::init(target, args.blob_workers.max(1), allow_existing)
            .map_err(|e| {
                tracing::error!("failed to initialize target repository: {e}");
                RunError::Generic
            })?;

        let outcome = match convert(
            &store,
            &mapper,
            &authors,
            sha1_cache.as_ref(),
            transformer,
            options,
            &sequencer,
            sink,
            args,
            extract.as_ref(),
        ) {
            Ok(outcome) => outcome,
            Err(e) => {
                store.abort();
                return Err(e);
            }
        };

        let mut refs = outcome.finalized.refs.clone();
        for (name, id) in store.existing_refs().iter() {
            if refs.contains_key(name) {
                continue;
            }
            if args.prune_refs {
                tracing::info!("pruning ref {name}");
            } else {
                if !args.append_to_refs {
                    tracing::warn!("keeping pre-existing ref {name} (use --prune-refs to drop)");
                }
                refs.insert(name.clone(), *id);
            }
        }

        sink.set_status("finalizing git repository".into());
        store
            .finish(&outcome.finalized.head_ref, &refs)
            .map_err(|e| {
                tracing::error!("failed to finalize target repository: {e}");
                RunError::Generic
            })?;
        outcome
    } else {
        let store = git::MemoryStore::new();
        convert(
            &store,
            &mapper,
            &authors,
            sha1_cache.as_ref(),
            transformer,
            options,
            &sequencer,
            sink,
            args,
            extract.as_ref(),
        )?
    };

    sink.freeze_status();
    tracing::debug!("bound {} commit objects", outcome.finalized.commit_ids.len());

    if let Some(data) = outcome.extracted {
        let mut stdout = std::io::stdout();
        stdout.write_all(&data).and_then(|()| stdout.flush()).map_err(|e| {
            tracing::error!("failed to write extracted file: {e}");
            RunError::Generic
        })?;
    }

    if let Some(compare_path) = args.compare_to.as_deref() {
        compare_against(compare_path, &outcome.head_files, args)?;
    }

    if let (Some(cache), Some(path)) = (sha1_cache.as_ref(), args.sha1_map.as_deref()) {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .map_err(|e| {
                tracing::error!("failed to write sha1 map {path:?}: {e}");
                RunError::Generic
            })?;
        let mut writer = std::io::BufWriter::new(file);
        cache.save(&mut writer).map_err(|e| {
            tracing::error!("failed to write sha1 map {path:?}: {e}");
            RunError::Generic
        })?;
    }

    Ok(())
}

struct Outcome {
    finalized: history::Finalized,
    head_files: BTreeMap<Vec<u8>, gix_hash::ObjectId>,
    extracted: Option<Vec<u8>>,
}

fn convert<S: ObjectStore>(
    store: &S,
    mapper: &refmap::RefMapper,
    authors: &authors::AuthorsMap,
    sha1_cache: Option<&sha1_cache::Sha1Cache>,
    transformer: Box<dyn transform::ContentTransformer>,
    options: history::Options,
    sequencer: &output::LogSequencer,
    sink: &OutputSink,
    args: &cli::Cli,
    extract: Option<&(Vec<u8>, Option<u64>)>,
) -> Result<Outcome, RunError> {
    // the commit workers borrow the store and sequencer, so the whole
    // conversion runs inside their scope
    std::thread::scope(|scope| {
        let pipeline = history::CommitPipeline::start(
            scope,
            store,
            sequencer,
            args.blob_workers.max(1),
        );
        let mut builder = history::HistoryBuilder::new(
            store,
            mapper,
            authors,
            sha1_cache,
            transformer,
            options,
            sequencer,
            sink.clone(),
            pipeline,
        );

        let mut last_rev = None;
        for input_path in args.inputs.iter() {
            tracing::info!("loading {input_path:?}");
            let mut input = svn::source::DumpInput::open(input_path).map_err(|e| {
                tracing::error!("failed to open dump input: {e}");
                RunError::Generic
            })?;

            let mut reader =
                svn::dump::DumpReader::new(input.stream(), args.verify_data_hash, last_rev)
                    .map_err(|e| {
                        tracing::error!("failed to read {input_path:?}: {e}");
                        RunError::Generic
                    })?;

            let keep_going = builder.load(&mut reader)?;
            last_rev = reader.last_rev();

            if keep_going {
                if let Err(e) = input.close() {
                    tracing::error!("dump input error: {e}");
                    return Err(RunError::Generic);
                }
            } else {
                // --end-revision: drop the input mid-stream
                drop(input);
                break;
            }
        }

        let extracted = extract
            .map(|(path, rev)| builder.extract_file(path, *rev))
            .transpose()?;

        let head_files = if args.compare_to.is_some() {
            builder.head_files()
        } else {
            BTreeMap::new()
        };

        let finalized = builder.finalize()?;

        Ok(Outcome {
            finalized,
            head_files,
            extracted,
        })
    })
}

/// Loads the `--compare-to` dump on its own and diffs head trees.
fn compare_against(
    compare_path: &std::path::Path,
    converted: &BTreeMap<Vec<u8>, gix_hash::ObjectId>,
    args: &cli::Cli,
) -> Result<(), RunError> {
    tracing::info!("comparing against {compare_path:?}");

    let config = config::Config::load(None, &config::LoadOptions::default()).map_err(|e| {
        tracing::error!("{e}");
        RunError::Generic
    })?;
    let mapper = refmap::RefMapper::new(config);
    let authors = authors::AuthorsMap::new();
    let store = git::MemoryStore::new();
    let sequencer = output::LogSequencer::new(OutputSink::null());

    let reference = std::thread::scope(|scope| {
        let pipeline = history::CommitPipeline::start(scope, &store, &sequencer, 1);
        let mut builder = history::HistoryBuilder::new(
            &store,
            &mapper,
            &authors,
            None,
            Box::new(transform::IdentityTransformer),
            history::Options {
                end_revision: None,
                path_filter: config::GlobList::empty(),
                create_revision_refs: false,
                link_orphan_revs: false,
                add_branch_tree_prefix: false,
                generate_gitignore: false,
                decorate_revision_id: false,
                decorate_change_id: false,
                preferred_head: "refs/heads/main".into(),
            },
            &sequencer,
            OutputSink::null(),
            pipeline,
        );

        let mut input = svn::source::DumpInput::open(compare_path).map_err(|e| {
            tracing::error!("failed to open compare dump: {e}");
            RunError::Generic
        })?;
        let mut reader = svn::dump::DumpReader::new(input.stream(), args.verify_data_hash, None)
            .map_err(|e| {
                tracing::error!("failed to read compare dump: {e}");
                RunError::Generic
            })?;
        builder.load(&mut reader)?;
        if let Err(e) = input.close() {
            tracing::error!("compare dump input error: {e}");
            return Err(RunError::Generic);
        }

        Ok(builder.head_files())
    })?;

    let mut differences = 0usize;
    let mut stdout = std::io::stdout();
    for (path, blob) in reference.iter() {
        match converted.get(path) {
            None => {
                differences += 1;
                let _ = writeln!(stdout, "missing: {}", path.escape_ascii());
            }
            Some(converted_blob) if converted_blob != blob => {
                differences += 1;
                let _ = writeln!(stdout, "differs: {}", path.escape_ascii());
            }
            Some(_) => {}
        }
    }
    for path in converted.keys() {
        if !reference.contains_key(path) {
            differences += 1;
            let _ = writeln!(stdout, "extra: {}", path.escape_ascii());
        }
    }

    if differences != 0 {
        tracing::error!("{differences} path(s) differ from {compare_path:?}");
        return Err(RunError::Generic);
    }
    tracing::info!("trees match");
    Ok(())
}

fn parse_extract_spec(raw: &str) -> (Vec<u8>, Option<u64>) {
    if let Some((path, rev)) = raw.rsplit_once('@') {
        if let Ok(rev) = rev.parse::<u64>() {
            return (path.as_bytes().to_vec(), Some(rev));
        }
    }
    (raw.as_bytes().to_vec(), None)
}

fn init_logger(
    stderr_level: tracing::Level,
    file_path: Option<&std::path::Path>,
    file_level: Option<tracing::Level>,
    sink: OutputSink,
) -> Result<(), std::io::Error> {
    use tracing_subscriber::layer::{Layer as _, SubscriberExt as _};
    use tracing_subscriber::util::SubscriberInitExt as _;

    let stderr_filter = tracing_subscriber::filter::LevelFilter::from_level(stderr_level);
    let stderr_sub = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(MakeLogWriter { sink })
        .with_filter(stderr_filter);

    let file_sub = if let Some(file_path) = file_path {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(file_path)?;

        let filter = tracing_subscriber::filter::LevelFilter::from_level(
            file_level.unwrap_or(tracing::Level::DEBUG),
        );
        Some(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file)
                .with_filter(filter),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(stderr_sub)
        .with(file_sub)
        .init();

    Ok(())
}

struct MakeLogWriter {
    sink: OutputSink,
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for MakeLogWriter {
    type Writer = LogWriter<'a>;

    fn make_writer(&'a self) -> LogWriter<'a> {
        LogWriter {
            sink: &self.sink,
            buf: Vec::new(),
        }
    }
}

struct LogWriter<'a> {
    sink: &'a OutputSink,
    buf: Vec<u8>,
}

impl Drop for LogWriter<'_> {
    fn drop(&mut self) {
        self.sink.print_line(self.buf.clone());
    }
}

impl std::io::Write for LogWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buf.extend(buf);
        Ok(buf.len())
    }

    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.buf.extend(buf);
        Ok(())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

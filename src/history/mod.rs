use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use gix_hash::ObjectId;

pub(crate) mod merges;
pub(crate) mod message;
pub(crate) mod pipeline;

pub(crate) use pipeline::CommitPipeline;

use crate::authors::AuthorsMap;
use crate::config::{GlobList, Project, RecreateMerges, TreeEdit};
use crate::git::ObjectStore;
use crate::output::{LogSequencer, OutputSink};
use crate::refmap::{PathLookup, RefMapper, RefRegistry};
use crate::sha1_cache::{cache_key, Sha1Cache};
use crate::svn::dump;
use crate::svn::mergeinfo::Mergeinfo;
use crate::transform::{gitignore_content, ContentTransformer, RevisionInfo};
use crate::tree::{concat_path, parent_dir, Entry, FileEntry, PropSet, RevTree, EMPTY_PROPS};

/// The error has already been reported with context where it was
/// detected; this carries only the fact of failure upward.
pub(crate) struct ConvertError;

pub(crate) struct Options {
    pub(crate) end_revision: Option<u64>,
    pub(crate) path_filter: GlobList,
    pub(crate) create_revision_refs: bool,
    pub(crate) link_orphan_revs: bool,
    pub(crate) add_branch_tree_prefix: bool,
    pub(crate) generate_gitignore: bool,
    pub(crate) decorate_revision_id: bool,
    pub(crate) decorate_change_id: bool,
    pub(crate) preferred_head: String,
}

pub(crate) type BranchId = usize;
pub(crate) type CommitId = usize;

pub(crate) struct Branch {
    pub(crate) svn_path: Vec<u8>,
    pub(crate) refname: String,
    pub(crate) revision_ref: String,
    pub(crate) project: usize,
    pub(crate) is_tag: bool,
    pub(crate) created_rev: u64,
    pub(crate) deleted_rev: Option<u64>,
    pub(crate) tip: Option<CommitId>,
    pub(crate) tree_prefix: Vec<u8>,
    pub(crate) recreate_merges: RecreateMerges,
    pub(crate) inherit_mergeinfo: bool,
    pub(crate) mergeinfo: Mergeinfo,
    /// Messages of `<SkipCommit>`-folded revisions awaiting the next
    /// commit on this branch.
    pub(crate) pending_skips: Vec<Vec<u8>>,
    /// The tip has become an ancestor of another ref (merge, copy or
    /// fast-forward); such branches need no `_deleted` ref.
    pub(crate) merged_elsewhere: bool,
}

/// Graph node of a planned commit. The object id is not here: it binds
/// asynchronously on a commit worker and is only joined back in at
/// finalization ([`Finalized::commit_ids`], indexed by [`CommitId`]).
pub(crate) struct CommitNode {
    pub(crate) branch: BranchId,
    pub(crate) rev: u64,
    pub(crate) tree: ObjectId,
    pub(crate) parent: Option<CommitId>,
    /// Root of the first-parent chain; differing tails mean unrelated
    /// histories.
    pub(crate) tail: CommitId,
    pub(crate) required_in_mergeinfo: bool,
    pub(crate) added_svn_merges: BTreeSet<CommitId>,
    pub(crate) merges: BTreeSet<CommitId>,
    pub(crate) cherrypicks: BTreeSet<CommitId>,
}

pub(crate) struct Finalized {
    pub(crate) refs: BTreeMap<String, ObjectId>,
    pub(crate) head_ref: String,
    /// Bound object id of every planned commit, in planning order.
    pub(crate) commit_ids: Vec<ObjectId>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum ChangeKind {
    Add,
    Modify,
    Delete,
    PropChange,
    CopyDir { src_rev: u64, src_path: Vec<u8> },
    CopyFile { src_rev: u64, src_path: Vec<u8> },
}

/// One node record, already applied to the tree, waiting for branch
/// attribution.
enum NodeOp {
    AddFile { path: Vec<u8>, copy_from: Option<(u64, Vec<u8>)> },
    ModFile { path: Vec<u8> },
    DelFile { path: Vec<u8> },
    AddDir { path: Vec<u8> },
    CopyDir { path: Vec<u8>, src_rev: u64, src_path: Vec<u8> },
    DelDir { path: Vec<u8>, entry: Entry },
    ModDir { path: Vec<u8> },
}

/// Branch mapping data copied out of the rule tables.
#[derive(Clone)]
struct BranchSpec {
    project: usize,
    refname: String,
    revision_ref: String,
    add_tree_prefix: bool,
    recreate_merges: RecreateMerges,
    inherit_mergeinfo: bool,
}

enum Owner {
    Unmapped,
    Blocked,
    Mapped {
        spec: BranchSpec,
        branch_dir_len: usize,
    },
}

#[derive(Default)]
struct BranchOps {
    spec: Option<BranchSpec>,
    create: bool,
    create_from: Option<(u64, Vec<u8>)>,
    delete: bool,
    root_meta: bool,
    changed: Vec<(ChangeKind, Vec<u8>)>,
}

pub(crate) struct HistoryBuilder<'a, S: ObjectStore> {
    store: &'a S,
    mapper: &'a RefMapper,
    authors: &'a AuthorsMap,
    sha1_cache: Option<&'a Sha1Cache>,
    transformer: Box<dyn ContentTransformer>,
    options: Options,
    sequencer: &'a LogSequencer,
    status: OutputSink,
    /// Stage 3; planned commits are dispatched here and finished on the
    /// per-branch workers.
    pipeline: CommitPipeline,

    tree: RevTree,
    svn_uuid: Option<uuid::Uuid>,
    branches: Vec<Branch>,
    live: HashMap<Vec<u8>, BranchId>,
    commits: Vec<CommitNode>,
    registry: RefRegistry,
    /// Revision refs by commit index, resolved once ids are bound.
    rev_refs: Vec<(String, CommitId)>,
    /// Every commit made at an svn branch path over time, ascending by
    /// revision; copyfrom and mergeinfo resolve through this.
    path_commits: HashMap<Vec<u8>, Vec<(u64, CommitId)>>,
    /// Root commits for `--link-orphan-revs`.
    orphan_roots: Vec<CommitId>,
    /// Sealed directory node -> written git tree, keyed with the
    /// branch-relative prefix and project the filters ran under.
    tree_oid_cache: HashMap<(u32, Vec<u8>, usize), ObjectId>,
    /// Parsed copies of written trees, kept only when `<InjectFile>`
    /// edits exist (the overlay re-reads trees it just built).
    overlay_trees: HashMap<ObjectId, gix_object::Tree>,
    keep_parsed_trees: bool,
    warned_unmapped: HashSet<Vec<u8>>,
    warned_ignored: HashSet<Vec<u8>>,
}

impl<'a, S: ObjectStore> HistoryBuilder<'a, S> {
    pub(crate) fn new(
        store: &'a S,
        mapper: &'a RefMapper,
        authors: &'a AuthorsMap,
        sha1_cache: Option<&'a Sha1Cache>,
        transformer: Box<dyn ContentTransformer>,
        options: Options,
        sequencer: &'a LogSequencer,
        status: OutputSink,
        pipeline: CommitPipeline,
    ) -> Self {
        let keep_parsed_trees = mapper.config().projects.iter().any(|p| {
            p.tree_edits
                .iter()
                .any(|e| matches!(e, TreeEdit::Inject { .. }))
        });

        Self {
            store,
            mapper,
            authors,
            sha1_cache,
            transformer,
            options,
            sequencer,
            status,
            pipeline,
            tree: RevTree::new(),
            svn_uuid: None,
            branches: Vec::new(),
            live: HashMap::new(),
            commits: Vec::new(),
            registry: RefRegistry::new(),
            rev_refs: Vec::new(),
            path_commits: HashMap::new(),
            orphan_roots: Vec::new(),
            tree_oid_cache: HashMap::new(),
            overlay_trees: HashMap::new(),
            keep_parsed_trees,
            warned_unmapped: HashSet::new(),
            warned_ignored: HashSet::new(),
        }
    }

    /// Feeds one dump stream through the builder. Returns `false` when
    /// `--end-revision` stopped the run early.
    pub(crate) fn load(
        &mut self,
        reader: &mut dump::DumpReader<'_>,
    ) -> Result<bool, ConvertError> {
        let mut next_record = self.next_record(reader)?;
        while let Some(record) = next_record {
            match record {
                dump::Record::Uuid(uuid) => {
                    if self.svn_uuid.is_none() {
                        tracing::info!("SVN repository UUID: {uuid}");
                        self.svn_uuid = Some(uuid);
                    }
                    next_record = self.next_record(reader)?;
                }
                dump::Record::Rev(rev_record) => {
                    if self
                        .options
                        .end_revision
                        .is_some_and(|end| rev_record.rev > end)
                    {
                        tracing::info!("stopping at --end-revision");
                        return Ok(false);
                    }

                    // a mirror carries the origin's UUID as a property
                    // of revision 0
                    if rev_record.rev == 0 {
                        if let Some(raw) =
                            rev_record.properties.get(b"svn:sync-from-uuid".as_slice())
                        {
                            if let Ok(uuid) = uuid::Uuid::try_parse_ascii(raw) {
                                tracing::info!("original SVN repository UUID: {uuid}");
                                self.svn_uuid = Some(uuid);
                            }
                        }
                    }

                    next_record = self.handle_rev(reader, rev_record)?;
                }
                dump::Record::Node(_) => {
                    tracing::error!("node record before the first revision record");
                    return Err(ConvertError);
                }
            }
        }
        Ok(true)
    }

    fn next_record(
        &self,
        reader: &mut dump::DumpReader<'_>,
    ) -> Result<Option<dump::Record>, ConvertError> {
        reader.next_record().map_err(|e| {
            tracing::error!("failed to read SVN dump record: {e}");
            ConvertError
        })
    }

    fn handle_rev(
        &mut self,
        reader: &mut dump::DumpReader<'_>,
        rev_record: dump::RevRecord,
    ) -> Result<Option<dump::Record>, ConvertError> {
        let rev = rev_record.rev;
        tracing::debug!("importing SVN revision {rev}");
        self.status.set_status(format!("importing SVN revision {rev}"));
        self.sequencer.open_rev(rev);

        let result = self.handle_rev_inner(reader, &rev_record);
        self.sequencer.close_rev(rev);
        if self.pipeline.failed() {
            tracing::error!("stopping: the commit stage failed");
            return Err(ConvertError);
        }
        result
    }

    fn handle_rev_inner(
        &mut self,
        reader: &mut dump::DumpReader<'_>,
        rev_record: &dump::RevRecord,
    ) -> Result<Option<dump::Record>, ConvertError> {
        let rev = rev_record.rev;
        let rev_info = revision_info(rev, &rev_record.properties);

        self.tree.begin_rev(rev);

        let mut ops = Vec::new();
        let mut next_record = None;
        while let Some(record) = self.next_record(reader)? {
            let dump::Record::Node(node) = record else {
                next_record = Some(record);
                break;
            };
            self.apply_node(reader, node, &rev_info, &mut ops)?;
        }

        self.tree.commit_rev();

        let branches_ops = self.split_by_branch(ops)?;
        for (branch_path, branch_ops) in branches_ops.into_iter() {
            self.process_branch_rev(rev, rev_record, &branch_path, branch_ops)?;
        }

        Ok(next_record)
    }

    // ----- node application ---------------------------------------------

    fn apply_node(
        &mut self,
        reader: &mut dump::DumpReader<'_>,
        mut node: dump::NodeRecord,
        rev_info: &RevisionInfo<'_>,
        ops: &mut Vec<NodeOp>,
    ) -> Result<(), ConvertError> {
        let path = parse_svn_path(&node.path)?;

        if !self.options.path_filter.is_empty() && !self.options.path_filter.accepts(&path) {
            // filtered out entirely; the text still has to leave the stream
            if node.text.is_some() {
                reader.take_text().map_err(|e| {
                    tracing::error!("failed to read SVN node text: {e}");
                    ConvertError
                })?;
            }
            return Ok(());
        }

        tracing::trace!(
            "node record: path=\"{}\", kind={:?}, action={:?}",
            path.escape_ascii(),
            node.kind,
            node.action,
        );

        if node.action == dump::NodeAction::Replace {
            let entry = self.tree_delete(&path)?;
            ops.push(match entry {
                Entry::Dir(_) => NodeOp::DelDir {
                    path: path.clone(),
                    entry,
                },
                Entry::File(_) => NodeOp::DelFile { path: path.clone() },
            });
        }

        match node.action {
            dump::NodeAction::Delete => {
                let entry = self.tree_delete(&path)?;
                ops.push(match entry {
                    Entry::Dir(_) => NodeOp::DelDir { path, entry },
                    Entry::File(_) => NodeOp::DelFile { path },
                });
            }
            dump::NodeAction::Change | dump::NodeAction::Add | dump::NodeAction::Replace => {
                match node.kind {
                    None => {
                        tracing::error!("missing Node-kind in SVN dump node record");
                        return Err(ConvertError);
                    }
                    Some(dump::NodeKind::File) => {
                        self.apply_file_node(reader, &mut node, &path, rev_info, ops)?;
                    }
                    Some(dump::NodeKind::Dir) => {
                        self.apply_dir_node(&mut node, &path, ops)?;
                    }
                }
            }
        }

        if node.text.is_some() && reader.remaining_text_len() != 0 {
            tracing::error!("SVN dump node record has unused text content");
            return Err(ConvertError);
        }

        Ok(())
    }

    fn tree_delete(&mut self, path: &[u8]) -> Result<Entry, ConvertError> {
        self.tree.delete(path).map_err(|e| {
            tracing::error!("cannot delete: {e}");
            ConvertError
        })
    }

    fn apply_file_node(
        &mut self,
        reader: &mut dump::DumpReader<'_>,
        node: &mut dump::NodeRecord,
        path: &[u8],
        rev_info: &RevisionInfo<'_>,
        ops: &mut Vec<NodeOp>,
    ) -> Result<(), ConvertError> {
        let is_change = node.action == dump::NodeAction::Change;

        let copy_from_rec = node.copy_from.take();
        let copy_from = copy_from_rec
            .as_ref()
            .map(|cf| {
                if is_change {
                    tracing::error!("unexpected copy-from in change node");
                    return Err(ConvertError);
                }
                Ok((cf.rev, parse_svn_path(&cf.path)?))
            })
            .transpose()?;

        // the entry this one derives from: the file itself for a change,
        // the copy source for a copied add
        let orig = if let Some((src_rev, ref src_path)) = copy_from {
            let entry = self
                .tree
                .get(src_rev, src_path)
                .ok()
                .flatten()
                .ok_or_else(|| {
                    tracing::error!(
                        "copy-from source \"{}\"@{src_rev} does not exist",
                        src_path.escape_ascii(),
                    );
                    ConvertError
                })?;
            match entry {
                Entry::File(file) => Some(file),
                Entry::Dir(_) => {
                    tracing::error!(
                        "copy-from source \"{}\"@{src_rev} is a directory",
                        src_path.escape_ascii(),
                    );
                    return Err(ConvertError);
                }
            }
        } else if is_change {
            match self.tree.get_work(path) {
                Some(Entry::File(file)) => Some(file),
                Some(Entry::Dir(_)) => {
                    tracing::error!(
                        "attempted to change directory \"{}\" as a file",
                        path.escape_ascii(),
                    );
                    return Err(ConvertError);
                }
                None => {
                    tracing::error!(
                        "attempted to change non-existent file \"{}\"",
                        path.escape_ascii(),
                    );
                    return Err(ConvertError);
                }
            }
        } else {
            None
        };

        if let (Some(cf), Some(orig_file)) = (&copy_from_rec, orig) {
            if cf.source_sha1.is_some() || cf.source_md5.is_some() {
                let mut data = self.get_blob(orig_file.blob)?;
                if orig_file.symlink {
                    data.splice(0..0, b"link ".iter().copied());
                }
                verify_declared_hash(path, &data, cf.source_sha1, cf.source_md5, "copy source")?;
            }
        }

        let props = self.merge_node_props(
            orig.map(|f| f.props),
            node.properties.take(),
        );
        let props_id = match props {
            Some(ref set) => self.tree.intern_props(set.clone()),
            None => orig.map_or(EMPTY_PROPS, |f| f.props),
        };
        let prop_set = self.tree.props(props_id);
        let symlink = prop_set.contains_key(b"svn:special".as_slice());
        let executable = prop_set.contains_key(b"svn:executable".as_slice());
        let keywords = prop_set.get(b"svn:keywords".as_slice()).cloned();

        let blob = if let Some(text) = node.text.take() {
            let raw = reader.take_text().map_err(|e| {
                tracing::error!("failed to read SVN node text: {e}");
                ConvertError
            })?;

            let mut content = if text.is_delta {
                let source = match orig {
                    Some(orig_file) => {
                        let mut source = self.get_blob(orig_file.blob)?;
                        if orig_file.symlink {
                            source.splice(0..0, b"link ".iter().copied());
                        }
                        source
                    }
                    None => Vec::new(),
                };
                if text.delta_base_sha1.is_some() || text.delta_base_md5.is_some() {
                    verify_declared_hash(
                        path,
                        &source,
                        text.delta_base_sha1,
                        text.delta_base_md5,
                        "delta base",
                    )?;
                }

                let mut target = Vec::new();
                if let Err(e) = crate::svn::delta::apply(&raw, &source, &mut target) {
                    tracing::error!(
                        "failed to apply delta to \"{}\": {e}",
                        path.escape_ascii(),
                    );
                    return Err(ConvertError);
                }
                target
            } else {
                raw
            };

            if symlink {
                if content.starts_with(b"link ") {
                    content.drain(..5);
                } else {
                    tracing::error!("invalid symlink content at \"{}\"", path.escape_ascii());
                    return Err(ConvertError);
                }
            }

            self.store_file_content(path, keywords.as_deref(), rev_info, content, symlink)?
        } else if let Some(orig_file) = orig {
            if orig_file.symlink != symlink {
                tracing::error!(
                    "symlink flag of \"{}\" changed without new content",
                    path.escape_ascii(),
                );
                return Err(ConvertError);
            }
            orig_file.blob
        } else {
            tracing::error!("missing file content for \"{}\"", path.escape_ascii());
            return Err(ConvertError);
        };

        let entry = FileEntry {
            blob,
            executable,
            symlink,
            props: props_id,
        };

        if is_change {
            self.tree.change_file(path, entry).map_err(|e| {
                tracing::error!("cannot change file: {e}");
                ConvertError
            })?;
            ops.push(NodeOp::ModFile {
                path: path.to_vec(),
            });
        } else {
            self.tree.add(path, Entry::File(entry)).map_err(|e| {
                tracing::error!("cannot add file: {e}");
                ConvertError
            })?;
            ops.push(NodeOp::AddFile {
                path: path.to_vec(),
                copy_from,
            });
        }

        Ok(())
    }

    /// Applies the transformer chain and writes the blob, consulting the
    /// reuse cache keyed over the untransformed content.
    fn store_file_content(
        &mut self,
        path: &[u8],
        keywords: Option<&[u8]>,
        rev_info: &RevisionInfo<'_>,
        content: Vec<u8>,
        symlink: bool,
    ) -> Result<ObjectId, ConvertError> {
        let spec = self.transformer.spec();
        if symlink || spec.is_empty() {
            return self.put_blob(content);
        }

        let cache_entry = self.sha1_cache.map(|cache| {
            use sha1::Digest as _;
            let source_sha1: [u8; 20] = sha1::Sha1::digest(&content).into();
            (cache, cache_key(path, &source_sha1, spec))
        });

        if let Some((cache, key)) = cache_entry {
            if let Some(blob) = cache.get(&key) {
                if self.store.get_blob(blob).is_ok() {
                    return Ok(blob);
                }
                // cache points at an object this target does not have;
                // fall through and rebuild it
            }
            let transformed = self
                .transformer
                .transform(path, keywords, rev_info, content);
            let blob = self.put_blob(transformed)?;
            cache.insert(key, blob);
            Ok(blob)
        } else {
            let transformed = self
                .transformer
                .transform(path, keywords, rev_info, content);
            self.put_blob(transformed)
        }
    }

    fn put_blob(&self, content: Vec<u8>) -> Result<ObjectId, ConvertError> {
        self.store.put_blob(content).map_err(|e| {
            tracing::error!("failed to store blob: {e}");
            ConvertError
        })
    }

    fn get_blob(&self, id: ObjectId) -> Result<Vec<u8>, ConvertError> {
        self.store.get_blob(id).map_err(|e| {
            tracing::error!("failed to read blob {id}: {e}");
            ConvertError
        })
    }

    fn apply_dir_node(
        &mut self,
        node: &mut dump::NodeRecord,
        path: &[u8],
        ops: &mut Vec<NodeOp>,
    ) -> Result<(), ConvertError> {
        match node.action {
            dump::NodeAction::Change => {
                let orig_props = match self.tree.get_work(path) {
                    Some(Entry::Dir(dir)) => self.tree.dir_props_id(dir),
                    Some(Entry::File(_)) => {
                        tracing::error!(
                            "attempted to change file \"{}\" as a directory",
                            path.escape_ascii(),
                        );
                        return Err(ConvertError);
                    }
                    None => {
                        tracing::error!(
                            "attempted to change non-existent directory \"{}\"",
                            path.escape_ascii(),
                        );
                        return Err(ConvertError);
                    }
                };

                if let Some(props) =
                    self.merge_node_props(Some(orig_props), node.properties.take())
                {
                    let props_id = self.tree.intern_props(props);
                    self.tree.change_dir_props(path, props_id).map_err(|e| {
                        tracing::error!("cannot change directory: {e}");
                        ConvertError
                    })?;
                    ops.push(NodeOp::ModDir {
                        path: path.to_vec(),
                    });
                }
            }
            dump::NodeAction::Add | dump::NodeAction::Replace => {
                if let Some(cf) = node.copy_from.take() {
                    let src_path = parse_svn_path(&cf.path)?;
                    let copied = self.tree.copy(cf.rev, &src_path, path).map_err(|e| {
                        tracing::error!("cannot copy directory: {e}");
                        ConvertError
                    })?;
                    if !copied.is_dir() {
                        tracing::error!(
                            "copy-from source \"{}\"@{} is not a directory",
                            src_path.escape_ascii(),
                            cf.rev,
                        );
                        return Err(ConvertError);
                    }

                    if let Some(Entry::Dir(dir)) = self.tree.get_work(path) {
                        let orig_props = self.tree.dir_props_id(dir);
                        if let Some(props) =
                            self.merge_node_props(Some(orig_props), node.properties.take())
                        {
                            let props_id = self.tree.intern_props(props);
                            self.tree.change_dir_props(path, props_id).map_err(|e| {
                                tracing::error!("cannot change directory: {e}");
                                ConvertError
                            })?;
                        }
                    }

                    ops.push(NodeOp::CopyDir {
                        path: path.to_vec(),
                        src_rev: cf.rev,
                        src_path,
                    });
                } else {
                    let props = self
                        .merge_node_props(None, node.properties.take())
                        .unwrap_or_default();
                    let props_id = self.tree.intern_props(props);
                    self.tree.add_dir(path, props_id).map_err(|e| {
                        tracing::error!("cannot add directory: {e}");
                        ConvertError
                    })?;
                    ops.push(NodeOp::AddDir {
                        path: path.to_vec(),
                    });
                }
            }
            dump::NodeAction::Delete => unreachable!("handled by the caller"),
        }

        Ok(())
    }

    /// Applies a property block over the previous set. `None` means the
    /// record carried no property block at all (keep what was there).
    fn merge_node_props(
        &self,
        orig: Option<crate::tree::PropsId>,
        node_props: Option<dump::NodeProperties>,
    ) -> Option<PropSet> {
        let node_props = node_props?;
        let mut merged = if node_props.is_delta {
            orig.map(|id| self.tree.props(id).clone()).unwrap_or_default()
        } else {
            PropSet::new()
        };

        for (key, value) in node_props.properties.into_iter() {
            match value {
                Some(value) => {
                    merged.insert(key, value);
                }
                None => {
                    merged.remove(&key);
                }
            }
        }
        Some(merged)
    }

    // ----- branch attribution -------------------------------------------

    fn resolve_owner(&self, path: &[u8]) -> Owner {
        match self.mapper.resolve(path) {
            PathLookup::Unmapped => Owner::Unmapped,
            PathLookup::Blocked => Owner::Blocked,
            PathLookup::Mapped(m) => Owner::Mapped {
                spec: BranchSpec {
                    project: m.project,
                    refname: m.refname,
                    revision_ref: m.revision_ref,
                    add_tree_prefix: m.add_tree_prefix,
                    recreate_merges: m.recreate_merges,
                    inherit_mergeinfo: m.rule.inherit_mergeinfo,
                },
                branch_dir_len: m.branch_dir_len,
            },
        }
    }

    fn warn_unmapped(&mut self, path: &[u8]) {
        let dir = parent_dir(path).to_vec();
        if self.warned_unmapped.insert(dir.clone()) {
            tracing::warn!(
                "directory \"{}\" is not mapped to any branch",
                dir.escape_ascii(),
            );
        }
    }

    fn split_by_branch(
        &mut self,
        ops: Vec<NodeOp>,
    ) -> Result<BTreeMap<Vec<u8>, BranchOps>, ConvertError> {
        let mut branches_ops = BTreeMap::<Vec<u8>, BranchOps>::new();
        let mut pending: std::collections::VecDeque<NodeOp> = ops.into();

        while let Some(op) = pending.pop_front() {
            let path = match &op {
                NodeOp::AddFile { path, .. }
                | NodeOp::ModFile { path }
                | NodeOp::DelFile { path }
                | NodeOp::AddDir { path }
                | NodeOp::CopyDir { path, .. }
                | NodeOp::DelDir { path, .. }
                | NodeOp::ModDir { path } => path.clone(),
            };

            match self.resolve_owner(&path) {
                Owner::Unmapped => {
                    if !matches!(op, NodeOp::AddDir { .. } | NodeOp::ModDir { .. }) {
                        self.warn_unmapped(&path);
                    }
                }
                Owner::Blocked => {
                    // container directories: operations on them fan out
                    // to the branches inside
                    match op {
                        NodeOp::DelDir { ref path, entry } => {
                            self.fan_out_delete(&mut pending, path, entry);
                        }
                        NodeOp::CopyDir {
                            ref path,
                            src_rev,
                            ref src_path,
                        } => {
                            self.fan_out_copy(&mut pending, path, src_rev, src_path)?;
                        }
                        NodeOp::AddDir { .. } | NodeOp::ModDir { .. } => {}
                        _ => {
                            tracing::debug!(
                                "ignoring change at blocked path \"{}\"",
                                path.escape_ascii(),
                            );
                        }
                    }
                }
                Owner::Mapped {
                    spec,
                    branch_dir_len,
                } => {
                    let branch_dir = path[..branch_dir_len].to_vec();
                    let subpath = if path.len() > branch_dir_len {
                        path[(branch_dir_len + 1)..].to_vec()
                    } else {
                        Vec::new()
                    };

                    let entry = branches_ops.entry(branch_dir).or_default();
                    entry.spec.get_or_insert(spec);

                    if subpath.is_empty() {
                        match op {
                            NodeOp::AddDir { .. } => entry.create = true,
                            NodeOp::CopyDir {
                                src_rev, src_path, ..
                            } => {
                                entry.create = true;
                                entry.create_from = Some((src_rev, src_path));
                            }
                            NodeOp::DelDir { .. } => entry.delete = true,
                            NodeOp::ModDir { .. } => entry.root_meta = true,
                            NodeOp::AddFile { .. }
                            | NodeOp::ModFile { .. }
                            | NodeOp::DelFile { .. } => {
                                tracing::warn!(
                                    "branch path \"{}\" is a file, ignoring",
                                    path.escape_ascii(),
                                );
                            }
                        }
                    } else {
                        let change = match op {
                            NodeOp::AddFile {
                                copy_from: Some((src_rev, src_path)),
                                ..
                            } => (ChangeKind::CopyFile { src_rev, src_path }, subpath),
                            NodeOp::AddFile { .. } | NodeOp::AddDir { .. } => {
                                (ChangeKind::Add, subpath)
                            }
                            NodeOp::ModFile { .. } => (ChangeKind::Modify, subpath),
                            NodeOp::DelFile { .. } | NodeOp::DelDir { .. } => {
                                (ChangeKind::Delete, subpath)
                            }
                            NodeOp::CopyDir {
                                src_rev, src_path, ..
                            } => (ChangeKind::CopyDir { src_rev, src_path }, subpath),
                            NodeOp::ModDir { .. } => (ChangeKind::PropChange, subpath),
                        };
                        entry.changed.push(change);
                    }
                }
            }
        }

        Ok(branches_ops)
    }

    /// A deleted container took every branch below it along.
    fn fan_out_delete(
        &mut self,
        pending: &mut std::collections::VecDeque<NodeOp>,
        path: &[u8],
        entry: Entry,
    ) {
        let Entry::Dir(dir) = entry else {
            return;
        };
        let children: Vec<(Vec<u8>, Entry)> = self
            .tree
            .dir_entries(dir)
            .map(|(name, child)| (name.to_vec(), child))
            .collect();
        for (name, child) in children.into_iter() {
            if child.is_dir() {
                pending.push_front(NodeOp::DelDir {
                    path: concat_path(path, &name),
                    entry: child,
                });
            }
        }
    }

    /// Copying a container re-creates the branches below it.
    fn fan_out_copy(
        &mut self,
        pending: &mut std::collections::VecDeque<NodeOp>,
        path: &[u8],
        src_rev: u64,
        src_path: &[u8],
    ) -> Result<(), ConvertError> {
        let Some(Entry::Dir(dir)) = self.tree.get_work(path) else {
            return Ok(());
        };
        let children: Vec<Vec<u8>> = self
            .tree
            .dir_entries(dir)
            .filter(|(_, child)| child.is_dir())
            .map(|(name, _)| name.to_vec())
            .collect();
        for name in children.into_iter() {
            pending.push_front(NodeOp::CopyDir {
                path: concat_path(path, &name),
                src_rev,
                src_path: concat_path(src_path, &name),
            });
        }
        Ok(())
    }

    // ----- branch lifecycle and commit synthesis ------------------------

    fn process_branch_rev(
        &mut self,
        rev: u64,
        rev_record: &dump::RevRecord,
        branch_path: &[u8],
        ops: BranchOps,
    ) -> Result<(), ConvertError> {
        if ops.delete {
            self.delete_branch(rev, branch_path);
        }

        let branch = if ops.create {
            Some(self.create_branch(rev, branch_path, &ops)?)
        } else if !ops.delete {
            match self.live.get(branch_path) {
                Some(&branch) => Some(branch),
                None => {
                    // changes under a mapped directory that never became
                    // a branch (e.g. created while filtered out)
                    self.warn_unmapped(branch_path);
                    None
                }
            }
        } else {
            None
        };

        if let Some(branch) = branch {
            self.emit_branch_commit(rev, rev_record, branch, &ops)?;
        }

        Ok(())
    }

    fn delete_branch(&mut self, rev: u64, branch_path: &[u8]) {
        let Some(branch) = self.live.remove(branch_path) else {
            tracing::warn!(
                "deleting branch directory \"{}\" which was never created",
                branch_path.escape_ascii(),
            );
            return;
        };
        tracing::debug!("deleting branch \"{}\"", branch_path.escape_ascii());
        self.branches[branch].deleted_rev = Some(rev);
        // the name becomes free for a revival; the deleted tip gets its
        // own ref at finalization when it stayed unreachable
        self.registry.release(&self.branches[branch].refname);
    }

    fn create_branch(
        &mut self,
        rev: u64,
        branch_path: &[u8],
        ops: &BranchOps,
    ) -> Result<BranchId, ConvertError> {
        if self.live.contains_key(branch_path) {
            tracing::error!(
                "branch \"{}\" already exists",
                branch_path.escape_ascii(),
            );
            return Err(ConvertError);
        }

        let spec = ops.spec.clone().expect("created branch has a mapping");
        let refname = self.registry.claim(&spec.refname);
        let is_tag = refname.starts_with("refs/tags/");

        let mut tip = None;
        let mut tree_prefix = Vec::new();

        if let Some((src_rev, ref src_path)) = ops.create_from {
            if let Owner::Mapped {
                branch_dir_len, ..
            } = self.resolve_owner(src_path)
            {
                let src_branch_dir = &src_path[..branch_dir_len];
                tip = self.commit_at(src_branch_dir, src_rev);

                if let Some(tip_commit) = tip {
                    tracing::debug!(
                        "creating branch \"{}\" from \"{}\"@{src_rev}",
                        branch_path.escape_ascii(),
                        src_path.escape_ascii(),
                    );

                    let src_branch = self.commits[tip_commit].branch;
                    // copying a branch at its tip carries the whole
                    // history into the new ref
                    if self.branches[src_branch].tip == tip {
                        self.branches[src_branch].merged_elsewhere = true;
                    }

                    let add_prefix =
                        spec.add_tree_prefix || self.options.add_branch_tree_prefix;
                    if add_prefix && src_path.len() > branch_dir_len {
                        // a subdirectory copy continues at the parent's depth
                        tree_prefix = self.branches[src_branch].tree_prefix.clone();
                        tree_prefix = concat_path(
                            &tree_prefix,
                            &src_path[(branch_dir_len + 1)..],
                        );
                    }
                }
            } else {
                tracing::warn!(
                    "creating branch \"{}\" from unmapped \"{}\"",
                    branch_path.escape_ascii(),
                    src_path.escape_ascii(),
                );
            }
        } else {
            tracing::debug!(
                "creating branch \"{}\" with a new directory",
                branch_path.escape_ascii(),
            );
        }

        // a suffixed branch name keeps its revision refs apart the same way
        let revision_ref = if refname != spec.refname {
            format!("{}{}", spec.revision_ref, &refname[spec.refname.len()..])
        } else {
            spec.revision_ref.clone()
        };

        let branch = self.branches.len();
        self.branches.push(Branch {
            svn_path: branch_path.to_vec(),
            refname,
            revision_ref,
            project: spec.project,
            is_tag,
            created_rev: rev,
            deleted_rev: None,
            tip,
            tree_prefix,
            recreate_merges: spec.recreate_merges,
            inherit_mergeinfo: spec.inherit_mergeinfo,
            mergeinfo: Mergeinfo::new(),
            pending_skips: Vec::new(),
            merged_elsewhere: false,
        });
        self.live.insert(branch_path.to_vec(), branch);

        Ok(branch)
    }

    /// The commit a branch path had at or before `rev`.
    fn commit_at(&self, branch_dir: &[u8], rev: u64) -> Option<CommitId> {
        let list = self.path_commits.get(branch_dir)?;
        let i = list.partition_point(|&(r, _)| r <= rev);
        (i > 0).then(|| list[i - 1].1)
    }

    fn emit_branch_commit(
        &mut self,
        rev: u64,
        rev_record: &dump::RevRecord,
        branch: BranchId,
        ops: &BranchOps,
    ) -> Result<(), ConvertError> {
        let branch_path = self.branches[branch].svn_path.clone();
        let project_idx = self.branches[branch].project;
        let parent = self.branches[branch].tip;

        // ---- declared merges from the mergeinfo delta
        let mut added_svn_merges = BTreeSet::new();
        if ops.create || ops.root_meta {
            let current = self.inherited_mergeinfo(rev, branch);
            let delta = current.diff_from(&self.branches[branch].mergeinfo);
            if !delta.is_empty() {
                added_svn_merges = merges::gather_svn_merges(
                    &self.commits,
                    &self.branches,
                    &self.path_commits,
                    branch,
                    &delta,
                    &self.branches[branch].recreate_merges,
                );
            }
            self.branches[branch].mergeinfo = current;
        }

        // ---- copy-derived merge candidates
        let mut forced_merges = BTreeSet::new();
        let recreate = self.branches[branch].recreate_merges;
        for (kind, _subpath) in ops.changed.iter() {
            match kind {
                ChangeKind::CopyDir { src_rev, src_path } => {
                    let Owner::Mapped { branch_dir_len, .. } = self.resolve_owner(src_path)
                    else {
                        continue;
                    };
                    let src_branch_dir = &src_path[..branch_dir_len];
                    if src_branch_dir == branch_path.as_slice() {
                        continue;
                    }
                    let Some(src_commit) = self.commit_at(src_branch_dir, *src_rev) else {
                        continue;
                    };
                    if src_path.len() == branch_dir_len {
                        // a whole-branch copy is a merge regardless of
                        // the category switches
                        forced_merges.insert(src_commit);
                    } else if recreate.dir_copy {
                        added_svn_merges.insert(src_commit);
                    }
                }
                ChangeKind::CopyFile { src_rev, src_path } => {
                    if !recreate.file_copy {
                        continue;
                    }
                    let Owner::Mapped { branch_dir_len, .. } = self.resolve_owner(src_path)
                    else {
                        continue;
                    };
                    let src_branch_dir = &src_path[..branch_dir_len];
                    if src_branch_dir == branch_path.as_slice() {
                        continue;
                    }
                    let Some(src_commit) = self.commit_at(src_branch_dir, *src_rev) else {
                        continue;
                    };
                    if self.trees_similar(rev, &branch_path, src_branch_dir, *src_rev) {
                        added_svn_merges.insert(src_commit);
                    }
                }
                _ => {}
            }
        }

        // ---- resolve to parent edges vs cherry-pick annotations
        let analysis = if !added_svn_merges.is_empty() || !forced_merges.is_empty() {
            merges::resolve_merge_parents(&self.commits, parent, &added_svn_merges, &forced_merges)
        } else {
            merges::MergeAnalysis {
                merges: BTreeSet::new(),
                cherrypicks: BTreeSet::new(),
            }
        };

        // ---- build the tree
        let Some(root_entry) = self
            .tree
            .get(rev, &branch_path)
            .ok()
            .flatten()
            .filter(Entry::is_dir)
        else {
            return Ok(());
        };

        let tree_id = self.build_branch_tree(branch, root_entry)?;

        let is_empty_change = ops.changed.is_empty()
            && !ops.create
            && analysis.merges.is_empty()
            && analysis.cherrypicks.is_empty()
            && parent.map(|p| self.commits[p].tree) == Some(tree_id);
        if is_empty_change {
            return Ok(());
        }

        // ---- single-branch fast-forward
        if analysis.merges.len() == 1 && ops.changed.is_empty() && !ops.create {
            let merge = *analysis.merges.iter().next().unwrap();
            let subsumes = match parent {
                None => true,
                Some(parent) => merges::is_ancestor(&self.commits, parent, merge),
            };
            if subsumes && self.commits[merge].tree == tree_id {
                tracing::debug!(
                    "fast-forwarding \"{}\" to r{}",
                    branch_path.escape_ascii(),
                    self.commits[merge].rev,
                );
                let src_branch = self.commits[merge].branch;
                if self.branches[src_branch].tip == Some(merge) {
                    self.branches[src_branch].merged_elsewhere = true;
                }
                self.branches[branch].tip = Some(merge);
                self.path_commits
                    .entry(branch_path)
                    .or_default()
                    .push((rev, merge));
                return Ok(());
            }
        }

        // ---- skip-commit folding
        let svn_log = rev_record
            .properties
            .get(b"svn:log".as_slice())
            .cloned()
            .unwrap_or_default();
        let project = &self.mapper.config().projects[project_idx];
        if project.skip_commit_revs.contains(rev)
            && analysis.merges.is_empty()
            && analysis.cherrypicks.is_empty()
        {
            tracing::debug!(
                "skipping commit for \"{}\" at r{rev}",
                branch_path.escape_ascii(),
            );
            self.branches[branch].pending_skips.push(svn_log);
            return Ok(());
        }

        // ---- orphan linking
        let mut parent = parent;
        if parent.is_none() && self.options.link_orphan_revs {
            parent = self.find_orphan_parent(rev, &branch_path);
        }

        // ---- metadata
        let author = self.authors.lookup(
            rev_record
                .properties
                .get(b"svn:author".as_slice())
                .map(Vec::as_slice),
        );
        let date = rev_record
            .properties
            .get(b"svn:date".as_slice())
            .and_then(|raw| parse_svn_date(raw));
        let timestamp = date.map_or(0, |d| d.timestamp());

        let summary = change_summary(&ops.changed);
        let pending_skips = std::mem::take(&mut self.branches[branch].pending_skips);
        let mut chains: Vec<&[crate::config::EditMsgRule]> = Vec::new();
        // MapPath-scoped rules run first, project rules (with inherited
        // defaults at their tail) second
        if let PathLookup::Mapped(m) = self.mapper.resolve(&branch_path) {
            chains.push(&m.rule.edit_msgs);
        }
        chains.push(&project.edit_msgs);

        let body = message::build_message(
            &message::MessageInput {
                svn_log: &svn_log,
                rev,
                skipped_logs: &pending_skips,
                change_summary: &summary,
            },
            &chains,
        );

        // ---- plan the node; a branch worker finishes the commit object
        let required = required_in_mergeinfo(project, &ops.changed);
        let commit_idx = self.commits.len();
        let tail = parent.map_or(commit_idx, |p| self.commits[p].tail);
        for &merge in analysis.merges.iter() {
            let src_branch = self.commits[merge].branch;
            if self.branches[src_branch].tip == Some(merge) {
                self.branches[src_branch].merged_elsewhere = true;
            }
        }

        let cherry_picks: Vec<pipeline::CherrySeed> = analysis
            .cherrypicks
            .iter()
            .map(|&c| pipeline::CherrySeed {
                commit: c,
                branch_path: self.branches[self.commits[c].branch].svn_path.clone(),
                rev: self.commits[c].rev,
            })
            .collect();

        let job = pipeline::CommitJob {
            commit: commit_idx,
            branch,
            rev,
            refname: self.branches[branch].refname.clone(),
            tree: tree_id,
            first_parent: parent,
            merge_parents: analysis.merges.iter().copied().collect(),
            cherry_picks,
            body,
            author,
            timestamp,
            revision_id: self.options.decorate_revision_id.then_some(rev),
            change_id: self.options.decorate_change_id,
        };

        self.commits.push(CommitNode {
            branch,
            rev,
            tree: tree_id,
            parent,
            tail,
            required_in_mergeinfo: required,
            added_svn_merges,
            merges: analysis.merges,
            cherrypicks: analysis.cherrypicks,
        });

        self.branches[branch].tip = Some(commit_idx);
        self.path_commits
            .entry(branch_path.clone())
            .or_default()
            .push((rev, commit_idx));
        if parent.is_none() {
            self.orphan_roots.push(commit_idx);
        }

        if self.options.create_revision_refs {
            let name = format!("{}/r{rev}", self.branches[branch].revision_ref);
            self.rev_refs.push((name, commit_idx));
        }

        self.pipeline.dispatch(self.sequencer, job);
        tracing::debug!(
            "planned commit on branch \"{}\"",
            branch_path.escape_ascii(),
        );

        Ok(())
    }

    /// `svn:mergeinfo` of the branch root, inherited from the nearest
    /// ancestor directory carrying it (unless disabled); inheritance
    /// stops at an ancestor that is itself a branch root.
    fn inherited_mergeinfo(&self, rev: u64, branch: BranchId) -> Mergeinfo {
        let branch_path = &self.branches[branch].svn_path;

        let mut path: &[u8] = branch_path;
        loop {
            if let Ok(Some(Entry::Dir(dir))) = self.tree.get(rev, path) {
                if let Some(raw) = self.tree.dir_props(dir).get(b"svn:mergeinfo".as_slice()) {
                    return Mergeinfo::parse(raw);
                }
            }

            if !self.branches[branch].inherit_mergeinfo || path.is_empty() {
                return Mergeinfo::new();
            }
            path = parent_dir(path);
            if self.live.contains_key(path) {
                // the ancestor is a branch root of its own
                return Mergeinfo::new();
            }
            if path.is_empty() {
                return Mergeinfo::new();
            }
        }
    }

    /// Path-set overlap for file-copy merges and orphan linking: more
    /// than half of the larger tree's files must exist in the other.
    fn trees_similar(
        &self,
        rev: u64,
        branch_path: &[u8],
        other_path: &[u8],
        other_rev: u64,
    ) -> bool {
        let Some(a) = self.tree.get(rev, branch_path).ok().flatten() else {
            return false;
        };
        let Some(b) = self.tree.get(other_rev, other_path).ok().flatten() else {
            return false;
        };

        let mut paths_a = HashSet::new();
        self.tree
            .walk_files(b"", a, &mut |path, _| {
                paths_a.insert(path.to_vec());
            });
        if paths_a.is_empty() {
            return false;
        }

        let mut total_b = 0usize;
        let mut common = 0usize;
        self.tree.walk_files(b"", b, &mut |path, _| {
            total_b += 1;
            if paths_a.contains(path) {
                common += 1;
            }
        });

        common * 2 > paths_a.len().max(total_b)
    }

    fn find_orphan_parent(&mut self, rev: u64, branch_path: &[u8]) -> Option<CommitId> {
        let candidates = self.orphan_roots.clone();
        for root in candidates.into_iter() {
            let other = &self.branches[self.commits[root].branch];
            if other.svn_path == branch_path {
                continue;
            }
            let other_path = other.svn_path.clone();
            let other_rev = self.commits[root].rev;
            if self.trees_similar(rev, branch_path, &other_path, other_rev) {
                tracing::debug!(
                    "linking orphan \"{}\" under root commit of \"{}\"",
                    branch_path.escape_ascii(),
                    other_path.escape_ascii(),
                );
                return Some(root);
            }
        }
        None
    }

    // ----- git tree construction ----------------------------------------

    fn build_branch_tree(
        &mut self,
        branch: BranchId,
        root: Entry,
    ) -> Result<ObjectId, ConvertError> {
        let Entry::Dir(root_dir) = root else {
            tracing::error!("branch root is not a directory");
            return Err(ConvertError);
        };

        let project_idx = self.branches[branch].project;
        let created_rev = self.branches[branch].created_rev;
        let svn_path = self.branches[branch].svn_path.clone();
        let rev = self.tree.head_rev().unwrap_or(created_rev);

        let mut tree_id = self.build_git_tree(root_dir, b"", project_idx, rev, &svn_path)?;

        // inject after the walk so injected paths may create directories
        // that do not exist in svn
        let project = &self.mapper.config().projects[project_idx];
        let mut injections = Vec::new();
        for edit in project.tree_edits.iter() {
            if let TreeEdit::Inject {
                branch: branch_glob,
                path,
                data,
                executable,
                revs,
            } = edit
            {
                let applies = revs.as_ref().map_or(true, |r| r.contains(rev))
                    && branch_glob
                        .as_ref()
                        .map_or(true, |g| g.is_match(&svn_path));
                if applies {
                    injections.push((path.clone(), data.clone(), *executable));
                }
            }
        }
        for (path, data, executable) in injections.into_iter() {
            let blob = self.put_blob(data)?;
            tree_id = self.overlay_file(tree_id, &path, blob, executable)?;
        }

        // the tree prefix nests the work tree so a sub-copy continues at
        // the parent branch's depth
        let prefix = self.branches[branch].tree_prefix.clone();
        if !prefix.is_empty() {
            for component in prefix.split(|&c| c == b'/').rev() {
                let mut tree = gix_object::Tree::empty();
                tree.entries.push(gix_object::tree::Entry {
                    mode: gix_object::tree::EntryKind::Tree.into(),
                    filename: component.into(),
                    oid: tree_id,
                });
                tree_id = self.put_tree(&tree)?;
            }
        }

        Ok(tree_id)
    }

    fn build_git_tree(
        &mut self,
        dir: crate::tree::DirId,
        rel: &[u8],
        project_idx: usize,
        rev: u64,
        svn_path: &[u8],
    ) -> Result<ObjectId, ConvertError> {
        let cache_key = (dir, rel.to_vec(), project_idx);
        if let Some(&cached) = self.tree_oid_cache.get(&cache_key) {
            return Ok(cached);
        }

        let entries: Vec<(Vec<u8>, Entry)> = self
            .tree
            .dir_entries(dir)
            .map(|(name, entry)| (name.to_vec(), entry))
            .collect();

        let mut tree = gix_object::Tree::empty();

        let generate_gitignore = self.options.generate_gitignore;
        for (name, entry) in entries.into_iter() {
            let rel_path = concat_path(rel, &name);

            if self.drop_from_tree(project_idx, rev, &rel_path, svn_path) {
                continue;
            }

            match entry {
                Entry::File(file) => {
                    if generate_gitignore && name == b".gitignore" {
                        // replaced by the one generated from svn:ignore
                        continue;
                    }

                    let project = &self.mapper.config().projects[project_idx];
                    let mut executable = file.executable;
                    for chmod in project.chmods.iter() {
                        if chmod.paths.is_match(&rel_path) {
                            executable = chmod.executable;
                        }
                    }

                    let kind = if file.symlink {
                        gix_object::tree::EntryKind::Link
                    } else if executable {
                        gix_object::tree::EntryKind::BlobExecutable
                    } else {
                        gix_object::tree::EntryKind::Blob
                    };
                    tree.entries.push(gix_object::tree::Entry {
                        mode: kind.into(),
                        filename: name.as_slice().into(),
                        oid: file.blob,
                    });
                }
                Entry::Dir(sub_dir) => {
                    let sub_id =
                        self.build_git_tree(sub_dir, &rel_path, project_idx, rev, svn_path)?;
                    if sub_id == self.store.empty_tree_id() {
                        // git has no empty directories
                        continue;
                    }
                    tree.entries.push(gix_object::tree::Entry {
                        mode: gix_object::tree::EntryKind::Tree.into(),
                        filename: name.as_slice().into(),
                        oid: sub_id,
                    });
                }
            }
        }

        if generate_gitignore {
            let props = self.tree.dir_props(dir);
            // a svn:gitignore property is taken verbatim, in front of the
            // entries converted from the ignore properties
            let mut gitignore = props
                .get(b"svn:gitignore".as_slice())
                .cloned()
                .unwrap_or_default();
            if !gitignore.is_empty() && !gitignore.ends_with(b"\n") {
                gitignore.push(b'\n');
            }
            gitignore.extend(gitignore_content(
                props.get(b"svn:ignore".as_slice()).map(Vec::as_slice),
                props.get(b"svn:global-ignores".as_slice()).map(Vec::as_slice),
            ));
            if !gitignore.is_empty() {
                let blob = self.put_blob(gitignore)?;
                tree.entries.push(gix_object::tree::Entry {
                    mode: gix_object::tree::EntryKind::Blob.into(),
                    filename: ".gitignore".into(),
                    oid: blob,
                });
            }
        }

        if tree.entries.is_empty() {
            let project = &self.mapper.config().projects[project_idx];
            if let Some((name, content)) = project.empty_dir_placeholder.clone() {
                if !rel.is_empty() {
                    let blob = self.put_blob(content)?;
                    tree.entries.push(gix_object::tree::Entry {
                        mode: gix_object::tree::EntryKind::Blob.into(),
                        filename: name.as_slice().into(),
                        oid: blob,
                    });
                }
            }
        }

        tree.entries.sort();
        let id = self.put_tree(&tree)?;
        self.tree_oid_cache.insert(cache_key, id);
        Ok(id)
    }

    /// `<DeletePath>`/`<IgnoreFiles>` filtering of one branch-relative
    /// path.
    fn drop_from_tree(
        &mut self,
        project_idx: usize,
        rev: u64,
        rel_path: &[u8],
        svn_path: &[u8],
    ) -> bool {
        let project = &self.mapper.config().projects[project_idx];

        // document order decides between a deletion and an injection of
        // the same path; the last matching edit wins
        let mut deleted = false;
        for edit in project.tree_edits.iter() {
            match edit {
                TreeEdit::Inject { path, revs, .. } => {
                    if path.as_slice() == rel_path
                        && revs.as_ref().map_or(true, |r| r.contains(rev))
                    {
                        deleted = false;
                    }
                }
                TreeEdit::Delete { paths, revs } => {
                    if revs.as_ref().map_or(true, |r| r.contains(rev))
                        && paths.is_match(rel_path)
                    {
                        deleted = true;
                    }
                }
            }
        }
        if deleted {
            return true;
        }

        if project.ignore_files.is_match(rel_path) {
            let dir = parent_dir(rel_path);
            let dir_key = concat_path(svn_path, if dir.is_empty() { b"." } else { dir });
            if self.warned_ignored.insert(dir_key) {
                tracing::info!(
                    "ignoring files under \"{}/{}\"",
                    svn_path.escape_ascii(),
                    dir.escape_ascii(),
                );
            }
            return true;
        }

        false
    }

    /// Places `blob` at `path` inside the tree `root`, creating
    /// intermediate trees as needed.
    fn overlay_file(
        &mut self,
        root: ObjectId,
        path: &[u8],
        blob: ObjectId,
        executable: bool,
    ) -> Result<ObjectId, ConvertError> {
        let kind = if executable {
            gix_object::tree::EntryKind::BlobExecutable
        } else {
            gix_object::tree::EntryKind::Blob
        };
        self.overlay_entry(root, path, kind.into(), blob)
    }

    fn overlay_entry(
        &mut self,
        root: ObjectId,
        path: &[u8],
        mode: gix_object::tree::EntryMode,
        oid: ObjectId,
    ) -> Result<ObjectId, ConvertError> {
        // trees under construction are not reachable from the store, so
        // the overlay keeps its own parsed copies
        let mut tree = self.read_tree(root)?;

        let (first, rest) = match path.iter().position(|&c| c == b'/') {
            Some(sep) => (&path[..sep], Some(&path[(sep + 1)..])),
            None => (path, None),
        };

        let (new_mode, new_oid) = match rest {
            None => (mode, oid),
            Some(rest) => {
                let sub_root = tree
                    .entries
                    .iter()
                    .find(|e| e.filename.as_slice() == first && e.mode.is_tree())
                    .map(|e| e.oid)
                    .unwrap_or(self.store.empty_tree_id());
                let sub_id = self.overlay_entry(sub_root, rest, mode, oid)?;
                (gix_object::tree::EntryKind::Tree.into(), sub_id)
            }
        };

        tree.entries.retain(|e| e.filename.as_slice() != first);
        tree.entries.push(gix_object::tree::Entry {
            mode: new_mode,
            filename: first.into(),
            oid: new_oid,
        });
        tree.entries.sort();

        self.put_tree(&tree)
    }

    fn read_tree(&mut self, id: ObjectId) -> Result<gix_object::Tree, ConvertError> {
        if id == self.store.empty_tree_id() {
            return Ok(gix_object::Tree::empty());
        }
        match self.overlay_trees.get(&id) {
            Some(tree) => Ok(tree.clone()),
            None => Ok(gix_object::Tree::empty()),
        }
    }

    fn put_tree(&mut self, tree: &gix_object::Tree) -> Result<ObjectId, ConvertError> {
        let id = self.store.put_tree(tree).map_err(|e| {
            tracing::error!("failed to store tree: {e}");
            ConvertError
        })?;
        if self.keep_parsed_trees {
            self.overlay_trees.insert(id, tree.clone());
        }
        Ok(id)
    }

    // ----- finalization --------------------------------------------------

    pub(crate) fn finalize(mut self) -> Result<Finalized, ConvertError> {
        // barrier: every planned commit must be bound before any ref may
        // reference it
        self.status.set_status("waiting for commit workers".into());
        let commit_ids = self.pipeline.finish()?;

        self.status.set_status("writing refs".into());

        let total_tags = self.branches.iter().filter(|b| b.is_tag).count();
        tracing::info!(
            "created {} commits over {} branches and {total_tags} tags",
            self.commits.len(),
            self.branches.len() - total_tags,
        );
        if let Some(uuid) = self.svn_uuid {
            tracing::debug!("converted from SVN repository {uuid}");
        }

        let mut refs = BTreeMap::new();
        for (name, commit) in self.rev_refs.drain(..) {
            refs.insert(name, commit_ids[commit]);
        }

        for branch_idx in 0..self.branches.len() {
            let branch = &self.branches[branch_idx];
            let Some(tip) = branch.tip else {
                continue;
            };
            let tip_id = commit_ids[tip];

            match branch.deleted_rev {
                None => {
                    refs.insert(branch.refname.clone(), tip_id);
                }
                Some(deleted_rev) => {
                    if branch.merged_elsewhere {
                        continue;
                    }
                    let base = format!("{}_deleted@r{deleted_rev}", branch.refname);
                    let name = self.registry.claim(&base);
                    tracing::info!(
                        "keeping deleted branch \"{}\" as {name}",
                        branch.svn_path.escape_ascii(),
                    );
                    refs.insert(name, tip_id);
                }
            }
        }

        let head_ref = if refs.contains_key(&self.options.preferred_head) {
            self.options.preferred_head.clone()
        } else {
            refs.keys()
                .find(|name| name.starts_with("refs/heads/"))
                .cloned()
                .unwrap_or_else(|| self.options.preferred_head.clone())
        };

        Ok(Finalized {
            refs,
            head_ref,
            commit_ids,
        })
    }

    /// Blob content of `path` at `rev` (or the head revision), for
    /// `--extract-file`.
    pub(crate) fn extract_file(
        &self,
        path: &[u8],
        rev: Option<u64>,
    ) -> Result<Vec<u8>, ConvertError> {
        let rev = rev.or_else(|| self.tree.head_rev()).ok_or_else(|| {
            tracing::error!("no revisions loaded");
            ConvertError
        })?;
        match self.tree.get(rev, path) {
            Ok(Some(Entry::File(file))) => self.get_blob(file.blob),
            Ok(Some(Entry::Dir(_))) => {
                tracing::error!("\"{}\" is a directory", path.escape_ascii());
                Err(ConvertError)
            }
            Ok(None) => {
                tracing::error!("\"{}\" not found at r{rev}", path.escape_ascii());
                Err(ConvertError)
            }
            Err(e) => {
                tracing::error!("{e}");
                Err(ConvertError)
            }
        }
    }

    /// All files of the head snapshot with their blob ids, for
    /// `--compare-to`.
    pub(crate) fn head_files(&self) -> BTreeMap<Vec<u8>, ObjectId> {
        let mut files = BTreeMap::new();
        let Some(rev) = self.tree.head_rev() else {
            return files;
        };
        if let Ok(Some(root)) = self.tree.get(rev, b"") {
            self.tree.walk_files(b"", root, &mut |path, file| {
                files.insert(path.to_vec(), file.blob);
            });
        }
        files
    }
}

/// Compares content against a hash the dump declared for it; SHA1 is
/// preferred when both are present.
fn verify_declared_hash(
    path: &[u8],
    data: &[u8],
    sha1: Option<[u8; 20]>,
    md5: Option<[u8; 16]>,
    what: &str,
) -> Result<(), ConvertError> {
    use md5::Digest as _;

    let matches = if let Some(declared) = sha1 {
        <[u8; 20]>::from(sha1::Sha1::digest(data)) == declared
    } else if let Some(declared) = md5 {
        <[u8; 16]>::from(md5::Md5::digest(data)) == declared
    } else {
        true
    };

    if matches {
        Ok(())
    } else {
        tracing::error!(
            "declared {what} checksum of \"{}\" does not match",
            path.escape_ascii(),
        );
        Err(ConvertError)
    }
}

fn parse_svn_path(path: &[u8]) -> Result<Vec<u8>, ConvertError> {
    if path.is_empty() {
        return Ok(Vec::new());
    }

    let mut result = Vec::with_capacity(path.len());
    for (i, component) in path.split(|&c| c == b'/').enumerate() {
        if component.is_empty() || component == b".git" {
            tracing::error!("invalid path component in \"{}\"", path.escape_ascii());
            return Err(ConvertError);
        }
        if i != 0 {
            result.push(b'/');
        }
        result.extend(component);
    }
    Ok(result)
}

fn parse_svn_date(raw: &[u8]) -> Option<chrono::DateTime<chrono::Utc>> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&chrono::Utc))
}

fn revision_info<'a>(
    rev: u64,
    properties: &'a HashMap<Vec<u8>, Vec<u8>>,
) -> RevisionInfo<'a> {
    RevisionInfo {
        rev,
        author: properties
            .get(b"svn:author".as_slice())
            .map_or(b"".as_slice(), Vec::as_slice),
        date: properties
            .get(b"svn:date".as_slice())
            .and_then(|raw| parse_svn_date(raw)),
    }
}

fn change_summary(changed: &[(ChangeKind, Vec<u8>)]) -> String {
    if changed.len() == 1 {
        let (kind, path) = &changed[0];
        let verb = match kind {
            ChangeKind::Add | ChangeKind::CopyFile { .. } | ChangeKind::CopyDir { .. } => "Add",
            ChangeKind::Modify | ChangeKind::PropChange => "Update",
            ChangeKind::Delete => "Delete",
        };
        return format!("{verb} {}", String::from_utf8_lossy(path));
    }

    let mut added = 0usize;
    let mut modified = 0usize;
    let mut deleted = 0usize;
    for (kind, _) in changed.iter() {
        match kind {
            ChangeKind::Add | ChangeKind::CopyFile { .. } | ChangeKind::CopyDir { .. } => {
                added += 1
            }
            ChangeKind::Modify | ChangeKind::PropChange => modified += 1,
            ChangeKind::Delete => deleted += 1,
        }
    }

    let mut parts = Vec::new();
    if added != 0 {
        parts.push(format!("add {added}"));
    }
    if modified != 0 {
        parts.push(format!("update {modified}"));
    }
    if deleted != 0 {
        parts.push(format!("delete {deleted}"));
    }
    if parts.is_empty() {
        return "No content changes".to_string();
    }

    let mut summary = parts.join(", ");
    summary.push_str(" path(s)");
    let mut chars = summary.chars();
    match chars.next() {
        Some(first) => format!("{}{}", first.to_uppercase(), chars.as_str()),
        None => summary,
    }
}

/// A revision is required in mergeinfo coverage unless every one of its
/// changes matches the project's `IgnoreUnmerged` patterns.
fn required_in_mergeinfo(project: &Project, changed: &[(ChangeKind, Vec<u8>)]) -> bool {
    if changed.is_empty() {
        return false;
    }
    if project.ignore_unmerged.is_empty() {
        return true;
    }
    changed
        .iter()
        .any(|(_, path)| !project.ignore_unmerged.is_match(path))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use gix_hash::ObjectId;

    use super::{HistoryBuilder, Options};
    use crate::authors::AuthorsMap;
    use crate::config::{Config, GlobList, LoadOptions};
    use crate::git::MemoryStore;
    use crate::output::{LogSequencer, OutputSink};
    use crate::refmap::RefMapper;
    use crate::transform::IdentityTransformer;

    // ---- dump construction helpers

    fn props_block(props: &[(&[u8], &[u8])]) -> Vec<u8> {
        let mut out = Vec::new();
        for (key, value) in props {
            out.extend(format!("K {}\n", key.len()).into_bytes());
            out.extend(*key);
            out.push(b'\n');
            out.extend(format!("V {}\n", value.len()).into_bytes());
            out.extend(*value);
            out.push(b'\n');
        }
        out.extend(b"PROPS-END\n");
        out
    }

    fn rev_record(rev: u64, log: &str) -> Vec<u8> {
        let props = props_block(&[
            (b"svn:author", b"alice"),
            (b"svn:date", b"2023-05-01T10:00:00.000000Z"),
            (b"svn:log", log.as_bytes()),
        ]);
        let mut out = format!(
            "Revision-number: {rev}\nProp-content-length: {len}\nContent-length: {len}\n\n",
            len = props.len(),
        )
        .into_bytes();
        out.extend(props);
        out.push(b'\n');
        out
    }

    fn dir_add(path: &str) -> Vec<u8> {
        format!("Node-path: {path}\nNode-kind: dir\nNode-action: add\n\n").into_bytes()
    }

    fn dir_change_props(path: &str, props: &[(&[u8], &[u8])]) -> Vec<u8> {
        let block = props_block(props);
        let mut out = format!(
            "Node-path: {path}\nNode-kind: dir\nNode-action: change\n\
             Prop-content-length: {len}\nContent-length: {len}\n\n",
            len = block.len(),
        )
        .into_bytes();
        out.extend(block);
        out.push(b'\n');
        out
    }

    fn dir_copy(path: &str, src_path: &str, src_rev: u64) -> Vec<u8> {
        format!(
            "Node-path: {path}\nNode-kind: dir\nNode-action: add\n\
             Node-copyfrom-rev: {src_rev}\nNode-copyfrom-path: {src_path}\n\n",
        )
        .into_bytes()
    }

    fn file_node(path: &str, action: &str, content: &[u8]) -> Vec<u8> {
        let mut out = format!(
            "Node-path: {path}\nNode-kind: file\nNode-action: {action}\n\
             Text-content-length: {len}\nContent-length: {len}\n\n",
            len = content.len(),
        )
        .into_bytes();
        out.extend(content);
        out.push(b'\n');
        out
    }

    fn delete_node(path: &str) -> Vec<u8> {
        format!("Node-path: {path}\nNode-action: delete\n\n").into_bytes()
    }

    fn make_dump(parts: &[Vec<u8>]) -> Vec<u8> {
        let mut out = b"SVN-fs-dump-format-version: 2\n\n".to_vec();
        for part in parts {
            out.extend(part);
        }
        out
    }

    // ---- conversion driver

    struct TestCommit {
        rev: u64,
        id: ObjectId,
        branch_path: Vec<u8>,
        parents: Vec<ObjectId>,
        message: Vec<u8>,
    }

    struct Converted {
        refs: BTreeMap<String, ObjectId>,
        head_ref: String,
        commits: Vec<TestCommit>,
    }

    impl Converted {
        fn tip(&self, refname: &str) -> ObjectId {
            *self.refs.get(refname).unwrap_or_else(|| {
                panic!("no ref {refname}, have: {:?}", self.refs.keys().collect::<Vec<_>>())
            })
        }

        fn commit(&self, id: ObjectId) -> &TestCommit {
            self.commits.iter().find(|c| c.id == id).unwrap()
        }
    }

    fn test_options() -> Options {
        Options {
            end_revision: None,
            path_filter: GlobList::empty(),
            create_revision_refs: false,
            link_orphan_revs: false,
            add_branch_tree_prefix: false,
            generate_gitignore: true,
            decorate_revision_id: false,
            decorate_change_id: false,
            preferred_head: "refs/heads/main".into(),
        }
    }

    fn convert_dump(dump: &[u8], config_xml: Option<&str>, options: Options) -> Converted {
        let store = MemoryStore::new();
        let config = Config::load(config_xml, &LoadOptions::default()).unwrap();
        let mapper = RefMapper::new(config);
        let authors = AuthorsMap::new();
        let sequencer = LogSequencer::new(OutputSink::null());

        std::thread::scope(|scope| {
            let pipeline = super::pipeline::CommitPipeline::start(scope, &store, &sequencer, 4);
            let mut builder = HistoryBuilder::new(
                &store,
                &mapper,
                &authors,
                None,
                Box::new(IdentityTransformer),
                options,
                &sequencer,
                OutputSink::null(),
                pipeline,
            );

            let mut src = std::io::Cursor::new(dump.to_vec());
            let mut reader = crate::svn::dump::DumpReader::new(&mut src, true, None).unwrap();
            assert!(builder.load(&mut reader).is_ok(), "conversion failed");

            // the graph structure, by commit index, before finalize
            // consumes the builder
            let structure: Vec<(u64, Vec<u8>, Option<usize>, Vec<usize>)> = builder
                .commits
                .iter()
                .map(|node| {
                    (
                        node.rev,
                        builder.branches[node.branch].svn_path.clone(),
                        node.parent,
                        node.merges.iter().copied().collect(),
                    )
                })
                .collect();

            let finalized = match builder.finalize() {
                Ok(f) => f,
                Err(_) => panic!("finalize failed"),
            };
            let ids = &finalized.commit_ids;

            let commits = structure
                .iter()
                .enumerate()
                .map(|(i, (rev, branch_path, parent, merges))| {
                    let raw = store.get_raw(ids[i]).expect("commit object missing");
                    let parsed = gix_object::CommitRef::from_bytes(&raw).unwrap();
                    let mut parents: Vec<ObjectId> = Vec::new();
                    parents.extend(parent.map(|p| ids[p]));
                    parents.extend(merges.iter().map(|&m| ids[m]));
                    TestCommit {
                        rev: *rev,
                        id: ids[i],
                        branch_path: branch_path.clone(),
                        parents,
                        message: parsed.message.to_vec(),
                    }
                })
                .collect();

            Converted {
                refs: finalized.refs,
                head_ref: finalized.head_ref,
                commits,
            }
        })
    }

    // ---- scenarios

    #[test]
    fn trunk_branch_merge_roundtrip() {
        let dump = make_dump(&[
            rev_record(1, "init"),
            dir_add("trunk"),
            dir_add("branches"),
            file_node("trunk/a.txt", "add", b"one\n"),
            rev_record(2, "branch off"),
            dir_copy("branches/feat", "trunk", 1),
            rev_record(3, "work on feat"),
            file_node("branches/feat/a.txt", "change", b"one\ntwo\n"),
            rev_record(4, "merge feat"),
            file_node("trunk/a.txt", "change", b"one\ntwo\n"),
            dir_change_props("trunk", &[(b"svn:mergeinfo", b"/branches/feat:2-3\n")]),
        ]);

        let converted = convert_dump(&dump, None, test_options());

        assert_eq!(converted.head_ref, "refs/heads/main");
        let main_tip = converted.tip("refs/heads/main");
        let feat_tip = converted.tip("refs/heads/feat");

        let merge_commit = converted.commit(main_tip);
        assert_eq!(merge_commit.rev, 4);
        assert_eq!(merge_commit.parents.len(), 2, "expected a merge commit");
        assert_eq!(merge_commit.parents[1], feat_tip);

        // feat's history hangs off trunk's first commit
        let feat_head = converted.commit(feat_tip);
        assert_eq!(feat_head.rev, 3);
        let feat_root = converted.commit(feat_head.parents[0]);
        assert_eq!(feat_root.rev, 2);
        assert_eq!(feat_root.branch_path, b"branches/feat");
    }

    #[test]
    fn incomplete_mergeinfo_becomes_cherry_pick() {
        let dump = make_dump(&[
            rev_record(1, "init"),
            dir_add("trunk"),
            dir_add("branches"),
            file_node("trunk/a.txt", "add", b"one\n"),
            rev_record(2, "branch off"),
            dir_copy("branches/feat", "trunk", 1),
            rev_record(3, "feat change 1"),
            file_node("branches/feat/a.txt", "change", b"one\ntwo\n"),
            rev_record(4, "feat change 2"),
            file_node("branches/feat/b.txt", "add", b"bee\n"),
            // only r4 is recorded merged; r3 is a coverage gap
            rev_record(5, "partial merge"),
            file_node("trunk/b.txt", "add", b"bee\n"),
            dir_change_props("trunk", &[(b"svn:mergeinfo", b"/branches/feat:4\n")]),
        ]);

        let converted = convert_dump(&dump, None, test_options());

        let main_tip = converted.tip("refs/heads/main");
        let commit = converted.commit(main_tip);
        assert_eq!(commit.rev, 5);
        assert_eq!(commit.parents.len(), 1, "gap must not produce a merge");
        let message = String::from_utf8_lossy(&commit.message);
        assert!(
            message.contains("Cherry-picked-from:"),
            "message was {message:?}",
        );
    }

    #[test]
    fn deleted_branch_keeps_tip_and_revival_restarts() {
        let dump = make_dump(&[
            rev_record(1, "init"),
            dir_add("trunk"),
            dir_add("branches"),
            file_node("trunk/a.txt", "add", b"one\n"),
            rev_record(10, "make b"),
            dir_copy("branches/b", "trunk", 1),
            rev_record(15, "change b"),
            file_node("branches/b/a.txt", "change", b"b version\n"),
            rev_record(20, "drop b"),
            delete_node("branches/b"),
            rev_record(29, "trunk moves on"),
            file_node("trunk/a.txt", "change", b"two\n"),
            rev_record(30, "recreate b"),
            dir_copy("branches/b", "trunk", 29),
        ]);

        let converted = convert_dump(&dump, None, test_options());

        let deleted_tip = converted.tip("refs/heads/b_deleted@r20");
        assert_eq!(converted.commit(deleted_tip).rev, 15);

        let revived_tip = converted.tip("refs/heads/b");
        let revived = converted.commit(revived_tip);
        assert_eq!(revived.rev, 30);
        // fresh history from trunk@29
        let trunk_parent = converted.commit(revived.parents[0]);
        assert_eq!(trunk_parent.rev, 29);
        assert_eq!(trunk_parent.branch_path, b"trunk");
    }

    #[test]
    fn renamed_branch_leaves_no_deleted_ref() {
        let dump = make_dump(&[
            rev_record(1, "init"),
            dir_add("trunk"),
            dir_add("branches"),
            file_node("trunk/a.txt", "add", b"one\n"),
            rev_record(2, "make old"),
            dir_copy("branches/old", "trunk", 1),
            rev_record(3, "rename old to new"),
            dir_copy("branches/new", "branches/old", 2),
            delete_node("branches/old"),
        ]);

        let converted = convert_dump(&dump, None, test_options());

        assert!(converted.refs.contains_key("refs/heads/new"));
        assert!(
            !converted.refs.keys().any(|k| k.contains("old_deleted")),
            "renamed branch must not leave a _deleted ref: {:?}",
            converted.refs.keys().collect::<Vec<_>>(),
        );
    }

    #[test]
    fn skip_commit_folds_into_next_message() {
        let config = r#"<Projects>
                          <Project>
                            <SkipCommit Revs="42" />
                          </Project>
                        </Projects>"#;
        let dump = make_dump(&[
            rev_record(41, "init"),
            dir_add("trunk"),
            file_node("trunk/a.txt", "add", b"one\n"),
            rev_record(42, "typo"),
            file_node("trunk/a.txt", "change", b"one!\n"),
            rev_record(43, "fix thing"),
            file_node("trunk/a.txt", "change", b"one!!\n"),
        ]);

        let converted = convert_dump(&dump, Some(config), test_options());

        assert!(!converted.commits.iter().any(|c| c.rev == 42));

        let tip = converted.tip("refs/heads/main");
        let commit = converted.commit(tip);
        assert_eq!(commit.rev, 43);
        assert!(
            commit.message.starts_with(b"typo\n\nfix thing"),
            "message was {:?}",
            String::from_utf8_lossy(&commit.message),
        );
    }

    #[test]
    fn orphan_roots_link_by_tree_overlap() {
        let dump = make_dump(&[
            rev_record(100, "first orphan"),
            dir_add("branches"),
            dir_add("branches/a"),
            file_node("branches/a/f1", "add", b"same 1\n"),
            file_node("branches/a/f2", "add", b"same 2\n"),
            rev_record(101, "second orphan"),
            dir_add("branches/b"),
            file_node("branches/b/f1", "add", b"same 1\n"),
            file_node("branches/b/f2", "add", b"same 2\n"),
        ]);

        let options = Options {
            link_orphan_revs: true,
            ..test_options()
        };
        let converted = convert_dump(&dump, None, options);

        let a_tip = converted.tip("refs/heads/a");
        let b_tip = converted.tip("refs/heads/b");
        let b_commit = converted.commit(b_tip);
        assert_eq!(b_commit.parents, [a_tip], "b's root links under a's root");
    }

    #[test]
    fn empty_revisions_make_no_commits() {
        let dump = make_dump(&[
            rev_record(1, "init"),
            dir_add("trunk"),
            file_node("trunk/a.txt", "add", b"one\n"),
            rev_record(2, "nothing relevant"),
            dir_add("unrelated"),
            rev_record(3, "prop-only no-op"),
        ]);

        let converted = convert_dump(&dump, None, test_options());
        assert_eq!(converted.commits.len(), 1);
        assert_eq!(converted.commits[0].rev, 1);
    }

    #[test]
    fn determinism_across_runs() {
        let dump = make_dump(&[
            rev_record(1, "init"),
            dir_add("trunk"),
            dir_add("branches"),
            file_node("trunk/a.txt", "add", b"one\n"),
            rev_record(2, "branch"),
            dir_copy("branches/feat", "trunk", 1),
            rev_record(3, "change"),
            file_node("branches/feat/a.txt", "change", b"two\n"),
        ]);

        let first = convert_dump(&dump, None, test_options());
        let second = convert_dump(&dump, None, test_options());

        assert_eq!(first.refs, second.refs);
        assert_eq!(first.head_ref, second.head_ref);
    }

    #[test]
    fn tags_map_under_refs_tags() {
        let dump = make_dump(&[
            rev_record(1, "init"),
            dir_add("trunk"),
            dir_add("tags"),
            file_node("trunk/a.txt", "add", b"one\n"),
            rev_record(2, "tag it"),
            dir_copy("tags/v1.0", "trunk", 1),
        ]);

        let converted = convert_dump(&dump, None, test_options());
        let tag_tip = converted.tip("refs/tags/v1.0");
        let commit = converted.commit(tag_tip);
        assert_eq!(commit.rev, 2);
        let parent = converted.commit(commit.parents[0]);
        assert_eq!(parent.branch_path, b"trunk");
    }
}

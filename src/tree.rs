use std::collections::BTreeMap;

/// Property set attached to a file or directory.
pub(crate) type PropSet = BTreeMap<Vec<u8>, Vec<u8>>;

pub(crate) type DirId = u32;
pub(crate) type PropsId = u32;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Entry {
    Dir(DirId),
    File(FileEntry),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct FileEntry {
    pub(crate) blob: gix_hash::ObjectId,
    pub(crate) executable: bool,
    pub(crate) symlink: bool,
    pub(crate) props: PropsId,
}

impl Entry {
    #[inline]
    pub(crate) fn is_dir(&self) -> bool {
        matches!(self, Entry::Dir(_))
    }
}

// Directory nodes live in one arena and are addressed by id. A node with
// id below the seal watermark belongs to a closed snapshot and is
// immutable; mutations path-copy from the working root down. Children are
// shared by id, which is what makes subtree copies O(1).
struct DirNode {
    entries: Vec<(Vec<u8>, Entry)>,
    props: PropsId,
}

impl DirNode {
    fn find(&self, name: &[u8]) -> Result<usize, usize> {
        self.entries.binary_search_by(|(n, _)| n.as_slice().cmp(name))
    }
}

#[derive(Debug)]
pub(crate) enum TreeError {
    NotFound { path: Vec<u8> },
    ParentNotFound { path: Vec<u8> },
    AlreadyExists { path: Vec<u8> },
    NotADirectory { path: Vec<u8> },
    NotAFile { path: Vec<u8> },
    UnknownRevision { rev: u64 },
    EmptyPathComponent { path: Vec<u8> },
}

impl std::fmt::Display for TreeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::NotFound { ref path } => {
                write!(f, "path \"{}\" does not exist", path.escape_ascii())
            }
            Self::ParentNotFound { ref path } => {
                write!(f, "parent of \"{}\" does not exist", path.escape_ascii())
            }
            Self::AlreadyExists { ref path } => {
                write!(f, "path \"{}\" already exists", path.escape_ascii())
            }
            Self::NotADirectory { ref path } => {
                write!(f, "path \"{}\" is not a directory", path.escape_ascii())
            }
            Self::NotAFile { ref path } => {
                write!(f, "path \"{}\" is not a file", path.escape_ascii())
            }
            Self::UnknownRevision { rev } => write!(f, "no snapshot at or below r{rev}"),
            Self::EmptyPathComponent { ref path } => {
                write!(f, "path \"{}\" has an empty component", path.escape_ascii())
            }
        }
    }
}

pub(crate) const EMPTY_PROPS: PropsId = 0;

/// The whole repository history: one closed snapshot per loaded revision
/// plus the snapshot under construction. Nodes are never freed; they stay
/// reachable from copyfrom edges for the lifetime of the conversion.
pub(crate) struct RevTree {
    dirs: Vec<DirNode>,
    props: Vec<PropSet>,
    /// `(rev, root)` per closed revision, ascending.
    closed: Vec<(u64, DirId)>,
    /// Ids below this are part of a closed snapshot.
    seal_mark: usize,
    work_root: Option<DirId>,
    work_rev: u64,
}

impl RevTree {
    pub(crate) fn new() -> Self {
        Self {
            dirs: Vec::new(),
            props: vec![PropSet::new()],
            closed: Vec::new(),
            seal_mark: 0,
            work_root: None,
            work_rev: 0,
        }
    }

    pub(crate) fn intern_props(&mut self, props: PropSet) -> PropsId {
        if props.is_empty() {
            return EMPTY_PROPS;
        }
        let id = PropsId::try_from(self.props.len()).expect("property arena overflow");
        self.props.push(props);
        id
    }

    #[inline]
    pub(crate) fn props(&self, id: PropsId) -> &PropSet {
        &self.props[id as usize]
    }

    #[inline]
    pub(crate) fn head_rev(&self) -> Option<u64> {
        self.closed.last().map(|&(rev, _)| rev)
    }

    /// Opens the snapshot for `rev`. The previous snapshot's tree is
    /// shared; nothing is copied until a path is touched.
    pub(crate) fn begin_rev(&mut self, rev: u64) {
        assert!(self.work_root.is_none(), "snapshot already open");
        assert!(
            self.closed.last().map_or(true, |&(last, _)| rev > last),
            "revisions must be strictly increasing",
        );

        let root = match self.closed.last() {
            Some(&(_, prev_root)) => self.clone_node(prev_root),
            None => self.new_dir(EMPTY_PROPS),
        };
        self.work_root = Some(root);
        self.work_rev = rev;
    }

    /// Closes the snapshot under construction; it becomes immutable and
    /// addressable by its revision number.
    pub(crate) fn commit_rev(&mut self) {
        let root = self.work_root.take().expect("no snapshot open");
        self.closed.push((self.work_rev, root));
        self.seal_mark = self.dirs.len();
    }

    fn new_dir(&mut self, props: PropsId) -> DirId {
        let id = DirId::try_from(self.dirs.len()).expect("directory arena overflow");
        self.dirs.push(DirNode {
            entries: Vec::new(),
            props,
        });
        id
    }

    fn clone_node(&mut self, id: DirId) -> DirId {
        let node = &self.dirs[id as usize];
        let copy = DirNode {
            entries: node.entries.clone(),
            props: node.props,
        };
        let new_id = DirId::try_from(self.dirs.len()).expect("directory arena overflow");
        self.dirs.push(copy);
        new_id
    }

    fn root_at(&self, rev: u64) -> Result<DirId, TreeError> {
        // gaps resolve downward to the nearest closed revision
        let i = self.closed.partition_point(|&(r, _)| r <= rev);
        if i == 0 {
            return Err(TreeError::UnknownRevision { rev });
        }
        Ok(self.closed[i - 1].1)
    }

    fn resolve_from(&self, root: DirId, path: &[u8]) -> Option<Entry> {
        let mut cur = Entry::Dir(root);
        if path.is_empty() {
            return Some(cur);
        }
        for component in path.split(|&c| c == b'/') {
            let Entry::Dir(dir_id) = cur else {
                return None;
            };
            let node = &self.dirs[dir_id as usize];
            let i = node.find(component).ok()?;
            cur = node.entries[i].1;
        }
        Some(cur)
    }

    /// Looks a path up in a closed snapshot.
    pub(crate) fn get(&self, rev: u64, path: &[u8]) -> Result<Option<Entry>, TreeError> {
        let root = self.root_at(rev)?;
        Ok(self.resolve_from(root, path))
    }

    /// Looks a path up in the snapshot under construction.
    pub(crate) fn get_work(&self, path: &[u8]) -> Option<Entry> {
        let root = self.work_root.expect("no snapshot open");
        self.resolve_from(root, path)
    }

    /// Walks to the parent of `path` making every node on the way mutable,
    /// and returns the parent's id plus the leaf name.
    fn mutable_parent<'p>(&mut self, path: &'p [u8]) -> Result<(DirId, &'p [u8]), TreeError> {
        if path.is_empty() {
            return Err(TreeError::EmptyPathComponent { path: path.to_vec() });
        }

        let mut components = path.split(|&c| c == b'/');
        let leaf = components.next_back().unwrap();
        if leaf.is_empty() {
            return Err(TreeError::EmptyPathComponent { path: path.to_vec() });
        }

        let mut cur = self.work_root.expect("no snapshot open");
        debug_assert!((cur as usize) >= self.seal_mark, "working root is sealed");

        for component in components {
            if component.is_empty() {
                return Err(TreeError::EmptyPathComponent { path: path.to_vec() });
            }

            let node = &self.dirs[cur as usize];
            let i = node
                .find(component)
                .map_err(|_| TreeError::ParentNotFound { path: path.to_vec() })?;
            let child = match node.entries[i].1 {
                Entry::Dir(child) => child,
                Entry::File(_) => {
                    return Err(TreeError::NotADirectory {
                        path: path[..(path.len() - leaf.len() - 1)].to_vec(),
                    });
                }
            };

            if (child as usize) < self.seal_mark {
                let unsealed = self.clone_node(child);
                self.dirs[cur as usize].entries[i].1 = Entry::Dir(unsealed);
                cur = unsealed;
            } else {
                cur = child;
            }
        }

        Ok((cur, leaf))
    }

    /// Inserts a new entry. The parent must exist, the target must not.
    pub(crate) fn add(&mut self, path: &[u8], entry: Entry) -> Result<(), TreeError> {
        let (parent, leaf) = self.mutable_parent(path)?;
        let node = &mut self.dirs[parent as usize];
        match node.find(leaf) {
            Ok(_) => Err(TreeError::AlreadyExists { path: path.to_vec() }),
            Err(i) => {
                node.entries.insert(i, (leaf.to_vec(), entry));
                Ok(())
            }
        }
    }

    /// Creates an empty directory and returns its id.
    pub(crate) fn add_dir(&mut self, path: &[u8], props: PropsId) -> Result<DirId, TreeError> {
        let dir = self.new_dir(props);
        self.add(path, Entry::Dir(dir))?;
        Ok(dir)
    }

    /// Removes an entry and returns it (a removed directory entry still
    /// references the detached subtree, which diffing walks).
    pub(crate) fn delete(&mut self, path: &[u8]) -> Result<Entry, TreeError> {
        let (parent, leaf) = self.mutable_parent(path)?;
        let node = &mut self.dirs[parent as usize];
        match node.find(leaf) {
            Ok(i) => Ok(node.entries.remove(i).1),
            Err(_) => Err(TreeError::NotFound { path: path.to_vec() }),
        }
    }

    /// Replaces the entry for an existing file.
    pub(crate) fn change_file(&mut self, path: &[u8], file: FileEntry) -> Result<(), TreeError> {
        let (parent, leaf) = self.mutable_parent(path)?;
        let node = &mut self.dirs[parent as usize];
        let i = node
            .find(leaf)
            .map_err(|_| TreeError::NotFound { path: path.to_vec() })?;
        match node.entries[i].1 {
            Entry::File(_) => {
                node.entries[i].1 = Entry::File(file);
                Ok(())
            }
            Entry::Dir(_) => Err(TreeError::NotAFile { path: path.to_vec() }),
        }
    }

    /// Replaces the properties of an existing directory, making it mutable.
    pub(crate) fn change_dir_props(
        &mut self,
        path: &[u8],
        props: PropsId,
    ) -> Result<(), TreeError> {
        let dir = self.mutable_dir(path)?;
        self.dirs[dir as usize].props = props;
        Ok(())
    }

    fn mutable_dir(&mut self, path: &[u8]) -> Result<DirId, TreeError> {
        if path.is_empty() {
            return Ok(self.work_root.expect("no snapshot open"));
        }
        let (parent, leaf) = self.mutable_parent(path)?;
        let node = &self.dirs[parent as usize];
        let i = node
            .find(leaf)
            .map_err(|_| TreeError::NotFound { path: path.to_vec() })?;
        match node.entries[i].1 {
            Entry::Dir(child) => {
                if (child as usize) < self.seal_mark {
                    let unsealed = self.clone_node(child);
                    self.dirs[parent as usize].entries[i].1 = Entry::Dir(unsealed);
                    Ok(unsealed)
                } else {
                    Ok(child)
                }
            }
            Entry::File(_) => Err(TreeError::NotADirectory { path: path.to_vec() }),
        }
    }

    /// Installs a structural reference to `(src_rev, src_path)` at
    /// `dst_path`. O(1) for directories: the historic subtree is shared.
    pub(crate) fn copy(
        &mut self,
        src_rev: u64,
        src_path: &[u8],
        dst_path: &[u8],
    ) -> Result<Entry, TreeError> {
        let src_root = self.root_at(src_rev)?;
        let src_entry =
            self.resolve_from(src_root, src_path)
                .ok_or_else(|| TreeError::NotFound {
                    path: src_path.to_vec(),
                })?;
        // The copy target must diverge from the source when modified, so
        // directories get a fresh (unsealed) root node; everything below
        // stays shared and path-copies on demand.
        let entry = match src_entry {
            Entry::Dir(src_dir) => Entry::Dir(self.clone_node(src_dir)),
            file @ Entry::File(_) => file,
        };
        self.add(dst_path, entry)?;
        Ok(entry)
    }

    #[inline]
    pub(crate) fn dir_props(&self, dir: DirId) -> &PropSet {
        &self.props[self.dirs[dir as usize].props as usize]
    }

    #[inline]
    pub(crate) fn dir_props_id(&self, dir: DirId) -> PropsId {
        self.dirs[dir as usize].props
    }

    pub(crate) fn dir_entries(&self, dir: DirId) -> impl Iterator<Item = (&[u8], Entry)> {
        self.dirs[dir as usize]
            .entries
            .iter()
            .map(|(name, entry)| (name.as_slice(), *entry))
    }

    /// Depth-first walk of every file under `entry`, `prefix`-qualified.
    /// `prefix` is the path of `entry` itself (empty for a tree root).
    pub(crate) fn walk_files(
        &self,
        prefix: &[u8],
        entry: Entry,
        cb: &mut dyn FnMut(&[u8], &FileEntry),
    ) {
        match entry {
            Entry::File(ref file) => cb(prefix, file),
            Entry::Dir(dir) => {
                for (name, child) in self.dirs[dir as usize].entries.iter() {
                    let child_path = concat_path(prefix, name);
                    self.walk_files(&child_path, *child, cb);
                }
            }
        }
    }

}

pub(crate) fn concat_path(a: &[u8], b: &[u8]) -> Vec<u8> {
    debug_assert!(!b.is_empty());
    debug_assert!(!a.ends_with(b"/") && !a.starts_with(b"/"));
    debug_assert!(!b.ends_with(b"/") && !b.starts_with(b"/"));

    if a.is_empty() {
        b.to_vec()
    } else {
        let mut r = Vec::with_capacity(a.len() + 1 + b.len());
        r.extend(a);
        r.push(b'/');
        r.extend(b);
        r
    }
}

pub(crate) fn parent_dir(path: &[u8]) -> &[u8] {
    match path.iter().rposition(|&c| c == b'/') {
        Some(sep) => &path[..sep],
        None => b"",
    }
}

pub(crate) fn file_name(path: &[u8]) -> &[u8] {
    match path.iter().rposition(|&c| c == b'/') {
        Some(sep) => &path[(sep + 1)..],
        None => path,
    }
}

#[cfg(test)]
mod tests {
    use super::{concat_path, Entry, FileEntry, RevTree, TreeError, EMPTY_PROPS};

    fn file(marker: u8) -> FileEntry {
        let mut raw = [0u8; 20];
        raw[0] = marker;
        FileEntry {
            blob: gix_hash::ObjectId::from_bytes_or_panic(&raw),
            executable: false,
            symlink: false,
            props: EMPTY_PROPS,
        }
    }

    #[test]
    fn add_get_delete() {
        let mut tree = RevTree::new();
        tree.begin_rev(1);
        tree.add_dir(b"trunk", EMPTY_PROPS).unwrap();
        tree.add(b"trunk/a.txt", Entry::File(file(1))).unwrap();
        tree.commit_rev();

        assert!(matches!(
            tree.get(1, b"trunk/a.txt").unwrap(),
            Some(Entry::File(f)) if f == file(1)
        ));
        assert!(tree.get(1, b"trunk/missing").unwrap().is_none());

        tree.begin_rev(2);
        let deleted = tree.delete(b"trunk/a.txt").unwrap();
        assert!(matches!(deleted, Entry::File(_)));
        tree.commit_rev();

        // the old snapshot still has the file
        assert!(tree.get(1, b"trunk/a.txt").unwrap().is_some());
        assert!(tree.get(2, b"trunk/a.txt").unwrap().is_none());
    }

    #[test]
    fn add_requires_parent_and_absence() {
        let mut tree = RevTree::new();
        tree.begin_rev(1);
        assert!(matches!(
            tree.add(b"missing/a", Entry::File(file(1))),
            Err(TreeError::ParentNotFound { .. })
        ));
        tree.add_dir(b"d", EMPTY_PROPS).unwrap();
        tree.add(b"d/a", Entry::File(file(1))).unwrap();
        assert!(matches!(
            tree.add(b"d/a", Entry::File(file(2))),
            Err(TreeError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn snapshot_gaps_resolve_downward() {
        let mut tree = RevTree::new();
        tree.begin_rev(2);
        tree.add_dir(b"trunk", EMPTY_PROPS).unwrap();
        tree.commit_rev();
        tree.begin_rev(7);
        tree.add_dir(b"branches", EMPTY_PROPS).unwrap();
        tree.commit_rev();

        assert!(tree.get(5, b"trunk").unwrap().is_some());
        assert!(tree.get(5, b"branches").unwrap().is_none());
        assert!(matches!(
            tree.get(1, b"trunk"),
            Err(TreeError::UnknownRevision { rev: 1 })
        ));
    }

    #[test]
    fn copy_shares_subtree_and_diverges_on_write() {
        let mut tree = RevTree::new();
        tree.begin_rev(1);
        tree.add_dir(b"trunk", EMPTY_PROPS).unwrap();
        tree.add_dir(b"trunk/sub", EMPTY_PROPS).unwrap();
        tree.add(b"trunk/sub/f", Entry::File(file(1))).unwrap();
        tree.add_dir(b"branches", EMPTY_PROPS).unwrap();
        tree.commit_rev();

        tree.begin_rev(2);
        tree.copy(1, b"trunk", b"branches/feat").unwrap();
        tree.commit_rev();

        assert!(tree.get(2, b"branches/feat/sub/f").unwrap().is_some());

        // modify the copy, the source must not change
        tree.begin_rev(3);
        tree.change_file(b"branches/feat/sub/f", file(2)).unwrap();
        tree.commit_rev();

        assert!(matches!(
            tree.get(3, b"trunk/sub/f").unwrap(),
            Some(Entry::File(f)) if f == file(1)
        ));
        assert!(matches!(
            tree.get(3, b"branches/feat/sub/f").unwrap(),
            Some(Entry::File(f)) if f == file(2)
        ));
    }

    #[test]
    fn closed_snapshots_are_untouched_by_later_writes() {
        let mut tree = RevTree::new();
        tree.begin_rev(1);
        tree.add_dir(b"d", EMPTY_PROPS).unwrap();
        tree.add(b"d/f", Entry::File(file(1))).unwrap();
        tree.commit_rev();

        for rev in 2..20 {
            tree.begin_rev(rev);
            tree.change_file(b"d/f", file(rev as u8)).unwrap();
            tree.commit_rev();
        }

        for rev in 1..20 {
            assert!(matches!(
                tree.get(rev, b"d/f").unwrap(),
                Some(Entry::File(f)) if f == file(rev as u8)
            ));
        }
    }

    #[test]
    fn walk_files_visits_every_file() {
        let mut tree = RevTree::new();
        tree.begin_rev(1);
        tree.add_dir(b"a", EMPTY_PROPS).unwrap();
        tree.add_dir(b"a/b", EMPTY_PROPS).unwrap();
        tree.add(b"a/f1", Entry::File(file(1))).unwrap();
        tree.add(b"a/b/f2", Entry::File(file(2))).unwrap();
        tree.commit_rev();

        let root = tree.get(1, b"a").unwrap().unwrap();

        let mut seen = Vec::new();
        tree.walk_files(b"a", root, &mut |path, _| seen.push(path.to_vec()));
        seen.sort();
        assert_eq!(seen, [b"a/b/f2".to_vec(), b"a/f1".to_vec()]);
    }

    #[test]
    fn concat_path_edge_cases() {
        assert_eq!(concat_path(b"", b"a"), b"a");
        assert_eq!(concat_path(b"a/b", b"c"), b"a/b/c");
    }
}

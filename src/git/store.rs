use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{Read as _, Write as _};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use gix_hash::ObjectId;

use super::ObjectStore;

#[derive(Debug)]
pub(crate) enum StoreError {
    CreateDir {
        path: PathBuf,
        error: std::io::Error,
    },
    CreateFile {
        path: PathBuf,
        error: std::io::Error,
    },
    WriteFile {
        path: PathBuf,
        error: std::io::Error,
    },
    ReadFile {
        path: PathBuf,
        error: std::io::Error,
    },
    Rename {
        source_path: PathBuf,
        dest_path: PathBuf,
        error: std::io::Error,
    },
    TargetNotEmpty {
        path: PathBuf,
    },
    TargetNotARepository {
        path: PathBuf,
    },
    ObjectNotFound {
        id: ObjectId,
    },
    CorruptObject {
        id: ObjectId,
    },
    UnexpectedObjectKind {
        id: ObjectId,
        kind: gix_object::Kind,
    },
    Hashing,
}

impl std::error::Error for StoreError {}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::CreateDir {
                ref path,
                ref error,
            } => write!(f, "failed to create directory {path:?}: {error}"),
            Self::CreateFile {
                ref path,
                ref error,
            } => write!(f, "failed to create file {path:?}: {error}"),
            Self::WriteFile {
                ref path,
                ref error,
            } => write!(f, "failed to write file {path:?}: {error}"),
            Self::ReadFile {
                ref path,
                ref error,
            } => write!(f, "failed to read file {path:?}: {error}"),
            Self::Rename {
                ref source_path,
                ref dest_path,
                ref error,
            } => write!(
                f,
                "failed to rename {source_path:?} to {dest_path:?}: {error}"
            ),
            Self::TargetNotEmpty { ref path } => {
                write!(f, "target {path:?} exists and is not empty")
            }
            Self::TargetNotARepository { ref path } => {
                write!(f, "target {path:?} is not a bare git repository")
            }
            Self::ObjectNotFound { id } => write!(f, "object {id} not found"),
            Self::CorruptObject { id } => write!(f, "object {id} is corrupt"),
            Self::UnexpectedObjectKind { id, kind } => {
                write!(f, "object {id} is a {kind}")
            }
            Self::Hashing => write!(f, "SHA-1 collision attack detected"),
        }
    }
}

struct WriteJob {
    id: ObjectId,
    kind: gix_object::Kind,
    data: Arc<Vec<u8>>,
}

struct Shared {
    objects_dir: PathBuf,
    /// Blobs handed to the writer pool but not yet durable; the read
    /// path consults this before touching the disk.
    in_flight: Mutex<HashMap<ObjectId, Arc<Vec<u8>>>>,
    write_error: Mutex<Option<StoreError>>,
}

/// Writes a bare repository with loose objects. Object ids are computed
/// on the calling thread (results never depend on scheduling). Blob
/// compression and disk writes run on a fixed worker pool; all tree
/// writes go through one dedicated writer thread, so the same tree
/// object is never written concurrently; commits are written directly
/// on the thread that produced them (the per-branch commit workers).
pub(crate) struct LooseStore {
    path: PathBuf,
    shared: Arc<Shared>,
    seen: Mutex<HashSet<ObjectId>>,
    blob_sender: Option<crossbeam_channel::Sender<WriteJob>>,
    tree_sender: Option<crossbeam_channel::Sender<WriteJob>>,
    workers: Vec<std::thread::JoinHandle<()>>,
    empty_tree_id: ObjectId,
    existing_refs: BTreeMap<String, ObjectId>,
}

const WRITE_QUEUE_DEPTH: usize = 256;

impl LooseStore {
    /// Creates a fresh bare repository at `path`, or opens an existing
    /// one when `allow_existing` (its refs become [`Self::existing_refs`]).
    pub(crate) fn init(
        path: &Path,
        blob_workers: usize,
        allow_existing: bool,
    ) -> Result<Self, StoreError> {
        let existing_refs = match std::fs::metadata(path) {
            Ok(meta) if meta.is_dir() => {
                if !allow_existing && std::fs::read_dir(path).map_or(false, |mut d| d.next().is_some())
                {
                    return Err(StoreError::TargetNotEmpty {
                        path: path.to_path_buf(),
                    });
                }
                if allow_existing {
                    if !path.join("objects").is_dir() {
                        return Err(StoreError::TargetNotARepository {
                            path: path.to_path_buf(),
                        });
                    }
                    read_refs(path)?
                } else {
                    init_repo_layout(path)?;
                    BTreeMap::new()
                }
            }
            _ => {
                init_repo_layout(path)?;
                BTreeMap::new()
            }
        };

        let shared = Arc::new(Shared {
            objects_dir: path.join("objects"),
            in_flight: Mutex::new(HashMap::new()),
            write_error: Mutex::new(None),
        });

        let (blob_sender, blob_receiver) =
            crossbeam_channel::bounded::<WriteJob>(WRITE_QUEUE_DEPTH);
        let (tree_sender, tree_receiver) =
            crossbeam_channel::bounded::<WriteJob>(WRITE_QUEUE_DEPTH);

        let mut handles = Vec::with_capacity(blob_workers.max(1) + 1);
        for i in 0..blob_workers.max(1) {
            handles.push(spawn_writer(
                format!("blob writer {i}"),
                shared.clone(),
                blob_receiver.clone(),
            ));
        }
        drop(blob_receiver);
        handles.push(spawn_writer(
            "tree writer".to_string(),
            shared.clone(),
            tree_receiver,
        ));

        let empty_tree_id = hash_object(gix_object::Kind::Tree, b"")?;
        let store = Self {
            path: path.to_path_buf(),
            shared,
            seen: Mutex::new(HashSet::new()),
            blob_sender: Some(blob_sender),
            tree_sender: Some(tree_sender),
            workers: handles,
            empty_tree_id,
            existing_refs,
        };
        // the empty tree is referenced by empty branch roots
        store.put_raw(gix_object::Kind::Tree, Vec::new())?;

        Ok(store)
    }

    #[inline]
    pub(crate) fn existing_refs(&self) -> &BTreeMap<String, ObjectId> {
        &self.existing_refs
    }

    fn put_raw(&self, kind: gix_object::Kind, data: Vec<u8>) -> Result<ObjectId, StoreError> {
        self.check_write_error()?;

        let id = hash_object(kind, &data)?;
        if !self.seen.lock().unwrap().insert(id) {
            return Ok(id);
        }

        match kind {
            gix_object::Kind::Blob => {
                // blobs may be read back (delta sources); keep them
                // available until the pool has persisted them
                let payload = Arc::new(data);
                self.shared
                    .in_flight
                    .lock()
                    .unwrap()
                    .insert(id, payload.clone());

                self.blob_sender
                    .as_ref()
                    .expect("store already finished")
                    .send(WriteJob {
                        id,
                        kind,
                        data: payload,
                    })
                    .expect("writer pool is gone");
            }
            gix_object::Kind::Tree => {
                self.tree_sender
                    .as_ref()
                    .expect("store already finished")
                    .send(WriteJob {
                        id,
                        kind,
                        data: Arc::new(data),
                    })
                    .expect("tree writer is gone");
            }
            gix_object::Kind::Commit | gix_object::Kind::Tag => {
                // written on the producing thread; commit workers are
                // already parallel per branch
                write_loose(
                    &self.shared.objects_dir,
                    &WriteJob {
                        id,
                        kind,
                        data: Arc::new(data),
                    },
                )?;
            }
        }

        Ok(id)
    }

    fn put_serialized(&self, object: &impl gix_object::WriteTo) -> Result<ObjectId, StoreError> {
        let mut data = Vec::new();
        object
            .write_to(&mut data)
            .expect("in-memory serialization cannot fail");
        self.put_raw(object.kind(), data)
    }

    fn check_write_error(&self) -> Result<(), StoreError> {
        let mut slot = self.shared.write_error.lock().unwrap();
        match slot.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Drains the writer threads, then writes `HEAD` and `packed-refs`.
    pub(crate) fn finish(
        mut self,
        head_ref: &str,
        refs: &BTreeMap<String, ObjectId>,
    ) -> Result<(), StoreError> {
        drop(self.blob_sender.take());
        drop(self.tree_sender.take());
        for handle in self.workers.drain(..) {
            if let Err(e) = handle.join() {
                std::panic::resume_unwind(e);
            }
        }
        self.check_write_error()?;

        let head_path = self.path.join("HEAD");
        write_file(&head_path, format!("ref: {head_ref}\n").as_bytes(), true)?;

        let mut packed = Vec::<u8>::new();
        packed.extend(b"# pack-refs with: peeled fully-peeled sorted \n");
        for (name, id) in refs.iter() {
            packed.extend(format!("{id} {name}\n").as_bytes());
        }
        write_file(&self.path.join("packed-refs"), &packed, true)?;

        // loose refs from a previous run would shadow the packed ones
        for name in refs.keys() {
            let loose = self.path.join(name);
            if loose.is_file() {
                let _ = std::fs::remove_file(loose);
            }
        }

        Ok(())
    }

    /// Tears the writer threads down without finalizing refs.
    pub(crate) fn abort(mut self) {
        drop(self.blob_sender.take());
        drop(self.tree_sender.take());
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for LooseStore {
    fn drop(&mut self) {
        drop(self.blob_sender.take());
        drop(self.tree_sender.take());
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl ObjectStore for LooseStore {
    fn put_blob(&self, data: Vec<u8>) -> Result<ObjectId, StoreError> {
        self.put_raw(gix_object::Kind::Blob, data)
    }

    fn put_tree(&self, tree: &gix_object::Tree) -> Result<ObjectId, StoreError> {
        self.put_serialized(tree)
    }

    fn put_commit(&self, commit: &gix_object::Commit) -> Result<ObjectId, StoreError> {
        self.put_serialized(commit)
    }

    fn get_blob(&self, id: ObjectId) -> Result<Vec<u8>, StoreError> {
        if let Some(data) = self.shared.in_flight.lock().unwrap().get(&id) {
            return Ok((**data).clone());
        }

        let (kind, data) = read_loose(&self.shared.objects_dir, id)?;
        if kind != gix_object::Kind::Blob {
            return Err(StoreError::UnexpectedObjectKind { id, kind });
        }
        Ok(data)
    }

    #[inline]
    fn empty_tree_id(&self) -> ObjectId {
        self.empty_tree_id
    }
}

fn spawn_writer(
    name: String,
    shared: Arc<Shared>,
    receiver: crossbeam_channel::Receiver<WriteJob>,
) -> std::thread::JoinHandle<()> {
    std::thread::Builder::new()
        .name(name)
        .spawn(move || {
            while let Ok(job) = receiver.recv() {
                if let Err(e) = write_loose(&shared.objects_dir, &job) {
                    let mut slot = shared.write_error.lock().unwrap();
                    slot.get_or_insert(e);
                }
                shared.in_flight.lock().unwrap().remove(&job.id);
            }
        })
        .expect("failed to spawn thread")
}

fn hash_object(kind: gix_object::Kind, data: &[u8]) -> Result<ObjectId, StoreError> {
    Ok(gix_object::compute_hash(gix_hash::Kind::Sha1, kind, data))
}

fn loose_path(objects_dir: &Path, id: ObjectId) -> PathBuf {
    let hex = id.to_string();
    objects_dir.join(&hex[..2]).join(&hex[2..])
}

fn write_loose(objects_dir: &Path, job: &WriteJob) -> Result<(), StoreError> {
    let final_path = loose_path(objects_dir, job.id);
    if final_path.is_file() {
        return Ok(());
    }

    let fan_out_dir = final_path.parent().unwrap();
    match std::fs::create_dir(fan_out_dir) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
        Err(e) => {
            return Err(StoreError::CreateDir {
                path: fan_out_dir.to_path_buf(),
                error: e,
            });
        }
    }

    // unique temp name per object id; concurrent writers of the same id
    // settle by rename
    let tmp_path = fan_out_dir.join(format!("tmp_{}", job.id));
    let file = std::fs::OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(&tmp_path)
        .map_err(|e| StoreError::CreateFile {
            path: tmp_path.clone(),
            error: e,
        })?;

    let mut encoder = flate2::write::ZlibEncoder::new(file, flate2::Compression::default());
    let header = format!("{} {}\0", kind_str(job.kind), job.data.len());
    encoder
        .write_all(header.as_bytes())
        .and_then(|()| encoder.write_all(&job.data))
        .and_then(|()| encoder.finish().map(drop))
        .map_err(|e| StoreError::WriteFile {
            path: tmp_path.clone(),
            error: e,
        })?;

    std::fs::rename(&tmp_path, &final_path).map_err(|e| StoreError::Rename {
        source_path: tmp_path,
        dest_path: final_path,
        error: e,
    })
}

fn read_loose(objects_dir: &Path, id: ObjectId) -> Result<(gix_object::Kind, Vec<u8>), StoreError> {
    let path = loose_path(objects_dir, id);
    let file = std::fs::OpenOptions::new()
        .read(true)
        .open(&path)
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::ObjectNotFound { id }
            } else {
                StoreError::ReadFile {
                    path: path.clone(),
                    error: e,
                }
            }
        })?;

    let mut raw = Vec::new();
    flate2::read::ZlibDecoder::new(file)
        .read_to_end(&mut raw)
        .map_err(|e| StoreError::ReadFile {
            path: path.clone(),
            error: e,
        })?;

    let header_end = raw
        .iter()
        .position(|&c| c == 0)
        .ok_or(StoreError::CorruptObject { id })?;
    let header = &raw[..header_end];
    let space = header
        .iter()
        .position(|&c| c == b' ')
        .ok_or(StoreError::CorruptObject { id })?;
    let kind = gix_object::Kind::from_bytes(&header[..space])
        .map_err(|_| StoreError::CorruptObject { id })?;

    Ok((kind, raw[(header_end + 1)..].to_vec()))
}

fn kind_str(kind: gix_object::Kind) -> &'static str {
    match kind {
        gix_object::Kind::Blob => "blob",
        gix_object::Kind::Tree => "tree",
        gix_object::Kind::Commit => "commit",
        gix_object::Kind::Tag => "tag",
    }
}

fn init_repo_layout(path: &Path) -> Result<(), StoreError> {
    create_dir_all(path)?;

    let objects = path.join("objects");
    create_dir(&objects)?;
    create_dir(objects.join("info"))?;
    create_dir(objects.join("pack"))?;

    let refs = path.join("refs");
    create_dir(&refs)?;
    create_dir(refs.join("heads"))?;
    create_dir(refs.join("tags"))?;

    let config = b"[core]\n\trepositoryformatversion = 0\n\tfilemode = true\n\tbare = true\n";
    write_file(&path.join("config"), config, false)?;
    write_file(&path.join("HEAD"), b"ref: refs/heads/main\n", false)?;

    Ok(())
}

/// packed-refs plus loose refs of an existing repository.
fn read_refs(path: &Path) -> Result<BTreeMap<String, ObjectId>, StoreError> {
    let mut refs = BTreeMap::new();

    let packed_path = path.join("packed-refs");
    if let Ok(contents) = std::fs::read(&packed_path) {
        for line in contents.split(|&c| c == b'\n') {
            if line.is_empty() || line.starts_with(b"#") || line.starts_with(b"^") {
                continue;
            }
            let Some(space) = line.iter().position(|&c| c == b' ') else {
                continue;
            };
            if let Ok(id) = ObjectId::from_hex(&line[..space]) {
                refs.insert(
                    String::from_utf8_lossy(&line[(space + 1)..]).into_owned(),
                    id,
                );
            }
        }
    }

    let refs_root = path.join("refs");
    let mut queue = vec![refs_root.clone()];
    while let Some(dir) = queue.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let entry_path = entry.path();
            if entry_path.is_dir() {
                queue.push(entry_path);
            } else if let Ok(contents) = std::fs::read(&entry_path) {
                let text = contents.strip_suffix(b"\n").unwrap_or(&contents);
                if let Ok(id) = ObjectId::from_hex(text) {
                    let name = entry_path
                        .strip_prefix(path)
                        .unwrap_or(&entry_path)
                        .to_string_lossy()
                        .replace('\\', "/");
                    refs.insert(name, id);
                }
            }
        }
    }

    Ok(refs)
}

fn create_dir(path: impl AsRef<Path> + Into<PathBuf>) -> Result<(), StoreError> {
    std::fs::create_dir(path.as_ref()).map_err(|e| StoreError::CreateDir {
        path: path.into(),
        error: e,
    })
}

fn create_dir_all(path: impl AsRef<Path> + Into<PathBuf>) -> Result<(), StoreError> {
    std::fs::create_dir_all(path.as_ref()).map_err(|e| StoreError::CreateDir {
        path: path.into(),
        error: e,
    })
}

fn write_file(path: &Path, data: &[u8], overwrite: bool) -> Result<(), StoreError> {
    let mut opts = std::fs::OpenOptions::new();
    if overwrite {
        opts.create(true).truncate(true);
    } else {
        opts.create_new(true);
    }
    opts.write(true)
        .open(path)
        .and_then(|mut file| {
            file.write_all(data)?;
            file.flush()?;
            Ok(())
        })
        .map_err(|e| StoreError::CreateFile {
            path: path.to_path_buf(),
            error: e,
        })
}

/// Object store without a repository behind it, used when a run only
/// inspects the converted tree (`--extract-file`, `--compare-to` loads)
/// and in tests. Ids are identical to what [`LooseStore`] would produce.
pub(crate) struct MemoryStore {
    objects: Mutex<HashMap<ObjectId, Arc<Vec<u8>>>>,
    empty_tree_id: ObjectId,
}

impl MemoryStore {
    pub(crate) fn new() -> Self {
        let empty_tree_id = hash_object(gix_object::Kind::Tree, b"")
            .expect("hashing an empty tree cannot fail");
        Self {
            objects: Mutex::new(HashMap::new()),
            empty_tree_id,
        }
    }

    fn put_raw(&self, kind: gix_object::Kind, data: Vec<u8>) -> Result<ObjectId, StoreError> {
        let id = hash_object(kind, &data)?;
        self.objects
            .lock()
            .unwrap()
            .entry(id)
            .or_insert_with(|| Arc::new(data));
        Ok(id)
    }

    /// Raw serialized form of any stored object.
    pub(crate) fn get_raw(&self, id: ObjectId) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(&id)
            .map(|data| (**data).clone())
    }
}

impl ObjectStore for MemoryStore {
    fn put_blob(&self, data: Vec<u8>) -> Result<ObjectId, StoreError> {
        self.put_raw(gix_object::Kind::Blob, data)
    }

    fn put_tree(&self, tree: &gix_object::Tree) -> Result<ObjectId, StoreError> {
        let mut data = Vec::new();
        gix_object::WriteTo::write_to(tree, &mut data)
            .expect("in-memory serialization cannot fail");
        self.put_raw(gix_object::Kind::Tree, data)
    }

    fn put_commit(&self, commit: &gix_object::Commit) -> Result<ObjectId, StoreError> {
        let mut data = Vec::new();
        gix_object::WriteTo::write_to(commit, &mut data)
            .expect("in-memory serialization cannot fail");
        self.put_raw(gix_object::Kind::Commit, data)
    }

    fn get_blob(&self, id: ObjectId) -> Result<Vec<u8>, StoreError> {
        self.objects
            .lock()
            .unwrap()
            .get(&id)
            .map(|data| (**data).clone())
            .ok_or(StoreError::ObjectNotFound { id })
    }

    #[inline]
    fn empty_tree_id(&self) -> ObjectId {
        self.empty_tree_id
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{LooseStore, ObjectStore};

    #[test]
    fn blob_roundtrip_and_known_id() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("repo");
        let store = LooseStore::init(&target, 2, false).unwrap();

        let id = store.put_blob(b"hello world\n".to_vec()).unwrap();
        // well-known id of "hello world\n"
        assert_eq!(id.to_string(), "3b18e512dba79e4c8300dd08aeb37f8e728b8dad");
        assert_eq!(store.get_blob(id).unwrap(), b"hello world\n");

        store.finish("refs/heads/main", &BTreeMap::new()).unwrap();

        // the object is durable and readable after finish
        let reopened = LooseStore::init(&target, 1, true).unwrap();
        assert_eq!(reopened.get_blob(id).unwrap(), b"hello world\n");
        reopened.abort();
    }

    #[test]
    fn identical_blobs_share_an_object() {
        let dir = tempfile::tempdir().unwrap();
        let store = LooseStore::init(&dir.path().join("repo"), 2, false).unwrap();

        let a = store.put_blob(b"same".to_vec()).unwrap();
        let b = store.put_blob(b"same".to_vec()).unwrap();
        assert_eq!(a, b);
        store.abort();
    }

    #[test]
    fn empty_tree_has_wellknown_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = LooseStore::init(&dir.path().join("repo"), 1, false).unwrap();
        assert_eq!(
            store.empty_tree_id().to_string(),
            "4b825dc642cb6eb9a060e54bf8d69288fbee4904",
        );
        store.abort();
    }

    #[test]
    fn finish_writes_packed_refs_and_head() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("repo");
        let store = LooseStore::init(&target, 1, false).unwrap();

        let blob = store.put_blob(b"x".to_vec()).unwrap();
        let mut refs = BTreeMap::new();
        refs.insert("refs/heads/main".to_string(), blob);
        store.finish("refs/heads/main", &refs).unwrap();

        let head = std::fs::read_to_string(target.join("HEAD")).unwrap();
        assert_eq!(head, "ref: refs/heads/main\n");

        let packed = std::fs::read_to_string(target.join("packed-refs")).unwrap();
        assert!(packed.contains(&format!("{blob} refs/heads/main")));

        // reopening surfaces the written refs
        let reopened = LooseStore::init(&target, 1, true).unwrap();
        assert_eq!(
            reopened.existing_refs().get("refs/heads/main"),
            Some(&blob)
        );
        reopened.abort();
    }

    #[test]
    fn refusing_nonempty_non_repo_target() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("junk"), b"x").unwrap();
        assert!(LooseStore::init(dir.path(), 1, false).is_err());
    }
}

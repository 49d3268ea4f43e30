use gix_hash::ObjectId;

pub(crate) mod store;

pub(crate) use store::{LooseStore, MemoryStore, StoreError};

/// The object-store capability the history builder and the commit
/// workers write through (hence `Sync`). The shipped implementation is
/// [`LooseStore`]; anything that can hash and persist git objects (a
/// `git hash-object` subprocess sink, an in-memory store in tests) fits
/// behind this.
pub(crate) trait ObjectStore: Sync {
    fn put_blob(&self, data: Vec<u8>) -> Result<ObjectId, StoreError>;

    fn put_tree(&self, tree: &gix_object::Tree) -> Result<ObjectId, StoreError>;

    fn put_commit(&self, commit: &gix_object::Commit) -> Result<ObjectId, StoreError>;

    /// Content of a previously written blob (delta sources, transforms).
    fn get_blob(&self, id: ObjectId) -> Result<Vec<u8>, StoreError>;

    fn empty_tree_id(&self) -> ObjectId;
}

//! Object-store access for confdraft.

pub mod client;
pub mod memory;
pub mod refs;
pub mod remote_url;
pub mod store;

pub use client::{GitBackend, GitStore};
pub use memory::{MemoryRemote, MemoryStore};
pub use store::{
    CommitObject, Credentials, EntryKind, GitObject, ObjectStore, Signature, StoreBackend,
    TreeEntry,
};

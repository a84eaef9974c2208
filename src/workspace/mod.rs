pub mod store;

pub use store::{DirEntry, EntryKind, FileStore, LocalFileStore};

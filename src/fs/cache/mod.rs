pub use metadata::MetadataCache;
pub use node::CacheNode;
pub use path_cache::{PathCache, PathEntry};
pub use sysinfo::Sysinfo;
pub use tree::{CacheTree, NodeKey};

mod content;
mod metadata;
mod node;
mod path_cache;
mod sysinfo;
mod tree;

pub use engine::{Engine, FileHandle, FilesystemStats};
pub use fileinfo::{FileType, Fileinfo};
pub use handle_flags::HandleFlags;

pub mod cache;
pub mod chunk;
mod engine;
pub mod fileinfo;
mod handle_flags;

//! Metadata and content cache that lets a filesystem driver serve Google Drive files from local
//! state, talking to the drive only when nothing suitable is cached.

pub mod common;
pub mod config;
pub mod error;
pub mod fs;
pub mod google_drive;
pub mod prelude;

#[cfg(test)]
pub mod testing;

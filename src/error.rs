use thiserror::Error;

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Failure kinds surfaced by the engine operations.
///
/// Every kind maps onto the errno a filesystem driver replies with, see [`EngineError::errno`].
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no such file or folder: {0}")]
    NotFound(String),
    #[error("is a folder: {0}")]
    IsADirectory(String),
    #[error("not a folder: {0}")]
    NotADirectory(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("folder is not empty: {0}")]
    DirectoryNotEmpty(String),
    #[error("busy: {0}")]
    Busy(String),
    #[error("local storage failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("out of memory")]
    OutOfMemory,
    #[error("remote transfer failed: {0}")]
    RemoteTransportFailure(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("unknown file handle: {0}")]
    BadHandle(u64),
}

impl EngineError {
    pub fn errno(&self) -> i32 {
        match self {
            EngineError::NotFound(_) => libc::ENOENT,
            EngineError::IsADirectory(_) => libc::EISDIR,
            EngineError::NotADirectory(_) => libc::ENOTDIR,
            EngineError::PermissionDenied(_) => libc::EACCES,
            EngineError::AlreadyExists(_) => libc::EEXIST,
            EngineError::DirectoryNotEmpty(_) => libc::ENOTEMPTY,
            EngineError::Busy(_) => libc::EBUSY,
            EngineError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
            EngineError::OutOfMemory => libc::ENOMEM,
            EngineError::RemoteTransportFailure(_) => libc::EIO,
            EngineError::InvalidArgument(_) => libc::EINVAL,
            EngineError::BadHandle(_) => libc::EBADF,
        }
    }

    pub(crate) fn remote(msg: impl Into<String>) -> Self {
        EngineError::RemoteTransportFailure(msg.into())
    }
}

impl From<std::collections::TryReserveError> for EngineError {
    fn from(_: std::collections::TryReserveError) -> Self {
        EngineError::OutOfMemory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping() {
        assert_eq!(libc::ENOENT, EngineError::NotFound("x".into()).errno());
        assert_eq!(libc::EBUSY, EngineError::Busy("/".into()).errno());
        assert_eq!(libc::ENOMEM, EngineError::OutOfMemory.errno());
        let io = std::io::Error::from_raw_os_error(libc::ENOSPC);
        assert_eq!(libc::ENOSPC, EngineError::from(io).errno());
        let io = std::io::Error::new(std::io::ErrorKind::Other, "no code");
        assert_eq!(libc::EIO, EngineError::from(io).errno());
    }
}

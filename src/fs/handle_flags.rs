use tracing::trace;

use crate::fs::fileinfo::{PERM_READ, PERM_WRITE};

/// The parts of the `open(2)` flags the engine acts on.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct HandleFlags {
    /// Open for reading only.
    o_rdonly: bool,
    /// Open for reading and writing.
    o_rdwr: bool,
    /// Open for writing only.
    o_wronly: bool,
    /// Cut the file to zero length on open.
    o_trunc: bool,
}

impl HandleFlags {
    pub fn read_only() -> Self {
        Self {
            o_rdonly: true,
            ..Default::default()
        }
    }
    pub fn read_write() -> Self {
        Self {
            o_rdwr: true,
            ..Default::default()
        }
    }
    pub fn write_only() -> Self {
        Self {
            o_wronly: true,
            ..Default::default()
        }
    }
    pub fn with_truncate(mut self) -> Self {
        self.o_trunc = true;
        self
    }

    pub fn can_write(&self) -> bool {
        self.o_wronly || self.o_rdwr
    }
    pub fn can_read(&self) -> bool {
        self.o_rdonly || self.o_rdwr
    }
    pub fn truncates(&self) -> bool {
        self.o_trunc && self.can_write()
    }

    /// Permission bits a handle with these flags needs
    pub fn required_permissions(&self) -> u32 {
        let mut bits = 0;
        if self.can_read() {
            bits |= PERM_READ;
        }
        if self.can_write() {
            bits |= PERM_WRITE;
        }
        bits
    }
}

impl From<i32> for HandleFlags {
    fn from(value: i32) -> Self {
        let accmode = value & libc::O_ACCMODE;
        let flags = Self {
            o_rdonly: accmode == libc::O_RDONLY,
            o_rdwr: accmode == libc::O_RDWR,
            o_wronly: accmode == libc::O_WRONLY,
            o_trunc: value & libc::O_TRUNC != 0,
        };
        trace!("flags {:x} -> {:?}", value, flags);
        flags
    }
}

impl From<HandleFlags> for i32 {
    fn from(flags: HandleFlags) -> Self {
        let mut value = if flags.o_rdwr {
            libc::O_RDWR
        } else if flags.o_wronly {
            libc::O_WRONLY
        } else {
            libc::O_RDONLY
        };
        if flags.o_trunc {
            value |= libc::O_TRUNC;
        }
        value
    }
}

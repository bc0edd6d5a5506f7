use std::fmt::{Display, Formatter};

/// Remote identifier of a file or folder.
///
/// Ordering is byte-wise on the identifier string, which is what the cache tree is keyed by.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DriveId(String);

impl DriveId {
    /// Alias the remote accepts for the root folder of the drive
    pub(crate) fn root() -> DriveId {
        DriveId(String::from("root"))
    }
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for DriveId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<DriveId> for String {
    fn from(value: DriveId) -> Self {
        value.0
    }
}
impl From<String> for DriveId {
    fn from(value: String) -> Self {
        DriveId(value)
    }
}
impl From<&str> for DriveId {
    fn from(s: &str) -> Self {
        DriveId(String::from(s))
    }
}
impl From<&DriveId> for DriveId {
    fn from(value: &DriveId) -> Self {
        value.clone()
    }
}
impl AsRef<str> for DriveId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

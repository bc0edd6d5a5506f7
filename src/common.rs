use std::fmt::{Display, Formatter};
use std::ops::Deref;

use crate::prelude::*;

//region DrivePath
/// Absolute, `/` separated path inside the drive, without a trailing slash except for the root.
#[derive(Debug, Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub struct DrivePath(String);

impl DrivePath {
    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// Normalizes `path`, collapsing repeated separators and resolving `.` and `..`.
    pub fn new(path: &str) -> EngineResult<Self> {
        if !path.starts_with('/') {
            return Err(EngineError::InvalidArgument(format!(
                "not an absolute path: {}",
                path
            )));
        }
        let mut components: Vec<&str> = Vec::new();
        for component in path.split('/') {
            match component {
                "" | "." => {}
                ".." => {
                    components.pop();
                }
                name => components.push(name),
            }
        }
        Ok(Self(format!("/{}", components.join("/"))))
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The containing folder, `None` for the root.
    pub fn parent(&self) -> Option<DrivePath> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(0) | None => Some(Self::root()),
            Some(index) => Some(Self(self.0[..index].to_string())),
        }
    }

    /// Last component, empty for the root.
    pub fn basename(&self) -> &str {
        match self.0.rfind('/') {
            Some(index) => &self.0[index + 1..],
            None => &self.0,
        }
    }

    pub fn join(&self, name: &str) -> DrivePath {
        if self.is_root() {
            Self(format!("/{}", name))
        } else {
            Self(format!("{}/{}", self.0, name))
        }
    }
}

impl Deref for DrivePath {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<str> for DrivePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Display for DrivePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
//endregion

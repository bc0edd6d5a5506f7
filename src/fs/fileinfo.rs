use std::fmt::{Display, Formatter};

use google_drive3::chrono::{DateTime, Utc};

use crate::config::AccessMode;
use crate::google_drive::{helpers, DriveId, FileResource};

pub const PERM_READ: u32 = libc::S_IROTH as u32;
pub const PERM_WRITE: u32 = libc::S_IWOTH as u32;
pub const PERM_EXECUTE: u32 = libc::S_IXOTH as u32;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum FileType {
    #[default]
    File,
    Folder,
}

/// Permission bits the mount grants for a kind of file, independent of the remote role.
pub fn system_permissions(file_type: FileType, mode: AccessMode) -> u32 {
    let mut permissions = 0;
    if mode.can_read() {
        permissions |= PERM_READ;
    }
    if mode.can_write() {
        permissions |= PERM_WRITE;
    }
    if file_type == FileType::Folder {
        permissions |= PERM_READ | PERM_EXECUTE;
    }
    permissions
}

/// Metadata of one remote file or folder.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fileinfo {
    pub id: DriveId,
    pub name: String,
    pub file_type: FileType,
    pub mime_type: Option<String>,
    pub size: u64,
    /// `S_IROTH`/`S_IWOTH`/`S_IXOTH` bits derived from the user's role on the file
    pub base_permission: u32,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub accessed: Option<DateTime<Utc>>,
    pub parent_count: u32,
    /// only meaningful for folders
    pub child_count: u32,
    /// timestamps were changed locally and still need to be written back
    pub dirty_metadata: bool,
}

impl Fileinfo {
    pub fn from_resource(file: &FileResource) -> Self {
        let mut info = Fileinfo::default();
        info.apply_resource(file);
        info
    }

    /// Overwrites the fields `file` carries.
    ///
    /// Type and base permission are kept when the resource does not mention them, the child
    /// count is never touched.
    pub fn apply_resource(&mut self, file: &FileResource) {
        if let Some(title) = &file.title {
            self.name = title.clone();
        }
        if let Some(id) = &file.id {
            self.id = DriveId::from(id.as_str());
        }
        self.size = file.file_size.unwrap_or(0);
        if file.mime_type.is_some() {
            self.mime_type = file.mime_type.clone();
            self.file_type = if helpers::is_folder_mime(file.mime_type.as_deref()) {
                FileType::Folder
            } else {
                FileType::File
            };
        }
        if let Some(permission) = &file.user_permission {
            self.base_permission = match permission.role.as_str() {
                "owner" | "writer" => PERM_READ | PERM_WRITE,
                "reader" => PERM_READ,
                _ => 0,
            };
            if self.file_type == FileType::Folder {
                self.base_permission = PERM_READ | PERM_WRITE | PERM_EXECUTE;
            }
        }
        self.created = file.created_date;
        self.modified = file.modified_date;
        self.accessed = file.last_viewed_by_me_date;
        self.parent_count = file.parents.len() as u32;
        self.dirty_metadata = false;
    }

    /// Resets everything, used when a node is evicted.
    pub fn clear(&mut self) {
        *self = Fileinfo::default();
    }

    pub fn is_folder(&self) -> bool {
        self.file_type == FileType::Folder
    }

    /// What this process may actually do with the file
    pub fn effective_permissions(&self, mode: AccessMode) -> u32 {
        system_permissions(self.file_type, mode) & self.base_permission
    }

    pub fn set_access_time(&mut self, time: Option<DateTime<Utc>>) {
        self.accessed = Some(time.unwrap_or_else(Utc::now));
        self.dirty_metadata = true;
    }

    pub fn set_modification_time(&mut self, time: Option<DateTime<Utc>>) {
        self.modified = Some(time.unwrap_or_else(Utc::now));
        self.dirty_metadata = true;
    }
}

impl Display for Fileinfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?} '{}' ({}) size: {} perm: {:o}",
            self.file_type, self.name, self.id, self.size, self.base_permission
        )
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn resource(value: serde_json::Value) -> FileResource {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn roles_map_to_permissions() {
        let reader = Fileinfo::from_resource(&resource(json!({
            "id": "a", "title": "a", "mimeType": "text/plain",
            "userPermission": {"role": "reader"}
        })));
        assert_eq!(PERM_READ, reader.base_permission);
        assert_eq!(PERM_READ, reader.effective_permissions(AccessMode::Write));

        let writer = Fileinfo::from_resource(&resource(json!({
            "id": "b", "title": "b", "mimeType": "text/plain",
            "userPermission": {"role": "writer"}
        })));
        assert_eq!(PERM_READ | PERM_WRITE, writer.effective_permissions(AccessMode::Write));
        assert_eq!(PERM_READ, writer.effective_permissions(AccessMode::Read));
        assert_eq!(0, writer.effective_permissions(AccessMode::Meta));

        let folder = Fileinfo::from_resource(&resource(json!({
            "id": "c", "title": "c", "mimeType": FOLDER,
            "userPermission": {"role": "reader"}
        })));
        assert!(folder.is_folder());
        assert_eq!(
            PERM_READ | PERM_EXECUTE,
            folder.effective_permissions(AccessMode::Meta)
        );
    }

    const FOLDER: &str = helpers::FOLDER_MIME_TYPE;

    #[test]
    fn partial_resources_keep_type_and_permission() {
        let mut info = Fileinfo::from_resource(&resource(json!({
            "id": "a", "title": "a", "mimeType": "text/plain", "fileSize": "10",
            "userPermission": {"role": "owner"}, "parents": [{"id": "p"}]
        })));
        info.child_count = 3;
        info.set_modification_time(None);
        assert!(info.dirty_metadata);

        info.apply_resource(&resource(json!({"id": "a", "title": "renamed", "fileSize": "4"})));

        assert_eq!("renamed", info.name);
        assert_eq!(4, info.size);
        assert_eq!(PERM_READ | PERM_WRITE, info.base_permission);
        assert_eq!(3, info.child_count);
        assert_eq!(0, info.parent_count);
        assert!(!info.dirty_metadata);

        info.clear();
        assert_eq!(Fileinfo::default(), info);
    }
}

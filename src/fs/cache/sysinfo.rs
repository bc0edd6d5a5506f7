use crate::google_drive::{AboutResource, DriveId};

/// Account wide information from the `about` resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sysinfo {
    pub quota_total: u64,
    pub quota_used: u64,
    pub root_id: DriveId,
    /// change cursor at the time this was fetched, newer changes may have moved the quota
    pub next_change_id: u64,
}

impl Sysinfo {
    pub fn from_about(about: &AboutResource) -> Self {
        Self {
            quota_total: about.quota_bytes_total.unwrap_or(0),
            quota_used: about.quota_bytes_used.unwrap_or(0),
            root_id: about
                .root_folder_id
                .as_deref()
                .map(DriveId::from)
                .unwrap_or_else(DriveId::root),
            next_change_id: about.largest_change_id.unwrap_or(0) + 1,
        }
    }

    pub fn quota_free(&self) -> u64 {
        self.quota_total.saturating_sub(self.quota_used)
    }
}

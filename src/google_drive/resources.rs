use anyhow::Context;
use google_drive3::chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::instrument;

use crate::google_drive::helpers;
use crate::google_drive::DriveId;

//region lenient fields
/// The v2 API sends 64 bit integers as strings, older responses used numbers.
fn lenient_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => s.parse().ok(),
        Some(Value::Number(n)) => n.as_u64(),
        _ => None,
    })
}

fn lenient_date<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?
        .as_deref()
        .and_then(helpers::parse_rfc3339))
}
//endregion

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ParentReference {
    pub id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PermissionResource {
    #[serde(default)]
    pub role: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Labels {
    #[serde(default)]
    pub trashed: bool,
}

/// A `files` resource, restricted to the fields the cache asks for.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileResource {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub file_size: Option<u64>,
    #[serde(default)]
    pub user_permission: Option<PermissionResource>,
    #[serde(default, deserialize_with = "lenient_date")]
    pub created_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_date")]
    pub modified_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_date")]
    pub last_viewed_by_me_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub parents: Vec<ParentReference>,
    #[serde(default)]
    pub labels: Option<Labels>,
    #[serde(default)]
    pub md5_checksum: Option<String>,
}

impl FileResource {
    pub fn is_trashed(&self) -> bool {
        self.labels.as_ref().map(|l| l.trashed).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileList {
    #[serde(default)]
    pub items: Vec<FileResource>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AboutResource {
    #[serde(default, deserialize_with = "lenient_u64")]
    pub quota_bytes_total: Option<u64>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub quota_bytes_used: Option<u64>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub largest_change_id: Option<u64>,
    #[serde(default)]
    pub root_folder_id: Option<String>,
}

/// One page of the change feed. Items stay raw so a single bad item does not
/// invalidate the whole page.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePage {
    #[serde(default)]
    pub items: Vec<Value>,
    #[serde(default)]
    pub next_page_token: Option<String>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub largest_change_id: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangeItem {
    file_id: Option<String>,
    #[serde(default)]
    deleted: bool,
    #[serde(default)]
    file: Option<FileResource>,
}

#[derive(Debug)]
pub enum ChangeKind {
    File(FileResource),
    Removed,
}

#[derive(Debug)]
pub struct Change {
    pub id: DriveId,
    pub kind: ChangeKind,
}

impl Change {
    /// Parents named by the changed file, empty for removals
    pub fn parents(&self) -> impl Iterator<Item = DriveId> + '_ {
        let parents: &[ParentReference] = match &self.kind {
            ChangeKind::File(file) => &file.parents,
            ChangeKind::Removed => &[],
        };
        parents.iter().map(|p| DriveId::from(p.id.as_str()))
    }
}

impl TryFrom<Value> for Change {
    type Error = anyhow::Error;
    #[instrument(skip(value))]
    fn try_from(value: Value) -> anyhow::Result<Self> {
        let item: ChangeItem = serde_json::from_value(value).context("malformed change item")?;
        let id = DriveId::from(item.file_id.context("fileId is missing")?);
        let kind = match item.file {
            _ if item.deleted => ChangeKind::Removed,
            Some(file) if file.is_trashed() => ChangeKind::Removed,
            Some(file) => ChangeKind::File(file),
            None => ChangeKind::Removed,
        };
        Ok(Self { id, kind })
    }
}

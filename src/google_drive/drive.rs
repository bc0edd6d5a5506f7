use std::fmt::{Debug, Display};
use std::fs::File;
use std::sync::Arc;

use bytes::Bytes;
use google_drive3::chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use tracing::{debug, instrument, trace, warn};

use crate::google_drive::executor::TransferExecutor;
use crate::google_drive::resources::{AboutResource, Change, ChangePage, FileList, FileResource};
use crate::google_drive::transfer::{Method, TransferRequest, TransferResponse};
use crate::google_drive::{helpers, DriveId};
use crate::prelude::*;

pub(crate) const URL_FILES: &str = "https://www.googleapis.com/drive/v2/files";
pub(crate) const URL_UPLOAD: &str = "https://www.googleapis.com/upload/drive/v2/files";
pub(crate) const URL_ABOUT: &str = "https://www.googleapis.com/drive/v2/about";
pub(crate) const URL_CHANGES: &str = "https://www.googleapis.com/drive/v2/changes";

const FIELDS_FILE: &str = "title,id,mimeType,fileSize,createdDate,modifiedDate,\
                           lastViewedByMeDate,parents(id),userPermission,md5Checksum";
const FIELDS_ABOUT: &str = "quotaBytesTotal,quotaBytesUsed,largestChangeId,rootFolderId";

/// Changes reported by one pass over the change feed.
#[derive(Debug, Default)]
pub struct ChangeFeed {
    pub changes: Vec<Change>,
    /// `None` when no page carried a readable `largestChangeId`
    pub largest_change_id: Option<u64>,
}

/// Typed access to the v2 REST endpoints, every request goes through the retrying executor.
#[derive(Clone)]
pub struct GoogleDrive {
    executor: Arc<TransferExecutor>,
}

fn parse<T: DeserializeOwned>(request: &str, response: &TransferResponse) -> EngineResult<T> {
    serde_json::from_slice(&response.body).map_err(|e| {
        warn!("unreadable response for {}: {}", request, e);
        EngineError::remote(format!("unreadable response for {}: {}", request, e))
    })
}

fn file_url(id: &DriveId) -> String {
    format!("{}/{}", URL_FILES, id)
}

impl GoogleDrive {
    pub fn new(executor: TransferExecutor) -> Self {
        Self {
            executor: Arc::new(executor),
        }
    }

    async fn send(&self, request: TransferRequest) -> EngineResult<TransferResponse> {
        let mut request = request;
        self.executor.execute(&mut request).await
    }
}

//region metadata
impl GoogleDrive {
    #[instrument]
    pub async fn about(&self) -> EngineResult<AboutResource> {
        let request = TransferRequest::get(URL_ABOUT)
            .query("includeSubscribed", "false")
            .query("fields", FIELDS_ABOUT);
        let response = self.send(request).await?;
        parse(URL_ABOUT, &response)
    }

    #[instrument]
    pub async fn get_file(&self, id: &DriveId) -> EngineResult<FileResource> {
        let url = file_url(id);
        let request = TransferRequest::get(&url).query("fields", FIELDS_FILE);
        let response = self.send(request).await?;
        parse(&url, &response)
    }

    /// Every change starting at `start_change_id`, following all pages.
    ///
    /// Items that cannot be read are skipped.
    #[instrument]
    pub async fn changes_since(&self, start_change_id: u64) -> EngineResult<ChangeFeed> {
        let mut feed = ChangeFeed::default();
        let mut page_token: Option<String> = None;
        loop {
            debug!("getting changes since {} page: {:?}", start_change_id, page_token);
            let mut request = TransferRequest::get(URL_CHANGES)
                .query("startChangeId", start_change_id.to_string())
                .query("includeSubscribed", "false");
            if let Some(page_token) = &page_token {
                request = request.query("pageToken", page_token);
            }
            let response = self.send(request).await?;
            let page: ChangePage = parse(URL_CHANGES, &response)?;
            for item in page.items {
                match Change::try_from(item) {
                    Ok(change) => feed.changes.push(change),
                    Err(e) => warn!("skipping change item: {:#}", e),
                }
            }
            if let Some(largest) = page.largest_change_id {
                feed.largest_change_id = Some(feed.largest_change_id.unwrap_or(0).max(largest));
            }
            page_token = page.next_page_token;
            if page_token.is_none() {
                break;
            }
        }
        debug!("received {} changes", feed.changes.len());
        Ok(feed)
    }

    /// Name, id and mime type of every non trashed child of `folder`.
    #[instrument]
    pub async fn list_children(&self, folder: &DriveId) -> EngineResult<Vec<FileResource>> {
        let filter = format!(
            "'{}' in parents and trashed=false",
            helpers::escape_query_value(folder.as_str())
        );
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            debug!("list_children: page_token: {:?}", page_token);
            let mut request = TransferRequest::get(URL_FILES)
                .query("q", &filter)
                .query("fields", "items(title,id,mimeType),nextPageToken");
            if let Some(page_token) = &page_token {
                request = request.query("pageToken", page_token);
            }
            let response = self.send(request).await?;
            let list: FileList = parse(URL_FILES, &response)?;
            trace!("list_children: page with {} items", list.items.len());
            files.extend(list.items);
            page_token = list.next_page_token;
            if page_token.is_none() {
                break;
            }
        }
        Ok(files)
    }

    /// Identifier of the child called `name`, the first match if there are several.
    #[instrument]
    pub async fn child_id(&self, parent: &DriveId, name: &str) -> EngineResult<Option<DriveId>> {
        let filter = format!(
            "'{}' in parents and title = '{}' and trashed = false",
            helpers::escape_query_value(parent.as_str()),
            helpers::escape_query_value(name)
        );
        let request = TransferRequest::get(URL_FILES)
            .query("q", filter)
            .query("fields", "items(id)");
        let response = self.send(request).await?;
        let list: FileList = parse(URL_FILES, &response)?;
        if list.items.len() > 1 {
            warn!("multiple files called '{}' in {}", name, parent);
        }
        Ok(list
            .items
            .into_iter()
            .find_map(|file| file.id)
            .map(DriveId::from))
    }
}
//endregion

//region namespace changes
impl GoogleDrive {
    #[instrument]
    pub async fn create_file(
        &self,
        parent: &DriveId,
        name: &str,
        is_folder: bool,
    ) -> EngineResult<FileResource> {
        let mut body = json!({
            "title": name,
            "parents": [{"id": parent.as_str()}],
        });
        if is_folder {
            body["mimeType"] = Value::from(helpers::FOLDER_MIME_TYPE);
        }
        let request = TransferRequest::new(Method::Post, URL_FILES)
            .query("fields", FIELDS_FILE)
            .json(body);
        let response = self.send(request).await?;
        parse(URL_FILES, &response)
    }

    #[instrument]
    pub async fn trash(&self, id: &DriveId) -> EngineResult<()> {
        let url = format!("{}/trash", file_url(id));
        self.send(TransferRequest::new(Method::Post, url).query("fields", "id"))
            .await?;
        Ok(())
    }

    #[instrument]
    pub async fn add_parent(&self, id: &DriveId, parent: &DriveId) -> EngineResult<()> {
        let url = format!("{}/parents", file_url(id));
        let request = TransferRequest::new(Method::Post, url).json(json!({ "id": parent.as_str() }));
        self.send(request).await?;
        Ok(())
    }

    #[instrument]
    pub async fn remove_parent(&self, id: &DriveId, parent: &DriveId) -> EngineResult<()> {
        let url = format!("{}/parents/{}", file_url(id), parent);
        self.send(TransferRequest::new(Method::Delete, url)).await?;
        Ok(())
    }

    #[instrument]
    pub async fn rename(&self, id: &DriveId, name: &str) -> EngineResult<()> {
        let request = TransferRequest::new(Method::Patch, file_url(id))
            .query("updateViewedDate", "false")
            .query("fields", "title")
            .json(json!({ "title": name }));
        self.send(request).await?;
        Ok(())
    }

    /// Writes title and timestamps, the modification time is only applied when given.
    #[instrument]
    pub async fn patch_metadata(
        &self,
        id: &DriveId,
        title: &str,
        accessed: Option<DateTime<Utc>>,
        modified: Option<DateTime<Utc>>,
    ) -> EngineResult<()> {
        let mut body = Map::new();
        body.insert("title".to_string(), Value::from(title));
        if let Some(accessed) = &accessed {
            body.insert(
                "lastViewedByMeDate".to_string(),
                Value::from(helpers::format_rfc3339(accessed)),
            );
        }
        let mut request = TransferRequest::new(Method::Patch, file_url(id))
            .query("updateViewedDate", "false")
            .query("fields", "id");
        if let Some(modified) = &modified {
            body.insert(
                "modifiedDate".to_string(),
                Value::from(helpers::format_rfc3339(modified)),
            );
            request = request.query("setModifiedDate", "true");
        }
        self.send(request.json(Value::Object(body))).await?;
        Ok(())
    }
}
//endregion

//region content
impl GoogleDrive {
    /// Replaces the whole content of `id`, returns the checksum the remote computed.
    #[instrument(skip(content), fields(len = content.len()))]
    pub async fn upload_content(
        &self,
        id: &DriveId,
        content: Bytes,
        mime_type: Option<&str>,
    ) -> EngineResult<Option<String>> {
        let url = format!("{}/{}", URL_UPLOAD, id);
        let request = TransferRequest::new(Method::Put, &url)
            .query("uploadType", "media")
            .query("fields", "id,md5Checksum")
            .header("Content-Type", helpers::get_upload_mime(mime_type).to_string())
            .bytes(content);
        let response = self.send(request).await?;
        let file: FileResource = parse(&url, &response)?;
        Ok(file.md5_checksum)
    }

    /// Downloads the inclusive byte range `start..=end` into `target`, returns the number of
    /// bytes received which is less than requested near the end of the file.
    #[instrument(skip(target))]
    pub async fn download_range(
        &self,
        id: &DriveId,
        start: u64,
        end: u64,
        target: File,
    ) -> EngineResult<u64> {
        let request = TransferRequest::get(file_url(id))
            .query("alt", "media")
            .query("updateViewedDate", "false")
            .header("Range", format!("bytes={}-{}", start, end))
            .into_file(target);
        let response = self.send(request).await?;
        debug!("received {} bytes for {}..={}", response.received, start, end);
        // a plain 200 carries the whole file, which only lines up with a chunk at offset 0
        let requested = end.saturating_sub(start) + 1;
        if (response.status != 206 && start != 0) || response.received > requested {
            return Err(EngineError::remote(format!(
                "asked for {} bytes at {} of {}, got {} with status {}",
                requested, start, id, response.received, response.status
            )));
        }
        Ok(response.received)
    }
}
//endregion

impl Debug for GoogleDrive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GoogleDrive")
    }
}

impl Display for GoogleDrive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GoogleDrive")
    }
}

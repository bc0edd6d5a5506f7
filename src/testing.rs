//! In-memory stand-in for the drive REST endpoints, used by the tests of every layer.

use std::collections::{BTreeMap, VecDeque};
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use md5::{Digest, Md5};
use serde_json::{json, Value};
use tokio::time::Instant;

use crate::google_drive::helpers::FOLDER_MIME_TYPE;
use crate::google_drive::{
    CredentialProvider, DriveId, HttpTransport, Method, TransferBody, TransferDestination,
    TransferRequest, TransferResponse,
};
use crate::prelude::*;

const PREFIX_FILES: &str = "https://www.googleapis.com/drive/v2/files";
const PREFIX_UPLOAD: &str = "https://www.googleapis.com/upload/drive/v2/files/";
const URL_ABOUT: &str = "https://www.googleapis.com/drive/v2/about";
const URL_CHANGES: &str = "https://www.googleapis.com/drive/v2/changes";
const URL_TOKEN: &str = "https://www.googleapis.com/oauth2/v3/token";
const ROOT_ID: &str = "root-id";
const TOKEN: &str = "valid-token";

#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub json: Value,
    pub form: Vec<(String, String)>,
    pub at: Instant,
}

#[derive(Debug, Clone)]
struct FakeFile {
    id: String,
    title: String,
    mime_type: String,
    content: Vec<u8>,
    parents: Vec<String>,
    trashed: bool,
    role: String,
    modified: Option<String>,
    viewed: Option<String>,
}

impl FakeFile {
    fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME_TYPE
    }

    fn resource(&self) -> Value {
        let mut value = json!({
            "id": self.id,
            "title": self.title,
            "mimeType": self.mime_type,
            "userPermission": {"role": self.role},
            "createdDate": "2023-01-01T00:00:00.000Z",
            "parents": self.parents.iter().map(|p| json!({"id": p})).collect::<Vec<_>>(),
            "labels": {"trashed": self.trashed},
            "md5Checksum": format!("{:x}", Md5::digest(&self.content)),
        });
        if !self.is_folder() {
            value["fileSize"] = Value::from(self.content.len().to_string());
        }
        if let Some(modified) = &self.modified {
            value["modifiedDate"] = Value::from(modified.as_str());
        }
        if let Some(viewed) = &self.viewed {
            value["lastViewedByMeDate"] = Value::from(viewed.as_str());
        }
        value
    }
}

#[derive(Debug)]
struct FakeState {
    files: BTreeMap<String, FakeFile>,
    next_id: usize,
    largest_change_id: u64,
    changes: Vec<(u64, Value)>,
    requests: Vec<Recorded>,
    forced: VecDeque<(u16, String)>,
    forced_for: Vec<(Method, String, u16, String)>,
    ignore_ranges: bool,
    page_size: usize,
    reject_refresh: bool,
    corrupt_checksums: bool,
}

impl FakeState {
    fn record_change(&mut self, id: &str) {
        self.largest_change_id += 1;
        let item = match self.files.get(id) {
            Some(file) => json!({"fileId": id, "deleted": false, "file": file.resource()}),
            None => json!({"fileId": id, "deleted": true}),
        };
        self.changes.push((self.largest_change_id, item));
    }
}

/// Fake drive backend implementing [`HttpTransport`].
#[derive(Debug)]
pub struct FakeDrive {
    state: Mutex<FakeState>,
}

fn response(status: u16, body: Value) -> TransferResponse {
    let body = Bytes::from(body.to_string());
    TransferResponse {
        status,
        received: body.len() as u64,
        body,
    }
}

fn not_found() -> TransferResponse {
    response(404, json!({"error": {"errors": [{"reason": "notFound"}], "code": 404}}))
}

/// Single quoted values of a search query, in order, with escapes removed.
fn quoted_values(q: &str) -> Vec<String> {
    let mut values = Vec::new();
    let mut chars = q.chars();
    while let Some(c) = chars.next() {
        if c != '\'' {
            continue;
        }
        let mut value = String::new();
        while let Some(c) = chars.next() {
            match c {
                '\\' => {
                    if let Some(escaped) = chars.next() {
                        value.push(escaped);
                    }
                }
                '\'' => break,
                _ => value.push(c),
            }
        }
        values.push(value);
    }
    values
}

fn page<T: Clone>(items: &[T], request: &TransferRequest, page_size: usize) -> (Vec<T>, Option<String>) {
    let offset: usize = request
        .query_value("pageToken")
        .and_then(|t| t.parse().ok())
        .unwrap_or(0);
    let end = (offset + page_size).min(items.len());
    let next = (end < items.len()).then(|| end.to_string());
    (items[offset.min(end)..end].to_vec(), next)
}

impl FakeDrive {
    pub fn new() -> Self {
        let mut files = BTreeMap::new();
        files.insert(
            ROOT_ID.to_string(),
            FakeFile {
                id: ROOT_ID.to_string(),
                title: "My Drive".to_string(),
                mime_type: FOLDER_MIME_TYPE.to_string(),
                content: Vec::new(),
                parents: Vec::new(),
                trashed: false,
                role: "owner".to_string(),
                modified: None,
                viewed: None,
            },
        );
        Self {
            state: Mutex::new(FakeState {
                files,
                next_id: 1,
                largest_change_id: 100,
                changes: Vec::new(),
                requests: Vec::new(),
                forced: VecDeque::new(),
                forced_for: Vec::new(),
                ignore_ranges: false,
                page_size: 100,
                reject_refresh: false,
                corrupt_checksums: false,
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn about_url() -> &'static str {
        URL_ABOUT
    }
    pub fn root_id(&self) -> DriveId {
        DriveId::from(ROOT_ID)
    }
    pub fn valid_token(&self) -> String {
        TOKEN.to_string()
    }

    //region setup
    fn insert(&self, parent: &DriveId, name: &str, mime_type: &str, content: &[u8]) -> DriveId {
        let mut state = self.state();
        let id = format!("id-{:04}", state.next_id);
        state.next_id += 1;
        state.files.insert(
            id.clone(),
            FakeFile {
                id: id.clone(),
                title: name.to_string(),
                mime_type: mime_type.to_string(),
                content: content.to_vec(),
                parents: vec![parent.to_string()],
                trashed: false,
                role: "owner".to_string(),
                modified: None,
                viewed: None,
            },
        );
        state.record_change(&id);
        DriveId::from(id)
    }
    pub fn add_file(&self, parent: &DriveId, name: &str, content: &[u8]) -> DriveId {
        self.insert(parent, name, "text/plain", content)
    }
    pub fn add_folder(&self, parent: &DriveId, name: &str) -> DriveId {
        self.insert(parent, name, FOLDER_MIME_TYPE, &[])
    }
    pub fn set_role(&self, id: &DriveId, role: &str) {
        if let Some(file) = self.state().files.get_mut(id.as_str()) {
            file.role = role.to_string();
        }
    }
    pub fn set_page_size(&self, page_size: usize) {
        self.state().page_size = page_size.max(1);
    }
    /// Next request answers with `status` and `body` instead of being served.
    pub fn fail_next(&self, status: u16, body: &str) {
        self.state().forced.push_back((status, body.to_string()));
    }
    /// Next `method` request to a url containing `url_part` answers with `status` and `body`.
    pub fn fail_next_to(&self, method: Method, url_part: &str, status: u16, body: &str) {
        self.state()
            .forced_for
            .push((method, url_part.to_string(), status, body.to_string()));
    }
    /// Media downloads answer 200 with the whole content, whatever range was asked for.
    pub fn ignore_ranges(&self) {
        self.state().ignore_ranges = true;
    }
    pub fn reject_refresh_tokens(&self) {
        self.state().reject_refresh = true;
    }
    /// Uploads answer with a checksum that does not match the stored content.
    pub fn corrupt_checksums(&self) {
        self.state().corrupt_checksums = true;
    }
    /// Appends an item to the change feed verbatim.
    pub fn push_raw_change(&self, item: Value) {
        let mut state = self.state();
        state.largest_change_id += 1;
        let id = state.largest_change_id;
        state.changes.push((id, item));
    }
    //endregion

    //region remote side changes
    pub fn remote_write(&self, id: &DriveId, content: &[u8]) {
        let mut state = self.state();
        if let Some(file) = state.files.get_mut(id.as_str()) {
            file.content = content.to_vec();
        }
        state.record_change(id.as_str());
    }
    pub fn remote_rename(&self, id: &DriveId, title: &str) {
        let mut state = self.state();
        if let Some(file) = state.files.get_mut(id.as_str()) {
            file.title = title.to_string();
        }
        state.record_change(id.as_str());
    }
    pub fn remote_delete(&self, id: &DriveId) {
        let mut state = self.state();
        state.files.remove(id.as_str());
        state.record_change(id.as_str());
    }
    //endregion

    //region inspection
    pub fn content(&self, id: &DriveId) -> Option<Vec<u8>> {
        self.state().files.get(id.as_str()).map(|f| f.content.clone())
    }
    pub fn title(&self, id: &DriveId) -> Option<String> {
        self.state().files.get(id.as_str()).map(|f| f.title.clone())
    }
    pub fn parents(&self, id: &DriveId) -> Vec<String> {
        self.state()
            .files
            .get(id.as_str())
            .map(|f| f.parents.clone())
            .unwrap_or_default()
    }
    pub fn is_trashed(&self, id: &DriveId) -> bool {
        self.state()
            .files
            .get(id.as_str())
            .map(|f| f.trashed)
            .unwrap_or(false)
    }
    pub fn modified_date(&self, id: &DriveId) -> Option<String> {
        self.state()
            .files
            .get(id.as_str())
            .and_then(|f| f.modified.clone())
    }
    pub fn requests(&self) -> Vec<Recorded> {
        self.state().requests.clone()
    }
    pub fn clear_requests(&self) {
        self.state().requests.clear();
    }
    pub fn request_times(&self) -> Vec<Instant> {
        self.state().requests.iter().map(|r| r.at).collect()
    }
    pub fn last_request_to(&self, url_part: &str) -> Option<Recorded> {
        self.state()
            .requests
            .iter()
            .rev()
            .find(|r| r.url.contains(url_part))
            .cloned()
    }
    pub fn count_requests_to(&self, url_part: &str) -> usize {
        self.state()
            .requests
            .iter()
            .filter(|r| r.url.contains(url_part))
            .count()
    }
    /// Requests of `method` whose url contains `url_part`
    pub fn count(&self, method: Method, url_part: &str) -> usize {
        self.state()
            .requests
            .iter()
            .filter(|r| r.method == method && r.url.contains(url_part))
            .count()
    }
    //endregion

    //region serving
    fn serve(&self, request: &TransferRequest) -> Result<TransferResponse> {
        let mut state = self.state();
        let json = match &request.body {
            TransferBody::Json(value) => value.clone(),
            _ => Value::Null,
        };
        let form = match &request.body {
            TransferBody::Form(pairs) => pairs.clone(),
            _ => Vec::new(),
        };
        state.requests.push(Recorded {
            method: request.method,
            url: request.url.clone(),
            query: request.query.clone(),
            headers: request.headers.clone(),
            json: json.clone(),
            form,
            at: Instant::now(),
        });
        let matching = state
            .forced_for
            .iter()
            .position(|(method, part, _, _)| *method == request.method && request.url.contains(part));
        if let Some(index) = matching {
            let (_, _, status, body) = state.forced_for.remove(index);
            let body = Bytes::from(body);
            return Ok(TransferResponse {
                status,
                received: body.len() as u64,
                body,
            });
        }
        if let Some((status, body)) = state.forced.pop_front() {
            let body = Bytes::from(body);
            return Ok(TransferResponse {
                status,
                received: body.len() as u64,
                body,
            });
        }

        if request.url == URL_TOKEN {
            if state.reject_refresh {
                return Ok(response(400, json!({"error": "invalid_grant"})));
            }
            return Ok(response(
                200,
                json!({"access_token": TOKEN, "expires_in": 3600, "token_type": "Bearer"}),
            ));
        }
        let expected = format!("Bearer {}", TOKEN);
        if request.header_value("Authorization") != Some(expected.as_str()) {
            return Ok(response(
                401,
                json!({"error": {"errors": [{"reason": "authError"}], "code": 401}}),
            ));
        }

        if request.url == URL_ABOUT {
            return Ok(response(
                200,
                json!({
                    "quotaBytesTotal": "1073741824",
                    "quotaBytesUsed": "1048576",
                    "largestChangeId": state.largest_change_id.to_string(),
                    "rootFolderId": ROOT_ID,
                }),
            ));
        }
        if request.url == URL_CHANGES {
            let start: u64 = request
                .query_value("startChangeId")
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);
            let items: Vec<Value> = state
                .changes
                .iter()
                .filter(|(id, _)| *id >= start)
                .map(|(_, item)| item.clone())
                .collect();
            let (items, next) = page(&items, request, state.page_size);
            let mut body = json!({
                "items": items,
                "largestChangeId": state.largest_change_id.to_string(),
            });
            if let Some(next) = next {
                body["nextPageToken"] = Value::from(next);
            }
            return Ok(response(200, body));
        }
        if let Some(id) = request.url.strip_prefix(PREFIX_UPLOAD) {
            let TransferBody::Bytes(content) = &request.body else {
                return Ok(response(400, json!({"error": "no content"})));
            };
            let corrupt = state.corrupt_checksums;
            let Some(file) = state.files.get_mut(id) else {
                return Ok(not_found());
            };
            file.content = content.to_vec();
            let mut checksum = format!("{:x}", Md5::digest(&file.content));
            if corrupt {
                checksum = "0".repeat(32);
            }
            let id = id.to_string();
            state.record_change(&id);
            return Ok(response(200, json!({"id": id, "md5Checksum": checksum})));
        }
        let Some(rest) = request.url.strip_prefix(PREFIX_FILES) else {
            return Ok(not_found());
        };
        let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
        match (request.method, segments.as_slice()) {
            (Method::Get, []) => {
                let q = request.query_value("q").unwrap_or_default();
                let values = quoted_values(q);
                let parent = values.first().cloned().unwrap_or_default();
                let title = values.get(1);
                let items: Vec<Value> = state
                    .files
                    .values()
                    .filter(|f| !f.trashed && f.parents.contains(&parent))
                    .filter(|f| title.map(|t| &f.title == t).unwrap_or(true))
                    .map(FakeFile::resource)
                    .collect();
                let (items, next) = page(&items, request, state.page_size);
                let mut body = json!({ "items": items });
                if let Some(next) = next {
                    body["nextPageToken"] = Value::from(next);
                }
                Ok(response(200, body))
            }
            (Method::Post, []) => {
                let id = format!("id-{:04}", state.next_id);
                state.next_id += 1;
                let file = FakeFile {
                    id: id.clone(),
                    title: json["title"].as_str().unwrap_or_default().to_string(),
                    mime_type: json["mimeType"]
                        .as_str()
                        .unwrap_or("application/octet-stream")
                        .to_string(),
                    content: Vec::new(),
                    parents: json["parents"]
                        .as_array()
                        .map(|parents| {
                            parents
                                .iter()
                                .filter_map(|p| p["id"].as_str().map(String::from))
                                .collect()
                        })
                        .unwrap_or_default(),
                    trashed: false,
                    role: "owner".to_string(),
                    modified: None,
                    viewed: None,
                };
                let resource = file.resource();
                state.files.insert(id.clone(), file);
                state.record_change(&id);
                Ok(response(200, resource))
            }
            (Method::Get, [id]) => {
                let Some(file) = state.files.get(*id) else {
                    return Ok(not_found());
                };
                if request.query_value("alt") != Some("media") {
                    return Ok(response(200, file.resource()));
                }
                let range = request
                    .header_value("Range")
                    .and_then(|r| r.strip_prefix("bytes="))
                    .and_then(|r| r.split_once('-'))
                    .and_then(|(a, b)| Some((a.parse::<usize>().ok()?, b.parse::<usize>().ok()?)));
                let len = file.content.len();
                let status = if state.ignore_ranges { 200 } else { 206 };
                let range = range.filter(|_| !state.ignore_ranges);
                let (start, end) = range.unwrap_or((0, len.saturating_sub(1)));
                if start >= len {
                    return Ok(response(416, json!({"error": "range not satisfiable"})));
                }
                let slice = &file.content[start..=end.min(len - 1)];
                let TransferDestination::File(target) = &request.destination else {
                    let body = Bytes::copy_from_slice(slice);
                    return Ok(TransferResponse {
                        status,
                        received: body.len() as u64,
                        body,
                    });
                };
                let mut target = target;
                target.write_all(slice)?;
                Ok(TransferResponse {
                    status,
                    body: Bytes::new(),
                    received: slice.len() as u64,
                })
            }
            (Method::Patch, [id]) => {
                let set_modified = request.query_value("setModifiedDate") == Some("true");
                let Some(file) = state.files.get_mut(*id) else {
                    return Ok(not_found());
                };
                if let Some(title) = json["title"].as_str() {
                    file.title = title.to_string();
                }
                if let Some(viewed) = json["lastViewedByMeDate"].as_str() {
                    file.viewed = Some(viewed.to_string());
                }
                if set_modified {
                    if let Some(modified) = json["modifiedDate"].as_str() {
                        file.modified = Some(modified.to_string());
                    }
                }
                let resource = file.resource();
                state.record_change(id);
                Ok(response(200, resource))
            }
            (Method::Post, [id, "trash"]) => {
                let Some(file) = state.files.get_mut(*id) else {
                    return Ok(not_found());
                };
                file.trashed = true;
                let resource = file.resource();
                state.record_change(id);
                Ok(response(200, resource))
            }
            (Method::Post, [id, "parents"]) => {
                let Some(parent) = json["id"].as_str().map(String::from) else {
                    return Ok(response(400, json!({"error": "no parent id"})));
                };
                let Some(file) = state.files.get_mut(*id) else {
                    return Ok(not_found());
                };
                if !file.parents.contains(&parent) {
                    file.parents.push(parent.clone());
                }
                state.record_change(id);
                Ok(response(200, json!({"id": parent})))
            }
            (Method::Delete, [id, "parents", parent]) => {
                let Some(file) = state.files.get_mut(*id) else {
                    return Ok(not_found());
                };
                if !file.parents.iter().any(|p| p == parent) {
                    return Ok(not_found());
                }
                file.parents.retain(|p| p != parent);
                state.record_change(id);
                Ok(TransferResponse {
                    status: 204,
                    ..Default::default()
                })
            }
            _ => Ok(not_found()),
        }
    }
    //endregion
}

#[async_trait]
impl HttpTransport for FakeDrive {
    async fn execute(&self, request: &TransferRequest) -> Result<TransferResponse> {
        self.serve(request)
    }
}

/// Credential provider with a fixed token, optionally starting out with an expired one.
#[derive(Debug)]
pub struct StaticCredentials {
    token: String,
    expired: AtomicBool,
    refreshes: AtomicUsize,
}

impl StaticCredentials {
    pub fn new(token: String) -> Self {
        Self {
            token,
            expired: AtomicBool::new(false),
            refreshes: AtomicUsize::new(0),
        }
    }
    pub fn expired(token: String) -> Self {
        let credentials = Self::new(token);
        credentials.expired.store(true, Ordering::SeqCst);
        credentials
    }
    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn current_access_token(&self) -> Option<String> {
        if self.expired.load(Ordering::SeqCst) {
            Some("expired-token".to_string())
        } else {
            Some(self.token.clone())
        }
    }

    async fn refresh(&self) -> Result<()> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        self.expired.store(false, Ordering::SeqCst);
        Ok(())
    }
}

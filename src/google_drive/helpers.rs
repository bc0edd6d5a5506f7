use std::str::FromStr;

use google_drive3::chrono::{DateTime, SecondsFormat, Utc};
use mime::Mime;

pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

pub fn is_folder_mime(mime_type: Option<&str>) -> bool {
    mime_type == Some(FOLDER_MIME_TYPE)
}

/// Content type for an upload, falls back to `application/octet-stream` for unknown or
/// unparsable types.
pub fn get_upload_mime(mime_type: Option<&str>) -> Mime {
    mime_type
        .and_then(|m| Mime::from_str(m).ok())
        .unwrap_or(mime::APPLICATION_OCTET_STREAM)
}

pub fn parse_rfc3339(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// RFC 3339 with nanoseconds and a `Z` suffix, the form the API accepts for writes.
pub fn format_rfc3339(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Escapes a value for use inside a single quoted string of a `q` search parameter.
pub fn escape_query_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if c == '\\' || c == '\'' {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

//! Parsing of the server's XML responses and its timestamp wire format.

use std::collections::HashMap;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use crate::error::{Result, SyncError};
use crate::remote::{RemoteHead, RemoteProperties};

/// Timestamp layout used by listings and uploads, in the client's local time.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn format_timestamp(time: DateTime<Utc>) -> String {
    time.with_timezone(&Local).format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(value.trim(), TIMESTAMP_FORMAT) {
        return Local
            .from_local_datetime(&naive)
            .earliest()
            .map(|t| t.with_timezone(&Utc));
    }
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn attributes(method: &'static str, element: &BytesStart) -> Result<HashMap<String, String>> {
    let mut map = HashMap::new();
    for attr in element.attributes() {
        let attr = attr.map_err(|e| SyncError::malformed(method, e))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| SyncError::malformed(method, e))?
            .into_owned();
        map.insert(key, value);
    }
    Ok(map)
}

fn required<'a>(
    method: &'static str,
    attrs: &'a HashMap<String, String>,
    name: &str,
) -> Result<&'a str> {
    attrs
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| SyncError::malformed(method, format!("missing attribute `{name}`")))
}

fn required_number(method: &'static str, attrs: &HashMap<String, String>, name: &str) -> Result<u64> {
    let raw = required(method, attrs, name)?;
    raw.trim()
        .parse()
        .map_err(|_| SyncError::malformed(method, format!("`{name}` is not a number: {raw}")))
}

fn required_time(
    method: &'static str,
    attrs: &HashMap<String, String>,
    name: &str,
) -> Result<DateTime<Utc>> {
    let raw = required(method, attrs, name)?;
    parse_timestamp(raw)
        .ok_or_else(|| SyncError::malformed(method, format!("bad timestamp `{raw}`")))
}

/// Single-value responses are either an XML document whose root holds the
/// value as text, or the bare value.
pub fn parse_scalar(method: &'static str, body: &str) -> Result<String> {
    let body = body.trim();
    if !body.starts_with('<') {
        return Ok(body.to_string());
    }

    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);
    let mut text = String::new();
    loop {
        match reader.read_event() {
            Ok(Event::Text(t)) => {
                text.push_str(&t.unescape().map_err(|e| SyncError::malformed(method, e))?)
            }
            Ok(Event::CData(c)) => text.push_str(&String::from_utf8_lossy(&c.into_inner())),
            Ok(Event::Eof) => break,
            Err(e) => return Err(SyncError::malformed(method, e)),
            _ => {}
        }
    }
    Ok(text.trim().to_string())
}

/// `"false"` (any case) and `"0"` mean failure, anything else success.
pub fn parse_bool(method: &'static str, body: &str) -> Result<bool> {
    let value = parse_scalar(method, body)?;
    Ok(!(value.eq_ignore_ascii_case("false") || value == "0"))
}

/// Parse a `getFileHeadsAsXML` listing: one child element of the root per
/// entry, attributes `id`, `displayName`, `fileName`, `creationTime`.
pub fn parse_heads(body: &str) -> Result<Vec<RemoteHead>> {
    const METHOD: &str = "getFileHeadsAsXML";

    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);
    let mut heads = Vec::new();
    let mut depth = 0usize;

    loop {
        let element = match reader.read_event() {
            Ok(Event::Start(e)) => {
                depth += 1;
                if depth != 2 {
                    continue;
                }
                e
            }
            Ok(Event::Empty(e)) if depth == 1 => e,
            Ok(Event::End(_)) => {
                depth = depth.saturating_sub(1);
                continue;
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(SyncError::malformed(METHOD, e)),
            _ => continue,
        };

        let attrs = attributes(METHOD, &element)?;
        heads.push(RemoteHead {
            id: required_number(METHOD, &attrs, "id")?,
            display_name: required(METHOD, &attrs, "displayName")?.to_string(),
            file_name: required(METHOD, &attrs, "fileName")?.to_string(),
            modified_at: required_time(METHOD, &attrs, "creationTime")?,
        });
    }

    Ok(heads)
}

/// Parse a `getPropertiesAsXML` response: the root element carries all
/// properties as attributes.
pub fn parse_properties(body: &str) -> Result<RemoteProperties> {
    const METHOD: &str = "getPropertiesAsXML";

    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                let attrs = attributes(METHOD, &e)?;
                return Ok(RemoteProperties {
                    id: required_number(METHOD, &attrs, "id")?,
                    file_name: required(METHOD, &attrs, "fileName")?.to_string(),
                    display_name: required(METHOD, &attrs, "displayName")?.to_string(),
                    modified_at: required_time(METHOD, &attrs, "creationTime")?,
                    hash: required(METHOD, &attrs, "hash")?.to_string(),
                    size_in_bytes: required_number(METHOD, &attrs, "sizeInByte")?,
                    directory: required(METHOD, &attrs, "directory")?.to_string(),
                });
            }
            Ok(Event::Eof) => return Err(SyncError::malformed(METHOD, "empty document")),
            Err(e) => return Err(SyncError::malformed(METHOD, e)),
            _ => {}
        }
    }
}

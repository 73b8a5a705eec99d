//! API utility functions
//!
//! Pure, stateless helpers for HTTP request processing, kept apart from
//! services.rs so they can be unit tested on their own.

use std::io;
use std::net::SocketAddr;

use axum::{body::Body, http::HeaderMap};
use futures_util::TryStreamExt;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;

use crate::api::error::ApiError;
use crate::humanize::Ttl;
use crate::ledger::RecordId;

/// Bytes of content inspected when no Content-Type was supplied
pub const SNIFF_LEN: usize = 512;

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";
const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Byte order marks; not covered by `infer`
const TEXT_ENCODINGS: &[(&[u8], &str)] = &[
    (b"\xfe\xff", "text/plain; charset=utf-16be"),
    (b"\xff\xfe", "text/plain; charset=utf-16le"),
    (b"\xef\xbb\xbf", TEXT_CONTENT_TYPE),
];

const HTML_TAGS: &[&[u8]] = &[
    b"<!DOCTYPE HTML",
    b"<HTML",
    b"<HEAD",
    b"<SCRIPT",
    b"<IFRAME",
    b"<H1",
    b"<DIV",
    b"<FONT",
    b"<TABLE",
    b"<A",
    b"<STYLE",
    b"<TITLE",
    b"<B",
    b"<BODY",
    b"<BR",
    b"<P",
    b"<!--",
];

/// Guess a media type from the leading bytes of some content.
///
/// Markup and byte order marks are recognized here, every other format is
/// left to [`infer`]'s magic number matchers. Content with no binary control
/// bytes is reported as UTF-8 text, anything else as
/// `application/octet-stream`.
pub fn sniff_content_type(content: &[u8]) -> &'static str {
    let head = &content[..content.len().min(SNIFF_LEN)];

    let markup = trim_leading_whitespace(head);
    if HTML_TAGS.iter().any(|tag| starts_with_tag(markup, tag)) {
        return "text/html; charset=utf-8";
    }
    if markup.starts_with(b"<?xml") {
        return "text/xml; charset=utf-8";
    }

    if let Some((_, content_type)) = TEXT_ENCODINGS.iter().find(|(bom, _)| head.starts_with(bom)) {
        return *content_type;
    }

    if let Some(kind) = infer::get(head) {
        return kind.mime_type();
    }

    if head.iter().any(|&b| is_binary_byte(b)) {
        FALLBACK_CONTENT_TYPE
    } else {
        TEXT_CONTENT_TYPE
    }
}

fn trim_leading_whitespace(data: &[u8]) -> &[u8] {
    let start = data
        .iter()
        .position(|b| !matches!(b, b'\t' | b'\n' | b'\x0c' | b'\r' | b' '))
        .unwrap_or(data.len());
    &data[start..]
}

/// Case-insensitive tag prefix followed by a space or `>`
fn starts_with_tag(data: &[u8], tag: &[u8]) -> bool {
    if data.len() <= tag.len() || !data[..tag.len()].eq_ignore_ascii_case(tag) {
        return false;
    }
    matches!(data[tag.len()], b' ' | b'>')
}

fn is_binary_byte(b: u8) -> bool {
    matches!(b, 0x00..=0x08 | 0x0b | 0x0e..=0x1a | 0x1c..=0x1f)
}

/// Validate a client-supplied Content-Type, returning its canonical form
pub fn parse_content_type(content_type: &str) -> Result<String, ApiError> {
    let media_type: mime::Mime = content_type.trim().parse().map_err(|_| {
        ApiError::InvalidPayload(format!("invalid Content-Type: {}", content_type))
    })?;
    Ok(media_type.to_string())
}

/// Parse the `expiry` query parameter; absent or empty means "use the default"
pub fn parse_expiry(raw: Option<&str>) -> Result<Option<Ttl>, ApiError> {
    match raw {
        None | Some("") => Ok(None),
        Some(value) => value
            .parse::<Ttl>()
            .map(Some)
            .map_err(|_| ApiError::InvalidExpiry(value.to_string())),
    }
}

/// Turn a download path segment into a record id.
///
/// Everything from the first `.` on is ignored: `3ntyw2hd5ehc.png`,
/// `3ntyw2hd5ehc.tar.gz` and `3ntyw2hd5ehc` name the same record.
pub fn parse_handle(raw: &str) -> Result<RecordId, ApiError> {
    let handle = match raw.find('.') {
        Some(dot) => &raw[..dot],
        None => raw,
    };
    RecordId::from_handle(handle).ok_or_else(|| ApiError::InvalidHandle(raw.to_string()))
}

/// Originating client address: first `X-Forwarded-For` hop, else the peer
pub fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|hop| !hop.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| peer.ip().to_string())
}

pub fn header_str<'a>(headers: &'a HeaderMap, name: impl axum::http::header::AsHeaderName) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// `Content-Disposition` value that asks clients to display the content
/// inline under its original name
pub fn content_disposition(filename: &str) -> String {
    let printable = filename.bytes().all(|b| (0x20..0x7f).contains(&b));
    if printable {
        let escaped = filename.replace('\\', "\\\\").replace('"', "\\\"");
        format!("inline; filename=\"{escaped}\"")
    } else {
        let mut encoded = String::with_capacity(filename.len() * 3);
        for b in filename.bytes() {
            if b.is_ascii_alphanumeric() || b"!#$&+-.^_`|~".contains(&b) {
                encoded.push(char::from(b));
            } else {
                encoded.push_str(&format!("%{b:02X}"));
            }
        }
        format!("inline; filename*=utf-8''{encoded}")
    }
}

/// Inclusive byte range within an object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn content_range(&self, size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, size)
    }
}

/// Interpret a `Range` header against an object of `size` bytes.
///
/// Only a single `bytes=` range is honored; malformed or multi-range
/// headers are ignored and the whole object is served. A well-formed range
/// that does not overlap the object is an error.
pub fn parse_range(header: &str, size: u64) -> Result<Option<ByteRange>, ApiError> {
    let Some(range_set) = header.trim().strip_prefix("bytes=") else {
        return Ok(None);
    };
    if range_set.contains(',') {
        return Ok(None);
    }
    let Some((first, last)) = range_set.split_once('-') else {
        return Ok(None);
    };
    let (first, last) = (first.trim(), last.trim());
    let unsatisfiable = || ApiError::RangeNotSatisfiable(size);

    if first.is_empty() {
        let Ok(suffix) = last.parse::<u64>() else {
            return Ok(None);
        };
        if suffix == 0 || size == 0 {
            return Err(unsatisfiable());
        }
        return Ok(Some(ByteRange {
            start: size.saturating_sub(suffix),
            end: size - 1,
        }));
    }

    let Ok(start) = first.parse::<u64>() else {
        return Ok(None);
    };
    if start >= size {
        return Err(unsatisfiable());
    }
    let end = if last.is_empty() {
        size - 1
    } else {
        let Ok(end) = last.parse::<u64>() else {
            return Ok(None);
        };
        if end < start {
            return Ok(None);
        }
        end.min(size - 1)
    };

    Ok(Some(ByteRange { start, end }))
}

/// Adapt a request body into a byte reader
pub fn body_reader(body: Body) -> impl AsyncRead + Send + Unpin {
    StreamReader::new(body.into_data_stream().map_err(io::Error::other))
}

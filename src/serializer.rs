//! §6 — the `Serializer` contract, with two reference implementations: a
//! native binary form (`PostcardSerializer`) and an HTTP-message form
//! (`HttpMessageSerializer`) that reserializes a [`StorageEntry`] as an
//! HTTP/1.1 message with `hc-*` pseudo-headers, for interop/inspection.

use crate::entry::{HeaderList, StorageEntry};
use crate::error::{CacheError, Result};

/// Turns a [`StorageEntry`] into bytes and back. Implementations used for
/// untrusted/external storage MUST restrict deserialization to the fixed
/// shape below rather than instantiating arbitrary types (§9 design note).
pub trait Serializer: Send + Sync {
    fn serialize(&self, entry: &StorageEntry) -> Result<Vec<u8>>;
    fn deserialize(&self, bytes: &[u8]) -> Result<StorageEntry>;
}

/// Native binary form via `postcard`, the default for same-process storage
/// backends (`MemoryStorage`, `FileStorage`).
#[derive(Debug, Default, Clone, Copy)]
pub struct PostcardSerializer;

impl Serializer for PostcardSerializer {
    fn serialize(&self, entry: &StorageEntry) -> Result<Vec<u8>> {
        postcard::to_allocvec(entry).map_err(|e| CacheError::Serialization(Box::new(e)))
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<StorageEntry> {
        postcard::from_bytes(bytes).map_err(|e| CacheError::Serialization(Box::new(e)))
    }
}

const PSEUDO_SK: &str = "hc-sk";
const PSEUDO_REQ_METHOD: &str = "hc-req-method";
const PSEUDO_REQ_URI: &str = "hc-req-uri";
const PSEUDO_REQ_DATE: &str = "hc-req-date";
const PSEUDO_RESP_DATE: &str = "hc-resp-date";
const PSEUDO_NO_CONTENT: &str = "hc-no-content";
const PSEUDO_REQHDR_PREFIX: &str = "hc-reqhdr-";
const PSEUDO_VARMAP_KEY: &str = "hc-varmap-key";
const PSEUDO_VARMAP_VAL: &str = "hc-varmap-val";
const ESCAPE_PREFIX: &str = "hc-esc-";

fn reason_phrase(status: u16) -> &'static str {
    http::StatusCode::from_u16(status).ok().and_then(|s| s.canonical_reason()).unwrap_or("Unknown")
}

fn write_header_line(out: &mut Vec<u8>, name: &str, value: &str) {
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b": ");
    out.extend_from_slice(value.as_bytes());
    out.extend_from_slice(b"\r\n");
}

fn escaped_name(name: &str) -> String {
    if name.to_ascii_lowercase().starts_with("hc-") {
        format!("{ESCAPE_PREFIX}{name}")
    } else {
        name.to_string()
    }
}

fn unescaped_name(name: &str) -> String {
    if let Some(rest) = strip_prefix_ci(name, ESCAPE_PREFIX) {
        rest.to_string()
    } else {
        name.to_string()
    }
}

fn strip_prefix_ci<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() >= prefix.len() && s[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}

/// Reserializes a [`StorageEntry`] as a standalone HTTP/1.1 message: a
/// status line, a header block carrying both the real response headers
/// (escaped if they happen to collide with our `hc-*` namespace) and the
/// `hc-*` pseudo-headers that carry everything else the entry needs, and
/// finally the raw body (absent when `hc-no-content: true`).
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpMessageSerializer;

impl Serializer for HttpMessageSerializer {
    fn serialize(&self, entry: &StorageEntry) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        out.extend_from_slice(format!("HTTP/1.1 {} {}\r\n", entry.status, reason_phrase(entry.status)).as_bytes());

        for (name, value) in &entry.response_headers {
            write_header_line(&mut out, &escaped_name(name), value);
        }

        write_header_line(&mut out, PSEUDO_SK, &entry.storage_key);
        write_header_line(&mut out, PSEUDO_REQ_METHOD, &entry.request_method);
        write_header_line(&mut out, PSEUDO_REQ_URI, &entry.request_uri);
        write_header_line(&mut out, PSEUDO_REQ_DATE, &entry.request_sent_at.to_string());
        write_header_line(&mut out, PSEUDO_RESP_DATE, &entry.response_received_at.to_string());
        write_header_line(&mut out, PSEUDO_NO_CONTENT, if entry.body.is_none() { "true" } else { "false" });

        for (name, value) in &entry.request_headers {
            write_header_line(&mut out, &format!("{PSEUDO_REQHDR_PREFIX}{}", escaped_name(name)), value);
        }

        if let Some(variants) = &entry.variant_map {
            for (k, v) in variants {
                write_header_line(&mut out, PSEUDO_VARMAP_KEY, k);
                write_header_line(&mut out, PSEUDO_VARMAP_VAL, v);
            }
        }

        out.extend_from_slice(b"\r\n");
        if let Some(body) = &entry.body {
            out.extend_from_slice(body);
        }
        Ok(out)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<StorageEntry> {
        let split_at = find_header_boundary(bytes)
            .ok_or_else(|| CacheError::Serialization(Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, "no header/body boundary"))))?;
        let (head, rest) = bytes.split_at(split_at);
        let body_bytes = &rest[4..];
        let head = std::str::from_utf8(head).map_err(|e| CacheError::Serialization(Box::new(e)))?;

        let mut lines = head.split("\r\n");
        let status_line = lines
            .next()
            .ok_or_else(|| CacheError::Serialization(Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, "missing status line"))))?;
        let status: u16 = status_line
            .splitn(3, ' ')
            .nth(1)
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| CacheError::Serialization(Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, "bad status line"))))?;

        let mut response_headers: HeaderList = Vec::new();
        let mut request_headers: HeaderList = Vec::new();
        let mut varmap_keys: Vec<String> = Vec::new();
        let mut varmap_vals: Vec<String> = Vec::new();
        let mut storage_key = String::new();
        let mut request_method = String::new();
        let mut request_uri = String::new();
        let mut request_sent_at = 0u64;
        let mut response_received_at = 0u64;
        let mut no_content = false;

        for line in lines {
            if line.is_empty() {
                continue;
            }
            let (name, value) = line
                .split_once(": ")
                .ok_or_else(|| CacheError::Serialization(Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, "bad header line"))))?;
            let lower = name.to_ascii_lowercase();
            if let Some(reqhdr) = strip_prefix_ci(&lower, PSEUDO_REQHDR_PREFIX) {
                request_headers.push((unescaped_name(reqhdr), value.to_string()));
                continue;
            }
            match lower.as_str() {
                PSEUDO_SK => storage_key = value.to_string(),
                PSEUDO_REQ_METHOD => request_method = value.to_string(),
                PSEUDO_REQ_URI => request_uri = value.to_string(),
                PSEUDO_REQ_DATE => request_sent_at = value.parse().unwrap_or(0),
                PSEUDO_RESP_DATE => response_received_at = value.parse().unwrap_or(0),
                PSEUDO_NO_CONTENT => no_content = value == "true",
                PSEUDO_VARMAP_KEY => varmap_keys.push(value.to_string()),
                PSEUDO_VARMAP_VAL => varmap_vals.push(value.to_string()),
                _ => response_headers.push((unescaped_name(name), value.to_string())),
            }
        }

        let variant_map = if varmap_keys.is_empty() {
            None
        } else {
            Some(varmap_keys.into_iter().zip(varmap_vals).collect())
        };

        Ok(StorageEntry {
            storage_key,
            request_method,
            request_uri,
            request_headers,
            status,
            response_headers,
            body: if no_content { None } else { Some(body_bytes.to_vec()) },
            request_sent_at,
            response_received_at,
            variant_map,
        })
    }
}

fn find_header_boundary(bytes: &[u8]) -> Option<usize> {
    bytes.windows(4).position(|w| w == b"\r\n\r\n")
}

//! C1 — canonical cache keys from `(host, request)`, and variant keys from
//! request headers against a stored `Vary` list.

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use std::collections::BTreeSet;

use crate::error::{CacheError, Result};

const VARIANT_ENCODE_SET: &AsciiSet =
    &CONTROLS.add(b'{').add(b'}').add(b'&').add(b'=').add(b'%');

/// Minimal view over a request's addressing information, independent of any
/// particular HTTP client crate's request type.
pub trait KeyableRequest {
    /// Request method, e.g. `"GET"`.
    fn method(&self) -> &str;
    /// Request scheme, if the request URI is absolute.
    fn scheme(&self) -> Option<&str>;
    /// Request authority (host[:port]), if the request URI is absolute.
    fn authority(&self) -> Option<&str>;
    /// Request path (including query), always present.
    fn path(&self) -> &str;
    /// Get the first value of a header, case-insensitively.
    fn header(&self, name: &str) -> Option<&str>;
    /// Get every value of a header, in request order, case-insensitively.
    fn header_all(&self, name: &str) -> Vec<&str>;
}

/// Builds the canonical root key for `(host, request)`.
///
/// The resulting URI is: scheme lower-cased, an explicit port for the
/// well-known schemes (80 for `http`, 443 for `https`), no fragment, and a
/// path that defaults to `/`. Fails only when the request carries no usable
/// scheme/authority *and* no usable `host` fallback — callers should treat
/// that as a cache miss (spec §4.1).
pub fn root_key<R: KeyableRequest>(host: &str, request: &R) -> Result<String> {
    let scheme = request.scheme().unwrap_or("http").to_ascii_lowercase();
    let authority = request
        .authority()
        .map(str::to_string)
        .or_else(|| request.header("host").map(str::to_string))
        .unwrap_or_else(|| host.to_string());

    if authority.is_empty() {
        return Err(CacheError::InvalidUri(
            "no authority or Host header available".to_string(),
        ));
    }

    let (host_part, explicit_port) = split_authority(&authority);
    let port = explicit_port.or_else(|| default_port(&scheme));

    let path = {
        let raw = request.path();
        let without_fragment = raw.split('#').next().unwrap_or("");
        if without_fragment.is_empty() || !without_fragment.starts_with('/') {
            format!("/{without_fragment}")
        } else {
            without_fragment.to_string()
        }
    };

    Ok(match port {
        Some(p) => format!("{scheme}://{}:{p}{path}", host_part.to_ascii_lowercase()),
        None => format!("{scheme}://{}{path}", host_part.to_ascii_lowercase()),
    })
}

fn split_authority(authority: &str) -> (&str, Option<u16>) {
    match authority.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) && !port.is_empty() => {
            (host, port.parse().ok())
        }
        _ => (authority, None),
    }
}

fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "http" => Some(80),
        "https" => Some(443),
        _ => None,
    }
}

/// Builds the variant key for `request` given the `Vary` header-name list
/// from a stored response. Header names are lower-cased, sorted, and
/// deduplicated; each header's element values are comma-split, lower-cased
/// (except `User-Agent`, passed through whole, merely lower-cased),
/// percent-encoded, sorted, deduplicated, and comma-joined. The result is
/// wrapped in `{...}`.
pub fn variant_key<R: KeyableRequest>(request: &R, vary_header_names: &[String]) -> String {
    let mut names: BTreeSet<String> =
        vary_header_names.iter().map(|n| n.to_ascii_lowercase()).collect();
    // `*` can't contribute a key; callers should have already treated it as
    // MISMATCH (spec §4.4 rule 3), but be defensive.
    names.remove("*");

    let mut parts = Vec::with_capacity(names.len());
    for name in &names {
        let value_list = header_value_list(request, name);
        parts.push(format!("{name}={value_list}"));
    }
    format!("{{{}}}", parts.join("&"))
}

fn header_value_list<R: KeyableRequest>(request: &R, lower_name: &str) -> String {
    let is_user_agent = lower_name == "user-agent";
    let mut values: BTreeSet<String> = BTreeSet::new();
    for raw in request.header_all(lower_name) {
        if is_user_agent {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                continue;
            }
            let encoded = utf8_percent_encode(&trimmed.to_ascii_lowercase(), VARIANT_ENCODE_SET).to_string();
            values.insert(encoded);
            continue;
        }
        for element in raw.split(',') {
            let element = element.trim();
            if element.is_empty() {
                continue;
            }
            let encoded = utf8_percent_encode(&element.to_ascii_lowercase(), VARIANT_ENCODE_SET).to_string();
            values.insert(encoded);
        }
    }
    values.into_iter().collect::<Vec<_>>().join(",")
}

/// The full storage key for a variant entry: `variantKey + rootKey`.
pub fn variant_entry_key(variant_key: &str, root_key: &str) -> String {
    format!("{variant_key}{root_key}")
}

impl<B> KeyableRequest for http::Request<B> {
    fn method(&self) -> &str {
        self.method().as_str()
    }

    fn scheme(&self) -> Option<&str> {
        self.uri().scheme_str()
    }

    fn authority(&self) -> Option<&str> {
        self.uri().authority().map(http::uri::Authority::as_str)
    }

    fn path(&self) -> &str {
        self.uri().path_and_query().map(http::uri::PathAndQuery::as_str).unwrap_or("/")
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers().get(name).and_then(|v| v.to_str().ok())
    }

    fn header_all(&self, name: &str) -> Vec<&str> {
        self.headers().get_all(name).iter().filter_map(|v| v.to_str().ok()).collect()
    }
}

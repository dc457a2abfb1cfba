//! C2 — parses `Cache-Control` directive lists into typed records (§4.2).

use std::collections::BTreeSet;

/// Parsed `Cache-Control` directives from a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestCacheControl {
    /// `-1` when absent.
    pub max_age: i64,
    /// `None` when absent; `Some(None)` for a bare `max-stale` (any
    /// staleness acceptable); `Some(Some(n))` for `max-stale=n`.
    pub max_stale: Option<Option<i64>>,
    /// `-1` when absent.
    pub min_fresh: i64,
    /// `-1` when absent.
    pub stale_if_error: i64,
    pub no_store: bool,
    pub no_cache: bool,
    pub only_if_cached: bool,
}

impl RequestCacheControl {
    /// `max-stale` was present at all (with or without a value).
    pub fn has_max_stale(&self) -> bool {
        self.max_stale.is_some()
    }

    /// The `max-stale` bound in seconds, or `None` if unbounded (`Some(None)`
    /// case) or absent entirely. Suitability should check [`has_max_stale`]
    /// first to distinguish "absent" from "any".
    pub fn max_stale_seconds(&self) -> Option<i64> {
        self.max_stale.flatten()
    }
}

/// Parsed `Cache-Control` directives from a response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseCacheControl {
    /// `-1` when absent.
    pub max_age: i64,
    /// `-1` when absent.
    pub shared_max_age: i64,
    /// `-1` when absent.
    pub stale_while_revalidate: i64,
    /// `-1` when absent.
    pub stale_if_error: i64,
    pub no_store: bool,
    /// `true` whenever the `no-cache` directive is present, qualified or not.
    pub no_cache: bool,
    /// Field names named by a qualified `no-cache="..."`, lower-cased. Empty
    /// when `no-cache` is absent or present unqualified.
    pub no_cache_fields: BTreeSet<String>,
    pub cache_private: bool,
    pub must_revalidate: bool,
    pub proxy_revalidate: bool,
    pub cache_public: bool,
    pub must_understand: bool,
    pub immutable: bool,
}

struct Directive {
    name: String,
    value: Option<String>,
}

/// Splits a `Cache-Control` header value into `name[=value]` directives,
/// respecting quoted-string commas.
fn tokenize(input: &str) -> Vec<Directive> {
    let mut directives = Vec::new();
    let bytes = input.as_bytes();
    let mut i = 0;
    let mut start = 0;
    let mut in_quotes = false;
    while i < bytes.len() {
        match bytes[i] {
            b'"' => in_quotes = !in_quotes,
            b',' if !in_quotes => {
                push_directive(&mut directives, &input[start..i]);
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    push_directive(&mut directives, &input[start..]);
    directives
}

fn push_directive(out: &mut Vec<Directive>, raw: &str) {
    let raw = raw.trim();
    if raw.is_empty() {
        return;
    }
    match raw.split_once('=') {
        Some((name, value)) => {
            let value = value.trim();
            let value = value.strip_prefix('"').and_then(|v| v.strip_suffix('"')).unwrap_or(value);
            out.push(Directive { name: name.trim().to_ascii_lowercase(), value: Some(value.to_string()) });
        }
        None => out.push(Directive { name: raw.to_ascii_lowercase(), value: None }),
    }
}

/// Parses a signed-seconds directive value; malformed values yield `-1`
/// (absent) per §4.2.
fn parse_seconds(value: Option<&str>) -> i64 {
    match value {
        Some(v) => v.trim().parse::<i64>().ok().filter(|n| *n >= 0).unwrap_or(-1),
        None => -1,
    }
}

fn parse_field_list(value: Option<&str>) -> BTreeSet<String> {
    match value {
        Some(v) => v.split(',').map(|s| s.trim().to_ascii_lowercase()).filter(|s| !s.is_empty()).collect(),
        None => BTreeSet::new(),
    }
}

/// Parses a request's `Cache-Control` header value (may be multiple
/// comma-joined header lines already concatenated by the caller).
pub fn parse_request(header_value: &str) -> RequestCacheControl {
    let mut cc = RequestCacheControl { max_age: -1, min_fresh: -1, stale_if_error: -1, ..Default::default() };
    for d in tokenize(header_value) {
        match d.name.as_str() {
            "max-age" => cc.max_age = parse_seconds(d.value.as_deref()),
            "max-stale" => {
                cc.max_stale = Some(d.value.as_deref().and_then(|v| v.trim().parse::<i64>().ok()))
            }
            "min-fresh" => cc.min_fresh = parse_seconds(d.value.as_deref()),
            "stale-if-error" => cc.stale_if_error = parse_seconds(d.value.as_deref()),
            "no-store" => cc.no_store = true,
            "no-cache" => cc.no_cache = true,
            "only-if-cached" => cc.only_if_cached = true,
            _ => {}
        }
    }
    cc
}

/// Parses a response's `Cache-Control` header value.
pub fn parse_response(header_value: &str) -> ResponseCacheControl {
    let mut cc = ResponseCacheControl {
        max_age: -1,
        shared_max_age: -1,
        stale_while_revalidate: -1,
        stale_if_error: -1,
        ..Default::default()
    };
    for d in tokenize(header_value) {
        match d.name.as_str() {
            "max-age" => cc.max_age = parse_seconds(d.value.as_deref()),
            "s-maxage" => cc.shared_max_age = parse_seconds(d.value.as_deref()),
            "stale-while-revalidate" => cc.stale_while_revalidate = parse_seconds(d.value.as_deref()),
            "stale-if-error" => cc.stale_if_error = parse_seconds(d.value.as_deref()),
            "no-store" => cc.no_store = true,
            "no-cache" => {
                cc.no_cache = true;
                cc.no_cache_fields = parse_field_list(d.value.as_deref());
            }
            "private" => cc.cache_private = true,
            "must-revalidate" => cc.must_revalidate = true,
            "proxy-revalidate" => cc.proxy_revalidate = true,
            "public" => cc.cache_public = true,
            "must-understand" => cc.must_understand = true,
            "immutable" => cc.immutable = true,
            _ => {}
        }
    }
    cc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_response_directives() {
        let cc = parse_response("max-age=600, must-revalidate, ETag-unrelated-token");
        assert_eq!(cc.max_age, 600);
        assert!(cc.must_revalidate);
        assert_eq!(cc.shared_max_age, -1);
    }

    #[test]
    fn malformed_numeric_value_is_absent() {
        let cc = parse_response("max-age=notanumber");
        assert_eq!(cc.max_age, -1);
    }

    #[test]
    fn qualified_no_cache_populates_field_set() {
        let cc = parse_response(r#"no-cache="Set-Cookie, X-Foo""#);
        assert!(cc.no_cache);
        assert!(cc.no_cache_fields.contains("set-cookie"));
        assert!(cc.no_cache_fields.contains("x-foo"));
    }

    #[test]
    fn unqualified_no_cache_has_empty_field_set() {
        let cc = parse_response("no-cache");
        assert!(cc.no_cache);
        assert!(cc.no_cache_fields.is_empty());
    }

    #[test]
    fn bare_max_stale_is_any() {
        let cc = parse_request("max-stale");
        assert!(cc.has_max_stale());
        assert_eq!(cc.max_stale_seconds(), None);
    }

    #[test]
    fn valued_max_stale_has_seconds() {
        let cc = parse_request("max-stale=30");
        assert_eq!(cc.max_stale_seconds(), Some(30));
    }

    #[test]
    fn unknown_directives_are_ignored() {
        let cc = parse_request("foo=bar, no-store");
        assert!(cc.no_store);
    }
}

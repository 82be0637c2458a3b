//! Endpoint pattern matching.
//!
//! Grammar:
//! - `*` matches any request
//! - `METHOD:PATH` requires both a method match (`*` or ASCII
//!   case-insensitive equality) and a path match
//! - `PATH` alone matches on the path only
//!
//! A path pattern matches on ASCII case-insensitive equality, as a prefix when it
//! ends with `/*`, or as a suffix when it starts with `*/`.

const WILDCARD: &str = "*";

/// Check whether a request matches an endpoint pattern.
pub fn endpoint_matches(pattern: &str, method: &str, path: &str) -> bool {
    if pattern == WILDCARD {
        return true;
    }

    match pattern.split_once(':') {
        Some((pattern_method, pattern_path)) => {
            if pattern_method != WILDCARD && !pattern_method.eq_ignore_ascii_case(method) {
                return false;
            }
            path_matches(pattern_path, path)
        }
        None => path_matches(pattern, path),
    }
}

fn path_matches(pattern: &str, path: &str) -> bool {
    if pattern == WILDCARD || pattern.eq_ignore_ascii_case(path) {
        return true;
    }

    if let Some(prefix) = pattern.strip_suffix("/*") {
        return starts_with_ignore_case(path, prefix);
    }

    if let Some(suffix) = pattern.strip_prefix('*') {
        if suffix.starts_with('/') {
            return ends_with_ignore_case(path, suffix);
        }
    }

    false
}

fn starts_with_ignore_case(value: &str, prefix: &str) -> bool {
    value.len() >= prefix.len()
        && value.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}

fn ends_with_ignore_case(value: &str, suffix: &str) -> bool {
    value.len() >= suffix.len()
        && value.as_bytes()[value.len() - suffix.len()..].eq_ignore_ascii_case(suffix.as_bytes())
}

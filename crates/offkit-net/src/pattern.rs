//! URL patterns for allow-lists and prefix routing.

use url::Url;

/// Type of URL pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternType {
    /// Exact URL match.
    Exact,
    /// Prefix match on the full URL string.
    Prefix,
    /// Prefix match on the path only, regardless of origin.
    PathPrefix,
    /// Same scheme, host and port.
    Origin,
}

/// URL pattern for matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlPattern {
    /// Pattern type.
    pub pattern_type: PatternType,
    /// Pattern string.
    pub pattern: String,
}

impl UrlPattern {
    /// Create an exact match pattern.
    pub fn exact(url: &str) -> Self {
        Self {
            pattern_type: PatternType::Exact,
            pattern: url.to_string(),
        }
    }

    /// Create a prefix match pattern (e.g. a CDN library path).
    pub fn prefix(prefix: &str) -> Self {
        Self {
            pattern_type: PatternType::Prefix,
            pattern: prefix.to_string(),
        }
    }

    /// Create a path prefix pattern (e.g. `/api/`).
    pub fn path_prefix(prefix: &str) -> Self {
        let pattern = if prefix.starts_with('/') {
            prefix.to_string()
        } else {
            format!("/{prefix}")
        };
        Self {
            pattern_type: PatternType::PathPrefix,
            pattern,
        }
    }

    /// Create a pattern matching every URL of the given origin.
    pub fn origin(url: &Url) -> Self {
        Self {
            pattern_type: PatternType::Origin,
            pattern: url.origin().ascii_serialization(),
        }
    }

    /// Check if a URL matches this pattern.
    pub fn matches(&self, url: &Url) -> bool {
        match self.pattern_type {
            PatternType::Exact => url.as_str() == self.pattern,
            PatternType::Prefix => url.as_str().starts_with(&self.pattern),
            PatternType::PathPrefix => path_has_prefix(url.path(), &self.pattern),
            PatternType::Origin => url.origin().ascii_serialization() == self.pattern,
        }
    }
}

/// Prefix check that also accepts the prefix without its trailing slash,
/// so `/api` matches the `/api/` prefix.
fn path_has_prefix(path: &str, prefix: &str) -> bool {
    if path.starts_with(prefix) {
        return true;
    }
    match prefix.strip_suffix('/') {
        Some(bare) if !bare.is_empty() => path == bare,
        _ => false,
    }
}

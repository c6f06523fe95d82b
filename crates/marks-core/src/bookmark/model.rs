use crate::error::{MarksError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// A bookmark record as stored by the remote store.
///
/// `id` and `created_at` are always assigned server-side; the client never
/// fabricates them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bookmark {
    pub id: String,
    pub title: String,
    pub url: String,
    /// Stored remotely in the `user_id` column
    #[serde(rename = "user_id")]
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
}

impl Bookmark {
    /// Returns the host part of the bookmark URL, if it has one.
    ///
    /// Used by renderers to label a record (and to look up a favicon).
    pub fn host(&self) -> Option<String> {
        Url::parse(&self.url)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
    }
}

/// Insert-form input fields.
///
/// Holds whatever the user typed; [`BookmarkDraft::validate`] turns it into a
/// `(title, url)` pair ready to be sent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookmarkDraft {
    pub title: String,
    pub url: String,
}

impl BookmarkDraft {
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_empty() && self.url.is_empty()
    }

    pub fn clear(&mut self) {
        self.title.clear();
        self.url.clear();
    }

    /// Checks both fields and returns the trimmed title and normalized url.
    ///
    /// # Errors
    ///
    /// Returns `MarksError::Validation` if either field is blank or the url
    /// cannot be turned into an absolute URL.
    pub fn validate(&self) -> Result<(String, String)> {
        let title = self.title.trim();
        if title.is_empty() {
            return Err(MarksError::validation("title", "title must not be empty"));
        }
        let url = normalize_url(&self.url)?;
        Ok((title.to_string(), url))
    }
}

/// Normalizes user input into an absolute URL.
///
/// Input without a scheme gets `https://` prefixed. Input that already
/// carries a scheme (`http://`, `https://`, `ftp://`, ...) is kept as typed.
///
/// # Errors
///
/// Returns `MarksError::Validation` for blank input or input that is still not
/// an absolute URL after prefixing.
pub fn normalize_url(input: &str) -> Result<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(MarksError::validation("url", "url must not be empty"));
    }

    let candidate = if has_scheme(trimmed) {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };

    match Url::parse(&candidate) {
        Ok(parsed) if parsed.has_host() => Ok(candidate),
        Ok(_) => Err(MarksError::validation(
            "url",
            format!("'{}' has no host", trimmed),
        )),
        Err(e) => Err(MarksError::validation(
            "url",
            format!("'{}' is not a valid URL: {}", trimmed, e),
        )),
    }
}

// `host:port` parses as a scheme in RFC 3986 terms, so only `scheme://` counts.
fn has_scheme(input: &str) -> bool {
    match input.split_once("://") {
        Some((scheme, _)) => {
            let mut chars = scheme.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
                && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_adds_https_prefix() {
        assert_eq!(normalize_url("example.com").unwrap(), "https://example.com");
    }

    #[test]
    fn test_normalize_keeps_existing_scheme() {
        assert_eq!(
            normalize_url("http://example.com/a").unwrap(),
            "http://example.com/a"
        );
        assert_eq!(
            normalize_url("https://example.com").unwrap(),
            "https://example.com"
        );
    }

    #[test]
    fn test_normalize_host_with_port() {
        assert_eq!(
            normalize_url("localhost:3000/docs").unwrap(),
            "https://localhost:3000/docs"
        );
    }

    #[test]
    fn test_normalize_host_starting_with_http() {
        // A bare host that merely begins with "http" still needs a scheme.
        assert_eq!(normalize_url("httpbin.org").unwrap(), "https://httpbin.org");
    }

    #[test]
    fn test_normalize_trims_whitespace() {
        assert_eq!(
            normalize_url("  example.com  ").unwrap(),
            "https://example.com"
        );
    }

    #[test]
    fn test_normalize_rejects_empty() {
        let err = normalize_url("   ").unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_draft_validate_requires_title() {
        let draft = BookmarkDraft::new("", "example.com");
        let err = draft.validate().unwrap_err();
        assert!(matches!(err, MarksError::Validation { ref field, .. } if field == "title"));
    }

    #[test]
    fn test_draft_validate_requires_url() {
        let draft = BookmarkDraft::new("Example", "");
        let err = draft.validate().unwrap_err();
        assert!(matches!(err, MarksError::Validation { ref field, .. } if field == "url"));
    }

    #[test]
    fn test_draft_validate_ok() {
        let draft = BookmarkDraft::new(" Example ", "example.com");
        let (title, url) = draft.validate().unwrap();
        assert_eq!(title, "Example");
        assert_eq!(url, "https://example.com");
    }

    #[test]
    fn test_draft_clear() {
        let mut draft = BookmarkDraft::new("a", "b");
        assert!(!draft.is_empty());
        draft.clear();
        assert!(draft.is_empty());
    }

    #[test]
    fn test_bookmark_host() {
        let bookmark = Bookmark {
            id: "1".to_string(),
            title: "Docs".to_string(),
            url: "https://docs.rs/tokio/latest".to_string(),
            owner_id: "u".to_string(),
            created_at: Utc::now(),
        };
        assert_eq!(bookmark.host().as_deref(), Some("docs.rs"));
    }

    #[test]
    fn test_bookmark_deserializes_user_id_column() {
        let json = r#"{
            "id": "b1",
            "title": "Example",
            "url": "https://example.com",
            "user_id": "owner-1",
            "created_at": "2025-01-02T03:04:05.123456+00:00"
        }"#;
        let bookmark: Bookmark = serde_json::from_str(json).unwrap();
        assert_eq!(bookmark.owner_id, "owner-1");
        assert_eq!(bookmark.id, "b1");
    }
}

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

/// Repo segment used in the canonical key when no repo is given.
pub const DEFAULT_REPO: &str = "profile";
/// Page segment used in the canonical key when no page is given.
pub const DEFAULT_PAGE: &str = "main";

const MAX_COMPONENT_LEN: usize = 100;

/// One countable surface: a profile, a repo, or a page within either.
///
/// Construct through [`CounterTarget::new`], which normalizes the optional
/// parts so the fast cache key and the durable lookup key always agree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CounterTarget {
    username: String,
    repo: Option<String>,
    page_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TargetError {
    #[error("username is required")]
    MissingUsername,
    #[error("{field} exceeds 100 bytes")]
    TooLong { field: &'static str },
    #[error("{field} contains a forbidden character")]
    ForbiddenCharacter { field: &'static str },
}

impl CounterTarget {
    pub fn new(
        username: impl Into<String>,
        repo: Option<&str>,
        page_id: Option<&str>,
    ) -> Result<Self, TargetError> {
        let username = username.into().trim().to_string();
        if username.is_empty() {
            return Err(TargetError::MissingUsername);
        }
        validate_component("username", &username)?;

        let repo = normalize(repo, DEFAULT_REPO);
        if let Some(ref r) = repo {
            validate_component("repo", r)?;
        }

        let page_id = normalize(page_id, DEFAULT_PAGE);
        if let Some(ref p) = page_id {
            validate_component("page", p)?;
        }

        Ok(Self {
            username,
            repo,
            page_id,
        })
    }

    /// Profile counter for a user (no repo, no page).
    pub fn profile(username: impl Into<String>) -> Result<Self, TargetError> {
        Self::new(username, None, None)
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn repo(&self) -> Option<&str> {
        self.repo.as_deref()
    }

    pub fn page_id(&self) -> Option<&str> {
        self.page_id.as_deref()
    }

    /// `username:repo-or-profile:page-or-main`
    pub fn canonical_key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.username,
            self.repo.as_deref().unwrap_or(DEFAULT_REPO),
            self.page_id.as_deref().unwrap_or(DEFAULT_PAGE)
        )
    }

    /// Key of the fast cache entry holding the live count.
    pub fn views_key(&self) -> String {
        format!("views:{}", self.canonical_key())
    }
}

impl fmt::Display for CounterTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical_key())
    }
}

fn normalize(value: Option<&str>, default: &str) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty() && *v != default)
        .map(str::to_string)
}

fn validate_component(field: &'static str, value: &str) -> Result<(), TargetError> {
    if value.len() > MAX_COMPONENT_LEN {
        return Err(TargetError::TooLong { field });
    }
    if value
        .chars()
        .any(|c| c == ':' || c.is_whitespace() || c.is_control())
    {
        return Err(TargetError::ForbiddenCharacter { field });
    }
    Ok(())
}

/// Durable running total for one target.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CounterRecord {
    pub id: i64,
    pub canonical_key: String,
    pub username: String,
    pub repo: Option<String>,
    pub page_id: Option<String>,
    pub total_views: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Views recorded for one counter on one UTC day (`YYYY-MM-DD`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct DailyBucket {
    pub counter_id: i64,
    pub date: String,
    pub views: i64,
}

/// Audit row for a counted view. Holds the visitor hash, never the IP.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ViewLogEntry {
    pub id: i64,
    pub counter_id: i64,
    pub visitor_hash: String,
    pub viewed_at: i64,
}

/// A counter together with the views it received today.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterSummary {
    #[serde(flatten)]
    pub counter: CounterRecord,
    pub today: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_absent_parts_use_defaults() {
        let target = CounterTarget::profile("octocat").unwrap();
        assert_eq!(target.canonical_key(), "octocat:profile:main");
        assert_eq!(target.views_key(), "views:octocat:profile:main");
        assert_eq!(target.repo(), None);
        assert_eq!(target.page_id(), None);
    }

    #[test]
    fn test_default_literals_normalize_to_absent() {
        let implicit = CounterTarget::new("octocat", None, None).unwrap();
        let empty = CounterTarget::new("octocat", Some(""), Some("  ")).unwrap();
        let literal = CounterTarget::new("octocat", Some("profile"), Some("main")).unwrap();

        assert_eq!(implicit, empty);
        assert_eq!(implicit, literal);
        assert_eq!(literal.repo(), None);
        assert_eq!(literal.page_id(), None);
    }

    #[test]
    fn test_canonical_key_is_injective() {
        let triples = [
            ("a", None, None),
            ("a", Some("b"), None),
            ("a", None, Some("b")),
            ("a", Some("b"), Some("c")),
            ("a", Some("c"), Some("b")),
            ("ab", None, None),
            ("a", Some("bc"), None),
            ("b", Some("a"), None),
        ];

        let keys: HashSet<String> = triples
            .iter()
            .map(|(u, r, p)| CounterTarget::new(*u, *r, *p).unwrap().canonical_key())
            .collect();

        assert_eq!(keys.len(), triples.len());
    }

    #[test]
    fn test_rejects_separator_and_empty_username() {
        assert_eq!(
            CounterTarget::profile("   "),
            Err(TargetError::MissingUsername)
        );
        assert_eq!(
            CounterTarget::new("a:b", None, None),
            Err(TargetError::ForbiddenCharacter { field: "username" })
        );
        assert_eq!(
            CounterTarget::new("a", Some("x:y"), None),
            Err(TargetError::ForbiddenCharacter { field: "repo" })
        );
        assert_eq!(
            CounterTarget::new("a", None, Some("has space")),
            Err(TargetError::ForbiddenCharacter { field: "page" })
        );
    }

    #[test]
    fn test_rejects_oversized_component() {
        let long = "x".repeat(101);
        assert_eq!(
            CounterTarget::new("a", Some(&long), None),
            Err(TargetError::TooLong { field: "repo" })
        );
    }
}

//! Validated repository identity.
//!
//! A [`Repo`] is only ever constructed from a remote URL that passed
//! validation: https scheme, a supported provider host, and a path of one
//! or two segments ending in `.git`. Anything else is rejected up front so
//! the rest of the gateway never sees a half-formed repository value.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::RepoError;

/// Provider hosts this gateway will proxy to.
pub const SUPPORTED_HOSTS: &[&str] = &["github.com", "gitlab.com"];

/// Usernames holding permissions on a repository.
///
/// Sets of unique usernames; insertion order is irrelevant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoUsers {
    /// Users allowed to push.
    #[serde(default)]
    pub can_push: BTreeSet<String>,
    /// Users allowed to authorise parked pushes.
    #[serde(default)]
    pub can_authorise: BTreeSet<String>,
}

/// A repository the gateway is willing to front.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repo {
    /// Organization segment, empty for a bare (orgless) repository.
    pub project: String,
    /// Repository name without the `.git` suffix.
    pub name: String,
    /// The validated remote URL.
    pub url: String,
    /// Permission sets.
    #[serde(default)]
    pub users: RepoUsers,
}

impl Repo {
    /// Validate a remote URL and build the repository identity from it.
    pub fn parse(raw: &str) -> Result<Repo, RepoError> {
        let parsed = Url::parse(raw).map_err(|e| RepoError::Malformed {
            url: raw.to_string(),
            details: e.to_string(),
        })?;

        if parsed.scheme() != "https" {
            return Err(RepoError::Scheme {
                scheme: parsed.scheme().to_string(),
                url: raw.to_string(),
            });
        }

        let host = parsed.host_str().ok_or_else(|| RepoError::Malformed {
            url: raw.to_string(),
            details: "missing host".to_string(),
        })?;
        if !SUPPORTED_HOSTS.contains(&host) {
            return Err(RepoError::Host {
                host: host.to_string(),
                url: raw.to_string(),
            });
        }

        if parsed.query().is_some() || parsed.fragment().is_some() {
            return Err(RepoError::Malformed {
                url: raw.to_string(),
                details: "unexpected query or fragment".to_string(),
            });
        }

        let path = parsed.path();
        if path.ends_with('/') {
            return Err(RepoError::Path {
                path: path.to_string(),
            });
        }

        let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
        if segments.is_empty()
            || segments.len() > 2
            || segments.iter().any(|segment| segment.is_empty())
        {
            return Err(RepoError::Path {
                path: path.to_string(),
            });
        }

        let last = segments[segments.len() - 1];
        let name = match last.strip_suffix(".git") {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => {
                return Err(RepoError::Path {
                    path: path.to_string(),
                });
            }
        };

        let project = if segments.len() == 2 {
            segments[0].to_string()
        } else {
            String::new()
        };

        Ok(Repo {
            project,
            name,
            url: raw.to_string(),
            users: RepoUsers::default(),
        })
    }

    /// `<project>/<name>` lowercased, the key other components look up by.
    ///
    /// Bare repositories key by name alone.
    pub fn key(&self) -> String {
        normalize_repo_key(&if self.project.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.project, self.name)
        })
    }

    /// Whether the named user may push to this repository.
    pub fn user_can_push(&self, username: &str) -> bool {
        self.users.can_push.contains(username)
    }

    /// Whether the named user may authorise parked pushes.
    pub fn user_can_authorise(&self, username: &str) -> bool {
        self.users.can_authorise.contains(username)
    }
}

/// Normalize a `<project>/<name>[.git]` path for comparison.
pub fn normalize_repo_key(repo: &str) -> String {
    repo.trim_matches('/')
        .trim_end_matches(".git")
        .to_lowercase()
}

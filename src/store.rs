//! Persistence seams for repositories, users, and parked pushes.
//!
//! The gateway only ever talks to the three traits here, so deployments can
//! bring their own backing store. The bundled [`MemoryStore`] keeps
//! everything in process memory, seeded from the configuration file, which
//! is enough for a single-instance gateway and for tests.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::action::Action;
use crate::config::Config;
use crate::error::GatewayError;
use crate::repo::Repo;

/// A known user of the gateway.
///
/// Produced by the identity collaborator or the configuration file and
/// consumed read-only by the permission checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Identity {
    /// Login name, the key permission sets are kept under.
    pub username: String,
    /// E-mail address pushes are matched against.
    pub email: String,
    /// Account name on the upstream git host, when different.
    #[serde(default)]
    pub git_account: Option<String>,
    /// Whether this user administers the gateway.
    #[serde(default)]
    pub admin: bool,
}

/// Repositories the gateway fronts, keyed by `project/name` (lowercase).
#[async_trait]
pub trait RepoStore: Send + Sync {
    /// Look up a repository by its normalized key.
    async fn get(&self, key: &str) -> Option<Repo>;

    /// Register a repository.
    async fn insert(&self, repo: Repo);

    /// Whether `username` may push to the repository under `key`.
    async fn can_push(&self, key: &str, username: &str) -> bool;

    /// Whether `username` may authorise pushes to the repository under `key`.
    async fn can_authorise(&self, key: &str, username: &str) -> bool;
}

/// Known users, looked up by the e-mail recorded in pushed commits.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Every identity whose e-mail matches, case-insensitively.
    async fn find_by_email(&self, email: &str) -> Vec<Identity>;
}

/// Completed chain runs, archived as push records awaiting authorisation.
#[async_trait]
pub trait PushStore: Send + Sync {
    /// The archived record for a push id, if any.
    async fn get(&self, id: &str) -> Option<Action>;

    /// Archive (or overwrite) the record for this Action.
    async fn save(&self, action: &Action);

    /// Mark the push authorised; a re-push of the same range then passes.
    async fn authorise(&self, id: &str) -> Result<(), GatewayError>;

    /// Mark the push rejected.
    async fn reject(&self, id: &str) -> Result<(), GatewayError>;

    /// Mark the push canceled.
    async fn cancel(&self, id: &str) -> Result<(), GatewayError>;
}

/// In-process store backing all three seams.
///
/// Suitable for a single gateway instance: state does not survive a restart
/// and is not shared across instances.
#[derive(Debug, Default)]
pub struct MemoryStore {
    repos: DashMap<String, Repo>,
    users: Vec<Identity>,
    pushes: DashMap<String, Action>,
}

impl MemoryStore {
    /// Seed repositories and users from the configuration file.
    pub fn from_config(config: &Config) -> Result<MemoryStore, GatewayError> {
        let store = MemoryStore {
            repos: DashMap::new(),
            users: config.users.clone(),
            pushes: DashMap::new(),
        };
        for repo in config.authorised_repos()? {
            store.repos.insert(repo.key(), repo);
        }
        tracing::info!(
            repos = store.repos.len(),
            users = store.users.len(),
            "store seeded from configuration"
        );
        Ok(store)
    }

    fn update_push<F>(&self, id: &str, verb: &str, apply: F) -> Result<(), GatewayError>
    where
        F: FnOnce(&mut Action),
    {
        match self.pushes.get_mut(id) {
            Some(mut entry) => {
                apply(entry.value_mut());
                tracing::info!(push = id, "push {verb}");
                Ok(())
            }
            None => Err(GatewayError::Store {
                details: format!("cannot {verb} unknown push '{id}'"),
            }),
        }
    }
}

#[async_trait]
impl RepoStore for MemoryStore {
    async fn get(&self, key: &str) -> Option<Repo> {
        self.repos.get(key).map(|entry| entry.value().clone())
    }

    async fn insert(&self, repo: Repo) {
        self.repos.insert(repo.key(), repo);
    }

    async fn can_push(&self, key: &str, username: &str) -> bool {
        self.repos
            .get(key)
            .is_some_and(|entry| entry.value().user_can_push(username))
    }

    async fn can_authorise(&self, key: &str, username: &str) -> bool {
        self.repos
            .get(key)
            .is_some_and(|entry| entry.value().user_can_authorise(username))
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_by_email(&self, email: &str) -> Vec<Identity> {
        self.users
            .iter()
            .filter(|user| user.email.eq_ignore_ascii_case(email))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl PushStore for MemoryStore {
    async fn get(&self, id: &str) -> Option<Action> {
        self.pushes.get(id).map(|entry| entry.value().clone())
    }

    async fn save(&self, action: &Action) {
        self.pushes.insert(action.id.clone(), action.clone());
    }

    async fn authorise(&self, id: &str) -> Result<(), GatewayError> {
        self.update_push(id, "authorised", |push| {
            push.authorised = true;
            push.canceled = false;
            push.rejected = false;
        })
    }

    async fn reject(&self, id: &str) -> Result<(), GatewayError> {
        self.update_push(id, "rejected", |push| {
            push.rejected = true;
            push.authorised = false;
        })
    }

    async fn cancel(&self, id: &str) -> Result<(), GatewayError> {
        self.update_push(id, "canceled", |push| {
            push.canceled = true;
            push.authorised = false;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionType;

    fn seeded() -> MemoryStore {
        let raw = r#"{
            "authorisedList": [
                {
                    "url": "https://github.com/finos/git-proxy.git",
                    "users": { "canPush": ["alice"], "canAuthorise": ["bob"] }
                }
            ],
            "users": [
                { "username": "alice", "email": "Alice@Example.com" },
                { "username": "bob", "email": "bob@example.com", "admin": true }
            ]
        }"#;
        let config: Config = serde_json::from_str(raw).unwrap();
        MemoryStore::from_config(&config).unwrap()
    }

    #[tokio::test]
    async fn test_seed_from_config() {
        let store = seeded();
        let repo = RepoStore::get(&store, "finos/git-proxy").await.unwrap();
        assert_eq!(repo.name, "git-proxy");
        assert!(store.can_push("finos/git-proxy", "alice").await);
        assert!(!store.can_push("finos/git-proxy", "bob").await);
        assert!(store.can_authorise("finos/git-proxy", "bob").await);
    }

    #[tokio::test]
    async fn test_find_by_email_is_case_insensitive() {
        let store = seeded();
        let found = store.find_by_email("alice@example.COM").await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].username, "alice");
        assert!(store.find_by_email("nobody@example.com").await.is_empty());
    }

    #[tokio::test]
    async fn test_push_lifecycle() {
        let store = seeded();
        let mut action = Action::new(
            "id",
            ActionType::Push,
            "POST",
            chrono::Utc::now().timestamp_millis(),
            "finos/git-proxy.git",
            "/finos/git-proxy.git/git-receive-pack",
        );
        action.set_commit("a".repeat(40).as_str(), "b".repeat(40).as_str());
        store.save(&action).await;

        let parked = PushStore::get(&store, &action.id).await.unwrap();
        assert!(!parked.authorised);

        store.authorise(&action.id).await.unwrap();
        let authorised = PushStore::get(&store, &action.id).await.unwrap();
        assert!(authorised.authorised);

        store.reject(&action.id).await.unwrap();
        let rejected = PushStore::get(&store, &action.id).await.unwrap();
        assert!(rejected.rejected);
        assert!(!rejected.authorised);
    }

    #[tokio::test]
    async fn test_lifecycle_on_unknown_push_fails() {
        let store = seeded();
        assert!(store.authorise("missing").await.is_err());
        assert!(store.cancel("missing").await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_repo_has_no_permissions() {
        let store = seeded();
        assert!(RepoStore::get(&store, "nope/nothing").await.is_none());
        assert!(!store.can_push("nope/nothing", "alice").await);
    }
}

//! CLI and configuration for the gateway.
//!
//! Runtime flags come from clap (with environment fallbacks); policy rules,
//! the authorised repository list, and operational bounds come from a JSON
//! configuration file. The file is parsed strictly: unknown keys and rules
//! that fail to compile are load-time errors, never runtime surprises.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::GatewayError;
use crate::repo::Repo;
use crate::store::Identity;

/// Command-line interface.
#[derive(Debug, Parser)]
#[command(
    name = "packgate",
    version,
    about = "Transparent intercepting gateway for the git HTTP wire protocol"
)]
pub struct Cli {
    /// Address to listen on.
    #[arg(long, env = "PACKGATE_LISTEN", default_value = "127.0.0.1:8000")]
    pub listen: SocketAddr,

    /// Upstream git host origin, overriding the configuration file.
    #[arg(long, env = "PACKGATE_UPSTREAM")]
    pub upstream: Option<Url>,

    /// Path to the JSON configuration file.
    #[arg(long, env = "PACKGATE_CONFIG", default_value = "packgate.json")]
    pub config: PathBuf,

    /// Emit logs as JSON instead of human-readable lines.
    #[arg(long, env = "PACKGATE_LOG_JSON", default_value_t = false)]
    pub log_json: bool,
}

// ============================================================================
// Configuration file
// ============================================================================

/// An `authorisedList` entry: a repository plus its permission sets.
///
/// `project` and `name`, when present, must agree with what the URL parses
/// to; they exist so configuration files read naturally.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AuthorisedRepo {
    /// Organization segment, optional and checked against the URL.
    #[serde(default)]
    pub project: Option<String>,
    /// Repository name, optional and checked against the URL.
    #[serde(default)]
    pub name: Option<String>,
    /// Remote URL; must validate per [`Repo::parse`].
    pub url: String,
    /// Permission sets for this repository.
    #[serde(default)]
    pub users: crate::repo::RepoUsers,
}

/// Allow rule for the author e-mail domain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DomainRule {
    /// Pattern the domain must match, when set.
    #[serde(default)]
    pub allow: Option<String>,
}

/// Block rule for the author e-mail local part.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LocalRule {
    /// Pattern the local part must not match, when set.
    #[serde(default)]
    pub block: Option<String>,
}

/// Author e-mail rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AuthorEmailConfig {
    #[serde(default)]
    pub domain: DomainRule,
    #[serde(default)]
    pub local: LocalRule,
}

/// Author rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AuthorConfig {
    #[serde(default)]
    pub email: AuthorEmailConfig,
}

/// Blocked commit-message content.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MessageBlock {
    /// Case-insensitive substrings that block a message.
    #[serde(default)]
    pub literals: Vec<String>,
    /// Patterns that block a message.
    #[serde(default)]
    pub patterns: Vec<String>,
}

/// Commit-message rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MessageConfig {
    #[serde(default)]
    pub block: MessageBlock,
}

/// Blocked diff content.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DiffBlock {
    /// Case-insensitive literals that block added lines.
    #[serde(default)]
    pub literals: Vec<String>,
    /// Patterns that block added lines.
    #[serde(default)]
    pub patterns: Vec<String>,
    /// Named secret-provider patterns, skipped for private organizations.
    #[serde(default)]
    pub providers: BTreeMap<String, String>,
}

/// Diff rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DiffConfig {
    #[serde(default)]
    pub block: DiffBlock,
}

/// The full commit/diff policy section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CommitConfig {
    #[serde(default)]
    pub author: AuthorConfig,
    #[serde(default)]
    pub message: MessageConfig,
    #[serde(default)]
    pub diff: DiffConfig,
}

/// Bounds applied to every external process the gateway spawns.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SubprocessConfig {
    /// Wall-clock bound per invocation, as a humantime string.
    #[serde(with = "humantime_duration", default = "default_subprocess_timeout")]
    pub timeout: Duration,
    /// Combined stdout+stderr cap per invocation.
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
}

impl Default for SubprocessConfig {
    fn default() -> Self {
        SubprocessConfig {
            timeout: default_subprocess_timeout(),
            max_output_bytes: default_max_output_bytes(),
        }
    }
}

/// The configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Config {
    /// Upstream git host origin requests are relayed to.
    #[serde(default = "default_proxy_url")]
    pub proxy_url: String,
    /// Repositories the gateway will front, with their permission sets.
    #[serde(default)]
    pub authorised_list: Vec<AuthorisedRepo>,
    /// Known users, looked up by e-mail during permission checks.
    #[serde(default)]
    pub users: Vec<Identity>,
    /// Commit-message, author-e-mail, and diff rules.
    #[serde(default)]
    pub commit_config: CommitConfig,
    /// Organizations whose pushes skip the provider secret patterns.
    #[serde(default)]
    pub private_organizations: Vec<String>,
    /// Plugin module locations: registry names or manifest directories.
    #[serde(default)]
    pub plugins: Vec<String>,
    /// Root under which per-push working clones are created.
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,
    /// Upper bound on a buffered request body.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Subprocess bounds.
    #[serde(default)]
    pub subprocess: SubprocessConfig,
    /// Pre-receive hook script; skipped when the file does not exist.
    #[serde(default = "default_pre_receive_hook")]
    pub pre_receive_hook: PathBuf,
    /// Base URL of the approval UI linked from parked pushes.
    #[serde(default = "default_approval_base_url")]
    pub approval_base_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            proxy_url: default_proxy_url(),
            authorised_list: Vec::new(),
            users: Vec::new(),
            commit_config: CommitConfig::default(),
            private_organizations: Vec::new(),
            plugins: Vec::new(),
            scratch_dir: default_scratch_dir(),
            max_body_bytes: default_max_body_bytes(),
            subprocess: SubprocessConfig::default(),
            pre_receive_hook: default_pre_receive_hook(),
            approval_base_url: default_approval_base_url(),
        }
    }
}

fn default_proxy_url() -> String {
    "https://github.com".to_string()
}

fn default_scratch_dir() -> PathBuf {
    PathBuf::from("./.remote")
}

fn default_max_body_bytes() -> usize {
    256 * 1024 * 1024
}

fn default_subprocess_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_max_output_bytes() -> usize {
    64 * 1024 * 1024
}

fn default_pre_receive_hook() -> PathBuf {
    PathBuf::from("./hooks/pre-receive.sh")
}

fn default_approval_base_url() -> String {
    "http://localhost:8080".to_string()
}

impl Config {
    /// Load and validate the configuration file.
    ///
    /// A missing file yields the defaults so the gateway can boot with
    /// nothing but flags; a present-but-invalid file is a hard error.
    pub fn load(path: &Path) -> Result<Config, GatewayError> {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "configuration file not found, using defaults");
            let config = Config::default();
            config.validate()?;
            return Ok(config);
        }
        let raw = std::fs::read_to_string(path).map_err(|e| GatewayError::Config {
            details: format!("failed to read {}: {e}", path.display()),
        })?;
        let config: Config = serde_json::from_str(&raw).map_err(|e| GatewayError::Config {
            details: format!("failed to parse {}: {e}", path.display()),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check everything that can be checked before serving traffic.
    pub fn validate(&self) -> Result<(), GatewayError> {
        Url::parse(&self.proxy_url).map_err(|e| GatewayError::Config {
            details: format!("proxyUrl '{}' is not a valid URL: {e}", self.proxy_url),
        })?;

        for entry in &self.authorised_list {
            let repo = Repo::parse(&entry.url).map_err(|e| GatewayError::Config {
                details: format!("authorisedList entry '{}': {e}", entry.url),
            })?;
            if let Some(project) = &entry.project {
                if !project.eq_ignore_ascii_case(&repo.project) {
                    return Err(GatewayError::Config {
                        details: format!(
                            "authorisedList entry '{}': project '{}' does not match URL",
                            entry.url, project
                        ),
                    });
                }
            }
            if let Some(name) = &entry.name {
                if !name.eq_ignore_ascii_case(&repo.name) {
                    return Err(GatewayError::Config {
                        details: format!(
                            "authorisedList entry '{}': name '{}' does not match URL",
                            entry.url, name
                        ),
                    });
                }
            }
        }

        if self.max_body_bytes == 0 {
            return Err(GatewayError::Config {
                details: "maxBodyBytes must be greater than zero".to_string(),
            });
        }
        if self.subprocess.max_output_bytes == 0 {
            return Err(GatewayError::Config {
                details: "subprocess.maxOutputBytes must be greater than zero".to_string(),
            });
        }

        // Compiling the rules proves them well-formed.
        CompiledRules::from_config(&self.commit_config)?;
        Ok(())
    }

    /// The repositories of `authorisedList` as validated [`Repo`] values.
    pub fn authorised_repos(&self) -> Result<Vec<Repo>, GatewayError> {
        self.authorised_list
            .iter()
            .map(|entry| {
                let mut repo = Repo::parse(&entry.url).map_err(|e| GatewayError::Config {
                    details: format!("authorisedList entry '{}': {e}", entry.url),
                })?;
                repo.users = entry.users.clone();
                Ok(repo)
            })
            .collect()
    }
}

// ============================================================================
// Compiled rules
// ============================================================================

/// A named diff matcher: the block type reported plus its compiled pattern.
#[derive(Debug, Clone)]
pub struct DiffMatcher {
    /// Block type shown in the rejection report.
    pub kind: String,
    /// Compiled case-insensitive pattern.
    pub pattern: Regex,
}

/// The rule sets of [`CommitConfig`], compiled once at startup.
#[derive(Debug, Clone, Default)]
pub struct CompiledRules {
    /// Lowercased commit-message literals.
    pub message_literals: Vec<String>,
    /// Compiled commit-message patterns.
    pub message_patterns: Vec<Regex>,
    /// Author e-mail domain allow pattern.
    pub email_domain_allow: Option<Regex>,
    /// Author e-mail local-part block pattern.
    pub email_local_block: Option<Regex>,
    /// Diff literals compiled as case-insensitive patterns.
    pub diff_literals: Vec<DiffMatcher>,
    /// Diff patterns.
    pub diff_patterns: Vec<DiffMatcher>,
    /// Provider secret patterns, skipped for private organizations.
    pub diff_providers: Vec<DiffMatcher>,
}

/// Block type reported for a matched diff literal.
pub const BLOCK_TYPE_LITERAL: &str = "Offending Literal";
/// Block type reported for a matched diff pattern.
pub const BLOCK_TYPE_PATTERN: &str = "Offending Pattern";

fn compile_ci(pattern: &str, key: &str) -> Result<Regex, GatewayError> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| GatewayError::Config {
            details: format!("{key} '{pattern}' is not a valid pattern: {e}"),
        })
}

impl CompiledRules {
    /// Compile every rule of the configuration, failing on the first bad one.
    pub fn from_config(config: &CommitConfig) -> Result<CompiledRules, GatewayError> {
        let message_literals = config
            .message
            .block
            .literals
            .iter()
            .map(|l| l.to_lowercase())
            .collect();

        let message_patterns = config
            .message
            .block
            .patterns
            .iter()
            .map(|p| compile_ci(p, "commitConfig.message.block.patterns"))
            .collect::<Result<Vec<_>, _>>()?;

        let email_domain_allow = config
            .author
            .email
            .domain
            .allow
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(|p| compile_ci(p, "commitConfig.author.email.domain.allow"))
            .transpose()?;

        let email_local_block = config
            .author
            .email
            .local
            .block
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(|p| compile_ci(p, "commitConfig.author.email.local.block"))
            .transpose()?;

        let diff_literals = config
            .diff
            .block
            .literals
            .iter()
            .map(|l| {
                Ok(DiffMatcher {
                    kind: BLOCK_TYPE_LITERAL.to_string(),
                    pattern: compile_ci(l, "commitConfig.diff.block.literals")?,
                })
            })
            .collect::<Result<Vec<_>, GatewayError>>()?;

        let diff_patterns = config
            .diff
            .block
            .patterns
            .iter()
            .map(|p| {
                Ok(DiffMatcher {
                    kind: BLOCK_TYPE_PATTERN.to_string(),
                    pattern: compile_ci(p, "commitConfig.diff.block.patterns")?,
                })
            })
            .collect::<Result<Vec<_>, GatewayError>>()?;

        let diff_providers = config
            .diff
            .block
            .providers
            .iter()
            .map(|(name, p)| {
                Ok(DiffMatcher {
                    kind: name.clone(),
                    pattern: compile_ci(p, "commitConfig.diff.block.providers")?,
                })
            })
            .collect::<Result<Vec<_>, GatewayError>>()?;

        Ok(CompiledRules {
            message_literals,
            message_patterns,
            email_domain_allow,
            email_local_block,
            diff_literals,
            diff_patterns,
            diff_providers,
        })
    }
}

mod humantime_duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

//! Error taxonomy for the gateway.
//!
//! Policy failures never travel as errors: they are resolved into the
//! Action's `error`/`blocked` flags before a response is sent. The types
//! here cover everything else: configuration problems, invalid repository
//! identities, subprocess failures, malformed pack payloads, and the one
//! class of inspector failure that is allowed to escape the chain.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Top-level failures surfaced to the binary and the request handler.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Configuration could not be read or did not validate.
    #[error("Configuration error: {details}")]
    Config {
        /// What went wrong, including the offending key where known
        details: String,
    },

    /// The listen socket could not be bound.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested
        addr: String,
        /// Underlying socket error
        source: std::io::Error,
    },

    /// A buffered request body exceeded the configured bound.
    #[error("Request body exceeds the configured limit of {limit} bytes")]
    BodyTooLarge {
        /// The configured `max_body_bytes`
        limit: usize,
    },

    /// The request body could not be read from the client.
    #[error("Failed to read request body: {details}")]
    BodyRead {
        /// Transport error detail
        details: String,
    },

    /// The upstream host could not be reached or returned a transport error.
    #[error("Upstream request failed: {details}")]
    Upstream {
        /// Trimmed transport error detail
        details: String,
    },

    /// A store operation failed, for example a lifecycle update on an
    /// unknown push id.
    #[error("Store error: {details}")]
    Store {
        /// What the store was asked to do and why it refused
        details: String,
    },
}

/// Repository identity validation failures.
///
/// Construction of a [`crate::repo::Repo`] either succeeds completely or
/// yields one of these; there is no partially valid repository value.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RepoError {
    /// The URL did not parse at all.
    #[error("Invalid repository URL '{url}': {details}")]
    Malformed {
        /// The raw input
        url: String,
        /// Parser detail
        details: String,
    },

    /// Only https remotes are accepted.
    #[error("Unsupported scheme '{scheme}' in '{url}' (only https is accepted)")]
    Scheme {
        /// The rejected scheme
        scheme: String,
        /// The raw input
        url: String,
    },

    /// The host is not one of the supported providers.
    #[error("Unsupported host '{host}' in '{url}'")]
    Host {
        /// The rejected host
        host: String,
        /// The raw input
        url: String,
    },

    /// The path is not `<project>/<name>.git` or `<name>.git`.
    #[error("Invalid repository path '{path}': expected one or two segments ending in .git")]
    Path {
        /// The rejected path portion
        path: String,
    },
}

/// Failures raised by inspectors.
///
/// `Failed` is converted to an error Step at the executor boundary and
/// treated as a policy block (fail-closed). `Precondition` is the single
/// variant allowed to escape the chain: the inspector could not run at all
/// and the condition is a programming error, not a policy decision.
#[derive(Debug, Error)]
pub enum InspectorError {
    /// Recoverable inspection fault, recorded fail-closed.
    #[error("{message}")]
    Failed {
        /// Human-readable fault description
        message: String,
    },

    /// The inspector's inputs were absent in a way that should never happen.
    #[error("Precondition violated in {inspector}: {message}")]
    Precondition {
        /// Name of the inspector that refused to run
        inspector: &'static str,
        /// What was missing
        message: String,
    },
}

impl InspectorError {
    /// Shorthand for a fail-closed fault.
    pub fn failed(message: impl Into<String>) -> Self {
        InspectorError::Failed {
            message: message.into(),
        }
    }
}

impl From<GitError> for InspectorError {
    fn from(err: GitError) -> Self {
        InspectorError::failed(err.to_string())
    }
}

impl From<PackError> for InspectorError {
    fn from(err: PackError) -> Self {
        InspectorError::failed(err.to_string())
    }
}

/// Failures from the bounded git subprocess layer.
#[derive(Debug, Error)]
pub enum GitError {
    /// The child process could not be spawned.
    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        /// The command line that failed
        command: String,
        /// Underlying OS error
        source: std::io::Error,
    },

    /// The child exited non-zero.
    #[error("'{command}' exited with status {code}: {stderr}")]
    Exit {
        /// The command line that failed
        command: String,
        /// Exit code (-1 when terminated by signal)
        code: i32,
        /// Trimmed stderr
        stderr: String,
    },

    /// The child exceeded the configured timeout and was killed.
    #[error("'{command}' timed out after {timeout:?}")]
    Timeout {
        /// The command line that timed out
        command: String,
        /// The configured bound
        timeout: Duration,
    },

    /// The child produced more output than the configured cap allows.
    #[error("'{command}' produced more than {limit} bytes of output")]
    OutputCap {
        /// The command line that overflowed
        command: String,
        /// The configured bound
        limit: usize,
    },

    /// The child's output could not be interpreted.
    #[error("Failed to parse output of '{command}': {details}")]
    Parse {
        /// The command line whose output was malformed
        command: String,
        /// Parse detail
        details: String,
    },

    /// Filesystem work around a scratch clone failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// The path involved
        path: PathBuf,
        /// Underlying OS error
        source: std::io::Error,
    },
}

/// Failure to resolve or parse one plugin module location.
///
/// Always caught by the loader: the offending module is skipped and the
/// remaining locations still load.
#[derive(Debug, Error)]
pub enum PluginError {
    /// The manifest file could not be read.
    #[error("failed to read plugin manifest {path}: {source}")]
    Read {
        /// Manifest path that was attempted
        path: PathBuf,
        /// Underlying OS error
        source: std::io::Error,
    },

    /// The manifest file was not valid JSON.
    #[error("invalid plugin manifest {path}: {source}")]
    Parse {
        /// Manifest path that failed to parse
        path: PathBuf,
        /// Parser detail
        source: serde_json::Error,
    },
}

/// Violations of the wire framing or the pack object grammar.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PackError {
    /// A pkt-line length header was not four hex digits.
    #[error("Invalid pkt-line length header {header:?}")]
    BadLengthHeader {
        /// The four offending bytes, lossily decoded
        header: String,
    },

    /// A pkt-line declared more bytes than remain in the buffer.
    #[error("Truncated pkt-line: declared {declared} bytes, {remaining} remain")]
    TruncatedLine {
        /// Declared payload length
        declared: usize,
        /// Bytes actually available
        remaining: usize,
    },

    /// The first pkt-line was not an `old new ref` update.
    #[error("Malformed ref update line: {line:?}")]
    BadRefUpdate {
        /// The offending line, lossily decoded
        line: String,
    },

    /// No `PACK` signature was found in the request body.
    #[error("No PACK payload found in request body")]
    MissingPack,

    /// The pack version is not one this gateway understands.
    #[error("Unsupported pack version {version}")]
    UnsupportedVersion {
        /// Declared version
        version: u32,
    },

    /// An object header declared an unknown type.
    #[error("Unknown pack object type {kind} at offset {offset}")]
    UnknownObjectType {
        /// The three type bits as read
        kind: u8,
        /// Byte offset of the object header within the pack
        offset: usize,
    },

    /// The pack ended in the middle of an object.
    #[error("Truncated pack at offset {offset}: {details}")]
    TruncatedPack {
        /// Byte offset where the walk stopped
        offset: usize,
        /// What was being read
        details: String,
    },

    /// A zlib stream failed to inflate.
    #[error("Failed to inflate object at offset {offset}: {details}")]
    Inflate {
        /// Byte offset of the object's zlib stream
        offset: usize,
        /// Decoder detail
        details: String,
    },

    /// An inflated commit object was missing mandatory fields.
    #[error("Invalid commit data")]
    InvalidCommitData,
}

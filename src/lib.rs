//! Packgate - Transparent intercepting gateway for the git HTTP wire protocol.
//!
//! This library provides the proxy service, the push inspection chains, and
//! the stores backing the approval workflow for the Packgate gateway.
//!
//! # Request Paths
//!
//! Packgate splits traffic into three paths based on what the request is:
//!
//! - **Pack POSTs:** buffered in full, parsed, and run through the matching
//!   inspector chain before any byte reaches the upstream host.
//! - **Everything else:** relayed to the upstream host without buffering
//!   or inspection (ref advertisements, auth exchanges, non-git traffic).
//! - **Blocked pushes:** answered in-band with a git error packet so the
//!   client prints the reason instead of a bare HTTP failure.

pub mod action;
pub mod chain;
pub mod config;
pub mod error;
pub mod git;
pub mod inspector;
pub mod pack;
pub mod plugin;
pub mod processor;
pub mod proxy;
pub mod repo;
pub mod store;

//! vmgate - group-gated control plane for a single managed virtual machine
//!
//! Exposes start, stop and status for one VM over HTTP. Callers arrive
//! already authenticated by the hosting platform, which forwards their
//! identity in a base64 header. Each action is permitted to members of
//! specific directory groups.
//!
//! # Architecture
//!
//! ```text
//! request ──► policy (404/405) ──► principal header (401)
//!                                        │
//!                                        ▼
//!                              claim groups ∩ allowed? ──yes──► VM operation
//!                                        │ no
//!                                        ▼
//!                         membership cache ──miss──► directory (retry)
//!                                        │
//!                                        ▼
//!                              ∩ allowed? ──no──► 403
//! ```
//!
//! # Modules
//!
//! - [`auth`] - Principal header decoding and claim inspection
//! - [`directory`] - Transitive group membership lookups
//! - [`cache`] - Per-subject membership cache with TTL
//! - [`resolver`] - Claims, cache and directory combined into one decision
//! - [`policy`] - Action table and role to group bindings
//! - [`dispatch`] - Request flow from action name to VM operation
//! - [`compute`] - VM control client
//! - [`credential`] - Client-credential token acquisition
//! - [`retry`] - Backoff for transient upstream failures
//! - [`server`] - HTTP routes and listener
//! - [`config`] - Deployment configuration
//! - [`error`] - Error type and HTTP mapping

#![deny(missing_docs)]

pub mod auth;
pub mod cache;
pub mod compute;
pub mod config;
pub mod credential;
pub mod directory;
pub mod dispatch;
pub mod error;
pub mod policy;
pub mod resolver;
pub mod retry;
pub mod server;

pub use error::{Error, Result};

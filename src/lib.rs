//! kube-rbac-gate Library
//!
//! Forward-auth gate that authorizes HTTP requests with Kubernetes RBAC.
//!
//! # Features
//!
//! - **Bearer Authentication**: JWT (HS256, RS256, ES256) with group claims
//! - **Path Lists**: allow-list or ignore-list with glob patterns
//! - **Static Rules**: local allow rules evaluated before the API server
//! - **Rewrites**: query parameters or headers mapped onto resource attributes
//! - **SubjectAccessReview**: cached, retried delegation to the API server
//!
//! # Example
//!
//! ```no_run
//! use kube_rbac_gate::{config::Config, server::Server};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let server = Server::from_config(&config).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod authz;
pub mod config;
pub mod metrics;
pub mod server;

// Re-export commonly used types
pub use config::Config;
pub use server::Server;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

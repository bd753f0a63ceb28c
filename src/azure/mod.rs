//! Azure Resource Manager interaction module
//!
//! This module provides the core functionality for talking to ARM,
//! including authentication, the HTTP client, and subscription records.
//!
//! # Module Structure
//!
//! - [`auth`] - Identity providers (Azure CLI, static bearer token)
//! - [`client`] - Main ARM client: pagination, api-version fallback, Resource Graph
//! - [`http`] - HTTP utilities for REST API calls
//! - [`subscriptions`] - Subscription records
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tarm::azure::{auth::AzCliIdentity, client::ArmClient};
//! use tarm::config::Config;
//!
//! async fn example() -> tarm::error::ArmResult<()> {
//!     let client = ArmClient::new(Arc::new(AzCliIdentity::new(None)), &Config::default())?;
//!     let providers = client.get("/providers", None).await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod http;
pub mod subscriptions;

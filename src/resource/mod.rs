//! Resource abstraction layer
//!
//! ARM is self-describing: `GET /providers` lists every resource type and
//! the api-versions it accepts. This module turns that catalog into a lazily
//! expanded tree and into editable JSON documents.
//!
//! # Architecture
//!
//! - [`catalog`] - Caches the provider/type/api-version map
//! - [`resolver`] - Parses resource IDs
//! - [`model`] - Typed projections of ARM payloads
//! - [`tree`] - Expands tree nodes into their children
//! - [`document`] - Open resource documents and write-back
//! - [`template`] - Deployment template and Bicep export
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tarm::resource::{catalog::ProviderCatalog, tree::{TreeExplorer, TreeNode}};
//!
//! async fn top_level(catalog: Arc<ProviderCatalog>) -> tarm::error::ArmResult<()> {
//!     let explorer = TreeExplorer::new(catalog, Vec::new());
//!     for node in explorer.expand(&TreeNode::Root).await? {
//!         println!("{}", node.label());
//!     }
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod document;
pub mod model;
pub mod resolver;
pub mod template;
pub mod tree;

pub use catalog::ProviderCatalog;
pub use document::{DocumentStore, WriteConfirmer, WriteTarget};
pub use tree::{NodeKind, TreeExplorer, TreeNode};

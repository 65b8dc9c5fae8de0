//! Keepsake - family memory-sharing API
//!
//! Patients record life memories (text, images, video, audio); linked
//! family members view and interact with them. Every cross-user access
//! runs through the relationship ledger: a family member sees a
//! patient's memories iff an APPROVED link exists between them.
//!
//! ## Architecture
//!
//! - **db**: SQLite storage (users, ledger, connect codes, roster,
//!   memories and their sub-entities)
//! - **access**: pure visibility predicates over pre-fetched facts
//! - **services**: domain operations gluing access rules to storage
//! - **routes / http**: hyper request dispatch and the server loop
//! - **media_store**: trait seam to the external binary object store
//!
//! Linking flow: a patient issues a short-lived single-use connect code;
//! a family member redeems it, which creates the ledger link and the
//! patient's mirrored roster row in one transaction. Deleting either
//! side removes the other in the same transaction.

pub mod access;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod media_store;
pub mod routes;
pub mod services;

pub use config::Config;
pub use db::MemoryDb;
pub use error::ApiError;
pub use http::HttpServer;
pub use media_store::{DisabledObjectStore, HttpObjectStore, ObjectStore};

//! veil_store — Local persistence for Veil Secure Messenger
//!
//! SQLite via sqlx. The engine consumes this through a narrow
//! query/insert interface: contacts (public key may be empty = pending),
//! messages (delivered/read flags mutated in place by the receipt
//! tracker), and ephemeral statuses with a 24-hour TTL.
//!
//! Plaintext-at-rest is deliberate here: end-to-end encryption protects
//! the wire; local-at-rest encryption is a separate concern outside this
//! core.

pub mod contacts;
pub mod db;
pub mod error;
pub mod messages;
pub mod models;
pub mod statuses;

pub use db::Store;
pub use error::StoreError;
pub use models::{ContactRow, MessageKind, MessageRow, NewMessage, StatusRow};

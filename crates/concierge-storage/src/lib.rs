//! Concierge Storage crate - SQLite persistence, conversation stores, and
//! the product catalog.
//!
//! Provides a WAL-mode SQLite database with versioned migrations, the
//! conversation store contract with in-memory and SQLite backends, and the
//! read-only product catalog queried by the product inquiry handler.

pub mod catalog;
pub mod conversation;
pub mod db;
pub mod migrations;

pub use catalog::{sanitize_query, Product, ProductCatalog, PRODUCT_SCHEMA};
pub use conversation::{
    ConversationStore, InMemoryConversationStore, RetentionPolicy, SqliteConversationStore,
};
pub use db::Database;

//! The database implementation of the inventory.
#![allow(clippy::multiple_crate_versions)]
pub mod db;
#[allow(missing_docs, clippy::missing_docs_in_private_items)]
mod schema;

pub mod models;

//! Geoharvest DB - PostgreSQL stores for the harvester
//!
//! This crate provides PostgreSQL implementations of the collaborator traits
//! defined in `geoharvest_core::traits`.
//!
//! # Overview
//!
//! The main components are:
//! - [`CatalogRepository`] - Metadata records and provenance sources
//!   ([`MetadataStore`](geoharvest_core::MetadataStore) and
//!   [`SourceRegistry`](geoharvest_core::SourceRegistry))
//! - [`HarvestStateRepository`] - Per-node record indexes and last results
//!   ([`IndexStore`](geoharvest_core::IndexStore) and
//!   [`ResultStore`](geoharvest_core::ResultStore))
//! - [`run_migrations`] - Creates the reference schema

mod repository;
mod schema;
mod state_repository;

pub use repository::{CatalogRepository, DEFAULT_SCHEMAS};
pub use schema::run_migrations;
pub use state_repository::HarvestStateRepository;

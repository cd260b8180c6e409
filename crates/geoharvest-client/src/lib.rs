//! Geoharvest Client - CSW catalog client
//!
//! This crate provides [`CswClient`], an implementation of
//! [`geoharvest_core::CatalogClient`] for OGC Catalogue Services for the Web
//! (CSW 2.0.2), and [`CswClientFactory`] for creating one per endpoint.
//!
//! # Overview
//!
//! The client handles request building, response parsing and retrying of
//! transient HTTP failures. Records are returned with their XML payload
//! untouched.

pub mod csw;
mod query;
mod xml;

pub use csw::{CswClient, CswClientFactory};

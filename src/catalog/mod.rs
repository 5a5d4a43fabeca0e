//! Home catalog: the configuration registry shared by all services

pub mod client;
pub mod server;

pub use client::{CatalogError, HomeCatalogClient, DEFAULT_CATALOG_URL};
pub use server::{CatalogDocument, CatalogFileError, CatalogServer};

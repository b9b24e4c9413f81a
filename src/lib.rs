pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod importer;
pub mod index;
pub mod miniml;
pub mod output;
pub mod query;
pub mod retriever;
pub mod session;
pub mod store;

//! # ARCHE ingestion engine
//!
//! Transforms filesystem trees, RDF metadata graphs and SKOS vocabularies
//! into streams of identity-preserving upserts against a transactional
//! repository API, with bounded concurrency, retry handling and
//! skip/overwrite/version reconciliation policies.

// See https://doc.rust-lang.org/rustc/lints/listing/allowed-by-default.html
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]

pub mod cli;
pub mod fileid;
pub mod ingest;
pub mod metalookup;
pub mod progress;
pub mod rdf;
pub mod repo;
pub mod schema;

#[cfg(any(test, feature = "internal-testing-api"))]
pub mod fixture;

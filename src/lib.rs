//! An RFC 9111 HTTP client-side cache decision engine and storage
//! coordinator.
//!
//! This crate is transport-agnostic: it decides what is cacheable, how
//! fresh a stored response is, when to revalidate, and how to store and
//! invalidate entries, but never itself sends a byte over the network.
//! [`executor::Origin`] is the one seam a caller implements to plug in an
//! actual HTTP client.
//!
//! Modules are organized around the decision pipeline: [`key`] and
//! [`cache_control`] parse inputs, [`validity`] and [`suitability`] decide
//! freshness, [`cache`] and [`storage`] hold the data, [`invalidator`],
//! [`conditional`], [`response_gen`], [`collapser`], and [`revalidator`]
//! implement the surrounding protocol machinery, and [`executor`] wires
//! all of it into a single `handle` call.

pub mod cache;
pub mod cache_control;
pub mod collapser;
pub mod conditional;
pub mod config;
pub mod entry;
pub mod error;
pub mod executor;
pub mod invalidator;
pub mod key;
pub mod request_policy;
pub mod resource;
pub mod response_gen;
pub mod response_policy;
pub mod revalidator;
pub mod serializer;
pub mod storage;
pub mod suitability;
pub mod update_handler;
pub mod validity;

pub use cache::Cache;
pub use config::CacheConfig;
pub use error::{CacheError, Result};
pub use executor::{Executor, Origin, OriginFetch};
pub use key::KeyableRequest;

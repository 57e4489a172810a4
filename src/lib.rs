//! Stock Ledger Library
//!
//! Stock records, the append-only movement ledger and the engine that keeps
//! them consistent under concurrent writers.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod domain;
pub mod entities;
pub mod errors;
pub mod migrator;
pub mod services;

pub use errors::{ServiceError, ServiceResult};
pub use services::StockServices;

#![doc = "opendata-reload-core: core reload logic for opendata-reload."]

//! This crate contains the reload pipeline that refreshes hosted open-data layers and tables
//! from source database tables: staging, upload, truncate+append, row-count reconciliation and
//! cleanup. Transport (the hosted content store) and extraction (the source database) are
//! reached only through the traits in [`contract`].
//!
//! # Usage
//! Build a [`contract::ContentStore`] and a [`contract::Extractor`], then call
//! [`orchestrator::reload_all`] with the configured sources.

pub mod config;
pub mod contract;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod reload;
pub mod retry;
pub mod schedule;
pub mod staging;

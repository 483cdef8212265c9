//! # pathmark-core
//!
//! Core library for pathmark - a browsing history store.
//!
//! This library provides:
//! - Domain types for hosts, urls, visits and queries
//! - SQLite storage for the `hosts`, `urls` and `visits` tables
//! - An asynchronous service that runs every database operation on one
//!   worker thread and hands results back as [`Request`]s
//! - Configuration management
//! - Logging infrastructure
//!
//! ## Architecture
//!
//! Callers never touch the database. They talk to a [`HistoryService`],
//! which queues each operation for the worker. The worker owns the
//! [`HistoryStore`], keeps one transaction open and commits it in batches.
//!
//! ## Example
//!
//! ```rust,no_run
//! use pathmark_core::{Config, HistoryService, PageVisit, Query, SortType, VisitType};
//!
//! let config = Config::load().expect("failed to load config");
//! let service = HistoryService::open(config.history.service_options())
//!     .expect("failed to start history service");
//!
//! service
//!     .add_visit(PageVisit::now("https://www.rust-lang.org/", VisitType::Typed))
//!     .wait()
//!     .expect("failed to record visit");
//!
//! let recent = service
//!     .query_urls(Query::new().sort(SortType::MostRecentlyVisited).limit(10))
//!     .wait()
//!     .expect("query failed");
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use db::{HistoryStore, RowKey};
pub use error::{Error, Result};
pub use service::{
    CallbackContext, CancellationToken, CommitPolicy, HistoryEvent, HistoryService, IdleQueue,
    Request, ServiceOptions, ServiceState, TokioContext,
};
pub use types::*;

// Public modules
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod service;
pub mod types;

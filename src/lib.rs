//! # shopflow
//!
//! Production-workflow tracker. Files of a project are routed through an
//! ordered chain of departments; each department may only work on a file
//! once the department before it has finished.
//!
//! Provides the per-file queue state machine, project progress and user
//! availability aggregation, notification fan-out to per-user topics, a
//! Postgres store (sqlx) with LISTEN/NOTIFY delivery, an in-memory store,
//! and OpenTelemetry observability.

pub mod config;
pub mod db;
pub mod error;
pub mod event;
pub mod fanout;
pub mod model;
pub mod progress;
pub mod queue;
pub mod registry;
pub mod store;
pub mod telemetry;
pub mod tracker;
pub mod view;

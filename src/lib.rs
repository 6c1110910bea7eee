//! Verbatims - import, export and backup pipeline for a quotes database
//!
//! This library provides the data pipeline behind the Verbatims admin API:
//! format codecs, entity importers, job progress, snapshots and rollback.

pub mod api;
pub mod config;
pub mod db;
pub mod models;
pub mod services;

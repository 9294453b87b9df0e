//! Shared domain types for Railyard.
//!
//! Pure data: entity payloads, status enums with their transition tables,
//! broker message shapes, configuration, and the error taxonomy. No IO and
//! no async -- the core and infra crates both build on top of this one.

pub mod action;
pub mod config;
pub mod dataset;
pub mod datastore;
pub mod entity;
pub mod error;
pub mod event;
pub mod message;
pub mod mutex;
pub mod subscription;
pub mod trigger;
pub mod workflow;

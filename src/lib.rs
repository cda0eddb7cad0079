//! Jira lookups backed by a tiered, single-flight cache.

pub mod cache;
pub mod config;
pub mod jira;
pub mod logging;

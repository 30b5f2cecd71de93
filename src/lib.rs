//! HTTP response cache with tag-based invalidation and transactional removals.

pub mod cache;
pub mod config;
pub mod infra;

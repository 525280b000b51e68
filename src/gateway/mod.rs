//! Orchestration core - admission, caching, retry, polling, and selection

pub mod cache;
pub mod orchestrator;
pub mod poll;
pub mod rate_limit;
pub mod retry;
pub mod selection;

//! Utility modules: retry and shared HTTP helpers.

pub mod http;
pub mod retry;

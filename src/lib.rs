// Re-export modules for testing
pub mod classify;
pub mod config;
pub mod error;
pub mod exec;
pub mod extract;
pub mod pipeline;
pub mod record;
pub mod report;
pub mod sink;
pub mod storage;

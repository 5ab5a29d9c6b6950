pub mod analytics;
pub mod config;
pub mod intercept;
pub mod notify;
pub mod rate_limit;
pub mod storage;

pub mod breaker;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod notify;
pub mod processors;
pub mod queue;
pub mod rate_limit;
pub mod signature;
pub mod store;
pub mod worker;

//! Persistence layer for the content pipeline: row models, connection
//! pooling, embedded migrations and per-table query functions.

pub mod config;
pub mod models;
pub mod pool;
pub mod queries;

//! Infrastructure layer modules
//!
//! This module contains shared infrastructure components:
//! - `config`: Application configuration and settings
//! - `error`: HTTP-facing error type
//! - `metrics`: Prometheus metrics
//! - `postgres`: PostgreSQL connection pool
//! - `redis`: Redis connection pool

pub mod config;
pub mod error;
pub mod metrics;
pub mod postgres;
pub mod redis;

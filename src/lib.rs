//! Pacer - Concurrent Sliding-Window Rate Limiter
//!
//! This crate gates an arbitrary async action behind any number of
//! sliding-window rate constraints. Concurrent callers are admitted one
//! decision at a time, each delayed only as long as the most restrictive
//! constraint requires.

pub mod clock;
pub mod config;
pub mod driver;
pub mod error;
pub mod ratelimit;

//! Postguard - Rate-limited messaging API
//!
//! This crate implements a small messaging API in which every request first
//! passes through a distributed rate limiter. Counters live in a shared store
//! (Redis in production) so any number of instances enforce one quota per
//! client, and the limiter fails open whenever the store cannot answer.

pub mod auth;
pub mod config;
pub mod error;
pub mod http;
pub mod messages;
pub mod ratelimit;

//! warden-api: reverse proxy and admin API
//!
//! This crate provides the network-facing layer:
//! - The ReBAC-enforcing reverse proxy (rule matching, attribute
//!   extraction, enforcement, upstream transport, response hooks)
//! - The admin HTTP API
//! - Tower middleware and observability setup
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                 warden-api                   │
//! ├─────────────────────────────────────────────┤
//! │  proxy/         - Rules, enforcement, hooks  │
//! │  http/          - Admin REST endpoints       │
//! │  middleware/    - Request id, logs, metrics  │
//! │  observability/ - Logging & Prometheus setup │
//! │  errors.rs      - Error to status mapping    │
//! └─────────────────────────────────────────────┘
//! ```

pub mod errors;
pub mod http;
pub mod middleware;
pub mod observability;
pub mod proxy;

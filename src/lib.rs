//! Experiment Hub service library.
//!
//! # Architecture Overview
//!
//! ```text
//!                  ┌───────────────────────────────────────────────┐
//!                  │                 EXPERIMENT HUB                 │
//!                  │                                                │
//!   Client ────────┼─▶ cors ─▶ request id ─▶ trace ─▶ router        │
//!                  │                                  │             │
//!                  │              ┌───────────────────┼──────────┐  │
//!                  │              ▼                   ▼          ▼  │
//!                  │          GET /, /health    {prefix}/...   404  │
//!                  │                             (api registry)     │
//!                  │                                  │             │
//!                  │                                  ▼             │
//!                  │                           experiment hub       │
//!                  │                                                │
//!                  │  ┌──────────────────────────────────────────┐ │
//!                  │  │ lifecycle: start resources → serve →     │ │
//!                  │  │            drain → release (database,    │ │
//!                  │  │            hub)                          │ │
//!                  │  └──────────────────────────────────────────┘ │
//!                  └───────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod observability;

pub use config::Settings;
pub use error::{Error, Result};
pub use http::{AppState, Application};
pub use lifecycle::{Lifecycle, Phase, Shutdown};

//! Rust client for the Experiment Hub service.

mod client;

pub use client::{
    ExperimentMessage, ExperimentStream, HealthStatus, HubClient, ReconnectPolicy,
    ServiceIdentity, SdkError,
};

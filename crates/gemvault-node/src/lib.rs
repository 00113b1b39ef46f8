//! # Gemvault Node
//!
//! In-process reward service: wires the ledger and rule engines together,
//! loads configuration, publishes events and exposes metrics and the JSON
//! operation surface.

pub mod api;
pub mod config;
pub mod events;
pub mod metrics;
pub mod service;

pub use api::{handle, handle_json, ApiError, ApiReply, Request};
pub use config::{ConfigError, ServiceConfig};
pub use events::{EventBus, VaultEvent};
pub use metrics::VaultMetrics;
pub use service::{AccountView, GrantRequest, RewardGrant, RewardService};

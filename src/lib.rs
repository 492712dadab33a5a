pub mod activity;
pub mod api;
pub mod auth;
pub mod classify;
pub mod config;
pub mod error;
pub mod holdings;
pub mod metrics;
pub mod price;
pub mod registry;
pub mod relay;
pub mod solana_client;
pub mod telemetry;
pub mod transfer;
pub mod wallet;
pub mod withdrawal;

//! Shared group expense ledger: an append-only log of expenses per group,
//! balances and settlement plans derived from it, and live fan-out of new
//! entries to connected members.

pub mod auth;
pub mod balance;
pub mod config;
pub mod error;
pub mod exchange;
pub mod gateway;
pub mod hub;
pub mod insights;
pub mod locks;
pub mod rates;
pub mod receipt;
pub mod schemas;
pub mod service;
pub mod store;
pub mod telemetry;

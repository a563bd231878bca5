//! Off-peak panel library - appliance start advice on an e-ink panel
//!
//! This module exports internal components for integration testing.

pub mod clock;
pub mod config;
pub mod display;
pub mod health;
pub mod notify;
pub mod redact;
pub mod scheduler;
pub mod suggestion;

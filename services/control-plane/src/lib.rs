//! arha control plane library.
//!
//! This crate primarily ships a `control-plane` binary, but we expose a small
//! library surface to enable integration testing and reuse.

pub mod agent;
pub mod api;
pub mod config;
pub mod controller;
pub mod error;
pub mod health;
pub mod inventory;
pub mod launcher;
pub mod scheduler;
pub mod state;
pub mod store;

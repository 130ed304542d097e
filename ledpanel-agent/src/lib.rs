//! LedPanel Agent - status panel driver
//!
//! Drives an addressable LED panel from a per-slot color program:
//! - Color expressions (solid, gradients, metric/time keyed, random)
//! - Animation evaluation against a shared clock
//! - Hardware metrics with one-shot backend resolution and a staleness cache
//! - A fixed-interval scheduler publishing frames to a sink

pub mod color;
pub mod config;
pub mod layout;
pub mod metrics;
pub mod program;
pub mod scheduler;
pub mod store;

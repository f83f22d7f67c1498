//! Screening backend API: HTTP client and wire formats

pub mod client;
mod wire;

pub use client::{ClientTimeouts, ScreeningClient};

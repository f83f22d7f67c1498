//! # Averion Common Library
//!
//! Shared code for the Averion screening clients including:
//! - Error type and result alias
//! - Configuration loading (TOML bootstrap, environment overrides)
//! - Analysis model types
//! - Credit pricing and batch tier table
//! - Authenticated session context

pub mod config;
pub mod error;
pub mod model;
pub mod pricing;
pub mod session;

pub use error::{Error, Result};
pub use model::ModelType;
pub use pricing::{PricingTable, TierLimits};
pub use session::{SessionContext, UserProfile};

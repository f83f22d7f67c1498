//! Job-status polling
//!
//! [`state`] holds the transition rules and nothing else; [`driver`] runs
//! them on a tokio task against a [`StatusSource`].

pub mod driver;
pub mod state;

pub use driver::{JobPoller, PollerHandle, StatusSource};
pub use state::{
    PollFailure, PollerConfig, PollerPhase, PollerSnapshot, PollerState, Remediation, Transition,
};

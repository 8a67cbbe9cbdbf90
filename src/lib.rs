//! Waits for a sleeping deployment to wake up, then sends the visitor on to it.
//!
//! A [`PollLoop`](polling::PollLoop) probes through a [`Transport`](transport::Transport),
//! lets a [`DetectionStrategy`](strategy::DetectionStrategy) classify each answer,
//! and hands the final URL to a [`Navigator`](redirect::Navigator).

pub mod config;
pub mod error;
pub mod polling;
pub mod redirect;
pub mod strategy;
pub mod target;
pub mod transport;

pub use error::{ConfigError, NavigateError, TransportError, WakeError};
pub use polling::{PollLoop, PollOutcome, PollState, ProbeResult, RetryPolicy};
pub use strategy::{DetectionStrategy, Strategy};
pub use target::DeploymentTarget;

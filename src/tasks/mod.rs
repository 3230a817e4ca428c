//! Background Tasks Module
//!
//! Contains the background machinery that runs outside callers' threads.
//!
//! # Tasks
//! - Sweep timer: a single re-armable timer per bucket that fires its leak check

mod timer;

pub use timer::{configure_timer_runtime, SweepTimer};

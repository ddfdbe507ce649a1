//! Rate-limited request scheduler
//!
//! Serializes every outbound LLM call through one queue drained by a single
//! task: at most N dispatches per trailing window, rate-limited calls requeued
//! at the front after a cooldown, every other outcome passed back unchanged.

mod config;
mod core;
mod queue;
mod window;

pub use config::SchedulerConfig;
pub use core::RequestScheduler;
pub use queue::{PendingRequest, QueueState, ResponseHandle, ScheduleResult, SchedulerPhase, SchedulerStats};
pub use window::RequestLog;

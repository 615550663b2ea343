//! schedlens: scheduler analysis of kernel ftrace text traces.
//!
//! A trace is read by a two-thread pipeline into an append-only
//! [`EventStore`] whose strings live in an mmap-backed [`arena::Arena`].
//! Extraction passes then rebuild per-task, per-CPU running state, CPU
//! migrations and frequency/idle series, from which [`stats`] answers
//! occupancy queries over any window.
//!
//! # Example
//!
//! ```no_run
//! use schedlens::{stats, Config, Trace};
//! use std::path::Path;
//!
//! let trace = Trace::load(Path::new("trace.txt"), &Config::default())?;
//! let ctx = stats::QueryContext::whole(&trace.store);
//! for task in stats::top_tasks(&trace.analysis.sched.tasks, &ctx, 10) {
//!     println!("{} {}", task.name, stats::format_occupancy(task.running_pct));
//! }
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod analysis;
pub mod arena;
pub mod config;
pub mod cpufreq;
pub mod error;
pub mod event;
pub mod filter;
pub mod grammar;
pub mod intern;
pub mod migration;
pub mod pipeline;
pub mod report;
pub mod sched;
pub mod search;
pub mod stats;
pub mod store;
pub mod task;
pub mod time;
pub mod trace;

pub use config::Config;
pub use error::Error;
pub use store::EventStore;
pub use time::{TraceTime, Window};
pub use trace::Trace;

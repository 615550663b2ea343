//! Crate error type.
//!
//! Per-line rejections are not errors: they are counted in the ingest report
//! and ingestion carries on. What ends up here aborts the pass that raised it.

use std::io;

use thiserror::Error;

use crate::arena::ArenaError;

#[derive(Debug, Error)]
pub enum Error {
    /// Event storage could not be allocated.
    #[error(transparent)]
    Arena(#[from] ArenaError),

    /// More events than an event index can address.
    #[error("event store is full ({0} events)")]
    StoreFull(usize),

    /// A worker thread could not be started.
    #[error("failed to spawn the {name} thread")]
    Spawn {
        name: &'static str,
        #[source]
        source: io::Error,
    },

    /// A worker thread panicked before returning its result.
    #[error("the {0} thread panicked")]
    Panicked(&'static str),
}

//! Post-ingestion extraction passes.
//!
//! Schedule-state, migration and CPU series extraction only read the event
//! store and each build their own output, so they run side by side on
//! scoped threads.

use std::thread;

use log::info;

use crate::config::Config;
use crate::cpufreq::{self, CpuSeries};
use crate::error::Error;
use crate::migration::{self, Migrations};
use crate::sched::{self, SchedModel};
use crate::store::EventStore;

#[derive(Clone, Debug, Default)]
pub struct Analysis {
    pub sched: SchedModel,
    pub migrations: Migrations,
    pub cpu_series: CpuSeries,
}

fn spawn<'scope, 'env, T, F>(
    scope: &'scope thread::Scope<'scope, 'env>,
    name: &'static str,
    f: F,
) -> Result<thread::ScopedJoinHandle<'scope, T>, Error>
where
    F: FnOnce() -> T + Send + 'scope,
    T: Send + 'scope,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn_scoped(scope, f)
        .map_err(|source| Error::Spawn { name, source })
}

/// Run every extraction pass over `store`.
pub fn analyze(store: &EventStore, config: &Config) -> Result<Analysis, Error> {
    let analysis = thread::scope(|s| {
        let sched_thread = spawn(s, "sched-extract", move || sched::extract(store, config))?;
        let migration_thread = spawn(s, "migrations", move || migration::extract(store))?;
        let series_thread = spawn(s, "cpu-series", move || cpufreq::extract(store))?;

        Ok::<_, Error>(Analysis {
            sched: sched_thread.join().map_err(|_| Error::Panicked("sched-extract"))?,
            migrations: migration_thread
                .join()
                .map_err(|_| Error::Panicked("migrations"))?,
            cpu_series: series_thread
                .join()
                .map_err(|_| Error::Panicked("cpu-series"))?,
        })
    })?;
    info!(
        "analysis: {} tasks, {} migrations, {} cpus with frequency samples",
        analysis.sched.tasks.len(),
        analysis.migrations.len(),
        analysis.cpu_series.frequency.len()
    );
    Ok(analysis)
}

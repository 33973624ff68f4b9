//! Registry of worker implementations by job name.
//!
//! Built once at start-up and read-only afterwards. A process-wide instance
//! can be installed with [`Launchpad::install`].

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing::warn;

use crate::Worker;

/// Constructor for a fresh worker instance.
pub type WorkerFactory = Arc<dyn Fn() -> Arc<dyn Worker> + Send + Sync>;

static GLOBAL: OnceLock<Launchpad> = OnceLock::new();

pub struct Launchpad {
    factories: HashMap<String, WorkerFactory>,
}

#[derive(Default)]
pub struct LaunchpadBuilder {
    factories: HashMap<String, WorkerFactory>,
}

impl LaunchpadBuilder {
    /// Register `factory` under `job_name`. A later registration of the same
    /// name replaces the earlier one.
    pub fn register<F, W>(mut self, job_name: &str, factory: F) -> Self
    where
        F: Fn() -> W + Send + Sync + 'static,
        W: Worker + 'static,
    {
        let factory: WorkerFactory = Arc::new(move || Arc::new(factory()) as Arc<dyn Worker>);
        if self.factories.insert(job_name.to_string(), factory).is_some() {
            warn!(%job_name, "worker registered twice, keeping the last registration");
        }
        self
    }

    pub fn build(self) -> Launchpad {
        Launchpad { factories: self.factories }
    }
}

impl Launchpad {
    pub fn builder() -> LaunchpadBuilder {
        LaunchpadBuilder::default()
    }

    /// A new worker for `job_name`, or `None` if nothing is registered under it.
    pub fn instantiate(&self, job_name: &str) -> Option<Arc<dyn Worker>> {
        self.factories.get(job_name).map(|factory| factory())
    }

    pub fn contains(&self, job_name: &str) -> bool {
        self.factories.contains_key(job_name)
    }

    pub fn job_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Install as the process-wide registry, read back with [`Launchpad::global`].
    /// Fails (returning `self`) if one is already installed.
    pub fn install(self) -> Result<(), Launchpad> {
        GLOBAL.set(self)
    }

    pub fn global() -> Option<&'static Launchpad> {
        GLOBAL.get()
    }
}

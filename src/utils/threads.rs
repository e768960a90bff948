use std::{env, num::NonZeroUsize};
use tracing::warn;

/// Variables capping the worker count, in priority order, as set by grid
/// schedulers.
const CORE_CAP_VARS: [&str; 2] = ["NSLOTS", "IFX_LOCAL_PROCS"];
const CORE_OVERRIDE_VAR: &str = "LOCAL_PROCS_OVERRIDE";

/// The number of sample jobs to run at once.
///
/// An explicit request wins. Otherwise the logical core count is capped by
/// the first parseable scheduler variable and then replaced outright by a
/// positive `LOCAL_PROCS_OVERRIDE`.
pub fn worker_threads(requested: Option<NonZeroUsize>) -> usize {
    if let Some(n) = requested {
        return n.get();
    }

    let cap = CORE_CAP_VARS.into_iter().find_map(|v| env::var(v).ok());
    let replacement = env::var(CORE_OVERRIDE_VAR).ok();
    sized_pool(num_cpus::get(), cap.as_deref(), replacement.as_deref())
}

/// Applies a scheduler cap and an override to `cores`. Zero or unparseable
/// values are ignored with a warning.
fn sized_pool(cores: usize, cap: Option<&str>, replacement: Option<&str>) -> usize {
    let mut threads = cores.max(1);

    if let Some(cap) = cap {
        match cap.parse::<usize>() {
            Ok(n) if n > 0 => threads = threads.min(n),
            _ => warn!("Ignoring the worker cap '{cap}', using {threads} threads."),
        }
    }

    if let Some(s) = replacement {
        match s.parse::<usize>() {
            Ok(n) if n > 0 => threads = n,
            _ => warn!("Ignoring '{CORE_OVERRIDE_VAR}={s}', using {threads} threads."),
        }
    }

    threads
}

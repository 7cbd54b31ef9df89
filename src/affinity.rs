//! Pins worker threads to CPU cores.

use tracing::trace;
use tracing::warn;

/// Pins the calling thread to the core whose index matches `worker`. Failing
/// to pin is not fatal; the worker simply runs wherever the OS places it.
pub(crate) fn pin_current(worker: usize) -> bool {
    let Some(cores) = core_affinity::get_core_ids() else {
        warn!(worker, "failed to query core ids, skipping affinity");
        return false;
    };

    let Some(&core) = cores.iter().find(|core| core.id == worker) else {
        warn!(worker, cores = cores.len(), "no core matches worker, skipping affinity");
        return false;
    };

    if !core_affinity::set_for_current(core) {
        warn!(worker, core = core.id, "failed to pin worker to core");
        return false;
    }

    trace!(worker, core = core.id, "pinned worker");
    true
}

// SPDX-License-Identifier: MIT

//! Process-liveness check: given `(pid, annotator, domain)`, verify the
//! process is both alive and actually the worker it claims to be, to
//! defend against PID reuse after a long-lived supervisor restart.
//!
//! On Linux, `/proc/<pid>/cmdline` is read and checked for the worker
//! entry point plus the `(annotator, domain)` arguments. Where `/proc` is
//! unavailable (non-Linux), a zero-signal probe is used instead, which
//! cannot rule out PID reuse by itself.

use crate::ids::WorkerKey;
use std::path::Path;

/// Returns `true` if `pid` is alive and, where verifiable, is running the
/// worker entry point for `worker`.
pub fn is_worker_alive(pid: u32, worker: &WorkerKey) -> bool {
    if let Some(matches) = cmdline_matches(pid, worker) {
        return matches;
    }
    signal_probe(pid)
}

/// Returns `true` if `pid` is alive, with no attempt to verify identity.
/// Used where the caller has no `WorkerKey` to check against (e.g. the
/// watchdog's orphan sweep over bare registry rows).
pub fn is_alive(pid: u32) -> bool {
    signal_probe(pid)
}

fn signal_probe(pid: u32) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;
    kill(Pid::from_raw(pid as i32), None::<Signal>).is_ok()
}

/// Reads `/proc/<pid>/cmdline` and checks it names the worker binary with
/// matching `(annotator, domain)` arguments. Returns `None` when `/proc`
/// introspection isn't available, so the caller falls back to a bare
/// liveness probe.
fn cmdline_matches(pid: u32, worker: &WorkerKey) -> Option<bool> {
    let path = Path::new("/proc").join(pid.to_string()).join("cmdline");
    let raw = std::fs::read(path).ok()?;
    let args: Vec<String> = raw.split(|b| *b == 0).filter(|s| !s.is_empty()).map(|s| String::from_utf8_lossy(s).into_owned()).collect();
    if args.is_empty() {
        return Some(false);
    }
    let names_entry_point = args.iter().any(|a| a.contains("lf-worker"));
    let names_annotator = args.iter().any(|a| a == &worker.annotator.get().to_string());
    let names_domain = args.iter().any(|a| a == worker.domain.as_str());
    Some(names_entry_point && names_annotator && names_domain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::AnnotatorId;

    #[test]
    fn current_process_is_alive() {
        assert!(is_alive(std::process::id()));
    }

    #[test]
    fn pid_zero_is_not_a_worker() {
        let worker = WorkerKey::new(AnnotatorId::new(1), "urgency");
        // pid 1 (init) exists but never matches our cmdline convention, and
        // reading its /proc entry may be permission-denied in a container,
        // either of which must resolve to "not this worker" rather than a panic.
        let _ = is_worker_alive(1, &worker);
    }

    #[test]
    fn wildly_implausible_pid_is_not_alive() {
        assert!(!is_alive(u32::MAX));
    }
}

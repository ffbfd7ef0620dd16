use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;

/// Deliver `SIGKILL` to a child's entire process group.
///
/// Only meaningful for children spawned with `process_group(0)`, which makes
/// the child its own group leader (PGID == PID) — parallel `make` and VM
/// process trees are reaped as a set this way. A child that has already
/// exited, or whose pid cannot be represented, is skipped; the caller still
/// owns the final `wait`.
pub fn kill_child_group(child: &tokio::process::Child) {
    let Some(raw) = child.id().and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    let _ = killpg(Pid::from_raw(raw), Signal::SIGKILL);
}

//! Process diagnostics logged while the coordinator is idle

use crate::job_scheduling::CoordinatorSignal;
use sysinfo::{ProcessesToUpdate, System};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Resident memory of this process, in bytes
pub fn process_memory_bytes(system: &mut System) -> Option<u64> {
    let pid = sysinfo::get_current_pid().ok()?;
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system.process(pid).map(|process| process.memory())
}

pub fn log_memory_usage(system: &mut System) {
    system.refresh_memory();
    match process_memory_bytes(system) {
        Some(bytes) => info!(
            "Memory usage: {:.1} MiB (system {:.1}/{:.1} MiB)",
            bytes as f64 / 1_048_576.0,
            system.used_memory() as f64 / 1_048_576.0,
            system.total_memory() as f64 / 1_048_576.0
        ),
        None => debug!("Process memory not available"),
    }
}

/// Log memory usage every time the coordinator becomes quiescent
pub async fn report_on_quiescence(
    mut signals: broadcast::Receiver<CoordinatorSignal>,
    cancellation_token: CancellationToken,
) {
    let mut system = System::new();
    loop {
        tokio::select! {
            signal = signals.recv() => match signal {
                Ok(CoordinatorSignal::Quiescent) => log_memory_usage(&mut system),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Diagnostics fell behind by {} coordinator signals", skipped);
                }
                Err(RecvError::Closed) => break,
            },
            _ = cancellation_token.cancelled() => break,
        }
    }
}

//! Per-physical-CPU record.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use int_enum::IntEnum;

/// State of a CPU in the hypervisor-global shutdown handshake.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntEnum)]
pub enum ShutdownState {
    None = 0,
    Started = 1,
    PermissionDenied = 2,
}

/// Per-physical-CPU bookkeeping. `cell` is a back-reference, never an owner.
pub struct PerCpu {
    pub cpu_id: usize,
    cell: AtomicU32,
    pub failed: AtomicBool,
    pub cpu_stopped: AtomicBool,
    shutdown_state: AtomicU32,
}

impl PerCpu {
    pub fn new(cpu_id: usize, owning_cell_id: u32) -> Self {
        Self {
            cpu_id,
            cell: AtomicU32::new(owning_cell_id),
            failed: AtomicBool::new(false),
            cpu_stopped: AtomicBool::new(false),
            shutdown_state: AtomicU32::new(ShutdownState::None as u32),
        }
    }

    pub fn cell_id(&self) -> u32 {
        self.cell.load(Ordering::Relaxed)
    }

    pub fn set_cell_id(&self, id: u32) {
        self.cell.store(id, Ordering::Relaxed);
    }

    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn mark_failed(&self) {
        self.failed.store(true, Ordering::Relaxed);
    }

    pub fn clear_failed(&self) {
        self.failed.store(false, Ordering::Relaxed);
    }

    pub fn shutdown_state(&self) -> ShutdownState {
        ShutdownState::try_from(self.shutdown_state.load(Ordering::Relaxed))
            .unwrap_or(ShutdownState::None)
    }

    pub fn set_shutdown_state(&self, state: ShutdownState) {
        self.shutdown_state.store(state as u32, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_percpu_starts_unfailed_and_owned_by_given_cell() {
        let percpu = PerCpu::new(2, 0);
        assert_eq!(percpu.cell_id(), 0);
        assert!(!percpu.is_failed());
        assert_eq!(percpu.shutdown_state(), ShutdownState::None);
    }

    #[test]
    fn reassigning_cell_and_clearing_failed() {
        let percpu = PerCpu::new(2, 0);
        percpu.mark_failed();
        assert!(percpu.is_failed());
        percpu.set_cell_id(1);
        percpu.clear_failed();
        assert_eq!(percpu.cell_id(), 1);
        assert!(!percpu.is_failed());
    }
}

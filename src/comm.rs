//! Cooperative shutdown channel.
//!
//! Three lock-free 32-bit words, single-producer per field: the guest writes `reply_from_cell`
//! and observes `msg_to_cell`; the hypervisor writes `msg_to_cell` and observes `reply_from_cell`
//! and `cell_state`. Writes are paired `clear → fence → publish` so a new message is never
//! observed alongside a stale reply, and vice versa.

use core::sync::atomic::{AtomicU32, Ordering};
use int_enum::IntEnum;

use crate::arch::ArchHooks;

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntEnum)]
pub enum MsgToCell {
    None = 0,
    ShutdownRequested = 1,
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntEnum)]
pub enum ReplyFromCell {
    None = 0,
    ShutdownOk = 1,
    ShutdownDenied = 2,
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntEnum)]
pub enum CellState {
    Running = 0,
    ShutDown = 1,
    Failed = 2,
}

/// The shared comm page, as observed by the guest.
pub struct CommRegion {
    msg_to_cell: AtomicU32,
    reply_from_cell: AtomicU32,
    cell_state: AtomicU32,
}

impl CommRegion {
    pub const fn new() -> Self {
        Self {
            msg_to_cell: AtomicU32::new(MsgToCell::None as u32),
            reply_from_cell: AtomicU32::new(ReplyFromCell::None as u32),
            cell_state: AtomicU32::new(CellState::Running as u32),
        }
    }

    // --- hypervisor side ---

    /// `clear reply → fence → publish message`, matching `jailhouse_send_msg_to_cell`.
    pub fn send_msg_to_cell(&self, msg: MsgToCell) {
        self.reply_from_cell
            .store(ReplyFromCell::None as u32, Ordering::Relaxed);
        core::sync::atomic::fence(Ordering::SeqCst);
        self.msg_to_cell.store(msg as u32, Ordering::Relaxed);
    }

    pub fn reply_from_cell(&self) -> Option<ReplyFromCell> {
        ReplyFromCell::try_from(self.reply_from_cell.load(Ordering::Relaxed)).ok()
    }

    /// Returns `None` if the stored value is not one of the three known states, mapped by the
    /// caller to `invalid`.
    pub fn cell_state(&self) -> Option<CellState> {
        CellState::try_from(self.cell_state.load(Ordering::Relaxed)).ok()
    }

    pub fn set_cell_state(&self, state: CellState) {
        self.cell_state.store(state as u32, Ordering::Relaxed);
    }

    // --- guest side ---

    pub fn msg_to_cell(&self) -> Option<MsgToCell> {
        MsgToCell::try_from(self.msg_to_cell.load(Ordering::Relaxed)).ok()
    }

    /// `clear message → fence → publish reply`, matching `jailhouse_send_reply_from_cell`.
    pub fn send_reply_from_cell(&self, reply: ReplyFromCell) {
        self.msg_to_cell
            .store(MsgToCell::None as u32, Ordering::Relaxed);
        core::sync::atomic::fence(Ordering::SeqCst);
        self.reply_from_cell.store(reply as u32, Ordering::Relaxed);
    }
}

impl Default for CommRegion {
    fn default() -> Self {
        Self::new()
    }
}

/// `cell_shutdown_ok`: asks a cell's guest for shutdown consent.
///
/// `spin_budget`, if set, bounds the number of spin iterations before giving up with `false`;
/// `None` preserves the original unbounded behavior.
pub fn cell_shutdown_ok(
    arch: &dyn ArchHooks,
    comm: &CommRegion,
    unmanaged_exit: bool,
    spin_budget: Option<u32>,
) -> bool {
    if unmanaged_exit {
        return true;
    }

    comm.send_msg_to_cell(MsgToCell::ShutdownRequested);

    let mut spins: u32 = 0;
    loop {
        if let Some(reply) = comm.reply_from_cell() {
            if reply == ReplyFromCell::ShutdownOk {
                return true;
            }
            if reply == ReplyFromCell::ShutdownDenied {
                return false;
            }
        }
        if let Some(state) = comm.cell_state() {
            if matches!(state, CellState::ShutDown | CellState::Failed) {
                return true;
            }
        }

        if let Some(budget) = spin_budget {
            spins += 1;
            if spins >= budget {
                return false;
            }
        }
        arch.relax();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopArch;
    impl crate::arch::ArchHooks for NoopArch {
        fn suspend_cpu(&self, _cpu_id: usize) {}
        fn resume_cpu(&self, _cpu_id: usize) {}
        fn park_cpu(&self, _cpu_id: usize) {}
        fn reset_cpu(&self, _cpu_id: usize) {}
        fn shutdown_cpu(&self, _cpu_id: usize) {}
        fn arch_cell_create(&self, _cell: &crate::cell::CellRecord) -> Result<(), ()> {
            Ok(())
        }
        fn arch_cell_destroy(&self, _cell: &crate::cell::CellRecord) {}
        fn arch_shutdown(&self) {}
        fn arch_map_memory_region(
            &self,
            _cell_id: u32,
            _region: &crate::memory_region::MemoryRegion,
        ) -> Result<(), ()> {
            Ok(())
        }
        fn arch_unmap_memory_region(
            &self,
            _cell_id: u32,
            _region: &crate::memory_region::MemoryRegion,
        ) -> Result<(), ()> {
            Ok(())
        }
        fn page_map_create(
            &self,
            _phys_start: crate::addr::PhysAddr,
            _size: usize,
        ) -> Result<*const u8, ()> {
            Err(())
        }
        fn temp_window_size(&self) -> usize {
            0
        }
        fn halt(&self) -> ! {
            loop {}
        }
    }

    #[test]
    fn unmanaged_exit_skips_the_handshake() {
        let comm = CommRegion::new();
        assert!(cell_shutdown_ok(&NoopArch, &comm, true, Some(1)));
        // no message should have been sent
        assert_eq!(comm.msg_to_cell(), Some(MsgToCell::None));
    }

    #[test]
    fn guest_consent_returns_true() {
        extern crate std;
        let comm = CommRegion::new();
        std::thread::scope(|scope| {
            scope.spawn(|| {
                while comm.msg_to_cell() != Some(MsgToCell::ShutdownRequested) {
                    core::hint::spin_loop();
                }
                comm.send_reply_from_cell(ReplyFromCell::ShutdownOk);
            });
            assert!(cell_shutdown_ok(&NoopArch, &comm, false, None));
        });
    }

    #[test]
    fn guest_refusal_returns_false() {
        extern crate std;
        let comm = CommRegion::new();
        std::thread::scope(|scope| {
            scope.spawn(|| {
                while comm.msg_to_cell() != Some(MsgToCell::ShutdownRequested) {
                    core::hint::spin_loop();
                }
                comm.send_reply_from_cell(ReplyFromCell::ShutdownDenied);
            });
            assert!(!cell_shutdown_ok(&NoopArch, &comm, false, None));
        });
    }

    #[test]
    fn failed_cell_state_counts_as_consent() {
        let comm = CommRegion::new();
        comm.set_cell_state(CellState::Failed);
        assert!(cell_shutdown_ok(&NoopArch, &comm, false, Some(10)));
    }

    #[test]
    fn spin_budget_gives_up_eventually() {
        let comm = CommRegion::new();
        assert!(!cell_shutdown_ok(&NoopArch, &comm, false, Some(5)));
    }
}

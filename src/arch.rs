//! Architecture-specific primitives consumed as external collaborators.
//!
//! The core crate targets no specific board: everything that would differ between architectures
//! (virtualization entry/exit, page-table construction, the privileged CPU primitives) is named
//! here as a single object-safe trait and supplied by the embedder, rather than selected at
//! compile time with a `cfg_if!` over concrete `arch::x86_64`/`arch::aarch64` modules.

use crate::cell::CellRecord;
use crate::memory_region::MemoryRegion;

/// Everything the lifecycle engine needs from the hardware/arch layer but does not implement
/// itself.
pub trait ArchHooks {
    /// Blocks the calling (initiator) CPU until `cpu_id` has parked in a safe state. Must not
    /// return until the peer has acknowledged.
    fn suspend_cpu(&self, cpu_id: usize);

    /// Releases a previously suspended or parked CPU.
    fn resume_cpu(&self, cpu_id: usize);

    /// Parks `cpu_id` indefinitely.
    fn park_cpu(&self, cpu_id: usize);

    /// Resets `cpu_id` so it begins executing its (possibly new) cell's guest.
    fn reset_cpu(&self, cpu_id: usize);

    /// Shuts a single CPU down as part of the global shutdown handshake.
    fn shutdown_cpu(&self, cpu_id: usize);

    /// Builds `cell`'s guest page tables from its stored configuration.
    fn arch_cell_create(&self, cell: &CellRecord) -> Result<(), ()>;

    /// Tears down a cell's arch-specific state.
    fn arch_cell_destroy(&self, cell: &CellRecord);

    /// Final arch-specific teardown of the root cell itself.
    fn arch_shutdown(&self);

    /// Installs `region` into `cell_id`'s page tables.
    fn arch_map_memory_region(&self, cell_id: u32, region: &MemoryRegion) -> Result<(), ()>;

    /// Removes `region` from `cell_id`'s page tables. Guaranteed to succeed when the region was
    /// installed as a whole.
    fn arch_unmap_memory_region(&self, cell_id: u32, region: &MemoryRegion) -> Result<(), ()>;

    /// Installs a temporary, read-only, non-coherent mapping of `size` bytes starting at
    /// `phys_start` into the initiator's per-CPU temporary-mapping window, returning its capacity
    /// in bytes so callers can reject configurations that don't fit.
    fn page_map_create(&self, phys_start: crate::addr::PhysAddr, size: usize) -> Result<*const u8, ()>;

    /// Size in bytes of the per-CPU temporary-mapping window.
    fn temp_window_size(&self) -> usize;

    /// Halts the calling CPU without returning.
    fn halt(&self) -> !;

    /// Yields the CPU briefly while busy-waiting.
    fn relax(&self) {
        core::hint::spin_loop();
    }
}

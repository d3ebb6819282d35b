//! Panic/halt path. Neither function returns; neither attempts rollback.

use core::sync::atomic::Ordering;

use crate::comm::CellState;
use crate::context::HypervisorContext;
use crate::hv_error;

/// Prints a stopping message, marks the CPU stopped, then halts.
///
/// The global panic token serialises concurrently panicking CPUs so only one prints at a time;
/// each CPU blocks to acquire it, does its own printing, then releases it before halting so the
/// next panicking CPU (if any) can proceed.
pub fn panic_stop(ctx: &HypervisorContext, cpu_id: usize) -> ! {
    stop_and_mark(ctx, cpu_id);
    ctx.arch.halt()
}

/// Marks `cpu_id` failed; if every CPU in its owning cell has now failed, marks the cell's
/// `cell_state` as `FAILED` (consulted by [`crate::lifecycle::cpu_get_state`] via
/// [`crate::percpu::PerCpu::is_failed`]).
pub fn panic_halt(ctx: &HypervisorContext, cpu_id: usize) -> ! {
    fail_and_propagate(ctx, cpu_id);
    ctx.arch.halt()
}

/// The state transition `panic_stop` performs before halting, split out so it can be exercised
/// without also invoking the arch-specific, never-returning halt.
fn stop_and_mark(ctx: &HypervisorContext, cpu_id: usize) {
    while !ctx.try_claim_panic_token() {
        ctx.arch.relax();
    }

    hv_error!(ctx.log.as_ref(), "cpu {cpu_id} stopping");
    if let Some(percpu) = ctx.percpu(cpu_id) {
        percpu.cpu_stopped.store(true, Ordering::Relaxed);
    }

    ctx.release_panic_token();
}

/// The state transition `panic_halt` performs before halting.
fn fail_and_propagate(ctx: &HypervisorContext, cpu_id: usize) {
    if let Some(percpu) = ctx.percpu(cpu_id) {
        percpu.mark_failed();

        let cell_id = percpu.cell_id();
        if let Some(cell) = ctx.registry.find_by_id(cell_id) {
            let all_failed = cell
                .cpu_set
                .iter()
                .all(|id| ctx.percpu(id).is_some_and(|p| p.is_failed()));
            if all_failed {
                cell.comm_region.set_cell_state(CellState::Failed);
            }
        }
    }
}

#[cfg(test)]
pub(crate) fn fail_and_propagate_for_test(ctx: &HypervisorContext, cpu_id: usize) {
    fail_and_propagate(ctx, cpu_id)
}

#[cfg(test)]
pub(crate) fn stop_and_mark_for_test(ctx: &HypervisorContext, cpu_id: usize) {
    stop_and_mark(ctx, cpu_id)
}

#[cfg(test)]
mod tests {
    extern crate std;
    use super::*;
    use crate::arch::ArchHooks;
    use crate::cell::{CellConfig, CellFlags, CellRecord, CellRegistry};
    use crate::comm::CommRegion;
    use crate::context::PoolStats;
    use crate::cpuset::CpuSet;
    use crate::logging::NullSink;
    use crate::percpu::PerCpu;
    use alloc::boxed::Box;
    use alloc::string::String;

    struct NoopArch;
    impl ArchHooks for NoopArch {
        fn suspend_cpu(&self, _cpu_id: usize) {}
        fn resume_cpu(&self, _cpu_id: usize) {}
        fn park_cpu(&self, _cpu_id: usize) {}
        fn reset_cpu(&self, _cpu_id: usize) {}
        fn shutdown_cpu(&self, _cpu_id: usize) {}
        fn arch_cell_create(&self, _cell: &CellRecord) -> Result<(), ()> {
            Ok(())
        }
        fn arch_cell_destroy(&self, _cell: &CellRecord) {}
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
            panic!("halt() called in a test");
        }
    }

    fn ctx_with_one_cpu() -> HypervisorContext {
        let root = CellRecord {
            id: 0,
            config: Box::new(CellConfig {
                name: String::from("root"),
                max_cpu_id: 0,
                cpu_bitmap: alloc::vec![1],
                memory_regions: alloc::vec![],
                flags: CellFlags::empty(),
            }),
            cpu_set: {
                let mut set = CpuSet::new(0, 1);
                set.set(0).unwrap();
                set
            },
            comm_region: CommRegion::new(),
            data_pages: 1,
        };
        HypervisorContext::new(
            CellRegistry::new(root),
            alloc::vec![PerCpu::new(0, 0)],
            PoolStats::default(),
            PoolStats::default(),
            0x1000,
            Box::new(NoopArch),
            Box::new(NullSink),
        )
    }

    #[test]
    fn stop_marks_cpu_stopped_and_releases_token() {
        let ctx = ctx_with_one_cpu();
        stop_and_mark_for_test(&ctx, 0);
        assert!(ctx.percpu(0).unwrap().cpu_stopped.load(Ordering::Relaxed));
        // token was released, so a second call does not deadlock
        stop_and_mark_for_test(&ctx, 0);
    }

    #[test]
    fn halt_marks_cpu_failed() {
        let ctx = ctx_with_one_cpu();
        fail_and_propagate_for_test(&ctx, 0);
        assert!(ctx.percpu(0).unwrap().is_failed());
    }
}

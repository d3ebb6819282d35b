//! Global hypervisor state, threaded explicitly rather than hidden behind module statics — this lets the engine be instantiated more than once, which the test suite
//! relies on.

use alloc::boxed::Box;

use crate::arch::ArchHooks;
use crate::cell::CellRegistry;
use crate::logging::LogSink;
use crate::percpu::PerCpu;
use crate::utils::locks::Mutex;

/// Observable usage of a frame pool (`mem_pool`/`remap_pool`), reported through
/// `HYPERVISOR_GET_INFO`. The pool itself is an external collaborator; this crate only tracks the
/// two counters the info selectors expose.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolStats {
    pub size: usize,
    pub used: usize,
}

/// Every piece of process-wide state the lifecycle engine needs: `root_cell`, the cell registry,
/// per-CPU records, the shutdown spinlock, pool usage counters, and panic bookkeeping.
pub struct HypervisorContext {
    pub registry: CellRegistry,
    pub percpus: alloc::vec::Vec<PerCpu>,
    pub shutdown_lock: Mutex<()>,
    pub mem_pool: PoolStats,
    pub remap_pool: PoolStats,
    /// Set while a CPU is mid-panic; read by a second panicking CPU to decide whether it owns the
    /// global panic token.
    panic_in_progress: core::sync::atomic::AtomicBool,
    /// Upper bound, in spin iterations, on `cell_shutdown_ok`'s wait for guest consent. `None`
    /// preserves the original unbounded behavior.
    pub shutdown_spin_budget: Option<u32>,
    /// Frame size used to validate memory-region alignment. An external
    /// collaborator constant in the original; configurable here so tests can use a small frame.
    pub frame_size: usize,
    pub arch: Box<dyn ArchHooks>,
    pub log: Box<dyn LogSink>,
}

impl HypervisorContext {
    pub fn new(
        registry: CellRegistry,
        percpus: alloc::vec::Vec<PerCpu>,
        mem_pool: PoolStats,
        remap_pool: PoolStats,
        frame_size: usize,
        arch: Box<dyn ArchHooks>,
        log: Box<dyn LogSink>,
    ) -> Self {
        Self {
            registry,
            percpus,
            shutdown_lock: Mutex::new(()),
            mem_pool,
            remap_pool,
            panic_in_progress: core::sync::atomic::AtomicBool::new(false),
            shutdown_spin_budget: None,
            frame_size,
            arch,
            log,
        }
    }

    pub fn root_cell_id(&self) -> u32 {
        self.registry.root().id
    }

    pub fn percpu(&self, cpu_id: usize) -> Option<&PerCpu> {
        self.percpus.iter().find(|p| p.cpu_id == cpu_id)
    }

    /// `true` if `initiator` currently belongs to the root cell. All lifecycle entry points
    /// require this.
    pub fn initiator_is_root(&self, initiator: usize) -> bool {
        self.percpu(initiator)
            .is_some_and(|p| p.cell_id() == self.root_cell_id())
    }

    pub fn try_claim_panic_token(&self) -> bool {
        self.panic_in_progress
            .compare_exchange(
                false,
                true,
                core::sync::atomic::Ordering::AcqRel,
                core::sync::atomic::Ordering::Acquire,
            )
            .is_ok()
    }

    pub fn release_panic_token(&self) {
        self.panic_in_progress
            .store(false, core::sync::atomic::Ordering::Release);
    }
}

//! Cell lifecycle operations: `create`, `destroy`, `get_state`, `shutdown`.
//!
//! All entry points require the initiator's current cell to be the root; this is the only
//! permission model the core has.

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::cell::{CellConfig, CellRecord};
use crate::comm::{cell_shutdown_ok, CellState};
use crate::context::HypervisorContext;
use crate::cpuset::CpuSet;
use crate::error::{HvError, HvResult};
use crate::memory_region;
use crate::percpu::ShutdownState;
use crate::suspend::{resume, suspend};
use crate::{hv_info, hv_warn};

/// `cpu_get_state` result; distinct from [`CellState`] — a CPU has no "shut down" state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuRunState {
    Running = 0,
    Failed = 1,
}

/// Creates a new cell from `config`, carving its CPUs and memory regions out of the root.
/// Returns the new cell's id on success.
pub fn create(ctx: &mut HypervisorContext, initiator: usize, config: CellConfig) -> HvResult<u32> {
    if !ctx.initiator_is_root(initiator) {
        return Err(HvError::PermissionDenied);
    }

    let root_id = ctx.root_cell_id();
    suspend(ctx.arch.as_ref(), ctx.registry.root(), initiator);

    let result = create_locked(ctx, initiator, config);

    // Resume uses the initiator's *current* cell, which remains root whether create succeeded or
    // failed: on success the root's set has shrunk; on failure it is unchanged.
    resume(ctx.arch.as_ref(), ctx.registry.root(), initiator);
    if let Ok(id) = result {
        hv_info!(ctx.log.as_ref(), "cell {id} created (root id {root_id})");
    }
    result
}

fn create_locked(
    ctx: &mut HypervisorContext,
    initiator: usize,
    config: CellConfig,
) -> HvResult<u32> {
    // Stage: map + size-check the configuration. Parsing the blob itself is out
    // of scope; this crate receives an already-parsed `CellConfig` and only enforces the
    // too-big check against the arch layer's temporary-mapping window.
    if config.wire_size() > ctx.arch.temp_window_size() {
        return Err(HvError::TooBig);
    }

    // Stage: validate.
    if ctx.registry.find_by_name(&config.name).is_some() {
        return Err(HvError::Exists);
    }
    for region in &config.memory_regions {
        if !region.is_well_formed(ctx.frame_size) {
            return Err(HvError::Invalid);
        }
    }

    // Stage: allocate the cell record. The frame pool itself is an external
    // collaborator; this crate only tracks the two counters surfaced by `HYPERVISOR_GET_INFO`.
    let data_pages = 1;
    if ctx.mem_pool.used + data_pages > ctx.mem_pool.size {
        return Err(HvError::OutOfMemory);
    }
    ctx.mem_pool.used += data_pages;

    // Stage: initialise the CpuSet. Rollback of the CpuSet's owned frame, where
    // the original frees it explicitly, falls out of Rust's ownership model: an unreturned
    // `CpuSet` is simply dropped and its buffer reclaimed, so no manual free path is needed on any
    // of the failure returns below.
    let new_cpu_set = CpuSet::from_bytes(config.max_cpu_id, &config.cpu_bitmap);

    // Stage: disjointness checks.
    let root = ctx.registry.root();
    if new_cpu_set.test(initiator)
        || root.cpu_set.max_cpu_id() < new_cpu_set.max_cpu_id()
        || !root.cpu_set.is_superset_of(&new_cpu_set)
    {
        ctx.mem_pool.used -= data_pages;
        return Err(HvError::Busy);
    }

    let new_id = ctx.registry.next_free_id();
    let cpu_ids: Vec<usize> = new_cpu_set.iter().collect();

    // Stage: shrink the root.
    {
        let root = ctx.registry.root_mut();
        for &cpu_id in &cpu_ids {
            root.cpu_set.clear(cpu_id);
        }
    }

    // Stage: unmap from root.
    let mut unmapped: Vec<crate::memory_region::MemoryRegion> = Vec::new();
    let root_id = ctx.root_cell_id();
    for region in &config.memory_regions {
        if region.is_comm_region() {
            continue;
        }
        let identity = region.identity();
        match memory_region::unmap(ctx.arch.as_ref(), root_id, &identity) {
            Ok(()) => unmapped.push(identity),
            Err(()) => {
                restore_root_bits(ctx, &cpu_ids);
                let root_regions = ctx.registry.root().config.memory_regions.clone();
                for region in &unmapped {
                    memory_region::remap_to_root_cell(
                        ctx.arch.as_ref(),
                        ctx.log.as_ref(),
                        root_id,
                        &root_regions,
                        region,
                    );
                }
                ctx.mem_pool.used -= data_pages;
                return Err(HvError::Invalid);
            }
        }
    }

    let cell_record = CellRecord {
        id: new_id,
        config: Box::new(config),
        cpu_set: new_cpu_set,
        comm_region: crate::comm::CommRegion::new(),
        data_pages,
    };

    // Stage: arch create.
    if let Err(()) = ctx.arch.arch_cell_create(&cell_record) {
        restore_root_bits(ctx, &cpu_ids);
        let root_regions = ctx.registry.root().config.memory_regions.clone();
        for region in &unmapped {
            memory_region::remap_to_root_cell(
                ctx.arch.as_ref(),
                ctx.log.as_ref(),
                root_id,
                &root_regions,
                region,
            );
        }
        ctx.mem_pool.used -= data_pages;
        return Err(HvError::OutOfMemory);
    }

    // Stage: publish.
    ctx.registry.insert(cell_record);
    for &cpu_id in &cpu_ids {
        if let Some(percpu) = ctx.percpu(cpu_id) {
            percpu.set_cell_id(new_id);
            percpu.clear_failed();
        }
        ctx.arch.reset_cpu(cpu_id);
    }

    Ok(new_id)
}

fn restore_root_bits(ctx: &mut HypervisorContext, cpu_ids: &[usize]) {
    let root = ctx.registry.root_mut();
    for &cpu_id in cpu_ids {
        root.cpu_set.set(cpu_id);
    }
}

/// Tears a cell down, folding its CPUs and memory regions back into the root.
pub fn destroy(ctx: &mut HypervisorContext, initiator: usize, id: u32) -> HvResult<()> {
    if !ctx.initiator_is_root(initiator) {
        return Err(HvError::PermissionDenied);
    }

    suspend(ctx.arch.as_ref(), ctx.registry.root(), initiator);
    let result = destroy_locked(ctx, initiator, id);
    resume(ctx.arch.as_ref(), ctx.registry.root(), initiator);
    result
}

fn destroy_locked(ctx: &mut HypervisorContext, initiator: usize, id: u32) -> HvResult<()> {
    let root_id = ctx.root_cell_id();
    if id == root_id {
        return Err(HvError::Invalid);
    }

    let cell = ctx.registry.find_by_id(id).ok_or(HvError::NotFound)?;

    // Cooperative shutdown check.
    if !cell_shutdown_ok(
        ctx.arch.as_ref(),
        &cell.comm_region,
        cell.config.unmanaged_exit(),
        ctx.shutdown_spin_budget,
    ) {
        return Err(HvError::PermissionDenied);
    }

    suspend(ctx.arch.as_ref(), cell, initiator);
    let cpu_ids: Vec<usize> = cell.cpu_set.iter().collect();
    let regions = cell.config.memory_regions.clone();

    for &cpu_id in &cpu_ids {
        ctx.arch.park_cpu(cpu_id);
    }
    {
        let root = ctx.registry.root_mut();
        for &cpu_id in &cpu_ids {
            root.cpu_set.set(cpu_id);
        }
    }
    for &cpu_id in &cpu_ids {
        if let Some(percpu) = ctx.percpu(cpu_id) {
            percpu.set_cell_id(root_id);
            percpu.clear_failed();
        }
    }

    for region in &regions {
        // Guaranteed to succeed: the region was installed as a whole, so no split is required on
        // teardown.
        let _ = memory_region::unmap(ctx.arch.as_ref(), id, region);
        if !region.is_comm_region() {
            let root_regions = ctx.registry.root().config.memory_regions.clone();
            memory_region::remap_to_root_cell(
                ctx.arch.as_ref(),
                ctx.log.as_ref(),
                root_id,
                &root_regions,
                region,
            );
        }
    }

    if let Some(cell) = ctx.registry.find_by_id(id) {
        ctx.arch.arch_cell_destroy(cell);
    }

    let removed = ctx.registry.remove(id).ok_or(HvError::NotFound)?;
    ctx.mem_pool.used = ctx.mem_pool.used.saturating_sub(removed.data_pages);
    Ok(())
}

/// Reads a cell's comm-page state. No explicit synchronization needed: a concurrent create/destroy
/// is forced to have suspended the root-cell initiator before it could mutate state.
pub fn get_state(ctx: &HypervisorContext, initiator: usize, id: u32) -> HvResult<CellState> {
    if !ctx.initiator_is_root(initiator) {
        return Err(HvError::PermissionDenied);
    }
    let cell = ctx.registry.find_by_id(id).ok_or(HvError::NotFound)?;
    cell.comm_region.cell_state().ok_or(HvError::Invalid)
}

/// `CPU_GET_STATE`. `failed` is set by [`crate::panic::panic_halt`].
///
/// Root may query any CPU. A non-root initiator may only query a CPU belonging to its own
/// cell; there is no synchronization concern here since a concurrent `destroy` of that cell
/// would have to suspend the initiator first.
pub fn cpu_get_state(
    ctx: &HypervisorContext,
    initiator: usize,
    cpu_id: usize,
) -> HvResult<CpuRunState> {
    if !ctx.initiator_is_root(initiator) {
        let permitted = ctx
            .percpu(initiator)
            .and_then(|p| ctx.registry.find_by_id(p.cell_id()))
            .is_some_and(|cell| cell.cpu_set.test(cpu_id));
        if !permitted {
            return Err(HvError::PermissionDenied);
        }
    }
    let percpu = ctx.percpu(cpu_id).ok_or(HvError::NotFound)?;
    Ok(if percpu.is_failed() {
        CpuRunState::Failed
    } else {
        CpuRunState::Running
    })
}

/// Brings the whole machine down. A two-phase all-CPU handshake under a global spinlock.
pub fn shutdown(ctx: &mut HypervisorContext, initiator: usize) -> HvResult<()> {
    if !ctx.initiator_is_root(initiator) {
        return Err(HvError::PermissionDenied);
    }

    let _guard = ctx.shutdown_lock.lock();

    let own_state = ctx
        .percpu(initiator)
        .map(|p| p.shutdown_state())
        .unwrap_or(ShutdownState::None);

    if own_state == ShutdownState::None {
        let mut chosen = ShutdownState::Started;
        for cell in ctx.registry.non_root_cells() {
            if !cell_shutdown_ok(
                ctx.arch.as_ref(),
                &cell.comm_region,
                cell.config.unmanaged_exit(),
                ctx.shutdown_spin_budget,
            ) {
                chosen = ShutdownState::PermissionDenied;
                break;
            }
        }

        if chosen == ShutdownState::Started {
            let non_root_ids: Vec<u32> = ctx.registry.non_root_cells().map(|c| c.id).collect();
            for cell_id in non_root_ids {
                if let Some(cell) = ctx.registry.find_by_id(cell_id) {
                    suspend(ctx.arch.as_ref(), cell, initiator);
                    for cpu_id in cell.cpu_set.iter() {
                        ctx.arch.shutdown_cpu(cpu_id);
                    }
                }
            }
            ctx.arch.arch_shutdown();
        } else {
            hv_warn!(ctx.log.as_ref(), "shutdown refused by a non-root cell");
        }

        let root_cpu_ids: Vec<usize> = ctx.registry.root().cpu_set.iter().collect();
        for cpu_id in root_cpu_ids {
            if let Some(percpu) = ctx.percpu(cpu_id) {
                percpu.set_shutdown_state(chosen);
            }
        }
    }

    let final_state = ctx
        .percpu(initiator)
        .map(|p| p.shutdown_state())
        .unwrap_or(ShutdownState::None);
    let result = if final_state == ShutdownState::Started {
        hv_info!(ctx.log.as_ref(), "cpu {initiator} released from shutdown");
        Ok(())
    } else {
        Err(HvError::PermissionDenied)
    };

    if let Some(percpu) = ctx.percpu(initiator) {
        percpu.set_shutdown_state(ShutdownState::None);
    }

    result
}

//! Hypercall dispatcher.
//!
//! Decoding raw hypercall arguments off the initiator's register file happens below this crate,
//! in whatever trap handler the embedder wires up; this crate accepts already-decoded
//! [`HypercallArgs`] and returns the signed result the ABI specifies (non-negative on success,
//! negative [`HvError`] code otherwise).

use int_enum::IntEnum;

use crate::cell::CellConfig;
use crate::context::HypervisorContext;
use crate::lifecycle;

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntEnum)]
pub enum HypercallNumber {
    CellCreate = 0,
    CellDestroy = 1,
    CellGetState = 2,
    CpuGetState = 3,
    HypervisorGetInfo = 4,
    Shutdown = 5,
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntEnum)]
pub enum InfoSelector {
    MemPoolSize = 0,
    MemPoolUsed = 1,
    RemapPoolSize = 2,
    RemapPoolUsed = 3,
    NumCells = 4,
}

/// Decoded arguments for one hypercall, tagged with the operation they belong to.
pub enum HypercallArgs {
    CellCreate(CellConfig),
    CellDestroy(u32),
    CellGetState(u32),
    CpuGetState(usize),
    HypervisorGetInfo(InfoSelector),
    Shutdown,
}

impl HypercallArgs {
    pub const fn number(&self) -> HypercallNumber {
        match self {
            HypercallArgs::CellCreate(_) => HypercallNumber::CellCreate,
            HypercallArgs::CellDestroy(_) => HypercallNumber::CellDestroy,
            HypercallArgs::CellGetState(_) => HypercallNumber::CellGetState,
            HypercallArgs::CpuGetState(_) => HypercallNumber::CpuGetState,
            HypercallArgs::HypervisorGetInfo(_) => HypercallNumber::HypervisorGetInfo,
            HypercallArgs::Shutdown => HypercallNumber::Shutdown,
        }
    }
}

/// Runs one hypercall on behalf of `initiator`, returning the signed ABI result.
pub fn dispatch(ctx: &mut HypervisorContext, initiator: usize, args: HypercallArgs) -> i64 {
    let result = match args {
        HypercallArgs::CellCreate(config) => {
            lifecycle::create(ctx, initiator, config).map(|id| id as i64)
        }
        HypercallArgs::CellDestroy(id) => lifecycle::destroy(ctx, initiator, id).map(|()| 0),
        HypercallArgs::CellGetState(id) => {
            lifecycle::get_state(ctx, initiator, id).map(|s| s as i64)
        }
        HypercallArgs::CpuGetState(cpu_id) => {
            lifecycle::cpu_get_state(ctx, initiator, cpu_id).map(|s| s as i64)
        }
        HypercallArgs::HypervisorGetInfo(selector) => {
            Ok(hypervisor_get_info(ctx, selector) as i64)
        }
        HypercallArgs::Shutdown => lifecycle::shutdown(ctx, initiator).map(|()| 0),
    };

    match result {
        Ok(value) => value,
        Err(err) => err.into(),
    }
}

fn hypervisor_get_info(ctx: &HypervisorContext, selector: InfoSelector) -> usize {
    match selector {
        InfoSelector::MemPoolSize => ctx.mem_pool.size,
        InfoSelector::MemPoolUsed => ctx.mem_pool.used,
        InfoSelector::RemapPoolSize => ctx.remap_pool.size,
        InfoSelector::RemapPoolUsed => ctx.remap_pool.used,
        InfoSelector::NumCells => ctx.registry.len(),
    }
}

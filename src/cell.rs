//! Cell configuration, records, and the cell registry.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use bitflags::bitflags;

use crate::comm::CommRegion;
use crate::cpuset::CpuSet;
use crate::memory_region::MemoryRegion;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CellFlags: u32 {
        /// Opts the cell out of cooperative shutdown.
        const UNMANAGED_EXIT = 1 << 0;
    }
}

/// An immutable descriptor for a cell. The wire format a management tool would send over is
/// decoded elsewhere; this crate only ever receives the already-parsed fields.
#[derive(Debug, Clone)]
pub struct CellConfig {
    pub name: String,
    pub max_cpu_id: usize,
    pub cpu_bitmap: Vec<u8>,
    pub memory_regions: Vec<MemoryRegion>,
    pub flags: CellFlags,
}

impl CellConfig {
    pub fn unmanaged_exit(&self) -> bool {
        self.flags.contains(CellFlags::UNMANAGED_EXIT)
    }

    /// Total size this config's on-the-wire form would occupy, for the `too_big` check against
    /// the temporary-mapping window. Since this crate receives already-parsed
    /// configs rather than the raw blob, the header/body split is modelled as a single size hint
    /// supplied by the caller at construction.
    pub fn wire_size(&self) -> usize {
        self.cpu_bitmap.len() + self.memory_regions.len() * core::mem::size_of::<MemoryRegion>()
    }
}

/// A live cell: `id`, an inline copy of its configuration, its CpuSet, and its comm page.
///
/// The original C stores the configuration copy and the cell struct in the same contiguous frame
/// extent (`cell->config = (void*)cell + sizeof(*cell)`); here that's expressed as ownership of
/// the `CellConfig` directly, with `data_pages` retained only as the rollback/accounting figure
/// used by destroy.
pub struct CellRecord {
    pub id: u32,
    pub config: Box<CellConfig>,
    pub cpu_set: CpuSet,
    pub comm_region: CommRegion,
    /// Frames occupied by this cell's record, so destroy can free the same extent.
    pub data_pages: usize,
}

impl CellRecord {
    pub fn name(&self) -> &str {
        &self.config.name
    }
}

/// Smallest free cell id scan result, tracked separately from registry index.
fn get_free_cell_id(cells: &[CellRecord]) -> u32 {
    let mut candidate = 0u32;
    loop {
        if !cells.iter().any(|c| c.id == candidate) {
            return candidate;
        }
        candidate += 1;
    }
}

/// Roster of live cells. The root cell is always at index 0 and is never removed; ids are
/// decoupled from indices so destroy/create can reuse the smallest free id without disturbing the
/// registry's indexing.
pub struct CellRegistry {
    cells: Vec<CellRecord>,
}

impl CellRegistry {
    /// Builds a registry with `root` pinned at index 0.
    pub fn new(root: CellRecord) -> Self {
        Self { cells: alloc::vec![root] }
    }

    pub fn root(&self) -> &CellRecord {
        &self.cells[0]
    }

    pub fn root_mut(&mut self) -> &mut CellRecord {
        &mut self.cells[0]
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn for_each_cell(&self) -> impl Iterator<Item = &CellRecord> {
        self.cells.iter()
    }

    pub fn for_each_cell_mut(&mut self) -> impl Iterator<Item = &mut CellRecord> {
        self.cells.iter_mut()
    }

    /// Every cell but the root.
    pub fn non_root_cells(&self) -> impl Iterator<Item = &CellRecord> {
        self.cells.iter().skip(1)
    }

    pub fn find_by_id(&self, id: u32) -> Option<&CellRecord> {
        self.cells.iter().find(|c| c.id == id)
    }

    pub fn find_by_id_mut(&mut self, id: u32) -> Option<&mut CellRecord> {
        self.cells.iter_mut().find(|c| c.id == id)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&CellRecord> {
        self.cells.iter().find(|c| c.name() == name)
    }

    pub fn next_free_id(&self) -> u32 {
        get_free_cell_id(&self.cells)
    }

    /// Appends a new cell, assigning it the given id.
    pub fn insert(&mut self, cell: CellRecord) {
        self.cells.push(cell);
    }

    /// Unlinks the cell with `id`. Never removes the root (index 0); callers must have already
    /// rejected a request to destroy the root.
    pub fn remove(&mut self, id: u32) -> Option<CellRecord> {
        if id == self.root().id {
            return None;
        }
        let idx = self.cells.iter().position(|c| c.id == id)?;
        Some(self.cells.remove(idx))
    }
}

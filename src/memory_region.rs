//! Guest-physical → host-physical memory region mapping.

use crate::addr::{PhysAddr, VirtAddr};
use crate::arch::ArchHooks;
use crate::logging::LogSink;
use bitflags::bitflags;

bitflags! {
    /// Region flags. Must stay within [`MemoryRegionFlags::VALID_MASK`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MemoryRegionFlags: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXECUTE = 1 << 2;
        /// This region is backed by the cell's comm page, not host memory.
        const COMM_REGION = 1 << 3;
    }
}

impl MemoryRegionFlags {
    pub const VALID_MASK: Self = Self::READ
        .union(Self::WRITE)
        .union(Self::EXECUTE)
        .union(Self::COMM_REGION);
}

/// `(phys_start, virt_start, size, flags)`, all frame-aligned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    pub phys_start: PhysAddr,
    pub virt_start: VirtAddr,
    pub size: usize,
    pub flags: MemoryRegionFlags,
}

impl MemoryRegion {
    /// `true` when every address/size is aligned to `frame_size` and flags lie within the valid
    /// mask.
    pub fn is_well_formed(&self, frame_size: usize) -> bool {
        self.phys_start.is_aligned_to(frame_size)
            && self.virt_start.is_aligned_to(frame_size)
            && self.size % frame_size == 0
            && MemoryRegionFlags::VALID_MASK.contains(self.flags)
    }

    pub fn is_comm_region(&self) -> bool {
        self.flags.contains(MemoryRegionFlags::COMM_REGION)
    }

    /// A copy of this region with `virt_start` forced equal to `phys_start`, used when unmapping
    /// from the root, which owns a 1:1 mapping by construction.
    pub fn identity(&self) -> Self {
        Self {
            virt_start: VirtAddr::new(self.phys_start.as_usize()),
            ..*self
        }
    }

    /// Overlap of `self` (being released) with `other` (a root-cell region), by physical address.
    /// Returns `None` if they don't overlap.
    pub fn overlap_with(&self, other: &MemoryRegion) -> Option<MemoryRegion> {
        let (phys_start, size) = if self.phys_start.is_within(other.phys_start, other.size) {
            let size = core::cmp::min(self.size, (other.phys_start + other.size) - self.phys_start);
            (self.phys_start, size)
        } else if other.phys_start.is_within(self.phys_start, self.size) {
            let size = core::cmp::min(other.size, (self.phys_start + self.size) - other.phys_start);
            (other.phys_start, size)
        } else {
            return None;
        };

        if size == 0 {
            return None;
        }

        let offset = phys_start - other.phys_start;
        Some(MemoryRegion {
            phys_start,
            virt_start: other.virt_start + offset,
            size,
            flags: other.flags,
        })
    }
}

/// Installs `region` into `cell`'s page tables (delegates to the arch layer).
pub fn map(arch: &dyn ArchHooks, cell_id: u32, region: &MemoryRegion) -> Result<(), ()> {
    arch.arch_map_memory_region(cell_id, region)
}

/// Removes `region` from `cell`'s page tables (delegates to the arch layer).
pub fn unmap(arch: &dyn ArchHooks, cell_id: u32, region: &MemoryRegion) -> Result<(), ()> {
    arch.arch_unmap_memory_region(cell_id, region)
}

/// Re-installs the overlap of `released` with every region of `root_regions` into the root cell.
/// A failure to remap an individual overlap is logged, not propagated: the system cannot do
/// better, and the alternative (panicking) is worse.
pub fn remap_to_root_cell(
    arch: &dyn ArchHooks,
    log: &dyn LogSink,
    root_cell_id: u32,
    root_regions: &[MemoryRegion],
    released: &MemoryRegion,
) {
    for root_region in root_regions {
        let Some(overlap) = released.overlap_with(root_region) else {
            continue;
        };
        if map(arch, root_cell_id, &overlap).is_err() {
            crate::hv_warn!(
                log,
                "failed to remap [{:#x}, {:#x}) to the root cell",
                overlap.phys_start.as_usize(),
                (overlap.phys_start + overlap.size).as_usize()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(phys: usize, virt: usize, size: usize, flags: MemoryRegionFlags) -> MemoryRegion {
        MemoryRegion {
            phys_start: PhysAddr::new(phys),
            virt_start: VirtAddr::new(virt),
            size,
            flags,
        }
    }

    #[test]
    fn overlap_when_released_start_is_within_root_region() {
        let root = region(0x0000_0000, 0x0000_0000, 0x1000_0000, MemoryRegionFlags::READ);
        let released = region(
            0x0800_0000,
            0x0800_0000,
            0x0100_0000,
            MemoryRegionFlags::READ | MemoryRegionFlags::WRITE,
        );

        let overlap = released.overlap_with(&root).unwrap();
        assert_eq!(overlap.phys_start, PhysAddr::new(0x0800_0000));
        assert_eq!(overlap.size, 0x0100_0000);
        assert_eq!(overlap.flags, MemoryRegionFlags::READ);
    }

    #[test]
    fn no_overlap_when_disjoint() {
        let root = region(0x0000_0000, 0x0000_0000, 0x1000, MemoryRegionFlags::READ);
        let released = region(0x2000, 0x2000, 0x1000, MemoryRegionFlags::READ);
        assert!(released.overlap_with(&root).is_none());
    }

    #[test]
    fn comm_region_has_no_host_backing() {
        let r = region(0, 0, 0x1000, MemoryRegionFlags::COMM_REGION);
        assert!(r.is_comm_region());
    }

    #[test]
    fn well_formed_rejects_misaligned() {
        let mut r = region(0x1000, 0x1000, 0x1000, MemoryRegionFlags::READ);
        assert!(r.is_well_formed(0x1000));
        r.phys_start = PhysAddr::new(0x1001);
        assert!(!r.is_well_formed(0x1000));
    }

    #[test]
    fn well_formed_rejects_flags_outside_mask() {
        let r = region(0x1000, 0x1000, 0x1000, MemoryRegionFlags::from_bits_retain(1 << 31));
        assert!(!r.is_well_formed(0x1000));
    }
}

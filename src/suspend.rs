//! Suspend/Resume coordinator.
//!
//! Only one lifecycle operation runs at a time because every one of them begins with
//! `suspend(root_cell, initiator)`; a second root-cell initiator cannot proceed until the first
//! resumes.

use crate::arch::ArchHooks;
use crate::cell::CellRecord;

/// Quiesces every CPU in `cell`'s set except `initiator`. Blocks until every peer has
/// acknowledged (the arch primitive itself is the blocking call).
pub fn suspend(arch: &dyn ArchHooks, cell: &CellRecord, initiator: usize) {
    for cpu_id in cell.cpu_set.iter_except(initiator) {
        arch.suspend_cpu(cpu_id);
    }
}

/// Resumes every peer in the *initiator's current cell*. Intentionally not symmetric with
/// `suspend`: a `create` that shrank the root's set must resume exactly the set the root still
/// owns, not the set it owned when it was suspended.
pub fn resume(arch: &dyn ArchHooks, initiators_current_cell: &CellRecord, initiator: usize) {
    for cpu_id in initiators_current_cell.cpu_set.iter_except(initiator) {
        arch.resume_cpu(cpu_id);
    }
}

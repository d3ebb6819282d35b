//! Bounded CPU bitmaps.
//!
//! A [`CpuSet`] stores two forms chosen once at construction: **small** (inlined in the struct)
//! or **large** (a single owned frame-sized buffer). The form never changes after construction.

use alloc::boxed::Box;

/// Capacity of the inline form, in bits. Chosen so the common case (a handful of CPUs per cell)
/// never allocates.
pub const INLINE_CAPACITY_BITS: usize = 64;
const INLINE_BYTES: usize = INLINE_CAPACITY_BITS / 8;

enum Storage {
    Small([u8; INLINE_BYTES]),
    Large(Box<[u8]>),
}

/// A disjoint bitmap over physical CPU ids with a fixed `max_cpu_id` cap.
///
/// Not internally synchronized: callers (the suspend/resume coordinator) must guarantee no peer
/// is running in the affected cell while the set mutates.
pub struct CpuSet {
    storage: Storage,
    max_cpu_id: usize,
}

impl CpuSet {
    /// Builds an empty set able to hold ids up to `max_cpu_id` inclusive, choosing the storage
    /// form by comparing `configured_bytes` (the configuration's requested byte size) against the
    /// inline capacity.
    pub fn new(max_cpu_id: usize, configured_bytes: usize) -> Self {
        let storage = if configured_bytes <= INLINE_BYTES {
            Storage::Small([0; INLINE_BYTES])
        } else {
            Storage::Large(alloc::vec![0u8; configured_bytes].into_boxed_slice())
        };
        Self { storage, max_cpu_id }
    }

    /// Builds a set from a raw little-endian bitmap, for the configuration-parsing path.
    pub fn from_bytes(max_cpu_id: usize, bytes: &[u8]) -> Self {
        let mut set = Self::new(max_cpu_id, bytes.len());
        set.bytes_mut()[..bytes.len()].copy_from_slice(bytes);
        set
    }

    #[inline]
    fn bytes(&self) -> &[u8] {
        match &self.storage {
            Storage::Small(buf) => buf.as_slice(),
            Storage::Large(buf) => buf.as_ref(),
        }
    }

    #[inline]
    fn bytes_mut(&mut self) -> &mut [u8] {
        match &mut self.storage {
            Storage::Small(buf) => buf.as_mut_slice(),
            Storage::Large(buf) => buf.as_mut(),
        }
    }

    /// `true` if this set is backed by an owned frame rather than inlined.
    pub fn is_large(&self) -> bool {
        matches!(self.storage, Storage::Large(_))
    }

    pub const fn max_cpu_id(&self) -> usize {
        self.max_cpu_id
    }

    /// Out-of-range ids are simply absent.
    pub fn test(&self, id: usize) -> bool {
        if id > self.max_cpu_id {
            return false;
        }
        let (byte, bit) = (id / 8, id % 8);
        self.bytes().get(byte).is_some_and(|b| b & (1 << bit) != 0)
    }

    /// Rejects out-of-range ids; callers must bounds-check before calling.
    pub fn set(&mut self, id: usize) -> Option<()> {
        if id > self.max_cpu_id {
            return None;
        }
        let (byte, bit) = (id / 8, id % 8);
        let byte_ref = self.bytes_mut().get_mut(byte)?;
        *byte_ref |= 1 << bit;
        Some(())
    }

    pub fn clear(&mut self, id: usize) -> Option<()> {
        if id > self.max_cpu_id {
            return None;
        }
        let (byte, bit) = (id / 8, id % 8);
        let byte_ref = self.bytes_mut().get_mut(byte)?;
        *byte_ref &= !(1 << bit);
        Some(())
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    /// Ascending ids that are set.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..=self.max_cpu_id).filter(move |&id| self.test(id))
    }

    /// Ascending ids that are set, skipping `except`.
    pub fn iter_except(&self, except: usize) -> impl Iterator<Item = usize> + '_ {
        self.iter().filter(move |&id| id != except)
    }

    /// `true` if every bit set in `other` is also set in `self`.
    pub fn is_superset_of(&self, other: &CpuSet) -> bool {
        other.iter().all(|id| self.test(id))
    }

    /// `true` if `self` and `other` share no set bit.
    pub fn is_disjoint_from(&self, other: &CpuSet) -> bool {
        self.iter().all(|id| !other.test(id))
    }
}

#[cfg(test)]
mod tests {
    extern crate std;
    use super::*;

    #[test]
    fn inline_boundary_uses_small_form() {
        let set = CpuSet::new(63, INLINE_BYTES);
        assert!(!set.is_large());
    }

    #[test]
    fn one_byte_more_uses_large_form() {
        let set = CpuSet::new(511, INLINE_BYTES + 1);
        assert!(set.is_large());
    }

    #[test]
    fn set_clear_and_iterate() {
        let mut set = CpuSet::new(7, INLINE_BYTES);
        set.set(2).unwrap();
        set.set(3).unwrap();
        assert!(set.test(2));
        assert!(!set.test(4));
        assert_eq!(set.iter().collect::<alloc::vec::Vec<_>>(), [2, 3]);
        set.clear(2).unwrap();
        assert_eq!(set.iter().collect::<alloc::vec::Vec<_>>(), [3]);
    }

    #[test]
    fn out_of_range_set_rejected() {
        let mut set = CpuSet::new(7, INLINE_BYTES);
        assert!(set.set(8).is_none());
        assert!(!set.test(8));
    }

    #[test]
    fn iter_except_skips_one_id() {
        let mut set = CpuSet::new(7, INLINE_BYTES);
        set.set(1).unwrap();
        set.set(2).unwrap();
        set.set(3).unwrap();
        assert_eq!(
            set.iter_except(2).collect::<alloc::vec::Vec<_>>(),
            [1, 3]
        );
    }

    #[test]
    fn superset_and_disjoint() {
        let mut root = CpuSet::new(7, INLINE_BYTES);
        root.set(0).unwrap();
        root.set(1).unwrap();
        root.set(2).unwrap();

        let mut child = CpuSet::new(7, INLINE_BYTES);
        child.set(1).unwrap();
        child.set(2).unwrap();

        assert!(root.is_superset_of(&child));
        assert!(!child.is_superset_of(&root));

        let mut other = CpuSet::new(7, INLINE_BYTES);
        other.set(5).unwrap();
        assert!(child.is_disjoint_from(&other));
        assert!(!root.is_disjoint_from(&child));
    }
}

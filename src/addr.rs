//! Physical and virtual address newtypes.
//!
//! Kept distinct so the overlap arithmetic in [`crate::memory_region`] cannot accidentally mix a
//! guest-physical offset with a host-virtual one.

use core::fmt::{Debug, LowerHex};
use core::ops::{Add, Sub};

macro_rules! impl_addr_ty {
    ($ty:ident) => {
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
        #[repr(transparent)]
        pub struct $ty(usize);

        impl $ty {
            #[inline(always)]
            pub const fn new(value: usize) -> Self {
                Self(value)
            }

            #[inline(always)]
            pub const fn as_usize(self) -> usize {
                self.0
            }

            /// `true` if `self` falls within `[start, start + size)`.
            #[inline]
            pub const fn is_within(self, start: Self, size: usize) -> bool {
                self.0 >= start.0 && self.0 < start.0 + size
            }

            #[inline]
            pub const fn is_aligned_to(self, align: usize) -> bool {
                self.0 % align == 0
            }
        }

        impl Debug for $ty {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}({:#x})", stringify!($ty), self.0)
            }
        }

        impl LowerHex for $ty {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                LowerHex::fmt(&self.0, f)
            }
        }

        impl Add<usize> for $ty {
            type Output = $ty;
            #[inline(always)]
            fn add(self, rhs: usize) -> Self::Output {
                Self(self.0 + rhs)
            }
        }

        impl Sub<usize> for $ty {
            type Output = $ty;
            #[inline(always)]
            fn sub(self, rhs: usize) -> Self::Output {
                Self(self.0 - rhs)
            }
        }

        impl Sub<$ty> for $ty {
            type Output = usize;
            #[inline(always)]
            fn sub(self, rhs: $ty) -> Self::Output {
                self.0 - rhs.0
            }
        }

        impl From<usize> for $ty {
            #[inline(always)]
            fn from(value: usize) -> Self {
                Self(value)
            }
        }
    };
}

impl_addr_ty!(PhysAddr);
impl_addr_ty!(VirtAddr);

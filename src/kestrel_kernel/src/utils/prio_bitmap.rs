//! Provides `OneLevelPrioBitmap`, a bit array supporting constant-time
//! "find the lowest set bit" queries.
use core::fmt;
use num_traits::PrimInt;

/// The bit array used by the ready queue.
pub type ReadyBitmap = OneLevelPrioBitmap<u64>;

/// The number of priority levels [`ReadyBitmap`] can track.
pub const READY_BITMAP_LEN: usize = u64::BITS as usize;

/// A bit array in which the lowest set bit can be found in constant time.
///
/// All methods panic when the given bit position is out of range.
pub trait PrioBitmap: Default + Clone + Copy + fmt::Debug + 'static {
    /// The number of bits.
    const LEN: usize;

    /// Get the bit at the specified position.
    fn get(&self, i: usize) -> bool;

    /// Clear the bit at the specified position.
    fn clear(&mut self, i: usize);

    /// Set the bit at the specified position.
    fn set(&mut self, i: usize);

    /// Get the position of the first set bit.
    fn find_set(&self) -> Option<usize>;

    /// Get a flag indicating whether no bits are set.
    fn is_empty(&self) -> bool {
        self.find_set().is_none()
    }
}

/// Stores `T::BITS` entries in a single machine integer.
#[derive(Clone, Copy, Default)]
pub struct OneLevelPrioBitmap<T> {
    bits: T,
}

impl<T: PrimInt> OneLevelPrioBitmap<T> {
    fn width() -> usize {
        T::zero().count_zeros() as usize
    }

    fn mask(i: usize) -> T {
        assert!(i < Self::width(), "bit position {i} is out of range");
        T::one() << i
    }
}

impl<T: PrimInt + fmt::Debug + Default + 'static> fmt::Debug for OneLevelPrioBitmap<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_list()
            .entries((0..Self::width()).filter(|&i| self.get(i)))
            .finish()
    }
}

impl<T: PrimInt + fmt::Debug + Default + 'static> PrioBitmap for OneLevelPrioBitmap<T> {
    const LEN: usize = core::mem::size_of::<T>() * 8;

    fn get(&self, i: usize) -> bool {
        (self.bits & Self::mask(i)) != T::zero()
    }

    fn clear(&mut self, i: usize) {
        self.bits = self.bits & !Self::mask(i);
    }

    fn set(&mut self, i: usize) {
        self.bits = self.bits | Self::mask(i);
    }

    fn find_set(&self) -> Option<usize> {
        if self.bits == T::zero() {
            None
        } else {
            Some(self.bits.trailing_zeros() as usize)
        }
    }
}

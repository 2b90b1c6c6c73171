//! Fixed-capacity object pools.
use arrayvec::ArrayVec;
use core::ops;

/// A vector-like container used as an object pool.
///
/// Kernel objects are never removed from their pool, so an index into the
/// pool stays valid for the lifetime of the kernel. `try_push` must not
/// allocate; it hands the element back when the pool is full.
pub trait VecLike:
    Default + ops::Deref<Target = [<Self as VecLike>::Element]> + ops::DerefMut
{
    type Element;
    fn is_empty(&self) -> bool;
    fn len(&self) -> usize;
    fn try_push(&mut self, x: Self::Element) -> Result<(), Self::Element>;
}

impl<T, const N: usize> VecLike for ArrayVec<T, N> {
    type Element = T;
    fn is_empty(&self) -> bool {
        self.is_empty()
    }
    fn len(&self) -> usize {
        self.len()
    }
    fn try_push(&mut self, x: Self::Element) -> Result<(), Self::Element> {
        ArrayVec::try_push(self, x).map_err(|e| e.element())
    }
}

#[cfg(test)]
impl<T> VecLike for Vec<T> {
    type Element = T;
    fn is_empty(&self) -> bool {
        self.is_empty()
    }
    fn len(&self) -> usize {
        self.len()
    }
    fn try_push(&mut self, x: Self::Element) -> Result<(), Self::Element> {
        self.push(x);
        Ok(())
    }
}

//! Kernel state locking mechanism
//!
//! All scheduler state lives in one [`State`] value stored in a
//! [`CpuLockCell`]. The cell can only be opened with the kernel's
//! [`CpuLockToken`], which is handed out by [`Kernel::lock_cpu`] together
//! with interrupts masked through the port. Dropping the [`CpuLockGuard`]
//! returns the token and restores the interrupt state.
use core::{fmt, marker::PhantomData, mem::ManuallyDrop, ops};
use tokenlock::UnsyncTokenLock;

use crate::{error::BadContextError, state::State, IrqKey, Kernel, KernelTraits};

pub(crate) struct CpuLockTag<Traits>(PhantomData<Traits>);

/// The key that "unlocks" [`CpuLockCell`].
pub(crate) type CpuLockToken<Traits> = tokenlock::UnsyncSingletonToken<CpuLockTag<Traits>>;

/// The keyhole type for [`UnsyncTokenLock`] that can be "unlocked" by
/// [`CpuLockToken`].
pub(crate) type CpuLockKeyhole<Traits> = tokenlock::SingletonTokenId<CpuLockTag<Traits>>;

/// Cell type that can be accessed by [`CpuLockToken`] (which can be obtained
/// by [`Kernel::lock_cpu`]).
pub(crate) struct CpuLockCell<Traits, T: ?Sized>(UnsyncTokenLock<T, CpuLockKeyhole<Traits>>);

impl<Traits, T> CpuLockCell<Traits, T> {
    pub(crate) const fn new(x: T) -> Self {
        Self(UnsyncTokenLock::new(CpuLockKeyhole::new(), x))
    }
}

impl<Traits, T: ?Sized> fmt::Debug for CpuLockCell<Traits, T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // The contents can't be borrowed without the token
        f.write_str("CpuLockCell(..)")
    }
}

impl<Traits, T> ops::Deref for CpuLockCell<Traits, T> {
    type Target = UnsyncTokenLock<T, CpuLockKeyhole<Traits>>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<Traits: KernelTraits> Kernel<Traits> {
    /// Mask interrupts and borrow the kernel state.
    ///
    /// Return `BadContext` if the kernel state is already borrowed, which
    /// happens when a kernel service is re-entered from a port callback.
    pub(crate) fn lock_cpu(&self) -> Result<CpuLockGuard<'_, Traits>, BadContextError> {
        let irq_was_locked = self.port.is_irq_locked();

        // Safety: The key is restored by `CpuLockGuard::drop` or right below
        let key = unsafe { self.port.irq_lock() };

        match self.token.take() {
            Some(token) => Ok(CpuLockGuard {
                kernel: self,
                token: ManuallyDrop::new(token),
                key,
                irq_was_locked,
            }),
            None => {
                // Safety: Restoring the key we just got
                unsafe { self.port.irq_unlock(key) };
                Err(BadContextError::BadContext)
            }
        }
    }

    /// Mask interrupts. Return a key to pass to [`Self::irq_unlock`].
    ///
    /// Calls can be nested. Only the `irq_unlock` matching the outermost
    /// `irq_lock` unmasks interrupts.
    #[inline]
    pub fn irq_lock(&self) -> IrqKey {
        // Safety: The caller receives the key and is responsible for
        //         returning it
        unsafe { self.port.irq_lock() }
    }

    /// Restore the interrupt state saved in `key`.
    ///
    /// Context switches requested while interrupts were masked by the
    /// caller are performed when the outermost `irq_unlock` unmasks them.
    pub fn irq_unlock(&self, key: IrqKey) {
        debug_assert!(
            self.port.is_irq_locked(),
            "irq_unlock called without a matching irq_lock"
        );
        // Safety: `key` was produced by `irq_lock`
        unsafe { self.port.irq_unlock(key) };

        if self.port.is_irq_locked() {
            return;
        }

        // Fails if called from a port callback while a service holds the
        // kernel state. That service reschedules on its own.
        let Ok(mut lock) = self.lock_cpu() else {
            return;
        };
        let st = lock.state();
        if st.isr_nesting == 0 && st.reschedule_pending {
            log::trace!("performing the context switch deferred by irq_lock");
            self.unlock_cpu_and_switch(lock);
        }
    }
}

/// RAII guard for the kernel state.
pub(crate) struct CpuLockGuard<'a, Traits: KernelTraits> {
    kernel: &'a Kernel<Traits>,
    token: ManuallyDrop<CpuLockToken<Traits>>,
    key: IrqKey,
    /// Interrupts were already masked (by [`Kernel::irq_lock`]) when the
    /// guard was created.
    irq_was_locked: bool,
}

impl<'a, Traits: KernelTraits> CpuLockGuard<'a, Traits> {
    /// Borrow the kernel state.
    #[inline]
    pub(crate) fn state(&mut self) -> &mut State<Traits> {
        self.kernel.state.write(&mut *self.token)
    }

    /// Get a flag indicating whether dropping the guard leaves interrupts
    /// masked.
    #[inline]
    pub(crate) fn irq_was_locked(&self) -> bool {
        self.irq_was_locked
    }

    /// Return the token but keep interrupts masked. The returned key must be
    /// restored by the caller.
    pub(crate) fn unlock_keeping_irq_masked(self) -> IrqKey {
        let mut this = ManuallyDrop::new(self);

        // Safety: `this.token` is not used again, and `this` is never dropped
        let token = unsafe { ManuallyDrop::take(&mut this.token) };
        this.kernel.token.set(Some(token));

        this.key
    }
}

impl<Traits: KernelTraits> Drop for CpuLockGuard<'_, Traits> {
    fn drop(&mut self) {
        // Safety: `self.token` is not used again
        let token = unsafe { ManuallyDrop::take(&mut self.token) };
        self.kernel.token.set(Some(token));

        // Safety: `self.key` was produced by the `irq_lock` call in `lock_cpu`
        unsafe { self.kernel.port.irq_unlock(self.key) };
    }
}

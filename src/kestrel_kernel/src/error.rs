//! Result codes and the error types of kernel services
use core::{fmt, mem::transmute};

/// The macro to define [`ResultCode`].
macro_rules! define_result_code {
    (
        $( #[$meta:meta] )*
        pub enum ResultCode {
            $(
                $( #[$vmeta:meta] )*
                $vname:ident = $vd:expr
            ),* $(,)*
        }
    ) => {
        $( #[$meta] )*
        pub enum ResultCode {
            $(
                $( #[$vmeta] )*
                $vname = $vd
            ),*
        }

        impl ResultCode {
            /// Get the short name of the result code.
            ///
            /// # Examples
            ///
            /// ```
            /// use kestrel_kernel::ResultCode;
            /// assert_eq!(ResultCode::WouldBlock.as_str(), "WouldBlock");
            /// ```
            pub fn as_str(self) -> &'static str {
                match self {
                    $(
                        Self::$vname => stringify!($vname),
                    )*
                }
            }

            fn fmt(self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl fmt::Debug for ResultCode {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                (*self).fmt(f)
            }
        }
    };
}

define_result_code! {
    /// All result codes (including success) that kernel services can return.
    ///
    /// Recoverable outcomes of blocking services are [`Timeout`],
    /// [`WouldBlock`], and [`Cancelled`]. Programming errors that make further
    /// scheduling undefined are not represented here; they are reported
    /// through [`Port::fatal_error`].
    ///
    /// [`Timeout`]: ResultCode::Timeout
    /// [`WouldBlock`]: ResultCode::WouldBlock
    /// [`Cancelled`]: ResultCode::Cancelled
    /// [`Port::fatal_error`]: crate::Port::fatal_error
    #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[repr(i8)]
    pub enum ResultCode {
        /// The operation was successful. No additional information is available.
        Success = 0,
        /// A parameter is invalid in a way that is not covered by any other error
        /// codes.
        BadParam = -17,
        /// A specified object identifier is invalid, or the object was
        /// destroyed.
        BadId = -18,
        /// The current context disallows the operation.
        BadContext = -25,
        /// The caller does not own the resource.
        NotOwner = -29,
        /// Resource deadlock would occur.
        WouldDeadlock = -30,
        /// A target object is in a state that disallows the operation.
        BadObjectState = -41,
        /// An object couldn't be created because its pool is full.
        QueueOverflow = -43,
        /// The waiter was forcibly removed from a wait queue, e.g., because
        /// the object it was waiting on was reset or destroyed.
        Cancelled = -49,
        /// The operation timed out.
        Timeout = -50,
        /// The operation would have blocked, but the caller asked not to
        /// wait.
        WouldBlock = -51,
    }
}

impl ResultCode {
    /// Get a flag indicating whether the code represents a failure.
    ///
    /// Failure codes have negative values.
    #[inline]
    pub fn is_err(self) -> bool {
        (self as i8) < 0
    }

    /// Get a flag indicating whether the code represents a success.
    ///
    /// Success codes have non-negative values.
    #[inline]
    pub fn is_ok(self) -> bool {
        !self.is_err()
    }
}

macro_rules! define_error {
    (
        mod $mod_name:ident {}
        $( #[$meta:meta] )*
        $vis:vis enum $name:ident $(: $($subty:ident),* $(,)*)? {
            $(
                $( #[$vmeta:meta] )*
                $vname:ident
            ),* $(,)*
        }
    ) => {
        $( #[$meta] )*
        ///
        /// See [`ResultCode`] for all result codes and generic descriptions.
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(i8)]
        $vis enum $name {
            $(
                $( #[$vmeta] )*
                // Use the same discriminants as `ResultCode` for cost-free
                // conversion
                $vname = ResultCode::$vname as i8
            ),*
        }

        impl fmt::Debug for $name {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                ResultCode::from(*self).fmt(f)
            }
        }

        impl From<Result<(), $name>> for ResultCode {
            #[inline]
            fn from(x: Result<(), $name>) -> Self {
                match x {
                    Ok(()) => Self::Success,
                    Err(e) => Self::from(e),
                }
            }
        }

        impl From<$name> for ResultCode {
            #[inline]
            fn from(x: $name) -> Self {
                // Safety: `ResultCode` and `$name` has the same representation
                //         type, and the representation of `ResultCode` is a
                //         superset of `x`.
                unsafe { transmute(x) }
            }
        }

        #[cfg(test)]
        mod $mod_name {
            use super::*;

            #[test]
            fn to_result_code() {
                $(
                    assert_eq!(
                        ResultCode::$vname,
                        ResultCode::from($name::$vname),
                    );
                )*
            }

            #[test]
            fn result_to_result_code() {
                $(
                    assert_eq!(
                        ResultCode::$vname,
                        ResultCode::from(Err($name::$vname)),
                    );
                )*
                assert_eq!(
                    ResultCode::Success,
                    ResultCode::from(Result::<(), $name>::Ok(())),
                );
            }
        }

        $($(
            $subty!(impl From<_> for $name);
        )*)?

        #[allow(unused_macros)]
        macro_rules! $name {
            (impl From<_> for $dest_ty:ty) => {
                impl From<$name> for $dest_ty {
                    #[inline]
                    fn from(x: $name) -> Self {
                        match x {
                            $(
                                $name::$vname => Self::$vname,
                            )*
                        }
                    }
                }
            };
        }
    };
}

define_error! {
    mod bad_context_error {}
    pub(crate) enum BadContextError {
        BadContext,
    }
}

define_error! {
    mod bad_id_error {}
    pub(crate) enum BadIdError {
        BadId,
    }
}

define_error! {
    mod bad_param_error {}
    pub(crate) enum BadParamError {
        BadParam,
    }
}

define_error! {
    mod wait_error {}
    /// The result delivered to a thread that was taken out of a wait queue
    /// without being signaled.
    pub enum WaitError {
        /// The timeout elapsed before the thread was signaled.
        Timeout,
        /// The wait was cancelled by a reset or destruction of the object.
        Cancelled,
    }
}

define_error! {
    mod kernel_context_error {}
    /// Error type for [`Kernel::start`], [`Kernel::isr_enter`],
    /// [`Kernel::isr_exit`], and [`Kernel::announce`].
    ///
    /// [`Kernel::start`]: crate::Kernel::start
    /// [`Kernel::isr_enter`]: crate::Kernel::isr_enter
    /// [`Kernel::isr_exit`]: crate::Kernel::isr_exit
    /// [`Kernel::announce`]: crate::Kernel::announce
    pub enum KernelContextError: BadContextError {
        /// The kernel state is already borrowed, the kernel has already
        /// started, or `isr_exit` was called without a matching `isr_enter`.
        BadContext,
    }
}

define_error! {
    mod query_error {}
    /// Error type for services that only read the state of an object.
    pub enum QueryError: BadContextError, BadIdError {
        /// The kernel state is already borrowed.
        BadContext,
        /// The object ID is out of range, or the object was destroyed.
        BadId,
    }
}

define_error! {
    mod update_object_error {}
    /// Error type for non-blocking services that update an object, such as
    /// [`Kernel::semaphore_give`] and [`Kernel::event_set`].
    ///
    /// [`Kernel::semaphore_give`]: crate::Kernel::semaphore_give
    /// [`Kernel::event_set`]: crate::Kernel::event_set
    pub enum UpdateObjectError: BadContextError, BadIdError {
        /// The kernel state is already borrowed.
        BadContext,
        /// The object ID is out of range, or the object was destroyed.
        BadId,
    }
}

define_error! {
    mod create_object_error {}
    /// Error type for object creation services.
    pub enum CreateObjectError: BadContextError, BadParamError {
        /// The kernel state is already borrowed.
        BadContext,
        /// A creation parameter is out of range.
        BadParam,
        /// The object pool is full.
        QueueOverflow,
    }
}

define_error! {
    mod destroy_object_error {}
    /// Error type for object destruction services.
    pub enum DestroyObjectError: BadContextError, BadIdError {
        /// The kernel state is already borrowed.
        BadContext,
        /// The object ID is out of range.
        BadId,
        /// Threads are waiting on the object and forced destruction was not
        /// requested.
        BadObjectState,
    }
}

define_error! {
    mod thread_state_error {}
    /// Error type for [`Kernel::thread_start`], [`Kernel::thread_suspend`],
    /// [`Kernel::thread_resume`], [`Kernel::thread_abort`], and
    /// [`Kernel::thread_wakeup`].
    ///
    /// [`Kernel::thread_start`]: crate::Kernel::thread_start
    /// [`Kernel::thread_suspend`]: crate::Kernel::thread_suspend
    /// [`Kernel::thread_resume`]: crate::Kernel::thread_resume
    /// [`Kernel::thread_abort`]: crate::Kernel::thread_abort
    /// [`Kernel::thread_wakeup`]: crate::Kernel::thread_wakeup
    pub enum ThreadStateError: BadContextError, BadIdError {
        /// The kernel state is already borrowed.
        BadContext,
        /// The thread ID is out of range.
        BadId,
        /// The thread is not in a state the operation applies to.
        BadObjectState,
    }
}

define_error! {
    mod current_thread_error {}
    /// Error type for services that act on the running thread, such as
    /// [`Kernel::yield_now`] and [`Kernel::thread_exit`].
    ///
    /// [`Kernel::yield_now`]: crate::Kernel::yield_now
    /// [`Kernel::thread_exit`]: crate::Kernel::thread_exit
    pub enum CurrentThreadError: BadContextError {
        /// The kernel state is already borrowed, or there is no running
        /// thread.
        BadContext,
    }
}

define_error! {
    mod sleep_error {}
    /// Error type for [`Kernel::sleep`].
    ///
    /// [`Kernel::sleep`]: crate::Kernel::sleep
    pub enum SleepError: BadContextError {
        /// The kernel state is already borrowed, or there is no running
        /// thread.
        BadContext,
        /// The sleep was cancelled.
        Cancelled,
    }
}

define_error! {
    mod join_thread_error {}
    /// Error type for [`Kernel::thread_join`].
    ///
    /// [`Kernel::thread_join`]: crate::Kernel::thread_join
    pub enum JoinThreadError: BadContextError, BadIdError, WaitError {
        /// The kernel state is already borrowed, or there is no running
        /// thread.
        BadContext,
        /// The thread ID is out of range.
        BadId,
        /// The thread tried to join itself.
        WouldDeadlock,
        /// The thread is still alive and `Timeout::NoWait` was given.
        WouldBlock,
        /// The thread was still alive when the timeout elapsed.
        Timeout,
        /// The wait was cancelled.
        Cancelled,
    }
}

define_error! {
    mod set_thread_priority_error {}
    /// Error type for [`Kernel::thread_set_priority`].
    ///
    /// [`Kernel::thread_set_priority`]: crate::Kernel::thread_set_priority
    pub enum SetThreadPriorityError: BadContextError, BadIdError, BadParamError {
        /// The kernel state is already borrowed.
        BadContext,
        /// The thread ID is out of range.
        BadId,
        /// The priority is out of range.
        BadParam,
        /// The thread is dead.
        BadObjectState,
    }
}

define_error! {
    mod create_thread_error {}
    /// Error type for [`Kernel::thread_create`].
    ///
    /// [`Kernel::thread_create`]: crate::Kernel::thread_create
    pub enum CreateThreadError: BadContextError, BadParamError {
        /// The kernel state is already borrowed.
        BadContext,
        /// The priority is out of range.
        BadParam,
        /// The thread pool is full.
        QueueOverflow,
    }
}

define_error! {
    mod take_semaphore_error {}
    /// Error type for [`Kernel::semaphore_take`].
    ///
    /// [`Kernel::semaphore_take`]: crate::Kernel::semaphore_take
    pub enum TakeSemaphoreError: BadContextError, BadIdError, WaitError {
        /// The kernel state is already borrowed, or there is no running
        /// thread.
        BadContext,
        /// The semaphore ID is out of range, or the semaphore was destroyed.
        BadId,
        /// The count was zero and `Timeout::NoWait` was given.
        WouldBlock,
        /// The timeout elapsed before a unit was given.
        Timeout,
        /// The semaphore was reset or destroyed while the thread waited.
        Cancelled,
    }
}

define_error! {
    mod lock_mutex_error {}
    /// Error type for [`Kernel::mutex_lock`].
    ///
    /// [`Kernel::mutex_lock`]: crate::Kernel::mutex_lock
    pub enum LockMutexError: BadContextError, BadIdError, WaitError {
        /// The kernel state is already borrowed, or there is no running
        /// thread.
        BadContext,
        /// The mutex ID is out of range, or the mutex was destroyed.
        BadId,
        /// The mutex is owned by another thread and `Timeout::NoWait` was
        /// given.
        WouldBlock,
        /// The timeout elapsed before the mutex was handed over.
        Timeout,
        /// The mutex was destroyed while the thread waited.
        Cancelled,
    }
}

define_error! {
    mod unlock_mutex_error {}
    /// Error type for [`Kernel::mutex_unlock`].
    ///
    /// [`Kernel::mutex_unlock`]: crate::Kernel::mutex_unlock
    pub enum UnlockMutexError: BadContextError, BadIdError {
        /// The kernel state is already borrowed, or there is no running
        /// thread.
        BadContext,
        /// The mutex ID is out of range, or the mutex was destroyed.
        BadId,
        /// The running thread does not own the mutex.
        NotOwner,
    }
}

define_error! {
    mod wait_event_error {}
    /// Error type for [`Kernel::event_wait`].
    ///
    /// [`Kernel::event_wait`]: crate::Kernel::event_wait
    pub enum WaitEventError: BadContextError, BadIdError, BadParamError, WaitError {
        /// The kernel state is already borrowed, or there is no running
        /// thread.
        BadContext,
        /// The event ID is out of range, or the event was destroyed.
        BadId,
        /// The bit mask is empty.
        BadParam,
        /// The condition was not satisfied and `Timeout::NoWait` was given.
        WouldBlock,
        /// The timeout elapsed before the condition was satisfied.
        Timeout,
        /// The event was destroyed while the thread waited.
        Cancelled,
    }
}

define_error! {
    mod wait_object_error {}
    /// Error type for [`Kernel::wait_object_wait`] and
    /// [`Kernel::timer_status_sync`].
    ///
    /// [`Kernel::wait_object_wait`]: crate::Kernel::wait_object_wait
    /// [`Kernel::timer_status_sync`]: crate::Kernel::timer_status_sync
    pub enum WaitObjectError: BadContextError, BadIdError, WaitError {
        /// The kernel state is already borrowed, or there is no running
        /// thread.
        BadContext,
        /// The object ID is out of range, or the object was destroyed.
        BadId,
        /// `Timeout::NoWait` was given.
        WouldBlock,
        /// The timeout elapsed before the thread was woken up.
        Timeout,
        /// The object was destroyed while the thread waited.
        Cancelled,
    }
}

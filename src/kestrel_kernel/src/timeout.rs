//! Manages timeouts (timed events) and the tick counter.
//!
//! # Delta List
//!
//! Pending timeouts form a single list sorted by expiration time. Each node
//! stores the number of ticks between its predecessor's expiration and its
//! own (the head's delta is relative to the present), so advancing time only
//! touches the head.
//!
//! ```text
//!  now
//!   │  3       2     0        5
//!   ├────▶ A ────▶ B ──▶ C ────────▶ D
//!   │
//!   A expires 3 ticks from now, B and C 5 ticks from now, D 10 ticks from now
//! ```
//!
//! A node armed for the same expiration time as existing nodes is placed
//! after them, so timeouts expiring in the same tick fire in the order they
//! were armed.
//!
//! # Owners
//!
//! Timeout nodes are embedded in the control block of whatever armed them
//! and are addressed by [`TimeoutOwner`]. The kernel resolves an owner to its
//! node through [`TimeoutStore`] and dispatches expirations with a `match` on
//! the owner.
use crate::{fatal::FatalError, utils::intrusive_list::InconsistentError, ThreadId, Ticks, TimerId};

/// Identifies the object a timeout node belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum TimeoutOwner {
    /// Wakes up a waiting or sleeping thread.
    ThreadWake(ThreadId),
    /// Fires a kernel timer.
    TimerFire(TimerId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DeltaLink {
    prev: Option<TimeoutOwner>,
    next: Option<TimeoutOwner>,
}

/// A node of the delta list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct TimeoutNode {
    /// `Some(_)` iff the node is linked.
    link: Option<DeltaLink>,
    /// Ticks between the predecessor's expiration (or the present, for the
    /// head) and this node's expiration. Zero when unlinked.
    delta: Ticks,
}

impl TimeoutNode {
    #[inline]
    pub(crate) fn is_armed(&self) -> bool {
        self.link.is_some()
    }
}

/// The global part of the timeout manager.
#[derive(Debug, Default)]
pub(crate) struct TimeoutList {
    head: Option<TimeoutOwner>,
    /// The number of ticks announced so far.
    uptime: u64,
    /// The part of the ongoing announcement that is not processed yet.
    /// Zero outside of [`announce`].
    announce_remaining: Ticks,
}

impl TimeoutList {
    #[inline]
    pub(crate) fn uptime(&self) -> u64 {
        self.uptime
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_none()
    }
}

/// Provides access to the timeout list and the nodes embedded in their
/// owners.
pub(crate) trait TimeoutStore {
    fn timeout_list(&mut self) -> &mut TimeoutList;

    /// Get the node owned by `owner`. Panics if `owner` refers to a
    /// nonexistent object.
    fn timeout_node(&mut self, owner: TimeoutOwner) -> &mut TimeoutNode;
}

fn link_mut(
    store: &mut impl TimeoutStore,
    owner: TimeoutOwner,
) -> Result<&mut DeltaLink, InconsistentError> {
    store.timeout_node(owner).link.as_mut().ok_or(InconsistentError)
}

/// Insert the node of `owner` so that it expires `delay` ticks from the
/// present.
///
/// The node must not be armed already; arming a node twice would make it
/// reachable from two places in the list.
pub(crate) fn arm(
    store: &mut impl TimeoutStore,
    owner: TimeoutOwner,
    delay: Ticks,
) -> Result<(), FatalError> {
    if store.timeout_node(owner).is_armed() {
        return Err(FatalError::CorruptedList);
    }

    let mut remaining = delay;
    let mut prev = None;
    let mut cursor = store.timeout_list().head;

    while let Some(c) = cursor {
        let node = store.timeout_node(c);
        if remaining < node.delta {
            // Insert before `c`, which now expires `remaining` ticks after
            // the new node
            node.delta -= remaining;
            break;
        }
        remaining -= node.delta;
        prev = Some(c);
        cursor = node.link.ok_or(InconsistentError)?.next;
    }

    *store.timeout_node(owner) = TimeoutNode {
        link: Some(DeltaLink { prev, next: cursor }),
        delta: remaining,
    };

    match prev {
        Some(p) => link_mut(store, p)?.next = Some(owner),
        None => store.timeout_list().head = Some(owner),
    }
    if let Some(c) = cursor {
        link_mut(store, c)?.prev = Some(owner);
    }

    Ok(())
}

/// Remove the node of `owner` from the list. Its remaining delta is handed
/// to its successor.
///
/// Returns `false` if the node wasn't armed.
pub(crate) fn cancel(
    store: &mut impl TimeoutStore,
    owner: TimeoutOwner,
) -> Result<bool, FatalError> {
    let node = *store.timeout_node(owner);
    let Some(link) = node.link else {
        return Ok(false);
    };

    if let Some(next) = link.next {
        let next_node = store.timeout_node(next);
        next_node.delta = next_node.delta.saturating_add(node.delta);
        next_node.link.as_mut().ok_or(InconsistentError)?.prev = link.prev;
    }

    match link.prev {
        Some(prev) => link_mut(store, prev)?.next = link.next,
        None => {
            if store.timeout_list().head != Some(owner) {
                return Err(FatalError::CorruptedList);
            }
            store.timeout_list().head = link.next;
        }
    }

    *store.timeout_node(owner) = TimeoutNode::default();

    Ok(true)
}

/// Advance the present by `ticks`, expiring every node that becomes due.
///
/// Expired nodes are unlinked one by one in list order and passed to
/// `on_expire`. `on_expire` may arm new nodes; their delays are relative to
/// the expiration being processed, so a node re-armed with a delay shorter
/// than the rest of the announcement expires within the same call.
pub(crate) fn announce<S: TimeoutStore>(
    store: &mut S,
    ticks: Ticks,
    mut on_expire: impl FnMut(&mut S, TimeoutOwner) -> Result<(), FatalError>,
) -> Result<(), FatalError> {
    store.timeout_list().announce_remaining = ticks;

    while let Some(head) = store.timeout_list().head {
        let delta = store.timeout_node(head).delta;
        let list = store.timeout_list();
        if delta > list.announce_remaining {
            break;
        }

        list.announce_remaining -= delta;
        list.uptime += u64::from(delta);

        // Zero the delta first so that the successor's delta is unchanged
        store.timeout_node(head).delta = 0;
        cancel(store, head)?;

        on_expire(store, head)?;
    }

    let remaining = core::mem::take(&mut store.timeout_list().announce_remaining);
    store.timeout_list().uptime += u64::from(remaining);
    if let Some(head) = store.timeout_list().head {
        store.timeout_node(head).delta -= remaining;
    }

    Ok(())
}

/// Get the number of ticks until the earliest pending expiration.
pub(crate) fn time_until_next(store: &mut impl TimeoutStore) -> Option<Ticks> {
    let head = store.timeout_list().head?;
    Some(store.timeout_node(head).delta)
}

/// Get the number of ticks until the node of `owner` expires, or `None` if
/// it's not armed.
pub(crate) fn remaining(
    store: &mut impl TimeoutStore,
    owner: TimeoutOwner,
) -> Result<Option<Ticks>, FatalError> {
    if !store.timeout_node(owner).is_armed() {
        return Ok(None);
    }

    let mut sum: Ticks = 0;
    let mut cursor = store.timeout_list().head;
    while let Some(c) = cursor {
        let node = *store.timeout_node(c);
        sum = sum.saturating_add(node.delta);
        if c == owner {
            return Ok(Some(sum));
        }
        cursor = node.link.ok_or(InconsistentError)?.next;
    }

    // The node claims to be armed but isn't reachable from the head
    Err(FatalError::CorruptedList)
}

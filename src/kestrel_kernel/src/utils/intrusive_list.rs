//! Intrusive doubly linked list whose links live inside the elements of an
//! arena and refer to each other by index.
use core::fmt;

/// Circular linked list header.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct ListHead<Index> {
    pub first: Option<Index>,
}

impl<Index> Default for ListHead<Index> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Index: fmt::Debug> fmt::Debug for ListHead<Index> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ListHead({:?})", &self.first)
    }
}

impl<Index> ListHead<Index> {
    pub const fn new() -> Self {
        Self { first: None }
    }

    pub fn is_empty(&self) -> bool {
        self.first.is_none()
    }
}

/// Links to neighbor items.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Link<Index> {
    pub prev: Index,
    pub next: Index,
}

/// An error type indicating inconsistency in a linked list structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InconsistentError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertError {
    AlreadyLinked,
    Inconsistent(InconsistentError),
}

impl From<InconsistentError> for InsertError {
    #[inline(always)]
    fn from(x: InconsistentError) -> Self {
        Self::Inconsistent(x)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemError {
    NotLinked,
    Inconsistent(InconsistentError),
}

impl From<InconsistentError> for ItemError {
    #[inline(always)]
    fn from(x: InconsistentError) -> Self {
        Self::Inconsistent(x)
    }
}

/// Accessor to a linked list whose head is borrowed from one place and whose
/// elements are borrowed from an arena `Pool`.
///
/// `map_link` projects an element index to the link field the list uses.
/// An element can carry several link fields and thus belong to several
/// lists of different kinds at once.
pub struct ListAccessor<'a, Index, Pool: ?Sized, MapLink> {
    head: &'a mut ListHead<Index>,
    pool: &'a mut Pool,
    map_link: MapLink,
}

impl<Index: fmt::Debug, Pool: ?Sized, MapLink> fmt::Debug
    for ListAccessor<'_, Index, Pool, MapLink>
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ListAccessor")
            .field("head", &self.head)
            .finish_non_exhaustive()
    }
}

impl<'a, Index, Pool, MapLink> ListAccessor<'a, Index, Pool, MapLink>
where
    Index: PartialEq + Copy,
    Pool: ?Sized,
    MapLink: Fn(&mut Pool, Index) -> &mut Option<Link<Index>>,
{
    pub fn new(head: &'a mut ListHead<Index>, pool: &'a mut Pool, map_link: MapLink) -> Self {
        ListAccessor {
            head,
            pool,
            map_link,
        }
    }

    pub fn pool(&self) -> &Pool {
        &*self.pool
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_empty()
    }

    /// Get the link of `item`.
    #[inline]
    pub fn link(&mut self, item: Index) -> Option<Link<Index>> {
        *(self.map_link)(&mut *self.pool, item)
    }

    /// Get a flag indicating whether `item` is linked to any list of this
    /// kind.
    #[inline]
    pub fn is_linked(&mut self, item: Index) -> bool {
        self.link(item).is_some()
    }

    fn link_mut(&mut self, item: Index) -> &mut Option<Link<Index>> {
        (self.map_link)(&mut *self.pool, item)
    }

    #[inline]
    pub fn front(&self) -> Option<Index> {
        self.head.first
    }

    #[inline]
    pub fn back(&mut self) -> Result<Option<Index>, InconsistentError> {
        match self.head.first {
            Some(first) => Ok(Some(self.link(first).ok_or(InconsistentError)?.prev)),
            None => Ok(None),
        }
    }

    /// Insert `item` before the position `p` (if `at` is `Some(p)`) or to the
    /// the list's back (if `at` is `None`).
    pub fn insert(&mut self, item: Index, at: Option<Index>) -> Result<(), InsertError> {
        if self.is_linked(item) {
            return Err(InsertError::AlreadyLinked);
        }

        if let Some(first) = self.head.first {
            let (next, update_first) = match at {
                Some(at) => (at, at == first),
                None => (first, false),
            };

            let prev = self.link(next).ok_or(InconsistentError)?.prev;
            self.link_mut(prev).as_mut().ok_or(InconsistentError)?.next = item;
            self.link_mut(next).as_mut().ok_or(InconsistentError)?.prev = item;
            *self.link_mut(item) = Some(Link { prev, next });

            if update_first {
                self.head.first = Some(item);
            }
        } else {
            debug_assert!(at.is_none());

            *self.link_mut(item) = Some(Link {
                prev: item,
                next: item,
            });
            self.head.first = Some(item);
        }

        Ok(())
    }

    #[inline]
    pub fn push_back(&mut self, item: Index) -> Result<(), InsertError> {
        self.insert(item, None)
    }

    #[inline]
    pub fn push_front(&mut self, item: Index) -> Result<(), InsertError> {
        let at = self.front();
        self.insert(item, at)
    }

    /// Remove `item` from the list. Returns `item`.
    pub fn remove(&mut self, item: Index) -> Result<Index, ItemError> {
        let link = self.link(item).ok_or(ItemError::NotLinked)?;

        if self.head.first == Some(item) {
            if link.next == item {
                // The list just became empty
                self.head.first = None;
                *self.link_mut(item) = None;
                return Ok(item);
            }

            // Move the head pointer
            self.head.first = Some(link.next);
        }

        self.link_mut(link.prev)
            .as_mut()
            .ok_or(InconsistentError)?
            .next = link.next;
        self.link_mut(link.next)
            .as_mut()
            .ok_or(InconsistentError)?
            .prev = link.prev;
        *self.link_mut(item) = None;

        Ok(item)
    }

    #[inline]
    pub fn pop_front(&mut self) -> Result<Option<Index>, InconsistentError> {
        match self.front() {
            // `NotLinked` would be unexpected here, so convert it to
            // `InconsistentError`
            Some(item) => self.remove(item).map(Some).map_err(|_| InconsistentError),
            None => Ok(None),
        }
    }

    /// Get the next element of the specified element.
    #[inline]
    pub fn next(&mut self, i: Index) -> Result<Option<Index>, ItemError> {
        let next = self.link(i).ok_or(ItemError::NotLinked)?.next;
        Ok(if Some(next) == self.head.first {
            None
        } else {
            Some(next)
        })
    }

    /// Get the previous element of the specified element.
    #[inline]
    pub fn prev(&mut self, i: Index) -> Result<Option<Index>, ItemError> {
        if Some(i) == self.head.first {
            Ok(None)
        } else {
            Ok(Some(self.link(i).ok_or(ItemError::NotLinked)?.prev))
        }
    }

}

//! Versioned invalidation token.
//!
//! A [`StateCell`] carries a value and a version. Every [`StateCell::change`]
//! mints a version no other change in the process has used, so "has this cell
//! changed since I looked" is a single integer comparison. [`StateCell::wait_newer`]
//! is the async counterpart: a future that completes once the cell's version
//! moves past the one the caller last observed.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll, Waker};

/// Monotonically increasing change marker. Versions are minted from one
/// process-wide counter, so two cells never reuse a version either.
pub type Version = u64;

static NEXT_VERSION: AtomicU64 = AtomicU64::new(1);

fn mint_version() -> Version {
    NEXT_VERSION.fetch_add(1, Ordering::Relaxed)
}

/// A value paired with the version under which it was read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snapshot<V> {
    pub version: Version,
    pub value: V,
}

struct CellInner<V> {
    version: Cell<Version>,
    value: RefCell<V>,
    waiters: RefCell<Vec<(u64, Waker)>>,
    next_waiter: Cell<u64>,
}

/// Shared versioned cell. Clones share the same storage.
pub struct StateCell<V = ()> {
    inner: Rc<CellInner<V>>,
}

impl<V> Clone for StateCell<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<V: Clone> StateCell<V> {
    pub fn new(initial: V) -> Self {
        Self {
            inner: Rc::new(CellInner {
                version: Cell::new(mint_version()),
                value: RefCell::new(initial),
                waiters: RefCell::new(Vec::new()),
                next_waiter: Cell::new(0),
            }),
        }
    }

    pub fn version(&self) -> Version {
        self.inner.version.get()
    }

    pub fn read(&self) -> Snapshot<V> {
        Snapshot {
            version: self.inner.version.get(),
            value: self.inner.value.borrow().clone(),
        }
    }

    /// Replaces the value, mints a fresh version and wakes every waiter.
    pub fn change(&self, next: V) {
        *self.inner.value.borrow_mut() = next;
        self.inner.version.set(mint_version());
        let waiters = std::mem::take(&mut *self.inner.waiters.borrow_mut());
        for (_, waker) in waiters {
            waker.wake();
        }
    }

    /// Future resolving to the first snapshot whose version is newer than
    /// `last_seen`. Resolves immediately if the cell already moved on.
    /// Dropping the future cancels the wait.
    pub fn wait_newer(&self, last_seen: Version) -> NextVersion<V> {
        NextVersion {
            cell: Rc::clone(&self.inner),
            last_seen,
            key: None,
        }
    }
}

/// Future returned by [`StateCell::wait_newer`].
pub struct NextVersion<V> {
    cell: Rc<CellInner<V>>,
    last_seen: Version,
    key: Option<u64>,
}

impl<V: Clone> Future for NextVersion<V> {
    type Output = Snapshot<V>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.cell.version.get() > self.last_seen {
            return Poll::Ready(Snapshot {
                version: self.cell.version.get(),
                value: self.cell.value.borrow().clone(),
            });
        }
        let key = match self.key {
            Some(key) => key,
            None => {
                let key = self.cell.next_waiter.get();
                self.cell.next_waiter.set(key + 1);
                self.key = Some(key);
                key
            }
        };
        let mut waiters = self.cell.waiters.borrow_mut();
        if let Some(entry) = waiters.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = cx.waker().clone();
        } else {
            waiters.push((key, cx.waker().clone()));
        }
        Poll::Pending
    }
}

impl<V> Drop for NextVersion<V> {
    fn drop(&mut self) {
        if let Some(key) = self.key {
            self.cell.waiters.borrow_mut().retain(|(k, _)| *k != key);
        }
    }
}

//! Deferred action queue.
//!
//! Every render context owns one [`ActionQueue`]. Hook dispatchers push
//! reducer updates into it, the loop pushes suspension settlements, and the
//! loop is the single consumer: [`ActionQueue::next_batch`] resolves with
//! everything queued so far, in FIFO order, or with `None` once the queue is
//! closed and drained.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use futures::future::LocalBoxFuture;
use futures::FutureExt;

use crate::ComponentError;

/// Why an action was queued. Render actions are internal bookkeeping
/// (reducer updates, suspension settlements, adopted child work); event
/// actions come from outside the loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActionKind {
    Render,
    Event,
}

enum ActionBody {
    Sync(Box<dyn FnOnce() -> Result<(), ComponentError>>),
    Deferred(LocalBoxFuture<'static, Result<(), ComponentError>>),
}

/// A unit of deferred work. Actions run strictly in the order they were
/// queued; a deferred body is awaited to completion before the next action
/// starts, which is what lets a slow settlement backpressure the loop.
pub struct DeferredAction {
    kind: ActionKind,
    body: ActionBody,
}

impl DeferredAction {
    pub fn sync(
        kind: ActionKind,
        run: impl FnOnce() -> Result<(), ComponentError> + 'static,
    ) -> Self {
        Self {
            kind,
            body: ActionBody::Sync(Box::new(run)),
        }
    }

    pub fn deferred(
        kind: ActionKind,
        run: impl Future<Output = Result<(), ComponentError>> + 'static,
    ) -> Self {
        Self {
            kind,
            body: ActionBody::Deferred(run.boxed_local()),
        }
    }

    pub fn kind(&self) -> ActionKind {
        self.kind
    }

    pub async fn run(self) -> Result<(), ComponentError> {
        match self.body {
            ActionBody::Sync(f) => f(),
            ActionBody::Deferred(f) => f.await,
        }
    }
}

struct QueueInner {
    pending: RefCell<VecDeque<DeferredAction>>,
    closed: Cell<bool>,
    waker: RefCell<Option<Waker>>,
    forwarded: RefCell<Option<ActionQueue>>,
}

impl QueueInner {
    fn wake(&self) {
        if let Some(waker) = self.waker.borrow_mut().take() {
            waker.wake();
        }
    }
}

/// Shared handle to a deferred action queue. Clones share storage.
#[derive(Clone)]
pub struct ActionQueue {
    inner: Rc<QueueInner>,
}

impl Default for ActionQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionQueue {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(QueueInner {
                pending: RefCell::new(VecDeque::new()),
                closed: Cell::new(false),
                waker: RefCell::new(None),
                forwarded: RefCell::new(None),
            }),
        }
    }

    pub fn add(&self, action: DeferredAction) {
        // A forwarded queue keeps accepting work on behalf of its parent,
        // even after its own loop closed it.
        let forwarded = self.inner.forwarded.borrow().clone();
        if let Some(parent) = forwarded {
            parent.add(action);
            return;
        }
        if self.inner.closed.get() {
            log::debug!("action dropped: queue already closed");
            return;
        }
        self.inner.pending.borrow_mut().push_back(action);
        self.inner.wake();
    }

    /// Closing is idempotent. Work already queued is still handed out by
    /// the next `next_batch` call before the consumer sees `None`.
    pub fn close(&self) {
        if self.inner.closed.replace(true) {
            return;
        }
        self.inner.wake();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.get()
    }

    pub fn len(&self) -> usize {
        self.inner.pending.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.pending.borrow().is_empty()
    }

    /// Future resolving with every action queued so far. Single consumer:
    /// the waker registered last wins.
    pub fn next_batch(&self) -> NextBatch {
        NextBatch {
            queue: Rc::clone(&self.inner),
        }
    }

    /// Hands the remaining and future work of this queue to `parent`.
    /// Used when a loop detaches: pending actions move to the parent
    /// eagerly, in order, and every later `add` is redirected there, so
    /// nothing queued against the detached instance is ever lost.
    pub fn forward_to(&self, parent: &ActionQueue) {
        let pending: Vec<DeferredAction> = self.inner.pending.borrow_mut().drain(..).collect();
        for action in pending {
            parent.add(action);
        }
        *self.inner.forwarded.borrow_mut() = Some(parent.clone());
    }
}

/// Future returned by [`ActionQueue::next_batch`].
pub struct NextBatch {
    queue: Rc<QueueInner>,
}

impl Future for NextBatch {
    type Output = Option<Vec<DeferredAction>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut pending = self.queue.pending.borrow_mut();
        if !pending.is_empty() {
            return Poll::Ready(Some(pending.drain(..).collect()));
        }
        if self.queue.closed.get() {
            return Poll::Ready(None);
        }
        *self.queue.waker.borrow_mut() = Some(cx.waker().clone());
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::LocalPool;
    use std::cell::RefCell as StdRefCell;

    async fn run_batch(queue: &ActionQueue) -> Option<usize> {
        let batch = queue.next_batch().await?;
        let mut ran = 0;
        for action in batch {
            action.run().await.unwrap();
            ran += 1;
        }
        Some(ran)
    }

    #[test]
    fn batch_preserves_fifo_order() {
        let queue = ActionQueue::new();
        let order = Rc::new(StdRefCell::new(Vec::new()));
        for i in 0..3 {
            let order = Rc::clone(&order);
            queue.add(DeferredAction::sync(ActionKind::Render, move || {
                order.borrow_mut().push(i);
                Ok(())
            }));
        }
        let mut pool = LocalPool::new();
        assert_eq!(pool.run_until(run_batch(&queue)), Some(3));
        assert_eq!(*order.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn deferred_actions_complete_before_next() {
        let queue = ActionQueue::new();
        let order = Rc::new(StdRefCell::new(Vec::new()));
        let o1 = Rc::clone(&order);
        queue.add(DeferredAction::deferred(ActionKind::Render, async move {
            o1.borrow_mut().push("deferred");
            Ok(())
        }));
        let o2 = Rc::clone(&order);
        queue.add(DeferredAction::sync(ActionKind::Event, move || {
            o2.borrow_mut().push("sync");
            Ok(())
        }));
        let mut pool = LocalPool::new();
        pool.run_until(run_batch(&queue));
        assert_eq!(*order.borrow(), vec!["deferred", "sync"]);
    }

    #[test]
    fn close_drains_then_reports_none() {
        let queue = ActionQueue::new();
        queue.add(DeferredAction::sync(ActionKind::Render, || Ok(())));
        queue.close();
        queue.close();
        let mut pool = LocalPool::new();
        assert_eq!(pool.run_until(run_batch(&queue)), Some(1));
        assert_eq!(pool.run_until(run_batch(&queue)), None);
    }

    #[test]
    fn add_after_close_is_dropped() {
        let queue = ActionQueue::new();
        queue.close();
        queue.add(DeferredAction::sync(ActionKind::Event, || {
            panic!("must not run")
        }));
        assert!(queue.is_empty());
    }

    #[test]
    fn forward_to_runs_child_work_on_parent() {
        let child = ActionQueue::new();
        let parent = ActionQueue::new();
        let hit = Rc::new(StdRefCell::new(false));
        let hit2 = Rc::clone(&hit);
        child.add(DeferredAction::sync(ActionKind::Render, move || {
            *hit2.borrow_mut() = true;
            Ok(())
        }));
        child.forward_to(&parent);
        let mut pool = LocalPool::new();
        pool.run_until(run_batch(&parent));
        assert!(*hit.borrow());
    }

    #[test]
    fn forwarding_an_empty_queue_does_not_block_the_parent() {
        let child = ActionQueue::new();
        let parent = ActionQueue::new();
        child.forward_to(&parent);
        let hit = Rc::new(StdRefCell::new(false));
        let hit2 = Rc::clone(&hit);
        parent.add(DeferredAction::sync(ActionKind::Event, move || {
            *hit2.borrow_mut() = true;
            Ok(())
        }));
        let mut pool = LocalPool::new();
        assert_eq!(pool.run_until(run_batch(&parent)), Some(1));
        assert!(*hit.borrow());
    }

    #[test]
    fn actions_added_after_forwarding_reach_the_parent() {
        let child = ActionQueue::new();
        let parent = ActionQueue::new();
        let order = Rc::new(StdRefCell::new(Vec::new()));
        let o1 = Rc::clone(&order);
        child.add(DeferredAction::sync(ActionKind::Render, move || {
            o1.borrow_mut().push("first");
            Ok(())
        }));
        child.forward_to(&parent);
        child.close();
        // the detached instance's queue keeps routing late work
        let o2 = Rc::clone(&order);
        child.add(DeferredAction::sync(ActionKind::Event, move || {
            o2.borrow_mut().push("second");
            Ok(())
        }));
        let mut pool = LocalPool::new();
        assert_eq!(pool.run_until(run_batch(&parent)), Some(2));
        assert_eq!(*order.borrow(), vec!["first", "second"]);
    }
}

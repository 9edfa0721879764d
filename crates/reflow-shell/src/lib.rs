//! Host shell: mounts a root element, drives every render loop on a local
//! executor, folds the output streams into a [`HostTree`] and decides when
//! the tree has settled.

use std::cell::{Cell, RefCell};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use futures::executor::{LocalPool, LocalSpawner};
use futures::future::{self, LocalBoxFuture};
use futures::task::LocalSpawnExt;
use futures::{FutureExt, Stream};

use reflow_core::{
    yield_now, ComponentError, ContextId, Controller, Element, MountOptions, OutputBatch,
    OutputStream, RenderContext, RenderMeta, Scheduler,
};

pub mod host;
pub mod timer;

pub use host::{HostNode, HostTree, NodeId};
pub use timer::Delay;

/// How the flush cycle decides that a quiet tree is finished. Consulted
/// only while streams are still open but nothing is ready.
#[derive(Clone, Copy, Debug)]
pub enum SettleStrategy {
    /// A bounded run of cooperative yields; settles as soon as the
    /// executor has no immediately runnable work.
    Microtasks,
    /// One zero-length timer turn.
    Macrotask,
    /// A real timer; updates arriving before it fires reset it.
    Timeout(Duration),
}

/// Passed to the `rendered` callback after every applied flush. The mount
/// scaffold's single batch is not counted.
#[derive(Clone, Copy, Debug)]
pub struct RenderDetails {
    pub flushes: usize,
    pub open_streams: usize,
}

pub struct RenderOptions {
    /// Stop after this many flushes even if the tree has not settled.
    pub max_iterations: Option<usize>,
    pub settle: SettleStrategy,
    /// Observes every flush; a natural place to drive test input.
    pub rendered: Option<Box<dyn FnMut(&RenderDetails)>>,
    /// Escape hatch: runs with the root context before the first pass.
    pub on_context: Option<Box<dyn Fn(&Rc<RenderContext>)>>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            max_iterations: None,
            settle: SettleStrategy::Timeout(Duration::from_millis(100)),
            rendered: None,
            on_context: None,
        }
    }
}

#[derive(Debug)]
pub struct RenderReport {
    pub tree: HostTree,
    pub flushes: usize,
}

struct PoolScheduler {
    spawner: LocalSpawner,
}

impl Scheduler for PoolScheduler {
    fn spawn_local(&self, task: LocalBoxFuture<'static, ()>) {
        if let Err(error) = self.spawner.spawn_local(task) {
            log::error!("failed to spawn runtime task: {error:?}");
        }
    }
}

/// Root controller: collects streams for the flush cycle and keeps loops
/// waiting until the cycle declares the tree settled.
struct RootController {
    streams: RefCell<Vec<(ContextId, OutputStream)>>,
    waker: RefCell<Option<Waker>>,
    settled: Cell<bool>,
}

impl RootController {
    fn new() -> Self {
        Self {
            streams: RefCell::new(Vec::new()),
            waker: RefCell::new(None),
            settled: Cell::new(false),
        }
    }

    fn take_streams(&self) -> Vec<(ContextId, OutputStream)> {
        self.streams.borrow_mut().drain(..).collect()
    }

    fn register_waker(&self, waker: &Waker) {
        *self.waker.borrow_mut() = Some(waker.clone());
    }

    fn settle(&self) {
        self.settled.set(true);
    }
}

impl Controller for RootController {
    fn hello(&self, context: &Rc<RenderContext>, output: OutputStream) {
        self.streams.borrow_mut().push((context.id(), output));
        if let Some(waker) = self.waker.borrow_mut().take() {
            waker.wake();
        }
    }

    fn will_continue(&self, _context: &Rc<RenderContext>, _meta: &RenderMeta) -> bool {
        !self.settled.get()
    }
}

enum FlushEvent {
    Batch(ContextId, OutputBatch),
    Fatal(ComponentError),
    Idle,
}

async fn yield_turns(turns: usize) {
    for _ in 0..turns {
        yield_now().await;
    }
}

fn settle_future(strategy: SettleStrategy) -> LocalBoxFuture<'static, ()> {
    match strategy {
        SettleStrategy::Microtasks => yield_turns(16).boxed_local(),
        SettleStrategy::Macrotask => Delay::new(Duration::ZERO).boxed_local(),
        SettleStrategy::Timeout(duration) => Delay::new(duration).boxed_local(),
    }
}

async fn next_event(
    controller: &RootController,
    streams: &mut Vec<(ContextId, OutputStream)>,
    settle: SettleStrategy,
) -> FlushEvent {
    let mut settle_fut = settle_future(settle);
    future::poll_fn(|cx| {
        streams.extend(controller.take_streams());
        controller.register_waker(cx.waker());
        let mut index = 0;
        while index < streams.len() {
            match Pin::new(&mut streams[index].1).poll_next(cx) {
                Poll::Ready(Some(Ok(batch))) => {
                    let id = streams[index].0;
                    return Poll::Ready(FlushEvent::Batch(id, batch));
                }
                Poll::Ready(Some(Err(error))) => return Poll::Ready(FlushEvent::Fatal(error)),
                Poll::Ready(None) => {
                    streams.swap_remove(index);
                }
                Poll::Pending => index += 1,
            }
        }
        if streams.is_empty() {
            // every loop has ended; nothing can mount more
            return Poll::Ready(FlushEvent::Idle);
        }
        settle_fut.poll_unpin(cx).map(|_| FlushEvent::Idle)
    })
    .await
}

async fn flush_cycle(
    controller: &RootController,
    tree: &mut HostTree,
    root_id: ContextId,
    options: &mut RenderOptions,
) -> Result<usize, ComponentError> {
    let mut streams: Vec<(ContextId, OutputStream)> = Vec::new();
    let mut flushes = 0usize;
    loop {
        match next_event(controller, &mut streams, options.settle).await {
            FlushEvent::Fatal(error) => return Err(error),
            FlushEvent::Idle => return Ok(flushes),
            FlushEvent::Batch(context, batch) => {
                tree.apply(context, batch);
                if context == root_id {
                    continue;
                }
                flushes += 1;
                let details = RenderDetails {
                    flushes,
                    open_streams: streams.len(),
                };
                if let Some(rendered) = options.rendered.as_mut() {
                    rendered(&details);
                }
                if let Some(max) = options.max_iterations {
                    if flushes >= max {
                        log::debug!("stopping after {flushes} flushes (cap {max})");
                        return Ok(flushes);
                    }
                }
            }
        }
    }
}

/// Renders `element` to completion: mounts it, applies every output batch
/// until the tree settles (or the iteration cap is reached, or an
/// unhandled error surfaces), destroys the tree and reports the result.
pub fn render(element: Element, mut options: RenderOptions) -> Result<RenderReport, ComponentError> {
    let mut pool = LocalPool::new();
    let controller = Rc::new(RootController::new());
    let scheduler: Rc<dyn Scheduler> = Rc::new(PoolScheduler {
        spawner: pool.spawner(),
    });
    let root = reflow_core::mount(
        element,
        MountOptions {
            controller: Rc::clone(&controller) as Rc<dyn Controller>,
            scheduler,
        },
    );
    if let Some(on_context) = options.on_context.as_ref() {
        on_context(&root);
    }
    let mut tree = HostTree::new(root.id());
    let outcome = pool.run_until(flush_cycle(&controller, &mut tree, root.id(), &mut options));
    controller.settle();
    pool.run_until(root.destroy());
    pool.run_until_stalled();
    let flushes = outcome?;
    Ok(RenderReport { tree, flushes })
}

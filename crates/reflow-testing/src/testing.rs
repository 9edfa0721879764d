//! Stub hosts and assertion helpers shared by runtime tests.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use futures::channel::mpsc::TryRecvError;
use futures::executor::LocalSpawner;
use futures::future::LocalBoxFuture;
use futures::task::LocalSpawnExt;

use reflow_core::{
    ComponentError, ContextId, Controller, OutputBatch, OutputItem, OutputNode, OutputStream,
    RenderContext, Scheduler,
};

/// Scheduler backed by a `LocalPool` spawner.
pub struct TestScheduler {
    spawner: LocalSpawner,
}

impl TestScheduler {
    pub fn new(spawner: LocalSpawner) -> Rc<Self> {
        Rc::new(Self { spawner })
    }
}

impl Scheduler for TestScheduler {
    fn spawn_local(&self, task: LocalBoxFuture<'static, ()>) {
        self.spawner
            .spawn_local(task)
            .expect("test executor is gone");
    }
}

/// Controller that records every mounted context and hands the streams to
/// the test body. `will_continue` is a settable flag so tests choose
/// between long-lived and one-shot loops.
pub struct RecordingController {
    streams: RefCell<Vec<(ContextId, OutputStream)>>,
    contexts: RefCell<Vec<Rc<RenderContext>>>,
    destroyed: RefCell<Vec<ContextId>>,
    after_renders: RefCell<Vec<(ContextId, bool)>>,
    keep_running: Cell<bool>,
    abort: Cell<bool>,
}

impl RecordingController {
    pub fn new(keep_running: bool) -> Rc<Self> {
        Rc::new(Self {
            streams: RefCell::new(Vec::new()),
            contexts: RefCell::new(Vec::new()),
            destroyed: RefCell::new(Vec::new()),
            after_renders: RefCell::new(Vec::new()),
            keep_running: Cell::new(keep_running),
            abort: Cell::new(false),
        })
    }

    pub fn set_keep_running(&self, keep_running: bool) {
        self.keep_running.set(keep_running);
    }

    pub fn set_aborted(&self, abort: bool) {
        self.abort.set(abort);
    }

    /// Streams registered since the last call.
    pub fn take_streams(&self) -> Vec<(ContextId, OutputStream)> {
        self.streams.borrow_mut().drain(..).collect()
    }

    pub fn contexts(&self) -> Vec<Rc<RenderContext>> {
        self.contexts.borrow().clone()
    }

    pub fn destroyed(&self) -> Vec<ContextId> {
        self.destroyed.borrow().clone()
    }

    /// `(context, will_continue)` pairs in the order `after_render` saw
    /// them.
    pub fn after_renders(&self) -> Vec<(ContextId, bool)> {
        self.after_renders.borrow().clone()
    }
}

impl Controller for RecordingController {
    fn hello(&self, context: &Rc<RenderContext>, output: OutputStream) {
        self.streams.borrow_mut().push((context.id(), output));
        self.contexts.borrow_mut().push(Rc::clone(context));
    }

    fn will_continue(
        &self,
        _context: &Rc<RenderContext>,
        _meta: &reflow_core::RenderMeta,
    ) -> bool {
        self.keep_running.get()
    }

    fn after_render(
        &self,
        context: &Rc<RenderContext>,
        _meta: &reflow_core::RenderMeta,
        will_continue: bool,
    ) -> bool {
        self.after_renders
            .borrow_mut()
            .push((context.id(), will_continue));
        true
    }

    fn after_destroyed(&self, context: &Rc<RenderContext>) {
        self.destroyed.borrow_mut().push(context.id());
    }

    fn aborted(&self) -> bool {
        self.abort.get()
    }
}

/// Pulls everything currently buffered on a stream without blocking.
pub fn drain_stream(stream: &mut OutputStream) -> Vec<OutputItem> {
    let mut items = Vec::new();
    while let Ok(item) = stream.try_recv() {
        items.push(item);
    }
    items
}

/// True once the sending loop has ended and the buffer is empty.
pub fn stream_ended(stream: &mut OutputStream) -> bool {
    matches!(stream.try_recv(), Err(TryRecvError::Closed))
}

/// Concatenated text of a batch, depth first. Slots render as nothing;
/// tests that care about child output read the child's stream.
pub fn batch_text(batch: &OutputBatch) -> String {
    fn visit(node: &OutputNode, out: &mut String) {
        match node {
            OutputNode::Text(text) => out.push_str(text),
            OutputNode::Host(host) => {
                for child in host.children.iter() {
                    visit(child, out);
                }
            }
            OutputNode::Slot(_) => {}
        }
    }
    let mut out = String::new();
    for node in batch {
        visit(node, &mut out);
    }
    out
}

/// Batches successfully emitted so far, panicking on an error item.
pub fn ok_batches(items: Vec<OutputItem>) -> Vec<OutputBatch> {
    items
        .into_iter()
        .map(|item| item.expect("stream reported an error"))
        .collect()
}

/// First error item, if the stream reported one.
pub fn first_error(items: &[OutputItem]) -> Option<ComponentError> {
    items.iter().find_map(|item| item.as_ref().err().cloned())
}

/// Shared ordered log for lifecycle and effect ordering assertions.
#[derive(Clone, Default)]
pub struct CallLog {
    entries: Rc<RefCell<Vec<String>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.entries.borrow_mut().push(entry.into());
    }

    pub fn take(&self) -> Vec<String> {
        self.entries.borrow_mut().drain(..).collect()
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.entries.borrow().clone()
    }
}

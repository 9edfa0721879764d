//! Per-instance render context.
//!
//! A [`RenderContext`] is the identity of one mounted component instance:
//! its dispatcher (token, queue, hook slots), its current program (invoke
//! function plus props), its child registry, and its output channel. The
//! context tree is strict: parents own children through the registry, and
//! a child reaches up only through a non-owning `Weak` pointer.

use std::cell::{Cell, RefCell, RefMut};
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use futures::channel::mpsc::{self, UnboundedSender};

use crate::controller::{Controller, OutputItem, OutputStream};
use crate::dispatcher::{ContextMap, Dispatcher};
use crate::element::{InvokeFn, Props};
use crate::platform::Scheduler;
use crate::queue::{ActionKind, ActionQueue, DeferredAction};
use crate::registry::InstanceRegistry;
use crate::state::{StateCell, Version};
use crate::{BoundaryFn, ComponentError};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a mounted instance. Output batches refer to
/// child instances by this id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ContextId(u64);

pub(crate) struct ContextOptions {
    pub invoke: InvokeFn,
    pub props: Props,
    pub parent: Option<Weak<RenderContext>>,
    pub controller: Rc<dyn Controller>,
    pub scheduler: Rc<dyn Scheduler>,
    pub context_map: ContextMap,
    pub boundary: BoundaryFn,
}

pub struct RenderContext {
    id: ContextId,
    dispatcher: Dispatcher,
    invoke: RefCell<InvokeFn>,
    props: RefCell<Props>,
    previous_props: RefCell<Option<Props>>,
    rendered_version: Cell<Option<Version>>,
    yielded: Cell<bool>,
    parent: Option<Weak<RenderContext>>,
    controller: Rc<dyn Controller>,
    scheduler: Rc<dyn Scheduler>,
    boundary: BoundaryFn,
    children: RefCell<InstanceRegistry>,
    destroyable: Cell<bool>,
    destroying: Cell<bool>,
    destroyed: Cell<bool>,
    loop_done: Cell<bool>,
    loop_finished: StateCell<()>,
    finished: StateCell<()>,
    output: RefCell<Option<UnboundedSender<OutputItem>>>,
}

impl RenderContext {
    pub(crate) fn create(options: ContextOptions) -> (Rc<Self>, OutputStream) {
        let (sender, receiver) = mpsc::unbounded();
        let context = Rc::new(Self {
            id: ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed)),
            dispatcher: Dispatcher::new(options.context_map),
            invoke: RefCell::new(options.invoke),
            props: RefCell::new(options.props),
            previous_props: RefCell::new(None),
            rendered_version: Cell::new(None),
            yielded: Cell::new(false),
            parent: options.parent,
            controller: options.controller,
            scheduler: options.scheduler,
            boundary: options.boundary,
            children: RefCell::new(InstanceRegistry::new()),
            destroyable: Cell::new(false),
            destroying: Cell::new(false),
            destroyed: Cell::new(false),
            loop_done: Cell::new(false),
            loop_finished: StateCell::new(()),
            finished: StateCell::new(()),
            output: RefCell::new(Some(sender)),
        });
        (context, receiver)
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn token(&self) -> StateCell<()> {
        self.dispatcher.token()
    }

    pub fn queue(&self) -> ActionQueue {
        self.dispatcher.queue()
    }

    pub fn parent(&self) -> Option<Rc<RenderContext>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    pub fn has_parent(&self) -> bool {
        self.parent.is_some()
    }

    pub(crate) fn controller(&self) -> Rc<dyn Controller> {
        Rc::clone(&self.controller)
    }

    pub(crate) fn scheduler(&self) -> Rc<dyn Scheduler> {
        Rc::clone(&self.scheduler)
    }

    pub(crate) fn children_mut(&self) -> RefMut<'_, InstanceRegistry> {
        self.children.borrow_mut()
    }

    pub fn child_count(&self) -> usize {
        self.children.borrow().len()
    }

    pub(crate) fn program(&self) -> (InvokeFn, Props, Option<Props>) {
        (
            Rc::clone(&self.invoke.borrow()),
            self.props.borrow().clone(),
            self.previous_props.borrow().clone(),
        )
    }

    /// Adopts a new program from the owning pass. The invoke function and
    /// captured context values are always refreshed; the instance is only
    /// invalidated when the props identity actually changed.
    pub(crate) fn set_program(&self, invoke: InvokeFn, props: Props, map: ContextMap) {
        *self.invoke.borrow_mut() = invoke;
        self.dispatcher.set_context_map(map);
        let changed = !self.props.borrow().same(&props);
        if changed {
            *self.props.borrow_mut() = props;
            self.dispatcher.token().change(());
        }
    }

    /// Wakes the loop without going through a reducer.
    pub fn invalidate(&self) {
        self.dispatcher.token().change(());
    }

    pub fn rendered_version(&self) -> Option<Version> {
        self.rendered_version.get()
    }

    pub(crate) fn mark_rendered(&self, version: Version) {
        self.rendered_version.set(Some(version));
    }

    pub(crate) fn commit_props(&self) {
        *self.previous_props.borrow_mut() = Some(self.props.borrow().clone());
    }

    pub fn has_yielded(&self) -> bool {
        self.yielded.get()
    }

    pub(crate) fn set_yielded(&self) {
        self.yielded.set(true);
    }

    /// Sends an item to the consumer. `false` means the consumer dropped
    /// the stream and the loop should wind down.
    pub(crate) fn emit(&self, item: OutputItem) -> bool {
        match self.output.borrow().as_ref() {
            Some(sender) => sender.unbounded_send(item).is_ok(),
            None => false,
        }
    }

    pub(crate) fn close_output(&self) {
        self.output.borrow_mut().take();
    }

    /// The boundary children of this instance report into. A pass may have
    /// installed an override (lifecycle error boundaries); otherwise the
    /// instance's own boundary is inherited.
    pub(crate) fn child_boundary(&self) -> BoundaryFn {
        self.dispatcher
            .child_boundary()
            .unwrap_or_else(|| Rc::clone(&self.boundary))
    }

    /// Reports an error to this instance's boundary. `true` means the
    /// boundary did not handle it and the error is fatal here.
    pub(crate) fn handle_error(&self, error: &ComponentError) -> bool {
        (self.boundary)(error)
    }

    pub fn is_destroyable(&self) -> bool {
        self.destroyable.get()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.get()
    }

    pub(crate) fn mark_loop_done(&self) {
        self.loop_done.set(true);
        self.loop_finished.change(());
    }

    /// Destroys this instance. Idempotent: concurrent and repeated calls
    /// all resolve once teardown has completed. A call made while a render
    /// pass is in flight first waits for the loop to wind down.
    pub async fn destroy(self: &Rc<Self>) {
        self.destroyable.set(true);
        if self.destroyed.get() {
            return;
        }
        // Wake the loop out of its wait so it can observe destroyable.
        self.dispatcher.token().change(());
        self.dispatcher
            .queue()
            .add(DeferredAction::sync(ActionKind::Render, || Ok(())));
        loop {
            let seen = self.loop_finished.version();
            if self.loop_done.get() {
                break;
            }
            self.loop_finished.wait_newer(seen).await;
        }
        self.teardown().await;
    }

    /// Runs the teardown handshake exactly once; late callers wait for the
    /// first one to finish.
    pub(crate) async fn teardown(self: &Rc<Self>) {
        if self.destroying.replace(true) {
            loop {
                let seen = self.finished.version();
                if self.destroyed.get() {
                    return;
                }
                self.finished.wait_newer(seen).await;
            }
        }
        self.controller.before_destroyed(self);
        let children = self.children.borrow_mut().drain_all();
        for child in children {
            // boxing keeps the recursive destroy future finite
            let destroy: futures::future::LocalBoxFuture<'_, ()> =
                Box::pin(async move { child.destroy().await });
            destroy.await;
        }
        if let Err(error) = self.dispatcher.destroy_effects() {
            log::error!("teardown of context {:?} reported: {error}", self.id);
        }
        self.controller.after_destroyed(self);
        self.dispatcher.queue().close();
        self.destroyed.set(true);
        self.finished.change(());
    }
}

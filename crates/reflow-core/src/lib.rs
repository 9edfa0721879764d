//! Core runtime for an asynchronous component rendering engine.
//!
//! Components are plain functions from props and a hook dispatcher to an
//! element tree. Every mounted instance gets its own [`RenderContext`]
//! carrying an invalidation token, a deferred action queue and hook slots,
//! and runs one async render loop that streams committed output batches to
//! the host. Child instances render in their own loops; a parent's output
//! only marks where a child's stream splices in.

use std::cell::{Cell, RefCell};
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::LocalBoxFuture;
use futures::FutureExt;

pub mod context;
pub mod controller;
pub mod dispatcher;
pub mod element;
pub mod hash;
pub mod lifecycle;
pub mod platform;
pub mod queue;
mod registry;
mod render;
pub mod slots;
pub mod state;
pub mod transform;

pub use context::{ContextId, RenderContext};
pub use controller::{Controller, OutputItem, OutputStream, RenderMeta};
pub use dispatcher::{
    Cleanup, DepsKey, Dispatch, Dispatcher, Hooks, RefHandle, SetState, StateUpdate,
};
pub use element::{
    attr, component, fragment, host, stateful, text, ComponentId, Context, Element, HostElement,
    Key, Props,
};
pub use hash::hash_one;
pub use lifecycle::Lifecycle;
pub use platform::{yield_now, Scheduler, YieldNow};
pub use queue::{ActionKind, ActionQueue, DeferredAction};
pub use state::{Snapshot, StateCell, Version};
pub use transform::{HostOutput, OutputBatch, OutputNode};

use crate::context::ContextOptions;
use crate::dispatcher::empty_context_map;
use crate::element::InvokeFn;

/// Cloneable, type-erased error carried through boundaries, queues and
/// output streams.
#[derive(Clone)]
pub struct ComponentError {
    inner: Rc<dyn Error + 'static>,
}

impl ComponentError {
    pub fn new(source: impl Error + 'static) -> Self {
        Self {
            inner: Rc::new(source),
        }
    }

    pub fn msg(message: impl Into<String>) -> Self {
        struct Message(String);
        impl fmt::Debug for Message {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
        impl fmt::Display for Message {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
        impl Error for Message {}
        Self {
            inner: Rc::new(Message(message.into())),
        }
    }
}

impl fmt::Display for ComponentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl fmt::Debug for ComponentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentError({:?})", self.inner)
    }
}

impl Error for ComponentError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.inner.source()
    }
}

/// Error boundary predicate. Returns `true` when the error was NOT handled
/// and must keep propagating.
pub type BoundaryFn = Rc<dyn Fn(&ComponentError) -> bool>;

static NEXT_SUSPENSION_ID: AtomicU64 = AtomicU64::new(1);

struct SuspensionInner {
    id: u64,
    ready: Cell<bool>,
    pending: RefCell<Option<LocalBoxFuture<'static, ()>>>,
}

/// A pending requirement of a render pass. A component that cannot render
/// yet returns `Halt::Suspend` with one of these; the loop settles the
/// carried future exactly once (per suspension id) and re-renders when it
/// resolves. The component keeps the suspension in a hook slot so every
/// retry reports the same id.
#[derive(Clone)]
pub struct Suspension {
    inner: Rc<SuspensionInner>,
}

impl Suspension {
    pub fn new(settle: impl Future<Output = ()> + 'static) -> Self {
        Self {
            inner: Rc::new(SuspensionInner {
                id: NEXT_SUSPENSION_ID.fetch_add(1, Ordering::Relaxed),
                ready: Cell::new(false),
                pending: RefCell::new(Some(settle.boxed_local())),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn is_ready(&self) -> bool {
        self.inner.ready.get()
    }

    pub(crate) fn take_future(&self) -> Option<LocalBoxFuture<'static, ()>> {
        self.inner.pending.borrow_mut().take()
    }

    pub(crate) fn mark_ready(&self) {
        self.inner.ready.set(true);
    }
}

impl fmt::Debug for Suspension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Suspension")
            .field("id", &self.inner.id)
            .field("ready", &self.inner.ready.get())
            .finish()
    }
}

/// Why a component body halted instead of returning an element.
#[derive(Clone, Debug)]
pub enum Halt {
    /// Cannot render yet; carries what the loop must settle first.
    Suspend(Suspension),
    /// Deliberately no new output; previous output stands.
    Skip,
    /// The pass failed.
    Failure(ComponentError),
}

impl From<ComponentError> for Halt {
    fn from(error: ComponentError) -> Self {
        Halt::Failure(error)
    }
}

/// What a component body produces.
pub type Rendered = Result<Element, Halt>;

pub struct MountOptions {
    pub controller: Rc<dyn Controller>,
    pub scheduler: Rc<dyn Scheduler>,
}

/// Mounts `element` as the root of a new context tree and starts its loop.
/// The root body is static, so the root stream carries exactly one batch;
/// component children mounted by it drive themselves.
pub fn mount(element: Element, options: MountOptions) -> Rc<RenderContext> {
    let invoke: InvokeFn = Rc::new(move |_hooks, _props| Ok(element.clone()));
    let (root, output) = RenderContext::create(ContextOptions {
        invoke,
        props: Props::new(()),
        parent: None,
        controller: Rc::clone(&options.controller),
        scheduler: Rc::clone(&options.scheduler),
        context_map: empty_context_map(),
        boundary: Rc::new(|_| true),
    });
    options.controller.hello(&root, output);
    options
        .scheduler
        .spawn_local(render::drive(Rc::clone(&root)).boxed_local());
    root
}

//! Hook dispatcher.
//!
//! The dispatcher is explicit: every component invocation receives a
//! [`Hooks`] borrow and all hook calls go through it. There is no ambient
//! current-component global; using hooks outside an active invocation is a
//! contract violation and panics.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::hash::Hash;
use std::rc::Rc;

use crate::element::{Context, InvokeFn, Props};
use crate::hash::hash_one;
use crate::queue::{ActionKind, ActionQueue, DeferredAction};
use crate::slots::HookSlots;
use crate::state::StateCell;
use crate::{BoundaryFn, ComponentError, Rendered};

/// Values provided by ancestor providers, keyed by context slot. Shared
/// immutably; providers build an extended copy for their subtree.
pub(crate) type ContextMap = Rc<hashbrown::HashMap<u64, Rc<dyn Any>, ahash::RandomState>>;

pub(crate) fn empty_context_map() -> ContextMap {
    Rc::new(hashbrown::HashMap::with_hasher(ahash::RandomState::new()))
}

/// Dependency fingerprint for `use_memo`, `use_callback` and `use_effect`.
/// `of(..)` hashes the dependencies, `always()` forces recomputation every
/// pass, `unit()` pins the slot to its first computation.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct DepsKey(Option<u64>);

impl DepsKey {
    pub fn of<K: Hash>(deps: &K) -> Self {
        Self(Some(hash_one(deps)))
    }

    pub fn always() -> Self {
        Self(None)
    }

    pub fn unit() -> Self {
        Self::of(&())
    }

    fn changed_from(self, previous: Option<DepsKey>) -> bool {
        match (previous, self.0) {
            (Some(DepsKey(Some(prev))), Some(next)) => prev != next,
            _ => true,
        }
    }
}

/// Cleanup returned by an effect creator; runs before the effect is
/// re-created and when the instance is destroyed.
pub struct Cleanup(Option<Box<dyn FnOnce() -> Result<(), ComponentError>>>);

impl Cleanup {
    pub fn none() -> Self {
        Self(None)
    }

    pub fn of(run: impl FnOnce() + 'static) -> Self {
        Self(Some(Box::new(move || {
            run();
            Ok(())
        })))
    }

    pub fn fallible(run: impl FnOnce() -> Result<(), ComponentError> + 'static) -> Self {
        Self(Some(Box::new(run)))
    }

    fn run(self) -> Result<(), ComponentError> {
        match self.0 {
            Some(run) => run(),
            None => Ok(()),
        }
    }
}

type EffectCreate = Box<dyn FnOnce() -> Result<Cleanup, ComponentError>>;

#[derive(Default)]
struct EffectSlot {
    deps: Option<DepsKey>,
    create: Option<EffectCreate>,
    cleanup: Option<Cleanup>,
}

struct ReducerSlot<S, A> {
    state: S,
    reducer: Rc<dyn Fn(&S, A) -> S>,
}

/// Shared handle to a reducer slot. Dispatching queues a deferred action
/// that runs the reducer and bumps the invalidation token only when the
/// produced state differs from the stored one, so dispatching an identical
/// value is a no-op for the render loop.
pub struct Dispatch<S: 'static, A: 'static> {
    slot: Rc<RefCell<ReducerSlot<S, A>>>,
    queue: ActionQueue,
    token: StateCell<()>,
}

impl<S, A> Clone for Dispatch<S, A> {
    fn clone(&self) -> Self {
        Self {
            slot: Rc::clone(&self.slot),
            queue: self.queue.clone(),
            token: self.token.clone(),
        }
    }
}

impl<S: Clone + PartialEq + 'static, A: 'static> Dispatch<S, A> {
    pub fn dispatch(&self, action: A) {
        let slot = Rc::clone(&self.slot);
        let token = self.token.clone();
        self.queue.add(DeferredAction::sync(ActionKind::Render, move || {
            let next = {
                let guard = slot.borrow();
                let reducer = Rc::clone(&guard.reducer);
                reducer(&guard.state, action)
            };
            let changed = {
                let mut guard = slot.borrow_mut();
                if next != guard.state {
                    guard.state = next;
                    true
                } else {
                    false
                }
            };
            if changed {
                token.change(());
            }
            Ok(())
        }));
    }

    /// The state as last committed by the reducer, not the snapshot the
    /// current render pass was given.
    pub fn current(&self) -> S {
        self.slot.borrow().state.clone()
    }
}

/// State update accepted by [`SetState`]: either a replacement value or a
/// function of the previous state.
pub enum StateUpdate<T> {
    Value(T),
    With(Box<dyn FnOnce(&T) -> T>),
}

impl<T: Clone> StateUpdate<T> {
    fn apply(self, previous: &T) -> T {
        match self {
            StateUpdate::Value(value) => value,
            StateUpdate::With(update) => update(previous),
        }
    }
}

/// Setter half of `use_state`.
pub struct SetState<T: 'static> {
    dispatch: Dispatch<T, StateUpdate<T>>,
}

impl<T> Clone for SetState<T> {
    fn clone(&self) -> Self {
        Self {
            dispatch: self.dispatch.clone(),
        }
    }
}

impl<T: Clone + PartialEq + 'static> SetState<T> {
    pub fn set(&self, value: T) {
        self.dispatch.dispatch(StateUpdate::Value(value));
    }

    pub fn update(&self, update: impl FnOnce(&T) -> T + 'static) {
        self.dispatch.dispatch(StateUpdate::With(Box::new(update)));
    }

    pub fn current(&self) -> T {
        self.dispatch.current()
    }
}

/// Mutable cell returned by `use_ref`. Mutating it never invalidates.
pub struct RefHandle<T>(Rc<RefCell<T>>);

impl<T> Clone for RefHandle<T> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<T> RefHandle<T> {
    pub fn set(&self, value: T) {
        *self.0.borrow_mut() = value;
    }

    pub fn replace(&self, value: T) -> T {
        self.0.replace(value)
    }

    pub fn with<R>(&self, read: impl FnOnce(&T) -> R) -> R {
        read(&self.0.borrow())
    }

    pub fn with_mut<R>(&self, update: impl FnOnce(&mut T) -> R) -> R {
        update(&mut self.0.borrow_mut())
    }
}

impl<T: Clone> RefHandle<T> {
    pub fn get(&self) -> T {
        self.0.borrow().clone()
    }
}

pub(crate) struct DispatcherInner {
    token: StateCell<()>,
    queue: ActionQueue,
    slots: RefCell<HookSlots>,
    context_map: RefCell<ContextMap>,
    pass_effects: RefCell<Vec<Rc<RefCell<EffectSlot>>>>,
    all_effects: RefCell<Vec<Rc<RefCell<EffectSlot>>>>,
    child_boundary: RefCell<Option<BoundaryFn>>,
    active: Cell<bool>,
}

/// Per-instance hook dispatcher. Clones share the instance's state.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Rc<DispatcherInner>,
}

impl Dispatcher {
    pub(crate) fn new(context_map: ContextMap) -> Self {
        Self {
            inner: Rc::new(DispatcherInner {
                token: StateCell::new(()),
                queue: ActionQueue::new(),
                slots: RefCell::new(HookSlots::new()),
                context_map: RefCell::new(context_map),
                pass_effects: RefCell::new(Vec::new()),
                all_effects: RefCell::new(Vec::new()),
                child_boundary: RefCell::new(None),
                active: Cell::new(false),
            }),
        }
    }

    pub fn token(&self) -> StateCell<()> {
        self.inner.token.clone()
    }

    pub fn queue(&self) -> ActionQueue {
        self.inner.queue.clone()
    }

    pub fn hooked(&self) -> bool {
        self.inner.slots.borrow().hooked()
    }

    pub(crate) fn set_context_map(&self, map: ContextMap) {
        *self.inner.context_map.borrow_mut() = map;
    }

    pub(crate) fn context_map(&self) -> ContextMap {
        Rc::clone(&self.inner.context_map.borrow())
    }

    pub(crate) fn child_boundary(&self) -> Option<BoundaryFn> {
        self.inner.child_boundary.borrow().clone()
    }

    pub(crate) fn begin_pass(&self) {
        self.inner.slots.borrow_mut().begin_pass();
        self.inner.pass_effects.borrow_mut().clear();
        *self.inner.child_boundary.borrow_mut() = None;
    }

    /// Runs the component body with hooks enabled.
    pub(crate) fn invoke(
        &self,
        invoke: &InvokeFn,
        props: &Props,
        previous: Option<Props>,
    ) -> Rendered {
        self.inner.active.set(true);
        let mut hooks = Hooks {
            dispatcher: self,
            previous,
        };
        let rendered = invoke(&mut hooks, props);
        self.inner.active.set(false);
        rendered
    }

    /// Runs the effects whose dependencies changed during the pass that
    /// just produced output: previous cleanup first, then the creator.
    pub(crate) fn commit_effects(&self) -> Result<(), ComponentError> {
        let pending: Vec<_> = self.inner.pass_effects.borrow_mut().drain(..).collect();
        for slot in pending {
            let (cleanup, create) = {
                let mut guard = slot.borrow_mut();
                (guard.cleanup.take(), guard.create.take())
            };
            if let Some(cleanup) = cleanup {
                cleanup.run()?;
            }
            if let Some(create) = create {
                let next = create()?;
                slot.borrow_mut().cleanup = Some(next);
            }
        }
        Ok(())
    }

    /// Runs every live effect cleanup in registration order. All cleanups
    /// run even when one fails; the first failure is reported afterwards.
    pub(crate) fn destroy_effects(&self) -> Result<(), ComponentError> {
        let all: Vec<_> = self.inner.all_effects.borrow().clone();
        let mut first_error = None;
        for slot in all {
            let cleanup = slot.borrow_mut().cleanup.take();
            if let Some(cleanup) = cleanup {
                if let Err(error) = cleanup.run() {
                    log::error!("effect cleanup failed during teardown: {error}");
                    first_error.get_or_insert(error);
                }
            }
        }
        match first_error {
            None => Ok(()),
            Some(error) => Err(error),
        }
    }
}

/// The hook surface handed to a component body for the duration of one
/// invocation.
pub struct Hooks<'a> {
    dispatcher: &'a Dispatcher,
    previous: Option<Props>,
}

impl<'a> Hooks<'a> {
    fn inner(&self) -> &DispatcherInner {
        assert!(
            self.dispatcher.inner.active.get(),
            "no active render: hooks may only be called during a component invocation"
        );
        &self.dispatcher.inner
    }

    /// The props the instance rendered with last pass, if any. Lifecycle
    /// adapters use this for prev-props callbacks.
    pub fn previous_props(&self) -> Option<Props> {
        self.inner();
        self.previous.clone()
    }

    pub fn use_state<T>(&mut self, init: impl FnOnce() -> T) -> (T, SetState<T>)
    where
        T: Clone + PartialEq + 'static,
    {
        let (value, dispatch) =
            self.use_reducer(|previous: &T, update: StateUpdate<T>| update.apply(previous), init);
        (value, SetState { dispatch })
    }

    /// The reducer captured on the first call stays in force for the
    /// slot's lifetime.
    pub fn use_reducer<S, A>(
        &mut self,
        reducer: impl Fn(&S, A) -> S + 'static,
        init: impl FnOnce() -> S,
    ) -> (S, Dispatch<S, A>)
    where
        S: Clone + PartialEq + 'static,
        A: 'static,
    {
        let inner = self.inner();
        let (slot, _) = inner.slots.borrow_mut().claim(|| ReducerSlot {
            state: init(),
            reducer: Rc::new(reducer) as Rc<dyn Fn(&S, A) -> S>,
        });
        let state = slot.borrow().state.clone();
        let dispatch = Dispatch {
            slot,
            queue: inner.queue.clone(),
            token: inner.token.clone(),
        };
        (state, dispatch)
    }

    pub fn use_ref<T: 'static>(&mut self, init: impl FnOnce() -> T) -> RefHandle<T> {
        let inner = self.inner();
        let (slot, _) = inner.slots.borrow_mut().claim(init);
        RefHandle(slot)
    }

    pub fn use_memo<T: 'static>(&mut self, deps: DepsKey, compute: impl FnOnce() -> T) -> Rc<T> {
        let inner = self.inner();
        let (slot, _) = inner
            .slots
            .borrow_mut()
            .claim(|| (None::<DepsKey>, None::<Rc<T>>));
        let mut guard = slot.borrow_mut();
        match guard.1 {
            Some(ref value) if !deps.changed_from(guard.0) => Rc::clone(value),
            _ => {
                let value = Rc::new(compute());
                guard.0 = Some(deps);
                guard.1 = Some(Rc::clone(&value));
                value
            }
        }
    }

    pub fn use_callback<F: 'static>(&mut self, deps: DepsKey, callback: F) -> Rc<F> {
        self.use_memo(deps, move || callback)
    }

    pub fn use_effect(
        &mut self,
        deps: DepsKey,
        create: impl FnOnce() -> Result<Cleanup, ComponentError> + 'static,
    ) {
        let inner = self.inner();
        let (slot, created) = inner.slots.borrow_mut().claim(EffectSlot::default);
        if created {
            inner.all_effects.borrow_mut().push(Rc::clone(&slot));
        }
        let mut guard = slot.borrow_mut();
        if !deps.changed_from(guard.deps) {
            return;
        }
        guard.deps = Some(deps);
        guard.create = Some(Box::new(create));
        drop(guard);
        inner.pass_effects.borrow_mut().push(slot);
    }

    pub fn use_context<T: Clone + 'static>(&mut self, context: &Context<T>) -> Option<T> {
        let inner = self.inner();
        let map = inner.context_map.borrow();
        map.get(&context.slot())
            .and_then(|value| value.downcast_ref::<T>())
            .cloned()
    }

    /// Installs the error boundary children mounted during this pass will
    /// report to. The predicate returns `true` when the error remains
    /// unhandled and must keep propagating.
    pub fn set_error_boundary(&mut self, boundary: BoundaryFn) {
        *self.inner().child_boundary.borrow_mut() = Some(boundary);
    }

    /// Direct queue access, used by adapters that schedule work outside
    /// the reducer path.
    pub fn queue(&self) -> ActionQueue {
        self.inner().queue.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::Element;
    use futures::executor::LocalPool;
    use std::cell::RefCell as StdRefCell;

    fn invoke_fn(
        run: impl Fn(&mut Hooks<'_>) -> Rendered + 'static,
    ) -> InvokeFn {
        Rc::new(move |hooks, _props| run(hooks))
    }

    fn drain(queue: &ActionQueue) {
        let mut pool = LocalPool::new();
        pool.run_until(async {
            while !queue.is_empty() {
                let batch = queue.next_batch().await.unwrap();
                for action in batch {
                    action.run().await.unwrap();
                }
            }
        });
    }

    fn render_once(dispatcher: &Dispatcher, body: &InvokeFn) -> Rendered {
        dispatcher.begin_pass();
        dispatcher.invoke(body, &Props::new(()), None)
    }

    #[test]
    fn state_is_stable_until_dispatched() {
        let dispatcher = Dispatcher::new(empty_context_map());
        let seen = Rc::new(StdRefCell::new(Vec::new()));
        let seen2 = Rc::clone(&seen);
        let setter = Rc::new(StdRefCell::new(None));
        let setter2 = Rc::clone(&setter);
        let body = invoke_fn(move |hooks| {
            let (count, set_count) = hooks.use_state(|| 0u32);
            seen2.borrow_mut().push(count);
            *setter2.borrow_mut() = Some(set_count);
            Ok(Element::Nothing)
        });

        render_once(&dispatcher, &body).unwrap();
        render_once(&dispatcher, &body).unwrap();
        assert_eq!(*seen.borrow(), vec![0, 0]);

        let before = dispatcher.token().version();
        setter.borrow().as_ref().unwrap().set(3);
        drain(&dispatcher.queue());
        assert!(dispatcher.token().version() > before);

        render_once(&dispatcher, &body).unwrap();
        assert_eq!(*seen.borrow(), vec![0, 0, 3]);
    }

    #[test]
    fn dispatching_equal_state_does_not_invalidate() {
        let dispatcher = Dispatcher::new(empty_context_map());
        let setter = Rc::new(StdRefCell::new(None));
        let setter2 = Rc::clone(&setter);
        let body = invoke_fn(move |hooks| {
            let (_, set) = hooks.use_state(|| 42u32);
            *setter2.borrow_mut() = Some(set);
            Ok(Element::Nothing)
        });
        render_once(&dispatcher, &body).unwrap();

        let before = dispatcher.token().version();
        setter.borrow().as_ref().unwrap().set(42);
        drain(&dispatcher.queue());
        assert_eq!(dispatcher.token().version(), before);
    }

    #[test]
    fn reducer_updates_apply_in_dispatch_order() {
        let dispatcher = Dispatcher::new(empty_context_map());
        let handle = Rc::new(StdRefCell::new(None));
        let handle2 = Rc::clone(&handle);
        let body = invoke_fn(move |hooks| {
            let (_, dispatch) =
                hooks.use_reducer(|total: &i64, delta: i64| total + delta, || 0i64);
            *handle2.borrow_mut() = Some(dispatch);
            Ok(Element::Nothing)
        });
        render_once(&dispatcher, &body).unwrap();

        let dispatch = handle.borrow().as_ref().unwrap().clone();
        dispatch.dispatch(5);
        dispatch.dispatch(-2);
        drain(&dispatcher.queue());
        assert_eq!(dispatch.current(), 3);
    }

    #[test]
    fn memo_recomputes_only_when_deps_change() {
        let dispatcher = Dispatcher::new(empty_context_map());
        let runs = Rc::new(StdRefCell::new(0u32));
        let deps = Rc::new(StdRefCell::new(1u32));
        let runs2 = Rc::clone(&runs);
        let deps2 = Rc::clone(&deps);
        let body = invoke_fn(move |hooks| {
            let runs = Rc::clone(&runs2);
            let key = *deps2.borrow();
            hooks.use_memo(DepsKey::of(&key), move || {
                *runs.borrow_mut() += 1;
            });
            Ok(Element::Nothing)
        });
        render_once(&dispatcher, &body).unwrap();
        render_once(&dispatcher, &body).unwrap();
        assert_eq!(*runs.borrow(), 1);
        *deps.borrow_mut() = 2;
        render_once(&dispatcher, &body).unwrap();
        assert_eq!(*runs.borrow(), 2);
    }

    #[test]
    fn always_deps_recompute_every_pass() {
        let dispatcher = Dispatcher::new(empty_context_map());
        let runs = Rc::new(StdRefCell::new(0u32));
        let runs2 = Rc::clone(&runs);
        let body = invoke_fn(move |hooks| {
            let runs = Rc::clone(&runs2);
            hooks.use_memo(DepsKey::always(), move || {
                *runs.borrow_mut() += 1;
            });
            Ok(Element::Nothing)
        });
        render_once(&dispatcher, &body).unwrap();
        render_once(&dispatcher, &body).unwrap();
        assert_eq!(*runs.borrow(), 2);
    }

    #[test]
    fn callback_is_reused_until_deps_change() {
        let dispatcher = Dispatcher::new(empty_context_map());
        let ptrs = Rc::new(StdRefCell::new(Vec::new()));
        let deps = Rc::new(StdRefCell::new(1u32));
        let ptrs2 = Rc::clone(&ptrs);
        let deps2 = Rc::clone(&deps);
        let body = invoke_fn(move |hooks| {
            let key = *deps2.borrow();
            let callback = hooks.use_callback(DepsKey::of(&key), || 7u32);
            ptrs2.borrow_mut().push(Rc::as_ptr(&callback) as usize);
            Ok(Element::Nothing)
        });
        render_once(&dispatcher, &body).unwrap();
        render_once(&dispatcher, &body).unwrap();
        *deps.borrow_mut() = 2;
        render_once(&dispatcher, &body).unwrap();
        let ptrs = ptrs.borrow();
        assert_eq!(ptrs[0], ptrs[1]);
        assert_ne!(ptrs[1], ptrs[2]);
    }

    #[test]
    fn effect_runs_cleanup_before_recreate() {
        let dispatcher = Dispatcher::new(empty_context_map());
        let log = Rc::new(StdRefCell::new(Vec::new()));
        let deps = Rc::new(StdRefCell::new(1u32));
        let log2 = Rc::clone(&log);
        let deps2 = Rc::clone(&deps);
        let body = invoke_fn(move |hooks| {
            let log = Rc::clone(&log2);
            let key = *deps2.borrow();
            hooks.use_effect(DepsKey::of(&key), move || {
                log.borrow_mut().push(format!("create {key}"));
                let log = Rc::clone(&log);
                Ok(Cleanup::of(move || {
                    log.borrow_mut().push(format!("cleanup {key}"));
                }))
            });
            Ok(Element::Nothing)
        });

        render_once(&dispatcher, &body).unwrap();
        dispatcher.commit_effects().unwrap();
        render_once(&dispatcher, &body).unwrap();
        dispatcher.commit_effects().unwrap();
        assert_eq!(*log.borrow(), vec!["create 1"]);

        *deps.borrow_mut() = 2;
        render_once(&dispatcher, &body).unwrap();
        dispatcher.commit_effects().unwrap();
        assert_eq!(*log.borrow(), vec!["create 1", "cleanup 1", "create 2"]);

        dispatcher.destroy_effects().unwrap();
        assert_eq!(
            *log.borrow(),
            vec!["create 1", "cleanup 1", "create 2", "cleanup 2"]
        );
    }

    #[test]
    fn destroy_effects_runs_all_and_reports_first_error() {
        let dispatcher = Dispatcher::new(empty_context_map());
        let log = Rc::new(StdRefCell::new(Vec::new()));
        let log2 = Rc::clone(&log);
        let body = invoke_fn(move |hooks| {
            let first = Rc::clone(&log2);
            hooks.use_effect(DepsKey::unit(), move || {
                Ok(Cleanup::fallible(move || {
                    first.borrow_mut().push("first");
                    Err(ComponentError::msg("first cleanup failed"))
                }))
            });
            let second = Rc::clone(&log2);
            hooks.use_effect(DepsKey::unit(), move || {
                Ok(Cleanup::of(move || {
                    second.borrow_mut().push("second");
                }))
            });
            Ok(Element::Nothing)
        });
        render_once(&dispatcher, &body).unwrap();
        dispatcher.commit_effects().unwrap();

        let error = dispatcher.destroy_effects().unwrap_err();
        assert!(error.to_string().contains("first cleanup failed"));
        assert_eq!(*log.borrow(), vec!["first", "second"]);
    }

    #[test]
    #[should_panic(expected = "no active render")]
    fn hooks_outside_invocation_panic() {
        let dispatcher = Dispatcher::new(empty_context_map());
        let mut hooks = Hooks {
            dispatcher: &dispatcher,
            previous: None,
        };
        let _ = hooks.use_state(|| 0u32);
    }
}

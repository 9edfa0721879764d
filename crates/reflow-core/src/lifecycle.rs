//! Class-style lifecycle adapter.
//!
//! [`Lifecycle`] is the stateful-component surface: explicit state type,
//! derived state, update gating, mount/update/unmount notifications and
//! error-boundary hooks. The adapter lowers all of it onto the ordinary
//! hook dispatcher, so a lifecycle component is just a function component
//! with a fixed hook prelude.

use std::any::Any;
use std::rc::Rc;

use crate::dispatcher::{Cleanup, DepsKey, Hooks, SetState};
use crate::{ComponentError, Halt, Rendered};

pub trait Lifecycle: Sized + 'static {
    type Props: 'static;
    type State: Clone + PartialEq + 'static;

    /// Builds the instance. Called once per mounted identity; the instance
    /// lives as long as the instance's context does.
    fn create(props: &Self::Props) -> Self;

    fn initial_state(props: &Self::Props) -> Self::State;

    /// Recomputed every pass; `Some` replaces the state before rendering.
    fn derived_state(_props: &Self::Props, _state: &Self::State) -> Option<Self::State> {
        None
    }

    /// `false` skips the pass: no new output, previous output stands.
    fn should_update(&self, _next_props: &Self::Props, _next_state: &Self::State) -> bool {
        true
    }

    fn snapshot_before_update(
        &self,
        _previous_props: Option<&Self::Props>,
        _state: &Self::State,
    ) -> Option<Box<dyn Any>> {
        None
    }

    fn render(
        &self,
        hooks: &mut Hooks<'_>,
        props: &Self::Props,
        state: &Self::State,
        set_state: &SetState<Self::State>,
    ) -> Rendered;

    fn did_mount(&self) {}

    fn did_update(&self, _previous_props: Option<&Self::Props>, _snapshot: Option<Box<dyn Any>>) {}

    /// Runs as the instance's unmount cleanup, before the queue closes.
    fn will_unmount(&self) {}

    /// When `true`, errors from the subtree rendered by this component are
    /// routed to [`Lifecycle::derived_state_from_error`] and
    /// [`Lifecycle::did_catch`] instead of propagating.
    fn catches_errors() -> bool {
        false
    }

    fn derived_state_from_error(_error: &ComponentError) -> Option<Self::State> {
        None
    }

    fn did_catch(&self, _error: &ComponentError) {}
}

/// The fixed hook prelude shared by every lifecycle component. Hook order
/// must not depend on the pass, so everything is claimed before the
/// `should_update` early-out.
pub(crate) fn render_stateful<L: Lifecycle>(
    hooks: &mut Hooks<'_>,
    props: &L::Props,
) -> Rendered {
    let instance: Rc<L> = (*hooks.use_memo(DepsKey::unit(), || Rc::new(L::create(props)))).clone();
    let (state, set_state) = hooks.use_state(|| {
        let state = L::initial_state(props);
        L::derived_state(props, &state).unwrap_or(state)
    });
    let mounted = hooks.use_ref(|| false);
    {
        let instance = Rc::clone(&instance);
        hooks.use_effect(DepsKey::unit(), move || {
            Ok(Cleanup::of(move || instance.will_unmount()))
        });
    }
    if L::catches_errors() {
        let instance = Rc::clone(&instance);
        let set_state = set_state.clone();
        hooks.set_error_boundary(Rc::new(move |error: &ComponentError| {
            if let Some(next) = L::derived_state_from_error(error) {
                set_state.set(next);
            }
            instance.did_catch(error);
            false
        }));
    }

    let state = match L::derived_state(props, &state) {
        Some(derived) => {
            if derived != state {
                set_state.set(derived.clone());
            }
            derived
        }
        None => state,
    };

    let previous = hooks.previous_props();
    let previous_props = previous.as_ref().and_then(|p| p.downcast_ref::<L::Props>());
    let first = !mounted.get();

    if !first && !instance.should_update(props, &state) {
        return Err(Halt::Skip);
    }
    let snapshot = if first {
        None
    } else {
        instance.snapshot_before_update(previous_props, &state)
    };
    let rendered = instance.render(hooks, props, &state, &set_state)?;
    if first {
        instance.did_mount();
        mounted.set(true);
    } else {
        instance.did_update(previous_props, snapshot);
    }
    Ok(rendered)
}

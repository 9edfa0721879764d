//! The render loop.
//!
//! Every mounted instance runs one copy of [`drive`] as its own task. A
//! turn of the loop: reset the hook cursor, snapshot the token, invoke the
//! body unless it is already caught up, expand the returned tree, emit the
//! batch, commit effects, then wait for either a queued action batch or a
//! newer token version. Suspensions are memoized by id so each one settles
//! exactly once; an error the boundary refuses to handle tears the context
//! down and ends the stream with that error.

use std::rc::Rc;

use futures::future::{self, Either};
use hashbrown::HashMap;

use crate::context::RenderContext;
use crate::controller::RenderMeta;
use crate::platform::yield_now;
use crate::queue::{ActionKind, ActionQueue, DeferredAction};
use crate::state::Version;
use crate::transform;
use crate::{ComponentError, Halt, Suspension};

pub(crate) async fn drive(context: Rc<RenderContext>) {
    let dispatcher = context.dispatcher().clone();
    let controller = context.controller();
    let queue = dispatcher.queue();
    let mut pending_suspensions: HashMap<u64, Suspension, ahash::RandomState> =
        HashMap::with_hasher(ahash::RandomState::new());
    let mut fatal: Option<ComponentError> = None;

    loop {
        // One turn per cycle, so consumers and sibling loops always run
        // even while this component keeps invalidating itself.
        yield_now().await;
        if context.is_destroyable() || controller.aborted() {
            break;
        }
        dispatcher.begin_pass();
        let snapshot = dispatcher.token().read();
        let meta = RenderMeta {
            current_version: snapshot.version,
            rendered_version: context.rendered_version(),
            has_parent: context.has_parent(),
        };
        let caught_up =
            context.rendered_version() == Some(snapshot.version) && context.has_yielded();

        if !caught_up {
            if !controller.before_render(&context, &meta) {
                break;
            }
            let (invoke, props, previous) = context.program();
            match dispatcher.invoke(&invoke, &props, previous) {
                Ok(element) => match transform::expand(&context, &element) {
                    Ok(batch) => {
                        context.commit_props();
                        if !context.emit(Ok(batch)) {
                            break;
                        }
                        context.set_yielded();
                        context.mark_rendered(snapshot.version);
                        if let Err(error) = dispatcher.commit_effects() {
                            if context.handle_error(&error) {
                                fatal = Some(error);
                                break;
                            }
                        }
                    }
                    Err(error) => {
                        if context.handle_error(&error) {
                            fatal = Some(error);
                            break;
                        }
                        context.mark_rendered(snapshot.version);
                    }
                },
                Err(Halt::Suspend(suspension)) => {
                    // The marker is left behind on purpose: the settled
                    // suspension re-renders even without a token bump.
                    pending_suspensions.retain(|_, pending| !pending.is_ready());
                    if !pending_suspensions.contains_key(&suspension.id()) {
                        if let Some(future) = suspension.take_future() {
                            let token = dispatcher.token();
                            let settled = suspension.clone();
                            queue.add(DeferredAction::deferred(
                                ActionKind::Render,
                                async move {
                                    future.await;
                                    settled.mark_ready();
                                    token.change(());
                                    Ok(())
                                },
                            ));
                        }
                        pending_suspensions.insert(suspension.id(), suspension);
                    }
                    log::trace!("context {:?} suspended", context.id());
                }
                Err(Halt::Skip) => {
                    context.mark_rendered(snapshot.version);
                }
                Err(Halt::Failure(error)) => {
                    if context.handle_error(&error) {
                        fatal = Some(error);
                        break;
                    }
                    context.mark_rendered(snapshot.version);
                }
            }
        }

        let will_continue = controller.will_continue(&context, &meta);
        if !controller.after_render(&context, &meta, will_continue) {
            break;
        }
        if dispatcher.hooked() && (will_continue || meta.has_parent) {
            match wait_for_updates(&context, &queue, snapshot.version, !will_continue).await {
                Ok(true) => {}
                Ok(false) => break,
                Err(error) => {
                    fatal = Some(error);
                    break;
                }
            }
        } else if !will_continue {
            break;
        }
        if context.is_destroyable() || controller.aborted() || !dispatcher.hooked() {
            break;
        }
    }

    context.mark_loop_done();
    if let Some(error) = fatal {
        log::debug!("context {:?} failed: {error}", context.id());
        context.teardown().await;
        context.emit(Err(error));
    }
    context.close_output();
}

/// Waits for the next reason to render. `Ok(true)` means go around again,
/// `Ok(false)` means the loop is done (queue closed, or the loop detached
/// and handed its queue to the parent), `Err` is a fatal action failure.
async fn wait_for_updates(
    context: &Rc<RenderContext>,
    queue: &ActionQueue,
    seen_version: Version,
    detach: bool,
) -> Result<bool, ComponentError> {
    if detach {
        if let Some(parent) = context.parent() {
            queue.forward_to(&parent.queue());
        }
        return Ok(false);
    }
    let newer = context.token().wait_newer(seen_version);
    match future::select(queue.next_batch(), newer).await {
        Either::Left((None, _)) => Ok(false),
        Either::Left((Some(batch), _)) => {
            for action in batch {
                if let Err(error) = action.run().await {
                    if context.handle_error(&error) {
                        return Err(error);
                    }
                    log::debug!("deferred action failed, handled by boundary: {error}");
                }
            }
            Ok(true)
        }
        Either::Right((_, _)) => Ok(true),
    }
}

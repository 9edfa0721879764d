//! Controller protocol.
//!
//! The controller is the host's window into every render loop. It learns
//! about new contexts through [`Controller::hello`] together with the
//! context's output stream, can veto passes, decides whether a loop without
//! a parent keeps waiting for updates, and is notified around teardown.

use std::rc::Rc;

use futures::channel::mpsc::UnboundedReceiver;

use crate::context::RenderContext;
use crate::state::Version;
use crate::transform::OutputBatch;
use crate::ComponentError;

/// One item on a context's output stream: a committed output batch, or the
/// unhandled error that tore the context down. The stream ends when the
/// loop ends.
pub type OutputItem = Result<OutputBatch, ComponentError>;

pub type OutputStream = UnboundedReceiver<OutputItem>;

/// Loop bookkeeping exposed to controller callbacks.
#[derive(Clone, Copy, Debug)]
pub struct RenderMeta {
    /// Token version the pass is rendering against.
    pub current_version: Version,
    /// Version of the last pass that produced or skipped output.
    pub rendered_version: Option<Version>,
    pub has_parent: bool,
}

#[allow(unused_variables)]
pub trait Controller {
    /// A context was mounted; `output` is the only handle to its stream.
    fn hello(&self, context: &Rc<RenderContext>, output: OutputStream) {}

    /// Return `false` to stop the loop before the pass runs.
    fn before_render(&self, context: &Rc<RenderContext>, meta: &RenderMeta) -> bool {
        true
    }

    /// Called right after each pass, before the loop blocks, with the
    /// `will_continue` decision for this cycle. Return `false` to stop
    /// the loop.
    fn after_render(
        &self,
        context: &Rc<RenderContext>,
        meta: &RenderMeta,
        will_continue: bool,
    ) -> bool {
        true
    }

    /// Whether a loop should keep waiting for updates on its own account.
    /// A loop with a parent waits regardless and, once this returns
    /// `false`, detaches by handing its queue to the parent; a parentless
    /// loop simply ends.
    fn will_continue(&self, context: &Rc<RenderContext>, meta: &RenderMeta) -> bool {
        false
    }

    fn before_destroyed(&self, context: &Rc<RenderContext>) {}

    fn after_destroyed(&self, context: &Rc<RenderContext>) {}

    /// Polled between passes; `true` stops every loop.
    fn aborted(&self) -> bool {
        false
    }
}

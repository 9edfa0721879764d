//! Host seam.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future::LocalBoxFuture;

/// Spawns the runtime's tasks. Each render loop and each deferred child
/// destruction is handed to the host as one `'static` local future; the
/// host decides how they are driven.
pub trait Scheduler {
    fn spawn_local(&self, task: LocalBoxFuture<'static, ()>);
}

/// Hands the executor one turn: `Pending` on the first poll with an
/// immediate self-wake, `Ready` on the next. Render loops yield once per
/// cycle so sibling tasks and the output consumer always get to run, even
/// while a component invalidates itself on every pass.
pub fn yield_now() -> YieldNow {
    YieldNow { yielded: false }
}

pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            Poll::Ready(())
        } else {
            self.yielded = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}

//! Thread-backed one-shot timer.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::thread;
use std::time::Duration;

use futures::task::AtomicWaker;

struct DelayInner {
    done: AtomicBool,
    waker: AtomicWaker,
}

/// Future that resolves once `duration` has elapsed. The backing thread is
/// spawned lazily on first poll; a zero duration still yields to the
/// executor once.
pub struct Delay {
    inner: Arc<DelayInner>,
    duration: Duration,
    started: bool,
}

impl Delay {
    pub fn new(duration: Duration) -> Self {
        Self {
            inner: Arc::new(DelayInner {
                done: AtomicBool::new(false),
                waker: AtomicWaker::new(),
            }),
            duration,
            started: false,
        }
    }
}

impl Future for Delay {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.inner.done.load(Ordering::Acquire) {
            return Poll::Ready(());
        }
        this.inner.waker.register(cx.waker());
        if !this.started {
            this.started = true;
            let inner = Arc::clone(&this.inner);
            let duration = this.duration;
            thread::spawn(move || {
                if !duration.is_zero() {
                    thread::sleep(duration);
                }
                inner.done.store(true, Ordering::Release);
                inner.waker.wake();
            });
        }
        if this.inner.done.load(Ordering::Acquire) {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

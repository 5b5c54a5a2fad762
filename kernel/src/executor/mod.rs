//! Waiting on hardware and network events with deadlines.
//!
//! Driver code is written as futures: a DNS lookup awaits the arrival of a
//! datagram, a TCP connect awaits a segment on its flow. Whoever feeds inbound
//! frames into the stack notifies the `WakerRegistry`, which wakes exactly the
//! futures waiting on that event. `block_on` drives a single future to
//! completion, halting the CPU whenever nothing it waits on has happened yet.

use core::{
    future::Future,
    pin::{pin, Pin},
    sync::atomic::{AtomicBool, Ordering},
    task::{Context, Poll, Waker},
};

use alloc::{boxed::Box, collections::BTreeMap, sync::Arc, task::Wake, vec::Vec};
use spin::RwLock;

use crate::time::{Clock, Deadline};

/// Number of polls a `Timeout` tolerates without the clock moving before it
/// assumes the tick source is broken and gives up anyway
pub const STALLED_CLOCK_POLL_LIMIT: u32 = 10_000_000;

#[derive(Clone)]
pub struct WakerRegistry<E: Ord + Copy + Sized + Unpin> {
    wakers: Arc<RwLock<BTreeMap<E, Vec<Waker>>>>,
}

impl<E: Ord + Copy + Sized + Unpin> WakerRegistry<E> {
    pub fn new() -> Self {
        Self {
            wakers: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    pub fn register(&self, event: E, waker: &Waker) {
        let mut wakers = self.wakers.write();
        let waiting = wakers.entry(event).or_insert_with(Vec::new);
        if !waiting.iter().any(|w| w.will_wake(waker)) {
            waiting.push(waker.clone());
        }
    }

    /// Remove a waker parked on `event`, dropping the entry once nothing
    /// else waits on it
    pub fn unregister(&self, event: &E, waker: &Waker) {
        let mut wakers = self.wakers.write();
        if let Some(waiting) = wakers.get_mut(event) {
            waiting.retain(|w| !w.will_wake(waker));
            if waiting.is_empty() {
                wakers.remove(event);
            }
        }
    }

    pub fn notify_event(&self, event: &E) {
        let woken = self.wakers.write().remove(event);
        if let Some(wakers) = woken {
            for waker in wakers {
                waker.wake();
            }
        }
    }

    pub fn waiting_count(&self, event: &E) -> usize {
        self.wakers.read().get(event).map_or(0, |w| w.len())
    }

    /// Number of distinct events that have at least one waker parked
    pub fn pending_events(&self) -> usize {
        self.wakers.read().len()
    }
}

impl<E: Ord + Copy + Sized + Unpin> Default for WakerRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// WaitForEvent is a Future that waits on a generic event condition.
/// Each poll runs `check`; if it has no answer yet, the future parks itself
/// on `event` until the registry is notified. Dropping it unparks it, so a
/// wait abandoned by a timeout does not linger in the registry.
pub struct WaitForEvent<E: Ord + Copy + Sized + Unpin, F> {
    event: E,
    waker_registry: WakerRegistry<E>,
    check: F,
    parked: Option<Waker>,
}

impl<E: Ord + Copy + Sized + Unpin, F> WaitForEvent<E, F> {
    pub fn new(event: E, waker_registry: WakerRegistry<E>, check: F) -> Self {
        Self {
            event,
            waker_registry,
            check,
            parked: None,
        }
    }
}

impl<E: Ord + Copy + Sized + Unpin, F> Drop for WaitForEvent<E, F> {
    fn drop(&mut self) {
        if let Some(waker) = self.parked.take() {
            self.waker_registry.unregister(&self.event, &waker);
        }
    }
}

impl<E: Ord + Copy + Sized + Unpin, T, F: FnMut() -> Option<T> + Unpin> Future
    for WaitForEvent<E, F>
{
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Some(value) = (this.check)() {
            return Poll::Ready(value);
        }
        this.waker_registry.register(this.event, cx.waker());
        this.parked = Some(cx.waker().clone());
        Poll::Pending
    }
}

/// Error returned when a `Timeout` deadline passes first
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Elapsed;

/// Resolves with the inner future's output, or `Elapsed` once the deadline
/// has passed
pub struct Timeout<F: Future> {
    inner: Pin<Box<F>>,
    clock: Arc<dyn Clock>,
    deadline: Deadline,
    last_seen_ms: u64,
    stalled_polls: u32,
}

impl<F: Future> Future for Timeout<F> {
    type Output = Result<F::Output, Elapsed>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Poll::Ready(value) = this.inner.as_mut().poll(cx) {
            return Poll::Ready(Ok(value));
        }
        let now = this.clock.now_ms();
        if now >= this.deadline.as_ms() {
            return Poll::Ready(Err(Elapsed));
        }
        if now == this.last_seen_ms {
            this.stalled_polls += 1;
            if this.stalled_polls >= STALLED_CLOCK_POLL_LIMIT {
                return Poll::Ready(Err(Elapsed));
            }
        } else {
            this.last_seen_ms = now;
            this.stalled_polls = 0;
        }
        Poll::Pending
    }
}

pub fn timeout<F: Future>(clock: Arc<dyn Clock>, duration_ms: u64, future: F) -> Timeout<F> {
    let deadline = Deadline::after(&*clock, duration_ms);
    timeout_at(clock, deadline, future)
}

pub fn timeout_at<F: Future>(clock: Arc<dyn Clock>, deadline: Deadline, future: F) -> Timeout<F> {
    let last_seen_ms = clock.now_ms();
    Timeout {
        inner: Box::pin(future),
        clock,
        deadline,
        last_seen_ms,
        stalled_polls: 0,
    }
}

/// Completes once the clock reaches the deadline
pub struct Sleep {
    clock: Arc<dyn Clock>,
    deadline: Deadline,
}

impl Future for Sleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.deadline.has_passed(&*self.clock) {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

pub fn sleep(clock: Arc<dyn Clock>, duration_ms: u64) -> Sleep {
    let deadline = Deadline::after(&*clock, duration_ms);
    Sleep { clock, deadline }
}

struct WakeSignal(AtomicBool);

impl Wake for WakeSignal {
    fn wake(self: Arc<Self>) {
        self.0.store(true, Ordering::SeqCst);
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Run a future to completion on the current CPU.
///
/// `pump` moves pending hardware input into the system (for the network this
/// drains the NIC receive queues) and may wake the future. If nothing woke it,
/// the CPU waits for the next interrupt before looking again; time-based
/// futures are re-polled after every interrupt.
pub fn block_on<F: Future>(clock: &dyn Clock, mut pump: impl FnMut(), future: F) -> F::Output {
    let signal = Arc::new(WakeSignal(AtomicBool::new(false)));
    let waker = Waker::from(signal.clone());
    let mut context = Context::from_waker(&waker);
    let mut future = pin!(future);

    loop {
        if let Poll::Ready(value) = future.as_mut().poll(&mut context) {
            return value;
        }
        pump();
        if !signal.0.swap(false, Ordering::SeqCst) {
            clock.wait_for_interrupt();
            pump();
            signal.0.store(false, Ordering::SeqCst);
        }
    }
}

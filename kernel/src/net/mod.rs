//! The net stack handles all IP traffic for the kernel's network commands,
//! as well as services like ARP, DHCP and DNS.
//!
//! All protocol state lives in a `NetStack`, shared as a `NetHandle`. Frames
//! are pulled from the device drivers whenever the stack is polled; depending
//! on the type of packet, it is routed to one of the subsystems. ARP packets
//! update the ARP cache, UDP datagrams are queued on their bound port, and
//! TCP segments go to the flow talking to the sender.
//!
//! Outgoing packets don't go through the receive path, but they may have to
//! wait on information that must be received first: a packet cannot leave
//! until the MAC of its next hop is known. Operations that need to wait are
//! written as futures over `NetEvent`s and driven to completion with `run`,
//! which keeps polling the stack while the future is pending.

pub mod arp;
pub mod device;
pub mod dhcp;
pub mod dns;
pub mod error;
pub mod hardware;
pub mod http;
pub mod ping;
pub mod protocol;
pub mod stack;
pub mod tcp;
pub mod tls;

use core::future::Future;

use crate::executor::{block_on, timeout_at, WaitForEvent};
use crate::time::Deadline;

use self::error::NetError;
use self::protocol::ipv4::Ipv4Address;
use self::stack::{NetEvent, NetStack};

pub use self::stack::NetHandle;

/// How long to wait for an ARP reply before asking again
pub const ARP_RETRY_INTERVAL_MS: u64 = 100;

/// Drive a network future to completion, polling the stack in between
pub fn run<F: Future>(net: &NetHandle, future: F) -> F::Output {
    let clock = net.lock().clock();
    block_on(
        &*clock,
        || {
            net.lock().poll();
        },
        future,
    )
}

/// Wait for `event`, resolving once `check` produces a value. `check` runs
/// with the stack locked, every time the event fires.
pub fn wait_for<T>(
    net: &NetHandle,
    event: NetEvent,
    mut check: impl FnMut(&mut NetStack) -> Option<T> + Unpin,
) -> impl Future<Output = T> + Unpin {
    let wakers = net.lock().wakers();
    let net = net.clone();
    WaitForEvent::new(event, wakers, move || check(&mut net.lock()))
}

/// Keep attempting `send` until it gets past ARP resolution. After each
/// miss, wait for the next hop toward `dest` to show up in the ARP cache,
/// asking again every `ARP_RETRY_INTERVAL_MS`. Fails with `TimedOut` once
/// `deadline` passes.
pub async fn send_resolving(
    net: &NetHandle,
    dest: Ipv4Address,
    deadline: Deadline,
    mut send: impl FnMut(&mut NetStack) -> Result<(), NetError>,
) -> Result<(), NetError> {
    let clock = net.lock().clock();
    loop {
        let hop = {
            let mut stack = net.lock();
            match send(&mut stack) {
                Err(NetError::ArpMiss) => stack.next_hop(dest)?,
                result => return result,
            }
        };
        if deadline.has_passed(&*clock) {
            return Err(NetError::TimedOut);
        }
        let retry = Deadline::after(&*clock, ARP_RETRY_INTERVAL_MS).min(deadline);
        let resolved = wait_for(net, NetEvent::ArpResolved(hop), move |stack| {
            stack.arp_cache().lookup(hop).map(|_| ())
        });
        // an elapsed wait just means the request goes out again
        let _ = timeout_at(clock.clone(), retry, resolved).await;
    }
}

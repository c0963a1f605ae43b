// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The proxy subsystem: pattern entries this host answers resolution
//! requests on behalf of, plus the delayed-reply queue that spreads those
//! answers out in time to avoid reply storms.

use std::collections::HashSet;
use std::collections::VecDeque;
use std::fmt::Debug;
use std::hash::Hash;

use rand::Rng as _;
use tracing::trace;

use crate::context::{InstantBindingsTypes, InstantContext as _, RngContext as _, TimerContext as _};
use crate::error::NotFoundError;
use crate::link::LinkDevice;
use crate::time::Instant;

use super::{
    NeighborBindingsContext, NeighborContext, NeighborProtocol, NeighborTable, TableTimerId,
};

/// A deferred inbound solicitation waiting for its randomized reply delay
/// to elapse.
#[derive(Debug)]
struct PendingProxy<R, DeviceId, T> {
    due: T,
    device: DeviceId,
    request: R,
}

/// Proxy state: the pattern table and the deferred-reply queue, sharing a
/// single table-wide timer.
pub(super) struct ProxyState<A, R, DeviceId, T> {
    /// Entries keyed by protocol address, either bound to one interface or
    /// wildcarded over all of them.
    entries: HashSet<(A, Option<DeviceId>)>,
    queue: VecDeque<PendingProxy<R, DeviceId, T>>,
}

impl<A, R, DeviceId, T> Default for ProxyState<A, R, DeviceId, T> {
    fn default() -> Self {
        Self { entries: HashSet::new(), queue: VecDeque::new() }
    }
}

impl<P, D, DeviceId, T> NeighborTable<P, D, DeviceId, T>
where
    P: NeighborProtocol<D>,
    D: LinkDevice,
    DeviceId: Clone + Eq + Hash + Debug + Send + Sync + 'static,
    T: Instant,
{
    /// Installs a proxy entry for `addr`, bound to `device` or wildcarded
    /// over all interfaces when `device` is `None`.
    pub fn proxy_insert(&self, addr: P::Addr, device: Option<DeviceId>) {
        let mut proxy = self.proxy.lock();
        let _: bool = proxy.entries.insert((addr, device));
    }

    /// Removes a proxy entry.
    pub fn proxy_remove(
        &self,
        addr: P::Addr,
        device: Option<DeviceId>,
    ) -> Result<(), NotFoundError> {
        let mut proxy = self.proxy.lock();
        proxy.entries.remove(&(addr, device)).then_some(()).ok_or(NotFoundError)
    }

    /// Whether a resolution request targeting `addr` on `device` should be
    /// answered on behalf of someone else.
    pub fn proxy_lookup(&self, addr: &P::Addr, device: &DeviceId) -> bool {
        let proxy = self.proxy.lock();
        proxy.entries.contains(&(*addr, Some(device.clone())))
            || proxy.entries.contains(&(*addr, None))
    }

    /// The number of requests currently deferred on the proxy queue.
    pub fn proxy_queue_len(&self) -> usize {
        self.proxy.lock().queue.len()
    }

    /// Defers a reply to `request` by a randomized delay bounded by the
    /// interface's `proxy_delay`, arming the shared proxy timer to the
    /// nearest pending deadline.
    ///
    /// Drops the request (counting it) if the proxy queue is full.
    pub fn proxy_enqueue<BC>(&self, bindings_ctx: &mut BC, device: DeviceId, request: P::ProxyRequest)
    where
        BC: NeighborBindingsContext<P, D, DeviceId> + InstantBindingsTypes<Instant = T>,
    {
        let parms = self.device_parameters(&device).get();
        let now = bindings_ctx.now();
        let delay_millis = u64::try_from(parms.proxy_delay.as_millis()).unwrap_or(u64::MAX);
        let jitter = if delay_millis == 0 {
            std::time::Duration::ZERO
        } else {
            std::time::Duration::from_millis(bindings_ctx.rng().gen_range(0..delay_millis))
        };
        let due = now.add(jitter);

        let mut proxy = self.proxy.lock();
        if proxy.queue.len() >= parms.proxy_qlen {
            self.counters().proxy_discards.increment();
            trace!("proxy queue full, dropping deferred request on {device:?}");
            return;
        }
        // Keep the timer aimed at the earliest deadline in the queue.
        match bindings_ctx.scheduled_instant(TableTimerId::ProxyQueue) {
            Some(scheduled) if scheduled <= due => {}
            _ => {
                let _: Option<T> =
                    bindings_ctx.schedule_timer_instant(due, TableTimerId::ProxyQueue);
            }
        }
        proxy.queue.push_back(PendingProxy { due, device, request });
    }

    /// The proxy timer callback: re-dispatches every request whose delay
    /// has elapsed and rearms the timer for the next pending one.
    pub(super) fn proxy_process<CC, BC>(&self, core_ctx: &mut CC, bindings_ctx: &mut BC)
    where
        CC: NeighborContext<P, D, BC, DeviceId = DeviceId>,
        BC: NeighborBindingsContext<P, D, DeviceId> + InstantBindingsTypes<Instant = T>,
    {
        let now = bindings_ctx.now();
        let mut due = Vec::new();
        let mut next: Option<T> = None;
        {
            let mut proxy = self.proxy.lock();
            let queue = std::mem::take(&mut proxy.queue);
            for pending in queue {
                if pending.due <= now {
                    due.push(pending);
                } else {
                    next = Some(match next {
                        Some(t) if t <= pending.due => t,
                        _ => pending.due,
                    });
                    proxy.queue.push_back(pending);
                }
            }
        }
        for PendingProxy { due: _, device, request } in due {
            core_ctx.proxy_redo(bindings_ctx, &device, request);
        }
        if let Some(next) = next {
            let _: Option<T> =
                bindings_ctx.schedule_timer_instant(next, TableTimerId::ProxyQueue);
        }
    }

    /// Removes proxy entries bound to `device` and drops its deferred
    /// requests. Wildcard entries are untouched.
    pub(super) fn proxy_flush_device<BC>(&self, bindings_ctx: &mut BC, device: &DeviceId)
    where
        BC: NeighborBindingsContext<P, D, DeviceId> + InstantBindingsTypes<Instant = T>,
    {
        let mut proxy = self.proxy.lock();
        proxy.entries.retain(|(_, d)| d.as_ref() != Some(device));
        proxy.queue.retain(|p| p.device != *device);
        if proxy.queue.is_empty() {
            let _: Option<T> = bindings_ctx.cancel_timer(TableTimerId::ProxyQueue);
        }
    }
}

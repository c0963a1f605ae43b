// Copyright 2023 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The neighbour cache: a generic mapping from next-hop network-layer
//! addresses to link-layer addresses, with per-entry reachability state
//! driven by Neighbour Unreachability Detection (NUD).
//!
//! A [`NeighborTable`] exists per resolution protocol and holds entries
//! keyed by (protocol address, interface). Each entry walks the NUD state
//! machine: resolution is initiated lazily when traffic needs a mapping,
//! confirmed bindings age from reachable to stale, and suspect bindings are
//! re-probed before being declared failed. Outbound frames that arrive
//! before resolution completes wait on a small per-entry queue.
//!
//! Entries are reference counted: the table holds the owning reference and
//! shares the entry with callers (typically a cached route). Collection of
//! an entry requires that nothing outside the table refers to it.

pub mod api;
pub mod proxy;

use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::fmt::{Debug, Display};
use std::hash::{Hash, Hasher as _};
use std::time::Duration;

use derivative::Derivative;
use neighcache_sync::rc::{Primary, Strong};
use neighcache_sync::{Mutex, RwLock, SeqLock};
use rand::Rng as _;
use tracing::{debug, trace, warn};

use crate::context::{
    EventContext as _, InstantBindingsTypes, InstantContext as _, RngContext, TimerContext,
};
use crate::counters::NeighborCounters;
use crate::device::{DeviceContext, Frame, HeaderTemplate};
use crate::error::{CreateError, NotFoundError, UpdateError};
use crate::link::LinkDevice;
use crate::time::{Instant, NonZeroDuration};

use self::proxy::ProxyState;

/// Initial size of a table's bucket array. Must be a power of two.
const INITIAL_BUCKET_COUNT: usize = 8;

/// Minimum interval between synchronous forced shrinks of a table.
const FORCED_GC_INTERVAL: Duration = Duration::from_secs(5);

/// Interval at which `reachable_time` is resampled for every parameter set
/// attached to a table.
const REACHABLE_TIME_RESAMPLE_INTERVAL: Duration = Duration::from_secs(300);

/// Delay before the first solicitation after entering `Incomplete`.
///
/// Kept short so resolution starts almost immediately, but non-zero so the
/// frame that triggered resolution is queued before the probe goes out.
const FIRST_PROBE_DELAY: Duration = Duration::from_millis(10);

/// Unwraps an [`Option`] in a `const` context, panicking on `None`.
const fn const_unwrap_option<T: Copy>(opt: Option<T>) -> T {
    match opt {
        Some(value) => value,
        None => panic!("called `const_unwrap_option` on a `None` value"),
    }
}

const DEFAULT_BASE_REACHABLE_TIME: NonZeroDuration =
    const_unwrap_option(NonZeroDuration::from_secs(30));
const DEFAULT_RETRANS_TIME: NonZeroDuration =
    const_unwrap_option(NonZeroDuration::from_secs(1));
const DEFAULT_GC_STALETIME: NonZeroDuration =
    const_unwrap_option(NonZeroDuration::from_secs(60));
const DEFAULT_DELAY_PROBE_TIME: NonZeroDuration =
    const_unwrap_option(NonZeroDuration::from_secs(5));
const DEFAULT_QUEUE_LEN: usize = 3;
const DEFAULT_UCAST_PROBES: u16 = 3;
const DEFAULT_MCAST_PROBES: u16 = 3;
const DEFAULT_APP_PROBES: u16 = 0;
const DEFAULT_PROXY_DELAY: Duration = Duration::from_millis(800);
const DEFAULT_PROXY_QLEN: usize = 64;
const DEFAULT_LOCKTIME: Duration = Duration::from_secs(1);

const DEFAULT_GC_THRESH1: usize = 128;
const DEFAULT_GC_THRESH2: usize = 512;
const DEFAULT_GC_THRESH3: usize = 1024;

/// The reachability state of a neighbour entry.
///
/// States are grouped into three derived sets:
///  * IN_TIMER (`Incomplete`, `Reachable`, `Delay`, `Probe`): a timer is
///    scheduled against the entry.
///  * VALID (`Permanent`, `Noarp`, `Reachable`, `Stale`, `Delay`, `Probe`):
///    a usable link-layer binding is installed.
///  * CONNECTED (`Permanent`, `Noarp`, `Reachable`): transmission may take
///    the fast path without further reachability checks.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum NeighborState {
    /// Freshly created; no resolution attempted yet.
    None,
    /// Resolution is in progress: probes are being sent and no confirmed
    /// link-layer address is known. Outbound frames queue on the entry.
    Incomplete,
    /// Reachability was confirmed within the last `reachable_time`.
    Reachable,
    /// The binding is still installed but reachability evidence has grown
    /// old. Nothing happens until the entry is used again.
    Stale,
    /// A frame was recently sent through a stale binding; upper layers are
    /// given `delay_probe_time` to produce a confirmation before probing.
    Delay,
    /// Unicast probes are being sent to re-verify the cached binding.
    Probe,
    /// The probe budget was exhausted without a reply.
    Failed,
    /// Administratively installed; never expires and never re-probes.
    Permanent,
    /// The interface or destination does not participate in resolution; the
    /// binding was fabricated at creation.
    Noarp,
}

impl NeighborState {
    /// True for states with a timer scheduled against the entry.
    pub fn in_timer(self) -> bool {
        matches!(
            self,
            NeighborState::Incomplete
                | NeighborState::Reachable
                | NeighborState::Delay
                | NeighborState::Probe
        )
    }

    /// True for states carrying a usable link-layer binding.
    pub fn is_valid(self) -> bool {
        matches!(
            self,
            NeighborState::Permanent
                | NeighborState::Noarp
                | NeighborState::Reachable
                | NeighborState::Stale
                | NeighborState::Delay
                | NeighborState::Probe
        )
    }

    /// True for states whose entries may transmit immediately.
    pub fn is_connected(self) -> bool {
        matches!(
            self,
            NeighborState::Permanent | NeighborState::Noarp | NeighborState::Reachable
        )
    }
}

/// Tunable timing and sizing knobs, attached per-(table, interface).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct NeighborParameters {
    /// Mean of the reachable timeout.
    pub base_reachable_time: NonZeroDuration,
    /// Current randomized reachable timeout, resampled periodically from
    /// [½·base, 3⁄2·base].
    pub reachable_time: NonZeroDuration,
    /// Delay between successive solicitations.
    pub retrans_time: NonZeroDuration,
    /// Idle time after which an unused entry is collectable.
    pub gc_staletime: NonZeroDuration,
    /// Time in `Delay` before promoting to `Probe`; also the idle threshold
    /// for `Reachable` → `Delay` on use.
    pub delay_probe_time: NonZeroDuration,
    /// Per-entry pending-frame queue cap.
    pub queue_len: usize,
    /// Probe budget for unicast solicitation.
    pub ucast_probes: u16,
    /// Probe budget for broadcast solicitation.
    pub mcast_probes: u16,
    /// Probe budget for userspace-assisted solicitation.
    pub app_probes: u16,
    /// Upper bound of the randomized response delay for proxy replies.
    pub proxy_delay: Duration,
    /// Proxy queue cap.
    pub proxy_qlen: usize,
    /// Minimum time a learned link-layer binding is locked against cheap
    /// override.
    pub locktime: Duration,
}

impl Default for NeighborParameters {
    fn default() -> NeighborParameters {
        NeighborParameters {
            base_reachable_time: DEFAULT_BASE_REACHABLE_TIME,
            reachable_time: DEFAULT_BASE_REACHABLE_TIME,
            retrans_time: DEFAULT_RETRANS_TIME,
            gc_staletime: DEFAULT_GC_STALETIME,
            delay_probe_time: DEFAULT_DELAY_PROBE_TIME,
            queue_len: DEFAULT_QUEUE_LEN,
            ucast_probes: DEFAULT_UCAST_PROBES,
            mcast_probes: DEFAULT_MCAST_PROBES,
            app_probes: DEFAULT_APP_PROBES,
            proxy_delay: DEFAULT_PROXY_DELAY,
            proxy_qlen: DEFAULT_PROXY_QLEN,
            locktime: DEFAULT_LOCKTIME,
        }
    }
}

/// An update structure for [`NeighborParameters`].
///
/// Only fields with variant `Some` are updated.
#[derive(Clone, Debug, Eq, PartialEq, Default)]
pub struct NeighborParametersUpdate {
    /// New mean of the reachable timeout.
    pub base_reachable_time: Option<NonZeroDuration>,
    /// New delay between successive solicitations.
    pub retrans_time: Option<NonZeroDuration>,
    /// New collectable-idle threshold.
    pub gc_staletime: Option<NonZeroDuration>,
    /// New delay-before-probe threshold.
    pub delay_probe_time: Option<NonZeroDuration>,
    /// New per-entry queue cap.
    pub queue_len: Option<usize>,
    /// New unicast probe budget.
    pub ucast_probes: Option<u16>,
    /// New broadcast probe budget.
    pub mcast_probes: Option<u16>,
    /// New userspace probe budget.
    pub app_probes: Option<u16>,
    /// New proxy reply delay bound.
    pub proxy_delay: Option<Duration>,
    /// New proxy queue cap.
    pub proxy_qlen: Option<usize>,
    /// New anti-flap lock interval.
    pub locktime: Option<Duration>,
}

impl NeighborParametersUpdate {
    /// Applies the set fields to `params`, returning the previous values of
    /// exactly the fields that were applied.
    pub fn apply_and_take_previous(mut self, params: &mut NeighborParameters) -> Self {
        fn swap_if_set<T>(opt: &mut Option<T>, target: &mut T) {
            if let Some(opt) = opt.as_mut() {
                std::mem::swap(opt, target)
            }
        }
        let Self {
            base_reachable_time,
            retrans_time,
            gc_staletime,
            delay_probe_time,
            queue_len,
            ucast_probes,
            mcast_probes,
            app_probes,
            proxy_delay,
            proxy_qlen,
            locktime,
        } = &mut self;
        swap_if_set(base_reachable_time, &mut params.base_reachable_time);
        swap_if_set(retrans_time, &mut params.retrans_time);
        swap_if_set(gc_staletime, &mut params.gc_staletime);
        swap_if_set(delay_probe_time, &mut params.delay_probe_time);
        swap_if_set(queue_len, &mut params.queue_len);
        swap_if_set(ucast_probes, &mut params.ucast_probes);
        swap_if_set(mcast_probes, &mut params.mcast_probes);
        swap_if_set(app_probes, &mut params.app_probes);
        swap_if_set(proxy_delay, &mut params.proxy_delay);
        swap_if_set(proxy_qlen, &mut params.proxy_qlen);
        swap_if_set(locktime, &mut params.locktime);
        self
    }
}

/// A shared, refcounted parameter set.
///
/// The table owns one default set plus one per interface; entries hold
/// shared references to the set of their interface. Marking the owning
/// reference for destruction prevents further entry creation against the
/// set without invalidating the entries already holding it.
#[derive(Debug)]
pub struct ParameterSet {
    values: Mutex<NeighborParameters>,
}

impl ParameterSet {
    fn new(values: NeighborParameters) -> ParameterSet {
        ParameterSet { values: Mutex::new(values) }
    }

    /// Returns a copy of the current values.
    pub fn get(&self) -> NeighborParameters {
        *self.values.lock()
    }
}

/// A shared reference to a parameter set.
pub type ParametersRef = Strong<ParameterSet>;

/// Returns a reachable timeout drawn uniformly from [½·base, 3⁄2·base).
fn rand_reachable_time<R: rand::RngCore>(rng: &mut R, base: NonZeroDuration) -> NonZeroDuration {
    let base_millis = u64::try_from(base.get().as_millis()).unwrap_or(u64::MAX).max(1);
    let millis = rng.gen_range(0..base_millis) + base_millis / 2;
    NonZeroDuration::new(Duration::from_millis(millis.max(1)))
        .unwrap_or(DEFAULT_BASE_REACHABLE_TIME)
}

/// Thresholds and policy knobs that apply to a whole table.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TableConfig {
    /// Below this entry count the table is never shrunk.
    pub gc_thresh1: usize,
    /// Above this entry count, creation runs the forced shrink if one has
    /// not run in the last few seconds.
    pub gc_thresh2: usize,
    /// Hard cap: creation fails if the forced shrink cannot get the table
    /// below this count.
    pub gc_thresh3: usize,
    /// Whether an unsolicited resolution reply may create an entry.
    pub accept_unsolicited: bool,
}

impl Default for TableConfig {
    fn default() -> TableConfig {
        TableConfig {
            gc_thresh1: DEFAULT_GC_THRESH1,
            gc_thresh2: DEFAULT_GC_THRESH2,
            gc_thresh3: DEFAULT_GC_THRESH3,
            accept_unsolicited: false,
        }
    }
}

/// Address-family tag used to locate a table in a registry.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct AddressFamily(pub u16);

impl AddressFamily {
    /// IPv4.
    pub const INET: AddressFamily = AddressFamily(2);
}

/// The state of a neighbour entry as published via events.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct EventState<L> {
    /// The NUD state of the entry.
    pub state: NeighborState,
    /// The link-layer binding, if installed.
    pub link_addr: Option<L>,
}

/// Neighbour event kind.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum EventKind<L> {
    /// A neighbour entry was added.
    Added(EventState<L>),
    /// A neighbour entry has changed.
    Changed(EventState<L>),
    /// A neighbour entry was removed.
    Removed,
}

/// Neighbour event.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Event<L, A, DeviceId, T> {
    /// The interface.
    pub device: DeviceId,
    /// The neighbour's protocol address.
    pub addr: A,
    /// The kind of this event.
    pub kind: EventKind<L>,
    /// Time of this event.
    pub at: T,
}

impl<L, A, DeviceId: Clone, T> Event<L, A, DeviceId, T> {
    fn added(device: &DeviceId, state: EventState<L>, addr: A, at: T) -> Self {
        Self { device: device.clone(), kind: EventKind::Added(state), addr, at }
    }

    fn changed(device: &DeviceId, state: EventState<L>, addr: A, at: T) -> Self {
        Self { device: device.clone(), kind: EventKind::Changed(state), addr, at }
    }

    fn removed(device: &DeviceId, addr: A, at: T) -> Self {
        Self { device: device.clone(), kind: EventKind::Removed, addr, at }
    }
}

/// The identifier for a table's timer events.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum TableTimerId<A, DeviceId> {
    /// The per-entry NUD timer. There is at most one per entry; the handler
    /// decides what to do from the entry's current state.
    Neighbor {
        /// The entry's interface.
        device: DeviceId,
        /// The entry's protocol address.
        addr: A,
    },
    /// The periodic garbage-collection sweep.
    PeriodicGc,
    /// The shared proxy-queue timer.
    ProxyQueue,
}

/// The four output variants a protocol constructor may select for an entry,
/// based on interface properties.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum OutputVariant {
    /// The interface cannot do address resolution at all; output bypasses
    /// resolution and link addressing.
    Direct,
    /// No hardware-header caching: the header is built on each transmit.
    Generic,
    /// The driver exposes header templating; after the first resolve the
    /// fast path prepends a cached header.
    HeaderCache,
    /// Legacy drivers that require the header rebuilt on every transmit.
    Compat,
}

/// How the entry's output function is currently aimed.
///
/// Repointed when the entry moves into or out of a CONNECTED state, and to
/// [`OutputMode::Blackhole`] when the interface goes down.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum OutputMode {
    /// Fast path: transmit immediately using the installed binding.
    Connected,
    /// Slow path: every transmit re-checks resolution state.
    Resolving,
    /// The interface is gone; drop all frames.
    Blackhole,
}

/// Initial binding and output variant chosen by a protocol constructor.
#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub struct EntryInit<D: LinkDevice> {
    /// A fabricated link-layer binding, for targets that do not resolve
    /// (broadcast, multicast, loopback, point-to-point).
    pub binding: Option<D::Address>,
    /// Pin the entry to `Noarp` so it never resolves.
    pub pinned_noarp: bool,
    /// The output variant to dispatch through.
    pub variant: OutputVariant,
}

/// A resolution protocol: the per-protocol hooks consulted by the generic
/// cache.
///
/// The set of protocols is closed and known at compile time, so dispatch is
/// by type parameter rather than by trait object.
pub trait NeighborProtocol<D: LinkDevice>: 'static + Sized {
    /// The protocol (network-layer) address type. Together with the
    /// interface it forms an entry's identity.
    type Addr: Copy + Clone + Debug + Display + Eq + Hash + PartialEq + Send + Sync + 'static;

    /// A parsed inbound solicitation, held on the proxy queue for deferred
    /// re-dispatch.
    type ProxyRequest: Debug + Clone + Send;

    /// Address-family tag for registry lookup.
    const FAMILY: AddressFamily;

    /// The protocol constructor: chooses the entry's initial binding and
    /// output variant from the target address and interface properties. May
    /// short-circuit the entry to `Noarp` with a fabricated binding.
    fn construct<CC: DeviceContext<D>>(
        core_ctx: &CC,
        device: &CC::DeviceId,
        addr: Self::Addr,
    ) -> EntryInit<D>;

    /// Whether `addr` is acceptable as a neighbour key (e.g. not loopback
    /// or multicast).
    fn is_valid_neighbor_addr(addr: &Self::Addr) -> bool {
        let _ = addr;
        true
    }
}

/// The execution context for a neighbour table.
///
/// Extends the interface adapter with the protocol-flavored hooks the table
/// drives: emitting solicitations, reporting unreachability to the upper
/// layer, and re-dispatching deferred proxy requests.
pub trait NeighborContext<P: NeighborProtocol<D>, D: LinkDevice, BC>: DeviceContext<D> {
    /// Crafts and emits a solicitation for `target` on `device`.
    ///
    /// If `remote_link_addr` is provided, the solicitation is unicast to
    /// that address; otherwise it is broadcast.
    fn send_solicitation(
        &mut self,
        bindings_ctx: &mut BC,
        device: &Self::DeviceId,
        target: P::Addr,
        remote_link_addr: Option<D::Address>,
    );

    /// Notifies the upper layer that `frame` could not be delivered because
    /// its next hop is unreachable.
    fn report_unreachable(&mut self, bindings_ctx: &mut BC, device: &Self::DeviceId, frame: Frame);

    /// Re-dispatches a proxy request whose deferred reply delay has
    /// elapsed.
    fn proxy_redo(&mut self, bindings_ctx: &mut BC, device: &Self::DeviceId, request: P::ProxyRequest);
}

/// The bindings context for a neighbour table.
pub trait NeighborBindingsContext<P: NeighborProtocol<D>, D: LinkDevice, DeviceId>:
    TimerContext<TableTimerId<P::Addr, DeviceId>>
    + RngContext
    + EventContext<Event<D::Address, P::Addr, DeviceId, <Self as InstantBindingsTypes>::Instant>>
{
}

impl<P, D, DeviceId, BC> NeighborBindingsContext<P, D, DeviceId> for BC
where
    P: NeighborProtocol<D>,
    D: LinkDevice,
    BC: TimerContext<TableTimerId<P::Addr, DeviceId>>
        + RngContext
        + EventContext<
            Event<D::Address, P::Addr, DeviceId, <BC as InstantBindingsTypes>::Instant>,
        >,
{
}

/// The outcome of handing a frame to [`NeighborTable::resolve_and_send`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TransmitDisposition {
    /// The frame was handed to the interface.
    Sent,
    /// The frame is queued pending resolution.
    Queued,
    /// The frame was dropped; if the next hop is unreachable the upper
    /// layer was notified through the error-report hook.
    Failed,
}

/// The mutable state of a neighbour entry, guarded by the per-entry lock.
#[derive(Derivative)]
#[derivative(Debug(bound = "T: Debug"))]
struct EntryInner<D: LinkDevice, T> {
    state: NeighborState,
    link_addr: Option<D::Address>,
    /// Last time reachability evidence for the binding arrived.
    confirmed: T,
    /// Last time a transmit went through the entry.
    used: T,
    /// Last state or binding change.
    updated: T,
    /// Solicitations sent in the current resolution attempt.
    probes: u16,
    dead: bool,
    output: OutputMode,
    pending: VecDeque<Frame>,
}

/// One L3-address → L2-address binding with its reachability state, timers
/// and pending-frame queue.
pub struct NeighborEntry<P: NeighborProtocol<D>, D: LinkDevice, DeviceId, T> {
    addr: P::Addr,
    device: DeviceId,
    parms: ParametersRef,
    variant: OutputVariant,
    /// Cached outbound header template for the fast path. Readers copy it
    /// through the sequence lock; writers serialize on the entry lock.
    cached_header: SeqLock<Option<HeaderTemplate>>,
    inner: Mutex<EntryInner<D, T>>,
}

impl<P: NeighborProtocol<D>, D: LinkDevice, DeviceId: Debug, T: Instant> Debug
    for NeighborEntry<P, D, DeviceId, T>
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Self { addr, device, parms: _, variant, cached_header: _, inner } = self;
        f.debug_struct("NeighborEntry")
            .field("addr", addr)
            .field("device", device)
            .field("variant", variant)
            .field("inner", &*inner.lock())
            .finish()
    }
}

impl<P: NeighborProtocol<D>, D: LinkDevice, DeviceId, T: Instant> NeighborEntry<P, D, DeviceId, T> {
    /// The entry's protocol address.
    pub fn addr(&self) -> P::Addr {
        self.addr
    }

    /// The entry's interface.
    pub fn device(&self) -> &DeviceId {
        &self.device
    }

    /// The entry's output variant.
    pub fn variant(&self) -> OutputVariant {
        self.variant
    }

    /// The parameter set the entry was created against.
    pub fn parameters(&self) -> &ParametersRef {
        &self.parms
    }

    /// Returns the entry's current NUD state.
    pub fn state(&self) -> NeighborState {
        self.inner.lock().state
    }

    /// Returns the entry's link-layer binding, if installed.
    pub fn link_addr(&self) -> Option<D::Address> {
        self.inner.lock().link_addr
    }

    /// Returns the number of frames queued awaiting resolution.
    pub fn queue_len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Returns the cached header template, if one was built.
    pub fn cached_header(&self) -> Option<HeaderTemplate> {
        self.cached_header.read()
    }

    /// Returns the time reachability evidence last arrived.
    pub fn confirmed_at(&self) -> T {
        self.inner.lock().confirmed
    }

    /// Returns the time of the last transmit attempt.
    pub fn used_at(&self) -> T {
        self.inner.lock().used
    }

    /// Returns the time of the last state or binding change.
    pub fn updated_at(&self) -> T {
        self.inner.lock().updated
    }

    fn event_state(inner: &EntryInner<D, T>) -> EventState<D::Address> {
        EventState { state: inner.state, link_addr: inner.link_addr }
    }
}

/// A shared reference to a neighbour entry.
pub type NeighborRef<P, D, DeviceId, T> = Strong<NeighborEntry<P, D, DeviceId, T>>;

struct TableState<P: NeighborProtocol<D>, D: LinkDevice, DeviceId, T> {
    /// Power-of-two sized bucket array; an entry lives in the bucket of its
    /// seeded hash masked to the array width.
    buckets: Vec<Vec<Primary<NeighborEntry<P, D, DeviceId, T>>>>,
    entry_count: usize,
    /// When the last forced shrink ran.
    last_flush: Option<T>,
    /// When `reachable_time` was last resampled.
    last_rand: Option<T>,
}

struct ParmsList<DeviceId> {
    default: Primary<ParameterSet>,
    per_device: Vec<(DeviceId, Primary<ParameterSet>)>,
}

/// A hash-bucket container of neighbour entries for one protocol, together
/// with the parameters, statistics, garbage collection scheduling and proxy
/// subsystem that surround them.
pub struct NeighborTable<P: NeighborProtocol<D>, D: LinkDevice, DeviceId, T: Instant> {
    /// Random key mixed into bucket hashing so bucket distribution cannot
    /// be predicted by remote peers.
    seed: u64,
    state: RwLock<TableState<P, D, DeviceId, T>>,
    parms: Mutex<ParmsList<DeviceId>>,
    proxy: Mutex<ProxyState<P::Addr, P::ProxyRequest, DeviceId, T>>,
    config: TableConfig,
    counters: NeighborCounters,
}

fn new_buckets<P: NeighborProtocol<D>, D: LinkDevice, DeviceId, T>(
    n: usize,
) -> Vec<Vec<Primary<NeighborEntry<P, D, DeviceId, T>>>> {
    (0..n).map(|_| Vec::new()).collect()
}

impl<P, D, DeviceId, T> NeighborTable<P, D, DeviceId, T>
where
    P: NeighborProtocol<D>,
    D: LinkDevice,
    DeviceId: Clone + Eq + Hash + Debug + Send + Sync + 'static,
    T: Instant,
{
    /// Creates a new table and arms its periodic garbage-collection sweep.
    pub fn new<BC>(bindings_ctx: &mut BC, config: TableConfig) -> Self
    where
        BC: NeighborBindingsContext<P, D, DeviceId> + InstantBindingsTypes<Instant = T>,
    {
        let mut parameters = NeighborParameters::default();
        let seed = {
            let mut rng = bindings_ctx.rng();
            parameters.reachable_time =
                rand_reachable_time(&mut rng, parameters.base_reachable_time);
            rng.gen()
        };
        let now = bindings_ctx.now();
        let table = NeighborTable {
            seed,
            state: RwLock::new(TableState {
                buckets: new_buckets(INITIAL_BUCKET_COUNT),
                entry_count: 0,
                // Start the forced-shrink backoff from table creation so a
                // burst of early inserts between gc_thresh2 and gc_thresh3
                // does not trigger a pointless full scan.
                last_flush: Some(now),
                last_rand: Some(now),
            }),
            parms: Mutex::new(ParmsList {
                default: Primary::new(ParameterSet::new(parameters)),
                per_device: Vec::new(),
            }),
            proxy: Mutex::new(ProxyState::default()),
            config,
            counters: NeighborCounters::default(),
        };
        let sweep = parameters.base_reachable_time.get() / 2;
        assert_eq!(bindings_ctx.schedule_timer(sweep, TableTimerId::PeriodicGc), None);
        table
    }

    /// The table's address-family tag.
    pub fn family(&self) -> AddressFamily {
        P::FAMILY
    }

    /// The table's statistics.
    pub fn counters(&self) -> &NeighborCounters {
        &self.counters
    }

    /// The table's thresholds and policy knobs.
    pub fn config(&self) -> &TableConfig {
        &self.config
    }

    /// The number of live entries.
    pub fn len(&self) -> usize {
        self.state.read().entry_count
    }

    /// Whether the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn hash_key(&self, addr: &P::Addr, device: &DeviceId) -> u64 {
        let mut h = DefaultHasher::new();
        self.seed.hash(&mut h);
        addr.hash(&mut h);
        device.hash(&mut h);
        h.finish()
    }

    fn bucket_index(&self, width: usize, addr: &P::Addr, device: &DeviceId) -> usize {
        debug_assert!(width.is_power_of_two());
        (self.hash_key(addr, device) as usize) & (width - 1)
    }

    fn find(&self, addr: &P::Addr, device: &DeviceId) -> Option<NeighborRef<P, D, DeviceId, T>> {
        let state = self.state.read();
        let idx = self.bucket_index(state.buckets.len(), addr, device);
        state.buckets[idx]
            .iter()
            .find(|e| e.addr == *addr && e.device == *device)
            .map(Primary::clone_strong)
    }

    /// Looks up the entry for `(addr, device)`, returning a shared
    /// reference on a hit.
    pub fn lookup(&self, addr: &P::Addr, device: &DeviceId) -> Option<NeighborRef<P, D, DeviceId, T>> {
        self.counters.lookups.increment();
        let entry = self.find(addr, device);
        if entry.is_some() {
            self.counters.hits.increment();
        }
        entry
    }

    /// Returns the parameter set for `device`, creating one (cloned from
    /// the table default) the first time the interface is seen.
    pub fn device_parameters(&self, device: &DeviceId) -> ParametersRef {
        let mut parms = self.parms.lock();
        if let Some((_, p)) = parms.per_device.iter().find(|(d, _)| d == device) {
            return Primary::clone_strong(p);
        }
        let values = parms.default.get();
        let primary = Primary::new(ParameterSet::new(values));
        let strong = Primary::clone_strong(&primary);
        parms.per_device.push((device.clone(), primary));
        strong
    }

    /// Applies `update` to the parameter set of `device`, or to the table
    /// default when `device` is `None`.
    pub fn update_parameters(
        &self,
        device: Option<&DeviceId>,
        update: NeighborParametersUpdate,
    ) -> NeighborParametersUpdate {
        let set = match device {
            Some(device) => self.device_parameters(device),
            None => Primary::clone_strong(&self.parms.lock().default),
        };
        let mut values = set.values.lock();
        update.apply_and_take_previous(&mut values)
    }

    /// Creates an entry for `(addr, device)`, running the forced shrink
    /// first if the table is over its thresholds.
    ///
    /// If a racing create already installed an entry for the same key, the
    /// existing entry is returned and the new one discarded.
    pub fn create<CC, BC>(
        &self,
        core_ctx: &mut CC,
        bindings_ctx: &mut BC,
        addr: P::Addr,
        device: DeviceId,
    ) -> Result<NeighborRef<P, D, DeviceId, T>, CreateError>
    where
        CC: NeighborContext<P, D, BC, DeviceId = DeviceId>,
        BC: NeighborBindingsContext<P, D, DeviceId> + InstantBindingsTypes<Instant = T>,
    {
        let now = bindings_ctx.now();
        {
            let mut state = self.state.write();
            let entries = state.entry_count;
            let TableConfig { gc_thresh1: _, gc_thresh2, gc_thresh3, accept_unsolicited: _ } =
                self.config;
            if entries >= gc_thresh3
                || (entries >= gc_thresh2
                    && state
                        .last_flush
                        .map_or(true, |t| now >= t.add(FORCED_GC_INTERVAL)))
            {
                let shrunk = self.forced_shrink(&mut state, bindings_ctx);
                if !shrunk && state.entry_count >= gc_thresh3 {
                    debug!("neighbour table full, cannot create entry for {addr}");
                    return Err(CreateError::TableFull);
                }
            }
        }

        let parms = self.device_parameters(&device);
        if Strong::marked_for_destruction(&parms) {
            return Err(CreateError::ParametersDead);
        }

        let init = P::construct(core_ctx, &device, addr);
        let base_reachable = parms.get().base_reachable_time;
        let state = if init.pinned_noarp { NeighborState::Noarp } else { NeighborState::None };
        let output =
            if state.is_connected() { OutputMode::Connected } else { OutputMode::Resolving };
        let entry = NeighborEntry {
            addr,
            device: device.clone(),
            parms,
            variant: init.variant,
            cached_header: SeqLock::new(None),
            inner: Mutex::new(EntryInner {
                state,
                link_addr: init.binding,
                // Backdated so the entry can move through its first
                // reachability decision quickly.
                confirmed: now.saturating_sub(base_reachable * 2),
                used: now,
                updated: now,
                probes: 0,
                dead: false,
                output,
                pending: VecDeque::new(),
            }),
        };

        let (entry, event_state) = {
            let mut table = self.state.write();
            if table.entry_count + 1 > table.buckets.len() {
                self.grow_buckets(&mut table);
            }
            let idx = self.bucket_index(table.buckets.len(), &addr, &device);
            // A racing create may have installed the same key while the
            // table lock was dropped; prefer the existing entry.
            if let Some(existing) =
                table.buckets[idx].iter().find(|e| e.addr == addr && e.device == device)
            {
                return Ok(Primary::clone_strong(existing));
            }
            let primary = Primary::new(entry);
            let strong = Primary::clone_strong(&primary);
            let event_state = NeighborEntry::event_state(&strong.inner.lock());
            table.buckets[idx].insert(0, primary);
            table.entry_count += 1;
            self.counters.allocs.increment();
            (strong, event_state)
        };
        trace!("created neighbour entry for {addr} on {device:?}");
        bindings_ctx.on_event(Event::added(&device, event_state, addr, now));
        Ok(entry)
    }

    /// Looks up `(addr, device)`, creating the entry if it is missing.
    pub fn lookup_or_create<CC, BC>(
        &self,
        core_ctx: &mut CC,
        bindings_ctx: &mut BC,
        addr: P::Addr,
        device: DeviceId,
    ) -> Result<NeighborRef<P, D, DeviceId, T>, CreateError>
    where
        CC: NeighborContext<P, D, BC, DeviceId = DeviceId>,
        BC: NeighborBindingsContext<P, D, DeviceId> + InstantBindingsTypes<Instant = T>,
    {
        if let Some(entry) = self.lookup(&addr, &device) {
            return Ok(entry);
        }
        self.create(core_ctx, bindings_ctx, addr, device)
    }

    fn grow_buckets(&self, table: &mut TableState<P, D, DeviceId, T>) {
        let new_width = table.buckets.len() * 2;
        let old = std::mem::replace(&mut table.buckets, new_buckets(new_width));
        for bucket in old {
            for entry in bucket {
                let idx = self.bucket_index(new_width, &entry.addr, &entry.device);
                table.buckets[idx].insert(0, entry);
            }
        }
        self.counters.hash_grows.increment();
        trace!("neighbour table grown to {new_width} buckets");
    }

    /// The synchronous forced shrink: deletes every entry that nothing else
    /// refers to and that is not `Permanent`. Returns whether anything was
    /// freed.
    fn forced_shrink<BC>(
        &self,
        table: &mut TableState<P, D, DeviceId, T>,
        bindings_ctx: &mut BC,
    ) -> bool
    where
        BC: NeighborBindingsContext<P, D, DeviceId> + InstantBindingsTypes<Instant = T>,
    {
        self.counters.forced_gc_runs.increment();
        let now = bindings_ctx.now();
        let mut shrunk = false;
        let mut removed = 0;
        for bucket in table.buckets.iter_mut() {
            bucket.retain(|entry| {
                let mut inner = entry.inner.lock();
                if !Primary::is_exclusive(entry) || inner.state == NeighborState::Permanent {
                    return true;
                }
                inner.dead = true;
                drop(inner);
                let _: Option<T> = bindings_ctx.cancel_timer(TableTimerId::Neighbor {
                    device: entry.device.clone(),
                    addr: entry.addr,
                });
                bindings_ctx.on_event(Event::removed(&entry.device, entry.addr, now));
                self.counters.destroys.increment();
                removed += 1;
                shrunk = true;
                false
            });
        }
        table.entry_count -= removed;
        table.last_flush = Some(now);
        debug!("forced shrink freed {removed} neighbour entries");
        shrunk
    }

    /// The asynchronous periodic sweep. Collects idle and failed entries
    /// that nothing else refers to, and resamples `reachable_time` for
    /// every parameter set every few minutes.
    fn periodic_gc<BC>(&self, bindings_ctx: &mut BC)
    where
        BC: NeighborBindingsContext<P, D, DeviceId> + InstantBindingsTypes<Instant = T>,
    {
        self.counters.periodic_gc_runs.increment();
        let now = bindings_ctx.now();

        let resample = {
            let mut state = self.state.write();
            if state
                .last_rand
                .map_or(true, |t| now >= t.add(REACHABLE_TIME_RESAMPLE_INTERVAL))
            {
                state.last_rand = Some(now);
                true
            } else {
                false
            }
        };
        if resample {
            let parms = self.parms.lock();
            let mut rng = bindings_ctx.rng();
            let mut resample_one = |set: &Primary<ParameterSet>| {
                let mut values = set.values.lock();
                values.reachable_time = rand_reachable_time(&mut rng, values.base_reachable_time);
            };
            resample_one(&parms.default);
            for (_, set) in parms.per_device.iter() {
                resample_one(set);
            }
        }

        // Sweep one bucket per lock acquisition so lookups and creates can
        // interleave with a long scan.
        let mut i = 0;
        loop {
            let mut table = self.state.write();
            if i >= table.buckets.len() {
                break;
            }
            let mut removed = 0;
            let TableState { buckets, entry_count: _, last_flush: _, last_rand: _ } = &mut *table;
            buckets[i].retain(|entry| {
                let mut inner = entry.inner.lock();
                if inner.state == NeighborState::Permanent || inner.state.in_timer() {
                    return true;
                }
                // A recently-confirmed entry should not be collected as
                // idle.
                if inner.used < inner.confirmed {
                    inner.used = inner.confirmed;
                }
                let staletime = entry.parms.get().gc_staletime;
                if Primary::is_exclusive(entry)
                    && (inner.state == NeighborState::Failed
                        || now > inner.used.add(staletime.get()))
                {
                    inner.dead = true;
                    drop(inner);
                    bindings_ctx.on_event(Event::removed(&entry.device, entry.addr, now));
                    self.counters.destroys.increment();
                    removed += 1;
                    return false;
                }
                true
            });
            table.entry_count -= removed;
            i += 1;
        }

        let sweep = self.parms.lock().default.get().base_reachable_time.get() / 2;
        assert_eq!(bindings_ctx.schedule_timer(sweep, TableTimerId::PeriodicGc), None);
    }

    /// Registers higher-layer reachability evidence for `entry` (e.g. an
    /// accepted TCP ACK): marks `confirmed := now` and promotes a valid,
    /// non-connected entry back to `Reachable`.
    pub fn confirm<BC>(&self, bindings_ctx: &mut BC, entry: &NeighborRef<P, D, DeviceId, T>)
    where
        BC: NeighborBindingsContext<P, D, DeviceId> + InstantBindingsTypes<Instant = T>,
    {
        let now = bindings_ctx.now();
        let parms = entry.parms.get();
        let mut inner = entry.inner.lock();
        if !inner.state.is_valid() {
            return;
        }
        inner.confirmed = now;
        if inner.state.is_connected() {
            // Already on the fast path; refreshing the horizon is enough,
            // the timer re-evaluates against `confirmed` when it fires.
            return;
        }
        let old = inner.state;
        let timer_id = TableTimerId::Neighbor { device: entry.device.clone(), addr: entry.addr };
        if old.in_timer() {
            let _: Option<T> = bindings_ctx.cancel_timer(timer_id.clone());
        }
        inner.state = NeighborState::Reachable;
        inner.updated = now;
        inner.output = OutputMode::Connected;
        inner.probes = 0;
        let _: Option<T> = bindings_ctx
            .schedule_timer_instant(now.add(parms.reachable_time.get()), timer_id);
        let state = NeighborEntry::event_state(&inner);
        drop(inner);
        bindings_ctx.on_event(Event::changed(&entry.device, state, entry.addr, now));
    }

    /// The `output` entry point: transmits `frame` through `entry`,
    /// resolving the link-layer binding first if necessary.
    ///
    /// This is also the only place a cached header template is lazily
    /// constructed, on the first fast-path transmit through a
    /// header-caching interface.
    pub fn resolve_and_send<CC, BC>(
        &self,
        core_ctx: &mut CC,
        bindings_ctx: &mut BC,
        entry: &NeighborRef<P, D, DeviceId, T>,
        frame: Frame,
    ) -> TransmitDisposition
    where
        CC: NeighborContext<P, D, BC, DeviceId = DeviceId>,
        BC: NeighborBindingsContext<P, D, DeviceId> + InstantBindingsTypes<Instant = T>,
    {
        enum Action<L> {
            Transmit(L, Frame),
            TransmitTemplated(HeaderTemplate, Frame),
            TransmitUnaddressed(Frame),
            Report(Frame),
            Drop,
            Queued,
        }

        let now = bindings_ctx.now();
        let parms = entry.parms.get();
        let mut event = None;
        let action = {
            let mut inner = entry.inner.lock();
            inner.used = now;
            if inner.dead || inner.output == OutputMode::Blackhole {
                Action::Drop
            } else if inner.output == OutputMode::Connected {
                match entry.variant {
                    OutputVariant::Direct => Action::TransmitUnaddressed(frame),
                    OutputVariant::HeaderCache => {
                        let dst = inner
                            .link_addr
                            .expect("connected entry must have a binding");
                        match entry.cached_header.read() {
                            Some(template) => Action::TransmitTemplated(template, frame),
                            None => match core_ctx.build_header(&entry.device, dst) {
                                Some(template) => {
                                    // Lazily link the template so future
                                    // transmits skip resolution work; the
                                    // entry lock serializes this write.
                                    entry.cached_header.write(Some(template));
                                    Action::TransmitTemplated(template, frame)
                                }
                                None => Action::Transmit(dst, frame),
                            },
                        }
                    }
                    OutputVariant::Generic | OutputVariant::Compat => Action::Transmit(
                        inner.link_addr.expect("connected entry must have a binding"),
                        frame,
                    ),
                }
            } else {
                match inner.state {
                    NeighborState::Stale => {
                        inner.state = NeighborState::Delay;
                        inner.updated = now;
                        assert_eq!(
                            bindings_ctx.schedule_timer(
                                parms.delay_probe_time.get(),
                                TableTimerId::Neighbor {
                                    device: entry.device.clone(),
                                    addr: entry.addr,
                                },
                            ),
                            None
                        );
                        event = Some(NeighborEntry::event_state(&inner));
                        Action::Transmit(
                            inner.link_addr.expect("stale entry must have a binding"),
                            frame,
                        )
                    }
                    NeighborState::Delay | NeighborState::Probe => Action::Transmit(
                        inner.link_addr.expect("valid entry must have a binding"),
                        frame,
                    ),
                    NeighborState::None => {
                        if parms.mcast_probes + parms.app_probes > 0 {
                            inner.state = NeighborState::Incomplete;
                            inner.updated = now;
                            inner.probes = 0;
                            // The frame must be on the queue before the
                            // solicitation can fire so the reply always
                            // finds it.
                            inner.pending.push_back(frame);
                            assert_eq!(
                                bindings_ctx.schedule_timer(
                                    FIRST_PROBE_DELAY,
                                    TableTimerId::Neighbor {
                                        device: entry.device.clone(),
                                        addr: entry.addr,
                                    },
                                ),
                                None
                            );
                            event = Some(NeighborEntry::event_state(&inner));
                            Action::Queued
                        } else {
                            inner.state = NeighborState::Failed;
                            inner.updated = now;
                            event = Some(NeighborEntry::event_state(&inner));
                            Action::Report(frame)
                        }
                    }
                    NeighborState::Incomplete => {
                        if inner.pending.len() >= parms.queue_len {
                            let _: Option<Frame> = inner.pending.pop_front();
                            self.counters.unresolved_discards.increment();
                        }
                        inner.pending.push_back(frame);
                        Action::Queued
                    }
                    NeighborState::Failed => Action::Report(frame),
                    // CONNECTED states are handled by the fast path above;
                    // reaching here means the output mode lagged a state
                    // change, so fall back to a plain addressed transmit.
                    NeighborState::Reachable
                    | NeighborState::Permanent
                    | NeighborState::Noarp => match inner.link_addr {
                        Some(dst) => Action::Transmit(dst, frame),
                        None => Action::Drop,
                    },
                }
            }
        };

        if let Some(state) = event {
            bindings_ctx.on_event(Event::changed(&entry.device, state, entry.addr, now));
        }
        match action {
            Action::Transmit(dst, frame) => match core_ctx.transmit(&entry.device, dst, frame) {
                Ok(()) => TransmitDisposition::Sent,
                Err(e) => {
                    debug!("transmit to {} failed: {e}", entry.addr);
                    TransmitDisposition::Failed
                }
            },
            Action::TransmitTemplated(template, frame) => {
                match core_ctx.transmit_templated(&entry.device, &template, frame) {
                    Ok(()) => TransmitDisposition::Sent,
                    Err(e) => {
                        debug!("templated transmit to {} failed: {e}", entry.addr);
                        TransmitDisposition::Failed
                    }
                }
            }
            Action::TransmitUnaddressed(frame) => {
                match core_ctx.transmit_unaddressed(&entry.device, frame) {
                    Ok(()) => TransmitDisposition::Sent,
                    Err(e) => {
                        debug!("unaddressed transmit to {} failed: {e}", entry.addr);
                        TransmitDisposition::Failed
                    }
                }
            }
            Action::Report(frame) => {
                core_ctx.report_unreachable(bindings_ctx, &entry.device, frame);
                TransmitDisposition::Failed
            }
            Action::Drop => TransmitDisposition::Failed,
            Action::Queued => TransmitDisposition::Queued,
        }
    }

    fn max_probes(state: NeighborState, parms: &NeighborParameters) -> u16 {
        if state == NeighborState::Probe {
            parms.ucast_probes
        } else {
            parms.ucast_probes + parms.mcast_probes + parms.app_probes
        }
    }

    /// Handles one of the table's timers firing.
    pub fn handle_timer<CC, BC>(
        &self,
        core_ctx: &mut CC,
        bindings_ctx: &mut BC,
        id: TableTimerId<P::Addr, DeviceId>,
    ) where
        CC: NeighborContext<P, D, BC, DeviceId = DeviceId>,
        BC: NeighborBindingsContext<P, D, DeviceId> + InstantBindingsTypes<Instant = T>,
    {
        match id {
            TableTimerId::Neighbor { device, addr } => {
                self.neighbor_timer(core_ctx, bindings_ctx, device, addr)
            }
            TableTimerId::PeriodicGc => self.periodic_gc(bindings_ctx),
            TableTimerId::ProxyQueue => self.proxy_process(core_ctx, bindings_ctx),
        }
    }

    /// The per-entry timer callback: drives timed NUD transitions.
    fn neighbor_timer<CC, BC>(
        &self,
        core_ctx: &mut CC,
        bindings_ctx: &mut BC,
        device: DeviceId,
        addr: P::Addr,
    ) where
        CC: NeighborContext<P, D, BC, DeviceId = DeviceId>,
        BC: NeighborBindingsContext<P, D, DeviceId> + InstantBindingsTypes<Instant = T>,
    {
        let Some(entry) = self.find(&addr, &device) else {
            // The entry was removed after the timer was committed to fire.
            return;
        };
        let now = bindings_ctx.now();
        let parms = entry.parms.get();

        let mut notify = None;
        let mut failed_frames: Option<VecDeque<Frame>> = None;
        let mut solicit = None;
        {
            let mut inner = entry.inner.lock();
            if !inner.state.in_timer() {
                warn!("neighbour timer fired for {addr} in state {:?}", inner.state);
                return;
            }

            let mut next: Option<T> = None;
            match inner.state {
                NeighborState::Reachable => {
                    if now < inner.confirmed.add(parms.reachable_time.get()) {
                        // Confirmation arrived since the timer was armed;
                        // stay reachable and re-evaluate at the new horizon.
                        next = Some(inner.confirmed.add(parms.reachable_time.get()));
                    } else if now <= inner.used.add(parms.delay_probe_time.get()) {
                        trace!("neighbour {addr} is delayed");
                        inner.state = NeighborState::Delay;
                        inner.updated = now;
                        inner.output = OutputMode::Resolving;
                        next = Some(now.add(parms.delay_probe_time.get()));
                        notify = Some(NeighborEntry::event_state(&inner));
                    } else {
                        trace!("neighbour {addr} is suspected");
                        inner.state = NeighborState::Stale;
                        inner.updated = now;
                        inner.output = OutputMode::Resolving;
                        notify = Some(NeighborEntry::event_state(&inner));
                        // No arm: stale entries are managed by the periodic
                        // sweep.
                    }
                }
                NeighborState::Delay => {
                    if now <= inner.confirmed.add(parms.delay_probe_time.get()) {
                        trace!("neighbour {addr} is now reachable");
                        inner.state = NeighborState::Reachable;
                        inner.updated = now;
                        inner.output = OutputMode::Connected;
                        next = Some(inner.confirmed.add(parms.reachable_time.get()));
                        notify = Some(NeighborEntry::event_state(&inner));
                    } else {
                        trace!("neighbour {addr} is probed");
                        inner.state = NeighborState::Probe;
                        inner.updated = now;
                        inner.probes = 0;
                        next = Some(now.add(parms.retrans_time.get()));
                    }
                }
                NeighborState::Incomplete | NeighborState::Probe => {
                    next = Some(now.add(parms.retrans_time.get()));
                }
                NeighborState::None
                | NeighborState::Stale
                | NeighborState::Failed
                | NeighborState::Permanent
                | NeighborState::Noarp => unreachable!("checked in_timer above"),
            }

            if matches!(inner.state, NeighborState::Incomplete | NeighborState::Probe)
                && inner.probes >= Self::max_probes(inner.state, &parms)
            {
                debug!("neighbour {addr} failed resolution after {} probes", inner.probes);
                inner.state = NeighborState::Failed;
                inner.updated = now;
                inner.output = OutputMode::Resolving;
                self.counters.res_failed.increment();
                failed_frames = Some(std::mem::take(&mut inner.pending));
                notify = Some(NeighborEntry::event_state(&inner));
                next = None;
            }

            if inner.state.in_timer() {
                let next = next.expect("in-timer state must have a deadline");
                let _: Option<T> = bindings_ctx.schedule_timer_instant(
                    next,
                    TableTimerId::Neighbor { device: device.clone(), addr },
                );
            }

            if matches!(inner.state, NeighborState::Incomplete | NeighborState::Probe) {
                // Unicast probes re-verify a known binding; broadcast
                // probes perform initial resolution.
                let remote = match inner.state {
                    NeighborState::Probe => inner.link_addr,
                    _ => None,
                };
                inner.probes += 1;
                solicit = Some(remote);
            }
        }

        if let Some(frames) = failed_frames {
            for frame in frames {
                core_ctx.report_unreachable(bindings_ctx, &device, frame);
            }
        }
        if let Some(remote) = solicit {
            core_ctx.send_solicitation(bindings_ctx, &device, addr, remote);
        }
        if let Some(state) = notify {
            bindings_ctx.on_event(Event::changed(&device, state, addr, now));
        }
    }

    /// Applies a learned or administrative update to `entry`.
    ///
    /// `lladdr` is the newly observed link-layer address, if any; `new` is
    /// the state the caller wants the entry in. Flag semantics follow the
    /// classic rules: without [`UpdateFlags::override_existing`] a
    /// different link-layer address is not allowed to replace a valid
    /// binding (the update is silently ignored, or with
    /// [`UpdateFlags::weak_override`] degrades a connected entry to
    /// `Stale`); `Permanent` and `Noarp` entries only change under
    /// [`UpdateFlags::admin`].
    pub fn update<CC, BC>(
        &self,
        core_ctx: &mut CC,
        bindings_ctx: &mut BC,
        entry: &NeighborRef<P, D, DeviceId, T>,
        lladdr: Option<D::Address>,
        new: NeighborState,
        flags: UpdateFlags,
    ) -> Result<(), UpdateError>
    where
        CC: NeighborContext<P, D, BC, DeviceId = DeviceId>,
        BC: NeighborBindingsContext<P, D, DeviceId> + InstantBindingsTypes<Instant = T>,
    {
        let UpdateFlags { admin, override_existing, weak_override } = flags;
        let now = bindings_ctx.now();
        let timer_id =
            TableTimerId::Neighbor { device: entry.device.clone(), addr: entry.addr };
        let parms = entry.parms.get();

        let mut inner = entry.inner.lock();
        let old = inner.state;

        if !admin
            && matches!(old, NeighborState::Noarp | NeighborState::Permanent)
        {
            return Err(UpdateError::NotPermitted);
        }

        if !new.is_valid() {
            if old.in_timer() {
                let _: Option<T> = bindings_ctx.cancel_timer(timer_id);
            }
            if old.is_connected() {
                inner.output = OutputMode::Resolving;
            }
            inner.state = new;
            inner.updated = now;
            let failed_frames = if matches!(old, NeighborState::Incomplete | NeighborState::Probe)
                && new == NeighborState::Failed
            {
                self.counters.res_failed.increment();
                Some(std::mem::take(&mut inner.pending))
            } else {
                None
            };
            let notify = old.is_valid() || failed_frames.is_some();
            let state = NeighborEntry::event_state(&inner);
            drop(inner);
            if let Some(frames) = failed_frames {
                for frame in frames {
                    core_ctx.report_unreachable(bindings_ctx, &entry.device, frame);
                }
            }
            if notify {
                bindings_ctx.on_event(Event::changed(&entry.device, state, entry.addr, now));
            }
            return Ok(());
        }

        let cached = inner.link_addr;
        let mut lladdr = match lladdr {
            Some(l) => l,
            None => cached.ok_or(UpdateError::AddressRequired)?,
        };
        let mut new = new;

        if new.is_connected() {
            inner.confirmed = now;
        }
        inner.updated = now;

        if old.is_valid() {
            match cached {
                Some(c) if c != lladdr => {
                    if !override_existing {
                        if weak_override && old.is_connected() {
                            // Keep the binding but stop trusting it.
                            lladdr = c;
                            new = NeighborState::Stale;
                        } else {
                            // The proposed address loses; keep what we
                            // have.
                            trace!(
                                "ignoring update for {} with conflicting link address",
                                entry.addr
                            );
                            return Ok(());
                        }
                    }
                }
                Some(_) => {
                    // Same address: don't let an unsolicited Stale proposal
                    // downgrade fresher reachability information.
                    if new == NeighborState::Stale && (weak_override || old.is_connected()) {
                        new = old;
                    }
                }
                None => {}
            }
        }

        if new != old {
            if old.in_timer() {
                let _: Option<T> = bindings_ctx.cancel_timer(timer_id.clone());
            }
            if new.in_timer() {
                let deadline = match new {
                    NeighborState::Reachable => now.add(parms.reachable_time.get()),
                    NeighborState::Delay => now.add(parms.delay_probe_time.get()),
                    NeighborState::Incomplete | NeighborState::Probe => {
                        now.add(parms.retrans_time.get())
                    }
                    _ => unreachable!("in_timer covers exactly these states"),
                };
                let _: Option<T> = bindings_ctx.schedule_timer_instant(deadline, timer_id);
            }
            inner.state = new;
        }

        let addr_changed = Some(lladdr) != cached;
        if addr_changed {
            inner.link_addr = Some(lladdr);
            if !new.is_connected() {
                inner.confirmed = now.saturating_sub(parms.base_reachable_time * 2);
            }
            // Rewrite the cached header template so fast-path readers see
            // the new binding.
            if entry.variant == OutputVariant::HeaderCache
                && entry.cached_header.read().is_some()
            {
                entry.cached_header.write(core_ctx.build_header(&entry.device, lladdr));
            }
        }

        inner.output =
            if new.is_connected() { OutputMode::Connected } else { OutputMode::Resolving };

        let drained = if !old.is_valid() && new.is_valid() {
            Some(std::mem::take(&mut inner.pending))
        } else {
            None
        };
        let changed = new != old || addr_changed;
        let state = NeighborEntry::event_state(&inner);

        // Send the queued frames before releasing the entry lock so a
        // racing fast-path transmit cannot overtake them.
        if let Some(frames) = drained {
            for frame in frames {
                if let Err(e) = core_ctx.transmit(&entry.device, lladdr, frame) {
                    debug!("failed to flush pending frame to {}: {e}", entry.addr);
                }
            }
        }
        drop(inner);

        if changed {
            bindings_ctx.on_event(Event::changed(&entry.device, state, entry.addr, now));
        }
        Ok(())
    }

    /// Removes the entry for `(addr, device)` from the table.
    ///
    /// The entry is detached immediately; holders of outstanding references
    /// observe it as dead.
    pub fn remove<BC>(
        &self,
        bindings_ctx: &mut BC,
        addr: &P::Addr,
        device: &DeviceId,
    ) -> Result<(), NotFoundError>
    where
        BC: NeighborBindingsContext<P, D, DeviceId> + InstantBindingsTypes<Instant = T>,
    {
        let now = bindings_ctx.now();
        let mut table = self.state.write();
        let idx = self.bucket_index(table.buckets.len(), addr, device);
        let bucket = &mut table.buckets[idx];
        let pos = bucket
            .iter()
            .position(|e| e.addr == *addr && e.device == *device)
            .ok_or(NotFoundError)?;
        let entry = bucket.remove(pos);
        table.entry_count -= 1;
        {
            let mut inner = entry.inner.lock();
            if inner.state.in_timer() {
                let _: Option<T> = bindings_ctx.cancel_timer(TableTimerId::Neighbor {
                    device: device.clone(),
                    addr: *addr,
                });
            }
            inner.dead = true;
            inner.output = OutputMode::Blackhole;
            inner.pending.clear();
        }
        self.counters.destroys.increment();
        bindings_ctx.on_event(Event::removed(device, *addr, now));
        Ok(())
    }

    /// Detaches every entry bound to `device`.
    ///
    /// Entries still referenced elsewhere are marked dead with a black-hole
    /// output so subsequent transmits drop; they are destroyed when their
    /// last reference goes away.
    pub fn flush_device<BC>(&self, bindings_ctx: &mut BC, device: &DeviceId)
    where
        BC: NeighborBindingsContext<P, D, DeviceId> + InstantBindingsTypes<Instant = T>,
    {
        let now = bindings_ctx.now();
        let mut table = self.state.write();
        let mut removed = 0;
        for bucket in table.buckets.iter_mut() {
            bucket.retain(|entry| {
                if entry.device != *device {
                    return true;
                }
                {
                    let mut inner = entry.inner.lock();
                    if inner.state.in_timer() {
                        let _: Option<T> = bindings_ctx.cancel_timer(TableTimerId::Neighbor {
                            device: entry.device.clone(),
                            addr: entry.addr,
                        });
                    }
                    inner.dead = true;
                    inner.state = if inner.state.is_valid() {
                        NeighborState::Noarp
                    } else {
                        NeighborState::None
                    };
                    inner.output = OutputMode::Blackhole;
                    inner.pending.clear();
                }
                bindings_ctx.on_event(Event::removed(&entry.device, entry.addr, now));
                self.counters.destroys.increment();
                removed += 1;
                false
            });
        }
        table.entry_count -= removed;
        debug!("flushed {removed} neighbour entries for {device:?}");
    }

    /// Handles an interface going away: detaches its entries, marks its
    /// parameter set dead so no further entries are created against it, and
    /// sweeps its proxy state.
    pub fn on_interface_down<BC>(&self, bindings_ctx: &mut BC, device: &DeviceId)
    where
        BC: NeighborBindingsContext<P, D, DeviceId> + InstantBindingsTypes<Instant = T>,
    {
        self.flush_device(bindings_ctx, device);
        {
            // The set stays in the list so creation against the interface
            // keeps failing; entries holding it stay readable.
            let parms = self.parms.lock();
            if let Some((_, set)) = parms.per_device.iter().find(|(d, _)| d == device) {
                Primary::mark_for_destruction(set);
            }
        }
        self.proxy_flush_device(bindings_ctx, device);
    }

    /// Calls `f` on a snapshot of every entry in the table.
    pub fn visit_entries<F: FnMut(EntrySnapshot<P::Addr, D::Address, DeviceId, T>)>(
        &self,
        mut f: F,
    ) {
        let state = self.state.read();
        for bucket in state.buckets.iter() {
            for entry in bucket.iter() {
                let inner = entry.inner.lock();
                f(EntrySnapshot {
                    addr: entry.addr,
                    device: entry.device.clone(),
                    state: inner.state,
                    link_addr: inner.link_addr,
                    confirmed: inner.confirmed,
                    used: inner.used,
                    updated: inner.updated,
                });
            }
        }
    }
}

/// Flags qualifying a call to [`NeighborTable::update`].
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct UpdateFlags {
    /// The update comes from management and may touch `Permanent` and
    /// `Noarp` entries.
    pub admin: bool,
    /// A differing link-layer address may replace the cached binding.
    pub override_existing: bool,
    /// If the binding cannot be replaced, degrade a connected entry to
    /// `Stale` instead of ignoring the update.
    pub weak_override: bool,
}

impl UpdateFlags {
    /// Flags for an administrative replace.
    pub const ADMIN_REPLACE: UpdateFlags =
        UpdateFlags { admin: true, override_existing: true, weak_override: false };
}

/// A point-in-time copy of an entry's observable state.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct EntrySnapshot<A, L, DeviceId, T> {
    /// The entry's protocol address.
    pub addr: A,
    /// The entry's interface.
    pub device: DeviceId,
    /// The entry's NUD state.
    pub state: NeighborState,
    /// The link-layer binding, if installed.
    pub link_addr: Option<L>,
    /// Last reachability evidence.
    pub confirmed: T,
    /// Last transmit attempt.
    pub used: T,
    /// Last state change.
    pub updated: T,
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;
    use test_case::test_case;

    use super::*;
    use crate::context::testutil::{FakeBindingsCtx, FakeInstant};
    use crate::device::DeviceCapabilities;
    use crate::error::TransmitError;
    use crate::link::testutil::{FakeLinkAddress, FakeLinkDevice, FAKE_BROADCAST_ADDR};

    #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
    enum FakeProtocol {}

    impl NeighborProtocol<FakeLinkDevice> for FakeProtocol {
        type Addr = u32;
        type ProxyRequest = u8;

        const FAMILY: AddressFamily = AddressFamily(0xfafa);

        fn construct<CC: DeviceContext<FakeLinkDevice>>(
            core_ctx: &CC,
            device: &CC::DeviceId,
            _addr: u32,
        ) -> EntryInit<FakeLinkDevice> {
            let caps = core_ctx.capabilities(device);
            if !caps.can_resolve {
                return EntryInit {
                    binding: None,
                    pinned_noarp: true,
                    variant: OutputVariant::Direct,
                };
            }
            let variant = if caps.has_header_cache {
                OutputVariant::HeaderCache
            } else {
                OutputVariant::Generic
            };
            EntryInit { binding: None, pinned_noarp: false, variant }
        }
    }

    #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
    struct FakeDeviceId(usize);

    struct FakeDeviceState {
        link_addr: FakeLinkAddress,
        caps: DeviceCapabilities,
    }

    #[derive(Default)]
    struct FakeCoreCtx {
        devices: HashMap<FakeDeviceId, FakeDeviceState>,
        sent: Vec<(FakeDeviceId, FakeLinkAddress, Frame)>,
        sent_templated: Vec<(FakeDeviceId, HeaderTemplate, Frame)>,
        sent_unaddressed: Vec<(FakeDeviceId, Frame)>,
        solicits: Vec<(FakeDeviceId, u32, Option<FakeLinkAddress>)>,
        unreachable: Vec<(FakeDeviceId, Frame)>,
        proxy_redone: Vec<(FakeDeviceId, u8)>,
    }

    impl FakeCoreCtx {
        fn add_device(&mut self, id: FakeDeviceId, caps: DeviceCapabilities) {
            assert_matches!(
                self.devices.insert(id, FakeDeviceState { link_addr: DEV_LINK_ADDR, caps }),
                None
            );
        }

        fn take_sent(&mut self) -> Vec<(FakeDeviceId, FakeLinkAddress, Frame)> {
            std::mem::take(&mut self.sent)
        }

        fn take_solicits(&mut self) -> Vec<(FakeDeviceId, u32, Option<FakeLinkAddress>)> {
            std::mem::take(&mut self.solicits)
        }
    }

    impl DeviceContext<FakeLinkDevice> for FakeCoreCtx {
        type DeviceId = FakeDeviceId;

        fn link_addr(&self, device: &FakeDeviceId) -> FakeLinkAddress {
            self.devices[device].link_addr
        }

        fn broadcast_addr(&self, _device: &FakeDeviceId) -> FakeLinkAddress {
            FAKE_BROADCAST_ADDR
        }

        fn capabilities(&self, device: &FakeDeviceId) -> DeviceCapabilities {
            self.devices[device].caps
        }

        fn mtu(&self, _device: &FakeDeviceId) -> u32 {
            1500
        }

        fn build_header(
            &self,
            device: &FakeDeviceId,
            dst: FakeLinkAddress,
        ) -> Option<HeaderTemplate> {
            let FakeDeviceState { link_addr: FakeLinkAddress([src]), caps } =
                &self.devices[device];
            let FakeLinkAddress([dst]) = dst;
            caps.has_header_cache.then(|| HeaderTemplate::new(&[dst, *src]))
        }

        fn transmit(
            &mut self,
            device: &FakeDeviceId,
            dst: FakeLinkAddress,
            frame: Frame,
        ) -> Result<(), TransmitError> {
            self.sent.push((*device, dst, frame));
            Ok(())
        }

        fn transmit_templated(
            &mut self,
            device: &FakeDeviceId,
            header: &HeaderTemplate,
            frame: Frame,
        ) -> Result<(), TransmitError> {
            self.sent_templated.push((*device, *header, frame));
            Ok(())
        }

        fn transmit_unaddressed(
            &mut self,
            device: &FakeDeviceId,
            frame: Frame,
        ) -> Result<(), TransmitError> {
            self.sent_unaddressed.push((*device, frame));
            Ok(())
        }
    }

    impl<BC> NeighborContext<FakeProtocol, FakeLinkDevice, BC> for FakeCoreCtx {
        fn send_solicitation(
            &mut self,
            _bindings_ctx: &mut BC,
            device: &FakeDeviceId,
            target: u32,
            remote_link_addr: Option<FakeLinkAddress>,
        ) {
            self.solicits.push((*device, target, remote_link_addr));
        }

        fn report_unreachable(
            &mut self,
            _bindings_ctx: &mut BC,
            device: &FakeDeviceId,
            frame: Frame,
        ) {
            self.unreachable.push((*device, frame));
        }

        fn proxy_redo(&mut self, _bindings_ctx: &mut BC, device: &FakeDeviceId, request: u8) {
            self.proxy_redone.push((*device, request));
        }
    }

    type FakeTimerId = TableTimerId<u32, FakeDeviceId>;
    type FakeEvent = Event<FakeLinkAddress, u32, FakeDeviceId, FakeInstant>;
    type FakeBindings = FakeBindingsCtx<FakeTimerId, FakeEvent>;
    type FakeTable = NeighborTable<FakeProtocol, FakeLinkDevice, FakeDeviceId, FakeInstant>;

    const DEVICE: FakeDeviceId = FakeDeviceId(1);
    const DEV_LINK_ADDR: FakeLinkAddress = FakeLinkAddress([0xd0]);
    const ADDR1: u32 = 1;
    const ADDR2: u32 = 2;
    const LINK_ADDR1: FakeLinkAddress = FakeLinkAddress([1]);
    const LINK_ADDR2: FakeLinkAddress = FakeLinkAddress([2]);

    const GENERIC_CAPS: DeviceCapabilities = DeviceCapabilities {
        can_resolve: true,
        has_header_cache: false,
        needs_header_rebuild: false,
        is_loopback: false,
        is_point_to_point: false,
    };

    fn neighbor_timer(addr: u32) -> FakeTimerId {
        TableTimerId::Neighbor { device: DEVICE, addr }
    }

    fn frame(body: u8) -> Frame {
        Frame::new(vec![body])
    }

    fn new_context() -> (FakeTable, FakeCoreCtx, FakeBindings) {
        new_context_with_caps(GENERIC_CAPS, TableConfig::default())
    }

    fn new_context_with_caps(
        caps: DeviceCapabilities,
        config: TableConfig,
    ) -> (FakeTable, FakeCoreCtx, FakeBindings) {
        let mut bindings_ctx = FakeBindings::default();
        let table = FakeTable::new(&mut bindings_ctx, config);
        let mut core_ctx = FakeCoreCtx::default();
        core_ctx.add_device(DEVICE, caps);
        (table, core_ctx, bindings_ctx)
    }

    fn trigger_next(
        table: &FakeTable,
        core_ctx: &mut FakeCoreCtx,
        bindings_ctx: &mut FakeBindings,
    ) -> Option<FakeTimerId> {
        bindings_ctx.trigger_next_timer(|bindings_ctx, id| {
            table.handle_timer(core_ctx, bindings_ctx, id)
        })
    }

    fn trigger_for(
        table: &FakeTable,
        core_ctx: &mut FakeCoreCtx,
        bindings_ctx: &mut FakeBindings,
        duration: Duration,
    ) -> Vec<FakeTimerId> {
        bindings_ctx.trigger_timers_for(duration, |bindings_ctx, id| {
            table.handle_timer(core_ctx, bindings_ctx, id)
        })
    }

    /// Installs a reachable neighbour by driving a full cold resolution.
    fn init_reachable_neighbor(
        table: &FakeTable,
        core_ctx: &mut FakeCoreCtx,
        bindings_ctx: &mut FakeBindings,
        addr: u32,
        link_addr: FakeLinkAddress,
    ) -> NeighborRef<FakeProtocol, FakeLinkDevice, FakeDeviceId, FakeInstant> {
        let entry = table
            .create(core_ctx, bindings_ctx, addr, DEVICE)
            .expect("create neighbour");
        table
            .update(
                core_ctx,
                bindings_ctx,
                &entry,
                Some(link_addr),
                NeighborState::Reachable,
                UpdateFlags::default(),
            )
            .expect("install binding");
        assert_eq!(entry.state(), NeighborState::Reachable);
        entry
    }

    /// Installs a stale neighbour, as inbound learning from a probe would.
    fn init_stale_neighbor(
        table: &FakeTable,
        core_ctx: &mut FakeCoreCtx,
        bindings_ctx: &mut FakeBindings,
        addr: u32,
        link_addr: FakeLinkAddress,
    ) -> NeighborRef<FakeProtocol, FakeLinkDevice, FakeDeviceId, FakeInstant> {
        let entry = table
            .create(core_ctx, bindings_ctx, addr, DEVICE)
            .expect("create neighbour");
        table
            .update(
                core_ctx,
                bindings_ctx,
                &entry,
                Some(link_addr),
                NeighborState::Stale,
                UpdateFlags::default(),
            )
            .expect("install binding");
        assert_eq!(entry.state(), NeighborState::Stale);
        entry
    }

    #[test]
    fn create_then_lookup_returns_same_entry() {
        let (table, mut core_ctx, mut bindings_ctx) = new_context();
        let created = table
            .create(&mut core_ctx, &mut bindings_ctx, ADDR1, DEVICE)
            .expect("create neighbour");
        assert_eq!(created.state(), NeighborState::None);
        let found = table.lookup(&ADDR1, &DEVICE).expect("lookup after create");
        assert!(Strong::ptr_eq(&created, &found));
        assert_eq!(table.counters().lookups.get(), 1);
        assert_eq!(table.counters().hits.get(), 1);
        assert_eq!(table.counters().allocs.get(), 1);
        assert_eq!(
            bindings_ctx.take_events(),
            [Event::added(
                &DEVICE,
                EventState { state: NeighborState::None, link_addr: None },
                ADDR1,
                bindings_ctx.now(),
            )]
        );
    }

    #[test]
    fn create_racing_duplicate_returns_existing() {
        let (table, mut core_ctx, mut bindings_ctx) = new_context();
        let first = table
            .create(&mut core_ctx, &mut bindings_ctx, ADDR1, DEVICE)
            .expect("create neighbour");
        let second = table
            .create(&mut core_ctx, &mut bindings_ctx, ADDR1, DEVICE)
            .expect("create duplicate");
        assert!(Strong::ptr_eq(&first, &second));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn remove_then_lookup_returns_none() {
        let (table, mut core_ctx, mut bindings_ctx) = new_context();
        let entry = table
            .create(&mut core_ctx, &mut bindings_ctx, ADDR1, DEVICE)
            .expect("create neighbour");
        let _: Vec<_> = bindings_ctx.take_events();
        table.remove(&mut bindings_ctx, &ADDR1, &DEVICE).expect("remove");
        assert_matches!(table.lookup(&ADDR1, &DEVICE), None);
        assert_eq!(
            bindings_ctx.take_events(),
            [Event::removed(&DEVICE, ADDR1, bindings_ctx.now())]
        );
        assert_eq!(
            table.remove(&mut bindings_ctx, &ADDR1, &DEVICE),
            Err(NotFoundError)
        );
        // The detached entry is observable as dead through the reference we
        // still hold.
        assert!(entry.inner.lock().dead);
    }

    #[test]
    fn cold_resolve_success() {
        let (table, mut core_ctx, mut bindings_ctx) = new_context();
        let entry = table
            .create(&mut core_ctx, &mut bindings_ctx, ADDR1, DEVICE)
            .expect("create neighbour");
        assert_eq!(entry.state(), NeighborState::None);

        assert_eq!(
            table.resolve_and_send(&mut core_ctx, &mut bindings_ctx, &entry, frame(1)),
            TransmitDisposition::Queued
        );
        assert_eq!(entry.state(), NeighborState::Incomplete);
        assert_eq!(entry.queue_len(), 1);
        bindings_ctx.assert_timers_installed([
            (neighbor_timer(ADDR1), FakeInstant::from(FIRST_PROBE_DELAY)),
            (
                TableTimerId::PeriodicGc,
                FakeInstant::from(DEFAULT_BASE_REACHABLE_TIME.get() / 2),
            ),
        ]);

        // First timer tick transmits the first broadcast solicitation.
        assert_eq!(
            trigger_next(&table, &mut core_ctx, &mut bindings_ctx),
            Some(neighbor_timer(ADDR1))
        );
        assert_eq!(core_ctx.take_solicits(), [(DEVICE, ADDR1, None)]);
        assert_eq!(entry.inner.lock().probes, 1);

        // A solicited reply completes resolution and drains the queue.
        table
            .update(
                &mut core_ctx,
                &mut bindings_ctx,
                &entry,
                Some(LINK_ADDR1),
                NeighborState::Reachable,
                UpdateFlags::default(),
            )
            .expect("learn reply");
        assert_eq!(entry.state(), NeighborState::Reachable);
        assert_eq!(entry.link_addr(), Some(LINK_ADDR1));
        assert_eq!(entry.queue_len(), 0);
        assert_eq!(core_ctx.take_sent(), [(DEVICE, LINK_ADDR1, frame(1))]);

        let reachable_time = entry.parameters().get().reachable_time;
        bindings_ctx.assert_timers_installed([
            (neighbor_timer(ADDR1), bindings_ctx.now() + reachable_time.get()),
            (
                TableTimerId::PeriodicGc,
                FakeInstant::from(DEFAULT_BASE_REACHABLE_TIME.get() / 2),
            ),
        ]);
    }

    #[test]
    fn resolution_exhaustion_fails_and_reports() {
        let (table, mut core_ctx, mut bindings_ctx) = new_context();
        let entry = table
            .create(&mut core_ctx, &mut bindings_ctx, ADDR1, DEVICE)
            .expect("create neighbour");
        assert_eq!(
            table.resolve_and_send(&mut core_ctx, &mut bindings_ctx, &entry, frame(1)),
            TransmitDisposition::Queued
        );

        // Default budget is ucast + mcast + app = 3 + 3 + 0 probes, spaced
        // retrans_time apart; the tick after the last one gives up.
        let max_probes = {
            let parms = entry.parameters().get();
            parms.ucast_probes + parms.mcast_probes + parms.app_probes
        };
        assert_eq!(max_probes, 6);
        for _ in 0..max_probes {
            assert_eq!(
                trigger_next(&table, &mut core_ctx, &mut bindings_ctx),
                Some(neighbor_timer(ADDR1))
            );
        }
        assert_eq!(
            core_ctx.take_solicits(),
            vec![(DEVICE, ADDR1, None); usize::from(max_probes)]
        );
        assert_eq!(entry.state(), NeighborState::Incomplete);

        assert_eq!(
            trigger_next(&table, &mut core_ctx, &mut bindings_ctx),
            Some(neighbor_timer(ADDR1))
        );
        assert_eq!(entry.state(), NeighborState::Failed);
        assert_eq!(core_ctx.take_solicits(), []);
        assert_eq!(std::mem::take(&mut core_ctx.unreachable), [(DEVICE, frame(1))]);
        assert_eq!(table.counters().res_failed.get(), 1);
        bindings_ctx.assert_timers_installed([(
            TableTimerId::PeriodicGc,
            FakeInstant::from(DEFAULT_BASE_REACHABLE_TIME.get() / 2),
        )]);

        // Further transmits through the failed entry keep reporting.
        assert_eq!(
            table.resolve_and_send(&mut core_ctx, &mut bindings_ctx, &entry, frame(2)),
            TransmitDisposition::Failed
        );
        assert_eq!(std::mem::take(&mut core_ctx.unreachable), [(DEVICE, frame(2))]);
    }

    #[test]
    fn resolution_impossible_without_probe_budget() {
        let (table, mut core_ctx, mut bindings_ctx) = new_context();
        let _: NeighborParametersUpdate = table.update_parameters(
            Some(&DEVICE),
            NeighborParametersUpdate {
                mcast_probes: Some(0),
                app_probes: Some(0),
                ..Default::default()
            },
        );
        let entry = table
            .create(&mut core_ctx, &mut bindings_ctx, ADDR1, DEVICE)
            .expect("create neighbour");
        assert_eq!(
            table.resolve_and_send(&mut core_ctx, &mut bindings_ctx, &entry, frame(1)),
            TransmitDisposition::Failed
        );
        assert_eq!(entry.state(), NeighborState::Failed);
        assert_eq!(std::mem::take(&mut core_ctx.unreachable), [(DEVICE, frame(1))]);
    }

    #[test]
    fn queue_bounded_with_oldest_dropped() {
        let (table, mut core_ctx, mut bindings_ctx) = new_context();
        let entry = table
            .create(&mut core_ctx, &mut bindings_ctx, ADDR1, DEVICE)
            .expect("create neighbour");
        let queue_len = entry.parameters().get().queue_len;
        assert_eq!(queue_len, 3);

        for i in 0..=queue_len {
            assert_eq!(
                table.resolve_and_send(
                    &mut core_ctx,
                    &mut bindings_ctx,
                    &entry,
                    frame(i as u8),
                ),
                TransmitDisposition::Queued
            );
        }
        assert_eq!(entry.queue_len(), queue_len);
        assert_eq!(table.counters().unresolved_discards.get(), 1);

        // Completion drains the survivors in order; frame 0 was evicted.
        table
            .update(
                &mut core_ctx,
                &mut bindings_ctx,
                &entry,
                Some(LINK_ADDR1),
                NeighborState::Reachable,
                UpdateFlags::default(),
            )
            .expect("learn reply");
        assert_eq!(
            core_ctx.take_sent(),
            [
                (DEVICE, LINK_ADDR1, frame(1)),
                (DEVICE, LINK_ADDR1, frame(2)),
                (DEVICE, LINK_ADDR1, frame(3)),
            ]
        );
    }

    #[test]
    fn reachable_ages_to_stale_then_delay_on_use() {
        let (table, mut core_ctx, mut bindings_ctx) = new_context();
        let entry =
            init_reachable_neighbor(&table, &mut core_ctx, &mut bindings_ctx, ADDR1, LINK_ADDR1);
        let parms = entry.parameters().get();

        // No traffic and no confirmations: the reachable timer expires into
        // Stale with no rearm.
        let fired = trigger_for(
            &table,
            &mut core_ctx,
            &mut bindings_ctx,
            parms.reachable_time.get(),
        );
        assert!(fired.contains(&neighbor_timer(ADDR1)), "fired: {fired:?}");
        assert_eq!(entry.state(), NeighborState::Stale);
        assert_eq!(bindings_ctx.scheduled_instant(neighbor_timer(ADDR1)), None);

        // Using the stale entry transmits immediately and enters Delay.
        assert_eq!(
            table.resolve_and_send(&mut core_ctx, &mut bindings_ctx, &entry, frame(7)),
            TransmitDisposition::Sent
        );
        assert_eq!(entry.state(), NeighborState::Delay);
        assert_eq!(core_ctx.take_sent(), [(DEVICE, LINK_ADDR1, frame(7))]);
        assert_eq!(
            bindings_ctx.scheduled_instant(neighbor_timer(ADDR1)),
            Some(bindings_ctx.now() + parms.delay_probe_time.get())
        );
    }

    #[test]
    fn delay_with_confirmation_returns_to_reachable() {
        let (table, mut core_ctx, mut bindings_ctx) = new_context();
        let entry =
            init_stale_neighbor(&table, &mut core_ctx, &mut bindings_ctx, ADDR1, LINK_ADDR1);
        assert_eq!(
            table.resolve_and_send(&mut core_ctx, &mut bindings_ctx, &entry, frame(1)),
            TransmitDisposition::Sent
        );
        assert_eq!(entry.state(), NeighborState::Delay);

        // An upper-layer confirmation promotes the entry without a single
        // probe being sent.
        bindings_ctx.sleep(Duration::from_secs(1));
        table.confirm(&mut bindings_ctx, &entry);
        assert_eq!(entry.state(), NeighborState::Reachable);
        assert_eq!(entry.confirmed_at(), bindings_ctx.now());
        assert_eq!(
            bindings_ctx.scheduled_instant(neighbor_timer(ADDR1)),
            Some(bindings_ctx.now() + entry.parameters().get().reachable_time.get())
        );
        assert_eq!(core_ctx.take_solicits(), []);
    }

    #[test]
    fn delay_without_confirmation_probes_then_fails() {
        let (table, mut core_ctx, mut bindings_ctx) = new_context();
        let entry =
            init_stale_neighbor(&table, &mut core_ctx, &mut bindings_ctx, ADDR1, LINK_ADDR1);
        assert_eq!(
            table.resolve_and_send(&mut core_ctx, &mut bindings_ctx, &entry, frame(1)),
            TransmitDisposition::Sent
        );
        let _: Vec<_> = core_ctx.take_sent();
        assert_eq!(entry.state(), NeighborState::Delay);

        let parms = entry.parameters().get();
        // Delay expires into Probe, which unicasts `ucast_probes`
        // solicitations at the cached address before giving up.
        let fired = trigger_for(
            &table,
            &mut core_ctx,
            &mut bindings_ctx,
            parms.delay_probe_time.get()
                + parms.retrans_time.get() * u32::from(parms.ucast_probes + 1),
        );
        assert!(fired.contains(&neighbor_timer(ADDR1)));
        assert_eq!(entry.state(), NeighborState::Failed);
        assert_eq!(
            core_ctx.take_solicits(),
            vec![(DEVICE, ADDR1, Some(LINK_ADDR1)); usize::from(parms.ucast_probes)]
        );
        assert_eq!(table.counters().res_failed.get(), 1);
    }

    #[test]
    fn confirmation_defers_failure() {
        // After confirm() at time T the entry cannot fail by timer before
        // the next full probe cycle.
        let (table, mut core_ctx, mut bindings_ctx) = new_context();
        let entry =
            init_stale_neighbor(&table, &mut core_ctx, &mut bindings_ctx, ADDR1, LINK_ADDR1);
        table.confirm(&mut bindings_ctx, &entry);
        assert_eq!(entry.state(), NeighborState::Reachable);

        let reachable_time = entry.parameters().get().reachable_time.get();
        let almost = reachable_time - Duration::from_millis(1);
        let fired = trigger_for(&table, &mut core_ctx, &mut bindings_ctx, almost);
        assert!(!fired.contains(&neighbor_timer(ADDR1)), "fired early: {fired:?}");
        assert_eq!(entry.state(), NeighborState::Reachable);
    }

    #[test]
    fn update_stale_then_confirm_is_reachable() {
        let (table, mut core_ctx, mut bindings_ctx) = new_context();
        let entry =
            init_stale_neighbor(&table, &mut core_ctx, &mut bindings_ctx, ADDR1, LINK_ADDR1);
        table.confirm(&mut bindings_ctx, &entry);
        assert_eq!(entry.state(), NeighborState::Reachable);
        assert_eq!(entry.confirmed_at(), bindings_ctx.now());
    }

    #[test_case(false; "plain update is ignored")]
    #[test_case(true; "weak override degrades to stale")]
    fn conflicting_address_against_connected_entry(weak_override: bool) {
        let (table, mut core_ctx, mut bindings_ctx) = new_context();
        let entry =
            init_reachable_neighbor(&table, &mut core_ctx, &mut bindings_ctx, ADDR1, LINK_ADDR1);

        table
            .update(
                &mut core_ctx,
                &mut bindings_ctx,
                &entry,
                Some(LINK_ADDR2),
                NeighborState::Reachable,
                UpdateFlags { admin: false, override_existing: false, weak_override },
            )
            .expect("update is not an error");

        // The conflicting address never wins without the override flag.
        assert_eq!(entry.link_addr(), Some(LINK_ADDR1));
        let expected = if weak_override {
            NeighborState::Stale
        } else {
            NeighborState::Reachable
        };
        assert_eq!(entry.state(), expected);
    }

    #[test]
    fn same_address_stale_does_not_downgrade_connected() {
        let (table, mut core_ctx, mut bindings_ctx) = new_context();
        let entry =
            init_reachable_neighbor(&table, &mut core_ctx, &mut bindings_ctx, ADDR1, LINK_ADDR1);
        table
            .update(
                &mut core_ctx,
                &mut bindings_ctx,
                &entry,
                Some(LINK_ADDR1),
                NeighborState::Stale,
                UpdateFlags::default(),
            )
            .expect("update");
        assert_eq!(entry.state(), NeighborState::Reachable);
    }

    #[test]
    fn override_replaces_binding() {
        let (table, mut core_ctx, mut bindings_ctx) = new_context();
        let entry =
            init_reachable_neighbor(&table, &mut core_ctx, &mut bindings_ctx, ADDR1, LINK_ADDR1);
        table
            .update(
                &mut core_ctx,
                &mut bindings_ctx,
                &entry,
                Some(LINK_ADDR2),
                NeighborState::Reachable,
                UpdateFlags { admin: false, override_existing: true, weak_override: false },
            )
            .expect("update");
        assert_eq!(entry.link_addr(), Some(LINK_ADDR2));
        assert_eq!(entry.state(), NeighborState::Reachable);
    }

    #[test]
    fn permanent_entry_refuses_dynamic_updates() {
        let (table, mut core_ctx, mut bindings_ctx) = new_context();
        let entry = table
            .create(&mut core_ctx, &mut bindings_ctx, ADDR1, DEVICE)
            .expect("create neighbour");
        table
            .update(
                &mut core_ctx,
                &mut bindings_ctx,
                &entry,
                Some(LINK_ADDR1),
                NeighborState::Permanent,
                UpdateFlags::ADMIN_REPLACE,
            )
            .expect("pin entry");

        assert_eq!(
            table.update(
                &mut core_ctx,
                &mut bindings_ctx,
                &entry,
                Some(LINK_ADDR2),
                NeighborState::Reachable,
                UpdateFlags::default(),
            ),
            Err(UpdateError::NotPermitted)
        );
        assert_eq!(entry.link_addr(), Some(LINK_ADDR1));

        // Administrative updates still go through.
        table
            .update(
                &mut core_ctx,
                &mut bindings_ctx,
                &entry,
                Some(LINK_ADDR2),
                NeighborState::Permanent,
                UpdateFlags::ADMIN_REPLACE,
            )
            .expect("admin replace");
        assert_eq!(entry.link_addr(), Some(LINK_ADDR2));
    }

    #[test]
    fn admin_invalidation_reports_queued_frames() {
        let (table, mut core_ctx, mut bindings_ctx) = new_context();
        let entry = table
            .create(&mut core_ctx, &mut bindings_ctx, ADDR1, DEVICE)
            .expect("create neighbour");
        assert_eq!(
            table.resolve_and_send(&mut core_ctx, &mut bindings_ctx, &entry, frame(1)),
            TransmitDisposition::Queued
        );
        table
            .update(
                &mut core_ctx,
                &mut bindings_ctx,
                &entry,
                None,
                NeighborState::Failed,
                UpdateFlags::ADMIN_REPLACE,
            )
            .expect("invalidate");
        assert_eq!(entry.state(), NeighborState::Failed);
        assert_eq!(std::mem::take(&mut core_ctx.unreachable), [(DEVICE, frame(1))]);
        assert_eq!(bindings_ctx.scheduled_instant(neighbor_timer(ADDR1)), None);
    }

    #[test]
    fn forced_shrink_frees_unreferenced_entries() {
        let config = TableConfig {
            gc_thresh1: 2,
            gc_thresh2: 3,
            gc_thresh3: 4,
            accept_unsolicited: false,
        };
        let (table, mut core_ctx, mut bindings_ctx) = new_context_with_caps(GENERIC_CAPS, config);

        for addr in 0..4 {
            let entry = table
                .create(&mut core_ctx, &mut bindings_ctx, addr, DEVICE)
                .expect("create under threshold");
            drop(entry);
        }
        assert_eq!(table.len(), 4);

        // The fifth insert is over gc_thresh3; the forced shrink frees the
        // unreferenced entries and the insert succeeds.
        let entry = table
            .create(&mut core_ctx, &mut bindings_ctx, 100, DEVICE)
            .expect("create after shrink");
        assert_eq!(table.counters().forced_gc_runs.get(), 1);
        assert_eq!(table.len(), 1);
        drop(entry);

        // Raise every refcount and retry: nothing can be freed, so the
        // insert that lands over the cap is refused.
        let held: Vec<_> = (200..204)
            .map(|addr| {
                table
                    .create(&mut core_ctx, &mut bindings_ctx, addr, DEVICE)
                    .expect("create held entries")
            })
            .collect();
        assert_eq!(table.len(), 4);
        assert_eq!(
            table.create(&mut core_ctx, &mut bindings_ctx, 300, DEVICE),
            Err(CreateError::TableFull)
        );
        drop(held);
    }

    #[test]
    fn forced_shrink_retains_permanent_entries() {
        let config = TableConfig {
            gc_thresh1: 1,
            gc_thresh2: 2,
            gc_thresh3: 3,
            accept_unsolicited: false,
        };
        let (table, mut core_ctx, mut bindings_ctx) = new_context_with_caps(GENERIC_CAPS, config);
        let entry = table
            .create(&mut core_ctx, &mut bindings_ctx, ADDR1, DEVICE)
            .expect("create neighbour");
        table
            .update(
                &mut core_ctx,
                &mut bindings_ctx,
                &entry,
                Some(LINK_ADDR1),
                NeighborState::Permanent,
                UpdateFlags::ADMIN_REPLACE,
            )
            .expect("pin entry");
        drop(entry);
        for addr in 10..12 {
            drop(table.create(&mut core_ctx, &mut bindings_ctx, addr, DEVICE).expect("fill"));
        }

        let _ = table
            .create(&mut core_ctx, &mut bindings_ctx, 100, DEVICE)
            .expect("create after shrink");
        // The permanent entry survived the shrink.
        assert_matches!(table.lookup(&ADDR1, &DEVICE), Some(_));
    }

    #[test]
    fn periodic_sweep_collects_idle_entries() {
        let (table, mut core_ctx, mut bindings_ctx) = new_context();
        let stale =
            init_stale_neighbor(&table, &mut core_ctx, &mut bindings_ctx, ADDR1, LINK_ADDR1);
        let held =
            init_stale_neighbor(&table, &mut core_ctx, &mut bindings_ctx, ADDR2, LINK_ADDR2);
        let staletime = stale.parameters().get().gc_staletime.get();
        drop(stale);

        // Sweep past the idle threshold: the unreferenced stale entry goes,
        // the referenced one stays.
        let _: Vec<_> = trigger_for(
            &table,
            &mut core_ctx,
            &mut bindings_ctx,
            staletime + DEFAULT_BASE_REACHABLE_TIME.get(),
        );
        assert_matches!(table.lookup(&ADDR1, &DEVICE), None);
        assert_matches!(table.lookup(&ADDR2, &DEVICE), Some(_));
        assert!(table.counters().periodic_gc_runs.get() > 0);
        drop(held);
    }

    #[test]
    fn periodic_sweep_collects_failed_entries() {
        let (table, mut core_ctx, mut bindings_ctx) = new_context();
        let entry = table
            .create(&mut core_ctx, &mut bindings_ctx, ADDR1, DEVICE)
            .expect("create neighbour");
        assert_eq!(
            table.resolve_and_send(&mut core_ctx, &mut bindings_ctx, &entry, frame(1)),
            TransmitDisposition::Queued
        );
        drop(entry);
        // Resolution fails after the probe budget, then the next sweep
        // collects the failed entry well before gc_staletime.
        let _: Vec<_> = trigger_for(
            &table,
            &mut core_ctx,
            &mut bindings_ctx,
            DEFAULT_BASE_REACHABLE_TIME.get(),
        );
        assert_matches!(table.lookup(&ADDR1, &DEVICE), None);
        assert_eq!(table.counters().res_failed.get(), 1);
    }

    #[test]
    fn periodic_sweep_resamples_reachable_time() {
        let (table, mut core_ctx, mut bindings_ctx) = new_context();
        let parms = table.device_parameters(&DEVICE);
        let base = parms.get().base_reachable_time.get();
        let mut seen = std::collections::HashSet::new();
        // Resampling happens every 300s; collect a few samples and check
        // they stay inside [base/2, 3*base/2).
        for _ in 0..4 {
            let _: Vec<_> = trigger_for(
                &table,
                &mut core_ctx,
                &mut bindings_ctx,
                REACHABLE_TIME_RESAMPLE_INTERVAL,
            );
            let reachable = parms.get().reachable_time.get();
            assert!(reachable >= base / 2 && reachable < base * 3 / 2, "{reachable:?}");
            let _: bool = seen.insert(reachable);
        }
        assert!(seen.len() > 1, "reachable_time was never resampled");
    }

    #[test]
    fn bucket_array_doubles_under_load() {
        let (table, mut core_ctx, mut bindings_ctx) = new_context();
        let held: Vec<_> = (0..INITIAL_BUCKET_COUNT as u32 + 1)
            .map(|addr| {
                table
                    .create(&mut core_ctx, &mut bindings_ctx, addr, DEVICE)
                    .expect("create neighbour")
            })
            .collect();
        assert!(table.counters().hash_grows.get() >= 1);
        // Every entry is still reachable through the rehashed buckets.
        for (addr, held) in held.iter().enumerate() {
            let found = table.lookup(&(addr as u32), &DEVICE).expect("lookup after grow");
            assert!(Strong::ptr_eq(held, &found));
        }
    }

    #[test]
    fn interface_down_blackholes_detached_entries() {
        let other_device = FakeDeviceId(2);
        let (table, mut core_ctx, mut bindings_ctx) = new_context();
        core_ctx.add_device(other_device, GENERIC_CAPS);

        let entry =
            init_reachable_neighbor(&table, &mut core_ctx, &mut bindings_ctx, ADDR1, LINK_ADDR1);
        let unrelated = table
            .create(&mut core_ctx, &mut bindings_ctx, ADDR2, other_device)
            .expect("create on other device");

        table.on_interface_down(&mut bindings_ctx, &DEVICE);

        // The entry is detached from the table but survives through our
        // reference, valid state degraded to Noarp with a black-hole
        // output.
        assert_matches!(table.lookup(&ADDR1, &DEVICE), None);
        assert_eq!(entry.state(), NeighborState::Noarp);
        assert_eq!(
            table.resolve_and_send(&mut core_ctx, &mut bindings_ctx, &entry, frame(1)),
            TransmitDisposition::Failed
        );
        assert_eq!(core_ctx.take_sent(), []);
        assert_eq!(bindings_ctx.scheduled_instant(neighbor_timer(ADDR1)), None);

        // No new entries may be created against the dead interface.
        assert_eq!(
            table.create(&mut core_ctx, &mut bindings_ctx, 50, DEVICE),
            Err(CreateError::ParametersDead)
        );

        // The other interface is untouched.
        assert_matches!(table.lookup(&ADDR2, &other_device), Some(_));
        drop(unrelated);
    }

    #[test]
    fn noarp_entries_bypass_resolution() {
        let caps = DeviceCapabilities {
            can_resolve: false,
            has_header_cache: false,
            needs_header_rebuild: false,
            is_loopback: false,
            is_point_to_point: false,
        };
        let (table, mut core_ctx, mut bindings_ctx) =
            new_context_with_caps(caps, TableConfig::default());
        let entry = table
            .create(&mut core_ctx, &mut bindings_ctx, ADDR1, DEVICE)
            .expect("create neighbour");
        assert_eq!(entry.state(), NeighborState::Noarp);
        assert_eq!(entry.variant(), OutputVariant::Direct);
        assert_eq!(
            table.resolve_and_send(&mut core_ctx, &mut bindings_ctx, &entry, frame(1)),
            TransmitDisposition::Sent
        );
        assert_eq!(std::mem::take(&mut core_ctx.sent_unaddressed), [(DEVICE, frame(1))]);
        assert_eq!(core_ctx.take_solicits(), []);
    }

    #[test]
    fn header_template_built_lazily_and_rewritten_on_address_change() {
        let caps = DeviceCapabilities { has_header_cache: true, ..GENERIC_CAPS };
        let (table, mut core_ctx, mut bindings_ctx) =
            new_context_with_caps(caps, TableConfig::default());
        let entry =
            init_reachable_neighbor(&table, &mut core_ctx, &mut bindings_ctx, ADDR1, LINK_ADDR1);
        assert_eq!(entry.variant(), OutputVariant::HeaderCache);
        assert_eq!(entry.cached_header(), None);

        // The first connected transmit builds and links the template.
        assert_eq!(
            table.resolve_and_send(&mut core_ctx, &mut bindings_ctx, &entry, frame(1)),
            TransmitDisposition::Sent
        );
        let template = entry.cached_header().expect("template built on first transmit");
        assert_eq!(template.bytes(), &[LINK_ADDR1.0[0], DEV_LINK_ADDR.0[0]]);
        assert_eq!(
            std::mem::take(&mut core_ctx.sent_templated),
            [(DEVICE, template, frame(1))]
        );

        // Subsequent transmits reuse it.
        assert_eq!(
            table.resolve_and_send(&mut core_ctx, &mut bindings_ctx, &entry, frame(2)),
            TransmitDisposition::Sent
        );
        assert_eq!(
            std::mem::take(&mut core_ctx.sent_templated),
            [(DEVICE, template, frame(2))]
        );

        // A binding change rewrites the linked template.
        table
            .update(
                &mut core_ctx,
                &mut bindings_ctx,
                &entry,
                Some(LINK_ADDR2),
                NeighborState::Reachable,
                UpdateFlags { admin: false, override_existing: true, weak_override: false },
            )
            .expect("override binding");
        let rewritten = entry.cached_header().expect("template survives override");
        assert_eq!(rewritten.bytes(), &[LINK_ADDR2.0[0], DEV_LINK_ADDR.0[0]]);
    }

    #[test]
    fn lifecycle_events() {
        let (table, mut core_ctx, mut bindings_ctx) = new_context();
        let entry = table
            .create(&mut core_ctx, &mut bindings_ctx, ADDR1, DEVICE)
            .expect("create neighbour");
        table
            .update(
                &mut core_ctx,
                &mut bindings_ctx,
                &entry,
                Some(LINK_ADDR1),
                NeighborState::Stale,
                UpdateFlags::default(),
            )
            .expect("learn");
        table.remove(&mut bindings_ctx, &ADDR1, &DEVICE).expect("remove");

        let now = bindings_ctx.now();
        assert_eq!(
            bindings_ctx.take_events(),
            [
                Event::added(
                    &DEVICE,
                    EventState { state: NeighborState::None, link_addr: None },
                    ADDR1,
                    now,
                ),
                Event::changed(
                    &DEVICE,
                    EventState { state: NeighborState::Stale, link_addr: Some(LINK_ADDR1) },
                    ADDR1,
                    now,
                ),
                Event::removed(&DEVICE, ADDR1, now),
            ]
        );
    }

    #[test]
    fn visit_entries_snapshots_the_table() {
        let (table, mut core_ctx, mut bindings_ctx) = new_context();
        let _e1 =
            init_reachable_neighbor(&table, &mut core_ctx, &mut bindings_ctx, ADDR1, LINK_ADDR1);
        let _e2 =
            init_stale_neighbor(&table, &mut core_ctx, &mut bindings_ctx, ADDR2, LINK_ADDR2);
        let mut seen = Vec::new();
        table.visit_entries(|snapshot| seen.push((snapshot.addr, snapshot.state)));
        seen.sort_by_key(|(addr, _)| *addr);
        assert_eq!(
            seen,
            [(ADDR1, NeighborState::Reachable), (ADDR2, NeighborState::Stale)]
        );
    }
}

//! Event routing
//!
//! The router owns the live producer -> consumer connection graph and the
//! non-critical event queues. Connections are weak edges: the router never
//! extends a consumer's lifetime, and an edge whose consumer has been dropped
//! is discovered lazily and pruned on the next cache rebuild - no explicit
//! unregister required.
//!
//! Dispatch is two-speed. CRITICAL events bypass batching entirely: the
//! router resolves live consumers immediately and submits one CRITICAL
//! scheduler task per consumer. Everything else queues per-priority and is
//! drained by a dedicated flush thread that wakes on a short fixed interval
//! or when a queue crosses the batch threshold, whichever comes first.
//!
//! The connection graph is mutated only under the edge lock; the derived
//! source -> consumers cache is read without it and rebuilt opportunistically
//! when marked stale. A benign race costs an extra rebuild, never corrupt
//! state - rebuild is idempotent. Statistics live under their own lock so
//! monitoring never blocks dispatch.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::event::{Event, Payload, Priority, PriorityPolicy, SourceId};
use crate::modes::compatible;
use crate::module::{Consumer, EventSink, Module};
use crate::scheduler::Scheduler;

/// Weight of the newest sample in the rolling latency average
const LATENCY_EWMA_ALPHA: f64 = 0.1;

struct Edge {
    source: SourceId,
    consumer: Weak<dyn Consumer>,
}

struct BatchLanes {
    queues: [VecDeque<Arc<Event>>; 4],
    stop: bool,
}

#[derive(Default)]
struct StatsInner {
    routed: u64,
    dropped: u64,
    latency_ewma_us: f64,
    connections: usize,
}

impl StatsInner {
    fn record_routed(&mut self, latency_us: f64) {
        self.routed += 1;
        if self.routed == 1 {
            self.latency_ewma_us = latency_us;
        } else {
            self.latency_ewma_us =
                LATENCY_EWMA_ALPHA * latency_us + (1.0 - LATENCY_EWMA_ALPHA) * self.latency_ewma_us;
        }
    }
}

/// Read-only routing statistics for external monitoring
#[derive(Debug, Clone, Default, Serialize)]
pub struct RouterStats {
    pub routed: u64,
    pub dropped: u64,
    pub avg_latency_us: f64,
    pub connections: usize,
    /// Batch queue depth per priority lane (critical lane is always empty)
    pub depth: [usize; 4],
}

struct RouterInner {
    scheduler: Arc<Scheduler>,
    policy: PriorityPolicy,
    batch_threshold: usize,
    edges: Mutex<Vec<Edge>>,
    cache: RwLock<HashMap<SourceId, Vec<Weak<dyn Consumer>>>>,
    cache_stale: AtomicBool,
    batches: Mutex<BatchLanes>,
    flush_wakeup: Condvar,
    stats: Mutex<StatsInner>,
}

/// The connection graph and dispatch engine
pub struct EventRouter {
    inner: Arc<RouterInner>,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

impl EventRouter {
    pub fn new(
        scheduler: Arc<Scheduler>,
        config: &limeconf::RouterConfig,
        policy: PriorityPolicy,
    ) -> Self {
        let inner = Arc::new(RouterInner {
            scheduler,
            policy,
            batch_threshold: config.batch_threshold.max(1),
            edges: Mutex::new(Vec::new()),
            cache: RwLock::new(HashMap::new()),
            cache_stale: AtomicBool::new(true),
            batches: Mutex::new(BatchLanes {
                queues: Default::default(),
                stop: false,
            }),
            flush_wakeup: Condvar::new(),
            stats: Mutex::new(StatsInner::default()),
        });

        let flusher = {
            let inner = inner.clone();
            let interval = Duration::from_micros(config.flush_interval_us.max(1));
            thread::Builder::new()
                .name("router-flush".into())
                .spawn(move || flush_loop(inner, interval))
                .expect("failed to spawn router flush thread")
        };

        info!(
            batch_threshold = config.batch_threshold,
            flush_interval_us = config.flush_interval_us,
            "event router started"
        );

        Self {
            inner,
            flusher: Mutex::new(Some(flusher)),
        }
    }

    /// Connect `producer` to `consumer`.
    ///
    /// Fails (returning `false`, with no side effects) when the consumer
    /// module has no event-handling surface or the classifications are
    /// incompatible. On success the producer's classification is pushed into
    /// the consumer and a weak edge is recorded.
    pub fn connect(&self, producer: &Arc<dyn Module>, consumer: &Arc<dyn Module>) -> bool {
        let Some(surface) = consumer.clone().as_consumer() else {
            debug!(
                producer = producer.name(),
                consumer = consumer.name(),
                "connect refused: module handles no events"
            );
            return false;
        };
        if !compatible(producer.classification(), consumer.classification()) {
            debug!(
                producer = producer.name(),
                consumer = consumer.name(),
                "connect refused: incompatible classifications"
            );
            return false;
        }

        consumer.set_input_classification(producer.classification());

        let source = SourceId::new(producer.name());
        self.inner.edges.lock().unwrap().push(Edge {
            source: source.clone(),
            consumer: Arc::downgrade(&surface),
        });
        self.inner.cache_stale.store(true, Ordering::Release);
        debug!(producer = producer.name(), consumer = consumer.name(), "connected");
        true
    }

    /// Remove the edge between `producer` and `consumer`. Returns whether an
    /// edge was actually removed.
    pub fn disconnect(&self, producer: &Arc<dyn Module>, consumer: &Arc<dyn Module>) -> bool {
        let Some(surface) = consumer.clone().as_consumer() else {
            return false;
        };
        let probe = Arc::downgrade(&surface);
        let source = SourceId::new(producer.name());

        let mut edges = self.inner.edges.lock().unwrap();
        let before = edges.len();
        edges.retain(|edge| !(edge.source == source && Weak::ptr_eq(&edge.consumer, &probe)));
        let removed = edges.len() < before;
        drop(edges);

        if removed {
            self.inner.cache_stale.store(true, Ordering::Release);
        }
        removed
    }

    /// Route one event from `source`.
    ///
    /// Priority comes from the payload's content tag. CRITICAL dispatches
    /// immediately; everything else waits for the next batch flush.
    pub fn route(&self, source: &SourceId, payload: Payload) {
        let priority = self.inner.policy.classify(&payload);
        let event = Arc::new(Event::new(source.clone(), priority, payload));

        if priority == Priority::Critical {
            dispatch_to_consumers(&self.inner, vec![event]);
            return;
        }

        let mut lanes = self.inner.batches.lock().unwrap();
        if lanes.stop {
            warn!(source = %source, "event routed after shutdown; dropped");
            self.inner.stats.lock().unwrap().dropped += 1;
            return;
        }
        lanes.queues[priority.lane()].push_back(event);
        let over = lanes.queues[priority.lane()].len() >= self.inner.batch_threshold;
        drop(lanes);
        if over {
            self.inner.flush_wakeup.notify_one();
        }
    }

    /// An [`EventSink`] producers can emit through, named after `source`
    pub fn sink_for(self: &Arc<Self>, source: SourceId) -> EventSink {
        let router = self.clone();
        EventSink::new(
            source,
            Arc::new(move |src: &SourceId, payload: Payload| {
                router.route(src, payload);
            }),
        )
    }

    pub fn stats(&self) -> RouterStats {
        let mut depth = [0usize; 4];
        {
            let lanes = self.inner.batches.lock().unwrap();
            for (i, queue) in lanes.queues.iter().enumerate() {
                depth[i] = queue.len();
            }
        }
        let stats = self.inner.stats.lock().unwrap();
        RouterStats {
            routed: stats.routed,
            dropped: stats.dropped,
            avg_latency_us: stats.latency_ewma_us,
            connections: stats.connections,
            depth,
        }
    }

    /// Number of live connections after pruning stale edges
    pub fn live_connections(&self) -> usize {
        rebuild_cache(&self.inner);
        self.inner.stats.lock().unwrap().connections
    }

    /// Final flush, then stop and join the flush thread
    pub fn shutdown(&self) {
        {
            let mut lanes = self.inner.batches.lock().unwrap();
            if lanes.stop {
                return;
            }
            lanes.stop = true;
        }
        self.inner.flush_wakeup.notify_all();
        if let Some(handle) = self.flusher.lock().unwrap().take() {
            let _ = handle.join();
        }
        info!("event router stopped");
    }
}

impl Drop for EventRouter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Resolve the live consumers for `source`, rebuilding the cache if stale
fn resolve(inner: &RouterInner, source: &SourceId) -> Vec<Arc<dyn Consumer>> {
    if inner.cache_stale.swap(false, Ordering::AcqRel) {
        rebuild_cache(inner);
    }

    let cache = inner.cache.read().unwrap();
    let Some(weaks) = cache.get(source) else {
        return Vec::new();
    };

    let mut live = Vec::with_capacity(weaks.len());
    let mut saw_dead = false;
    for weak in weaks {
        match weak.upgrade() {
            Some(consumer) => live.push(consumer),
            None => saw_dead = true,
        }
    }
    drop(cache);

    if saw_dead {
        // Dead edges get removed permanently on the next rebuild
        inner.cache_stale.store(true, Ordering::Release);
    }
    live
}

/// Drop dead edges and rebuild the source -> consumers map. Idempotent.
fn rebuild_cache(inner: &RouterInner) {
    let mut edges = inner.edges.lock().unwrap();
    let before = edges.len();
    edges.retain(|edge| edge.consumer.strong_count() > 0);
    let pruned = before - edges.len();

    let mut map: HashMap<SourceId, Vec<Weak<dyn Consumer>>> = HashMap::new();
    for edge in edges.iter() {
        map.entry(edge.source.clone())
            .or_default()
            .push(edge.consumer.clone());
    }
    let live = edges.len();
    drop(edges);

    *inner.cache.write().unwrap() = map;
    inner.stats.lock().unwrap().connections = live;
    if pruned > 0 {
        debug!(pruned, live, "stale connections pruned");
    }
}

/// Submit one scheduler task per (consumer, event) pair.
///
/// Events with no live consumers are counted as drops - that is routine,
/// not an error.
fn dispatch_to_consumers(inner: &RouterInner, events: Vec<Arc<Event>>) {
    // Group by source so each source costs one cache lookup
    let mut order: Vec<SourceId> = Vec::new();
    let mut groups: HashMap<SourceId, Vec<Arc<Event>>> = HashMap::new();
    for event in events {
        let source = event.source.clone();
        if !groups.contains_key(&source) {
            order.push(source.clone());
        }
        groups.entry(source).or_default().push(event);
    }

    for source in order {
        let events = groups.remove(&source).unwrap_or_default();
        let consumers = resolve(inner, &source);
        if consumers.is_empty() {
            let dropped = events.len() as u64;
            inner.stats.lock().unwrap().dropped += dropped;
            debug!(source = %source, count = dropped, "events dropped: no live consumers");
            continue;
        }

        for event in events {
            let latency_us = event.created.elapsed().as_micros() as f64;
            inner.stats.lock().unwrap().record_routed(latency_us);
            for consumer in &consumers {
                let consumer = consumer.clone();
                let event = event.clone();
                inner.scheduler.submit(event.priority, move || {
                    consumer.handle_event(event)
                });
            }
        }
    }
}

fn flush_loop(inner: Arc<RouterInner>, interval: Duration) {
    loop {
        let (drained, stop) = {
            let mut lanes = inner.batches.lock().unwrap();
            let over = lanes
                .queues
                .iter()
                .any(|q| q.len() >= inner.batch_threshold);
            if !over && !lanes.stop {
                let (next, _) = inner.flush_wakeup.wait_timeout(lanes, interval).unwrap();
                lanes = next;
            }
            // Strict priority order: high drains before normal before low
            let mut drained = Vec::new();
            for queue in lanes.queues.iter_mut() {
                drained.extend(queue.drain(..));
            }
            (drained, lanes.stop)
        };

        if !drained.is_empty() {
            dispatch_to_consumers(&inner, drained);
        }
        if stop {
            break;
        }
    }
}

//! Throughput benchmarks for the buffered bridge.
//!
//! Measures raw buffer throughput (ArrayRing vs LinkedQueue), then the full
//! bridge with eager credit, batched credit across threads, and fused pull.
//!
//! Run with: cargo bench --bench throughput

use backpressure_bridge::{
    ArrayRing, BridgeConfig, BridgeError, BridgeSubscription, BufferedBridge, FusionMode,
    ItemQueue, LinkedQueue, Subscriber, Upstream, UNBOUNDED,
};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

const MSG_COUNT: u64 = 1_000_000;
const CREDIT_BATCH: u64 = 256;

struct Sink {
    received: Arc<AtomicU64>,
    initial: u64,
    fused: bool,
    subscription: Option<BridgeSubscription<u64>>,
}

impl Subscriber<u64> for Sink {
    fn on_subscribe(&mut self, subscription: BridgeSubscription<u64>) {
        if self.fused {
            subscription.negotiate(FusionMode::Async);
        }
        if self.initial > 0 {
            subscription.request(self.initial);
        }
        self.subscription = Some(subscription);
    }

    fn on_item(&mut self, item: u64) {
        black_box(item);
        self.received.fetch_add(1, Ordering::Release);
    }

    fn on_available(&mut self) {
        if let Some(s) = &self.subscription {
            let mut n = 0;
            while let Some(item) = s.poll() {
                black_box(item);
                n += 1;
            }
            self.received.fetch_add(n, Ordering::Release);
        }
    }

    fn on_error(&mut self, error: BridgeError) {
        panic!("benchmark stream failed: {error}");
    }

    fn on_complete(&mut self) {}
}

struct Source;

impl Upstream for Source {
    fn request(&self, _n: u64) {}
    fn cancel(&self) {}
}

fn bridge(
    config: BridgeConfig,
    initial: u64,
    fused: bool,
) -> (Arc<BufferedBridge<u64>>, Arc<AtomicU64>) {
    let received = Arc::new(AtomicU64::new(0));
    let bridge = BufferedBridge::<u64>::new(
        config,
        Sink {
            received: Arc::clone(&received),
            initial,
            fused,
            subscription: None,
        },
    )
    .unwrap();
    bridge.on_subscribe(Arc::new(Source));
    (bridge, received)
}

// =============================================================================
// BUFFER BENCHMARKS (single thread, no bridge)
// =============================================================================

fn bench_queues(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue");
    group.throughput(Throughput::Elements(MSG_COUNT));

    group.bench_function("array_ring", |b| {
        let ring = ArrayRing::<u64>::new(1024).unwrap();
        b.iter(|| drive_queue(&ring));
    });

    group.bench_function("linked_queue", |b| {
        let queue = LinkedQueue::<u64>::new(32);
        b.iter(|| drive_queue(&queue));
    });

    group.finish();
}

fn drive_queue(queue: &dyn ItemQueue<u64>) -> u64 {
    let mut received = 0;
    let mut sent = 0;
    while received < MSG_COUNT {
        while sent < MSG_COUNT && queue.offer(black_box(sent)).is_ok() {
            sent += 1;
        }
        while let Some(v) = queue.poll() {
            black_box(v);
            received += 1;
        }
    }
    received
}

// =============================================================================
// BRIDGE BENCHMARKS
// =============================================================================

/// Unlimited credit: every push is delivered straight through.
fn bench_unbounded_credit(c: &mut Criterion) {
    let mut group = c.benchmark_group("bridge_single_thread");
    group.throughput(Throughput::Elements(MSG_COUNT));

    group.bench_function("unbounded_credit", |b| {
        b.iter(|| {
            let (bridge, received) = bridge(BridgeConfig::bounded(256), UNBOUNDED, false);
            for i in 0..MSG_COUNT {
                bridge.on_item(i);
            }
            bridge.on_complete();
            received.load(Ordering::Acquire)
        });
    });

    group.bench_function("fused_pull", |b| {
        b.iter(|| {
            let (bridge, received) = bridge(BridgeConfig::bounded(256), 0, true);
            for i in 0..MSG_COUNT {
                bridge.on_item(i);
            }
            bridge.on_complete();
            received.load(Ordering::Acquire)
        });
    });

    group.finish();
}

/// Producer and credit-granting consumer on separate threads.
fn bench_batched_credit(c: &mut Criterion) {
    let mut group = c.benchmark_group("bridge_two_threads");
    group.throughput(Throughput::Elements(MSG_COUNT));
    group.sample_size(20);

    group.bench_function("credit_batches", |b| {
        b.iter(|| {
            let (bridge, received) = bridge(BridgeConfig::unbounded(1024), 0, false);

            let producer = {
                let bridge = Arc::clone(&bridge);
                thread::spawn(move || {
                    for i in 0..MSG_COUNT {
                        bridge.on_item(i);
                    }
                    bridge.on_complete();
                })
            };

            let mut granted = 0;
            while granted < MSG_COUNT {
                // Keep one batch of credit outstanding
                if granted - received.load(Ordering::Acquire) < CREDIT_BATCH {
                    bridge.request(CREDIT_BATCH);
                    granted += CREDIT_BATCH;
                } else {
                    std::hint::spin_loop();
                }
            }

            producer.join().unwrap();
            received.load(Ordering::Acquire)
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_queues,
    bench_unbounded_credit,
    bench_batched_credit
);
criterion_main!(benches);

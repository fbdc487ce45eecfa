//! Multi-threaded stress tests: a producer, credit grants and cancellation
//! racing on real threads.

use backpressure_bridge::{
    BridgeConfig, BridgeError, BridgeSubscription, BufferedBridge, FusionMode, Subscriber,
    Upstream,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

const ITEMS: u64 = 20_000;

#[derive(Default)]
struct Shared {
    items: Mutex<Vec<u64>>,
    terminals: AtomicUsize,
    inside: AtomicBool,
}

impl Shared {
    /// Panics if two callbacks ever overlap.
    fn enter(&self) {
        assert!(
            !self.inside.swap(true, Ordering::SeqCst),
            "concurrent subscriber callbacks"
        );
    }

    fn exit(&self) {
        self.inside.store(false, Ordering::SeqCst);
    }
}

struct Consumer {
    shared: Arc<Shared>,
    fused: bool,
    subscription: Option<BridgeSubscription<u64>>,
}

impl Subscriber<u64> for Consumer {
    fn on_subscribe(&mut self, subscription: BridgeSubscription<u64>) {
        if self.fused {
            assert_eq!(subscription.negotiate(FusionMode::Async), FusionMode::Async);
        }
        self.subscription = Some(subscription);
    }

    fn on_item(&mut self, item: u64) {
        self.shared.enter();
        self.shared.items.lock().unwrap().push(item);
        self.shared.exit();
    }

    fn on_available(&mut self) {
        self.shared.enter();
        if let Some(s) = &self.subscription {
            let mut items = self.shared.items.lock().unwrap();
            while let Some(item) = s.poll() {
                items.push(item);
            }
        }
        self.shared.exit();
    }

    fn on_error(&mut self, error: BridgeError) {
        panic!("unexpected error: {error}");
    }

    fn on_complete(&mut self) {
        self.shared.terminals.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct CountingUpstream {
    cancels: AtomicUsize,
}

impl Upstream for CountingUpstream {
    fn request(&self, _n: u64) {}

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }
}

type Setup = (Arc<BufferedBridge<u64>>, Arc<Shared>, Arc<CountingUpstream>);

fn setup(config: BridgeConfig, fused: bool) -> Setup {
    let shared = Arc::new(Shared::default());
    let upstream = Arc::new(CountingUpstream::default());
    let bridge = BufferedBridge::<u64>::new(
        config,
        Consumer {
            shared: Arc::clone(&shared),
            fused,
            subscription: None,
        },
    )
    .unwrap();
    bridge.on_subscribe(upstream.clone());
    (bridge, shared, upstream)
}

fn assert_in_order(items: &[u64]) {
    for (expected, &actual) in items.iter().enumerate() {
        assert_eq!(actual, expected as u64, "out-of-order delivery");
    }
}

#[test]
fn test_producer_races_single_credits() {
    let (bridge, shared, _upstream) = setup(BridgeConfig::unbounded(64), false);

    let producer = {
        let bridge = Arc::clone(&bridge);
        thread::spawn(move || {
            for i in 0..ITEMS {
                bridge.on_item(i);
            }
            bridge.on_complete();
        })
    };
    let requester = {
        let bridge = Arc::clone(&bridge);
        thread::spawn(move || {
            for _ in 0..ITEMS {
                bridge.request(1);
            }
        })
    };

    producer.join().unwrap();
    requester.join().unwrap();

    let items = shared.items.lock().unwrap();
    assert_eq!(items.len() as u64, ITEMS);
    assert_in_order(&items);
    assert_eq!(shared.terminals.load(Ordering::SeqCst), 1);
    assert_eq!(bridge.requested(), 0);
}

#[test]
fn test_many_requesters_never_overdeliver() {
    const GRANTERS: u64 = 4;
    const PER_GRANTER: u64 = 1_000;
    let (bridge, shared, _upstream) = setup(BridgeConfig::unbounded(64), false);

    let producer = {
        let bridge = Arc::clone(&bridge);
        thread::spawn(move || {
            for i in 0..ITEMS {
                bridge.on_item(i);
            }
        })
    };
    let granters: Vec<_> = (0..GRANTERS)
        .map(|_| {
            let bridge = Arc::clone(&bridge);
            thread::spawn(move || {
                for _ in 0..PER_GRANTER {
                    bridge.request(1);
                }
            })
        })
        .collect();

    producer.join().unwrap();
    for g in granters {
        g.join().unwrap();
    }

    let granted = GRANTERS * PER_GRANTER;
    let items = shared.items.lock().unwrap();
    assert_eq!(items.len() as u64, granted);
    assert_in_order(&items);
    assert_eq!(bridge.buffered() as u64, ITEMS - granted);
    assert_eq!(bridge.requested(), 0);
}

#[test]
fn test_fused_consumer_under_contention() {
    let (bridge, shared, _upstream) = setup(BridgeConfig::bounded(ITEMS as usize), true);

    let producer = {
        let bridge = Arc::clone(&bridge);
        thread::spawn(move || {
            for i in 0..ITEMS {
                bridge.on_item(i);
            }
            bridge.on_complete();
        })
    };
    // Spurious triggers from another thread while the producer runs
    let poker = {
        let bridge = Arc::clone(&bridge);
        thread::spawn(move || {
            for _ in 0..1_000 {
                bridge.request(1);
            }
        })
    };

    producer.join().unwrap();
    poker.join().unwrap();

    let items = shared.items.lock().unwrap();
    assert_eq!(shared.terminals.load(Ordering::SeqCst), 1);
    assert_in_order(&items);
    // Completion is signalled without waiting for the buffer in fused mode,
    // so the tail may still be sitting there
    assert_eq!(items.len() + bridge.buffered(), ITEMS as usize);
}

#[test]
fn test_cancel_races_delivery() {
    for _ in 0..20 {
        let (bridge, shared, upstream) = setup(BridgeConfig::unbounded(64), false);

        let producer = {
            let bridge = Arc::clone(&bridge);
            thread::spawn(move || {
                for i in 0..ITEMS {
                    bridge.on_item(i);
                }
            })
        };
        let requester = {
            let bridge = Arc::clone(&bridge);
            thread::spawn(move || {
                for _ in 0..ITEMS / 10 {
                    bridge.request(10);
                }
            })
        };
        let canceller = {
            let bridge = Arc::clone(&bridge);
            thread::spawn(move || {
                thread::yield_now();
                bridge.cancel();
            })
        };

        producer.join().unwrap();
        requester.join().unwrap();
        canceller.join().unwrap();

        let items = shared.items.lock().unwrap();
        let delivered = items.len();
        assert_in_order(&items);
        assert!(bridge.is_cancelled());
        assert_eq!(upstream.cancels.load(Ordering::SeqCst), 1);
        assert_eq!(shared.terminals.load(Ordering::SeqCst), 0);
        assert_eq!(bridge.buffered(), 0);
        drop(items);

        // Cancellation is final: more credit delivers nothing
        bridge.request(ITEMS);
        assert_eq!(shared.items.lock().unwrap().len(), delivered);
    }
}

#[test]
fn test_cancel_racing_intake_leaves_nothing_buffered() {
    const BURST: u64 = 2_000;

    for _ in 0..500 {
        // No credit: everything accepted stays buffered until the cancel
        // clears it
        let (bridge, shared, upstream) = setup(BridgeConfig::unbounded(64), false);
        let producer = {
            let bridge = Arc::clone(&bridge);
            thread::spawn(move || {
                for i in 0..BURST {
                    bridge.on_item(i);
                }
            })
        };

        thread::yield_now();
        bridge.cancel();
        producer.join().unwrap();

        assert!(shared.items.lock().unwrap().is_empty());
        assert_eq!(bridge.buffered(), 0, "items stranded after cancel");
        assert_eq!(upstream.cancels.load(Ordering::SeqCst), 1);
        // The subscriber, and with it the subscription, has been released
        assert_eq!(Arc::strong_count(&bridge), 1);
    }
}

//! # Backpressure Bridge Demo
//!
//! A fast producer thread pushes items as quickly as it can; a slow consumer
//! pulls them by granting credit in small batches. Two runs:
//!
//! 1. Unbounded buffer: the producer never fails, the consumer eventually
//!    receives every item, then the completion.
//! 2. Bounded buffer with an overflow handler: the producer outruns the
//!    buffer, the handler sees the rejected item, upstream is cancelled, and
//!    the consumer still drains what was buffered before the overflow error.
//!
//! ## Running
//!
//! ```bash
//! cargo run -p backpressure-bridge --features demo --bin demo --release
//!
//! # Fewer items, faster
//! cargo run -p backpressure-bridge --features demo --bin demo --release -- --quick
//!
//! # Per-signal logging from the bridge
//! RUST_LOG=backpressure_bridge=debug cargo run -p backpressure-bridge --features demo --bin demo
//! ```

use backpressure_bridge::{
    BridgeConfig, BridgeError, BridgeSubscription, BufferedBridge, Subscriber, Upstream,
};
use std::error::Error as _;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

const CREDIT_BATCH: u64 = 16;

// =============================================================================
// UPSTREAM (a producer thread that honours cancellation)
// =============================================================================

#[derive(Default)]
struct Producer {
    cancelled: AtomicBool,
}

impl Upstream for Producer {
    fn request(&self, n: u64) {
        tracing::info!(n, "upstream received demand");
    }

    fn cancel(&self) {
        tracing::info!("upstream cancelled");
        self.cancelled.store(true, Ordering::Release);
    }
}

fn spawn_producer(
    bridge: Arc<BufferedBridge<u64>>,
    producer: Arc<Producer>,
    items: u64,
) -> thread::JoinHandle<u64> {
    thread::spawn(move || {
        let mut sent = 0;
        for i in 0..items {
            if producer.cancelled.load(Ordering::Acquire) {
                break;
            }
            bridge.on_item(i);
            sent += 1;
        }
        if !producer.cancelled.load(Ordering::Acquire) {
            bridge.on_complete();
        }
        sent
    })
}

// =============================================================================
// DOWNSTREAM (a deliberately slow consumer)
// =============================================================================

#[derive(Default)]
struct Progress {
    received: AtomicU64,
    finished: AtomicBool,
    outcome: Mutex<Option<Result<(), BridgeError>>>,
    subscription: Mutex<Option<BridgeSubscription<u64>>>,
}

impl Progress {
    fn finish(&self, outcome: Result<(), BridgeError>) {
        *self.outcome.lock().unwrap_or_else(|e| e.into_inner()) = Some(outcome);
        self.finished.store(true, Ordering::Release);
    }
}

struct SlowConsumer {
    progress: Arc<Progress>,
}

impl Subscriber<u64> for SlowConsumer {
    fn on_subscribe(&mut self, subscription: BridgeSubscription<u64>) {
        subscription.request(CREDIT_BATCH);
        *self
            .progress
            .subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(subscription);
    }

    fn on_item(&mut self, _item: u64) {
        self.progress.received.fetch_add(1, Ordering::Relaxed);
    }

    fn on_error(&mut self, error: BridgeError) {
        self.progress.finish(Err(error));
    }

    fn on_complete(&mut self) {
        self.progress.finish(Ok(()));
    }
}

/// Grants one batch of credit per tick until the stream terminates.
fn spawn_consumer(progress: Arc<Progress>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let subscription = progress
            .subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(subscription) = subscription else {
            return;
        };
        while !progress.finished.load(Ordering::Acquire) {
            // Simulated processing cost per batch
            thread::sleep(Duration::from_micros(500));
            subscription.request(CREDIT_BATCH);
        }
    })
}

// =============================================================================
// SCENARIOS
// =============================================================================

fn run(name: &str, config: BridgeConfig, items: u64, with_handler: bool) {
    println!("\n=== {name} ===");
    let started = Instant::now();

    let progress = Arc::new(Progress::default());
    let overflowed = Arc::new(AtomicU64::new(u64::MAX));
    let consumer = SlowConsumer {
        progress: Arc::clone(&progress),
    };

    let mut builder = BufferedBridge::<u64>::builder(config);
    if with_handler {
        let overflowed = Arc::clone(&overflowed);
        builder = builder.overflow_handler(move |item| {
            overflowed.store(item, Ordering::Relaxed);
            Ok(())
        });
    }
    let bridge = match builder.build(consumer) {
        Ok(bridge) => bridge,
        Err(e) => {
            eprintln!("invalid configuration: {e}");
            return;
        }
    };

    let upstream = Arc::new(Producer::default());
    bridge.on_subscribe(upstream.clone());
    let consumer = spawn_consumer(Arc::clone(&progress));
    let sent = spawn_producer(Arc::clone(&bridge), upstream, items)
        .join()
        .unwrap_or(0);
    if consumer.join().is_err() {
        eprintln!("consumer thread panicked");
    }

    let received = progress.received.load(Ordering::Relaxed);
    println!("  produced:  {sent}");
    println!("  delivered: {received}");
    println!("  buffered:  {}", bridge.buffered());
    println!("  elapsed:   {:?}", started.elapsed());

    match progress.outcome.lock().unwrap_or_else(|e| e.into_inner()).take() {
        Some(Ok(())) => println!("  outcome:   completed"),
        Some(Err(error)) => {
            println!("  outcome:   {error}");
            if let Some(cause) = error.source() {
                println!("  cause:     {cause}");
            }
            let rejected = overflowed.load(Ordering::Relaxed);
            if rejected != u64::MAX {
                println!("  rejected:  item {rejected}");
            }
        }
        None => println!("  outcome:   none"),
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let quick = std::env::args().any(|a| a == "--quick");
    let items = if quick { 2_000 } else { 20_000 };

    println!("Backpressure bridge demo ({items} items, credit batches of {CREDIT_BATCH})");

    run(
        "Unbounded buffer: every item arrives",
        BridgeConfig::unbounded(256),
        items,
        false,
    );
    run(
        "Bounded buffer with overflow handler: drain, then fail",
        BridgeConfig::bounded(128),
        items,
        true,
    );
}

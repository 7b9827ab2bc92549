//! Worker-pool isolation: concurrent request simulations must never observe
//! each other's context, and a reused worker's store must be empty before
//! every new request.

use std::sync::{Arc, Barrier};
use std::thread;

use correlation_core::{capture, cleanup, restore, AmbientStore, CorrelationStore, NoopSpanSource};

const WORKERS: usize = 8;
const REQUESTS_PER_WORKER: usize = 25;

#[test]
fn concurrent_workers_never_cross_contaminate() {
    let start = Arc::new(Barrier::new(WORKERS));

    let handles: Vec<_> = (0..WORKERS)
        .map(|worker| {
            let start = Arc::clone(&start);
            thread::spawn(move || {
                // One long-lived store per worker, reused across requests the
                // way a pooled thread reuses its slot.
                let store = CorrelationStore::new();
                start.wait();

                for request in 0..REQUESTS_PER_WORKER {
                    assert!(
                        store.is_empty(),
                        "worker {worker} saw leaked context before request {request}"
                    );

                    let request_id = format!("req-{worker}-{request}");
                    let trace_id = format!("trace-{worker}-{request}");
                    store.put("requestId", &request_id).unwrap();
                    store.put("traceId", &trace_id).unwrap();

                    let snapshot = capture(&store, &NoopSpanSource);

                    // Instrumentation teardown, outside this pipeline's control.
                    store.clear().unwrap();

                    restore(&store, &snapshot);
                    assert_eq!(store.get("requestId"), Some(request_id.clone()));
                    assert_eq!(store.get("traceId"), Some(trace_id.clone()));

                    cleanup(&store);
                    assert!(store.is_empty());
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("worker panicked");
    }
}

#[test]
fn fallback_requests_do_not_poison_the_next_request_on_the_worker() {
    let store = CorrelationStore::new();

    // First request has nothing in the store; its id is synthesized.
    let synthesized = capture(&store, &NoopSpanSource);
    restore(&store, &synthesized);
    cleanup(&store);
    assert!(store.is_empty());

    // Second request on the same worker starts from a clean slate.
    store.put("requestId", "r2").unwrap();
    let snapshot = capture(&store, &NoopSpanSource);
    assert_eq!(snapshot.request_id(), "r2");
    assert_ne!(snapshot.request_id(), synthesized.request_id());

    cleanup(&store);
    assert!(store.is_empty());
}

//! End-to-end queue behavior: FIFO, wraparound, closure/relink, and
//! multi-producer multi-consumer stress.

use lcrq_rs::{Config, Queue};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

#[test]
fn test_fifo_single_thread() {
    let queue = Queue::new(Config::new(4, false));
    queue.enqueue(1).unwrap();
    queue.enqueue(2).unwrap();
    queue.enqueue(3).unwrap();
    assert_eq!(queue.dequeue(), Some(1));
    assert_eq!(queue.dequeue(), Some(2));
    assert_eq!(queue.dequeue(), Some(3));
    assert_eq!(queue.dequeue(), None);
}

#[test]
fn test_wraparound_four_cell_ring() {
    let queue = Queue::new(Config::new(2, false)); // 4 cells
    for v in 1..=4 {
        queue.enqueue(v).unwrap();
    }
    for v in 1..=4 {
        assert_eq!(queue.dequeue(), Some(v));
    }
    // Second lap over the same cells.
    for v in 5..=8 {
        queue.enqueue(v).unwrap();
    }
    for v in 5..=8 {
        assert_eq!(queue.dequeue(), Some(v));
    }
    assert_eq!(queue.dequeue(), None);
}

#[test]
fn test_drain_past_empty() {
    let queue = Queue::new(Config::new(4, false));
    queue.enqueue(42).unwrap();
    assert_eq!(queue.dequeue(), Some(42));
    assert_eq!(queue.dequeue(), None);
    queue.enqueue(99).unwrap();
    assert_eq!(queue.dequeue(), Some(99));
    assert_eq!(queue.dequeue(), None);
}

#[test]
fn test_closed_ring_solo_enqueue_fast_path() {
    // Two-cell ring: the third enqueue closes it and must link a fresh
    // ring with its own value already installed at position 0.
    let queue = Queue::new(Config::new(1, true));
    queue.enqueue(10).unwrap();
    queue.enqueue(11).unwrap();
    queue.enqueue(12).unwrap();
    assert!(queue.stats().rings_closed >= 1);
    assert!(queue.stats().rings_allocated >= 2);

    assert_eq!(queue.dequeue(), Some(10));
    assert_eq!(queue.dequeue(), Some(11));
    assert_eq!(queue.dequeue(), Some(12));
    assert_eq!(queue.dequeue(), None);
}

#[test]
fn test_long_chain_of_rings_stays_fifo() {
    let queue = Queue::new(Config::new(1, true));
    for v in 0..100 {
        queue.enqueue(v).unwrap();
    }
    for v in 0..100 {
        assert_eq!(queue.dequeue(), Some(v));
    }
    assert_eq!(queue.dequeue(), None);

    let snap = queue.stats();
    assert!(snap.rings_closed >= 1);
    assert!(snap.rings_retired >= 1);
}

#[test]
fn test_concurrent_enqueuers_overflow_one_ring() {
    // 16 producers against an 8-cell ring: at least one closure and one
    // linked successor, and no value may be lost.
    const THREADS: u64 = 16;
    let queue = Queue::new(Config::new(3, true));

    let handles: Vec<_> = (0..THREADS)
        .map(|v| {
            let q = queue.clone();
            thread::spawn(move || q.enqueue(v).unwrap())
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let mut got: Vec<u64> = (0..THREADS).map(|_| queue.dequeue().unwrap()).collect();
    assert_eq!(queue.dequeue(), None);
    got.sort_unstable();
    assert_eq!(got, (0..THREADS).collect::<Vec<_>>());

    let snap = queue.stats();
    assert!(snap.rings_closed >= 1, "no closure under 2N enqueuers");
    assert!(snap.rings_allocated >= 2, "no successor ring was linked");
}

#[test]
fn test_concurrent_close_keeps_every_value_once() {
    // Three racing enqueuers on a two-cell ring, consumer held back until
    // the dust settles: the dequeue sequence is a permutation of the
    // values, each exactly once.
    let queue = Queue::new(Config::new(1, false));
    let values = [101u64, 202, 303];

    let handles: Vec<_> = values
        .iter()
        .map(|&v| {
            let q = queue.clone();
            thread::spawn(move || q.enqueue(v).unwrap())
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let mut got = vec![];
    while let Some(v) = queue.dequeue() {
        got.push(v);
    }
    got.sort_unstable();
    assert_eq!(got, values.to_vec());
}

#[test]
fn test_mpmc_stress() {
    let _ = env_logger::builder().is_test(true).try_init();

    const PRODUCERS: u64 = 4;
    const CONSUMERS: usize = 4;
    const PER_PRODUCER: u64 = 20_000;
    // One seed value (tagged past the producer id range) so consumers that
    // start early find a non-virgin ring.
    const SEED: u64 = PRODUCERS << 32;
    const TOTAL: usize = (PRODUCERS * PER_PRODUCER) as usize + 1;

    // Small rings so closure and relink happen constantly under load.
    let queue = Queue::new(Config::new(6, true));
    queue.enqueue(SEED).unwrap();

    let taken = Arc::new(AtomicUsize::new(0));

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|tid| {
            let q = queue.clone();
            thread::spawn(move || {
                for seq in 0..PER_PRODUCER {
                    q.enqueue((tid << 32) | seq).unwrap();
                }
            })
        })
        .collect();

    let consumers: Vec<_> = (0..CONSUMERS)
        .map(|_| {
            let q = queue.clone();
            let taken = Arc::clone(&taken);
            thread::spawn(move || {
                let mut local = Vec::new();
                while taken.load(Ordering::Relaxed) < TOTAL {
                    match q.dequeue() {
                        Some(v) => {
                            local.push(v);
                            taken.fetch_add(1, Ordering::Relaxed);
                        }
                        None => thread::yield_now(),
                    }
                }
                local
            })
        })
        .collect();

    for handle in producers {
        handle.join().unwrap();
    }
    let per_consumer: Vec<Vec<u64>> = consumers
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect();

    // Within one consumer, values of one producer must appear in send
    // order: the dequeues of a single thread are totally ordered, so an
    // inversion there is an inversion of the queue itself.
    for local in &per_consumer {
        let mut last_seen = vec![None::<u64>; PRODUCERS as usize + 1];
        for &v in local {
            let tid = (v >> 32) as usize;
            let seq = v & 0xffff_ffff;
            if let Some(prev) = last_seen[tid] {
                assert!(prev < seq, "producer {tid}: {prev} dequeued after {seq}");
            }
            last_seen[tid] = Some(seq);
        }
    }

    // The dequeued multiset equals the enqueued multiset.
    let mut all: Vec<u64> = per_consumer.into_iter().flatten().collect();
    assert_eq!(all.len(), TOTAL);
    all.sort_unstable();
    let mut expected: Vec<u64> = (0..PRODUCERS)
        .flat_map(|tid| (0..PER_PRODUCER).map(move |seq| (tid << 32) | seq))
        .collect();
    expected.push(SEED);
    expected.sort_unstable();
    assert_eq!(all, expected);

    // The queue is drained.
    assert_eq!(queue.dequeue(), None);

    let snap = queue.stats();
    assert!(snap.rings_closed >= 1);
    assert!(snap.rings_retired < snap.rings_allocated);
}

#[test]
fn test_pipelined_producer_consumer() {
    // One producer racing one consumer through many small rings.
    const COUNT: u64 = 50_000;
    let queue = Queue::new(Config::new(4, false));
    queue.enqueue(u64::MAX - 1).unwrap(); // warm the ring before the race
    assert_eq!(queue.dequeue(), Some(u64::MAX - 1));

    let q = queue.clone();
    let producer = thread::spawn(move || {
        for v in 0..COUNT {
            q.enqueue(v).unwrap();
        }
    });

    let mut next = 0u64;
    while next < COUNT {
        if let Some(v) = queue.dequeue() {
            assert_eq!(v, next, "single consumer must see send order");
            next += 1;
        } else {
            thread::yield_now();
        }
    }
    producer.join().unwrap();
    assert_eq!(queue.dequeue(), None);
}

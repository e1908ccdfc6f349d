use evcore::LfQueue;
use evcore::queue::blocking;
use evcore::queue::deque::deque;
use evcore::Timeout;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

#[test]
fn test_full_queue_accepts_again_after_pop() {
    let queue = LfQueue::new(8);
    for i in 1..=8 {
        assert!(queue.push(i).is_ok());
    }
    assert!(queue.is_full());
    assert_eq!(queue.push(9), Err(9));

    assert_eq!(queue.pop(), Some(1));
    assert!(queue.push(9).is_ok());

    let drained: Vec<_> = std::iter::from_fn(|| queue.pop()).collect();
    assert_eq!(drained, [2, 3, 4, 5, 6, 7, 8, 9]);
}

#[test]
fn test_mpmc_delivers_every_item_once() {
    const PRODUCERS: usize = 4;
    const PER_PRODUCER: usize = 2_000;

    let queue = Arc::new(LfQueue::new(64));
    let done = Arc::new(AtomicBool::new(false));

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let queue = queue.clone();
            thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    let mut item = p * PER_PRODUCER + i;
                    while let Err(back) = queue.push(item) {
                        item = back;
                        thread::yield_now();
                    }
                }
            })
        })
        .collect();

    let consumers: Vec<_> = (0..2)
        .map(|_| {
            let queue = queue.clone();
            let done = done.clone();
            thread::spawn(move || {
                let mut seen = Vec::new();
                loop {
                    let finished = done.load(Ordering::Acquire);
                    match queue.pop() {
                        Some(item) => seen.push(item),
                        None if finished => return seen,
                        None => thread::yield_now(),
                    }
                }
            })
        })
        .collect();

    for p in producers {
        p.join().unwrap();
    }
    done.store(true, Ordering::Release);

    let mut all = HashSet::new();
    for c in consumers {
        for item in c.join().unwrap() {
            assert!(all.insert(item), "item {item} delivered twice");
        }
    }
    assert_eq!(all.len(), PRODUCERS * PER_PRODUCER);
}

#[test]
fn test_blocking_channel_preserves_order_across_threads() {
    let (mut tx, mut rx) = blocking::channel(4);

    let producer = thread::spawn(move || {
        for i in 0..1_000u32 {
            tx.push(i);
        }
    });

    for expected in 0..1_000u32 {
        assert_eq!(rx.pop(), expected);
    }
    producer.join().unwrap();
    assert_eq!(rx.try_pop(Timeout::NONE), None);
}

#[test]
fn test_owner_lifo_thieves_fifo() {
    let (worker, stealer) = deque(16);
    for i in 0..6 {
        worker.push(i).unwrap();
    }

    assert_eq!(worker.pop(), Some(5));
    assert_eq!(stealer.steal().success(), Some(0));
    assert_eq!(stealer.steal().success(), Some(1));
    assert_eq!(worker.pop(), Some(4));
    assert_eq!(worker.len(), 2);
}

#[test]
fn test_thieves_and_owner_split_work_exactly() {
    const ITEMS: usize = 10_000;
    let (worker, stealer) = deque(ITEMS.next_power_of_two());
    for i in 0..ITEMS {
        worker.push(i).unwrap();
    }

    let thieves: Vec<_> = (0..3)
        .map(|_| {
            let stealer = stealer.clone();
            thread::spawn(move || {
                let mut taken = Vec::new();
                loop {
                    let steal = stealer.steal();
                    if steal.is_empty() {
                        return taken;
                    }
                    if let Some(item) = steal.success() {
                        taken.push(item);
                    }
                }
            })
        })
        .collect();

    let mut all: Vec<usize> = std::iter::from_fn(|| worker.pop()).collect();
    for thief in thieves {
        all.extend(thief.join().unwrap());
    }

    all.sort_unstable();
    assert_eq!(all, (0..ITEMS).collect::<Vec<_>>());
}

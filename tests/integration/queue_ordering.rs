//! Ordering guarantees of the operation queue under interleaved
//! multi-key load.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use brim_queue::{OpQueue, QueueConfig, TaskFuture};

type Log = Arc<Mutex<Vec<(String, usize)>>>;

fn task(log: &Log, key: &str, seq: usize, delay_ms: u64) -> TaskFuture {
    let log = Arc::clone(log);
    let key = key.to_owned();
    Box::pin(async move {
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        log.lock().unwrap().push((key, seq));
        Ok(())
    })
}

#[tokio::test]
async fn per_key_fifo_holds_across_many_keys() {
    let queue = OpQueue::new(QueueConfig {
        max_concurrency: 8,
        default_task_timeout: Some(Duration::from_secs(30)),
        reaper_interval: Duration::from_millis(50),
    });
    let log: Log = Arc::default();

    // Ten tasks for each of ten keys, interleaved round-robin, with
    // jittered runtimes so completion order differs from start order
    // across keys.
    for seq in 0..10 {
        for k in 0..10 {
            let key = format!("key{k}");
            let delay = ((seq * 7 + k * 3) % 5) as u64;
            queue.submit(key.clone(), task(&log, &key, seq, delay)).unwrap();
        }
    }

    queue.wait_idle().await;

    let log = log.lock().unwrap();
    assert_eq!(log.len(), 100);

    let mut per_key: HashMap<&str, Vec<usize>> = HashMap::new();
    for (key, seq) in log.iter() {
        per_key.entry(key.as_str()).or_default().push(*seq);
    }
    for (key, seqs) in per_key {
        assert_eq!(
            seqs,
            (0..10).collect::<Vec<_>>(),
            "submission order violated for {key}"
        );
    }
}

#[tokio::test]
async fn concurrency_stays_under_the_cap_while_all_work_completes() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    let queue = OpQueue::new(QueueConfig {
        max_concurrency: 3,
        default_task_timeout: Some(Duration::from_secs(30)),
        reaper_interval: Duration::from_millis(50),
    });

    let active = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(AtomicUsize::new(0));

    for i in 0..40 {
        let active = Arc::clone(&active);
        let max_seen = Arc::clone(&max_seen);
        let done = Arc::clone(&done);
        let task: TaskFuture = Box::pin(async move {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            max_seen.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            active.fetch_sub(1, Ordering::SeqCst);
            done.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        queue.submit(format!("key{i}"), task).unwrap();
    }

    queue.wait_idle().await;
    assert_eq!(done.load(Ordering::SeqCst), 40);
    assert!(max_seen.load(Ordering::SeqCst) <= 3);
}

#[tokio::test]
async fn drain_then_new_submissions_are_refused() {
    let queue = OpQueue::new(QueueConfig::default());
    let log: Log = Arc::default();
    queue.submit("k", task(&log, "k", 0, 1)).unwrap();

    assert!(queue.drain(Duration::from_secs(5)).await);
    assert!(queue.submit("k", task(&log, "k", 1, 0)).is_err());
    assert_eq!(log.lock().unwrap().len(), 1);
}

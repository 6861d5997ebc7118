use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use snap::pool::{SubmitError, WorkerPool};

#[tokio::test]
async fn single_worker_runs_in_fifo_order() {
    let pool = WorkerPool::new(1, 16);
    let order = Arc::new(Mutex::new(Vec::new()));

    for i in 0..8 {
        let order = Arc::clone(&order);
        pool.submit(Box::pin(async move {
            order.lock().push(i);
        }))
        .unwrap();
    }
    pool.wait().await;

    assert_eq!(*order.lock(), (0..8).collect::<Vec<_>>());
    let counters = pool.shutdown().await;
    assert_eq!(counters.submitted, 8);
    assert_eq!(counters.completed, 8);
    assert_eq!(counters.rejected, 0);
}

#[tokio::test]
async fn full_queues_reject_and_count() {
    let pool = WorkerPool::new(2, 3);
    let (gate_tx, gate_rx) = tokio::sync::watch::channel(false);

    // Two units occupy both workers until the gate opens.
    for _ in 0..2 {
        let mut gate = gate_rx.clone();
        pool.submit(Box::pin(async move {
            while !*gate.borrow() {
                if gate.changed().await.is_err() {
                    break;
                }
            }
        }))
        .unwrap();
    }

    // Wait for both workers to pick up their unit.
    for _ in 0..100 {
        if pool.counters().busy == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(pool.counters().busy, 2);

    // Fill the queue, then overflow it.
    for _ in 0..3 {
        pool.submit(Box::pin(async {})).unwrap();
    }
    assert_eq!(pool.submit(Box::pin(async {})), Err(SubmitError::QueueFull));
    assert_eq!(pool.submit(Box::pin(async {})), Err(SubmitError::QueueFull));

    let counters = pool.counters();
    assert_eq!(counters.submitted, 7);
    assert_eq!(counters.rejected, 2);
    assert_eq!(counters.queued, 3);
    assert_eq!(counters.busy, 2);
    // completed + rejected + queued + busy == submitted
    assert_eq!(
        counters.completed + counters.rejected + counters.queued as u64 + counters.busy as u64,
        counters.submitted
    );

    gate_tx.send(true).unwrap();
    pool.wait().await;

    let counters = pool.counters();
    assert_eq!(counters.completed, 5);
    assert_eq!(counters.queued, 0);
    assert_eq!(counters.busy, 0);

    let final_counters = pool.shutdown().await;
    assert_eq!(final_counters.completed + final_counters.rejected, 7);
}

#[tokio::test]
async fn wait_returns_only_when_idle() {
    let pool = WorkerPool::new(4, 16);
    for _ in 0..10 {
        pool.submit(Box::pin(async {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }))
        .unwrap();
    }

    pool.wait().await;
    let counters = pool.counters();
    assert_eq!(counters.completed, 10);
    assert_eq!(counters.queued, 0);
    assert_eq!(counters.busy, 0);

    // wait on an idle pool returns immediately.
    tokio::time::timeout(Duration::from_secs(1), pool.wait())
        .await
        .expect("wait should not block on an idle pool");

    pool.shutdown().await;
}

#[tokio::test]
async fn shutdown_drains_the_residual_queue() {
    let pool = WorkerPool::new(1, 16);
    let done = Arc::new(Mutex::new(0u32));
    for _ in 0..6 {
        let done = Arc::clone(&done);
        pool.submit(Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            *done.lock() += 1;
        }))
        .unwrap();
    }

    // Workers finish everything already queued before exiting.
    let counters = pool.shutdown().await;
    assert_eq!(*done.lock(), 6);
    assert_eq!(counters.completed, 6);
    assert_eq!(counters.queued, 0);
    assert_eq!(counters.busy, 0);
}

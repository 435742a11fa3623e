use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

/// Bounds for concurrent filesystem work. The effective permit count moves
/// between `min_workers` and `max_workers` with thermal pressure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WorkerPolicy {
    pub min_workers: usize,
    pub max_workers: usize,
}

impl Default for WorkerPolicy {
    fn default() -> Self {
        Self {
            min_workers: 2,
            max_workers: 8,
        }
    }
}

impl WorkerPolicy {
    /// Nominal runs at the policy maximum; degraded states scale down toward
    /// the minimum, never below it.
    pub fn effective_workers(&self, thermal: ThermalState) -> usize {
        let min = self.min_workers.max(1);
        let max = self.max_workers.max(min);
        let span = max - min;
        let target = match thermal {
            ThermalState::Nominal => max,
            ThermalState::Fair => max - span / 4,
            ThermalState::Serious => min + span / 2,
            ThermalState::Critical => min,
        };
        target.clamp(min, max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThermalState {
    Nominal,
    Fair,
    Serious,
    Critical,
}

/// The one synchronization primitive shared across scanning tasks: a FIFO
/// permit limiter. `acquire` suspends until a permit frees up; the returned
/// guard releases on drop, so a cancelled holder still gives its permit back.
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    policy: WorkerPolicy,
    state: Mutex<PoolState>,
}

struct PoolState {
    target: usize,
    in_use: usize,
    thermal: ThermalState,
    waiters: VecDeque<oneshot::Sender<WorkerPermit>>,
}

impl WorkerPool {
    pub fn new(policy: WorkerPolicy) -> Self {
        let target = policy.effective_workers(ThermalState::Nominal);
        Self {
            inner: Arc::new(PoolInner {
                policy,
                state: Mutex::new(PoolState {
                    target,
                    in_use: 0,
                    thermal: ThermalState::Nominal,
                    waiters: VecDeque::new(),
                }),
            }),
        }
    }

    pub async fn acquire(&self) -> WorkerPermit {
        let rx = {
            let mut state = self.inner.state.lock().unwrap();
            if state.in_use < state.target {
                state.in_use += 1;
                return WorkerPermit::granted(Arc::clone(&self.inner));
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            rx
        };
        // The sender lives in the pool's waiter queue, so it only drops with
        // the pool itself.
        rx.await.expect("worker pool dropped while waiting")
    }

    /// Retunes the permit target. Shrinking drains naturally as holders
    /// release; growing hands permits to queued waiters immediately.
    pub fn set_thermal_state(&self, thermal: ThermalState) {
        let mut state = self.inner.state.lock().unwrap();
        state.thermal = thermal;
        state.target = self.inner.policy.effective_workers(thermal);
        PoolInner::wake_waiters(&self.inner, &mut state);
    }

    pub fn thermal_state(&self) -> ThermalState {
        self.inner.state.lock().unwrap().thermal
    }

    pub fn effective_workers(&self) -> usize {
        self.inner.state.lock().unwrap().target
    }

    pub fn in_use(&self) -> usize {
        self.inner.state.lock().unwrap().in_use
    }
}

impl PoolInner {
    fn release(self: &Arc<Self>) {
        let mut state = self.state.lock().unwrap();
        state.in_use = state.in_use.saturating_sub(1);
        Self::wake_waiters(self, &mut state);
    }

    fn wake_waiters(inner: &Arc<Self>, state: &mut PoolState) {
        while state.in_use < state.target {
            let Some(waiter) = state.waiters.pop_front() else {
                break;
            };
            state.in_use += 1;
            let permit = WorkerPermit::granted(Arc::clone(inner));
            if let Err(mut unclaimed) = waiter.send(permit) {
                // Receiver gave up (cancelled while queued); defuse so the
                // drop below does not re-enter the lock, and try the next.
                unclaimed.released = true;
                state.in_use -= 1;
            }
        }
    }
}

/// RAII permit. Releasing happens in `Drop`, which is the `finally`-equivalent
/// path under task cancellation.
pub struct WorkerPermit {
    pool: Arc<PoolInner>,
    released: bool,
}

impl WorkerPermit {
    fn granted(pool: Arc<PoolInner>) -> Self {
        Self {
            pool,
            released: false,
        }
    }
}

impl Drop for WorkerPermit {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            self.pool.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn thermal_mapping_scales_between_policy_bounds() {
        let policy = WorkerPolicy {
            min_workers: 2,
            max_workers: 10,
        };
        assert_eq!(policy.effective_workers(ThermalState::Nominal), 10);
        assert_eq!(policy.effective_workers(ThermalState::Fair), 8);
        assert_eq!(policy.effective_workers(ThermalState::Serious), 6);
        assert_eq!(policy.effective_workers(ThermalState::Critical), 2);
    }

    #[test]
    fn effective_workers_never_below_min() {
        let policy = WorkerPolicy {
            min_workers: 4,
            max_workers: 4,
        };
        assert_eq!(policy.effective_workers(ThermalState::Critical), 4);
    }

    #[tokio::test]
    async fn acquire_blocks_at_capacity_and_fifo_hands_off() {
        let pool = WorkerPool::new(WorkerPolicy {
            min_workers: 1,
            max_workers: 1,
        });
        let first = pool.acquire().await;
        assert_eq!(pool.in_use(), 1);

        let waited = tokio::time::timeout(Duration::from_millis(50), pool.acquire()).await;
        assert!(waited.is_err(), "second acquire should block");

        drop(first);
        let second = tokio::time::timeout(Duration::from_millis(200), pool.acquire())
            .await
            .expect("permit should hand off after release");
        drop(second);
        assert_eq!(pool.in_use(), 0);
    }

    #[tokio::test]
    async fn cancelled_waiter_does_not_leak_permit() {
        let pool = WorkerPool::new(WorkerPolicy {
            min_workers: 1,
            max_workers: 1,
        });
        let held = pool.acquire().await;

        let fut = pool.acquire();
        // poll once so the waiter enqueues, then drop it
        tokio::select! {
            _ = fut => panic!("should not acquire"),
            _ = tokio::time::sleep(Duration::from_millis(20)) => {}
        }

        drop(held);
        // pool must be immediately usable
        let again = tokio::time::timeout(Duration::from_millis(200), pool.acquire())
            .await
            .expect("pool usable after abandoned waiter");
        drop(again);
        assert_eq!(pool.in_use(), 0);
    }

    #[tokio::test]
    async fn thermal_downgrade_drains_and_upgrade_wakes() {
        let pool = WorkerPool::new(WorkerPolicy {
            min_workers: 1,
            max_workers: 2,
        });
        let a = pool.acquire().await;
        let _b = pool.acquire().await;

        pool.set_thermal_state(ThermalState::Critical);
        drop(a);
        // target is now 1 and one permit is still held
        let blocked = tokio::time::timeout(Duration::from_millis(50), pool.acquire()).await;
        assert!(blocked.is_err());

        pool.set_thermal_state(ThermalState::Nominal);
        let c = tokio::time::timeout(Duration::from_millis(200), pool.acquire())
            .await
            .expect("retune should wake queued waiters");
        drop(c);
    }
}

// Copyright 2025 HEM Sp. z o.o.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::time::Duration;

use tokio::sync::Semaphore;

/// Mutual exclusion for the shared master interface.
///
/// Exactly one handler may command the shared master at a time. The lock is
/// created by the [`HandlerFactory`](crate::factory::HandlerFactory) and a
/// reference is handed to every handler it creates, so the arbitration scope
/// is one factory, never hidden process-global state.
///
/// Acquisition and release are split on purpose instead of an RAII guard: a
/// mode switch acquires the lock in one step of the sequence and releases it
/// in another, after the bus handover but before the settle wait, so other
/// handlers are not starved by one device's re-enumeration time.
pub struct MasterLock {
    permit: Semaphore,
}

impl MasterLock {
    pub fn new() -> Self {
        Self {
            permit: Semaphore::new(1),
        }
    }

    /// Waits until the shared master is free and takes exclusive ownership.
    pub async fn acquire(&self) {
        self.permit
            .acquire()
            .await
            .expect("arbitration semaphore is never closed")
            .forget();
    }

    /// Bounded variant of [`MasterLock::acquire`].
    ///
    /// Returns `false` when the lock could not be obtained within `timeout`.
    /// After a `false` return the caller must not issue any shared master
    /// command.
    pub async fn acquire_timeout(&self, timeout: Duration) -> bool {
        match tokio::time::timeout(timeout, self.permit.acquire()).await {
            Ok(permit) => {
                permit
                    .expect("arbitration semaphore is never closed")
                    .forget();
                true
            }
            Err(_) => false,
        }
    }

    /// Non-blocking acquisition attempt. Returns whether ownership was taken.
    pub fn try_acquire(&self) -> bool {
        match self.permit.try_acquire() {
            Ok(permit) => {
                permit.forget();
                true
            }
            Err(_) => false,
        }
    }

    /// Relinquishes ownership. Exactly one waiter is granted the lock next;
    /// there is no ordering guarantee among waiters beyond that.
    ///
    /// # Panics
    ///
    /// Panics when the lock is not currently held. Releasing a lock nobody
    /// holds is always a sequencing bug in the caller and must not be
    /// absorbed silently.
    pub fn release(&self) {
        if self.permit.available_permits() != 0 {
            panic!("arbitration lock released while not held");
        }
        self.permit.add_permits(1);
    }

    /// Advisory probe of lock availability.
    ///
    /// The answer is stale the moment it is returned and must only be used
    /// for diagnostics, never to decide whether a master command is safe.
    pub fn is_available(&self) -> bool {
        self.permit.available_permits() > 0
    }
}

impl Default for MasterLock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn exclusion_is_mutual_across_tasks() {
        let lock = Arc::new(MasterLock::new());
        let busy = Arc::new(AtomicBool::new(false));
        let entries = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let lock = lock.clone();
                let busy = busy.clone();
                let entries = entries.clone();
                tokio::spawn(async move {
                    for _ in 0..25 {
                        lock.acquire().await;
                        assert!(
                            !busy.swap(true, Ordering::SeqCst),
                            "second holder entered the critical section"
                        );
                        tokio::task::yield_now().await;
                        busy.store(false, Ordering::SeqCst);
                        entries.fetch_add(1, Ordering::SeqCst);
                        lock.release();
                    }
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(entries.load(Ordering::SeqCst), 8 * 25);
        assert!(lock.is_available());
    }

    #[tokio::test]
    #[should_panic(expected = "not held")]
    async fn release_without_holding_panics() {
        MasterLock::new().release();
    }

    #[tokio::test]
    async fn bounded_acquire_times_out_while_held() {
        let lock = MasterLock::new();
        lock.acquire().await;
        assert!(!lock.acquire_timeout(Duration::from_millis(20)).await);
        assert!(!lock.try_acquire());
        assert!(!lock.is_available());
        lock.release();
        assert!(lock.acquire_timeout(Duration::from_millis(20)).await);
        lock.release();
    }

    #[tokio::test]
    async fn try_acquire_takes_the_free_lock() {
        let lock = MasterLock::new();
        assert!(lock.is_available());
        assert!(lock.try_acquire());
        assert!(!lock.is_available());
        lock.release();
        assert!(lock.is_available());
    }
}

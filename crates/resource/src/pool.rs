//! Bounded managed object pool.
//!
//! At most `max` instances exist at any time, counting those being
//! created. Requests are served strictly in arrival order: once anyone is
//! waiting, later requests queue behind them even if an instance is idle.

use crate::object::ManagedObject;
use crate::source::{ManagedObjectSource, ObjectUser};
use conductor_core::sync::lock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Point in time accounting of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Maximum number of instances
    pub max: usize,

    /// Instances existing or being created
    pub available: usize,

    /// Idle instances
    pub pooled: usize,

    /// Instances handed to users and not yet returned
    pub leased: usize,

    /// Users waiting for an instance
    pub waiting: usize,
}

struct PoolInner {
    available: usize,
    leased: usize,
    pooled: VecDeque<Arc<dyn ManagedObject>>,
    waiting: VecDeque<ObjectUser>,
}

/// Pool of reusable managed objects.
pub struct ManagedObjectPool {
    name: String,
    max: usize,
    source: Arc<dyn ManagedObjectSource>,
    inner: Mutex<PoolInner>,
}

impl ManagedObjectPool {
    /// Create a pool of at most `max` instances created by `source`.
    pub fn new(name: impl Into<String>, max: usize, source: Arc<dyn ManagedObjectSource>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            max: max.max(1),
            source,
            inner: Mutex::new(PoolInner {
                available: 0,
                leased: 0,
                pooled: VecDeque::new(),
                waiting: VecDeque::new(),
            }),
        })
    }

    /// Pool name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Maximum number of instances.
    pub fn max(&self) -> usize {
        self.max
    }

    /// Lease an instance to `user`.
    ///
    /// Delivery happens during the call when an instance is idle or can be
    /// created synchronously, otherwise once one is returned.
    pub fn source_managed_object(self: &Arc<Self>, user: ObjectUser) {
        let mut inner = lock(&self.inner);

        if !inner.waiting.is_empty() {
            inner.waiting.push_back(user);
            tracing::trace!(pool = %self.name, waiting = inner.waiting.len(), "Queued behind earlier users");
            return;
        }

        if let Some(object) = inner.pooled.pop_front() {
            inner.leased += 1;
            drop(inner);
            user.set_object(object);
            return;
        }

        if inner.available < self.max {
            inner.available += 1;
            drop(inner);
            self.create_for(user);
            return;
        }

        inner.waiting.push_back(user);
        tracing::trace!(pool = %self.name, waiting = inner.waiting.len(), "Pool exhausted, user waiting");
    }

    fn create_for(self: &Arc<Self>, user: ObjectUser) {
        let pool = self.clone();
        self.source.source(ObjectUser::new(move |result| match result {
            Ok(object) => {
                lock(&pool.inner).leased += 1;
                user.set_object(object);
            }
            Err(cause) => {
                tracing::debug!(pool = %pool.name, cause = %cause, "Pooled instance creation failed");
                pool.release_slot();
                user.fail(cause);
            }
        }));
    }

    /// Give a leased instance back.
    ///
    /// The oldest waiting user receives it directly; otherwise it becomes
    /// idle.
    pub fn return_managed_object(self: &Arc<Self>, object: Arc<dyn ManagedObject>) {
        let mut inner = lock(&self.inner);
        assert!(inner.leased > 0, "pool '{}' received a return with nothing leased", self.name);

        match inner.waiting.pop_front() {
            Some(user) => {
                drop(inner);
                user.set_object(object);
            }
            None => {
                inner.leased -= 1;
                inner.pooled.push_back(object);
                assert!(
                    inner.pooled.len() + inner.leased <= inner.available,
                    "pool '{}' holds more instances than it created",
                    self.name
                );
            }
        }
    }

    /// Report that a leased instance will not be returned.
    pub fn lost_managed_object(self: &Arc<Self>) {
        {
            let mut inner = lock(&self.inner);
            assert!(inner.leased > 0, "pool '{}' lost an instance with nothing leased", self.name);
            inner.leased -= 1;
        }
        tracing::debug!(pool = %self.name, "Pooled instance lost");
        self.release_slot();
    }

    /// Free one creation slot, starting a creation for the oldest waiter.
    fn release_slot(self: &Arc<Self>) {
        let next = {
            let mut inner = lock(&self.inner);
            assert!(inner.available > 0, "pool '{}' released a slot it never used", self.name);
            inner.available -= 1;
            let next = inner.waiting.pop_front();
            if next.is_some() {
                inner.available += 1;
            }
            next
        };

        if let Some(user) = next {
            self.create_for(user);
        }
    }

    /// Current accounting.
    pub fn stats(&self) -> PoolStats {
        let inner = lock(&self.inner);
        PoolStats {
            max: self.max,
            available: inner.available,
            pooled: inner.pooled.len(),
            leased: inner.leased,
            waiting: inner.waiting.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::PlainObject;
    use crate::source::{FnSource, SourceResult};
    use conductor_core::{Cause, Value};
    use rand::Rng;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    fn numbered_source() -> Arc<dyn ManagedObjectSource> {
        let next = AtomicUsize::new(0);
        Arc::new(FnSource::new(move || {
            let id = next.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(PlainObject::new(id)) as Arc<dyn ManagedObject>)
        }))
    }

    fn id_of(object: &Arc<dyn ManagedObject>) -> usize {
        let value: Value = object.object().unwrap();
        *value.downcast_ref::<usize>().unwrap()
    }

    fn collecting_user() -> (ObjectUser, mpsc::Receiver<SourceResult>) {
        let (tx, rx) = mpsc::channel();
        (
            ObjectUser::new(move |result| {
                let _ = tx.send(result);
            }),
            rx,
        )
    }

    #[test]
    fn test_single_instance_handed_to_waiter() {
        let pool = ManagedObjectPool::new("one", 1, numbered_source());

        let (first, first_rx) = collecting_user();
        pool.source_managed_object(first);
        let leased = first_rx.try_recv().unwrap().unwrap();

        let (second, second_rx) = collecting_user();
        pool.source_managed_object(second);
        assert!(second_rx.try_recv().is_err());
        assert_eq!(pool.stats().waiting, 1);

        pool.return_managed_object(leased.clone());
        let handed = second_rx.try_recv().unwrap().unwrap();
        assert_eq!(id_of(&handed), id_of(&leased));

        let stats = pool.stats();
        assert_eq!(stats.available, 1);
        assert_eq!(stats.leased, 1);
        assert_eq!(stats.pooled, 0);
        assert_eq!(stats.waiting, 0);
    }

    #[test]
    fn test_waiters_served_in_arrival_order() {
        let pool = ManagedObjectPool::new("fifo", 1, numbered_source());
        let (holder, holder_rx) = collecting_user();
        pool.source_managed_object(holder);
        let leased = holder_rx.try_recv().unwrap().unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        for name in ["b", "c", "d"] {
            let order = order.clone();
            let pool_for_return = pool.clone();
            pool.source_managed_object(ObjectUser::new(move |result| {
                order.lock().unwrap().push(name);
                pool_for_return.return_managed_object(result.unwrap());
            }));
        }

        pool.return_managed_object(leased);
        assert_eq!(*order.lock().unwrap(), vec!["b", "c", "d"]);
        assert_eq!(pool.stats().pooled, 1);
    }

    #[test]
    fn test_creation_failure_frees_slot() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let source = Arc::new(FnSource::new(move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(Cause::new("db.connect", "refused"))
            } else {
                Ok(Arc::new(PlainObject::new(1usize)) as Arc<dyn ManagedObject>)
            }
        }));
        let pool = ManagedObjectPool::new("flaky", 1, source);

        let (failing, failing_rx) = collecting_user();
        pool.source_managed_object(failing);
        assert!(failing_rx.try_recv().unwrap().is_err());
        assert_eq!(pool.stats().available, 0);

        let (retry, retry_rx) = collecting_user();
        pool.source_managed_object(retry);
        assert!(retry_rx.try_recv().unwrap().is_ok());
    }

    #[test]
    fn test_lost_instance_replaced_for_waiter() {
        let pool = ManagedObjectPool::new("lossy", 1, numbered_source());
        let (holder, holder_rx) = collecting_user();
        pool.source_managed_object(holder);
        let leased = holder_rx.try_recv().unwrap().unwrap();

        let (waiter, waiter_rx) = collecting_user();
        pool.source_managed_object(waiter);

        pool.lost_managed_object();
        let replacement = waiter_rx.try_recv().unwrap().unwrap();
        assert_ne!(id_of(&replacement), id_of(&leased));

        let stats = pool.stats();
        assert_eq!(stats.available, 1);
        assert_eq!(stats.leased, 1);
    }

    #[test]
    fn test_asynchronous_creation_does_not_block() {
        struct DeferredSource {
            users: Mutex<Vec<ObjectUser>>,
        }
        impl ManagedObjectSource for DeferredSource {
            fn source(&self, user: ObjectUser) {
                self.users.lock().unwrap().push(user);
            }
        }

        let source = Arc::new(DeferredSource {
            users: Mutex::new(Vec::new()),
        });
        let pool = ManagedObjectPool::new("deferred", 2, source.clone());

        let (first, first_rx) = collecting_user();
        pool.source_managed_object(first);
        assert!(first_rx.try_recv().is_err());
        assert_eq!(pool.stats().available, 1);
        assert_eq!(pool.stats().leased, 0);

        let pending = source.users.lock().unwrap().pop().unwrap();
        pending.set_object(Arc::new(PlainObject::new(9usize)));
        assert_eq!(id_of(&first_rx.try_recv().unwrap().unwrap()), 9);
        assert_eq!(pool.stats().leased, 1);
    }

    #[test]
    fn test_concurrent_users_never_exceed_max() {
        const MAX: usize = 4;
        const USERS: usize = 16;
        const ROUNDS: usize = 20;

        let pool = ManagedObjectPool::new("bounded", MAX, numbered_source());
        let in_use = Arc::new(Mutex::new(HashSet::new()));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..USERS)
            .map(|_| {
                let pool = pool.clone();
                let in_use = in_use.clone();
                let peak = peak.clone();
                std::thread::spawn(move || {
                    let mut rng = rand::thread_rng();
                    for _ in 0..ROUNDS {
                        let (user, rx) = collecting_user();
                        pool.source_managed_object(user);
                        let object = rx.recv().unwrap().unwrap();
                        let id = id_of(&object);

                        {
                            let mut leased = in_use.lock().unwrap();
                            assert!(leased.insert(id), "instance {} leased twice", id);
                            peak.fetch_max(leased.len(), Ordering::SeqCst);
                        }
                        std::thread::sleep(Duration::from_micros(rng.gen_range(0..200)));
                        in_use.lock().unwrap().remove(&id);

                        pool.return_managed_object(object);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= MAX);
        let stats = pool.stats();
        assert!(stats.available <= MAX);
        assert_eq!(stats.leased, 0);
        assert_eq!(stats.waiting, 0);
        assert_eq!(stats.pooled, stats.available);
    }
}

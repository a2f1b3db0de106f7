use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};

enum Outcome<V> {
    Running,
    Done(V),
    /// The executing caller panicked; waiters retry with their own task.
    Abandoned,
}

struct Flight<V> {
    outcome: Mutex<Outcome<V>>,
    finished: Condvar,
    waiters: AtomicUsize,
}

/// Collapses concurrent calls that share a key into one execution.
///
/// The first caller for a key runs its task; callers arriving while it runs
/// block and receive a clone of its result. Once the run completes the key
/// is free again and the next call executes afresh.
pub struct TaskSynchronizer<K, V> {
    flights: Mutex<HashMap<K, Arc<Flight<V>>>>,
}

impl<K, V> TaskSynchronizer<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            flights: Mutex::new(HashMap::new()),
        }
    }

    /// Run `task` under `key`, or join the run already in flight.
    pub fn run<F>(&self, key: K, task: F) -> V
    where
        F: FnOnce() -> V,
    {
        let mut task = Some(task);
        loop {
            let (flight, leader) = {
                let mut flights = self.flights.lock().expect("lock poisoned");
                match flights.get(&key) {
                    Some(flight) => {
                        flight.waiters.fetch_add(1, Ordering::SeqCst);
                        (flight.clone(), false)
                    }
                    None => {
                        let flight = Arc::new(Flight {
                            outcome: Mutex::new(Outcome::Running),
                            finished: Condvar::new(),
                            waiters: AtomicUsize::new(0),
                        });
                        flights.insert(key.clone(), flight.clone());
                        (flight, true)
                    }
                }
            };

            if leader {
                let mut guard = LeaderGuard {
                    owner: self,
                    key: &key,
                    flight: &flight,
                    result: None,
                };
                // The task is only consumed by a leader, and a leader returns.
                let Some(task) = task.take() else {
                    unreachable!("single-flight task consumed twice")
                };
                let value = task();
                guard.result = Some(value.clone());
                return value;
            }

            let mut outcome = flight.outcome.lock().expect("lock poisoned");
            while matches!(*outcome, Outcome::Running) {
                outcome = flight.finished.wait(outcome).expect("lock poisoned");
            }
            flight.waiters.fetch_sub(1, Ordering::SeqCst);
            if let Outcome::Done(value) = &*outcome {
                return value.clone();
            }
        }
    }

    /// Callers currently blocked on the run in flight for `key`.
    pub fn waiting(&self, key: &K) -> usize {
        self.flights
            .lock()
            .expect("lock poisoned")
            .get(key)
            .map_or(0, |flight| flight.waiters.load(Ordering::SeqCst))
    }

    /// Whether a run is in flight for `key`.
    pub fn is_running(&self, key: &K) -> bool {
        self.flights.lock().expect("lock poisoned").contains_key(key)
    }
}

impl<K, V> Default for TaskSynchronizer<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Publishes the leader's outcome even if the task unwinds.
struct LeaderGuard<'a, K: Eq + Hash, V> {
    owner: &'a TaskSynchronizer<K, V>,
    key: &'a K,
    flight: &'a Arc<Flight<V>>,
    result: Option<V>,
}

impl<K: Eq + Hash, V> Drop for LeaderGuard<'_, K, V> {
    fn drop(&mut self) {
        if let Ok(mut flights) = self.owner.flights.lock() {
            flights.remove(self.key);
        }
        if let Ok(mut outcome) = self.flight.outcome.lock() {
            *outcome = match self.result.take() {
                Some(value) => Outcome::Done(value),
                None => Outcome::Abandoned,
            };
        }
        self.flight.finished.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn concurrent_callers_share_one_execution() {
        let sync = Arc::new(TaskSynchronizer::<&'static str, usize>::new());
        let executions = Arc::new(AtomicUsize::new(0));
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Arc::new(Mutex::new(release_rx));

        let callers: Vec<_> = (0..10)
            .map(|_| {
                let sync = sync.clone();
                let executions = executions.clone();
                let release_rx = release_rx.clone();
                thread::spawn(move || {
                    sync.run("key", || {
                        let n = executions.fetch_add(1, Ordering::SeqCst) + 1;
                        release_rx.lock().unwrap().recv().unwrap();
                        n
                    })
                })
            })
            .collect();

        // Hold the leader until every other caller has joined its flight.
        while sync.waiting(&"key") < 9 {
            thread::sleep(Duration::from_millis(1));
        }
        release_tx.send(()).unwrap();

        let results: Vec<usize> = callers.into_iter().map(|c| c.join().unwrap()).collect();
        assert_eq!(executions.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|&r| r == 1));
        assert!(!sync.is_running(&"key"));

        // A call after completion runs afresh.
        let again = sync.run("key", || executions.fetch_add(1, Ordering::SeqCst) + 1);
        assert_eq!(again, 2);
        assert_eq!(executions.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn different_keys_run_independently() {
        let sync = TaskSynchronizer::<u32, u32>::new();
        assert_eq!(sync.run(1, || 10), 10);
        assert_eq!(sync.run(2, || 20), 20);
    }

    #[test]
    fn waiter_retries_after_leader_panics() {
        let sync = Arc::new(TaskSynchronizer::<u8, u8>::new());
        let (started_tx, started_rx) = mpsc::channel::<()>();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let leader = {
            let sync = sync.clone();
            thread::spawn(move || {
                sync.run(0, || {
                    started_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                    panic!("task failed");
                })
            })
        };
        started_rx.recv().unwrap();

        let waiter = {
            let sync = sync.clone();
            thread::spawn(move || sync.run(0, || 7))
        };
        while sync.waiting(&0) < 1 {
            thread::sleep(Duration::from_millis(1));
        }
        release_tx.send(()).unwrap();

        assert!(leader.join().is_err());
        assert_eq!(waiter.join().unwrap(), 7);
    }
}

//! Collapse concurrent work on the same key into one execution.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};

use crate::error::Result;

type SharedResult<T> = Shared<BoxFuture<'static, Result<T>>>;

struct Flight<T> {
    id: u64,
    future: SharedResult<T>,
}

/// Map from key to the in-progress future computing its value
///
/// The first caller for a key starts the work; callers arriving while it runs
/// await the same future and receive a clone of its result. The entry is
/// dropped once the work finishes, so later callers start afresh.
pub struct SingleFlight<K, T> {
    flights: Mutex<HashMap<K, Flight<T>>>,
    next_id: AtomicU64,
}

impl<K, T> Default for SingleFlight<K, T> {
    fn default() -> Self {
        Self {
            flights: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<K, T> SingleFlight<K, T>
where
    K: Eq + Hash + Clone,
    T: Clone + Send + Sync + 'static,
{
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the flight for `key`, or start one with `start`
    ///
    /// `start` is only called when no flight for `key` is running.
    pub async fn run<F, Fut>(&self, key: K, start: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let (id, future) = {
            let mut flights = self.flights.lock().unwrap_or_else(PoisonError::into_inner);
            match flights.get(&key) {
                Some(flight) => (flight.id, flight.future.clone()),
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let future = start().boxed().shared();
                    flights.insert(
                        key.clone(),
                        Flight {
                            id,
                            future: future.clone(),
                        },
                    );
                    (id, future)
                }
            }
        };

        let result = future.await;

        let mut flights = self.flights.lock().unwrap_or_else(PoisonError::into_inner);
        if flights.get(&key).is_some_and(|flight| flight.id == id) {
            flights.remove(&key);
        }
        result
    }

    /// Number of keys with work in progress
    pub fn in_flight(&self) -> usize {
        self.flights
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

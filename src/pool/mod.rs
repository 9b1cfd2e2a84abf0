//! Connection pool (boundary component, §5/§9): a fixed-size pool of
//! reusable handles — specified here only at the boundary it crosses with
//! the core (`request`/`release`), since routing, auth, and wire protocol
//! for whatever the handles connect to are out of scope.
//!
//! This fixes the two bugs §9 flags in the original design: `request()`
//! blocks on a `Condvar` instead of spinning, and eviction can never pick a
//! connection that is currently checked out, because checked-out and idle
//! connections are tracked in two separate collections rather than one
//! list with a "busy" flag that a second thread could race past.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("pool is shut down")]
    ShutDown,
}

struct State<T> {
    idle: VecDeque<T>,
    in_use: usize,
    shut_down: bool,
}

/// A fixed-size pool of `T`. `T` is expected to be cheap to move (typically
/// an `Arc<Engine>` or similar handle).
pub struct Pool<T> {
    capacity: usize,
    state: Mutex<State<T>>,
    available: Condvar,
}

/// A checked-out connection. Returns itself to the pool on drop, so a
/// caller can never forget to `release()` and leak the pool's capacity.
pub struct Checkout<'p, T> {
    pool: &'p Pool<T>,
    value: Option<T>,
}

impl<T> Pool<T> {
    /// Builds a pool pre-filled with `resources` (its size becomes the
    /// pool's fixed capacity).
    pub fn new(resources: Vec<T>) -> Self {
        let capacity = resources.len();
        Pool {
            capacity,
            state: Mutex::new(State {
                idle: resources.into(),
                in_use: 0,
                shut_down: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Blocks until a connection is free, then checks it out. Never spins:
    /// parked on a condvar, woken by `release`/`Checkout::drop`.
    pub fn request(&self) -> Result<Checkout<'_, T>, PoolError> {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.shut_down {
                return Err(PoolError::ShutDown);
            }
            if let Some(value) = state.idle.pop_front() {
                state.in_use += 1;
                return Ok(Checkout { pool: self, value: Some(value) });
            }
            state = self.available.wait(state).unwrap();
        }
    }

    fn release(&self, value: T) {
        let mut state = self.state.lock().unwrap();
        state.in_use -= 1;
        state.idle.push_back(value);
        drop(state);
        self.available.notify_one();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn idle_count(&self) -> usize {
        self.state.lock().unwrap().idle.len()
    }

    pub fn in_use_count(&self) -> usize {
        self.state.lock().unwrap().in_use
    }

    /// Prevents further `request()` calls from succeeding. Blocks until
    /// every currently checked-out connection has been returned.
    pub fn shutdown(&self) {
        let mut state = self.state.lock().unwrap();
        state.shut_down = true;
        while state.in_use > 0 {
            state = self.available.wait(state).unwrap();
        }
    }
}

impl<T> std::ops::Deref for Checkout<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.value.as_ref().expect("connection already released")
    }
}

impl<T> std::ops::DerefMut for Checkout<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.value.as_mut().expect("connection already released")
    }
}

impl<T> Drop for Checkout<'_, T> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            self.pool.release(value);
        }
    }
}

/// A convenience alias for the pool's most common payload in this crate —
/// a shared handle to the engine an environment's connections talk to.
pub type EnginePool = Pool<Arc<crate::engine::Engine>>;

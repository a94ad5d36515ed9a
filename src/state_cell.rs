// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

use std::sync::{Condvar, Mutex};
use std::time::Instant;

/// Outcome of a bounded wait on a `StateCell`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Signalled,
    DeadlineReached,
}

/// A numeric state slot with mutual exclusion and condition-wait.
///
/// This is the one cross-thread signalling primitive in the crate: the
/// reception thread's start barrier, `Client::connect`'s deadline-bounded
/// wait for the handshake to reach CONNECTED (§4.6), and the Node state
/// machine (§3) are all built on it. `T` is "just a number" at this
/// layer — an enum discriminant compared for equality, nothing more.
///
/// A C-style API around a raw mutex would expose `lock`/`unlock`/`wait`
/// as separate operations; here they collapse into
/// `Condvar::wait_timeout`, which already releases the mutex while
/// parked and reacquires it before returning. The observable contract
/// — `set` wakes every waiter, `wait` tolerates spurious wakeups,
/// `get` never blocks on a waiter — is unchanged.
pub struct StateCell<T> {
    state: Mutex<T>,
    cond: Condvar,
}

impl<T: Copy + PartialEq> StateCell<T> {
    pub fn new(initial: T) -> StateCell<T> {
        StateCell {
            state: Mutex::new(initial),
            cond: Condvar::new(),
        }
    }

    /// Returns the latest visible value without requiring the lock.
    pub fn get(&self) -> T {
        *self.state.lock().expect("state cell mutex poisoned")
    }

    /// Atomically writes `v` and wakes every waiter.
    pub fn set(&self, v: T) {
        let mut guard = self.state.lock().expect("state cell mutex poisoned");
        *guard = v;
        self.cond.notify_all();
    }

    /// Blocks until the value differs from `current`, or `deadline`
    /// elapses. Spurious wakeups are absorbed internally.
    pub fn wait_for_change(&self, current: T, deadline: Option<Instant>) -> WaitOutcome {
        let mut guard = self.state.lock().expect("state cell mutex poisoned");

        loop {
            if *guard != current {
                return WaitOutcome::Signalled;
            }

            match deadline {
                None => {
                    guard = self.cond.wait(guard).expect("state cell mutex poisoned");
                }
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return WaitOutcome::DeadlineReached;
                    }

                    let (g, timeout_result) = self
                        .cond
                        .wait_timeout(guard, d - now)
                        .expect("state cell mutex poisoned");
                    guard = g;

                    if *guard != current {
                        return WaitOutcome::Signalled;
                    }
                    if timeout_result.timed_out() {
                        return WaitOutcome::DeadlineReached;
                    }
                }
            }
        }
    }

    /// Blocks until the value equals `want`, or `deadline` elapses.
    pub fn await_state(&self, want: T, deadline: Option<Instant>) -> WaitOutcome {
        let mut guard = self.state.lock().expect("state cell mutex poisoned");

        loop {
            if *guard == want {
                return WaitOutcome::Signalled;
            }

            match deadline {
                None => {
                    guard = self.cond.wait(guard).expect("state cell mutex poisoned");
                }
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return WaitOutcome::DeadlineReached;
                    }

                    let (g, timeout_result) = self
                        .cond
                        .wait_timeout(guard, d - now)
                        .expect("state cell mutex poisoned");
                    guard = g;

                    if *guard == want {
                        return WaitOutcome::Signalled;
                    }
                    if timeout_result.timed_out() {
                        return WaitOutcome::DeadlineReached;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn get_returns_latest_value() {
        let cell = StateCell::new(0);
        assert_eq!(0, cell.get());
        cell.set(3);
        assert_eq!(3, cell.get());
    }

    #[test]
    fn await_state_times_out_without_changing_state() {
        let cell = StateCell::new(0);
        let deadline = Instant::now() + Duration::from_millis(20);

        let outcome = cell.await_state(1, Some(deadline));

        assert_eq!(WaitOutcome::DeadlineReached, outcome);
        assert_eq!(0, cell.get());
    }

    #[test]
    fn await_state_returns_signalled_when_another_thread_sets_it() {
        let cell = Arc::new(StateCell::new(0));
        let writer = cell.clone();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            writer.set(1);
        });

        let outcome = cell.await_state(1, Some(Instant::now() + Duration::from_secs(2)));
        handle.join().unwrap();

        assert_eq!(WaitOutcome::Signalled, outcome);
        assert_eq!(1, cell.get());
    }

    #[test]
    fn wait_for_change_wakes_on_any_new_value() {
        let cell = Arc::new(StateCell::new(0));
        let writer = cell.clone();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            writer.set(7);
        });

        let outcome = cell.wait_for_change(0, Some(Instant::now() + Duration::from_secs(2)));
        handle.join().unwrap();

        assert_eq!(WaitOutcome::Signalled, outcome);
        assert_eq!(7, cell.get());
    }
}

/*! Process lifecycle as seen by background tasks.

A [Signal] is created by whoever owns the process lifecycle and handed to
each background task at construction. Tasks read it at the top of their
work loop, and sleep on it so that a transition ends their wait early.

[Signal]: struct.Signal.html
*/

use std::sync::{Arc, Condvar, Mutex, PoisonError};

use crate::time::Duration;

/// Lifecycle state of the accelerator service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum State {
    /// Shut down; background tasks must exit.
    Stopped,
    /// Shutting down; background tasks may finish their current duty cycle.
    Stopping,
    #[default]
    Running,
}

impl State {
    /// Query whether background tasks should keep running.
    pub fn is_alive(&self) -> bool {
        *self >= State::Stopping
    }
}

impl core::fmt::Display for State {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            State::Stopped => write!(f, "stopped"),
            State::Stopping => write!(f, "stopping"),
            State::Running => write!(f, "running"),
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    state: Mutex<State>,
    changed: Condvar,
}

/// A shared, observable service state.
///
/// Clones observe and drive the same state.
#[derive(Debug, Clone, Default)]
pub struct Signal {
    inner: Arc<Inner>,
}

impl Signal {
    /// Create a signal in the `Running` state.
    pub fn new() -> Signal {
        Signal::default()
    }

    /// Return the current state.
    pub fn state(&self) -> State {
        *self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Change the state, waking every task waiting on this signal.
    pub fn set(&self, state: State) {
        let mut current = self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *current != state {
            net_debug!("service: {} -> {}", *current, state);
            *current = state;
        }
        self.inner.changed.notify_all();
    }

    /// Shorthand for `set(State::Stopped)`.
    pub fn stop(&self) {
        self.set(State::Stopped)
    }

    /// Block for up to `timeout`, returning early once the state is no longer alive.
    ///
    /// Returns the state observed on wakeup.
    pub fn wait(&self, timeout: Duration) -> State {
        let guard = self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = self
            .inner
            .changed
            .wait_timeout_while(guard, timeout.into(), |state| state.is_alive())
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::thread;

    #[test]
    fn test_alive_range() {
        assert!(State::Running.is_alive());
        assert!(State::Stopping.is_alive());
        assert!(!State::Stopped.is_alive());
    }

    #[test]
    fn test_clones_share_state() {
        let signal = Signal::new();
        let other = signal.clone();
        assert_eq!(other.state(), State::Running);
        signal.set(State::Stopping);
        assert_eq!(other.state(), State::Stopping);
    }

    #[test]
    fn test_wait_times_out_while_running() {
        let signal = Signal::new();
        assert_eq!(signal.wait(Duration::from_millis(10)), State::Running);
    }

    #[test]
    fn test_wait_returns_on_stop() {
        let signal = Signal::new();
        let stopper = signal.clone();
        let handle = thread::spawn(move || {
            thread::sleep(::core::time::Duration::from_millis(20));
            stopper.stop();
        });
        // Far longer than the test would tolerate if the wakeup were missed.
        assert_eq!(signal.wait(Duration::from_secs(600)), State::Stopped);
        handle.join().unwrap();
    }

    #[test]
    fn test_wait_on_stopped_returns_immediately() {
        let signal = Signal::new();
        signal.stop();
        assert_eq!(signal.wait(Duration::from_secs(600)), State::Stopped);
    }
}

//! Build/idle synchronization
//!
//! Build requests may run concurrently with each other. Idle state is
//! exclusive: a thread entering it waits for every running request to finish
//! and keeps new ones out until it leaves. Threads asking for idle state are
//! served in arrival order. While in idle state, the owner may open a window
//! in which requests that only build a file scope are admitted.

use std::collections::VecDeque;
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct SyncState {
    /// Requests currently admitted.
    activity: usize,
    /// Threads holding or waiting for idle state. The head holds it once
    /// `idle_depth` is non-zero.
    idle_queue: VecDeque<ThreadId>,
    /// Reentrancy depth of the idle owner.
    idle_depth: usize,
    allow_file_scope: bool,
}

impl SyncState {
    fn can_start_request(&self, file_scope: bool) -> bool {
        if self.allow_file_scope {
            debug_assert!(self.idle_depth > 0, "file scope window open outside idle state");
            return file_scope;
        }
        // Join requests already running, or start when nobody holds or wants idle.
        self.activity > 0 || self.idle_queue.is_empty()
    }

    fn is_idle_owner(&self, thread: ThreadId) -> bool {
        self.idle_depth > 0 && self.idle_queue.front() == Some(&thread)
    }
}

/// Mutex and condition variable guarding the workspace's build activity.
#[derive(Debug, Default)]
pub struct BuildSynchronizationState {
    state: Mutex<SyncState>,
    changed: Condvar,
}

impl BuildSynchronizationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until a request may run, then count it as running.
    pub fn start_request(&self, file_scope: bool) {
        let mut state = self.state.lock();
        while !state.can_start_request(file_scope) {
            self.changed.wait(&mut state);
        }
        state.activity += 1;
    }

    pub fn end_request(&self) {
        let mut state = self.state.lock();
        debug_assert!(state.activity > 0, "end_request without a matching start_request");
        state.activity = state.activity.saturating_sub(1);
        self.changed.notify_all();
    }

    /// Enter idle state, waiting behind earlier idle requesters and for all
    /// running requests to finish. Reentrant for the owning thread.
    pub fn start_idle_state(&self) {
        let current = thread::current().id();
        let mut state = self.state.lock();
        if state.is_idle_owner(current) {
            state.idle_depth += 1;
            return;
        }

        state.idle_queue.push_back(current);
        while state.activity > 0 || state.idle_queue.front() != Some(&current) {
            self.changed.wait(&mut state);
        }
        debug_assert_eq!(state.idle_depth, 0);
        state.idle_depth = 1;
    }

    pub fn start_allowing_file_scope_requests(&self) {
        let mut state = self.state.lock();
        debug_assert!(
            state.is_idle_owner(thread::current().id()),
            "only the idle owner may open the file scope window"
        );
        debug_assert!(!state.allow_file_scope, "file scope window already open");
        state.allow_file_scope = true;
        self.changed.notify_all();
    }

    /// Close the file scope window, waiting for the requests it admitted.
    pub fn end_allowing_file_scope_requests(&self) {
        let mut state = self.state.lock();
        debug_assert!(
            state.is_idle_owner(thread::current().id()),
            "only the idle owner may close the file scope window"
        );
        debug_assert!(state.allow_file_scope, "file scope window not open");
        while state.activity > 0 {
            self.changed.wait(&mut state);
        }
        state.allow_file_scope = false;
    }

    pub fn end_idle_state(&self) {
        let current = thread::current().id();
        let mut state = self.state.lock();
        debug_assert!(state.is_idle_owner(current), "end_idle_state from a thread not in idle state");
        debug_assert!(!state.allow_file_scope);
        debug_assert_eq!(state.activity, 0);
        if !state.is_idle_owner(current) {
            return;
        }

        state.idle_depth -= 1;
        if state.idle_depth == 0 {
            state.idle_queue.pop_front();
            self.changed.notify_all();
        }
    }

    /// True while requests other than file scope requests are running.
    pub fn is_building(&self) -> bool {
        let state = self.state.lock();
        !state.allow_file_scope && state.activity > 0
    }

    /// True if the calling thread holds idle state.
    pub fn holds_idle_state(&self) -> bool {
        self.state.lock().is_idle_owner(thread::current().id())
    }

    pub fn activity(&self) -> usize {
        self.state.lock().activity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_requests_run_concurrently() {
        let sync = BuildSynchronizationState::new();
        sync.start_request(false);
        sync.start_request(false);
        assert_eq!(sync.activity(), 2);
        assert!(sync.is_building());
        sync.end_request();
        sync.end_request();
        assert!(!sync.is_building());
    }

    #[test]
    fn test_idle_state_is_reentrant() {
        let sync = BuildSynchronizationState::new();
        sync.start_idle_state();
        sync.start_idle_state();
        sync.end_idle_state();
        assert!(sync.holds_idle_state());
        sync.end_idle_state();
        assert!(!sync.holds_idle_state());
    }

    #[test]
    fn test_idle_waits_for_running_request() {
        let sync = Arc::new(BuildSynchronizationState::new());
        sync.start_request(false);

        let entered = Arc::new(AtomicBool::new(false));
        let handle = {
            let sync = Arc::clone(&sync);
            let entered = Arc::clone(&entered);
            thread::spawn(move || {
                sync.start_idle_state();
                entered.store(true, Ordering::SeqCst);
                sync.end_idle_state();
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!entered.load(Ordering::SeqCst));
        sync.end_request();
        handle.join().unwrap();
        assert!(entered.load(Ordering::SeqCst));
    }

    #[test]
    fn test_file_scope_window_admits_only_file_scope_requests() {
        let sync = Arc::new(BuildSynchronizationState::new());
        sync.start_idle_state();
        sync.start_allowing_file_scope_requests();

        let (tx, rx) = mpsc::channel();
        let file_scope = {
            let sync = Arc::clone(&sync);
            let tx = tx.clone();
            thread::spawn(move || {
                sync.start_request(true);
                tx.send("file scope").unwrap();
                sync.end_request();
            })
        };
        let full = {
            let sync = Arc::clone(&sync);
            thread::spawn(move || {
                sync.start_request(false);
                tx.send("full").unwrap();
                sync.end_request();
            })
        };

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "file scope");
        file_scope.join().unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

        sync.end_allowing_file_scope_requests();
        sync.end_idle_state();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "full");
        full.join().unwrap();
    }

    #[test]
    fn test_idle_requesters_served_in_order() {
        let sync = Arc::new(BuildSynchronizationState::new());
        let order = Arc::new(Mutex::new(Vec::new()));
        sync.start_idle_state();

        let mut handles = Vec::new();
        for i in 0..3 {
            let sync = Arc::clone(&sync);
            let order = Arc::clone(&order);
            handles.push(thread::spawn(move || {
                sync.start_idle_state();
                order.lock().push(i);
                sync.end_idle_state();
            }));
            // Let each waiter enqueue before the next one starts.
            thread::sleep(Duration::from_millis(30));
        }

        sync.end_idle_state();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_idle_exclusivity_under_load() {
        let sync = Arc::new(BuildSynchronizationState::new());
        let in_idle = Arc::new(AtomicBool::new(false));
        let violations = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for i in 0..8 {
            let sync = Arc::clone(&sync);
            let in_idle = Arc::clone(&in_idle);
            let violations = Arc::clone(&violations);
            handles.push(thread::spawn(move || {
                for _ in 0..50 {
                    if i % 4 == 0 {
                        sync.start_idle_state();
                        in_idle.store(true, Ordering::SeqCst);
                        thread::yield_now();
                        in_idle.store(false, Ordering::SeqCst);
                        sync.end_idle_state();
                    } else {
                        sync.start_request(false);
                        if in_idle.load(Ordering::SeqCst) {
                            violations.fetch_add(1, Ordering::SeqCst);
                        }
                        thread::yield_now();
                        sync.end_request();
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(violations.load(Ordering::SeqCst), 0);
        assert_eq!(sync.activity(), 0);
    }
}

//! DUChain lock
//!
//! A reader/writer lock with per-thread reentrancy counters:
//!
//! - any number of threads may hold read access at once;
//! - one thread holds write access, excluding all readers of other threads;
//! - a thread may re-acquire the lock it already holds, and a writer may
//!   additionally take read access;
//! - a thread holding *only* read access must not request write access.
//!   That upgrade is a usage error (it would deadlock against another reader
//!   doing the same) and is refused.
//!
//! Waiting writers block new readers so writers are not starved; threads
//! that already read are never blocked by that, which keeps reentrant reads
//! deadlock free.
//!
//! Use the scoped guards [`DUChainReadLocker`] and [`DUChainWriteLocker`];
//! they release on drop, including during unwinding.

use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::thread::{self, ThreadId};
use tracing::error;

#[derive(Default)]
struct LockState {
    writer: Option<ThreadId>,
    write_depth: u32,
    /// Read acquisitions made by the writer thread while it writes.
    writer_read_depth: u32,
    readers: HashMap<ThreadId, u32>,
    waiting_writers: u32,
}

/// Reentrant reader/writer lock guarding a DUChain.
#[derive(Default)]
pub struct DUChainLock {
    state: Mutex<LockState>,
    changed: Condvar,
}

impl std::fmt::Debug for DUChainLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("DUChainLock")
            .field("writer", &state.writer)
            .field("write_depth", &state.write_depth)
            .field("readers", &state.readers.len())
            .finish()
    }
}

impl DUChainLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire read access, blocking while another thread writes.
    pub fn lock_for_read(&self) {
        let me = thread::current().id();
        let mut state = self.state.lock();

        if state.writer == Some(me) {
            state.writer_read_depth += 1;
            return;
        }
        if let Some(depth) = state.readers.get_mut(&me) {
            *depth += 1;
            return;
        }

        while state.writer.is_some() || state.waiting_writers > 0 {
            self.changed.wait(&mut state);
        }
        state.readers.insert(me, 1);
    }

    /// Acquire write access, blocking until no other thread holds the lock.
    ///
    /// Returns `false` without acquiring when the calling thread holds read
    /// access only. In debug builds that case panics.
    pub fn lock_for_write(&self) -> bool {
        let me = thread::current().id();
        let mut state = self.state.lock();

        if state.writer == Some(me) {
            state.write_depth += 1;
            return true;
        }
        if state.readers.contains_key(&me) {
            drop(state);
            error!("Thread holding a DUChain read lock requested write access");
            debug_assert!(false, "DUChain read lock cannot be upgraded to a write lock");
            return false;
        }

        state.waiting_writers += 1;
        while state.writer.is_some() || !state.readers.is_empty() {
            self.changed.wait(&mut state);
        }
        state.waiting_writers -= 1;
        state.writer = Some(me);
        state.write_depth = 1;
        true
    }

    /// Release one level of read access held by the calling thread.
    pub fn release_read_lock(&self) {
        let me = thread::current().id();
        let mut state = self.state.lock();

        if state.writer == Some(me) && state.writer_read_depth > 0 {
            state.writer_read_depth -= 1;
            return;
        }

        match state.readers.get_mut(&me) {
            Some(depth) if *depth > 1 => *depth -= 1,
            Some(_) => {
                state.readers.remove(&me);
                self.changed.notify_all();
            }
            None => {
                drop(state);
                debug_assert!(false, "released a DUChain read lock that was not held");
            }
        }
    }

    /// Release one level of write access held by the calling thread.
    pub fn release_write_lock(&self) {
        let me = thread::current().id();
        let mut state = self.state.lock();

        if state.writer != Some(me) {
            drop(state);
            debug_assert!(false, "released a DUChain write lock that was not held");
            return;
        }

        state.write_depth -= 1;
        if state.write_depth == 0 {
            state.writer = None;
            // Reads nested inside the write scope outlive it as plain reads.
            let nested_reads = std::mem::take(&mut state.writer_read_depth);
            if nested_reads > 0 {
                state.readers.insert(me, nested_reads);
            }
            self.changed.notify_all();
        }
    }

    /// Whether the calling thread holds read or write access.
    pub fn current_thread_has_read_lock(&self) -> bool {
        let me = thread::current().id();
        let state = self.state.lock();
        state.writer == Some(me) || state.readers.contains_key(&me)
    }

    pub fn current_thread_has_write_lock(&self) -> bool {
        let me = thread::current().id();
        self.state.lock().writer == Some(me)
    }

    /// Number of threads currently holding read-only access.
    pub fn reader_count(&self) -> usize {
        self.state.lock().readers.len()
    }

    pub fn has_writer(&self) -> bool {
        self.state.lock().writer.is_some()
    }
}

// ============================================================================
// Guards
// ============================================================================

/// Scoped read access. Releases on drop.
pub struct DUChainReadLocker<'a> {
    lock: &'a DUChainLock,
    locked: bool,
}

impl<'a> DUChainReadLocker<'a> {
    pub fn new(lock: &'a DUChainLock) -> Self {
        lock.lock_for_read();
        Self { lock, locked: true }
    }

    pub fn locked(&self) -> bool {
        self.locked
    }

    /// Re-acquire after an explicit `unlock`.
    pub fn lock(&mut self) {
        if !self.locked {
            self.lock.lock_for_read();
            self.locked = true;
        }
    }

    pub fn unlock(&mut self) {
        if self.locked {
            self.lock.release_read_lock();
            self.locked = false;
        }
    }
}

impl Drop for DUChainReadLocker<'_> {
    fn drop(&mut self) {
        self.unlock();
    }
}

/// Scoped write access. Releases on drop.
///
/// Acquisition can be refused (read-to-write upgrade); check
/// [`DUChainWriteLocker::locked`] in release builds.
pub struct DUChainWriteLocker<'a> {
    lock: &'a DUChainLock,
    locked: bool,
}

impl<'a> DUChainWriteLocker<'a> {
    pub fn new(lock: &'a DUChainLock) -> Self {
        let locked = lock.lock_for_write();
        Self { lock, locked }
    }

    pub fn locked(&self) -> bool {
        self.locked
    }

    pub fn lock(&mut self) -> bool {
        if !self.locked {
            self.locked = self.lock.lock_for_write();
        }
        self.locked
    }

    pub fn unlock(&mut self) {
        if self.locked {
            self.lock.release_write_lock();
            self.locked = false;
        }
    }
}

impl Drop for DUChainWriteLocker<'_> {
    fn drop(&mut self) {
        self.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Barrier};
    use std::time::Duration;

    #[test]
    fn test_reentrant_read() {
        let lock = DUChainLock::new();
        let _outer = DUChainReadLocker::new(&lock);
        {
            let _inner = DUChainReadLocker::new(&lock);
            assert!(lock.current_thread_has_read_lock());
        }
        assert!(lock.current_thread_has_read_lock());
        assert!(!lock.current_thread_has_write_lock());
    }

    #[test]
    fn test_writer_may_read_and_rewrite() {
        let lock = DUChainLock::new();
        let mut write = DUChainWriteLocker::new(&lock);
        assert!(write.locked());
        {
            let _read = DUChainReadLocker::new(&lock);
            let nested = DUChainWriteLocker::new(&lock);
            assert!(nested.locked());
            assert!(lock.current_thread_has_write_lock());
        }
        write.unlock();
        assert!(!lock.current_thread_has_read_lock());
        assert!(!lock.has_writer());
    }

    #[test]
    fn test_nested_read_survives_write_release() {
        let lock = DUChainLock::new();
        let mut write = DUChainWriteLocker::new(&lock);
        let read = DUChainReadLocker::new(&lock);
        write.unlock();

        assert!(lock.current_thread_has_read_lock());
        assert!(!lock.current_thread_has_write_lock());
        assert_eq!(lock.reader_count(), 1);
        drop(read);
        assert_eq!(lock.reader_count(), 0);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "cannot be upgraded")]
    fn test_upgrade_is_rejected() {
        let lock = DUChainLock::new();
        let _read = DUChainReadLocker::new(&lock);
        let _write = DUChainWriteLocker::new(&lock);
    }

    #[test]
    fn test_concurrent_readers_do_not_block() {
        let lock = Arc::new(DUChainLock::new());
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let lock = Arc::clone(&lock);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let _read = DUChainReadLocker::new(&lock);
                    // Both threads must be inside the read section together.
                    barrier.wait();
                })
            })
            .collect();

        for handle in handles {
            handle.join().expect("reader thread panicked");
        }
    }

    #[test]
    fn test_writer_waits_for_readers() {
        let lock = Arc::new(DUChainLock::new());
        let wrote = Arc::new(AtomicBool::new(false));

        let read = DUChainReadLocker::new(&lock);
        let writer = {
            let lock = Arc::clone(&lock);
            let wrote = Arc::clone(&wrote);
            thread::spawn(move || {
                let _write = DUChainWriteLocker::new(&lock);
                wrote.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!wrote.load(Ordering::SeqCst));
        drop(read);

        writer.join().expect("writer thread panicked");
        assert!(wrote.load(Ordering::SeqCst));
    }
}

//! Task context id registry (§4.1).
//!
//! Every running task gets a small integer id, stamped into its log lines
//! for correlation. Per the design notes, this is an explicit process-wide
//! registry keyed by task identity — not `thread_local!` magic — so a
//! multi-OS-thread deployment only has to partition this map, not rewrite
//! every call site that reads the id.
//!
//! Calls are always made by the owning task about itself, so contention on
//! the registry is rare: one write per task start, one write per task join,
//! and occasional reads for logging.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread::ThreadId;

use parking_lot::Mutex;

static NEXT_ID: AtomicU32 = AtomicU32::new(0);
static IDS: Mutex<Option<HashMap<ThreadId, u32>>> = Mutex::new(None);

fn registry() -> parking_lot::MappedMutexGuard<'static, HashMap<ThreadId, u32>> {
    let mut guard = IDS.lock();
    if guard.is_none() {
        *guard = Some(HashMap::new());
    }
    parking_lot::MutexGuard::map(guard, |o| o.as_mut().unwrap())
}

/// Seed the id counter from a per-process salt so ids differ across
/// restarts (per §4.1). Call once at process start; safe to skip in tests,
/// where a deterministic sequence starting at 1 is preferred.
pub fn seed_from_process_salt() {
    let salt = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    NEXT_ID.store(salt.wrapping_add(1) & 0x7fff_ffff, Ordering::SeqCst);
}

/// Assign a fresh id to the calling task and record it. Returns the id.
pub fn generate_id() -> u32 {
    let id = NEXT_ID.fetch_add(1, Ordering::SeqCst).max(1);
    set_id(id);
    id
}

/// The calling task's id, or 0 if none has been assigned yet.
pub fn get_id() -> u32 {
    registry()
        .get(&std::thread::current().id())
        .copied()
        .unwrap_or(0)
}

/// Replace the calling task's id, returning the previous value (0 if unset).
pub fn set_id(v: u32) -> u32 {
    registry().insert(std::thread::current().id(), v).unwrap_or(0)
}

/// Remove the calling task's entry (called when its coroutine is joined).
pub fn clear() {
    registry().remove(&std::thread::current().id());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_then_get_roundtrips() {
        let t = std::thread::spawn(|| {
            assert_eq!(get_id(), 0);
            let id = generate_id();
            assert_ne!(id, 0);
            assert_eq!(get_id(), id);
            id
        });
        let id = t.join().unwrap();
        assert_ne!(id, 0);
    }

    #[test]
    fn set_id_returns_previous() {
        let t = std::thread::spawn(|| {
            assert_eq!(set_id(5), 0);
            assert_eq!(get_id(), 5);
            assert_eq!(set_id(9), 5);
            assert_eq!(get_id(), 9);
        });
        t.join().unwrap();
    }

    #[test]
    fn clear_resets_to_zero() {
        let t = std::thread::spawn(|| {
            set_id(42);
            clear();
            assert_eq!(get_id(), 0);
        });
        t.join().unwrap();
    }

    #[test]
    fn ids_are_per_thread() {
        let a = std::thread::spawn(|| {
            set_id(1);
            std::thread::sleep(std::time::Duration::from_millis(20));
            get_id()
        });
        let b = std::thread::spawn(|| {
            set_id(2);
            std::thread::sleep(std::time::Duration::from_millis(20));
            get_id()
        });
        assert_eq!(a.join().unwrap(), 1);
        assert_eq!(b.join().unwrap(), 2);
    }
}

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError, WaitTimeoutResult};
use std::time::Duration;

/// Lock helpers that recover the inner value from a poisoned lock.
///
/// A worker panic must not cascade into the rest of the application through
/// poisoned mutexes; the data guarded here (counter baselines, config
/// snapshots, ring buffers) stays structurally valid even if a holder
/// panicked mid-update.
pub(crate) trait MutexExt<T> {
    fn lock_unpoisoned(&self) -> MutexGuard<'_, T>;
}

impl<T> MutexExt<T> for Mutex<T> {
    fn lock_unpoisoned(&self) -> MutexGuard<'_, T> {
        self.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub(crate) trait CondvarExt {
    fn wait_timeout_unpoisoned<'a, T>(
        &self,
        guard: MutexGuard<'a, T>,
        dur: Duration,
    ) -> (MutexGuard<'a, T>, WaitTimeoutResult);
}

impl CondvarExt for Condvar {
    fn wait_timeout_unpoisoned<'a, T>(
        &self,
        guard: MutexGuard<'a, T>,
        dur: Duration,
    ) -> (MutexGuard<'a, T>, WaitTimeoutResult) {
        self.wait_timeout(guard, dur)
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Condvar, Mutex};
    use std::time::Duration;

    use super::*;

    #[test]
    fn mutex_lock_survives_poisoning() {
        let lock = Arc::new(Mutex::new(7u32));
        let poisoner = lock.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("poison");
        })
        .join();

        assert_eq!(*lock.lock_unpoisoned(), 7);
    }

    #[test]
    fn condvar_timeout_returns_guard() {
        let lock = Mutex::new(0u32);
        let cv = Condvar::new();
        let guard = lock.lock_unpoisoned();
        let (guard, result) = cv.wait_timeout_unpoisoned(guard, Duration::from_millis(1));
        assert!(result.timed_out());
        assert_eq!(*guard, 0);
    }
}

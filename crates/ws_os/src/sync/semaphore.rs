use std::sync::{Condvar, Mutex, PoisonError};

// -----------------------------------------------------------------------------
// Semaphore

/// A counting semaphore.
///
/// [`wait`] takes one permit, blocking while none are available; [`post`]
/// adds permits and wakes as many blocked waiters. Permits are anonymous and
/// never expire, so a `post` that arrives before the matching `wait` is
/// simply banked.
///
/// Built on `Mutex` + `Condvar`; the platforms we target have no portable
/// semaphore in the standard library.
///
/// # Examples
///
/// ```
/// use ws_os::sync::Semaphore;
///
/// let sema = Semaphore::new(1);
/// sema.wait();           // consumes the initial permit
/// sema.post(1);
/// sema.wait();           // consumes the posted permit
/// ```
///
/// [`wait`]: Semaphore::wait
/// [`post`]: Semaphore::post
pub struct Semaphore {
    permits: Mutex<usize>,
    available: Condvar,
}

impl Semaphore {
    /// Creates a semaphore holding `permits` initial permits.
    pub const fn new(permits: usize) -> Self {
        Self {
            permits: Mutex::new(permits),
            available: Condvar::new(),
        }
    }

    /// Adds `n` permits and wakes up to `n` blocked waiters.
    pub fn post(&self, n: usize) {
        let mut permits = self
            .permits
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *permits += n;

        if n == 1 {
            self.available.notify_one();
        } else {
            self.available.notify_all();
        }
    }

    /// Blocks until a permit is available, then takes it.
    pub fn wait(&self) {
        let mut permits = self
            .permits
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while *permits == 0 {
            permits = self
                .available
                .wait(permits)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *permits -= 1;
    }
}

impl core::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let permits = self
            .permits
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("Semaphore").field("permits", &*permits).finish()
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use super::Semaphore;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn banked_permits() {
        let sema = Semaphore::new(0);
        sema.post(2);
        sema.wait();
        sema.wait();
    }

    #[test]
    fn wakes_blocked_waiter() {
        let sema = Arc::new(Semaphore::new(0));
        let waiter = {
            let sema = Arc::clone(&sema);
            thread::spawn(move || sema.wait())
        };
        sema.post(1);
        waiter.join().unwrap();
    }

    #[test]
    fn one_post_releases_every_waiter_eventually() {
        let sema = Arc::new(Semaphore::new(0));
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let sema = Arc::clone(&sema);
                thread::spawn(move || sema.wait())
            })
            .collect();

        sema.post(4);
        for waiter in waiters {
            waiter.join().unwrap();
        }
    }
}

use std::cell::UnsafeCell;
use std::sync::Arc;

/// A libc semaphore that provides signalling between threads. Memory ordering
/// properties are the ones provided by [`libc::sem_post`] and
/// [`libc::sem_wait`].
///
/// Third-party semaphore crates mostly don't have the semantics we need here
/// (a plain signalling primitive with the ability to block): they're either
/// meant for async contexts, can't block, or are designed to guard a resource
/// like a lock. The libc semaphore has well-understood performance and is what
/// the worker dispatch path is built around.
#[derive(Clone)]
pub struct LibcSemaphore {
    // SAFETY: the `LibcSemWrapper` must not be moved
    inner: Arc<LibcSemWrapper>,
}

impl LibcSemaphore {
    /// Create a new semaphore with the given initial value. See `sem_init(3)`.
    pub fn new(val: libc::c_uint) -> Self {
        let rv = Self {
            // moves the wrapper into the Arc, which is fine since it hasn't
            // been initialized yet
            inner: Arc::new(LibcSemWrapper::new()),
        };

        // the wrapper is in the Arc and will never move again
        unsafe { rv.inner.init(val) };

        rv
    }

    /// Decrement the semaphore, blocking until that is possible. See
    /// `sem_wait(3)`.
    pub fn wait(&self) {
        unsafe { self.inner.wait() }
    }

    /// Increment the semaphore, waking one waiter. See `sem_post(3)`.
    pub fn post(&self) {
        unsafe { self.inner.post() }
    }

    /// The current semaphore value. See `sem_getvalue(3)`.
    pub fn value(&self) -> libc::c_int {
        unsafe { self.inner.value() }
    }
}

impl std::fmt::Debug for LibcSemaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LibcSemaphore")
            // it has always been initialized by this point
            .field("value", unsafe { &self.inner.value() })
            .finish()
    }
}

/// A wrapper for a [`libc::sem_t`].
struct LibcSemWrapper {
    // SAFETY: the `sem_t` must not be moved
    inner: UnsafeCell<libc::sem_t>,
}

unsafe impl Send for LibcSemWrapper {}
unsafe impl Sync for LibcSemWrapper {}

impl LibcSemWrapper {
    /// Create an uninitialized semaphore. After the object has moved to its
    /// final memory location, it must be initialized with [`Self::init`].
    fn new() -> Self {
        Self {
            inner: UnsafeCell::new(unsafe { std::mem::zeroed() }),
        }
        // sem_init() cannot be called here since the sem_t is moved out of
        // this function
    }

    /// Initialize the semaphore.
    ///
    /// SAFETY: must be called exactly once, before any other operation.
    unsafe fn init(&self, val: libc::c_uint) {
        unsafe { libc::sem_init(self.inner.get(), 0, val) };
    }

    /// SAFETY: the semaphore must have been initialized with [`Self::init`]
    /// and not moved since.
    unsafe fn wait(&self) {
        loop {
            if unsafe { libc::sem_wait(self.inner.get()) } == 0 {
                break;
            }

            match std::io::Error::last_os_error().kind() {
                std::io::ErrorKind::Interrupted => {}
                e => panic!("Unexpected semaphore wait error: {e}"),
            }
        }
    }

    /// SAFETY: the semaphore must have been initialized with [`Self::init`]
    /// and not moved since.
    unsafe fn post(&self) {
        if unsafe { libc::sem_post(self.inner.get()) } == 0 {
            return;
        }

        panic!(
            "Unexpected semaphore post error: {}",
            std::io::Error::last_os_error().kind()
        );
    }

    /// SAFETY: the semaphore must have been initialized with [`Self::init`]
    /// and not moved since.
    unsafe fn value(&self) -> libc::c_int {
        let mut val = 0;
        if unsafe { libc::sem_getvalue(self.inner.get(), &mut val) } == 0 {
            return val;
        }

        panic!(
            "Unexpected semaphore getvalue error: {}",
            std::io::Error::last_os_error().kind()
        );
    }
}

impl std::ops::Drop for LibcSemWrapper {
    fn drop(&mut self) {
        unsafe { libc::sem_destroy(self.inner.get()) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone() {
        let sem = LibcSemaphore::new(0);
        let sem_clone = sem.clone();

        assert_eq!(sem.value(), 0);
        sem.post();
        assert_eq!(sem.value(), 1);
        sem_clone.wait();
        assert_eq!(sem.value(), 0);
    }

    #[test]
    fn test_single_thread() {
        let sem = LibcSemaphore::new(0);
        sem.post();
        sem.wait();

        let sem = LibcSemaphore::new(0);
        sem.post();
        sem.post();
        sem.post();
        sem.wait();
        sem.wait();
        sem.wait();

        let sem = LibcSemaphore::new(3);
        sem.wait();
        sem.wait();
        sem.wait();
    }

    #[test]
    fn test_multi_thread() {
        let sem = LibcSemaphore::new(0);
        let sem_clone = sem.clone();

        let t0 = std::time::Instant::now();

        let handle = std::thread::spawn(move || {
            sem_clone.post();
            std::thread::sleep(std::time::Duration::from_millis(50));
            sem_clone.post();
        });

        sem.wait();
        let elapsed = t0.elapsed().as_millis();
        assert!(elapsed < 50, "Unexpected elapsed time: {elapsed}");

        sem.wait();
        let elapsed = t0.elapsed().as_millis();
        assert!(elapsed >= 50, "Unexpected elapsed time: {elapsed}");

        handle.join().unwrap();
    }
}

use std::sync::Arc;

use atomic_refcell::AtomicRefCell;

use crate::host::Host;
use crate::utility::{Magic, ObjectCounter};

/// A shared reference to a callback that runs on a host. Cloning a `TaskRef`
/// shares the underlying callback; the callback is dropped when the last
/// reference goes away, which is what releases anything it captured (e.g. a
/// packet scheduled for delivery).
#[derive(Clone)]
pub struct TaskRef {
    inner: Arc<AtomicRefCell<TaskInner>>,
}

struct TaskInner {
    callback: Box<dyn FnMut(&Host) + Send + Sync>,
    magic: Magic<0xe0408897>,
    _counter: ObjectCounter,
}

impl TaskRef {
    pub fn new<T: FnMut(&Host) + Send + Sync + 'static>(callback: T) -> Self {
        Self {
            inner: Arc::new(AtomicRefCell::new(TaskInner {
                callback: Box::new(callback),
                magic: Magic::new(),
                _counter: ObjectCounter::new("TaskRef"),
            })),
        }
    }

    /// Run the task on the given host. Panics if the task is already
    /// executing (tasks must not recursively run themselves).
    pub fn execute(&self, host: &Host) {
        let mut inner = self.inner.borrow_mut();
        inner.magic.debug_check();
        (inner.callback)(host)
    }
}

impl std::fmt::Debug for TaskRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRef")
            .field("inner", &Arc::as_ptr(&self.inner))
            .finish()
    }
}

impl PartialEq for TaskRef {
    /// Two `TaskRef`s are equal iff they reference the same callback.
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for TaskRef {}

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::host::{HostId, HostParameters};

    fn test_host() -> Host {
        Host::new(
            HostParameters {
                id: HostId::from(0),
                name: "testhost".into(),
                seed: 0,
                log_level: None,
            },
            Ipv4Addr::new(11, 0, 0, 1),
        )
    }

    #[test]
    fn test_execute() {
        let host = test_host();
        let counter = Arc::new(AtomicU32::new(0));

        let counter_clone = Arc::clone(&counter);
        let task = TaskRef::new(move |_host| {
            counter_clone.fetch_add(1, Ordering::Relaxed);
        });

        task.execute(&host);
        task.execute(&host);
        assert_eq!(counter.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_clones_are_equal() {
        let a = TaskRef::new(|_| {});
        let b = a.clone();
        let c = TaskRef::new(|_| {});

        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}

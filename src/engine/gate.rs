use std::num::NonZeroUsize;
use std::sync::{Condvar, Mutex, PoisonError};

/// Bounds the number of task bodies running at once. Without a limit every
/// operation is a no-op.
#[derive(Debug, Default)]
pub(crate) struct Gate {
    limit: Option<NonZeroUsize>,
    busy: Mutex<usize>,
    freed: Condvar,
}

impl Gate {
    pub(crate) fn new(limit: Option<NonZeroUsize>) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    pub(crate) fn acquire(&self) {
        let Some(limit) = self.limit else { return };

        let mut busy = self.busy.lock().unwrap_or_else(PoisonError::into_inner);
        while *busy >= limit.get() {
            busy = self
                .freed
                .wait(busy)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *busy += 1;
    }

    pub(crate) fn release(&self) {
        if self.limit.is_none() {
            return;
        }

        let mut busy = self.busy.lock().unwrap_or_else(PoisonError::into_inner);
        *busy = busy.saturating_sub(1);
        self.freed.notify_one();
    }

    /// Acquires a slot held until the returned guard is dropped.
    pub(crate) fn slot(&self) -> Slot<'_> {
        self.acquire();
        Slot(self)
    }
}

pub(crate) struct Slot<'a>(&'a Gate);

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        self.0.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_unbounded_never_blocks() {
        let gate = Gate::new(None);
        let _a = gate.slot();
        let _b = gate.slot();
        let _c = gate.slot();
    }

    #[test]
    fn test_limit_is_respected() {
        let gate = Arc::new(Gate::new(NonZeroUsize::new(2)));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let (gate, active, peak) = (gate.clone(), active.clone(), peak.clone());
                thread::spawn(move || {
                    let _slot = gate.slot();
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(10));
                    active.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}

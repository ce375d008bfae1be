use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Cooperative shutdown handle shared between run loops and a signal handler.
///
/// Loops finish their current lease/download/archive cycle and check the flag
/// between cycles; long pauses go through [`Shutdown::wait_for`] so a trigger
/// interrupts them immediately instead of sleeping them out.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        let (lock, cvar) = &*self.inner;
        let mut stopped = lock.lock().unwrap();
        *stopped = true;
        cvar.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        let (lock, _) = &*self.inner;
        *lock.lock().unwrap()
    }

    /// Waits up to `duration`, returning true if shutdown was triggered
    /// before the wait elapsed.
    pub fn wait_for(&self, duration: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let deadline = Instant::now() + duration;
        let mut stopped = lock.lock().unwrap();
        loop {
            if *stopped {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _timeout) = cvar.wait_timeout(stopped, deadline - now).unwrap();
            stopped = guard;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn wait_elapses_when_not_triggered() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.wait_for(Duration::from_millis(20)));
        assert!(!shutdown.is_triggered());
    }

    #[test]
    fn trigger_interrupts_wait() {
        let shutdown = Shutdown::new();
        let handle = {
            let shutdown = shutdown.clone();
            thread::spawn(move || shutdown.wait_for(Duration::from_secs(30)))
        };
        thread::sleep(Duration::from_millis(20));
        shutdown.trigger();
        assert!(handle.join().unwrap());
    }
}

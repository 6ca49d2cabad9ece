//! Background worker lifecycle.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// A cancelable shutdown signal shared by background workers.
///
/// Workers poll [`ShutdownToken::is_stopped`] or sleep with
/// [`ShutdownToken::wait_timeout`], which returns early when shutdown
/// is requested.
#[derive(Clone)]
pub struct ShutdownToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl ShutdownToken {
    /// Creates a fresh, unstopped token.
    pub fn new() -> Self {
        Self {
            inner: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    /// Requests shutdown and wakes all sleepers.
    pub fn stop(&self) {
        let (lock, cvar) = &*self.inner;
        *lock.lock() = true;
        cvar.notify_all();
    }

    /// Returns true if shutdown has been requested.
    pub fn is_stopped(&self) -> bool {
        *self.inner.0.lock()
    }

    /// Sleeps for up to `duration`, waking early on shutdown.
    ///
    /// Returns true if shutdown was requested.
    pub fn wait_timeout(&self, duration: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let mut stopped = lock.lock();
        if *stopped {
            return true;
        }
        cvar.wait_for(&mut stopped, duration);
        *stopped
    }
}

impl Default for ShutdownToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks background worker threads and joins them on close.
///
/// A registry alternates between open and closed. `open` hands out a
/// fresh token; `close` stops that token and joins every worker, after
/// which the registry can be opened again.
pub struct BackgroundRegistry {
    workers: Mutex<Vec<JoinHandle<()>>>,
    token: Mutex<ShutdownToken>,
}

impl BackgroundRegistry {
    /// Creates a closed registry.
    pub fn new() -> Self {
        let token = ShutdownToken::new();
        token.stop();
        Self {
            workers: Mutex::new(Vec::new()),
            token: Mutex::new(token),
        }
    }

    /// Opens the registry, returning the shutdown token workers must
    /// observe.
    pub fn open(&self) -> ShutdownToken {
        let token = ShutdownToken::new();
        *self.token.lock() = token.clone();
        token
    }

    /// The current shutdown token.
    pub fn token(&self) -> ShutdownToken {
        self.token.lock().clone()
    }

    /// Spawns a worker that receives the current shutdown token.
    pub fn spawn<F>(&self, f: F)
    where
        F: FnOnce(ShutdownToken) + Send + 'static,
    {
        let token = self.token();
        let handle = std::thread::spawn(move || f(token));
        self.workers.lock().push(handle);
    }

    /// Stops the current token and joins every worker.
    pub fn close(&self) {
        self.token.lock().stop();
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in workers {
            let _ = handle.join();
        }
    }
}

impl Default for BackgroundRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// Emergency interrupt line
//
// The line calls a registered handler on each rising edge while delivery is
// enabled. Edges that arrive while delivery is disabled are dropped, not queued.

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Callback run on a rising edge
pub type EdgeHandler = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum InterruptError {
    #[error("A rising-edge handler is already registered")]
    AlreadyRegistered,

    #[error("Failed to read GPIO value {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to start edge watcher: {0}")]
    Spawn(std::io::Error),
}

/// Capability to deliver rising edges and mask them
pub trait InterruptSource: Send + Sync + 'static {
    fn register_rising_edge(&self, handler: EdgeHandler) -> Result<(), InterruptError>;

    fn enable(&self);

    fn disable(&self);

    fn is_enabled(&self) -> bool;
}

/// In-process interrupt line, fired by calling [`SoftInterruptLine::fire`]
#[derive(Default)]
pub struct SoftInterruptLine {
    handler: Mutex<Option<EdgeHandler>>,
    enabled: AtomicBool,
}

impl SoftInterruptLine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise a rising edge. Returns false if delivery was disabled or no
    /// handler is registered.
    pub fn fire(&self) -> bool {
        if !self.enabled.load(Ordering::Acquire) {
            debug!("Edge dropped, delivery disabled");
            return false;
        }
        // Clone out so the handler may call back into enable/disable
        let handler = self.handler.lock().clone();
        match handler {
            Some(handler) => {
                handler();
                true
            }
            None => false,
        }
    }
}

impl InterruptSource for SoftInterruptLine {
    fn register_rising_edge(&self, handler: EdgeHandler) -> Result<(), InterruptError> {
        let mut slot = self.handler.lock();
        if slot.is_some() {
            return Err(InterruptError::AlreadyRegistered);
        }
        *slot = Some(handler);
        Ok(())
    }

    fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }

    fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }
}

/// Rising-edge watcher on a sysfs GPIO `value` file.
///
/// The pin must already be exported and configured as an input. Edges are
/// detected by sampling on a dedicated thread, and the handler runs on that
/// thread, so it is never re-entered.
pub struct SysfsEdgeLine {
    path: PathBuf,
    poll_interval: Duration,
    enabled: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SysfsEdgeLine {
    pub fn new(path: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            path: path.into(),
            poll_interval,
            enabled: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        }
    }
}

fn read_level(path: &Path) -> std::io::Result<bool> {
    Ok(std::fs::read_to_string(path)?.trim() == "1")
}

impl InterruptSource for SysfsEdgeLine {
    fn register_rising_edge(&self, handler: EdgeHandler) -> Result<(), InterruptError> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Err(InterruptError::AlreadyRegistered);
        }

        let initial = read_level(&self.path).map_err(|source| InterruptError::Read {
            path: self.path.clone(),
            source,
        })?;

        let path = self.path.clone();
        let poll_interval = self.poll_interval;
        let enabled = Arc::clone(&self.enabled);
        let running = Arc::clone(&self.running);
        running.store(true, Ordering::Release);

        let handle = thread::Builder::new()
            .name("gizmo-edge".into())
            .spawn(move || {
                let mut last = initial;
                let mut read_failing = false;

                while running.load(Ordering::Acquire) {
                    match read_level(&path) {
                        Ok(level) => {
                            if read_failing {
                                info!("GPIO {} readable again", path.display());
                                read_failing = false;
                            }
                            if level && !last && enabled.load(Ordering::Acquire) {
                                handler();
                            }
                            last = level;
                        }
                        Err(e) => {
                            if !read_failing {
                                warn!("Failed to read GPIO {}: {}", path.display(), e);
                                read_failing = true;
                            }
                        }
                    }
                    thread::sleep(poll_interval);
                }
                debug!("Edge watcher on {} stopped", path.display());
            })
            .map_err(InterruptError::Spawn)?;

        info!(
            "Watching {} for rising edges every {:?}",
            self.path.display(),
            self.poll_interval
        );
        *worker = Some(handle);
        Ok(())
    }

    fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }

    fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }
}

impl Drop for SysfsEdgeLine {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.worker.lock().take() {
            // The last owner can be the handler itself, running on the watcher
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                warn!("Edge watcher thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    fn counter() -> (Arc<AtomicUsize>, EdgeHandler) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&count);
        let handler: EdgeHandler = Arc::new(move || {
            inner.fetch_add(1, Ordering::SeqCst);
        });
        (count, handler)
    }

    fn wait_for(count: &AtomicUsize, expected: usize) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if count.load(Ordering::SeqCst) >= expected {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_soft_line_respects_mask() {
        let line = SoftInterruptLine::new();
        let (count, handler) = counter();
        line.register_rising_edge(handler).unwrap();

        assert!(!line.fire(), "line starts disabled");
        line.enable();
        assert!(line.fire());
        line.disable();
        assert!(!line.fire());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_soft_line_single_handler() {
        let line = SoftInterruptLine::new();
        let (_, first) = counter();
        let (_, second) = counter();
        line.register_rising_edge(first).unwrap();
        assert!(matches!(
            line.register_rising_edge(second),
            Err(InterruptError::AlreadyRegistered)
        ));
    }

    #[test]
    fn test_sysfs_line_detects_rising_edge() {
        let dir = tempfile::tempdir().unwrap();
        let value = dir.path().join("value");
        std::fs::write(&value, "0\n").unwrap();

        let line = SysfsEdgeLine::new(&value, Duration::from_millis(1));
        let (count, handler) = counter();
        line.register_rising_edge(handler).unwrap();
        line.enable();

        std::fs::write(&value, "1\n").unwrap();
        assert!(wait_for(&count, 1), "rising edge not delivered");

        // Holding high is not a new edge
        thread::sleep(Duration::from_millis(30));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_sysfs_line_missing_file() {
        let line = SysfsEdgeLine::new("/nonexistent/gpio/value", Duration::from_millis(1));
        let (_, handler) = counter();
        assert!(matches!(
            line.register_rising_edge(handler),
            Err(InterruptError::Read { .. })
        ));
    }
}

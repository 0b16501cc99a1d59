//! Cooperative cancellation and per-task progress estimation.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use crate::error::{Result, TilerError};

/// Samples kept per task for remaining-time estimation.
const WINDOW: usize = 16;

/// Shared flag checked between tiles and between levels.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(TilerError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[derive(Debug)]
struct ProgressWindow {
    started: Instant,
    samples: VecDeque<(Duration, f64)>,
}

impl ProgressWindow {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            samples: VecDeque::with_capacity(WINDOW),
        }
    }

    fn push(&mut self, percent: f64) {
        if self.samples.len() == WINDOW {
            self.samples.pop_front();
        }
        self.samples.push_back((self.started.elapsed(), percent));
    }

    fn latest(&self) -> Option<f64> {
        self.samples.back().map(|s| s.1)
    }

    /// Linear rate over the window, extrapolated to 100 %.
    fn remaining(&self) -> Option<Duration> {
        let &(t_last, p_last) = self.samples.back()?;
        if p_last >= 100.0 {
            return Some(Duration::ZERO);
        }
        // A single sample measures progress since the start of the task.
        let (t_first, p_first) = if self.samples.len() >= 2 {
            *self.samples.front()?
        } else {
            (Duration::ZERO, 0.0)
        };
        let dp = p_last - p_first;
        let dt = t_last.checked_sub(t_first)?.as_secs_f64();
        if dp <= 0.0 || dt <= 0.0 {
            return None;
        }
        let secs = (100.0 - p_last) * dt / dp;
        secs.is_finite().then(|| Duration::from_secs_f64(secs))
    }
}

/// Per-task sliding windows of progress samples.
///
/// Written by workers, read concurrently by progress queries.
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    inner: Arc<RwLock<HashMap<u64, ProgressWindow>>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or restart) tracking a task.
    pub fn begin(&self, task_id: u64) {
        if let Ok(mut map) = self.inner.write() {
            map.insert(task_id, ProgressWindow::new());
        }
    }

    pub fn record(&self, task_id: u64, percent: f64) {
        if let Ok(mut map) = self.inner.write() {
            map.entry(task_id)
                .or_insert_with(ProgressWindow::new)
                .push(percent.clamp(0.0, 100.0));
        }
    }

    pub fn percent(&self, task_id: u64) -> Option<f64> {
        self.inner.read().ok()?.get(&task_id)?.latest()
    }

    pub fn estimate_remaining(&self, task_id: u64) -> Option<Duration> {
        self.inner.read().ok()?.get(&task_id)?.remaining()
    }

    pub fn forget(&self, task_id: u64) {
        if let Ok(mut map) = self.inner.write() {
            map.remove(&task_id);
        }
    }
}

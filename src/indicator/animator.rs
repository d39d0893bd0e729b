//! Indicator jobs: one background pattern per output line
//!
//! [`IndicatorLine::start`] spawns the pattern thread and returns an
//! [`IndicatorJob`]. [`IndicatorJob::stop`] consumes the job, so a handle
//! can only be stopped once; dropping a job stops it as well. Either way the
//! call returns only after the thread has exited and the output is off.

use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{debug, error, warn};

use super::output::IndicatorOutput;
use super::pattern::{render, Pattern, PatternTimings, OFF};
use crate::lifecycle::CancelToken;

/// Errors that can occur while driving an indicator
#[derive(Debug, thiserror::Error)]
pub enum IndicatorError {
    #[error("failed to write {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("indicator {line} already has a running job")]
    LineBusy { line: String },

    #[error("indicator {line} cannot render {pattern} (no dimming support)")]
    UnsupportedPattern { line: String, pattern: Pattern },

    #[error("failed to spawn indicator thread: {0}")]
    ThreadSpawn(String),
}

/// A named output line that runs at most one job at a time
#[derive(Clone)]
pub struct IndicatorLine {
    name: Arc<str>,
    output: Arc<Mutex<Box<dyn IndicatorOutput>>>,
    busy: Arc<AtomicBool>,
    timings: Arc<PatternTimings>,
}

impl IndicatorLine {
    pub fn new(name: &str, output: impl IndicatorOutput, timings: PatternTimings) -> Self {
        Self {
            name: Arc::from(name),
            output: Arc::new(Mutex::new(Box::new(output))),
            busy: Arc::new(AtomicBool::new(false)),
            timings: Arc::new(timings),
        }
    }

    /// Whether a job currently owns the line
    #[cfg(test)]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Start rendering `pattern` in the background
    pub fn start(&self, pattern: Pattern) -> Result<IndicatorJob, IndicatorError> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(IndicatorError::LineBusy {
                line: self.name.to_string(),
            });
        }

        if pattern.needs_levels() && !self.lock_output().supports_levels() {
            self.busy.store(false, Ordering::SeqCst);
            return Err(IndicatorError::UnsupportedPattern {
                line: self.name.to_string(),
                pattern,
            });
        }

        let cancel = CancelToken::new();
        let worker = {
            let line = self.clone();
            let cancel = cancel.clone();
            thread::Builder::new()
                .name(format!("indicator-{}", self.name))
                .spawn(move || line.animate(pattern, &cancel))
        };

        let worker = match worker {
            Ok(worker) => worker,
            Err(e) => {
                self.busy.store(false, Ordering::SeqCst);
                return Err(IndicatorError::ThreadSpawn(e.to_string()));
            }
        };

        debug!(line = %self.name, %pattern, "indicator job started");

        Ok(IndicatorJob {
            line: Arc::clone(&self.name),
            pattern,
            cancel,
            worker: Some(worker),
            busy: Arc::clone(&self.busy),
        })
    }

    /// Best-effort [`start`](Self::start): logs and returns `None` on failure
    pub fn try_start(&self, pattern: Pattern) -> Option<IndicatorJob> {
        match self.start(pattern) {
            Ok(job) => Some(job),
            Err(e) => {
                warn!(line = %self.name, %pattern, error = %e, "indicator unavailable");
                None
            }
        }
    }

    fn lock_output(&self) -> std::sync::MutexGuard<'_, Box<dyn IndicatorOutput>> {
        self.output.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Thread body: render until cancelled, then park the output off
    fn animate(&self, pattern: Pattern, cancel: &CancelToken) {
        let mut output = self.lock_output();

        let rendered = panic::catch_unwind(AssertUnwindSafe(|| {
            render(pattern, &self.timings, output.as_mut(), &self.name, cancel)
        }));
        if rendered.is_err() {
            error!(line = %self.name, %pattern, "indicator pattern panicked");
        }

        if let Err(e) = output.set_level(OFF) {
            warn!(line = %self.name, error = %e, "failed to switch indicator off");
        }
    }
}

/// Handle to a running pattern; stop it exactly once
pub struct IndicatorJob {
    line: Arc<str>,
    pattern: Pattern,
    cancel: CancelToken,
    worker: Option<JoinHandle<()>>,
    busy: Arc<AtomicBool>,
}

impl IndicatorJob {
    #[cfg(test)]
    pub fn pattern(&self) -> Pattern {
        self.pattern
    }

    /// Cancel the pattern and wait until the output is off
    pub fn stop(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        self.cancel.cancel();
        if worker.join().is_err() {
            error!(line = %self.line, pattern = %self.pattern, "indicator thread panicked");
        }
        self.busy.store(false, Ordering::SeqCst);
        debug!(line = %self.line, pattern = %self.pattern, "indicator job stopped");
    }
}

impl Drop for IndicatorJob {
    fn drop(&mut self) {
        self.finish();
    }
}

/// The appliance's two indicator lines
#[derive(Clone)]
pub struct Indicators {
    /// Binary line
    pub dynamite: IndicatorLine,
    /// Dimmable line
    pub intercom: IndicatorLine,
}

//! Progress, suggestion and warning events, and the coarse interrupt signal.
//!
//! Stages never print; they hand events to a [`Broadcaster`] owned by the
//! workflow. The CLI forwards them to the log, tests collect them through a
//! channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::error::ProcessingError;

/// Notification emitted while a frame is being processed.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessingEvent {
    /// Fraction in `[0, 1]` of the named task
    Progress { fraction: f64, task: String },
    /// Advice about acquisition settings
    Suggestion(String),
    /// Non-fatal condition, e.g. autocrop skipped
    Warning(String),
    /// Dimensions of a product after geometry correction
    ImageDimensions {
        label: String,
        width: usize,
        height: usize,
    },
}

impl ProcessingEvent {
    pub fn progress(fraction: f64, task: impl Into<String>) -> Self {
        ProcessingEvent::Progress {
            fraction,
            task: task.into(),
        }
    }
}

/// Sink for [`ProcessingEvent`]s, shared by every concurrent stage.
pub trait Broadcaster: Send + Sync {
    fn broadcast(&self, event: ProcessingEvent);
}

/// Drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpBroadcaster;

impl Broadcaster for NoOpBroadcaster {
    fn broadcast(&self, _event: ProcessingEvent) {}
}

/// Forwards events to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogBroadcaster;

impl Broadcaster for LogBroadcaster {
    fn broadcast(&self, event: ProcessingEvent) {
        match event {
            ProcessingEvent::Progress { fraction, task } => {
                log::debug!("{task}: {:.0}%", fraction * 100.0)
            }
            ProcessingEvent::Suggestion(message) => log::info!("Suggestion: {message}"),
            ProcessingEvent::Warning(message) => log::warn!("{message}"),
            ProcessingEvent::ImageDimensions {
                label,
                width,
                height,
            } => log::info!("{label} dimensions: {width}x{height}"),
        }
    }
}

/// Sends events over an unbounded crossbeam channel.
#[derive(Debug, Clone)]
pub struct ChannelBroadcaster {
    sender: Sender<ProcessingEvent>,
}

impl ChannelBroadcaster {
    /// Creates the broadcaster and the receiving end of its channel.
    pub fn new() -> (Self, Receiver<ProcessingEvent>) {
        let (sender, receiver) = unbounded();
        (Self { sender }, receiver)
    }
}

impl Broadcaster for ChannelBroadcaster {
    fn broadcast(&self, event: ProcessingEvent) {
        // Receiver gone means nobody listens anymore
        let _ = self.sender.send(event);
    }
}

/// Coarse cancellation signal shared between the workflow owner and its stages.
///
/// Stages call [`InterruptFlag::check`] between rows or sub-tasks and unwind
/// with `ProcessingError::Interrupted` once it is raised.
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag(Arc<AtomicBool>);

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interrupt(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<(), ProcessingError> {
        if self.is_interrupted() {
            Err(ProcessingError::Interrupted)
        } else {
            Ok(())
        }
    }
}

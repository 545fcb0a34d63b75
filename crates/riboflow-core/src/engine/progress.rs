/// Progress events emitted by the orchestrator and dispatcher.
///
/// Reporting is observational only; no component blocks on a callback.
#[derive(Debug, Clone)]
pub enum Progress {
    StageStart { name: String },
    StageFinish,

    /// An ensemble's members are about to be dispatched.
    EnsembleStart { backend: String, total_members: u64 },
    /// One ensemble member finished (successfully or not).
    MemberFinished,
    EnsembleFinish,

    Message(String),
}

pub type ProgressCallback = Box<dyn Fn(Progress) + Send + Sync>;

/// Callback-based progress reporter, shareable across tasks behind an
/// `Arc`. A reporter without a callback is silent.
#[derive(Default)]
pub struct ProgressReporter {
    callback: Option<ProgressCallback>,
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_callback(callback: ProgressCallback) -> Self {
        Self {
            callback: Some(callback),
        }
    }

    #[inline]
    pub fn report(&self, event: Progress) {
        if let Some(cb) = &self.callback {
            cb(event);
        }
    }
}

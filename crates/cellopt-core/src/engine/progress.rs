/// Per-step snapshot of every exit criterion next to its tolerance.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvergenceRecord {
    pub step: usize,
    pub energy: f64,
    pub energy_change: f64,
    pub energy_tolerance: f64,
    pub max_force: f64,
    pub force_tolerance: f64,
    pub displacement: f64,
    pub position_tolerance: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Progress {
    StepStart { step: usize },
    Convergence(ConvergenceRecord),
    StepFinish { step: usize, evaluations: usize },

    Message(String),
}

pub type ProgressCallback<'a> = Box<dyn Fn(Progress) + Send + Sync + 'a>;

#[derive(Default)]
pub struct ProgressReporter<'a> {
    callback: Option<ProgressCallback<'a>>,
}

static SILENT: ProgressReporter<'static> = ProgressReporter { callback: None };

impl<'a> ProgressReporter<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_callback(callback: ProgressCallback<'a>) -> Self {
        Self {
            callback: Some(callback),
        }
    }

    /// A shared reporter that drops every event.
    pub fn silent() -> &'static ProgressReporter<'static> {
        &SILENT
    }

    #[inline]
    pub fn report(&self, event: Progress) {
        if let Some(cb) = &self.callback {
            cb(event);
        }
    }
}

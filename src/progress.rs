use log::debug;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Sanitize,
    Places,
    Ways,
    Analytics,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Sanitize => "sanitize",
            Stage::Places => "places",
            Stage::Ways => "ways",
            Stage::Analytics => "analytics",
        };
        f.write_str(name)
    }
}

/// Advisory progress sink handed to every stage. Reports never feed back
/// into the computation.
pub trait Progress {
    /// `fraction` is the share of the stage completed, in `[0, 1]`.
    fn report(&mut self, stage: Stage, step: &str, fraction: f64);
}

/// Discards every report.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl Progress for NoProgress {
    fn report(&mut self, _stage: Stage, _step: &str, _fraction: f64) {}
}

/// Forwards reports to the `log` facade at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl Progress for LogProgress {
    fn report(&mut self, stage: Stage, step: &str, fraction: f64) {
        debug!("[{}] {}: {:.0}%", stage, step, fraction * 100.0);
    }
}

impl<F> Progress for F
where
    F: FnMut(Stage, &str, f64),
{
    fn report(&mut self, stage: Stage, step: &str, fraction: f64) {
        self(stage, step, fraction)
    }
}

/// Fraction helper that tolerates empty loops.
pub(crate) fn fraction(done: usize, total: usize) -> f64 {
    if total == 0 {
        1.0
    } else {
        done as f64 / total as f64
    }
}

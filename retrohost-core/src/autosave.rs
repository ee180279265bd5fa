//! Periodic autosave.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Fires once per elapsed period.
#[derive(Debug, Clone)]
pub struct AutosaveTimer {
    period: Duration,
    last: Instant,
}

impl AutosaveTimer {
    pub fn new(period: Duration, now: Instant) -> Self {
        Self { period, last: now }
    }

    /// True when a save is due; the next period starts at `now`. A zero period never fires.
    pub fn tick(&mut self, now: Instant) -> bool {
        if self.period.is_zero() || now.saturating_duration_since(self.last) < self.period {
            return false;
        }
        self.last = now;
        true
    }
}

/// `<dir>/<game stem><suffix>`, e.g. `saves/ac1.state`.
pub fn state_path(dir: &Path, game: &Path, suffix: &str) -> PathBuf {
    let stem = game
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "game".to_owned());
    dir.join(format!("{stem}{suffix}"))
}

/// Autosave slot for `game`.
pub fn autosave_path(dir: &Path, game: &Path) -> PathBuf {
    state_path(dir, game, ".state")
}

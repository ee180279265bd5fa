use std::time::{Duration, Instant};

/// Frames run back to back before the schedule gives up and resynchronises.
const MAX_CATCH_UP: u32 = 5;

/// Fixed-rate frame schedule at the core's fps.
#[derive(Debug)]
pub struct FramePacer {
    frame: Duration,
    next: Instant,
}

impl FramePacer {
    pub fn new(fps: f64, now: Instant) -> Self {
        let fps = if fps.is_finite() && fps > 0.0 { fps } else { 60.0 };
        Self {
            frame: Duration::from_secs_f64(1.0 / fps),
            next: now,
        }
    }

    /// Number of frames to run at `now`.
    pub fn due(&mut self, now: Instant) -> u32 {
        if now < self.next {
            return 0;
        }
        let behind = now.duration_since(self.next).as_nanos() / self.frame.as_nanos().max(1);
        let frames = u32::try_from(behind).unwrap_or(u32::MAX).saturating_add(1);
        if frames > MAX_CATCH_UP {
            log::debug!("{frames} frames behind; skipping ahead");
            self.next = now + self.frame;
            return MAX_CATCH_UP;
        }
        self.next += self.frame * frames;
        frames
    }

    pub fn deadline(&self) -> Instant {
        self.next
    }
}

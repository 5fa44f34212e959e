//! Virtual playback time for export pacing.
//!
//! Export frames are timed on a virtual clock that advances in fixed steps
//! of `speed / framerate` seconds, fully decoupled from wall-clock pacing.
//! A slow host renders slower; the timing of the output is unchanged.

/// Fixed-step virtual playback clock.
///
/// Timestamps are derived from an integer frame index rather than by
/// accumulating floats, so a duration that is an exact multiple of the
/// step size yields exactly `duration / step` frames.
#[derive(Debug, Clone)]
pub struct VirtualClock {
    step_secs: f64,
    duration_secs: f64,
    total_frames: u64,
    next_index: u64,
}

impl VirtualClock {
    /// Create a clock spanning `duration_secs` of source time at the given
    /// output frame rate and playback speed multiplier.
    pub fn new(framerate: u32, speed: f64, duration_secs: f64) -> Self {
        let step_secs = speed / framerate.max(1) as f64;
        Self {
            step_secs,
            duration_secs,
            total_frames: frame_count(duration_secs, step_secs),
            next_index: 0,
        }
    }

    /// Timestamp of the next frame to render, or `None` once virtual time
    /// has reached the source duration.
    pub fn next_frame(&mut self) -> Option<f64> {
        if self.next_index >= self.total_frames {
            return None;
        }
        let t = self.next_index as f64 * self.step_secs;
        self.next_index += 1;
        Some(t)
    }

    /// Seconds of virtual time between consecutive frames.
    pub fn step_secs(&self) -> f64 {
        self.step_secs
    }

    /// Total source duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.duration_secs
    }

    /// Number of frames the full timeline produces.
    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    /// Frames handed out so far.
    pub fn emitted_frames(&self) -> u64 {
        self.next_index
    }

    /// Fraction of the timeline emitted so far, in `[0.0, 1.0]`.
    pub fn progress(&self) -> f64 {
        if self.total_frames == 0 {
            return 1.0;
        }
        self.next_index as f64 / self.total_frames as f64
    }
}

/// Number of frames covering `duration_secs` at `step_secs` per frame:
/// `ceil(duration / step)`, with a rounding guard so an exact multiple
/// never gains or loses a frame to float error.
pub fn frame_count(duration_secs: f64, step_secs: f64) -> u64 {
    if duration_secs <= 0.0 || step_secs <= 0.0 {
        return 0;
    }
    let ratio = duration_secs / step_secs;
    let nearest = ratio.round();
    if (ratio - nearest).abs() < 1e-9 {
        nearest as u64
    } else {
        ratio.ceil() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_seconds_at_sixty_fps_is_120_frames() {
        let clock = VirtualClock::new(60, 1.0, 2.0);
        assert_eq!(clock.total_frames(), 120);
    }

    #[test]
    fn exact_multiple_is_not_off_by_one() {
        // 1/60 is not exactly representable; the ratio guard must still
        // land on the integer frame count.
        assert_eq!(frame_count(2.0, 1.0 / 60.0), 120);
        assert_eq!(frame_count(1.0, 1.0 / 30.0), 30);
        assert_eq!(frame_count(10.0, 0.1), 100);
    }

    #[test]
    fn partial_trailing_step_adds_a_frame() {
        // 1.05s at 10fps covers 10 full steps plus half a step.
        assert_eq!(frame_count(1.05, 0.1), 11);
    }

    #[test]
    fn speed_scales_the_step() {
        let clock = VirtualClock::new(60, 2.0, 2.0);
        assert!((clock.step_secs() - 1.0 / 30.0).abs() < 1e-12);
        assert_eq!(clock.total_frames(), 60);
    }

    #[test]
    fn timestamps_are_monotonic_and_inside_the_timeline() {
        let mut clock = VirtualClock::new(24, 1.0, 1.3);
        let mut last = -1.0;
        let mut count = 0u64;
        while let Some(t) = clock.next_frame() {
            assert!(t > last);
            assert!(t < clock.duration_secs());
            last = t;
            count += 1;
        }
        assert_eq!(count, clock.total_frames());
        assert_eq!(clock.emitted_frames(), count);
        assert!((clock.progress() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn zero_duration_produces_no_frames() {
        let mut clock = VirtualClock::new(60, 1.0, 0.0);
        assert_eq!(clock.total_frames(), 0);
        assert_eq!(clock.next_frame(), None);
    }

    proptest::proptest! {
        #[test]
        fn emitted_count_always_matches_total(
            framerate in 1u32..240,
            speed in 0.25f64..4.0,
            duration in 0.0f64..30.0,
        ) {
            let mut clock = VirtualClock::new(framerate, speed, duration);
            let total = clock.total_frames();
            let mut emitted = 0u64;
            while clock.next_frame().is_some() {
                emitted += 1;
            }
            proptest::prop_assert_eq!(emitted, total);

            // ceil(D/S) within the rounding guard.
            let ratio = duration / clock.step_secs();
            proptest::prop_assert!((total as f64) >= ratio - 1e-6);
            proptest::prop_assert!((total as f64) < ratio + 1.0 + 1e-6);
        }
    }
}

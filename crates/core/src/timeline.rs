//! Audio timeline bookkeeping.
//!
//! Streaming recognisers only see the user audio that was actually sent to
//! them, and their clocks restart on every reconnect. [`AudioTimeline`]
//! records what was sent (user audio vs. silence) so that recogniser-relative
//! times can be mapped back to session time; [`TimelineClock`] carries the
//! total across resets.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    UserAudio,
    Silence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub kind: SegmentKind,
    pub duration_ms: u64,
}

/// Run-length encoded record of audio sent in the current connection.
///
/// Adjacent segments never share a kind.
#[derive(Debug, Clone, Default)]
pub struct AudioTimeline {
    segments: Vec<Segment>,
}

impl AudioTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user_audio(&mut self, duration_ms: u64) {
        self.push(SegmentKind::UserAudio, duration_ms);
    }

    pub fn add_silence(&mut self, duration_ms: u64) {
        self.push(SegmentKind::Silence, duration_ms);
    }

    fn push(&mut self, kind: SegmentKind, duration_ms: u64) {
        if duration_ms == 0 {
            return;
        }
        match self.segments.last_mut() {
            Some(last) if last.kind == kind => last.duration_ms += duration_ms,
            _ => self.segments.push(Segment { kind, duration_ms }),
        }
    }

    /// Returns how much user audio had elapsed by `time_ms` of timeline time.
    ///
    /// Silence advances the cursor but does not count toward the result.
    pub fn duration_before(&self, time_ms: u64) -> u64 {
        let mut elapsed = 0;
        let mut user_audio = 0;
        for segment in &self.segments {
            if elapsed + segment.duration_ms <= time_ms {
                if segment.kind == SegmentKind::UserAudio {
                    user_audio += segment.duration_ms;
                }
                elapsed += segment.duration_ms;
            } else {
                if segment.kind == SegmentKind::UserAudio {
                    user_audio += time_ms - elapsed;
                }
                break;
            }
        }
        user_audio
    }

    pub fn total_user_audio(&self) -> u64 {
        self.segments
            .iter()
            .filter(|s| s.kind == SegmentKind::UserAudio)
            .map(|s| s.duration_ms)
            .sum()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn reset(&mut self) {
        self.segments.clear();
    }
}

/// An [`AudioTimeline`] plus the user audio accumulated before its last reset.
#[derive(Debug, Clone, Default)]
pub struct TimelineClock {
    timeline: AudioTimeline,
    prior_duration_ms: u64,
}

impl TimelineClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeline(&self) -> &AudioTimeline {
        &self.timeline
    }

    pub fn timeline_mut(&mut self) -> &mut AudioTimeline {
        &mut self.timeline
    }

    pub fn prior_duration_ms(&self) -> u64 {
        self.prior_duration_ms
    }

    /// Folds the current timeline into the accumulator, then resets it.
    /// Call whenever the backend's clock restarts (i.e. on every reconnect).
    pub fn rebase(&mut self) {
        self.prior_duration_ms += self.timeline.total_user_audio();
        self.timeline.reset();
    }

    /// Maps a time relative to the current connection onto session user-audio time.
    pub fn absolute_ms(&self, relative_ms: u64) -> u64 {
        self.prior_duration_ms + self.timeline.duration_before(relative_ms)
    }

    pub fn total_user_audio_ms(&self) -> u64 {
        self.prior_duration_ms + self.timeline.total_user_audio()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adjacent_segments_merge() {
        let mut timeline = AudioTimeline::new();
        timeline.add_user_audio(100);
        timeline.add_user_audio(50);
        timeline.add_silence(20);
        timeline.add_silence(0);
        timeline.add_silence(30);
        timeline.add_user_audio(10);

        assert_eq!(
            timeline.segments(),
            &[
                Segment { kind: SegmentKind::UserAudio, duration_ms: 150 },
                Segment { kind: SegmentKind::Silence, duration_ms: 50 },
                Segment { kind: SegmentKind::UserAudio, duration_ms: 10 },
            ]
        );
        for pair in timeline.segments().windows(2) {
            assert_ne!(pair[0].kind, pair[1].kind);
        }
    }

    #[test]
    fn test_zero_duration_is_ignored() {
        let mut timeline = AudioTimeline::new();
        timeline.add_user_audio(0);
        assert!(timeline.segments().is_empty());
    }

    #[test]
    fn test_duration_before_skips_silence() {
        let mut timeline = AudioTimeline::new();
        timeline.add_user_audio(500);
        timeline.add_silence(200);
        timeline.add_user_audio(300);

        assert_eq!(timeline.duration_before(0), 0);
        assert_eq!(timeline.duration_before(250), 250);
        assert_eq!(timeline.duration_before(500), 500);
        // Inside the silence gap the user-audio total does not move.
        assert_eq!(timeline.duration_before(600), 500);
        assert_eq!(timeline.duration_before(700), 500);
        assert_eq!(timeline.duration_before(800), 600);
        assert_eq!(timeline.duration_before(10_000), 800);
    }

    #[test]
    fn test_continuity_across_reset_with_external_accumulator() {
        let mut timeline = AudioTimeline::new();
        timeline.add_user_audio(500);
        timeline.add_silence(200);
        timeline.add_user_audio(300);

        let mut prior = 0;
        assert_eq!(timeline.total_user_audio(), 800);
        prior += timeline.total_user_audio();
        timeline.reset();

        timeline.add_user_audio(100);
        assert_eq!(prior + timeline.total_user_audio(), 900);
    }

    #[test]
    fn test_clock_rebase_keeps_timestamps_monotonic() {
        let mut clock = TimelineClock::new();
        clock.timeline_mut().add_user_audio(500);
        clock.timeline_mut().add_silence(200);
        clock.timeline_mut().add_user_audio(300);
        let before_reset = clock.absolute_ms(1_000);
        assert_eq!(before_reset, 800);

        clock.rebase();
        assert_eq!(clock.prior_duration_ms(), 800);
        assert!(clock.timeline().segments().is_empty());

        clock.timeline_mut().add_user_audio(100);
        assert_eq!(clock.total_user_audio_ms(), 900);
        assert_eq!(clock.absolute_ms(0), 800);
        assert_eq!(clock.absolute_ms(50), 850);
        assert!(clock.absolute_ms(0) >= before_reset);
    }
}

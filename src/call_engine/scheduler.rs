//! Playback Scheduler
//!
//! Reiht eingehende Audio-Buffer lückenlos hintereinander ein.
//! Der Cursor `next_start` läuft in der Zeitbasis der Output-Clock
//! (Sekunden) und bewegt sich nie rückwärts.

use super::pcm::AudioBuffer;
use std::collections::BTreeMap;

/// Handle einer eingeplanten Wiedergabe
pub type SourceId = u64;

/// Eine eingeplante Wiedergabe
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledSource {
    pub id: SourceId,
    /// Startzeit auf der Output-Clock
    pub start: f64,
    pub duration: f64,
}

impl ScheduledSource {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// Cursor + Menge der laufenden Wiedergaben
#[derive(Debug, Default)]
pub struct PlaybackScheduler {
    next_start: f64,
    in_flight: BTreeMap<SourceId, ScheduledSource>,
    next_id: SourceId,
}

impl PlaybackScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Aktueller Cursor
    pub fn next_start(&self) -> f64 {
        self.next_start
    }

    /// Reserviert den nächsten Slot für `buffer`
    ///
    /// `now` ist die Output-Clock zum Zeitpunkt des Eintreffens. Liegt der
    /// Cursor in der Vergangenheit (z.B. nach einer Sprechpause), springt er
    /// auf `now`.
    pub fn schedule(&mut self, buffer: &AudioBuffer, now: f64) -> ScheduledSource {
        self.next_start = self.next_start.max(now);

        let source = ScheduledSource {
            id: self.next_id,
            start: self.next_start,
            duration: buffer.duration(),
        };

        self.next_id += 1;
        self.next_start += source.duration;
        self.in_flight.insert(source.id, source);

        source
    }

    /// Entfernt alle Wiedergaben, deren Ende `now` erreicht hat
    pub fn reap(&mut self, now: f64) -> Vec<SourceId> {
        let finished: Vec<SourceId> = self
            .in_flight
            .values()
            .filter(|s| s.end() <= now)
            .map(|s| s.id)
            .collect();

        for id in &finished {
            self.in_flight.remove(id);
        }
        finished
    }

    /// Leert die Menge und gibt alle noch laufenden Wiedergaben zurück
    pub fn stop_all(&mut self) -> Vec<ScheduledSource> {
        std::mem::take(&mut self.in_flight).into_values().collect()
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call_engine::pcm::OUTPUT_SAMPLE_RATE;

    fn buffer(secs: f64) -> AudioBuffer {
        AudioBuffer::silence(secs, OUTPUT_SAMPLE_RATE)
    }

    #[test]
    fn test_back_to_back_frames_are_gapless() {
        let mut scheduler = PlaybackScheduler::new();
        let durations = [0.02, 0.25, 0.1, 0.5, 0.04, 0.3];
        let mut sources = Vec::new();

        // Clock läuft langsamer als die Frames ankommen
        for (i, d) in durations.iter().enumerate() {
            sources.push(scheduler.schedule(&buffer(*d), i as f64 * 0.01));
        }

        for pair in sources.windows(2) {
            assert!(pair[1].start >= pair[0].start);
            assert_eq!(pair[0].start + pair[0].duration, pair[1].start);
        }
        assert_eq!(scheduler.in_flight_len(), durations.len());
    }

    #[test]
    fn test_stale_cursor_resets_to_now() {
        let mut scheduler = PlaybackScheduler::new();
        let first = scheduler.schedule(&buffer(0.2), 1.0);
        assert_eq!(first.start, 1.0);

        // Lange Pause: Clock ist dem Cursor davongelaufen
        let second = scheduler.schedule(&buffer(0.2), 5.0);
        assert_eq!(second.start, 5.0);
        assert!(scheduler.next_start() >= 5.0);
    }

    #[test]
    fn test_cursor_never_moves_backward() {
        let mut scheduler = PlaybackScheduler::new();
        scheduler.schedule(&buffer(1.0), 2.0);
        let before = scheduler.next_start();

        // Clock-Wert kleiner als der Cursor
        scheduler.schedule(&buffer(0.1), 0.5);
        assert!(scheduler.next_start() > before);
    }

    #[test]
    fn test_three_frame_scenario() {
        let mut scheduler = PlaybackScheduler::new();
        let t0 = 10.0;

        let a = scheduler.schedule(&buffer(0.5), t0);
        let b = scheduler.schedule(&buffer(0.3), t0);
        let c = scheduler.schedule(&buffer(0.7), t0);

        assert!((a.start - t0).abs() < 1e-9);
        assert!((b.start - t0 - 0.5).abs() < 1e-9);
        assert!((c.start - t0 - 0.8).abs() < 1e-9);
        assert_eq!(scheduler.in_flight_len(), 3);

        assert_eq!(scheduler.reap(t0 + 0.25), Vec::<SourceId>::new());
        assert_eq!(scheduler.reap(t0 + 0.5 + 1e-9), vec![a.id]);
        assert_eq!(scheduler.in_flight_len(), 2);
        assert_eq!(scheduler.reap(t0 + 0.8 + 1e-9), vec![b.id]);
        assert_eq!(scheduler.in_flight_len(), 1);
        assert_eq!(scheduler.reap(t0 + 1.5 + 1e-9), vec![c.id]);
        assert_eq!(scheduler.in_flight_len(), 0);
    }

    #[test]
    fn test_stop_all_clears_set() {
        let mut scheduler = PlaybackScheduler::new();
        let a = scheduler.schedule(&buffer(0.5), 0.0);
        let b = scheduler.schedule(&buffer(0.5), 0.0);

        assert_eq!(scheduler.reap(0.5), vec![a.id]);

        let stopped = scheduler.stop_all();
        assert_eq!(stopped.len(), 1);
        assert_eq!(stopped[0].id, b.id);
        assert_eq!(scheduler.in_flight_len(), 0);
        assert!(scheduler.stop_all().is_empty());
    }
}

//! Detection stage: runs the sound detector over each captured buffer and
//! decides what reaches the file writer.
//!
//! Buffers around a detection are kept so calls are never truncated:
//! a trailing hangover (post-roll) after the last detection, and a rolling
//! pre-roll that is flushed ahead of the next detection. Once silence
//! outlasts both, a `Silence` marker tells the target to close its file;
//! the marker repeats while silence continues, which downstream treats as
//! an idempotent no-op.

use crate::detect::SoundDetector;
use crate::stream::item::{StreamItem, TimedBuffer};
use crate::stream::stage::{ProcessStage, StageError};
use crossbeam_channel::Sender;
use std::collections::VecDeque;

/// Hangover tuning. The right values depend on buffer duration and target
/// species; both are configurable rather than fixed.
#[derive(Debug, Clone, Copy)]
pub struct HangoverConfig {
    /// Buffers forwarded after the last detection.
    pub post_roll_buffers: usize,
    /// Rolling pre-roll capacity in buffers.
    pub pre_roll_buffers: usize,
}

impl Default for HangoverConfig {
    fn default() -> Self {
        Self {
            post_roll_buffers: crate::defaults::POST_ROLL_BUFFERS,
            pre_roll_buffers: crate::defaults::PRE_ROLL_BUFFERS,
        }
    }
}

/// Process stage wrapping a [`SoundDetector`].
pub struct DetectProcess {
    detector: Box<dyn SoundDetector>,
    config: HangoverConfig,
    /// Consecutive non-detections. Saturates once long silence is reached.
    silent_run: usize,
    pre_roll: VecDeque<TimedBuffer>,
}

impl DetectProcess {
    pub fn new(detector: Box<dyn SoundDetector>, config: HangoverConfig) -> Self {
        let long_silence = config.post_roll_buffers + config.pre_roll_buffers;
        Self {
            detector,
            config,
            // Start in long silence so nothing is forwarded before the
            // first detection.
            silent_run: long_silence,
            pre_roll: VecDeque::with_capacity(config.pre_roll_buffers),
        }
    }

    fn send(out: &Sender<StreamItem>, item: StreamItem) -> Result<(), StageError> {
        out.send(item)
            .map_err(|_| StageError::Fatal("output channel closed".to_string()))
    }
}

impl ProcessStage for DetectProcess {
    fn name(&self) -> &'static str {
        "detect"
    }

    fn process(
        &mut self,
        buffer: TimedBuffer,
        out: &Sender<StreamItem>,
    ) -> Result<(), StageError> {
        let long_silence = self.config.post_roll_buffers + self.config.pre_roll_buffers;

        if self.detector.check_for_sound(&buffer) {
            // Flush held pre-roll in capture order, then the buffer itself.
            while let Some(held) = self.pre_roll.pop_front() {
                Self::send(out, StreamItem::Data(held))?;
            }
            Self::send(out, StreamItem::Data(buffer))?;
            self.silent_run = 0;
        } else if self.silent_run < self.config.post_roll_buffers {
            // Trailing hangover.
            Self::send(out, StreamItem::Data(buffer))?;
            self.silent_run += 1;
        } else if self.silent_run < long_silence {
            self.pre_roll.push_back(buffer);
            self.silent_run += 1;
        } else {
            // Long silence: tell the target to close, keep rolling pre-roll.
            Self::send(out, StreamItem::Silence)?;
            self.pre_roll.push_back(buffer);
            while self.pre_roll.len() > self.config.pre_roll_buffers {
                self.pre_roll.pop_front();
            }
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        self.pre_roll.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::ScriptedDetector;
    use crossbeam_channel::unbounded;
    use std::time::{Duration, SystemTime};

    fn buffer(id: i16) -> TimedBuffer {
        TimedBuffer::new(
            SystemTime::UNIX_EPOCH + Duration::from_secs(id as u64),
            vec![id; 4],
        )
    }

    fn run(script: Vec<bool>, config: HangoverConfig, buffers: usize) -> Vec<StreamItem> {
        let mut stage = DetectProcess::new(Box::new(ScriptedDetector::new(script)), config);
        let (tx, rx) = unbounded();
        for i in 0..buffers {
            stage.process(buffer(i as i16), &tx).unwrap();
        }
        drop(tx);
        rx.iter().collect()
    }

    fn data_ids(items: &[StreamItem]) -> Vec<i16> {
        items
            .iter()
            .filter_map(|item| match item {
                StreamItem::Data(buf) => Some(buf.samples[0]),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn silence_before_first_detection_is_held_back() {
        let config = HangoverConfig {
            post_roll_buffers: 2,
            pre_roll_buffers: 3,
        };
        let items = run(vec![false; 10], config, 10);
        assert!(items.iter().all(|i| matches!(i, StreamItem::Silence)));
    }

    #[test]
    fn pre_roll_flushed_in_order_before_detection() {
        let config = HangoverConfig {
            post_roll_buffers: 2,
            pre_roll_buffers: 3,
        };
        // 10 silent buffers, then one detection, then 10 silent again.
        let mut script = vec![false; 10];
        script.push(true);
        script.extend(vec![false; 10]);
        let items = run(script, config, 21);

        // Pre-roll holds the 3 most recent silent buffers (7, 8, 9), flushed
        // ahead of the detected buffer 10; post-roll forwards 11 and 12.
        assert_eq!(data_ids(&items), vec![7, 8, 9, 10, 11, 12]);
    }

    #[test]
    fn pre_roll_never_exceeds_capacity() {
        let config = HangoverConfig {
            post_roll_buffers: 1,
            pre_roll_buffers: 4,
        };
        let mut stage =
            DetectProcess::new(Box::new(ScriptedDetector::new(vec![false])), config);
        let (tx, rx) = unbounded();
        for i in 0..50 {
            stage.process(buffer(i), &tx).unwrap();
            assert!(stage.pre_roll.len() <= 4);
        }
        drop(tx);
        // Everything emitted was a Silence marker.
        assert!(rx.iter().all(|i| matches!(i, StreamItem::Silence)));
    }

    #[test]
    fn post_roll_forwards_trailing_buffers() {
        let config = HangoverConfig {
            post_roll_buffers: 3,
            pre_roll_buffers: 2,
        };
        // Detection on the first buffer, silence afterwards.
        let mut script = vec![true];
        script.extend(vec![false; 8]);
        let items = run(script, config, 9);

        // Buffer 0 detected, 1..=3 post-roll; 4, 5 buffered; 6.. emit Silence.
        assert_eq!(data_ids(&items), vec![0, 1, 2, 3]);
        let silences = items
            .iter()
            .filter(|i| matches!(i, StreamItem::Silence))
            .count();
        assert_eq!(silences, 3);
    }

    #[test]
    fn detection_run_resets_hangover() {
        let config = HangoverConfig {
            post_roll_buffers: 1,
            pre_roll_buffers: 2,
        };
        // Two detections separated by one silent buffer; the silent buffer
        // rides through as post-roll, so output is continuous.
        let script = vec![true, false, true, false];
        let items = run(script, config, 4);
        assert_eq!(data_ids(&items), vec![0, 1, 2, 3]);
        assert!(items.iter().all(StreamItem::is_data));
    }

    #[test]
    fn closed_output_is_fatal() {
        let config = HangoverConfig::default();
        let mut stage = DetectProcess::new(Box::new(FixedTrue), config);
        let (tx, rx) = unbounded();
        drop(rx);
        let err = stage.process(buffer(0), &tx).unwrap_err();
        assert!(matches!(err, StageError::Fatal(_)));
    }

    struct FixedTrue;
    impl SoundDetector for FixedTrue {
        fn check_for_sound(&mut self, _buffer: &TimedBuffer) -> bool {
            true
        }
    }
}

//! Per-frame voice classifier
//!
//! Energy-based detection with an adaptive noise floor. Aggressiveness 0-3
//! selects the threshold above the floor; 3 is the most eager to call a
//! frame voiced.

use crate::audio::bytes_to_samples;

/// Threshold in dB above the noise floor, indexed by aggressiveness
const THRESHOLD_DB: [f32; 4] = [45.0, 41.0, 38.0, 35.0];

/// Fraction of a quiet frame folded into the noise floor
const ADAPTATION_RATE: f32 = 0.05;

const NOISE_FLOOR_MIN: f32 = 1e-10;

pub struct VoiceDetector {
    threshold_db: f32,
    noise_floor: f32,
}

impl VoiceDetector {
    pub fn new(aggressiveness: u8) -> Self {
        let mode = aggressiveness.min(3) as usize;
        Self {
            threshold_db: THRESHOLD_DB[mode],
            noise_floor: NOISE_FLOOR_MIN,
        }
    }

    /// Classify one 20 ms PCM16 frame
    pub fn is_active(&mut self, frame: &[u8]) -> bool {
        let energy = frame_energy(&bytes_to_samples(frame));
        let threshold = self.noise_floor * 10f32.powf(self.threshold_db / 10.0);

        if energy < threshold {
            // quiet frame, fold into the floor
            self.noise_floor = (self.noise_floor * (1.0 - ADAPTATION_RATE)
                + energy * ADAPTATION_RATE)
                .max(NOISE_FLOOR_MIN);
            false
        } else {
            true
        }
    }

    pub fn reset(&mut self) {
        self.noise_floor = NOISE_FLOOR_MIN;
    }
}

/// Mean-square energy of a frame, normalized to [0, 1]
fn frame_energy(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples
        .iter()
        .map(|&s| {
            let x = f32::from(s) / 32768.0;
            x * x
        })
        .sum();
    sum_sq / samples.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{samples_to_bytes, SAMPLES_PER_FRAME};

    fn voiced_frame() -> Vec<u8> {
        let samples: Vec<i16> = (0..SAMPLES_PER_FRAME)
            .map(|i| if i % 2 == 0 { 8000 } else { -8000 })
            .collect();
        samples_to_bytes(&samples)
    }

    fn silent_frame() -> Vec<u8> {
        samples_to_bytes(&vec![0i16; SAMPLES_PER_FRAME])
    }

    #[test]
    fn test_silence_is_inactive() {
        let mut detector = VoiceDetector::new(3);
        for _ in 0..20 {
            assert!(!detector.is_active(&silent_frame()));
        }
    }

    #[test]
    fn test_speech_is_active() {
        let mut detector = VoiceDetector::new(3);
        for _ in 0..5 {
            detector.is_active(&silent_frame());
        }
        assert!(detector.is_active(&voiced_frame()));
    }

    #[test]
    fn test_aggressive_mode_has_lower_threshold() {
        let quiet: Vec<i16> = (0..SAMPLES_PER_FRAME)
            .map(|i| if i % 2 == 0 { 1200 } else { -1200 })
            .collect();
        let frame = samples_to_bytes(&quiet);

        // mode 3 hears the faint signal, mode 0 does not
        let mut eager = VoiceDetector::new(3);
        let mut strict = VoiceDetector::new(0);
        // raise both floors with ambient noise first
        let ambient: Vec<i16> = (0..SAMPLES_PER_FRAME)
            .map(|i| if i % 2 == 0 { 12 } else { -12 })
            .collect();
        let ambient = samples_to_bytes(&ambient);
        for _ in 0..50 {
            eager.is_active(&ambient);
            strict.is_active(&ambient);
        }
        assert!(eager.is_active(&frame));
        assert!(!strict.is_active(&frame));
    }

    #[test]
    fn test_reset_restores_floor() {
        let mut detector = VoiceDetector::new(2);
        for _ in 0..50 {
            detector.is_active(&voiced_frame());
        }
        detector.reset();
        assert!(!detector.is_active(&silent_frame()));
    }
}

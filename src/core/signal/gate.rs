//! Adaptive noise gate.
//!
//! Classifies incoming audio energy against a per-connection rolling noise
//! floor. The floor adapts during silence so a noisy classroom and a quiet
//! bedroom converge to sensible thresholds without manual calibration. While
//! tutor audio is playing the speech threshold is raised, since leaked
//! playback raises ambient energy at the microphone.

use tracing::trace;

/// Energy classification for one audio frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioClass {
    Silence,
    /// Above the floor but not clearly speech; does not trigger barge-in.
    PotentialSpeech,
    Speech,
}

/// Gate thresholds. Ratios are relative to the rolling floor.
#[derive(Debug, Clone)]
pub struct NoiseGateConfig {
    /// Starting floor before any adaptation, RMS in [0, 1].
    pub initial_floor: f32,
    /// EMA weight applied to silence frames when adapting the floor.
    pub floor_alpha: f32,
    /// Floor never adapts below this; keeps division meaningful on digital
    /// silence.
    pub min_floor: f32,
    /// Energy above `floor * speech_ratio` classifies as speech.
    pub speech_ratio: f32,
    /// Energy above `floor * potential_ratio` classifies as potential speech.
    pub potential_ratio: f32,
    /// Extra multiplier on the speech threshold while tutor audio plays.
    pub playback_boost: f32,
}

impl Default for NoiseGateConfig {
    fn default() -> Self {
        Self {
            initial_floor: 0.004,
            floor_alpha: 0.05,
            min_floor: 0.001,
            speech_ratio: 4.0,
            potential_ratio: 2.0,
            playback_boost: 1.6,
        }
    }
}

/// Per-connection adaptive loudness baseline.
pub struct NoiseGate {
    config: NoiseGateConfig,
    floor: f32,
}

impl NoiseGate {
    pub fn new(config: NoiseGateConfig) -> Self {
        let floor = config.initial_floor.max(config.min_floor);
        Self { config, floor }
    }

    /// Classify one PCM16-LE frame. Returns the class and the frame's RMS
    /// energy so the barge-in controller can track peaks.
    pub fn classify(&mut self, frame: &[u8], playback_active: bool) -> (AudioClass, f32) {
        let energy = rms_energy(frame);
        let mut speech_threshold = self.floor * self.config.speech_ratio;
        if playback_active {
            speech_threshold *= self.config.playback_boost;
        }
        let potential_threshold = self.floor * self.config.potential_ratio;

        let class = if energy >= speech_threshold {
            AudioClass::Speech
        } else if energy >= potential_threshold {
            AudioClass::PotentialSpeech
        } else {
            // Only silence frames adapt the floor, so sustained speech can
            // never drag the baseline up underneath itself.
            self.floor = (self.floor * (1.0 - self.config.floor_alpha)
                + energy * self.config.floor_alpha)
                .max(self.config.min_floor);
            AudioClass::Silence
        };
        trace!(?class, energy, floor = self.floor, "frame classified");
        (class, energy)
    }

    pub fn floor(&self) -> f32 {
        self.floor
    }
}

/// RMS of little-endian 16-bit PCM, normalized to [0, 1].
fn rms_energy(frame: &[u8]) -> f32 {
    if frame.len() < 2 {
        return 0.0;
    }
    let mut sum = 0.0f64;
    let samples = frame.len() / 2;
    for chunk in frame.chunks_exact(2) {
        let sample = i16::from_le_bytes([chunk[0], chunk[1]]) as f64 / 32768.0;
        sum += sample * sample;
    }
    (sum / samples as f64).sqrt() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm_frame(amplitude: i16, samples: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(samples * 2);
        for i in 0..samples {
            let v = if i % 2 == 0 { amplitude } else { -amplitude };
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }

    #[test]
    fn silence_classifies_as_silence_and_adapts_floor() {
        let mut gate = NoiseGate::new(NoiseGateConfig::default());
        let quiet = pcm_frame(30, 160);
        let initial_floor = gate.floor();
        for _ in 0..50 {
            let (class, _) = gate.classify(&quiet, false);
            assert_eq!(class, AudioClass::Silence);
        }
        assert_ne!(gate.floor(), initial_floor);
    }

    #[test]
    fn loud_frame_classifies_as_speech() {
        let mut gate = NoiseGate::new(NoiseGateConfig::default());
        let loud = pcm_frame(8000, 160);
        let (class, energy) = gate.classify(&loud, false);
        assert_eq!(class, AudioClass::Speech);
        assert!(energy > 0.1);
    }

    #[test]
    fn playback_raises_the_speech_bar() {
        let mut gate = NoiseGate::new(NoiseGateConfig {
            initial_floor: 0.01,
            ..Default::default()
        });
        // Energy between the plain and boosted thresholds: speech when idle,
        // not while the tutor is playing.
        let medium = pcm_frame(1600, 160);
        let (idle_class, _) = gate.classify(&medium, false);
        let (playing_class, _) = gate.classify(&medium, true);
        assert_eq!(idle_class, AudioClass::Speech);
        assert_ne!(playing_class, AudioClass::Speech);
    }

    #[test]
    fn speech_does_not_raise_the_floor() {
        let mut gate = NoiseGate::new(NoiseGateConfig::default());
        let loud = pcm_frame(8000, 160);
        let floor_before = gate.floor();
        for _ in 0..20 {
            gate.classify(&loud, false);
        }
        assert_eq!(gate.floor(), floor_before);
    }

    #[test]
    fn empty_frame_is_silent() {
        let mut gate = NoiseGate::new(NoiseGateConfig::default());
        let (class, energy) = gate.classify(&[], false);
        assert_eq!(class, AudioClass::Silence);
        assert_eq!(energy, 0.0);
    }
}

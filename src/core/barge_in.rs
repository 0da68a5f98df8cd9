//! Barge-in controller.
//!
//! Three-stage state machine (idle → ducked → confirming → interrupt) that
//! decides, while the tutor is speaking, whether incoming audio is a real
//! interruption. Sustained above-threshold energy first ducks the tutor;
//! after a confirm window an independent signal (transcript advanced, VAD
//! agreement, or sustained peak energy on low-latency tiers) escalates to a
//! hard interrupt. The candidate is bound to the generation id it started
//! under; any generation change invalidates it.

use tracing::debug;

use crate::core::signal::AudioClass;
use crate::utils::epoch_ms;

/// Per-audience-band barge-in timing. Data, not logic: younger audiences get
/// more patience before the tutor shuts up.
#[derive(Debug, Clone)]
pub struct BargeInConfig {
    /// Consecutive speech-class frames required before ducking.
    pub min_speech_frames: u32,
    /// How long after ducking before requiring confirmation.
    pub confirm_window_ms: u64,
    /// Quiet period after an interrupt during which no new candidate forms.
    pub cooldown_ms: u64,
    /// Low-latency tiers may confirm on sustained peak energy alone.
    pub energy_only_confirm: bool,
    /// Peak RMS required for energy-only confirmation.
    pub peak_energy_floor: f32,
}

impl Default for BargeInConfig {
    fn default() -> Self {
        Self {
            min_speech_frames: 6,
            confirm_window_ms: 450,
            cooldown_ms: 1200,
            energy_only_confirm: false,
            peak_energy_floor: 0.08,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BargeStage {
    Ducked,
    Confirming,
}

/// Transient candidate for one potential interruption.
#[derive(Debug)]
pub struct BargeInCandidate {
    pub started_ms: u64,
    pub peak_energy: f32,
    /// Speech frames observed since the duck.
    pub frames_in_window: u32,
    pub stage: BargeStage,
    /// Playback generation the candidate is bound to.
    pub generation: u64,
}

/// What the session actor must do after feeding the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BargeAction {
    None,
    /// Lower tutor volume at the peer and schedule the confirm timer.
    Duck,
    /// Hard interrupt: abort generation, bump the generation id, stop
    /// playback, return to listening.
    Interrupt,
    /// Candidate dissolved; restore volume.
    CancelUnduck,
}

pub struct BargeInController {
    config: BargeInConfig,
    candidate: Option<BargeInCandidate>,
    /// Run of consecutive speech frames while idle.
    speech_run: u32,
    cooldown_until_ms: u64,
}

impl BargeInController {
    pub fn new(config: BargeInConfig) -> Self {
        Self {
            config,
            candidate: None,
            speech_run: 0,
            cooldown_until_ms: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.candidate.is_some()
    }

    pub fn candidate(&self) -> Option<&BargeInCandidate> {
        self.candidate.as_ref()
    }

    /// Feed one classified audio frame. Only called while the tutor is
    /// speaking; `generation` is the currently active playback generation.
    pub fn on_frame(&mut self, class: AudioClass, energy: f32, generation: u64) -> BargeAction {
        if epoch_ms() < self.cooldown_until_ms {
            return BargeAction::None;
        }

        // A generation change (new response, prior interrupt) orphans the
        // candidate.
        if let Some(candidate) = &self.candidate {
            if candidate.generation != generation {
                debug!("barge-in candidate stale, cancelling");
                self.candidate = None;
                self.speech_run = 0;
                return BargeAction::CancelUnduck;
            }
        }

        match (&mut self.candidate, class) {
            (Some(candidate), AudioClass::Speech) => {
                candidate.frames_in_window += 1;
                candidate.peak_energy = candidate.peak_energy.max(energy);
                BargeAction::None
            }
            (Some(_), _) => BargeAction::None,
            (None, AudioClass::Speech) => {
                self.speech_run += 1;
                if self.speech_run >= self.config.min_speech_frames {
                    debug!(frames = self.speech_run, "sustained speech, ducking tutor");
                    self.candidate = Some(BargeInCandidate {
                        started_ms: epoch_ms(),
                        peak_energy: energy,
                        frames_in_window: 0,
                        stage: BargeStage::Ducked,
                        generation,
                    });
                    self.speech_run = 0;
                    BargeAction::Duck
                } else {
                    BargeAction::None
                }
            }
            (None, _) => {
                self.speech_run = 0;
                BargeAction::None
            }
        }
    }

    /// Resolve the candidate when the confirm timer fires.
    ///
    /// `transcript_advanced` is the recognizer's live hypothesis having grown
    /// since the duck; `vad_agrees` is independent voice-activity agreement.
    pub fn on_confirm_timer(
        &mut self,
        transcript_advanced: bool,
        vad_agrees: bool,
        generation: u64,
    ) -> BargeAction {
        let Some(candidate) = self.candidate.as_mut() else {
            return BargeAction::None;
        };
        if candidate.generation != generation {
            self.candidate = None;
            return BargeAction::CancelUnduck;
        }
        candidate.stage = BargeStage::Confirming;

        let sustained = candidate.frames_in_window >= self.config.min_speech_frames;
        let energy_confirm = self.config.energy_only_confirm
            && sustained
            && candidate.peak_energy >= self.config.peak_energy_floor;
        let confirmed = transcript_advanced || vad_agrees || energy_confirm;

        self.candidate = None;
        if confirmed {
            debug!(
                transcript_advanced,
                vad_agrees, energy_confirm, "barge-in confirmed, interrupting"
            );
            self.cooldown_until_ms = epoch_ms() + self.config.cooldown_ms;
            BargeAction::Interrupt
        } else {
            debug!("barge-in unconfirmed, unducking");
            BargeAction::CancelUnduck
        }
    }

    /// Cancel the candidate because the phase moved away from tutor speech.
    /// Returns true when there was an active candidate to undo.
    pub fn cancel(&mut self) -> bool {
        self.speech_run = 0;
        self.candidate.take().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(config: BargeInConfig) -> BargeInController {
        BargeInController::new(config)
    }

    fn feed_speech(c: &mut BargeInController, frames: u32, energy: f32, generation: u64) -> Vec<BargeAction> {
        (0..frames)
            .map(|_| c.on_frame(AudioClass::Speech, energy, generation))
            .collect()
    }

    #[test]
    fn brief_noise_does_not_duck() {
        let mut c = controller(BargeInConfig::default());
        let actions = feed_speech(&mut c, 3, 0.1, 1);
        assert!(actions.iter().all(|a| *a == BargeAction::None));
        // Run resets on silence.
        c.on_frame(AudioClass::Silence, 0.0, 1);
        let actions = feed_speech(&mut c, 3, 0.1, 1);
        assert!(actions.iter().all(|a| *a == BargeAction::None));
        assert!(!c.is_active());
    }

    #[test]
    fn sustained_speech_ducks() {
        let mut c = controller(BargeInConfig::default());
        let actions = feed_speech(&mut c, 6, 0.1, 1);
        assert_eq!(actions[5], BargeAction::Duck);
        assert!(c.is_active());
        assert_eq!(c.candidate().unwrap().stage, BargeStage::Ducked);
    }

    #[test]
    fn transcript_advance_confirms_interrupt() {
        let mut c = controller(BargeInConfig::default());
        feed_speech(&mut c, 6, 0.1, 1);
        feed_speech(&mut c, 4, 0.1, 1);
        assert_eq!(c.on_confirm_timer(true, false, 1), BargeAction::Interrupt);
        assert!(!c.is_active());
    }

    #[test]
    fn unconfirmed_candidate_unducks() {
        let mut c = controller(BargeInConfig::default());
        feed_speech(&mut c, 6, 0.1, 1);
        assert_eq!(
            c.on_confirm_timer(false, false, 1),
            BargeAction::CancelUnduck
        );
        assert!(!c.is_active());
    }

    #[test]
    fn energy_only_tier_confirms_on_sustained_peak() {
        let mut c = controller(BargeInConfig {
            energy_only_confirm: true,
            ..Default::default()
        });
        feed_speech(&mut c, 6, 0.2, 1);
        feed_speech(&mut c, 6, 0.2, 1);
        assert_eq!(c.on_confirm_timer(false, false, 1), BargeAction::Interrupt);
    }

    #[test]
    fn energy_only_needs_sustained_frames() {
        let mut c = controller(BargeInConfig {
            energy_only_confirm: true,
            ..Default::default()
        });
        feed_speech(&mut c, 6, 0.2, 1);
        // Only 2 frames inside the window: not sustained.
        feed_speech(&mut c, 2, 0.2, 1);
        assert_eq!(
            c.on_confirm_timer(false, false, 1),
            BargeAction::CancelUnduck
        );
    }

    #[test]
    fn stale_generation_cancels_candidate() {
        let mut c = controller(BargeInConfig::default());
        feed_speech(&mut c, 6, 0.1, 1);
        assert_eq!(
            c.on_frame(AudioClass::Speech, 0.1, 2),
            BargeAction::CancelUnduck
        );
        assert!(!c.is_active());
    }

    #[test]
    fn cooldown_blocks_new_candidates() {
        let mut c = controller(BargeInConfig {
            cooldown_ms: 60_000,
            ..Default::default()
        });
        feed_speech(&mut c, 6, 0.1, 1);
        feed_speech(&mut c, 6, 0.1, 1);
        c.on_confirm_timer(true, false, 1);
        // Within cooldown: no duck no matter how much speech arrives.
        let actions = feed_speech(&mut c, 20, 0.1, 2);
        assert!(actions.iter().all(|a| *a == BargeAction::None));
    }

    #[test]
    fn phase_exit_cancel_reports_activity() {
        let mut c = controller(BargeInConfig::default());
        feed_speech(&mut c, 6, 0.1, 1);
        assert!(c.cancel());
        assert!(!c.cancel());
    }
}

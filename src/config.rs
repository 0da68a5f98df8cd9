//! Server configuration.
//!
//! Everything timing-related is data here, not constants in logic: the
//! session tuning block and the per-audience-band timing tables are read
//! from the environment with defaults that match production tuning. Band
//! values are tuning, not protocol correctness; tests override them freely.

use std::collections::HashMap;
use std::env;

use crate::core::barge_in::BargeInConfig;
use crate::core::resilience::{HeartbeatConfig, WatchdogConfig};
use crate::core::stt::{RecognizerTuning, SttConfig};
use crate::core::turn::{GuardConfig, PipelineConfig};

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Language-model collaborator settings.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub system_prompt: String,
}

/// Speech-synthesis collaborator settings.
#[derive(Debug, Clone)]
pub struct TtsSettings {
    pub base_url: String,
    pub api_key: String,
    pub voice: String,
}

/// Session-wide timing and limits. One copy per process, cloned per session.
#[derive(Debug, Clone)]
pub struct SessionTuning {
    pub heartbeat_interval_ms: u64,
    pub missed_pong_limit: u32,
    pub stall_ms: u64,
    pub stall_recovery_cap: u32,
    pub stall_window_ms: u64,
    pub turn_stuck_ceiling_ms: u64,
    pub response_fallback_ms: u64,
    pub inactivity_timeout_ms: u64,
    /// Per-session wall-clock budget; 0 disables it.
    pub session_budget_ms: u64,
    pub reconnect_grace_dropped_ms: u64,
    pub reconnect_grace_going_away_ms: u64,
    pub safety_strike_limit: u32,
    pub recognizer: RecognizerTuning,
}

impl Default for SessionTuning {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 10_000,
            missed_pong_limit: 3,
            stall_ms: 15_000,
            stall_recovery_cap: 2,
            stall_window_ms: 120_000,
            turn_stuck_ceiling_ms: 30_000,
            response_fallback_ms: 15_000,
            inactivity_timeout_ms: 180_000,
            session_budget_ms: 0,
            reconnect_grace_dropped_ms: 45_000,
            reconnect_grace_going_away_ms: 10_000,
            safety_strike_limit: 3,
            recognizer: RecognizerTuning::default(),
        }
    }
}

impl SessionTuning {
    pub fn heartbeat_config(&self) -> HeartbeatConfig {
        HeartbeatConfig {
            interval_ms: self.heartbeat_interval_ms,
            missed_limit: self.missed_pong_limit,
        }
    }

    pub fn watchdog_config(&self) -> WatchdogConfig {
        WatchdogConfig {
            stall_ms: self.stall_ms,
            recovery_cap: self.stall_recovery_cap,
            recovery_window_ms: self.stall_window_ms,
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            stuck_ceiling_ms: self.turn_stuck_ceiling_ms,
        }
    }
}

/// Timing profile for one audience band. Younger students hedge more and
/// think aloud longer; adults want snappier interruption.
#[derive(Debug, Clone)]
pub struct BandTiming {
    pub grace_default_ms: u64,
    pub grace_extended_ms: u64,
    pub grace_short_ms: u64,
    pub duck_min_frames: u32,
    pub confirm_window_ms: u64,
    pub cooldown_ms: u64,
    /// Characters the live hypothesis must grow past the duck point before a
    /// transcript advance counts as interrupt confirmation. Keeps a lone
    /// "wait" or "hm" at duck-then-continue.
    pub confirm_min_advance_chars: usize,
    pub energy_only_confirm: bool,
}

impl BandTiming {
    pub fn guard_config(&self) -> GuardConfig {
        GuardConfig {
            grace_default_ms: self.grace_default_ms,
            grace_extended_ms: self.grace_extended_ms,
            grace_short_ms: self.grace_short_ms,
            ..GuardConfig::default()
        }
    }

    pub fn barge_in_config(&self) -> BargeInConfig {
        BargeInConfig {
            min_speech_frames: self.duck_min_frames,
            confirm_window_ms: self.confirm_window_ms,
            cooldown_ms: self.cooldown_ms,
            energy_only_confirm: self.energy_only_confirm,
            ..BargeInConfig::default()
        }
    }
}

fn default_bands() -> HashMap<String, BandTiming> {
    let mut bands = HashMap::new();
    bands.insert(
        "young".to_string(),
        BandTiming {
            grace_default_ms: 1400,
            grace_extended_ms: 3200,
            grace_short_ms: 600,
            duck_min_frames: 10,
            confirm_window_ms: 700,
            cooldown_ms: 2000,
            confirm_min_advance_chars: 14,
            energy_only_confirm: false,
        },
    );
    bands.insert(
        "standard".to_string(),
        BandTiming {
            grace_default_ms: 1000,
            grace_extended_ms: 2500,
            grace_short_ms: 400,
            duck_min_frames: 6,
            confirm_window_ms: 450,
            cooldown_ms: 1200,
            confirm_min_advance_chars: 10,
            energy_only_confirm: false,
        },
    );
    bands.insert(
        "adult".to_string(),
        BandTiming {
            grace_default_ms: 800,
            grace_extended_ms: 2000,
            grace_short_ms: 300,
            duck_min_frames: 4,
            confirm_window_ms: 350,
            cooldown_ms: 900,
            confirm_min_advance_chars: 8,
            energy_only_confirm: true,
        },
    );
    bands
}

/// Top-level server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub stt: SttConfig,
    pub llm: LlmSettings,
    pub tts: TtsSettings,
    pub tuning: SessionTuning,
    pub bands: HashMap<String, BandTiming>,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let stt = SttConfig {
            provider: env_string("STT_PROVIDER", "deepgram"),
            api_key: env_string("STT_API_KEY", ""),
            language: env_string("STT_LANGUAGE", "en-US"),
            model: env_string("STT_MODEL", "nova-2"),
            sample_rate: env_parse("STT_SAMPLE_RATE", 16000),
            channels: env_parse("STT_CHANNELS", 1),
            encoding: env_string("STT_ENCODING", "linear16"),
            endpointing_ms: env_parse("STT_ENDPOINTING_MS", 300),
            extended_features: env_parse("STT_EXTENDED_FEATURES", true),
        };
        let llm = LlmSettings {
            base_url: env_string("LLM_BASE_URL", "https://api.openai.com/v1"),
            api_key: env_string("LLM_API_KEY", ""),
            model: env_string("LLM_MODEL", "gpt-4o-mini"),
            system_prompt: env_string(
                "LLM_SYSTEM_PROMPT",
                "You are a patient, encouraging voice tutor. Keep replies short and spoken-style.",
            ),
        };
        let tts = TtsSettings {
            base_url: env_string("TTS_BASE_URL", "https://api.openai.com/v1"),
            api_key: env_string("TTS_API_KEY", ""),
            voice: env_string("TTS_VOICE", "alloy"),
        };
        let tuning = SessionTuning {
            heartbeat_interval_ms: env_parse("HEARTBEAT_INTERVAL_MS", 10_000),
            missed_pong_limit: env_parse("MISSED_PONG_LIMIT", 3),
            stall_ms: env_parse("STALL_THRESHOLD_MS", 15_000),
            stall_recovery_cap: env_parse("STALL_RECOVERY_CAP", 2),
            stall_window_ms: env_parse("STALL_RECOVERY_WINDOW_MS", 120_000),
            turn_stuck_ceiling_ms: env_parse("TURN_STUCK_CEILING_MS", 30_000),
            response_fallback_ms: env_parse("RESPONSE_FALLBACK_MS", 15_000),
            inactivity_timeout_ms: env_parse("INACTIVITY_TIMEOUT_MS", 180_000),
            session_budget_ms: env_parse("SESSION_BUDGET_MS", 0),
            reconnect_grace_dropped_ms: env_parse("RECONNECT_GRACE_DROPPED_MS", 45_000),
            reconnect_grace_going_away_ms: env_parse("RECONNECT_GRACE_GOING_AWAY_MS", 10_000),
            safety_strike_limit: env_parse("SAFETY_STRIKE_LIMIT", 3),
            recognizer: RecognizerTuning::default(),
        };
        Self {
            host: env_string("HOST", "0.0.0.0"),
            port: env_parse("PORT", 8080),
            stt,
            llm,
            tts,
            tuning,
            bands: default_bands(),
        }
    }

    /// Resolve an audience band, falling back to `standard` for unknown keys.
    pub fn band(&self, key: &str) -> &BandTiming {
        self.bands
            .get(key)
            .or_else(|| self.bands.get("standard"))
            .expect("standard band always present")
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            stt: SttConfig::default(),
            llm: LlmSettings {
                base_url: "https://api.openai.com/v1".to_string(),
                api_key: String::new(),
                model: "gpt-4o-mini".to_string(),
                system_prompt: "You are a patient voice tutor.".to_string(),
            },
            tts: TtsSettings {
                base_url: "https://api.openai.com/v1".to_string(),
                api_key: String::new(),
                voice: "alloy".to_string(),
            },
            tuning: SessionTuning::default(),
            bands: default_bands(),
        }
    }
}

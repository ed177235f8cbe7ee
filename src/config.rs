// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Environment-driven configuration with fail-fast validation.
//!
//! [`Config::from_env`] loads a `.env` file when present, then reads the
//! process environment. Required variables missing is a hard error at
//! startup; provider API keys are optional here and validated by the
//! provider constructors instead (a provider built without its key fails
//! fast at construction).

use std::time::Duration;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is not set.
    #[error("missing required environment variable: {0}")]
    MissingVar(String),
    /// A variable is set but does not parse.
    #[error("invalid value for {name}: {value:?}")]
    InvalidVar {
        /// Variable name.
        name: String,
        /// Offending value.
        value: String,
    },
}

/// Conversational agent settings.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    /// Agent server base URL.
    pub base_url: String,
    /// Agent identifier, when pre-provisioned.
    pub agent_id: Option<String>,
    /// Optional bearer token.
    pub api_key: Option<String>,
}

/// STT provider settings.
#[derive(Debug, Clone)]
pub struct SttSettings {
    /// Deepgram API key.
    pub deepgram_api_key: Option<String>,
}

/// TTS provider settings.
#[derive(Debug, Clone)]
pub struct TtsSettings {
    /// Cartesia API key (primary provider).
    pub cartesia_api_key: Option<String>,
    /// ElevenLabs API key (fallback provider).
    pub elevenlabs_api_key: Option<String>,
}

/// Conversation tuning.
#[derive(Debug, Clone)]
pub struct VoiceSettings {
    /// The agent's spoken name; transcripts must mention it.
    pub agent_name: String,
    /// Post-speech cooldown in milliseconds.
    pub cooldown_ms: u64,
    /// Aggregator flush timeout in milliseconds.
    pub flush_timeout_ms: u64,
    /// Response rate limit per minute. `None` = unlimited.
    pub max_responses_per_minute: Option<u32>,
    /// Memory operation timeout.
    pub memory_timeout: Duration,
}

/// Full process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Conversational agent settings.
    pub agent: AgentSettings,
    /// STT settings.
    pub stt: SttSettings,
    /// TTS settings.
    pub tts: TtsSettings,
    /// Conversation tuning.
    pub voice: VoiceSettings,
}

impl Config {
    /// Load from the process environment (after an optional `.env`).
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load through an arbitrary lookup function. Used by `from_env` and
    /// by tests that inject variables without touching the process
    /// environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let agent_name = lookup("AGENT_NAME")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ConfigError::MissingVar("AGENT_NAME".to_string()))?;

        let cooldown_ms = parse_or_default(&lookup, "COOLDOWN_MS", 1000)?;
        let flush_timeout_ms = parse_or_default(&lookup, "FLUSH_TIMEOUT_MS", 2000)?;
        let memory_timeout_ms = parse_or_default(&lookup, "MEMORY_TIMEOUT_MS", 5000)?;
        let max_responses_per_minute = match lookup("MAX_RESPONSES_PER_MINUTE") {
            Some(value) => Some(value.parse::<u32>().map_err(|_| ConfigError::InvalidVar {
                name: "MAX_RESPONSES_PER_MINUTE".to_string(),
                value,
            })?),
            None => None,
        };

        Ok(Self {
            agent: AgentSettings {
                base_url: lookup("AGENT_BASE_URL")
                    .unwrap_or_else(|| "http://localhost:8283".to_string()),
                agent_id: lookup("AGENT_ID"),
                api_key: lookup("AGENT_API_KEY"),
            },
            stt: SttSettings {
                deepgram_api_key: lookup("DEEPGRAM_API_KEY"),
            },
            tts: TtsSettings {
                cartesia_api_key: lookup("CARTESIA_API_KEY"),
                elevenlabs_api_key: lookup("ELEVENLABS_API_KEY"),
            },
            voice: VoiceSettings {
                agent_name,
                cooldown_ms,
                flush_timeout_ms,
                max_responses_per_minute,
                memory_timeout: Duration::from_millis(memory_timeout_ms),
            },
        })
    }
}

fn parse_or_default(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: u64,
) -> Result<u64, ConfigError> {
    match lookup(name) {
        Some(value) => value.parse::<u64>().map_err(|_| ConfigError::InvalidVar {
            name: name.to_string(),
            value,
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_missing_agent_name_fails_fast() {
        let result = Config::from_lookup(lookup_from(&[]));
        assert!(matches!(result, Err(ConfigError::MissingVar(name)) if name == "AGENT_NAME"));
    }

    #[test]
    fn test_defaults_applied() {
        let config = Config::from_lookup(lookup_from(&[("AGENT_NAME", "Bot")])).unwrap();

        assert_eq!(config.voice.agent_name, "Bot");
        assert_eq!(config.voice.cooldown_ms, 1000);
        assert_eq!(config.voice.flush_timeout_ms, 2000);
        assert_eq!(config.voice.max_responses_per_minute, None);
        assert_eq!(config.agent.base_url, "http://localhost:8283");
        assert!(config.stt.deepgram_api_key.is_none());
    }

    #[test]
    fn test_overrides_parsed() {
        let config = Config::from_lookup(lookup_from(&[
            ("AGENT_NAME", "Echo"),
            ("AGENT_BASE_URL", "http://memory-host:9000"),
            ("AGENT_ID", "agent-7"),
            ("COOLDOWN_MS", "250"),
            ("MAX_RESPONSES_PER_MINUTE", "5"),
            ("CARTESIA_API_KEY", "ck"),
        ]))
        .unwrap();

        assert_eq!(config.agent.base_url, "http://memory-host:9000");
        assert_eq!(config.agent.agent_id.as_deref(), Some("agent-7"));
        assert_eq!(config.voice.cooldown_ms, 250);
        assert_eq!(config.voice.max_responses_per_minute, Some(5));
        assert_eq!(config.tts.cartesia_api_key.as_deref(), Some("ck"));
    }

    #[test]
    fn test_invalid_number_is_an_error() {
        let result = Config::from_lookup(lookup_from(&[
            ("AGENT_NAME", "Bot"),
            ("COOLDOWN_MS", "soon"),
        ]));
        assert!(matches!(
            result,
            Err(ConfigError::InvalidVar { name, .. }) if name == "COOLDOWN_MS"
        ));
    }
}

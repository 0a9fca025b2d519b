// Production configuration, loaded from environment variables.
//
// Grounded on the teacher's `Config::from_env` (`env_or`/`env_bool`/`env_csv`
// helpers, `.env` loading via `dotenvy`, a `log_summary` banner), narrowed
// from WebRTC/TURN/TLS knobs to the settings spec §6 and
// `original_source/app/core/config.py` actually call for.

use tracing::info;

use crate::error::VoiceRoomError;

/// Complete server configuration loaded at startup.
///
/// Every field can be set via an environment variable prefixed with
/// `VOICEROOM_`. Defaults are suitable for local development.
#[derive(Debug, Clone)]
pub struct Config {
    // -- Identity / environment --------------------------------------
    pub app_name: String,
    pub app_env: String,
    pub debug: bool,

    // -- Network -------------------------------------------------------
    pub bind_addr: String,

    // -- Audio -----------------------------------------------------------
    pub sample_rate: u32,
    pub frame_duration_ms: u16,

    // -- Agents ------------------------------------------------------------
    /// Name of the provider set used when a room auto-attaches an agent
    /// without an explicit name, e.g. `"mock"` or `"echo"`.
    pub default_agent_provider: String,

    // -- Recording ---------------------------------------------------------
    pub recording_enabled: bool,
    pub recording_dir: String,

    // -- CORS ----------------------------------------------------------------
    pub allowed_origins: String,

    // -- Logging -----------------------------------------------------------
    pub log_level: String,
    pub log_file: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Automatically loads a `.env` file if present (via `dotenvy`).
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        let app_name = env_or("VOICEROOM_APP_NAME", "voiceroom");
        let app_env = env_or("VOICEROOM_APP_ENV", "development");
        let debug = env_bool("VOICEROOM_DEBUG", false);

        let bind_addr = env_or("VOICEROOM_BIND_ADDR", "0.0.0.0:8080");

        let sample_rate = env_or("VOICEROOM_SAMPLE_RATE", "16000")
            .parse::<u32>()
            .unwrap_or(16_000);
        let frame_duration_ms = env_or("VOICEROOM_FRAME_DURATION_MS", "20")
            .parse::<u16>()
            .unwrap_or(20);

        let default_agent_provider = env_or("VOICEROOM_DEFAULT_AGENT_PROVIDER", "mock");

        let recording_enabled = env_bool("VOICEROOM_RECORDING_ENABLED", false);
        let recording_dir = env_or("VOICEROOM_RECORDING_DIR", "recordings");

        let allowed_origins = env_or("VOICEROOM_ALLOWED_ORIGINS", "*");
        let log_level = env_or("VOICEROOM_LOG_LEVEL", "info");
        let log_file = std::env::var("VOICEROOM_LOG_FILE").ok();

        let config = Config {
            app_name,
            app_env,
            debug,
            bind_addr,
            sample_rate,
            frame_duration_ms,
            default_agent_provider,
            recording_enabled,
            recording_dir,
            allowed_origins,
            log_level,
            log_file,
        };

        config.log_summary();
        config
    }

    /// Reject startup-fatal configuration. Anything else (unreachable
    /// provider credentials, an unwritable recording dir) fails lazily
    /// at first use rather than aborting the process.
    pub fn validate(&self) -> Result<(), VoiceRoomError> {
        if self.sample_rate == 0 {
            return Err(VoiceRoomError::Config("sample_rate must be non-zero".into()));
        }
        if self.frame_duration_ms == 0 {
            return Err(VoiceRoomError::Config("frame_duration_ms must be non-zero".into()));
        }
        if self.bind_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(VoiceRoomError::Config(format!(
                "invalid bind_addr: {}",
                self.bind_addr
            )));
        }
        Ok(())
    }

    fn log_summary(&self) {
        info!("──── voiceroom configuration ────");
        info!("  app_name              : {}", self.app_name);
        info!("  app_env               : {}", self.app_env);
        info!("  bind_addr             : {}", self.bind_addr);
        info!("  sample_rate           : {}", self.sample_rate);
        info!("  frame_duration_ms     : {}", self.frame_duration_ms);
        info!("  default_agent_provider: {}", self.default_agent_provider);
        info!("  recording_enabled     : {}", self.recording_enabled);
        if self.recording_enabled {
            info!("  recording_dir         : {}", self.recording_dir);
        }
        info!(
            "  cors_origins          : {}",
            if self.allowed_origins == "*" {
                "* (permissive)"
            } else {
                &self.allowed_origins
            }
        );
        info!("  log_level             : {}", self.log_level);
        info!("──────────────────────────────────");
    }
}

// ---------------------------------------------------------------------------
// Environment helpers
// ---------------------------------------------------------------------------

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_bool_accepts_common_truthy_forms() {
        std::env::set_var("VOICEROOM_TEST_BOOL", "yes");
        assert!(env_bool("VOICEROOM_TEST_BOOL", false));
        std::env::set_var("VOICEROOM_TEST_BOOL", "0");
        assert!(!env_bool("VOICEROOM_TEST_BOOL", true));
        std::env::remove_var("VOICEROOM_TEST_BOOL");
    }

    #[test]
    fn env_or_falls_back_to_default() {
        std::env::remove_var("VOICEROOM_DOES_NOT_EXIST");
        assert_eq!(env_or("VOICEROOM_DOES_NOT_EXIST", "fallback"), "fallback");
    }

    fn sample_config() -> Config {
        Config {
            app_name: "voiceroom".into(),
            app_env: "development".into(),
            debug: false,
            bind_addr: "0.0.0.0:8080".into(),
            sample_rate: 16_000,
            frame_duration_ms: 20,
            default_agent_provider: "mock".into(),
            recording_enabled: false,
            recording_dir: "recordings".into(),
            allowed_origins: "*".into(),
            log_level: "info".into(),
            log_file: None,
        }
    }

    #[test]
    fn validate_accepts_defaults() {
        assert!(sample_config().validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_sample_rate() {
        let mut cfg = sample_config();
        cfg.sample_rate = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_unparsable_bind_addr() {
        let mut cfg = sample_config();
        cfg.bind_addr = "not-an-address".into();
        assert!(cfg.validate().is_err());
    }
}

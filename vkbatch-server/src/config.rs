//! Server configuration module
//!
//! Handles loading configuration from environment variables with sensible defaults.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use vkbatch_core::{OrchestratorSettings, VkClientConfig, DEFAULT_API_URL};

/// Server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Server port (default: 3000)
    pub port: u16,
    /// Server host (default: 127.0.0.1)
    pub host: [u8; 4],
    /// Allowed CORS origins, comma-separated (default: allow all in dev)
    pub allowed_origins: Option<Vec<String>>,
    /// Request body limit in MB (default: 100)
    pub body_limit_mb: usize,
    /// Maximum size of a single uploaded file in MB (default: 25)
    pub max_file_size_mb: usize,
    /// Request timeout in seconds (default: 300, a row with many photos is slow)
    pub timeout_secs: u64,
    /// Enable rate limiting (default: false for tests, true when loaded from env)
    pub rate_limit_enabled: bool,
    /// Rate limit: requests per second (default: 10)
    pub rate_limit_per_sec: u64,
    /// Rate limit: burst size (default: 20)
    pub rate_limit_burst: u32,
    /// Sessions older than this are swept (default: 3600)
    pub session_max_age_secs: u64,
    /// Interval between sweeps (default: 300)
    pub session_sweep_interval_secs: u64,
    /// VK method base URL
    pub vk_api_url: String,
    /// Timeout for each VK request in seconds (default: 60)
    pub vk_timeout_secs: u64,
    /// Row processing knobs
    pub orchestrator: OrchestratorSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            host: [127, 0, 0, 1],
            allowed_origins: None, // None = allow all (dev mode)
            body_limit_mb: 100,
            max_file_size_mb: 25,
            timeout_secs: 300,
            rate_limit_enabled: false, // Disabled by default (for tests)
            rate_limit_per_sec: 10,
            rate_limit_burst: 20,
            session_max_age_secs: 3600,
            session_sweep_interval_secs: 300,
            vk_api_url: DEFAULT_API_URL.to_string(),
            vk_timeout_secs: 60,
            orchestrator: OrchestratorSettings::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let host = std::env::var("HOST")
            .ok()
            .map(|h| {
                if h == "0.0.0.0" {
                    [0, 0, 0, 0]
                } else {
                    [127, 0, 0, 1]
                }
            })
            .unwrap_or(defaults.host);

        let allowed_origins = std::env::var("ALLOWED_ORIGINS").ok().map(|origins| {
            origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        });

        // Rate limiting enabled by default in production, can be disabled with RATE_LIMIT_ENABLED=false
        let rate_limit_enabled = std::env::var("RATE_LIMIT_ENABLED")
            .map(|v| v.to_lowercase() != "false")
            .unwrap_or(true);

        let base = defaults.orchestrator;
        let endpoint_ttl = match std::env::var("ENDPOINT_TTL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => base.endpoint_ttl,
        };

        let orchestrator = OrchestratorSettings {
            max_upload_workers: env_or("UPLOAD_WORKERS", base.max_upload_workers),
            comment_group_size: env_or("COMMENT_GROUP_SIZE", base.comment_group_size),
            save_delay: std::env::var("SAVE_DELAY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(base.save_delay),
            endpoint_ttl,
            case_sensitive_resolution: env_flag(
                "CASE_SENSITIVE_FILENAMES",
                base.case_sensitive_resolution,
            ),
            allow_reprocess: env_flag("ALLOW_REPROCESS", base.allow_reprocess),
        };

        Self {
            port: env_or("PORT", defaults.port),
            host,
            allowed_origins,
            body_limit_mb: env_or("BODY_LIMIT_MB", defaults.body_limit_mb),
            max_file_size_mb: env_or("MAX_FILE_SIZE_MB", defaults.max_file_size_mb),
            timeout_secs: env_or("REQUEST_TIMEOUT_SECS", defaults.timeout_secs),
            rate_limit_enabled,
            rate_limit_per_sec: env_or("RATE_LIMIT_PER_SEC", defaults.rate_limit_per_sec),
            rate_limit_burst: env_or("RATE_LIMIT_BURST", defaults.rate_limit_burst),
            session_max_age_secs: env_or("SESSION_MAX_AGE_SECS", defaults.session_max_age_secs),
            session_sweep_interval_secs: env_or(
                "SESSION_SWEEP_INTERVAL_SECS",
                defaults.session_sweep_interval_secs,
            ),
            vk_api_url: std::env::var("VK_API_URL").unwrap_or(defaults.vk_api_url),
            vk_timeout_secs: env_or("VK_TIMEOUT_SECS", defaults.vk_timeout_secs),
            orchestrator,
        }
    }

    /// Get socket address from config
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::from((self.host, self.port))
    }

    /// Maximum size of one uploaded file in bytes
    pub fn max_file_size(&self) -> usize {
        self.max_file_size_mb * 1024 * 1024
    }

    pub fn session_max_age(&self) -> Duration {
        Duration::from_secs(self.session_max_age_secs)
    }

    pub fn session_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.session_sweep_interval_secs.max(1))
    }

    /// Settings for the VK client
    pub fn vk_client_config(&self) -> VkClientConfig {
        VkClientConfig {
            api_url: self.vk_api_url.clone(),
            timeout: Duration::from_secs(self.vk_timeout_secs),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(default)
}

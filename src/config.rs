//! Runtime configuration: defaults plus `TRUSTCARE_*` env overrides.

use std::path::PathBuf;

/// Application-level constants
pub const APP_NAME: &str = "TrustCare";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// SQLite database file.
    pub db_path: PathBuf,
    /// HTTP bind address for the API server.
    pub bind_addr: String,

    // AI bridge
    pub ai_rate_limit_window_s: u64,
    pub ai_rate_limit_max: u32,
    pub cache_ttl_s: u64,
    pub cache_max_entries: usize,
    pub retry_max_attempts: u32,
    pub bridge_timeout_s: u64,
    pub llm_base_url: String,
    pub llm_api_key: Option<String>,
    pub llm_model: String,
    pub llm_temperature: f32,
    pub llm_max_tokens: u32,

    // Backpressure
    pub per_patient_queue_size: usize,
    pub global_ai_concurrency: usize,

    // Reconciler
    pub bridge_sweep_interval_s: u64,
    pub bridge_stale_threshold_h: i64,
    pub bridge_shared_secret: String,

    // Policy
    pub auto_release_safe: bool,
    pub audit_retention_days: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("trustcare.db"),
            bind_addr: "127.0.0.1:8080".into(),
            ai_rate_limit_window_s: 60,
            ai_rate_limit_max: 10,
            cache_ttl_s: 300,
            cache_max_entries: 100,
            retry_max_attempts: 3,
            bridge_timeout_s: 60,
            llm_base_url: "http://localhost:8081".into(),
            llm_api_key: None,
            llm_model: "clinical-llm-2".into(),
            llm_temperature: 0.2,
            llm_max_tokens: 700,
            per_patient_queue_size: 10,
            global_ai_concurrency: 5,
            bridge_sweep_interval_s: 3600,
            bridge_stale_threshold_h: 24,
            bridge_shared_secret: String::new(),
            auto_release_safe: false,
            audit_retention_days: 90,
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    match env_var(name).map(|v| v.parse::<T>()) {
        Some(Ok(value)) => value,
        Some(Err(_)) => {
            tracing::warn!(var = name, "unparseable value; using default");
            default
        }
        None => default,
    }
}

impl Config {
    /// Load configuration from the environment, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            db_path: env_var("TRUSTCARE_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(d.db_path),
            bind_addr: env_var("TRUSTCARE_BIND_ADDR").unwrap_or(d.bind_addr),
            ai_rate_limit_window_s: env_parse(
                "TRUSTCARE_AI_RATE_LIMIT_WINDOW_S",
                d.ai_rate_limit_window_s,
            ),
            ai_rate_limit_max: env_parse("TRUSTCARE_AI_RATE_LIMIT_MAX", d.ai_rate_limit_max),
            cache_ttl_s: env_parse("TRUSTCARE_CACHE_TTL_S", d.cache_ttl_s),
            cache_max_entries: env_parse("TRUSTCARE_CACHE_MAX_ENTRIES", d.cache_max_entries),
            retry_max_attempts: env_parse("TRUSTCARE_RETRY_MAX_ATTEMPTS", d.retry_max_attempts),
            bridge_timeout_s: env_parse("TRUSTCARE_BRIDGE_TIMEOUT_S", d.bridge_timeout_s),
            llm_base_url: env_var("TRUSTCARE_LLM_BASE_URL").unwrap_or(d.llm_base_url),
            llm_api_key: env_var("TRUSTCARE_LLM_API_KEY"),
            llm_model: env_var("TRUSTCARE_LLM_MODEL").unwrap_or(d.llm_model),
            llm_temperature: env_parse("TRUSTCARE_LLM_TEMPERATURE", d.llm_temperature),
            llm_max_tokens: env_parse("TRUSTCARE_LLM_MAX_TOKENS", d.llm_max_tokens),
            per_patient_queue_size: env_parse(
                "TRUSTCARE_PER_PATIENT_QUEUE_SIZE",
                d.per_patient_queue_size,
            ),
            global_ai_concurrency: env_parse(
                "TRUSTCARE_GLOBAL_AI_CONCURRENCY",
                d.global_ai_concurrency,
            ),
            bridge_sweep_interval_s: env_parse(
                "TRUSTCARE_BRIDGE_SWEEP_INTERVAL_S",
                d.bridge_sweep_interval_s,
            ),
            bridge_stale_threshold_h: env_parse(
                "TRUSTCARE_BRIDGE_STALE_THRESHOLD_H",
                d.bridge_stale_threshold_h,
            ),
            bridge_shared_secret: env_var("TRUSTCARE_BRIDGE_SECRET")
                .unwrap_or(d.bridge_shared_secret),
            auto_release_safe: env_parse("TRUSTCARE_AUTO_RELEASE_SAFE", d.auto_release_safe),
            audit_retention_days: env_parse(
                "TRUSTCARE_AUDIT_RETENTION_DAYS",
                d.audit_retention_days,
            ),
        }
    }

    /// Bridge-facing view of the configuration.
    pub fn bridge_config(&self) -> crate::bridge::BridgeConfig {
        crate::bridge::BridgeConfig {
            window_secs: self.ai_rate_limit_window_s,
            max_per_window: self.ai_rate_limit_max,
            cache_ttl_secs: self.cache_ttl_s,
            cache_max_entries: self.cache_max_entries,
            retry_max_attempts: self.retry_max_attempts,
            request_timeout_secs: self.bridge_timeout_s,
            model: self.llm_model.clone(),
            temperature: self.llm_temperature,
            max_tokens: self.llm_max_tokens,
        }
    }

    /// Default log filter when RUST_LOG is unset.
    pub fn default_log_filter() -> &'static str {
        "info,trustcare=debug"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = Config::default();
        assert_eq!(c.ai_rate_limit_window_s, 60);
        assert_eq!(c.ai_rate_limit_max, 10);
        assert_eq!(c.cache_ttl_s, 300);
        assert_eq!(c.cache_max_entries, 100);
        assert_eq!(c.retry_max_attempts, 3);
        assert_eq!(c.bridge_timeout_s, 60);
        assert_eq!(c.per_patient_queue_size, 10);
        assert_eq!(c.global_ai_concurrency, 5);
        assert_eq!(c.bridge_stale_threshold_h, 24);
        assert_eq!(c.audit_retention_days, 90);
        assert!(!c.auto_release_safe);
    }

    #[test]
    fn bridge_config_mirrors_limits() {
        let c = Config::default();
        let b = c.bridge_config();
        assert_eq!(b.window_secs, 60);
        assert_eq!(b.max_per_window, 10);
        assert_eq!(b.cache_ttl_secs, 300);
        assert_eq!(b.cache_max_entries, 100);
        assert_eq!(b.request_timeout_secs, 60);
        assert_eq!(b.model, "clinical-llm-2");
    }

    #[test]
    fn app_version_matches_cargo() {
        assert_eq!(APP_VERSION, env!("CARGO_PKG_VERSION"));
    }
}

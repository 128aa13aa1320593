use std::time::Duration;

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::jobs::ExecutorSettings;
use crate::runtime::agentos::AgentOsSettings;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// Port to listen on
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Base URL of the agent server
    #[arg(long, env = "AGENT_BASE_URL")]
    pub runtime_url: Option<String>,

    /// Agent that answers consultations
    #[arg(long, env = "AGENT_ID")]
    pub agent_id: Option<String>,

    /// Enable rate limiting
    #[arg(long, env = "RATE_LIMIT_ENABLED")]
    pub rate_limit_enabled: Option<bool>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub resilience: ResilienceConfig,
    pub runtime: RuntimeConfig,
    pub jobs: JobsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub request_timeout_secs: u64,
    pub body_limit_bytes: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ResilienceConfig {
    pub rate_limit_enabled: bool,
    pub requests_per_second: f32,
    pub burst_size: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RuntimeConfig {
    pub base_url: String,
    pub agent_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub http_timeout_secs: u64,
    /// Deadline for the synchronous `start` call; kept below the request timeout.
    pub start_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct JobsConfig {
    pub max_resume_cycles: u32,
    pub run_timeout_secs: u64,
    pub max_concurrent: usize,
    /// Seconds a finished run stays pollable; `0` keeps runs until restart.
    pub retention_secs: u64,
    pub sweep_interval_secs: u64,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from_args(std::env::args())
    }

    pub fn load_from_args<I, T>(args: I) -> Result<Self, config::ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli =
            Cli::try_parse_from(args).map_err(|e| config::ConfigError::Message(e.to_string()))?;

        let mut builder = Config::builder();

        // 1. Defaults
        builder = builder
            .set_default("server.port", 8080)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.request_timeout_secs", 300)?
            .set_default("server.body_limit_bytes", 1024 * 1024)?
            .set_default("resilience.rate_limit_enabled", false)?
            .set_default("resilience.requests_per_second", 20.0)?
            .set_default("resilience.burst_size", 40)?
            .set_default("runtime.base_url", "http://127.0.0.1:7777")?
            .set_default("runtime.agent_id", "dr.-hausarzt")?
            .set_default("runtime.http_timeout_secs", 900)?
            .set_default("runtime.start_timeout_secs", 240)?
            .set_default("jobs.max_resume_cycles", 5)?
            .set_default("jobs.run_timeout_secs", 600)?
            .set_default("jobs.max_concurrent", 16)?
            .set_default("jobs.retention_secs", 3600)?
            .set_default("jobs.sweep_interval_secs", 60)?;

        // 2. Config file
        if let Some(path) = &cli.config {
            builder = builder.add_source(File::with_name(path));
        }

        // 3. Environment variables (prefixed with CONSULT_), e.g. CONSULT_JOBS__RUN_TIMEOUT_SECS=120
        builder = builder.add_source(
            Environment::with_prefix("CONSULT")
                .separator("__")
                .try_parsing(true),
        );

        // 4. CLI flags (and the plain env vars clap maps onto them) win
        if let Some(port) = cli.port {
            builder = builder.set_override("server.port", port)?;
        }
        if let Some(url) = cli.runtime_url {
            builder = builder.set_override("runtime.base_url", url)?;
        }
        if let Some(agent) = cli.agent_id {
            builder = builder.set_override("runtime.agent_id", agent)?;
        }
        if let Some(rl) = cli.rate_limit_enabled {
            builder = builder.set_override("resilience.rate_limit_enabled", rl)?;
        }

        let cfg: Self = builder.build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), config::ConfigError> {
        let invalid = |msg: &str| -> Result<(), config::ConfigError> {
            Err(config::ConfigError::Message(msg.to_string()))
        };

        if self.jobs.max_resume_cycles == 0 {
            return invalid("jobs.max_resume_cycles must be at least 1");
        }
        if self.jobs.max_concurrent == 0 {
            return invalid("jobs.max_concurrent must be at least 1");
        }
        if self.jobs.run_timeout_secs == 0 {
            return invalid("jobs.run_timeout_secs must be greater than 0");
        }
        if self.jobs.retention_secs > 0 && self.jobs.sweep_interval_secs == 0 {
            return invalid("jobs.sweep_interval_secs must be greater than 0");
        }
        if self.server.request_timeout_secs == 0 {
            return invalid("server.request_timeout_secs must be greater than 0");
        }
        if self.runtime.start_timeout_secs == 0
            || self.runtime.start_timeout_secs >= self.server.request_timeout_secs
        {
            return invalid(
                "runtime.start_timeout_secs must be greater than 0 and below server.request_timeout_secs",
            );
        }
        if self.runtime.base_url.trim().is_empty() {
            return invalid("runtime.base_url cannot be empty");
        }
        if self.resilience.rate_limit_enabled
            && (self.resilience.requests_per_second <= 0.0 || self.resilience.burst_size == 0)
        {
            return invalid("rate limiting needs a positive rate and burst size");
        }
        Ok(())
    }

    pub fn executor_settings(&self) -> ExecutorSettings {
        ExecutorSettings {
            max_resume_cycles: self.jobs.max_resume_cycles,
            run_timeout: Duration::from_secs(self.jobs.run_timeout_secs),
            max_concurrent: self.jobs.max_concurrent,
        }
    }

    pub fn agentos_settings(&self) -> AgentOsSettings {
        AgentOsSettings {
            base_url: self.runtime.base_url.clone(),
            agent_id: self.runtime.agent_id.clone(),
            api_key: self
                .runtime
                .api_key
                .clone()
                .filter(|k| !k.trim().is_empty()),
            timeout: Duration::from_secs(self.runtime.http_timeout_secs),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.runtime.start_timeout_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.jobs.retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.jobs.sweep_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    #[serial]
    fn test_defaults() {
        let cfg = AppConfig::load_from_args(["consult-gateway"]).unwrap();
        assert_eq!(cfg.runtime.agent_id, "dr.-hausarzt");
        assert_eq!(cfg.jobs.max_resume_cycles, 5);
        assert_eq!(cfg.executor_settings().run_timeout, Duration::from_secs(600));
        assert!(cfg.agentos_settings().api_key.is_none());
    }

    #[test]
    #[serial]
    fn test_cli_overrides_file_and_env() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[server]\nport = 9000\n[jobs]\nmax_concurrent = 4").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        // SAFETY: serialized with every other env-reading test.
        unsafe { std::env::set_var("CONSULT_JOBS__RUN_TIMEOUT_SECS", "45") };
        let cfg = AppConfig::load_from_args(["consult-gateway", "--config", &path, "--port", "9100"]);
        // SAFETY: as above.
        unsafe { std::env::remove_var("CONSULT_JOBS__RUN_TIMEOUT_SECS") };

        let cfg = cfg.unwrap();
        assert_eq!(cfg.server.port, 9100);
        assert_eq!(cfg.jobs.max_concurrent, 4);
        assert_eq!(cfg.jobs.run_timeout_secs, 45);
    }

    #[test]
    #[serial]
    fn test_rejects_zero_resume_cycles() {
        // SAFETY: serialized with every other env-reading test.
        unsafe { std::env::set_var("CONSULT_JOBS__MAX_RESUME_CYCLES", "0") };
        let result = AppConfig::load_from_args(["consult-gateway"]);
        // SAFETY: as above.
        unsafe { std::env::remove_var("CONSULT_JOBS__MAX_RESUME_CYCLES") };

        assert!(result.is_err());
    }

    #[test]
    #[serial]
    fn test_start_timeout_must_fit_request_timeout() {
        // SAFETY: serialized with every other env-reading test.
        unsafe { std::env::set_var("CONSULT_RUNTIME__START_TIMEOUT_SECS", "300") };
        let result = AppConfig::load_from_args(["consult-gateway"]);
        // SAFETY: as above.
        unsafe { std::env::remove_var("CONSULT_RUNTIME__START_TIMEOUT_SECS") };

        assert!(result.is_err());
        let cfg = AppConfig::load_from_args(["consult-gateway"]).unwrap();
        assert!(cfg.start_timeout() < cfg.request_timeout());
    }
}

use consult_gateway::config::AppConfig;
use serial_test::serial;
use std::env;
use std::fs;

// Helper to clear environment variables that might interfere with tests
fn clear_env_vars() {
    // SAFETY: every test in this file is #[serial], so no other thread reads
    // the environment concurrently.
    unsafe {
        env::remove_var("CONSULT_SERVER__PORT");
        env::remove_var("CONSULT_JOBS__RETENTION_SECS");
        env::remove_var("CONSULT_RUNTIME__API_KEY");
        env::remove_var("CONFIG_FILE");
        env::remove_var("PORT");
        env::remove_var("AGENT_ID");
    }
}

fn load() -> AppConfig {
    AppConfig::load_from_args(["consult-gateway"]).expect("Failed to load config")
}

#[test]
#[serial]
fn test_default_config() {
    clear_env_vars();

    let config = load();
    assert_eq!(config.server.port, 8080);
    assert_eq!(config.runtime.base_url, "http://127.0.0.1:7777");
    assert!(!config.resilience.rate_limit_enabled);
    assert_eq!(config.retention().as_secs(), 3600);
}

#[test]
#[serial]
fn test_env_override() {
    clear_env_vars();
    // SAFETY: serialized, see clear_env_vars.
    unsafe {
        env::set_var("CONSULT_SERVER__PORT", "9090");
        env::set_var("CONSULT_JOBS__RETENTION_SECS", "0");
        env::set_var("CONSULT_RUNTIME__API_KEY", "secret");
    }

    let config = load();
    clear_env_vars();

    assert_eq!(config.server.port, 9090);
    assert!(config.retention().is_zero());
    assert_eq!(config.agentos_settings().api_key.as_deref(), Some("secret"));
}

#[test]
#[serial]
fn test_file_load_via_env() {
    clear_env_vars();

    let dir = tempfile::tempdir().expect("tempdir");
    let file_path = dir.path().join("gateway.toml");
    fs::write(
        &file_path,
        "[server]\nport = 7070\n\n[runtime]\nagent_id = \"team-lead\"\n",
    )
    .expect("Failed to write temp config");

    // SAFETY: serialized, see clear_env_vars.
    unsafe {
        env::set_var("CONFIG_FILE", &file_path);
    }

    let config = load();
    clear_env_vars();

    assert_eq!(config.server.port, 7070);
    assert_eq!(config.runtime.agent_id, "team-lead");
}

#[test]
#[serial]
fn test_plain_env_flags_beat_prefixed_env() {
    clear_env_vars();
    // SAFETY: serialized, see clear_env_vars.
    unsafe {
        env::set_var("CONSULT_SERVER__PORT", "9090");
        env::set_var("PORT", "9191");
        env::set_var("AGENT_ID", "night-shift");
    }

    let config = load();
    clear_env_vars();

    assert_eq!(config.server.port, 9191);
    assert_eq!(config.runtime.agent_id, "night-shift");
}

#[test]
#[serial]
fn test_missing_config_file_is_an_error() {
    clear_env_vars();

    let result = AppConfig::load_from_args(["consult-gateway", "--config", "/nonexistent/gateway.toml"]);
    assert!(result.is_err());
}

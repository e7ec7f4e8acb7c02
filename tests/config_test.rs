use std::path::PathBuf;
use std::time::Duration;

use posture_agent::config::Config;
use posture_agent::config::secrets::ExposeSecret;
use posture_agent::error::Error;

fn write_config(name: &str, content: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    (dir, path)
}

#[test]
fn json_config_uses_agent_field_names() {
    let (_dir, path) = write_config(
        "config.json",
        r#"{
            "ingest_url": "https://siem.example.com/ingest",
            "agent_id": "ws-finance-07",
            "timeout_seconds": 5,
            "interval_seconds": 300,
            "spool_dir": "/tmp/posture-spool",
            "spool_capacity": 25,
            "collector": ["/usr/libexec/posture-collector", "--full"],
            "run_mode": "daemon",
            "output_file": "snapshot.json"
        }"#,
    );

    let config = Config::from_file(&path).unwrap();

    assert_eq!(config.ingest_url, "https://siem.example.com/ingest");
    assert_eq!(config.agent_id, "ws-finance-07");
    assert_eq!(config.request_timeout, Duration::from_secs(5));
    assert_eq!(config.interval, Duration::from_secs(300));
    assert_eq!(config.spool_dir, PathBuf::from("/tmp/posture-spool"));
    assert_eq!(config.spool_capacity, 25);
    // Untouched fields keep their defaults.
    assert_eq!(config.cycle_timeout, Duration::from_secs(60));
    assert_eq!(config.max_attempts, 1);

    let (program, args) = config.collector_command().unwrap();
    assert_eq!(program, "/usr/libexec/posture-collector");
    assert_eq!(args, ["--full".to_string()]);
}

#[test]
fn toml_config_is_parsed_by_extension() {
    let (_dir, path) = write_config(
        "agent.toml",
        r#"
ingest_url = "http://10.0.0.5:8000/ingest"
max_attempts = 3
backoff_unit_ms = 250
log_level = "debug"
"#,
    );

    let config = Config::from_file(&path).unwrap();

    assert_eq!(config.ingest_url, "http://10.0.0.5:8000/ingest");
    assert_eq!(config.max_attempts, 3);
    assert_eq!(config.backoff_unit, Duration::from_millis(250));
    assert_eq!(config.log_level, "debug");

    let coordinator = config.coordinator_config();
    assert_eq!(coordinator.retry.max_attempts, 3);
    assert_eq!(coordinator.retry.backoff_unit, Duration::from_millis(250));
}

#[test]
fn empty_config_yields_defaults() {
    let (_dir, path) = write_config("config.json", "{}");

    let config = Config::from_file(&path).unwrap();

    assert_eq!(config.ingest_url, "http://localhost:8000/ingest");
    assert_eq!(config.agent_id, "posture-agent-001");
    assert_eq!(config.spool_capacity, 100);
    assert_eq!(config.interval, Duration::from_secs(900));
    assert_eq!(config.request_timeout, Duration::from_secs(10));
    assert!(config.collector_command().is_none());

    let transport = config.transport_config();
    assert_eq!(transport.ingest_url, config.ingest_url);
    assert_eq!(transport.timeout, Duration::from_secs(10));
}

#[test]
fn invalid_values_are_rejected() {
    for content in [
        r#"{"ingest_url": "ftp://example.com"}"#,
        r#"{"spool_capacity": 0}"#,
        r#"{"interval_seconds": 0}"#,
        r#"{"timeout_seconds": 0}"#,
        r#"{"max_attempts": 0}"#,
        r#"{"spool_capacity": "many"}"#,
        "not json",
    ] {
        let (_dir, path) = write_config("config.json", content);
        let result = Config::from_file(&path);
        assert!(
            matches!(result, Err(Error::Config(_))),
            "accepted {content}"
        );
    }
}

#[test]
fn missing_file_is_config_error() {
    let result = Config::from_file("/nonexistent/posture-agent/config.json");
    assert!(matches!(result, Err(Error::Config(_))));
}

// All environment handling lives in one test; the process environment is
// shared between test threads.
#[test]
fn env_config_overrides_and_validates() {
    unsafe {
        std::env::set_var("INGEST_URL", "https://ingest.example.org/v1/events");
        std::env::set_var("INGEST_TOKEN", "tok-123");
        std::env::set_var("SPOOL_CAPACITY", "7");
        std::env::set_var("INTERVAL_SECS", "60");
        std::env::set_var("COLLECTOR_COMMAND", "/opt/collector --quick");
    }

    let config = Config::from_env().unwrap();
    assert_eq!(config.ingest_url, "https://ingest.example.org/v1/events");
    assert_eq!(
        config.ingest_token.as_ref().map(|t| t.expose_secret().to_string()),
        Some("tok-123".to_string())
    );
    assert_eq!(config.spool_capacity, 7);
    assert_eq!(config.interval, Duration::from_secs(60));
    assert_eq!(
        config.collector_command(),
        Some(("/opt/collector", &["--quick".to_string()][..]))
    );
    // The token never shows up in debug output.
    assert!(!format!("{config:?}").contains("tok-123"));

    unsafe {
        std::env::set_var("SPOOL_CAPACITY", "lots");
    }
    assert!(matches!(Config::from_env(), Err(Error::Config(_))));

    unsafe {
        std::env::remove_var("INGEST_URL");
        std::env::remove_var("INGEST_TOKEN");
        std::env::remove_var("SPOOL_CAPACITY");
        std::env::remove_var("INTERVAL_SECS");
        std::env::remove_var("COLLECTOR_COMMAND");
    }

    let config = Config::from_env().unwrap();
    assert_eq!(config.ingest_url, "http://localhost:8000/ingest");
    assert!(config.ingest_token.is_none());
}

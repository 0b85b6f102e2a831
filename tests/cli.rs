use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

const CONFIG: &str = r#"
[logging]
level = "warn"

[[features]]
key = "image-generation"
display_name = "Image generation"
default_limit = 5
default_period = "daily"

[[features]]
key = "api-calls"
default_limit = -1
default_period = "hourly"

[[guest_quotas]]
feature = "image-generation"
limit = 1
period = "daily"
"#;

fn write_config(content: &str) -> (TempDir, std::path::PathBuf) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, content).unwrap();
    (dir, path)
}

fn quotad() -> Command {
    let mut cmd = Command::cargo_bin("quotad").unwrap();
    for var in [
        "QUOTAD_LOG_LEVEL",
        "QUOTAD_LOG_FORMAT",
        "QUOTAD_ADMIN_PORT",
        "QUOTAD_METRICS_ENABLED",
        "QUOTAD_PLAN_CACHE_TTL_SECS",
        "RUST_LOG",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

#[test]
fn test_cli_version() {
    quotad()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("quotad 0.1.0"));
}

#[test]
fn test_cli_help() {
    quotad()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Layered quota resolution and usage tracking service",
        ));
}

#[test]
fn test_cli_check_config() {
    let (_dir, path) = write_config(CONFIG);
    quotad()
        .arg("--config")
        .arg(&path)
        .arg("check-config")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Configuration OK: 2 features, 1 guest quotas, 0 plans",
        ));
}

#[test]
fn test_cli_check_config_rejects_invalid() {
    let (_dir, path) = write_config("[logging]\nlevel = \"loud\"\n");
    quotad()
        .arg("--config")
        .arg(&path)
        .arg("check-config")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid log level"));
}

#[test]
fn test_cli_missing_config_file() {
    let dir = TempDir::new().unwrap();
    quotad()
        .arg("--config")
        .arg(dir.path().join("absent.toml"))
        .arg("check-config")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Config file not found"));
}

#[test]
fn test_cli_features() {
    let (_dir, path) = write_config(CONFIG);
    quotad()
        .arg("--config")
        .arg(&path)
        .arg("features")
        .assert()
        .success()
        .stdout(predicate::str::contains("image-generation\t5\tdaily\tImage generation"))
        .stdout(predicate::str::contains("api-calls\tunlimited\thourly"));
}

#[test]
fn test_cli_resolve_user_and_guest() {
    let (_dir, path) = write_config(CONFIG);
    quotad()
        .arg("--config")
        .arg(&path)
        .args(["resolve", "user:42", "image-generation"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"source\": \"system_default\""))
        .stdout(predicate::str::contains("\"remaining\": 5"));

    quotad()
        .arg("--config")
        .arg(&path)
        .args(["resolve", "guest:abc", "image-generation"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"source\": \"global_guest\""));
}

#[test]
fn test_cli_resolve_errors() {
    let (_dir, path) = write_config(CONFIG);
    quotad()
        .arg("--config")
        .arg(&path)
        .args(["resolve", "bob", "image-generation"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid subject"));

    quotad()
        .arg("--config")
        .arg(&path)
        .args(["resolve", "user:1", "video"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown feature: video"));
}

#[test]
fn test_cli_resolve_missing_arguments() {
    quotad()
        .arg("resolve")
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "required arguments were not provided",
        ));
}

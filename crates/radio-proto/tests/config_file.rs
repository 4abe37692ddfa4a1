use pirate_proto::config::{load_languages, Config, DriverKind};
use std::time::Duration;

#[test]
fn load_from_writes_defaults_when_absent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pirate-radio").join("config.toml");

    let config = Config::load_from(&path).unwrap();
    assert!(path.exists());
    assert_eq!(config.stream.start_timeout(), Duration::from_secs(30));

    // What was written reads back the same
    let again = Config::load_from(&path).unwrap();
    assert_eq!(again.search.servers, config.search.servers);
    assert_eq!(again.display.driver, DriverKind::Framebuffer);
}

#[test]
fn overrides_survive_a_round_trip_through_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
seed = 42

[display]
driver = "log"

[stream]
retry_backoff_ms = 500
"#,
    )
    .unwrap();

    let config = Config::load_from(&path).unwrap();
    assert_eq!(config.seed, Some(42));
    assert_eq!(config.display.driver, DriverKind::Log);
    assert_eq!(config.stream.retry_delay(1), Some(Duration::from_millis(500)));
    assert_eq!(config.stream.retry_delay(3), Some(Duration::from_millis(2000)));
    assert_eq!(config.input.random_pin, 16);
}

#[test]
fn languages_file_must_not_be_empty() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("languages.txt");

    std::fs::write(&path, "# none yet\n\n").unwrap();
    assert!(load_languages(&path).is_err());

    std::fs::write(&path, "english\n# comment\nswedish\n").unwrap();
    assert_eq!(load_languages(&path).unwrap(), vec!["english", "swedish"]);

    assert!(load_languages(&dir.path().join("missing.txt")).is_err());
}

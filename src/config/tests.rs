use super::*;

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.cache.max_entries = Some(50);
    raw.logging.level = Some("info".to_string());

    let overrides = SettingsOverrides {
        cache_max_entries: Some(200),
        log_level: Some("debug".to_string()),
        ..Default::default()
    };

    raw.apply_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.cache.max_entries, 200);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
}

#[test]
fn cache_settings_default_to_cache_config_defaults() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");
    assert_eq!(settings.cache, CacheConfig::default());
    assert_eq!(settings.logging.level, LevelFilter::INFO);
    assert_eq!(settings.logging.format, LogFormat::Compact);
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = SettingsOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.logging.format, LogFormat::Json);
}

#[test]
fn invalid_log_level_is_rejected() {
    let mut raw = RawSettings::default();
    raw.logging.level = Some("loud".to_string());

    let err = Settings::from_raw(raw).expect_err("invalid level");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "logging.level",
            ..
        }
    ));
}

#[test]
fn zero_capacity_is_rejected() {
    let mut raw = RawSettings::default();
    raw.cache.max_entries = Some(0);

    let err = Settings::from_raw(raw).expect_err("zero capacity");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "cache.max_entries",
            ..
        }
    ));
}

#[test]
fn retry_bounds_must_be_ordered() {
    let mut raw = RawSettings::default();
    raw.cache.retry_base_delay_ms = Some(5_000);
    raw.cache.retry_max_delay_ms = Some(1_000);

    let err = Settings::from_raw(raw).expect_err("inverted bounds");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "cache.retry_max_delay_ms",
            ..
        }
    ));
}

#[test]
fn default_to_demo_command() {
    let args = CliArgs::parse_from(["tessera"]);
    let command = args
        .command
        .unwrap_or(Command::Demo(DemoArgs::default()));
    assert!(matches!(command, Command::Demo(_)));
}

#[test]
fn parse_demo_arguments() {
    let args = CliArgs::parse_from([
        "tessera",
        "demo",
        "--latency-ms",
        "5",
        "--seed-records",
        "4",
        "--cache-stale-time-ms",
        "1000",
    ]);

    match args.command {
        Some(Command::Demo(demo)) => {
            assert_eq!(demo.latency_ms, 5);
            assert_eq!(demo.seed_records, 4);
        }
        other => panic!("unexpected command: {other:?}"),
    }
    assert_eq!(args.overrides.cache_stale_time_ms, Some(1000));
}

#[test]
fn parse_cascade_arguments() {
    let args = CliArgs::parse_from([
        "tessera",
        "--log-json",
        "true",
        "cascade",
        "--category",
        "person",
    ]);

    match args.command {
        Some(Command::Cascade(cascade)) => {
            assert_eq!(cascade.category, Some(tessera_types::Category::Person));
        }
        other => panic!("unexpected command: {other:?}"),
    }
    assert_eq!(args.overrides.log_json, Some(true));
}

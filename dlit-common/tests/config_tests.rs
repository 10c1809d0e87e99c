//! Integration tests for config file resolution and loading
//!
//! Tests that manipulate DLIT_CONFIG are marked with #[serial] so they never
//! race each other on the process environment.

use dlit_common::config::{
    load_config, resolve_config_path, write_toml_config, InfillMethod, TomlConfig, YearRange,
    CONFIG_ENV_VAR,
};
use dlit_common::Error;
use serial_test::serial;
use std::env;
use std::path::PathBuf;
use tempfile::TempDir;

fn write_config(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    path
}

#[test]
#[serial]
fn test_resolver_with_no_overrides_uses_defaults() {
    env::remove_var(CONFIG_ENV_VAR);

    assert!(resolve_config_path(None).is_none());

    let config = load_config(None).unwrap();
    assert_eq!(config, TomlConfig::default());
}

#[test]
#[serial]
fn test_resolver_env_var() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        "env.toml",
        "[land_use]\ndemolition_dampener = 0.5\n",
    );
    env::set_var(CONFIG_ENV_VAR, &path);

    assert_eq!(resolve_config_path(None), Some(path.clone()));
    let config = load_config(None).unwrap();
    assert_eq!(config.land_use.demolition_dampener, 0.5);

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_cli_arg_takes_precedence_over_env() {
    let dir = TempDir::new().unwrap();
    let env_path = write_config(&dir, "env.toml", "[land_use]\ndemolition_dampener = 0.5\n");
    let cli_path = write_config(&dir, "cli.toml", "[land_use]\ndemolition_dampener = 0.0\n");
    env::set_var(CONFIG_ENV_VAR, &env_path);

    let config = load_config(Some(&cli_path)).unwrap();
    assert_eq!(config.land_use.demolition_dampener, 0.0);

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_explicit_missing_file_is_an_error() {
    env::remove_var(CONFIG_ENV_VAR);
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("nope.toml");

    let result = load_config(Some(&missing));
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn test_full_config_parses() {
    let text = r#"
output_folder = "out"

[logging]
level = "debug"

[inputs]
dlog_records = "data/records.csv"

[infill]
gfa_infill_method = "regression"
user_infill = true
user_input_path = "data/user_input.csv"

[land_use]
demolition_dampener = 0.75

[land_use.build_out_years]
start = 2021
end = 2040
"#;
    let config = TomlConfig::from_toml_str(text).unwrap();

    assert_eq!(config.output_folder, PathBuf::from("out"));
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.inputs.dlog_records, PathBuf::from("data/records.csv"));
    // Unspecified inputs keep their defaults
    assert_eq!(
        config.inputs.valid_codes,
        PathBuf::from("inputs").join("valid_land_use_codes.csv")
    );
    assert_eq!(config.infill.gfa_infill_method, InfillMethod::Regression);
    assert!(config.infill.user_infill);
    assert_eq!(config.land_use.demolition_dampener, 0.75);
    assert_eq!(
        config.land_use.build_out_years,
        Some(YearRange { start: 2021, end: 2040 })
    );
}

#[test]
fn test_write_then_load_preserves_values() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("dlit.toml");

    let mut config = TomlConfig::default();
    config.infill.gfa_infill_method = InfillMethod::RegressionNoNegatives;
    config.land_use.demolition_dampener = 0.3;

    write_toml_config(&config, &path).unwrap();
    assert!(path.exists());
    assert!(!path.with_extension("toml.tmp").exists());

    let loaded = load_config(Some(&path)).unwrap();
    assert_eq!(loaded, config);
}

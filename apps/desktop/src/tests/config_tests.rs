use std::{
    collections::HashMap,
    env, fs,
    time::{SystemTime, UNIX_EPOCH},
};

use super::*;

fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();
    move |key| vars.get(key).cloned()
}

#[test]
fn defaults_point_at_local_backend() {
    let settings = ClientSettings::default();
    assert_eq!(settings.api_base_url, "http://localhost:8000");
    assert_eq!(settings.request_timeout(), Duration::from_secs(120));
    assert_eq!(settings.preview_rows, 10);
}

#[test]
fn file_overrides_only_the_keys_it_sets() {
    let mut settings = ClientSettings::default();
    apply_file_overrides(&mut settings, "api_base_url = \"http://10.0.0.5:8000/api\"\n")
        .expect("valid toml");

    assert_eq!(settings.api_base_url, "http://10.0.0.5:8000/api");
    assert_eq!(settings.request_timeout_secs, 120);
}

#[test]
fn malformed_file_is_an_error() {
    let mut settings = ClientSettings::default();
    assert!(apply_file_overrides(&mut settings, "preview_rows = \"many\"").is_err());
}

#[test]
fn app_prefixed_env_wins_over_legacy_url_variable() {
    let mut settings = ClientSettings::default();
    apply_env_overrides(
        &mut settings,
        env_of(&[
            ("DATAQC_API_URL", "http://legacy:8000"),
            ("APP__API_BASE_URL", "http://app:8000"),
            ("APP__REQUEST_TIMEOUT_SECS", "30"),
        ]),
    );

    assert_eq!(settings.api_base_url, "http://app:8000");
    assert_eq!(settings.request_timeout_secs, 30);
}

#[test]
fn unparsable_numeric_env_is_ignored() {
    let mut settings = ClientSettings::default();
    apply_env_overrides(
        &mut settings,
        env_of(&[("APP__PREVIEW_ROWS", "ten"), ("APP__REQUEST_TIMEOUT_SECS", "")]),
    );
    assert_eq!(settings, ClientSettings::default());
}

#[test]
fn explicit_config_file_must_exist() {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let missing = env::temp_dir().join(format!("dataqc_missing_{suffix}.toml"));

    assert!(load_settings(Some(&missing)).is_err());
}

#[test]
fn explicit_config_file_is_applied() {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let path = env::temp_dir().join(format!("dataqc_client_{suffix}.toml"));
    fs::write(&path, "preview_rows = 3\n").expect("write config");

    let settings = load_settings(Some(&path)).expect("settings");
    fs::remove_file(&path).expect("cleanup");

    assert_eq!(settings.preview_rows, 3);
}

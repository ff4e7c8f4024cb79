use std::fs;
use std::time::Duration;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use chrono::NaiveDate;

use canopy_analytics::config::{ConfigLoader, Overrides};
use canopy_analytics::error::CanopyError;

#[test]
fn load_config_with_dataset_bounds() {
    let temp = tempfile::tempdir().unwrap();
    let path = Utf8PathBuf::from_path_buf(temp.path().join("canopy.json")).unwrap();
    fs::write(
        &path,
        r#"{
  "schema_version": 1,
  "api_url": "https://data-api.example.org/",
  "timeout_secs": 5,
  "datasets": {
    "gfw_integrated_alerts": {
      "min_date": "2019-01-01",
      "max_date": "2023-06-30",
      "default_start": "2023-01-01"
    }
  }
}"#,
    )
    .unwrap();

    let config = ConfigLoader::load(&path).unwrap();
    let resolved =
        ConfigLoader::resolve_config(config, Some(path.clone()), Overrides::default()).unwrap();
    assert_eq!(resolved.api_url, "https://data-api.example.org");
    assert_eq!(resolved.timeout, Duration::from_secs(5));
    assert_eq!(resolved.path.as_ref(), Some(&path));

    let bounds = resolved.metadata.bounds("gfw_integrated_alerts").unwrap();
    assert_eq!(bounds.max_date, NaiveDate::from_ymd_opt(2023, 6, 30));
    assert_eq!(bounds.default_end, None);
}

#[test]
fn explicit_missing_path_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    let missing = temp.path().join("absent.json");
    assert_matches!(
        ConfigLoader::resolve(missing.to_str()),
        Err(CanopyError::MissingConfig)
    );
}

#[test]
fn malformed_json_is_a_parse_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = Utf8PathBuf::from_path_buf(temp.path().join("canopy.json")).unwrap();
    fs::write(&path, "{ not json").unwrap();
    assert_matches!(ConfigLoader::load(&path), Err(CanopyError::ConfigParse(_)));
}

#[test]
fn rejects_non_http_urls_and_zero_timeouts() {
    let temp = tempfile::tempdir().unwrap();
    let path = Utf8PathBuf::from_path_buf(temp.path().join("canopy.json")).unwrap();

    fs::write(&path, r#"{"api_url": "ftp://mirror.example.org"}"#).unwrap();
    let config = ConfigLoader::load(&path).unwrap();
    assert_matches!(
        ConfigLoader::resolve_config(config, None, Overrides::default()),
        Err(CanopyError::ConfigParse(_))
    );

    fs::write(&path, r#"{"timeout_secs": 0}"#).unwrap();
    let config = ConfigLoader::load(&path).unwrap();
    assert_matches!(
        ConfigLoader::resolve_config(config, None, Overrides::default()),
        Err(CanopyError::ConfigParse(_))
    );
}

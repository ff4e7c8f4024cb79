use std::collections::BTreeMap;

use chrono::NaiveDate;
use pretty_assertions::assert_eq;

use canopy_analytics::domain::LocationContext;
use canopy_analytics::invalidate::{changed_keys, is_stale};
use canopy_analytics::params::{
    DatasetBounds, GlobalMetadata, PageContext, ParamBag, ParamValue, ResolvedParams, Resolver,
};
use canopy_analytics::query::{Predicate, Projection, QuerySpec};
use canopy_analytics::registry::Registry;
use canopy_analytics::router::{DataSource, route};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn alert_metadata() -> GlobalMetadata {
    let mut datasets = BTreeMap::new();
    datasets.insert(
        "gfw_integrated_alerts".to_string(),
        DatasetBounds {
            min_date: Some(date(2019, 1, 1)),
            max_date: Some(date(2023, 6, 30)),
            default_start: Some(date(2023, 1, 1)),
            default_end: None,
        },
    );
    datasets.insert(
        "wur_radd_alerts".to_string(),
        DatasetBounds {
            min_date: Some(date(2020, 1, 1)),
            max_date: Some(date(2023, 5, 1)),
            default_start: None,
            default_end: None,
        },
    );
    GlobalMetadata { datasets }
}

fn resolve(widget: &str, location: &str, user: &ParamBag, meta: &GlobalMetadata) -> ResolvedParams {
    let registry = Registry::builtin().unwrap();
    Resolver::resolve(
        registry.get(widget).unwrap(),
        &location.parse().unwrap(),
        user,
        meta,
        PageContext::default(),
    )
}

#[test]
fn routes_by_location_and_coverage() {
    let registry = Registry::builtin().unwrap();
    let cases = [
        ("integratedDeforestationAlerts", "country:BRA", DataSource::Precomputed),
        ("integratedDeforestationAlerts", "region:BRA.12.3", DataSource::Precomputed),
        ("integratedDeforestationAlerts", "wdpa:555@abc", DataSource::OnTheFly),
        ("integratedDeforestationAlerts", "aoi:a1@feed!saved", DataSource::OnTheFly),
        ("treeCover", "aoi:a1@feed!saved", DataSource::Precomputed),
        ("treeCover", "aoi:a1@feed", DataSource::OnTheFly),
        ("treeCover", "use:c9@beef", DataSource::OnTheFly),
        ("treeGain", "global", DataSource::Precomputed),
    ];
    for (widget, location, expected) in cases {
        let location: LocationContext = location.parse().unwrap();
        assert_eq!(
            route(registry.get(widget).unwrap(), &location),
            expected,
            "{widget} at {location}"
        );
    }
}

#[test]
fn user_values_beat_defaults_and_metadata() {
    let mut user = ParamBag::new();
    user.insert("startDate".to_string(), ParamValue::text("2022-03-01"));
    user.insert("confirmedOnly".to_string(), ParamValue::Bool(true));
    let params = resolve(
        "integratedDeforestationAlerts",
        "country:BRA",
        &user,
        &alert_metadata(),
    );
    assert_eq!(params.date("startDate"), Some(date(2022, 3, 1)));
    assert_eq!(params.date("endDate"), Some(date(2023, 6, 30)));
    assert!(params.flag("confirmedOnly"));
    assert_eq!(
        params.text("deforestationAlertsDataset"),
        Some("all")
    );
    assert!(params.ready);
}

#[test]
fn dates_are_clamped_to_the_selected_system() {
    let mut user = ParamBag::new();
    user.insert(
        "deforestationAlertsDataset".to_string(),
        ParamValue::text("radd"),
    );
    user.insert("startDate".to_string(), ParamValue::Date(date(2015, 6, 1)));
    user.insert("endDate".to_string(), ParamValue::Date(date(2030, 1, 1)));
    let params = resolve(
        "integratedDeforestationAlerts",
        "country:IDN",
        &user,
        &alert_metadata(),
    );
    assert_eq!(params.date("startDate"), Some(date(2020, 1, 1)));
    assert_eq!(params.date("endDate"), Some(date(2023, 5, 1)));
}

#[test]
fn invalid_user_values_fall_back_to_defaults() {
    let mut user = ParamBag::new();
    user.insert("threshold".to_string(), ParamValue::Int(42));
    user.insert("startYear".to_string(), ParamValue::Int(1990));
    let params = resolve("treeLossPct", "country:IDN", &user, &GlobalMetadata::default());
    assert_eq!(params.int("threshold"), Some(30));
    assert_eq!(params.int("startYear"), Some(2002));
}

#[test]
fn only_refetch_keys_invalidate() {
    let registry = Registry::builtin().unwrap();
    let keys = &registry.get("treeLossPct").unwrap().refetch_keys;
    let meta = GlobalMetadata::default();
    let base = resolve("treeLossPct", "country:IDN", &ParamBag::new(), &meta);

    let years = base.with(&[("endYear", Some(ParamValue::Int(2015)))]);
    assert!(!is_stale(Some(&base), &years, keys));

    let threshold = base.with(&[("threshold", Some(ParamValue::Int(75)))]);
    assert!(is_stale(Some(&base), &threshold, keys));
    assert_eq!(changed_keys(&base, &threshold, keys), vec!["threshold"]);

    assert!(is_stale(None, &base, keys));
}

#[test]
fn fingerprint_tracks_params() {
    let meta = GlobalMetadata::default();
    let a = resolve("treeGain", "country:BRA", &ParamBag::new(), &meta);
    let b = resolve("treeGain", "country:BRA", &ParamBag::new(), &meta);
    assert_eq!(a.fingerprint(), b.fingerprint());
    let c = a.with(&[("threshold", Some(ParamValue::Int(50)))]);
    assert_ne!(a.fingerprint(), c.fingerprint());
}

#[test]
fn text_values_are_quoted_and_escaped() {
    let sql = QuerySpec::table("gadm__tcl__iso_summary")
        .select(Projection::sum("area__ha", "value"))
        .filter(Predicate::eq("iso", "CIV' --"))
        .filter(Predicate::gte("umd_tree_cover_loss__year", 2010))
        .validate()
        .unwrap()
        .to_sql();
    assert_eq!(
        sql,
        "SELECT SUM(area__ha) AS value FROM gadm__tcl__iso_summary \
         WHERE iso = 'CIV'' --' AND umd_tree_cover_loss__year >= 2010"
    );
}

use chrono::NaiveDate;

use super::{WidgetContract, intersection, keys, scoped, sentences};
use crate::domain::{AdminLevel, AreaStatus, LocationContext, LocationType};
use crate::error::CanopyError;
use crate::normalize::{
    AnalysisData, Column, ConfidenceBreakdown, DateRange, Field, OptionBounds, Responses, Shaped,
    confidence_buckets, rows, sum,
};
use crate::params::{DateBound, MetaKey, ParamBag, ParamValue, ResolvedParams, SettingKind, SettingSpec};
use crate::plan::{ReadPlan, SubRequest};
use crate::precomputed::{AggregateScope, PrecomputedRequest};
use crate::query::{ConfidenceMode, Predicate, Projection, QuerySpec};
use crate::registry::{Coverage, DatasetRef, WidgetDescriptor, Whitelist};
use crate::router::DataSource;

const SYSTEM_KEY: &str = "deforestationAlertsDataset";
const INTEGRATED: &str = "gfw_integrated_alerts";
const SYSTEMS: [(&str, &str); 3] = [
    ("glad_l", "umd_glad_landsat_alerts"),
    ("glad_s2", "umd_glad_sentinel2_alerts"),
    ("radd", "wur_radd_alerts"),
];

// Daily alert aggregates share the integrated column names.
const DAILY_DATE: &str = "gfw_integrated_alerts__date";
const DAILY_CONFIDENCE: &str = "gfw_integrated_alerts__confidence";

const TROPICAL_ISOS: &[&str] = &[
    "AGO", "ATG", "AUS", "BDI", "BEN", "BFA", "BGD", "BHS", "BLZ", "BOL", "BRA", "BRB", "BRN",
    "BTN", "BWA", "CAF", "CIV", "CMR", "COD", "COG", "COL", "COM", "CRI", "CUB", "DMA", "DOM",
    "ECU", "ETH", "FJI", "GAB", "GHA", "GIN", "GMB", "GNB", "GNQ", "GRD", "GTM", "GUF", "GUY",
    "HND", "HTI", "IDN", "IND", "JAM", "KEN", "KHM", "LAO", "LBR", "LCA", "LKA", "MDG", "MEX",
    "MMR", "MOZ", "MWI", "MYS", "NGA", "NIC", "PAN", "PER", "PHL", "PNG", "PRI", "PRY", "RWA",
    "SEN", "SLB", "SLE", "SLV", "SUR", "TGO", "THA", "TLS", "TTO", "TZA", "UGA", "VCT", "VEN",
    "VNM", "VUT", "ZMB", "ZWE",
];

#[derive(Debug)]
pub struct IntegratedAlerts;

pub(crate) fn descriptor() -> WidgetDescriptor {
    let dated = |key: &str, bound: DateBound| {
        SettingSpec::new(
            key,
            SettingKind::Date {
                bound,
                meta: MetaKey::BySetting {
                    key: SYSTEM_KEY.to_string(),
                    map: SYSTEMS
                        .iter()
                        .map(|(system, dataset)| (system.to_string(), dataset.to_string()))
                        .collect(),
                    fallback: INTEGRATED.to_string(),
                },
            },
        )
    };

    WidgetDescriptor {
        id: "integratedDeforestationAlerts".to_string(),
        title: "Integrated deforestation alerts in {location}".to_string(),
        location_types: vec![
            LocationType::Country,
            LocationType::Region,
            LocationType::ProtectedArea,
            LocationType::UserArea,
            LocationType::UseArea,
        ],
        admin_levels: vec![AdminLevel::Adm0, AdminLevel::Adm1, AdminLevel::Adm2],
        settings: vec![
            SettingSpec::select(SYSTEM_KEY, &["all", "glad_l", "glad_s2", "radd"])
                .with_default(ParamValue::text("all")),
            SettingSpec::open_select("forestType"),
            SettingSpec::open_select("landCategory"),
            dated("startDate", DateBound::Start),
            dated("endDate", DateBound::End),
            SettingSpec::new("confirmedOnly", SettingKind::Flag)
                .with_default(ParamValue::Bool(false)),
        ],
        refetch_keys: keys(&[SYSTEM_KEY, "forestType", "landCategory", "startDate", "endDate"]),
        pending_keys: Vec::new(),
        datasets: vec![
            DatasetRef::boundary(
                "political-boundaries",
                &["disputed-political-boundaries", "political-boundaries"],
            ),
            DatasetRef::new(
                "integrated-deforestation-alerts",
                &[
                    "integrated-alerts",
                    "integrated-alerts-glad-s2",
                    "integrated-alerts-radd",
                    "integrated-alerts-glad",
                ],
            ),
        ],
        sentences: sentences(&[
            (
                "initial",
                "There were {total} deforestation alerts reported in {location} between \
                 {startDate} and {endDate}, {totalArea} of which {highConfPerc} were high \
                 confidence alerts detected by a single system and {highestConfPerc} were \
                 alerts detected by multiple systems.",
            ),
            (
                "singleSystem",
                "There were {total} {system} alerts reported in {location} between {startDate} \
                 and {endDate}, {totalArea} of which {highConfPerc} were {highConfidenceAlerts}.",
            ),
            (
                "highConf",
                "There were {total} high or highest confidence {system} alerts reported in \
                 {location} between {startDate} and {endDate}, {totalArea}.",
            ),
            (
                "noReportedAlerts",
                "There were {total} deforestation alerts reported in {location} between \
                 {startDate} and {endDate}.",
            ),
        ]),
        whitelist: Whitelist {
            adm0: Some(TROPICAL_ISOS.iter().map(|iso| iso.to_string()).collect()),
        },
        live_types: vec![LocationType::ProtectedArea, LocationType::UseArea],
        precomputed: vec![
            Coverage::new(LocationType::Country, &[]),
            Coverage::new(LocationType::Region, &[]),
        ],
        contract: &IntegratedAlerts,
    }
}

fn system_table(system: &str) -> &'static str {
    SYSTEMS
        .iter()
        .find(|(name, _)| *name == system)
        .map(|(_, table)| *table)
        .unwrap_or(INTEGRATED)
}

fn date_filters(field: &str, params: &ResolvedParams) -> Vec<Predicate> {
    let start = params.date("startDate").map(|date| Predicate::gte(field, date));
    let end = params.date("endDate").map(|date| Predicate::lte(field, date));
    start.into_iter().chain(end).collect()
}

fn columns() -> Vec<Column> {
    vec![
        Column::text("confidence"),
        Column::count("alert__count"),
        Column::hectares("alert_area__ha"),
    ]
}

fn daily_alerts(table: String, params: &ResolvedParams) -> QuerySpec {
    QuerySpec::table(&table)
        .select(Projection::aliased(DAILY_CONFIDENCE, "confidence"))
        .select(Projection::sum("alert__count", "alert__count"))
        .select(Projection::sum("alert_area__ha", "alert_area__ha"))
        .filter_all(date_filters(DAILY_DATE, params))
        .group_by([DAILY_CONFIDENCE])
}

impl WidgetContract for IntegratedAlerts {
    fn plan(&self, params: &ResolvedParams, source: DataSource) -> Result<ReadPlan, CanopyError> {
        let system = params.text(SYSTEM_KEY).unwrap_or("all");
        let family = if system == "glad_l" {
            "glad"
        } else {
            "integrated_alerts"
        };
        let intersections: Vec<Predicate> = ["forestType", "landCategory"]
            .iter()
            .filter_map(|key| intersection(params, key))
            .collect();

        match source {
            DataSource::Precomputed => {
                let scope = AggregateScope::for_location(&params.location);
                let spec = daily_alerts(scope.table(family, "daily_alerts"), params)
                    .filter_all(intersections);
                let mut request = PrecomputedRequest::new(spec.table.clone(), scope);
                request.projection = spec.projection;
                request.filters = spec.predicates;
                request.group_by = spec.group_by;
                Ok(ReadPlan::Precomputed(vec![SubRequest::new(
                    "alerts", request, columns(),
                )]))
            }
            DataSource::OnTheFly => {
                let spec = match &params.location {
                    LocationContext::UserArea {
                        geostore,
                        status: AreaStatus::Saved,
                        ..
                    } => daily_alerts(format!("geostore__{family}__daily_alerts"), params)
                        .filter(Predicate::eq("geostore__id", geostore.as_str())),
                    _ => {
                        let table = system_table(system);
                        let confidence = format!("{table}__confidence");
                        QuerySpec::table(table)
                            .select(Projection::aliased(&confidence, "confidence"))
                            .select(Projection::count("alert__count"))
                            .select(Projection::sum("area__ha", "alert_area__ha"))
                            .filter_all(date_filters(&format!("{table}__date"), params))
                            .group_by([confidence.as_str()])
                    }
                };
                let spec = scoped(&params.location, spec.filter_all(intersections));
                Ok(ReadPlan::OnTheFly(vec![SubRequest::new(
                    "alerts", spec, columns(),
                )]))
            }
        }
    }

    fn shape(&self, params: &ResolvedParams, responses: &Responses) -> Result<Shaped, CanopyError> {
        let alerts = rows(responses, "alerts");
        let mode = if params.flag("confirmedOnly") {
            ConfidenceMode::ConfirmedOnly
        } else {
            ConfidenceMode::All
        };
        let breakdown =
            ConfidenceBreakdown::new(confidence_buckets(alerts, "confidence", "alert__count"), mode);

        let mut data = AnalysisData::default();
        data.totals
            .insert("sum".to_string(), Field::Count(breakdown.total));
        data.totals.insert(
            "totalArea".to_string(),
            Field::Hectares(sum(alerts, "alert_area__ha")),
        );
        data.totals
            .insert("highCount".to_string(), Field::Count(breakdown.buckets.high));
        data.totals.insert(
            "highestCount".to_string(),
            Field::Count(breakdown.buckets.highest),
        );
        data.totals.insert(
            "nominalCount".to_string(),
            Field::Count(breakdown.buckets.nominal),
        );
        data.confidence = Some(breakdown);
        data.series.insert("allAlerts".to_string(), alerts.to_vec());
        data.served_range = match (params.date("startDate"), params.date("endDate")) {
            (Some(start), Some(end)) => Some(DateRange { start, end }),
            _ => None,
        };

        Ok(Shaped {
            data,
            settings: ParamBag::new(),
            options: OptionBounds {
                min_date: NaiveDate::from_ymd_opt(2015, 1, 1),
                max_date: params
                    .bounds("endDate")
                    .and_then(|bounds| bounds.default_end.or(bounds.max_date))
                    .or(params.date("endDate")),
                years: Vec::new(),
            },
        })
    }
}

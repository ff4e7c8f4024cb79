use super::{Aggregate, WidgetContract, build_plan, intersection, keys, required_int, sentences, threshold_setting};
use crate::domain::{AdminLevel, LocationType};
use crate::error::CanopyError;
use crate::normalize::{
    AnalysisData, Column, Field, OptionBounds, Responses, Shaped, first, rows, sum,
};
use crate::params::{ParamBag, ParamValue, ResolvedParams, SettingKind, SettingSpec};
use crate::plan::ReadPlan;
use crate::query::{Literal, Predicate, Projection};
use crate::registry::{Coverage, DatasetRef, WidgetDescriptor, Whitelist};
use crate::router::DataSource;

/// Extent year served by the tropical tree cover dataset, which is
/// filtered by decile rather than canopy threshold.
const TROPICAL_YEAR: i64 = 2020;

#[derive(Debug)]
pub struct TreeCover;

pub(crate) fn descriptor() -> WidgetDescriptor {
    let deciles = (0..=9).map(|decile| ParamValue::Int(decile * 10)).collect();

    WidgetDescriptor {
        id: "treeCover".to_string(),
        title: "Tree cover by type in {location}".to_string(),
        location_types: vec![
            LocationType::Global,
            LocationType::Country,
            LocationType::Region,
            LocationType::ProtectedArea,
            LocationType::UserArea,
            LocationType::UseArea,
        ],
        admin_levels: vec![
            AdminLevel::Global,
            AdminLevel::Adm0,
            AdminLevel::Adm1,
            AdminLevel::Adm2,
        ],
        settings: vec![
            SettingSpec::new(
                "extentYear",
                SettingKind::Select {
                    options: Some(vec![
                        ParamValue::Int(2000),
                        ParamValue::Int(2010),
                        ParamValue::Int(TROPICAL_YEAR),
                    ]),
                },
            )
            .with_default(ParamValue::Int(2000)),
            SettingSpec::open_select("landCategory"),
            threshold_setting(),
            SettingSpec::new(
                "decile",
                SettingKind::Select {
                    options: Some(deciles),
                },
            )
            .with_default(ParamValue::Int(30)),
        ],
        refetch_keys: keys(&["threshold", "decile", "extentYear", "landCategory"]),
        pending_keys: keys(&["threshold", "decile", "extentYear"]),
        datasets: vec![
            DatasetRef::boundary(
                "political-boundaries",
                &["disputed-political-boundaries", "political-boundaries"],
            ),
            DatasetRef::new("tree-cover", &["tree-cover-2000", "tree-cover-2010"]),
            DatasetRef::new("tropical-tree-cover", &["tropical-tree-cover-2020"]),
        ],
        sentences: sentences(&[
            (
                "globalInitial",
                "As of {year}, {percentage} of {location} land cover was {threshold} tree cover.",
            ),
            (
                "initial",
                "As of {year}, {percentage} of {location} was {threshold} tree cover.",
            ),
            ("hasPlantations", " was natural forest cover."),
            ("noPlantations", " was tree cover."),
        ]),
        whitelist: Whitelist::default(),
        live_types: vec![LocationType::UseArea],
        precomputed: vec![
            Coverage::new(LocationType::Global, &[]),
            Coverage::new(LocationType::Country, &[]),
            Coverage::new(LocationType::Region, &[]),
            Coverage::new(LocationType::ProtectedArea, &[]),
            Coverage::new(LocationType::UserArea, &[]),
        ],
        contract: &TreeCover,
    }
}

fn extent(
    params: &ResolvedParams,
    with_land: bool,
    plantations: bool,
) -> Result<Aggregate, CanopyError> {
    let year = required_int(params, "extentYear")?;
    let read = if year == TROPICAL_YEAR {
        let decile = required_int(params, "decile")?;
        Aggregate::new("tropical_tree_cover", "summary", "wri_tropical_tree_cover")
            .select(
                Projection::sum("wri_tropical_tree_cover_extent__ha", "extent"),
                Column::hectares("extent"),
            )
            .filter(Predicate::gte("wri_tropical_tree_cover__decile", decile))
    } else {
        let threshold = required_int(params, "threshold")?;
        Aggregate::new("tcl", "summary", &format!("umd_tree_cover_density_{year}"))
            .select(
                Projection::sum(&format!("umd_tree_cover_extent_{year}__ha"), "extent"),
                Column::hectares("extent"),
            )
            .filter(Predicate::eq(
                &format!("umd_tree_cover_density_{year}__threshold"),
                threshold,
            ))
    };
    Ok(read
        .select(
            Projection::sum("area__ha", "total_area"),
            Column::hectares("total_area"),
        )
        .filter_opt(with_land.then(|| intersection(params, "landCategory")).flatten())
        .filter_opt(
            plantations.then(|| Predicate::eq("is__gfw_plantations", Literal::Bool(true))),
        ))
}

fn area() -> Aggregate {
    Aggregate::new("tcl", "summary", "umd_tree_cover_density_2000")
        .select(Projection::sum("area__ha", "area__ha"), Column::hectares("area__ha"))
}

impl WidgetContract for TreeCover {
    fn plan(&self, params: &ResolvedParams, source: DataSource) -> Result<ReadPlan, CanopyError> {
        let reads = match source {
            DataSource::Precomputed => vec![
                ("extent", extent(params, true, false)?),
                ("adminExtent", extent(params, false, false)?),
                ("plantations", extent(params, true, true)?),
            ],
            DataSource::OnTheFly => vec![
                ("areaHa", area()),
                ("extent", extent(params, true, false)?),
            ],
        };
        Ok(build_plan(params, source, reads))
    }

    fn shape(&self, _params: &ResolvedParams, responses: &Responses) -> Result<Shaped, CanopyError> {
        let extent = rows(responses, "extent");
        let (total_area, total_cover, cover, plantations) = if responses.contains_key("areaHa") {
            let cover = first(extent, "extent");
            (first(rows(responses, "areaHa"), "area__ha"), cover, cover, 0.0)
        } else {
            let admin = rows(responses, "adminExtent");
            (
                sum(admin, "total_area"),
                sum(admin, "extent"),
                sum(extent, "extent"),
                sum(rows(responses, "plantations"), "extent"),
            )
        };

        let mut data = AnalysisData::default();
        for (key, value) in [
            ("totalArea", total_area),
            ("totalCover", total_cover),
            ("cover", cover),
            ("plantations", plantations),
        ] {
            data.totals.insert(key.to_string(), Field::Hectares(value));
        }
        Ok(Shaped {
            data,
            settings: ParamBag::new(),
            options: OptionBounds::default(),
        })
    }

    fn download_plan(
        &self,
        params: &ResolvedParams,
        source: DataSource,
    ) -> Result<ReadPlan, CanopyError> {
        if source == DataSource::OnTheFly {
            return self.plan(params, source);
        }
        let mut reads = vec![
            ("adminExtent", extent(params, false, false)?),
            ("plantations", extent(params, true, true)?),
        ];
        if intersection(params, "landCategory").is_some() {
            reads.push(("extent", extent(params, true, false)?));
        }
        Ok(build_plan(params, source, reads))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::normalize::TypedRow;
    use crate::params::{GlobalMetadata, PageContext, Resolver};

    fn params(location: &str, user: ParamBag) -> ResolvedParams {
        Resolver::resolve(
            &descriptor(),
            &location.parse().unwrap(),
            &user,
            &GlobalMetadata::default(),
            PageContext::default(),
        )
    }

    fn extent_row(extent: f64, total: f64) -> TypedRow {
        let mut row = BTreeMap::new();
        row.insert("extent".to_string(), Field::Hectares(extent));
        row.insert("total_area".to_string(), Field::Hectares(total));
        row
    }

    #[test]
    fn tropical_year_filters_by_decile() {
        let mut user = ParamBag::new();
        user.insert("extentYear".to_string(), ParamValue::Int(2020));
        let ReadPlan::Precomputed(requests) = TreeCover
            .plan(&params("country:COD", user), DataSource::Precomputed)
            .unwrap()
        else {
            panic!("expected precomputed plan");
        };
        assert_eq!(
            requests[0].target.dataset,
            "gadm__tropical_tree_cover__iso_summary"
        );
        assert_eq!(
            requests[0].target.filters[0].field,
            "wri_tropical_tree_cover__decile"
        );
    }

    #[test]
    fn use_areas_are_computed_live() {
        let plan = TreeCover
            .plan(&params("use:c9@beef", ParamBag::new()), DataSource::OnTheFly)
            .unwrap();
        assert_eq!(plan.names(), vec!["areaHa", "extent"]);
    }

    #[test]
    fn live_downloads_export_the_live_reads() {
        let params = params("aoi:a1@feed", ParamBag::new());
        let live = TreeCover.plan(&params, DataSource::OnTheFly).unwrap();
        let download = TreeCover
            .download_plan(&params, DataSource::OnTheFly)
            .unwrap();
        assert_eq!(download.names(), vec!["areaHa", "extent"]);
        assert_eq!(download, live);
    }

    #[test]
    fn shape_sums_precomputed_extents() {
        let mut responses = Responses::new();
        responses.insert("extent".to_string(), vec![extent_row(40.0, 100.0)]);
        responses.insert(
            "adminExtent".to_string(),
            vec![extent_row(50.0, 100.0), extent_row(10.0, 20.0)],
        );
        responses.insert("plantations".to_string(), vec![extent_row(5.0, 100.0)]);
        let shaped = TreeCover
            .shape(&params("country:COD", ParamBag::new()), &responses)
            .unwrap();
        assert_eq!(shaped.data.total("totalArea"), Some(&Field::Hectares(120.0)));
        assert_eq!(shaped.data.total("totalCover"), Some(&Field::Hectares(60.0)));
        assert_eq!(shaped.data.total("cover"), Some(&Field::Hectares(40.0)));
        assert_eq!(shaped.data.total("plantations"), Some(&Field::Hectares(5.0)));
    }

    #[test]
    fn download_orders_admin_then_plantations() {
        let plan = TreeCover
            .download_plan(&params("country:COD", ParamBag::new()), DataSource::Precomputed)
            .unwrap();
        assert_eq!(plan.names(), vec!["adminExtent", "plantations"]);
    }
}

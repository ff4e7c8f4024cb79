use super::{Aggregate, WidgetContract, build_plan, intersection, keys, required_int, sentences, threshold_setting};
use crate::domain::{AdminLevel, LocationType};
use crate::error::CanopyError;
use crate::normalize::{AnalysisData, Column, Field, OptionBounds, Responses, Shaped, first, rows};
use crate::params::{ParamBag, ParamValue, ResolvedParams, SettingKind, SettingSpec};
use crate::plan::ReadPlan;
use crate::query::{Predicate, Projection};
use crate::registry::{Coverage, DatasetRef, WidgetDescriptor, Whitelist};
use crate::router::DataSource;

const MIN_YEAR: i64 = 2002;
const MAX_YEAR: i64 = 2021;

#[derive(Debug)]
pub struct TreeLossPrimary;

pub(crate) fn descriptor() -> WidgetDescriptor {
    let year = |key: &str, default: i64| {
        SettingSpec::new(
            key,
            SettingKind::Integer {
                min: MIN_YEAR,
                max: MAX_YEAR,
            },
        )
        .with_default(ParamValue::Int(default))
    };

    WidgetDescriptor {
        id: "treeLossPct".to_string(),
        title: "Primary forest loss in {location}".to_string(),
        location_types: vec![
            LocationType::Global,
            LocationType::Country,
            LocationType::Region,
            LocationType::ProtectedArea,
            LocationType::UserArea,
        ],
        admin_levels: vec![
            AdminLevel::Global,
            AdminLevel::Adm0,
            AdminLevel::Adm1,
            AdminLevel::Adm2,
        ],
        settings: vec![
            SettingSpec::open_select("landCategory"),
            year("startYear", MIN_YEAR),
            year("endYear", MAX_YEAR),
            threshold_setting(),
            SettingSpec::select("forestType", &["primary_forest"])
                .with_default(ParamValue::text("primary_forest")),
            SettingSpec::new(
                "extentYear",
                SettingKind::Select {
                    options: Some(vec![ParamValue::Int(2000), ParamValue::Int(2010)]),
                },
            )
            .with_default(ParamValue::Int(2000)),
        ],
        refetch_keys: keys(&["landCategory", "threshold"]),
        pending_keys: keys(&["threshold", "startYear", "endYear"]),
        datasets: vec![
            DatasetRef::boundary(
                "political-boundaries",
                &["disputed-political-boundaries", "political-boundaries"],
            ),
            DatasetRef::new("primary-forests", &["primary-forests-2001"]),
            DatasetRef::new("tree-cover-loss", &["tree-cover-loss"]),
        ],
        sentences: sentences(&[
            (
                "initial",
                "From {startYear} to {endYear}, {location} lost {loss} of humid primary \
                 forest, making up {percent} of its total tree cover loss in the same time \
                 period. Total area of humid primary forest in {location} decreased by \
                 {percentageLoss} in this time period.",
            ),
            (
                "withIndicator",
                "From {startYear} to {endYear}, {location} lost {loss} of humid primary \
                 forest in {indicator}, making up {percent} of its total tree cover loss in \
                 the same time period.",
            ),
            (
                "noLoss",
                "From {startYear} to {endYear}, {location} lost {loss} of humid primary forest.",
            ),
        ]),
        whitelist: Whitelist::default(),
        live_types: Vec::new(),
        precomputed: vec![
            Coverage::new(LocationType::Global, &[]),
            Coverage::new(LocationType::Country, &[]),
            Coverage::new(LocationType::Region, &[]),
            Coverage::new(LocationType::ProtectedArea, &[]),
            Coverage::new(LocationType::UserArea, &[]),
        ],
        contract: &TreeLossPrimary,
    }
}

fn loss(
    params: &ResolvedParams,
    with_forest: bool,
    with_land: bool,
) -> Result<Aggregate, CanopyError> {
    let threshold = required_int(params, "threshold")?;
    Ok(Aggregate::new("tcl", "change", "umd_tree_cover_loss")
        .group_by("umd_tree_cover_loss__year", Column::count("umd_tree_cover_loss__year"))
        .select(
            Projection::sum("umd_tree_cover_loss__ha", "umd_tree_cover_loss__ha"),
            Column::hectares("umd_tree_cover_loss__ha"),
        )
        .select(
            Projection::sum("gfw_gross_emissions_co2e_all_gases__Mg", "emissions"),
            Column::number("emissions"),
        )
        .filter(Predicate::eq("umd_tree_cover_density_2000__threshold", threshold))
        .filter_opt(with_forest.then(|| intersection(params, "forestType")).flatten())
        .filter_opt(with_land.then(|| intersection(params, "landCategory")).flatten()))
}

fn extent(params: &ResolvedParams) -> Result<Aggregate, CanopyError> {
    let threshold = required_int(params, "threshold")?;
    Ok(Aggregate::new("tcl", "summary", "umd_tree_cover_density_2000")
        .select(
            Projection::sum("umd_tree_cover_extent_2000__ha", "extent"),
            Column::hectares("extent"),
        )
        .select(
            Projection::sum("area__ha", "total_area"),
            Column::hectares("total_area"),
        )
        .filter(Predicate::eq("umd_tree_cover_density_2000__threshold", threshold))
        .filter_opt(intersection(params, "forestType"))
        .filter_opt(intersection(params, "landCategory")))
}

impl WidgetContract for TreeLossPrimary {
    fn plan(&self, params: &ResolvedParams, source: DataSource) -> Result<ReadPlan, CanopyError> {
        Ok(build_plan(
            params,
            source,
            vec![
                ("adminLoss", loss(params, false, false)?),
                ("primaryLoss", loss(params, true, true)?),
                ("extent", extent(params)?),
                ("loss", loss(params, false, true)?),
            ],
        ))
    }

    fn shape(&self, params: &ResolvedParams, responses: &Responses) -> Result<Shaped, CanopyError> {
        let mut data = AnalysisData::default();
        for name in ["adminLoss", "primaryLoss", "extent", "loss"] {
            data.series
                .insert(name.to_string(), rows(responses, name).to_vec());
        }
        let extent = rows(responses, "extent");
        data.totals
            .insert("extent".to_string(), Field::Hectares(first(extent, "extent")));
        data.totals.insert(
            "totalArea".to_string(),
            Field::Hectares(first(extent, "total_area")),
        );

        let mut settings = ParamBag::new();
        settings.insert(
            "startYear".to_string(),
            ParamValue::Int(params.int("startYear").unwrap_or(MIN_YEAR)),
        );
        settings.insert(
            "endYear".to_string(),
            ParamValue::Int(params.int("endYear").unwrap_or(MAX_YEAR)),
        );
        settings.insert(
            "yearsRange".to_string(),
            ParamValue::Text(format!("{MIN_YEAR}-{MAX_YEAR}")),
        );

        Ok(Shaped {
            data,
            settings,
            options: OptionBounds {
                years: (MIN_YEAR..=MAX_YEAR).collect(),
                ..OptionBounds::default()
            },
        })
    }

    fn download_plan(
        &self,
        params: &ResolvedParams,
        source: DataSource,
    ) -> Result<ReadPlan, CanopyError> {
        let mut reads = vec![
            ("adminLoss", loss(params, false, false)?),
            ("primaryLoss", loss(params, true, true)?),
            ("extent", extent(params)?),
        ];
        if intersection(params, "landCategory").is_some() {
            reads.push(("loss", loss(params, false, true)?));
        }
        Ok(build_plan(params, source, reads))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{GlobalMetadata, PageContext, Resolver};

    fn params(user: ParamBag) -> ResolvedParams {
        Resolver::resolve(
            &descriptor(),
            &"country:IDN".parse().unwrap(),
            &user,
            &GlobalMetadata::default(),
            PageContext::default(),
        )
    }

    #[test]
    fn four_reads_with_distinct_filters() {
        let plan = TreeLossPrimary
            .plan(&params(ParamBag::new()), DataSource::Precomputed)
            .unwrap();
        assert_eq!(plan.names(), vec!["adminLoss", "primaryLoss", "extent", "loss"]);
        let ReadPlan::Precomputed(requests) = plan else {
            panic!("expected precomputed plan");
        };
        assert_eq!(requests[0].target.dataset, "gadm__tcl__iso_change");
        assert_eq!(requests[0].target.filters.len(), 1);
        assert!(
            requests[1]
                .target
                .filters
                .iter()
                .any(|p| p.field == "is__umd_regional_primary_forest_2001")
        );
        assert_eq!(requests[2].target.dataset, "gadm__tcl__iso_summary");
    }

    #[test]
    fn download_adds_land_category_loss_only_when_set() {
        let plain = TreeLossPrimary
            .download_plan(&params(ParamBag::new()), DataSource::Precomputed)
            .unwrap();
        assert_eq!(plain.len(), 3);

        let mut user = ParamBag::new();
        user.insert("landCategory".to_string(), ParamValue::text("mining"));
        let filtered = TreeLossPrimary
            .download_plan(&params(user), DataSource::Precomputed)
            .unwrap();
        assert_eq!(filtered.len(), 4);
    }

    #[test]
    fn shape_echoes_year_range() {
        let shaped = TreeLossPrimary
            .shape(&params(ParamBag::new()), &Responses::new())
            .unwrap();
        assert_eq!(shaped.options.years.len(), 20);
        assert_eq!(
            shaped.settings.get("yearsRange"),
            Some(&ParamValue::text("2002-2021"))
        );
        assert_eq!(shaped.data.total("extent"), Some(&Field::Hectares(0.0)));
    }
}

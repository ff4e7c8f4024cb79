use super::{Aggregate, WidgetContract, build_plan, keys, required_int, sentences, threshold_setting};
use crate::domain::{AdminLevel, LocationType};
use crate::error::CanopyError;
use crate::normalize::{AnalysisData, Column, Field, OptionBounds, Responses, Shaped, first, rows};
use crate::params::{ParamBag, ResolvedParams};
use crate::plan::ReadPlan;
use crate::query::{Predicate, Projection};
use crate::registry::{Coverage, DatasetRef, WidgetDescriptor, Whitelist};
use crate::router::DataSource;

#[derive(Debug)]
pub struct TreeGain;

pub(crate) fn descriptor() -> WidgetDescriptor {
    WidgetDescriptor {
        id: "treeGain".to_string(),
        title: "Tree cover gain in {location}".to_string(),
        location_types: vec![
            LocationType::Global,
            LocationType::Country,
            LocationType::Region,
        ],
        admin_levels: vec![
            AdminLevel::Global,
            AdminLevel::Adm0,
            AdminLevel::Adm1,
            AdminLevel::Adm2,
        ],
        settings: vec![threshold_setting()],
        refetch_keys: keys(&["threshold"]),
        pending_keys: keys(&["threshold"]),
        datasets: vec![DatasetRef::new("tree-cover-gain", &["tree-cover-gain"])],
        sentences: sentences(&[(
            "initial",
            "From 2001 to 2012, {location} gained {gain} of tree cover, equal to {percentage} \
             of its {extent} tree cover extent in 2000.",
        )]),
        whitelist: Whitelist::default(),
        live_types: Vec::new(),
        precomputed: vec![
            Coverage::new(LocationType::Global, &[]),
            Coverage::new(LocationType::Country, &[]),
            Coverage::new(LocationType::Region, &[]),
        ],
        contract: &TreeGain,
    }
}

fn summary(params: &ResolvedParams, otf_table: &str, column: &str) -> Result<Aggregate, CanopyError> {
    let threshold = required_int(params, "threshold")?;
    Ok(Aggregate::new("tcl", "summary", otf_table)
        .select(Projection::sum(column, "value"), Column::hectares("value"))
        .filter(Predicate::eq("umd_tree_cover_density_2000__threshold", threshold)))
}

impl WidgetContract for TreeGain {
    fn plan(&self, params: &ResolvedParams, source: DataSource) -> Result<ReadPlan, CanopyError> {
        Ok(build_plan(
            params,
            source,
            vec![
                (
                    "gain",
                    summary(params, "umd_tree_cover_gain", "umd_tree_cover_gain__ha")?,
                ),
                (
                    "extent",
                    summary(
                        params,
                        "umd_tree_cover_density_2000",
                        "umd_tree_cover_extent_2000__ha",
                    )?,
                ),
            ],
        ))
    }

    fn shape(&self, _params: &ResolvedParams, responses: &Responses) -> Result<Shaped, CanopyError> {
        let mut data = AnalysisData::default();
        for name in ["gain", "extent"] {
            data.totals.insert(
                name.to_string(),
                Field::Hectares(first(rows(responses, name), "value")),
            );
        }
        Ok(Shaped {
            data,
            settings: ParamBag::new(),
            options: OptionBounds::default(),
        })
    }
}

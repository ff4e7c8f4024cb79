use std::fmt;

use serde::Serialize;

use crate::domain::{AreaStatus, LocationContext};
use crate::registry::WidgetDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DataSource {
    Precomputed,
    OnTheFly,
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSource::Precomputed => write!(f, "precomputed"),
            DataSource::OnTheFly => write!(f, "onTheFly"),
        }
    }
}

pub fn route(descriptor: &WidgetDescriptor, location: &LocationContext) -> DataSource {
    let live = match location {
        LocationContext::UserArea {
            status: AreaStatus::Draft,
            ..
        } => true,
        LocationContext::Global
        | LocationContext::Country(_)
        | LocationContext::Region(_)
        | LocationContext::ProtectedArea { .. }
        | LocationContext::UserArea { .. }
        | LocationContext::UseArea { .. } => {
            descriptor.live_types.contains(&location.location_type())
        }
    };
    if live {
        return DataSource::OnTheFly;
    }
    if descriptor.has_aggregate(location) {
        DataSource::Precomputed
    } else {
        DataSource::OnTheFly
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;

    const ALL_WIDGETS: [&str; 4] = [
        "integratedDeforestationAlerts",
        "treeLossPct",
        "treeCover",
        "treeGain",
    ];

    #[test]
    fn draft_user_area_is_always_live() {
        let registry = Registry::builtin().unwrap();
        let draft: LocationContext = "aoi:abc@f00d".parse().unwrap();
        for id in ALL_WIDGETS {
            let widget = registry.get(id).unwrap();
            assert_eq!(route(widget, &draft), DataSource::OnTheFly, "{id}");
        }
    }

    #[test]
    fn country_and_global_with_aggregate_use_tables() {
        let registry = Registry::builtin().unwrap();
        let country: LocationContext = "country:BRA".parse().unwrap();
        for id in ALL_WIDGETS {
            let widget = registry.get(id).unwrap();
            if widget.has_aggregate(&country) {
                assert_eq!(route(widget, &country), DataSource::Precomputed, "{id}");
            }
            if widget.has_aggregate(&LocationContext::Global) {
                assert_eq!(
                    route(widget, &LocationContext::Global),
                    DataSource::Precomputed,
                    "{id}"
                );
            }
        }
    }

    #[test]
    fn protected_area_cover_is_live_for_alerts() {
        let registry = Registry::builtin().unwrap();
        let widget = registry.get("integratedDeforestationAlerts").unwrap();
        let wdpa: LocationContext = "wdpa:148322@cafe".parse().unwrap();
        assert_eq!(route(widget, &wdpa), DataSource::OnTheFly);
    }

    #[test]
    fn saved_user_area_uses_geostore_aggregate() {
        let registry = Registry::builtin().unwrap();
        let widget = registry.get("treeLossPct").unwrap();
        let saved: LocationContext = "aoi:abc@f00d!saved".parse().unwrap();
        assert_eq!(route(widget, &saved), DataSource::Precomputed);
    }
}

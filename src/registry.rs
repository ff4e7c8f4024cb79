use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::domain::{AdminLevel, LocationContext, LocationType};
use crate::error::CanopyError;
use crate::params::SettingSpec;
use crate::widgets::{self, WidgetContract};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetRef {
    pub dataset: String,
    pub layers: Vec<String>,
    pub boundary: bool,
}

impl DatasetRef {
    pub fn new(dataset: &str, layers: &[&str]) -> Self {
        Self {
            dataset: dataset.to_string(),
            layers: layers.iter().map(|layer| layer.to_string()).collect(),
            boundary: false,
        }
    }

    pub fn boundary(dataset: &str, layers: &[&str]) -> Self {
        Self {
            boundary: true,
            ..Self::new(dataset, layers)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Whitelist {
    /// Country ISOs the widget is shown for; `None` means all.
    pub adm0: Option<BTreeSet<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Coverage {
    pub location_type: LocationType,
    /// Empty means every depth.
    pub levels: Vec<AdminLevel>,
}

impl Coverage {
    pub fn new(location_type: LocationType, levels: &[AdminLevel]) -> Self {
        Self {
            location_type,
            levels: levels.to_vec(),
        }
    }

    fn covers(&self, location: &LocationContext) -> bool {
        if self.location_type != location.location_type() {
            return false;
        }
        match location.admin_level() {
            Some(level) => self.levels.is_empty() || self.levels.contains(&level),
            None => true,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WidgetDescriptor {
    pub id: String,
    pub title: String,
    pub location_types: Vec<LocationType>,
    pub admin_levels: Vec<AdminLevel>,
    pub settings: Vec<SettingSpec>,
    pub refetch_keys: Vec<String>,
    pub pending_keys: Vec<String>,
    pub datasets: Vec<DatasetRef>,
    pub sentences: BTreeMap<String, String>,
    pub whitelist: Whitelist,
    pub live_types: Vec<LocationType>,
    pub precomputed: Vec<Coverage>,
    #[serde(skip)]
    pub contract: &'static dyn WidgetContract,
}

impl WidgetDescriptor {
    pub fn setting(&self, key: &str) -> Option<&SettingSpec> {
        self.settings.iter().find(|spec| spec.key == key)
    }

    pub fn is_refetch_key(&self, key: &str) -> bool {
        self.refetch_keys.iter().any(|candidate| candidate == key)
    }

    pub fn has_aggregate(&self, location: &LocationContext) -> bool {
        self.precomputed
            .iter()
            .any(|coverage| coverage.covers(location))
    }

    pub fn supports(&self, location: &LocationContext) -> Result<(), CanopyError> {
        let unsupported = || CanopyError::UnsupportedLocation {
            widget: self.id.clone(),
            location: location.to_string(),
        };
        if !self.location_types.contains(&location.location_type()) {
            return Err(unsupported());
        }
        if let Some(level) = location.admin_level() {
            if !self.admin_levels.contains(&level) {
                return Err(unsupported());
            }
        }
        if let (Some(allowed), Some(path)) = (&self.whitelist.adm0, location.admin_path()) {
            if !allowed.contains(&path.iso) {
                return Err(unsupported());
            }
        }
        Ok(())
    }

    fn check(&self) -> Result<(), CanopyError> {
        let invalid = |message: String| CanopyError::InvalidDescriptor {
            widget: self.id.clone(),
            message,
        };
        for key in &self.pending_keys {
            if self.setting(key).is_none() {
                return Err(invalid(format!("pending key {key} is not a setting")));
            }
        }
        for key in &self.refetch_keys {
            if self.setting(key).is_none() {
                return Err(invalid(format!("refetch key {key} is not a setting")));
            }
        }
        let mut seen = BTreeSet::new();
        for spec in &self.settings {
            if !seen.insert(spec.key.as_str()) {
                return Err(invalid(format!("duplicate setting {}", spec.key)));
            }
        }
        if self.location_types.is_empty() {
            return Err(invalid("no supported location types".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct Registry {
    widgets: Vec<WidgetDescriptor>,
}

impl Registry {
    pub fn new(widgets: Vec<WidgetDescriptor>) -> Result<Self, CanopyError> {
        let mut ids = BTreeSet::new();
        for widget in &widgets {
            widget.check()?;
            if !ids.insert(widget.id.clone()) {
                return Err(CanopyError::InvalidDescriptor {
                    widget: widget.id.clone(),
                    message: "duplicate widget id".to_string(),
                });
            }
        }
        Ok(Self { widgets })
    }

    pub fn builtin() -> Result<Self, CanopyError> {
        Self::new(widgets::builtin())
    }

    pub fn get(&self, id: &str) -> Result<&WidgetDescriptor, CanopyError> {
        self.widgets
            .iter()
            .find(|widget| widget.id == id)
            .ok_or_else(|| CanopyError::UnknownWidget(id.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &WidgetDescriptor> {
        self.widgets.iter()
    }

    pub fn eligible<'a>(
        &'a self,
        location: &'a LocationContext,
    ) -> impl Iterator<Item = &'a WidgetDescriptor> + 'a {
        self.widgets
            .iter()
            .filter(move |widget| widget.supports(location).is_ok())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn builtin_registry_is_valid() {
        let registry = Registry::builtin().unwrap();
        assert!(registry.get("integratedDeforestationAlerts").is_ok());
        assert!(registry.get("treeLossPct").is_ok());
        assert!(registry.get("treeCover").is_ok());
        assert!(registry.get("treeGain").is_ok());
        assert_matches!(
            registry.get("nope"),
            Err(CanopyError::UnknownWidget(_))
        );
    }

    #[test]
    fn pending_keys_are_settings() {
        let registry = Registry::builtin().unwrap();
        for widget in registry.iter() {
            for key in &widget.pending_keys {
                assert!(widget.setting(key).is_some(), "{} {}", widget.id, key);
            }
        }
    }

    #[test]
    fn whitelist_limits_countries() {
        let registry = Registry::builtin().unwrap();
        let alerts = registry.get("integratedDeforestationAlerts").unwrap();
        assert!(alerts.supports(&"country:BRA".parse().unwrap()).is_ok());
        assert_matches!(
            alerts.supports(&"country:FRA".parse().unwrap()),
            Err(CanopyError::UnsupportedLocation { .. })
        );
    }

    #[test]
    fn rejects_undeclared_pending_key() {
        let mut widgets = crate::widgets::builtin();
        widgets[0].pending_keys.push("doesNotExist".to_string());
        assert_matches!(
            Registry::new(widgets),
            Err(CanopyError::InvalidDescriptor { .. })
        );
    }
}

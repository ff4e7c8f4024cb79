use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::CanopyError;

static ISO_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]{3}$").expect("iso pattern compiles"));
static GEOSTORE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("geostore pattern compiles"));

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum LocationType {
    Global,
    Country,
    Region,
    #[serde(rename = "wdpa")]
    #[value(name = "wdpa")]
    ProtectedArea,
    #[serde(rename = "aoi")]
    #[value(name = "aoi")]
    UserArea,
    #[serde(rename = "use")]
    #[value(name = "use")]
    UseArea,
}

impl fmt::Display for LocationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocationType::Global => write!(f, "global"),
            LocationType::Country => write!(f, "country"),
            LocationType::Region => write!(f, "region"),
            LocationType::ProtectedArea => write!(f, "wdpa"),
            LocationType::UserArea => write!(f, "aoi"),
            LocationType::UseArea => write!(f, "use"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdminLevel {
    Global,
    Adm0,
    Adm1,
    Adm2,
}

impl fmt::Display for AdminLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdminLevel::Global => write!(f, "global"),
            AdminLevel::Adm0 => write!(f, "adm0"),
            AdminLevel::Adm1 => write!(f, "adm1"),
            AdminLevel::Adm2 => write!(f, "adm2"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AdminPath {
    pub iso: String,
    pub adm1: Option<u32>,
    pub adm2: Option<u32>,
}

impl AdminPath {
    pub fn country(iso: &str) -> Result<Self, CanopyError> {
        let iso = iso.trim().to_uppercase();
        if !ISO_RE.is_match(&iso) {
            return Err(CanopyError::InvalidLocation(iso));
        }
        Ok(Self {
            iso,
            adm1: None,
            adm2: None,
        })
    }

    pub fn level(&self) -> AdminLevel {
        match (self.adm1, self.adm2) {
            (Some(_), Some(_)) => AdminLevel::Adm2,
            (Some(_), None) => AdminLevel::Adm1,
            _ => AdminLevel::Adm0,
        }
    }
}

impl fmt::Display for AdminPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.iso)?;
        if let Some(adm1) = self.adm1 {
            write!(f, ".{adm1}")?;
        }
        if let Some(adm2) = self.adm2 {
            write!(f, ".{adm2}")?;
        }
        Ok(())
    }
}

impl FromStr for AdminPath {
    type Err = CanopyError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let mut parts = value.trim().split('.');
        let mut path = AdminPath::country(parts.next().unwrap_or_default())?;
        let parse_level = |raw: &str| {
            raw.parse::<u32>()
                .map_err(|_| CanopyError::InvalidLocation(value.to_string()))
        };
        path.adm1 = parts.next().map(parse_level).transpose()?;
        path.adm2 = parts.next().map(parse_level).transpose()?;
        if parts.next().is_some() {
            return Err(CanopyError::InvalidLocation(value.to_string()));
        }
        Ok(path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GeostoreRef(String);

impl GeostoreRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GeostoreRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for GeostoreRef {
    type Err = CanopyError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if !GEOSTORE_RE.is_match(trimmed) {
            return Err(CanopyError::InvalidLocation(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AreaStatus {
    Draft,
    Saved,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LocationContext {
    Global,
    Country(AdminPath),
    Region(AdminPath),
    #[serde(rename = "wdpa")]
    ProtectedArea {
        wdpa_id: String,
        geostore: GeostoreRef,
    },
    #[serde(rename = "aoi")]
    UserArea {
        aoi_id: String,
        geostore: GeostoreRef,
        status: AreaStatus,
    },
    #[serde(rename = "use")]
    UseArea {
        use_id: String,
        geostore: GeostoreRef,
    },
}

impl LocationContext {
    pub fn location_type(&self) -> LocationType {
        match self {
            LocationContext::Global => LocationType::Global,
            LocationContext::Country(_) => LocationType::Country,
            LocationContext::Region(_) => LocationType::Region,
            LocationContext::ProtectedArea { .. } => LocationType::ProtectedArea,
            LocationContext::UserArea { .. } => LocationType::UserArea,
            LocationContext::UseArea { .. } => LocationType::UseArea,
        }
    }

    pub fn admin_level(&self) -> Option<AdminLevel> {
        match self {
            LocationContext::Global => Some(AdminLevel::Global),
            LocationContext::Country(path) | LocationContext::Region(path) => Some(path.level()),
            _ => None,
        }
    }

    pub fn admin_path(&self) -> Option<&AdminPath> {
        match self {
            LocationContext::Country(path) | LocationContext::Region(path) => Some(path),
            _ => None,
        }
    }

    pub fn geostore(&self) -> Option<&GeostoreRef> {
        match self {
            LocationContext::ProtectedArea { geostore, .. }
            | LocationContext::UserArea { geostore, .. }
            | LocationContext::UseArea { geostore, .. } => Some(geostore),
            _ => None,
        }
    }

    pub fn is_geometry_backed(&self) -> bool {
        self.geostore().is_some()
    }
}

impl fmt::Display for LocationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocationContext::Global => write!(f, "global"),
            LocationContext::Country(path) => write!(f, "country:{path}"),
            LocationContext::Region(path) => write!(f, "region:{path}"),
            LocationContext::ProtectedArea { wdpa_id, geostore } => {
                write!(f, "wdpa:{wdpa_id}@{geostore}")
            }
            LocationContext::UserArea {
                aoi_id,
                geostore,
                status,
            } => match status {
                AreaStatus::Draft => write!(f, "aoi:{aoi_id}@{geostore}"),
                AreaStatus::Saved => write!(f, "aoi:{aoi_id}@{geostore}!saved"),
            },
            LocationContext::UseArea { use_id, geostore } => write!(f, "use:{use_id}@{geostore}"),
        }
    }
}

impl FromStr for LocationContext {
    type Err = CanopyError;

    /// Parses `global`, `country:BRA`, `region:BRA.12.3`, `wdpa:<id>@<geostore>`,
    /// `aoi:<id>@<geostore>[!saved]` and `use:<id>@<geostore>`.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed == "global" {
            return Ok(LocationContext::Global);
        }
        let invalid = || CanopyError::InvalidLocation(value.to_string());
        let (kind, rest) = trimmed.split_once(':').ok_or_else(invalid)?;
        match kind {
            "country" => {
                let path: AdminPath = rest.parse()?;
                if path.level() != AdminLevel::Adm0 {
                    return Err(invalid());
                }
                Ok(LocationContext::Country(path))
            }
            "region" => {
                let path: AdminPath = rest.parse()?;
                if path.level() == AdminLevel::Adm0 {
                    return Err(invalid());
                }
                Ok(LocationContext::Region(path))
            }
            "wdpa" | "aoi" | "use" => {
                let (id, geometry) = rest.split_once('@').ok_or_else(invalid)?;
                if id.trim().is_empty() {
                    return Err(invalid());
                }
                let id = id.trim().to_string();
                let (hash, status) = match geometry.split_once('!') {
                    Some((hash, "saved")) => (hash, AreaStatus::Saved),
                    Some((hash, "draft")) => (hash, AreaStatus::Draft),
                    Some(_) => return Err(invalid()),
                    None => (geometry, AreaStatus::Draft),
                };
                let geostore: GeostoreRef = hash.parse()?;
                match kind {
                    "wdpa" => Ok(LocationContext::ProtectedArea {
                        wdpa_id: id,
                        geostore,
                    }),
                    "aoi" => Ok(LocationContext::UserArea {
                        aoi_id: id,
                        geostore,
                        status,
                    }),
                    _ => Ok(LocationContext::UseArea {
                        use_id: id,
                        geostore,
                    }),
                }
            }
            _ => Err(invalid()),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_country_normalizes_iso() {
        let location: LocationContext = "country:bra".parse().unwrap();
        assert_eq!(
            location,
            LocationContext::Country(AdminPath::country("BRA").unwrap())
        );
        assert_eq!(location.admin_level(), Some(AdminLevel::Adm0));
    }

    #[test]
    fn parse_region_depth() {
        let location: LocationContext = "region:IDN.12.3".parse().unwrap();
        assert_eq!(location.admin_level(), Some(AdminLevel::Adm2));
        assert_eq!(location.to_string(), "region:IDN.12.3");
    }

    #[test]
    fn region_requires_subnational_level() {
        let err = "region:BRA".parse::<LocationContext>().unwrap_err();
        assert_matches!(err, CanopyError::InvalidLocation(_));
    }

    #[test]
    fn parse_user_area_status() {
        let draft: LocationContext = "aoi:abc@f00d".parse().unwrap();
        assert_matches!(
            draft,
            LocationContext::UserArea {
                status: AreaStatus::Draft,
                ..
            }
        );
        let saved: LocationContext = "aoi:abc@f00d!saved".parse().unwrap();
        assert_matches!(
            saved,
            LocationContext::UserArea {
                status: AreaStatus::Saved,
                ..
            }
        );
        assert!(saved.is_geometry_backed());
        assert_eq!(saved.admin_level(), None);
    }

    #[test]
    fn rejects_hostile_geostore() {
        let err = "wdpa:1@abc';drop".parse::<LocationContext>().unwrap_err();
        assert_matches!(err, CanopyError::InvalidLocation(_));
    }
}

//! Geographic units and the coarsening hierarchy.
//!
//! The hierarchy is fixed: `district → metro → state → region → national`.
//! Every unit has a canonical string form that doubles as its wire format and
//! its component in canonical bucket keys:
//!
//! | Level | Example |
//! |-------|---------|
//! | District | `CA-12`, `WY-AL` |
//! | Metro | `MSA-41860` |
//! | State | `CA` |
//! | Region | `R-WEST` |
//! | National | `US` |

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DimensionError;

/// US states, DC and the inhabited territories.
const STATE_CODES: [&str; 56] = [
    "AL", "AK", "AZ", "AR", "CA", "CO", "CT", "DE", "DC", "FL", "GA", "HI", "ID", "IL", "IN",
    "IA", "KS", "KY", "LA", "ME", "MD", "MA", "MI", "MN", "MS", "MO", "MT", "NE", "NV", "NH",
    "NJ", "NM", "NY", "NC", "ND", "OH", "OK", "OR", "PA", "RI", "SC", "SD", "TN", "TX", "UT",
    "VT", "VA", "WA", "WV", "WI", "WY", "PR", "GU", "VI", "AS", "MP",
];

/// Granularity of a geographic unit, finest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeoLevel {
    /// Congressional district.
    District,
    /// Metropolitan statistical area.
    Metro,
    /// State or territory.
    State,
    /// Census region.
    Region,
    /// The whole country.
    National,
}

impl GeoLevel {
    /// Levels in walk order.
    pub const ALL: [Self; 5] = [
        Self::District,
        Self::Metro,
        Self::State,
        Self::Region,
        Self::National,
    ];

    /// Wire name of the level.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::District => "district",
            Self::Metro => "metro",
            Self::State => "state",
            Self::Region => "region",
            Self::National => "national",
        }
    }
}

impl fmt::Display for GeoLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// US Census region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Region {
    /// New England and Mid-Atlantic.
    Northeast,
    /// East and West North Central.
    Midwest,
    /// South Atlantic, East and West South Central.
    South,
    /// Mountain and Pacific.
    West,
}

impl Region {
    const fn code(self) -> &'static str {
        match self {
            Self::Northeast => "R-NORTHEAST",
            Self::Midwest => "R-MIDWEST",
            Self::South => "R-SOUTH",
            Self::West => "R-WEST",
        }
    }

    fn for_state(state: &str) -> Option<Self> {
        let region = match state {
            "CT" | "ME" | "MA" | "NH" | "RI" | "VT" | "NJ" | "NY" | "PA" => Self::Northeast,
            "IL" | "IN" | "MI" | "OH" | "WI" | "IA" | "KS" | "MN" | "MO" | "NE" | "ND" | "SD" => {
                Self::Midwest
            }
            "DE" | "DC" | "FL" | "GA" | "MD" | "NC" | "SC" | "VA" | "WV" | "AL" | "KY" | "MS"
            | "TN" | "AR" | "LA" | "OK" | "TX" => Self::South,
            "AZ" | "CO" | "ID" | "MT" | "NV" | "NM" | "UT" | "WY" | "AK" | "CA" | "HI" | "OR"
            | "WA" => Self::West,
            _ => return None,
        };
        Some(region)
    }
}

/// A two-letter state or territory code from the fixed list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateCode([u8; 2]);

impl StateCode {
    /// The code as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        // Constructed only from validated ASCII.
        std::str::from_utf8(&self.0).unwrap_or("??")
    }
}

impl FromStr for StateCode {
    type Err = DimensionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !STATE_CODES.contains(&s) {
            return Err(DimensionError::InvalidJurisdiction);
        }
        let bytes = s.as_bytes();
        Ok(Self([bytes[0], bytes[1]]))
    }
}

/// A geographic unit at any level of the hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum GeoUnit {
    /// Congressional district: state plus seat (`"12"` or `"AL"` for at-large).
    District {
        /// Parent state.
        state: StateCode,
        /// Two-digit seat number or `AL`.
        seat: String,
    },
    /// Metropolitan statistical area by 5-digit CBSA code.
    Metro(String),
    /// State or territory.
    State(StateCode),
    /// Census region.
    Region(Region),
    /// The whole country.
    National,
}

impl GeoUnit {
    /// Level of this unit.
    #[must_use]
    pub const fn level(&self) -> GeoLevel {
        match self {
            Self::District { .. } => GeoLevel::District,
            Self::Metro(_) => GeoLevel::Metro,
            Self::State(_) => GeoLevel::State,
            Self::Region(_) => GeoLevel::Region,
            Self::National => GeoLevel::National,
        }
    }

    /// Canonical string form.
    #[must_use]
    pub fn code(&self) -> String {
        match self {
            Self::District { state, seat } => format!("{}-{seat}", state.as_str()),
            Self::Metro(cbsa) => format!("MSA-{cbsa}"),
            Self::State(state) => state.as_str().to_string(),
            Self::Region(region) => region.code().to_string(),
            Self::National => "US".to_string(),
        }
    }
}

impl FromStr for GeoUnit {
    type Err = DimensionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "US" {
            return Ok(Self::National);
        }
        if let Some(region) = s.strip_prefix("R-") {
            return match region {
                "NORTHEAST" => Ok(Self::Region(Region::Northeast)),
                "MIDWEST" => Ok(Self::Region(Region::Midwest)),
                "SOUTH" => Ok(Self::Region(Region::South)),
                "WEST" => Ok(Self::Region(Region::West)),
                _ => Err(DimensionError::InvalidJurisdiction),
            };
        }
        if let Some(cbsa) = s.strip_prefix("MSA-") {
            if cbsa.len() == 5 && cbsa.bytes().all(|b| b.is_ascii_digit()) {
                return Ok(Self::Metro(cbsa.to_string()));
            }
            return Err(DimensionError::InvalidJurisdiction);
        }
        match s.split_once('-') {
            Some((state, seat)) => {
                let state = state.parse::<StateCode>()?;
                if seat == "AL" {
                    return Ok(Self::District {
                        state,
                        seat: seat.to_string(),
                    });
                }
                // Numbered seats are stored as two digits: "CA-1" is "CA-01".
                let number = if (1..=2).contains(&seat.len())
                    && seat.bytes().all(|b| b.is_ascii_digit())
                {
                    seat.parse::<u8>().ok()
                } else {
                    None
                };
                match number {
                    Some(n) if n > 0 => Ok(Self::District {
                        state,
                        seat: format!("{n:02}"),
                    }),
                    _ => Err(DimensionError::InvalidJurisdiction),
                }
            }
            None => Ok(Self::State(s.parse()?)),
        }
    }
}

impl fmt::Display for GeoUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.code())
    }
}

impl TryFrom<String> for GeoUnit {
    type Error = DimensionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<GeoUnit> for String {
    fn from(unit: GeoUnit) -> Self {
        unit.code()
    }
}

/// On-disk format of the district → metro mapping.
///
/// ```json
/// { "districts": { "CA-12": "MSA-41860" }, "metros": { "MSA-41860": "CA" } }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetroMap {
    /// District code → metro code.
    #[serde(default)]
    pub districts: BTreeMap<String, String>,
    /// Metro code → state code.
    #[serde(default)]
    pub metros: BTreeMap<String, String>,
}

/// The fixed coarsening hierarchy, with an optional district → metro table.
#[derive(Debug, Clone, Default)]
pub struct GeoHierarchy {
    district_metro: BTreeMap<GeoUnit, GeoUnit>,
    metro_state: BTreeMap<GeoUnit, StateCode>,
}

impl GeoHierarchy {
    /// Hierarchy without metro data: districts roll straight up to states.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a hierarchy from a metro mapping.
    ///
    /// A district may only map to a metro registered under the district's own
    /// state, so every path through the hierarchy agrees on the state.
    ///
    /// # Errors
    ///
    /// Returns `DimensionError::InvalidJurisdiction` for unparseable codes,
    /// codes at the wrong level, or inconsistent states.
    pub fn from_metro_map(map: &MetroMap) -> Result<Self, DimensionError> {
        let mut metro_state = BTreeMap::new();
        for (metro, state) in &map.metros {
            let metro: GeoUnit = metro.parse()?;
            if metro.level() != GeoLevel::Metro {
                return Err(DimensionError::InvalidJurisdiction);
            }
            metro_state.insert(metro, state.parse::<StateCode>()?);
        }

        let mut district_metro = BTreeMap::new();
        for (district, metro) in &map.districts {
            let district: GeoUnit = district.parse()?;
            let metro: GeoUnit = metro.parse()?;
            let GeoUnit::District { state, .. } = &district else {
                return Err(DimensionError::InvalidJurisdiction);
            };
            if metro_state.get(&metro) != Some(state) {
                return Err(DimensionError::InvalidJurisdiction);
            }
            district_metro.insert(district, metro);
        }

        Ok(Self {
            district_metro,
            metro_state,
        })
    }

    /// The next coarser unit, or `None` for national.
    #[must_use]
    pub fn parent(&self, unit: &GeoUnit) -> Option<GeoUnit> {
        match unit {
            GeoUnit::District { state, .. } => Some(
                self.district_metro
                    .get(unit)
                    .cloned()
                    .unwrap_or(GeoUnit::State(*state)),
            ),
            GeoUnit::Metro(_) => Some(
                self.metro_state
                    .get(unit)
                    .map_or(GeoUnit::National, |state| GeoUnit::State(*state)),
            ),
            GeoUnit::State(state) => Some(
                Region::for_state(state.as_str()).map_or(GeoUnit::National, GeoUnit::Region),
            ),
            GeoUnit::Region(_) => Some(GeoUnit::National),
            GeoUnit::National => None,
        }
    }

    /// All strictly coarser units, finest first. Always ends with national.
    #[must_use]
    pub fn ancestors(&self, unit: &GeoUnit) -> Vec<GeoUnit> {
        let mut out = Vec::with_capacity(4);
        let mut current = self.parent(unit);
        while let Some(next) = current {
            current = self.parent(&next);
            out.push(next);
        }
        out
    }

    /// `true` if `outer` is `inner` itself or one of its ancestors.
    #[must_use]
    pub fn contains(&self, outer: &GeoUnit, inner: &GeoUnit) -> bool {
        outer == inner || self.ancestors(inner).contains(outer)
    }
}

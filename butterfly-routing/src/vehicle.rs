//! Vehicle types that restrictions and profiles are scoped to

use std::fmt;
use std::str::FromStr;

use butterfly_common::{suggest_correction, Error};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vehicle {
    Car,
    SmallTruck,
    BigTruck,
    Bus,
    Moped,
    MotorCycle,
    Bicycle,
    Pedestrian,
}

impl Vehicle {
    pub const ALL: [Vehicle; 8] = [
        Vehicle::Car,
        Vehicle::SmallTruck,
        Vehicle::BigTruck,
        Vehicle::Bus,
        Vehicle::Moped,
        Vehicle::MotorCycle,
        Vehicle::Bicycle,
        Vehicle::Pedestrian,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Vehicle::Car => "car",
            Vehicle::SmallTruck => "smalltruck",
            Vehicle::BigTruck => "bigtruck",
            Vehicle::Bus => "bus",
            Vehicle::Moped => "moped",
            Vehicle::MotorCycle => "motorcycle",
            Vehicle::Bicycle => "bicycle",
            Vehicle::Pedestrian => "pedestrian",
        }
    }

    pub fn is_motor_vehicle(&self) -> bool {
        !matches!(self, Vehicle::Bicycle | Vehicle::Pedestrian)
    }

    /// Vehicles named by an OSM access-style key suffix, as in
    /// `restriction:hgv` or `restriction:motorcar`.
    pub fn from_osm_key(key: &str) -> Vec<Vehicle> {
        match key {
            "motorcar" => vec![Vehicle::Car],
            "goods" => vec![Vehicle::SmallTruck],
            "hgv" => vec![Vehicle::BigTruck],
            "bus" | "psv" => vec![Vehicle::Bus],
            "moped" => vec![Vehicle::Moped],
            "motorcycle" => vec![Vehicle::MotorCycle],
            "bicycle" => vec![Vehicle::Bicycle],
            "foot" => vec![Vehicle::Pedestrian],
            "motor_vehicle" => Vehicle::ALL
                .into_iter()
                .filter(Vehicle::is_motor_vehicle)
                .collect(),
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for Vehicle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Vehicle {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Vehicle::ALL
            .into_iter()
            .find(|v| v.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::UnknownVehicle {
                name: s.to_string(),
                suggestion: suggest_correction(s, Vehicle::ALL.iter().map(|v| v.as_str())),
            })
    }
}

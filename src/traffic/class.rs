//! Coarse classification tags shared by every traffic layer.
//!
//! Each feed assigns a tag when it builds a record, from whatever raw field
//! the upstream source exposes (ADS-B emitter category, AIS ship type code,
//! orbital altitude). Everything downstream keys on the tag alone: icon
//! color, follow distance, class filters.

use bevy::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClassTag {
    // Aircraft, from the ADS-B emitter category.
    LightAircraft,
    Airliner,
    HeavyAirliner,
    HighPerformance,
    Rotorcraft,
    // Vessels, from the AIS ship type code.
    CargoShip,
    TankerShip,
    PassengerShip,
    HighSpeedCraft,
    FishingVessel,
    TugOrPilot,
    // Orbiters, from mean orbital altitude.
    LeoSatellite,
    MeoSatellite,
    GeoSatellite,
    EllipticalOrbiter,
    /// The feed gave nothing usable to classify by.
    Unclassified,
}

/// Every tag, for building per-class render assets.
pub const ALL_TAGS: [ClassTag; 16] = [
    ClassTag::LightAircraft,
    ClassTag::Airliner,
    ClassTag::HeavyAirliner,
    ClassTag::HighPerformance,
    ClassTag::Rotorcraft,
    ClassTag::CargoShip,
    ClassTag::TankerShip,
    ClassTag::PassengerShip,
    ClassTag::HighSpeedCraft,
    ClassTag::FishingVessel,
    ClassTag::TugOrPilot,
    ClassTag::LeoSatellite,
    ClassTag::MeoSatellite,
    ClassTag::GeoSatellite,
    ClassTag::EllipticalOrbiter,
    ClassTag::Unclassified,
];

impl ClassTag {
    /// Short display name used in labels and logs.
    pub fn label(self) -> &'static str {
        match self {
            ClassTag::LightAircraft => "Light",
            ClassTag::Airliner => "Airliner",
            ClassTag::HeavyAirliner => "Heavy",
            ClassTag::HighPerformance => "HiPerf",
            ClassTag::Rotorcraft => "Rotor",
            ClassTag::CargoShip => "Cargo",
            ClassTag::TankerShip => "Tanker",
            ClassTag::PassengerShip => "Passenger",
            ClassTag::HighSpeedCraft => "HSC",
            ClassTag::FishingVessel => "Fishing",
            ClassTag::TugOrPilot => "Tug",
            ClassTag::LeoSatellite => "LEO",
            ClassTag::MeoSatellite => "MEO",
            ClassTag::GeoSatellite => "GEO",
            ClassTag::EllipticalOrbiter => "HEO",
            ClassTag::Unclassified => "Unknown",
        }
    }

    /// Icon color, distinct enough per tag that a mixed scene reads at a glance.
    pub fn color(self) -> Color {
        match self {
            ClassTag::LightAircraft => Color::srgb(0.95, 0.85, 0.30),
            ClassTag::Airliner => Color::srgb(0.30, 0.85, 0.95),
            ClassTag::HeavyAirliner => Color::srgb(0.20, 0.55, 0.95),
            ClassTag::HighPerformance => Color::srgb(0.95, 0.30, 0.30),
            ClassTag::Rotorcraft => Color::srgb(0.80, 0.50, 0.95),
            ClassTag::CargoShip => Color::srgb(0.85, 0.60, 0.25),
            ClassTag::TankerShip => Color::srgb(0.60, 0.35, 0.15),
            ClassTag::PassengerShip => Color::srgb(0.30, 0.95, 0.55),
            ClassTag::HighSpeedCraft => Color::srgb(0.95, 0.95, 0.95),
            ClassTag::FishingVessel => Color::srgb(0.55, 0.75, 0.35),
            ClassTag::TugOrPilot => Color::srgb(0.75, 0.75, 0.55),
            ClassTag::LeoSatellite => Color::srgb(0.40, 0.95, 0.95),
            ClassTag::MeoSatellite => Color::srgb(0.95, 0.65, 0.95),
            ClassTag::GeoSatellite => Color::srgb(0.95, 0.90, 0.60),
            ClassTag::EllipticalOrbiter => Color::srgb(0.95, 0.45, 0.70),
            ClassTag::Unclassified => Color::srgb(0.60, 0.60, 0.60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_tag_has_a_label() {
        for tag in ALL_TAGS {
            assert!(!tag.label().is_empty());
        }
    }

    #[test]
    fn test_tag_colors_are_distinct() {
        let mut seen: Vec<Color> = Vec::new();
        for tag in ALL_TAGS {
            let c = tag.color();
            if tag != ClassTag::Unclassified {
                assert!(!seen.contains(&c), "duplicate color for {:?}", tag);
            }
            seen.push(c);
        }
    }
}

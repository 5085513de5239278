//! LoRa modem presets

use std::fmt;
use std::str::FromStr;

use crate::error::PingerError;

/// Named physical-layer profile of the radio (range/speed trade-off).
///
/// Discriminants match the firmware's `ModemPreset` protobuf enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModemPreset {
    LongFast = 0,
    LongSlow = 1,
    VeryLongSlow = 2,
    MediumSlow = 3,
    MediumFast = 4,
    ShortSlow = 5,
    ShortFast = 6,
    LongModerate = 7,
    ShortTurbo = 8,
}

impl ModemPreset {
    pub const ALL: [ModemPreset; 9] = [
        ModemPreset::LongFast,
        ModemPreset::LongSlow,
        ModemPreset::VeryLongSlow,
        ModemPreset::MediumSlow,
        ModemPreset::MediumFast,
        ModemPreset::ShortSlow,
        ModemPreset::ShortFast,
        ModemPreset::LongModerate,
        ModemPreset::ShortTurbo,
    ];

    /// Protobuf enum value
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|preset| preset.code() == code)
    }

    /// Canonical lowercase name, as accepted in configuration
    pub fn name(self) -> &'static str {
        match self {
            ModemPreset::LongFast => "longfast",
            ModemPreset::LongSlow => "longslow",
            ModemPreset::VeryLongSlow => "verylongslow",
            ModemPreset::MediumSlow => "mediumslow",
            ModemPreset::MediumFast => "mediumfast",
            ModemPreset::ShortSlow => "shortslow",
            ModemPreset::ShortFast => "shortfast",
            ModemPreset::LongModerate => "longmoderate",
            ModemPreset::ShortTurbo => "shortturbo",
        }
    }
}

impl fmt::Display for ModemPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ModemPreset {
    type Err = PingerError;

    /// Case-insensitive, ignoring punctuation: `Long-Fast`, `LONG_FAST` and
    /// `longfast` are the same preset. A bare number selects by code.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .map(|c| c.to_ascii_lowercase())
            .collect();

        let found = if !normalized.is_empty() && normalized.bytes().all(|b| b.is_ascii_digit()) {
            normalized.parse().ok().and_then(Self::from_code)
        } else {
            Self::ALL.into_iter().find(|preset| preset.name() == normalized)
        };

        found.ok_or_else(|| {
            let valid: Vec<&str> = Self::ALL.iter().map(|p| p.name()).collect();
            PingerError::Config(format!(
                "Unknown radio mode {:?}. Valid preset names: {}",
                s,
                valid.join(", ")
            ))
        })
    }
}

use std::fmt;
use std::str::FromStr;

use crate::Error;
use crate::diff::Scope;

/// Temperature stored as Celsius internally.
/// Handles Lennox rounding: F to whole degrees, C to 0.5 increments.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Temperature(f64);

impl Temperature {
    pub fn from_celsius(c: f64) -> Self {
        Self(c)
    }

    pub fn from_fahrenheit(f: f64) -> Self {
        Self((f - 32.0) * (5.0 / 9.0))
    }

    /// Construct from paired F+C values as sent by the thermostat.
    /// Prefers the C value (avoids rounding loss).
    pub fn from_pair(_f: f64, c: f64) -> Self {
        Self(c)
    }

    pub fn celsius(&self) -> f64 {
        self.0
    }

    pub fn fahrenheit(&self) -> f64 {
        self.0 * (9.0 / 5.0) + 32.0
    }

    /// Round to Lennox C precision (0.5 increments).
    pub fn to_lennox_celsius(&self) -> f64 {
        (self.0 * 2.0).round() / 2.0
    }

    /// Round to Lennox F precision (whole degrees).
    pub fn to_lennox_fahrenheit(&self) -> i32 {
        self.fahrenheit().round() as i32
    }
}

impl fmt::Display for Temperature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}\u{00b0}C", self.0)
    }
}

/// A mode the controller reads and writes as a fixed string.
macro_rules! wire_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $wire:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_lennox_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $wire),+
                }
            }

            pub fn from_lennox_str(s: &str) -> Option<Self> {
                match s {
                    $($wire => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_lennox_str(s).ok_or_else(|| Error::InvalidMode(s.to_string()))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_lennox_str())
            }
        }
    };
}

wire_enum!(HvacMode {
    Off => "off",
    Heat => "heat",
    Cool => "cool",
    HeatCool => "heat and cool",
    EmergencyHeat => "emergency heat",
});

wire_enum!(FanMode {
    On => "on",
    Auto => "auto",
    Circulate => "circulate",
});

wire_enum!(
    /// Which humidity control a period asks for.
    HumidityMode {
        Off => "off",
        Humidify => "humidify",
        Dehumidify => "dehumidify",
        Both => "both",
    }
);

wire_enum!(
    /// System-wide fresh air ventilation setting.
    VentilationMode {
        On => "on",
        Off => "off",
        Installer => "installer",
    }
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OperatingState {
    #[default]
    Idle,
    Heating,
    Cooling,
}

impl OperatingState {
    pub fn from_lennox_str(s: &str) -> Option<Self> {
        match s {
            "idle" | "off" => Some(OperatingState::Idle),
            "heating" => Some(OperatingState::Heating),
            "cooling" => Some(OperatingState::Cooling),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HumidityOperation {
    #[default]
    Off,
    Humidifying,
    Dehumidifying,
}

impl HumidityOperation {
    pub fn from_lennox_str(s: &str) -> Option<Self> {
        match s {
            "off" | "idle" => Some(HumidityOperation::Off),
            "humidifying" => Some(HumidityOperation::Humidifying),
            "dehumidifying" => Some(HumidityOperation::Dehumidifying),
            _ => None,
        }
    }
}

/// New value of a changed leaf. F/C temperature pairs arrive folded.
#[derive(Debug, Clone, PartialEq)]
pub enum LeafValue {
    Number(f64),
    Text(String),
    Bool(bool),
    Temperature(Temperature),
}

/// Events emitted by the diff engine when state changes.
#[derive(Debug, Clone)]
pub enum Event {
    ZoneTemperatureChanged { zone_id: u8, name: String, temp: Temperature },
    ZoneHumidityChanged { zone_id: u8, name: String, humidity: f64 },
    ZoneModeChanged { zone_id: u8, name: String, mode: HvacMode },
    ZoneOperatingChanged { zone_id: u8, name: String, state: OperatingState, aux: bool },
    ZoneSetpointsChanged { zone_id: u8, name: String, heat: Option<Temperature>, cool: Option<Temperature> },
    ZoneFanChanged { zone_id: u8, name: String, mode: FanMode, running: bool },
    ZoneHoldChanged { zone_id: u8, name: String, active: bool },
    ZoneScheduleChanged { zone_id: u8, name: String, schedule_id: u32 },
    OutdoorTempChanged { temp: Temperature },
    AwayModeChanged { away: bool },
    AlertChanged { code: u16, active: bool },
    HpLockoutChanged { locked_out: bool },
    AuxLockoutChanged { locked_out: bool },
    ScheduleChanged { schedule_id: u32, name: String },
    ParameterChanged { equipment_id: u16, pid: u16, name: String, value: String },

    /// A leaf without a typed event changed.
    Attribute { scope: Scope, path: String, value: LeafValue },
}

use std::collections::BTreeMap;

use serde_json::{Map, Value, json};

use crate::types::{FanMode, HumidityMode, HvacMode, Temperature};

pub const MANUAL_SCHEDULE_BASE: u32 = 16;
pub const AWAY_SCHEDULE_BASE: u32 = 24;
pub const OVERRIDE_SCHEDULE_BASE: u32 = 32;

pub fn manual_schedule_id(zone_id: u8) -> u32 {
    MANUAL_SCHEDULE_BASE + zone_id as u32
}

pub fn away_schedule_id(zone_id: u8) -> u32 {
    AWAY_SCHEDULE_BASE + zone_id as u32
}

pub fn override_schedule_id(zone_id: u8) -> u32 {
    OVERRIDE_SCHEDULE_BASE + zone_id as u32
}

/// User-editable schedules occupy ids below the manual range.
pub fn is_user_schedule(schedule_id: u32) -> bool {
    schedule_id < MANUAL_SCHEDULE_BASE
}

/// One schedule period, or the zone's currently effective period
/// (`status.period`). Every field is optional because the controller sends
/// partial deltas.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Period {
    /// Seconds after midnight.
    pub start_time: Option<u32>,
    pub enabled: Option<bool>,
    pub system_mode: Option<HvacMode>,
    pub fan_mode: Option<FanMode>,
    pub humidity_mode: Option<HumidityMode>,
    pub heat_setpoint: Option<Temperature>,
    pub cool_setpoint: Option<Temperature>,
    pub setpoint: Option<Temperature>,
    pub humidify_setpoint: Option<u8>,
    pub dehumidify_setpoint: Option<u8>,
}

pub(crate) fn temperature_field(data: &Value, f_key: &str, c_key: &str) -> Option<Temperature> {
    let f = data.get(f_key).and_then(|v| v.as_f64());
    let c = data.get(c_key).and_then(|v| v.as_f64());
    match (f, c) {
        (Some(f), Some(c)) => Some(Temperature::from_pair(f, c)),
        (None, Some(c)) => Some(Temperature::from_celsius(c)),
        (Some(f), None) => Some(Temperature::from_fahrenheit(f)),
        (None, None) => None,
    }
}

fn percent_field(data: &Value, key: &str) -> Option<u8> {
    data.get(key)
        .and_then(|v| v.as_f64())
        .map(|v| v.clamp(0.0, 100.0).round() as u8)
}

impl Period {
    pub fn from_json(data: &Value) -> Self {
        let mut period = Self::default();
        period.apply(data);
        period
    }

    /// Apply a (possibly partial) period object. Keys absent from `data`
    /// keep their previous value.
    pub fn apply(&mut self, data: &Value) {
        if let Some(st) = data.get("startTime").and_then(|v| v.as_u64()) {
            self.start_time = Some(st as u32);
        }
        if let Some(enabled) = data.get("enabled").and_then(|v| v.as_bool()) {
            self.enabled = Some(enabled);
        }
        if let Some(mode) = data.get("systemMode").and_then(|v| v.as_str()) {
            self.system_mode = HvacMode::from_lennox_str(mode);
        }
        if let Some(mode) = data.get("fanMode").and_then(|v| v.as_str()) {
            self.fan_mode = FanMode::from_lennox_str(mode);
        }
        if let Some(mode) = data.get("humidityMode").and_then(|v| v.as_str()) {
            self.humidity_mode = HumidityMode::from_lennox_str(mode);
        }
        if let Some(t) = temperature_field(data, "hsp", "hspC") {
            self.heat_setpoint = Some(t);
        }
        if let Some(t) = temperature_field(data, "csp", "cspC") {
            self.cool_setpoint = Some(t);
        }
        if let Some(t) = temperature_field(data, "sp", "spC") {
            self.setpoint = Some(t);
        }
        if let Some(h) = percent_field(data, "husp") {
            self.humidify_setpoint = Some(h);
        }
        if let Some(d) = percent_field(data, "desp") {
            self.dehumidify_setpoint = Some(d);
        }
    }

    /// Overlay every field set in `other` onto a copy of `self`.
    pub fn merged_with(&self, other: &Period) -> Period {
        Period {
            start_time: other.start_time.or(self.start_time),
            enabled: other.enabled.or(self.enabled),
            system_mode: other.system_mode.or(self.system_mode),
            fan_mode: other.fan_mode.or(self.fan_mode),
            humidity_mode: other.humidity_mode.or(self.humidity_mode),
            heat_setpoint: other.heat_setpoint.or(self.heat_setpoint),
            cool_setpoint: other.cool_setpoint.or(self.cool_setpoint),
            setpoint: other.setpoint.or(self.setpoint),
            humidify_setpoint: other.humidify_setpoint.or(self.humidify_setpoint),
            dehumidify_setpoint: other.dehumidify_setpoint.or(self.dehumidify_setpoint),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Period::default()
    }

    /// Wire representation. Temperatures are sent as a rounded F/C pair.
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        if let Some(st) = self.start_time {
            map.insert("startTime".into(), json!(st));
        }
        if let Some(enabled) = self.enabled {
            map.insert("enabled".into(), json!(enabled));
        }
        if let Some(mode) = self.system_mode {
            map.insert("systemMode".into(), json!(mode.as_lennox_str()));
        }
        if let Some(mode) = self.fan_mode {
            map.insert("fanMode".into(), json!(mode.as_lennox_str()));
        }
        if let Some(mode) = self.humidity_mode {
            map.insert("humidityMode".into(), json!(mode.as_lennox_str()));
        }
        for (f_key, c_key, temp) in [
            ("hsp", "hspC", self.heat_setpoint),
            ("csp", "cspC", self.cool_setpoint),
            ("sp", "spC", self.setpoint),
        ] {
            if let Some(t) = temp {
                map.insert(f_key.into(), json!(t.to_lennox_fahrenheit()));
                map.insert(c_key.into(), json!(t.to_lennox_celsius()));
            }
        }
        if let Some(h) = self.humidify_setpoint {
            map.insert("husp".into(), json!(h));
        }
        if let Some(d) = self.dehumidify_setpoint {
            map.insert("desp".into(), json!(d));
        }
        Value::Object(map)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Schedule {
    pub id: u32,
    pub name: String,
    pub period_count: Option<usize>,
    pub periods: BTreeMap<u32, Period>,
}

impl Schedule {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    /// Apply the `schedule` object of a `schedules[]` entry.
    pub fn apply(&mut self, data: &Value) {
        if let Some(name) = data.get("name").and_then(|v| v.as_str()) {
            self.name = name.to_string();
        }
        if let Some(count) = data.get("periodCount").and_then(|v| v.as_u64()) {
            self.period_count = Some(count as usize);
        }
        if let Some(Value::Array(periods)) = data.get("periods") {
            for entry in periods {
                let Some(pid) = entry.get("id").and_then(|v| v.as_u64()) else {
                    continue;
                };
                let Some(period_data) = entry.get("period") else {
                    continue;
                };
                self.periods
                    .entry(pid as u32)
                    .or_default()
                    .apply(period_data);
            }
        }
    }

    /// Periods in id order, limited to `periodCount` when the controller
    /// reported one. Stale trailing periods are kept in storage but hidden.
    pub fn active_periods(&self) -> impl Iterator<Item = (&u32, &Period)> {
        let limit = self.period_count.unwrap_or(usize::MAX);
        self.periods.iter().take(limit)
    }

    pub fn is_user_schedule(&self) -> bool {
        is_user_schedule(self.id)
    }
}

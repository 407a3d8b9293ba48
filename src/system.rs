use std::collections::{BTreeMap, HashMap};

use serde_json::Value;

use crate::schedule::{Schedule, temperature_field};
use crate::types::*;
use crate::zone::Zone;

/// Alert code raised while the heat pump is locked out by low ambient.
pub const ALERT_HP_LOW_AMBIENT_LOCKOUT: u16 = 18;
/// Alert code raised while aux heat is locked out by high ambient.
pub const ALERT_AUX_HIGH_AMBIENT_LOCKOUT: u16 = 19;

pub const PID_HIGH_BALANCE_POINT: u16 = 128;
pub const PID_LOW_BALANCE_POINT: u16 = 129;

#[derive(Debug, Clone, PartialEq)]
pub enum Descriptor {
    Range {
        min: f64,
        max: f64,
        inc: f64,
        unit: String,
    },
    Radio {
        options: BTreeMap<String, String>,
    },
    String {
        max_len: Option<u32>,
    },
}

impl Default for Descriptor {
    fn default() -> Self {
        Descriptor::String { max_len: None }
    }
}

impl Descriptor {
    pub(crate) fn from_json(param_data: &Value) -> Self {
        match param_data.get("descriptor").and_then(|v| v.as_str()) {
            Some("range") => {
                let range = param_data.get("range").unwrap_or(&Value::Null);
                let num = |key: &str, default: f64| {
                    range
                        .get(key)
                        .and_then(|v| v.as_str())
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(default)
                };
                Descriptor::Range {
                    min: num("min", 0.0),
                    max: num("max", 0.0),
                    inc: num("inc", 1.0),
                    unit: param_data
                        .get("unit")
                        .and_then(|v| v.as_str())
                        .unwrap_or("")
                        .to_string(),
                }
            }
            Some("radio") => {
                let mut options = BTreeMap::new();
                if let Some(Value::Object(map)) = param_data.get("radio") {
                    for (id, label) in map {
                        if let Some(text) = label.as_str() {
                            options.insert(id.clone(), text.to_string());
                        }
                    }
                }
                Descriptor::Radio { options }
            }
            _ => {
                let max_len = param_data
                    .get("string_max")
                    .and_then(|v| v.as_u64())
                    .and_then(|v| u32::try_from(v).ok());
                Descriptor::String { max_len }
            }
        }
    }

    /// Check `value` against the descriptor and return the string to send.
    /// Radio parameters accept either the option id or its label.
    pub fn validate(&self, value: &str) -> std::result::Result<String, String> {
        match self {
            Descriptor::Range { min, max, inc, .. } => {
                let v: f64 = value.parse().map_err(|_| format!("not a number: {value}"))?;
                if v < *min || v > *max {
                    return Err(format!("out of range: {v} not in {min}..{max}"));
                }
                if *inc > 0.0 {
                    let steps = ((v - min) / inc).round();
                    let reconstructed = min + steps * inc;
                    if (reconstructed - v).abs() > 1e-9 {
                        return Err(format!("{v} not a multiple of {inc} (from {min})"));
                    }
                }
                Ok(value.to_string())
            }
            Descriptor::Radio { options } => {
                if options.contains_key(value) {
                    return Ok(value.to_string());
                }
                if let Some((id, _)) = options.iter().find(|(_, label)| *label == value) {
                    return Ok(id.clone());
                }
                let valid: Vec<_> = options.values().collect();
                Err(format!("unknown option: {value} (valid: {valid:?})"))
            }
            Descriptor::String { max_len } => {
                if let Some(max) = max_len
                    && value.len() > *max as usize
                {
                    return Err(format!("too long: {} > {max}", value.len()));
                }
                Ok(value.to_string())
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Parameter {
    pub pid: u16,
    pub name: String,
    pub value: String,
    /// False for read-only parameters.
    pub enabled: bool,
    pub descriptor: Descriptor,
}

#[derive(Debug, Clone, Default)]
pub struct Equipment {
    pub id: u16,
    pub equip_type: u16,
    pub parameters: BTreeMap<u16, Parameter>,
}

impl Equipment {
    pub fn parameter(&self, pid: u16) -> Option<&Parameter> {
        self.parameters.get(&pid)
    }

    fn numeric(&self, pid: u16) -> Option<f64> {
        self.parameter(pid).and_then(|p| p.value.parse().ok())
    }

    pub fn high_balance_point(&self) -> Option<f64> {
        self.numeric(PID_HIGH_BALANCE_POINT)
    }

    pub fn low_balance_point(&self) -> Option<f64> {
        self.numeric(PID_LOW_BALANCE_POINT)
    }

    /// Apply one `equipments[]` entry; returns `(pid, name, value)` for
    /// every parameter whose value changed from a previously known value.
    pub(crate) fn apply(&mut self, data: &Value) -> Vec<(u16, String, String)> {
        let mut changed = Vec::new();

        if let Some(et) = data
            .pointer("/equipment/equipType")
            .and_then(|v| v.as_u64())
            .and_then(|v| u16::try_from(v).ok())
        {
            self.equip_type = et;
        }

        if let Some(Value::Array(params)) = data.pointer("/equipment/parameters") {
            for param_entry in params {
                let param_data = match param_entry.get("parameter") {
                    Some(p) => p,
                    None => continue,
                };
                let pid = match param_data
                    .get("pid")
                    .and_then(|v| v.as_u64())
                    .and_then(|p| u16::try_from(p).ok())
                {
                    Some(p) => p,
                    None => continue,
                };

                let param = self.parameters.entry(pid).or_insert_with(|| Parameter {
                    pid,
                    ..Default::default()
                });
                let had_value = !param.value.is_empty() || !param.name.is_empty();

                if let Some(name) = param_data.get("name").and_then(|v| v.as_str()) {
                    param.name = name.to_string();
                }
                if let Some(enabled) = param_data.get("enabled").and_then(|v| v.as_bool()) {
                    param.enabled = enabled;
                }
                if param_data.get("descriptor").is_some() {
                    param.descriptor = Descriptor::from_json(param_data);
                }
                if let Some(value) = param_data.get("value").and_then(|v| v.as_str())
                    && value != param.value
                {
                    param.value = value.to_string();
                    if had_value {
                        changed.push((pid, param.name.clone(), param.value.clone()));
                    }
                }
            }
        }

        changed
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Alert {
    pub code: u16,
    pub active: bool,
    pub priority: String,
    pub message: String,
}

/// A home as reported by the cloud login response.
#[derive(Debug, Clone, Default)]
pub struct Home {
    pub id: String,
    pub name: String,
    pub system_ids: Vec<String>,
}

impl Home {
    pub(crate) fn from_json(data: &Value) -> Option<Self> {
        let id = match data.get("homeId")? {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        let name = data
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let system_ids = data
            .get("systems")
            .and_then(|v| v.as_array())
            .map(|systems| {
                systems
                    .iter()
                    .filter_map(|s| s.get("sysId").and_then(|v| v.as_str()))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Some(Self {
            id,
            name,
            system_ids,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct System {
    pub id: String,
    pub name: String,
    pub home_id: Option<String>,
    pub zones: Vec<Zone>,
    pub schedules: BTreeMap<u32, Schedule>,
    pub equipments: Vec<Equipment>,
    pub alerts: HashMap<u16, Alert>,
    pub outdoor_temperature: Option<Temperature>,
    pub product_type: String,
    pub temperature_unit: String,
    pub indoor_unit_type: String,
    pub outdoor_unit_type: String,
    pub zoning_mode: String,
    pub single_setpoint_mode: bool,
    pub diag_level: Option<u8>,
    pub ventilation_mode: Option<VentilationMode>,
    pub circulate_time: Option<u8>,
    pub manual_away: bool,
    pub smart_away_enabled: bool,
    pub smart_away_setpoint_state: String,
    pub hp_low_ambient_lockout: bool,
    pub aux_heat_high_ambient_lockout: bool,
}

impl System {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Away when manual away is set, or smart away has moved the setpoints.
    pub fn is_away(&self) -> bool {
        self.manual_away
            || (self.smart_away_enabled
                && matches!(
                    self.smart_away_setpoint_state.as_str(),
                    "away" | "transition"
                ))
    }

    pub fn zone(&self, zone_id: u8) -> Option<&Zone> {
        self.zones.iter().find(|z| z.id == zone_id)
    }

    pub(crate) fn zone_mut_or_insert(&mut self, zone_id: u8) -> &mut Zone {
        let idx = match self.zones.iter().position(|z| z.id == zone_id) {
            Some(idx) => idx,
            None => {
                self.zones.push(Zone::new(zone_id));
                self.zones.len() - 1
            }
        };
        &mut self.zones[idx]
    }

    pub fn equipment(&self, equipment_id: u16) -> Option<&Equipment> {
        self.equipments.iter().find(|e| e.id == equipment_id)
    }

    pub(crate) fn equipment_mut_or_insert(&mut self, equipment_id: u16) -> &mut Equipment {
        let idx = match self.equipments.iter().position(|e| e.id == equipment_id) {
            Some(idx) => idx,
            None => {
                self.equipments.push(Equipment {
                    id: equipment_id,
                    ..Default::default()
                });
                self.equipments.len() - 1
            }
        };
        &mut self.equipments[idx]
    }

    pub fn schedule(&self, schedule_id: u32) -> Option<&Schedule> {
        self.schedules.get(&schedule_id)
    }

    pub fn schedule_by_name(&self, name: &str) -> Option<&Schedule> {
        self.schedules.values().find(|s| s.name == name)
    }

    /// User schedules only; manual, away and override schedules are
    /// controller-managed.
    pub fn user_schedules(&self) -> impl Iterator<Item = &Schedule> {
        self.schedules.values().filter(|s| s.is_user_schedule())
    }

    pub fn active_alerts(&self) -> impl Iterator<Item = &Alert> {
        self.alerts.values().filter(|a| a.active)
    }

    /// Apply the `system` section of a message.
    pub(crate) fn apply(&mut self, data: &Value) {
        if let Some(name) = data.pointer("/config/name").and_then(|v| v.as_str()) {
            self.name = name.to_string();
        }

        if let Some(options) = data.pointer("/config/options") {
            for (key, slot) in [
                ("productType", &mut self.product_type),
                ("temperatureUnit", &mut self.temperature_unit),
                ("indoorUnitType", &mut self.indoor_unit_type),
                ("outdoorUnitType", &mut self.outdoor_unit_type),
            ] {
                if let Some(s) = options.get(key).and_then(|v| v.as_str()) {
                    *slot = s.to_string();
                }
            }
        }

        if let Some(config) = data.get("config") {
            if let Some(mode) = config.get("ventilationMode").and_then(|v| v.as_str()) {
                self.ventilation_mode = VentilationMode::from_lennox_str(mode);
            }
            if let Some(ct) = config.get("circulateTime").and_then(|v| v.as_u64()) {
                self.circulate_time = Some(ct.min(100) as u8);
            }
        }

        let status = data.get("status").unwrap_or(&Value::Null);
        if let Some(t) = temperature_field(status, "outdoorTemperature", "outdoorTemperatureC") {
            self.outdoor_temperature = Some(t);
        }
        if let Some(ssp) = status.get("singleSetpointMode").and_then(|v| v.as_bool()) {
            self.single_setpoint_mode = ssp;
        }
        if let Some(dl) = status
            .get("diagLevel")
            .and_then(|v| v.as_u64())
            .and_then(|v| u8::try_from(v).ok())
        {
            self.diag_level = Some(dl);
        }
        if let Some(zm) = status.get("zoningMode").and_then(|v| v.as_str()) {
            self.zoning_mode = zm.to_string();
        }
    }

    /// Apply the `occupancy` section. Returns true when `is_away` flipped.
    pub(crate) fn apply_occupancy(&mut self, occ: &Value) -> bool {
        let prev_away = self.is_away();

        if let Some(away) = occ.get("manualAway").and_then(|v| v.as_bool()) {
            self.manual_away = away;
        }
        if let Some(sa) = occ.get("smartAway") {
            if let Some(enabled) = sa
                .get("enabled")
                .or_else(|| sa.pointer("/config/enabled"))
                .and_then(|v| v.as_bool())
            {
                self.smart_away_enabled = enabled;
            }
            if let Some(state) = sa
                .get("setpointState")
                .or_else(|| sa.pointer("/status/setpointState"))
                .and_then(|v| v.as_str())
            {
                self.smart_away_setpoint_state = state.to_string();
            }
        }

        self.is_away() != prev_away
    }

    /// Apply a `schedules[]` delta. Returns `(id, name)` of touched schedules.
    pub(crate) fn apply_schedules(&mut self, schedules: &[Value]) -> Vec<(u32, String)> {
        let mut touched = Vec::new();
        for entry in schedules {
            let id = match entry
                .get("id")
                .and_then(|v| v.as_u64())
                .and_then(|id| u32::try_from(id).ok())
            {
                Some(id) => id,
                None => continue,
            };
            let schedule = self
                .schedules
                .entry(id)
                .or_insert_with(|| Schedule::new(id));
            if let Some(data) = entry.get("schedule") {
                schedule.apply(data);
            }
            touched.push((id, schedule.name.clone()));
        }
        touched
    }

    /// Apply `alerts.active`. The list is the complete set of current
    /// alerts: codes missing from it are dropped and reported inactive.
    /// Returns `(code, active)` for every listed or dropped alert; the
    /// lockout flags follow the resulting set.
    pub(crate) fn apply_alerts(&mut self, active: &[Value]) -> Vec<(u16, bool)> {
        let mut current = HashMap::new();
        let mut reported = Vec::new();

        for alert in active.iter().filter_map(|entry| entry.get("alert")) {
            let Some(code) = alert
                .get("code")
                .and_then(|v| v.as_u64())
                .and_then(|c| u16::try_from(c).ok())
            else {
                continue;
            };
            let mut stored = self.alerts.get(&code).cloned().unwrap_or(Alert {
                code,
                ..Default::default()
            });
            stored.active = alert
                .get("isStillActive")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            if let Some(p) = alert.get("priority").and_then(|v| v.as_str()) {
                stored.priority = p.to_string();
            }
            if let Some(m) = alert.get("userMessage").and_then(|v| v.as_str()) {
                stored.message = m.to_string();
            }
            reported.push((code, stored.active));
            current.insert(code, stored);
        }

        let mut cleared: Vec<u16> = self
            .alerts
            .iter()
            .filter(|(code, alert)| alert.active && !current.contains_key(code))
            .map(|(code, _)| *code)
            .collect();
        cleared.sort_unstable();
        reported.extend(cleared.into_iter().map(|code| (code, false)));

        self.alerts = current;
        self.hp_low_ambient_lockout = self.alert_active(ALERT_HP_LOW_AMBIENT_LOCKOUT);
        self.aux_heat_high_ambient_lockout = self.alert_active(ALERT_AUX_HIGH_AMBIENT_LOCKOUT);
        reported
    }

    fn alert_active(&self, code: u16) -> bool {
        self.alerts.get(&code).is_some_and(|a| a.active)
    }
}

use serde_json::Value;

use crate::schedule::{Period, manual_schedule_id, override_schedule_id, temperature_field as pair};
use crate::types::*;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScheduleHold {
    pub schedule_id: u32,
    pub enabled: bool,
    pub exception_type: String,
    pub expiration_mode: String,
    pub expires_on: String,
}

/// Installer-configured setpoint bounds for a zone.
#[derive(Debug, Clone, Default)]
pub struct SetpointLimits {
    pub min_heat: Option<Temperature>,
    pub max_heat: Option<Temperature>,
    pub min_cool: Option<Temperature>,
    pub max_cool: Option<Temperature>,
    pub min_humidify: Option<u8>,
    pub max_humidify: Option<u8>,
    pub min_dehumidify: Option<u8>,
    pub max_dehumidify: Option<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct Zone {
    pub id: u8,
    pub name: String,
    pub temperature: Option<Temperature>,
    pub humidity: Option<f64>,
    /// Currently effective period, whichever schedule it comes from.
    pub period: Period,
    pub fan_running: bool,
    pub operating: OperatingState,
    pub aux_heat: bool,
    pub humidity_operation: HumidityOperation,
    pub damper: Option<f64>,
    pub demand: Option<f64>,
    pub schedule_id: Option<u32>,
    pub schedule_hold: Option<ScheduleHold>,
    pub override_active: bool,
    pub limits: SetpointLimits,
    pub heating_option: bool,
    pub cooling_option: bool,
    pub emergency_heating_option: bool,
    pub humidification_option: bool,
    pub dehumidification_option: bool,
}

fn percent(data: &Value, key: &str) -> Option<u8> {
    data.get(key).and_then(|v| v.as_u64()).map(|v| v.min(100) as u8)
}

impl Zone {
    pub fn new(id: u8) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    /// True once the controller has reported a temperature or period.
    pub fn has_data(&self) -> bool {
        self.temperature.is_some() || !self.period.is_empty()
    }

    pub fn mode(&self) -> Option<HvacMode> {
        self.period.system_mode
    }

    pub fn fan_mode(&self) -> Option<FanMode> {
        self.period.fan_mode
    }

    pub fn humidity_mode(&self) -> Option<HumidityMode> {
        self.period.humidity_mode
    }

    pub fn heat_setpoint(&self) -> Option<Temperature> {
        self.period.heat_setpoint
    }

    pub fn cool_setpoint(&self) -> Option<Temperature> {
        self.period.cool_setpoint
    }

    pub fn single_setpoint(&self) -> Option<Temperature> {
        self.period.setpoint
    }

    pub fn humidify_setpoint(&self) -> Option<u8> {
        self.period.humidify_setpoint
    }

    pub fn dehumidify_setpoint(&self) -> Option<u8> {
        self.period.dehumidify_setpoint
    }

    pub fn manual_schedule_id(&self) -> u32 {
        manual_schedule_id(self.id)
    }

    pub fn override_schedule_id(&self) -> u32 {
        override_schedule_id(self.id)
    }

    pub fn is_manual_mode(&self) -> bool {
        self.schedule_id == Some(self.manual_schedule_id())
    }

    pub fn is_override_active(&self) -> bool {
        self.override_active
    }

    /// Apply one entry of a `zones[]` delta.
    pub fn apply(&mut self, data: &Value) {
        if let Some(name) = data.get("name").and_then(|v| v.as_str()) {
            self.name = name.to_string();
        } else if let Some(name) = data.pointer("/config/name").and_then(|v| v.as_str()) {
            self.name = name.to_string();
        }

        if let Some(status) = data.get("status") {
            self.apply_status(status);
        }
        if let Some(config) = data.get("config") {
            self.apply_config(config);
        }
    }

    fn apply_status(&mut self, status: &Value) {
        if let Some(t) = pair(status, "temperature", "temperatureC") {
            self.temperature = Some(t);
        }
        if let Some(h) = status.get("humidity").and_then(|v| v.as_f64()) {
            self.humidity = Some(h);
        }
        if let Some(period) = status.get("period") {
            self.period.apply(period);
        }
        if let Some(fan) = status.get("fan").and_then(|v| v.as_bool()) {
            self.fan_running = fan;
        }
        if let Some(op) = status.get("tempOperation").and_then(|v| v.as_str()) {
            self.operating = OperatingState::from_lennox_str(op).unwrap_or_default();
        }
        if let Some(op) = status.get("humOperation").and_then(|v| v.as_str()) {
            self.humidity_operation = HumidityOperation::from_lennox_str(op).unwrap_or_default();
        }
        if let Some(aux) = status.get("aux").and_then(|v| v.as_bool()) {
            self.aux_heat = aux;
        }
        if let Some(damper) = status.get("damper").and_then(|v| v.as_f64()) {
            self.damper = Some(damper);
        }
        if let Some(demand) = status.get("demand").and_then(|v| v.as_f64()) {
            self.demand = Some(demand);
        }
    }

    fn apply_config(&mut self, config: &Value) {
        if let Some(sched_id) = config
            .get("scheduleId")
            .and_then(|v| v.as_u64())
            .and_then(|v| u32::try_from(v).ok())
        {
            self.schedule_id = Some(sched_id);
        }

        if let Some(hold) = config.get("scheduleHold") {
            let mut current = self.schedule_hold.take().unwrap_or_default();
            if let Some(id) = hold
                .get("scheduleId")
                .and_then(|v| v.as_u64())
                .and_then(|v| u32::try_from(v).ok())
            {
                current.schedule_id = id;
            }
            if let Some(enabled) = hold.get("enabled").and_then(|v| v.as_bool()) {
                current.enabled = enabled;
            }
            if let Some(s) = hold.get("exceptionType").and_then(|v| v.as_str()) {
                current.exception_type = s.to_string();
            }
            if let Some(s) = hold.get("expirationMode").and_then(|v| v.as_str()) {
                current.expiration_mode = s.to_string();
            }
            if let Some(s) = hold.get("expiresOn").and_then(|v| v.as_str()) {
                current.expires_on = s.to_string();
            }
            self.override_active =
                current.enabled && current.schedule_id == self.override_schedule_id();
            self.schedule_hold = Some(current);
        }

        let limits = &mut self.limits;
        if let Some(t) = pair(config, "minHsp", "minHspC") {
            limits.min_heat = Some(t);
        }
        if let Some(t) = pair(config, "maxHsp", "maxHspC") {
            limits.max_heat = Some(t);
        }
        if let Some(t) = pair(config, "minCsp", "minCspC") {
            limits.min_cool = Some(t);
        }
        if let Some(t) = pair(config, "maxCsp", "maxCspC") {
            limits.max_cool = Some(t);
        }
        if let Some(v) = percent(config, "minHumSp") {
            limits.min_humidify = Some(v);
        }
        if let Some(v) = percent(config, "maxHumSp") {
            limits.max_humidify = Some(v);
        }
        if let Some(v) = percent(config, "minDehumSp") {
            limits.min_dehumidify = Some(v);
        }
        if let Some(v) = percent(config, "maxDehumSp") {
            limits.max_dehumidify = Some(v);
        }

        for (key, slot) in [
            ("heatingOption", &mut self.heating_option),
            ("coolingOption", &mut self.cooling_option),
            ("emergencyHeatingOption", &mut self.emergency_heating_option),
            ("humidificationOption", &mut self.humidification_option),
            ("dehumidificationOption", &mut self.dehumidification_option),
        ] {
            if let Some(b) = config.get(key).and_then(|v| v.as_bool()) {
                *slot = b;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn apply_status_and_config() {
        let mut zone = Zone::new(0);
        zone.apply(&json!({
            "id": 0,
            "name": "Upstairs",
            "status": {
                "temperature": 71, "temperatureC": 21.5,
                "humidity": 42,
                "humOperation": "dehumidifying",
                "period": {"systemMode": "cool", "csp": 76, "cspC": 24.5, "fanMode": "circulate"}
            },
            "config": {
                "scheduleId": 16,
                "minCsp": 60, "minCspC": 15.5,
                "maxCsp": 99, "maxCspC": 37.0,
                "coolingOption": true
            }
        }));

        assert_eq!(zone.name, "Upstairs");
        assert_eq!(zone.mode(), Some(HvacMode::Cool));
        assert_eq!(zone.fan_mode(), Some(FanMode::Circulate));
        assert_eq!(zone.humidity_operation, HumidityOperation::Dehumidifying);
        assert!(zone.is_manual_mode());
        assert!(zone.cooling_option);
        assert_eq!(zone.limits.max_cool.unwrap().celsius(), 37.0);
        assert!(zone.has_data());
    }

    #[test]
    fn hold_on_override_schedule_marks_override() {
        let mut zone = Zone::new(1);
        zone.apply(&json!({"config": {"scheduleHold": {
            "scheduleId": 33, "enabled": true,
            "exceptionType": "hold", "expirationMode": "nextPeriod", "expiresOn": "0"
        }}}));
        assert!(zone.is_override_active());
        assert_eq!(zone.schedule_hold.as_ref().unwrap().expiration_mode, "nextPeriod");

        zone.apply(&json!({"config": {"scheduleHold": {"enabled": false}}}));
        assert!(!zone.is_override_active());
        assert_eq!(zone.schedule_hold.as_ref().unwrap().schedule_id, 33);
    }

    #[test]
    fn hold_on_other_schedule_is_not_override() {
        let mut zone = Zone::new(0);
        zone.apply(&json!({"config": {"scheduleHold": {"scheduleId": 24, "enabled": true}}}));
        assert!(!zone.is_override_active());
    }
}

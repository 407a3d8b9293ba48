//! Translating user intent into controller commands.
//!
//! A zone either runs its manual schedule (`16 + zone`), follows a user
//! schedule, or follows a user schedule with a hold pinning it to the
//! override schedule (`32 + zone`) until the next period. Setpoint-class
//! changes made while following a schedule create that override; mode-class
//! changes switch the zone to manual instead.

use serde_json::Value;

use crate::protocol::{schedule_period_data, set_manual_mode_data, set_schedule_hold_data};
use crate::schedule::Period;
use crate::types::Temperature;
use crate::zone::Zone;
use crate::{Error, Result};

/// Minimum gap between heat and cool setpoints.
pub const DEADBAND_C: f64 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChangeKind {
    /// Setpoints, humidity mode and humidity setpoints.
    Setpoint,
    /// HVAC mode and fan mode.
    Mode,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Command {
    pub action: &'static str,
    pub data: Value,
}

fn command(action: &'static str, data: Value) -> Command {
    Command { action, data }
}

/// The full period to write to the override schedule: whatever the zone
/// is running now, with `change` applied on top.
fn override_period(zone: &Zone, change: &Period) -> Period {
    let mut merged = zone.period.merged_with(change);
    merged.enabled = None;
    merged
}

/// Commands, in publish order, that apply `change` to `zone`.
pub(crate) fn plan_period_change(
    zone: &Zone,
    change: &Period,
    kind: ChangeKind,
    action: &'static str,
) -> Vec<Command> {
    let manual_id = zone.manual_schedule_id();
    let override_id = zone.override_schedule_id();

    if zone.is_override_active() {
        return vec![command(
            action,
            schedule_period_data(override_id, &override_period(zone, change)),
        )];
    }

    if zone.is_manual_mode() {
        return vec![command(action, schedule_period_data(manual_id, change))];
    }

    match kind {
        ChangeKind::Setpoint => vec![
            command(
                action,
                schedule_period_data(override_id, &override_period(zone, change)),
            ),
            command("set_schedule_hold", set_schedule_hold_data(zone.id, true)),
        ],
        ChangeKind::Mode => vec![
            command("set_manual_schedule", set_manual_mode_data(zone.id)),
            command(action, schedule_period_data(manual_id, change)),
        ],
    }
}

fn check_temperature(
    what: &'static str,
    temp: Temperature,
    min: Option<Temperature>,
    max: Option<Temperature>,
) -> Result<()> {
    let value = temp.to_lennox_celsius();
    let min_c = min.map(|t| t.to_lennox_celsius()).unwrap_or(f64::MIN);
    let max_c = max.map(|t| t.to_lennox_celsius()).unwrap_or(f64::MAX);
    if value < min_c || value > max_c {
        return Err(Error::OutOfRange {
            what,
            value,
            min: min_c,
            max: max_c,
        });
    }
    Ok(())
}

fn check_percent(what: &'static str, value: u8, min: Option<u8>, max: Option<u8>) -> Result<()> {
    let min = min.unwrap_or(0);
    let max = max.unwrap_or(100);
    if value < min || value > max {
        return Err(Error::OutOfRange {
            what,
            value: value as f64,
            min: min as f64,
            max: max as f64,
        });
    }
    Ok(())
}

fn rounded(temp: Temperature) -> Temperature {
    Temperature::from_celsius(temp.to_lennox_celsius())
}

/// New heat setpoint; the cool setpoint is pushed up to keep the deadband.
pub(crate) fn resolve_heat(zone: &Zone, temp: Temperature) -> Result<Period> {
    check_temperature("heat setpoint", temp, zone.limits.min_heat, zone.limits.max_heat)?;
    let hsp_c = temp.to_lennox_celsius();
    let min_cool = hsp_c + DEADBAND_C;

    let cool = match zone.cool_setpoint() {
        Some(c) if c.to_lennox_celsius() >= min_cool => rounded(c),
        _ => Temperature::from_celsius(min_cool),
    };

    Ok(Period {
        heat_setpoint: Some(rounded(temp)),
        cool_setpoint: Some(cool),
        ..Default::default()
    })
}

/// New cool setpoint; the heat setpoint is pulled down to keep the deadband.
pub(crate) fn resolve_cool(zone: &Zone, temp: Temperature) -> Result<Period> {
    check_temperature("cool setpoint", temp, zone.limits.min_cool, zone.limits.max_cool)?;
    let csp_c = temp.to_lennox_celsius();
    let max_heat = csp_c - DEADBAND_C;

    let heat = match zone.heat_setpoint() {
        Some(h) if h.to_lennox_celsius() <= max_heat => rounded(h),
        _ => Temperature::from_celsius(max_heat),
    };

    Ok(Period {
        heat_setpoint: Some(heat),
        cool_setpoint: Some(rounded(temp)),
        ..Default::default()
    })
}

/// Both setpoints at once. Deadband violations are rejected, not adjusted.
pub(crate) fn resolve_pair(zone: &Zone, heat: Temperature, cool: Temperature) -> Result<Period> {
    let hsp_c = heat.to_lennox_celsius();
    let csp_c = cool.to_lennox_celsius();
    if csp_c < hsp_c + DEADBAND_C {
        return Err(Error::InvalidSetpoints {
            heat_c: hsp_c,
            cool_c: csp_c,
            deadband_c: DEADBAND_C,
        });
    }
    check_temperature("heat setpoint", heat, zone.limits.min_heat, zone.limits.max_heat)?;
    check_temperature("cool setpoint", cool, zone.limits.min_cool, zone.limits.max_cool)?;
    Ok(Period {
        heat_setpoint: Some(rounded(heat)),
        cool_setpoint: Some(rounded(cool)),
        ..Default::default()
    })
}

/// Single setpoint systems: bounded below by the heat limit and above by
/// the cool limit.
pub(crate) fn resolve_single(zone: &Zone, temp: Temperature) -> Result<Period> {
    check_temperature("setpoint", temp, zone.limits.min_heat, zone.limits.max_cool)?;
    Ok(Period {
        setpoint: Some(rounded(temp)),
        ..Default::default()
    })
}

pub(crate) fn resolve_humidify(zone: &Zone, percent: u8) -> Result<Period> {
    check_percent(
        "humidify setpoint",
        percent,
        zone.limits.min_humidify,
        zone.limits.max_humidify,
    )?;
    Ok(Period {
        humidify_setpoint: Some(percent),
        ..Default::default()
    })
}

pub(crate) fn resolve_dehumidify(zone: &Zone, percent: u8) -> Result<Period> {
    check_percent(
        "dehumidify setpoint",
        percent,
        zone.limits.min_dehumidify,
        zone.limits.max_dehumidify,
    )?;
    Ok(Period {
        dehumidify_setpoint: Some(percent),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FanMode, HvacMode};
    use serde_json::json;

    fn zone_following(schedule_id: u32) -> Zone {
        let mut zone = Zone::new(0);
        zone.apply(&json!({
            "status": {"period": {
                "startTime": 21600,
                "systemMode": "heat and cool",
                "hsp": 68, "hspC": 20.0,
                "csp": 76, "cspC": 24.5,
                "fanMode": "auto",
                "humidityMode": "off",
                "husp": 40, "desp": 50
            }},
            "config": {"scheduleId": schedule_id}
        }));
        zone
    }

    fn period_of(cmd: &Command) -> &Value {
        &cmd.data["schedules"][0]["schedule"]["periods"][0]["period"]
    }

    #[test]
    fn manual_zone_writes_only_changes_to_manual_schedule() {
        let zone = zone_following(16);
        let change = resolve_heat(&zone, Temperature::from_celsius(21.0)).unwrap();
        let cmds = plan_period_change(&zone, &change, ChangeKind::Setpoint, "set_heat_setpoint");

        assert_eq!(cmds.len(), 1);
        assert_eq!(cmds[0].data["schedules"][0]["id"], 16);
        let p = period_of(&cmds[0]);
        assert_eq!(p["hspC"], 21.0);
        assert!(p.get("systemMode").is_none());
    }

    #[test]
    fn scheduled_zone_setpoint_creates_override_and_hold() {
        let zone = zone_following(1);
        let change = resolve_heat(&zone, Temperature::from_celsius(21.0)).unwrap();
        let cmds = plan_period_change(&zone, &change, ChangeKind::Setpoint, "set_heat_setpoint");

        assert_eq!(cmds.len(), 2);
        assert_eq!(cmds[0].data["schedules"][0]["id"], 32);
        let p = period_of(&cmds[0]);
        assert_eq!(p["hspC"], 21.0);
        assert_eq!(p["cspC"], 24.5);
        assert_eq!(p["systemMode"], "heat and cool");
        assert_eq!(p["fanMode"], "auto");
        assert_eq!(p["startTime"], 21600);

        assert_eq!(cmds[1].action, "set_schedule_hold");
        let hold = &cmds[1].data["zones"][0]["config"]["scheduleHold"];
        assert_eq!(hold["scheduleId"], 32);
        assert_eq!(hold["enabled"], true);
    }

    #[test]
    fn active_override_is_updated_in_place() {
        let mut zone = zone_following(1);
        zone.apply(&json!({"config": {"scheduleHold": {"scheduleId": 32, "enabled": true}}}));
        let change = Period {
            fan_mode: Some(FanMode::On),
            ..Default::default()
        };
        let cmds = plan_period_change(&zone, &change, ChangeKind::Mode, "set_fan_mode");

        assert_eq!(cmds.len(), 1);
        assert_eq!(cmds[0].data["schedules"][0]["id"], 32);
        let p = period_of(&cmds[0]);
        assert_eq!(p["fanMode"], "on");
        assert_eq!(p["hspC"], 20.0);
    }

    #[test]
    fn scheduled_zone_mode_change_switches_to_manual() {
        let zone = zone_following(2);
        let change = Period {
            system_mode: Some(HvacMode::Cool),
            ..Default::default()
        };
        let cmds = plan_period_change(&zone, &change, ChangeKind::Mode, "set_hvac_mode");

        assert_eq!(cmds.len(), 2);
        assert_eq!(cmds[0].action, "set_manual_schedule");
        assert_eq!(cmds[0].data["zones"][0]["config"]["scheduleId"], 16);
        assert_eq!(cmds[1].data["schedules"][0]["id"], 16);
        assert_eq!(period_of(&cmds[1])["systemMode"], "cool");
    }

    #[test]
    fn heat_pushes_cool_to_keep_deadband() {
        let zone = zone_following(16);
        let p = resolve_heat(&zone, Temperature::from_celsius(24.0)).unwrap();
        assert_eq!(p.heat_setpoint.unwrap().celsius(), 24.0);
        assert_eq!(p.cool_setpoint.unwrap().celsius(), 25.5);
    }

    #[test]
    fn heat_keeps_cool_when_gap_sufficient() {
        let zone = zone_following(16);
        let p = resolve_heat(&zone, Temperature::from_fahrenheit(70.0)).unwrap();
        assert_eq!(p.cool_setpoint.unwrap().celsius(), 24.5);
    }

    #[test]
    fn cool_pulls_heat_to_keep_deadband() {
        let zone = zone_following(16);
        let p = resolve_cool(&zone, Temperature::from_celsius(21.0)).unwrap();
        assert_eq!(p.heat_setpoint.unwrap().celsius(), 19.5);
        assert_eq!(p.cool_setpoint.unwrap().celsius(), 21.0);
    }

    #[test]
    fn pair_rejects_deadband_violation() {
        let zone = zone_following(16);
        let err = resolve_pair(
            &zone,
            Temperature::from_fahrenheit(72.0),
            Temperature::from_fahrenheit(73.0),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidSetpoints { .. }));
    }

    #[test]
    fn limits_are_enforced() {
        let mut zone = zone_following(16);
        zone.apply(&json!({"config": {
            "maxHsp": 90, "maxHspC": 32.0,
            "minHumSp": 15, "maxHumSp": 45
        }}));
        let err = resolve_heat(&zone, Temperature::from_celsius(33.0)).unwrap_err();
        assert!(matches!(err, Error::OutOfRange { what: "heat setpoint", .. }));
        assert!(resolve_humidify(&zone, 50).is_err());
        assert_eq!(resolve_humidify(&zone, 40).unwrap().humidify_setpoint, Some(40));
        assert!(resolve_dehumidify(&zone, 100).is_ok());
    }

    #[test]
    fn single_setpoint_rounds() {
        let zone = zone_following(16);
        let p = resolve_single(&zone, Temperature::from_celsius(21.3)).unwrap();
        assert_eq!(p.setpoint.unwrap().celsius(), 21.5);
        assert!(p.heat_setpoint.is_none());
    }
}

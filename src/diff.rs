use serde_json::{Map, Value};

use crate::types::*;

/// Fahrenheit field names and their Celsius companions.
const TEMPERATURE_PAIRS: &[(&str, &str)] = &[
    ("temperature", "temperatureC"),
    ("hsp", "hspC"),
    ("csp", "cspC"),
    ("sp", "spC"),
    ("outdoorTemperature", "outdoorTemperatureC"),
    ("maxHsp", "maxHspC"),
    ("minHsp", "minHspC"),
    ("maxCsp", "maxCspC"),
    ("minCsp", "minCspC"),
];

/// What part of a system a change belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    System,
    Zone(u8),
    Equipment(u16),
}

pub(crate) type Changes = Vec<(String, Value, Value)>;

/// Collect changed leaves between two JSON trees as `(dotted path, old, new)`.
/// Keys missing from `current` are not reported: deltas only carry what
/// changed.
pub(crate) fn diff_json(previous: &Value, current: &Value, prefix: &str, out: &mut Changes) {
    let (Value::Object(before), Value::Object(after)) = (previous, current) else {
        if previous != current {
            out.push((prefix.to_string(), previous.clone(), current.clone()));
        }
        return;
    };

    let empty = Value::Object(Map::new());
    for (key, value) in after {
        let path = join(prefix, key);
        match before.get(key) {
            Some(old) => diff_json(old, value, &path, out),
            None if value.is_object() => diff_json(&empty, value, &path, out),
            None => out.push((path, Value::Null, value.clone())),
        }
    }
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

/// Recursively merge a delta into accumulated state. Arrays and scalars are
/// replaced wholesale.
pub(crate) fn deep_merge(target: &mut Value, source: &Value) {
    match (target, source) {
        (Value::Object(t), Value::Object(s)) => {
            for (k, v) in s {
                deep_merge(t.entry(k.clone()).or_insert(Value::Null), v);
            }
        }
        (t, s) => {
            *t = s.clone();
        }
    }
}

/// Build a `Temperature` from the F field and its C companion in `parent`.
fn folded_temperature(f_field: &str, parent: &Value) -> Option<Temperature> {
    let (_, c_field) = TEMPERATURE_PAIRS.iter().find(|(f, _)| *f == f_field)?;
    let f = parent.get(f_field)?.as_f64()?;
    let c = parent.get(*c_field)?.as_f64()?;
    Some(Temperature::from_pair(f, c))
}

/// The object holding the leaf at `path`, looked up in `root`.
fn parent_of<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    match path.rsplit_once('.') {
        Some((parent, _)) => root.pointer(&format!("/{}", parent.replace('.', "/"))),
        None => Some(root),
    }
}

/// Typed event for a well-known leaf, if there is one. `section` is the
/// system or zone object the delta came in.
pub(crate) fn map_typed_event(
    scope: Scope,
    path: &str,
    new_value: &Value,
    zone_name: &str,
    section: &Value,
) -> Option<Event> {
    match scope {
        Scope::System if path == "status.outdoorTemperature" => {
            let temp = folded_temperature("outdoorTemperature", section.get("status")?)?;
            Some(Event::OutdoorTempChanged { temp })
        }
        Scope::Zone(zone_id) => zone_event(zone_id, zone_name.to_string(), path, new_value, section),
        _ => None,
    }
}

fn zone_event(zone_id: u8, name: String, path: &str, new_value: &Value, zone: &Value) -> Option<Event> {
    let status = zone.get("status").unwrap_or(&Value::Null);
    let period = status.get("period").unwrap_or(&Value::Null);

    let event = match path {
        "status.temperature" => Event::ZoneTemperatureChanged {
            zone_id,
            name,
            temp: folded_temperature("temperature", status)?,
        },
        "status.humidity" => Event::ZoneHumidityChanged {
            zone_id,
            name,
            humidity: new_value.as_f64()?,
        },
        "status.period.systemMode" => Event::ZoneModeChanged {
            zone_id,
            name,
            mode: HvacMode::from_lennox_str(new_value.as_str()?)?,
        },
        "status.tempOperation" => Event::ZoneOperatingChanged {
            zone_id,
            name,
            state: new_value
                .as_str()
                .and_then(OperatingState::from_lennox_str)
                .unwrap_or_default(),
            aux: status.get("aux").and_then(Value::as_bool).unwrap_or(false),
        },
        "status.period.hsp" | "status.period.csp" => Event::ZoneSetpointsChanged {
            zone_id,
            name,
            heat: folded_temperature("hsp", period),
            cool: folded_temperature("csp", period),
        },
        "status.period.fanMode" | "status.fan" => Event::ZoneFanChanged {
            zone_id,
            name,
            mode: period
                .get("fanMode")
                .and_then(Value::as_str)
                .and_then(FanMode::from_lennox_str)
                .unwrap_or(FanMode::Auto),
            running: status.get("fan").and_then(Value::as_bool).unwrap_or(false),
        },
        "config.scheduleId" => Event::ZoneScheduleChanged {
            zone_id,
            name,
            schedule_id: u32::try_from(new_value.as_u64()?).ok()?,
        },
        _ => return None,
    };
    Some(event)
}

/// Fallback event for a changed leaf. F temperature fields are folded with
/// their Celsius companion from `root`; the companions themselves are
/// suppressed.
pub(crate) fn generic_event(scope: Scope, path: &str, value: &Value, root: &Value) -> Option<Event> {
    let leaf = path.rsplit('.').next().unwrap_or(path);
    if TEMPERATURE_PAIRS.iter().any(|(_, c)| *c == leaf) {
        return None;
    }

    let folded = parent_of(root, path).and_then(|parent| folded_temperature(leaf, parent));
    let value = match (folded, value) {
        (Some(temp), _) => LeafValue::Temperature(temp),
        (None, Value::Number(n)) => LeafValue::Number(n.as_f64()?),
        (None, Value::String(s)) => LeafValue::Text(s.clone()),
        (None, Value::Bool(b)) => LeafValue::Bool(*b),
        _ => return None,
    };

    Some(Event::Attribute {
        scope,
        path: path.to_string(),
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn diff(prev: &Value, curr: &Value) -> Changes {
        let mut out = vec![];
        diff_json(prev, curr, "", &mut out);
        out
    }

    #[test]
    fn diff_reports_changed_leaf_with_old_and_new() {
        let changes = diff(
            &json!({"status": {"temperature": 71.0}}),
            &json!({"status": {"temperature": 72.0}}),
        );
        assert_eq!(
            changes,
            vec![("status.temperature".to_string(), json!(71.0), json!(72.0))]
        );
    }

    #[test]
    fn diff_of_identical_trees_is_empty() {
        let val = json!({"status": {"temperature": 71.0, "humidity": 45.0}});
        assert!(diff(&val, &val).is_empty());
    }

    #[test]
    fn diff_ignores_keys_missing_from_delta() {
        let changes = diff(
            &json!({"status": {"temperature": 71.0, "humidity": 45.0}}),
            &json!({"status": {"humidity": 46.0}}),
        );
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].0, "status.humidity");
    }

    #[test]
    fn diff_walks_into_new_objects() {
        let changes = diff(&json!({}), &json!({"config": {"scheduleHold": {"enabled": true}}}));
        assert_eq!(changes[0].0, "config.scheduleHold.enabled");
        assert_eq!(changes[0].1, Value::Null);
    }

    #[test]
    fn deep_merge_keeps_untouched_keys() {
        let mut state = json!({"status": {"temperature": 71, "humidity": 45}});
        deep_merge(&mut state, &json!({"status": {"humidity": 50}}));
        assert_eq!(state, json!({"status": {"temperature": 71, "humidity": 50}}));
    }

    #[test]
    fn outdoor_temperature_uses_celsius_companion() {
        let system = json!({"status": {"outdoorTemperature": 72, "outdoorTemperatureC": 22.0}});
        let event = map_typed_event(Scope::System, "status.outdoorTemperature", &json!(72), "", &system);
        match event {
            Some(Event::OutdoorTempChanged { temp }) => assert_eq!(temp.celsius(), 22.0),
            other => panic!("expected OutdoorTempChanged, got {other:?}"),
        }
    }

    #[test]
    fn celsius_companion_suppressed() {
        let root = json!({"status": {"outdoorTemperatureC": 22.0}});
        let event = generic_event(Scope::System, "status.outdoorTemperatureC", &json!(22.0), &root);
        assert!(event.is_none());
    }

    #[test]
    fn generic_temperature_folds_pair() {
        let root = json!({"config": {"maxHsp": 90, "maxHspC": 32.0}});
        let event = generic_event(Scope::Zone(2), "config.maxHsp", &json!(90), &root);
        match event {
            Some(Event::Attribute {
                scope: Scope::Zone(2),
                path,
                value: LeafValue::Temperature(temp),
            }) => {
                assert_eq!(path, "config.maxHsp");
                assert_eq!(temp.celsius(), 32.0);
            }
            other => panic!("expected folded zone temperature, got {other:?}"),
        }
    }

    #[test]
    fn unknown_leaves_become_attribute_events() {
        let root = json!({});
        let event = generic_event(Scope::System, "status.someUnknownField", &json!(42.5), &root);
        assert!(matches!(
            event,
            Some(Event::Attribute { scope: Scope::System, value: LeafValue::Number(v), .. }) if v == 42.5
        ));

        let event = generic_event(Scope::Zone(0), "config.enabled", &json!(true), &root);
        assert!(matches!(
            event,
            Some(Event::Attribute { scope: Scope::Zone(0), value: LeafValue::Bool(true), .. })
        ));

        let event = generic_event(Scope::Equipment(1), "status.stage", &json!("high"), &root);
        match event {
            Some(Event::Attribute { scope: Scope::Equipment(1), value: LeafValue::Text(s), .. }) => {
                assert_eq!(s, "high")
            }
            other => panic!("expected equipment text attribute, got {other:?}"),
        }

        assert!(generic_event(Scope::System, "status.list", &json!([1, 2]), &root).is_none());
    }

    #[test]
    fn zone_schedule_change_is_typed() {
        let event = map_typed_event(Scope::Zone(1), "config.scheduleId", &json!(17), "Den", &json!({}));
        assert!(matches!(
            event,
            Some(Event::ZoneScheduleChanged { zone_id: 1, schedule_id: 17, .. })
        ));
    }

    #[test]
    fn zone_setpoints_from_period() {
        let zone = json!({
            "status": {"period": {"hsp": 70, "hspC": 21.0, "csp": 76, "cspC": 24.5}}
        });
        let event = map_typed_event(Scope::Zone(0), "status.period.hsp", &json!(70), "Main", &zone);
        match event {
            Some(Event::ZoneSetpointsChanged { heat, cool, name, .. }) => {
                assert_eq!(name, "Main");
                assert_eq!(heat.unwrap().celsius(), 21.0);
                assert_eq!(cool.unwrap().celsius(), 24.5);
            }
            other => panic!("expected ZoneSetpointsChanged, got {other:?}"),
        }
    }

    #[test]
    fn zone_fan_reads_mode_and_running() {
        let zone = json!({"status": {"fan": true, "period": {"fanMode": "circulate"}}});
        let event = map_typed_event(Scope::Zone(0), "status.fan", &json!(true), "Main", &zone);
        assert!(matches!(
            event,
            Some(Event::ZoneFanChanged { mode: FanMode::Circulate, running: true, .. })
        ));
    }

    #[test]
    fn system_scope_only_types_outdoor_temperature() {
        let event = map_typed_event(Scope::System, "status.temperature", &json!(70), "", &json!({}));
        assert!(event.is_none());
    }
}

use serde_json::{Value, json};
use uuid::Uuid;

use crate::schedule::{Period, manual_schedule_id, override_schedule_id};
use crate::system::Home;

pub const DEFAULT_APP_ID: &str = "lennox_s30";

/// Sender id the controller uses for itself on the LAN API.
pub const TARGET_LCC: &str = "LCC";

const SUBSCRIBE_PATHS: &str = "1;\
    /zones;/occupancy;/schedules;/system;/equipments;\
    /devices;/systemController;/reminderSensors;/reminders;\
    /alerts/active;/alerts/meta;/indoorAirQuality;\
    /fwm;/rgw;/ble;/bleProvisionDB";

/// Cloud app ids must look like the vendor mobile app's: `mapp` + digits.
pub fn cloud_app_id() -> String {
    let digits: String = Uuid::new_v4()
        .as_u128()
        .to_string()
        .chars()
        .take(21)
        .collect();
    format!("mapp{digits:0>21}")
}

pub fn subscribe_message(app_id: &str, target: &str) -> Value {
    json!({
        "MessageType": "RequestData",
        "SenderID": app_id,
        "MessageID": Uuid::new_v4().to_string(),
        "TargetID": target,
        "AdditionalParameters": {
            "JSONPath": SUBSCRIBE_PATHS
        }
    })
}

pub fn command_message(app_id: &str, target: &str, data: Value) -> Value {
    json!({
        "MessageType": "Command",
        "SenderID": app_id,
        "MessageID": Uuid::new_v4().to_string(),
        "TargetID": target,
        "Data": data
    })
}

pub fn schedule_period_data(schedule_id: u32, period: &Period) -> Value {
    json!({
        "schedules": [{
            "schedule": {
                "periods": [{
                    "id": 0,
                    "period": period.to_json()
                }]
            },
            "id": schedule_id
        }]
    })
}

pub fn set_zone_schedule_data(zone_id: u8, schedule_id: u32) -> Value {
    json!({
        "zones": [{
            "config": { "scheduleId": schedule_id },
            "id": zone_id
        }]
    })
}

pub fn set_manual_mode_data(zone_id: u8) -> Value {
    set_zone_schedule_data(zone_id, manual_schedule_id(zone_id))
}

/// Enable or cancel the hold that pins a zone to its override schedule
/// until the next scheduled period.
pub fn set_schedule_hold_data(zone_id: u8, enabled: bool) -> Value {
    json!({
        "zones": [{
            "config": {
                "scheduleHold": {
                    "scheduleId": override_schedule_id(zone_id),
                    "exceptionType": "hold",
                    "enabled": enabled,
                    "expiresOn": "0",
                    "expirationMode": "nextPeriod"
                }
            },
            "id": zone_id
        }]
    })
}

pub fn set_manual_away_data(away: bool) -> Value {
    json!({ "occupancy": { "manualAway": away } })
}

pub fn set_ventilation_mode_data(mode: &str) -> Value {
    json!({ "system": { "config": { "ventilationMode": mode } } })
}

pub fn set_circulate_time_data(percent: u8) -> Value {
    json!({ "system": { "config": { "circulateTime": percent } } })
}

pub fn set_diag_level_data(level: u8) -> Value {
    json!({ "systemControl": { "diagControl": { "level": level } } })
}

pub fn set_parameter_data(equip_type: u16, pid: u16, value: &str) -> Value {
    json!({
        "systemControl": {
            "parameterUpdate": {
                "et": equip_type,
                "pid": pid,
                "value": value
            }
        }
    })
}

/// A data payload pulled off the retrieve endpoint.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub sender_id: String,
    pub data: Value,
}

/// Parse a retrieve body into `(sender, Data)` pairs. Messages without a
/// sender or a `Data` object are skipped; unparseable bodies yield nothing.
pub fn parse_retrieve_response(body: &str) -> Vec<Inbound> {
    let parsed: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(_) => return vec![],
    };
    let messages = match parsed.get("messages") {
        Some(Value::Array(msgs)) => msgs,
        _ => return vec![],
    };
    messages
        .iter()
        .filter_map(|msg| {
            let sender = msg.get("SenderID").or_else(|| msg.get("SenderId"))?;
            let data = msg.get("Data")?;
            Some(Inbound {
                sender_id: sender.as_str()?.to_string(),
                data: data.clone(),
            })
        })
        .collect()
}

pub fn parse_certificate_token(body: &Value) -> Option<String> {
    body.pointer("/serverAssigned/security/certificateToken/encoded")
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

/// Login yields the bearer token for every later call and the account's
/// homes with their system ids.
pub fn parse_login_response(body: &Value) -> Option<(String, Vec<Home>)> {
    let token = body
        .pointer("/ServerAssigned/Security/UserToken/encoded")
        .and_then(|v| v.as_str())?
        .to_string();
    let homes = body
        .pointer("/readyHomes/homes")
        .and_then(|v| v.as_array())
        .map(|homes| homes.iter().filter_map(Home::from_json).collect())
        .unwrap_or_default();
    Some((token, homes))
}

pub fn parse_negotiate_response(body: &Value) -> Option<String> {
    body.get("ConnectionId")
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HvacMode, Temperature};

    #[test]
    fn subscribe_message_structure() {
        let msg = subscribe_message("test_app", TARGET_LCC);
        assert_eq!(msg["MessageType"], "RequestData");
        assert_eq!(msg["SenderID"], "test_app");
        assert_eq!(msg["TargetID"], "LCC");
        assert!(msg["AdditionalParameters"]["JSONPath"].as_str().unwrap().contains("/zones"));
    }

    #[test]
    fn command_message_structure() {
        let msg = command_message("test_app", "sys-1", json!({"zones": []}));
        assert_eq!(msg["MessageType"], "Command");
        assert_eq!(msg["SenderID"], "test_app");
        assert_eq!(msg["TargetID"], "sys-1");
        assert!(msg["Data"]["zones"].is_array());
        assert!(!msg["MessageID"].as_str().unwrap().is_empty());
    }

    #[test]
    fn cloud_app_id_shape() {
        let id = cloud_app_id();
        assert!(id.starts_with("mapp"));
        assert_eq!(id.len(), 25);
        assert!(id[4..].chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn parse_retrieve_with_messages() {
        let body = r#"{"messages": [{"SenderID": "LCC", "Data": {"system": {"status": {"outdoorTemperature": 72}}}}]}"#;
        let data = parse_retrieve_response(body);
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].sender_id, "LCC");
        assert_eq!(data[0].data["system"]["status"]["outdoorTemperature"], 72);
    }

    #[test]
    fn parse_retrieve_accepts_both_sender_spellings() {
        let body = r#"{"messages": [
            {"SenderId": "sys-1", "Data": {"zones": []}},
            {"SenderID": "LCC", "Data": {"system": {}}},
            {"SenderID": "LCC"}
        ]}"#;
        let data = parse_retrieve_response(body);
        assert_eq!(data.len(), 2);
        assert_eq!(data[0].sender_id, "sys-1");
    }

    #[test]
    fn parse_retrieve_empty() {
        assert!(parse_retrieve_response("").is_empty());
        assert!(parse_retrieve_response(r#"{"nope": 1}"#).is_empty());
    }

    #[test]
    fn hold_payload() {
        let data = set_schedule_hold_data(2, true);
        let hold = &data["zones"][0]["config"]["scheduleHold"];
        assert_eq!(hold["scheduleId"], 34);
        assert_eq!(hold["enabled"], true);
        assert_eq!(hold["expirationMode"], "nextPeriod");
        assert_eq!(data["zones"][0]["id"], 2);
    }

    #[test]
    fn period_payload_targets_schedule() {
        let period = Period {
            system_mode: Some(HvacMode::Heat),
            heat_setpoint: Some(Temperature::from_celsius(21.0)),
            ..Default::default()
        };
        let data = schedule_period_data(16, &period);
        assert_eq!(data["schedules"][0]["id"], 16);
        let p = &data["schedules"][0]["schedule"]["periods"][0]["period"];
        assert_eq!(p["systemMode"], "heat");
        assert_eq!(p["hspC"], 21.0);
        assert_eq!(p["hsp"], 70);
    }

    #[test]
    fn login_response_parsing() {
        let body = json!({
            "ServerAssigned": {"Security": {"UserToken": {"encoded": "abc"}}},
            "readyHomes": {"homes": [
                {"homeId": 7, "name": "Home", "systems": [{"sysId": "s1"}, {"sysId": "s2"}]}
            ]}
        });
        let (token, homes) = parse_login_response(&body).unwrap();
        assert_eq!(token, "abc");
        assert_eq!(homes[0].system_ids, vec!["s1", "s2"]);
        assert!(parse_login_response(&json!({})).is_none());
    }
}

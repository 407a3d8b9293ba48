use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::warn;

use crate::diff::{deep_merge, diff_json};
use crate::protocol::parse_retrieve_response;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageLogMode {
    /// Every poll body verbatim.
    Full,
    /// First message per sender in full, then only changed leaves.
    Diffed,
}

/// Appends one NDJSON line per request, command and poll.
pub(crate) struct MessageLogger {
    mode: MessageLogMode,
    file: File,
    previous_state: HashMap<String, Value>,
}

impl MessageLogger {
    pub fn new(mode: MessageLogMode, path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            mode,
            file,
            previous_state: HashMap::new(),
        })
    }

    pub fn log_request(&mut self, method: &str, url: &str, body: Option<&Value>) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "req",
            "method": method,
            "url": url,
            "body": body,
        });
        self.write_line(&entry);
    }

    pub fn log_command(&mut self, action: &str, target: &str, zone: Option<u8>, body: &Value) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "cmd",
            "action": action,
            "target": target,
            "zone": zone,
            "body": body,
        });
        self.write_line(&entry);
    }

    pub fn log_poll(&mut self, status: u16, body: &str) {
        if status != 200 {
            let entry = json!({
                "ts": Utc::now().to_rfc3339(),
                "dir": "poll",
                "status": status,
            });
            self.write_line(&entry);
            return;
        }

        match self.mode {
            MessageLogMode::Full => {
                let parsed = serde_json::from_str::<Value>(body).unwrap_or(Value::Null);
                let entry = json!({
                    "ts": Utc::now().to_rfc3339(),
                    "dir": "poll",
                    "status": status,
                    "body": parsed,
                });
                self.write_line(&entry);
            }
            MessageLogMode::Diffed => {
                for inbound in parse_retrieve_response(body) {
                    let entry = match self.previous_state.get(&inbound.sender_id) {
                        None => json!({
                            "ts": Utc::now().to_rfc3339(),
                            "dir": "poll",
                            "status": status,
                            "sender": inbound.sender_id,
                            "full": true,
                            "body": inbound.data,
                        }),
                        Some(prev) => {
                            let mut changes = Vec::new();
                            diff_json(prev, &inbound.data, "", &mut changes);
                            let change_entries: Vec<Value> = changes
                                .iter()
                                .map(|(path, old, new)| json!({ "path": path, "old": old, "new": new }))
                                .collect();
                            json!({
                                "ts": Utc::now().to_rfc3339(),
                                "dir": "poll",
                                "status": status,
                                "sender": inbound.sender_id,
                                "changes": change_entries,
                            })
                        }
                    };
                    self.write_line(&entry);
                    deep_merge(
                        self.previous_state.entry(inbound.sender_id).or_insert(Value::Null),
                        &inbound.data,
                    );
                }
            }
        }
    }

    fn write_line(&mut self, entry: &Value) {
        if let Ok(line) = serde_json::to_string(entry)
            && let Err(e) = writeln!(self.file, "{line}")
        {
            warn!("failed to write log entry: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn read_lines(tmp: &NamedTempFile) -> Vec<Value> {
        std::fs::read_to_string(tmp.path())
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    fn poll_body(sender: &str, outdoor: i64) -> String {
        json!({"messages": [{"SenderID": sender, "Data": {"system": {"status": {"outdoorTemperature": outdoor}}}}]})
            .to_string()
    }

    #[test]
    fn log_request_writes_ndjson() {
        let tmp = NamedTempFile::new().unwrap();
        let mut logger = MessageLogger::new(MessageLogMode::Full, tmp.path()).unwrap();
        logger.log_request("POST", "https://10.0.0.5/Endpoints/app/Connect", None);

        let lines = read_lines(&tmp);
        assert_eq!(lines[0]["dir"], "req");
        assert_eq!(lines[0]["method"], "POST");
        assert!(lines[0]["ts"].as_str().is_some());
    }

    #[test]
    fn diffed_mode_tracks_each_sender() {
        let tmp = NamedTempFile::new().unwrap();
        let mut logger = MessageLogger::new(MessageLogMode::Diffed, tmp.path()).unwrap();

        logger.log_poll(200, &poll_body("sys-a", 72));
        logger.log_poll(200, &poll_body("sys-b", 40));
        logger.log_poll(200, &poll_body("sys-a", 74));

        let lines = read_lines(&tmp);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["full"], true);
        assert_eq!(lines[1]["full"], true);
        assert_eq!(lines[1]["sender"], "sys-b");
        let changes = lines[2]["changes"].as_array().unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0]["path"], "system.status.outdoorTemperature");
        assert_eq!(changes[0]["new"], 74);
    }

    #[test]
    fn diffed_mode_remembers_fields_missing_from_later_deltas() {
        let tmp = NamedTempFile::new().unwrap();
        let mut logger = MessageLogger::new(MessageLogMode::Diffed, tmp.path()).unwrap();
        let body = |data: Value| json!({"messages": [{"SenderID": "LCC", "Data": data}]}).to_string();

        logger.log_poll(200, &body(json!({"system": {"status": {"outdoorTemperature": 72}}})));
        logger.log_poll(200, &body(json!({"occupancy": {"manualAway": false}})));
        logger.log_poll(200, &body(json!({"system": {"status": {"outdoorTemperature": 72}}})));

        let lines = read_lines(&tmp);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1]["changes"][0]["path"], "occupancy.manualAway");
        assert_eq!(lines[2]["changes"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn diffed_mode_no_changes_logs_empty_array() {
        let tmp = NamedTempFile::new().unwrap();
        let mut logger = MessageLogger::new(MessageLogMode::Diffed, tmp.path()).unwrap();
        logger.log_poll(200, &poll_body("LCC", 72));
        logger.log_poll(200, &poll_body("LCC", 72));

        let lines = read_lines(&tmp);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["changes"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn log_poll_without_body() {
        let tmp = NamedTempFile::new().unwrap();
        let mut logger = MessageLogger::new(MessageLogMode::Full, tmp.path()).unwrap();
        logger.log_poll(204, "");

        let lines = read_lines(&tmp);
        assert_eq!(lines[0]["dir"], "poll");
        assert_eq!(lines[0]["status"], 204);
        assert!(lines[0].get("body").is_none());
    }

    #[test]
    fn log_command_captures_target_and_zone() {
        let tmp = NamedTempFile::new().unwrap();
        let mut logger = MessageLogger::new(MessageLogMode::Full, tmp.path()).unwrap();
        logger.log_command("set_hvac_mode", "LCC", Some(0), &json!({"systemMode": "heat"}));

        let lines = read_lines(&tmp);
        assert_eq!(lines[0]["dir"], "cmd");
        assert_eq!(lines[0]["action"], "set_hvac_mode");
        assert_eq!(lines[0]["target"], "LCC");
        assert_eq!(lines[0]["zone"], 0);
    }
}

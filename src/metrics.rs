use std::collections::HashMap;

use chrono::{DateTime, Utc};

/// Counters describing traffic with the controller or relay.
#[derive(Debug, Clone)]
pub struct Metrics {
    pub message_count: u64,
    pub receive_count: u64,
    pub send_count: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub error_count: u64,
    pub http_2xx: u64,
    pub http_4xx: u64,
    pub http_5xx: u64,
    pub timeouts: u64,
    pub dropped_messages: u64,
    pub sender_message_count: HashMap<String, u64>,
    pub last_receive_time: Option<DateTime<Utc>>,
    pub last_send_time: Option<DateTime<Utc>>,
    pub last_error_time: Option<DateTime<Utc>>,
    pub last_reset: DateTime<Utc>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            message_count: 0,
            receive_count: 0,
            send_count: 0,
            bytes_in: 0,
            bytes_out: 0,
            error_count: 0,
            http_2xx: 0,
            http_4xx: 0,
            http_5xx: 0,
            timeouts: 0,
            dropped_messages: 0,
            sender_message_count: HashMap::new(),
            last_receive_time: None,
            last_send_time: None,
            last_error_time: None,
            last_reset: Utc::now(),
        }
    }
}

impl Metrics {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub(crate) fn record_status(&mut self, status: u16) {
        match status {
            200..=299 => self.http_2xx += 1,
            400..=499 => self.http_4xx += 1,
            500..=599 => self.http_5xx += 1,
            _ => {}
        }
    }

    pub(crate) fn record_send(&mut self, bytes: usize) {
        self.send_count += 1;
        self.bytes_out += bytes as u64;
        self.last_send_time = Some(Utc::now());
    }

    pub(crate) fn record_receive(&mut self, bytes: usize) {
        self.receive_count += 1;
        self.bytes_in += bytes as u64;
        self.last_receive_time = Some(Utc::now());
    }

    pub(crate) fn record_message(&mut self, sender: &str) {
        self.message_count += 1;
        *self
            .sender_message_count
            .entry(sender.to_string())
            .or_insert(0) += 1;
    }

    pub(crate) fn record_error(&mut self, timeout: bool) {
        self.error_count += 1;
        if timeout {
            self.timeouts += 1;
        }
        self.last_error_time = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_buckets() {
        let mut m = Metrics::default();
        m.record_status(200);
        m.record_status(204);
        m.record_status(401);
        m.record_status(502);
        assert_eq!((m.http_2xx, m.http_4xx, m.http_5xx), (2, 1, 1));
    }

    #[test]
    fn reset_clears_counters() {
        let mut m = Metrics::default();
        m.record_message("LCC");
        m.record_message("LCC");
        m.record_error(true);
        assert_eq!(m.sender_message_count["LCC"], 2);
        assert_eq!(m.timeouts, 1);
        assert!(m.last_error_time.is_some());
        m.reset();
        assert_eq!(m.message_count, 0);
        assert!(m.sender_message_count.is_empty());
    }
}

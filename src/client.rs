use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use reqwest::header::AUTHORIZATION;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde_json::{Map, Value};
use tracing::{debug, info, trace, warn};

use crate::control::{
    ChangeKind, Command, plan_period_change, resolve_cool, resolve_dehumidify, resolve_heat,
    resolve_humidify, resolve_pair, resolve_single,
};
use crate::diag::{DIAG_COOLDOWN, DiagEnforcer};
use crate::diff::{Changes, Scope, deep_merge, diff_json, generic_event, map_typed_event};
use crate::endpoints::{CloudEndpoints, Route};
use crate::logger::{MessageLogMode, MessageLogger};
use crate::metrics::Metrics;
use crate::observer::{Change, ChangeFilter, Observer};
use crate::protocol::{
    DEFAULT_APP_ID, TARGET_LCC, cloud_app_id, command_message, parse_certificate_token,
    parse_login_response, parse_negotiate_response, parse_retrieve_response, set_circulate_time_data,
    set_diag_level_data, set_manual_away_data, set_manual_mode_data, set_parameter_data,
    set_schedule_hold_data, set_ventilation_mode_data, set_zone_schedule_data, subscribe_message,
};
use crate::schedule::Period;
use crate::system::{Home, System};
use crate::types::*;
use crate::zone::Zone;
use crate::{Error, Result};

type EventCallback = Box<dyn Fn(&str, &Event) + Send + Sync>;
type SnapshotCallback = Box<dyn Fn(&System) + Send + Sync>;

const DEFAULT_LONG_POLL: Duration = Duration::from_secs(15);
const DEFAULT_RETRIES: u32 = 3;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
/// Added to the long-poll timeout for the HTTP request deadline.
const REQUEST_GRACE: Duration = Duration::from_secs(30);
const MAX_DIAG_LEVEL: u8 = 2;

enum Target {
    Lan { ip: String, protocol: String },
    Cloud(CloudSetup),
}

struct CloudSetup {
    email: String,
    password: String,
    endpoints: CloudEndpoints,
    certificate: Option<String>,
}

pub struct S30ClientBuilder {
    target: Target,
    app_id: Option<String>,
    event_callbacks: Vec<EventCallback>,
    snapshot_callbacks: Vec<SnapshotCallback>,
    observers: Vec<Observer>,
    log: Option<(MessageLogMode, PathBuf)>,
    diag_level: Option<u8>,
    diag_cooldown: Duration,
    long_poll_timeout: Duration,
    retries: u32,
    retry_delay: Duration,
}

impl S30ClientBuilder {
    /// Direct LAN connection to a controller at `ip` (optionally `ip:port`).
    pub fn new(ip: impl Into<String>) -> Self {
        Self::with_target(Target::Lan {
            ip: ip.into(),
            protocol: "https".to_string(),
        })
    }

    /// Connection through the vendor cloud relay.
    pub fn cloud(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self::with_target(Target::Cloud(CloudSetup {
            email: email.into(),
            password: password.into(),
            endpoints: CloudEndpoints::production(),
            certificate: None,
        }))
    }

    fn with_target(target: Target) -> Self {
        Self {
            target,
            app_id: None,
            event_callbacks: Vec::new(),
            snapshot_callbacks: Vec::new(),
            observers: Vec::new(),
            log: None,
            diag_level: None,
            diag_cooldown: DIAG_COOLDOWN,
            long_poll_timeout: DEFAULT_LONG_POLL,
            retries: DEFAULT_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// URL scheme for LAN connections. Ignored in cloud mode.
    pub fn protocol(mut self, proto: &str) -> Self {
        if let Target::Lan { ref mut protocol, .. } = self.target {
            *protocol = proto.to_string();
        }
        self
    }

    pub fn app_id(mut self, id: impl Into<String>) -> Self {
        self.app_id = Some(id.into());
        self
    }

    /// Called with the originating system id for every event.
    pub fn on_event(mut self, f: impl Fn(&str, &Event) + Send + Sync + 'static) -> Self {
        self.event_callbacks.push(Box::new(f));
        self
    }

    pub fn on_snapshot(mut self, f: impl Fn(&System) + Send + Sync + 'static) -> Self {
        self.snapshot_callbacks.push(Box::new(f));
        self
    }

    /// Called after the model is updated, once per changed scope per message.
    pub fn on_change(
        mut self,
        filter: ChangeFilter,
        f: impl Fn(&Change) + Send + Sync + 'static,
    ) -> Self {
        self.observers.push(Observer {
            filter,
            callback: Box::new(f),
        });
        self
    }

    pub fn message_log(mut self, mode: MessageLogMode, path: impl Into<PathBuf>) -> Self {
        self.log = Some((mode, path.into()));
        self
    }

    pub fn diag_level(mut self, level: u8) -> Self {
        self.diag_level = Some(level);
        self
    }

    /// Minimum gap between diag level reassertions. Defaults to 5 minutes.
    pub fn diag_cooldown(mut self, cooldown: Duration) -> Self {
        self.diag_cooldown = cooldown;
        self
    }

    pub fn long_poll_timeout(mut self, timeout: Duration) -> Self {
        self.long_poll_timeout = timeout;
        self
    }

    /// Extra attempts for each setup step after the first one fails.
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Ignored in LAN mode.
    pub fn cloud_endpoints(mut self, endpoints: CloudEndpoints) -> Self {
        if let Target::Cloud(ref mut setup) = self.target {
            setup.endpoints = endpoints;
        }
        self
    }

    /// Certificate blob posted to the cloud authenticate step. Without one
    /// the step is skipped and login is attempted directly.
    pub fn certificate(mut self, certificate: impl Into<String>) -> Self {
        if let Target::Cloud(ref mut setup) = self.target {
            setup.certificate = Some(certificate.into());
        }
        self
    }

    pub fn build(self) -> Result<S30Client> {
        let is_lan = matches!(self.target, Target::Lan { .. });
        // Controllers serve a self-signed certificate.
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(is_lan)
            .timeout(self.long_poll_timeout + REQUEST_GRACE)
            .build()?;

        let logger = match self.log {
            Some((mode, path)) => Some(MessageLogger::new(mode, &path)?),
            None => None,
        };

        if let Some(level) = self.diag_level
            && level > MAX_DIAG_LEVEL
        {
            return Err(Error::OutOfRange {
                what: "diag level",
                value: level as f64,
                min: 0.0,
                max: MAX_DIAG_LEVEL as f64,
            });
        }

        let (route, cloud) = match self.target {
            Target::Lan { ip, protocol } => (
                Route::Lan {
                    base_url: format!("{protocol}://{ip}"),
                },
                None,
            ),
            Target::Cloud(setup) => (
                Route::Cloud(setup.endpoints),
                Some(Credentials {
                    email: setup.email,
                    password: setup.password,
                    certificate: setup.certificate,
                }),
            ),
        };

        let app_id = match (self.app_id, cloud.is_some()) {
            (Some(id), _) => id,
            (None, true) => cloud_app_id(),
            (None, false) => DEFAULT_APP_ID.to_string(),
        };

        Ok(S30Client {
            http,
            route,
            cloud,
            app_id,
            token: None,
            connection_id: None,
            connected: false,
            homes: Vec::new(),
            systems: Vec::new(),
            previous_json: HashMap::new(),
            event_callbacks: self.event_callbacks,
            snapshot_callbacks: self.snapshot_callbacks,
            observers: self.observers,
            logger,
            diag_enforcer: self
                .diag_level
                .map(|level| DiagEnforcer::new(level, self.diag_cooldown)),
            diag_reassert: Vec::new(),
            metrics: Metrics::default(),
            long_poll_secs: self.long_poll_timeout.as_secs(),
            retries: self.retries,
            retry_delay: self.retry_delay,
        })
    }
}

struct Credentials {
    email: String,
    password: String,
    certificate: Option<String>,
}

pub struct S30Client {
    http: reqwest::Client,
    route: Route,
    cloud: Option<Credentials>,
    app_id: String,
    token: Option<String>,
    connection_id: Option<String>,
    connected: bool,
    homes: Vec<Home>,
    systems: Vec<System>,
    /// Accumulated raw JSON per system id, diffed against each delta.
    previous_json: HashMap<String, Value>,
    event_callbacks: Vec<EventCallback>,
    snapshot_callbacks: Vec<SnapshotCallback>,
    observers: Vec<Observer>,
    logger: Option<MessageLogger>,
    diag_enforcer: Option<DiagEnforcer>,
    diag_reassert: Vec<String>,
    metrics: Metrics,
    long_poll_secs: u64,
    retries: u32,
    retry_delay: Duration,
}

impl S30Client {
    pub fn builder(ip: impl Into<String>) -> S30ClientBuilder {
        S30ClientBuilder::new(ip)
    }

    pub fn cloud_builder(email: impl Into<String>, password: impl Into<String>) -> S30ClientBuilder {
        S30ClientBuilder::cloud(email, password)
    }

    pub async fn connect(&mut self) -> Result<()> {
        let lan_connect_url = match self.route {
            Route::Lan { ref base_url } => Some(Route::lan_connect_url(base_url, &self.app_id)),
            Route::Cloud(_) => None,
        };
        match lan_connect_url {
            Some(url) => {
                debug!(url = %url, "connecting to controller");
                self.log_request("POST", &url, None);
                let request = self.http.post(&url);
                self.send_with_retry("connect", request).await?;
                self.ensure_system(TARGET_LCC);
            }
            None => self.cloud_login().await?,
        }

        self.subscribe_all().await?;
        self.connected = true;

        if let Some(level) = self.diag_enforcer.as_ref().map(|e| e.target_level) {
            let ids: Vec<String> = self.systems.iter().map(|s| s.id.clone()).collect();
            for id in &ids {
                self.publish_command_logged("set_diag_level", id, None, set_diag_level_data(level))
                    .await?;
            }
            if let Some(ref mut enforcer) = self.diag_enforcer {
                enforcer.reset();
                enforcer.record_sent();
            }
        }

        info!(systems = self.systems.len(), cloud = self.route.is_cloud(), "connected");
        Ok(())
    }

    async fn cloud_login(&mut self) -> Result<()> {
        let endpoints = match self.route {
            Route::Cloud(ref ep) => ep.clone(),
            Route::Lan { .. } => return Err(Error::Protocol("cloud login on a LAN route".into())),
        };
        let Some(ref creds) = self.cloud else {
            return Err(Error::Login("no cloud credentials configured".into()));
        };
        let email = creds.email.clone();
        let password = creds.password.clone();
        let certificate = creds.certificate.clone();

        let certificate_token = match certificate {
            Some(cert) => {
                debug!(url = %endpoints.authenticate, "authenticating certificate");
                self.log_request("POST", &endpoints.authenticate, None);
                let request = self.http.post(&endpoints.authenticate).body(cert);
                let body: Value = self.send_with_retry("authenticate", request).await?.json().await?;
                let token = parse_certificate_token(&body).ok_or_else(|| {
                    Error::Login("authenticate response has no certificate token".into())
                })?;
                Some(token)
            }
            None => {
                debug!("no certificate configured, skipping authenticate");
                None
            }
        };

        debug!(url = %endpoints.login, "logging in");
        self.log_request("POST", &endpoints.login, None);
        let mut request = self.http.post(&endpoints.login).form(&[
            ("username", email.as_str()),
            ("password", password.as_str()),
            ("grant_type", "password"),
            ("applicationid", self.app_id.as_str()),
        ]);
        if let Some(token) = certificate_token {
            request = request.header(AUTHORIZATION, token);
        }
        let response = match self.send_with_retry("login", request).await {
            Err(Error::Unauthorized) => {
                return Err(Error::Login("credentials rejected".into()));
            }
            other => other?,
        };
        let body: Value = response.json().await?;
        let (token, homes) = parse_login_response(&body)
            .ok_or_else(|| Error::Login("login response has no user token".into()))?;
        self.token = Some(token);

        for home in &homes {
            for system_id in &home.system_ids {
                let idx = self.ensure_system(system_id);
                self.systems[idx].home_id = Some(home.id.clone());
            }
        }
        if self.systems.is_empty() {
            warn!("login succeeded but the account has no systems");
        }
        self.homes = homes;

        let url = format!(
            "{}?clientProtocol=1.3.0.0&_={}",
            endpoints.negotiate,
            Utc::now().timestamp_millis()
        );
        self.log_request("GET", &url, None);
        let request = self.authorized(self.http.get(&url));
        let body: Value = self.send_with_retry("negotiate", request).await?.json().await?;
        self.connection_id = parse_negotiate_response(&body);
        debug!(connection_id = ?self.connection_id, "negotiated");

        Ok(())
    }

    async fn subscribe_all(&mut self) -> Result<()> {
        let url = self.route.request_data_url();
        let ids: Vec<String> = self.systems.iter().map(|s| s.id.clone()).collect();
        for id in ids {
            let msg = subscribe_message(&self.app_id, &id);
            debug!(url = %url, system = %id, "subscribing to data");
            self.log_request("POST", &url, Some(&msg));
            let bytes = msg.to_string().len();
            let request = self.authorized(self.http.post(&url).json(&msg));
            self.send_with_retry("subscribe", request).await?;
            self.metrics.record_send(bytes);
        }
        Ok(())
    }

    /// One long-poll round trip. Returns the number of messages dispatched.
    pub async fn poll(&mut self) -> Result<usize> {
        if !self.connected {
            return Err(Error::NotConnected);
        }

        let url = self.route.retrieve_url(&self.app_id, self.long_poll_secs);
        let request = self.authorized(self.http.get(&url));
        let resp = match request.send().await {
            Ok(resp) => resp,
            Err(e) => {
                self.metrics.record_error(e.is_timeout());
                return Err(e.into());
            }
        };
        let status = resp.status().as_u16();
        self.metrics.record_status(status);

        match status {
            204 => {
                trace!("poll: no changes");
                if let Some(ref mut logger) = self.logger {
                    logger.log_poll(204, "");
                }
                return Ok(0);
            }
            502 => {
                debug!("poll: transient 502");
                return Ok(0);
            }
            401 => {
                warn!("poll: relay rejected the session");
                self.metrics.record_error(false);
                self.connected = false;
                return Err(Error::Unauthorized);
            }
            s if (400..600).contains(&s) => {
                self.metrics.record_error(false);
                return Err(match resp.error_for_status() {
                    Err(e) => e.into(),
                    Ok(_) => Error::Protocol(format!("unexpected status {s}")),
                });
            }
            _ => {}
        }

        let body = resp.text().await?;
        self.metrics.record_receive(body.len());
        if let Some(ref mut logger) = self.logger {
            logger.log_poll(status, &body);
        }

        let mut dispatched = 0;
        for inbound in parse_retrieve_response(&body) {
            if !self.accepts_sender(&inbound.sender_id) {
                debug!(sender = %inbound.sender_id, "dropping message from unknown sender");
                self.metrics.dropped_messages += 1;
                continue;
            }
            self.metrics.record_message(&inbound.sender_id);
            self.process_data(&inbound.sender_id, &inbound.data);
            dispatched += 1;
        }

        for system_id in std::mem::take(&mut self.diag_reassert) {
            let Some(level) = self.diag_enforcer.as_ref().map(|e| e.target_level) else {
                break;
            };
            if let Err(e) = self
                .publish_command_logged(
                    "reassert_diag_level",
                    &system_id,
                    None,
                    set_diag_level_data(level),
                )
                .await
            {
                warn!(system = %system_id, error = %e, "diagLevel reassertion failed");
                continue;
            }
            if let Some(ref mut enforcer) = self.diag_enforcer {
                enforcer.record_sent();
                if enforcer.attempts_exhausted() {
                    debug!("diagLevel circuit breaker tripped, stopping reassertions for this hour");
                }
            }
        }

        Ok(dispatched)
    }

    /// LAN: release the endpoint. Cloud: log out. The client is marked
    /// disconnected either way.
    pub async fn disconnect(&mut self) -> Result<()> {
        let (url, request) = match self.route {
            Route::Lan { ref base_url } => {
                let url = Route::lan_disconnect_url(base_url, &self.app_id);
                let request = self.http.post(&url);
                (url, request)
            }
            Route::Cloud(ref ep) => {
                let url = ep.logout.clone();
                let request = self.authorized(self.http.post(&url));
                (url, request)
            }
        };
        debug!(url = %url, "disconnecting");
        self.log_request("POST", &url, None);

        let result = request.send().await;
        self.connected = false;
        self.token = None;
        self.connection_id = None;

        let resp = result.inspect_err(|e| self.metrics.record_error(e.is_timeout()))?;
        self.metrics.record_status(resp.status().as_u16());
        resp.error_for_status()?;
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn systems(&self) -> &[System] {
        &self.systems
    }

    pub fn system(&self, system_id: &str) -> Option<&System> {
        self.systems.iter().find(|s| s.id == system_id)
    }

    pub fn zone(&self, system: usize, zone: u8) -> Option<&Zone> {
        self.systems.get(system).and_then(|s| s.zone(zone))
    }

    /// Homes reported at cloud login. Empty in LAN mode.
    pub fn homes(&self) -> &[Home] {
        &self.homes
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn reset_metrics(&mut self) {
        self.metrics.reset();
    }

    /// Connection id handed out by the cloud negotiate step.
    pub fn connection_id(&self) -> Option<&str> {
        self.connection_id.as_deref()
    }

    fn accepts_sender(&self, sender: &str) -> bool {
        if self.route.is_cloud() {
            self.systems.iter().any(|s| s.id == sender)
        } else {
            sender == TARGET_LCC
        }
    }

    fn process_data(&mut self, system_id: &str, data: &Value) {
        let sys_idx = self.ensure_system(system_id);
        let mut events = Vec::new();
        let mut changes: Vec<Change> = Vec::new();
        let mut touched = false;

        let prev_root = self
            .previous_json
            .entry(system_id.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        let system = &mut self.systems[sys_idx];

        if let Some(system_data) = data.get("system") {
            let diffs = diff_section(prev_root, "/system", system_data);
            let merged = remember(prev_root, "system", None, system_data);
            for (path, _old, new_val) in &diffs {
                if let Some(evt) = map_typed_event(Scope::System, path, new_val, "", merged)
                    .or_else(|| generic_event(Scope::System, path, new_val, merged))
                {
                    events.push(evt);
                }
            }
            system.apply(system_data);
            push_change(&mut changes, system_id, Scope::System, "", &diffs);
            touched = true;
        }

        if let Some(occ) = data.get("occupancy") {
            let diffs = diff_section(prev_root, "/occupancy", occ);
            if system.apply_occupancy(occ) {
                events.push(Event::AwayModeChanged {
                    away: system.is_away(),
                });
            }
            push_change(&mut changes, system_id, Scope::System, "occupancy", &diffs);
            remember(prev_root, "occupancy", None, occ);
            touched = true;
        }

        if let Some(Value::Array(zones)) = data.get("zones") {
            for zone_data in zones {
                let zone_id = match zone_data
                    .get("id")
                    .and_then(|v| v.as_u64())
                    .and_then(|id| u8::try_from(id).ok())
                {
                    Some(id) => id,
                    None => {
                        debug!(
                            system = system_id,
                            id = ?zone_data.get("id"),
                            "skipping zone with unusable id"
                        );
                        continue;
                    }
                };

                let diffs = diff_section(prev_root, &format!("/zones/{zone_id}"), zone_data);
                let merged = remember(prev_root, "zones", Some(zone_id.to_string()), zone_data);
                let zone_name = zone_data
                    .get("name")
                    .or_else(|| zone_data.pointer("/config/name"))
                    .and_then(|v| v.as_str())
                    .or_else(|| system.zone(zone_id).map(|z| z.name.as_str()))
                    .unwrap_or("")
                    .to_string();

                for (path, _old, new_val) in &diffs {
                    let scope = Scope::Zone(zone_id);
                    if let Some(evt) = map_typed_event(scope, path, new_val, &zone_name, merged)
                        .or_else(|| generic_event(scope, path, new_val, merged))
                    {
                        events.push(evt);
                    }
                }

                let zone = system.zone_mut_or_insert(zone_id);
                let prev_hold = zone.is_override_active();
                zone.apply(zone_data);
                if zone.is_override_active() != prev_hold {
                    events.push(Event::ZoneHoldChanged {
                        zone_id,
                        name: zone_name,
                        active: zone.is_override_active(),
                    });
                }

                push_change(&mut changes, system_id, Scope::Zone(zone_id), "", &diffs);
                touched = true;
            }
        }

        if let Some(Value::Array(schedules)) = data.get("schedules") {
            let mut changed_ids = HashSet::new();
            for entry in schedules {
                let Some(id) = entry
                    .get("id")
                    .and_then(|v| v.as_u64())
                    .and_then(|id| u32::try_from(id).ok())
                else {
                    continue;
                };
                let diffs = diff_section(prev_root, &format!("/schedules/{id}"), entry);
                if !diffs.is_empty() {
                    changed_ids.insert(id);
                }
                push_change(
                    &mut changes,
                    system_id,
                    Scope::System,
                    &format!("schedules.{id}"),
                    &diffs,
                );
                remember(prev_root, "schedules", Some(id.to_string()), entry);
            }
            for (schedule_id, name) in system.apply_schedules(schedules) {
                if changed_ids.contains(&schedule_id) {
                    events.push(Event::ScheduleChanged { schedule_id, name });
                }
            }
            touched = true;
        }

        if let Some(Value::Array(equipments)) = data.get("equipments") {
            for equip_data in equipments {
                let equip_id = match equip_data
                    .get("id")
                    .and_then(|v| v.as_u64())
                    .and_then(|id| u16::try_from(id).ok())
                {
                    Some(id) => id,
                    None => {
                        debug!(
                            system = system_id,
                            id = ?equip_data.get("id"),
                            "skipping equipment with unusable id"
                        );
                        continue;
                    }
                };

                let diffs = diff_section(prev_root, &format!("/equipments/{equip_id}"), equip_data);
                let merged =
                    remember(prev_root, "equipments", Some(equip_id.to_string()), equip_data);
                for (path, _old, new_val) in &diffs {
                    if let Some(evt) =
                        generic_event(Scope::Equipment(equip_id), path, new_val, merged)
                    {
                        events.push(evt);
                    }
                }

                let equipment = system.equipment_mut_or_insert(equip_id);
                for (pid, name, value) in equipment.apply(equip_data) {
                    events.push(Event::ParameterChanged {
                        equipment_id: equip_id,
                        pid,
                        name,
                        value,
                    });
                }

                push_change(&mut changes, system_id, Scope::Equipment(equip_id), "", &diffs);
                touched = true;
            }
        }

        if let Some(alerts_data) = data.get("alerts")
            && let Some(Value::Array(active)) = alerts_data.get("active")
        {
            let prev_hp_lockout = system.hp_low_ambient_lockout;
            let prev_aux_lockout = system.aux_heat_high_ambient_lockout;

            for (code, active) in system.apply_alerts(active) {
                events.push(Event::AlertChanged { code, active });
            }

            if system.hp_low_ambient_lockout != prev_hp_lockout {
                events.push(Event::HpLockoutChanged {
                    locked_out: system.hp_low_ambient_lockout,
                });
            }
            if system.aux_heat_high_ambient_lockout != prev_aux_lockout {
                events.push(Event::AuxLockoutChanged {
                    locked_out: system.aux_heat_high_ambient_lockout,
                });
            }

            let diffs = diff_section(prev_root, "/alerts", alerts_data);
            push_change(&mut changes, system_id, Scope::System, "alerts", &diffs);
            remember(prev_root, "alerts", None, alerts_data);
            touched = true;
        }

        if let Some(ref mut enforcer) = self.diag_enforcer
            && enforcer.needs_reassert(system.diag_level)
            && !self.diag_reassert.iter().any(|id| id == system_id)
        {
            debug!(
                system = system_id,
                current = ?system.diag_level,
                target = enforcer.target_level,
                "diagLevel dropped, reasserting"
            );
            self.diag_reassert.push(system_id.to_string());
        }

        for event in &events {
            for cb in &self.event_callbacks {
                cb(system_id, event);
            }
        }

        for change in &changes {
            for observer in &self.observers {
                observer.notify(change);
            }
        }

        if touched && let Some(system) = self.systems.get(sys_idx) {
            for cb in &self.snapshot_callbacks {
                cb(system);
            }
        }

        if !events.is_empty() {
            debug!(system = system_id, count = events.len(), "processed events from poll");
        }
    }

    fn ensure_system(&mut self, id: &str) -> usize {
        if let Some(idx) = self.systems.iter().position(|s| s.id == id) {
            return idx;
        }
        self.systems.push(System::new(id));
        self.systems.len() - 1
    }

    // -- Command methods --

    /// Set HVAC mode for a zone. Switches to manual schedule if needed.
    pub async fn set_hvac_mode(&mut self, system_id: &str, zone_id: u8, mode: HvacMode) -> Result<()> {
        let change = Period {
            system_mode: Some(mode),
            ..Default::default()
        };
        self.apply_period_change(system_id, zone_id, change, ChangeKind::Mode, "set_hvac_mode")
            .await
    }

    /// Set fan mode for a zone. Switches to manual schedule if needed.
    pub async fn set_fan_mode(&mut self, system_id: &str, zone_id: u8, mode: FanMode) -> Result<()> {
        let change = Period {
            fan_mode: Some(mode),
            ..Default::default()
        };
        self.apply_period_change(system_id, zone_id, change, ChangeKind::Mode, "set_fan_mode")
            .await
    }

    /// Set heat setpoint for a zone. Pushes the cool setpoint up if the
    /// deadband would be violated.
    pub async fn set_heat_setpoint(
        &mut self,
        system_id: &str,
        zone_id: u8,
        temp: Temperature,
    ) -> Result<()> {
        let change = resolve_heat(self.find_zone(system_id, zone_id)?, temp)?;
        self.apply_period_change(system_id, zone_id, change, ChangeKind::Setpoint, "set_heat_setpoint")
            .await
    }

    /// Set cool setpoint for a zone. Pulls the heat setpoint down if the
    /// deadband would be violated.
    pub async fn set_cool_setpoint(
        &mut self,
        system_id: &str,
        zone_id: u8,
        temp: Temperature,
    ) -> Result<()> {
        let change = resolve_cool(self.find_zone(system_id, zone_id)?, temp)?;
        self.apply_period_change(system_id, zone_id, change, ChangeKind::Setpoint, "set_cool_setpoint")
            .await
    }

    /// Set both heat and cool setpoints atomically. Rejects deadband violations.
    pub async fn set_setpoints(
        &mut self,
        system_id: &str,
        zone_id: u8,
        heat: Temperature,
        cool: Temperature,
    ) -> Result<()> {
        let change = resolve_pair(self.find_zone(system_id, zone_id)?, heat, cool)?;
        self.apply_period_change(system_id, zone_id, change, ChangeKind::Setpoint, "set_setpoints")
            .await
    }

    /// Setpoint for systems running in single setpoint mode.
    pub async fn set_single_setpoint(
        &mut self,
        system_id: &str,
        zone_id: u8,
        temp: Temperature,
    ) -> Result<()> {
        let change = resolve_single(self.find_zone(system_id, zone_id)?, temp)?;
        self.apply_period_change(system_id, zone_id, change, ChangeKind::Setpoint, "set_single_setpoint")
            .await
    }

    pub async fn set_humidity_mode(
        &mut self,
        system_id: &str,
        zone_id: u8,
        mode: HumidityMode,
    ) -> Result<()> {
        let change = Period {
            humidity_mode: Some(mode),
            ..Default::default()
        };
        self.apply_period_change(system_id, zone_id, change, ChangeKind::Setpoint, "set_humidity_mode")
            .await
    }

    pub async fn set_humidify_setpoint(
        &mut self,
        system_id: &str,
        zone_id: u8,
        percent: u8,
    ) -> Result<()> {
        let change = resolve_humidify(self.find_zone(system_id, zone_id)?, percent)?;
        self.apply_period_change(
            system_id,
            zone_id,
            change,
            ChangeKind::Setpoint,
            "set_humidify_setpoint",
        )
        .await
    }

    pub async fn set_dehumidify_setpoint(
        &mut self,
        system_id: &str,
        zone_id: u8,
        percent: u8,
    ) -> Result<()> {
        let change = resolve_dehumidify(self.find_zone(system_id, zone_id)?, percent)?;
        self.apply_period_change(
            system_id,
            zone_id,
            change,
            ChangeKind::Setpoint,
            "set_dehumidify_setpoint",
        )
        .await
    }

    /// Make a zone follow the schedule with `schedule_id`.
    pub async fn set_schedule(&mut self, system_id: &str, zone_id: u8, schedule_id: u32) -> Result<()> {
        self.find_zone(system_id, zone_id)?;
        let data = set_zone_schedule_data(zone_id, schedule_id);
        self.publish_command_logged("set_schedule", system_id, Some(zone_id), data)
            .await
    }

    pub async fn set_schedule_by_name(&mut self, system_id: &str, zone_id: u8, name: &str) -> Result<()> {
        let schedule_id = self
            .find_system(system_id)?
            .schedule_by_name(name)
            .map(|s| s.id)
            .ok_or_else(|| Error::NoSchedule(name.to_string()))?;
        self.set_schedule(system_id, zone_id, schedule_id).await
    }

    /// Switch a zone to its manual schedule.
    pub async fn set_manual_mode(&mut self, system_id: &str, zone_id: u8) -> Result<()> {
        self.find_zone(system_id, zone_id)?;
        let data = set_manual_mode_data(zone_id);
        self.publish_command_logged("set_manual_mode", system_id, Some(zone_id), data)
            .await
    }

    /// Set or cancel the schedule hold (override until the next period).
    pub async fn set_schedule_hold(&mut self, system_id: &str, zone_id: u8, hold: bool) -> Result<()> {
        self.find_zone(system_id, zone_id)?;
        let data = set_schedule_hold_data(zone_id, hold);
        self.publish_command_logged("set_schedule_hold", system_id, Some(zone_id), data)
            .await
    }

    /// Set system-wide away mode (occupancy override).
    pub async fn set_away(&mut self, system_id: &str, away: bool) -> Result<()> {
        self.find_system(system_id)?;
        self.publish_command_logged("set_away", system_id, None, set_manual_away_data(away))
            .await
    }

    pub async fn set_ventilation_mode(&mut self, system_id: &str, mode: VentilationMode) -> Result<()> {
        self.find_system(system_id)?;
        let data = set_ventilation_mode_data(mode.as_lennox_str());
        self.publish_command_logged("set_ventilation_mode", system_id, None, data)
            .await
    }

    /// Percentage of each hour the blower runs in circulate mode.
    pub async fn set_circulate_time(&mut self, system_id: &str, percent: u8) -> Result<()> {
        self.find_system(system_id)?;
        if percent > 100 {
            return Err(Error::OutOfRange {
                what: "circulate time",
                value: percent as f64,
                min: 0.0,
                max: 100.0,
            });
        }
        let data = set_circulate_time_data(percent);
        self.publish_command_logged("set_circulate_time", system_id, None, data)
            .await
    }

    /// Set the diagnostic level. When a target level is being enforced it
    /// follows the new value.
    pub async fn set_diag_level(&mut self, system_id: &str, level: u8) -> Result<()> {
        self.find_system(system_id)?;
        if level > MAX_DIAG_LEVEL {
            return Err(Error::OutOfRange {
                what: "diag level",
                value: level as f64,
                min: 0.0,
                max: MAX_DIAG_LEVEL as f64,
            });
        }
        self.publish_command_logged("set_diag_level", system_id, None, set_diag_level_data(level))
            .await?;
        if let Some(ref mut enforcer) = self.diag_enforcer {
            enforcer.target_level = level;
        }
        Ok(())
    }

    /// Set an equipment parameter value. Validates against descriptor before sending.
    pub async fn set_equipment_parameter(
        &mut self,
        system_id: &str,
        equipment_id: u16,
        pid: u16,
        value: &str,
    ) -> Result<()> {
        let equipment = self
            .find_system(system_id)?
            .equipment(equipment_id)
            .ok_or_else(|| Error::InvalidParameter {
                equipment_id,
                pid,
                reason: "equipment not found".to_string(),
            })?;

        let equip_type = equipment.equip_type;

        let param = equipment.parameter(pid).ok_or_else(|| Error::InvalidParameter {
            equipment_id,
            pid,
            reason: "parameter not found".to_string(),
        })?;

        if !param.enabled {
            return Err(Error::InvalidParameter {
                equipment_id,
                pid,
                reason: "parameter is read-only (enabled=false)".to_string(),
            });
        }

        let validated = param
            .descriptor
            .validate(value)
            .map_err(|reason| Error::InvalidParameter {
                equipment_id,
                pid,
                reason,
            })?;

        let data = set_parameter_data(equip_type, pid, &validated);
        self.publish_command_logged("set_parameter", system_id, None, data)
            .await
    }

    // -- Helpers --

    fn find_system(&self, system_id: &str) -> Result<&System> {
        self.system(system_id)
            .ok_or_else(|| Error::UnknownSystem(system_id.to_string()))
    }

    fn find_zone(&self, system_id: &str, zone_id: u8) -> Result<&Zone> {
        self.find_system(system_id)?
            .zone(zone_id)
            .ok_or(Error::InvalidZone(zone_id))
    }

    async fn apply_period_change(
        &mut self,
        system_id: &str,
        zone_id: u8,
        change: Period,
        kind: ChangeKind,
        action: &'static str,
    ) -> Result<()> {
        let commands = plan_period_change(self.find_zone(system_id, zone_id)?, &change, kind, action);
        for Command { action, data } in commands {
            self.publish_command_logged(action, system_id, Some(zone_id), data)
                .await?;
        }
        Ok(())
    }

    async fn publish_command_logged(
        &mut self,
        action: &str,
        system_id: &str,
        zone: Option<u8>,
        data: Value,
    ) -> Result<()> {
        if !self.connected {
            return Err(Error::NotConnected);
        }

        if let Some(ref mut logger) = self.logger {
            logger.log_command(action, system_id, zone, &data);
        }

        let msg = command_message(&self.app_id, system_id, data);
        let bytes = msg.to_string().len();
        let url = self.route.publish_url();
        let request = self.authorized(self.http.post(&url).json(&msg));

        let resp = request
            .send()
            .await
            .inspect_err(|e| self.metrics.record_error(e.is_timeout()))?;
        let status = resp.status();
        self.metrics.record_status(status.as_u16());
        if status == StatusCode::UNAUTHORIZED {
            self.metrics.record_error(false);
            return Err(Error::Unauthorized);
        }
        resp.error_for_status()
            .inspect_err(|_| self.metrics.record_error(false))?;

        self.metrics.record_send(bytes);
        debug!(action, system = system_id, zone = ?zone, "published command");
        Ok(())
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match self.token {
            Some(ref token) => request.header(AUTHORIZATION, token.as_str()),
            None => request,
        }
    }

    fn log_request(&mut self, method: &str, url: &str, body: Option<&Value>) {
        if let Some(ref mut logger) = self.logger {
            logger.log_request(method, url, body);
        }
    }

    /// Send a setup request, retrying transport errors and 5xx responses.
    async fn send_with_retry(&mut self, step: &str, request: RequestBuilder) -> Result<Response> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let req = request
                .try_clone()
                .ok_or_else(|| Error::Protocol(format!("{step}: request cannot be retried")))?;

            match req.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    self.metrics.record_status(status.as_u16());
                    if status == StatusCode::UNAUTHORIZED {
                        self.metrics.record_error(false);
                        return Err(Error::Unauthorized);
                    }
                    if status.is_server_error() && attempt <= self.retries {
                        warn!(step, attempt, %status, "server error, retrying");
                        tokio::time::sleep(self.retry_delay).await;
                        continue;
                    }
                    return resp.error_for_status().map_err(|e| {
                        self.metrics.record_error(false);
                        e.into()
                    });
                }
                Err(e) => {
                    self.metrics.record_error(e.is_timeout());
                    if attempt <= self.retries {
                        warn!(step, attempt, error = %e, "request failed, retrying");
                        tokio::time::sleep(self.retry_delay).await;
                        continue;
                    }
                    return Err(e.into());
                }
            }
        }
    }
}

/// Diff a delta against what was accumulated so far at `pointer`.
fn diff_section(prev_root: &Value, pointer: &str, current: &Value) -> Changes {
    let empty = Value::Object(Map::new());
    let previous = prev_root.pointer(pointer).unwrap_or(&empty);
    let mut changes = Vec::new();
    diff_json(previous, current, "", &mut changes);
    changes
}

/// Merge a delta into the accumulated JSON under `section` (and `key`) and
/// return the merged object.
fn remember<'a>(
    prev_root: &'a mut Value,
    section: &str,
    key: Option<String>,
    delta: &Value,
) -> &'a Value {
    let pointer = match &key {
        Some(key) => format!("/{section}/{key}"),
        None => format!("/{section}"),
    };
    let mut wrapped = delta.clone();
    if let Some(key) = key {
        wrapped = Value::Object(Map::from_iter([(key, wrapped)]));
    }
    deep_merge(prev_root, &Value::Object(Map::from_iter([(section.to_string(), wrapped)])));
    static MISSING: Value = Value::Null;
    prev_root.pointer(&pointer).unwrap_or(&MISSING)
}

/// Fold a section's changed leaves into the per-scope change record.
fn push_change(changes: &mut Vec<Change>, system_id: &str, scope: Scope, prefix: &str, diffs: &Changes) {
    if diffs.is_empty() {
        return;
    }
    let attributes = diffs.iter().map(|(path, _, _)| {
        if prefix.is_empty() {
            path.clone()
        } else {
            format!("{prefix}.{path}")
        }
    });
    match changes.iter_mut().find(|c| c.scope == scope) {
        Some(existing) => existing.attributes.extend(attributes),
        None => changes.push(Change {
            system_id: system_id.to_string(),
            scope,
            attributes: attributes.collect(),
        }),
    }
}

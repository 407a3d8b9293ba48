use std::fmt;

#[derive(Debug)]
pub enum Error {
    Http(reqwest::Error),
    /// The relay rejected our token; reconnect to obtain a new one.
    Unauthorized,
    NotConnected,
    Login(String),
    UnknownSystem(String),
    InvalidZone(u8),
    InvalidMode(String),
    InvalidSetpoints {
        heat_c: f64,
        cool_c: f64,
        deadband_c: f64,
    },
    OutOfRange {
        what: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    InvalidParameter {
        equipment_id: u16,
        pid: u16,
        reason: String,
    },
    NoSchedule(String),
    Protocol(String),
    Timeout,
    Io(std::io::Error),
    Json(serde_json::Error),
    Config(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Http(e) => write!(f, "HTTP error: {e}"),
            Error::Unauthorized => write!(f, "unauthorized (token expired or revoked)"),
            Error::NotConnected => write!(f, "not connected"),
            Error::Login(msg) => write!(f, "login failed: {msg}"),
            Error::UnknownSystem(id) => write!(f, "unknown system: {id}"),
            Error::InvalidZone(id) => write!(f, "invalid zone: {id}"),
            Error::InvalidMode(mode) => write!(f, "invalid mode: {mode}"),
            Error::InvalidSetpoints {
                heat_c,
                cool_c,
                deadband_c,
            } => write!(
                f,
                "invalid setpoints: heat {heat_c}\u{00b0}C and cool {cool_c}\u{00b0}C must be at least {deadband_c}\u{00b0}C apart"
            ),
            Error::OutOfRange {
                what,
                value,
                min,
                max,
            } => write!(f, "{what} out of range: {value} not in {min}..{max}"),
            Error::InvalidParameter {
                equipment_id,
                pid,
                reason,
            } => write!(
                f,
                "invalid parameter {pid} on equipment {equipment_id}: {reason}"
            ),
            Error::NoSchedule(name) => write!(f, "no such schedule: {name}"),
            Error::Protocol(msg) => write!(f, "protocol error: {msg}"),
            Error::Timeout => write!(f, "request timed out"),
            Error::Io(e) => write!(f, "IO error: {e}"),
            Error::Json(e) => write!(f, "JSON error: {e}"),
            Error::Config(msg) => write!(f, "config error: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Http(e) => Some(e),
            Error::Io(e) => Some(e),
            Error::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout
        } else if e.status() == Some(reqwest::StatusCode::UNAUTHORIZED) {
            Error::Unauthorized
        } else {
            Error::Http(e)
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

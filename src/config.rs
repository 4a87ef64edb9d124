//! Settings for running a measurement task.
//!
//! Settings are exchanged as JSON. [`Settings::loads`] parses them and
//! [`Settings::dumps`] produces them again. Only the shape of the data is
//! checked; unknown keys are ignored and missing optional keys take their
//! defaults.

#![warn(missing_docs)]

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::Level;

use crate::error::Error;
use crate::net::addr::FamilyHint;

//------------ TaskName -------------------------------------------------------

/// The known measurement tasks.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum TaskName {
    Dash,
    CaptivePortal,
    DnsInjection,
    FacebookMessenger,
    HttpHeaderFieldManipulation,
    HttpInvalidRequestLine,
    MeekFrontedRequests,
    MultiNdt,
    Ndt,
    TcpConnect,
    Telegram,
    WebConnectivity,
    Whatsapp,
}

//------------ LogLevel -------------------------------------------------------

/// How much a task should log.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize,
)]
pub enum LogLevel {
    /// Only errors.
    #[serde(rename = "ERR")]
    Err,

    /// Errors and warnings.
    #[default]
    #[serde(rename = "WARNING")]
    Warning,

    /// Informational messages, too.
    #[serde(rename = "INFO")]
    Info,

    /// Debug messages, too.
    #[serde(rename = "DEBUG")]
    Debug,

    /// Everything.
    #[serde(rename = "DEBUG2")]
    Debug2,
}

impl LogLevel {
    /// Returns the corresponding tracing level.
    pub fn as_level(self) -> Level {
        match self {
            LogLevel::Err => Level::ERROR,
            LogLevel::Warning => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Debug2 => Level::TRACE,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogLevel::Err => "ERR",
            LogLevel::Warning => "WARNING",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Debug2 => "DEBUG2",
        })
    }
}

//------------ Options --------------------------------------------------------

/// Task options.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct Options {
    /// Whether to test all endpoints rather than a sample.
    pub all_endpoints: bool,

    /// Path to a CA bundle for TLS.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_bundle_path: Option<String>,

    /// Path to the ASN database.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geoip_asn_path: Option<String>,

    /// Path to the country database.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geoip_country_path: Option<String>,

    /// Maximum runtime in seconds. Zero or less means no limit.
    pub max_runtime: i64,

    /// Whether to skip submitting results.
    pub no_collector: bool,

    /// The port to use when an input does not have one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Whether to keep the probe's real ASN in the report.
    pub save_real_probe_asn: bool,

    /// Whether to keep the probe's real country in the report.
    pub save_real_probe_cc: bool,

    /// Whether to keep the probe's real IP address in the report.
    pub save_real_probe_ip: bool,

    /// The server to run the test against.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,

    /// The name of the application running the task.
    pub software_name: String,

    /// The version of the application running the task.
    pub software_version: String,

    /// Which address families to use when connecting.
    pub address_family: FamilyHint,
}

impl Options {
    /// Returns the maximum runtime if there is one.
    pub fn max_runtime(&self) -> Option<Duration> {
        u64::try_from(self.max_runtime)
            .ok()
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

impl Default for Options {
    fn default() -> Self {
        Options {
            all_endpoints: false,
            ca_bundle_path: None,
            geoip_asn_path: None,
            geoip_country_path: None,
            max_runtime: -1,
            no_collector: false,
            port: None,
            save_real_probe_asn: true,
            save_real_probe_cc: true,
            save_real_probe_ip: false,
            server: None,
            software_name: env!("CARGO_PKG_NAME").into(),
            software_version: env!("CARGO_PKG_VERSION").into(),
            address_family: FamilyHint::default(),
        }
    }
}

//------------ Settings -------------------------------------------------------

/// The settings of a measurement task.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Settings {
    /// Which task to run.
    pub name: TaskName,

    /// Free-form annotations added to every result.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,

    /// Events the caller does not want to see.
    #[serde(default)]
    pub disabled_events: Vec<String>,

    /// The inputs to test.
    #[serde(default)]
    pub inputs: Vec<String>,

    /// How much to log.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Task options.
    #[serde(default)]
    pub options: Options,
}

impl Settings {
    /// Creates default settings for the given task.
    pub fn new(name: TaskName) -> Self {
        Settings {
            name,
            annotations: BTreeMap::new(),
            disabled_events: Vec::new(),
            inputs: Vec::new(),
            log_level: LogLevel::default(),
            options: Options::default(),
        }
    }

    /// Parses settings from a JSON string.
    pub fn loads(s: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(s)?)
    }

    /// Serializes the settings into a JSON string.
    pub fn dumps(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }
}

//============ Tests =========================================================

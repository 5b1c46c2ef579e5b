//! Bridge configuration (§6).
//!
//! A narrow, explicitly-passed struct — not a global — covering exactly the
//! fields the core reads. Parsed from TOML via `serde`/`toml`, following
//! the workspace-dependency convention the rest of this crate's config
//! surface uses; hot-reload is out of scope, the core only ever reads a
//! `Config` value handed to it at construction.

use std::time::Duration;

use serde::Deserialize;

use crate::error::Error;

fn default_rtsp_listen_addr() -> String {
    "0.0.0.0:554".to_string()
}

fn default_output_url_template() -> String {
    "rtmp://127.0.0.1:1935/[app]/[stream]".to_string()
}

fn default_rtp_port_min() -> u16 {
    58200
}

fn default_rtp_port_max() -> u16 {
    58700
}

fn default_rtmp_connect_timeout_ms() -> u64 {
    3000
}

fn default_rtmp_send_pulse_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_rtsp_listen_addr")]
    pub rtsp_listen_addr: String,

    #[serde(default = "default_output_url_template")]
    pub output_url_template: String,

    #[serde(default = "default_rtp_port_min")]
    pub rtp_port_min: u16,

    #[serde(default = "default_rtp_port_max")]
    pub rtp_port_max: u16,

    #[serde(default = "default_rtmp_connect_timeout_ms", rename = "rtmp_connect_timeout_ms")]
    rtmp_connect_timeout_ms: u64,

    #[serde(default = "default_rtmp_send_pulse_ms", rename = "rtmp_send_pulse_ms")]
    rtmp_send_pulse_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rtsp_listen_addr: default_rtsp_listen_addr(),
            output_url_template: default_output_url_template(),
            rtp_port_min: default_rtp_port_min(),
            rtp_port_max: default_rtp_port_max(),
            rtmp_connect_timeout_ms: default_rtmp_connect_timeout_ms(),
            rtmp_send_pulse_ms: default_rtmp_send_pulse_ms(),
        }
    }
}

impl Config {
    pub fn rtmp_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.rtmp_connect_timeout_ms)
    }

    pub fn rtmp_send_pulse(&self) -> Duration {
        Duration::from_millis(self.rtmp_send_pulse_ms)
    }

    /// Parse a TOML config file's contents. Missing fields fall back to
    /// their defaults rather than failing.
    pub fn from_toml_str(raw: &str) -> Result<Self, Error> {
        toml::from_str(raw).map_err(|e| Error::Config(e.to_string()))
    }
}

//! SETTINGS parameters
//!
//! SPDY and HTTP/2 number their parameters differently; [`Settings`] keeps
//! one field per logical parameter and each codec maps it to its own ids.
//! Parameters a dialect cannot express are skipped when encoding, and ids
//! a decoder does not recognize are ignored.

use super::{Dialect, MAX_STREAM_ID};
use crate::error::{Error, Result};
use std::fmt;

/// Logical SETTINGS parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingsParameter {
    /// SPDY SETTINGS_UPLOAD_BANDWIDTH (1)
    UploadBandwidth,
    /// SPDY SETTINGS_DOWNLOAD_BANDWIDTH (2)
    DownloadBandwidth,
    /// SPDY SETTINGS_ROUND_TRIP_TIME (3)
    RoundTripTime,
    /// SPDY 4, HTTP/2 0x3
    MaxConcurrentStreams,
    /// SPDY SETTINGS_CURRENT_CWND (5)
    CurrentCwnd,
    /// SPDY SETTINGS_DOWNLOAD_RETRANS_RATE (6)
    DownloadRetransRate,
    /// SPDY 7, HTTP/2 0x4
    InitialWindowSize,
    /// SPDY SETTINGS_CLIENT_CERTIFICATE_VECTOR_SIZE (8)
    ClientCertificateVectorSize,
    /// HTTP/2 SETTINGS_HEADER_TABLE_SIZE (0x1)
    HeaderTableSize,
    /// HTTP/2 SETTINGS_ENABLE_PUSH (0x2)
    EnablePush,
    /// HTTP/2 SETTINGS_MAX_FRAME_SIZE (0x5)
    MaxFrameSize,
    /// HTTP/2 SETTINGS_MAX_HEADER_LIST_SIZE (0x6)
    MaxHeaderListSize,
}

impl SettingsParameter {
    /// Every parameter, in encoding order
    pub const ALL: [SettingsParameter; 12] = [
        SettingsParameter::HeaderTableSize,
        SettingsParameter::EnablePush,
        SettingsParameter::UploadBandwidth,
        SettingsParameter::DownloadBandwidth,
        SettingsParameter::RoundTripTime,
        SettingsParameter::MaxConcurrentStreams,
        SettingsParameter::CurrentCwnd,
        SettingsParameter::DownloadRetransRate,
        SettingsParameter::InitialWindowSize,
        SettingsParameter::MaxFrameSize,
        SettingsParameter::MaxHeaderListSize,
        SettingsParameter::ClientCertificateVectorSize,
    ];

    /// Numeric id in the given dialect
    pub fn id(self, dialect: Dialect) -> Option<u32> {
        match dialect {
            Dialect::Spdy => match self {
                SettingsParameter::UploadBandwidth => Some(1),
                SettingsParameter::DownloadBandwidth => Some(2),
                SettingsParameter::RoundTripTime => Some(3),
                SettingsParameter::MaxConcurrentStreams => Some(4),
                SettingsParameter::CurrentCwnd => Some(5),
                SettingsParameter::DownloadRetransRate => Some(6),
                SettingsParameter::InitialWindowSize => Some(7),
                SettingsParameter::ClientCertificateVectorSize => Some(8),
                _ => None,
            },
            Dialect::Http2 => match self {
                SettingsParameter::HeaderTableSize => Some(0x1),
                SettingsParameter::EnablePush => Some(0x2),
                SettingsParameter::MaxConcurrentStreams => Some(0x3),
                SettingsParameter::InitialWindowSize => Some(0x4),
                SettingsParameter::MaxFrameSize => Some(0x5),
                SettingsParameter::MaxHeaderListSize => Some(0x6),
                _ => None,
            },
        }
    }

    /// Parameter for a numeric id, `None` for ids to ignore
    pub fn from_id(dialect: Dialect, id: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|p| p.id(dialect) == Some(id))
    }

    /// Get parameter name
    pub fn name(&self) -> &'static str {
        match self {
            SettingsParameter::UploadBandwidth => "UPLOAD_BANDWIDTH",
            SettingsParameter::DownloadBandwidth => "DOWNLOAD_BANDWIDTH",
            SettingsParameter::RoundTripTime => "ROUND_TRIP_TIME",
            SettingsParameter::MaxConcurrentStreams => "MAX_CONCURRENT_STREAMS",
            SettingsParameter::CurrentCwnd => "CURRENT_CWND",
            SettingsParameter::DownloadRetransRate => "DOWNLOAD_RETRANS_RATE",
            SettingsParameter::InitialWindowSize => "INITIAL_WINDOW_SIZE",
            SettingsParameter::ClientCertificateVectorSize => "CLIENT_CERTIFICATE_VECTOR_SIZE",
            SettingsParameter::HeaderTableSize => "HEADER_TABLE_SIZE",
            SettingsParameter::EnablePush => "ENABLE_PUSH",
            SettingsParameter::MaxFrameSize => "MAX_FRAME_SIZE",
            SettingsParameter::MaxHeaderListSize => "MAX_HEADER_LIST_SIZE",
        }
    }
}

impl fmt::Display for SettingsParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Set of SETTINGS values; `None` means "not carried"
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Settings {
    pub upload_bandwidth: Option<u32>,
    pub download_bandwidth: Option<u32>,
    pub round_trip_time: Option<u32>,
    pub max_concurrent_streams: Option<u32>,
    pub current_cwnd: Option<u32>,
    pub download_retrans_rate: Option<u32>,
    pub initial_window_size: Option<u32>,
    pub client_certificate_vector_size: Option<u32>,
    pub header_table_size: Option<u32>,
    pub enable_push: Option<u32>,
    pub max_frame_size: Option<u32>,
    pub max_header_list_size: Option<u32>,
}

impl Settings {
    /// Create empty settings
    pub fn new() -> Self {
        Settings::default()
    }

    fn slot(&mut self, param: SettingsParameter) -> &mut Option<u32> {
        match param {
            SettingsParameter::UploadBandwidth => &mut self.upload_bandwidth,
            SettingsParameter::DownloadBandwidth => &mut self.download_bandwidth,
            SettingsParameter::RoundTripTime => &mut self.round_trip_time,
            SettingsParameter::MaxConcurrentStreams => &mut self.max_concurrent_streams,
            SettingsParameter::CurrentCwnd => &mut self.current_cwnd,
            SettingsParameter::DownloadRetransRate => &mut self.download_retrans_rate,
            SettingsParameter::InitialWindowSize => &mut self.initial_window_size,
            SettingsParameter::ClientCertificateVectorSize => {
                &mut self.client_certificate_vector_size
            }
            SettingsParameter::HeaderTableSize => &mut self.header_table_size,
            SettingsParameter::EnablePush => &mut self.enable_push,
            SettingsParameter::MaxFrameSize => &mut self.max_frame_size,
            SettingsParameter::MaxHeaderListSize => &mut self.max_header_list_size,
        }
    }

    /// Value of a parameter
    pub fn get(&self, param: SettingsParameter) -> Option<u32> {
        match param {
            SettingsParameter::UploadBandwidth => self.upload_bandwidth,
            SettingsParameter::DownloadBandwidth => self.download_bandwidth,
            SettingsParameter::RoundTripTime => self.round_trip_time,
            SettingsParameter::MaxConcurrentStreams => self.max_concurrent_streams,
            SettingsParameter::CurrentCwnd => self.current_cwnd,
            SettingsParameter::DownloadRetransRate => self.download_retrans_rate,
            SettingsParameter::InitialWindowSize => self.initial_window_size,
            SettingsParameter::ClientCertificateVectorSize => self.client_certificate_vector_size,
            SettingsParameter::HeaderTableSize => self.header_table_size,
            SettingsParameter::EnablePush => self.enable_push,
            SettingsParameter::MaxFrameSize => self.max_frame_size,
            SettingsParameter::MaxHeaderListSize => self.max_header_list_size,
        }
    }

    /// Set a parameter
    pub fn set(&mut self, param: SettingsParameter, value: u32) {
        *self.slot(param) = Some(value);
    }

    /// Parameters carried by this set, in encoding order
    pub fn iter(&self) -> impl Iterator<Item = (SettingsParameter, u32)> + '_ {
        SettingsParameter::ALL
            .iter()
            .filter_map(move |p| self.get(*p).map(|v| (*p, v)))
    }

    /// Parameters the given dialect can put on the wire
    pub fn wire_entries(&self, dialect: Dialect) -> Vec<(u32, u32)> {
        self.iter()
            .filter_map(|(p, v)| p.id(dialect).map(|id| (id, v)))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    /// Validate settings values
    pub fn validate(&self) -> Result<()> {
        if let Some(size) = self.initial_window_size {
            if size > MAX_STREAM_ID {
                return Err(Error::FlowControl(format!(
                    "Initial window size {} exceeds maximum (2^31-1)",
                    size
                )));
            }
        }

        if let Some(push) = self.enable_push {
            if push > 1 {
                return Err(Error::Protocol(format!("ENABLE_PUSH must be 0 or 1, got {}", push)));
            }
        }

        if let Some(size) = self.max_frame_size {
            if !(16384..=16777215).contains(&size) {
                return Err(Error::Protocol(format!(
                    "Max frame size {} outside valid range (16384-16777215)",
                    size
                )));
            }
        }

        Ok(())
    }

    /// Merge settings from another set (values in `other` win)
    pub fn merge(&mut self, other: &Settings) {
        for (param, value) in other.iter() {
            self.set(param, value);
        }
    }
}

/// Builder for settings
#[derive(Debug, Default)]
pub struct SettingsBuilder {
    settings: Settings,
}

impl SettingsBuilder {
    /// Create a new settings builder
    pub fn new() -> Self {
        SettingsBuilder::default()
    }

    pub fn max_concurrent_streams(mut self, max: u32) -> Self {
        self.settings.max_concurrent_streams = Some(max);
        self
    }

    pub fn initial_window_size(mut self, size: u32) -> Self {
        self.settings.initial_window_size = Some(size);
        self
    }

    pub fn header_table_size(mut self, size: u32) -> Self {
        self.settings.header_table_size = Some(size);
        self
    }

    pub fn enable_push(mut self, enable: bool) -> Self {
        self.settings.enable_push = Some(enable as u32);
        self
    }

    pub fn max_frame_size(mut self, size: u32) -> Self {
        self.settings.max_frame_size = Some(size);
        self
    }

    pub fn max_header_list_size(mut self, size: u32) -> Self {
        self.settings.max_header_list_size = Some(size);
        self
    }

    /// Set any parameter by name
    pub fn parameter(mut self, param: SettingsParameter, value: u32) -> Self {
        self.settings.set(param, value);
        self
    }

    /// Build the settings
    pub fn build(self) -> Result<Settings> {
        self.settings.validate()?;
        Ok(self.settings)
    }
}

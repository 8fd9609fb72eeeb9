use serde::Deserialize;
use std::time::Duration;

pub const PROTOCOL_VERSION: u32 = 1;

/// Fixed facts about the board the bitstream is built for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BadgePlatform {
    pub name: &'static str,
    pub device: &'static str,
    pub package: &'static str,
    pub default_clk: &'static str,
    pub identity: DeviceIdentity,
}

pub const MCH2021_BADGE: BadgePlatform = BadgePlatform {
    name: "MCH2021 badge",
    device: "iCE40UP5K",
    package: "SG48",
    default_clk: "SB_HFOSC",
    identity: DeviceIdentity {
        vid: 0x16d0,
        pid: 0x0f9a,
    },
};

/// USB vendor/product pair of the badge's serial bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct DeviceIdentity {
    pub vid: u16,
    pub pid: u16,
}

impl Default for DeviceIdentity {
    fn default() -> Self {
        MCH2021_BADGE.identity
    }
}

impl std::fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vid, self.pid)
    }
}

/// Every constant of the raw REPL upload protocol.
///
/// An empty TOML document deserializes to the protocol as shipped.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub version: u32,
    pub identity: DeviceIdentity,
    pub baud_rate: u32,
    pub read_timeout_ms: u64,
    /// Upper bound on waiting for the target to recover after the first interrupt.
    pub settle_ms: u64,
    pub prompt_timeout_ms: u64,
    pub execute_timeout_ms: u64,
    /// Encoded characters per append statement.
    pub chunk_size: usize,
    pub verify_execution: bool,
    pub markers: Markers,
    pub control: ControlBytes,
    pub remote: RemoteNames,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            version: PROTOCOL_VERSION,
            identity: DeviceIdentity::default(),
            baud_rate: 115_200,
            read_timeout_ms: 1000,
            settle_ms: 2000,
            prompt_timeout_ms: 3000,
            execute_timeout_ms: 5000,
            chunk_size: 384,
            verify_execution: true,
            markers: Markers::default(),
            control: ControlBytes::default(),
            remote: RemoteNames::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Markers {
    pub interactive_prompt: String,
    pub raw_banner: String,
    /// Sent by the target after each statement it received in raw mode.
    pub raw_ack: String,
    /// Terminates the reply to one raw-mode statement.
    pub raw_reply_end: String,
}

impl Default for Markers {
    fn default() -> Self {
        Self {
            interactive_prompt: ">>> ".to_string(),
            raw_banner: "raw REPL; CTRL-B to exit\r\n>".to_string(),
            raw_ack: "OK".to_string(),
            raw_reply_end: "\x04>".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ControlBytes {
    pub interrupt: u8,
    pub enter_raw: u8,
    pub exit_raw: u8,
    pub end_of_input: u8,
}

impl Default for ControlBytes {
    fn default() -> Self {
        Self {
            interrupt: 0x03,
            enter_raw: 0x01,
            exit_raw: 0x02,
            end_of_input: 0x04,
        }
    }
}

/// Names used inside the statements executed on the badge.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteNames {
    pub loader_module: String,
    pub load_function: String,
    pub codec_module: String,
    pub decode_function: String,
    pub accumulator: String,
}

impl Default for RemoteNames {
    fn default() -> Self {
        Self {
            loader_module: "ice40".to_string(),
            load_function: "load_bitstream".to_string(),
            codec_module: "binascii".to_string(),
            decode_function: "a2b_base64".to_string(),
            accumulator: "bitstream".to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
    #[error("unsupported protocol version {found} (expected {PROTOCOL_VERSION})")]
    UnsupportedVersion { found: u32 },
    #[error("invalid protocol setting: {0}")]
    Invalid(String),
}

impl ProtocolConfig {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != PROTOCOL_VERSION {
            return Err(ConfigError::UnsupportedVersion {
                found: self.version,
            });
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk_size must be > 0".into()));
        }
        if self.markers.interactive_prompt.is_empty() || self.markers.raw_banner.is_empty() {
            return Err(ConfigError::Invalid("prompt markers must not be empty".into()));
        }
        Ok(())
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn prompt_timeout(&self) -> Duration {
        Duration::from_millis(self.prompt_timeout_ms)
    }

    pub fn execute_timeout(&self) -> Duration {
        Duration::from_millis(self.execute_timeout_ms)
    }
}

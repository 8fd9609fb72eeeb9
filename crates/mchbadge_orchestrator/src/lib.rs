//! Bitstream flashing orchestrator for the MCH2021 badge.
//!
//! Reads a TOML config file, resolves the bitstream produced by the HDL
//! build, picks the link backend and runs the upload.
//!
//! Supported modes:
//! - `sim`: SimLink (dry run, CI)
//! - `serial`: StreamLink on the badge's USB serial port, located by
//!   vendor/product id unless `serial.port` pins it

use mchbadge_hal::config::{ConfigError, DeviceIdentity, ProtocolConfig, MCH2021_BADGE};
use mchbadge_hal::sim::SimLink;
use mchbadge_hal::traits::{LinkError, SerialLink};
use mchbadge_repl::{upload, Phase, RawReplDriver, UploadError, UploadReport};
use mchbadge_serial::locator::{self, Candidate};
use mchbadge_serial::StreamLink;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level flashing config, deserialized from TOML.
#[derive(Debug, Deserialize)]
pub struct OrchestratorConfig {
    pub mode: ModeConfig,
    #[serde(default)]
    pub serial: SerialSection,
    #[serde(default)]
    pub artifacts: ArtifactsSection,
    #[serde(default)]
    pub protocol: ProtocolConfig,
}

#[derive(Debug, Deserialize)]
pub struct ModeConfig {
    #[serde(rename = "type")]
    pub mode_type: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct SerialSection {
    /// Skip the USB lookup and open this port directly.
    #[serde(default)]
    pub port: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ArtifactsSection {
    #[serde(default = "default_build_dir")]
    pub build_dir: PathBuf,
}

impl Default for ArtifactsSection {
    fn default() -> Self {
        Self {
            build_dir: default_build_dir(),
        }
    }
}

fn default_build_dir() -> PathBuf {
    PathBuf::from("build")
}

/// Parsed mode selection.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkMode {
    Sim,
    Serial { port: Option<String> },
}

impl OrchestratorConfig {
    /// Parse from TOML string.
    pub fn from_toml(content: &str) -> Result<Self, OrchestratorError> {
        let config: Self = toml::from_str(content)
            .map_err(|e| OrchestratorError::ConfigError(e.to_string()))?;
        config
            .protocol
            .validate()
            .map_err(|e: ConfigError| OrchestratorError::ConfigError(e.to_string()))?;
        Ok(config)
    }

    /// Parse from TOML file path.
    pub fn from_file(path: &str) -> Result<Self, OrchestratorError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| OrchestratorError::ConfigError(format!("{path}: {e}")))?;
        Self::from_toml(&content)
    }

    /// Resolve the mode from config.
    pub fn link_mode(&self) -> Result<LinkMode, OrchestratorError> {
        match self.mode.mode_type.as_str() {
            "sim" => Ok(LinkMode::Sim),
            "serial" => Ok(LinkMode::Serial {
                port: self.serial.port.clone(),
            }),
            other => Err(OrchestratorError::ConfigError(format!(
                "unknown mode type: {other}"
            ))),
        }
    }

    pub fn artifacts(&self) -> ArtifactDir {
        ArtifactDir::new(&self.artifacts.build_dir)
    }
}

/// Output directory of the HDL build; bitstreams are `<name>.bin`.
#[derive(Debug, Clone)]
pub struct ArtifactDir {
    root: PathBuf,
}

impl ArtifactDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_of(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.bin"))
    }

    pub fn bitstream(&self, name: &str) -> Result<Vec<u8>, OrchestratorError> {
        read_bitstream(&self.path_of(name))
    }
}

/// Accept either a path to a `.bin` file or the name of a build product.
pub fn resolve_bitstream(
    config: &OrchestratorConfig,
    target: &str,
) -> Result<Vec<u8>, OrchestratorError> {
    let direct = Path::new(target);
    if direct.extension().and_then(|ext| ext.to_str()) == Some("bin") {
        return read_bitstream(direct);
    }
    config.artifacts().bitstream(target)
}

fn read_bitstream(path: &Path) -> Result<Vec<u8>, OrchestratorError> {
    let bytes = std::fs::read(path)
        .map_err(|e| OrchestratorError::Artifact(format!("{}: {e}", path.display())))?;
    if bytes.is_empty() {
        return Err(OrchestratorError::Artifact(format!(
            "{}: bitstream is empty",
            path.display()
        )));
    }
    log::info!("Bitstream {} ({} bytes)", path.display(), bytes.len());
    Ok(bytes)
}

/// Create the link backend selected by config.
pub fn open_link(config: &OrchestratorConfig) -> Result<Box<dyn SerialLink>, OrchestratorError> {
    match config.link_mode()? {
        LinkMode::Sim => Ok(Box::new(SimLink::new(&config.protocol))),
        LinkMode::Serial { port: Some(path) } => {
            let link = StreamLink::open(&path, &config.protocol)
                .map_err(|source| OrchestratorError::Open { path, source })?;
            Ok(Box::new(link))
        }
        LinkMode::Serial { port: None } => {
            let candidates = locator::enumerate().map_err(OrchestratorError::Link)?;
            let link = open_located(&candidates, config.protocol.identity, |path| {
                StreamLink::open(path, &config.protocol)
            })?;
            Ok(Box::new(link))
        }
    }
}

/// Select the badge among `candidates` and open it with `open`.
///
/// `open` is not called when nothing matches.
pub fn open_located<L, F>(
    candidates: &[Candidate],
    identity: DeviceIdentity,
    open: F,
) -> Result<L, OrchestratorError>
where
    F: FnOnce(&str) -> Result<L, LinkError>,
{
    let path = locator::select(candidates, identity)
        .ok_or(OrchestratorError::DeviceNotFound { identity })?;
    open(&path).map_err(|source| OrchestratorError::Open { path, source })
}

/// Upload over an already opened link.
pub fn flash_link<L: SerialLink>(
    link: L,
    protocol: &ProtocolConfig,
    bitstream: &[u8],
) -> Result<UploadReport, OrchestratorError> {
    log::info!("Flashing {} bytes via {}", bitstream.len(), link.endpoint());
    let mut driver = RawReplDriver::new(link, protocol);
    Ok(upload(&mut driver, bitstream)?)
}

/// Locate among `candidates`, open with `open`, upload.
pub fn flash_with<L, F>(
    candidates: &[Candidate],
    protocol: &ProtocolConfig,
    bitstream: &[u8],
    open: F,
) -> Result<UploadReport, OrchestratorError>
where
    L: SerialLink,
    F: FnOnce(&str) -> Result<L, LinkError>,
{
    let link = open_located(candidates, protocol.identity, open)?;
    flash_link(link, protocol, bitstream)
}

/// Run a complete flash as configured.
pub fn flash(config: &OrchestratorConfig, bitstream: &[u8]) -> Result<UploadReport, OrchestratorError> {
    log::info!(
        "Target: {} ({} {}, usb {})",
        MCH2021_BADGE.name,
        MCH2021_BADGE.device,
        MCH2021_BADGE.package,
        config.protocol.identity
    );
    let link = open_link(config)?;
    flash_link(link, &config.protocol, bitstream)
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("config error: {0}")]
    ConfigError(String),
    #[error("artifact error: {0}")]
    Artifact(String),
    #[error("locate failed: no serial port matches {identity}")]
    DeviceNotFound { identity: DeviceIdentity },
    #[error("locate failed: cannot open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: LinkError,
    },
    #[error("locate failed: {0}")]
    Link(#[source] LinkError),
    #[error(transparent)]
    Upload(#[from] UploadError),
}

impl OrchestratorError {
    /// Flash phase the failure belongs to; `None` for setup errors.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            OrchestratorError::ConfigError(_) | OrchestratorError::Artifact(_) => None,
            OrchestratorError::DeviceNotFound { .. }
            | OrchestratorError::Open { .. }
            | OrchestratorError::Link(_) => Some(Phase::Locate),
            OrchestratorError::Upload(e) => Some(e.phase()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sim_config() {
        let toml = r#"
[mode]
type = "sim"
"#;
        let config = OrchestratorConfig::from_toml(toml).unwrap();
        assert_eq!(config.link_mode().unwrap(), LinkMode::Sim);
        assert_eq!(config.protocol.baud_rate, 115_200);
        assert_eq!(config.artifacts.build_dir, PathBuf::from("build"));
    }

    #[test]
    fn parses_serial_config_with_protocol_overrides() {
        let toml = r#"
[mode]
type = "serial"

[serial]
port = "/dev/ttyACM0"

[artifacts]
build_dir = "out/ice40"

[protocol]
chunk_size = 256
settle_ms = 1500

[protocol.identity]
vid = 0x16d0
pid = 0x0f9a
"#;
        let config = OrchestratorConfig::from_toml(toml).unwrap();
        assert_eq!(
            config.link_mode().unwrap(),
            LinkMode::Serial {
                port: Some("/dev/ttyACM0".into())
            }
        );
        assert_eq!(config.protocol.chunk_size, 256);
        assert_eq!(config.protocol.settle_ms, 1500);
        assert_eq!(
            config.artifacts().path_of("top"),
            PathBuf::from("out/ice40/top.bin")
        );
    }

    #[test]
    fn serial_without_port_uses_locator() {
        let config = OrchestratorConfig::from_toml("[mode]\ntype = \"serial\"\n").unwrap();
        assert_eq!(config.link_mode().unwrap(), LinkMode::Serial { port: None });
    }

    #[test]
    fn rejects_unknown_mode() {
        let config = OrchestratorConfig::from_toml("[mode]\ntype = \"jtag\"\n").unwrap();
        assert!(config.link_mode().is_err());
    }

    #[test]
    fn rejects_invalid_protocol_section() {
        let toml = r#"
[mode]
type = "sim"

[protocol]
version = 7
"#;
        let err = OrchestratorConfig::from_toml(toml).unwrap_err();
        assert!(err.to_string().contains("unsupported protocol version 7"));
    }

    #[test]
    fn no_candidates_fails_before_open() {
        let mut opened = false;
        let result: Result<SimLink, _> = open_located(&[], DeviceIdentity::default(), |_| {
            opened = true;
            Ok(SimLink::default())
        });
        let err = result.err().unwrap();
        assert!(matches!(err, OrchestratorError::DeviceNotFound { .. }));
        assert_eq!(err.phase(), Some(Phase::Locate));
        assert!(!opened);
    }

    #[test]
    fn open_failure_names_the_port() {
        let candidates = vec![Candidate {
            path: "/dev/ttyACM7".into(),
            usb: Some(DeviceIdentity::default()),
        }];
        let result: Result<SimLink, _> = open_located(&candidates, DeviceIdentity::default(), |_| {
            Err(LinkError::Io("permission denied".into()))
        });
        let err = result.err().unwrap();
        assert_eq!(
            err.to_string(),
            "locate failed: cannot open /dev/ttyACM7: serial I/O error: permission denied"
        );
    }

    #[test]
    fn sim_mode_flashes_end_to_end() {
        let config = OrchestratorConfig::from_toml("[mode]\ntype = \"sim\"\n").unwrap();
        let report = flash(&config, &[0xff; 1000]).unwrap();
        assert_eq!(report.payload_len, 1000);
        assert_eq!(report.chunks, report.encoded_len.div_ceil(384));
    }

    #[test]
    fn missing_artifact_is_reported() {
        let config = OrchestratorConfig::from_toml(
            "[mode]\ntype = \"sim\"\n[artifacts]\nbuild_dir = \"/nonexistent/build\"\n",
        )
        .unwrap();
        let err = resolve_bitstream(&config, "top").unwrap_err();
        assert!(matches!(err, OrchestratorError::Artifact(_)));
        assert!(err.to_string().contains("/nonexistent/build/top.bin"));
        assert_eq!(err.phase(), None);
    }

    #[test]
    fn parses_badge_sim_toml_file() {
        let config = OrchestratorConfig::from_file("../../config/badge_sim.toml").unwrap();
        assert_eq!(config.link_mode().unwrap(), LinkMode::Sim);
    }

    #[test]
    fn parses_badge_serial_toml_file() {
        let config = OrchestratorConfig::from_file("../../config/badge_serial.toml").unwrap();
        assert_eq!(config.link_mode().unwrap(), LinkMode::Serial { port: None });
        assert_eq!(config.protocol.identity, DeviceIdentity::default());
    }
}

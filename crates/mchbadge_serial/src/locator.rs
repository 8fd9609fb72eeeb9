use mchbadge_hal::config::DeviceIdentity;
use mchbadge_hal::traits::LinkError;
use tokio_serial::SerialPortType;

/// One serial port as reported by the operating system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub path: String,
    /// `None` for ports without USB metadata (PCI, Bluetooth, unknown).
    pub usb: Option<DeviceIdentity>,
}

/// Snapshot the host's serial ports.
pub fn enumerate() -> Result<Vec<Candidate>, LinkError> {
    let ports = tokio_serial::available_ports()
        .map_err(|e| LinkError::Io(format!("enumerate serial ports: {e}")))?;

    let candidates: Vec<Candidate> = ports
        .into_iter()
        .map(|port| Candidate {
            usb: match port.port_type {
                SerialPortType::UsbPort(info) => Some(DeviceIdentity {
                    vid: info.vid,
                    pid: info.pid,
                }),
                _ => None,
            },
            path: port.port_name,
        })
        .collect();

    log::debug!("{} serial port(s) visible", candidates.len());
    Ok(candidates)
}

/// Pick the lexicographically first port whose USB identity matches.
pub fn select(candidates: &[Candidate], identity: DeviceIdentity) -> Option<String> {
    let mut matching: Vec<&str> = candidates
        .iter()
        .filter(|c| c.usb == Some(identity))
        .map(|c| c.path.as_str())
        .collect();
    matching.sort_unstable();
    matching.dedup();

    if matching.len() > 1 {
        log::warn!(
            "{} ports match {identity}, using {}",
            matching.len(),
            matching[0]
        );
    }
    matching.first().map(|path| path.to_string())
}

/// Re-enumerate and select in one step.
pub fn locate(identity: DeviceIdentity) -> Result<Option<String>, LinkError> {
    let found = select(&enumerate()?, identity);
    match &found {
        Some(path) => log::info!("Badge {identity} found at {path}"),
        None => log::info!("No serial port matches {identity}"),
    }
    Ok(found)
}

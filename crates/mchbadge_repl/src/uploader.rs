use crate::accumulator::RemoteAccumulator;
use crate::driver::{ExecOutcome, RawReplDriver, ReplState};
use crate::error::{abbreviate, Phase, UploadError};
use crate::payload;
use mchbadge_hal::traits::SerialLink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadReport {
    pub payload_len: usize,
    pub encoded_len: usize,
    pub chunks: usize,
}

/// Stream `bitstream` into the badge and load it onto the FPGA.
///
/// Synchronizes first unless the driver is already in raw mode. Once raw
/// mode has been reached, raw mode is always exited again, also when a
/// later step fails; the first error is the one returned.
pub fn upload<L: SerialLink>(
    driver: &mut RawReplDriver<L>,
    bitstream: &[u8],
) -> Result<UploadReport, UploadError> {
    if driver.state() != ReplState::RawExecutionReady {
        driver.synchronize()?;
    }

    let result = transfer_and_load(driver, bitstream);

    match (driver.exit_raw(), &result) {
        (Err(e), Ok(_)) => return Err(e),
        (Err(e), Err(_)) => log::warn!("could not leave raw REPL after failed upload: {e}"),
        (Ok(()), _) => {}
    }

    if let Ok(report) = &result {
        log::info!(
            "Uploaded {} bytes ({} encoded, {} chunks)",
            report.payload_len,
            report.encoded_len,
            report.chunks
        );
    }
    result
}

fn transfer_and_load<L: SerialLink>(
    driver: &mut RawReplDriver<L>,
    bitstream: &[u8],
) -> Result<UploadReport, UploadError> {
    let chunk_size = driver.config().chunk_size;
    let verify = driver.config().verify_execution;
    let acc = RemoteAccumulator::new(driver.config().remote.clone());

    let encoded = payload::encode(bitstream);
    let chunks = payload::split(&encoded, chunk_size);

    driver.enter_phase(Phase::Transfer);
    for import in acc.imports() {
        run(driver, &import)?;
    }

    let length = run(driver, &acc.init())?;
    if verify && length.trim() != "0" {
        return Err(UploadError::ProtocolDesync {
            phase: Phase::Transfer,
            detail: format!(
                "`{}` not empty after init (len {:?})",
                acc.name(),
                length.trim()
            ),
        });
    }

    for (index, chunk) in chunks.iter().enumerate() {
        run(driver, &acc.append(chunk))?;
        log::debug!("chunk {}/{} ({} chars)", index + 1, chunks.len(), chunk.len());
    }

    driver.enter_phase(Phase::Load);
    let loaded = run(driver, &acc.decode()).and_then(|_| run(driver, &acc.load()));
    let released = run(driver, &acc.release());
    loaded?;
    released?;

    Ok(UploadReport {
        payload_len: bitstream.len(),
        encoded_len: encoded.len(),
        chunks: chunks.len(),
    })
}

/// Execute and require acceptance; returns the statement's stdout.
fn run<L: SerialLink>(
    driver: &mut RawReplDriver<L>,
    statement: &str,
) -> Result<String, UploadError> {
    match driver.execute(statement)? {
        ExecOutcome::Accepted { output } => Ok(output),
        ExecOutcome::Rejected { remote } => Err(UploadError::Rejected {
            phase: driver.phase(),
            statement: abbreviate(statement),
            remote,
        }),
        ExecOutcome::TimedOut { partial } => {
            log::warn!("no complete reply, got {partial:?}");
            Err(UploadError::SynchronizationTimeout {
                phase: driver.phase(),
                expected: format!("reply to `{}`", abbreviate(statement)),
            })
        }
    }
}

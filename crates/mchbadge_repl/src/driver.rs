use crate::error::{Phase, UploadError};
use mchbadge_hal::config::ProtocolConfig;
use mchbadge_hal::traits::{LinkError, SerialLink};
use std::time::Duration;

/// Where the driver believes the remote interpreter is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplState {
    Unknown,
    InteractivePrompt,
    RawPromptArmed,
    RawExecutionReady,
}

/// Result of one raw-mode statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecOutcome {
    Accepted { output: String },
    /// The statement ran and raised; `remote` is the interpreter's stderr.
    Rejected { remote: String },
    /// No complete reply within the execute timeout.
    TimedOut { partial: String },
}

/// Drives the badge's interpreter into raw execution mode and runs statements.
pub struct RawReplDriver<L: SerialLink> {
    link: L,
    config: ProtocolConfig,
    state: ReplState,
    phase: Phase,
}

impl<L: SerialLink> RawReplDriver<L> {
    pub fn new(link: L, config: &ProtocolConfig) -> Self {
        Self {
            link,
            config: config.clone(),
            state: ReplState::Unknown,
            phase: Phase::Synchronize,
        }
    }

    pub fn state(&self) -> ReplState {
        self.state
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn into_link(self) -> L {
        self.link
    }

    /// Tag subsequent failures with `phase`.
    pub fn enter_phase(&mut self, phase: Phase) {
        if self.phase != phase {
            log::info!("{}: entering {phase}", self.link.endpoint());
            self.phase = phase;
        }
    }

    /// Unknown → InteractivePrompt.
    ///
    /// Interrupts whatever is running, gives the target up to the settle
    /// time to come back, then interrupts once more in case the first one
    /// landed during a reboot. Nothing is verified here.
    pub fn interrupt(&mut self) -> Result<(), UploadError> {
        let interrupt = [b'\r', self.config.control.interrupt];
        let prompt = self.config.markers.interactive_prompt.clone();

        self.write(&interrupt)?;
        let seen = self.read_until(prompt.as_bytes(), self.config.settle())?;
        if seen.is_empty() {
            log::debug!("no reply to first interrupt, target may be rebooting");
        }
        self.write(&interrupt)?;

        self.state = ReplState::InteractivePrompt;
        Ok(())
    }

    /// InteractivePrompt → RawPromptArmed: wait for the `>>> ` prompt.
    pub fn await_prompt(&mut self) -> Result<(), UploadError> {
        let prompt = self.config.markers.interactive_prompt.clone();
        self.expect_marker(&prompt, self.config.prompt_timeout())?;
        self.state = ReplState::RawPromptArmed;
        Ok(())
    }

    /// RawPromptArmed → RawExecutionReady.
    pub fn enter_raw(&mut self) -> Result<(), UploadError> {
        if self.state != ReplState::RawPromptArmed {
            return Err(self.desync(format!(
                "cannot enter raw mode from {:?}",
                self.state
            )));
        }
        self.write(&[b'\r', self.config.control.enter_raw])?;
        let banner = self.config.markers.raw_banner.clone();
        self.expect_marker(&banner, self.config.prompt_timeout())?;
        self.state = ReplState::RawExecutionReady;
        log::info!("{}: raw REPL ready", self.link.endpoint());
        Ok(())
    }

    /// Full walk from any state into raw execution mode.
    pub fn synchronize(&mut self) -> Result<(), UploadError> {
        self.enter_phase(Phase::Synchronize);
        self.interrupt()?;
        self.await_prompt()?;
        self.enter_raw()
    }

    /// Send one statement followed by end-of-input.
    ///
    /// With `verify_execution` off this returns `Accepted` with no output as
    /// soon as the bytes are written.
    pub fn execute(&mut self, statement: &str) -> Result<ExecOutcome, UploadError> {
        if self.state != ReplState::RawExecutionReady {
            return Err(self.desync(format!("execute while in {:?}", self.state)));
        }

        let mut bytes = Vec::with_capacity(statement.len() + 1);
        bytes.extend_from_slice(statement.as_bytes());
        bytes.push(self.config.control.end_of_input);
        self.write(&bytes)?;

        if !self.config.verify_execution {
            return Ok(ExecOutcome::Accepted {
                output: String::new(),
            });
        }

        let end = self.config.markers.raw_reply_end.clone();
        let reply = self.read_until(end.as_bytes(), self.config.execute_timeout())?;
        self.parse_reply(&reply)
    }

    /// Leave raw mode. Unverified; the driver assumes nothing afterwards.
    pub fn exit_raw(&mut self) -> Result<(), UploadError> {
        self.write(&[self.config.control.exit_raw])?;
        self.state = ReplState::Unknown;
        log::info!("{}: left raw REPL", self.link.endpoint());
        Ok(())
    }

    /// Reply layout: ack, stdout, end-of-input, stderr, end-of-input, `>`.
    fn parse_reply(&self, reply: &[u8]) -> Result<ExecOutcome, UploadError> {
        let end = self.config.markers.raw_reply_end.as_bytes();
        let Some(body) = reply.strip_suffix(end) else {
            return Ok(ExecOutcome::TimedOut {
                partial: String::from_utf8_lossy(reply).into_owned(),
            });
        };

        let ack = self.config.markers.raw_ack.as_bytes();
        let Some(body) = body.strip_prefix(ack) else {
            return Err(self.desync(format!(
                "expected {:?} before reply, got {:?}",
                self.config.markers.raw_ack,
                String::from_utf8_lossy(body)
            )));
        };

        let eoi = self.config.control.end_of_input;
        let (stdout, stderr) = match body.iter().position(|&b| b == eoi) {
            Some(pos) => (&body[..pos], &body[pos + 1..]),
            None => {
                return Err(self.desync(format!(
                    "reply without output separator: {:?}",
                    String::from_utf8_lossy(body)
                )));
            }
        };

        let stderr = String::from_utf8_lossy(stderr).trim().to_string();
        if !stderr.is_empty() {
            return Ok(ExecOutcome::Rejected { remote: stderr });
        }
        Ok(ExecOutcome::Accepted {
            output: String::from_utf8_lossy(stdout).into_owned(),
        })
    }

    fn expect_marker(&mut self, marker: &str, timeout: Duration) -> Result<(), UploadError> {
        let seen = self.read_until(marker.as_bytes(), timeout)?;
        if seen.ends_with(marker.as_bytes()) {
            return Ok(());
        }
        log::warn!(
            "{}: {marker:?} not seen within {timeout:?}, got {:?}",
            self.link.endpoint(),
            String::from_utf8_lossy(&seen)
        );
        Err(UploadError::SynchronizationTimeout {
            phase: self.phase,
            expected: format!("{marker:?}"),
        })
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), UploadError> {
        self.link.write(bytes).map_err(|e| self.transport(e))
    }

    fn read_until(&mut self, pattern: &[u8], timeout: Duration) -> Result<Vec<u8>, UploadError> {
        self.link
            .read_until(pattern, timeout)
            .map_err(|e| self.transport(e))
    }

    fn transport(&self, source: LinkError) -> UploadError {
        UploadError::Transport {
            phase: self.phase,
            source,
        }
    }

    fn desync(&self, detail: String) -> UploadError {
        UploadError::ProtocolDesync {
            phase: self.phase,
            detail,
        }
    }
}

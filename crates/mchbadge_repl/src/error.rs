use mchbadge_hal::traits::LinkError;
use std::fmt;
use thiserror::Error;

/// Stage of a flash attempt, reported with every failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Locate,
    Synchronize,
    Transfer,
    Load,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Locate => "locate",
            Phase::Synchronize => "synchronize",
            Phase::Transfer => "transfer",
            Phase::Load => "load",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("{phase} failed: transport error: {source}")]
    Transport {
        phase: Phase,
        #[source]
        source: LinkError,
    },
    #[error("{phase} failed: timed out waiting for {expected}")]
    SynchronizationTimeout { phase: Phase, expected: String },
    #[error("{phase} failed: protocol desync: {detail}")]
    ProtocolDesync { phase: Phase, detail: String },
    #[error("{phase} failed: badge rejected `{statement}`: {remote}")]
    Rejected {
        phase: Phase,
        statement: String,
        remote: String,
    },
}

impl UploadError {
    pub fn phase(&self) -> Phase {
        match self {
            UploadError::Transport { phase, .. }
            | UploadError::SynchronizationTimeout { phase, .. }
            | UploadError::ProtocolDesync { phase, .. }
            | UploadError::Rejected { phase, .. } => *phase,
        }
    }
}

/// Shorten a statement for error text; chunk appends can be hundreds of bytes.
pub(crate) fn abbreviate(statement: &str) -> String {
    const MAX: usize = 48;
    let flat = statement.replace('\n', "; ");
    match flat.char_indices().nth(MAX) {
        Some((cut, _)) => format!("{}...", &flat[..cut]),
        None => flat,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_phase() {
        let err = UploadError::SynchronizationTimeout {
            phase: Phase::Synchronize,
            expected: "\">>> \"".into(),
        };
        assert_eq!(err.to_string(), "synchronize failed: timed out waiting for \">>> \"");
        assert_eq!(err.phase(), Phase::Synchronize);

        let err = UploadError::Transport {
            phase: Phase::Transfer,
            source: LinkError::Closed,
        };
        assert!(err.to_string().starts_with("transfer failed: transport error"));
    }

    #[test]
    fn abbreviate_keeps_short_statements() {
        assert_eq!(abbreviate("import ice40"), "import ice40");
        assert_eq!(abbreviate("a = b''\nprint(len(a))"), "a = b''; print(len(a))");
        let long = format!("bitstream += b'{}'", "A".repeat(200));
        let short = abbreviate(&long);
        assert!(short.ends_with("..."));
        assert_eq!(short.len(), 48 + 3);
    }
}

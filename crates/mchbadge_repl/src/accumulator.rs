use mchbadge_hal::config::RemoteNames;

/// Statements that manage the buffer the bitstream is assembled in on the badge.
///
/// The variable lives in the interpreter's global namespace and survives
/// between sessions, so every upload starts with `init` and ends with
/// `release`.
#[derive(Debug, Clone)]
pub struct RemoteAccumulator {
    names: RemoteNames,
}

impl RemoteAccumulator {
    pub fn new(names: RemoteNames) -> Self {
        Self { names }
    }

    pub fn name(&self) -> &str {
        &self.names.accumulator
    }

    pub fn imports(&self) -> [String; 2] {
        [
            format!("import {}", self.names.loader_module),
            format!("import {}", self.names.codec_module),
        ]
    }

    /// Reset to an empty buffer and report its length, which must be 0.
    pub fn init(&self) -> String {
        let acc = self.name();
        format!("{acc} = b''\nprint(len({acc}))")
    }

    pub fn append(&self, chunk: &str) -> String {
        format!("{} += b'{chunk}'", self.name())
    }

    pub fn decode(&self) -> String {
        let acc = self.name();
        format!(
            "{acc} = {}.{}({acc})",
            self.names.codec_module, self.names.decode_function
        )
    }

    pub fn load(&self) -> String {
        format!(
            "{}.{}({})",
            self.names.loader_module,
            self.names.load_function,
            self.name()
        )
    }

    pub fn release(&self) -> String {
        format!("{} = None", self.name())
    }
}

//! Simulated badge for tests and dry runs.
//!
//! Answers the control bytes of the interactive interpreter and runs the
//! small statement subset used during bitstream upload against an in-memory
//! variable table. Replies are queued immediately, so a pattern that never
//! arrives makes `read_until` return at once with whatever is buffered.

use crate::config::ProtocolConfig;
use crate::traits::{find_end, LinkError, SerialLink};
use base64::Engine as _;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Friendly,
    Raw,
}

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Bytes(Vec<u8>),
    None,
}

pub struct SimLink {
    config: ProtocolConfig,
    mode: Mode,
    responsive: bool,
    raw_supported: bool,
    ignored_interrupts: u32,
    failures: Vec<(String, String)>,
    rx: VecDeque<u8>,
    statement: Vec<u8>,
    written: Vec<u8>,
    vars: HashMap<String, Value>,
    imported: HashSet<String>,
    executed: Vec<String>,
    loaded: Vec<Vec<u8>>,
}

impl SimLink {
    pub fn new(config: &ProtocolConfig) -> Self {
        Self {
            config: config.clone(),
            mode: Mode::Friendly,
            responsive: true,
            raw_supported: true,
            ignored_interrupts: 0,
            failures: Vec::new(),
            rx: VecDeque::new(),
            statement: Vec::new(),
            written: Vec::new(),
            vars: HashMap::new(),
            imported: HashSet::new(),
            executed: Vec::new(),
            loaded: Vec::new(),
        }
    }

    /// A badge that never answers anything.
    pub fn silent(mut self) -> Self {
        self.responsive = false;
        self
    }

    /// Swallow the first `count` interrupts, as a target that is still booting.
    pub fn ignoring_interrupts(mut self, count: u32) -> Self {
        self.ignored_interrupts = count;
        self
    }

    /// Answer the interactive prompt but never enter raw mode.
    pub fn without_raw_mode(mut self) -> Self {
        self.raw_supported = false;
        self
    }

    /// Reply with `error` on stderr for any statement containing `needle`.
    pub fn failing_on(mut self, needle: &str, error: &str) -> Self {
        self.failures.push((needle.to_string(), error.to_string()));
        self
    }

    /// Pre-populate a remote variable, as left behind by an earlier session.
    pub fn with_leftover(mut self, name: &str, contents: &[u8]) -> Self {
        self.vars
            .insert(name.to_string(), Value::Bytes(contents.to_vec()));
        self
    }

    /// Statements executed in raw mode, in order.
    pub fn executed(&self) -> &[String] {
        &self.executed
    }

    /// Every payload handed to the loader.
    pub fn loaded(&self) -> &[Vec<u8>] {
        &self.loaded
    }

    /// All bytes the host has written.
    pub fn written(&self) -> &[u8] {
        &self.written
    }

    pub fn in_raw_mode(&self) -> bool {
        self.mode == Mode::Raw
    }

    /// Contents of a bytes variable, `None` if unset or released.
    pub fn variable(&self, name: &str) -> Option<&[u8]> {
        match self.vars.get(name) {
            Some(Value::Bytes(b)) => Some(b),
            _ => None,
        }
    }

    fn reply(&mut self, bytes: &[u8]) {
        if self.responsive {
            self.rx.extend(bytes.iter().copied());
        }
    }

    fn on_byte(&mut self, byte: u8) {
        let control = self.config.control;
        match self.mode {
            Mode::Friendly => {
                if byte == control.interrupt {
                    if self.ignored_interrupts > 0 {
                        self.ignored_interrupts -= 1;
                        return;
                    }
                    let prompt = format!("\r\n{}", self.config.markers.interactive_prompt);
                    self.reply(prompt.as_bytes());
                } else if byte == control.enter_raw && self.raw_supported {
                    self.mode = Mode::Raw;
                    self.statement.clear();
                    let banner = self.config.markers.raw_banner.clone();
                    self.reply(banner.as_bytes());
                }
            }
            Mode::Raw => {
                if byte == control.end_of_input {
                    let statement = String::from_utf8_lossy(&self.statement).into_owned();
                    self.statement.clear();
                    self.run(statement);
                } else if byte == control.exit_raw {
                    self.mode = Mode::Friendly;
                    let prompt = format!("\r\n{}", self.config.markers.interactive_prompt);
                    self.reply(prompt.as_bytes());
                } else if byte == control.interrupt {
                    self.statement.clear();
                } else {
                    self.statement.push(byte);
                }
            }
        }
    }

    fn run(&mut self, statement: String) {
        let injected = self
            .failures
            .iter()
            .find(|(needle, _)| statement.contains(needle.as_str()))
            .map(|(_, error)| error.clone());

        let (out, err) = match injected {
            Some(error) => (String::new(), error),
            None => {
                let mut out = String::new();
                let mut err = String::new();
                for line in statement.lines().map(str::trim).filter(|l| !l.is_empty()) {
                    match self.eval(line) {
                        Ok(Some(printed)) => {
                            out.push_str(&printed);
                            out.push_str("\r\n");
                        }
                        Ok(None) => {}
                        Err(e) => {
                            err = format!("Traceback (most recent call last):\r\n{e}\r\n");
                            break;
                        }
                    }
                }
                (out, err)
            }
        };

        log::debug!("sim: executed {statement:?} (stderr: {})", !err.is_empty());
        self.executed.push(statement);
        let ack = self.config.markers.raw_ack.clone();
        let eoi = self.config.control.end_of_input as char;
        let reply = format!("{ack}{out}{eoi}{err}{eoi}>");
        self.reply(reply.as_bytes());
    }

    fn eval(&mut self, line: &str) -> Result<Option<String>, String> {
        let remote = self.config.remote.clone();

        if let Some(modules) = line.strip_prefix("import ") {
            for module in modules.split(',').map(str::trim) {
                if module != remote.loader_module && module != remote.codec_module {
                    return Err(format!("ImportError: no module named '{module}'"));
                }
                self.imported.insert(module.to_string());
            }
            return Ok(None);
        }

        if let Some(inner) = line
            .strip_prefix("print(len(")
            .and_then(|rest| rest.strip_suffix("))"))
        {
            return match self.vars.get(inner) {
                Some(Value::Bytes(b)) => Ok(Some(b.len().to_string())),
                Some(Value::None) => Err("TypeError: object of type 'NoneType' has no len()".into()),
                None => Err(format!("NameError: name '{inner}' isn't defined")),
            };
        }

        if let Some((name, literal)) = line.split_once("+=") {
            let name = name.trim();
            let literal = parse_bytes_literal(literal.trim())?;
            return match self.vars.get_mut(name) {
                Some(Value::Bytes(b)) => {
                    b.extend_from_slice(&literal);
                    Ok(None)
                }
                Some(Value::None) => Err("TypeError: unsupported types for __iadd__".into()),
                None => Err(format!("NameError: name '{name}' isn't defined")),
            };
        }

        if let Some((name, expr)) = line.split_once('=') {
            let name = name.trim().to_string();
            let expr = expr.trim();
            let value = if expr == "None" {
                Value::None
            } else if expr.starts_with("b'") || expr.starts_with("b\"") {
                Value::Bytes(parse_bytes_literal(expr)?)
            } else {
                let decode = format!("{}.{}(", remote.codec_module, remote.decode_function);
                let arg = expr
                    .strip_prefix(decode.as_str())
                    .and_then(|rest| rest.strip_suffix(')'))
                    .ok_or_else(|| format!("SyntaxError: invalid syntax: {expr}"))?;
                self.require_module(&remote.codec_module)?;
                let encoded = self.bytes_of(arg)?;
                let decoded = base64::engine::general_purpose::STANDARD
                    .decode(encoded)
                    .map_err(|e| format!("ValueError: incorrect padding ({e})"))?;
                Value::Bytes(decoded)
            };
            self.vars.insert(name, value);
            return Ok(None);
        }

        let load = format!("{}.{}(", remote.loader_module, remote.load_function);
        if let Some(arg) = line
            .strip_prefix(load.as_str())
            .and_then(|rest| rest.strip_suffix(')'))
        {
            self.require_module(&remote.loader_module)?;
            let payload = self.bytes_of(arg)?.to_vec();
            self.loaded.push(payload);
            return Ok(None);
        }

        Err(format!("SyntaxError: invalid syntax: {line}"))
    }

    fn require_module(&self, module: &str) -> Result<(), String> {
        if self.imported.contains(module) {
            Ok(())
        } else {
            Err(format!("NameError: name '{module}' isn't defined"))
        }
    }

    fn bytes_of(&self, name: &str) -> Result<&[u8], String> {
        match self.vars.get(name.trim()) {
            Some(Value::Bytes(b)) => Ok(b),
            Some(Value::None) => Err("TypeError: 'NoneType' object isn't a buffer".into()),
            None => Err(format!("NameError: name '{}' isn't defined", name.trim())),
        }
    }
}

impl Default for SimLink {
    fn default() -> Self {
        Self::new(&ProtocolConfig::default())
    }
}

/// Parse `b'...'` or `b"..."` holding printable ASCII without escapes.
fn parse_bytes_literal(text: &str) -> Result<Vec<u8>, String> {
    let body = text
        .strip_prefix("b'")
        .and_then(|rest| rest.strip_suffix('\''))
        .or_else(|| {
            text.strip_prefix("b\"")
                .and_then(|rest| rest.strip_suffix('"'))
        })
        .ok_or_else(|| format!("SyntaxError: invalid syntax: {text}"))?;
    if body.contains('\\') {
        return Err("SyntaxError: escapes not supported".into());
    }
    Ok(body.as_bytes().to_vec())
}

impl SerialLink for SimLink {
    fn write(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        self.written.extend_from_slice(bytes);
        for &byte in bytes {
            self.on_byte(byte);
        }
        Ok(())
    }

    fn read_until(&mut self, pattern: &[u8], _timeout: Duration) -> Result<Vec<u8>, LinkError> {
        let buffered = self.rx.make_contiguous();
        let take = find_end(buffered, pattern).unwrap_or(buffered.len());
        Ok(self.rx.drain(..take).collect())
    }

    fn read(&mut self, max_bytes: usize) -> Result<Vec<u8>, LinkError> {
        let take = max_bytes.min(self.rx.len());
        Ok(self.rx.drain(..take).collect())
    }

    fn endpoint(&self) -> &str {
        "sim"
    }
}

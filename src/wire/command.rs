//! Inline command encoding.

use std::fmt;

use super::error::CommandError;

/// Line terminator used by the protocol in both directions.
pub const CRLF: &[u8] = b"\r\n";

/// A single textual request: a verb followed by positional arguments.
///
/// Commands are built, encoded once, and discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    verb: &'static str,
    args: Vec<String>,
    /// Hides argument values in `Display`, for AUTH.
    redacted: bool,
}

impl Command {
    /// Start a command with the given verb.
    pub fn new(verb: &'static str) -> Self {
        Self {
            verb,
            args: Vec::new(),
            redacted: false,
        }
    }

    /// Append a positional argument.
    pub fn arg(mut self, arg: impl ToString) -> Self {
        self.args.push(arg.to_string());
        self
    }

    pub fn auth(password: &str) -> Self {
        let mut cmd = Self::new("AUTH").arg(password);
        cmd.redacted = true;
        cmd
    }

    pub fn select(namespace: u32) -> Self {
        Self::new("SELECT").arg(namespace)
    }

    pub fn get(key: &str) -> Self {
        Self::new("GET").arg(key)
    }

    pub fn incr(key: &str) -> Self {
        Self::new("INCR").arg(key)
    }

    pub fn expire(key: &str, seconds: u64) -> Self {
        Self::new("EXPIRE").arg(key).arg(seconds)
    }

    /// The command verb.
    pub fn verb(&self) -> &'static str {
        self.verb
    }

    /// Serialize to `VERB arg1 arg2\r\n`.
    ///
    /// Arguments are separated by single spaces, so an argument that is
    /// empty or contains whitespace or control bytes cannot be expressed and
    /// is rejected before anything reaches the socket.
    pub fn encode(&self) -> Result<Vec<u8>, CommandError> {
        let len = self.verb.len()
            + self.args.iter().map(|a| a.len() + 1).sum::<usize>()
            + CRLF.len();
        let mut buf = Vec::with_capacity(len);
        buf.extend_from_slice(self.verb.as_bytes());

        for arg in &self.args {
            if !is_inline_arg(arg) {
                let shown = if self.redacted { "<redacted>" } else { arg.as_str() };
                return Err(CommandError::InvalidArgument(shown.to_string()));
            }
            buf.push(b' ');
            buf.extend_from_slice(arg.as_bytes());
        }

        buf.extend_from_slice(CRLF);
        Ok(buf)
    }
}

/// Whether `arg` can travel as one argument of an inline command.
pub fn is_inline_arg(arg: &str) -> bool {
    !arg.is_empty() && !arg.chars().any(|c| c.is_whitespace() || c.is_control())
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb)?;
        for arg in &self.args {
            if self.redacted {
                f.write_str(" ***")?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

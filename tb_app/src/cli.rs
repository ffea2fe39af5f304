use std::fmt;
use std::time::Duration;

/// Config file read when no path is given on the command line
pub const DEFAULT_CONFIG_PATH: &str = "tb_app/config/throttle.toml";

/// One step of a replayed admission sequence
///
/// Steps are written as command-line words:
/// - `key` runs a consuming check for `key`
/// - `?key` peeks at `key` without consuming
/// - `!key` resets the bucket for `key`
/// - `+250` advances the replay clock by 250 ms
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayStep {
    RateLimit(String),
    Peek(String),
    Reset(String),
    Advance(Duration),
}

impl ReplayStep {
    pub fn parse(word: &str) -> Result<Self, String> {
        if let Some(millis) = word.strip_prefix('+') {
            let millis: u64 = millis.parse().map_err(|_| format!("invalid delay {word:?}, expected +<milliseconds>"))?;
            return Ok(ReplayStep::Advance(Duration::from_millis(millis)));
        }

        let step = match word.as_bytes().first() {
            Some(b'?') => ReplayStep::Peek(word[1..].to_string()),
            Some(b'!') => ReplayStep::Reset(word[1..].to_string()),
            _ => ReplayStep::RateLimit(word.to_string()),
        };

        match &step {
            ReplayStep::RateLimit(key) | ReplayStep::Peek(key) | ReplayStep::Reset(key) if key.is_empty() => Err(format!("empty key in {word:?}")),
            _ => Ok(step),
        }
    }
}

impl fmt::Display for ReplayStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplayStep::RateLimit(key) => write!(f, "rate_limit {key}"),
            ReplayStep::Peek(key) => write!(f, "peek {key}"),
            ReplayStep::Reset(key) => write!(f, "reset {key}"),
            ReplayStep::Advance(by) => write!(f, "advance {}ms", by.as_millis()),
        }
    }
}

/// Parsed command line: an optional `--config <path>` followed by replay steps
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayArgs {
    pub config_path: String,
    pub steps: Vec<ReplayStep>,
}

/// Parses replay arguments, excluding the program name
pub fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<ReplayArgs, String> {
    let mut config_path = DEFAULT_CONFIG_PATH.to_string();
    let mut steps = Vec::new();

    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        if arg == "--config" || arg == "-c" {
            config_path = args.next().ok_or_else(|| format!("{arg} requires a path"))?;
        } else {
            steps.push(ReplayStep::parse(&arg)?);
        }
    }

    Ok(ReplayArgs { config_path, steps })
}

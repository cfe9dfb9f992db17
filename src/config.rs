/*! Tunables of the session sweep.

The constants here are the defaults; a [Config] carries the values in
effect. A configuration is read from `key = value` text, one setting per
line, with `#` starting a comment:

```text
# /etc/wansweep.conf
local_id       = 10.1.0.1
sweep_interval = 5m
idle_threshold = 60
dead_threshold = 2
bucket_count   = 4096
```

Durations are seconds unless suffixed with `ms`, `s`, `m` or `h`.
The accelerator identifier is a dotted quad or a `0x`-prefixed hex number.
Environment variables named after the keys, upper-cased and prefixed
with `WANSWEEP_` (e.g. `WANSWEEP_LOCAL_ID`), override the file.

[Config]: struct.Config.html
*/

use core::fmt;
use core::str::FromStr;

use crate::parsers::parse_number;
use crate::time::Duration;
use crate::wire::AcceleratorId;

/// Time between two sweeps of the session table.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Silence after which a session counts as idle.
pub const IDLE_THRESHOLD: Duration = Duration::from_secs(60);

/// Number of idle sweeps a session survives; one more evicts it.
pub const DEAD_THRESHOLD: u8 = 2;

/// Largest usable dead threshold; the dead counter has to be able to exceed it.
pub const MAX_DEAD_THRESHOLD: u8 = u8::MAX - 1;

/// Number of buckets in the session table.
pub const SESSION_BUCKET_COUNT: usize = 256;

/// Number of session slots reserved up front in each bucket.
pub const BUCKET_CAPACITY: usize = 4;

/// Prefix of the environment variables overriding configuration keys.
pub const ENV_PREFIX: &str = "WANSWEEP_";

/// What was wrong with a configuration setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// The line is neither blank, a comment, nor `key = value`.
    MissingSeparator,
    UnknownKey,
    InvalidValue,
}

/// Error returned when reading a configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseError {
    /// 1-based line of the offending setting; `None` for environment variables.
    pub line: Option<usize>,
    pub kind: ParseErrorKind,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "line {line}: ")?,
            None => write!(f, "environment: ")?,
        }
        match self.kind {
            ParseErrorKind::MissingSeparator => write!(f, "expected `key = value`"),
            ParseErrorKind::UnknownKey => write!(f, "unknown key"),
            ParseErrorKind::InvalidValue => write!(f, "invalid value"),
        }
    }
}

impl core::error::Error for ParseError {}

/// Tunables of the session sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Time between two sweeps.
    pub sweep_interval: Duration,
    /// Silence after which a session is idle and gets probed.
    pub idle_threshold: Duration,
    /// Idle sweeps a session survives before it is evicted, at most
    /// [MAX_DEAD_THRESHOLD](constant.MAX_DEAD_THRESHOLD.html).
    pub dead_threshold: u8,
    /// Number of buckets in the session table.
    pub bucket_count: usize,
    /// Identifier stamped into every keepalive probe.
    pub local_id: AcceleratorId,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            sweep_interval: SWEEP_INTERVAL,
            idle_threshold: IDLE_THRESHOLD,
            dead_threshold: DEAD_THRESHOLD,
            bucket_count: SESSION_BUCKET_COUNT,
            local_id: AcceleratorId::default(),
        }
    }
}

impl Config {
    /// Create a default configuration for the accelerator `local_id`.
    pub fn new(local_id: AcceleratorId) -> Config {
        Config {
            local_id,
            ..Config::default()
        }
    }

    /// Set a single key.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ParseErrorKind> {
        match key {
            "sweep_interval" => {
                let interval = Duration::from_str(value).map_err(|()| ParseErrorKind::InvalidValue)?;
                if interval == Duration::ZERO {
                    return Err(ParseErrorKind::InvalidValue);
                }
                self.sweep_interval = interval
            }
            "idle_threshold" => {
                self.idle_threshold =
                    Duration::from_str(value).map_err(|()| ParseErrorKind::InvalidValue)?
            }
            "dead_threshold" => {
                self.dead_threshold = parse_number(value, MAX_DEAD_THRESHOLD as u64)
                    .map_err(|()| ParseErrorKind::InvalidValue)? as u8
            }
            "bucket_count" => {
                let count = parse_number(value, u32::MAX as u64)
                    .map_err(|()| ParseErrorKind::InvalidValue)? as usize;
                if count == 0 {
                    return Err(ParseErrorKind::InvalidValue);
                }
                self.bucket_count = count
            }
            "local_id" => {
                self.local_id =
                    AcceleratorId::from_str(value).map_err(|()| ParseErrorKind::InvalidValue)?
            }
            _ => return Err(ParseErrorKind::UnknownKey),
        }
        Ok(())
    }

    /// Apply every setting in `text` on top of this configuration.
    pub fn apply_str(&mut self, text: &str) -> Result<(), ParseError> {
        for (index, line) in text.lines().enumerate() {
            let error = |kind| ParseError {
                line: Some(index + 1),
                kind,
            };

            let line = match line.find('#') {
                Some(at) => &line[..at],
                None => line,
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| error(ParseErrorKind::MissingSeparator))?;
            self.set(key.trim(), value.trim()).map_err(error)?;
        }
        Ok(())
    }

    /// Apply `WANSWEEP_*` variables from `vars`; other variables are ignored.
    pub fn apply_vars<I, K, V>(&mut self, vars: I) -> Result<(), ParseError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (name, value) in vars {
            let Some(key) = name.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let key = key.to_ascii_lowercase();
            self.set(&key, value.as_ref().trim())
                .map_err(|kind| ParseError { line: None, kind })?;
            net_debug!("config: {} overridden from environment", key);
        }
        Ok(())
    }

    /// Apply `WANSWEEP_*` variables from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ParseError> {
        self.apply_vars(std::env::vars())
    }
}

impl FromStr for Config {
    type Err = ParseError;

    /// Parse a configuration, starting from the defaults.
    fn from_str(s: &str) -> Result<Config, ParseError> {
        let mut config = Config::default();
        config.apply_str(s)?;
        Ok(config)
    }
}

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// One transformation applied to the current artifact.
///
/// Adding a variant requires a matching arm in the step chain executor; the
/// dispatch there is an exhaustive match.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    Trim { start: Offset, end: Offset },
    Upscale { width: u32 },
}

impl Step {
    pub const TAGS: &'static [&'static str] = &["trim", "upscale"];

    /// Stable tag used in output file names and metrics labels.
    pub fn tag(&self) -> &'static str {
        match self {
            Step::Trim { .. } => "trim",
            Step::Upscale { .. } => "upscale",
        }
    }
}

/// A non-negative time offset into a media file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Offset(Duration);

impl Offset {
    pub fn from_secs(secs: u64) -> Self {
        Self(Duration::from_secs(secs))
    }

    pub fn from_duration(duration: Duration) -> Self {
        Self(duration)
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }

    fn from_secs_f64(secs: f64) -> Result<Self> {
        if !secs.is_finite() || secs < 0.0 {
            bail!("offset must be a non-negative number of seconds, got {secs}");
        }
        Duration::try_from_secs_f64(secs)
            .map(Self)
            .map_err(|_| anyhow!("offset of {secs} seconds is out of range"))
    }
}

impl FromStr for Offset {
    type Err = anyhow::Error;

    /// Accepts `HH:MM:SS[.fff]`, `MM:SS[.fff]` or plain seconds.
    fn from_str(raw: &str) -> Result<Self> {
        let value = raw.trim();
        if value.is_empty() {
            bail!("offset cannot be empty");
        }
        let parts: Vec<&str> = value.split(':').collect();
        if parts.len() > 3 {
            bail!("offset '{value}' has too many ':' separated fields");
        }

        let (seconds_part, whole_parts) = parts
            .split_last()
            .ok_or_else(|| anyhow!("offset '{value}' is malformed"))?;
        let seconds: f64 = seconds_part
            .parse()
            .map_err(|_| anyhow!("offset '{value}' has an invalid seconds field"))?;
        if parts.len() > 1 && !(0.0..60.0).contains(&seconds) {
            bail!("offset '{value}' has seconds outside 0..60");
        }

        let mut total = seconds;
        for (position, field) in whole_parts.iter().rev().enumerate() {
            let amount: u64 = field
                .parse()
                .map_err(|_| anyhow!("offset '{value}' has an invalid field '{field}'"))?;
            if position == 0 && whole_parts.len() == 2 && amount >= 60 {
                bail!("offset '{value}' has minutes outside 0..60");
            }
            total += amount as f64 * 60f64.powi(position as i32 + 1);
        }
        Self::from_secs_f64(total)
    }
}

impl fmt::Display for Offset {
    /// Renders as `HH:MM:SS.mmm`, the form passed to external tools.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let millis = self.0.as_millis();
        let hours = millis / 3_600_000;
        let minutes = (millis / 60_000) % 60;
        let seconds = (millis / 1_000) % 60;
        let fraction = millis % 1_000;
        write!(f, "{hours:02}:{minutes:02}:{seconds:02}.{fraction:03}")
    }
}

impl Serialize for Offset {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Offset {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OffsetVisitor;

        impl Visitor<'_> for OffsetVisitor {
            type Value = Offset;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a time offset such as \"00:01:30\" or a number of seconds")
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<Offset, E> {
                Ok(Offset::from_secs(value))
            }

            fn visit_i64<E: de::Error>(self, value: i64) -> Result<Offset, E> {
                u64::try_from(value)
                    .map(Offset::from_secs)
                    .map_err(|_| E::custom(format!("offset cannot be negative: {value}")))
            }

            fn visit_f64<E: de::Error>(self, value: f64) -> Result<Offset, E> {
                Offset::from_secs_f64(value).map_err(E::custom)
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Offset, E> {
                value.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(OffsetVisitor)
    }
}

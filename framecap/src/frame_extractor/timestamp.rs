extern crate ffmpeg_next as ffmpeg;

use std::time::Duration;

use ffmpeg::{Rational, Rescale};

/// A presentation timestamp of a frame, relative to the first one in the stream
#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, Hash, PartialEq, Eq)]
pub struct Timestamp {
    pub(super) timebase_numerator: i32,
    pub(super) timebase_denominator: i32,
    pub(super) timestamp: i64,
    pub(super) first_timestamp: i64,
}

const MICROS: Rational = Rational(1, 1_000_000);

impl Timestamp {
    pub(super) fn new(ts: i64, timebase: Rational, first_timestamp: i64) -> Self {
        Self {
            timestamp: ts,
            first_timestamp,
            timebase_numerator: timebase.numerator(),
            timebase_denominator: timebase.denominator(),
        }
    }

    pub fn from_duration(dur: Duration) -> Self {
        let micros = i64::try_from(dur.as_micros()).unwrap_or(i64::MAX);
        Self::new(micros, MICROS, 0)
    }

    fn timebase(&self) -> Rational {
        Rational::new(self.timebase_numerator, self.timebase_denominator)
    }

    /// The distance from the first timestamp, expressed in `timebase`
    pub(super) fn relative_in(&self, timebase: Rational) -> i64 {
        (self.timestamp - self.first_timestamp).rescale(self.timebase(), timebase)
    }

    /// Negative timestamps are clamped to zero
    pub fn to_duration(&self) -> Duration {
        let micros = self.relative_in(MICROS);
        Duration::from_micros(micros.max(0).unsigned_abs())
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut total = self.relative_in(Rational::new(1, 1000));

        let negative = if total < 0 {
            total = -total;
            "-"
        } else {
            ""
        };

        let millis = total % 1000;
        total /= 1000;
        let hours = total / 3600;
        let minutes = (total % 3600) / 60;
        let seconds = total % 60;

        write!(
            f,
            "{negative}{hours:02}:{minutes:02}:{seconds:02}.{millis:03}"
        )
    }
}

use std::fmt;
use std::str::FromStr;

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, Offset, TimeZone, Timelike, Utc,
};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::errors::{RunplaneError, RunplaneResult};

/// Upper bound on the component-wise search so an unsatisfiable trigger
/// (e.g. `year=2020` in 2026) terminates instead of scanning forever.
const MAX_SEARCH_STEPS: u32 = 100_000;

/// One constraint of a cron trigger, in crontab expression form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CronField {
    /// `*` - any value.
    Any,
    /// A single fixed value, e.g. `5`.
    Value(u32),
    /// An inclusive range, e.g. `1-10`.
    Range(u32, u32),
    /// A step expression, `*/n` or `a/n`.
    Step { from: Option<u32>, every: u32 },
}

impl CronField {
    /// Whether `value` satisfies this constraint. `field_min` anchors
    /// `*/n` steps at the field's smallest legal value.
    pub fn matches(&self, value: u32, field_min: u32) -> bool {
        match *self {
            CronField::Any => true,
            CronField::Value(v) => v == value,
            CronField::Range(lo, hi) => (lo..=hi).contains(&value),
            CronField::Step { from, every } => {
                let base = from.unwrap_or(field_min);
                value >= base && every > 0 && (value - base) % every == 0
            }
        }
    }

    fn bounds(&self) -> Option<(u32, u32)> {
        match *self {
            CronField::Any => None,
            CronField::Value(v) => Some((v, v)),
            CronField::Range(lo, hi) => Some((lo, hi)),
            CronField::Step { from, every: _ } => from.map(|f| (f, u32::MAX)),
        }
    }

    /// Validate the field against its legal domain.
    fn validate(&self, name: &str, min: u32, max: u32) -> RunplaneResult<()> {
        if let CronField::Range(lo, hi) = *self {
            if lo > hi {
                return Err(RunplaneError::InvalidArgument(format!(
                    "cron field {name}: range {lo}-{hi} is inverted"
                )));
            }
        }
        if let CronField::Step { every: 0, .. } = *self {
            return Err(RunplaneError::InvalidArgument(format!(
                "cron field {name}: step of zero"
            )));
        }
        if let Some((lo, hi)) = self.bounds() {
            if lo < min || (hi != u32::MAX && hi > max) {
                return Err(RunplaneError::InvalidArgument(format!(
                    "cron field {name}: value out of range {min}-{max}"
                )));
            }
        }
        Ok(())
    }
}

impl FromStr for CronField {
    type Err = RunplaneError;

    fn from_str(s: &str) -> RunplaneResult<Self> {
        let s = s.trim();
        let invalid =
            || RunplaneError::InvalidArgument(format!("invalid cron field expression: {s}"));
        if s == "*" {
            return Ok(CronField::Any);
        }
        if let Some((base, step)) = s.split_once('/') {
            let every: u32 = step.parse().map_err(|_| invalid())?;
            let from = match base {
                "*" => None,
                other => Some(other.parse().map_err(|_| invalid())?),
            };
            return Ok(CronField::Step { from, every });
        }
        if let Some((lo, hi)) = s.split_once('-') {
            let lo: u32 = lo.parse().map_err(|_| invalid())?;
            let hi: u32 = hi.parse().map_err(|_| invalid())?;
            return Ok(CronField::Range(lo, hi));
        }
        s.parse().map(CronField::Value).map_err(|_| invalid())
    }
}

impl fmt::Display for CronField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            CronField::Any => write!(f, "*"),
            CronField::Value(v) => write!(f, "{v}"),
            CronField::Range(lo, hi) => write!(f, "{lo}-{hi}"),
            CronField::Step { from: None, every } => write!(f, "*/{every}"),
            CronField::Step {
                from: Some(from),
                every,
            } => write!(f, "{from}/{every}"),
        }
    }
}

impl TryFrom<String> for CronField {
    type Error = RunplaneError;

    fn try_from(value: String) -> RunplaneResult<Self> {
        value.parse()
    }
}

impl From<CronField> for String {
    fn from(field: CronField) -> Self {
        field.to_string()
    }
}

impl Default for CronField {
    fn default() -> Self {
        CronField::Any
    }
}

/// A recurring schedule: crontab-style field constraints plus start/end
/// bounds, a fixed-offset timezone and an optional random jitter.
///
/// `day_of_week` is 0=Monday through 6=Sunday; `week` is the ISO week
/// number.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CronTrigger {
    pub year: CronField,
    pub month: CronField,
    pub day: CronField,
    pub week: CronField,
    pub day_of_week: CronField,
    pub hour: CronField,
    pub minute: CronField,
    pub second: CronField,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    /// UTC offset the field constraints are evaluated in; UTC when unset.
    #[serde(with = "tz_offset", skip_serializing_if = "Option::is_none")]
    pub timezone: Option<FixedOffset>,
    /// Maximum random delay in seconds added to each computed fire time,
    /// so identical triggers across many schedules do not re-align.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jitter: Option<u32>,
}

impl CronTrigger {
    /// A trigger firing once every minute, at second zero.
    pub fn every_minute() -> Self {
        Self {
            second: CronField::Value(0),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> RunplaneResult<()> {
        self.year.validate("year", 1970, 9999)?;
        self.month.validate("month", 1, 12)?;
        self.day.validate("day", 1, 31)?;
        self.week.validate("week", 1, 53)?;
        self.day_of_week.validate("day_of_week", 0, 6)?;
        self.hour.validate("hour", 0, 23)?;
        self.minute.validate("minute", 0, 59)?;
        self.second.validate("second", 0, 59)?;
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if start > end {
                return Err(RunplaneError::InvalidArgument(
                    "cron trigger: start_date is after end_date".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Compute the next fire time strictly after `previous` (or from `now`
    /// on first use), honoring all field constraints and bounds. `None`
    /// means the trigger has no further occurrences.
    pub fn next_fire_time(
        &self,
        previous: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let fire = self.next_match(previous, now)?;
        let fire = match self.jitter {
            Some(jitter) if jitter > 0 => {
                let delay = rand::rng().random_range(0..=jitter);
                fire + Duration::seconds(i64::from(delay))
            }
            _ => fire,
        };
        // jitter never pushes past the end bound
        match self.end_date {
            Some(end) if fire > end => Some(end),
            _ => Some(fire),
        }
    }

    fn next_match(
        &self,
        previous: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let tz = self.timezone.unwrap_or_else(|| Utc.fix());
        let mut start = match previous {
            Some(prev) => prev + Duration::seconds(1),
            None => now,
        };
        if let Some(start_date) = self.start_date {
            if start_date > start {
                start = start_date;
            }
        }
        let mut t = start.with_timezone(&tz).with_nanosecond(0)?;
        if t.with_timezone(&Utc) < start {
            t += Duration::seconds(1);
        }

        for _ in 0..MAX_SEARCH_STEPS {
            if let Some(end) = self.end_date {
                if t.with_timezone(&Utc) > end {
                    return None;
                }
            }
            if t.year() < 1970 || t.year() > 9999 {
                return None;
            }
            if !self.year.matches(t.year() as u32, 1970) {
                t = start_of_year(&tz, t.year() + 1)?;
                continue;
            }
            if !self.month.matches(t.month(), 1) {
                t = start_of_next_month(&tz, &t)?;
                continue;
            }
            let dow = t.weekday().num_days_from_monday();
            let week = t.iso_week().week();
            if !self.day.matches(t.day(), 1)
                || !self.week.matches(week, 1)
                || !self.day_of_week.matches(dow, 0)
            {
                t = start_of_next_day(&tz, &t)?;
                continue;
            }
            if !self.hour.matches(t.hour(), 0) {
                t = (t + Duration::hours(1)).with_minute(0)?.with_second(0)?;
                continue;
            }
            if !self.minute.matches(t.minute(), 0) {
                t = (t + Duration::minutes(1)).with_second(0)?;
                continue;
            }
            if !self.second.matches(t.second(), 0) {
                t += Duration::seconds(1);
                continue;
            }
            return Some(t.with_timezone(&Utc));
        }
        None
    }
}

fn start_of_year(tz: &FixedOffset, year: i32) -> Option<DateTime<FixedOffset>> {
    tz.with_ymd_and_hms(year, 1, 1, 0, 0, 0).single()
}

fn start_of_next_month(tz: &FixedOffset, t: &DateTime<FixedOffset>) -> Option<DateTime<FixedOffset>> {
    let (year, month) = if t.month() == 12 {
        (t.year() + 1, 1)
    } else {
        (t.year(), t.month() + 1)
    };
    tz.with_ymd_and_hms(year, month, 1, 0, 0, 0).single()
}

fn start_of_next_day(tz: &FixedOffset, t: &DateTime<FixedOffset>) -> Option<DateTime<FixedOffset>> {
    let next = t.date_naive().succ_opt()?.and_hms_opt(0, 0, 0)?;
    tz.from_local_datetime(&next).single()
}

/// Serde support for `Option<FixedOffset>` as `+HH:MM` strings.
mod tz_offset {
    use chrono::FixedOffset;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        offset: &Option<FixedOffset>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match offset {
            Some(offset) => serializer.serialize_some(&offset.to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<FixedOffset>, D::Error> {
        let value: Option<String> = Option::deserialize(deserializer)?;
        value
            .map(|s| s.parse().map_err(serde::de::Error::custom))
            .transpose()
    }
}

//! Time-based firing from a cron expression.

use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{trigger_context, ExecutionCallback, Trigger};
use crate::config::{TriggerConfig, TypedConfig};
use crate::error::{ConfigError, CreateError};
use crate::registry::TriggerContext;

/// Delay used when the next tick is already due (clock skew, slow firing).
const MIN_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CronFormat {
    /// `min hour day-of-month month day-of-week`, Sunday = 0.
    #[default]
    Unix,
    /// `sec min hour day-of-month month day-of-week [year]`, Sunday = 1.
    Quartz,
}

impl CronFormat {
    pub fn name(&self) -> &'static str {
        match self {
            CronFormat::Unix => "unix",
            CronFormat::Quartz => "quartz",
        }
    }

    /// Rewrite `expression` into the dialect the scheduler parses.
    pub fn normalize(&self, expression: &str) -> String {
        match self {
            CronFormat::Unix => normalize_unix(expression),
            CronFormat::Quartz => expression.trim().replace('?', "*"),
        }
    }
}

/// Prefix the seconds field to a 5-field expression and shift numeric
/// day-of-week values from Sunday = 0 to Sunday = 1.
fn normalize_unix(expression: &str) -> String {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    if fields.len() != 5 {
        return expression.trim().to_string();
    }
    format!(
        "0 {} {} {} {} {}",
        fields[0],
        fields[1],
        fields[2],
        fields[3],
        shift_weekdays(fields[4])
    )
}

fn shift_weekdays(field: &str) -> String {
    fn flush(digits: &mut String, out: &mut String, after_step: bool) {
        if digits.is_empty() {
            return;
        }
        match digits.parse::<u32>() {
            // 7 is also Sunday in unix cron.
            Ok(day) if !after_step => out.push_str(&((day % 7) + 1).to_string()),
            _ => out.push_str(digits),
        }
        digits.clear();
    }

    let mut out = String::with_capacity(field.len() + 2);
    let mut digits = String::new();
    let mut after_step = false;
    for ch in field.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            continue;
        }
        flush(&mut digits, &mut out, after_step);
        after_step = ch == '/';
        out.push(ch);
    }
    flush(&mut digits, &mut out, after_step);
    out
}

// ── Time zones ──────────────────────────────────────────────────────

/// Zone the schedule is evaluated in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CronZone {
    Utc,
    Named(Tz),
    Fixed(FixedOffset),
}

impl CronZone {
    /// Accepts IANA names, `UTC`, `UTC+H`/`UTC-H` and `+HH:MM`/`-HH:MM`.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() || raw.eq_ignore_ascii_case("utc") || raw.eq_ignore_ascii_case("z") {
            return Some(CronZone::Utc);
        }
        if let Some(rest) = raw.strip_prefix("UTC").or_else(|| raw.strip_prefix("GMT")) {
            return parse_offset(rest).map(CronZone::Fixed);
        }
        if raw.starts_with('+') || raw.starts_with('-') {
            return parse_offset(raw).map(CronZone::Fixed);
        }
        Tz::from_str(raw).ok().map(CronZone::Named)
    }

    pub fn name(&self) -> String {
        match self {
            CronZone::Utc => "UTC".to_string(),
            CronZone::Named(tz) => tz.name().to_string(),
            CronZone::Fixed(offset) => offset.to_string(),
        }
    }

    /// First tick strictly after `now`.
    pub fn next_after(&self, schedule: &Schedule, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            CronZone::Utc => next_in(schedule, now, &Utc),
            CronZone::Named(tz) => next_in(schedule, now, tz),
            CronZone::Fixed(offset) => next_in(schedule, now, offset),
        }
    }

    fn render(&self, at: DateTime<Utc>) -> String {
        match self {
            CronZone::Utc => at.to_rfc3339(),
            CronZone::Named(tz) => at.with_timezone(tz).to_rfc3339(),
            CronZone::Fixed(offset) => at.with_timezone(offset).to_rfc3339(),
        }
    }
}

fn next_in<Z: TimeZone>(schedule: &Schedule, now: DateTime<Utc>, zone: &Z) -> Option<DateTime<Utc>> {
    schedule
        .after(&now.with_timezone(zone))
        .next()
        .map(|t| t.with_timezone(&Utc))
}

/// `+H`, `-H`, `+HH:MM`, `-HHMM`.
fn parse_offset(raw: &str) -> Option<FixedOffset> {
    let raw = raw.trim();
    let (sign, rest) = if let Some(rest) = raw.strip_prefix('+') {
        (1, rest)
    } else if let Some(rest) = raw.strip_prefix('-') {
        (-1, rest)
    } else {
        return None;
    };
    if !rest.chars().all(|c| c.is_ascii_digit() || c == ':') {
        return None;
    }
    let (hours, minutes) = match rest.split_once(':') {
        Some((h, m)) => (h.parse::<i32>().ok()?, m.parse::<i32>().ok()?),
        None if rest.len() == 4 => (rest.get(..2)?.parse::<i32>().ok()?, rest.get(2..)?.parse::<i32>().ok()?),
        None => (rest.parse::<i32>().ok()?, 0),
    };
    if hours > 18 || !(0..60).contains(&minutes) {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

// ── Trigger ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct CronTrigger {
    expression: String,
    format: CronFormat,
    zone: CronZone,
    schedule: Schedule,
    task: Mutex<Option<CancellationToken>>,
}

impl CronTrigger {
    pub const NAME: &'static str = "cron";

    pub fn create(config: &TriggerConfig, _ctx: &Arc<TriggerContext>) -> Result<Arc<dyn Trigger>, CreateError> {
        let params = config.accessor();
        let expression = params.require_string("expression")?;

        let format = match params.get_string("format").as_deref().map(str::trim) {
            None | Some("") => CronFormat::Unix,
            Some(f) if f.eq_ignore_ascii_case("unix") => CronFormat::Unix,
            Some(f) if f.eq_ignore_ascii_case("quartz") => CronFormat::Quartz,
            Some(other) => {
                warn!(format = other, "unknown cron format, using unix");
                CronFormat::Unix
            }
        };

        let zone = match params.get_string("time_zone") {
            None => CronZone::Utc,
            Some(raw) => CronZone::parse(&raw).unwrap_or_else(|| {
                warn!(time_zone = %raw, "unknown time zone, using UTC");
                CronZone::Utc
            }),
        };

        Ok(Arc::new(Self::new(&expression, format, zone)?))
    }

    pub fn new(expression: &str, format: CronFormat, zone: CronZone) -> Result<Self, ConfigError> {
        let normalized = format.normalize(expression);
        let schedule = Schedule::from_str(&normalized).map_err(|e| {
            ConfigError::invalid(Self::NAME, "expression", expression, &format!("a valid {} cron expression ({e})", format.name()))
        })?;
        Ok(Self {
            expression: expression.trim().to_string(),
            format,
            zone,
            schedule,
            task: Mutex::new(None),
        })
    }

    pub fn format(&self) -> CronFormat {
        self.format
    }

    pub fn zone(&self) -> CronZone {
        self.zone
    }

    pub fn next_fire_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.zone.next_after(&self.schedule, now)
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|t| !t.is_cancelled())
    }
}

impl Trigger for CronTrigger {
    fn type_name(&self) -> &'static str {
        Self::NAME
    }

    fn activate(&self, rule: &str, callback: ExecutionCallback) {
        let token = CancellationToken::new();
        if let Some(previous) = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(token.clone())
        {
            previous.cancel();
        }

        let ticker = CronTicker {
            rule: rule.to_string(),
            expression: self.expression.clone(),
            format: self.format,
            zone: self.zone,
            schedule: self.schedule.clone(),
            callback,
        };
        info!(rule, expression = %self.expression, time_zone = %self.zone.name(), "cron trigger scheduled");
        tokio::spawn(ticker.run(token));
    }

    fn deactivate(&self) {
        if let Some(token) = self.task.lock().unwrap_or_else(PoisonError::into_inner).take() {
            token.cancel();
        }
    }
}

impl Drop for CronTrigger {
    fn drop(&mut self) {
        self.deactivate();
    }
}

struct CronTicker {
    rule: String,
    expression: String,
    format: CronFormat,
    zone: CronZone,
    schedule: Schedule,
    callback: ExecutionCallback,
}

impl CronTicker {
    async fn run(self, cancel: CancellationToken) {
        loop {
            let now = Utc::now();
            let Some(next) = self.zone.next_after(&self.schedule, now) else {
                warn!(rule = %self.rule, expression = %self.expression, "cron schedule has no upcoming ticks");
                return;
            };
            let delay = (next - now)
                .to_std()
                .ok()
                .filter(|d| !d.is_zero())
                .unwrap_or(MIN_DELAY);
            debug!(rule = %self.rule, next = %next, delay_ms = delay.as_millis() as u64, "next cron tick");

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(rule = %self.rule, "cron trigger stopped");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            let ctx = trigger_context(CronTrigger::NAME);
            ctx.set("cron.expression", self.expression.as_str());
            ctx.set("cron.format", self.format.name());
            ctx.set("cron.time_zone", self.zone.name());
            ctx.set("cron.scheduled_time", self.zone.render(next));
            ctx.set("cron.actual_time", self.zone.render(Utc::now()));
            let _ = (self.callback)(ctx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecutionContext;
    use crate::executor::Firing;
    use chrono::{Datelike, Timelike, Weekday};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn unix_expressions_gain_seconds_and_shift_weekdays() {
        assert_eq!(CronFormat::Unix.normalize("*/5 * * * *"), "0 */5 * * * *");
        assert_eq!(CronFormat::Unix.normalize("0 9 * * 1-5"), "0 0 9 * * 2-6");
        assert_eq!(CronFormat::Unix.normalize("0 9 * * 0,7"), "0 0 9 * * 1,1");
        assert_eq!(CronFormat::Unix.normalize("0 9 * * */2"), "0 0 9 * * */2");
        assert_eq!(CronFormat::Unix.normalize("0 9 * * MON"), "0 0 9 * * MON");
        assert_eq!(CronFormat::Unix.normalize(" 0 0 9 * * * "), "0 0 9 * * *");
    }

    #[test]
    fn quartz_question_marks_become_wildcards() {
        assert_eq!(CronFormat::Quartz.normalize("0 0 12 ? * 2"), "0 0 12 * * 2");
    }

    #[test]
    fn unix_monday_lands_on_monday() {
        let trigger = CronTrigger::new("30 9 * * 1", CronFormat::Unix, CronZone::Utc).unwrap();
        // 2026-01-04 is a Sunday.
        let now = Utc.with_ymd_and_hms(2026, 1, 4, 12, 0, 0).unwrap();
        let next = trigger.next_fire_after(now).unwrap();
        assert_eq!(next.weekday(), Weekday::Mon);
        assert_eq!((next.hour(), next.minute()), (9, 30));
    }

    #[test]
    fn zones_shift_the_fire_time() {
        let now = Utc.with_ymd_and_hms(2026, 1, 4, 0, 0, 0).unwrap();
        let plus_two = CronTrigger::new("0 12 * * *", CronFormat::Unix, CronZone::parse("UTC+2").unwrap()).unwrap();
        assert_eq!(plus_two.next_fire_after(now).unwrap().hour(), 10);

        let offset = CronTrigger::new("0 12 * * *", CronFormat::Unix, CronZone::parse("-05:30").unwrap()).unwrap();
        let next = offset.next_fire_after(now).unwrap();
        assert_eq!((next.hour(), next.minute()), (17, 30));

        let named = CronZone::parse("Europe/Berlin").unwrap();
        assert_eq!(named.name(), "Europe/Berlin");
        let berlin = CronTrigger::new("0 12 * * *", CronFormat::Unix, named).unwrap();
        assert_eq!(berlin.next_fire_after(now).unwrap().hour(), 11);
    }

    #[test]
    fn zone_parsing() {
        assert_eq!(CronZone::parse(""), Some(CronZone::Utc));
        assert_eq!(CronZone::parse("utc"), Some(CronZone::Utc));
        assert!(matches!(CronZone::parse("+0130"), Some(CronZone::Fixed(_))));
        assert_eq!(CronZone::parse("Mars/Olympus"), None);
        assert_eq!(CronZone::parse("UTC+99"), None);
    }

    #[test]
    fn multibyte_offsets_are_rejected() {
        assert_eq!(CronZone::parse("+1é2"), None);
        assert_eq!(CronZone::parse("UTC-é"), None);
        assert_eq!(CronZone::parse("+٠١٠٠"), None);
        assert!(matches!(CronZone::parse("-0930"), Some(CronZone::Fixed(_))));
    }

    #[test]
    fn invalid_expression_is_a_config_error() {
        let err = CronTrigger::new("not a cron", CronFormat::Unix, CronZone::Utc).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "expression"));
    }

    #[tokio::test]
    async fn deactivate_stops_the_ticker() {
        let trigger = CronTrigger::new("* * * * *", CronFormat::Unix, CronZone::Utc).unwrap();
        let callback: ExecutionCallback = Arc::new(|_ctx: ExecutionContext| -> Firing { panic!("must not fire") });
        trigger.activate("tick", callback);
        assert!(trigger.is_running());
        trigger.deactivate();
        assert!(!trigger.is_running());
    }

    #[tokio::test]
    async fn dropping_an_active_trigger_stops_the_ticker() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let callback: ExecutionCallback = Arc::new(move |_ctx: ExecutionContext| -> Firing {
            counter.fetch_add(1, Ordering::SeqCst);
            Firing::rejected()
        });

        let trigger = CronTrigger::new("* * * * * ?", CronFormat::Quartz, CronZone::Utc).unwrap();
        trigger.activate("tick", callback);
        drop(trigger);
        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);
    }
}

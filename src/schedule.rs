//! Recurring report schedules and next-run calculation.
//!
//! Calendar arithmetic happens on naive local dates in the schedule's time
//! zone. A configured day-of-month that does not exist in the target month is
//! clamped to that month's last day, always starting again from the configured
//! day (so 31 never decays to 28). Local times that fall inside a DST gap move
//! to the first valid instant after the gap; ambiguous times take the earlier
//! instant.

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc,
};
use chrono_tz::Tz;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::debug;

use crate::error::ScheduleConfigError;
use crate::export::ExportFormat;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
}

impl Frequency {
    pub fn as_str(self) -> &'static str {
        match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
            Frequency::Quarterly => "quarterly",
        }
    }

    fn months_step(self) -> u32 {
        match self {
            Frequency::Quarterly => 3,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleConfig {
    /// Local time of day, `HH:mm`.
    pub time: String,
    /// 0 = Sunday .. 6 = Saturday. Weekly only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_week: Option<u8>,
    /// 1..=31. Monthly and quarterly only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_month: Option<u8>,
    /// IANA zone name.
    pub timezone: String,
}

/// Body accepted when creating a schedule. `nextRun` is never part of it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRequest {
    pub name: String,
    pub report_definition_id: String,
    pub frequency: Frequency,
    pub schedule_config: ScheduleConfig,
    pub recipients: Vec<String>,
    pub export_formats: Vec<ExportFormat>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledReport {
    pub id: String,
    pub name: String,
    pub report_definition_id: String,
    pub frequency: Frequency,
    pub schedule_config: ScheduleConfig,
    pub recipients: Vec<String>,
    pub export_formats: Vec<ExportFormat>,
    pub is_active: bool,
    next_run: DateTime<FixedOffset>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_run: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleStatus {
    Active,
    Paused,
    Overdue,
}

// ============================================================================
// Validation
// ============================================================================

fn time_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([01]\d|2[0-3]):([0-5]\d)$").expect("static pattern"))
}

fn email_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("static pattern"))
}

fn parse_time(raw: &str) -> Result<NaiveTime, ScheduleConfigError> {
    let caps = time_pattern()
        .captures(raw)
        .ok_or_else(|| ScheduleConfigError::InvalidTime(raw.to_string()))?;
    let hour: u32 = caps[1].parse().map_err(|_| ScheduleConfigError::InvalidTime(raw.to_string()))?;
    let minute: u32 = caps[2].parse().map_err(|_| ScheduleConfigError::InvalidTime(raw.to_string()))?;
    NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(|| ScheduleConfigError::InvalidTime(raw.to_string()))
}

fn parse_timezone(raw: &str) -> Result<Tz, ScheduleConfigError> {
    raw.parse::<Tz>()
        .map_err(|_| ScheduleConfigError::InvalidTimezone(raw.to_string()))
}

/// Check that the recurrence rule carries the fields its frequency needs.
pub fn validate_rule(frequency: Frequency, config: &ScheduleConfig) -> Result<(), ScheduleConfigError> {
    parse_time(&config.time)?;
    parse_timezone(&config.timezone)?;

    match frequency {
        Frequency::Daily => {}
        Frequency::Weekly => match config.day_of_week {
            None => return Err(ScheduleConfigError::MissingDayOfWeek),
            Some(d) if d > 6 => return Err(ScheduleConfigError::InvalidDayOfWeek(d)),
            Some(_) => {}
        },
        Frequency::Monthly | Frequency::Quarterly => match config.day_of_month {
            None => return Err(ScheduleConfigError::MissingDayOfMonth(frequency.as_str().to_string())),
            Some(d) if !(1..=31).contains(&d) => return Err(ScheduleConfigError::InvalidDayOfMonth(d)),
            Some(_) => {}
        },
    }
    Ok(())
}

fn validate_request(request: &ScheduleRequest) -> Result<(), ScheduleConfigError> {
    validate_rule(request.frequency, &request.schedule_config)?;

    if request.recipients.is_empty() {
        return Err(ScheduleConfigError::NoRecipients);
    }
    if let Some(bad) = request
        .recipients
        .iter()
        .find(|r| !email_pattern().is_match(r.trim()))
    {
        return Err(ScheduleConfigError::InvalidRecipient(bad.clone()));
    }
    if request.export_formats.is_empty() {
        return Err(ScheduleConfigError::NoExportFormats);
    }
    Ok(())
}

// ============================================================================
// Calendar helpers
// ============================================================================

/// Last calendar day of a month.
pub fn last_day_of_month(year: i32, month: u32) -> NaiveDate {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .unwrap_or(NaiveDate::MAX)
}

fn shift_months(year: i32, month: u32, delta: u32) -> (i32, u32) {
    let zero_based = (month - 1) + delta;
    (year + (zero_based / 12) as i32, zero_based % 12 + 1)
}

/// The configured day in the given month, clamped to its last day.
fn clamped_day(year: i32, month: u32, day: u8) -> NaiveDate {
    let last = last_day_of_month(year, month);
    NaiveDate::from_ymd_opt(year, month, u32::from(day)).unwrap_or(last)
}

/// Map a local wall-clock time to an instant in `tz`.
fn resolve_local(tz: Tz, local: NaiveDateTime) -> DateTime<Tz> {
    if let Some(dt) = tz.from_local_datetime(&local).earliest() {
        return dt;
    }
    // Spring-forward gap: walk forward to the first representable minute.
    let mut probe = local;
    for _ in 0..(24 * 60) {
        probe += Duration::minutes(1);
        if let Some(dt) = tz.from_local_datetime(&probe).earliest() {
            debug!("Local time {} does not exist in {}, using {}", local, tz, dt);
            return dt;
        }
    }
    tz.from_utc_datetime(&local)
}

// ============================================================================
// Next run
// ============================================================================

/// Next execution instant strictly after `now` for a recurrence rule.
pub fn next_run(
    frequency: Frequency,
    config: &ScheduleConfig,
    now: DateTime<Utc>,
) -> Result<DateTime<FixedOffset>, ScheduleConfigError> {
    validate_rule(frequency, config)?;
    let time = parse_time(&config.time)?;
    let tz = parse_timezone(&config.timezone)?;

    let today = now.with_timezone(&tz).date_naive();
    let at = |date: NaiveDate| resolve_local(tz, date.and_time(time));
    let passed = |candidate: &DateTime<Tz>| candidate.with_timezone(&Utc) <= now;

    let next = match frequency {
        Frequency::Daily => {
            let candidate = at(today);
            if passed(&candidate) {
                at(today + Duration::days(1))
            } else {
                candidate
            }
        }
        Frequency::Weekly => {
            let target = i64::from(config.day_of_week.ok_or(ScheduleConfigError::MissingDayOfWeek)?);
            let current = i64::from(today.weekday().num_days_from_sunday());
            let day = today + Duration::days((target - current + 7) % 7);
            let candidate = at(day);
            if passed(&candidate) {
                at(day + Duration::weeks(1))
            } else {
                candidate
            }
        }
        Frequency::Monthly | Frequency::Quarterly => {
            let dom = config
                .day_of_month
                .ok_or_else(|| ScheduleConfigError::MissingDayOfMonth(frequency.as_str().to_string()))?;
            let candidate = at(clamped_day(today.year(), today.month(), dom));
            if passed(&candidate) {
                let (y, m) = shift_months(today.year(), today.month(), frequency.months_step());
                at(clamped_day(y, m, dom))
            } else {
                candidate
            }
        }
    };

    Ok(next.fixed_offset())
}

// ============================================================================
// Scheduled reports
// ============================================================================

impl ScheduledReport {
    /// Validate a request and derive its first `nextRun`.
    pub fn create(request: ScheduleRequest, now: DateTime<Utc>) -> Result<Self, ScheduleConfigError> {
        validate_request(&request)?;
        let next_run = next_run(request.frequency, &request.schedule_config, now)?;

        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: request.name,
            report_definition_id: request.report_definition_id,
            frequency: request.frequency,
            schedule_config: request.schedule_config,
            recipients: request.recipients,
            export_formats: request.export_formats,
            is_active: request.is_active,
            next_run,
            last_run: None,
        })
    }

    pub fn next_run(&self) -> DateTime<FixedOffset> {
        self.next_run
    }

    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        self.last_run
    }

    /// Record a dispatcher run at `now` and derive the following `nextRun`.
    pub fn advance(&mut self, now: DateTime<Utc>) -> Result<(), ScheduleConfigError> {
        self.next_run = next_run(self.frequency, &self.schedule_config, now)?;
        self.last_run = Some(now);
        Ok(())
    }

    pub fn status(&self, now: DateTime<Utc>) -> ScheduleStatus {
        if !self.is_active {
            ScheduleStatus::Paused
        } else if self.next_run.with_timezone(&Utc) < now {
            ScheduleStatus::Overdue
        } else {
            ScheduleStatus::Active
        }
    }

    /// Human-readable summary, e.g. `Semanal, lunes a las 09:00 (America/Santiago)`.
    pub fn describe(&self) -> String {
        describe_rule(self.frequency, &self.schedule_config)
    }
}

const WEEKDAYS: [&str; 7] = ["domingo", "lunes", "martes", "miércoles", "jueves", "viernes", "sábado"];

pub fn describe_rule(frequency: Frequency, config: &ScheduleConfig) -> String {
    let at = format!("a las {} ({})", config.time, config.timezone);
    match frequency {
        Frequency::Daily => format!("Diario, {}", at),
        Frequency::Weekly => {
            let day = config
                .day_of_week
                .and_then(|d| WEEKDAYS.get(usize::from(d)))
                .copied()
                .unwrap_or("?");
            format!("Semanal, {} {}", day, at)
        }
        Frequency::Monthly => format!("Mensual, día {} {}", config.day_of_month.unwrap_or(1), at),
        Frequency::Quarterly => format!("Trimestral, día {} {}", config.day_of_month.unwrap_or(1), at),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn config(time: &str, dow: Option<u8>, dom: Option<u8>, tz: &str) -> ScheduleConfig {
        ScheduleConfig {
            time: time.into(),
            day_of_week: dow,
            day_of_month: dom,
            timezone: tz.into(),
        }
    }

    fn request(frequency: Frequency, cfg: ScheduleConfig) -> ScheduleRequest {
        ScheduleRequest {
            name: "Semanal".into(),
            report_definition_id: "trips".into(),
            frequency,
            schedule_config: cfg,
            recipients: vec!["ops@example.com".into()],
            export_formats: vec![ExportFormat::Pdf],
            is_active: true,
        }
    }

    #[test]
    fn test_weekly_skips_to_next_week() {
        // Wednesday 10:00 → next Monday 09:00
        let cfg = config("09:00", Some(1), None, "UTC");
        let next = next_run(Frequency::Weekly, &cfg, utc("2024-03-06T10:00:00Z")).unwrap();
        assert_eq!(next.to_rfc3339(), "2024-03-11T09:00:00+00:00");
    }

    #[test]
    fn test_weekly_same_day_later_in_week() {
        let cfg = config("09:00", Some(3), None, "UTC");
        let next = next_run(Frequency::Weekly, &cfg, utc("2024-03-06T08:00:00Z")).unwrap();
        assert_eq!(next.to_rfc3339(), "2024-03-06T09:00:00+00:00");
        let next = next_run(Frequency::Weekly, &cfg, utc("2024-03-06T09:00:00Z")).unwrap();
        assert_eq!(next.to_rfc3339(), "2024-03-13T09:00:00+00:00");
    }

    #[test]
    fn test_daily_before_and_after_time() {
        let cfg = config("09:00", None, None, "UTC");
        let next = next_run(Frequency::Daily, &cfg, utc("2024-03-05T08:00:00Z")).unwrap();
        assert_eq!(next.to_rfc3339(), "2024-03-05T09:00:00+00:00");
        let next = next_run(Frequency::Daily, &cfg, utc("2024-03-05T09:30:00Z")).unwrap();
        assert_eq!(next.to_rfc3339(), "2024-03-06T09:00:00+00:00");
    }

    #[test]
    fn test_daily_uses_schedule_timezone() {
        // 12:00 UTC is 09:00 in Santiago (UTC-3 in March), so 10:00 local is still ahead.
        let cfg = config("10:00", None, None, "America/Santiago");
        let next = next_run(Frequency::Daily, &cfg, utc("2024-03-05T12:00:00Z")).unwrap();
        assert_eq!(next.to_rfc3339(), "2024-03-05T10:00:00-03:00");
    }

    #[test]
    fn test_monthly_clamps_to_february_end() {
        let cfg = config("09:00", None, Some(31), "UTC");
        let next = next_run(Frequency::Monthly, &cfg, utc("2024-02-10T00:00:00Z")).unwrap();
        assert_eq!(next.to_rfc3339(), "2024-02-29T09:00:00+00:00");
    }

    #[test]
    fn test_monthly_clamp_does_not_decay() {
        let cfg = config("09:00", None, Some(31), "UTC");
        let next = next_run(Frequency::Monthly, &cfg, utc("2024-02-29T10:00:00Z")).unwrap();
        assert_eq!(next.to_rfc3339(), "2024-03-31T09:00:00+00:00");
    }

    #[test]
    fn test_quarterly_adds_three_months() {
        let cfg = config("09:00", None, Some(31), "UTC");
        let next = next_run(Frequency::Quarterly, &cfg, utc("2024-01-31T10:00:00Z")).unwrap();
        assert_eq!(next.to_rfc3339(), "2024-04-30T09:00:00+00:00");
        let next = next_run(Frequency::Quarterly, &cfg, utc("2024-11-30T10:00:00Z")).unwrap();
        assert_eq!(next.to_rfc3339(), "2025-02-28T09:00:00+00:00");
    }

    #[test]
    fn test_spring_forward_gap_moves_after_gap() {
        let cfg = config("02:30", None, None, "America/New_York");
        let next = next_run(Frequency::Daily, &cfg, utc("2024-03-09T17:00:00Z")).unwrap();
        assert_eq!(next.to_rfc3339(), "2024-03-10T03:00:00-04:00");
    }

    #[test]
    fn test_fall_back_takes_earlier_instant() {
        let cfg = config("01:30", None, None, "America/New_York");
        let next = next_run(Frequency::Daily, &cfg, utc("2024-11-02T16:00:00Z")).unwrap();
        assert_eq!(next.to_rfc3339(), "2024-11-03T01:30:00-04:00");
    }

    #[test]
    fn test_missing_required_fields_rejected() {
        let weekly = request(Frequency::Weekly, config("09:00", None, None, "UTC"));
        assert_eq!(
            ScheduledReport::create(weekly, Utc::now()).unwrap_err(),
            ScheduleConfigError::MissingDayOfWeek
        );
        let monthly = request(Frequency::Monthly, config("09:00", Some(1), None, "UTC"));
        assert!(matches!(
            ScheduledReport::create(monthly, Utc::now()).unwrap_err(),
            ScheduleConfigError::MissingDayOfMonth(_)
        ));
    }

    #[test]
    fn test_malformed_rules_rejected() {
        let cfg = config("25:00", None, None, "UTC");
        assert!(matches!(validate_rule(Frequency::Daily, &cfg), Err(ScheduleConfigError::InvalidTime(_))));
        let cfg = config("09:00", None, None, "Mars/Olympus");
        assert!(matches!(
            validate_rule(Frequency::Daily, &cfg),
            Err(ScheduleConfigError::InvalidTimezone(_))
        ));
        let cfg = config("09:00", Some(7), None, "UTC");
        assert_eq!(validate_rule(Frequency::Weekly, &cfg), Err(ScheduleConfigError::InvalidDayOfWeek(7)));

        let mut req = request(Frequency::Daily, config("09:00", None, None, "UTC"));
        req.recipients = vec!["not-an-email".into()];
        assert_eq!(
            ScheduledReport::create(req, Utc::now()).unwrap_err(),
            ScheduleConfigError::InvalidRecipient("not-an-email".into())
        );
    }

    #[test]
    fn test_advance_and_status() {
        let now = utc("2024-03-05T08:00:00Z");
        let mut schedule =
            ScheduledReport::create(request(Frequency::Daily, config("09:00", None, None, "UTC")), now).unwrap();
        assert_eq!(schedule.status(now), ScheduleStatus::Active);

        let later = utc("2024-03-05T10:00:00Z");
        assert_eq!(schedule.status(later), ScheduleStatus::Overdue);

        schedule.advance(later).unwrap();
        assert_eq!(schedule.last_run(), Some(later));
        assert_eq!(schedule.next_run().to_rfc3339(), "2024-03-06T09:00:00+00:00");
        assert_eq!(schedule.status(later), ScheduleStatus::Active);

        schedule.is_active = false;
        assert_eq!(schedule.status(later), ScheduleStatus::Paused);
    }

    #[test]
    fn test_describe() {
        let schedule = ScheduledReport::create(
            request(Frequency::Weekly, config("09:00", Some(1), None, "America/Santiago")),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(schedule.describe(), "Semanal, lunes a las 09:00 (America/Santiago)");
    }
}

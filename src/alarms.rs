//! Alarm generation from extracted schedules.
//!
//! Pure functions: the caller passes `now`, nothing here reads the clock.

use chrono::{Duration, NaiveDateTime};
use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::schema::{Alarm, AlarmType, Business, ClosingType};

/// One closing edge of a business schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosingEdge<'a> {
    pub index: usize,
    pub opening: &'a str,
    pub closing: &'a str,
    pub is_midday: bool,
    pub is_final: bool,
}

/// Closing edges of a business, in window order.
///
/// Under a midday schedule the first window closes for lunch and the second
/// is the final closing. Any later window keeps the midday type but uses the
/// final lead time. Single-window schedules only have a final edge.
pub fn closing_edges(business: &Business) -> Vec<ClosingEdge<'_>> {
    business
        .found_times
        .iter()
        .enumerate()
        .map(|(index, window)| {
            let is_midday = business.closing_type == ClosingType::Midday && index == 0;
            let is_final = match business.closing_type {
                ClosingType::Final | ClosingType::Continuous => true,
                ClosingType::Midday => index == 1,
            };
            ClosingEdge {
                index,
                opening: &window.start,
                closing: &window.end,
                is_midday,
                is_final,
            }
        })
        .collect()
}

/// Build every alarm still ahead of `now`, sorted by trigger time.
///
/// Ties keep business order, then window order.
pub fn generate(businesses: &[Business], config: &AppConfig, now: NaiveDateTime) -> Vec<Alarm> {
    let mut alarms = Vec::new();

    for business in businesses {
        for edge in closing_edges(business) {
            if edge.closing.is_empty() {
                continue;
            }

            let lead = if edge.is_midday {
                config.midday_minutes
            } else {
                config.final_minutes
            };

            let Some(alarm_time) = alarm_time_for(edge.closing, lead, now) else {
                warn!(
                    "Skipping unparseable closing time {:?} for {} (window {})",
                    edge.closing, business.id, edge.index
                );
                continue;
            };

            if alarm_time <= now {
                debug!(
                    "Window {}-{} of {} already closing ({})",
                    edge.opening, edge.closing, business.id, alarm_time
                );
                continue;
            }

            alarms.push(Alarm {
                id: format!("{}-{}-{}", business.id, edge.closing, edge.index),
                business_name: business.name.clone(),
                address: business.address.clone(),
                alarm_time,
                closing_time: edge.closing.to_string(),
                alarm_type: if edge.is_final {
                    AlarmType::Final
                } else {
                    AlarmType::Midday
                },
                is_midday_closing: edge.is_midday,
                active: true,
            });
        }
    }

    alarms.sort_by_key(|a| a.alarm_time);
    debug!(
        "Generated {} alarms for {} businesses",
        alarms.len(),
        businesses.len()
    );
    alarms
}

/// Trigger time for a closing `HH:MM` minus `lead_minutes`, on `now`'s date.
///
/// Minutes borrow a single hour and hours wrap once to stay on the same day.
/// Whatever is still out of range afterwards rolls over like a clock
/// (`12:-30` is `11:30`, `25:10` is 01:10 the next day). Returns `None` when
/// the closing time is not two numbers separated by a colon.
pub fn alarm_time_for(closing: &str, lead_minutes: i64, now: NaiveDateTime) -> Option<NaiveDateTime> {
    let (hours, minutes) = parse_clock(closing)?;

    let mut hours = hours;
    let mut minutes = minutes.checked_sub(lead_minutes)?;
    if minutes < 0 {
        minutes += 60;
        hours -= 1;
        if hours < 0 {
            hours += 24;
        }
    }

    let offset = hours.checked_mul(60)?.checked_add(minutes)?;
    let midnight = now.date().and_hms_opt(0, 0, 0)?;
    midnight.checked_add_signed(Duration::try_minutes(offset)?)
}

fn parse_clock(time: &str) -> Option<(i64, i64)> {
    let mut parts = time.split(':');
    let hours = parts.next()?.trim().parse::<i64>().ok()?;
    let minutes = parts.next()?.trim().parse::<i64>().ok()?;
    Some((hours, minutes))
}

//! In-memory alarm book for the current scan.
//!
//! Holds the latest [`ScanRecord`] and the keys of alarms that already fired.
//! A new scan replaces everything; configuration changes regenerate the
//! alarms in place, keeping the user's pause/resume choices.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::Result;
use chrono::{Duration, NaiveDateTime};
use tracing::{debug, info};

use crate::alarms;
use crate::config::{AppConfig, AppConfigPatch, ConfigStore};
use crate::schedule;
use crate::schema::{Alarm, AlarmType, Business, ScanRecord};

/// How far from its trigger time an alarm may still fire, either side.
const FIRE_WINDOW_SECS: i64 = 60;

#[derive(Debug, Default)]
struct BookState {
    scan: Option<ScanRecord>,
    fired: HashSet<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AlarmBook {
    inner: Arc<RwLock<BookState>>,
}

/// Run extraction and alarm generation over one recognized text.
pub fn scan_text(source: &str, text: &str, config: &AppConfig, now: NaiveDateTime) -> ScanRecord {
    let mut record = ScanRecord::new(source.to_string(), text.to_string());
    record.businesses = schedule::extract(text);
    record.alarms = alarms::generate(&record.businesses, config, now);
    info!(
        "Scan {} from {}: {} businesses, {} alarms",
        record.id,
        source,
        record.businesses.len(),
        record.alarms.len()
    );
    record
}

impl AlarmBook {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, BookState> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BookState> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn scan(&self) -> Option<ScanRecord> {
        self.read().scan.clone()
    }

    pub fn businesses(&self) -> Vec<Business> {
        self.read()
            .scan
            .as_ref()
            .map(|s| s.businesses.clone())
            .unwrap_or_default()
    }

    pub fn alarms(&self) -> Vec<Alarm> {
        self.read()
            .scan
            .as_ref()
            .map(|s| s.alarms.clone())
            .unwrap_or_default()
    }

    /// Scan `text` with the stored config and install the result. Fired keys
    /// from the previous scan are forgotten.
    ///
    /// The config is read under the book lock so a concurrent
    /// [`reconfigure`](Self::reconfigure) cannot slip in between.
    pub fn install_text(
        &self,
        source: &str,
        text: &str,
        configs: &ConfigStore,
        now: NaiveDateTime,
    ) -> ScanRecord {
        let mut state = self.write();
        let record = scan_text(source, text, &configs.get(), now);
        state.fired.clear();
        state.scan = Some(record.clone());
        record
    }

    /// Apply `patch` to the stored config and regenerate from the result.
    ///
    /// Both steps run under the book lock, so the live alarms always match
    /// the config that was stored last.
    pub fn reconfigure(
        &self,
        configs: &ConfigStore,
        patch: AppConfigPatch,
        now: NaiveDateTime,
    ) -> Result<(AppConfig, Vec<Alarm>)> {
        let mut state = self.write();
        let config = configs.update(patch)?;
        let alarms = regenerate_locked(&mut state, &config, now);
        Ok((config, alarms))
    }

    /// Flip `active` on one alarm. Returns the updated alarm.
    pub fn toggle(&self, id: &str) -> Option<Alarm> {
        let mut state = self.write();
        let alarm = state
            .scan
            .as_mut()?
            .alarms
            .iter_mut()
            .find(|a| a.id == id)?;
        alarm.active = !alarm.active;
        info!("Alarm {} is now {}", id, if alarm.active { "active" } else { "paused" });
        Some(alarm.clone())
    }

    /// Remove one alarm. Returns true if it existed.
    pub fn remove(&self, id: &str) -> bool {
        let mut state = self.write();
        let Some(scan) = state.scan.as_mut() else {
            return false;
        };
        let before = scan.alarms.len();
        scan.alarms.retain(|a| a.id != id);
        scan.alarms.len() != before
    }

    /// Alarms that should fire at `now`; each is returned once per scan.
    ///
    /// An alarm is due when it is active, its kind is enabled and its trigger
    /// time is within a minute of `now` on either side.
    pub fn due(&self, config: &AppConfig, now: NaiveDateTime) -> Vec<Alarm> {
        let mut state = self.write();
        let BookState { scan, fired } = &mut *state;
        let Some(scan) = scan.as_ref() else {
            return Vec::new();
        };

        let window = Duration::seconds(FIRE_WINDOW_SECS);
        let mut due = Vec::new();
        for alarm in scan.alarms.iter().filter(|a| a.active) {
            let until = alarm.alarm_time - now;
            if until > window || until <= -window {
                continue;
            }
            let enabled = match alarm.alarm_type {
                AlarmType::Midday => config.midday_alarm_enabled,
                AlarmType::Final => config.final_alarm_enabled,
            };
            if !enabled {
                continue;
            }
            if fired.insert(alarm.fired_key()) {
                due.push(alarm.clone());
            }
        }
        due
    }
}

/// Rebuild the alarms of the current scan with a new config.
///
/// Alarms whose id survives keep their `active` flag.
fn regenerate_locked(state: &mut BookState, config: &AppConfig, now: NaiveDateTime) -> Vec<Alarm> {
    let Some(scan) = state.scan.as_mut() else {
        return Vec::new();
    };

    let previous: HashMap<&str, bool> = scan
        .alarms
        .iter()
        .map(|a| (a.id.as_str(), a.active))
        .collect();
    let mut next = alarms::generate(&scan.businesses, config, now);
    for alarm in &mut next {
        if let Some(active) = previous.get(alarm.id.as_str()) {
            alarm.active = *active;
        }
    }

    debug!("Regenerated {} alarms for scan {}", next.len(), scan.id);
    scan.alarms = next.clone();
    next
}

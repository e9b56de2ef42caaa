//! Background loop that fires due alarms.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::alarm_book::AlarmBook;
use crate::config::ConfigStore;
use crate::notify::{Notification, Notifier};

/// Fire every alarm due at `now`. Returns how many notifications went out.
pub async fn check_alarms(
    book: &AlarmBook,
    configs: &ConfigStore,
    notifier: &dyn Notifier,
    now: NaiveDateTime,
) -> usize {
    let config = configs.get();
    let mut sent = 0;

    for alarm in book.due(&config, now) {
        let span = info_span!("alarm", alarm_id = %alarm.id, closing = %alarm.closing_time);
        let notification = Notification::for_alarm(&alarm, &config);

        async {
            info!("Alarm due for {}", alarm.business_name);
            match notifier.notify(&notification).await {
                Ok(()) => sent += 1,
                Err(e) => warn!("Notifier {} failed: {:#}", notifier.name(), e),
            }
        }
        .instrument(span)
        .await;
    }

    sent
}

/// Poll the alarm book forever at `period`, using the local wall clock.
pub async fn run_watcher(
    book: AlarmBook,
    configs: Arc<ConfigStore>,
    notifier: Arc<dyn Notifier>,
    period: Duration,
) {
    info!("Starting alarm watcher (every {:?})...", period);

    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let now = Local::now().naive_local();
        let sent = check_alarms(&book, &configs, notifier.as_ref(), now).await;
        if sent > 0 {
            debug!("Watcher sent {} notifications at {}", sent, now);
        }
    }
}

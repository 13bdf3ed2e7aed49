//! Fixed-rate tick loop shared by every queue

use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::config::QueueSettings;
use crate::error::Result;
use crate::shutdown::ShutdownSignal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub initial_delay: Duration,
    pub polling: Duration,
}

impl From<&QueueSettings> for Schedule {
    fn from(settings: &QueueSettings) -> Self {
        Schedule {
            initial_delay: settings.initial_delay(),
            polling: settings.polling(),
        }
    }
}

/// Run `tick` after `initial_delay`, then every `polling`, until `shutdown`.
///
/// Ticks never overlap; a slow tick delays the next one instead of causing a
/// burst. A failed tick is logged and the loop carries on. Returns the number
/// of ticks that ran.
pub async fn run_scheduled<F, Fut, T>(
    name: &str,
    schedule: Schedule,
    shutdown: ShutdownSignal,
    mut tick: F,
) -> u64
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    T: Debug,
{
    info!(
        "[{}] Starting in {}ms, polling every {}ms",
        name,
        schedule.initial_delay.as_millis(),
        schedule.polling.as_millis()
    );

    tokio::select! {
        _ = sleep(schedule.initial_delay) => {}
        _ = shutdown.wait() => {
            info!("[{}] Stopped before first tick", name);
            return 0;
        }
    }

    let mut ticker = interval(schedule.polling);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut ticks = 0;
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.wait() => break,
        }
        if shutdown.is_shutdown() {
            break;
        }

        match tick().await {
            Ok(outcome) => debug!("[{}] Tick: {:?}", name, outcome),
            Err(e) => error!("[{}] Tick failed: {}", name, e),
        }
        ticks += 1;
    }

    info!("[{}] Stopped after {} tick(s)", name, ticks);
    ticks
}

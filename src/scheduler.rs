//! Passive decay clock.
//!
//! A background task watches the controller phase and emits one [`Tick`] per
//! interval while the pet is `Active`. Leaving `Active` stops the interval;
//! re-entering starts a fresh one. Missed ticks are never replayed.

use crate::controller::Phase;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tick {
    pub seq: u64,
}

pub struct DecayScheduler {
    task: Option<JoinHandle<()>>,
}

impl DecayScheduler {
    pub fn spawn(every: Duration, phase: watch::Receiver<Phase>) -> (Self, mpsc::Receiver<Tick>) {
        let (tx, rx) = mpsc::channel(1);
        let task = tokio::spawn(run(every, phase, tx));
        (Self { task: Some(task) }, rx)
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for DecayScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run(every: Duration, mut phase: watch::Receiver<Phase>, tx: mpsc::Sender<Tick>) {
    let mut seq = 0u64;
    loop {
        while *phase.borrow_and_update() != Phase::Active {
            if phase.changed().await.is_err() {
                return;
            }
        }

        debug!(?every, "decay started");
        let mut interval = time::interval_at(Instant::now() + every, every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    seq += 1;
                    if tx.send(Tick { seq }).await.is_err() {
                        return;
                    }
                }
                changed = phase.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    if *phase.borrow_and_update() != Phase::Active {
                        debug!("decay paused");
                        break;
                    }
                }
            }
        }
    }
}

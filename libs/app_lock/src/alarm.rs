// Copyright (C) 2025 The Android Open Source Project
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Alarm
//!
//! Tracks the timeout alarm of every backgrounded package of a user. The
//! alarms themselves are set through an [`AlarmClock`], which fires them back
//! into the service as [`AppLockEvent::AlarmFired`].

use crate::events::AppLockEvent;
use crate::UserId;
use anyhow::{Context, Result};
use log::{debug, error};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Request code handed to the platform alarm API.
pub type AlarmToken = u32;

/// Identifies one armed alarm.
///
/// Tokens are recycled once their alarm is gone, `serial` never is: it comes
/// from [`AlarmSerials`], which outlives every scheduler of the service. A
/// fire event only counts if both still match the armed alarm of a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AlarmId {
    pub user_id: UserId,
    pub token: AlarmToken,
    pub serial: u64,
}

/// One-shot wake up service.
pub trait AlarmClock: Send + Sync {
    /// Arms `alarm` to fire once `after` has elapsed. An alarm already armed
    /// with the same user and token is replaced.
    fn set(&self, alarm: AlarmId, after: Duration) -> Result<()>;

    /// Disarms `alarm`. Unknown alarms are ignored.
    fn cancel(&self, alarm: AlarmId);
}

/// Source of alarm serials shared by all schedulers of a service, so a user
/// that is stopped and started again never sees an old serial.
#[derive(Debug, Default)]
pub struct AlarmSerials(AtomicU64);

impl AlarmSerials {
    fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// Hands out tokens, preferring the least recently released one.
#[derive(Debug, Default)]
struct TokenAllocator {
    next: AlarmToken,
    free: VecDeque<AlarmToken>,
}

impl TokenAllocator {
    fn allocate(&mut self) -> AlarmToken {
        if let Some(token) = self.free.pop_front() {
            return token;
        }
        let token = self.next;
        self.next = self.next.wrapping_add(1);
        token
    }

    fn release(&mut self, token: AlarmToken) {
        self.free.push_back(token);
    }
}

#[derive(Debug, Default)]
struct SchedulerInner {
    alarms: HashMap<String, AlarmId>,
    tokens: TokenAllocator,
}

impl SchedulerInner {
    fn release(&mut self, alarm: AlarmId) {
        self.tokens.release(alarm.token);
    }
}

/// Timeout alarms of a single user, at most one per package.
///
/// The alarm map and the token table share one mutex, which is never held
/// while waiting on anything but the clock.
pub struct AlarmScheduler {
    user_id: UserId,
    clock: Arc<dyn AlarmClock>,
    serials: Arc<AlarmSerials>,
    inner: Mutex<SchedulerInner>,
}

impl AlarmScheduler {
    pub fn new(user_id: UserId, clock: Arc<dyn AlarmClock>, serials: Arc<AlarmSerials>) -> Self {
        Self { user_id, clock, serials, inner: Mutex::new(SchedulerInner::default()) }
    }

    fn inner(&self) -> std::sync::MutexGuard<'_, SchedulerInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Arms the timeout alarm of `package_name`. If one is already armed it
    /// is kept and returned as is.
    pub fn schedule(&self, package_name: &str, after: Duration) -> Result<AlarmId> {
        let mut inner = self.inner();
        if let Some(alarm) = inner.alarms.get(package_name) {
            debug!("Alarm already scheduled for package {}", package_name);
            return Ok(*alarm);
        }
        let alarm = AlarmId {
            user_id: self.user_id,
            token: inner.tokens.allocate(),
            serial: self.serials.next(),
        };
        if let Err(e) = self.clock.set(alarm, after) {
            inner.release(alarm);
            return Err(e.context(format!("Failed to set alarm for {}", package_name)));
        }
        debug!("Scheduled alarm {:?} for {} in {:?}", alarm, package_name, after);
        inner.alarms.insert(package_name.to_string(), alarm);
        Ok(alarm)
    }

    /// Disarms the alarm of `package_name`. Returns true if one was armed.
    pub fn cancel(&self, package_name: &str) -> bool {
        let detached = self.detach(package_name);
        let cancelled = detached.is_some();
        self.disarm(detached);
        cancelled
    }

    /// Disarms every alarm. Returns how many were armed.
    pub fn cancel_all(&self) -> usize {
        let detached = self.detach_all();
        let count = detached.len();
        self.disarm(detached);
        count
    }

    /// Forgets the alarm of `package_name` without touching the clock.
    ///
    /// A fire of the detached alarm is already ignored, hand it to
    /// [`Self::disarm`] once no other lock is held.
    pub fn detach(&self, package_name: &str) -> Option<AlarmId> {
        let alarm = self.inner().alarms.remove(package_name)?;
        debug!("Cancelling timeout alarm for {}", package_name);
        Some(alarm)
    }

    /// Forgets every alarm without touching the clock.
    pub fn detach_all(&self) -> Vec<AlarmId> {
        self.inner().alarms.drain().map(|(_, alarm)| alarm).collect()
    }

    /// Cancels detached alarms with the clock and frees their tokens.
    pub fn disarm(&self, alarms: impl IntoIterator<Item = AlarmId>) {
        for alarm in alarms {
            self.clock.cancel(alarm);
            self.inner().release(alarm);
        }
    }

    /// Resolves a fired alarm to its package and forgets it.
    ///
    /// Returns `None` for alarms that were cancelled or replaced in the
    /// meantime.
    pub fn take_fired(&self, alarm: AlarmId) -> Option<String> {
        let mut inner = self.inner();
        let package_name = inner
            .alarms
            .iter()
            .find(|(_, armed)| **armed == alarm)
            .map(|(pkg, _)| pkg.clone())?;
        inner.alarms.remove(&package_name);
        inner.release(alarm);
        Some(package_name)
    }

    pub fn is_scheduled(&self, package_name: &str) -> bool {
        self.inner().alarms.contains_key(package_name)
    }

    /// Packages with an armed alarm, sorted.
    pub fn scheduled_packages(&self) -> Vec<String> {
        let mut packages: Vec<String> = self.inner().alarms.keys().cloned().collect();
        packages.sort();
        packages
    }
}

/// [`AlarmClock`] backed by tokio timers.
///
/// Every alarm is a task sleeping on the runtime the clock was created on,
/// posting [`AppLockEvent::AlarmFired`] when it wakes up.
pub struct TokioAlarmClock {
    runtime: Handle,
    event_sender: mpsc::Sender<AppLockEvent>,
    pending: Mutex<HashMap<(UserId, AlarmToken), JoinHandle<()>>>,
}

impl TokioAlarmClock {
    /// Creates a clock on the current tokio runtime.
    pub fn new(event_sender: mpsc::Sender<AppLockEvent>) -> Result<Self> {
        let runtime = Handle::try_current().context("TokioAlarmClock needs a tokio runtime")?;
        Ok(Self { runtime, event_sender, pending: Mutex::new(HashMap::new()) })
    }
}

impl AlarmClock for TokioAlarmClock {
    fn set(&self, alarm: AlarmId, after: Duration) -> Result<()> {
        let sender = self.event_sender.clone();
        let handle = self.runtime.spawn(async move {
            tokio::time::sleep(after).await;
            if sender.send(AppLockEvent::AlarmFired(alarm)).await.is_err() {
                error!("Event channel closed, dropping alarm {:?}", alarm);
            }
        });
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.retain(|_, task| !task.is_finished());
        if let Some(previous) = pending.insert((alarm.user_id, alarm.token), handle) {
            previous.abort();
        }
        Ok(())
    }

    fn cancel(&self, alarm: AlarmId) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(task) = pending.remove(&(alarm.user_id, alarm.token)) {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingClock {
        set: Mutex<Vec<(AlarmId, Duration)>>,
        cancelled: Mutex<Vec<AlarmId>>,
        fail: std::sync::atomic::AtomicBool,
    }

    impl AlarmClock for RecordingClock {
        fn set(&self, alarm: AlarmId, after: Duration) -> Result<()> {
            if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
                anyhow::bail!("alarm service unavailable");
            }
            self.set.lock().unwrap().push((alarm, after));
            Ok(())
        }

        fn cancel(&self, alarm: AlarmId) {
            self.cancelled.lock().unwrap().push(alarm);
        }
    }

    fn scheduler() -> (Arc<RecordingClock>, AlarmScheduler) {
        let clock = Arc::new(RecordingClock::default());
        let scheduler = AlarmScheduler::new(0, clock.clone(), Arc::default());
        (clock, scheduler)
    }

    #[test]
    fn schedule_keeps_existing_alarm() {
        let (clock, scheduler) = scheduler();
        let first = scheduler.schedule("com.app.a", Duration::from_secs(10)).unwrap();
        let second = scheduler.schedule("com.app.a", Duration::from_secs(20)).unwrap();
        assert_eq!(first, second);
        assert_eq!(clock.set.lock().unwrap().len(), 1);
    }

    #[test]
    fn concurrent_alarms_get_distinct_tokens() {
        let (_clock, scheduler) = scheduler();
        let a = scheduler.schedule("com.app.a", Duration::from_secs(1)).unwrap();
        let b = scheduler.schedule("com.app.b", Duration::from_secs(1)).unwrap();
        assert_ne!(a.token, b.token);
    }

    #[test]
    fn cancelled_tokens_are_reused() {
        let (clock, scheduler) = scheduler();
        let a = scheduler.schedule("com.app.a", Duration::from_secs(1)).unwrap();
        assert!(scheduler.cancel("com.app.a"));
        assert!(!scheduler.cancel("com.app.a"));
        assert_eq!(clock.cancelled.lock().unwrap().as_slice(), &[a]);

        let b = scheduler.schedule("com.app.b", Duration::from_secs(1)).unwrap();
        assert_eq!(a.token, b.token);
        assert_ne!(a.serial, b.serial);
    }

    #[test]
    fn stale_fire_is_ignored() {
        let (_clock, scheduler) = scheduler();
        let a = scheduler.schedule("com.app.a", Duration::from_secs(1)).unwrap();
        scheduler.cancel("com.app.a");
        // The token goes to another package, the old fire must not hit it.
        let b = scheduler.schedule("com.app.b", Duration::from_secs(1)).unwrap();
        assert_eq!(scheduler.take_fired(a), None);
        assert_eq!(scheduler.take_fired(b), Some("com.app.b".to_string()));
        assert_eq!(scheduler.take_fired(b), None);
        assert!(scheduler.scheduled_packages().is_empty());
    }

    #[test]
    fn restarted_scheduler_ignores_fire_of_previous_one() {
        let clock = Arc::new(RecordingClock::default());
        let serials = Arc::new(AlarmSerials::default());
        let previous = AlarmScheduler::new(0, clock.clone(), serials.clone());
        let stale = previous.schedule("com.app.a", Duration::from_secs(1)).unwrap();
        previous.cancel_all();

        let restarted = AlarmScheduler::new(0, clock, serials);
        let fresh = restarted.schedule("com.app.b", Duration::from_secs(1)).unwrap();
        assert_eq!(stale.token, fresh.token);
        assert_ne!(stale.serial, fresh.serial);
        assert_eq!(restarted.take_fired(stale), None);
        assert!(restarted.is_scheduled("com.app.b"));
    }

    #[test]
    fn detached_alarm_is_stale_before_disarm() {
        let (clock, scheduler) = scheduler();
        let a = scheduler.schedule("com.app.a", Duration::from_secs(1)).unwrap();
        let detached = scheduler.detach("com.app.a");
        assert_eq!(detached, Some(a));
        assert!(clock.cancelled.lock().unwrap().is_empty());
        assert_eq!(scheduler.take_fired(a), None);

        scheduler.disarm(detached);
        assert_eq!(clock.cancelled.lock().unwrap().as_slice(), &[a]);
        let b = scheduler.schedule("com.app.b", Duration::from_secs(1)).unwrap();
        assert_eq!(a.token, b.token);
    }

    #[test]
    fn cancel_all_releases_everything() {
        let (clock, scheduler) = scheduler();
        scheduler.schedule("com.app.a", Duration::from_secs(1)).unwrap();
        scheduler.schedule("com.app.b", Duration::from_secs(1)).unwrap();
        assert_eq!(scheduler.cancel_all(), 2);
        assert_eq!(clock.cancelled.lock().unwrap().len(), 2);
        assert!(!scheduler.is_scheduled("com.app.a"));
        assert_eq!(scheduler.cancel_all(), 0);
    }

    #[test]
    fn failed_set_is_not_tracked() {
        let (clock, scheduler) = scheduler();
        clock.fail.store(true, std::sync::atomic::Ordering::SeqCst);
        assert!(scheduler.schedule("com.app.a", Duration::from_secs(1)).is_err());
        assert!(!scheduler.is_scheduled("com.app.a"));

        clock.fail.store(false, std::sync::atomic::Ordering::SeqCst);
        let alarm = scheduler.schedule("com.app.a", Duration::from_secs(1)).unwrap();
        assert_eq!(alarm.token, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_clock_fires_and_cancels() {
        let (tx, mut rx) = mpsc::channel(4);
        let clock = TokioAlarmClock::new(tx).unwrap();
        let fired = AlarmId { user_id: 0, token: 1, serial: 1 };
        let cancelled = AlarmId { user_id: 0, token: 2, serial: 2 };
        clock.set(fired, Duration::from_secs(10)).unwrap();
        clock.set(cancelled, Duration::from_secs(5)).unwrap();
        clock.cancel(cancelled);

        match rx.recv().await {
            Some(AppLockEvent::AlarmFired(alarm)) => assert_eq!(alarm, fired),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }
}

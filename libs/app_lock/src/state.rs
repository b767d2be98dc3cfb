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

//! # State
//!
//! Runtime lock state of a single user. Everything here is synchronous and
//! must be accessed through the mutex of a [`UserStateHandle`].

use crate::alarm::{AlarmClock, AlarmScheduler, AlarmSerials};
use crate::config::AppLockConfig;
use crate::unlocker::UnlockOutcome;
use crate::UserId;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

/// Lock state of a package, derived from the user state.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum PackageLockState {
    /// The package is not protected.
    Unprotected,
    /// Unlocked and visible.
    ForegroundUnlocked,
    /// Unlocked in the background, the timeout alarm is armed.
    BackgroundUnlockedTimerArmed,
    /// Unlocked in the background without an alarm. Only seen while an
    /// alarm is about to be armed.
    BackgroundUnlocked,
    /// Locked and not visible.
    BackgroundLocked,
    /// An unlock prompt is being shown for the package.
    PendingUnlock,
    /// Locked but visible, an unlock prompt must follow.
    ForegroundLocked,
}

/// Result of trying to start an unlock.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum BeginUnlock {
    /// The package is now pending unlock.
    Started,
    NotProtected,
    AlreadyUnlocked,
    AlreadyPending,
    /// Another package is pending unlock.
    Busy(String),
    /// Neither biometrics nor the device credential can be used.
    Unavailable,
}

/// What an unlock outcome did to the state.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum FinishUnlock {
    /// The package was added to the unlocked set.
    Granted,
    /// The user cancelled, the package stays locked.
    Denied,
    /// The package is no longer protected, the outcome has no effect.
    Discarded,
}

/// What a fired timeout alarm did to the state.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum AlarmOutcome {
    /// The package came back to the foreground, it stays unlocked.
    StillForeground,
    /// The package is locked again.
    Relocked { secure_notification: bool },
    NotProtected,
}

/// Config and runtime state of one user.
#[derive(Debug)]
pub struct UserLockState {
    pub config: AppLockConfig,
    foreground_packages: HashSet<String>,
    unlocked_packages: HashSet<String>,
    pending_unlock: Option<String>,
}

impl UserLockState {
    pub fn new(config: AppLockConfig) -> Self {
        Self {
            config,
            foreground_packages: HashSet::new(),
            unlocked_packages: HashSet::new(),
            pending_unlock: None,
        }
    }

    pub fn foreground_packages(&self) -> &HashSet<String> {
        &self.foreground_packages
    }

    pub fn unlocked_packages(&self) -> &HashSet<String> {
        &self.unlocked_packages
    }

    pub fn pending_unlock(&self) -> Option<&str> {
        self.pending_unlock.as_deref()
    }

    pub fn is_foreground(&self, package_name: &str) -> bool {
        self.foreground_packages.contains(package_name)
    }

    pub fn is_unlocked(&self, package_name: &str) -> bool {
        self.unlocked_packages.contains(package_name)
    }

    /// Whether the package is protected and not unlocked.
    pub fn require_unlock(&self, package_name: &str) -> bool {
        self.config.contains(package_name) && !self.is_unlocked(package_name)
    }

    /// Whether the package is out of reach right now: neither unlocked nor visible.
    pub fn is_locked_now(&self, package_name: &str) -> bool {
        !self.is_unlocked(package_name) && !self.is_foreground(package_name)
    }

    pub fn package_state(&self, package_name: &str, alarm_armed: bool) -> PackageLockState {
        if !self.config.contains(package_name) {
            return PackageLockState::Unprotected;
        }
        if self.pending_unlock.as_deref() == Some(package_name) {
            return PackageLockState::PendingUnlock;
        }
        match (self.is_foreground(package_name), self.is_unlocked(package_name), alarm_armed) {
            (true, true, _) => PackageLockState::ForegroundUnlocked,
            (true, false, _) => PackageLockState::ForegroundLocked,
            (false, true, true) => PackageLockState::BackgroundUnlockedTimerArmed,
            (false, true, false) => PackageLockState::BackgroundUnlocked,
            (false, false, _) => PackageLockState::BackgroundLocked,
        }
    }

    /// Replaces the foreground set and returns the unlocked packages that
    /// just left it, in sorted order. Those need a timeout alarm.
    pub fn update_foreground(&mut self, top_packages: HashSet<String>) -> Vec<String> {
        let mut left: Vec<String> = self
            .foreground_packages
            .iter()
            .filter(|pkg| !top_packages.contains(*pkg) && self.unlocked_packages.contains(*pkg))
            .cloned()
            .collect();
        left.sort();
        self.foreground_packages = top_packages;
        left
    }

    /// Marks `package_name` as pending unlock if it needs one and no other
    /// prompt is in flight.
    pub fn begin_unlock(&mut self, package_name: &str) -> BeginUnlock {
        if !self.config.contains(package_name) {
            return BeginUnlock::NotProtected;
        }
        if self.is_unlocked(package_name) {
            return BeginUnlock::AlreadyUnlocked;
        }
        if let Some(pending) = &self.pending_unlock {
            if pending == package_name {
                return BeginUnlock::AlreadyPending;
            }
            return BeginUnlock::Busy(pending.clone());
        }
        self.pending_unlock = Some(package_name.to_string());
        BeginUnlock::Started
    }

    /// Clears the pending marker without an outcome.
    pub fn abort_unlock(&mut self, package_name: &str) {
        if self.pending_unlock.as_deref() == Some(package_name) {
            self.pending_unlock = None;
        }
    }

    /// Applies the outcome of the prompt shown for `package_name`.
    pub fn finish_unlock(&mut self, package_name: &str, outcome: UnlockOutcome) -> FinishUnlock {
        self.abort_unlock(package_name);
        if !self.config.contains(package_name) {
            return FinishUnlock::Discarded;
        }
        match outcome {
            UnlockOutcome::Unlocked => {
                self.unlocked_packages.insert(package_name.to_string());
                FinishUnlock::Granted
            }
            UnlockOutcome::Cancelled => FinishUnlock::Denied,
        }
    }

    /// Applies the timeout alarm of `package_name`.
    pub fn on_alarm_fired(&mut self, package_name: &str) -> AlarmOutcome {
        if !self.config.contains(package_name) {
            self.unlocked_packages.remove(package_name);
            return AlarmOutcome::NotProtected;
        }
        if self.is_foreground(package_name) {
            // It never stayed in the background long enough, so it is still unlocked.
            if self.pending_unlock.as_deref() != Some(package_name) {
                self.unlocked_packages.insert(package_name.to_string());
            }
            return AlarmOutcome::StillForeground;
        }
        self.unlocked_packages.remove(package_name);
        AlarmOutcome::Relocked {
            secure_notification: self.config.is_notification_secure(package_name),
        }
    }

    /// Locks every package. Returns how many were unlocked.
    pub fn lock_all(&mut self) -> usize {
        let count = self.unlocked_packages.len();
        self.unlocked_packages.clear();
        count
    }

    /// Protected packages that are visible but not unlocked, sorted.
    pub fn locked_foreground_packages(&self) -> Vec<String> {
        let mut packages: Vec<String> = self
            .foreground_packages
            .iter()
            .filter(|pkg| self.require_unlock(pkg))
            .cloned()
            .collect();
        packages.sort();
        packages
    }

    /// Drops all runtime state of a package that is no longer protected.
    pub fn forget_package(&mut self, package_name: &str) {
        self.unlocked_packages.remove(package_name);
        self.abort_unlock(package_name);
    }

    /// Drops all runtime state, the config is kept.
    pub fn reset_runtime(&mut self) {
        self.foreground_packages.clear();
        self.unlocked_packages.clear();
        self.pending_unlock = None;
    }
}

/// Per-user lock state with its own alarms.
///
/// Lock order is `state` first, then the scheduler, never the other way round.
pub struct UserStateHandle {
    user_id: UserId,
    state: Mutex<UserLockState>,
    pub alarms: AlarmScheduler,
}

impl UserStateHandle {
    pub fn new(
        user_id: UserId,
        config: AppLockConfig,
        clock: Arc<dyn AlarmClock>,
        serials: Arc<AlarmSerials>,
    ) -> Self {
        Self {
            user_id,
            state: Mutex::new(UserLockState::new(config)),
            alarms: AlarmScheduler::new(user_id, clock, serials),
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn lock(&self) -> MutexGuard<'_, UserLockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Derived lock state of a package.
    pub fn package_state(&self, package_name: &str) -> PackageLockState {
        let state = self.lock();
        state.package_state(package_name, self.alarms.is_scheduled(package_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn state_with(dir: &TempDir, packages: &[&str]) -> UserLockState {
        let mut config = AppLockConfig::new(dir.path());
        for pkg in packages {
            config.add_package(pkg);
        }
        UserLockState::new(config)
    }

    fn set_of(packages: &[&str]) -> HashSet<String> {
        packages.iter().map(|pkg| pkg.to_string()).collect()
    }

    #[test]
    fn unprotected_package_never_requires_unlock() {
        let dir = TempDir::new().unwrap();
        let mut state = state_with(&dir, &["com.app.a"]);
        assert!(!state.require_unlock("com.app.b"));
        assert_eq!(state.begin_unlock("com.app.b"), BeginUnlock::NotProtected);
        state.lock_all();
        assert!(!state.require_unlock("com.app.b"));
        assert_eq!(state.package_state("com.app.b", false), PackageLockState::Unprotected);
    }

    #[test]
    fn only_one_prompt_at_a_time() {
        let dir = TempDir::new().unwrap();
        let mut state = state_with(&dir, &["com.app.a", "com.app.b"]);
        assert_eq!(state.begin_unlock("com.app.a"), BeginUnlock::Started);
        assert_eq!(state.begin_unlock("com.app.a"), BeginUnlock::AlreadyPending);
        assert_eq!(state.begin_unlock("com.app.b"), BeginUnlock::Busy("com.app.a".to_string()));
        assert_eq!(state.package_state("com.app.a", false), PackageLockState::PendingUnlock);

        assert_eq!(state.finish_unlock("com.app.a", UnlockOutcome::Unlocked), FinishUnlock::Granted);
        assert_eq!(state.pending_unlock(), None);
        assert!(!state.require_unlock("com.app.a"));
        assert_eq!(state.begin_unlock("com.app.a"), BeginUnlock::AlreadyUnlocked);
    }

    #[test]
    fn cancel_keeps_package_locked() {
        let dir = TempDir::new().unwrap();
        let mut state = state_with(&dir, &["com.app.a"]);
        state.begin_unlock("com.app.a");
        assert_eq!(state.finish_unlock("com.app.a", UnlockOutcome::Cancelled), FinishUnlock::Denied);
        assert!(state.require_unlock("com.app.a"));
        assert_eq!(state.pending_unlock(), None);
    }

    #[test]
    fn outcome_after_removal_is_discarded() {
        let dir = TempDir::new().unwrap();
        let mut state = state_with(&dir, &["com.app.a"]);
        state.begin_unlock("com.app.a");
        state.config.remove_package("com.app.a");
        state.forget_package("com.app.a");
        assert_eq!(state.pending_unlock(), None);
        assert_eq!(
            state.finish_unlock("com.app.a", UnlockOutcome::Unlocked),
            FinishUnlock::Discarded
        );
        assert!(state.unlocked_packages().is_empty());
    }

    #[test]
    fn leaving_foreground_reports_unlocked_packages() {
        let dir = TempDir::new().unwrap();
        let mut state = state_with(&dir, &["com.app.a", "com.app.b"]);
        state.update_foreground(set_of(&["com.app.a", "com.app.b", "com.other"]));
        state.begin_unlock("com.app.a");
        state.finish_unlock("com.app.a", UnlockOutcome::Unlocked);

        let left = state.update_foreground(set_of(&["com.launcher"]));
        assert_eq!(left, vec!["com.app.a".to_string()]);
        assert_eq!(
            state.package_state("com.app.a", true),
            PackageLockState::BackgroundUnlockedTimerArmed
        );
        assert_eq!(state.package_state("com.app.b", false), PackageLockState::BackgroundLocked);
    }

    #[test]
    fn alarm_relocks_background_package() {
        let dir = TempDir::new().unwrap();
        let mut state = state_with(&dir, &["com.app.a"]);
        state.config.set_secure_notification("com.app.a", true);
        state.begin_unlock("com.app.a");
        state.finish_unlock("com.app.a", UnlockOutcome::Unlocked);
        assert_eq!(
            state.on_alarm_fired("com.app.a"),
            AlarmOutcome::Relocked { secure_notification: true }
        );
        assert!(state.require_unlock("com.app.a"));
    }

    #[test]
    fn alarm_for_foreground_package_keeps_it_unlocked() {
        let dir = TempDir::new().unwrap();
        let mut state = state_with(&dir, &["com.app.a"]);
        state.update_foreground(set_of(&["com.app.a"]));
        state.begin_unlock("com.app.a");
        state.finish_unlock("com.app.a", UnlockOutcome::Unlocked);
        assert_eq!(state.on_alarm_fired("com.app.a"), AlarmOutcome::StillForeground);
        assert!(!state.require_unlock("com.app.a"));
        assert_eq!(state.package_state("com.app.a", false), PackageLockState::ForegroundUnlocked);
    }

    #[test]
    fn alarm_never_unlocks_a_pending_package() {
        let dir = TempDir::new().unwrap();
        let mut state = state_with(&dir, &["com.app.a"]);
        state.update_foreground(set_of(&["com.app.a"]));
        state.begin_unlock("com.app.a");
        assert_eq!(state.on_alarm_fired("com.app.a"), AlarmOutcome::StillForeground);
        assert!(!state.is_unlocked("com.app.a"));
    }

    #[test]
    fn locked_foreground_packages_after_lock_all() {
        let dir = TempDir::new().unwrap();
        let mut state = state_with(&dir, &["com.app.a", "com.app.b"]);
        state.update_foreground(set_of(&["com.app.a", "com.app.c"]));
        state.begin_unlock("com.app.a");
        state.finish_unlock("com.app.a", UnlockOutcome::Unlocked);
        assert!(state.locked_foreground_packages().is_empty());
        assert_eq!(state.lock_all(), 1);
        assert_eq!(state.locked_foreground_packages(), vec!["com.app.a".to_string()]);
        assert_eq!(state.package_state("com.app.a", false), PackageLockState::ForegroundLocked);
    }
}

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

//! # App Lock Manager Service
//!
//! The public API of the app lock and the state machine behind it.
//!
//! Binder-facing operations take a [`Caller`] and check it against
//! [`MANAGE_APP_LOCK`] where required. Operations meant for other system
//! services (`require_unlock`, `unlock`, ...) trust their caller. Platform
//! feeds arrive through the `on_*` handlers, normally driven by the event loop
//! in [`crate::events`].

use crate::alarm::{AlarmClock, AlarmId, AlarmSerials, TokioAlarmClock};
use crate::config::AppLockConfig;
use crate::error::{AppLockError, Result};
use crate::events::AppLockEventSender;
use crate::platform::{Caller, Platform};
use crate::session::SessionContext;
use crate::settings::ServiceConfig;
use crate::state::{AlarmOutcome, BeginUnlock, FinishUnlock, PackageLockState, UserStateHandle};
use crate::unlocker::{BiometricPrompt, BiometricUnlocker, UnlockOutcome};
use crate::{UserId, MANAGE_APP_LOCK, USER_NULL, USER_SYSTEM};
use anyhow::Context;
use log::{debug, error, info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

struct ServiceInner {
    config: ServiceConfig,
    platform: Platform,
    unlocker: BiometricUnlocker,
    alarm_clock: Arc<dyn AlarmClock>,
    alarm_serials: Arc<AlarmSerials>,
    runtime: Handle,
    session: RwLock<SessionContext>,
    users: Mutex<HashMap<UserId, Arc<UserStateHandle>>>,
}

/// Service to manage per app lock.
///
/// Cheap to clone, all clones share the same state.
#[derive(Clone)]
pub struct AppLockManagerService {
    inner: Arc<ServiceInner>,
}

impl AppLockManagerService {
    /// Creates the service on the current tokio runtime. Unlock prompts run
    /// as tasks on that runtime.
    pub fn new(
        config: ServiceConfig,
        platform: Platform,
        prompt: Arc<dyn BiometricPrompt>,
        alarm_clock: Arc<dyn AlarmClock>,
    ) -> anyhow::Result<Self> {
        let runtime =
            Handle::try_current().context("AppLockManagerService needs a tokio runtime")?;
        let unlocker = BiometricUnlocker::new(prompt, config.default_biometrics_allowed);
        Ok(Self {
            inner: Arc::new(ServiceInner {
                config,
                platform,
                unlocker,
                alarm_clock,
                alarm_serials: Arc::default(),
                runtime,
                session: RwLock::new(SessionContext::new(USER_SYSTEM)),
                users: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// Creates the service with tokio backed alarms and starts its event loop.
    pub fn start(
        config: ServiceConfig,
        platform: Platform,
        prompt: Arc<dyn BiometricPrompt>,
    ) -> anyhow::Result<(Self, AppLockEventSender)> {
        let (tx, rx) = mpsc::channel(config.event_queue_size);
        let alarm_clock = Arc::new(TokioAlarmClock::new(tx.clone())?);
        let service = Self::new(config, platform, prompt, alarm_clock)?;
        let events = AppLockEventSender::spawn(service.clone(), tx, rx);
        Ok((service, events))
    }

    fn platform(&self) -> &Platform {
        &self.inner.platform
    }

    /// Snapshot of the device wide state.
    pub fn session(&self) -> SessionContext {
        self.inner.session.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn update_session<R>(&self, update: impl FnOnce(&mut SessionContext) -> R) -> R {
        let mut session = self.inner.session.write().unwrap_or_else(|e| e.into_inner());
        update(&mut session)
    }

    fn users(&self) -> MutexGuard<'_, HashMap<UserId, Arc<UserStateHandle>>> {
        self.inner.users.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn user_handle(&self, user_id: UserId) -> Option<Arc<UserStateHandle>> {
        self.users().get(&user_id).cloned()
    }

    /// Like `user_handle`, logging the miss on behalf of `tag`.
    fn handle_for(&self, user_id: UserId, tag: &str) -> Option<Arc<UserStateHandle>> {
        let handle = self.user_handle(user_id);
        if handle.is_none() {
            error!("{}: {}", tag, AppLockError::ConfigUnavailable(user_id));
        }
        handle
    }

    /// Whether `handle` still belongs to a running user.
    fn is_active(&self, handle: &Arc<UserStateHandle>) -> bool {
        self.users().get(&handle.user_id()).is_some_and(|current| Arc::ptr_eq(current, handle))
    }

    fn enforce_calling_permission(&self, caller: &Caller, message: &str) -> Result<()> {
        self.platform().calling_identity.enforce_permission(caller, MANAGE_APP_LOCK, message)
    }

    fn actual_user_id(&self, caller: &Caller, user_id: UserId, tag: &str) -> Result<UserId> {
        self.platform().calling_identity.handle_incoming_user(caller, user_id, tag)
    }

    fn label_for_package(&self, package_name: &str, user_id: UserId) -> String {
        match self.platform().package_manager.application_info(package_name, user_id) {
            Some(info) => info.label.unwrap_or_else(|| package_name.to_string()),
            None => {
                error!("Package {} not found", package_name);
                package_name.to_string()
            }
        }
    }

    /// Rejects packages that are not installed and system packages that are
    /// not in the allowed list.
    fn check_package(&self, package_name: &str, user_id: UserId) -> Result<()> {
        let Some(info) = self.platform().package_manager.application_info(package_name, user_id)
        else {
            return Err(AppLockError::InvalidArgument(format!(
                "Package {} is not installed",
                package_name
            )));
        };
        if info.is_system && !self.inner.config.allowed_system_apps.iter().any(|p| p == package_name)
        {
            return Err(AppLockError::InvalidArgument(format!(
                "System package {} is not whitelisted",
                package_name
            )));
        }
        Ok(())
    }

    /// Add an application to be protected.
    ///
    /// Fails with `PermissionDenied` without [`MANAGE_APP_LOCK`], and with
    /// `InvalidArgument` if the package is not installed or is a system app
    /// outside the allowed list.
    pub fn add_package(&self, caller: &Caller, package_name: &str, user_id: UserId) -> Result<()> {
        debug!("addPackage: packageName = {}, userId = {}", package_name, user_id);
        self.enforce_calling_permission(caller, "addPackage")?;
        self.check_package(package_name, user_id)?;
        let actual_user_id = self.actual_user_id(caller, user_id, "addPackage")?;
        let Some(handle) = self.handle_for(actual_user_id, "addPackage") else {
            return Ok(());
        };
        let mut state = handle.lock();
        if !state.config.add_package(package_name) {
            return Ok(());
        }
        // Collapse any active notifications or bubbles for the app.
        if !state.is_foreground(package_name) {
            self.platform().notification_manager.update_secure_notifications(
                package_name,
                true,
                true,
                actual_user_id,
            );
        }
        state.config.write();
        Ok(())
    }

    /// Remove an application from the protected packages list.
    pub fn remove_package(
        &self,
        caller: &Caller,
        package_name: &str,
        user_id: UserId,
    ) -> Result<()> {
        debug!("removePackage: packageName = {}, userId = {}", package_name, user_id);
        self.enforce_calling_permission(caller, "removePackage")?;
        let actual_user_id = self.actual_user_id(caller, user_id, "removePackage")?;
        let Some(handle) = self.handle_for(actual_user_id, "removePackage") else {
            return Ok(());
        };
        let detached = {
            let mut state = handle.lock();
            if !state.config.remove_package(package_name) {
                return Ok(());
            }
            state.forget_package(package_name);
            state.config.write();
            handle.alarms.detach(package_name)
        };
        handle.alarms.disarm(detached);
        // Let active notifications be expanded since the app is no longer protected.
        self.platform().notification_manager.update_secure_notifications(
            package_name,
            false,
            false,
            actual_user_id,
        );
        Ok(())
    }

    /// Get the current auto lock timeout in milliseconds, or -1 if the
    /// config of the user is not loaded.
    pub fn get_timeout(&self, caller: &Caller, user_id: UserId) -> Result<i64> {
        debug!("getTimeout: userId = {}", user_id);
        let actual_user_id = self.actual_user_id(caller, user_id, "getTimeout")?;
        Ok(self
            .handle_for(actual_user_id, "getTimeout")
            .map_or(-1, |handle| handle.lock().config.timeout_ms()))
    }

    /// Set the auto lock timeout in milliseconds.
    pub fn set_timeout(&self, caller: &Caller, timeout_ms: i64, user_id: UserId) -> Result<()> {
        debug!("setTimeout: timeout = {}, userId = {}", timeout_ms, user_id);
        let min_timeout_ms = self.inner.config.min_timeout_ms;
        if timeout_ms < min_timeout_ms {
            return Err(AppLockError::InvalidArgument(format!(
                "Timeout must be greater than or equal to {}",
                min_timeout_ms
            )));
        }
        self.enforce_calling_permission(caller, "setTimeout")?;
        let actual_user_id = self.actual_user_id(caller, user_id, "setTimeout")?;
        let Some(handle) = self.handle_for(actual_user_id, "setTimeout") else {
            return Ok(());
        };
        let mut state = handle.lock();
        if state.config.set_timeout_ms(timeout_ms) {
            state.config.write();
        }
        Ok(())
    }

    /// Get the protected packages, sorted.
    pub fn get_packages(&self, caller: &Caller, user_id: UserId) -> Result<Vec<String>> {
        debug!("getPackages: userId = {}", user_id);
        self.enforce_calling_permission(caller, "getPackages")?;
        let actual_user_id = self.actual_user_id(caller, user_id, "getPackages")?;
        let Some(handle) = self.handle_for(actual_user_id, "getPackages") else {
            return Ok(Vec::new());
        };
        let mut packages: Vec<String> = handle.lock().config.packages().iter().cloned().collect();
        packages.sort();
        Ok(packages)
    }

    /// Set whether notification content should be hidden for a package.
    pub fn set_secure_notification(
        &self,
        caller: &Caller,
        package_name: &str,
        secure: bool,
        user_id: UserId,
    ) -> Result<()> {
        debug!("setSecureNotification: packageName = {}, userId = {}", package_name, user_id);
        self.enforce_calling_permission(caller, "setSecureNotification")?;
        let actual_user_id = self.actual_user_id(caller, user_id, "setSecureNotification")?;
        let Some(handle) = self.handle_for(actual_user_id, "setSecureNotification") else {
            return Ok(());
        };
        let mut state = handle.lock();
        if !state.config.set_secure_notification(package_name, secure) {
            return Ok(());
        }
        let is_locked = state.is_locked_now(package_name);
        self.platform().notification_manager.update_secure_notifications(
            package_name,
            secure && is_locked,
            is_locked,
            actual_user_id,
        );
        state.config.write();
        Ok(())
    }

    /// Get the packages whose notification content is hidden, sorted.
    pub fn get_packages_with_secure_notifications(
        &self,
        caller: &Caller,
        user_id: UserId,
    ) -> Result<Vec<String>> {
        debug!("getPackagesWithSecureNotifications: userId = {}", user_id);
        self.enforce_calling_permission(caller, "getPackagesWithSecureNotifications")?;
        let actual_user_id =
            self.actual_user_id(caller, user_id, "getPackagesWithSecureNotifications")?;
        Ok(self
            .handle_for(actual_user_id, "getPackagesWithSecureNotifications")
            .map(|handle| handle.lock().config.packages_with_secure_notifications())
            .unwrap_or_default())
    }

    /// Set whether to allow unlocking with biometrics.
    pub fn set_biometrics_allowed(
        &self,
        caller: &Caller,
        biometrics_allowed: bool,
        user_id: UserId,
    ) -> Result<()> {
        debug!(
            "setBiometricsAllowed: biometricsAllowed = {}, userId = {}",
            biometrics_allowed, user_id
        );
        self.enforce_calling_permission(caller, "setBiometricsAllowed")?;
        let actual_user_id = self.actual_user_id(caller, user_id, "setBiometricsAllowed")?;
        let Some(handle) = self.handle_for(actual_user_id, "setBiometricsAllowed") else {
            return Ok(());
        };
        let mut state = handle.lock();
        if !state.config.set_biometrics_allowed(biometrics_allowed) {
            return Ok(());
        }
        if actual_user_id == self.session().current_user_id {
            self.inner.unlocker.set_biometrics_allowed(biometrics_allowed);
        }
        state.config.write();
        Ok(())
    }

    /// Check whether biometrics is allowed for unlocking.
    pub fn is_biometrics_allowed(&self, caller: &Caller, user_id: UserId) -> Result<bool> {
        debug!("isBiometricsAllowed: userId = {}", user_id);
        let actual_user_id = self.actual_user_id(caller, user_id, "isBiometricsAllowed")?;
        Ok(self
            .handle_for(actual_user_id, "isBiometricsAllowed")
            .map_or(self.inner.config.default_biometrics_allowed, |handle| {
                handle.lock().config.biometrics_allowed()
            }))
    }

    /// Check whether user is valid and device is secure.
    fn check_user_and_device_status(&self, user_id: UserId) -> bool {
        if user_id < 0 {
            debug!("Ignoring requireUnlock call for special user {}", user_id);
            return false;
        }
        if !self.session().is_device_secure {
            debug!("Device is not secure, app does not require unlock");
            return false;
        }
        if self.platform().user_manager.is_user_managed(user_id) {
            debug!("User id {} belongs to a work profile, ignoring requireUnlock", user_id);
            return false;
        }
        true
    }

    /// Whether the user has to unlock this application in order to open it.
    pub fn require_unlock(&self, package_name: &str, user_id: UserId) -> bool {
        self.require_unlock_internal(package_name, user_id, false)
    }

    fn require_unlock_internal(
        &self,
        package_name: &str,
        user_id: UserId,
        ignore_lock_state: bool,
    ) -> bool {
        if !self.check_user_and_device_status(user_id) {
            return false;
        }
        // If device is locked then there is no point in proceeding.
        if !ignore_lock_state && self.session().device_locked {
            debug!("Device is locked, app does not require unlock");
            return false;
        }
        let Some(handle) = self.handle_for(user_id, "requireUnlock") else {
            return false;
        };
        let require_unlock = handle.lock().require_unlock(package_name);
        debug!("requireUnlock: packageName = {}, requireUnlock = {}", package_name, require_unlock);
        require_unlock
    }

    /// Asks the user to unlock the application.
    ///
    /// Resolves to `None` if no prompt was shown: the package is not
    /// protected, another prompt is in flight, nothing can authenticate, or
    /// the package stopped being protected while the prompt was up. An
    /// application that is already unlocked resolves to
    /// `Some(UnlockOutcome::Unlocked)` right away.
    pub async fn unlock(&self, package_name: &str, user_id: UserId) -> Option<UnlockOutcome> {
        if !self.check_user_and_device_status(user_id) {
            return None;
        }
        debug!("unlock: packageName = {}", package_name);
        let handle = self.handle_for(user_id, "unlock")?;
        let begin = self.start_unlock(&handle, package_name);
        match begin {
            BeginUnlock::Started => {}
            BeginUnlock::AlreadyUnlocked => return Some(UnlockOutcome::Unlocked),
            BeginUnlock::NotProtected => {
                warn!("Unlock requested for package {} that is not in list", package_name);
                return None;
            }
            _ => return None,
        }
        match self.complete_unlock(&handle, package_name).await {
            FinishUnlock::Granted => Some(UnlockOutcome::Unlocked),
            FinishUnlock::Denied => Some(UnlockOutcome::Cancelled),
            FinishUnlock::Discarded => None,
        }
    }

    /// Marks the package pending unlock if a prompt can be shown for it.
    fn start_unlock(&self, handle: &UserStateHandle, package_name: &str) -> BeginUnlock {
        let begin = handle.lock().begin_unlock(package_name);
        if begin != BeginUnlock::Started {
            debug!("Not prompting for {}: {:?}", package_name, begin);
            return begin;
        }
        if !self.inner.unlocker.can_unlock() {
            error!("Application cannot be unlocked with biometrics or device credentials");
            handle.lock().abort_unlock(package_name);
            return BeginUnlock::Unavailable;
        }
        begin
    }

    /// Shows the prompt for a package marked by `start_unlock` and applies
    /// its outcome. No lock is held while the prompt is up.
    async fn complete_unlock(
        &self,
        handle: &Arc<UserStateHandle>,
        package_name: &str,
    ) -> FinishUnlock {
        let user_id = handle.user_id();
        let label = self.label_for_package(package_name, user_id);
        info!("{} is locked out, asking user to unlock", package_name);
        let outcome = self.inner.unlocker.unlock(&label).await;
        if !self.is_active(handle) {
            info!("User {} stopped, dropping unlock result for {}", user_id, package_name);
            return FinishUnlock::Discarded;
        }
        let finish = handle.lock().finish_unlock(package_name, outcome);
        match finish {
            FinishUnlock::Granted => {
                debug!("Unlock successful");
                self.platform().notification_manager.update_secure_notifications(
                    package_name,
                    false,
                    false,
                    user_id,
                );
            }
            FinishUnlock::Denied => debug!("Unlock cancelled"),
            FinishUnlock::Discarded => {
                debug!("{} is no longer protected, ignoring unlock result", package_name)
            }
        }
        finish
    }

    /// Prompts for `package_name` if it is locked, sending the user home if
    /// the prompt is cancelled.
    fn check_and_unlock(&self, handle: &Arc<UserStateHandle>, package_name: &str) {
        let session = self.session();
        if !session.is_device_secure || session.device_locked {
            return;
        }
        if self.start_unlock(handle, package_name) != BeginUnlock::Started {
            return;
        }
        let this = self.clone();
        let handle = Arc::clone(handle);
        let package_name = package_name.to_string();
        self.inner.runtime.spawn(async move {
            if this.complete_unlock(&handle, &package_name).await == FinishUnlock::Denied {
                // Send user to home on cancel.
                this.platform()
                    .activity_task_manager
                    .start_home_activity(handle.user_id(), "unlockInternal#onCancel");
            }
            this.recheck_foreground(&handle, &package_name);
        });
    }

    /// Prompts for locked packages that stayed visible while another prompt
    /// was up.
    fn recheck_foreground(&self, handle: &Arc<UserStateHandle>, handled_package: &str) {
        if !self.is_active(handle) {
            return;
        }
        let packages = handle.lock().locked_foreground_packages();
        for package_name in packages.iter().filter(|pkg| *pkg != handled_package) {
            self.check_and_unlock(handle, package_name);
        }
    }

    /// Report that the credential of the user has changed.
    pub fn report_password_changed(&self, user_id: UserId) {
        debug!("reportPasswordChanged: userId = {}", user_id);
        if user_id != self.session().current_user_id {
            debug!("Ignoring password change event for user {}", user_id);
            return;
        }
        let is_device_secure = self.platform().keyguard_manager.is_device_secure(user_id);
        self.update_session(|session| session.is_device_secure = is_device_secure);
        debug!("isDeviceSecure = {}", is_device_secure);
    }

    /// Whether the notification content of a package has to be hidden.
    ///
    /// Reflects the true lock status even while the keyguard is showing.
    pub fn is_notification_secured(&self, package_name: &str, user_id: UserId) -> bool {
        if !self.check_user_and_device_status(user_id) {
            return false;
        }
        debug!("isNotificationSecured: packageName = {}, userId = {}", package_name, user_id);
        if !self.require_unlock_internal(package_name, user_id, true) {
            return false;
        }
        let Some(handle) = self.handle_for(user_id, "isNotificationSecured") else {
            return false;
        };
        let secure = handle.lock().config.is_notification_secure(package_name);
        debug!("Secure = {}", secure);
        secure
    }

    /// Report that the keyguard was shown or dismissed for a user.
    pub fn notify_device_locked(&self, locked: bool, user_id: UserId) {
        debug!("Device locked = {} for user {}", locked, user_id);
        if !self.update_session(|session| session.update_device_locked(locked, user_id)) {
            return;
        }
        let Some(handle) = self.handle_for(user_id, "notifyDeviceLocked") else {
            return;
        };
        if locked {
            // Relock and drop the alarms in one step, the clock is told after.
            let detached = {
                let mut state = handle.lock();
                let relocked = state.lock_all();
                let detached = handle.alarms.detach_all();
                debug!("Locking all packages: {} unlocked, {} alarms", relocked, detached.len());
                detached
            };
            handle.alarms.disarm(detached);
            return;
        }
        // A package that was visible when the device locked is still shown
        // after unlocking, so leave it before the user can see it.
        let locked_foreground = handle.lock().locked_foreground_packages();
        if locked_foreground.is_empty() {
            return;
        }
        debug!("Locking foreground packages {:?}", locked_foreground);
        self.platform()
            .activity_task_manager
            .start_home_activity(user_id, "Locked package in foreground");
    }

    /// Handles a change of the packages visible to the current user.
    pub fn on_foreground_changed(&self, top_packages: HashSet<String>) {
        debug!("onTaskStackChanged: currentTopPackages = {:?}", top_packages);
        // An empty set means the tracker is in between states.
        if top_packages.is_empty() {
            return;
        }
        let user_id = self.session().current_user_id;
        let Some(handle) = self.handle_for(user_id, "onTaskStackChanged") else {
            return;
        };
        let mut visible_packages: Vec<String> = top_packages.iter().cloned().collect();
        visible_packages.sort();
        // Visible packages never have a live alarm, so the alarms change
        // together with the foreground set.
        let detached: Vec<AlarmId> = {
            let mut state = handle.lock();
            let packages_to_lock = state.update_foreground(top_packages);
            let timeout_ms = state.config.timeout_ms();
            let timeout = Duration::from_millis(u64::try_from(timeout_ms).unwrap_or_default());
            for package_name in &packages_to_lock {
                if let Err(e) = handle.alarms.schedule(package_name, timeout) {
                    error!("{:#}", e);
                }
            }
            visible_packages.iter().filter_map(|pkg| handle.alarms.detach(pkg)).collect()
        };
        handle.alarms.disarm(detached);
        for package_name in &visible_packages {
            self.check_and_unlock(&handle, package_name);
        }
    }

    /// Handles a fired timeout alarm.
    pub fn on_alarm_fired(&self, alarm: AlarmId) {
        debug!("Lock alarm received: {:?}", alarm);
        let Some(handle) = self.user_handle(alarm.user_id) else {
            debug!("Alarm {:?} belongs to a stopped user", alarm);
            return;
        };
        let Some(package_name) = handle.alarms.take_fired(alarm) else {
            debug!("Ignoring stale alarm {:?}", alarm);
            return;
        };
        debug!("{} timed out", package_name);
        let outcome = handle.lock().on_alarm_fired(&package_name);
        match outcome {
            AlarmOutcome::StillForeground => {
                debug!("{} is currently in foreground, skipping lock", package_name);
            }
            AlarmOutcome::Relocked { secure_notification } => {
                self.platform().notification_manager.update_secure_notifications(
                    &package_name,
                    secure_notification,
                    true,
                    alarm.user_id,
                );
            }
            AlarmOutcome::NotProtected => {
                debug!("{} is no longer protected", package_name);
            }
        }
    }

    /// Handles the uninstall of a package.
    pub fn on_package_removed(&self, package_name: &str, user_id: UserId) {
        if user_id != self.session().current_user_id {
            debug!("Ignoring package removal broadcast from user {}", user_id);
            return;
        }
        let Some(handle) = self.handle_for(user_id, "onPackageRemoved") else {
            return;
        };
        let detached = {
            let mut state = handle.lock();
            if !state.config.contains(package_name) {
                debug!("Package {} not in the list, ignoring", package_name);
                return;
            }
            debug!("Package {} uninstalled, cleaning up", package_name);
            state.forget_package(package_name);
            state.config.remove_package(package_name);
            state.config.write();
            handle.alarms.detach(package_name)
        };
        handle.alarms.disarm(detached);
    }

    /// Loads the config of a starting user.
    pub fn on_user_starting(&self, user_id: UserId) {
        info!("onUserStarting: userId = {}", user_id);
        let is_device_secure = self.platform().keyguard_manager.is_device_secure(user_id);
        self.update_session(|session| session.is_device_secure = is_device_secure);
        debug!("isDeviceSecure = {}", is_device_secure);

        if self.user_handle(user_id).is_some() {
            return;
        }
        let service_config = &self.inner.config;
        let mut config = AppLockConfig::with_defaults(
            &service_config.user_data_dir(user_id),
            service_config.default_timeout_ms,
            service_config.default_biometrics_allowed,
        );
        config.read();
        if user_id == self.session().current_user_id {
            self.inner.unlocker.set_biometrics_allowed(config.biometrics_allowed());
        }
        self.verify_packages(&mut config, user_id);
        let handle = Arc::new(UserStateHandle::new(
            user_id,
            config,
            Arc::clone(&self.inner.alarm_clock),
            Arc::clone(&self.inner.alarm_serials),
        ));
        // A concurrent start of the same user may have won, keep its state.
        self.users().entry(user_id).or_insert(handle);
    }

    /// Drops packages that were uninstalled while the service was not watching.
    fn verify_packages(&self, config: &mut AppLockConfig, user_id: UserId) {
        if config.packages().is_empty() {
            return;
        }
        let installed: HashSet<String> =
            self.platform().package_manager.installed_packages(user_id).into_iter().collect();
        debug!("Current locked packages = {:?}", config.packages());
        if config.retain_packages(|pkg| installed.contains(pkg)) {
            debug!("Filtered packages = {:?}", config.packages());
            config.write();
        }
    }

    /// Flushes and drops the state of a stopping user.
    pub fn on_user_stopping(&self, user_id: UserId) {
        info!("onUserStopping: userId = {}", user_id);
        let Some(handle) = self.users().remove(&user_id) else {
            return;
        };
        let detached = {
            let mut state = handle.lock();
            state.reset_runtime();
            state.config.write();
            handle.alarms.detach_all()
        };
        handle.alarms.disarm(detached);
    }

    /// Stops the outgoing user before the incoming one is started.
    pub fn on_user_switching(&self, old_user_id: UserId, new_user_id: UserId) {
        info!("onUserSwitching: oldUserId = {}, newUserId = {}", old_user_id, new_user_id);
        if old_user_id != USER_NULL {
            self.on_user_stopping(old_user_id);
        }
        self.update_session(|session| session.current_user_id = new_user_id);
        self.on_user_starting(new_user_id);
    }

    /// Derived lock state of a package, `None` if the user is not running.
    pub fn package_state(&self, package_name: &str, user_id: UserId) -> Option<PackageLockState> {
        self.user_handle(user_id).map(|handle| handle.package_state(package_name))
    }

    /// Packages with an armed timeout alarm, sorted.
    pub fn scheduled_alarms(&self, user_id: UserId) -> Vec<String> {
        self.user_handle(user_id)
            .map(|handle| handle.alarms.scheduled_packages())
            .unwrap_or_default()
    }
}

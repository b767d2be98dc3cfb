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

//! # Events
//!
//! Platform feeds reach the service as [`AppLockEvent`]s. They are queued on
//! a bounded channel and handled one at a time by a background task, so
//! events of one source are processed in the order they were posted.

use crate::alarm::AlarmId;
use crate::service::AppLockManagerService;
use crate::UserId;
use log::{error, info};
use std::collections::HashSet;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Event posted to the app lock event loop.
#[derive(Debug, Clone)]
pub enum AppLockEvent {
    /// The set of visible packages of the current user changed.
    ForegroundChanged(HashSet<String>),
    /// A timeout alarm went off.
    AlarmFired(AlarmId),
    /// A package was uninstalled.
    PackageRemoved { package_name: String, user_id: UserId },
    /// The keyguard was shown or dismissed.
    DeviceLockChanged { locked: bool, user_id: UserId },
    Shutdown,
}

/// Runs the event loop.
struct AppLockEventTask {
    service: AppLockManagerService,
    event_receiver: mpsc::Receiver<AppLockEvent>,
}

impl AppLockEventTask {
    /// Handles a received event. Returns true if the task should keep running.
    fn handle_event(&self, event: AppLockEvent) -> bool {
        match event {
            AppLockEvent::ForegroundChanged(top_packages) => {
                self.service.on_foreground_changed(top_packages);
            }
            AppLockEvent::AlarmFired(alarm) => {
                self.service.on_alarm_fired(alarm);
            }
            AppLockEvent::PackageRemoved { package_name, user_id } => {
                self.service.on_package_removed(&package_name, user_id);
            }
            AppLockEvent::DeviceLockChanged { locked, user_id } => {
                self.service.notify_device_locked(locked, user_id);
            }
            AppLockEvent::Shutdown => {
                return false;
            }
        }
        true
    }

    async fn run(mut self) {
        info!("AppLockEventTask started.");
        while let Some(event) = self.event_receiver.recv().await {
            if !self.handle_event(event) {
                info!("Shutdown event received.");
                return;
            }
        }
        info!("Event channel closed. Shutting down.");
    }
}

/// Posts platform events to the service and owns its event loop.
pub struct AppLockEventSender {
    event_sender: mpsc::Sender<AppLockEvent>,
    task_handle: Option<JoinHandle<()>>,
}

impl AppLockEventSender {
    /// Spawns the event loop of `service` on the current tokio runtime.
    ///
    /// `event_sender` must be the sending side of `event_receiver`.
    pub fn spawn(
        service: AppLockManagerService,
        event_sender: mpsc::Sender<AppLockEvent>,
        event_receiver: mpsc::Receiver<AppLockEvent>,
    ) -> Self {
        let task = AppLockEventTask { service, event_receiver };
        let task_handle = tokio::spawn(task.run());
        Self { event_sender, task_handle: Some(task_handle) }
    }

    /// Queues an event without waiting. Returns false if it was dropped.
    pub fn send(&self, event: AppLockEvent) -> bool {
        match self.event_sender.try_send(event) {
            Ok(_) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                error!("Event channel full, dropping {:?}", event);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                error!("Event channel closed. Event loop might have crashed.");
                false
            }
        }
    }

    pub fn foreground_changed<I, S>(&self, top_packages: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.send(AppLockEvent::ForegroundChanged(
            top_packages.into_iter().map(Into::into).collect(),
        ))
    }

    pub fn package_removed(&self, package_name: &str, user_id: UserId) -> bool {
        self.send(AppLockEvent::PackageRemoved { package_name: package_name.to_string(), user_id })
    }

    pub fn device_lock_changed(&self, locked: bool, user_id: UserId) -> bool {
        self.send(AppLockEvent::DeviceLockChanged { locked, user_id })
    }

    /// Stops the event loop after the queued events and waits for it.
    pub async fn shutdown(mut self) {
        if self.event_sender.send(AppLockEvent::Shutdown).await.is_err() {
            error!("Event loop already gone.");
        }
        if let Some(handle) = self.task_handle.take() {
            if let Err(e) = handle.await {
                error!("Event loop panicked: {}", e);
            }
        }
    }
}

impl Drop for AppLockEventSender {
    fn drop(&mut self) {
        if self.task_handle.is_none() {
            return;
        }
        info!("AppLockEventSender dropping. Shutting down AppLockEventTask.");
        if self.event_sender.try_send(AppLockEvent::Shutdown).is_err() {
            error!("Failed to send shutdown signal to AppLockEventTask or channel already closed.");
        }
    }
}

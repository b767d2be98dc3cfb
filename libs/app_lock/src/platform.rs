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

//! # Platform
//!
//! Interfaces to the system services the app lock depends on. The service
//! only ever talks to the platform through these traits.

use crate::error::Result;
use crate::UserId;
use std::sync::Arc;

/// Identity of a binder caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub pid: i32,
    pub uid: u32,
}

impl Caller {
    pub fn new(pid: i32, uid: u32) -> Self {
        Self { pid, uid }
    }
}

/// Permission enforcement and user resolution for binder callers.
pub trait CallingIdentity: Send + Sync {
    /// Fails with `PermissionDenied` unless `caller` holds `permission`.
    fn enforce_permission(&self, caller: &Caller, permission: &str, message: &str) -> Result<()>;

    /// Resolves the user `caller` acts on behalf of when it asks for `user_id`.
    fn handle_incoming_user(&self, caller: &Caller, user_id: UserId, tag: &str) -> Result<UserId>;
}

/// The parts of an installed application the lock cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationInfo {
    pub package_name: String,
    pub label: Option<String>,
    pub is_system: bool,
}

pub trait PackageManager: Send + Sync {
    /// Returns `None` if the package is not installed for the user.
    fn application_info(&self, package_name: &str, user_id: UserId) -> Option<ApplicationInfo>;

    fn installed_packages(&self, user_id: UserId) -> Vec<String>;
}

pub trait ActivityTaskManager: Send + Sync {
    fn start_home_activity(&self, user_id: UserId, reason: &str);
}

pub trait NotificationManager: Send + Sync {
    /// Hides or reveals the content of the package's notifications and
    /// suppresses bubbles from popping up.
    fn update_secure_notifications(
        &self,
        package_name: &str,
        is_content_secure: bool,
        is_bubble_up_suppressed: bool,
        user_id: UserId,
    );
}

pub trait KeyguardManager: Send + Sync {
    /// Whether the user has a PIN, pattern or password set.
    fn is_device_secure(&self, user_id: UserId) -> bool;
}

pub trait UserManager: Send + Sync {
    /// Whether the user is a managed (work) profile.
    fn is_user_managed(&self, user_id: UserId) -> bool;
}

/// Handles to every platform service used by `AppLockManagerService`.
#[derive(Clone)]
pub struct Platform {
    pub calling_identity: Arc<dyn CallingIdentity>,
    pub package_manager: Arc<dyn PackageManager>,
    pub activity_task_manager: Arc<dyn ActivityTaskManager>,
    pub notification_manager: Arc<dyn NotificationManager>,
    pub keyguard_manager: Arc<dyn KeyguardManager>,
    pub user_manager: Arc<dyn UserManager>,
}

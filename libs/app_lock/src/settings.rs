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

//! # Settings
//!
//! Static configuration of the app lock service, fixed at construction time.

use std::path::PathBuf;

/// Default auto lock timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: i64 = 10 * 1000;

/// Whether biometrics may be used for unlocking when the user never chose.
pub const DEFAULT_BIOMETRICS_ALLOWED: bool = true;

/// Smallest timeout accepted by `set_timeout`, in milliseconds.
pub const DEFAULT_MIN_TIMEOUT_MS: i64 = 5;

/// Event queue size.
pub const DEFAULT_EVENT_QUEUE_SIZE: usize = 32;

/// Configuration for `AppLockManagerService`.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Root under which each user's config directory lives.
    pub data_dir: PathBuf,
    /// Timeout used when a user has no stored value.
    pub default_timeout_ms: i64,
    /// Biometrics policy used when a user has no stored value.
    pub default_biometrics_allowed: bool,
    /// Lower bound enforced by `set_timeout`.
    pub min_timeout_ms: i64,
    /// System packages that may still be protected.
    pub allowed_system_apps: Vec<String>,
    /// Capacity of the platform event channel.
    pub event_queue_size: usize,
}

impl ServiceConfig {
    /// Creates a config storing user data below `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            default_biometrics_allowed: DEFAULT_BIOMETRICS_ALLOWED,
            min_timeout_ms: DEFAULT_MIN_TIMEOUT_MS,
            allowed_system_apps: Vec::new(),
            event_queue_size: DEFAULT_EVENT_QUEUE_SIZE,
        }
    }

    pub fn with_default_timeout_ms(mut self, timeout_ms: i64) -> Self {
        self.default_timeout_ms = timeout_ms;
        self
    }

    pub fn with_default_biometrics_allowed(mut self, allowed: bool) -> Self {
        self.default_biometrics_allowed = allowed;
        self
    }

    pub fn with_min_timeout_ms(mut self, min_timeout_ms: i64) -> Self {
        self.min_timeout_ms = min_timeout_ms;
        self
    }

    pub fn with_allowed_system_apps<I, S>(mut self, packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_system_apps = packages.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_event_queue_size(mut self, size: usize) -> Self {
        self.event_queue_size = size.max(1);
        self
    }

    /// Per-user data directory, the equivalent of `/data/system_de/<user>`.
    pub fn user_data_dir(&self, user_id: crate::UserId) -> PathBuf {
        self.data_dir.join(user_id.to_string())
    }
}

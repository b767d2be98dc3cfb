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

//! # Unlocker
//!
//! Handles unlocking an app with biometrics or the device credential.

use async_trait::async_trait;
use log::{debug, info};
use std::ops::BitOr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Set of authenticators a prompt may accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Authenticators(u32);

impl Authenticators {
    /// Class 3 biometrics.
    pub const BIOMETRIC_STRONG: Authenticators = Authenticators(0x000F);
    /// PIN, pattern or password.
    pub const DEVICE_CREDENTIAL: Authenticators = Authenticators(1 << 15);

    pub const fn contains(self, other: Authenticators) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Authenticators {
    type Output = Authenticators;

    fn bitor(self, rhs: Authenticators) -> Authenticators {
        Authenticators(self.0 | rhs.0)
    }
}

/// Why a prompt ended without authenticating the user.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PromptError {
    #[error("authentication canceled by user")]
    UserCanceled,
    #[error("authentication error {code}: {message}")]
    Failed { code: i32, message: String },
}

/// Platform biometric prompt.
#[async_trait]
pub trait BiometricPrompt: Send + Sync {
    /// Whether the device can authenticate with any of `authenticators`.
    fn can_authenticate(&self, authenticators: Authenticators) -> bool;

    /// Shows a prompt titled `title` and resolves once it is dismissed.
    async fn authenticate(
        &self,
        title: &str,
        authenticators: Authenticators,
    ) -> Result<(), PromptError>;
}

/// Result of one unlock attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockOutcome {
    Unlocked,
    Cancelled,
}

/// Wraps the [`BiometricPrompt`] with the app lock policy.
pub struct BiometricUnlocker {
    prompt: Arc<dyn BiometricPrompt>,
    biometrics_allowed: AtomicBool,
}

impl BiometricUnlocker {
    pub fn new(prompt: Arc<dyn BiometricPrompt>, biometrics_allowed: bool) -> Self {
        Self { prompt, biometrics_allowed: AtomicBool::new(biometrics_allowed) }
    }

    /// Whether biometrics or the device credential can be used for unlocking.
    pub fn can_unlock(&self) -> bool {
        self.prompt
            .can_authenticate(Authenticators::BIOMETRIC_STRONG | Authenticators::DEVICE_CREDENTIAL)
    }

    pub fn biometrics_allowed(&self) -> bool {
        self.biometrics_allowed.load(Ordering::SeqCst)
    }

    pub fn set_biometrics_allowed(&self, allowed: bool) {
        self.biometrics_allowed.store(allowed, Ordering::SeqCst);
    }

    /// Authenticators used by the next prompt.
    pub fn authenticators(&self) -> Authenticators {
        if self.biometrics_allowed() {
            Authenticators::BIOMETRIC_STRONG | Authenticators::DEVICE_CREDENTIAL
        } else {
            Authenticators::DEVICE_CREDENTIAL
        }
    }

    /// Asks the user to unlock the app labelled `label`.
    ///
    /// Only call this if [`Self::can_unlock`] returned true. Errors other
    /// than an explicit cancel are reported as `Cancelled` too, access is
    /// never granted without a successful authentication.
    pub async fn unlock(&self, label: &str) -> UnlockOutcome {
        let title = format!("Unlock {}", label);
        match self.prompt.authenticate(&title, self.authenticators()).await {
            Ok(()) => {
                debug!("onAuthenticationSucceeded");
                UnlockOutcome::Unlocked
            }
            Err(PromptError::UserCanceled) => {
                debug!("Authentication canceled by user");
                UnlockOutcome::Cancelled
            }
            Err(e) => {
                info!("onAuthenticationError, {}", e);
                UnlockOutcome::Cancelled
            }
        }
    }
}

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

//! # Session
//!
//! Device wide state shared by every user of the service.

use crate::UserId;

/// Holds the live device state that gates locking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    /// The user in the foreground.
    pub current_user_id: UserId,
    /// Whether the current user has a credential set.
    pub is_device_secure: bool,
    /// Whether the keyguard is showing.
    pub device_locked: bool,
}

impl SessionContext {
    /// Creates a session for `current_user_id`.
    ///
    /// The device is considered insecure until told otherwise, nothing is
    /// locked before a credential exists.
    pub fn new(current_user_id: UserId) -> Self {
        Self { current_user_id, is_device_secure: false, device_locked: false }
    }

    /// Applies a keyguard state change. Returns true if it has to be acted on.
    pub fn update_device_locked(&mut self, locked: bool, user_id: UserId) -> bool {
        if user_id != self.current_user_id || !self.is_device_secure || self.device_locked == locked
        {
            return false;
        }
        self.device_locked = locked;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_lock_needs_secure_current_user() {
        let mut session = SessionContext::new(0);
        assert!(!session.update_device_locked(true, 0));

        session.is_device_secure = true;
        assert!(!session.update_device_locked(true, 10));
        assert!(session.update_device_locked(true, 0));
        assert!(!session.update_device_locked(true, 0));
        assert!(session.device_locked);
        assert!(session.update_device_locked(false, 0));
    }
}

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

//! # App Lock
//!
//! This crate implements the per-application lock used by the system server.
//! A protected application must be unlocked with biometrics or the device
//! credential before it can be used, and is locked again after it has been in
//! the background for the configured timeout or when the device locks.
//!
//! The platform is reached only through the traits in [`platform`],
//! [`alarm::AlarmClock`] and [`unlocker::BiometricPrompt`]. Platform feeds are
//! posted to the service as [`events::AppLockEvent`]s.
//!
//! The primary entry point for this library is the `AppLockManagerService` struct.

/// Alarm scheduling for the re-lock timeout.
pub mod alarm;
/// Persisted per-user configuration.
pub mod config;
/// Error types shared across the crate.
pub mod error;
/// Event loop feeding platform events into the service.
pub mod events;
/// Interfaces to the platform services the lock depends on.
pub mod platform;
/// The public facade and the lock state machine.
pub mod service;
/// Device and session wide state.
pub mod session;
/// Static service configuration.
pub mod settings;
/// Per-user runtime lock state.
pub mod state;
/// Biometric and credential unlocking.
pub mod unlocker;

/// Identifier of an Android user.
pub type UserId = i32;

/// The system user, the foreground user at boot.
pub const USER_SYSTEM: UserId = 0;

/// Sentinel for "no user".
pub const USER_NULL: UserId = -10000;

/// Permission required for managing the app lock configuration.
pub const MANAGE_APP_LOCK: &str = "android.permission.MANAGE_APP_LOCK";

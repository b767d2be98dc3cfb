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

//! # Errors
//!
//! Errors surfaced by the app lock service. Only `PermissionDenied` and
//! `InvalidArgument` ever reach a caller of the facade; the others are logged
//! where they occur and turned into safe defaults.

use crate::UserId;
use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, AppLockError>;

#[derive(Error, Debug)]
pub enum AppLockError {
    /// The caller lacks the capability needed for the operation.
    #[error("Permission denial: {0}")]
    PermissionDenied(String),

    /// Bad timeout, non-allowed system package, or package not installed.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The configuration of the user has not been loaded yet.
    #[error("Config unavailable for user {0}")]
    ConfigUnavailable(UserId),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

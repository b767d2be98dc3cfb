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

//! # Config
//!
//! Container for the app lock configuration of a single user, along with the
//! logic of reading it from and writing it to disk as a JSON document.
//! All operations must be synchronized by the owner of the instance.

use crate::error::Result;
use crate::settings::{DEFAULT_BIOMETRICS_ALLOWED, DEFAULT_TIMEOUT_MS};
use log::{debug, error, info};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

const APP_LOCK_DIR_NAME: &str = "app_lock";
const APP_LOCK_CONFIG_FILE: &str = "app_lock_config.json";

const KEY_TIMEOUT: &str = "timeout";
const KEY_BIOMETRICS_ALLOWED: &str = "biometrics_allowed";
const KEY_PACKAGES: &str = "packages";
const KEY_SECURE_NOTIFICATION: &str = "secure_notification";

/// rwxrwx---
const APP_LOCK_DIR_MODE: u32 = 0o770;

/// On-disk shape of the configuration, as written.
///
/// Reading goes through [`serde_json::Value`] instead, so that one bad value
/// only loses that value.
#[derive(Debug, Serialize)]
struct ConfigDocument {
    timeout: i64,
    biometrics_allowed: bool,
    packages: BTreeMap<String, PackageEntry>,
}

#[derive(Debug, Serialize)]
struct PackageEntry {
    secure_notification: bool,
}

/// Reads an integer, accepting numbers and numeric strings.
fn opt_long(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64().or_else(|| number.as_f64().map(|v| v as i64)),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

/// Reads a boolean, accepting `true`/`false` strings in any case.
fn opt_boolean(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(flag) => Some(*flag),
        Value::String(text) if text.eq_ignore_ascii_case("true") => Some(true),
        Value::String(text) if text.eq_ignore_ascii_case("false") => Some(false),
        _ => None,
    }
}

/// Per-user app lock configuration.
#[derive(Debug)]
pub struct AppLockConfig {
    config_file: PathBuf,
    packages: HashSet<String>,
    notification_map: HashMap<String, bool>,
    timeout_ms: i64,
    biometrics_allowed: bool,
    default_timeout_ms: i64,
    default_biometrics_allowed: bool,
}

impl AppLockConfig {
    /// Creates an empty config stored below `data_dir` with the stock defaults.
    pub fn new(data_dir: &Path) -> Self {
        Self::with_defaults(data_dir, DEFAULT_TIMEOUT_MS, DEFAULT_BIOMETRICS_ALLOWED)
    }

    /// Creates an empty config stored below `data_dir`.
    ///
    /// The `app_lock` directory is created if missing and restricted to owner
    /// and group. Failing to do so is logged, the following `write` will
    /// report the same problem.
    pub fn with_defaults(
        data_dir: &Path,
        default_timeout_ms: i64,
        default_biometrics_allowed: bool,
    ) -> Self {
        let config_dir = data_dir.join(APP_LOCK_DIR_NAME);
        if let Err(e) = Self::prepare_dir(&config_dir) {
            error!("Failed to prepare config dir {:?}: {}", config_dir, e);
        }
        Self {
            config_file: config_dir.join(APP_LOCK_CONFIG_FILE),
            packages: HashSet::new(),
            notification_map: HashMap::new(),
            timeout_ms: default_timeout_ms,
            biometrics_allowed: default_biometrics_allowed,
            default_timeout_ms,
            default_biometrics_allowed,
        }
    }

    fn prepare_dir(dir: &Path) -> std::io::Result<()> {
        fs::create_dir_all(dir)?;
        fs::set_permissions(dir, fs::Permissions::from_mode(APP_LOCK_DIR_MODE))
    }

    /// Path of the backing JSON file.
    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    /// Protected packages.
    pub fn packages(&self) -> &HashSet<String> {
        &self.packages
    }

    pub fn contains(&self, package_name: &str) -> bool {
        self.packages.contains(package_name)
    }

    /// Notification secrecy flag of every protected package that has one.
    pub fn notification_map(&self) -> &HashMap<String, bool> {
        &self.notification_map
    }

    pub fn is_notification_secure(&self, package_name: &str) -> bool {
        self.notification_map.get(package_name).copied().unwrap_or(false)
    }

    /// Packages whose notification content must be hidden while locked, sorted.
    pub fn packages_with_secure_notifications(&self) -> Vec<String> {
        let mut packages: Vec<String> = self
            .notification_map
            .iter()
            .filter(|(_, secure)| **secure)
            .map(|(pkg, _)| pkg.clone())
            .collect();
        packages.sort();
        packages
    }

    pub fn timeout_ms(&self) -> i64 {
        self.timeout_ms
    }

    /// Returns true if the value changed.
    pub fn set_timeout_ms(&mut self, timeout_ms: i64) -> bool {
        if self.timeout_ms == timeout_ms {
            return false;
        }
        self.timeout_ms = timeout_ms;
        true
    }

    pub fn biometrics_allowed(&self) -> bool {
        self.biometrics_allowed
    }

    /// Returns true if the value changed.
    pub fn set_biometrics_allowed(&mut self, allowed: bool) -> bool {
        if self.biometrics_allowed == allowed {
            return false;
        }
        self.biometrics_allowed = allowed;
        true
    }

    /// Adds a package to the protected set. Returns false if it was already there.
    pub fn add_package(&mut self, package_name: &str) -> bool {
        self.packages.insert(package_name.to_string())
    }

    /// Removes a package and its notification flag. Returns false if it was
    /// not protected.
    pub fn remove_package(&mut self, package_name: &str) -> bool {
        self.notification_map.remove(package_name);
        self.packages.remove(package_name)
    }

    /// Marks notifications of a protected package as secure or not.
    ///
    /// Returns true if the config changed. Packages outside the protected set
    /// are rejected.
    pub fn set_secure_notification(&mut self, package_name: &str, secure: bool) -> bool {
        if !self.packages.contains(package_name) {
            error!(
                "Attempt to set secure notification field for package {} that is not in list",
                package_name
            );
            return false;
        }
        if self.notification_map.get(package_name) == Some(&secure) {
            return false;
        }
        self.notification_map.insert(package_name.to_string(), secure);
        true
    }

    /// Keeps only the packages for which `keep` returns true. Returns true if
    /// any package was dropped.
    pub fn retain_packages<F>(&mut self, mut keep: F) -> bool
    where
        F: FnMut(&str) -> bool,
    {
        let removed: Vec<String> =
            self.packages.iter().filter(|pkg| !keep(pkg.as_str())).cloned().collect();
        for pkg in &removed {
            self.remove_package(pkg);
        }
        !removed.is_empty()
    }

    fn reset(&mut self) {
        self.packages.clear();
        self.notification_map.clear();
        self.timeout_ms = self.default_timeout_ms;
        self.biometrics_allowed = self.default_biometrics_allowed;
    }

    /// Loads the config from disk, replacing the in-memory state.
    ///
    /// A missing file leaves the defaults in place. Read and parse failures
    /// are logged and also leave the defaults in place.
    pub fn read(&mut self) {
        self.reset();
        if !self.config_file.is_file() {
            info!("No configuration saved at {:?}", self.config_file);
            return;
        }
        if let Err(e) = self.try_read() {
            error!("Failed to read config file {:?}: {}", self.config_file, e);
            self.reset();
        }
        debug!("readConfig: packages = {:?}", self.packages);
        debug!("readConfig: packageNotificationMap = {:?}", self.notification_map);
        debug!("readConfig: timeout = {}", self.timeout_ms);
    }

    fn try_read(&mut self) -> Result<()> {
        let content = fs::read_to_string(&self.config_file)?;
        let root: Map<String, Value> = serde_json::from_str(&content)?;
        self.timeout_ms =
            root.get(KEY_TIMEOUT).and_then(opt_long).unwrap_or(self.default_timeout_ms);
        self.biometrics_allowed = root
            .get(KEY_BIOMETRICS_ALLOWED)
            .and_then(opt_boolean)
            .unwrap_or(self.default_biometrics_allowed);
        let Some(packages) = root.get(KEY_PACKAGES).and_then(Value::as_object) else {
            return Ok(());
        };
        for (pkg, entry) in packages {
            // A malformed entry still locks the package.
            let secure =
                entry.get(KEY_SECURE_NOTIFICATION).and_then(opt_boolean).unwrap_or(false);
            self.notification_map.insert(pkg.clone(), secure);
            self.packages.insert(pkg.clone());
        }
        Ok(())
    }

    /// Writes the config to disk. Failures are logged and the in-memory
    /// state stays as it is, so the next mutation retries the write.
    pub fn write(&self) {
        if let Err(e) = self.try_write() {
            error!("Failed to write config to {:?}: {}", self.config_file, e);
        }
    }

    fn try_write(&self) -> Result<()> {
        let packages = self
            .packages
            .iter()
            .map(|pkg| {
                (pkg.clone(), PackageEntry { secure_notification: self.is_notification_secure(pkg) })
            })
            .collect();
        let document = ConfigDocument {
            timeout: self.timeout_ms,
            biometrics_allowed: self.biometrics_allowed,
            packages,
        };
        let flattened = serde_json::to_string_pretty(&document)?;
        // Write to temp file first, then rename.
        let temp_file = self.config_file.with_extension("json.tmp");
        fs::write(&temp_file, flattened)?;
        fs::rename(&temp_file, &self.config_file)?;
        Ok(())
    }
}

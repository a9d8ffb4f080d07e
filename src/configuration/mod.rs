// SPDX-FileCopyrightText: 2023 Linutronix GmbH
//
// SPDX-License-Identifier: GPL-3.0-or-later
//
//! Provides the locations of the system interfaces the tool operates on
//!
//! Without a configuration file the usual Linux locations are used:
//!
//! ```
//! use skprioctl::configuration::Settings;
//! use std::path::Path;
//!
//! let settings = Settings::default();
//! assert_eq!(
//!     settings.skprio2up_path("eth0"),
//!     Path::new("/sys/class/net/eth0/qos/skprio2up")
//! );
//! ```
//!
//! All of them can be overridden by a YAML file:
//!
//! ```
//! use skprioctl::configuration::Settings;
//! use std::path::Path;
//!
//! let yaml = "tc_binary: /usr/local/sbin/tc\n";
//! let settings = Settings::read(yaml.as_bytes())?;
//! assert_eq!(settings.tc_binary, Path::new("/usr/local/sbin/tc"));
//! assert_eq!(settings.vlan_proc_path, Path::new("/proc/net/vlan"));
//! # Ok::<(), anyhow::Error>(())
//! ```
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::PathBuf;

const SYSFS_NET_PATH: &str = "/sys/class/net";
const VLAN_PROC_PATH: &str = "/proc/net/vlan";
const TC_BINARY: &str = "tc";

/// Paths and programs used to access the mapping of an interface
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Root of the per-interface sysfs directories
    pub sysfs_net_path: PathBuf,

    /// Directory containing one report file per VLAN interface
    pub vlan_proc_path: PathBuf,

    /// Traffic control program, looked up in `PATH` if not absolute
    pub tc_binary: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            sysfs_net_path: PathBuf::from(SYSFS_NET_PATH),
            vlan_proc_path: PathBuf::from(VLAN_PROC_PATH),
            tc_binary: PathBuf::from(TC_BINARY),
        }
    }
}

impl Settings {
    /// Read settings from YAML, unset fields keep their defaults
    ///
    /// # Errors
    ///
    /// Will return `Err` if the YAML could not be parsed
    /// or contains unknown fields.
    pub fn read<R: Read>(reader: R) -> Result<Self> {
        serde_yaml::from_reader(reader).context("Reading YAML configuration")
    }

    /// Path of the sysfs file exposing the skprio to UP mapping of `interface`
    #[must_use]
    pub fn skprio2up_path(&self, interface: &str) -> PathBuf {
        let mut path = self.sysfs_net_path.clone();
        path.push(interface);
        path.push("qos");
        path.push("skprio2up");
        path
    }
}

// SPDX-FileCopyrightText: 2023 Linutronix GmbH
//
// SPDX-License-Identifier: GPL-3.0-or-later
//
//! Collect the egress priority mappings of VLAN interfaces
//!
//! The kernel reports the egress map of each VLAN interface in
//! `/proc/net/vlan/<interface>.<vid>`, e.g.
//!
//! ```text
//! Device: eth0
//! INGRESS priority mappings: 0:0  1:0  2:0  3:0  4:0  5:0  6:0 7:0
//!  EGRESS priority mappings: 3:2 5:4
//! ```
//!
//! ```no_run
//! use skprioctl::vlan::VlanAnnotator;
//!
//! let annotator = VlanAnnotator::new("/proc/net/vlan".into());
//! for entry in annotator.scan("eth0") {
//!     println!("VLAN {}: skprio {} -> UP {}", entry.vlan_id, entry.skprio, entry.up);
//! }
//! ```

use anyhow::{Context, Result};
use log::{debug, warn};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

const EGRESS_MARKER: &str = "EGRESS";

static EGRESS_PAIR: OnceLock<Regex> = OnceLock::new();

fn egress_pair() -> Result<&'static Regex> {
    if let Some(pair) = EGRESS_PAIR.get() {
        return Ok(pair);
    }

    let pair = Regex::new(r"(\d+):(\d+)")?;
    Ok(EGRESS_PAIR.get_or_init(|| pair))
}

/// One skprio to UP pair of the egress map of a VLAN interface
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct VlanEgressEntry {
    /// VLAN identifier taken from the interface name
    pub vlan_id: u16,

    /// Socket priority
    pub skprio: u32,

    /// User priority written into the VLAN tag
    pub up: u8,
}

/// Scans a directory of VLAN reports for interfaces on top of a base interface
#[derive(Debug, Clone)]
pub struct VlanAnnotator {
    dir: PathBuf,
}

impl VlanAnnotator {
    /// Create new annotator reading the reports in `dir`
    #[must_use]
    pub const fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Collect the egress entries of all VLAN interfaces whose name starts with `interface`
    ///
    /// Missing or unreadable reports do not fail the scan, they just
    /// do not contribute any entries.
    #[must_use]
    pub fn scan(&self, interface: &str) -> Vec<VlanEgressEntry> {
        let mut reports = match self.reports_of(interface) {
            Ok(reports) => reports,
            Err(e) => {
                debug!("No VLAN reports found in {}: {e:#}", self.dir.display());
                return vec![];
            }
        };
        reports.sort();

        let mut entries = vec![];
        for report in &reports {
            let Some(vlan_id) = vlan_id_of(report) else {
                debug!("Skipping {}, no VLAN ID in name", report.display());
                continue;
            };

            match read_egress_map(report) {
                Ok(pairs) => entries.extend(pairs.into_iter().map(|(skprio, up)| {
                    VlanEgressEntry {
                        vlan_id,
                        skprio,
                        up,
                    }
                })),
                Err(e) => warn!("Ignoring VLAN report {}: {e:#}", report.display()),
            }
        }

        entries
    }

    fn reports_of(&self, interface: &str) -> Result<Vec<PathBuf>> {
        let mut reports = vec![];
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(interface))
            {
                reports.push(entry.path());
            }
        }
        Ok(reports)
    }
}

fn vlan_id_of(report: &Path) -> Option<u16> {
    let name = report.file_name()?.to_str()?;
    let (_, vid) = name.rsplit_once('.')?;
    vid.parse().ok()
}

fn read_egress_map(report: &Path) -> Result<Vec<(u32, u8)>> {
    let content = fs::read_to_string(report)
        .with_context(|| format!("Failed to read {}", report.display()))?;
    parse_egress_map(&content)
}

/// Extract the skprio to UP pairs following the `EGRESS` marker
///
/// ```
/// use skprioctl::vlan::parse_egress_map;
///
/// let report = " EGRESS priority mappings: 3:2 5:4\n";
/// assert_eq!(parse_egress_map(report)?, vec![(3, 2), (5, 4)]);
/// # Ok::<(), anyhow::Error>(())
/// ```
///
/// # Errors
///
/// Will return `Err` if a pair does not fit the value ranges.
pub fn parse_egress_map(content: &str) -> Result<Vec<(u32, u8)>> {
    let Some((_, mappings)) = content
        .lines()
        .find_map(|line| line.split_once(EGRESS_MARKER))
    else {
        return Ok(vec![]);
    };

    egress_pair()?
        .captures_iter(mappings)
        .map(|captures| -> Result<(u32, u8)> {
            let (_, [skprio, up]) = captures.extract();
            Ok((
                skprio
                    .parse()
                    .with_context(|| format!("Invalid skprio {skprio}"))?,
                up.parse()
                    .with_context(|| format!("Invalid user priority {up}"))?,
            ))
        })
        .collect()
}

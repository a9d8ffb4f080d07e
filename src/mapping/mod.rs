// SPDX-FileCopyrightText: 2023 Linutronix GmbH
//
// SPDX-License-Identifier: GPL-3.0-or-later
//
//! Socket priority to user priority mapping of an interface
//!
//! Holds the raw list (index is the skprio, value the UP) as provided by a
//! [`MappingBackend`] and the inverse view grouped by UP, including the
//! egress maps of VLAN interfaces on top of the interface.
//!
//! ```
//! use skprioctl::backend::SysfsBackend;
//! use skprioctl::mapping::PriorityMapping;
//! use skprioctl::vlan::VlanAnnotator;
//! # let file = tempfile::NamedTempFile::new()?;
//! # std::fs::write(file.path(), "0 0 1 1 2 2 3 3 4 4 5 5 6 6 7 7")?;
//! # let path = file.path().to_owned();
//!
//! # tokio_test::block_on(async {
//! let mut mapping = PriorityMapping::load(
//!     Box::new(SysfsBackend::new(path)),
//!     VlanAnnotator::new("/proc/net/vlan".into()),
//!     "eth0".to_owned(),
//! )
//! .await?;
//!
//! mapping.apply(&["7", "6"]).await?;
//! assert_eq!(mapping.lookup(7)[0].skprio, 0);
//! print!("{mapping}");
//! # Ok::<(), anyhow::Error>(())
//! # })?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use crate::backend::{MappingBackend, MappingError};
use crate::vlan::VlanAnnotator;
use anyhow::{Context, Result};
use log::debug;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::RangeInclusive;

/// User priorities shown in the report
pub const USER_PRIORITIES: RangeInclusive<u8> = 0..=7;

/// Maximum number of skprio values that can be mapped
pub const MAX_SKPRIOS: usize = 16;

/// Largest value accepted when setting a mapping.
/// One more than the largest UP, kept for compatibility with existing callers.
const MAX_ACCEPTED_USER_PRIORITY: i64 = 8;

/// IPv4 TOS values commonly resulting in the given skprio
const SKPRIO_TO_TOS: [(u32, u8); 4] = [(0, 0), (2, 8), (4, 24), (6, 16)];

/// TOS annotation for `skprio`, if there is one
#[must_use]
pub fn tos_of(skprio: u32) -> Option<u8> {
    SKPRIO_TO_TOS
        .iter()
        .find(|(prio, _)| *prio == skprio)
        .map(|(_, tos)| *tos)
}

/// A skprio listed under a user priority
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct SkprioEntry {
    /// Socket priority
    pub skprio: u32,

    /// VLAN whose egress map contributed this entry, `None` for the interface itself
    pub vlan_id: Option<u16>,
}

impl fmt::Display for SkprioEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.vlan_id, tos_of(self.skprio)) {
            (None, None) => write!(f, "{}", self.skprio),
            (None, Some(tos)) => write!(f, "{} (tos: {tos})", self.skprio),
            (Some(vlan_id), None) => write!(f, "{} (vlan {vlan_id})", self.skprio),
            (Some(vlan_id), Some(tos)) => {
                write!(f, "{} (vlan {vlan_id}, tos: {tos})", self.skprio)
            }
        }
    }
}

/// Mapping of an interface together with the backend it was loaded from
pub struct PriorityMapping {
    interface: String,
    backend: Box<dyn MappingBackend + Send + Sync>,
    annotator: VlanAnnotator,
    map: Vec<u8>,
    grouping: BTreeMap<u8, Vec<SkprioEntry>>,
}

impl fmt::Debug for PriorityMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PriorityMapping")
            .field("interface", &self.interface)
            .field("map", &self.map)
            .field("grouping", &self.grouping)
            .finish_non_exhaustive()
    }
}

impl PriorityMapping {
    /// Load the mapping of `interface` from `backend`
    ///
    /// # Errors
    ///
    /// Will return `Err` if the backend could not load the mapping.
    pub async fn load(
        backend: Box<dyn MappingBackend + Send + Sync>,
        annotator: VlanAnnotator,
        interface: String,
    ) -> Result<Self> {
        let map = backend
            .load()
            .await
            .with_context(|| format!("Loading the skprio mapping of {interface} failed"))?;

        let mut mapping = Self {
            interface,
            backend,
            annotator,
            map,
            grouping: BTreeMap::new(),
        };
        mapping.refresh();

        Ok(mapping)
    }

    /// Rebuild the grouping by UP from the raw list and the VLAN egress maps
    pub fn refresh(&mut self) {
        self.grouping.clear();

        for (skprio, up) in (0_u32..).zip(&self.map) {
            self.grouping.entry(*up).or_default().push(SkprioEntry {
                skprio,
                vlan_id: None,
            });
        }

        for entry in self.annotator.scan(&self.interface) {
            self.grouping.entry(entry.up).or_default().push(SkprioEntry {
                skprio: entry.skprio,
                vlan_id: Some(entry.vlan_id),
            });
        }

        debug!("Grouping of {}: {:?}", self.interface, self.grouping);
    }

    /// Entries currently mapped to `up`, empty if there are none
    #[must_use]
    pub fn lookup(&self, up: u8) -> &[SkprioEntry] {
        self.grouping.get(&up).map_or(&[], Vec::as_slice)
    }

    /// The raw list, index is the skprio
    #[must_use]
    pub fn skprio_map(&self) -> &[u8] {
        &self.map
    }

    /// Set new user priorities for skprio 0..N-1 and write them through the backend
    ///
    /// All values are validated before anything is changed.
    ///
    /// # Errors
    ///
    /// Will return `Err` if a value is not an accepted user priority,
    /// too many values are given or the backend failed to persist the mapping.
    pub async fn apply<S: AsRef<str> + Sync>(&mut self, values: &[S]) -> Result<()> {
        if values.len() > MAX_SKPRIOS {
            return Err(MappingError::TooManyValues {
                given: values.len(),
                max: MAX_SKPRIOS,
            }
            .into());
        }

        let ups = values
            .iter()
            .map(|value| parse_user_priority(value.as_ref()))
            .collect::<Result<Vec<u8>, MappingError>>()?;

        if self.map.len() < ups.len() {
            self.map.resize(ups.len(), 0);
        }

        for (slot, up) in self.map.iter_mut().zip(ups) {
            *slot = up;
        }

        self.refresh();

        self.backend
            .persist(&self.map)
            .await
            .with_context(|| format!("Setting the skprio mapping of {} failed", self.interface))
    }
}

fn parse_user_priority(value: &str) -> Result<u8, MappingError> {
    value
        .trim()
        .parse::<i64>()
        .ok()
        .filter(|up| (0..=MAX_ACCEPTED_USER_PRIORITY).contains(up))
        .and_then(|up| u8::try_from(up).ok())
        .ok_or_else(|| MappingError::BadUserPriority(value.to_owned()))
}

/// The report grouped by UP
impl fmt::Display for PriorityMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for up in USER_PRIORITIES {
            writeln!(f, "UP  {up}")?;
            for entry in self.lookup(up) {
                writeln!(f, "\tskprio: {entry}")?;
            }
        }
        Ok(())
    }
}

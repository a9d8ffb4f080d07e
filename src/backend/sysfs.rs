// SPDX-FileCopyrightText: 2023 Linutronix GmbH
//
// SPDX-License-Identifier: GPL-3.0-or-later

use crate::backend::MappingBackend;
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use std::fs;
use std::path::PathBuf;

/// Mapping stored in a sysfs file as whitespace separated UP values
#[derive(Debug)]
pub struct SysfsBackend {
    path: PathBuf,
}

impl SysfsBackend {
    /// Create new sysfs backend for the file at `path`
    #[must_use]
    pub const fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl MappingBackend for SysfsBackend {
    async fn load(&self) -> Result<Vec<u8>> {
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;

        content
            .split_whitespace()
            .map(|up| {
                up.parse::<u8>().with_context(|| {
                    format!("Invalid user priority {up} in {}", self.path.display())
                })
            })
            .collect()
    }

    async fn persist(&self, map: &[u8]) -> Result<()> {
        let content = map
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<String>>()
            .join(" ");

        debug!("Writing '{content}' to {}", self.path.display());

        fs::write(&self.path, content.trim_end())
            .with_context(|| format!("Failed to write {}", self.path.display()))
    }
}

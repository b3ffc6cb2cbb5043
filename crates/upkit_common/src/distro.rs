//! Distribution detection from os-release

use anyhow::{Context, Result};
use std::fmt;
use std::fs;

/// Pipeline variant selected by distribution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistroFamily {
    Generic,
    Debian,
    Fedora,
    Rhel,
}

impl DistroFamily {
    /// Exact match on a normalized os-release id
    pub fn from_id(id: &str) -> Option<Self> {
        match id.trim().to_ascii_lowercase().as_str() {
            "fedora" => Some(Self::Fedora),
            "debian" | "ubuntu" | "linuxmint" | "pop" | "zorin" => Some(Self::Debian),
            "rhel" | "rocky" | "almalinux" | "centos" => Some(Self::Rhel),
            _ => None,
        }
    }

    /// `ID` first, then each `ID_LIKE` entry, else Generic
    pub fn detect(info: &DistroInfo) -> Self {
        Self::from_id(&info.id)
            .or_else(|| info.id_like.iter().find_map(|id| Self::from_id(id)))
            .unwrap_or(Self::Generic)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generic => "generic",
            Self::Debian => "debian",
            Self::Fedora => "fedora",
            Self::Rhel => "rhel",
        }
    }
}

impl fmt::Display for DistroFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The os-release fields upkit cares about
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistroInfo {
    pub id: String,
    pub id_like: Vec<String>,
    pub pretty_name: Option<String>,
}

impl DistroInfo {
    /// Read /etc/os-release, falling back to /usr/lib/os-release
    pub fn load() -> Result<Self> {
        let os_release = fs::read_to_string("/etc/os-release")
            .or_else(|_| fs::read_to_string("/usr/lib/os-release"))
            .context("Failed to read os-release")?;
        Ok(Self::parse(&os_release))
    }

    pub fn parse(os_release: &str) -> Self {
        let mut info = Self::default();

        for line in os_release.lines() {
            let Some((key, value)) = line.trim().split_once('=') else {
                continue;
            };
            let value = value.trim().trim_matches('"').trim_matches('\'');
            match key {
                "ID" => info.id = value.to_ascii_lowercase(),
                "ID_LIKE" => {
                    info.id_like = value
                        .split_whitespace()
                        .map(str::to_ascii_lowercase)
                        .collect()
                }
                "PRETTY_NAME" => info.pretty_name = Some(value.to_string()),
                _ => {}
            }
        }

        info
    }

    pub fn family(&self) -> DistroFamily {
        DistroFamily::detect(self)
    }

    /// Human readable name for banners
    pub fn display_name(&self) -> &str {
        match &self.pretty_name {
            Some(name) => name.as_str(),
            None if !self.id.is_empty() => self.id.as_str(),
            None => "unknown",
        }
    }
}

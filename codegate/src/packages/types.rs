use serde::{Deserialize, Serialize};

/// Package ecosystems the extractor can attribute identifiers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ecosystem {
    Pypi,
    Npm,
    Crates,
    Go,
    Maven,
}

impl Ecosystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            Ecosystem::Pypi => "pypi",
            Ecosystem::Npm => "npm",
            Ecosystem::Crates => "crates",
            Ecosystem::Go => "go",
            Ecosystem::Maven => "maven",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pypi" => Some(Ecosystem::Pypi),
            "npm" => Some(Ecosystem::Npm),
            "crates" => Some(Ecosystem::Crates),
            "go" => Some(Ecosystem::Go),
            "maven" => Some(Ecosystem::Maven),
            _ => None,
        }
    }
}

impl std::fmt::Display for Ecosystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageStatus {
    Malicious,
    Deprecated,
    Archived,
    Ok,
}

impl PackageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageStatus::Malicious => "malicious",
            PackageStatus::Deprecated => "deprecated",
            PackageStatus::Archived => "archived",
            PackageStatus::Ok => "ok",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "malicious" => Some(PackageStatus::Malicious),
            "deprecated" => Some(PackageStatus::Deprecated),
            "archived" => Some(PackageStatus::Archived),
            "ok" => Some(PackageStatus::Ok),
            _ => None,
        }
    }

    pub fn is_flagged(&self) -> bool {
        !matches!(self, PackageStatus::Ok)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageRecord {
    pub ecosystem: Ecosystem,
    pub name: String,
    pub status: PackageStatus,
    pub advisory_url: Option<String>,
}

impl PackageRecord {
    pub fn new(ecosystem: Ecosystem, name: impl Into<String>, status: PackageStatus) -> Self {
        Self {
            ecosystem,
            name: name.into(),
            status,
            advisory_url: None,
        }
    }

    /// The insight report link surfaced to the user in alerts and the
    /// policy short-circuit reply.
    pub fn insight_url(&self) -> String {
        format!(
            "https://www.insight.stacklok.com/report/{}/{}?utm_source=codegate",
            self.ecosystem,
            urlencoding::encode(&self.name)
        )
    }
}

/// Where an identifier was found; free-text mentions drive the policy
/// short-circuit, imports and manifests only raise alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageLocation {
    CodeImport,
    Manifest,
    FreeText,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedPackage {
    pub ecosystem: Ecosystem,
    pub name: String,
    pub location: PackageLocation,
}

impl ExtractedPackage {
    pub fn new(
        ecosystem: Ecosystem,
        name: impl Into<String>,
        location: PackageLocation,
    ) -> Self {
        Self {
            ecosystem,
            name: name.into(),
            location,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insight_url_is_encoded_and_tagged() {
        let record = PackageRecord::new(Ecosystem::Pypi, "invokehttp", PackageStatus::Malicious);
        assert_eq!(
            record.insight_url(),
            "https://www.insight.stacklok.com/report/pypi/invokehttp?utm_source=codegate"
        );
        let scoped = PackageRecord::new(Ecosystem::Npm, "@scope/pkg", PackageStatus::Malicious);
        assert!(scoped.insight_url().contains("%40scope%2Fpkg"));
    }
}

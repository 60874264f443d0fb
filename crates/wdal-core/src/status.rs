//! Agent `/status` payload
//!
//! Only the fields the launcher acts on are modeled. Everything else the
//! agent reports is ignored during deserialization.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OsInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub sdk_version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub simulator_version: Option<String>,
}

/// Build provenance reported by a launcher-built agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildInfo {
    #[serde(default)]
    pub product_bundle_identifier: Option<String>,
    /// Upgrade timestamp baked in at build time. Older agents report a number.
    #[serde(default, deserialize_with = "de_string_or_number")]
    pub upgraded_at: Option<String>,
    #[serde(default)]
    pub time: Option<String>,
}

/// Snapshot of one `/status` answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub os: Option<OsInfo>,
    #[serde(default)]
    pub ios: Option<DeviceInfo>,
    #[serde(default)]
    pub build: Option<BuildInfo>,
}

impl StatusSnapshot {
    pub fn product_bundle_id(&self) -> Option<&str> {
        self.build
            .as_ref()
            .and_then(|b| b.product_bundle_identifier.as_deref())
    }

    pub fn upgraded_at(&self) -> Option<&str> {
        self.build.as_ref().and_then(|b| b.upgraded_at.as_deref())
    }

    pub fn device_ip(&self) -> Option<&str> {
        self.ios.as_ref().and_then(|i| i.ip.as_deref())
    }
}

fn de_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

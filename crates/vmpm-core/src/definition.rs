use std::collections::BTreeMap;

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Descriptor fields shared by every installable definition.
pub trait PluginDescriptor: DeserializeOwned {
    const KIND: DefinitionKind;

    fn alias(&self) -> &str;
    fn homepage(&self) -> &str;
    fn description(&self) -> &str;
    fn maintainers(&self) -> &[String];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DefinitionKind {
    Vm,
    Chain,
}

impl DefinitionKind {
    /// Directory inside a source repository holding definitions of this kind.
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Vm => "vms",
            Self::Chain => "chains",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Vm => "virtual machine",
            Self::Chain => "chain",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmDefinition {
    #[serde(default)]
    pub id: String,
    pub alias: String,
    #[serde(default)]
    pub homepage: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub maintainers: Vec<String>,
    #[serde(default)]
    pub install_script: String,
    #[serde(default)]
    pub binary_path: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub sha256: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainDefinition {
    /// Chain identifier per network.
    #[serde(default)]
    pub id: BTreeMap<String, String>,
    pub alias: String,
    #[serde(default)]
    pub homepage: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub maintainers: Vec<String>,
    /// Short aliases of the virtual machines this chain runs, resolved
    /// against the chain's own source.
    #[serde(default)]
    pub vms: Vec<String>,
}

impl ChainDefinition {
    pub fn id_for(&self, network: &str) -> Option<&str> {
        self.id.get(network).map(String::as_str)
    }
}

impl PluginDescriptor for VmDefinition {
    const KIND: DefinitionKind = DefinitionKind::Vm;

    fn alias(&self) -> &str {
        &self.alias
    }

    fn homepage(&self) -> &str {
        &self.homepage
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn maintainers(&self) -> &[String] {
        &self.maintainers
    }
}

impl PluginDescriptor for ChainDefinition {
    const KIND: DefinitionKind = DefinitionKind::Chain;

    fn alias(&self) -> &str {
        &self.alias
    }

    fn homepage(&self) -> &str {
        &self.homepage
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn maintainers(&self) -> &[String] {
        &self.maintainers
    }
}

/// A decoded definition together with the commit that last touched its file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Definition<T> {
    pub definition: T,
    pub commit: String,
}

impl<T: PluginDescriptor> Definition<T> {
    pub fn from_yaml_str(input: &str, commit: impl Into<String>) -> anyhow::Result<Self> {
        let definition: T = serde_yaml::from_str(input)
            .with_context(|| format!("failed to parse {} definition", T::KIND.as_str()))?;
        Ok(Self {
            definition,
            commit: commit.into(),
        })
    }
}

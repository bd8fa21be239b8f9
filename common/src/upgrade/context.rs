use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Error, Result};

use super::grouping::UpgradePack;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    #[default]
    Upgrade,
    Downgrade,
}

fn proper(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn cased(word: &str, proper_case: bool) -> String {
    if proper_case {
        proper(word)
    } else {
        word.to_string()
    }
}

impl Direction {
    pub fn is_upgrade(self) -> bool {
        self == Direction::Upgrade
    }

    pub fn is_downgrade(self) -> bool {
        self == Direction::Downgrade
    }

    /// "upgrade" / "Upgrade"
    pub fn text(self, proper_case: bool) -> String {
        match self {
            Direction::Upgrade => cased("upgrade", proper_case),
            Direction::Downgrade => cased("downgrade", proper_case),
        }
    }

    /// "upgraded" / "Upgraded"
    pub fn past(self, proper_case: bool) -> String {
        match self {
            Direction::Upgrade => cased("upgraded", proper_case),
            Direction::Downgrade => cased("downgraded", proper_case),
        }
    }

    /// "upgrades" / "Upgrades"
    pub fn plural(self, proper_case: bool) -> String {
        match self {
            Direction::Upgrade => cased("upgrades", proper_case),
            Direction::Downgrade => cased("downgrades", proper_case),
        }
    }

    /// "upgrading" / "Upgrading"
    pub fn verb(self, proper_case: bool) -> String {
        match self {
            Direction::Upgrade => cased("upgrading", proper_case),
            Direction::Downgrade => cased("downgrading", proper_case),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpgradeType {
    #[default]
    Rolling,
    NonRolling,
}

/* --------- Topología del cluster --------- */

/// Hosts donde corre un componente. El orden de `hosts` se respeta al armar
/// las tandas.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HostsType {
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub master: Option<String>,
    #[serde(default)]
    pub secondary: Option<String>,
}

impl HostsType {
    pub fn new(hosts: &[&str]) -> Self {
        Self {
            hosts: hosts.iter().map(|h| h.to_string()).collect(),
            master: None,
            secondary: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ServiceTopology {
    #[serde(default)]
    pub client_only: bool,
    #[serde(default)]
    pub components: BTreeMap<String, HostsType>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ClusterTopology {
    pub cluster_name: String,
    #[serde(default)]
    pub services: BTreeMap<String, ServiceTopology>,
}

impl ClusterTopology {
    pub fn hosts_for(&self, service: &str, component: &str) -> Option<&HostsType> {
        self.services.get(service)?.components.get(component)
    }

    pub fn is_installed(&self, service: &str) -> bool {
        self.services.contains_key(service)
    }

    pub fn is_client_only(&self, service: &str) -> bool {
        self.services.get(service).is_some_and(|s| s.client_only)
    }

    /// (servicio, componente) instalados en el host, en orden de servicio y
    /// después de componente.
    pub fn components_on_host(&self, host: &str) -> Vec<(String, String)> {
        self.services
            .iter()
            .flat_map(|(service, topology)| {
                topology
                    .components
                    .iter()
                    .filter(|(_, hosts)| hosts.hosts.iter().any(|h| h == host))
                    .map(move |(component, _)| (service.clone(), component.clone()))
            })
            .collect()
    }

    /// Todos los hosts del servicio, sin repetir.
    pub fn service_hosts(&self, service: &str) -> Vec<String> {
        let mut hosts: Vec<String> = Vec::new();
        if let Some(topology) = self.services.get(service) {
            for h in topology.components.values().flat_map(|c| c.hosts.iter()) {
                if !hosts.contains(h) {
                    hosts.push(h.clone());
                }
            }
        }
        hosts
    }

    pub fn has_host(&self, host: &str) -> bool {
        self.services
            .values()
            .flat_map(|s| s.components.values())
            .any(|c| c.hosts.iter().any(|h| h == host))
    }
}

/* --------- Contexto de una corrida --------- */

#[derive(Debug, Clone)]
pub struct UpgradeContext {
    pub direction: Direction,
    pub upgrade_type: UpgradeType,
    /// Versión destino.
    pub version: String,
    pub topology: ClusterTopology,
    /// Los grupos que lo soportan saltean stages fallidos.
    pub auto_skip_failures: bool,
}

impl UpgradeContext {
    pub fn new(pack: &UpgradePack, topology: ClusterTopology, direction: Direction) -> Result<Self> {
        let version = pack
            .target_version
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                Error::InvalidUpgradePack(format!("el pack {} no tiene target_version", pack.name))
            })?;

        Ok(Self {
            direction,
            upgrade_type: pack.upgrade_type,
            version: version.to_string(),
            topology,
            auto_skip_failures: pack.skip_failures,
        })
    }

    pub fn is_rolling(&self) -> bool {
        self.upgrade_type == UpgradeType::Rolling
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_text_helpers() {
        assert_eq!(Direction::Upgrade.text(false), "upgrade");
        assert_eq!(Direction::Downgrade.text(true), "Downgrade");
        assert_eq!(Direction::Upgrade.past(true), "Upgraded");
        assert_eq!(Direction::Downgrade.plural(false), "downgrades");
        assert_eq!(Direction::Upgrade.verb(true), "Upgrading");
        assert_eq!(Direction::default(), Direction::Upgrade);
    }

    #[test]
    fn topology_queries() {
        let mut topology = ClusterTopology {
            cluster_name: "c1".into(),
            services: BTreeMap::new(),
        };
        let mut hdfs = ServiceTopology::default();
        hdfs.components
            .insert("DATANODE".into(), HostsType::new(&["h1", "h2"]));
        hdfs.components
            .insert("NAMENODE".into(), HostsType::new(&["h1"]));
        topology.services.insert("HDFS".into(), hdfs);
        topology.services.insert(
            "PIG".into(),
            ServiceTopology {
                client_only: true,
                components: BTreeMap::new(),
            },
        );

        assert_eq!(topology.service_hosts("HDFS"), vec!["h1", "h2"]);
        assert_eq!(
            topology.components_on_host("h1"),
            vec![
                ("HDFS".to_string(), "DATANODE".to_string()),
                ("HDFS".to_string(), "NAMENODE".to_string())
            ]
        );
        assert!(topology.is_client_only("PIG"));
        assert!(!topology.is_client_only("HDFS"));
        assert!(topology.has_host("h2"));
        assert!(!topology.has_host("h9"));
        assert!(topology.hosts_for("HDFS", "JOURNALNODE").is_none());
    }
}

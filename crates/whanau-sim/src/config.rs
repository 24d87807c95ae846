//! Simulator configuration

use serde::{Deserialize, Serialize};
use whanau_dht::WhanauConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Shape of the simulated network
    pub network: NetworkConfig,

    /// Parameter overrides; anything left out is derived from the network size
    pub params: ParamsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Number of nodes
    pub nodes: usize,
    /// Records installed on each node
    pub keys_per_node: usize,
    /// Seed for node RNGs and record values
    pub seed: Option<u64>,
    /// Nodes that stop answering after records are installed
    pub failed_nodes: Vec<usize>,
    /// Setup passes run over the whole network
    pub setup_rounds: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            nodes: 10,
            keys_per_node: 5,
            seed: None,
            failed_nodes: vec![],
            setup_rounds: 2,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParamsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nlayers: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rf: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub w: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rd: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rs: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub t: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_retries: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_query_attempts: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_delegations: Option<usize>,
}

impl ParamsConfig {
    /// Overwrite the fields of `base` that are set here
    pub fn apply(&self, base: WhanauConfig) -> WhanauConfig {
        WhanauConfig {
            nlayers: self.nlayers.unwrap_or(base.nlayers),
            rf: self.rf.unwrap_or(base.rf),
            w: self.w.unwrap_or(base.w),
            rd: self.rd.unwrap_or(base.rd),
            rs: self.rs.unwrap_or(base.rs),
            t: self.t.unwrap_or(base.t),
            sample_retries: self.sample_retries.unwrap_or(base.sample_retries),
            max_query_attempts: self.max_query_attempts.unwrap_or(base.max_query_attempts),
            max_delegations: self.max_delegations.unwrap_or(base.max_delegations),
            seed: base.seed,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Node parameters: derived from the network size, then overridden
    pub fn whanau_config(&self) -> WhanauConfig {
        let derived = WhanauConfig::for_network(self.network.nodes, self.network.keys_per_node);
        let mut config = self.params.apply(derived);
        config.seed = self.network.seed;
        config
    }

    /// Reject networks the simulator cannot build
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.network.nodes < 2 {
            anyhow::bail!("need at least 2 nodes, got {}", self.network.nodes);
        }
        if self.network.setup_rounds == 0 {
            anyhow::bail!("setup_rounds must be at least 1");
        }
        if let Some(bad) = self
            .network
            .failed_nodes
            .iter()
            .find(|i| **i >= self.network.nodes)
        {
            anyhow::bail!("failed node {} is out of range (0..{})", bad, self.network.nodes);
        }
        self.whanau_config().validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sim.toml");
        std::fs::write(
            &path,
            r#"
[network]
nodes = 20
seed = 7
failed_nodes = [3]

[params]
rf = 3
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.network.nodes, 20);
        assert_eq!(config.network.keys_per_node, 5);
        assert_eq!(config.network.failed_nodes, vec![3]);

        let params = config.whanau_config();
        let derived = WhanauConfig::for_network(20, 5);
        assert_eq!(params.rf, 3);
        assert_eq!(params.rd, derived.rd);
        assert_eq!(params.seed, Some(7));
        config.validate().unwrap();
    }

    #[test]
    fn test_default_roundtrips_through_toml() {
        let text = toml::to_string_pretty(&Config::default()).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.network.nodes, 10);
        assert!(parsed.params.rf.is_none());
    }

    #[test]
    fn test_validate_rejects_bad_networks() {
        let mut config = Config::default();
        config.network.failed_nodes = vec![10];
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.network.nodes = 1;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.params.t = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(Config::load(&dir.path().join("absent.toml")).is_err());
    }
}

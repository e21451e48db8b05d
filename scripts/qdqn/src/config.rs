use std::{fs::File, path::Path};

use anyhow::{bail, ensure, Context};

// -----------------------------------------------------------------------------
// DqnConfig
// -----------------------------------------------------------------------------
/// Hyperparameters of a training run.
///
/// Missing fields in a config file fall back to [`DqnConfig::default`].
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DqnConfig {
    pub episodes: usize,
    /// Episodes are cut off after this many steps.
    pub max_steps: usize,
    pub hidden_size: usize,
    pub learning_rate: f64,
    /// Discount factor of the Bellman target.
    pub gamma: f64,
    /// Probability of a random action.
    pub epsilon: f64,
    pub batch_size: usize,
    pub buffer_size: usize,
    pub seed: u64,
}

impl Default for DqnConfig {
    fn default() -> Self {
        Self {
            episodes: 3,
            max_steps: 200,
            hidden_size: 20,
            learning_rate: 0.01,
            gamma: 0.99,
            epsilon: 0.1,
            batch_size: 16,
            buffer_size: 100,
            seed: 0,
        }
    }
}

impl DqnConfig {
    /// Load from a YAML (`.yaml`, `.yml`) or JSON (`.json`) file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
        let config: Self = match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml" | "yml") => serde_yaml::from_reader(file)?,
            Some("json") => serde_json::from_reader(file)?,
            _ => bail!("Unsupported config format: {:?}", path),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(0 < self.hidden_size, "hidden_size must be positive");
        ensure!(0 < self.batch_size, "batch_size must be positive");
        ensure!(
            self.batch_size <= self.buffer_size,
            "batch_size {} exceeds buffer_size {}",
            self.batch_size,
            self.buffer_size
        );
        ensure!(
            (0.0..=1.0).contains(&self.epsilon),
            "epsilon must be in [0, 1]: {}",
            self.epsilon
        );
        ensure!(
            (0.0..=1.0).contains(&self.gamma),
            "gamma must be in [0, 1]: {}",
            self.gamma
        );
        ensure!(0.0 < self.learning_rate, "learning_rate must be positive");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use rstest::rstest;

    use super::*;

    fn write_tmp(name: &str, content: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("qdqn-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        File::create(&path)
            .unwrap()
            .write_all(content.as_bytes())
            .unwrap();
        path
    }

    #[test]
    fn test_default_is_valid() {
        assert!(DqnConfig::default().validate().is_ok());
    }

    #[rstest]
    #[case("partial.yaml", "episodes: 10\nseed: 7\n")]
    #[case("partial.yml", "episodes: 10\nseed: 7\n")]
    #[case("partial.json", r#"{"episodes": 10, "seed": 7}"#)]
    fn test_load_partial(#[case] name: &str, #[case] content: &str) {
        let path = write_tmp(name, content);

        let config = DqnConfig::load(&path).unwrap();

        assert_eq!(
            config,
            DqnConfig {
                episodes: 10,
                seed: 7,
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_load_unknown_extension() {
        let path = write_tmp("config.toml", "episodes = 10");

        assert!(DqnConfig::load(&path).is_err());
    }

    #[test]
    fn test_load_invalid() {
        let path = write_tmp("invalid.yaml", "batch_size: 1000\n");

        let err = DqnConfig::load(&path).unwrap_err();

        assert!(err.to_string().contains("exceeds buffer_size"));
    }
}

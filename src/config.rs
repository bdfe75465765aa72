use anyhow::ensure;
use serde::Deserialize;
use tracing::info;

fn default_threshold() -> usize {
    3
}

/// Settings read from the environment (and `.env`, if present).
#[derive(Debug, Deserialize)]
pub struct Env {
    pub database_url: Option<String>,
    /// Visits a student needs within one class before a reward is due.
    #[serde(default = "default_threshold")]
    pub achievement_threshold: usize,
}

impl Env {
    pub fn load() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();
        Self::validate(envy::from_env::<Env>()?)
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, String)>) -> anyhow::Result<Self> {
        Self::validate(envy::from_iter::<_, Env>(pairs)?)
    }

    fn validate(env: Env) -> anyhow::Result<Self> {
        ensure!(
            env.achievement_threshold > 0,
            "ACHIEVEMENT_THRESHOLD must be at least 1"
        );
        Ok(env)
    }

    /// A command-line override wins over the environment.
    pub fn threshold(&self, cli_override: Option<usize>) -> anyhow::Result<usize> {
        let threshold = cli_override.unwrap_or(self.achievement_threshold);
        ensure!(threshold > 0, "--threshold must be at least 1");
        if cli_override.is_some() {
            info!(threshold, "achievement threshold overridden on the command line");
        }
        Ok(threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_when_unset() {
        let env = Env::from_pairs(pairs(&[])).unwrap();
        assert_eq!(env.database_url, None);
        assert_eq!(env.achievement_threshold, 3);
        assert_eq!(env.threshold(None).unwrap(), 3);
    }

    #[test]
    fn reads_threshold_and_url() {
        let env = Env::from_pairs(pairs(&[
            ("DATABASE_URL", "postgres://localhost/mass"),
            ("ACHIEVEMENT_THRESHOLD", "5"),
        ]))
        .unwrap();
        assert_eq!(env.database_url.as_deref(), Some("postgres://localhost/mass"));
        assert_eq!(env.threshold(None).unwrap(), 5);
        assert_eq!(env.threshold(Some(2)).unwrap(), 2);
    }

    #[test]
    fn zero_threshold_is_rejected() {
        assert!(Env::from_pairs(pairs(&[("ACHIEVEMENT_THRESHOLD", "0")])).is_err());
        let env = Env::from_pairs(pairs(&[])).unwrap();
        assert!(env.threshold(Some(0)).is_err());
    }
}

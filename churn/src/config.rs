use serde::Deserialize;

/// Parameters of one churn run, read from the `[churn]` table of `config.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChurnConfig {
    /// Highest cycle index. The run executes `cycles + 1` cycles.
    pub cycles: u32,
    pub iterations: u32,
    pub buffer_len: usize,
    /// Runtime name printed in every line, `"<cycle> <label> Time: <ms> ms"`.
    pub label: String,
}

impl Default for ChurnConfig {
    fn default() -> Self {
        ChurnConfig {
            cycles: 1000,
            iterations: 100_000,
            buffer_len: 128,
            label: String::from("Bun"),
        }
    }
}

impl ChurnConfig {
    pub fn load() -> std::io::Result<Self> {
        let config: ChurnConfig = shared::config::load_section("churn")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> std::io::Result<()> {
        if self.buffer_len == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "churn.buffer_len must be at least 1 byte",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_reference_invocation() {
        let config = ChurnConfig::default();
        assert_eq!(config.cycles, 1000);
        assert_eq!(config.iterations, 100_000);
        assert_eq!(config.buffer_len, 128);
        assert_eq!(config.label, "Bun");
    }

    #[test]
    fn partial_table_overrides_only_given_fields() {
        let config: ChurnConfig =
            shared::config::parse_section("[churn]\ncycles = 2\nlabel = \"Rust\"\n", "churn")
                .unwrap();

        assert!(config.validate().is_ok());
        assert_eq!(config.cycles, 2);
        assert_eq!(config.label, "Rust");
        assert_eq!(config.iterations, 100_000);
    }

    #[test]
    fn empty_buffers_are_rejected() {
        let config = ChurnConfig {
            buffer_len: 0,
            ..ChurnConfig::default()
        };

        let err = config.validate().unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
    }
}

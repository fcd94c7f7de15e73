//! Tests for config module

#[cfg(test)]
mod tests {
    use crate::config::*;

    #[test]
    fn test_config_default_values() {
        // Arrange & Act
        let config = ColonnadeConfig::default();

        // Assert
        assert_eq!(config.storage.mode, StorageMode::Log);
        assert_eq!(config.writer.max_rows, 1_000_000);
        assert_eq!(config.executor.max_retries, 3);
        assert_eq!(config.executor.join_buckets, 8);
        assert!(config.codec.checksums);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_toml_overrides_sections() {
        // Arrange
        let toml_str = r#"
            [storage]
            mode = "memory"

            [writer]
            max_rows = 3

            [executor]
            max_retries = 1
            join_buckets = 4
        "#;

        // Act
        let config = ColonnadeConfig::from_toml(toml_str).expect("parse");

        // Assert
        assert_eq!(config.storage.mode, StorageMode::Memory);
        assert_eq!(config.writer.max_rows, 3);
        assert_eq!(config.executor.max_retries, 1);
        assert_eq!(config.executor.join_buckets, 4);
        // Untouched sections keep defaults
        assert_eq!(config.codec.trie_restart_interval, 16);
    }

    #[test]
    fn test_config_from_toml_rejects_bad_mode() {
        let result = ColonnadeConfig::from_toml("[storage]\nmode = \"tape\"\n");

        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_config_validate_zero_rows() {
        // Arrange
        let mut config = ColonnadeConfig::default();
        config.writer.max_rows = 0;

        // Act
        let result = config.validate();

        // Assert
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { ref key, .. }) if key == "writer.max_rows"
        ));
    }

    #[test]
    fn test_config_validate_ratio_out_of_range() {
        let mut config = ColonnadeConfig::default();
        config.codec.bitmap_cardinality_ratio = 1.5;

        let err = config.validate().expect_err("ratio > 1 must fail");

        assert!(err.to_string().contains("codec.bitmap_cardinality_ratio"));
    }

    #[test]
    fn test_config_validate_logging_level() {
        let mut config = ColonnadeConfig::default();
        config.logging.level = "verbose".to_string();

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_toml_round_trip() {
        // Arrange
        let mut config = ColonnadeConfig::default();
        config.writer.max_bytes = 4096;
        config.codec.trie_suffix_index = false;

        // Act
        let text = config.to_toml().expect("serialize");
        let parsed = ColonnadeConfig::from_toml(&text).expect("parse");

        // Assert
        assert_eq!(parsed.writer.max_bytes, 4096);
        assert!(!parsed.codec.trie_suffix_index);
    }

    #[test]
    fn test_effective_workers_explicit() {
        let config = ExecutorConfig {
            workers: 3,
            ..ExecutorConfig::default()
        };

        assert_eq!(config.effective_workers(), 3);
        assert!(ExecutorConfig::default().effective_workers() >= 1);
    }
}

//! Property tests for engine configuration validation.

use proptest::prelude::*;

use dirmon::EngineConfig;

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 96,
        .. ProptestConfig::default()
    })]

    /// PROPERTY: A validated config never has a zero capacity, wait or backoff.
    #[test]
    fn property_validate_clamps(
        max_watches in 0usize..256,
        debounce_ms in 0u64..10_000,
        poll_timeout_ms in 0u64..1_000,
        backoff_ms in 0u64..1_000,
    ) {
        let config = EngineConfig { max_watches, debounce_ms, poll_timeout_ms, backoff_ms }.validate();
        prop_assert!(config.max_watches >= 1);
        prop_assert!(config.poll_timeout_ms >= 1);
        prop_assert!(config.backoff_ms >= 1);
        prop_assert_eq!(config.debounce_ms, debounce_ms);
        prop_assert_eq!(config.clone().validate(), config);
    }

    /// PROPERTY: Any TOML with integer settings in `[engine]` parses.
    #[test]
    fn property_engine_table_parses(max_watches in 1usize..1024, debounce_ms in 0u64..5_000) {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("config.toml");
        std::fs::write(
            &file,
            format!("[engine]\nmax_watches = {max_watches}\ndebounce_ms = {debounce_ms}\n"),
        )
        .unwrap();

        let config = EngineConfig::load(&file).unwrap();
        prop_assert_eq!(config.max_watches, max_watches);
        prop_assert_eq!(config.debounce_ms, debounce_ms);
    }
}

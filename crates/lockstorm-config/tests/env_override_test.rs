//! Environment overrides mutate process state, so they live in their own
//! test binary with a single test.

use lockstorm_config::{Config, ConfigError};
use tempfile::tempdir;

#[test]
fn test_env_overrides_file_values() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("lockstorm.toml");
    std::fs::write(&path, "[worker]\nrounds = 3\njitter_max_ms = 8\n").unwrap();

    std::env::set_var("LOCKSTORM_ROUNDS", "17");
    std::env::set_var("LOCKSTORM_EXPLICIT_UNLOCK", "true");
    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.worker.rounds, 17);
    assert_eq!(config.worker.jitter_max_ms, 8);
    assert!(config.worker.explicit_unlock);

    std::env::set_var("LOCKSTORM_ROUNDS", "lots");
    let err = Config::load(Some(&path)).unwrap_err();
    assert!(matches!(
        err,
        ConfigError::InvalidEnv {
            var: "LOCKSTORM_ROUNDS",
            ..
        }
    ));

    std::env::remove_var("LOCKSTORM_ROUNDS");
    std::env::remove_var("LOCKSTORM_EXPLICIT_UNLOCK");
}

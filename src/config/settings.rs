use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::policy::FieldPolicy;
use crate::crypto::kdf::Argon2Params;
use crate::errors::{SealError, Result};

/// Project-level configuration, loaded from `.ledgerseal.toml`.
///
/// Every field has a sensible default so the encryption core works
/// out-of-the-box without any config file at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Argon2 memory cost in KiB (default: 64 MB).
    #[serde(default = "default_argon2_memory_kib")]
    pub argon2_memory_kib: u32,

    /// Argon2 iteration count (default: 3).
    #[serde(default = "default_argon2_iterations")]
    pub argon2_iterations: u32,

    /// Argon2 parallelism degree (default: 4).
    #[serde(default = "default_argon2_parallelism")]
    pub argon2_parallelism: u32,

    /// Path (relative to project root) of the SQLite key table.
    #[serde(default = "default_key_store_path")]
    pub key_store_path: String,

    /// When stored keys cannot be unwrapped with the session passphrase,
    /// create fresh key versions instead of failing. Data encrypted under
    /// the unreadable versions stays unreadable.
    #[serde(default)]
    pub recover_unreadable_keys: bool,

    /// Collection -> protected fields. `None` means the built-in policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<BTreeMap<String, Vec<String>>>,
}

// ── Serde default helpers ────────────────────────────────────────────

fn default_argon2_memory_kib() -> u32 {
    65_536 // 64 MB
}

fn default_argon2_iterations() -> u32 {
    3
}

fn default_argon2_parallelism() -> u32 {
    4
}

fn default_key_store_path() -> String {
    ".ledgerseal/keys.db".to_string()
}

// ── Implementation ───────────────────────────────────────────────────

impl Default for Settings {
    fn default() -> Self {
        Self {
            argon2_memory_kib: default_argon2_memory_kib(),
            argon2_iterations: default_argon2_iterations(),
            argon2_parallelism: default_argon2_parallelism(),
            key_store_path: default_key_store_path(),
            recover_unreadable_keys: false,
            policy: None,
        }
    }
}

impl Settings {
    /// Name of the config file we look for in the project root.
    const FILE_NAME: &'static str = ".ledgerseal.toml";

    /// Load settings from `<project_dir>/.ledgerseal.toml`.
    ///
    /// If the file does not exist, sensible defaults are returned.
    /// If the file exists but cannot be parsed, an error is returned.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let config_path = project_dir.join(Self::FILE_NAME);

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&config_path)?;

        let settings: Settings = toml::from_str(&contents).map_err(|e| {
            SealError::Config(format!("Failed to parse {}: {e}", config_path.display()))
        })?;

        Ok(settings)
    }

    /// Full path of the key table for a project.
    pub fn key_store_path(&self, project_dir: &Path) -> PathBuf {
        project_dir.join(&self.key_store_path)
    }

    /// Convert the Argon2 settings into crypto-layer params.
    pub fn argon2_params(&self) -> Argon2Params {
        Argon2Params {
            memory_kib: self.argon2_memory_kib,
            iterations: self.argon2_iterations,
            parallelism: self.argon2_parallelism,
        }
    }

    /// The field policy in effect: the configured table, or the built-in one.
    pub fn field_policy(&self) -> FieldPolicy {
        match &self.policy {
            Some(map) => FieldPolicy::from(map.clone()),
            None => FieldPolicy::builtin(),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn default_settings_are_sensible() {
        let s = Settings::default();
        assert_eq!(s.argon2_memory_kib, 65_536);
        assert_eq!(s.argon2_iterations, 3);
        assert_eq!(s.argon2_parallelism, 4);
        assert_eq!(s.key_store_path, ".ledgerseal/keys.db");
        assert!(!s.recover_unreadable_keys);
        assert_eq!(s.field_policy(), FieldPolicy::builtin());
    }

    #[test]
    fn load_returns_defaults_when_no_config_file() {
        let tmp = TempDir::new().unwrap();
        let settings = Settings::load(tmp.path()).unwrap();
        assert_eq!(settings.argon2_iterations, 3);
        assert!(settings.policy.is_none());
    }

    #[test]
    fn load_parses_toml_file() {
        let tmp = TempDir::new().unwrap();
        let config = r#"
argon2_memory_kib = 131072
argon2_iterations = 5
argon2_parallelism = 8
key_store_path = "data/keys.db"
recover_unreadable_keys = true

[policy]
clients = ["email", "phone"]
invoices = ["total"]
"#;
        fs::write(tmp.path().join(".ledgerseal.toml"), config).unwrap();

        let settings = Settings::load(tmp.path()).unwrap();
        assert_eq!(settings.argon2_memory_kib, 131_072);
        assert_eq!(settings.argon2_iterations, 5);
        assert_eq!(settings.argon2_parallelism, 8);
        assert!(settings.recover_unreadable_keys);
        assert_eq!(
            settings.key_store_path(tmp.path()),
            tmp.path().join("data/keys.db")
        );

        let policy = settings.field_policy();
        assert_eq!(policy.fields("clients"), ["email", "phone"]);
        assert_eq!(policy.fields("invoices"), ["total"]);
        assert!(policy.fields("suppliers").is_empty());
    }

    #[test]
    fn load_uses_defaults_for_missing_fields() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(".ledgerseal.toml"), "argon2_iterations = 2\n").unwrap();

        let settings = Settings::load(tmp.path()).unwrap();
        assert_eq!(settings.argon2_iterations, 2);
        assert_eq!(settings.argon2_memory_kib, 65_536);
        assert_eq!(settings.field_policy(), FieldPolicy::builtin());
    }

    #[test]
    fn load_errors_on_invalid_toml() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(".ledgerseal.toml"), "not valid {{toml").unwrap();

        let result = Settings::load(tmp.path());
        assert!(matches!(result, Err(SealError::Config(_))));
    }
}

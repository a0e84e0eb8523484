// Settings Repository
// Key-value store with JSON-encoded values

use rusqlite::params;
use serde::{de::DeserializeOwned, Serialize};

use crate::models::{GenerationConfig, GENERATION_SETTINGS_KEY};
use crate::utils::database::Database;

/// Repository for application settings
#[derive(Clone)]
pub struct SettingsRepository {
    db: Database,
}

impl SettingsRepository {
    /// Create a new SettingsRepository
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Get a raw setting value
    pub fn get(&self, key: &str) -> Result<Option<String>, String> {
        self.db.with_connection(|conn| {
            let result = conn.query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            );

            match result {
                Ok(value) => Ok(Some(value)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(format!("Failed to get setting: {}", e)),
            }
        })
    }

    /// Set a raw setting value
    pub fn set(&self, key: &str, value: &str) -> Result<(), String> {
        self.db.with_connection(|conn| {
            conn.execute(
                r#"
                INSERT OR REPLACE INTO settings (key, value, updated_at)
                VALUES (?1, ?2, datetime('now'))
                "#,
                params![key, value],
            )
            .map_err(|e| format!("Failed to save setting: {}", e))?;
            Ok(())
        })
    }

    /// Get a JSON setting
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, String> {
        match self.get(key)? {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| format!("Failed to parse setting {}: {}", key, e)),
            None => Ok(None),
        }
    }

    /// Set a JSON setting
    pub fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), String> {
        let json = serde_json::to_string(value)
            .map_err(|e| format!("Failed to serialize setting {}: {}", key, e))?;
        self.set(key, &json)
    }

    /// Load the generation config, falling back to defaults when unset
    pub fn get_generation_config(&self) -> Result<GenerationConfig, String> {
        Ok(self
            .get_json::<GenerationConfig>(GENERATION_SETTINGS_KEY)?
            .unwrap_or_default())
    }

    /// Persist the generation config after validating it
    pub fn save_generation_config(&self, config: &GenerationConfig) -> Result<(), String> {
        config.validate()?;
        self.set_json(GENERATION_SETTINGS_KEY, config)
    }
}

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

/// Durable string-keyed store of JSON values, one file per store.
///
/// Durability is best-effort: unreadable data degrades to the caller's
/// default and failed writes are logged, never returned.
#[derive(Debug, Clone)]
pub struct PreferenceStore {
    path: PathBuf,
}

impl PreferenceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored value for `key`, or `default` when absent, null, or unparsable.
    pub fn get<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        let payload = match read_json_object(&self.path) {
            Ok(Some(payload)) => payload,
            Ok(None) => return default,
            Err(err) => {
                tracing::warn!(key, "error reading preference: {err:#}");
                return default;
            }
        };
        let Some(value) = payload.get(key).filter(|value| !value.is_null()) else {
            return default;
        };
        match serde_json::from_value::<T>(value.clone()) {
            Ok(parsed) => parsed,
            Err(err) => {
                tracing::warn!(key, "error reading preference: {err}");
                default
            }
        }
    }

    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(key, "error writing preference: {err}");
                return;
            }
        };
        self.update(key, |payload| {
            if payload.get(key) == Some(&value) {
                return false;
            }
            payload.insert(key.to_string(), value);
            true
        });
    }

    pub fn clear(&self, key: &str) {
        self.update(key, |payload| payload.remove(key).is_some());
    }

    // Re-reads the file so only `key` is touched; other writers' keys survive.
    fn update(&self, key: &str, apply: impl FnOnce(&mut Map<String, Value>) -> bool) {
        let mut on_disk = match read_json_object(&self.path) {
            Ok(payload) => payload.unwrap_or_default(),
            Err(err) => {
                tracing::warn!(key, "discarding unreadable preference file: {err:#}");
                Map::new()
            }
        };
        if !apply(&mut on_disk) {
            return;
        }
        if let Err(err) = write_json_object(&self.path, &on_disk) {
            tracing::warn!(key, "error writing preference: {err:#}");
        }
    }
}

fn read_json_object(path: &Path) -> anyhow::Result<Option<Map<String, Value>>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| format!("failed reading {}", path.display()))
        }
    };
    if raw.trim().is_empty() {
        return Ok(None);
    }
    let parsed: Value = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;
    match parsed {
        Value::Object(payload) => Ok(Some(payload)),
        _ => anyhow::bail!("{} does not hold a JSON object", path.display()),
    }
}

fn write_json_object(path: &Path, payload: &Map<String, Value>) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(
        path,
        serde_json::to_string_pretty(&Value::Object(payload.clone()))?,
    )
    .with_context(|| format!("failed writing {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::PreferenceStore;

    #[test]
    fn missing_file_yields_default() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = PreferenceStore::new(temp.path().join("prefs.json"));
        assert_eq!(store.get("dauber-context", String::new()), "");
        assert_eq!(store.get::<Option<String>>("dauber-api-key", None), None);
        Ok(())
    }

    #[test]
    fn set_then_get_round_trips_and_clear_restores_default() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = PreferenceStore::new(temp.path().join("nested").join("prefs.json"));
        store.set("dauber-context", "oils on linen");
        assert_eq!(store.get("dauber-context", String::new()), "oils on linen");

        store.clear("dauber-context");
        assert_eq!(store.get("dauber-context", "fallback".to_string()), "fallback");
        Ok(())
    }

    #[test]
    fn corrupt_file_falls_back_to_default() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("prefs.json");
        std::fs::write(&path, "{not json")?;
        let store = PreferenceStore::new(&path);
        assert_eq!(store.get("dauber-touch-level", "balanced".to_string()), "balanced");

        // a write replaces the unreadable file instead of failing
        store.set("dauber-touch-level", "direct");
        assert_eq!(store.get("dauber-touch-level", "balanced".to_string()), "direct");
        Ok(())
    }

    #[test]
    fn wrong_shape_value_falls_back_to_default() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("prefs.json");
        std::fs::write(&path, r#"{"dauber-context": 42, "dauber-api-key": null}"#)?;
        let store = PreferenceStore::new(&path);
        assert_eq!(store.get("dauber-context", String::new()), "");
        assert_eq!(
            store.get("dauber-api-key", Some("default".to_string())),
            Some("default".to_string())
        );
        Ok(())
    }

    #[test]
    fn two_stores_on_one_file_merge_keys() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("prefs.json");
        let a = PreferenceStore::new(&path);
        let b = PreferenceStore::new(&path);

        a.set("dauber-context", "portrait");
        b.set("dauber-touch-level", "curious");
        a.set("dauber-camera-id", "usb-1");

        let reloaded = PreferenceStore::new(&path);
        assert_eq!(reloaded.get("dauber-context", String::new()), "portrait");
        assert_eq!(reloaded.get("dauber-touch-level", String::new()), "curious");
        assert_eq!(reloaded.get("dauber-camera-id", String::new()), "usb-1");
        Ok(())
    }

    #[test]
    fn unwritable_location_is_not_fatal() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let blocker = temp.path().join("blocker");
        std::fs::write(&blocker, "file, not a directory")?;
        let store = PreferenceStore::new(blocker.join("prefs.json"));
        store.set("dauber-context", "lost");
        assert_eq!(store.get("dauber-context", String::new()), "");
        Ok(())
    }
}

use std::path::PathBuf;

use super::PreferenceStore;
use crate::prompts::TouchLevel;

pub const API_KEY_PREF: &str = "dauber-api-key";
pub const TOUCH_LEVEL_PREF: &str = "dauber-touch-level";
pub const SESSION_CONTEXT_PREF: &str = "dauber-context";
pub const CAMERA_DEVICE_PREF: &str = "dauber-camera-id";

/// Typed accessors over the four persisted studio preferences.
///
/// | key                  | type             | default    |
/// |----------------------|------------------|------------|
/// | `dauber-api-key`     | `Option<String>` | `None`     |
/// | `dauber-touch-level` | [`TouchLevel`]   | `balanced` |
/// | `dauber-context`     | `String`         | `""`       |
/// | `dauber-camera-id`   | `Option<String>` | `None`     |
#[derive(Debug, Clone)]
pub struct Preferences {
    store: PreferenceStore,
}

impl Preferences {
    pub fn new(store: PreferenceStore) -> Self {
        Self { store }
    }

    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self::new(PreferenceStore::new(path))
    }

    pub fn store(&self) -> &PreferenceStore {
        &self.store
    }

    pub fn api_key(&self) -> Option<String> {
        self.store
            .get::<Option<String>>(API_KEY_PREF, None)
            .filter(|key| !key.trim().is_empty())
    }

    pub fn set_api_key(&self, key: Option<&str>) {
        match key.map(str::trim).filter(|key| !key.is_empty()) {
            Some(key) => self.store.set(API_KEY_PREF, key),
            None => self.store.clear(API_KEY_PREF),
        }
    }

    pub fn touch_level(&self) -> TouchLevel {
        self.store.get(TOUCH_LEVEL_PREF, TouchLevel::default())
    }

    pub fn set_touch_level(&self, level: TouchLevel) {
        self.store.set(TOUCH_LEVEL_PREF, &level);
    }

    pub fn session_context(&self) -> String {
        self.store.get(SESSION_CONTEXT_PREF, String::new())
    }

    pub fn set_session_context(&self, context: &str) {
        self.store.set(SESSION_CONTEXT_PREF, context);
    }

    /// Last camera the session was granted. Only a hint: callers re-validate
    /// it against the current device list.
    pub fn camera_device_id(&self) -> Option<String> {
        self.store.get::<Option<String>>(CAMERA_DEVICE_PREF, None)
    }

    pub fn set_camera_device_id(&self, device_id: Option<&str>) {
        match device_id {
            Some(id) => self.store.set(CAMERA_DEVICE_PREF, id),
            None => self.store.clear(CAMERA_DEVICE_PREF),
        }
    }
}

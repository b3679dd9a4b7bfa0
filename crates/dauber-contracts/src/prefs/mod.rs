mod settings;
mod store;

pub use settings::{
    Preferences, API_KEY_PREF, CAMERA_DEVICE_PREF, SESSION_CONTEXT_PREF, TOUCH_LEVEL_PREF,
};
pub use store::PreferenceStore;

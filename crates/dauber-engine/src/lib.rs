pub mod anthropic;
pub mod camera;
pub mod capture;
pub mod folder_camera;
pub mod studio;

pub use anthropic::{AnthropicClient, FeedbackError, FeedbackProvider, KeyValidation};
pub use camera::{CameraBackend, CameraError, CameraSession};
pub use folder_camera::FolderCamera;
pub use studio::{FeedbackTurn, RequestGate, Studio, StudioError};

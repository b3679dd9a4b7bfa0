use dauber_contracts::prefs::Preferences;
use image::DynamicImage;
use thiserror::Error;

use crate::capture::FrameSource;

pub const IDEAL_WIDTH: u32 = 1280;
pub const IDEAL_HEIGHT: u32 = 720;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub device_id: String,
    pub label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacingMode {
    User,
    Environment,
}

/// What a stream request asks of the backend. `device_id` is exact; the
/// rest are preferences a backend may ignore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConstraints {
    pub device_id: Option<String>,
    pub facing_mode: FacingMode,
    pub ideal_width: u32,
    pub ideal_height: u32,
}

impl StreamConstraints {
    pub fn default_video() -> Self {
        Self {
            device_id: None,
            facing_mode: FacingMode::Environment,
            ideal_width: IDEAL_WIDTH,
            ideal_height: IDEAL_HEIGHT,
        }
    }

    pub fn for_device(device_id: &str) -> Self {
        Self {
            device_id: Some(device_id.to_string()),
            ..Self::default_video()
        }
    }

    pub fn without_device(&self) -> Self {
        Self {
            device_id: None,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CameraError {
    #[error("Camera permission denied. Please allow camera access to use Dauber.")]
    PermissionDenied,
    #[error("No camera found. Please connect a camera and refresh.")]
    NotFound,
    #[error("Could not start camera with requested settings.")]
    Overconstrained,
    #[error("Camera error: {0}")]
    Unknown(String),
}

impl CameraError {
    pub fn kind(&self) -> &'static str {
        match self {
            CameraError::PermissionDenied => "permission",
            CameraError::NotFound => "not-found",
            CameraError::Overconstrained => "overconstrained",
            CameraError::Unknown(_) => "unknown",
        }
    }
}

/// A live feed handed out by a [`CameraBackend`].
pub trait CameraStream: FrameSource {
    /// Device actually granted, which may differ from the one requested.
    fn device_id(&self) -> &str;

    fn stop(&mut self);
}

pub trait CameraBackend {
    fn enumerate_devices(&self) -> anyhow::Result<Vec<DeviceDescriptor>>;

    fn open(&self, constraints: &StreamConstraints) -> Result<Box<dyn CameraStream>, CameraError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraState {
    Uninitialized,
    Starting,
    Active,
    Failed(CameraError),
}

/// Owns the single live stream of a studio session.
///
/// At most one stream is open at a time: every `start` stops the previous
/// stream before asking the backend for a new one.
pub struct CameraSession {
    backend: Box<dyn CameraBackend>,
    prefs: Preferences,
    state: CameraState,
    stream: Option<Box<dyn CameraStream>>,
    devices: Vec<DeviceDescriptor>,
}

impl CameraSession {
    pub fn new(backend: Box<dyn CameraBackend>, prefs: Preferences) -> Self {
        Self {
            backend,
            prefs,
            state: CameraState::Uninitialized,
            stream: None,
            devices: Vec::new(),
        }
    }

    pub fn state(&self) -> &CameraState {
        &self.state
    }

    pub fn error(&self) -> Option<&CameraError> {
        match &self.state {
            CameraState::Failed(err) => Some(err),
            _ => None,
        }
    }

    pub fn devices(&self) -> &[DeviceDescriptor] {
        &self.devices
    }

    pub fn active_device_id(&self) -> Option<&str> {
        self.stream.as_ref().map(|stream| stream.device_id())
    }

    /// The live feed, present only while the session is active.
    pub fn source(&self) -> Option<&dyn FrameSource> {
        match (&self.state, &self.stream) {
            (CameraState::Active, Some(_)) => Some(self),
            _ => None,
        }
    }

    pub fn refresh_devices(&mut self) -> &[DeviceDescriptor] {
        self.devices = match self.backend.enumerate_devices() {
            Ok(devices) => devices,
            Err(err) => {
                tracing::error!("failed to enumerate camera devices: {err:#}");
                Vec::new()
            }
        };
        &self.devices
    }

    /// First start of a session. The device list is always refreshed; the
    /// remembered device is honored only if it is still attached.
    pub fn initialize(&mut self) -> Result<(), CameraError> {
        self.refresh_devices();
        let still_attached = self
            .prefs
            .camera_device_id()
            .filter(|id| self.devices.iter().any(|device| &device.device_id == id));
        self.start(still_attached.as_deref())
    }

    pub fn start(&mut self, device_id: Option<&str>) -> Result<(), CameraError> {
        self.stop_stream();
        self.state = CameraState::Starting;

        let constraints = match device_id {
            Some(id) => StreamConstraints::for_device(id),
            None => StreamConstraints::default_video(),
        };
        let opened = match self.backend.open(&constraints) {
            Err(CameraError::Overconstrained) if constraints.device_id.is_some() => {
                tracing::warn!(
                    device_id = constraints.device_id.as_deref().unwrap_or_default(),
                    "camera constraints unsatisfiable; retrying without device"
                );
                self.backend.open(&constraints.without_device())
            }
            other => other,
        };

        match opened {
            Ok(stream) => {
                self.prefs.set_camera_device_id(Some(stream.device_id()));
                self.stream = Some(stream);
                self.state = CameraState::Active;
                self.refresh_devices();
                Ok(())
            }
            Err(err) => {
                tracing::warn!(kind = err.kind(), "camera start failed: {err}");
                self.state = CameraState::Failed(err.clone());
                Err(err)
            }
        }
    }

    pub fn switch_device(&mut self, device_id: &str) -> Result<(), CameraError> {
        self.start(Some(device_id))
    }

    pub fn shutdown(&mut self) {
        self.stop_stream();
        self.state = CameraState::Uninitialized;
    }

    fn stop_stream(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
        }
    }
}

impl FrameSource for CameraSession {
    fn dimensions(&self) -> (u32, u32) {
        self.stream
            .as_ref()
            .map(|stream| stream.dimensions())
            .unwrap_or((0, 0))
    }

    fn grab(&self) -> anyhow::Result<DynamicImage> {
        match self.stream.as_ref() {
            Some(stream) => stream.grab(),
            None => anyhow::bail!("no active camera stream"),
        }
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        self.stop_stream();
    }
}

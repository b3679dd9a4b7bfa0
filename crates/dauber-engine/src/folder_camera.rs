use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::Context;
use image::DynamicImage;

use crate::camera::{
    CameraBackend, CameraError, CameraStream, DeviceDescriptor, FacingMode, StreamConstraints,
};
use crate::capture::FrameSource;

const FRAME_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "bmp"];
const ENVIRONMENT_HINTS: &[&str] = &["back", "rear", "environment", "easel"];
const LABEL_FILE: &str = "label.txt";

/// Camera backend over a directory tree.
///
/// Every sub-directory of `root` is a device and the newest image file inside
/// it is that device's live picture, which is what tethering tools and
/// `ffmpeg -update 1` produce. An optional `label.txt` names the device.
#[derive(Debug, Clone)]
pub struct FolderCamera {
    root: PathBuf,
}

impl FolderCamera {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn scan(&self) -> io::Result<Vec<DeviceDescriptor>> {
        let mut devices = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let device_id = entry.file_name().to_string_lossy().to_string();
            if device_id.starts_with('.') {
                continue;
            }
            let label = fs::read_to_string(entry.path().join(LABEL_FILE))
                .ok()
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
                .unwrap_or_else(|| device_id.clone());
            devices.push(DeviceDescriptor { device_id, label });
        }
        devices.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        Ok(devices)
    }

    fn pick_default(devices: &[DeviceDescriptor], facing: FacingMode) -> Option<&DeviceDescriptor> {
        let faces_environment = |device: &&DeviceDescriptor| {
            let haystack = format!("{} {}", device.device_id, device.label).to_ascii_lowercase();
            ENVIRONMENT_HINTS.iter().any(|hint| haystack.contains(hint))
        };
        match facing {
            FacingMode::Environment => devices
                .iter()
                .find(faces_environment)
                .or_else(|| devices.first()),
            FacingMode::User => devices
                .iter()
                .find(|device| !faces_environment(device))
                .or_else(|| devices.first()),
        }
    }
}

fn classify_io_error(err: io::Error) -> CameraError {
    match err.kind() {
        ErrorKind::PermissionDenied => CameraError::PermissionDenied,
        ErrorKind::NotFound => CameraError::NotFound,
        _ => CameraError::Unknown(err.to_string()),
    }
}

impl CameraBackend for FolderCamera {
    fn enumerate_devices(&self) -> anyhow::Result<Vec<DeviceDescriptor>> {
        self.scan()
            .with_context(|| format!("failed to list cameras under {}", self.root.display()))
    }

    // The folder feed has a fixed resolution per file; the ideal size is only
    // honored downstream by capture's downscale.
    fn open(&self, constraints: &StreamConstraints) -> Result<Box<dyn CameraStream>, CameraError> {
        let devices = self.scan().map_err(classify_io_error)?;
        if devices.is_empty() {
            return Err(CameraError::NotFound);
        }
        let device = match constraints.device_id.as_deref() {
            Some(id) => devices
                .iter()
                .find(|device| device.device_id == id)
                .ok_or(CameraError::Overconstrained)?,
            None => Self::pick_default(&devices, constraints.facing_mode)
                .ok_or(CameraError::NotFound)?,
        };

        let dir = self.root.join(&device.device_id);
        fs::read_dir(&dir).map_err(classify_io_error)?;
        tracing::debug!(device_id = %device.device_id, "opened folder camera");
        Ok(Box::new(FolderStream {
            device_id: device.device_id.clone(),
            dir,
            live: true,
        }))
    }
}

#[derive(Debug)]
pub struct FolderStream {
    device_id: String,
    dir: PathBuf,
    live: bool,
}

impl FolderStream {
    fn newest_frame_path(&self) -> Option<PathBuf> {
        let entries = fs::read_dir(&self.dir).ok()?;
        entries
            .filter_map(Result::ok)
            .filter(|entry| is_frame_file(&entry.path()))
            .map(|entry| {
                let modified = entry
                    .metadata()
                    .and_then(|meta| meta.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                (modified, entry.path())
            })
            .max()
            .map(|(_, path)| path)
    }
}

fn is_frame_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                let lower = ext.to_ascii_lowercase();
                FRAME_EXTENSIONS.contains(&lower.as_str())
            })
            .unwrap_or(false)
}

impl FrameSource for FolderStream {
    fn dimensions(&self) -> (u32, u32) {
        if !self.live {
            return (0, 0);
        }
        self.newest_frame_path()
            .and_then(|path| image::image_dimensions(path).ok())
            .unwrap_or((0, 0))
    }

    fn grab(&self) -> anyhow::Result<DynamicImage> {
        if !self.live {
            anyhow::bail!("camera stream {} was stopped", self.device_id);
        }
        let path = self
            .newest_frame_path()
            .with_context(|| format!("no frame available from {}", self.dir.display()))?;
        image::open(&path).with_context(|| format!("failed to decode {}", path.display()))
    }
}

impl CameraStream for FolderStream {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn stop(&mut self) {
        self.live = false;
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use image::{Rgb, RgbImage};

    use super::FolderCamera;
    use crate::camera::{CameraBackend, CameraError, CameraStream, StreamConstraints};
    use crate::capture::FrameSource;

    fn write_frame(path: &Path, width: u32, height: u32) -> anyhow::Result<()> {
        let mut image = RgbImage::new(width, height);
        for pixel in image.pixels_mut() {
            *pixel = Rgb([90, 140, 200]);
        }
        image.save(path)?;
        Ok(())
    }

    #[test]
    fn enumerates_subdirectories_with_labels() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        fs::create_dir(temp.path().join("webcam"))?;
        fs::create_dir(temp.path().join("easel-back"))?;
        fs::write(temp.path().join("easel-back").join("label.txt"), "Easel cam\n")?;
        fs::write(temp.path().join("notes.txt"), "not a device")?;

        let devices = FolderCamera::new(temp.path()).enumerate_devices()?;
        let ids: Vec<&str> = devices.iter().map(|d| d.device_id.as_str()).collect();
        assert_eq!(ids, vec!["easel-back", "webcam"]);
        assert_eq!(devices[0].label, "Easel cam");
        assert_eq!(devices[1].label, "webcam");
        Ok(())
    }

    #[test]
    fn default_constraints_prefer_environment_facing_device() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        fs::create_dir(temp.path().join("a-front"))?;
        fs::create_dir(temp.path().join("z-rear"))?;
        let stream = FolderCamera::new(temp.path())
            .open(&StreamConstraints::default_video())
            .map_err(|err| anyhow::anyhow!(err))?;
        assert_eq!(stream.device_id(), "z-rear");
        Ok(())
    }

    #[test]
    fn classifies_missing_root_unknown_device_and_empty_root() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let missing = FolderCamera::new(temp.path().join("nope"));
        assert_eq!(
            missing.open(&StreamConstraints::default_video()).err(),
            Some(CameraError::NotFound)
        );

        let empty = FolderCamera::new(temp.path());
        assert_eq!(
            empty.open(&StreamConstraints::default_video()).err(),
            Some(CameraError::NotFound)
        );

        fs::create_dir(temp.path().join("webcam"))?;
        assert_eq!(
            empty.open(&StreamConstraints::for_device("other")).err(),
            Some(CameraError::Overconstrained)
        );
        Ok(())
    }

    #[test]
    fn stream_serves_newest_frame_until_stopped() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let device = temp.path().join("webcam");
        fs::create_dir(&device)?;

        let camera = FolderCamera::new(temp.path());
        let mut stream = camera
            .open(&StreamConstraints::for_device("webcam"))
            .map_err(|err| anyhow::anyhow!(err))?;
        assert_eq!(stream.dimensions(), (0, 0));
        assert!(stream.grab().is_err());

        write_frame(&device.join("frame.png"), 320, 200)?;
        assert_eq!(stream.dimensions(), (320, 200));
        let grabbed = stream.grab()?;
        assert_eq!((grabbed.width(), grabbed.height()), (320, 200));

        stream.stop();
        assert_eq!(stream.dimensions(), (0, 0));
        assert!(stream.grab().is_err());
        Ok(())
    }
}

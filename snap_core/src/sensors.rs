//! Camera acquisition and on-demand frame capture.
//!
//! One [`CameraSession`] wraps a started V4L2 stream on a Linux machine.
//! The [`CameraManager`] owns at most one session at a time and releases the
//! previous one before installing a replacement, so the device is never held
//! twice. Capture negotiates the supported resolution and interval closest
//! to the configured preferences, mirroring the "ideal" constraints the
//! upstream page passed to the browser.

use image::RgbImage;
use rscam::{Camera, Config, IntervalInfo, ResolutionInfo};
use serde::Deserialize;
use thiserror::Error;

const CAPTURE_FORMAT: &[u8] = b"MJPG";

/// Which physical camera a session represents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    Front,
    #[default]
    Back,
}

impl Facing {
    pub fn toggled(self) -> Self {
        match self {
            Facing::Front => Facing::Back,
            Facing::Back => Facing::Front,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Facing::Front => "front",
            Facing::Back => "back",
        }
    }
}

/// Camera failures, each mapped to a distinct user-visible message.
#[derive(Debug, Error)]
pub enum CameraError {
    #[error("camera access denied for {device}; check device permissions")]
    PermissionDenied { device: String },
    #[error("no camera device at {device}")]
    NotFound { device: String },
    #[error("camera at {device} does not support the requested capture mode: {message}")]
    Unsupported { device: String, message: String },
    #[error("camera error on {device}: {message}")]
    Unknown { device: String, message: String },
}

fn map_io_error(device: &str, err: std::io::Error) -> CameraError {
    let device = device.to_owned();
    match err.kind() {
        std::io::ErrorKind::PermissionDenied => CameraError::PermissionDenied { device },
        std::io::ErrorKind::NotFound => CameraError::NotFound { device },
        _ => CameraError::Unknown {
            device,
            message: err.to_string(),
        },
    }
}

fn map_start_error(device: &str, err: rscam::Error) -> CameraError {
    match err {
        rscam::Error::Io(io) => map_io_error(device, io),
        // The remaining variants all mean the device rejected the
        // format/resolution/interval combination.
        other => CameraError::Unsupported {
            device: device.to_owned(),
            message: other.to_string(),
        },
    }
}

/// Anything one square frame can be grabbed from.
///
/// The seam between the pipeline and the camera hardware; test suites
/// substitute a fake producing a fixed image.
pub trait FrameSource {
    /// Capture one frame, decoded and resized to `image_size` square.
    fn grab(&self, image_size: u32) -> Result<RgbImage, CameraError>;
}

/// An active capture stream on one physical camera.
pub struct CameraSession {
    camera: Camera,
    device: String,
    facing: Facing,
    resolution: (u32, u32),
}

impl CameraSession {
    /// Open `device`, negotiate a capture mode close to the preferences and
    /// start streaming.
    pub fn open(
        device: &str,
        facing: Facing,
        image_size: u32,
        frame_rate: u32,
    ) -> Result<Self, CameraError> {
        let mut camera = Camera::new(device).map_err(|e| map_io_error(device, e))?;

        let resolutions = camera
            .resolutions(CAPTURE_FORMAT)
            .map_err(|e| map_start_error(device, e))?;
        let resolution = pick_resolution(resolutions, (image_size, image_size)).ok_or_else(|| {
            CameraError::Unsupported {
                device: device.to_owned(),
                message: "no MJPG resolution available".to_owned(),
            }
        })?;

        let intervals = camera
            .intervals(CAPTURE_FORMAT, resolution)
            .map_err(|e| map_start_error(device, e))?;
        let interval =
            pick_interval(intervals, frame_rate).ok_or_else(|| CameraError::Unsupported {
                device: device.to_owned(),
                message: "no MJPG frame interval available".to_owned(),
            })?;

        camera
            .start(&Config {
                interval,
                resolution,
                format: CAPTURE_FORMAT,
                ..Default::default()
            })
            .map_err(|e| map_start_error(device, e))?;

        log::info!(
            "camera {} ({}) streaming at {}x{}",
            device,
            facing.label(),
            resolution.0,
            resolution.1
        );

        Ok(Self {
            camera,
            device: device.to_owned(),
            facing,
            resolution,
        })
    }

    pub fn facing(&self) -> Facing {
        self.facing
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn resolution(&self) -> (u32, u32) {
        self.resolution
    }

    /// One raw MJPG frame, as delivered by the device. Used for the live view.
    pub fn capture_jpeg(&self) -> Result<rscam::Frame, CameraError> {
        self.camera
            .capture()
            .map_err(|e| map_io_error(&self.device, e))
    }
}

impl FrameSource for CameraSession {
    fn grab(&self, image_size: u32) -> Result<RgbImage, CameraError> {
        let frame = self.capture_jpeg()?;
        let decoded = image::load_from_memory(&frame[..])
            .map_err(|e| CameraError::Unknown {
                device: self.device.clone(),
                message: format!("frame decode failed: {e}"),
            })?
            .to_rgb8();
        // Implicit resize to the configured square, like the upstream
        // fixed-size canvas draw.
        Ok(image::imageops::resize(
            &decoded,
            image_size,
            image_size,
            image::imageops::FilterType::Triangle,
        ))
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        if let Err(e) = self.camera.stop() {
            log::warn!("failed to stop camera {}: {}", self.device, e);
        }
    }
}

/// What the manager needs to know about a held session. Releasing a session
/// is dropping it; [`CameraSession`] stops its stream on drop.
pub trait ActiveCamera {
    fn facing(&self) -> Facing;
    fn device(&self) -> &str;
}

impl ActiveCamera for CameraSession {
    fn facing(&self) -> Facing {
        CameraSession::facing(self)
    }

    fn device(&self) -> &str {
        CameraSession::device(self)
    }
}

/// Owns the single active session and the facing bookkeeping.
pub struct CameraManager<S = CameraSession> {
    session: Option<S>,
}

impl<S> Default for CameraManager<S> {
    fn default() -> Self {
        Self { session: None }
    }
}

impl<S: ActiveCamera> CameraManager<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a freshly opened session, releasing any previous one first.
    pub fn install(&mut self, session: S) {
        self.stop();
        self.session = Some(session);
    }

    /// Release the active session, stopping its stream.
    pub fn stop(&mut self) {
        if let Some(prev) = self.session.take() {
            log::info!(
                "releasing camera {} ({})",
                prev.device(),
                prev.facing().label()
            );
            drop(prev);
        }
    }

    pub fn session(&self) -> Option<&S> {
        self.session.as_ref()
    }

    pub fn current_facing(&self) -> Option<Facing> {
        self.session.as_ref().map(|s| s.facing())
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }
}

/// Pick the supported resolution closest to the preferred one, by pixel count.
fn pick_resolution(info: ResolutionInfo, preferred: (u32, u32)) -> Option<(u32, u32)> {
    let target = u64::from(preferred.0) * u64::from(preferred.1);
    match info {
        ResolutionInfo::Discretes(resolutions) => resolutions
            .iter()
            .min_by_key(|res| {
                let pixels = u64::from(res.0) * u64::from(res.1);
                pixels.abs_diff(target)
            })
            .copied(),
        ResolutionInfo::Stepwise { min, max, .. } => Some((
            preferred.0.clamp(min.0, max.0),
            preferred.1.clamp(min.1, max.1),
        )),
    }
}

/// Pick the supported frame interval whose rate is closest to the preferred
/// frames-per-second value.
fn pick_interval(info: IntervalInfo, preferred_fps: u32) -> Option<(u32, u32)> {
    match info {
        IntervalInfo::Discretes(intervals) => intervals
            .iter()
            .filter(|(denominator, _)| *denominator > 0)
            .min_by_key(|(denominator, numerator)| {
                let rate = numerator / denominator;
                rate.abs_diff(preferred_fps)
            })
            .copied(),
        IntervalInfo::Stepwise { max, .. } => Some(max),
    }
}

#[cfg(test)]
mod test {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    struct RecordedSession {
        name: &'static str,
        facing: Facing,
        events: Rc<RefCell<Vec<String>>>,
    }

    impl RecordedSession {
        fn new(name: &'static str, facing: Facing, events: Rc<RefCell<Vec<String>>>) -> Self {
            Self {
                name,
                facing,
                events,
            }
        }
    }

    impl ActiveCamera for RecordedSession {
        fn facing(&self) -> Facing {
            self.facing
        }

        fn device(&self) -> &str {
            self.name
        }
    }

    impl Drop for RecordedSession {
        fn drop(&mut self) {
            self.events.borrow_mut().push(format!("released {}", self.name));
        }
    }

    #[test]
    fn install_releases_the_prior_session_first() {
        let events = Rc::new(RefCell::new(Vec::new()));
        let mut manager = CameraManager::new();

        manager.install(RecordedSession::new("back", Facing::Back, Rc::clone(&events)));
        assert!(events.borrow().is_empty());
        assert_eq!(manager.current_facing(), Some(Facing::Back));

        manager.install(RecordedSession::new(
            "front",
            Facing::Front,
            Rc::clone(&events),
        ));
        // The back session was released during install; only the front one
        // remains held.
        assert_eq!(*events.borrow(), vec!["released back".to_owned()]);
        assert_eq!(manager.current_facing(), Some(Facing::Front));
        assert_eq!(manager.session().unwrap().device(), "front");
    }

    #[test]
    fn stop_releases_and_leaves_no_session() {
        let events = Rc::new(RefCell::new(Vec::new()));
        let mut manager = CameraManager::new();

        manager.install(RecordedSession::new("back", Facing::Back, Rc::clone(&events)));
        manager.stop();

        assert_eq!(*events.borrow(), vec!["released back".to_owned()]);
        assert!(!manager.is_active());
        assert_eq!(manager.current_facing(), None);

        // Stopping again is a no-op, not a double release.
        manager.stop();
        assert_eq!(events.borrow().len(), 1);
    }

    #[test]
    fn facing_toggles_between_front_and_back() {
        assert_eq!(Facing::Front.toggled(), Facing::Back);
        assert_eq!(Facing::Back.toggled(), Facing::Front);
        assert_eq!(Facing::Back.toggled().toggled(), Facing::Back);
    }

    #[test]
    fn io_errors_map_to_distinct_variants() {
        let denied = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert!(matches!(
            map_io_error("/dev/video0", denied),
            CameraError::PermissionDenied { .. }
        ));

        let missing = std::io::Error::from(std::io::ErrorKind::NotFound);
        assert!(matches!(
            map_io_error("/dev/video0", missing),
            CameraError::NotFound { .. }
        ));

        let other = std::io::Error::from(std::io::ErrorKind::BrokenPipe);
        assert!(matches!(
            map_io_error("/dev/video0", other),
            CameraError::Unknown { .. }
        ));
    }

    #[test]
    fn picks_discrete_resolution_closest_to_preferred() {
        let info = ResolutionInfo::Discretes(vec![(1920, 1080), (640, 480), (320, 240)]);
        assert_eq!(pick_resolution(info, (224, 224)), Some((320, 240)));
    }

    #[test]
    fn clamps_stepwise_resolution() {
        let info = ResolutionInfo::Stepwise {
            min: (320, 240),
            max: (1280, 720),
            step: (16, 16),
        };
        assert_eq!(pick_resolution(info, (224, 224)), Some((320, 240)));
    }

    #[test]
    fn picks_interval_with_closest_rate() {
        // (denominator, numerator): (1, 30) is 30 fps.
        let info = IntervalInfo::Discretes(vec![(1, 10), (1, 30), (1, 60)]);
        assert_eq!(pick_interval(info, 30), Some((1, 30)));
    }

    #[test]
    fn empty_discrete_lists_yield_none() {
        assert_eq!(
            pick_resolution(ResolutionInfo::Discretes(vec![]), (224, 224)),
            None
        );
        assert_eq!(pick_interval(IntervalInfo::Discretes(vec![]), 30), None);
    }
}

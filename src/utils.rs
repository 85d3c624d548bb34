use tracing::{debug, info};

use crate::capture::device::{CameraBackend, CameraError, LensFacing, Size};

/// Camera picked for live capture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundCamera {
    pub id: String,
    pub size: Size,
}

/// Find the first back-facing camera and the output size to use for it.
pub fn find_back_camera<B: CameraBackend + ?Sized>(
    backend: &B,
    target: Size,
) -> Result<FoundCamera, CameraError> {
    info!("Looking for a back-facing camera...");

    for id in backend.camera_ids()? {
        let characteristics = backend.characteristics(&id)?;
        if characteristics.facing != Some(LensFacing::Back) {
            debug!("Skipping camera {} ({:?})", id, characteristics.facing);
            continue;
        }

        let size = choose_optimal_size(&characteristics.output_sizes, target)
            .ok_or_else(|| CameraError::NoOutputSizes(id.clone()))?;
        info!("Found back camera: {} at {}", id, size);
        return Ok(FoundCamera { id, size });
    }

    Err(CameraError::NoBackCamera)
}

/// Exact match for `target` if offered, otherwise the first size.
pub fn choose_optimal_size(choices: &[Size], target: Size) -> Option<Size> {
    choices
        .iter()
        .copied()
        .find(|size| *size == target)
        .or_else(|| choices.first().copied())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::virtual_camera::{VirtualCamera, VirtualCameraSpec};

    const VGA: Size = Size::new(640, 480);

    #[test]
    fn exact_target_wins() {
        let choices = [Size::new(1920, 1080), VGA, Size::new(320, 240)];
        assert_eq!(choose_optimal_size(&choices, VGA), Some(VGA));
    }

    #[test]
    fn falls_back_to_first_size() {
        let choices = [Size::new(1280, 720), Size::new(320, 240)];
        assert_eq!(
            choose_optimal_size(&choices, VGA),
            Some(Size::new(1280, 720))
        );
        assert_eq!(choose_optimal_size(&[], VGA), None);
    }

    #[test]
    fn picks_first_back_camera() {
        let backend = VirtualCamera::new(vec![
            VirtualCameraSpec::new("front", Some(LensFacing::Front), vec![VGA]),
            VirtualCameraSpec::new("unknown", None, vec![VGA]),
            VirtualCameraSpec::new("back0", Some(LensFacing::Back), vec![Size::new(800, 600)]),
            VirtualCameraSpec::new("back1", Some(LensFacing::Back), vec![VGA]),
        ]);
        let found = find_back_camera(&backend, VGA).unwrap();
        assert_eq!(found.id, "back0");
        assert_eq!(found.size, Size::new(800, 600));
    }

    #[test]
    fn no_back_camera_is_an_error() {
        let backend = VirtualCamera::new(vec![VirtualCameraSpec::new(
            "front",
            Some(LensFacing::Front),
            vec![VGA],
        )]);
        assert_eq!(
            find_back_camera(&backend, VGA),
            Err(CameraError::NoBackCamera)
        );
    }

    #[test]
    fn back_camera_without_sizes_is_an_error() {
        let backend = VirtualCamera::new(vec![VirtualCameraSpec::new(
            "back",
            Some(LensFacing::Back),
            vec![],
        )]);
        assert_eq!(
            find_back_camera(&backend, VGA),
            Err(CameraError::NoOutputSizes("back".into()))
        );
    }
}

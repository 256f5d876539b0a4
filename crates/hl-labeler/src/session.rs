//! Session directory layout.

use hl_core::config::SessionConfig;
use hl_core::{LabelError, Result};
use std::path::{Path, PathBuf};

/// Input files of one recorded session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInputs {
    pub video: PathBuf,
    pub left_keypoints: PathBuf,
    pub right_keypoints: PathBuf,
}

impl SessionInputs {
    pub fn locate(session_dir: &Path, config: &SessionConfig) -> Self {
        Self {
            video: session_dir.join(&config.video_file),
            left_keypoints: session_dir.join(&config.left_hand_file),
            right_keypoints: session_dir.join(&config.right_hand_file),
        }
    }

    /// Every input must exist; the first missing one is reported.
    pub fn validate(&self) -> Result<()> {
        for path in [&self.video, &self.left_keypoints, &self.right_keypoints] {
            if !path.is_file() {
                return Err(LabelError::InputMissing(path.clone()));
            }
        }
        Ok(())
    }
}

/// `<video stem><suffix>.mp4` next to the source video.
pub fn output_path(video: &Path, suffix: &str) -> PathBuf {
    let stem = video
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "video".to_string());
    video.with_file_name(format!("{stem}{suffix}.mp4"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_output_naming() {
        assert_eq!(
            output_path(Path::new("/s/video.mp4"), "_labeled"),
            PathBuf::from("/s/video_labeled.mp4")
        );
        assert_eq!(
            output_path(Path::new("/s/clip.mov"), "_labeled"),
            PathBuf::from("/s/clip_labeled.mp4")
        );
    }

    #[test]
    fn test_validate_reports_first_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let inputs = SessionInputs::locate(dir.path(), &SessionConfig::default());

        match inputs.validate() {
            Err(LabelError::InputMissing(path)) => assert_eq!(path, inputs.video),
            other => panic!("expected InputMissing, got {other:?}"),
        }

        fs::write(&inputs.video, b"").unwrap();
        fs::write(&inputs.left_keypoints, b"").unwrap();
        match inputs.validate() {
            Err(LabelError::InputMissing(path)) => assert_eq!(path, inputs.right_keypoints),
            other => panic!("expected InputMissing, got {other:?}"),
        }

        fs::write(&inputs.right_keypoints, b"").unwrap();
        inputs.validate().unwrap();
    }

    #[test]
    fn test_configured_file_names() {
        let config = SessionConfig {
            video_file: "capture.mp4".into(),
            ..Default::default()
        };
        let inputs = SessionInputs::locate(Path::new("/data/s1"), &config);
        assert_eq!(inputs.video, PathBuf::from("/data/s1/capture.mp4"));
        assert_eq!(inputs.left_keypoints, PathBuf::from("/data/s1/keypoints_left.csv"));
    }
}

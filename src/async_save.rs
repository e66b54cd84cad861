//! Background PNG encoding for screenshots
//!
//! Pixels are read back on the render thread; encoding and writing happen on
//! a worker thread. The renderer polls the job once per frame and never
//! waits on it. Only one save may be in flight at a time.

use crate::backend::TextureReadback;
use crate::error::{RendererError, RendererResult};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Progress of a background save
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveStatus {
    InProgress,
    Saved(PathBuf),
    Failed(String),
}

pub struct AsyncTextureSave {
    path: PathBuf,
    status: Arc<Mutex<SaveStatus>>,
    worker: Option<JoinHandle<()>>,
}

impl AsyncTextureSave {
    /// Start encoding `pixels` to a PNG at `path`
    pub fn start(pixels: TextureReadback, path: PathBuf) -> RendererResult<Self> {
        let expected = pixels.width as usize * pixels.height as usize * 4;
        if pixels.rgba8.len() != expected {
            return Err(RendererError::ImageEncode(format!(
                "{} bytes of pixels for a {}x{} image",
                pixels.rgba8.len(),
                pixels.width,
                pixels.height
            )));
        }

        let (width, height) = (pixels.width, pixels.height);
        let status = Arc::new(Mutex::new(SaveStatus::InProgress));
        let worker_status = Arc::clone(&status);
        let worker_path = path.clone();
        let worker = std::thread::Builder::new()
            .name("texture-save".into())
            .spawn(move || {
                let result = match encode_png(&pixels, &worker_path) {
                    Ok(()) => SaveStatus::Saved(worker_path),
                    Err(e) => SaveStatus::Failed(e.to_string()),
                };
                *worker_status.lock() = result;
            })?;

        log::debug!("Saving {}x{} image to {}", width, height, path.display());
        Ok(Self {
            path,
            status,
            worker: Some(worker),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current status without blocking
    pub fn poll(&mut self) -> SaveStatus {
        let status = self.status.lock().clone();
        if status != SaveStatus::InProgress {
            if let Some(worker) = self.worker.take() {
                if worker.join().is_err() {
                    return SaveStatus::Failed("save thread panicked".into());
                }
            }
        }
        status
    }

    pub fn is_finished(&mut self) -> bool {
        self.poll() != SaveStatus::InProgress
    }
}

fn encode_png(pixels: &TextureReadback, path: &Path) -> RendererResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let image = image::RgbaImage::from_raw(pixels.width, pixels.height, pixels.rgba8.clone())
        .ok_or_else(|| RendererError::ImageEncode("pixel buffer does not match its size".into()))?;
    image
        .save_with_format(path, image::ImageFormat::Png)
        .map_err(|e| RendererError::ImageEncode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn wait(save: &mut AsyncTextureSave) -> SaveStatus {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let status = save.poll();
            if status != SaveStatus::InProgress || Instant::now() > deadline {
                return status;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_saves_png() {
        let dir = std::env::temp_dir().join(format!("deferred-renderer-save-{}", std::process::id()));
        let path = dir.join("shot.png");
        let pixels = TextureReadback {
            width: 2,
            height: 2,
            rgba8: vec![255; 16],
        };

        let mut save = AsyncTextureSave::start(pixels, path.clone()).unwrap();
        assert_eq!(wait(&mut save), SaveStatus::Saved(path.clone()));
        assert!(path.exists());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_rejects_mismatched_buffer() {
        let pixels = TextureReadback {
            width: 4,
            height: 4,
            rgba8: vec![0; 3],
        };
        let result = AsyncTextureSave::start(pixels, PathBuf::from("unused.png"));
        assert!(matches!(result, Err(RendererError::ImageEncode(_))));
    }
}

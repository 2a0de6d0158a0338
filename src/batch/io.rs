//! Filesystem enumeration and image codec I/O.

use crate::core::buffer::PixelBuffer;
use crate::core::error::{ExecutionError, ExecutionResult};
use image::ImageFormat;
use log::warn;
use std::io::Cursor;
use std::path::{Path, PathBuf};

/// File extensions picked up by enumeration (compared case-insensitively).
pub const SUPPORTED_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// How a directory is enumerated.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Descend into subdirectories
    pub recursive: bool,
    /// Only keep file names matching this glob
    pub pattern: Option<glob::Pattern>,
}

impl ListOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn with_pattern(mut self, pattern: &str) -> Result<Self, glob::PatternError> {
        self.pattern = Some(glob::Pattern::new(pattern)?);
        Ok(self)
    }

    fn accepts(&self, path: &Path) -> bool {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        if !SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
            return false;
        }
        match &self.pattern {
            Some(pattern) => {
                let filename = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
                pattern.matches(filename)
            }
            None => true,
        }
    }
}

/// List supported image files under `dir`, sorted by path.
///
/// A path that is not a directory yields an empty list and a warning.
pub fn list_images(dir: &Path, options: &ListOptions) -> Vec<PathBuf> {
    if !dir.is_dir() {
        warn!("'{}' is not a directory, nothing to process", dir.display());
        return Vec::new();
    }

    let max_depth = if options.recursive { usize::MAX } else { 1 };
    let mut images: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .max_depth(max_depth)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Skipping unreadable entry under '{}': {}", dir.display(), e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| options.accepts(path))
        .collect();

    images.sort();
    images
}

/// Decode an image file.
pub fn read_image(path: &Path) -> ExecutionResult<PixelBuffer> {
    if !path.is_file() {
        return Err(ExecutionError::ImageLoad {
            path: path.to_path_buf(),
            reason: "file not found".to_string(),
        });
    }
    let image = image::open(path).map_err(|e| ExecutionError::ImageLoad {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    if image.width() == 0 || image.height() == 0 {
        return Err(ExecutionError::ImageEmpty {
            path: path.to_path_buf(),
        });
    }
    Ok(PixelBuffer::from_dynamic(image))
}

/// Decode an image held in memory.
pub fn decode_image(bytes: &[u8]) -> ExecutionResult<PixelBuffer> {
    let image = image::load_from_memory(bytes).map_err(|e| ExecutionError::ImageLoad {
        path: PathBuf::from("<memory>"),
        reason: e.to_string(),
    })?;
    if image.width() == 0 || image.height() == 0 {
        return Err(ExecutionError::ImageEmpty {
            path: PathBuf::from("<memory>"),
        });
    }
    Ok(PixelBuffer::from_dynamic(image))
}

/// Encode and write `buffer` to `path`, creating parent directories.
///
/// The format follows the extension. JPEG has no alpha, so 4-channel
/// buffers are flattened to RGB first.
pub fn write_image(path: &Path, buffer: &PixelBuffer) -> ExecutionResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| ExecutionError::Write {
            path: path.to_path_buf(),
            reason: format!("failed to create directory: {}", e),
        })?;
    }

    let mut image = buffer.to_dynamic()?;
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    if matches!(extension.as_str(), "jpg" | "jpeg") && buffer.channels() == 4 {
        image = image::DynamicImage::ImageRgb8(image.to_rgb8());
    }

    image.save(path).map_err(|e| ExecutionError::Write {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Encode `buffer` as PNG bytes.
pub fn encode_png(buffer: &PixelBuffer) -> ExecutionResult<Vec<u8>> {
    let image = buffer.to_dynamic()?;
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .map_err(|e| ExecutionError::Encode(e.to_string()))?;
    Ok(bytes)
}

/// Output location for `source`: `output_dir/<relative dir>/<prefix><file name>`.
///
/// The directory of `source` relative to `input_dir` is mirrored under
/// `output_dir`, so files sharing a name in different subdirectories of a
/// recursive listing never map to the same output.
pub fn output_path(output_dir: &Path, input_dir: &Path, source: &Path, prefix: &str) -> PathBuf {
    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let subdir = source
        .strip_prefix(input_dir)
        .ok()
        .and_then(Path::parent)
        .unwrap_or_else(|| Path::new(""));
    output_dir.join(subdir).join(format!("{}{}", prefix, name))
}

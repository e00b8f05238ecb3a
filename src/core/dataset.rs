//! Pair YOLO images with their annotation files.
//!
//! A dropped selection is an unordered bag of files. Each image is matched
//! with the `.txt` file sharing its stem (`card_01.jpg` ↔ `card_01.txt`).
//! Images without an annotation are still uploaded; they are reported so the
//! caller can warn before training.

use std::path::{Path, PathBuf};

use hashbrown::HashMap;

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];
const ANNOTATION_EXTENSION: &str = "txt";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DatasetError {
    #[error("no image files (.jpg, .jpeg, .png, .bmp, .webp) in selection")]
    NoImages,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetItem {
    pub image: PathBuf,
    pub annotation: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatasetPairing {
    pub items: Vec<DatasetItem>,
    /// File names of images that have no annotation.
    pub unmatched_images: Vec<String>,
    /// Annotation files seen in the selection, matched or not.
    pub annotation_files: usize,
}

impl DatasetPairing {
    pub fn image_count(&self) -> usize {
        self.items.len()
    }

    pub fn matched_count(&self) -> usize {
        self.items.len() - self.unmatched_images.len()
    }

    /// Every file to upload: each image followed by its annotation.
    pub fn upload_order(&self) -> Vec<&Path> {
        let mut out = Vec::with_capacity(self.items.len() * 2);
        for item in &self.items {
            out.push(item.image.as_path());
            if let Some(a) = &item.annotation {
                out.push(a.as_path());
            }
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Image,
    Annotation,
    Other,
}

pub fn classify(path: &Path) -> FileKind {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return FileKind::Other;
    };
    let ext = ext.to_ascii_lowercase();
    if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        FileKind::Image
    } else if ext == ANNOTATION_EXTENSION {
        FileKind::Annotation
    } else {
        FileKind::Other
    }
}

/// Pair images with annotations by file stem. Input order of images is kept.
pub fn pair_dataset<P: AsRef<Path>>(files: &[P]) -> Result<DatasetPairing, DatasetError> {
    let mut images = Vec::new();
    let mut annotations: HashMap<String, PathBuf> = HashMap::new();
    let mut annotation_files = 0;

    for file in files {
        let path = file.as_ref();
        match classify(path) {
            FileKind::Image => images.push(path.to_path_buf()),
            FileKind::Annotation => {
                annotation_files += 1;
                if let Some(stem) = file_stem(path) {
                    // Last one wins when two selections share a stem.
                    annotations.insert(stem, path.to_path_buf());
                }
            }
            FileKind::Other => {}
        }
    }

    if images.is_empty() {
        return Err(DatasetError::NoImages);
    }

    let mut pairing = DatasetPairing {
        annotation_files,
        ..DatasetPairing::default()
    };
    for image in images {
        let annotation = file_stem(&image).and_then(|s| annotations.get(&s).cloned());
        if annotation.is_none() {
            pairing.unmatched_images.push(file_name(&image));
        }
        pairing.items.push(DatasetItem { image, annotation });
    }
    Ok(pairing)
}

fn file_stem(path: &Path) -> Option<String> {
    path.file_stem().and_then(|s| s.to_str()).map(str::to_string)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

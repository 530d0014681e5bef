use std::path::Path;

use glob::glob;
use image::{GrayImage, ImageReader};
use indicatif::ParallelProgressIterator;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::detection::Correspondence;

/// Parses the timestamp from a file path.
///
/// Assumes the filename (without extension) is a timestamp in nanoseconds.
fn path_to_timestamp(path: &Path) -> i64 {
    let time_ns: i64 = path
        .file_stem()
        .and_then(|s| s.to_str())
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    time_ns
}

fn img_filter(rp: glob::GlobResult) -> Option<std::path::PathBuf> {
    if let Ok(p) = rp {
        for ext in &[".png", ".jpg"] {
            if p.as_os_str().to_string_lossy().ends_with(ext) {
                return Some(p);
            }
        }
    }
    None
}

/// Loads a grayscale image sequence from a folder, sorted by timestamp.
///
/// Images are decoded in parallel; color inputs are converted to luma.
pub fn load_image_sequence(folder: &str) -> Vec<(i64, GrayImage)> {
    let img_paths = glob(format!("{}/*", folder).as_str()).expect("failed");
    let mut sorted_path: Vec<std::path::PathBuf> =
        img_paths.into_iter().filter_map(img_filter).collect();
    sorted_path.sort();

    let mut frames: Vec<(i64, GrayImage)> = sorted_path
        .par_iter()
        .progress_count(sorted_path.len() as u64)
        .map(|path| {
            let time_ns = path_to_timestamp(path);
            let img = ImageReader::open(path).unwrap().decode().unwrap();
            (time_ns, img.to_luma8())
        })
        .collect();
    frames.sort_by(|a, b| a.0.cmp(&b.0));
    frames
}

/// One detection record as emitted by the blob association front end.
#[derive(Serialize, Deserialize)]
pub struct DetectionRecord {
    pub position: [f32; 2],
    pub id: usize,
    pub nb_votes: f32,
    pub discriminative_power: i32,
}

impl From<&DetectionRecord> for Correspondence {
    fn from(r: &DetectionRecord) -> Correspondence {
        Correspondence {
            position: glam::Vec2::new(r.position[0], r.position[1]),
            id: r.id,
            nb_votes: r.nb_votes,
            discriminative_power: r.discriminative_power,
        }
    }
}

#[derive(Debug)]
pub enum DetectionLoadError {
    Io { path: String, source: std::io::Error },
    Parse { path: String, source: serde_json::Error },
}

impl std::fmt::Display for DetectionLoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DetectionLoadError::Io { path, source } => {
                write!(f, "failed to open detections file {path}: {source}")
            }
            DetectionLoadError::Parse { path, source } => {
                write!(f, "failed to parse detections file {path}: {source}")
            }
        }
    }
}

impl std::error::Error for DetectionLoadError {}

/// Loads per-frame landmark detections from a JSON file holding one array of
/// records per frame, aligned with the image sequence.
pub fn load_detections(path: &str) -> Result<Vec<Vec<Correspondence>>, DetectionLoadError> {
    let contents = std::fs::read_to_string(path).map_err(|source| DetectionLoadError::Io {
        path: path.to_string(),
        source,
    })?;
    let frames: Vec<Vec<DetectionRecord>> =
        serde_json::from_str(&contents).map_err(|source| DetectionLoadError::Parse {
            path: path.to_string(),
            source,
        })?;
    Ok(frames
        .iter()
        .map(|records| records.iter().map(Correspondence::from).collect())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_from_stem() {
        assert_eq!(path_to_timestamp(Path::new("/a/b/1234567.png")), 1234567);
        assert_eq!(path_to_timestamp(Path::new("/a/b/not-a-number.png")), 0);
    }

    #[test]
    fn detection_records_parse() {
        let j = r#"[[{"position":[10.5,20.25],"id":3,"nb_votes":7.0,"discriminative_power":4}],[]]"#;
        let dir = std::env::temp_dir().join("detections-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("d.json");
        std::fs::write(&path, j).unwrap();
        let frames = load_detections(path.to_str().unwrap()).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0][0].id, 3);
        assert!((frames[0][0].position.x - 10.5).abs() < 1e-6);
        assert!(frames[1].is_empty());
    }
}

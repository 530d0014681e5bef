use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::model::{ObjectModel, TextureState};

/// Serialized form of one learned texture.
#[derive(Serialize, Deserialize)]
struct StoredTexture {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

/// On-disk appearance store. Textures appear in surface declaration order;
/// mirrored surfaces are never written since they share a source texture.
#[derive(Serialize, Deserialize)]
struct AppearanceStore {
    #[serde(rename = "imageVector")]
    image_vector: Vec<StoredTexture>,
}

#[derive(Debug)]
pub enum StoreError {
    Io { path: String, source: std::io::Error },
    Format { path: String, source: serde_json::Error },
    SurfaceCountMismatch { expected: usize, actual: usize },
    BadTexture { index: usize },
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Io { path, source } => {
                write!(f, "failed to access appearance store {path}: {source}")
            }
            StoreError::Format { path, source } => {
                write!(f, "malformed appearance store {path}: {source}")
            }
            StoreError::SurfaceCountMismatch { expected, actual } => {
                write!(
                    f,
                    "appearance store holds {actual} textures, model has {expected} surfaces"
                )
            }
            StoreError::BadTexture { index } => {
                write!(f, "texture {index} has inconsistent dimensions")
            }
        }
    }
}

impl std::error::Error for StoreError {}

/// Write the finalized textures of all texture-owning surfaces. Surfaces
/// still empty are stored as zero-sized entries so the order stays aligned
/// with the model.
pub fn write_appearance(path: &str, model: &ObjectModel) -> Result<(), StoreError> {
    let mut image_vector = Vec::new();
    for &idx in &model.owned_surface_indices() {
        let entry = match &model.surfaces[idx].texture {
            TextureState::Finalized(img) => StoredTexture {
                width: img.width(),
                height: img.height(),
                data: img.as_raw().clone(),
            },
            _ => StoredTexture {
                width: 0,
                height: 0,
                data: Vec::new(),
            },
        };
        image_vector.push(entry);
    }
    let store = AppearanceStore { image_vector };
    let j = serde_json::to_string(&store).map_err(|source| StoreError::Format {
        path: path.to_string(),
        source,
    })?;
    std::fs::write(path, j).map_err(|source| StoreError::Io {
        path: path.to_string(),
        source,
    })
}

/// Restore learned textures into the model, in surface declaration order.
pub fn load_appearance(path: &str, model: &mut ObjectModel) -> Result<(), StoreError> {
    let contents = std::fs::read_to_string(path).map_err(|source| StoreError::Io {
        path: path.to_string(),
        source,
    })?;
    let store: AppearanceStore =
        serde_json::from_str(&contents).map_err(|source| StoreError::Format {
            path: path.to_string(),
            source,
        })?;

    let indices = model.owned_surface_indices();
    if store.image_vector.len() != indices.len() {
        return Err(StoreError::SurfaceCountMismatch {
            expected: indices.len(),
            actual: store.image_vector.len(),
        });
    }

    for (i, (&idx, stored)) in indices.iter().zip(store.image_vector.iter()).enumerate() {
        if stored.width == 0 && stored.height == 0 {
            model.surfaces[idx].texture = TextureState::Empty;
            continue;
        }
        if stored.data.len() != (stored.width * stored.height) as usize {
            return Err(StoreError::BadTexture { index: i });
        }
        let img = GrayImage::from_raw(stored.width, stored.height, stored.data.clone())
            .ok_or(StoreError::BadTexture { index: i })?;
        model.surfaces[idx].texture = TextureState::Finalized(img);
    }
    Ok(())
}

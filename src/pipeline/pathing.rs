use std::path::{Path, PathBuf};

use thiserror::Error;

pub const DEFAULT_TOURS_ROOT: &str = "tours";
pub const EQUI_DIR_NAME: &str = "equi";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TourIdError {
    #[error("tour id must not be empty")]
    Empty,
    #[error("tour id may only contain ASCII letters, digits, '-' and '_': {0:?}")]
    InvalidCharacters(String),
}

pub fn validate_tour_id(value: &str) -> Result<&str, TourIdError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(TourIdError::Empty);
    }
    if trimmed
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
    {
        Ok(trimmed)
    } else {
        Err(TourIdError::InvalidCharacters(trimmed.to_string()))
    }
}

pub fn resolve_under_root(root: &Path, value: &str) -> PathBuf {
    let path = PathBuf::from(value);
    if path.is_absolute() {
        path
    } else {
        root.join(path)
    }
}

pub fn tour_dir(tours_root: &Path, tour_id: &str) -> PathBuf {
    tours_root.join(tour_id)
}

pub fn equi_dir(tour_dir: &Path) -> PathBuf {
    tour_dir.join(EQUI_DIR_NAME)
}

/// Flattens a catalog entry such as `~/4k/xyz_skybox0.jpg` into one file name.
pub fn local_asset_file_name(catalog_name: &str) -> String {
    catalog_name.replace(['/', '_'], "-")
}

pub fn path_for_output(root: &Path, path: &Path) -> String {
    let value = match path.strip_prefix(root) {
        Ok(rel) => rel.to_string_lossy().to_string(),
        Err(_) => path.to_string_lossy().to_string(),
    };
    value.replace('\\', "/")
}

pub fn is_jpeg_path(path: &Path) -> bool {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    matches!(ext.to_ascii_lowercase().as_str(), "jpg" | "jpeg")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_catalog_style_ids() {
        assert_eq!(validate_tour_id(" SxQL3iGyoDo "), Ok("SxQL3iGyoDo"));
        assert_eq!(validate_tour_id("a-b_c"), Ok("a-b_c"));
    }

    #[test]
    fn rejects_ids_that_escape_the_tours_root() {
        assert_eq!(validate_tour_id("   "), Err(TourIdError::Empty));
        assert!(matches!(
            validate_tour_id("../etc"),
            Err(TourIdError::InvalidCharacters(_))
        ));
        assert!(matches!(
            validate_tour_id("a/b"),
            Err(TourIdError::InvalidCharacters(_))
        ));
    }

    #[test]
    fn flattens_catalog_names() {
        assert_eq!(
            local_asset_file_name("~/4k/0a1b_skybox3.jpg"),
            "~-4k-0a1b-skybox3.jpg"
        );
    }

    #[test]
    fn tour_layout_and_output_paths() {
        let root = Path::new("tours");
        let dir = tour_dir(root, "abc");
        assert_eq!(dir, PathBuf::from("tours/abc"));
        assert_eq!(equi_dir(dir.as_path()), PathBuf::from("tours/abc/equi"));
        assert_eq!(
            path_for_output(root, Path::new("tours/abc/equi/panoequi.jpg")),
            "abc/equi/panoequi.jpg"
        );
        assert_eq!(
            resolve_under_root(Path::new("/app"), "tours"),
            PathBuf::from("/app/tours")
        );
        assert_eq!(
            resolve_under_root(Path::new("/app"), "/data/tours"),
            PathBuf::from("/data/tours")
        );
    }

    #[test]
    fn recognizes_jpeg_extensions() {
        assert!(is_jpeg_path(Path::new("a/pano0.JPG")));
        assert!(is_jpeg_path(Path::new("a/pano0.jpeg")));
        assert!(!is_jpeg_path(Path::new("a/pano0.png")));
        assert!(!is_jpeg_path(Path::new("a/pano0")));
    }
}

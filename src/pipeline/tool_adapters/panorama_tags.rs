use serde::Serialize;

use crate::pipeline::Dimensions;

pub const DEFAULT_MODEL_TAG: &str = "github fdd4s";
pub const PROJECTION_EQUIRECTANGULAR: &str = "equirectangular";
pub const POSE_HEADING_DEGREES: &str = "180.0";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PixelRect {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

/// GPano fields written onto a finished panorama.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PanoramaTags {
    pub use_panorama_viewer: bool,
    pub projection_type: &'static str,
    pub pose_heading_degrees: &'static str,
    pub full_pano_width: u32,
    pub full_pano_height: u32,
    pub cropped_area: PixelRect,
    pub largest_valid_interior: PixelRect,
    pub model: String,
}

impl PanoramaTags {
    /// The stitched output always covers the whole sphere, so nothing is cropped.
    pub fn full_frame(dimensions: Dimensions, model: impl Into<String>) -> Self {
        let frame = PixelRect {
            left: 0,
            top: 0,
            width: dimensions.width,
            height: dimensions.height,
        };
        Self {
            use_panorama_viewer: true,
            projection_type: PROJECTION_EQUIRECTANGULAR,
            pose_heading_degrees: POSE_HEADING_DEGREES,
            full_pano_width: dimensions.width,
            full_pano_height: dimensions.height,
            cropped_area: frame.clone(),
            largest_valid_interior: frame,
            model: model.into(),
        }
    }

    pub fn exiftool_assignments(&self) -> Vec<String> {
        vec![
            format!(
                "-UsePanoramaViewer={}",
                if self.use_panorama_viewer { "True" } else { "False" }
            ),
            format!("-ProjectionType={}", self.projection_type),
            format!("-PoseHeadingDegrees={}", self.pose_heading_degrees),
            format!("-CroppedAreaLeftPixels={}", self.cropped_area.left),
            format!("-FullPanoWidthPixels={}", self.full_pano_width),
            format!("-CroppedAreaImageHeightPixels={}", self.cropped_area.height),
            format!("-FullPanoHeightPixels={}", self.full_pano_height),
            format!("-CroppedAreaImageWidthPixels={}", self.cropped_area.width),
            format!("-CroppedAreaTopPixels={}", self.cropped_area.top),
            format!(
                "-LargestValidInteriorRectLeft={}",
                self.largest_valid_interior.left
            ),
            format!(
                "-LargestValidInteriorRectTop={}",
                self.largest_valid_interior.top
            ),
            format!(
                "-LargestValidInteriorRectWidth={}",
                self.largest_valid_interior.width
            ),
            format!(
                "-LargestValidInteriorRectHeight={}",
                self.largest_valid_interior.height
            ),
            format!("-Model={}", self.model),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_frame_tags_never_crop() {
        for width in [2, 1000, 4097, 8192, 16384] {
            let dims = Dimensions::from_width(width);
            let tags = PanoramaTags::full_frame(dims, DEFAULT_MODEL_TAG);
            assert_eq!(tags.cropped_area.width, tags.full_pano_width);
            assert_eq!(tags.cropped_area.height, tags.full_pano_height);
            assert_eq!((tags.cropped_area.left, tags.cropped_area.top), (0, 0));
            assert_eq!(tags.largest_valid_interior, tags.cropped_area);
            assert_eq!(tags.full_pano_width, dims.width);
            assert_eq!(tags.full_pano_height, dims.height);
        }
    }

    #[test]
    fn exiftool_assignments_carry_projection_and_sizes() {
        let tags = PanoramaTags::full_frame(
            Dimensions {
                width: 4096,
                height: 2048,
            },
            "github fdd4s",
        );
        let args = tags.exiftool_assignments();
        for expected in [
            "-UsePanoramaViewer=True",
            "-ProjectionType=equirectangular",
            "-PoseHeadingDegrees=180.0",
            "-FullPanoWidthPixels=4096",
            "-FullPanoHeightPixels=2048",
            "-CroppedAreaImageWidthPixels=4096",
            "-CroppedAreaImageHeightPixels=2048",
            "-CroppedAreaLeftPixels=0",
            "-CroppedAreaTopPixels=0",
            "-LargestValidInteriorRectWidth=4096",
            "-LargestValidInteriorRectHeight=2048",
            "-Model=github fdd4s",
        ] {
            assert!(args.iter().any(|v| v == expected), "missing {expected}");
        }
    }
}

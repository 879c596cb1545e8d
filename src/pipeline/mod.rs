pub mod commit;
pub mod converter;
pub mod pathing;
pub mod runlog;
pub mod runtime;
pub mod runtime_stack;
pub mod scanner;
pub mod settings_layer;
pub mod temp_artifacts;
pub mod tool_adapters;

use std::path::{Path, PathBuf};

use serde::Serialize;

pub const FACE_COUNT: usize = 6;

/// Catalog face index feeding each slot of [`CubeFace::CANONICAL_ORDER`].
///
/// The catalog numbers faces `0..=5` as top, front, left, back, right, bottom,
/// so slot `i` of the canonical order takes catalog face `CATALOG_TO_CANONICAL[i]`.
pub const CATALOG_TO_CANONICAL: [usize; FACE_COUNT] = [1, 3, 4, 2, 0, 5];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CubeFace {
    Front,
    Back,
    Right,
    Left,
    Top,
    Bottom,
}

impl CubeFace {
    pub const CANONICAL_ORDER: [Self; FACE_COUNT] = [
        Self::Front,
        Self::Back,
        Self::Right,
        Self::Left,
        Self::Top,
        Self::Bottom,
    ];

    /// Tile order of the 6x1 strip consumed by the `c6x1` remap filter.
    pub const MONTAGE_ORDER: [Self; FACE_COUNT] = [
        Self::Left,
        Self::Right,
        Self::Top,
        Self::Bottom,
        Self::Front,
        Self::Back,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Front => "front",
            Self::Back => "back",
            Self::Right => "right",
            Self::Left => "left",
            Self::Top => "top",
            Self::Bottom => "bottom",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderedFaces {
    pub front: PathBuf,
    pub back: PathBuf,
    pub right: PathBuf,
    pub left: PathBuf,
    pub top: PathBuf,
    pub bottom: PathBuf,
}

impl OrderedFaces {
    pub fn from_catalog_order(catalog: &[PathBuf; FACE_COUNT]) -> Self {
        let slot = |i: usize| catalog[CATALOG_TO_CANONICAL[i]].clone();
        Self {
            front: slot(0),
            back: slot(1),
            right: slot(2),
            left: slot(3),
            top: slot(4),
            bottom: slot(5),
        }
    }

    pub fn face(&self, face: CubeFace) -> &Path {
        match face {
            CubeFace::Front => self.front.as_path(),
            CubeFace::Back => self.back.as_path(),
            CubeFace::Right => self.right.as_path(),
            CubeFace::Left => self.left.as_path(),
            CubeFace::Top => self.top.as_path(),
            CubeFace::Bottom => self.bottom.as_path(),
        }
    }

    pub fn montage_sequence(&self) -> [&Path; FACE_COUNT] {
        CubeFace::MONTAGE_ORDER.map(|face| self.face(face))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn from_width(width: u32) -> Self {
        Self {
            width,
            height: width / 2,
        }
    }

    /// A full 360x180 remap of a 6x1 strip needs four face widths across.
    pub fn from_face_width(face_width: u32) -> Option<Self> {
        face_width.checked_mul(4).map(Self::from_width)
    }

    pub fn scaled(self, scale: ScalePercent) -> Self {
        let percent = u64::from(scale.get());
        let scale_axis = |value: u32| {
            let scaled = u64::from(value) * percent / 100;
            u32::try_from(scaled).unwrap_or(u32::MAX)
        };
        Self {
            width: scale_axis(self.width),
            height: scale_axis(self.height),
        }
    }

    pub fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn geometry(self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ScalePercent(u8);

impl ScalePercent {
    pub const FULL: Self = Self(100);

    pub fn new(percent: u8) -> Option<Self> {
        (1..=100).contains(&percent).then_some(Self(percent))
    }

    pub fn get(self) -> u8 {
        self.0
    }

    pub fn is_full(self) -> bool {
        self.0 == 100
    }
}

impl Default for ScalePercent {
    fn default() -> Self {
        Self::FULL
    }
}

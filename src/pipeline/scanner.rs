use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::pipeline::converter::{ConversionJob, ConversionOutcome, SkyboxConverter};
use crate::pipeline::pathing::{equi_dir, is_jpeg_path};
use crate::pipeline::{Dimensions, OrderedFaces, ScalePercent, FACE_COUNT};
use crate::worker::ConversionState;

pub const DEFAULT_FACE_MARKER: &str = "skybox";
pub const OUTPUT_SUFFIX: &str = "equi.jpg";

/// File naming of one face: `<base><marker><index>.jpg`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaceNaming {
    marker: String,
}

impl FaceNaming {
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }

    pub fn parse(&self, file_name: &str) -> Option<(String, usize)> {
        let stem = strip_jpeg_extension(file_name)?;
        let digit = stem.chars().last()?;
        let index = digit.to_digit(10).map(|d| d as usize)?;
        if index >= FACE_COUNT {
            return None;
        }
        let before_index = &stem[..stem.len() - digit.len_utf8()];
        let base = before_index.strip_suffix(self.marker.as_str())?;
        Some((base.to_string(), index))
    }

    pub fn face_file_name(&self, base_name: &str, index: usize) -> String {
        format!("{base_name}{}{index}.jpg", self.marker)
    }

    pub fn output_file_name(&self, base_name: &str) -> String {
        format!("{base_name}{OUTPUT_SUFFIX}")
    }
}

impl Default for FaceNaming {
    fn default() -> Self {
        Self::new(DEFAULT_FACE_MARKER)
    }
}

fn strip_jpeg_extension(file_name: &str) -> Option<&str> {
    let dot = file_name.rfind('.')?;
    is_jpeg_path(Path::new(file_name)).then(|| &file_name[..dot])
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaceSet {
    pub base_name: String,
    pub faces: [PathBuf; FACE_COUNT],
}

impl FaceSet {
    pub fn ordered(&self) -> OrderedFaces {
        OrderedFaces::from_catalog_order(&self.faces)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveredSet {
    Complete(FaceSet),
    Incomplete { base_name: String, missing: Vec<usize> },
}

impl DiscoveredSet {
    pub fn base_name(&self) -> &str {
        match self {
            Self::Complete(set) => set.base_name.as_str(),
            Self::Incomplete { base_name, .. } => base_name.as_str(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScanStatus {
    Converted {
        output: PathBuf,
        dimensions: Dimensions,
    },
    SkippedExists {
        output: PathBuf,
    },
    SkippedMissingFaces {
        missing: Vec<usize>,
    },
    Failed {
        stage: ConversionState,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanOutcome {
    pub base_name: String,
    #[serde(flatten)]
    pub status: ScanStatus,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub converted: usize,
    pub skipped_exists: usize,
    pub skipped_missing_faces: usize,
    pub failed: usize,
}

impl ScanSummary {
    pub fn from_outcomes(outcomes: &[ScanOutcome]) -> Self {
        outcomes
            .iter()
            .fold(Self::default(), |mut summary, outcome| {
                match outcome.status {
                    ScanStatus::Converted { .. } => summary.converted += 1,
                    ScanStatus::SkippedExists { .. } => summary.skipped_exists += 1,
                    ScanStatus::SkippedMissingFaces { .. } => summary.skipped_missing_faces += 1,
                    ScanStatus::Failed { .. } => summary.failed += 1,
                }
                summary
            })
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("tour directory does not exist: {}", path.display())]
    TourDirMissing { path: PathBuf },
    #[error("failed to {operation} {}: {source}", path.display())]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub struct TourConversionScanner {
    converter: SkyboxConverter,
    naming: FaceNaming,
}

impl TourConversionScanner {
    pub fn new(converter: SkyboxConverter, naming: FaceNaming) -> Self {
        Self { converter, naming }
    }

    /// Groups face files by base name, ordered by base name.
    pub fn discover(&self, tour_dir: &Path) -> Result<Vec<DiscoveredSet>, ScanError> {
        if !tour_dir.is_dir() {
            return Err(ScanError::TourDirMissing {
                path: tour_dir.to_path_buf(),
            });
        }
        let entries = fs::read_dir(tour_dir)
            .and_then(|entries| entries.collect::<Result<Vec<_>, std::io::Error>>())
            .map_err(|source| ScanError::Io {
                operation: "list",
                path: tour_dir.to_path_buf(),
                source,
            })?;

        let mut groups: BTreeMap<String, [Option<PathBuf>; FACE_COUNT]> = BTreeMap::new();
        for entry in entries {
            let path = entry.path();
            let Some(file_name) = path.file_name().and_then(|v| v.to_str()) else {
                continue;
            };
            let Some((base_name, index)) = self.naming.parse(file_name) else {
                continue;
            };
            let usable = fs::metadata(path.as_path())
                .map(|meta| meta.is_file() && meta.len() > 0)
                .unwrap_or(false);
            let slots = groups.entry(base_name).or_default();
            if usable {
                slots[index] = Some(path);
            }
        }

        Ok(groups
            .into_iter()
            .map(|(base_name, slots)| {
                let missing: Vec<usize> = slots
                    .iter()
                    .enumerate()
                    .filter(|(_, slot)| slot.is_none())
                    .map(|(index, _)| index)
                    .collect();
                if !missing.is_empty() {
                    return DiscoveredSet::Incomplete { base_name, missing };
                }
                let faces = slots.map(Option::unwrap_or_default);
                DiscoveredSet::Complete(FaceSet { base_name, faces })
            })
            .collect())
    }

    pub fn scan_and_convert(
        &self,
        tour_dir: &Path,
        width: Option<u32>,
        scale: ScalePercent,
    ) -> Result<Vec<ScanOutcome>, ScanError> {
        let sets = self.discover(tour_dir)?;
        let output_dir = equi_dir(tour_dir);
        fs::create_dir_all(output_dir.as_path()).map_err(|source| ScanError::Io {
            operation: "create",
            path: output_dir.clone(),
            source,
        })?;
        info!(tour_dir = %tour_dir.display(), face_sets = sets.len(), "scanning tour for skybox face sets");

        let mut outcomes = Vec::with_capacity(sets.len());
        for set in sets {
            let base_name = set.base_name().to_string();
            let status = match set {
                DiscoveredSet::Incomplete { missing, .. } => {
                    warn!(base_name = %base_name, missing = ?missing, "face set incomplete; skipping");
                    ScanStatus::SkippedMissingFaces { missing }
                }
                DiscoveredSet::Complete(face_set) => {
                    let output = output_dir.join(self.naming.output_file_name(&base_name));
                    if output.exists() {
                        info!(base_name = %base_name, output = %output.display(), "output already exists; skipping");
                        ScanStatus::SkippedExists { output }
                    } else {
                        let job = ConversionJob::new(base_name.as_str(), face_set.ordered(), output)
                            .with_width(width)
                            .with_scale(scale);
                        self.run_job(&job)
                    }
                }
            };
            outcomes.push(ScanOutcome { base_name, status });
        }
        Ok(outcomes)
    }

    fn run_job(&self, job: &ConversionJob) -> ScanStatus {
        match self.converter.convert(job) {
            Ok(ConversionOutcome::Converted {
                output, dimensions, ..
            }) => ScanStatus::Converted { output, dimensions },
            Ok(ConversionOutcome::SkippedExists { output }) => ScanStatus::SkippedExists { output },
            Err(failure) => ScanStatus::Failed {
                stage: failure.stage,
                message: failure.error.diagnostic(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::runtime::StdPipelineCommandRunner;
    use crate::pipeline::temp_artifacts::TempArtifactManager;
    use crate::pipeline::tool_adapters::{CommandToolAdapters, ToolCommandTable};
    use std::sync::Arc;
    use std::time::{SystemTime, UNIX_EPOCH};

    // Discovery never reaches the tools, so a real runner is fine here.
    fn idle_scanner(temp_root: PathBuf, naming: FaceNaming) -> TourConversionScanner {
        let converter = SkyboxConverter::new(
            Arc::new(CommandToolAdapters::new(
                ToolCommandTable::default(),
                StdPipelineCommandRunner::default(),
            )),
            Arc::new(TempArtifactManager::new(temp_root)),
        );
        TourConversionScanner::new(converter, naming)
    }

    #[test]
    fn parses_catalog_face_names() {
        let naming = FaceNaming::default();
        assert_eq!(
            naming.parse("~-4k-0a1b-skybox3.jpg"),
            Some((String::from("~-4k-0a1b-"), 3))
        );
        assert_eq!(naming.parse("~-4k-0a1b-skybox6.jpg"), None);
        assert_eq!(naming.parse("~-4k-0a1b-skybox3.png"), None);
        assert_eq!(naming.parse("pano3.jpg"), None);
        assert_eq!(naming.parse("~-4k-0a1b-skybox3.jpg.part"), None);
    }

    #[test]
    fn empty_marker_uses_bare_index_suffix() {
        let naming = FaceNaming::new("");
        assert_eq!(naming.parse("pano0.jpg"), Some((String::from("pano"), 0)));
        assert_eq!(naming.parse("pano5.JPG"), Some((String::from("pano"), 5)));
        assert_eq!(naming.face_file_name("pano", 1), "pano1.jpg");
        assert_eq!(naming.output_file_name("pano"), "panoequi.jpg");
    }

    #[test]
    fn summary_counts_each_status() {
        let outcomes = vec![
            ScanOutcome {
                base_name: String::from("a"),
                status: ScanStatus::SkippedMissingFaces { missing: vec![2] },
            },
            ScanOutcome {
                base_name: String::from("b"),
                status: ScanStatus::Failed {
                    stage: ConversionState::Stitching,
                    message: String::from("boom"),
                },
            },
        ];
        let summary = ScanSummary::from_outcomes(&outcomes);
        assert_eq!(summary.skipped_missing_faces, 1);
        assert_eq!(summary.failed, 1);
        assert!(summary.has_failures());
    }

    #[test]
    fn discovery_groups_by_base_and_reports_missing_faces() {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time should be monotonic")
            .as_nanos();
        let root = std::env::temp_dir().join(format!("skybox_scanner_discover_{stamp}"));
        fs::create_dir_all(root.as_path()).expect("tour dir");
        let naming = FaceNaming::default();
        for index in 0..FACE_COUNT {
            fs::write(root.join(naming.face_file_name("b-", index)), b"face").expect("face");
            if index != 4 {
                fs::write(root.join(naming.face_file_name("a-", index)), b"face").expect("face");
            }
        }
        fs::write(root.join(naming.face_file_name("a-", 4)), b"").expect("empty face");
        fs::write(root.join("notes.txt"), b"ignored").expect("noise");

        let scanner = idle_scanner(root.join("tmp"), naming);
        let sets = scanner.discover(root.as_path()).expect("discover");

        assert_eq!(sets.len(), 2);
        assert_eq!(
            sets[0],
            DiscoveredSet::Incomplete {
                base_name: String::from("a-"),
                missing: vec![4]
            }
        );
        match &sets[1] {
            DiscoveredSet::Complete(set) => {
                assert_eq!(set.base_name, "b-");
                assert_eq!(set.faces[1], root.join("b-skybox1.jpg"));
            }
            other => panic!("expected complete set, got {other:?}"),
        }

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn missing_tour_dir_is_an_error() {
        let scanner = idle_scanner(std::env::temp_dir(), FaceNaming::default());
        let err = scanner
            .discover(Path::new("/definitely/not/a/tour"))
            .expect_err("missing dir");
        assert!(matches!(err, ScanError::TourDirMissing { .. }));
    }
}

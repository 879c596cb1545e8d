use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};

use crate::pipeline::commit::{commit_no_clobber, CommitError, CommitMode};
use crate::pipeline::temp_artifacts::{TempArtifactError, TempArtifactManager};
use crate::pipeline::tool_adapters::{
    PanoramaTags, SharedSkyboxToolOps, ToolAdapterError, DEFAULT_MODEL_TAG,
};
use crate::pipeline::{CubeFace, Dimensions, OrderedFaces, ScalePercent};
use crate::worker::{ConversionRun, ConversionState, StateTransitionError};

const STRIP_SUFFIX: &str = ".bmp";
const REMAP_SUFFIX: &str = ".bmp";
const FINAL_SUFFIX: &str = ".jpg";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionJob {
    pub base_name: String,
    pub faces: OrderedFaces,
    pub output: PathBuf,
    pub width: Option<u32>,
    pub scale: ScalePercent,
}

impl ConversionJob {
    pub fn new(base_name: impl Into<String>, faces: OrderedFaces, output: impl Into<PathBuf>) -> Self {
        Self {
            base_name: base_name.into(),
            faces,
            output: output.into(),
            width: None,
            scale: ScalePercent::FULL,
        }
    }

    pub fn with_width(mut self, width: Option<u32>) -> Self {
        self.width = width;
        self
    }

    pub fn with_scale(mut self, scale: ScalePercent) -> Self {
        self.scale = scale;
        self
    }

    fn validate(&self) -> Result<(), ConversionError> {
        if self.width == Some(0) {
            return Err(ConversionError::InvalidJob(String::from(
                "explicit width must be greater than zero",
            )));
        }
        for face in CubeFace::CANONICAL_ORDER {
            let path = self.faces.face(face);
            let usable = path
                .metadata()
                .map(|meta| meta.is_file() && meta.len() > 0)
                .unwrap_or(false);
            if !usable {
                return Err(ConversionError::InvalidJob(format!(
                    "{} face is missing or empty: {}",
                    face.as_str(),
                    path.display()
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ConversionOutcome {
    Converted {
        output: PathBuf,
        dimensions: Dimensions,
        commit: CommitMode,
    },
    SkippedExists {
        output: PathBuf,
    },
}

#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("invalid conversion job: {0}")]
    InvalidJob(String),
    #[error("{stage} stage failed: {source}")]
    ToolFailure {
        stage: ConversionState,
        #[source]
        source: ToolAdapterError,
    },
    #[error("could not determine native width of {}: {source}", path.display())]
    ProbeFailure {
        path: PathBuf,
        #[source]
        source: ToolAdapterError,
    },
    #[error(transparent)]
    TempArtifact(#[from] TempArtifactError),
    #[error(transparent)]
    Commit(#[from] CommitError),
    #[error(transparent)]
    InvalidTransition(#[from] StateTransitionError),
}

impl ConversionError {
    pub fn diagnostic(&self) -> String {
        match self {
            Self::ToolFailure { source, .. } | Self::ProbeFailure { source, .. } => {
                source.diagnostic()
            }
            other => other.to_string(),
        }
    }

    fn tool(stage: ConversionState) -> impl FnOnce(ToolAdapterError) -> Self {
        move |source| Self::ToolFailure { stage, source }
    }
}

#[derive(Debug, Error)]
#[error("conversion of {base_name} failed during {stage}: {error}")]
pub struct ConversionFailure {
    pub base_name: String,
    pub stage: ConversionState,
    #[source]
    pub error: ConversionError,
}

pub struct SkyboxConverter {
    tools: SharedSkyboxToolOps,
    temps: Arc<TempArtifactManager>,
    model_tag: String,
}

impl SkyboxConverter {
    pub fn new(tools: SharedSkyboxToolOps, temps: Arc<TempArtifactManager>) -> Self {
        Self {
            tools,
            temps,
            model_tag: String::from(DEFAULT_MODEL_TAG),
        }
    }

    pub fn with_model_tag(mut self, model_tag: impl Into<String>) -> Self {
        self.model_tag = model_tag.into();
        self
    }

    pub fn convert(&self, job: &ConversionJob) -> Result<ConversionOutcome, ConversionFailure> {
        let mut run = ConversionRun::new(job.base_name.as_str());
        match self.drive(job, &mut run) {
            Ok(outcome) => Ok(outcome),
            Err(error) => {
                let stage = run.fail();
                error!(
                    base_name = %job.base_name,
                    stage = %stage,
                    stages = ?run.visited(),
                    diagnostic = %error.diagnostic(),
                    "conversion failed"
                );
                Err(ConversionFailure {
                    base_name: job.base_name.clone(),
                    stage,
                    error,
                })
            }
        }
    }

    fn drive(
        &self,
        job: &ConversionJob,
        run: &mut ConversionRun,
    ) -> Result<ConversionOutcome, ConversionError> {
        if job.output.exists() {
            run.advance(ConversionState::Done)?;
            info!(base_name = %job.base_name, output = %job.output.display(), "output already exists; skipping");
            return Ok(ConversionOutcome::SkippedExists {
                output: job.output.clone(),
            });
        }
        job.validate()?;

        // Dropping the scope releases every intermediate on all exit paths.
        let mut scope = self.temps.scope();

        run.advance(ConversionState::Stitching)?;
        info!(base_name = %job.base_name, "stitching cube faces");
        let strip = scope.create(STRIP_SUFFIX)?;
        self.tools
            .stitch(&job.faces, strip.as_path())
            .map_err(ConversionError::tool(ConversionState::Stitching))?;

        run.advance(ConversionState::Dimensioning)?;
        let base = self.base_dimensions(job)?;
        let target = base.scaled(job.scale);
        if target.is_empty() {
            return Err(ConversionError::InvalidJob(format!(
                "{}% of {} leaves no pixels",
                job.scale.get(),
                base.geometry()
            )));
        }

        run.advance(ConversionState::Projecting)?;
        info!(base_name = %job.base_name, size = %base.geometry(), "projecting to equirectangular");
        let remap = scope.create(REMAP_SUFFIX)?;
        self.tools
            .project(strip.as_path(), remap.as_path(), base)
            .map_err(ConversionError::tool(ConversionState::Projecting))?;

        run.advance(ConversionState::Formatting)?;
        let mut product = scope.create(FINAL_SUFFIX)?;
        self.tools
            .format(remap.as_path(), product.as_path())
            .map_err(ConversionError::tool(ConversionState::Formatting))?;

        if !job.scale.is_full() {
            run.advance(ConversionState::Scaling)?;
            info!(base_name = %job.base_name, size = %target.geometry(), scale = job.scale.get(), "scaling panorama");
            let scaled = scope.create(FINAL_SUFFIX)?;
            self.tools
                .resize(product.as_path(), scaled.as_path(), target)
                .map_err(ConversionError::tool(ConversionState::Scaling))?;
            product = scaled;
        }

        run.advance(ConversionState::Tagging)?;
        let tags = PanoramaTags::full_frame(target, self.model_tag.as_str());
        self.tools
            .tag_panorama(product.as_path(), &tags)
            .map_err(ConversionError::tool(ConversionState::Tagging))?;

        run.advance(ConversionState::Committing)?;
        let commit = commit_no_clobber(product.as_path(), job.output.as_path())?;

        run.advance(ConversionState::Done)?;
        info!(
            base_name = %job.base_name,
            output = %job.output.display(),
            size = %target.geometry(),
            "panorama written"
        );
        Ok(ConversionOutcome::Converted {
            output: job.output.clone(),
            dimensions: target,
            commit,
        })
    }

    fn base_dimensions(&self, job: &ConversionJob) -> Result<Dimensions, ConversionError> {
        let dimensions = match job.width {
            Some(width) => Dimensions::from_width(width),
            None => {
                let front = job.faces.face(CubeFace::Front);
                let face_width = self
                    .tools
                    .probe_width(front)
                    .map_err(|source| ConversionError::ProbeFailure {
                        path: front.to_path_buf(),
                        source,
                    })?;
                Dimensions::from_face_width(face_width).ok_or_else(|| {
                    ConversionError::InvalidJob(format!("face width {face_width} is too large"))
                })?
            }
        };
        if dimensions.is_empty() {
            return Err(ConversionError::InvalidJob(format!(
                "output size {} is empty",
                dimensions.geometry()
            )));
        }
        Ok(dimensions)
    }
}

use serde::{Deserialize, Serialize};

pub const API_ORIGIN: &str = "https://my.matterport.com";
pub const FILENAME_PLACEHOLDER: &str = "{{filename}}";
pub const CATALOG_FILE_NAME: &str = "catalog.json";
pub const SKYBOX_MARKER: &str = "skybox";
pub const EXCLUDED_MARKERS: [&str; 3] = ["dds", "zip", "lased"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionTier {
    #[serde(rename = "4k")]
    FourK,
    #[serde(rename = "2k")]
    TwoK,
    High,
}

impl ResolutionTier {
    /// Highest first.
    pub const PRIORITY: [Self; 3] = [Self::FourK, Self::TwoK, Self::High];

    pub fn path_marker(self) -> &'static str {
        match self {
            Self::FourK => "/4k/",
            Self::TwoK => "/2k/",
            Self::High => "/high/",
        }
    }
}

pub fn is_skybox_asset(name: &str, tier: ResolutionTier) -> bool {
    name.contains(tier.path_marker())
        && name.contains("jpg")
        && name.contains(SKYBOX_MARKER)
        && !EXCLUDED_MARKERS.iter().any(|marker| name.contains(marker))
}

/// Falls back to the lowest tier when nothing better is listed.
pub fn select_resolution_tier(catalog: &[String]) -> ResolutionTier {
    ResolutionTier::PRIORITY
        .into_iter()
        .find(|tier| catalog.iter().any(|name| is_skybox_asset(name, *tier)))
        .unwrap_or(ResolutionTier::High)
}

pub fn eligible_skybox_assets(catalog: &[String], tier: ResolutionTier) -> Vec<String> {
    catalog
        .iter()
        .filter(|name| is_skybox_asset(name, tier))
        .cloned()
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUrlTemplate(String);

impl FileUrlTemplate {
    pub fn parse(raw: &str) -> Option<Self> {
        raw.contains(FILENAME_PLACEHOLDER)
            .then(|| Self(raw.to_string()))
    }

    pub fn resolve(&self, file_name: &str) -> String {
        self.0.replace(FILENAME_PLACEHOLDER, file_name)
    }

    pub fn catalog_url(&self) -> String {
        self.resolve(CATALOG_FILE_NAME)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelFilesResponse {
    #[serde(default)]
    pub templates: Vec<String>,
}

impl ModelFilesResponse {
    pub fn first_template(&self) -> Option<FileUrlTemplate> {
        self.templates.first().and_then(|raw| FileUrlTemplate::parse(raw))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogResponse {
    #[serde(default)]
    pub files: Vec<String>,
}

pub fn model_files_url(tour_id: &str) -> String {
    format!("{API_ORIGIN}/api/player/models/{tour_id}/files?type=3")
}

pub fn referer_url(tour_id: &str) -> String {
    format!("{API_ORIGIN}/show/?m={tour_id}")
}

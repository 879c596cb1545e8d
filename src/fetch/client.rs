use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::Duration;

use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, ORIGIN, REFERER};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::fetch::catalog::{
    eligible_skybox_assets, model_files_url, referer_url, select_resolution_tier,
    CatalogResponse, FileUrlTemplate, ModelFilesResponse, ResolutionTier, API_ORIGIN,
};
use crate::fetch::retry::{retry_with_policy, RetryPolicy};
use crate::pipeline::pathing::{local_asset_file_name, tour_dir};
use crate::pipeline::settings_layer::FetchSettings;

pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/107.0.0.0 Safari/537.36";
const JSON_ACCEPT: &str = "application/json";
const IMAGE_ACCEPT: &str = "image/png,image/*;q=0.8,*/*;q=0.5";
const PARTIAL_SUFFIX: &str = ".part";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },
    #[error("unexpected response from {url}: {message}")]
    Decode { url: String, message: String },
    #[error("tour {tour_id} exposes no file URL template")]
    MissingTemplate { tour_id: String },
    #[error("no skybox files found in catalog for tour {tour_id}")]
    NoSkyboxAssets { tour_id: String },
    #[error("failed to {operation} {}: {source}", path.display())]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to start download pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

impl FetchError {
    fn io(operation: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            operation,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// The remote side of a fetch: JSON documents and raw file downloads.
pub trait AssetTransport: Send + Sync {
    fn get_json(&self, url: &str, referer: &str) -> Result<Value, FetchError>;
    fn download(&self, url: &str, referer: &str, destination: &Path) -> Result<u64, FetchError>;
}

#[derive(Debug, Clone)]
pub struct HttpAssetTransport {
    client: Client,
}

impl HttpAssetTransport {
    pub fn new() -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(FetchError::Client)?;
        Ok(Self { client })
    }
}

impl AssetTransport for HttpAssetTransport {
    fn get_json(&self, url: &str, referer: &str) -> Result<Value, FetchError> {
        let resp = self
            .client
            .get(url)
            .header(REFERER, referer)
            .header(ACCEPT, JSON_ACCEPT)
            .header(ACCEPT_LANGUAGE, "en-US,en;q=0.5")
            .header("Cookie", "mp_mixpanel__c=0")
            .send()
            .map_err(|source| FetchError::Request {
                url: url.to_string(),
                source,
            })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        resp.json::<Value>().map_err(|e| FetchError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        })
    }

    fn download(&self, url: &str, referer: &str, destination: &Path) -> Result<u64, FetchError> {
        let mut resp = self
            .client
            .get(url)
            .header(REFERER, referer)
            .header(ACCEPT, IMAGE_ACCEPT)
            .header(ACCEPT_LANGUAGE, "en-US,en;q=0.5")
            .header(ORIGIN, API_ORIGIN)
            .send()
            .map_err(|source| FetchError::Request {
                url: url.to_string(),
                source,
            })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let mut file =
            File::create(destination).map_err(|e| FetchError::io("create", destination, e))?;
        resp.copy_to(&mut file).map_err(|source| FetchError::Request {
            url: url.to_string(),
            source,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AssetStatus {
    Downloaded { bytes: u64, attempts: u32 },
    SkippedExists,
    Failed { attempts: u32, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchedAsset {
    pub catalog_name: String,
    pub local_path: PathBuf,
    #[serde(flatten)]
    pub status: AssetStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchReport {
    pub tour_id: String,
    pub tier: ResolutionTier,
    pub assets: Vec<FetchedAsset>,
}

impl FetchReport {
    pub fn failures(&self) -> impl Iterator<Item = &FetchedAsset> {
        self.assets
            .iter()
            .filter(|asset| matches!(asset.status, AssetStatus::Failed { .. }))
    }

    pub fn failed_count(&self) -> usize {
        self.failures().count()
    }

    pub fn downloaded_count(&self) -> usize {
        self.assets
            .iter()
            .filter(|asset| matches!(asset.status, AssetStatus::Downloaded { .. }))
            .count()
    }
}

pub struct TourFetcher<T> {
    transport: T,
    tours_root: PathBuf,
    concurrency: usize,
    retry: RetryPolicy,
}

impl<T> TourFetcher<T>
where
    T: AssetTransport,
{
    pub fn new(transport: T, tours_root: impl Into<PathBuf>, settings: &FetchSettings) -> Self {
        Self {
            transport,
            tours_root: tours_root.into(),
            concurrency: settings.concurrency.max(1),
            retry: RetryPolicy::new(settings.max_attempts, settings.backoff),
        }
    }

    pub fn resolve_template(&self, tour_id: &str) -> Result<FileUrlTemplate, FetchError> {
        let url = model_files_url(tour_id);
        let value = self
            .transport
            .get_json(url.as_str(), referer_url(tour_id).as_str())?;
        let files: ModelFilesResponse =
            serde_json::from_value(value).map_err(|e| FetchError::Decode {
                url: url.clone(),
                message: e.to_string(),
            })?;
        files
            .first_template()
            .ok_or_else(|| FetchError::MissingTemplate {
                tour_id: tour_id.to_string(),
            })
    }

    pub fn list_catalog(
        &self,
        tour_id: &str,
        template: &FileUrlTemplate,
    ) -> Result<Vec<String>, FetchError> {
        let url = template.catalog_url();
        let value = self
            .transport
            .get_json(url.as_str(), referer_url(tour_id).as_str())?;
        let catalog: CatalogResponse =
            serde_json::from_value(value).map_err(|e| FetchError::Decode {
                url: url.clone(),
                message: e.to_string(),
            })?;
        Ok(catalog.files)
    }

    /// Downloads the best tier of skybox faces into `<tours_root>/<tour_id>`.
    ///
    /// Individual download failures are recorded in the report; only catalog
    /// problems abort the whole fetch.
    pub fn fetch_tour(&self, tour_id: &str) -> Result<FetchReport, FetchError> {
        let template = self.resolve_template(tour_id)?;
        let catalog = self.list_catalog(tour_id, &template)?;
        let tier = select_resolution_tier(&catalog);
        let assets = eligible_skybox_assets(&catalog, tier);
        if assets.is_empty() {
            return Err(FetchError::NoSkyboxAssets {
                tour_id: tour_id.to_string(),
            });
        }
        info!(tour_id, tier = tier.path_marker(), count = assets.len(), "found skybox files to download");

        let dir = tour_dir(self.tours_root.as_path(), tour_id);
        fs::create_dir_all(dir.as_path()).map_err(|e| FetchError::io("create", dir.as_path(), e))?;

        let referer = referer_url(tour_id);
        let pool = ThreadPoolBuilder::new()
            .num_threads(self.concurrency)
            .build()?;
        let fetched = pool.install(|| {
            assets
                .par_iter()
                .map(|name| self.fetch_one(&template, referer.as_str(), dir.as_path(), name))
                .collect::<Vec<_>>()
        });

        Ok(FetchReport {
            tour_id: tour_id.to_string(),
            tier,
            assets: fetched,
        })
    }

    fn fetch_one(
        &self,
        template: &FileUrlTemplate,
        referer: &str,
        dir: &Path,
        catalog_name: &str,
    ) -> FetchedAsset {
        let local_name = local_asset_file_name(catalog_name);
        let local_path = dir.join(local_name.as_str());
        let existing = fs::metadata(local_path.as_path())
            .map(|meta| meta.is_file() && meta.len() > 0)
            .unwrap_or(false);
        if existing {
            info!(file = %local_name, "already downloaded; skipping");
            return FetchedAsset {
                catalog_name: catalog_name.to_string(),
                local_path,
                status: AssetStatus::SkippedExists,
            };
        }

        let url = template.resolve(catalog_name);
        let partial = dir.join(format!("{local_name}{PARTIAL_SUFFIX}"));
        let result = retry_with_policy(&self.retry, local_name.as_str(), |_| {
            let outcome = self
                .transport
                .download(url.as_str(), referer, partial.as_path())
                .and_then(|bytes| {
                    fs::rename(partial.as_path(), local_path.as_path())
                        .map(|()| bytes)
                        .map_err(|e| FetchError::io("rename", local_path.as_path(), e))
                });
            if outcome.is_err() {
                let _ = fs::remove_file(partial.as_path());
            }
            outcome
        });

        let status = match result {
            Ok(done) => {
                info!(file = %local_name, bytes = done.value, "downloaded");
                AssetStatus::Downloaded {
                    bytes: done.value,
                    attempts: done.attempts,
                }
            }
            Err(exhausted) => {
                warn!(file = %local_name, error = %exhausted, "download failed");
                AssetStatus::Failed {
                    attempts: exhausted.attempts,
                    message: exhausted.last_error.to_string(),
                }
            }
        };
        FetchedAsset {
            catalog_name: catalog_name.to_string(),
            local_path,
            status,
        }
    }
}

pub fn default_tour_fetcher(
    tours_root: impl Into<PathBuf>,
    settings: &FetchSettings,
) -> Result<TourFetcher<HttpAssetTransport>, FetchError> {
    Ok(TourFetcher::new(
        HttpAssetTransport::new()?,
        tours_root,
        settings,
    ))
}

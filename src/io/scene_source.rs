//! Imagery providers
//!
//! [`ImagerySource`] is the seam between the detector and wherever scenes
//! come from. [`SceneCatalog`] reads multi-band GeoTIFF scenes listed in a
//! JSON catalog (local paths or http(s) URLs cached on disk) and samples
//! them onto the requested grid. [`RetryingSource`] adds bounded
//! exponential backoff for transient provider failures.

use chrono::NaiveDate;
use gdal::Dataset;
use ndarray::Array2;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::RetryPolicy;
use crate::core::composite::DateWindow;
use crate::types::{BoundingBox, BurnError, BurnResult, GeoTransform, GridSpec, Observation, RasterImage};

/// Source of dated reflectance observations
pub trait ImagerySource: Send + Sync {
    /// Observations dated inside `window` that intersect `grid`, sampled onto it
    fn observations(&self, grid: &GridSpec, window: &DateWindow) -> BurnResult<Vec<Observation>>;

    /// Name used in logs and errors
    fn name(&self) -> &str;
}

/// One scene in a catalog
#[derive(Debug, Clone, Deserialize)]
pub struct SceneEntry {
    pub id: String,
    pub date: NaiveDate,
    /// Local path (relative to the catalog) or http(s) URL
    pub path: String,
    /// Band name -> 1-based band index in the file
    pub bands: BTreeMap<String, usize>,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    scenes: Vec<SceneEntry>,
}

/// Cache file name for a remote entry: `<id>_<url basename>`.
/// Hosted scenes often share a basename (`.../S2A_x/scene.tif`), so the
/// entry id keeps them apart.
fn cache_file_name(entry: &SceneEntry) -> String {
    let id: String = entry
        .id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect();
    let base = entry
        .path
        .split(|c| c == '?' || c == '#')
        .next()
        .and_then(|p| p.rsplit('/').next())
        .filter(|s| !s.is_empty());
    match base {
        Some(base) => format!("{}_{}", id, base),
        None => format!("{}.tif", id),
    }
}

/// JSON-described collection of GeoTIFF scenes
pub struct SceneCatalog {
    name: String,
    entries: Vec<SceneEntry>,
    base_dir: PathBuf,
    cache_dir: PathBuf,
    client: reqwest::blocking::Client,
}

impl SceneCatalog {
    pub fn new(entries: Vec<SceneEntry>, base_dir: PathBuf, cache_dir: PathBuf) -> BurnResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(300))
            .user_agent("burnmosaic/0.1 (burned area mapping)")
            .build()
            .map_err(|e| BurnError::Processing(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            name: format!("catalog:{}", base_dir.display()),
            entries,
            base_dir,
            cache_dir,
            client,
        })
    }

    /// Load a catalog file; relative scene paths resolve against its directory
    pub fn from_json_file<P: AsRef<Path>>(path: P, cache_dir: PathBuf) -> BurnResult<Self> {
        let path = path.as_ref();
        log::info!("Loading scene catalog: {}", path.display());
        let text = std::fs::read_to_string(path).map_err(|e| BurnError::SourceUnavailable {
            provider: path.display().to_string(),
            reason: e.to_string(),
            transient: false,
        })?;
        let catalog: CatalogFile = serde_json::from_str(&text)?;
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        log::info!("Catalog lists {} scenes", catalog.scenes.len());
        Self::new(catalog.scenes, base_dir, cache_dir)
    }

    pub fn entries(&self) -> &[SceneEntry] {
        &self.entries
    }

    fn is_remote(path: &str) -> bool {
        path.starts_with("http://") || path.starts_with("https://")
    }

    /// Local file for an entry, downloading remote scenes into the cache
    fn local_path(&self, entry: &SceneEntry) -> BurnResult<PathBuf> {
        if !Self::is_remote(&entry.path) {
            let p = PathBuf::from(&entry.path);
            return Ok(if p.is_absolute() { p } else { self.base_dir.join(p) });
        }

        let cached = self.cache_dir.join(cache_file_name(entry));
        if cached.exists() {
            log::debug!("Using cached scene {}", cached.display());
            return Ok(cached);
        }
        std::fs::create_dir_all(&self.cache_dir)?;
        self.download(&entry.path, &cached)?;
        Ok(cached)
    }

    fn download(&self, url: &str, output_path: &Path) -> BurnResult<()> {
        use std::io::Write;

        log::info!("Downloading scene from: {}", url);
        let response = self.client.get(url).send().map_err(|e| BurnError::SourceUnavailable {
            provider: url.to_string(),
            reason: format!("HTTP request failed: {}", e),
            transient: e.is_timeout() || e.is_connect() || e.is_request(),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(BurnError::SourceUnavailable {
                provider: url.to_string(),
                reason: format!(
                    "HTTP {} {}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("")
                ),
                transient: status.as_u16() == 429 || status.is_server_error(),
            });
        }

        let content = response.bytes().map_err(|e| BurnError::SourceUnavailable {
            provider: url.to_string(),
            reason: format!("Failed to read response body: {}", e),
            transient: true,
        })?;
        log::debug!("Downloaded {} bytes", content.len());

        // Stage next to the destination so a partial download never looks cached
        let mut staged = tempfile::NamedTempFile::new_in(&self.cache_dir)?;
        staged.write_all(&content)?;
        staged
            .persist(output_path)
            .map_err(|e| BurnError::Io(e.error))?;
        Ok(())
    }

    fn read_entry(&self, entry: &SceneEntry, grid: &GridSpec) -> BurnResult<Option<Observation>> {
        let path = self.local_path(entry)?;
        let dataset = Dataset::open(&path).map_err(|e| BurnError::SourceUnavailable {
            provider: path.display().to_string(),
            reason: e.to_string(),
            transient: false,
        })?;

        let epsg = dataset_epsg(&dataset)?;
        if epsg != grid.epsg {
            return Err(BurnError::Processing(format!(
                "Scene {} is in EPSG:{}, study grid is EPSG:{}",
                entry.id, epsg, grid.epsg
            )));
        }

        let (width, height) = dataset.raster_size();
        let transform = GeoTransform::from_gdal(dataset.geo_transform()?);
        let scene_grid = GridSpec::new(height, width, transform, epsg);
        if !intersects(&scene_grid.bounds(), &grid.bounds()) {
            return Ok(None);
        }

        // Nearest source pixel for every target pixel centre
        let lookup = Array2::from_shape_fn(grid.shape(), |(r, c)| {
            let (x, y) = grid.transform.pixel_center(r, c);
            scene_grid.pixel_of(x, y)
        });
        let Some(block) = source_block(&lookup) else {
            return Ok(None);
        };

        let mut image = RasterImage::new(grid.clone());
        for (band_name, &index) in &entry.bands {
            let rasterband = dataset.rasterband(index as isize).map_err(|_| BurnError::MissingBand {
                band: band_name.clone(),
                scene: entry.id.clone(),
            })?;
            let nodata = rasterband.no_data_value();
            let (r0, c0, rows, cols) = block;
            let buffer = rasterband.read_as::<f32>(
                (c0 as isize, r0 as isize),
                (cols, rows),
                (cols, rows),
                None,
            )?;
            let data = Array2::from_shape_vec((rows, cols), buffer.data)
                .map_err(|e| BurnError::Processing(format!("Failed to reshape scene band: {}", e)))?;

            let sampled = lookup.mapv(|hit| match hit {
                Some((sr, sc)) => {
                    let v = data[[sr - r0, sc - c0]];
                    if nodata.map_or(false, |nd| f64::from(v) == nd) {
                        f32::NAN
                    } else {
                        v
                    }
                }
                None => f32::NAN,
            });
            image.insert_band(band_name, sampled)?;
        }

        Ok(Some(Observation {
            scene_id: entry.id.clone(),
            date: entry.date,
            image,
        }))
    }
}

impl ImagerySource for SceneCatalog {
    fn observations(&self, grid: &GridSpec, window: &DateWindow) -> BurnResult<Vec<Observation>> {
        let mut observations = Vec::new();
        for entry in self.entries.iter().filter(|e| window.contains(e.date)) {
            if let Some(obs) = self.read_entry(entry, grid)? {
                observations.push(obs);
            }
        }
        log::debug!(
            "{}: {} scenes in {} intersect the request",
            self.name,
            observations.len(),
            window
        );
        Ok(observations)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// EPSG code of a dataset's spatial reference
pub fn dataset_epsg(dataset: &Dataset) -> BurnResult<u32> {
    let srs = dataset.spatial_ref()?;
    let code = srs
        .auth_code()
        .map_err(|e| BurnError::InvalidFormat(format!("raster CRS has no EPSG code: {}", e)))?;
    u32::try_from(code).map_err(|_| BurnError::InvalidFormat(format!("invalid EPSG code {}", code)))
}

fn intersects(a: &BoundingBox, b: &BoundingBox) -> bool {
    a.min_x < b.max_x && b.min_x < a.max_x && a.min_y < b.max_y && b.min_y < a.max_y
}

/// Smallest source block (row, col, rows, cols) covering all lookups
fn source_block(lookup: &Array2<Option<(usize, usize)>>) -> Option<(usize, usize, usize, usize)> {
    let hits: Vec<(usize, usize)> = lookup.iter().flatten().copied().collect();
    let r0 = hits.iter().map(|h| h.0).min()?;
    let r1 = hits.iter().map(|h| h.0).max()?;
    let c0 = hits.iter().map(|h| h.1).min()?;
    let c1 = hits.iter().map(|h| h.1).max()?;
    Some((r0, c0, r1 - r0 + 1, c1 - c0 + 1))
}

/// Run `op`, retrying transient failures with exponential backoff.
/// Once the budget is spent the failure becomes a permanent `SourceUnavailable`.
pub fn retry_with_backoff<T, F>(policy: &RetryPolicy, label: &str, mut op: F) -> BurnResult<T>
where
    F: FnMut() -> BurnResult<T>,
{
    let mut delay = Duration::from_millis(policy.initial_backoff_ms);
    let max_delay = Duration::from_millis(policy.max_backoff_ms);
    let mut attempt = 1;

    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                log::warn!(
                    "{}: attempt {} of {} failed ({}), retrying in {:?}",
                    label,
                    attempt,
                    policy.max_attempts,
                    e,
                    delay
                );
                std::thread::sleep(delay);
                delay = (delay * 2).min(max_delay);
                attempt += 1;
            }
            Err(e) if e.is_transient() => {
                return Err(BurnError::SourceUnavailable {
                    provider: label.to_string(),
                    reason: format!("gave up after {} attempts: {}", attempt, e),
                    transient: false,
                });
            }
            Err(e) => return Err(e),
        }
    }
}

/// Decorator adding bounded exponential backoff to any source
pub struct RetryingSource<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S: ImagerySource> RetryingSource<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: ImagerySource> ImagerySource for RetryingSource<S> {
    fn observations(&self, grid: &GridSpec, window: &DateWindow) -> BurnResult<Vec<Observation>> {
        retry_with_backoff(&self.policy, self.inner.name(), || self.inner.observations(grid, window))
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

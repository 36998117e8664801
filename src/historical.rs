//! Historical single-file export
//!
//! Daily and monthly aggregates live in one CSV per (client, site,
//! timeframe). The file is returned as-is, with `Time` relabelled for the
//! timeframe. For demo requests the measured columns are replaced by values
//! derived from the modelled ones:
//!
//! - `Ground POA` = `POA` × jitter
//! - `Ground GHI` = `GHI` × jitter
//!
//! Each derived column draws its own factor.

use std::io::ErrorKind;
use std::path::PathBuf;

use rand::Rng;
use tracing::{debug, info};

use crate::config::{ForecastConfig, JitterBand};
use crate::csv_parser::parse_table_csv;
use crate::error::{ForecastError, InputError, SourceError};
use crate::perturb::jitter_value;
use crate::request::{resolve_demo_identity, RequestParams};
use crate::revision::{GROUND_GHI_COLUMN, GROUND_POA_COLUMN};
use crate::source::render_template;
use crate::types::{ExportOutcome, Granularity, MergedTable, Row, FILE_NOT_FOUND};

/// Derived column and the modelled column it comes from
const DERIVED_COLUMNS: [(&str, &str); 2] = [(GROUND_POA_COLUMN, "POA"), (GROUND_GHI_COLUMN, "GHI")];

#[derive(Debug, Clone, PartialEq)]
pub struct HistoricalRequest {
    pub client: String,
    pub site: String,
    pub granularity: Granularity,
    pub is_demo: bool,
}

impl HistoricalRequest {
    /// `client`, `site` and `timeframe` are required
    pub fn from_params(
        params: &RequestParams,
        config: &ForecastConfig,
    ) -> Result<Self, InputError> {
        let client = non_blank(&params.client, "client")?;
        let site = non_blank(&params.site, "site")?;
        let timeframe = non_blank(&params.timeframe, "timeframe")?;

        let (client, site, is_demo) = resolve_demo_identity(client, site, config);
        Ok(Self {
            client,
            site,
            granularity: Granularity::parse(timeframe),
            is_demo,
        })
    }
}

fn non_blank<'a>(value: &'a Option<String>, name: &'static str) -> Result<&'a str, InputError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(InputError::MissingParameter(name))
}

pub struct HistoricalExporter {
    data_root: PathBuf,
    layout: String,
    band: JitterBand,
}

impl HistoricalExporter {
    pub fn new(config: &ForecastConfig) -> Self {
        Self {
            data_root: config.data_root.clone(),
            layout: config.historical_layout.clone(),
            band: config.historical_jitter,
        }
    }

    pub fn path_for(&self, request: &HistoricalRequest) -> PathBuf {
        let label = request.granularity.label();
        let lower = label.to_lowercase();
        self.data_root.join(render_template(
            &self.layout,
            &[
                ("client", request.client.as_str()),
                ("site", request.site.as_str()),
                ("granularity_lower", lower.as_str()),
                ("granularity", label),
            ],
        ))
    }

    /// Read the historical file and build the export
    pub async fn export<R: Rng + Send>(
        &self,
        request: &HistoricalRequest,
        rng: &mut R,
    ) -> Result<ExportOutcome, ForecastError> {
        let path = self.path_for(request);

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "Historical file not found");
                return Ok(ExportOutcome::NotFound(FILE_NOT_FOUND));
            }
            Err(e) => {
                return Err(SourceError::Io {
                    path: path.display().to_string(),
                    message: e.to_string(),
                }
                .into())
            }
        };

        let (mut header, mut rows) = parse_table_csv(&content)?;
        if request.is_demo {
            derive_ground_columns(&mut header, &mut rows, self.band, rng);
        }

        info!(
            client = %request.client,
            site = %request.site,
            rows = rows.len(),
            columns = header.len(),
            "Historical export ready"
        );

        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}_{}.csv", request.client, request.site));

        Ok(ExportOutcome::Csv {
            filename,
            table: MergedTable {
                header,
                rows,
                granularity: request.granularity.clone(),
            },
        })
    }
}

/// Overwrite the ground columns with jittered copies of the modelled ones
///
/// Missing derived columns are appended to the header. A row whose source
/// value is null or not numeric gets no derived value.
pub fn derive_ground_columns<R: Rng>(
    header: &mut Vec<String>,
    rows: &mut [Row],
    band: JitterBand,
    rng: &mut R,
) {
    for (derived, _) in DERIVED_COLUMNS {
        if !header.iter().any(|c| c == derived) {
            header.push(derived.to_string());
        }
    }

    for row in rows.iter_mut() {
        for (derived, source) in DERIVED_COLUMNS {
            let factor = draw(band, rng);
            match row.get(source).and_then(|raw| jitter_value(raw, factor)) {
                Some(value) => row.set(derived, value),
                None => {
                    row.remove(derived);
                }
            }
        }
    }
}

fn draw<R: Rng>(band: JitterBand, rng: &mut R) -> f64 {
    if band.low >= band.high {
        band.low
    } else {
        rng.gen_range(band.low..=band.high)
    }
}

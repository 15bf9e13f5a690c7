//! Competition data download, unzip and CSV loading into the executor.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use csv::StringRecord;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use zip::ZipArchive;

use crate::executor::{ExecutorError, QueryExecutor, Table, Value};

const KAGGLE_API_BASE_URL: &str = "https://www.kaggle.com/api/v1";
const ZIP_MAGIC: &[u8; 4] = b"PK\x03\x04";
const PREVIEW_ROWS: usize = 10;

pub const DEFAULT_COMPETITION: &str = "h-and-m-personalized-fashion-recommendations";
pub const COMPETITION_FILES: [&str; 3] = ["articles.csv", "customers.csv", "transactions_train.csv"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetConfig {
    pub data_root: PathBuf,
    pub competition: String,
    pub files: Vec<String>,
    /// `kaggle.json`; `None` looks under `$KAGGLE_CONFIG_DIR` then `~/.kaggle`.
    pub credentials_path: Option<PathBuf>,
    pub http_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("data"),
            competition: DEFAULT_COMPETITION.to_string(),
            files: COMPETITION_FILES.iter().map(|f| f.to_string()).collect(),
            credentials_path: None,
            http_timeout_ms: 600_000,
            max_retries: 2,
            retry_backoff_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct KaggleCredentials {
    pub username: String,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocalFileSource {
    Cached,
    Downloaded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalFile {
    pub file_name: String,
    pub local_path: PathBuf,
    pub source: LocalFileSource,
}

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP client build error: {0}")]
    HttpClientBuild(String),
    #[error("HTTP request failed for {url}: {message}")]
    HttpRequest { url: String, message: String },
    #[error("kaggle credentials not found; looked in {0}")]
    MissingCredentials(String),
    #[error("invalid kaggle credentials file {path}: {message}")]
    InvalidCredentials { path: PathBuf, message: String },
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("archive entry '{0}' escapes the destination directory")]
    UnsafeZipEntry(String),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("CSV file {path} has no header row")]
    MissingHeader { path: PathBuf },
    #[error("failed to parse field {field} value '{value}'")]
    ParseField { field: String, value: String },
    #[error("cannot derive a table name from {0}")]
    InvalidFileName(PathBuf),
    #[error("executor error: {0}")]
    Executor(#[from] ExecutorError),
}

pub(crate) trait HttpFetcher {
    fn get_bytes(&self, url: &str) -> Result<Vec<u8>, DatasetError>;
}

struct ReqwestBlockingFetcher {
    client: reqwest::blocking::Client,
    credentials: KaggleCredentials,
}

impl ReqwestBlockingFetcher {
    fn new(timeout_ms: u64, credentials: KaggleCredentials) -> Result<Self, DatasetError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .build()
            .map_err(|err| DatasetError::HttpClientBuild(err.to_string()))?;
        Ok(Self {
            client,
            credentials,
        })
    }
}

impl HttpFetcher for ReqwestBlockingFetcher {
    fn get_bytes(&self, url: &str) -> Result<Vec<u8>, DatasetError> {
        let response = self
            .client
            .get(url)
            .basic_auth(&self.credentials.username, Some(&self.credentials.key))
            .send()
            .map_err(|err| DatasetError::HttpRequest {
                url: url.to_string(),
                message: err.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DatasetError::HttpRequest {
                url: url.to_string(),
                message: format!("unexpected HTTP status {status}"),
            });
        }

        response
            .bytes()
            .map(|bytes| bytes.to_vec())
            .map_err(|err| DatasetError::HttpRequest {
                url: url.to_string(),
                message: err.to_string(),
            })
    }
}

/// Downloads the competition files and unpacks them next to each other.
pub struct KaggleDataset;

impl KaggleDataset {
    pub fn load(cfg: &DatasetConfig) -> Result<Vec<LocalFile>, DatasetError> {
        let credentials = load_credentials(cfg)?;
        let fetcher = ReqwestBlockingFetcher::new(cfg.http_timeout_ms, credentials)?;
        let local = sync_files_with_fetcher(cfg, &fetcher)?;
        unzip_all(&cfg.data_root, &cfg.data_root)?;
        Ok(local)
    }
}

pub fn competition_file_url(competition: &str, file_name: &str) -> String {
    format!("{KAGGLE_API_BASE_URL}/competitions/data/download/{competition}/{file_name}")
}

pub fn load_credentials(cfg: &DatasetConfig) -> Result<KaggleCredentials, DatasetError> {
    if let (Ok(username), Ok(key)) = (
        std::env::var("KAGGLE_USERNAME"),
        std::env::var("KAGGLE_KEY"),
    ) {
        if !username.trim().is_empty() && !key.trim().is_empty() {
            return Ok(KaggleCredentials { username, key });
        }
    }

    let path = match &cfg.credentials_path {
        Some(path) => path.clone(),
        None => default_credentials_path().ok_or_else(|| {
            DatasetError::MissingCredentials("$KAGGLE_CONFIG_DIR, $HOME/.kaggle".to_string())
        })?,
    };
    if !path.exists() {
        return Err(DatasetError::MissingCredentials(
            path.display().to_string(),
        ));
    }

    let raw = fs::read(&path)?;
    serde_json::from_slice(&raw).map_err(|err| DatasetError::InvalidCredentials {
        path,
        message: err.to_string(),
    })
}

fn default_credentials_path() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var("KAGGLE_CONFIG_DIR") {
        return Some(PathBuf::from(dir).join("kaggle.json"));
    }
    std::env::var("HOME")
        .ok()
        .map(|home| PathBuf::from(home).join(".kaggle").join("kaggle.json"))
}

pub(crate) fn sync_files_with_fetcher(
    cfg: &DatasetConfig,
    fetcher: &dyn HttpFetcher,
) -> Result<Vec<LocalFile>, DatasetError> {
    fs::create_dir_all(&cfg.data_root)?;
    info!(
        component = "dataset",
        event = "dataset.sync.start",
        competition = %cfg.competition,
        file_count = cfg.files.len(),
        data_root = %cfg.data_root.display()
    );

    let mut local = Vec::with_capacity(cfg.files.len());
    for file_name in &cfg.files {
        let plain_path = cfg.data_root.join(file_name);
        let zip_path = cfg.data_root.join(format!("{file_name}.zip"));

        if plain_path.exists() || zip_path.exists() {
            let local_path = if plain_path.exists() { plain_path } else { zip_path };
            info!(
                component = "dataset",
                event = "dataset.sync.file.cached",
                file = %file_name,
                path = %local_path.display()
            );
            local.push(LocalFile {
                file_name: file_name.clone(),
                local_path,
                source: LocalFileSource::Cached,
            });
            continue;
        }

        let url = competition_file_url(&cfg.competition, file_name);
        let bytes = retry(cfg, || fetcher.get_bytes(&url))?;
        let local_path = if bytes.starts_with(ZIP_MAGIC) {
            zip_path
        } else {
            plain_path
        };
        write_atomic(&local_path, &bytes)?;

        info!(
            component = "dataset",
            event = "dataset.sync.file.downloaded",
            file = %file_name,
            path = %local_path.display(),
            bytes = bytes.len()
        );
        debug!(
            component = "dataset",
            event = "dataset.sync.file.downloaded.debug",
            url = %url
        );

        local.push(LocalFile {
            file_name: file_name.clone(),
            local_path,
            source: LocalFileSource::Downloaded,
        });
    }

    Ok(local)
}

/// Extracts every `.zip` in `zip_dir` into `destination_dir`, overwriting.
pub fn unzip_all(zip_dir: &Path, destination_dir: &Path) -> Result<Vec<PathBuf>, DatasetError> {
    fs::create_dir_all(destination_dir)?;

    let mut zips: Vec<PathBuf> = fs::read_dir(zip_dir)?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| {
            path.extension()
                .map(|ext| ext.eq_ignore_ascii_case("zip"))
                .unwrap_or(false)
        })
        .collect();
    zips.sort();

    let mut extracted = Vec::new();
    for zip_path in zips {
        let file = fs::File::open(&zip_path)?;
        let mut archive = ZipArchive::new(file)?;
        for idx in 0..archive.len() {
            let mut entry = archive.by_index(idx)?;
            if entry.is_dir() {
                continue;
            }
            let relative = entry
                .enclosed_name()
                .ok_or_else(|| DatasetError::UnsafeZipEntry(entry.name().to_string()))?;
            let out_path = destination_dir.join(relative);
            if let Some(parent) = out_path.parent() {
                fs::create_dir_all(parent)?;
            }
            write_atomic_from(&out_path, &mut entry)?;
            extracted.push(out_path);
        }
        info!(
            component = "dataset",
            event = "dataset.unzip.finish",
            archive = %zip_path.display()
        );
    }

    Ok(extracted)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnOverride {
    Date,
    Utf8,
}

/// Column type overrides applied when reading the competition CSVs.
pub fn default_schema_overrides() -> HashMap<String, ColumnOverride> {
    HashMap::from([
        ("t_dat".to_string(), ColumnOverride::Date),
        ("article_id".to_string(), ColumnOverride::Utf8),
    ])
}

/// A set of CSV files registered as tables of one executor.
#[derive(Debug, Clone)]
pub struct CsvDataset {
    path: PathBuf,
    files: Vec<String>,
    overrides: HashMap<String, ColumnOverride>,
}

impl CsvDataset {
    pub fn new(csv_path: impl Into<PathBuf>, csv_files: Vec<String>) -> Self {
        Self {
            path: csv_path.into(),
            files: csv_files,
            overrides: default_schema_overrides(),
        }
    }

    pub fn with_overrides(mut self, overrides: HashMap<String, ColumnOverride>) -> Self {
        self.overrides = overrides;
        self
    }

    /// Registers every file, returning the table names in file order.
    pub fn load(&self, executor: &mut dyn QueryExecutor) -> Result<Vec<String>, DatasetError> {
        let mut names = Vec::with_capacity(self.files.len());
        for file in &self.files {
            let path = self.path.join(file);
            let table_name = table_name_for(&path)?;
            info!(
                component = "dataset",
                event = "dataset.load.table",
                path = %path.display(),
                table = %table_name
            );
            self.load_file_into_view(executor, &path, &table_name)?;
            names.push(table_name);
        }
        Ok(names)
    }

    pub fn load_file_into_view(
        &self,
        executor: &mut dyn QueryExecutor,
        filename: &Path,
        viewname: &str,
    ) -> Result<(), DatasetError> {
        let table = read_csv_table(filename, &self.overrides)?;
        executor.register_table(viewname, &table)?;
        Ok(())
    }
}

/// Executes `sql`, prints a short preview and hands back the full result.
pub fn run_query_display_results(
    executor: &dyn QueryExecutor,
    sql: &str,
) -> Result<Table, DatasetError> {
    let table = executor.execute(sql)?;
    println!("{}", format_preview(&table, PREVIEW_ROWS));
    Ok(table)
}

pub fn format_preview(table: &Table, max_rows: usize) -> String {
    let mut out = format!("shape: ({}, {})\n", table.len(), table.columns.len());
    out.push_str(&table.columns.join("\t"));
    out.push('\n');
    for row in table.rows.iter().take(max_rows) {
        let cells: Vec<String> = row.iter().map(|value| value.to_string()).collect();
        out.push_str(&cells.join("\t"));
        out.push('\n');
    }
    if table.len() > max_rows {
        out.push_str(&format!("… {} more rows\n", table.len() - max_rows));
    }
    out
}

/// `transactions_train.csv` → `transactions`.
pub fn table_name_for(path: &Path) -> Result<String, DatasetError> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| DatasetError::InvalidFileName(path.to_path_buf()))?;
    let name = file_name.replace(".csv", "").replace("_train", "");
    if name.is_empty() {
        return Err(DatasetError::InvalidFileName(path.to_path_buf()));
    }
    Ok(name)
}

/// Reads a CSV into a [`Table`]. Columns without an override get one type
/// for the whole column: integer if every cell parses as one, else real,
/// else text. This takes one extra pass over the file.
pub fn read_csv_table(
    path: &Path,
    overrides: &HashMap<String, ColumnOverride>,
) -> Result<Table, DatasetError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)?;
    let headers = reader.headers()?.clone();
    if headers.is_empty() {
        return Err(DatasetError::MissingHeader {
            path: path.to_path_buf(),
        });
    }

    let columns: Vec<String> = headers.iter().map(|h| h.trim().to_string()).collect();
    let column_overrides: Vec<Option<ColumnOverride>> = columns
        .iter()
        .map(|column| overrides.get(column).copied())
        .collect();

    let mut kinds = vec![CellKind::Integer; columns.len()];
    for record in reader.records() {
        let record = record?;
        for (idx, kind) in kinds.iter_mut().enumerate() {
            if column_overrides[idx].is_none() {
                *kind = kind.widen(record.get(idx).unwrap_or_default().trim());
            }
        }
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)?;
    let mut table = Table::new(columns);
    for record in reader.records() {
        let record = record?;
        let row = parse_record(&record, &table.columns, &column_overrides, &kinds)?;
        table.push_row(row)?;
    }

    debug!(
        component = "dataset",
        event = "dataset.csv.parsed",
        path = %path.display(),
        rows = table.len(),
        columns = ?kinds
    );
    Ok(table)
}

/// Narrowest type seen so far in a column; only ever widens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CellKind {
    Integer,
    Real,
    Text,
}

impl CellKind {
    fn widen(self, trimmed: &str) -> Self {
        if trimmed.is_empty() {
            return self;
        }
        match self {
            Self::Integer if trimmed.parse::<i64>().is_ok() => Self::Integer,
            Self::Integer | Self::Real if trimmed.parse::<f64>().is_ok() => Self::Real,
            _ => Self::Text,
        }
    }
}

fn parse_record(
    record: &StringRecord,
    columns: &[String],
    overrides: &[Option<ColumnOverride>],
    kinds: &[CellKind],
) -> Result<Vec<Value>, DatasetError> {
    let mut values = Vec::with_capacity(columns.len());
    for (idx, column) in columns.iter().enumerate() {
        let raw = record.get(idx).unwrap_or_default();
        values.push(parse_cell(column, raw, overrides[idx], kinds[idx])?);
    }
    Ok(values)
}

fn parse_cell(
    column: &str,
    raw: &str,
    column_override: Option<ColumnOverride>,
    kind: CellKind,
) -> Result<Value, DatasetError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Value::Null);
    }

    let parse_error = || DatasetError::ParseField {
        field: column.to_string(),
        value: raw.to_string(),
    };
    match (column_override, kind) {
        (Some(ColumnOverride::Utf8), _) => Ok(Value::Text(raw.to_string())),
        (Some(ColumnOverride::Date), _) => NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
            .map(|date| Value::Text(date.format("%Y-%m-%d").to_string()))
            .map_err(|_| parse_error()),
        (None, CellKind::Integer) => trimmed
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|_| parse_error()),
        (None, CellKind::Real) => trimmed
            .parse::<f64>()
            .map(Value::Real)
            .map_err(|_| parse_error()),
        (None, CellKind::Text) => Ok(Value::Text(raw.to_string())),
    }
}

fn write_atomic(path: &Path, mut bytes: &[u8]) -> Result<(), DatasetError> {
    write_atomic_from(path, &mut bytes).map(|_| ())
}

/// Streams `reader` into `<path>.tmp` and renames it over `path`; nothing is
/// buffered beyond the copy chunk.
fn write_atomic_from(path: &Path, reader: &mut impl Read) -> Result<u64, DatasetError> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| DatasetError::InvalidFileName(path.to_path_buf()))?;
    let tmp_path = path.with_file_name(format!("{file_name}.tmp"));

    let written = {
        let mut file = io::BufWriter::new(fs::File::create(&tmp_path)?);
        let written = io::copy(reader, &mut file)?;
        file.flush()?;
        file.get_ref().sync_all()?;
        written
    };

    fs::rename(tmp_path, path)?;
    Ok(written)
}

fn retry<T>(
    cfg: &DatasetConfig,
    mut f: impl FnMut() -> Result<T, DatasetError>,
) -> Result<T, DatasetError> {
    let mut attempt: u32 = 0;
    loop {
        match f() {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= cfg.max_retries => return Err(err),
            Err(err) => {
                attempt = attempt.saturating_add(1);
                let shift = attempt.saturating_sub(1).min(10);
                let sleep_ms = cfg.retry_backoff_ms.saturating_mul(1u64 << shift);
                warn!(
                    component = "dataset",
                    event = "dataset.sync.retry",
                    attempt,
                    sleep_ms,
                    error = %err
                );
                std::thread::sleep(std::time::Duration::from_millis(sleep_ms));
            }
        }
    }
}

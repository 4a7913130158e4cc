use crate::error::PipelineError;
use async_trait::async_trait;
use flate2::read::GzDecoder;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use polars::io::csv::read::NullValues;
use polars::prelude::*;
use std::io::{Cursor, Read};
use std::sync::Arc;
use tracing::{debug, info};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Cells read as missing.
const NULL_MARKERS: [&str; 7] = ["", "NA", "N/A", "NaN", "nan", "null", "NULL"];

/// Retrieves a delimited file and materializes it as a [`DataFrame`]. All-or-nothing.
#[async_trait]
pub trait DatasetSource: Send + Sync {
    async fn fetch(&self, path: &str) -> Result<DataFrame, PipelineError>;
}

/// Reads datasets through `object_store`.
///
/// `s3://bucket/key` paths resolve against an S3 store whose credentials come
/// from the host environment (never anonymous); other paths are local files.
/// A fixed store replaces resolution entirely, with the path used as the key.
pub struct ObjectStoreSource {
    fixed: Option<Arc<dyn ObjectStore>>,
}

impl ObjectStoreSource {
    pub fn from_env() -> Self {
        Self { fixed: None }
    }

    pub fn with_store(store: Arc<dyn ObjectStore>) -> Self {
        Self { fixed: Some(store) }
    }

    fn resolve(&self, path: &str) -> Result<(Arc<dyn ObjectStore>, ObjectPath), PipelineError> {
        let s3 = split_s3_url(path);
        if path.starts_with("s3://") && s3.is_none() {
            return Err(PipelineError::retrieval(path, "malformed s3 url, expected s3://bucket/key"));
        }

        if let Some(store) = &self.fixed {
            let key = s3.map(|(_, key)| key).unwrap_or(path);
            return Ok((store.clone(), ObjectPath::from(key.trim_start_matches('/'))));
        }

        match s3 {
            Some((bucket, key)) => {
                let store = AmazonS3Builder::from_env()
                    .with_bucket_name(bucket)
                    .build()
                    .map_err(|e| PipelineError::retrieval(path, e))?;
                Ok((Arc::new(store), ObjectPath::from(key)))
            }
            None => {
                let location = ObjectPath::from_filesystem_path(path)
                    .map_err(|e| PipelineError::retrieval(path, e))?;
                Ok((Arc::new(LocalFileSystem::new()), location))
            }
        }
    }
}

#[async_trait]
impl DatasetSource for ObjectStoreSource {
    async fn fetch(&self, path: &str) -> Result<DataFrame, PipelineError> {
        let (store, location) = self.resolve(path)?;
        debug!(path, location = %location, "fetching dataset");

        let bytes = store
            .get(&location)
            .await
            .map_err(|e| PipelineError::retrieval(path, e))?
            .bytes()
            .await
            .map_err(|e| PipelineError::retrieval(path, e))?;

        let table = decode_table(&bytes).map_err(|reason| PipelineError::parse(path, reason))?;
        info!(
            path,
            bytes = bytes.len(),
            rows = table.height(),
            columns = table.width(),
            "fetched dataset"
        );
        Ok(table)
    }
}

fn split_s3_url(path: &str) -> Option<(&str, &str)> {
    let rest = path.strip_prefix("s3://")?;
    let (bucket, key) = rest.split_once('/')?;
    if bucket.is_empty() || key.is_empty() {
        return None;
    }
    Some((bucket, key))
}

/// Decodes CSV, gunzipping first when the payload carries the gzip magic bytes.
///
/// Column types are inferred over every row, so a late text value widens the
/// whole column instead of failing the parse.
pub fn decode_table(bytes: &[u8]) -> Result<DataFrame, String> {
    let text = if bytes.starts_with(&GZIP_MAGIC) {
        let mut decompressed = Vec::new();
        GzDecoder::new(bytes)
            .read_to_end(&mut decompressed)
            .map_err(|e| e.to_string())?;
        decompressed
    } else {
        bytes.to_vec()
    };
    if text.iter().all(u8::is_ascii_whitespace) {
        return Err("missing header row".to_string());
    }

    let null_values = NullValues::AllColumns(NULL_MARKERS.iter().map(|m| (*m).into()).collect());
    CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(None)
        .map_parse_options(|parse| parse.with_null_values(Some(null_values.clone())))
        .into_reader_with_file_handle(Cursor::new(text))
        .finish()
        .map_err(|e| e.to_string())
}

// Trip archive sources: the public trip-data bucket and local directories
//
// Bucket: https://s3.amazonaws.com/hubway-data
// - Listing: GET {bucket}?marker=... returns an S3 ListBucketResult (XML)
// - Archives: GET {bucket}/{key}, a zip holding one CSV export per month

use crate::bfe_models::{BFEError, MonthArchive, MonthKey, Result, TripTable};
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::blocking;
use std::collections::BTreeMap;
use std::fs;
use std::io::{Cursor, Read, Seek};
use std::path::{Path, PathBuf};
use std::time::Duration;
use zip::ZipArchive;

lazy_static! {
    static ref KEY_PATTERN: Regex = Regex::new(r"<Key>([^<]+)</Key>").expect("key pattern is valid");
    static ref TRUNCATED_PATTERN: Regex =
        Regex::new(r"<IsTruncated>\s*true\s*</IsTruncated>").expect("truncation pattern is valid");
}

/// Archive keys must contain this marker to be listed as a month.
pub const TRIP_DATA_MARKER: &str = "tripdata";

/// Where month archives come from.
pub trait DataSource: Send + Sync {
    /// Months with a trip archive, oldest first.
    fn list_months(&self) -> Result<Vec<MonthArchive>>;

    /// Downloads and parses one month of trips.
    fn fetch_month(&self, archive: &MonthArchive) -> Result<TripTable>;
}

/// Turns raw keys into a chronological catalogue, one archive per month.
pub fn catalogue_from_keys<'a>(keys: impl IntoIterator<Item = &'a str>) -> Vec<MonthArchive> {
    let mut months: BTreeMap<MonthKey, String> = BTreeMap::new();
    for key in keys {
        let file_name = key.rsplit('/').next().unwrap_or(key);
        if !file_name.contains(TRIP_DATA_MARKER) {
            continue;
        }
        match MonthKey::from_key_prefix(file_name) {
            Some(month) => {
                months.insert(month, key.to_string());
            }
            None => log::debug!("Skipping archive without a YYYYMM prefix: {}", key),
        }
    }
    months
        .into_iter()
        .map(|(month, location)| MonthArchive::new(month, location))
        .collect()
}

/// Keys on one page of an S3 `ListBucketResult`, and whether more pages follow.
pub fn parse_listing(xml: &str) -> (Vec<String>, bool) {
    let keys = KEY_PATTERN
        .captures_iter(xml)
        .filter_map(|c| c.get(1).map(|m| unescape_xml(m.as_str())))
        .collect();
    (keys, TRUNCATED_PATTERN.is_match(xml))
}

fn unescape_xml(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Parses a trip archive: a zip holding one CSV, or a bare CSV.
pub fn read_trip_archive<R: Read + Seek>(reader: R, name: &str) -> Result<TripTable> {
    let mut archive = ZipArchive::new(reader)
        .map_err(|e| BFEError::ParseError(format!("Failed to open archive {}: {}", name, e)))?;

    let csv_name = archive
        .file_names()
        .filter(|n| n.to_ascii_lowercase().ends_with(".csv") && !n.starts_with("__MACOSX"))
        .map(String::from)
        .next()
        .ok_or_else(|| BFEError::SchemaMismatch(format!("No CSV export found in archive {}", name)))?;

    let csv_file = archive
        .by_name(&csv_name)
        .map_err(|e| BFEError::FileError(format!("Failed to read {} from {}: {}", csv_name, name, e)))?;

    TripTable::from_csv_reader(csv_file)
}

// ============================================================================
// Public bucket
// ============================================================================

pub struct BucketSource {
    base_url: String,
    cache_dir: Option<PathBuf>,
    client: blocking::Client,
}

impl BucketSource {
    const REQUEST_TIMEOUT_SECS: u64 = 120;
    const MAX_LISTING_PAGES: usize = 50;

    pub fn new(base_url: &str, cache_dir: Option<PathBuf>) -> Result<Self> {
        let client = blocking::Client::builder()
            .timeout(Duration::from_secs(Self::REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| BFEError::DataFetch(format!("Failed to create HTTP client: {}", e)))?;

        Ok(BucketSource {
            base_url: base_url.trim_end_matches('/').to_string(),
            cache_dir,
            client,
        })
    }

    fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        self.send(self.client.get(url), url)
    }

    fn send(&self, request: blocking::RequestBuilder, url: &str) -> Result<Vec<u8>> {
        let response = request
            .send()
            .map_err(|e| BFEError::DataFetch(format!("Failed to fetch {}: {}. Check your internet connection.", url, e)))?;

        if !response.status().is_success() {
            return Err(BFEError::DataFetch(format!("{} returned {}", url, response.status())));
        }

        let body = response
            .bytes()
            .map_err(|e| BFEError::DataFetch(format!("Failed to read response from {}: {}", url, e)))?;
        Ok(body.to_vec())
    }

    fn cached_path(&self, location: &str) -> Option<PathBuf> {
        let file_name = location.replace('/', "_");
        self.cache_dir.as_ref().map(|dir| dir.join(file_name))
    }

    fn read_cached(&self, archive: &MonthArchive) -> Option<TripTable> {
        let path = self.cached_path(&archive.location)?;
        let bytes = fs::read(&path).ok()?;
        match read_trip_archive(Cursor::new(bytes), &archive.location) {
            Ok(table) => {
                log::info!("Using cached archive {:?}", path);
                Some(table)
            }
            Err(e) => {
                log::warn!("Discarding unreadable cached archive {:?}: {}", path, e);
                fs::remove_file(&path).ok();
                None
            }
        }
    }

    fn store_cached(&self, location: &str, bytes: &[u8]) {
        let Some(path) = self.cached_path(location) else { return };
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).ok();
        }
        if let Err(e) = fs::write(&path, bytes) {
            log::warn!("Could not cache archive {:?}: {}", path, e);
        }
    }
}

impl DataSource for BucketSource {
    fn list_months(&self) -> Result<Vec<MonthArchive>> {
        let mut keys: Vec<String> = Vec::new();
        let mut marker: Option<String> = None;

        for _ in 0..Self::MAX_LISTING_PAGES {
            let url = format!("{}/", self.base_url);
            let mut request = self.client.get(&url);
            if let Some(m) = &marker {
                request = request.query(&[("marker", m.as_str())]);
            }
            let body = self.send(request, &url)?;

            let (page, truncated) = parse_listing(&String::from_utf8_lossy(&body));
            marker = page.last().cloned();
            keys.extend(page);

            if !truncated || marker.is_none() {
                break;
            }
        }

        let months = catalogue_from_keys(keys.iter().map(String::as_str));
        if months.is_empty() {
            return Err(BFEError::DataFetch(format!(
                "No trip archives listed at {}",
                self.base_url
            )));
        }
        log::info!("Listed {} monthly archives from {}", months.len(), self.base_url);
        Ok(months)
    }

    fn fetch_month(&self, archive: &MonthArchive) -> Result<TripTable> {
        if let Some(table) = self.read_cached(archive) {
            return Ok(table);
        }

        let url = format!("{}/{}", self.base_url, archive.location);
        log::info!("Downloading {} ({})", archive.label, url);
        let bytes = self.get_bytes(&url)?;
        log::info!("Downloaded {} KB for {}", bytes.len() / 1024, archive.label);

        let table = read_trip_archive(Cursor::new(bytes.as_slice()), &archive.location)?;
        self.store_cached(&archive.location, &bytes);
        Ok(table)
    }
}

// ============================================================================
// Local directory
// ============================================================================

/// Monthly exports already on disk, as `YYYYMM-*tripdata*.zip` or `.csv`.
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: &Path) -> Self {
        DirectorySource {
            root: root.to_path_buf(),
        }
    }
}

impl DataSource for DirectorySource {
    fn list_months(&self) -> Result<Vec<MonthArchive>> {
        let entries = fs::read_dir(&self.root)
            .map_err(|e| BFEError::DataFetch(format!("Failed to list {:?}: {}", self.root, e)))?;

        let names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_file())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| {
                let lower = name.to_ascii_lowercase();
                lower.ends_with(".zip") || lower.ends_with(".csv")
            })
            .collect();

        Ok(catalogue_from_keys(names.iter().map(String::as_str)))
    }

    fn fetch_month(&self, archive: &MonthArchive) -> Result<TripTable> {
        let path = self.root.join(&archive.location);
        let file = fs::File::open(&path)
            .map_err(|e| BFEError::DataFetch(format!("Failed to open {:?}: {}", path, e)))?;

        if archive.location.to_ascii_lowercase().ends_with(".csv") {
            TripTable::from_csv_reader(file)
        } else {
            read_trip_archive(file, &archive.location)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::FileOptions;

    const EXPORT: &str = "\
ride_id,rideable_type,started_at,ended_at,start_station_name,start_station_id,end_station_name,end_station_id,start_lat,start_lng,end_lat,end_lng,member_casual
R1,classic_bike,2024-02-01 07:15:02,2024-02-01 07:31:44,Kendall T,K1,Central Square,C1,42.36,-71.08,42.36,-71.10,member
R2,classic_bike,2024-02-01 17:02:10,2024-02-01 17:20:00,Central Square,C1,Kendall T,K1,42.36,-71.10,42.36,-71.08,casual
";

    fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, contents) in entries {
            writer.start_file(*name, FileOptions::default()).unwrap();
            writer.write_all(contents.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn catalogue_keeps_trip_archives_in_month_order() {
        let keys = [
            "202402-bluebikes-tripdata.zip",
            "current_bluebikes_stations.csv",
            "201501-hubway-tripdata.zip",
            "index.html",
            "2017-Q1-tripdata.zip",
            "202312-bluebikes-tripdata.zip",
        ];
        let months = catalogue_from_keys(keys);
        let locations: Vec<&str> = months.iter().map(|m| m.location.as_str()).collect();
        assert_eq!(
            locations,
            vec![
                "201501-hubway-tripdata.zip",
                "202312-bluebikes-tripdata.zip",
                "202402-bluebikes-tripdata.zip"
            ]
        );
        assert_eq!(months[2].label, "February 2024");
    }

    #[test]
    fn listing_pages_report_keys_and_truncation() {
        let first = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>
<ListBucketResult><Name>hubway-data</Name><Marker></Marker><IsTruncated>true</IsTruncated>
<Contents><Key>202401-bluebikes-tripdata.zip</Key><Size>1</Size></Contents>
<Contents><Key>202402-bluebikes &amp; more-tripdata.zip</Key><Size>1</Size></Contents>
</ListBucketResult>";
        let (keys, truncated) = parse_listing(first);
        assert!(truncated);
        assert_eq!(keys, vec!["202401-bluebikes-tripdata.zip", "202402-bluebikes & more-tripdata.zip"]);
        assert_eq!(keys.last().map(String::as_str), Some("202402-bluebikes & more-tripdata.zip"));

        let last = "<ListBucketResult><IsTruncated>false</IsTruncated>
<Contents><Key>202403-bluebikes-tripdata.zip</Key></Contents></ListBucketResult>";
        let (keys, truncated) = parse_listing(last);
        assert!(!truncated);
        assert_eq!(keys, vec!["202403-bluebikes-tripdata.zip"]);

        let (keys, truncated) = parse_listing("<ListBucketResult><IsTruncated>false</IsTruncated></ListBucketResult>");
        assert!(keys.is_empty());
        assert!(!truncated);
    }

    #[test]
    fn archive_skips_macos_metadata() {
        let bytes = zip_bytes(&[
            ("__MACOSX/._202402-bluebikes-tripdata.csv", "junk"),
            ("202402-bluebikes-tripdata.csv", EXPORT),
        ]);
        let table = read_trip_archive(Cursor::new(bytes), "202402-bluebikes-tripdata.zip").unwrap();
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn archive_without_csv_is_a_schema_mismatch() {
        let bytes = zip_bytes(&[("readme.txt", "nothing here")]);
        match read_trip_archive(Cursor::new(bytes), "empty.zip") {
            Err(BFEError::SchemaMismatch(_)) => {}
            other => panic!("expected schema mismatch, got {:?}", other.map(|t| t.len())),
        }
    }

    #[test]
    fn directory_source_lists_and_fetches() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("202402-bluebikes-tripdata.zip"),
            zip_bytes(&[("202402-bluebikes-tripdata.csv", EXPORT)]),
        )
        .unwrap();
        fs::write(dir.path().join("202401-bluebikes-tripdata.csv"), EXPORT).unwrap();
        fs::write(dir.path().join("notes.txt"), "ignore me").unwrap();

        let source = DirectorySource::new(dir.path());
        let months = source.list_months().unwrap();
        assert_eq!(months.len(), 2);
        assert_eq!(months[0].month, MonthKey { year: 2024, month: 1 });

        for archive in &months {
            assert_eq!(source.fetch_month(archive).unwrap().len(), 2);
        }
    }

    #[test]
    fn missing_directory_is_a_fetch_error() {
        let source = DirectorySource::new(Path::new("/definitely/not/here"));
        assert!(matches!(source.list_months(), Err(BFEError::DataFetch(_))));
    }

    #[test]
    fn bucket_source_reuses_cached_archives() {
        let cache = tempfile::tempdir().unwrap();
        fs::write(
            cache.path().join("202402-bluebikes-tripdata.zip"),
            zip_bytes(&[("202402-bluebikes-tripdata.csv", EXPORT)]),
        )
        .unwrap();

        let source = BucketSource::new("http://127.0.0.1:9", Some(cache.path().to_path_buf())).unwrap();
        let archive = MonthArchive::new(MonthKey { year: 2024, month: 2 }, "202402-bluebikes-tripdata.zip");
        assert_eq!(source.fetch_month(&archive).unwrap().len(), 2);
    }
}

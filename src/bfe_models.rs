// Domain models and trip ingestion for the Bikeshare Flow Explorer
//
// Trip exports come in two layouts:
// - Legacy (through early 2023): "starttime", "start station name", "end station name", ...
// - Current: "ride_id", "started_at", "start_station_name", "end_station_name", ...
// Both are resolved once per file into column indices and normalized into `Trip`.

use chrono::NaiveDate;
use geo_types::Point;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

lazy_static! {
    /// Two digits followed by a colon: the hour of "2024-02-01 07:42:13".
    static ref HOUR_PATTERN: Regex = Regex::new(r"(\d{2}):").expect("hour pattern is valid");
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug)]
pub enum BFEError {
    DataFetch(String),
    SchemaMismatch(String),
    InvalidInput(String),
    FileError(String),
    ParseError(String),
}

impl fmt::Display for BFEError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BFEError::DataFetch(e) => write!(f, "Data fetch error: {}", e),
            BFEError::SchemaMismatch(e) => write!(f, "Schema mismatch: {}", e),
            BFEError::InvalidInput(e) => write!(f, "Invalid input: {}", e),
            BFEError::FileError(e) => write!(f, "File error: {}", e),
            BFEError::ParseError(e) => write!(f, "Parse error: {}", e),
        }
    }
}

impl std::error::Error for BFEError {}

pub type Result<T> = std::result::Result<T, BFEError>;

// ============================================================================
// Filters
// ============================================================================

/// Whether rides are attributed to the station they start from or end at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Direction {
    #[default]
    Origin,
    Destination,
}

impl Direction {
    /// The dashboard toggle is "show arrivals": on means destination-basis.
    pub fn from_toggle(on: bool) -> Self {
        if on {
            Direction::Destination
        } else {
            Direction::Origin
        }
    }

    pub fn is_toggled(&self) -> bool {
        *self == Direction::Destination
    }

    /// Station a trip is attributed to under this direction.
    pub fn station_of<'a>(&self, trip: &'a Trip) -> &'a str {
        match self {
            Direction::Origin => &trip.start_station,
            Direction::Destination => &trip.end_station,
        }
    }

    /// The other end of the trip.
    pub fn counterpart_of<'a>(&self, trip: &'a Trip) -> &'a str {
        match self {
            Direction::Origin => &trip.end_station,
            Direction::Destination => &trip.start_station,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Direction::Origin => "Origin",
            Direction::Destination => "Destination",
        }
    }

    /// Heading for the counterpart column when a station is focused.
    pub fn counterpart_label(&self) -> &'static str {
        match self {
            Direction::Origin => "Destination",
            Direction::Destination => "Origin",
        }
    }
}

/// Inclusive hour-of-day window, `0 <= lo <= hi <= 24`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HourRange {
    lo: u8,
    hi: u8,
}

impl HourRange {
    pub const MAX_HOUR: u8 = 24;

    pub fn new(lo: u8, hi: u8) -> Result<Self> {
        if lo > hi || hi > Self::MAX_HOUR {
            return Err(BFEError::InvalidInput(format!(
                "hour range [{}, {}] must satisfy 0 <= lo <= hi <= {}",
                lo,
                hi,
                Self::MAX_HOUR
            )));
        }
        Ok(HourRange { lo, hi })
    }

    pub fn full() -> Self {
        HourRange { lo: 0, hi: Self::MAX_HOUR }
    }

    pub fn lo(&self) -> u8 {
        self.lo
    }

    pub fn hi(&self) -> u8 {
        self.hi
    }

    pub fn contains(&self, hour: u8) -> bool {
        self.lo <= hour && hour <= self.hi
    }

    pub fn is_full(&self) -> bool {
        self.lo == 0 && self.hi == Self::MAX_HOUR
    }
}

impl Default for HourRange {
    fn default() -> Self {
        Self::full()
    }
}

impl fmt::Display for HourRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:00-{:02}:00", self.lo, self.hi)
    }
}

impl FromStr for HourRange {
    type Err = BFEError;

    /// Accepts "7-10" or "7..10".
    fn from_str(s: &str) -> Result<Self> {
        let (lo, hi) = s
            .split_once('-')
            .or_else(|| s.split_once(".."))
            .ok_or_else(|| BFEError::InvalidInput(format!("expected LO-HI, got '{}'", s)))?;
        let lo = lo
            .trim()
            .parse::<u8>()
            .map_err(|e| BFEError::InvalidInput(format!("bad start hour '{}': {}", lo, e)))?;
        let hi = hi
            .trim()
            .parse::<u8>()
            .map_err(|e| BFEError::InvalidInput(format!("bad end hour '{}': {}", hi, e)))?;
        HourRange::new(lo, hi)
    }
}

// ============================================================================
// Months
// ============================================================================

/// A calendar month, as encoded by the YYYYMM prefix of an archive key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MonthKey {
    pub year: i32,
    pub month: u32,
}

impl MonthKey {
    pub fn new(year: i32, month: u32) -> Result<Self> {
        if !(1..=12).contains(&month) {
            return Err(BFEError::InvalidInput(format!("month {} out of range", month)));
        }
        Ok(MonthKey { year, month })
    }

    /// Parses the first six characters of an archive key ("202402-bluebikes-tripdata.zip").
    pub fn from_key_prefix(key: &str) -> Option<Self> {
        let prefix = key.get(0..6)?;
        if !prefix.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let year = prefix[0..4].parse().ok()?;
        let month = prefix[4..6].parse().ok()?;
        MonthKey::new(year, month).ok()
    }

    /// Human-readable label, e.g. "February 2024".
    pub fn label(&self) -> String {
        match NaiveDate::from_ymd_opt(self.year, self.month, 1) {
            Some(date) => date.format("%B %Y").to_string(),
            None => self.to_string(),
        }
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}{:02}", self.year, self.month)
    }
}

impl FromStr for MonthKey {
    type Err = BFEError;

    /// Accepts "202402" or "2024-02".
    fn from_str(s: &str) -> Result<Self> {
        let compact: String = s.trim().chars().filter(|c| *c != '-').collect();
        if compact.len() != 6 {
            return Err(BFEError::InvalidInput(format!("expected YYYYMM, got '{}'", s)));
        }
        MonthKey::from_key_prefix(&compact)
            .ok_or_else(|| BFEError::InvalidInput(format!("expected YYYYMM, got '{}'", s)))
    }
}

/// One entry of the month catalogue: where the archive for a month lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthArchive {
    pub month: MonthKey,
    pub label: String,
    pub location: String,
}

impl MonthArchive {
    pub fn new(month: MonthKey, location: impl Into<String>) -> Self {
        MonthArchive {
            month,
            label: month.label(),
            location: location.into(),
        }
    }
}

// ============================================================================
// Trips
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Trip {
    pub start_station: String,
    pub end_station: String,
    pub start_hour: u8,
}

impl Trip {
    pub fn new(start_station: impl Into<String>, end_station: impl Into<String>, start_hour: u8) -> Self {
        Trip {
            start_station: start_station.into(),
            end_station: end_station.into(),
            start_hour,
        }
    }

    pub fn is_round_trip(&self) -> bool {
        self.start_station == self.end_station
    }
}

/// Extracts the start hour from a timestamp: the first two digits before a colon, 0-23.
pub fn parse_start_hour(timestamp: &str) -> Option<u8> {
    let captures = HOUR_PATTERN.captures(timestamp)?;
    let hour = captures.get(1)?.as_str().parse::<u8>().ok()?;
    (hour < 24).then_some(hour)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TripSchema {
    Legacy,
    Current,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TripField {
    StartStation,
    EndStation,
    StartedAt,
    EndedAt,
    StartLat,
    StartLng,
    EndLat,
    EndLng,
}

impl TripSchema {
    /// Resolves which export layout a header row belongs to.
    pub fn detect(headers: &csv::StringRecord) -> Result<TripSchema> {
        let names: Vec<String> = headers.iter().map(normalize_header).collect();
        let has = |name: &str| names.iter().any(|h| h == name);

        if has("ride_id") && has("started_at") && has("start_station_name") && has("end_station_name") {
            Ok(TripSchema::Current)
        } else if has("starttime") && has("start station name") && has("end station name") {
            Ok(TripSchema::Legacy)
        } else {
            Err(BFEError::SchemaMismatch(format!(
                "unrecognised trip columns: {}",
                names.join(", ")
            )))
        }
    }

    pub fn column_name(&self, field: TripField) -> &'static str {
        match (self, field) {
            (TripSchema::Legacy, TripField::StartStation) => "start station name",
            (TripSchema::Legacy, TripField::EndStation) => "end station name",
            (TripSchema::Legacy, TripField::StartedAt) => "starttime",
            (TripSchema::Legacy, TripField::EndedAt) => "stoptime",
            (TripSchema::Legacy, TripField::StartLat) => "start station latitude",
            (TripSchema::Legacy, TripField::StartLng) => "start station longitude",
            (TripSchema::Legacy, TripField::EndLat) => "end station latitude",
            (TripSchema::Legacy, TripField::EndLng) => "end station longitude",
            (TripSchema::Current, TripField::StartStation) => "start_station_name",
            (TripSchema::Current, TripField::EndStation) => "end_station_name",
            (TripSchema::Current, TripField::StartedAt) => "started_at",
            (TripSchema::Current, TripField::EndedAt) => "ended_at",
            (TripSchema::Current, TripField::StartLat) => "start_lat",
            (TripSchema::Current, TripField::StartLng) => "start_lng",
            (TripSchema::Current, TripField::EndLat) => "end_lat",
            (TripSchema::Current, TripField::EndLng) => "end_lng",
        }
    }

    pub fn locate(&self, headers: &csv::StringRecord, field: TripField) -> Result<usize> {
        let wanted = self.column_name(field);
        headers
            .iter()
            .position(|h| normalize_header(h) == wanted)
            .ok_or_else(|| {
                BFEError::SchemaMismatch(format!("{:?} export is missing column '{}'", self, wanted))
            })
    }
}

fn normalize_header(header: &str) -> String {
    header.trim_start_matches('\u{feff}').trim().to_ascii_lowercase()
}

/// Per-load counters for rows dropped during ingestion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub rows: usize,
    pub kept: usize,
    pub missing_fields: usize,
    pub round_trips: usize,
    pub bad_timestamps: usize,
    pub malformed: usize,
}

/// One month of trips. Replaced wholesale, never appended to.
#[derive(Debug, Clone, Default)]
pub struct TripTable {
    trips: Vec<Trip>,
    pub schema: Option<TripSchema>,
    pub stats: IngestStats,
}

impl TripTable {
    /// Builds a table from already-normalized trips, dropping round trips.
    pub fn from_trips(trips: Vec<Trip>) -> Self {
        let rows = trips.len();
        let trips: Vec<Trip> = trips.into_iter().filter(|t| !t.is_round_trip()).collect();
        let stats = IngestStats {
            rows,
            kept: trips.len(),
            round_trips: rows - trips.len(),
            ..Default::default()
        };
        TripTable {
            trips,
            schema: None,
            stats,
        }
    }

    /// Reads a raw trip export in either known layout.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
        let headers = rdr
            .headers()
            .map_err(|e| BFEError::ParseError(format!("Failed to read trip header: {}", e)))?
            .clone();

        let schema = TripSchema::detect(&headers)?;
        let start_idx = schema.locate(&headers, TripField::StartStation)?;
        let end_idx = schema.locate(&headers, TripField::EndStation)?;
        let time_idx = schema.locate(&headers, TripField::StartedAt)?;

        let mut stats = IngestStats::default();
        let mut trips = Vec::new();

        for result in rdr.records() {
            stats.rows += 1;
            let record = match result {
                Ok(record) => record,
                Err(e) => {
                    log::debug!("Skipping malformed trip row: {}", e);
                    stats.malformed += 1;
                    continue;
                }
            };

            let field = |idx: usize| record.get(idx).map(str::trim).filter(|v| !v.is_empty());
            let (Some(start), Some(end), Some(started_at)) =
                (field(start_idx), field(end_idx), field(time_idx))
            else {
                stats.missing_fields += 1;
                continue;
            };

            if start == end {
                stats.round_trips += 1;
                continue;
            }

            let Some(start_hour) = parse_start_hour(started_at) else {
                stats.bad_timestamps += 1;
                continue;
            };

            trips.push(Trip::new(start, end, start_hour));
        }

        stats.kept = trips.len();
        log::info!(
            "Ingested {} of {} trip rows ({:?} layout): {} missing fields, {} round trips, {} bad timestamps, {} malformed",
            stats.kept,
            stats.rows,
            schema,
            stats.missing_fields,
            stats.round_trips,
            stats.bad_timestamps,
            stats.malformed
        );

        Ok(TripTable {
            trips,
            schema: Some(schema),
            stats,
        })
    }

    pub fn trips(&self) -> &[Trip] {
        &self.trips
    }

    pub fn iter(&self) -> impl Iterator<Item = &Trip> {
        self.trips.iter()
    }

    pub fn len(&self) -> usize {
        self.trips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trips.is_empty()
    }
}

// ============================================================================
// Stations
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub city: String,
}

impl Station {
    pub fn point(&self) -> Point<f64> {
        Point::new(self.longitude, self.latitude)
    }
}

const NAME_COLUMNS: &[&str] = &["name"];
const LAT_COLUMNS: &[&str] = &["lat", "latitude"];
const LNG_COLUMNS: &[&str] = &["long", "lng", "lon", "longitude"];
const CITY_COLUMNS: &[&str] = &["municipality", "city", "district"];
const UNKNOWN_CITY: &str = "Unknown";

/// Station reference table keyed by station name.
#[derive(Debug, Clone, Default)]
pub struct StationTable {
    stations: BTreeMap<String, Station>,
}

impl StationTable {
    pub fn from_stations(stations: impl IntoIterator<Item = Station>) -> Self {
        StationTable {
            stations: stations.into_iter().map(|s| (s.name.clone(), s)).collect(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| BFEError::FileError(format!("Failed to open station file {:?}: {}", path, e)))?;
        let table = Self::from_csv_reader(file)?;
        log::info!("Loaded {} stations from {:?}", table.len(), path);
        Ok(table)
    }

    /// Reads a station list, tolerating a one-line preamble before the header.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(reader);
        let mut records = rdr.records();

        let mut columns = None;
        for _ in 0..2 {
            let Some(record) = records.next() else { break };
            let record =
                record.map_err(|e| BFEError::ParseError(format!("Failed to read station header: {}", e)))?;
            if let Some(found) = StationColumns::resolve(&record) {
                columns = Some(found);
                break;
            }
        }
        let columns = columns.ok_or_else(|| {
            BFEError::SchemaMismatch("station file has no name/latitude/longitude header".to_string())
        })?;

        let mut stations = BTreeMap::new();
        for result in records {
            let record = match result {
                Ok(record) => record,
                Err(e) => {
                    log::warn!("Skipping invalid station record: {}", e);
                    continue;
                }
            };
            match columns.station(&record) {
                Some(station) => {
                    stations.insert(station.name.clone(), station);
                }
                None => log::debug!("Skipping station row without usable coordinates: {:?}", record),
            }
        }

        Ok(StationTable { stations })
    }

    pub fn get(&self, name: &str) -> Option<&Station> {
        self.stations.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.stations.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Station> {
        self.stations.values()
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    /// Distinct city labels, sorted.
    pub fn cities(&self) -> Vec<String> {
        self.stations
            .values()
            .map(|s| s.city.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

struct StationColumns {
    name: usize,
    lat: usize,
    lng: usize,
    city: Option<usize>,
}

impl StationColumns {
    fn resolve(header: &csv::StringRecord) -> Option<Self> {
        let find = |candidates: &[&str]| {
            header
                .iter()
                .position(|h| candidates.contains(&normalize_header(h).as_str()))
        };
        Some(StationColumns {
            name: find(NAME_COLUMNS)?,
            lat: find(LAT_COLUMNS)?,
            lng: find(LNG_COLUMNS)?,
            city: find(CITY_COLUMNS),
        })
    }

    fn station(&self, record: &csv::StringRecord) -> Option<Station> {
        let name = record.get(self.name)?.trim();
        if name.is_empty() {
            return None;
        }
        let latitude = record.get(self.lat)?.trim().parse::<f64>().ok()?;
        let longitude = record.get(self.lng)?.trim().parse::<f64>().ok()?;
        let city = self
            .city
            .and_then(|idx| record.get(idx))
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(UNKNOWN_CITY);
        Some(Station {
            name: name.to_string(),
            latitude,
            longitude,
            city: city.to_string(),
        })
    }
}

// ============================================================================
// Derived statistics
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationRideCount {
    pub station: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowEdge {
    pub origin: String,
    pub destination: String,
    pub trips: usize,
    pub weight: f64,
}

impl FlowEdge {
    /// The non-focus end of the edge.
    pub fn counterpart(&self, direction: Direction) -> &str {
        match direction {
            Direction::Origin => &self.destination,
            Direction::Destination => &self.origin,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CURRENT_CSV: &str = "\
ride_id,rideable_type,started_at,ended_at,start_station_name,start_station_id,end_station_name,end_station_id,start_lat,start_lng,end_lat,end_lng,member_casual
R1,classic_bike,2024-02-01 07:15:02.123,2024-02-01 07:31:44.000,Kendall T,K1,Central Square,C1,42.36,-71.08,42.36,-71.10,member
R2,classic_bike,2024-02-01 17:02:10,2024-02-01 17:20:00,Central Square,C1,Kendall T,K1,42.36,-71.10,42.36,-71.08,casual
R3,classic_bike,2024-02-01 09:00:00,2024-02-01 09:20:00,Kendall T,K1,Kendall T,K1,42.36,-71.08,42.36,-71.08,member
R4,classic_bike,2024-02-01 10:00:00,2024-02-01 10:20:00,,,Kendall T,K1,42.36,-71.08,42.36,-71.08,member
R5,classic_bike,2/1/2024 9:00,2/1/2024 9:20,Kendall T,K1,Central Square,C1,42.36,-71.08,42.36,-71.10,member
";

    const LEGACY_CSV: &str = "\
\"tripduration\",\"starttime\",\"stoptime\",\"start station id\",\"start station name\",\"start station latitude\",\"start station longitude\",\"end station id\",\"end station name\",\"end station latitude\",\"end station longitude\",\"bikeid\",\"usertype\",\"postal code\"
\"542\",\"2022-06-01 00:00:13.1350\",\"2022-06-01 00:09:15.9600\",\"67\",\"MIT at Mass Ave / Amherst St\",\"42.3581\",\"-71.0936\",\"80\",\"MIT Stata Center at Vassar St / Main St\",\"42.3621\",\"-71.0913\",\"4837\",\"Subscriber\",\"02139\"
\"600\",\"2022-06-01 23:59:01.0000\",\"2022-06-02 00:09:15.9600\",\"80\",\"MIT Stata Center at Vassar St / Main St\",\"42.3621\",\"-71.0913\",\"67\",\"MIT at Mass Ave / Amherst St\",\"42.3581\",\"-71.0936\",\"4838\",\"Customer\",\"02139\"
";

    #[test]
    fn start_hour_takes_first_two_digits_before_colon() {
        assert_eq!(parse_start_hour("2024-02-01 07:15:02.123"), Some(7));
        assert_eq!(parse_start_hour("2024-02-01 23:59:59"), Some(23));
        assert_eq!(parse_start_hour("2/1/2024 9:00"), None);
        assert_eq!(parse_start_hour("2024-02-01 25:00:00"), None);
        assert_eq!(parse_start_hour(""), None);
    }

    #[test]
    fn current_layout_is_normalized() {
        let table = TripTable::from_csv_reader(CURRENT_CSV.as_bytes()).unwrap();
        assert_eq!(table.schema, Some(TripSchema::Current));
        assert_eq!(
            table.trips(),
            &[
                Trip::new("Kendall T", "Central Square", 7),
                Trip::new("Central Square", "Kendall T", 17),
            ]
        );
        assert_eq!(table.stats.rows, 5);
        assert_eq!(table.stats.round_trips, 1);
        assert_eq!(table.stats.missing_fields, 1);
        assert_eq!(table.stats.bad_timestamps, 1);
    }

    #[test]
    fn legacy_layout_is_normalized() {
        let table = TripTable::from_csv_reader(LEGACY_CSV.as_bytes()).unwrap();
        assert_eq!(table.schema, Some(TripSchema::Legacy));
        assert_eq!(table.len(), 2);
        assert_eq!(table.trips()[0].start_station, "MIT at Mass Ave / Amherst St");
        assert_eq!(table.trips()[0].start_hour, 0);
        assert_eq!(table.trips()[1].start_hour, 23);
    }

    #[test]
    fn unknown_layout_is_a_schema_mismatch() {
        let csv = "id,from,to,when\n1,A,B,2024-01-01 10:00:00\n";
        match TripTable::from_csv_reader(csv.as_bytes()) {
            Err(BFEError::SchemaMismatch(_)) => {}
            other => panic!("expected schema mismatch, got {:?}", other),
        }
    }

    #[test]
    fn from_trips_drops_round_trips() {
        let table = TripTable::from_trips(vec![Trip::new("A", "B", 1), Trip::new("A", "A", 2)]);
        assert_eq!(table.len(), 1);
        assert_eq!(table.stats.round_trips, 1);
    }

    #[test]
    fn hour_range_validation_and_parsing() {
        assert!(HourRange::new(5, 3).is_err());
        assert!(HourRange::new(0, 25).is_err());
        let range: HourRange = "7-10".parse().unwrap();
        assert!(range.contains(7) && range.contains(10) && !range.contains(11));
        assert_eq!("0..24".parse::<HourRange>().unwrap(), HourRange::full());
    }

    #[test]
    fn month_keys_parse_from_archive_prefixes() {
        let key = MonthKey::from_key_prefix("202402-bluebikes-tripdata.zip").unwrap();
        assert_eq!(key, MonthKey { year: 2024, month: 2 });
        assert_eq!(key.label(), "February 2024");
        assert_eq!(key.to_string(), "202402");
        assert!(MonthKey::from_key_prefix("hubway_stations.csv").is_none());
        assert!(MonthKey::from_key_prefix("202413-tripdata.zip").is_none());
        assert_eq!("2024-02".parse::<MonthKey>().unwrap(), key);
    }

    #[test]
    fn station_file_with_preamble_is_read() {
        let csv = "\
Last Updated,2/1/2024
Number,NAME,Lat,Long,Seasonal Status,Municipality,Total Docks
A32000,Kendall T,42.3625,-71.0845,Year Round,Cambridge,19
B32001,Back Bay T,42.3478,-71.0761,Year Round,Boston,15
X00000,Broken Station,not-a-number,-71.0,Year Round,Boston,3
";
        let table = StationTable::from_csv_reader(csv.as_bytes()).unwrap();
        assert_eq!(table.len(), 2);
        let kendall = table.get("Kendall T").unwrap();
        assert_eq!(kendall.city, "Cambridge");
        assert!((kendall.latitude - 42.3625).abs() < 1e-9);
        assert_eq!(table.cities(), vec!["Boston".to_string(), "Cambridge".to_string()]);
    }

    #[test]
    fn geolocated_station_file_is_read() {
        let csv = "name,lat,lng,city,zipcode\nAshmont T Stop,42.2846,-71.0642,Boston,02124\nPlain St,42.3,-71.1,,No zip code\n";
        let table = StationTable::from_csv_reader(csv.as_bytes()).unwrap();
        assert_eq!(table.get("Ashmont T Stop").unwrap().city, "Boston");
        assert_eq!(table.get("Plain St").unwrap().city, "Unknown");
    }
}

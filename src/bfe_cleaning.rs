// Offline batch jobs: cleaning raw trip exports and geolocating stations
//
// Reverse geocoding uses Nominatim (https://nominatim.openstreetmap.org/reverse),
// whose usage policy asks for an identifying User-Agent and at most one request per second.

use crate::bfe_models::{parse_start_hour, BFEError, Result, TripField, TripSchema};
use chrono::NaiveDateTime;
use geo::{Distance, Geodesic};
use geo_types::Point;
use reqwest::blocking;
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::thread;
use std::time::{Duration, Instant};

const METRES_PER_MILE: f64 = 1609.344;
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";
const UNKNOWN_CITY: &str = "Unknown";
const NO_ZIP_CODE: &str = "No zip code";

/// Postcodes the geocoder is known to get wrong.
const ZIP_OVERRIDES: &[(&str, &str)] = &[("Ashmont T Stop", "02124")];

// ============================================================================
// Trip cleaning
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeOfDay {
    Night,
    Morning,
    Lunch,
    Evening,
}

impl TimeOfDay {
    pub fn from_hour(hour: u8) -> Self {
        match hour {
            5..=10 => TimeOfDay::Morning,
            11..=13 => TimeOfDay::Lunch,
            14..=20 => TimeOfDay::Evening,
            _ => TimeOfDay::Night,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TimeOfDay::Night => "Night",
            TimeOfDay::Morning => "Morning",
            TimeOfDay::Lunch => "Lunch",
            TimeOfDay::Evening => "Evening",
        }
    }
}

/// Columns appended to every raw row, in this order.
pub const DERIVED_COLUMNS: [&str; 6] = [
    "Start End",
    "Trip Length",
    "Trip Length (min)",
    "Distance Between Stations",
    "Start Hour",
    "Time of Day",
];

/// Values computed for one trip on top of its raw export columns.
#[derive(Debug, Clone, PartialEq)]
pub struct TripDerivation {
    pub start_end: String,
    pub trip_length_secs: f64,
    pub distance_miles: f64,
    pub start_hour: u8,
    pub time_of_day: TimeOfDay,
}

impl TripDerivation {
    pub fn trip_length_mins(&self) -> f64 {
        self.trip_length_secs / 60.0
    }

    fn values(&self) -> [String; 6] {
        [
            self.start_end.clone(),
            self.trip_length_secs.to_string(),
            self.trip_length_mins().to_string(),
            self.distance_miles.to_string(),
            self.start_hour.to_string(),
            self.time_of_day.label().to_string(),
        ]
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanStats {
    pub rows: usize,
    pub written: usize,
    pub dropped: usize,
}

/// Column indices needed by both offline jobs.
struct RawColumns {
    start: usize,
    end: usize,
    started_at: usize,
    ended_at: usize,
    start_lat: usize,
    start_lng: usize,
    end_lat: usize,
    end_lng: usize,
}

impl RawColumns {
    fn resolve(headers: &csv::StringRecord) -> Result<Self> {
        let schema = TripSchema::detect(headers)?;
        Ok(RawColumns {
            start: schema.locate(headers, TripField::StartStation)?,
            end: schema.locate(headers, TripField::EndStation)?,
            started_at: schema.locate(headers, TripField::StartedAt)?,
            ended_at: schema.locate(headers, TripField::EndedAt)?,
            start_lat: schema.locate(headers, TripField::StartLat)?,
            start_lng: schema.locate(headers, TripField::StartLng)?,
            end_lat: schema.locate(headers, TripField::EndLat)?,
            end_lng: schema.locate(headers, TripField::EndLng)?,
        })
    }
}

fn text(record: &csv::StringRecord, idx: usize) -> Option<&str> {
    record.get(idx).map(str::trim).filter(|v| !v.is_empty())
}

fn coordinate(record: &csv::StringRecord, lat: usize, lng: usize) -> Option<Point<f64>> {
    let lat = text(record, lat)?.parse::<f64>().ok()?;
    let lng = text(record, lng)?.parse::<f64>().ok()?;
    Some(Point::new(lng, lat))
}

fn open_raw<R: Read>(reader: R) -> Result<(csv::Reader<R>, csv::StringRecord, RawColumns)> {
    let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let headers = rdr
        .headers()
        .map_err(|e| BFEError::ParseError(format!("Failed to read trip header: {}", e)))?
        .clone();
    let columns = RawColumns::resolve(&headers)?;
    Ok((rdr, headers, columns))
}

fn derive_record(record: &csv::StringRecord, cols: &RawColumns) -> Option<TripDerivation> {
    let start = text(record, cols.start)?;
    let end = text(record, cols.end)?;
    let started_at = text(record, cols.started_at)?;
    let ended_at = text(record, cols.ended_at)?;

    let begin = NaiveDateTime::parse_from_str(started_at, TIMESTAMP_FORMAT).ok()?;
    let finish = NaiveDateTime::parse_from_str(ended_at, TIMESTAMP_FORMAT).ok()?;
    let trip_length_secs = (finish - begin).num_milliseconds() as f64 / 1000.0;

    let from = coordinate(record, cols.start_lat, cols.start_lng)?;
    let to = coordinate(record, cols.end_lat, cols.end_lng)?;
    // Ellipsoidal (WGS-84) distance between the two docks.
    let distance_miles = Geodesic.distance(from, to) / METRES_PER_MILE;

    let start_hour = parse_start_hour(started_at)?;

    Some(TripDerivation {
        start_end: format!("{} to {}", start, end),
        trip_length_secs,
        distance_miles,
        start_hour,
        time_of_day: TimeOfDay::from_hour(start_hour),
    })
}

/// Cleans a raw export: drops incomplete rows and writes every raw column
/// followed by trip length, distance, start hour and time-of-day columns.
pub fn clean_trips<R: Read, W: Write>(reader: R, writer: W) -> Result<CleanStats> {
    let (mut rdr, headers, cols) = open_raw(reader)?;
    let mut out = csv::WriterBuilder::new().flexible(true).from_writer(writer);
    let write_err = |e: csv::Error| BFEError::FileError(format!("Failed to write cleaned trip: {}", e));

    let mut header = headers.clone();
    for name in DERIVED_COLUMNS {
        header.push_field(name);
    }
    out.write_record(&header).map_err(write_err)?;

    let mut stats = CleanStats::default();
    for result in rdr.records() {
        stats.rows += 1;
        let Ok(mut record) = result else {
            stats.dropped += 1;
            continue;
        };
        let Some(derived) = derive_record(&record, &cols) else {
            stats.dropped += 1;
            continue;
        };
        // Short rows are padded so derived values stay under their headers.
        while record.len() < headers.len() {
            record.push_field("");
        }
        record.truncate(headers.len());
        for value in derived.values() {
            record.push_field(&value);
        }
        out.write_record(&record).map_err(write_err)?;
        stats.written += 1;
    }

    out.flush()
        .map_err(|e| BFEError::FileError(format!("Failed to flush cleaned trips: {}", e)))?;
    log::info!(
        "Cleaned {} of {} trips ({} dropped)",
        stats.written,
        stats.rows,
        stats.dropped
    );
    Ok(stats)
}

// ============================================================================
// Station geolocation
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct StationLocation {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// Every station seen at either end of a trip, placed at the mean of its observed coordinates.
pub fn derive_station_locations<R: Read>(reader: R) -> Result<Vec<StationLocation>> {
    let (mut rdr, _, cols) = open_raw(reader)?;
    let mut sums: BTreeMap<String, (f64, f64, usize)> = BTreeMap::new();

    for result in rdr.records() {
        let Ok(record) = result else { continue };
        let ends = [
            (cols.start, cols.start_lat, cols.start_lng),
            (cols.end, cols.end_lat, cols.end_lng),
        ];
        for (name_idx, lat_idx, lng_idx) in ends {
            let (Some(name), Some(point)) = (text(&record, name_idx), coordinate(&record, lat_idx, lng_idx)) else {
                continue;
            };
            let entry = sums.entry(name.to_string()).or_insert((0.0, 0.0, 0));
            entry.0 += point.y();
            entry.1 += point.x();
            entry.2 += 1;
        }
    }

    Ok(sums
        .into_iter()
        .map(|(name, (lat, lng, n))| StationLocation {
            name,
            latitude: lat / n as f64,
            longitude: lng / n as f64,
        })
        .collect())
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Address {
    pub city: Option<String>,
    pub town: Option<String>,
    pub village: Option<String>,
    pub postcode: Option<String>,
}

impl Address {
    pub fn city_label(&self) -> &str {
        self.city
            .as_deref()
            .or(self.town.as_deref())
            .or(self.village.as_deref())
            .unwrap_or(UNKNOWN_CITY)
    }
}

pub trait ReverseGeocoder {
    fn reverse(&self, latitude: f64, longitude: f64) -> Result<Address>;
}

#[derive(Deserialize)]
struct NominatimResponse {
    #[serde(default)]
    address: Address,
}

pub struct NominatimGeocoder {
    client: blocking::Client,
    base_url: String,
    min_interval: Duration,
    last_request: Cell<Option<Instant>>,
}

impl NominatimGeocoder {
    const BASE_URL: &'static str = "https://nominatim.openstreetmap.org";
    const REQUEST_TIMEOUT_SECS: u64 = 20;

    pub fn new(user_agent: &str) -> Result<Self> {
        let client = blocking::Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(Self::REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| BFEError::DataFetch(format!("Failed to create HTTP client: {}", e)))?;
        Ok(NominatimGeocoder {
            client,
            base_url: Self::BASE_URL.to_string(),
            min_interval: Duration::from_secs(1),
            last_request: Cell::new(None),
        })
    }

    fn wait_turn(&self) {
        if let Some(last) = self.last_request.get() {
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                thread::sleep(self.min_interval - elapsed);
            }
        }
        self.last_request.set(Some(Instant::now()));
    }
}

impl ReverseGeocoder for NominatimGeocoder {
    fn reverse(&self, latitude: f64, longitude: f64) -> Result<Address> {
        self.wait_turn();
        let url = format!(
            "{}/reverse?format=jsonv2&lat={}&lon={}",
            self.base_url, latitude, longitude
        );
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| BFEError::DataFetch(format!("Reverse geocoding failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(BFEError::DataFetch(format!("Geocoder returned {}", response.status())));
        }

        let body = response
            .bytes()
            .map_err(|e| BFEError::DataFetch(format!("Failed to read geocoder response: {}", e)))?;
        parse_reverse_response(&body)
    }
}

/// Decodes a `format=jsonv2` reverse reply. Replies without an address (such as
/// `{"error": "Unable to geocode"}`) yield an empty `Address`.
pub fn parse_reverse_response(body: &[u8]) -> Result<Address> {
    let response: NominatimResponse = serde_json::from_slice(body)
        .map_err(|e| BFEError::ParseError(format!("Invalid geocoder response: {}", e)))?;
    Ok(response.address)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeolocatedStation {
    pub name: String,
    pub lat: f64,
    pub lng: f64,
    pub city: String,
    pub zipcode: String,
}

/// Labels each station with a city and postcode. Lookups that fail are marked unknown.
pub fn geolocate_stations(
    locations: &[StationLocation],
    geocoder: &dyn ReverseGeocoder,
) -> Vec<GeolocatedStation> {
    locations
        .iter()
        .enumerate()
        .map(|(i, location)| {
            let address = geocoder
                .reverse(location.latitude, location.longitude)
                .unwrap_or_else(|e| {
                    log::warn!("Could not geocode '{}': {}", location.name, e);
                    Address::default()
                });
            if (i + 1) % 50 == 0 {
                log::info!("Geocoded {} / {} stations", i + 1, locations.len());
            }

            let zipcode = ZIP_OVERRIDES
                .iter()
                .find(|(name, _)| *name == location.name)
                .map(|(_, zip)| zip.to_string())
                .or(address.postcode.clone())
                .unwrap_or_else(|| {
                    log::debug!("No postcode for '{}'", location.name);
                    NO_ZIP_CODE.to_string()
                });

            GeolocatedStation {
                name: location.name.clone(),
                lat: location.latitude,
                lng: location.longitude,
                city: address.city_label().to_string(),
                zipcode,
            }
        })
        .collect()
}

pub fn write_stations<W: Write>(stations: &[GeolocatedStation], writer: W) -> Result<()> {
    let mut out = csv::Writer::from_writer(writer);
    for station in stations {
        out.serialize(station)
            .map_err(|e| BFEError::FileError(format!("Failed to write station: {}", e)))?;
    }
    out.flush()
        .map_err(|e| BFEError::FileError(format!("Failed to flush stations: {}", e)))
}

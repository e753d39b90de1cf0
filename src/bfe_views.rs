// Views for the Bikeshare Flow Explorer: render payloads and terminal output
use crate::bfe_controllers::ViewState;
use crate::bfe_models::{Direction, FlowEdge, MonthArchive, StationRideCount, StationTable};
use geojson::{Feature, FeatureCollection, Geometry, JsonObject, Value};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

pub const FLOW_OPACITY: f32 = 0.8;
pub const MIN_POINT_RADIUS: f32 = 3.0;
pub const MAX_POINT_RADIUS: f32 = 18.0;
pub const TABLE_PAGE_SIZE: usize = 10;

// ============================================================================
// Payloads
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapPoint {
    pub station: String,
    pub latitude: f64,
    pub longitude: f64,
    pub city: String,
    pub count: usize,
    pub radius: f32,
    pub color: [u8; 3],
    pub focused: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowLine {
    pub origin: String,
    pub destination: String,
    /// (latitude, longitude)
    pub from: (f64, f64),
    pub to: (f64, f64),
    pub trips: usize,
    pub weight: f64,
    pub width: usize,
    pub color: [u8; 3],
    pub opacity: f32,
}

/// Station points plus flow lines in paint order (largest flow last).
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct MapPayload {
    pub points: Vec<MapPoint>,
    pub lines: Vec<FlowLine>,
    pub focus: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableRow {
    pub station: String,
    pub trips: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct TablePayload {
    pub station_heading: String,
    pub trips_heading: String,
    pub rows: Vec<TableRow>,
}

impl TablePayload {
    pub fn page_count(&self, per_page: usize) -> usize {
        self.rows.len().div_ceil(per_page.max(1)).max(1)
    }

    pub fn page(&self, page: usize, per_page: usize) -> &[TableRow] {
        let start = (page * per_page).min(self.rows.len());
        let end = (start + per_page).min(self.rows.len());
        &self.rows[start..end]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SummaryText {
    NoMonth,
    Month { label: String, trips: usize },
    Focused { direction: Direction, station: String, trips: usize },
}

impl fmt::Display for SummaryText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SummaryText::NoMonth => write!(f, "Select a month to begin"),
            SummaryText::Month { label, trips } => {
                write!(f, "Total trips in {}: {}", label, format_count(*trips))
            }
            SummaryText::Focused { direction, station, trips } => write!(
                f,
                "{}: {} | {} trips",
                direction.label(),
                station,
                format_count(*trips)
            ),
        }
    }
}

/// Everything the presentation layer draws for one state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rendered {
    pub map: MapPayload,
    pub table: TablePayload,
    pub summary: SummaryText,
    /// Set while a month load is in flight.
    pub loading: Option<String>,
}

/// 12345 -> "12,345"
pub fn format_count(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// `floor(trips / 10) + 1`
pub fn flow_width(trips: usize) -> usize {
    trips / 10 + 1
}

pub fn flow_color(weight: f64) -> [u8; 3] {
    let c = colorous::VIRIDIS.eval_continuous(weight.clamp(0.0, 1.0));
    [c.r, c.g, c.b]
}

/// Point radius grows with the square root of the count, so area tracks rides.
pub fn point_radius(count: usize, max_count: usize) -> f32 {
    if max_count == 0 {
        return MIN_POINT_RADIUS;
    }
    let share = (count as f32 / max_count as f32).clamp(0.0, 1.0);
    MIN_POINT_RADIUS + (MAX_POINT_RADIUS - MIN_POINT_RADIUS) * share.sqrt()
}

// ============================================================================
// Rendering
// ============================================================================

pub struct BFEViews;

impl BFEViews {
    /// Assembles map, table and summary from the derived tables and view state.
    pub fn render(
        counts: &[StationRideCount],
        flows: &[FlowEdge],
        state: &ViewState,
        stations: &StationTable,
        month_trips: usize,
    ) -> Rendered {
        let map = Self::map_payload(counts, flows, state, stations);
        let table = Self::table_payload(counts, flows, state);

        let summary = match (&state.month, &state.focus) {
            (None, _) => SummaryText::NoMonth,
            (Some(_), Some(focus)) => SummaryText::Focused {
                direction: state.direction,
                station: focus.clone(),
                trips: counts
                    .iter()
                    .find(|c| &c.station == focus)
                    .map(|c| c.count)
                    .unwrap_or(0),
            },
            (Some(month), None) => SummaryText::Month {
                label: month.label(),
                trips: month_trips,
            },
        };

        Rendered {
            map,
            table,
            summary,
            loading: None,
        }
    }

    fn map_payload(
        counts: &[StationRideCount],
        flows: &[FlowEdge],
        state: &ViewState,
        stations: &StationTable,
    ) -> MapPayload {
        let palette: HashMap<String, [u8; 3]> = stations
            .cities()
            .into_iter()
            .enumerate()
            .map(|(i, city)| {
                let c = colorous::CATEGORY10[i % colorous::CATEGORY10.len()];
                (city, [c.r, c.g, c.b])
            })
            .collect();

        let max_count = counts.iter().map(|c| c.count).max().unwrap_or(0);
        let points = counts
            .iter()
            .filter(|c| c.count > 0)
            .filter_map(|c| {
                let station = stations.get(&c.station)?;
                Some(MapPoint {
                    station: station.name.clone(),
                    latitude: station.latitude,
                    longitude: station.longitude,
                    city: station.city.clone(),
                    count: c.count,
                    radius: point_radius(c.count, max_count),
                    color: palette.get(&station.city).copied().unwrap_or([128, 128, 128]),
                    focused: state.focus.as_deref() == Some(station.name.as_str()),
                })
            })
            .collect();

        // Flows arrive largest first; paint them smallest first so the largest lands on top.
        let lines = flows
            .iter()
            .rev()
            .filter_map(|edge| {
                let (Some(from), Some(to)) = (stations.get(&edge.origin), stations.get(&edge.destination)) else {
                    log::debug!("No coordinates for flow {} -> {}", edge.origin, edge.destination);
                    return None;
                };
                Some(FlowLine {
                    origin: edge.origin.clone(),
                    destination: edge.destination.clone(),
                    from: (from.latitude, from.longitude),
                    to: (to.latitude, to.longitude),
                    trips: edge.trips,
                    weight: edge.weight,
                    width: flow_width(edge.trips),
                    color: flow_color(edge.weight),
                    opacity: FLOW_OPACITY,
                })
            })
            .collect();

        MapPayload {
            points,
            lines,
            focus: state.focus.clone(),
        }
    }

    fn table_payload(counts: &[StationRideCount], flows: &[FlowEdge], state: &ViewState) -> TablePayload {
        match &state.focus {
            Some(_) => TablePayload {
                station_heading: state.direction.counterpart_label().to_string(),
                trips_heading: "Trips".to_string(),
                rows: flows
                    .iter()
                    .map(|edge| TableRow {
                        station: edge.counterpart(state.direction).to_string(),
                        trips: edge.trips,
                    })
                    .collect(),
            },
            None => TablePayload {
                station_heading: "Station".to_string(),
                trips_heading: format!("{} trips", state.direction.label()),
                rows: counts
                    .iter()
                    .map(|c| TableRow {
                        station: c.station.clone(),
                        trips: c.count,
                    })
                    .collect(),
            },
        }
    }

    /// Map payload as GeoJSON: one Point per station, one LineString per flow.
    pub fn map_geojson(map: &MapPayload) -> FeatureCollection {
        let hex = |c: [u8; 3]| format!("#{:02x}{:02x}{:02x}", c[0], c[1], c[2]);

        let mut features: Vec<Feature> = map
            .points
            .iter()
            .map(|p| {
                let mut props = JsonObject::new();
                props.insert("kind".into(), "station".into());
                props.insert("station".into(), p.station.clone().into());
                props.insert("city".into(), p.city.clone().into());
                props.insert("count".into(), p.count.into());
                props.insert("radius".into(), f64::from(p.radius).into());
                props.insert("color".into(), hex(p.color).into());
                props.insert("focused".into(), p.focused.into());
                feature(Value::Point(vec![p.longitude, p.latitude]), props)
            })
            .collect();

        features.extend(map.lines.iter().map(|l| {
            let mut props = JsonObject::new();
            props.insert("kind".into(), "flow".into());
            props.insert("origin".into(), l.origin.clone().into());
            props.insert("destination".into(), l.destination.clone().into());
            props.insert("trips".into(), l.trips.into());
            props.insert("weight".into(), l.weight.into());
            props.insert("width".into(), l.width.into());
            props.insert("color".into(), hex(l.color).into());
            props.insert("opacity".into(), f64::from(l.opacity).into());
            feature(
                Value::LineString(vec![vec![l.from.1, l.from.0], vec![l.to.1, l.to.0]]),
                props,
            )
        }));

        FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
        }
    }

    // ========================================================================
    // Terminal output
    // ========================================================================

    pub fn show_months(catalogue: &[MonthArchive]) {
        println!("\n{}", "═".repeat(60));
        println!("  📅 AVAILABLE MONTHS ({})", catalogue.len());
        println!("{}", "═".repeat(60));
        for archive in catalogue {
            println!("  {}  {:<16} {}", archive.month, archive.label, archive.location);
        }
    }

    pub fn show_loading(message: &str) {
        println!("⏳ {}", message);
    }

    pub fn show_rendered(rendered: &Rendered, page: usize) {
        println!("\n{}", "═".repeat(60));
        println!("  🚲 {}", rendered.summary);
        println!("{}", "═".repeat(60));
        Self::show_table(&rendered.table, page);

        if !rendered.map.lines.is_empty() {
            println!(
                "\n  🗺️  {} flow lines, widest {} px",
                rendered.map.lines.len(),
                rendered.map.lines.iter().map(|l| l.width).max().unwrap_or(0)
            );
        }
        println!("  📍 {} stations with rides", rendered.map.points.len());
    }

    pub fn show_table(table: &TablePayload, page: usize) {
        if table.rows.is_empty() {
            println!("\n  No trips match the current filters.");
            return;
        }

        let pages = table.page_count(TABLE_PAGE_SIZE);
        let page = page.min(pages - 1);
        println!("\n  {:<4} {:<44} {:>10}", "#", table.station_heading, table.trips_heading);
        println!("  {}", "─".repeat(60));
        for (i, row) in table.page(page, TABLE_PAGE_SIZE).iter().enumerate() {
            println!(
                "  {:<4} {:<44} {:>10}",
                page * TABLE_PAGE_SIZE + i + 1,
                row.station,
                format_count(row.trips)
            );
        }
        println!("  {}", "─".repeat(60));
        println!("  Page {} / {} ({} rows)", page + 1, pages, table.rows.len());
    }

    pub fn show_error(error: &str) {
        eprintln!("\n❌ {}", error);
    }
}

fn feature(value: Value, properties: JsonObject) -> Feature {
    Feature {
        bbox: None,
        geometry: Some(Geometry::new(value)),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bfe_models::{MonthKey, Station};

    fn stations() -> StationTable {
        StationTable::from_stations(vec![
            Station { name: "A".into(), latitude: 42.36, longitude: -71.09, city: "Cambridge".into() },
            Station { name: "B".into(), latitude: 42.35, longitude: -71.06, city: "Boston".into() },
            Station { name: "C".into(), latitude: 42.34, longitude: -71.10, city: "Boston".into() },
        ])
    }

    fn counts() -> Vec<StationRideCount> {
        vec![
            StationRideCount { station: "A".into(), count: 40 },
            StationRideCount { station: "B".into(), count: 10 },
        ]
    }

    fn flows() -> Vec<FlowEdge> {
        vec![
            FlowEdge { origin: "A".into(), destination: "B".into(), trips: 25, weight: 1.0 },
            FlowEdge { origin: "A".into(), destination: "C".into(), trips: 9, weight: 0.0 },
        ]
    }

    fn state(focus: Option<&str>) -> ViewState {
        ViewState {
            month: Some(MonthKey { year: 2024, month: 2 }),
            focus: focus.map(String::from),
            ..Default::default()
        }
    }

    #[test]
    fn counts_are_formatted_with_separators() {
        assert_eq!(format_count(0), "0");
        assert_eq!(format_count(999), "999");
        assert_eq!(format_count(1000), "1,000");
        assert_eq!(format_count(1234567), "1,234,567");
    }

    #[test]
    fn flow_lines_encode_width_color_and_paint_order() {
        let rendered = BFEViews::render(&counts(), &flows(), &state(Some("A")), &stations(), 50);
        let lines = &rendered.map.lines;
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].destination, "C");
        assert_eq!(lines[1].destination, "B");
        assert_eq!(lines[1].width, 3);
        assert_eq!(lines[0].width, 1);
        assert_eq!(lines[1].color, flow_color(1.0));
        assert!(lines.iter().all(|l| l.opacity == FLOW_OPACITY));
        assert_eq!(lines[1].from, (42.36, -71.09));
    }

    #[test]
    fn points_are_sized_and_colored_by_city() {
        let rendered = BFEViews::render(&counts(), &[], &state(None), &stations(), 50);
        let points = &rendered.map.points;
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].radius, MAX_POINT_RADIUS);
        assert!(points[1].radius < points[0].radius && points[1].radius > MIN_POINT_RADIUS);
        let boston = colorous::CATEGORY10[0];
        assert_eq!(points[1].color, [boston.r, boston.g, boston.b]);
        assert_ne!(points[0].color, points[1].color);
    }

    #[test]
    fn unfocused_view_ranks_stations_and_reports_month_total() {
        let rendered = BFEViews::render(&counts(), &[], &state(None), &stations(), 1234);
        assert_eq!(rendered.table.station_heading, "Station");
        assert_eq!(rendered.table.rows[0], TableRow { station: "A".into(), trips: 40 });
        assert_eq!(rendered.summary.to_string(), "Total trips in February 2024: 1,234");
    }

    #[test]
    fn focused_view_lists_counterparts_with_directional_wording() {
        let rendered = BFEViews::render(&counts(), &flows(), &state(Some("A")), &stations(), 1234);
        assert_eq!(rendered.table.station_heading, "Destination");
        assert_eq!(rendered.table.rows.len(), 2);
        assert_eq!(rendered.table.rows[0].station, "B");
        assert_eq!(rendered.summary.to_string(), "Origin: A | 40 trips");

        let mut arriving = state(Some("B"));
        arriving.direction = Direction::Destination;
        let rendered = BFEViews::render(&counts(), &[], &arriving, &stations(), 1234);
        assert_eq!(rendered.summary.to_string(), "Destination: B | 10 trips");
        assert_eq!(rendered.table.station_heading, "Origin");
    }

    #[test]
    fn table_pages_hold_ten_rows() {
        let table = TablePayload {
            station_heading: "Station".into(),
            trips_heading: "Trips".into(),
            rows: (0..23).map(|i| TableRow { station: format!("S{}", i), trips: i }).collect(),
        };
        assert_eq!(table.page_count(TABLE_PAGE_SIZE), 3);
        assert_eq!(table.page(2, TABLE_PAGE_SIZE).len(), 3);
        assert!(table.page(5, TABLE_PAGE_SIZE).is_empty());
        assert_eq!(TablePayload::default().page_count(TABLE_PAGE_SIZE), 1);
    }

    #[test]
    fn geojson_carries_points_and_lines() {
        let rendered = BFEViews::render(&counts(), &flows(), &state(Some("A")), &stations(), 50);
        let collection = BFEViews::map_geojson(&rendered.map);
        assert_eq!(collection.features.len(), 4);
        let line = &collection.features[3];
        let props = line.properties.as_ref().unwrap();
        assert_eq!(props["kind"], "flow");
        assert_eq!(props["destination"], "B");
        assert_eq!(props["width"], 3);
    }
}

// Dashboard for the Bikeshare Flow Explorer using egui/eframe
use crate::bfe_controllers::{Dispatch, Event, Session};
use crate::bfe_models::{MonthArchive, MonthKey, Result, StationTable, TripTable};
use crate::bfe_source::DataSource;
use crate::bfe_views::{format_count, MapPayload, MapPoint, Rendered, TableRow, TABLE_PAGE_SIZE};
use chrono::Utc;
use eframe::egui;
use egui::{Color32, Pos2, Rect, RichText, Sense, Stroke, Ui};
use egui_extras::{Column, TableBuilder};
use poll_promise::Promise;
use std::sync::Arc;
use std::time::Duration;

const MAP_MARGIN: f32 = 20.0;
/// Extra pixels around a station point that still count as a hit.
const CLICK_SLOP: f32 = 4.0;

// ============================================================================
// Map projection
// ============================================================================

/// Equirectangular projection fitted to the bounds of the station table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapProjection {
    min_lat: f64,
    max_lat: f64,
    min_lng: f64,
    max_lng: f64,
}

impl MapProjection {
    pub fn fit(stations: &StationTable) -> Option<Self> {
        let mut iter = stations.iter();
        let first = iter.next()?;
        let init = MapProjection {
            min_lat: first.latitude,
            max_lat: first.latitude,
            min_lng: first.longitude,
            max_lng: first.longitude,
        };
        Some(iter.fold(init, |b, s| MapProjection {
            min_lat: b.min_lat.min(s.latitude),
            max_lat: b.max_lat.max(s.latitude),
            min_lng: b.min_lng.min(s.longitude),
            max_lng: b.max_lng.max(s.longitude),
        }))
    }

    pub fn project(&self, latitude: f64, longitude: f64, rect: Rect) -> Pos2 {
        let mid_lat = (self.min_lat + self.max_lat) / 2.0;
        let mid_lng = (self.min_lng + self.max_lng) / 2.0;
        let lng_scale = mid_lat.to_radians().cos();

        let width = ((self.max_lng - self.min_lng) * lng_scale).max(f64::EPSILON);
        let height = (self.max_lat - self.min_lat).max(f64::EPSILON);
        let scale = (f64::from(rect.width()) / width).min(f64::from(rect.height()) / height);

        let center = rect.center();
        let x = f64::from(center.x) + (longitude - mid_lng) * lng_scale * scale;
        let y = f64::from(center.y) - (latitude - mid_lat) * scale;
        egui::pos2(x as f32, y as f32)
    }
}

/// The station point under `pointer`, closest first.
pub fn hit_test<'a>(
    points: &'a [MapPoint],
    projection: &MapProjection,
    rect: Rect,
    pointer: Pos2,
) -> Option<&'a MapPoint> {
    points
        .iter()
        .map(|p| (p, projection.project(p.latitude, p.longitude, rect).distance(pointer)))
        .filter(|(p, d)| *d <= p.radius + CLICK_SLOP)
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(p, _)| p)
}

// ============================================================================
// Table sorting
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortColumn {
    Station,
    Trips,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSort {
    pub column: SortColumn,
    pub ascending: bool,
}

impl TableSort {
    /// Clicking the active column flips it; clicking another column sorts it descending.
    pub fn toggled(current: Option<TableSort>, column: SortColumn) -> TableSort {
        match current {
            Some(sort) if sort.column == column => TableSort {
                column,
                ascending: !sort.ascending,
            },
            _ => TableSort {
                column,
                ascending: false,
            },
        }
    }

    fn arrow(current: Option<TableSort>, column: SortColumn) -> &'static str {
        match current {
            Some(sort) if sort.column == column && sort.ascending => " ⏶",
            Some(sort) if sort.column == column => " ⏷",
            _ => "",
        }
    }
}

pub fn sorted_rows(rows: &[TableRow], sort: Option<TableSort>) -> Vec<TableRow> {
    let mut rows = rows.to_vec();
    if let Some(sort) = sort {
        rows.sort_by(|a, b| {
            let ord = match sort.column {
                SortColumn::Station => a.station.cmp(&b.station),
                SortColumn::Trips => a.trips.cmp(&b.trips).then_with(|| b.station.cmp(&a.station)),
            };
            if sort.ascending { ord } else { ord.reverse() }
        });
    }
    rows
}

// ============================================================================
// Application State
// ============================================================================

pub struct BFEApp {
    source: Arc<dyn DataSource>,
    stations: StationTable,
    threshold: usize,
    session: Option<Session>,
    projection: Option<MapProjection>,
    rendered: Option<Rendered>,

    // Background work
    catalogue_promise: Option<Promise<Result<Vec<MonthArchive>>>>,
    loads: Vec<(MonthKey, Promise<Result<TripTable>>)>,

    // Widget state
    hour_lo: u8,
    hour_hi: u8,
    show_arrivals: bool,
    table_page: usize,
    table_sort: Option<TableSort>,
    hovered: Option<String>,

    startup_error: Option<String>,
    notice: Option<String>,
}

impl BFEApp {
    pub fn new(
        _cc: &eframe::CreationContext<'_>,
        source: Arc<dyn DataSource>,
        stations: StationTable,
        threshold: usize,
    ) -> Self {
        let projection = MapProjection::fit(&stations);
        let mut app = Self {
            source,
            stations,
            threshold,
            session: None,
            projection,
            rendered: None,
            catalogue_promise: None,
            loads: Vec::new(),
            hour_lo: 0,
            hour_hi: 24,
            show_arrivals: false,
            table_page: 0,
            table_sort: None,
            hovered: None,
            startup_error: None,
            notice: None,
        };
        app.start_catalogue();
        app
    }

    fn start_catalogue(&mut self) {
        let source = Arc::clone(&self.source);
        self.catalogue_promise = Some(Promise::spawn_thread("catalogue", move || source.list_months()));
        self.startup_error = None;
    }

    fn check_catalogue(&mut self) {
        let Some(promise) = self.catalogue_promise.take() else {
            return;
        };
        match promise.try_take() {
            Ok(Ok(catalogue)) => {
                log::info!("Dashboard ready with {} months", catalogue.len());
                let session = Session::new(self.stations.clone(), catalogue, self.threshold);
                self.rendered = Some(session.render());
                self.session = Some(session);
            }
            Ok(Err(e)) => {
                log::error!("Failed to list months: {}", e);
                self.startup_error = Some(format!("Failed to list available months: {}", e));
            }
            Err(pending) => self.catalogue_promise = Some(pending),
        }
    }

    fn spawn_load(&mut self, archive: MonthArchive) {
        let source = Arc::clone(&self.source);
        let month = archive.month;
        let promise = Promise::spawn_thread("month-load", move || source.fetch_month(&archive));
        self.loads.push((month, promise));
    }

    /// Hands finished loads to the session; results for superseded months are dropped there.
    fn check_loads(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let mut changed = false;
        let mut pending = Vec::with_capacity(self.loads.len());
        for (month, promise) in self.loads.drain(..) {
            match promise.try_take() {
                Ok(result) => {
                    changed = true;
                    if let Err(e) = session.complete_load(month, result) {
                        log::debug!("Load of {} failed: {}", month, e);
                    }
                }
                Err(promise) => pending.push((month, promise)),
            }
        }
        self.loads = pending;
        if changed {
            self.table_page = 0;
            self.refresh();
        }
    }

    fn send(&mut self, event: Event) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        match session.dispatch(event) {
            Ok(Dispatch::Fetch(archive)) => self.spawn_load(archive),
            Ok(Dispatch::Recomputed(_)) => self.table_page = 0,
            Ok(Dispatch::Ignored) => {}
            Err(e) => {
                log::warn!("Rejected event: {}", e);
                self.notice = Some(e.to_string());
            }
        }
        self.refresh();
    }

    /// Re-renders and pulls widget values back from the session, which may have dropped the event.
    fn refresh(&mut self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let state = session.state();
        self.hour_lo = state.hours.lo();
        self.hour_hi = state.hours.hi();
        self.show_arrivals = state.direction.is_toggled();
        self.rendered = Some(session.render());
    }
}

impl eframe::App for BFEApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.check_catalogue();
        self.check_loads();

        egui::TopBottomPanel::top("top_panel").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.heading("🚲 Bikeshare Flow Explorer");
                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    let now = Utc::now().with_timezone(&chrono_tz::America::New_York);
                    ui.label(now.format("%H:%M:%S").to_string());
                });
            });
        });
        ctx.request_repaint_after(Duration::from_secs(1));

        if self.session.is_none() {
            self.show_startup(ctx);
            return;
        }

        egui::SidePanel::left("controls").min_width(240.0).show(ctx, |ui| {
            self.show_controls(ui);
        });

        egui::SidePanel::right("table").min_width(320.0).show(ctx, |ui| {
            self.show_table(ui);
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            self.show_status(ui);
            self.show_map(ui);
        });

        if !self.loads.is_empty() {
            ctx.request_repaint_after(Duration::from_millis(100));
        }
    }
}

// ============================================================================
// View Implementations
// ============================================================================

impl BFEApp {
    fn show_startup(&mut self, ctx: &egui::Context) {
        let mut should_retry = false;
        egui::CentralPanel::default().show(ctx, |ui| {
            ui.centered_and_justified(|ui| {
                ui.vertical_centered(|ui| match &self.startup_error {
                    Some(error) => {
                        ui.colored_label(Color32::RED, "❌ Error");
                        ui.label(error);
                        if ui.button("Retry").clicked() {
                            should_retry = true;
                        }
                    }
                    None => {
                        ui.spinner();
                        ui.label("Listing available months...");
                    }
                });
            });
        });
        if should_retry {
            self.start_catalogue();
        }
        ctx.request_repaint_after(Duration::from_millis(100));
    }

    fn show_controls(&mut self, ui: &mut Ui) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let loading = session.is_loading();
        let current = session.state().month;
        let selected_text = session
            .loading_target()
            .map(|a| a.label.clone())
            .or_else(|| current.map(|m| m.label()))
            .unwrap_or_else(|| "Select a month".to_string());
        let catalogue: Vec<(MonthKey, String)> = session
            .catalogue()
            .iter()
            .rev()
            .map(|a| (a.month, a.label.clone()))
            .collect();

        let mut events = Vec::new();

        ui.heading("Filters");
        ui.separator();

        ui.add_enabled_ui(!loading, |ui| {
            egui::ComboBox::from_label("Month")
                .selected_text(selected_text)
                .width(160.0)
                .show_ui(ui, |ui| {
                    for (month, label) in &catalogue {
                        if ui.selectable_label(current == Some(*month), label).clicked() {
                            events.push(Event::MonthChanged(*month));
                        }
                    }
                });
        });

        ui.add_space(10.0);
        ui.label("Start hour");
        let lo_changed = ui
            .add(egui::Slider::new(&mut self.hour_lo, 0..=24).text("from"))
            .changed();
        let hi_changed = ui
            .add(egui::Slider::new(&mut self.hour_hi, 0..=24).text("to"))
            .changed();
        if lo_changed && self.hour_lo > self.hour_hi {
            self.hour_hi = self.hour_lo;
        }
        if hi_changed && self.hour_hi < self.hour_lo {
            self.hour_lo = self.hour_hi;
        }
        if lo_changed || hi_changed {
            events.push(Event::HourRangeChanged {
                lo: self.hour_lo,
                hi: self.hour_hi,
            });
        }

        ui.add_space(10.0);
        if ui
            .checkbox(&mut self.show_arrivals, "Count arrivals (destination stations)")
            .changed()
        {
            events.push(Event::DirectionToggled(self.show_arrivals));
        }

        ui.add_space(20.0);
        ui.separator();
        if let Some(focus) = session.state().focus.as_deref() {
            ui.label(format!("Focus: {}", focus));
            ui.label(format!("Flows with at least {} trips", session.threshold()));
        } else {
            ui.label("Click a station on the map to see its flows.");
        }
        ui.label(format!("Stations: {}", format_count(session.stations().len())));

        for event in events {
            self.send(event);
        }
    }

    fn show_status(&mut self, ui: &mut Ui) {
        let Some(rendered) = self.rendered.as_ref() else {
            return;
        };

        ui.horizontal(|ui| {
            ui.label(RichText::new(rendered.summary.to_string()).strong().size(16.0));
            if let Some(message) = &rendered.loading {
                ui.spinner();
                ui.label(message);
            }
        });

        let error = self
            .notice
            .clone()
            .or_else(|| self.session.as_ref().and_then(|s| s.last_error().map(str::to_string)));
        if let Some(error) = error {
            let mut dismissed = false;
            egui::Frame::group(ui.style()).show(ui, |ui| {
                ui.horizontal(|ui| {
                    ui.colored_label(Color32::RED, format!("❌ {}", error));
                    if ui.small_button("Dismiss").clicked() {
                        dismissed = true;
                    }
                });
            });
            if dismissed {
                self.notice = None;
                if let Some(session) = self.session.as_mut() {
                    session.clear_error();
                }
            }
        }
        ui.separator();
    }

    fn show_map(&mut self, ui: &mut Ui) {
        let (Some(rendered), Some(projection)) = (self.rendered.as_ref(), self.projection) else {
            ui.label("No station coordinates to draw.");
            return;
        };
        let map: &MapPayload = &rendered.map;

        let size = ui.available_size();
        let (response, painter) = ui.allocate_painter(size, Sense::click());
        let rect = response.rect.shrink(MAP_MARGIN);
        painter.rect_filled(response.rect, 4.0, Color32::from_gray(24));

        for line in &map.lines {
            let from = projection.project(line.from.0, line.from.1, rect);
            let to = projection.project(line.to.0, line.to.1, rect);
            let [r, g, b] = line.color;
            let alpha = (line.opacity * 255.0).round() as u8;
            painter.line_segment(
                [from, to],
                Stroke::new(line.width as f32, Color32::from_rgba_unmultiplied(r, g, b, alpha)),
            );
        }

        for point in &map.points {
            let pos = projection.project(point.latitude, point.longitude, rect);
            let [r, g, b] = point.color;
            painter.circle_filled(pos, point.radius, Color32::from_rgba_unmultiplied(r, g, b, 200));
            if point.focused {
                painter.circle_stroke(pos, point.radius + 3.0, Stroke::new(2.0, Color32::WHITE));
            }
        }

        self.hovered = response
            .hover_pos()
            .and_then(|pos| hit_test(&map.points, &projection, rect, pos))
            .map(|p| format!("{} ({}, {} trips)", p.station, p.city, format_count(p.count)));
        if let (Some(text), Some(pos)) = (&self.hovered, response.hover_pos()) {
            painter.text(
                pos + egui::vec2(10.0, -10.0),
                egui::Align2::LEFT_BOTTOM,
                text,
                egui::FontId::proportional(14.0),
                Color32::WHITE,
            );
        }

        let clicked = if response.clicked() {
            response
                .interact_pointer_pos()
                .and_then(|pos| hit_test(&map.points, &projection, rect, pos))
                .map(|p| p.station.clone())
        } else {
            None
        };
        if let Some(station) = clicked {
            self.send(Event::StationClicked(station));
        }
    }

    fn show_table(&mut self, ui: &mut Ui) {
        let Some(rendered) = self.rendered.as_ref() else {
            return;
        };
        let table = &rendered.table;
        let rows = sorted_rows(&table.rows, self.table_sort);
        let pages = table.page_count(TABLE_PAGE_SIZE);
        self.table_page = self.table_page.min(pages - 1);
        let start = self.table_page * TABLE_PAGE_SIZE;
        let end = (start + TABLE_PAGE_SIZE).min(rows.len());

        ui.heading("Stations");
        ui.separator();

        if rows.is_empty() {
            ui.label("No trips match the current filters.");
            return;
        }

        let station_heading = format!(
            "{}{}",
            table.station_heading,
            TableSort::arrow(self.table_sort, SortColumn::Station)
        );
        let trips_heading = format!(
            "{}{}",
            table.trips_heading,
            TableSort::arrow(self.table_sort, SortColumn::Trips)
        );
        let mut sort_clicked = None;

        TableBuilder::new(ui)
            .striped(true)
            .column(Column::auto().at_least(30.0))
            .column(Column::remainder().at_least(180.0))
            .column(Column::auto().at_least(80.0))
            .header(22.0, |mut header| {
                header.col(|ui| {
                    ui.strong("#");
                });
                header.col(|ui| {
                    if ui.button(station_heading.as_str()).clicked() {
                        sort_clicked = Some(SortColumn::Station);
                    }
                });
                header.col(|ui| {
                    if ui.button(trips_heading.as_str()).clicked() {
                        sort_clicked = Some(SortColumn::Trips);
                    }
                });
            })
            .body(|mut body| {
                for (i, row) in rows[start..end].iter().enumerate() {
                    body.row(20.0, |mut table_row| {
                        table_row.col(|ui| {
                            ui.label((start + i + 1).to_string());
                        });
                        table_row.col(|ui| {
                            ui.label(&row.station);
                        });
                        table_row.col(|ui| {
                            ui.label(format_count(row.trips));
                        });
                    });
                }
            });

        ui.separator();
        ui.horizontal(|ui| {
            if self.table_page > 0 && ui.button("Previous").clicked() {
                self.table_page -= 1;
            }
            ui.label(format!("Page {} / {}", self.table_page + 1, pages));
            if end < rows.len() && ui.button("Next").clicked() {
                self.table_page += 1;
            }
        });

        if let Some(column) = sort_clicked {
            self.table_sort = Some(TableSort::toggled(self.table_sort, column));
            self.table_page = 0;
        }
    }
}

// ============================================================================
// Public entry point
// ============================================================================

pub fn run_gui(source: Arc<dyn DataSource>, stations: StationTable, threshold: usize) -> std::result::Result<(), eframe::Error> {
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1280.0, 800.0])
            .with_min_inner_size([900.0, 600.0]),
        ..Default::default()
    };

    eframe::run_native(
        "Bikeshare Flow Explorer",
        options,
        Box::new(move |cc| Ok(Box::new(BFEApp::new(cc, source, stations, threshold)))),
    )
}

// Session state and event dispatch for the Bikeshare Flow Explorer
//
// Dependency chain: month -> trips -> station counts -> flows from the focus station.
// Every event maps to a fixed plan naming which links of that chain to recompute.

use crate::bfe_analysis::BFEAnalysis;
use crate::bfe_models::{
    BFEError, Direction, FlowEdge, HourRange, MonthArchive, MonthKey, Result, StationRideCount,
    StationTable, TripTable,
};
use crate::bfe_source::DataSource;
use crate::bfe_views::{BFEViews, Rendered};

// ============================================================================
// State
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ViewState {
    pub month: Option<MonthKey>,
    pub direction: Direction,
    pub hours: HourRange,
    pub focus: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    MonthLoading { target: MonthKey },
    Focused,
}

/// Interaction events, already normalized at the UI boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    MonthChanged(MonthKey),
    DirectionToggled(bool),
    HourRangeChanged { lo: u8, hi: u8 },
    StationClicked(String),
}

/// Which parts of the pipeline an event invalidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecomputePlan {
    pub fetch: Option<MonthKey>,
    pub aggregate: bool,
    pub flows: bool,
}

impl RecomputePlan {
    pub const NOTHING: RecomputePlan = RecomputePlan {
        fetch: None,
        aggregate: false,
        flows: false,
    };

    /// The minimal recompute for `event` given the current phase and state.
    pub fn for_event(phase: Phase, state: &ViewState, event: &Event) -> RecomputePlan {
        match (phase, event) {
            (_, Event::MonthChanged(month)) => RecomputePlan {
                fetch: Some(*month),
                ..Self::NOTHING
            },
            (Phase::MonthLoading { .. }, _) => Self::NOTHING,
            (_, Event::DirectionToggled(_)) | (_, Event::HourRangeChanged { .. }) => RecomputePlan {
                fetch: None,
                aggregate: true,
                flows: state.focus.is_some(),
            },
            (_, Event::StationClicked(_)) => RecomputePlan {
                fetch: None,
                aggregate: false,
                flows: true,
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::NOTHING
    }
}

/// What the caller has to do after an event was dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Fetch this archive and hand the result to `Session::complete_load`.
    Fetch(MonthArchive),
    Recomputed(RecomputePlan),
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Applied,
    Stale,
}

// ============================================================================
// Session
// ============================================================================

/// One user's dashboard session: state, loaded trips and derived tables.
pub struct Session {
    stations: StationTable,
    catalogue: Vec<MonthArchive>,
    threshold: usize,
    state: ViewState,
    phase: Phase,
    trips: TripTable,
    counts: Vec<StationRideCount>,
    flows: Vec<FlowEdge>,
    last_error: Option<String>,
}

impl Session {
    pub fn new(stations: StationTable, catalogue: Vec<MonthArchive>, threshold: usize) -> Self {
        Session {
            stations,
            catalogue,
            threshold,
            state: ViewState::default(),
            phase: Phase::Idle,
            trips: TripTable::default(),
            counts: Vec::new(),
            flows: Vec::new(),
            last_error: None,
        }
    }

    pub fn state(&self) -> &ViewState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.phase, Phase::MonthLoading { .. })
    }

    pub fn loading_target(&self) -> Option<&MonthArchive> {
        match self.phase {
            Phase::MonthLoading { target } => self.archive_for(target),
            _ => None,
        }
    }

    pub fn catalogue(&self) -> &[MonthArchive] {
        &self.catalogue
    }

    pub fn archive_for(&self, month: MonthKey) -> Option<&MonthArchive> {
        self.catalogue.iter().find(|a| a.month == month)
    }

    pub fn stations(&self) -> &StationTable {
        &self.stations
    }

    pub fn trips(&self) -> &TripTable {
        &self.trips
    }

    pub fn counts(&self) -> &[StationRideCount] {
        &self.counts
    }

    pub fn flows(&self) -> &[FlowEdge] {
        &self.flows
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    /// Applies one interaction event.
    ///
    /// Month changes only record the new target and return `Dispatch::Fetch`; the
    /// caller performs the fetch and reports back through `complete_load`.
    pub fn dispatch(&mut self, event: Event) -> Result<Dispatch> {
        let plan = RecomputePlan::for_event(self.phase, &self.state, &event);

        match event {
            Event::MonthChanged(month) => {
                let archive = self
                    .archive_for(month)
                    .cloned()
                    .ok_or_else(|| BFEError::InvalidInput(format!("No trip archive for {}", month)))?;
                if let Phase::MonthLoading { target } = self.phase {
                    log::info!("Month {} supersedes in-flight load of {}", month, target);
                }
                self.phase = Phase::MonthLoading { target: month };
                return Ok(Dispatch::Fetch(archive));
            }
            _ if plan.is_empty() => {
                log::debug!("Ignoring {:?} while a month is loading", event);
                return Ok(Dispatch::Ignored);
            }
            Event::DirectionToggled(on) => {
                self.state.direction = Direction::from_toggle(on);
            }
            Event::HourRangeChanged { lo, hi } => {
                self.state.hours = HourRange::new(lo, hi)?;
            }
            Event::StationClicked(key) => {
                if !self.stations.contains(&key) {
                    log::warn!("Ignoring click on unknown station '{}'", key);
                    return Ok(Dispatch::Ignored);
                }
                self.state.focus = Some(key);
            }
        }

        self.phase = self.settled_phase();
        self.apply(&plan);
        Ok(Dispatch::Recomputed(plan))
    }

    /// Hands back the result of a fetch started by `Dispatch::Fetch`.
    ///
    /// Results for a month that is no longer the target are discarded. A failed
    /// load leaves the previously displayed month, focus and tables untouched.
    pub fn complete_load(&mut self, month: MonthKey, result: Result<TripTable>) -> Result<LoadOutcome> {
        match self.phase {
            Phase::MonthLoading { target } if target == month => {}
            _ => {
                log::info!("Discarding stale load result for {}", month);
                return Ok(LoadOutcome::Stale);
            }
        }

        match result {
            Ok(trips) => {
                log::info!("Loaded {} trips for {}", trips.len(), month.label());
                self.trips = trips;
                self.state.month = Some(month);
                self.state.focus = None;
                self.flows.clear();
                self.last_error = None;
                self.phase = Phase::Idle;
                self.apply(&RecomputePlan {
                    fetch: None,
                    aggregate: true,
                    flows: false,
                });
                Ok(LoadOutcome::Applied)
            }
            Err(e) => {
                log::error!("Failed to load {}: {}", month.label(), e);
                self.last_error = Some(format!("Could not load {}: {}", month.label(), e));
                self.phase = self.settled_phase();
                Err(e)
            }
        }
    }

    /// Dispatches an event and performs any fetch it asks for before returning.
    pub fn run(&mut self, source: &dyn DataSource, event: Event) -> Result<Dispatch> {
        let dispatch = self.dispatch(event)?;
        if let Dispatch::Fetch(archive) = &dispatch {
            let result = source.fetch_month(archive);
            self.complete_load(archive.month, result)?;
        }
        Ok(dispatch)
    }

    /// Map, table and summary for the current state.
    pub fn render(&self) -> Rendered {
        let mut rendered = BFEViews::render(
            &self.counts,
            &self.flows,
            &self.state,
            &self.stations,
            self.trips.len(),
        );
        rendered.loading = self.loading_target().map(|a| format!("Loading {}...", a.label));
        rendered
    }

    fn settled_phase(&self) -> Phase {
        if self.state.focus.is_some() {
            Phase::Focused
        } else {
            Phase::Idle
        }
    }

    fn apply(&mut self, plan: &RecomputePlan) {
        if plan.aggregate {
            self.counts = BFEAnalysis::aggregate(
                &self.trips,
                &self.stations,
                self.state.direction,
                self.state.hours,
            );
        }
        if plan.flows {
            self.flows = match &self.state.focus {
                Some(focus) => BFEAnalysis::query(
                    &self.trips,
                    focus,
                    self.state.direction,
                    self.state.hours,
                    self.threshold,
                ),
                None => Vec::new(),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bfe_models::{Station, Trip};
    use crate::bfe_views::SummaryText;
    use std::sync::Mutex;

    struct FakeSource {
        months: Vec<(MonthArchive, Vec<Trip>)>,
        fetches: Mutex<Vec<MonthKey>>,
        broken: Option<MonthKey>,
    }

    impl FakeSource {
        fn new() -> Self {
            let feb = MonthArchive::new(MonthKey { year: 2024, month: 2 }, "202402-bluebikes-tripdata.zip");
            let mar = MonthArchive::new(MonthKey { year: 2024, month: 3 }, "202403-bluebikes-tripdata.zip");
            FakeSource {
                months: vec![
                    (
                        feb,
                        vec![
                            Trip::new("A", "B", 9),
                            Trip::new("A", "B", 9),
                            Trip::new("A", "C", 20),
                            Trip::new("B", "A", 12),
                        ],
                    ),
                    (mar, vec![Trip::new("C", "A", 8)]),
                ],
                fetches: Mutex::new(Vec::new()),
                broken: None,
            }
        }

        fn fetch_count(&self) -> usize {
            self.fetches.lock().unwrap().len()
        }
    }

    impl DataSource for FakeSource {
        fn list_months(&self) -> Result<Vec<MonthArchive>> {
            Ok(self.months.iter().map(|(a, _)| a.clone()).collect())
        }

        fn fetch_month(&self, archive: &MonthArchive) -> Result<TripTable> {
            self.fetches.lock().unwrap().push(archive.month);
            if self.broken == Some(archive.month) {
                return Err(BFEError::DataFetch("bucket unavailable".to_string()));
            }
            self.months
                .iter()
                .find(|(a, _)| a.month == archive.month)
                .map(|(_, trips)| TripTable::from_trips(trips.clone()))
                .ok_or_else(|| BFEError::DataFetch("missing".to_string()))
        }
    }

    fn feb() -> MonthKey {
        MonthKey { year: 2024, month: 2 }
    }

    fn mar() -> MonthKey {
        MonthKey { year: 2024, month: 3 }
    }

    fn session(source: &FakeSource) -> Session {
        let stations = StationTable::from_stations(["A", "B", "C"].iter().enumerate().map(|(i, n)| Station {
            name: n.to_string(),
            latitude: 42.35 + i as f64 * 0.01,
            longitude: -71.08,
            city: if i == 0 { "Cambridge" } else { "Boston" }.to_string(),
        }));
        Session::new(stations, source.list_months().unwrap(), 0)
    }

    #[test]
    fn plans_are_minimal_per_event() {
        let mut state = ViewState::default();
        let month = RecomputePlan::for_event(Phase::Idle, &state, &Event::MonthChanged(feb()));
        assert_eq!(month.fetch, Some(feb()));

        let hours = RecomputePlan::for_event(Phase::Idle, &state, &Event::HourRangeChanged { lo: 1, hi: 2 });
        assert_eq!(hours, RecomputePlan { fetch: None, aggregate: true, flows: false });

        state.focus = Some("A".to_string());
        let toggle = RecomputePlan::for_event(Phase::Focused, &state, &Event::DirectionToggled(true));
        assert_eq!(toggle, RecomputePlan { fetch: None, aggregate: true, flows: true });

        let click = RecomputePlan::for_event(Phase::Focused, &state, &Event::StationClicked("B".into()));
        assert_eq!(click, RecomputePlan { fetch: None, aggregate: false, flows: true });

        let loading = Phase::MonthLoading { target: feb() };
        assert!(RecomputePlan::for_event(loading, &state, &Event::StationClicked("B".into())).is_empty());
        assert_eq!(
            RecomputePlan::for_event(loading, &state, &Event::MonthChanged(mar())).fetch,
            Some(mar())
        );
    }

    #[test]
    fn hour_change_recounts_without_refetching() {
        let source = FakeSource::new();
        let mut session = session(&source);
        session.run(&source, Event::MonthChanged(feb())).unwrap();
        assert_eq!(source.fetch_count(), 1);
        assert_eq!(BFEAnalysis::count_for(session.counts(), "A"), 3);

        session.run(&source, Event::HourRangeChanged { lo: 10, hi: 24 }).unwrap();
        assert_eq!(source.fetch_count(), 1);
        assert_eq!(BFEAnalysis::count_for(session.counts(), "A"), 1);
        assert_eq!(session.state().month, Some(feb()));
    }

    #[test]
    fn clicking_focuses_and_direction_requeries() {
        let source = FakeSource::new();
        let mut session = session(&source);
        session.run(&source, Event::MonthChanged(feb())).unwrap();

        session.run(&source, Event::StationClicked("A".into())).unwrap();
        assert_eq!(session.phase(), Phase::Focused);
        assert_eq!(session.flows().len(), 2);
        assert_eq!(session.flows()[0].destination, "B");

        session.run(&source, Event::DirectionToggled(true)).unwrap();
        assert_eq!(session.phase(), Phase::Focused);
        assert_eq!(session.state().direction, Direction::Destination);
        assert_eq!(session.flows().len(), 1);
        assert_eq!(session.flows()[0].origin, "B");

        session.run(&source, Event::StationClicked("B".into())).unwrap();
        assert_eq!(session.state().focus.as_deref(), Some("B"));
        assert_eq!(source.fetch_count(), 1);
    }

    #[test]
    fn hour_change_while_focused_requeries_flows() {
        let source = FakeSource::new();
        let mut session = session(&source);
        session.run(&source, Event::MonthChanged(feb())).unwrap();
        session.run(&source, Event::StationClicked("A".into())).unwrap();
        assert_eq!(session.flows().len(), 2);

        let dispatch = session.run(&source, Event::HourRangeChanged { lo: 10, hi: 24 }).unwrap();
        assert_eq!(
            dispatch,
            Dispatch::Recomputed(RecomputePlan { fetch: None, aggregate: true, flows: true })
        );
        assert_eq!(session.phase(), Phase::Focused);
        assert_eq!(session.state().focus.as_deref(), Some("A"));
        assert_eq!(session.flows().len(), 1);
        assert_eq!(session.flows()[0].destination, "C");
        assert_eq!(source.fetch_count(), 1);
    }

    #[test]
    fn month_change_clears_focus_and_keeps_filters() {
        let source = FakeSource::new();
        let mut session = session(&source);
        session.run(&source, Event::MonthChanged(feb())).unwrap();
        session.run(&source, Event::DirectionToggled(true)).unwrap();
        session.run(&source, Event::HourRangeChanged { lo: 5, hi: 22 }).unwrap();
        session.run(&source, Event::StationClicked("A".into())).unwrap();

        session.run(&source, Event::MonthChanged(mar())).unwrap();
        assert_eq!(session.phase(), Phase::Idle);
        assert_eq!(session.state().focus, None);
        assert!(session.flows().is_empty());
        assert_eq!(session.state().direction, Direction::Destination);
        assert_eq!(session.state().hours, HourRange::new(5, 22).unwrap());

        let rendered = session.render();
        assert_eq!(rendered.summary, SummaryText::Month { label: "March 2024".into(), trips: 1 });
    }

    #[test]
    fn loading_ignores_interaction_and_latest_month_wins() {
        let source = FakeSource::new();
        let mut session = session(&source);

        assert!(matches!(session.dispatch(Event::MonthChanged(feb())).unwrap(), Dispatch::Fetch(_)));
        assert!(session.render().loading.is_some());
        assert_eq!(session.dispatch(Event::StationClicked("A".into())).unwrap(), Dispatch::Ignored);
        assert_eq!(session.state().focus, None);

        assert!(matches!(session.dispatch(Event::MonthChanged(mar())).unwrap(), Dispatch::Fetch(_)));

        let late = source.fetch_month(session.archive_for(feb()).unwrap());
        assert_eq!(session.complete_load(feb(), late).unwrap(), LoadOutcome::Stale);
        assert!(session.is_loading());

        let fresh = source.fetch_month(session.archive_for(mar()).unwrap());
        assert_eq!(session.complete_load(mar(), fresh).unwrap(), LoadOutcome::Applied);
        assert_eq!(session.state().month, Some(mar()));
        assert!(!session.is_loading());
        assert!(session.render().loading.is_none());
    }

    #[test]
    fn failed_load_keeps_previous_month() {
        let mut source = FakeSource::new();
        source.broken = Some(mar());
        let mut session = session(&source);
        session.run(&source, Event::MonthChanged(feb())).unwrap();
        session.run(&source, Event::StationClicked("A".into())).unwrap();

        assert!(session.run(&source, Event::MonthChanged(mar())).is_err());
        assert_eq!(session.state().month, Some(feb()));
        assert_eq!(session.state().focus.as_deref(), Some("A"));
        assert_eq!(session.phase(), Phase::Focused);
        assert_eq!(session.trips().len(), 4);
        assert!(session.last_error().is_some());
    }

    #[test]
    fn invalid_hours_and_unknown_months_are_rejected() {
        let source = FakeSource::new();
        let mut session = session(&source);
        assert!(session.dispatch(Event::HourRangeChanged { lo: 9, hi: 3 }).is_err());
        assert_eq!(session.state().hours, HourRange::full());
        assert!(session.dispatch(Event::MonthChanged(MonthKey { year: 1999, month: 1 })).is_err());
        assert_eq!(session.phase(), Phase::Idle);
    }

    #[test]
    fn empty_hour_window_still_reports_month_total() {
        let source = FakeSource::new();
        let mut session = session(&source);
        session.run(&source, Event::MonthChanged(feb())).unwrap();
        session.run(&source, Event::HourRangeChanged { lo: 21, hi: 24 }).unwrap();
        assert!(session.counts().is_empty());
        let rendered = session.render();
        assert_eq!(rendered.summary, SummaryText::Month { label: "February 2024".into(), trips: 4 });
        assert!(rendered.map.points.is_empty());
    }
}

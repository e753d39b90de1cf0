// Station ride counts and origin-destination flows under the active filters
use crate::bfe_models::{Direction, FlowEdge, HourRange, StationRideCount, StationTable, TripTable};
use std::collections::HashMap;

/// Counterparts at or below this many trips are hidden from the map.
pub const DEFAULT_FLOW_THRESHOLD: usize = 8;

/// Weight given to every counterpart when all counts are equal.
pub const DEGENERATE_WEIGHT: f64 = 0.5;

/// Min-max scaler over a set of counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinMax {
    min: usize,
    max: usize,
}

impl MinMax {
    pub fn over(values: impl Iterator<Item = usize>) -> Self {
        let (min, max) = values.fold((usize::MAX, 0usize), |(lo, hi), v| (lo.min(v), hi.max(v)));
        MinMax { min, max }
    }

    /// Position of `value` in `[0, 1]`; a degenerate set maps everything to the midpoint.
    pub fn weight(&self, value: usize) -> f64 {
        if self.max <= self.min {
            return DEGENERATE_WEIGHT;
        }
        let scaled = (value as f64 - self.min as f64) / (self.max - self.min) as f64;
        scaled.clamp(0.0, 1.0)
    }
}

pub struct BFEAnalysis;

impl BFEAnalysis {
    /// Ride counts per station for trips starting inside `hours`.
    ///
    /// Trips are attributed to their start station (origin-basis) or end station
    /// (destination-basis). Stations without rides are left out, and trips naming
    /// a station missing from `stations` cannot be attributed and are skipped.
    /// The result is ranked by count descending, then by station name.
    pub fn aggregate(
        trips: &TripTable,
        stations: &StationTable,
        direction: Direction,
        hours: HourRange,
    ) -> Vec<StationRideCount> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        let mut unattributed = 0usize;

        for trip in trips.iter().filter(|t| hours.contains(t.start_hour)) {
            let station = direction.station_of(trip);
            if stations.contains(station) {
                *counts.entry(station).or_insert(0) += 1;
            } else {
                unattributed += 1;
            }
        }

        if unattributed > 0 {
            log::warn!(
                "{} trips reference stations missing from the reference table and were excluded",
                unattributed
            );
        }

        let mut ranked: Vec<StationRideCount> = stations
            .iter()
            .filter_map(|station| {
                let count = counts.get(station.name.as_str()).copied().unwrap_or(0);
                (count > 0).then(|| StationRideCount {
                    station: station.name.clone(),
                    count,
                })
            })
            .collect();
        Self::rank(&mut ranked);
        ranked
    }

    /// Count descending, name ascending.
    pub fn rank(counts: &mut [StationRideCount]) {
        counts.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.station.cmp(&b.station)));
    }

    /// Flows between `focus` and every counterpart station.
    ///
    /// Weights are min-max scaled over all counterparts of `focus` before the
    /// `threshold` is applied, so hidden flows still anchor the scale.
    pub fn query(
        trips: &TripTable,
        focus: &str,
        direction: Direction,
        hours: HourRange,
        threshold: usize,
    ) -> Vec<FlowEdge> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for trip in trips
            .iter()
            .filter(|t| hours.contains(t.start_hour))
            .filter(|t| direction.station_of(t) == focus)
        {
            *counts.entry(direction.counterpart_of(trip)).or_insert(0) += 1;
        }

        let scale = MinMax::over(counts.values().copied());

        let mut edges: Vec<FlowEdge> = counts
            .into_iter()
            .filter(|(_, count)| *count > threshold)
            .map(|(counterpart, count)| {
                let (origin, destination) = match direction {
                    Direction::Origin => (focus, counterpart),
                    Direction::Destination => (counterpart, focus),
                };
                FlowEdge {
                    origin: origin.to_string(),
                    destination: destination.to_string(),
                    trips: count,
                    weight: scale.weight(count),
                }
            })
            .collect();

        edges.sort_by(|a, b| {
            b.trips
                .cmp(&a.trips)
                .then_with(|| a.counterpart(direction).cmp(b.counterpart(direction)))
        });
        edges
    }

    /// Rides attributed to `station` in a ranked count list.
    pub fn count_for(counts: &[StationRideCount], station: &str) -> usize {
        counts
            .iter()
            .find(|c| c.station == station)
            .map(|c| c.count)
            .unwrap_or(0)
    }
}

// Next-departures query: window, active-service filter, label resolution,
// dedup and formatting.

use std::collections::HashSet;

use chrono::{DateTime, Timelike};
use chrono_tz::Tz;

use crate::schedule::{ScheduleSnapshot, StopTime, gtfs_time_to_seconds};

const WINDOW_SECS: u32 = 4 * 3600;

/// The next `limit` distinct departures at `stop_id`, formatted as
/// `"{route_label} {minutes}"` for the display client. Empty when nothing
/// is scheduled.
pub fn next_arrivals(
    schedule: &ScheduleSnapshot,
    stop_id: &str,
    limit: usize,
    now: DateTime<Tz>,
) -> Vec<String> {
    let Some(rows) = schedule.stop_times_by_stop.get(stop_id) else {
        return Vec::new();
    };

    // Departure time, falling back to arrival time; rows with neither are
    // excluded.
    let departures: Vec<(u32, &StopTime)> = rows
        .iter()
        .filter_map(|st| {
            let time = st
                .departure_time
                .as_deref()
                .or(st.arrival_time.as_deref())?;
            Some((gtfs_time_to_seconds(time)?, st))
        })
        .collect();

    let now_sec = now.hour() * 3600 + now.minute() * 60 + now.second();
    let horizon = now_sec + WINDOW_SECS;

    let mut upcoming: Vec<(u32, &StopTime)> = departures
        .iter()
        .filter(|(dep_sec, _)| *dep_sec >= now_sec && *dep_sec <= horizon)
        .copied()
        .collect();
    if upcoming.is_empty() {
        // Nothing inside the rolling window; take anything still ahead of
        // now (late-night gaps in sparse schedules).
        upcoming = departures
            .into_iter()
            .filter(|(dep_sec, _)| *dep_sec >= now_sec)
            .collect();
    }
    if upcoming.is_empty() {
        return Vec::new();
    }

    // Keep only trips on a service running today, unless calendar data is
    // missing or the filter would wipe out every row.
    let active = schedule.active_service_ids(now.date_naive());
    if !active.is_empty() {
        let filtered: Vec<(u32, &StopTime)> = upcoming
            .iter()
            .filter(|(_, st)| {
                schedule
                    .trips
                    .get(&st.trip_id)
                    .map(|trip| active.contains(&trip.service_id))
                    .unwrap_or(false)
            })
            .copied()
            .collect();
        if !filtered.is_empty() {
            upcoming = filtered;
        }
    }

    upcoming.sort_by_key(|(dep_sec, _)| *dep_sec);

    let mut seen_dep = HashSet::new();
    let mut out = Vec::new();
    for (dep_sec, stop_time) in upcoming {
        // Same departure time exported twice collapses to one entry
        if !seen_dep.insert(dep_sec) {
            continue;
        }
        let minutes = dep_sec.saturating_sub(now_sec) / 60;
        out.push(format!("{} {}", route_label(schedule, stop_time), minutes));
        if out.len() >= limit {
            break;
        }
    }

    out
}

/// Display label for a stop time: route short name, else long name, else
/// the route identifier, else a placeholder.
fn route_label(schedule: &ScheduleSnapshot, stop_time: &StopTime) -> String {
    let trip = schedule.trips.get(&stop_time.trip_id);
    if let Some(route) = trip.and_then(|t| schedule.routes.get(&t.route_id)) {
        if let Some(short) = &route.short_name {
            return short.clone();
        }
        if let Some(long) = &route.long_name {
            return long.clone();
        }
        if !route.route_id.is_empty() {
            return route.route_id.clone();
        }
    }
    if let Some(trip) = trip {
        if !trip.route_id.is_empty() {
            return trip.route_id.clone();
        }
    }
    "route?".to_string()
}

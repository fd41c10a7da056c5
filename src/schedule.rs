// Static GTFS schedule: typed records, the parsed snapshot with its lookup
// indexes, and the service-calendar resolver.

use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Read};

use bytes::Bytes;
use chrono::{Datelike, NaiveDate, Weekday};
use zip::ZipArchive;

use crate::error::{Result, TransitError};

#[derive(Debug, Clone)]
pub struct Stop {
    pub stop_id: String,
    pub stop_name: String,
}

#[derive(Debug, Clone)]
pub struct StopTime {
    pub trip_id: String,
    pub stop_id: String,
    pub arrival_time: Option<String>,
    pub departure_time: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Trip {
    pub trip_id: String,
    pub route_id: String,
    pub service_id: String,
}

#[derive(Debug, Clone)]
pub struct Route {
    pub route_id: String,
    pub short_name: Option<String>,
    pub long_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CalendarRule {
    pub service_id: String,
    /// Monday-first weekday flags, matching the GTFS column order.
    pub weekdays: [bool; 7],
    pub start_date: u32,
    pub end_date: u32,
}

impl CalendarRule {
    pub fn runs_on(&self, weekday: Weekday) -> bool {
        self.weekdays[weekday.num_days_from_monday() as usize]
    }
}

/// GTFS exception_type: 1 = service added, 2 = service removed.
#[derive(Debug, Clone)]
pub struct CalendarException {
    pub service_id: String,
    pub date: u32,
    pub exception_type: u32,
}

/// One fully-parsed static bundle. Built once per load; queries only read.
/// Any of the six tables may be empty when the bundle omitted its file.
#[derive(Debug, Default)]
pub struct ScheduleSnapshot {
    pub stops: HashMap<String, Stop>,
    pub stop_times_by_stop: HashMap<String, Vec<StopTime>>,
    pub trips: HashMap<String, Trip>,
    pub routes: HashMap<String, Route>,
    pub calendar: Vec<CalendarRule>,
    pub calendar_dates: Vec<CalendarException>,
}

fn date_to_int(date: NaiveDate) -> u32 {
    date.year() as u32 * 10_000 + date.month() * 100 + date.day()
}

/// Parses a GTFS `HH:MM:SS` time into seconds since local midnight.
/// Hours may exceed 23 for post-midnight trips (e.g. `25:10:00`).
pub fn gtfs_time_to_seconds(t: &str) -> Option<u32> {
    let mut parts = t.trim().splitn(3, ':');
    let h: u32 = parts.next()?.parse().ok()?;
    let m: u32 = parts.next()?.parse().ok()?;
    let s: u32 = parts.next()?.parse().ok()?;
    Some(h * 3600 + m * 60 + s)
}

fn non_empty(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

impl ScheduleSnapshot {
    /// Parses a GTFS zip bundle. Each table is parsed independently; a
    /// file absent from the archive yields an empty table so partial
    /// bundles still serve whichever queries their tables support. A
    /// malformed table fails the load.
    pub fn from_zip(bytes: &Bytes) -> Result<Self> {
        let cursor = Cursor::new(bytes.clone());
        let mut archive = ZipArchive::new(cursor)?;

        let mut snapshot = ScheduleSnapshot::default();

        if let Some(contents) = read_table(&mut archive, "stops.txt")? {
            snapshot.stops = parse_stops(&contents)?;
        }
        if let Some(contents) = read_table(&mut archive, "stop_times.txt")? {
            snapshot.stop_times_by_stop = parse_stop_times(&contents)?;
        }
        if let Some(contents) = read_table(&mut archive, "trips.txt")? {
            snapshot.trips = parse_trips(&contents)?;
        }
        if let Some(contents) = read_table(&mut archive, "routes.txt")? {
            snapshot.routes = parse_routes(&contents)?;
        }
        if let Some(contents) = read_table(&mut archive, "calendar.txt")? {
            snapshot.calendar = parse_calendar(&contents)?;
        }
        if let Some(contents) = read_table(&mut archive, "calendar_dates.txt")? {
            snapshot.calendar_dates = parse_calendar_dates(&contents)?;
        }

        log::info!(
            "GTFS loaded: {} stops, {} stop-time groups, {} trips, {} routes, {} calendar rules, {} exceptions",
            snapshot.stops.len(),
            snapshot.stop_times_by_stop.len(),
            snapshot.trips.len(),
            snapshot.routes.len(),
            snapshot.calendar.len(),
            snapshot.calendar_dates.len()
        );

        Ok(snapshot)
    }

    /// Service identifiers running on `today`. Weekly calendar rules first,
    /// then date-specific exceptions, which override rule membership in
    /// both directions. Recomputed on every arrival query so a date
    /// rollover is picked up immediately.
    pub fn active_service_ids(&self, today: NaiveDate) -> HashSet<String> {
        let today_int = date_to_int(today);
        let weekday = today.weekday();

        let mut active = HashSet::new();

        for rule in &self.calendar {
            if rule.start_date <= today_int && today_int <= rule.end_date && rule.runs_on(weekday) {
                active.insert(rule.service_id.clone());
            }
        }

        for exception in &self.calendar_dates {
            if exception.date != today_int {
                continue;
            }
            match exception.exception_type {
                1 => {
                    active.insert(exception.service_id.clone());
                }
                2 => {
                    active.remove(&exception.service_id);
                }
                other => {
                    log::debug!(
                        "ignoring unknown exception_type {} for service {}",
                        other,
                        exception.service_id
                    );
                }
            }
        }

        active
    }
}

/// `Ok(None)` only when the file is absent from the archive. A member
/// that is present but unreadable fails the load, so a corrupt bundle
/// never replaces a good snapshot with gutted tables.
fn read_table(archive: &mut ZipArchive<Cursor<Bytes>>, name: &str) -> Result<Option<String>> {
    match archive.by_name(name) {
        Ok(mut file) => {
            let mut contents = String::new();
            file.read_to_string(&mut contents)
                .map_err(|e| TransitError::Decode(format!("{}: {}", name, e)))?;
            // Some agency exports carry a UTF-8 BOM
            Ok(Some(contents.trim_start_matches('\u{feff}').to_string()))
        }
        Err(_) => {
            log::debug!("{} not present in bundle", name);
            Ok(None)
        }
    }
}

fn column(headers: &csv::StringRecord, name: &str) -> Option<usize> {
    headers.iter().position(|h| h == name)
}

fn required_column(headers: &csv::StringRecord, file: &str, name: &str) -> Result<usize> {
    column(headers, name)
        .ok_or_else(|| TransitError::PartialData(format!("{} missing {} column", file, name)))
}

fn parse_stops(contents: &str) -> Result<HashMap<String, Stop>> {
    let mut rdr = csv::Reader::from_reader(contents.as_bytes());
    let headers = rdr.headers()?.clone();

    let idx_id = required_column(&headers, "stops.txt", "stop_id")?;
    let idx_name = column(&headers, "stop_name");

    let mut stops = HashMap::new();
    for result in rdr.records() {
        let record = result?;
        let stop_id = record.get(idx_id).unwrap_or("").to_string();
        if stop_id.is_empty() {
            continue;
        }
        let stop_name = idx_name
            .and_then(|i| record.get(i))
            .unwrap_or("")
            .to_string();
        stops.insert(stop_id.clone(), Stop { stop_id, stop_name });
    }

    Ok(stops)
}

fn parse_stop_times(contents: &str) -> Result<HashMap<String, Vec<StopTime>>> {
    let mut rdr = csv::Reader::from_reader(contents.as_bytes());
    let headers = rdr.headers()?.clone();

    let idx_trip = required_column(&headers, "stop_times.txt", "trip_id")?;
    let idx_stop = required_column(&headers, "stop_times.txt", "stop_id")?;
    let idx_arrival = column(&headers, "arrival_time");
    let idx_departure = column(&headers, "departure_time");

    let mut stop_times: HashMap<String, Vec<StopTime>> = HashMap::new();
    for result in rdr.records() {
        let record = result?;
        let trip_id = record.get(idx_trip).unwrap_or("").to_string();
        let stop_id = record.get(idx_stop).unwrap_or("").to_string();
        if trip_id.is_empty() || stop_id.is_empty() {
            continue;
        }

        let stop_time = StopTime {
            trip_id,
            stop_id: stop_id.clone(),
            arrival_time: idx_arrival.and_then(|i| record.get(i)).and_then(non_empty),
            departure_time: idx_departure.and_then(|i| record.get(i)).and_then(non_empty),
        };

        stop_times.entry(stop_id).or_default().push(stop_time);
    }

    Ok(stop_times)
}

fn parse_trips(contents: &str) -> Result<HashMap<String, Trip>> {
    let mut rdr = csv::Reader::from_reader(contents.as_bytes());
    let headers = rdr.headers()?.clone();

    let idx_trip = required_column(&headers, "trips.txt", "trip_id")?;
    let idx_route = required_column(&headers, "trips.txt", "route_id")?;
    let idx_service = column(&headers, "service_id");

    let mut trips = HashMap::new();
    for result in rdr.records() {
        let record = result?;
        let trip_id = record.get(idx_trip).unwrap_or("").to_string();
        if trip_id.is_empty() {
            continue;
        }
        let trip = Trip {
            trip_id: trip_id.clone(),
            route_id: record.get(idx_route).unwrap_or("").to_string(),
            service_id: idx_service
                .and_then(|i| record.get(i))
                .unwrap_or("")
                .to_string(),
        };
        trips.insert(trip_id, trip);
    }

    Ok(trips)
}

fn parse_routes(contents: &str) -> Result<HashMap<String, Route>> {
    let mut rdr = csv::Reader::from_reader(contents.as_bytes());
    let headers = rdr.headers()?.clone();

    let idx_id = required_column(&headers, "routes.txt", "route_id")?;
    let idx_short = column(&headers, "route_short_name");
    let idx_long = column(&headers, "route_long_name");

    let mut routes = HashMap::new();
    for result in rdr.records() {
        let record = result?;
        let route_id = record.get(idx_id).unwrap_or("").to_string();
        if route_id.is_empty() {
            continue;
        }
        let route = Route {
            route_id: route_id.clone(),
            short_name: idx_short.and_then(|i| record.get(i)).and_then(non_empty),
            long_name: idx_long.and_then(|i| record.get(i)).and_then(non_empty),
        };
        routes.insert(route_id, route);
    }

    Ok(routes)
}

fn parse_calendar(contents: &str) -> Result<Vec<CalendarRule>> {
    const WEEKDAY_COLUMNS: [&str; 7] = [
        "monday",
        "tuesday",
        "wednesday",
        "thursday",
        "friday",
        "saturday",
        "sunday",
    ];

    let mut rdr = csv::Reader::from_reader(contents.as_bytes());
    let headers = rdr.headers()?.clone();

    let idx_service = required_column(&headers, "calendar.txt", "service_id")?;
    let idx_start = required_column(&headers, "calendar.txt", "start_date")?;
    let idx_end = required_column(&headers, "calendar.txt", "end_date")?;
    let idx_weekdays: Vec<Option<usize>> = WEEKDAY_COLUMNS
        .iter()
        .map(|name| column(&headers, name))
        .collect();

    let mut rules = Vec::new();
    for result in rdr.records() {
        let record = result?;
        let service_id = record.get(idx_service).unwrap_or("").to_string();
        if service_id.is_empty() {
            continue;
        }

        let mut weekdays = [false; 7];
        for (day, idx) in weekdays.iter_mut().zip(&idx_weekdays) {
            *day = idx.and_then(|i| record.get(i)) == Some("1");
        }

        rules.push(CalendarRule {
            service_id,
            weekdays,
            start_date: record.get(idx_start).and_then(|s| s.trim().parse().ok()).unwrap_or(0),
            end_date: record.get(idx_end).and_then(|s| s.trim().parse().ok()).unwrap_or(0),
        });
    }

    Ok(rules)
}

fn parse_calendar_dates(contents: &str) -> Result<Vec<CalendarException>> {
    let mut rdr = csv::Reader::from_reader(contents.as_bytes());
    let headers = rdr.headers()?.clone();

    let idx_service = required_column(&headers, "calendar_dates.txt", "service_id")?;
    let idx_date = required_column(&headers, "calendar_dates.txt", "date")?;
    let idx_type = required_column(&headers, "calendar_dates.txt", "exception_type")?;

    let mut exceptions = Vec::new();
    for result in rdr.records() {
        let record = result?;
        let service_id = record.get(idx_service).unwrap_or("").to_string();
        if service_id.is_empty() {
            continue;
        }
        let date = match record.get(idx_date).and_then(|s| s.trim().parse().ok()) {
            Some(date) => date,
            None => continue,
        };
        let exception_type = match record.get(idx_type).and_then(|s| s.trim().parse().ok()) {
            Some(t) => t,
            None => continue,
        };
        exceptions.push(CalendarException {
            service_id,
            date,
            exception_type,
        });
    }

    Ok(exceptions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zip_bundle_raw(files: &[(&str, &[u8])]) -> Bytes {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buf);
            let options = zip::write::FileOptions::default();
            for (name, contents) in files {
                writer.start_file(*name, options).unwrap();
                writer.write_all(contents).unwrap();
            }
            writer.finish().unwrap();
        }
        Bytes::from(buf.into_inner())
    }

    fn zip_bundle(files: &[(&str, &str)]) -> Bytes {
        let raw: Vec<(&str, &[u8])> = files
            .iter()
            .map(|(name, contents)| (*name, contents.as_bytes()))
            .collect();
        zip_bundle_raw(&raw)
    }

    #[test]
    fn parses_full_bundle() {
        let bytes = zip_bundle(&[
            ("stops.txt", "stop_id,stop_name\n1111,39th St\n"),
            (
                "stop_times.txt",
                "trip_id,arrival_time,departure_time,stop_id,stop_sequence\n\
                 t1,08:00:00,08:01:00,1111,1\n\
                 t1,,08:30:00,1111,2\n",
            ),
            (
                "trips.txt",
                "route_id,service_id,trip_id\nGOLD,WKDY,t1\n",
            ),
            (
                "routes.txt",
                "route_id,route_short_name,route_long_name\nGOLD,Gold,Gold Line\n",
            ),
            (
                "calendar.txt",
                "service_id,monday,tuesday,wednesday,thursday,friday,saturday,sunday,start_date,end_date\n\
                 WKDY,1,1,1,1,1,0,0,20250101,20261231\n",
            ),
            (
                "calendar_dates.txt",
                "service_id,date,exception_type\nWKDY,20250704,2\nSPECIAL,20250704,1\n",
            ),
        ]);

        let snapshot = ScheduleSnapshot::from_zip(&bytes).unwrap();

        assert_eq!(snapshot.stops["1111"].stop_name, "39th St");
        assert_eq!(snapshot.stop_times_by_stop["1111"].len(), 2);
        assert_eq!(snapshot.stop_times_by_stop["1111"][1].arrival_time, None);
        assert_eq!(snapshot.trips["t1"].service_id, "WKDY");
        assert_eq!(snapshot.routes["GOLD"].short_name.as_deref(), Some("Gold"));
        assert_eq!(snapshot.calendar.len(), 1);
        assert_eq!(snapshot.calendar_dates.len(), 2);
    }

    #[test]
    fn missing_files_yield_empty_tables() {
        let bytes = zip_bundle(&[("stops.txt", "stop_id,stop_name\n1111,39th St\n")]);
        let snapshot = ScheduleSnapshot::from_zip(&bytes).unwrap();

        assert_eq!(snapshot.stops.len(), 1);
        assert!(snapshot.stop_times_by_stop.is_empty());
        assert!(snapshot.trips.is_empty());
        assert!(snapshot.routes.is_empty());
        assert!(snapshot.calendar.is_empty());
        assert!(snapshot.calendar_dates.is_empty());
    }

    #[test]
    fn tolerates_reordered_columns_and_bom() {
        let bytes = zip_bundle(&[(
            "routes.txt",
            "\u{feff}route_long_name,route_id,route_short_name\nGold Line,GOLD,Gold\n",
        )]);
        let snapshot = ScheduleSnapshot::from_zip(&bytes).unwrap();
        assert_eq!(snapshot.routes["GOLD"].short_name.as_deref(), Some("Gold"));
        assert_eq!(
            snapshot.routes["GOLD"].long_name.as_deref(),
            Some("Gold Line")
        );
    }

    #[test]
    fn not_a_zip_is_a_decode_error() {
        let err = ScheduleSnapshot::from_zip(&Bytes::from_static(b"not a zip")).unwrap_err();
        assert!(matches!(err, TransitError::Decode(_)));
    }

    #[test]
    fn unreadable_present_table_fails_the_load() {
        // A stops.txt that exists but holds invalid UTF-8 must fail the
        // whole load, not masquerade as an absent table.
        let bytes = zip_bundle_raw(&[
            ("stops.txt", &[0xff, 0xfe, 0x00, 0x01][..]),
            ("routes.txt", b"route_id,route_short_name\nGOLD,Gold\n"),
        ]);
        let err = ScheduleSnapshot::from_zip(&bytes).unwrap_err();
        assert!(matches!(err, TransitError::Decode(_)));
    }

    #[test]
    fn gtfs_times_support_post_midnight_overflow() {
        assert_eq!(gtfs_time_to_seconds("08:01:30"), Some(8 * 3600 + 90));
        assert_eq!(gtfs_time_to_seconds("25:10:00"), Some(25 * 3600 + 600));
        assert_eq!(gtfs_time_to_seconds(""), None);
        assert_eq!(gtfs_time_to_seconds("8:00"), None);
    }

    fn weekday_rule(service_id: &str, weekdays: [bool; 7]) -> CalendarRule {
        CalendarRule {
            service_id: service_id.to_string(),
            weekdays,
            start_date: 20250101,
            end_date: 20261231,
        }
    }

    #[test]
    fn calendar_rules_respect_weekday_and_range() {
        let mut snapshot = ScheduleSnapshot::default();
        snapshot.calendar = vec![
            weekday_rule("WKDY", [true, true, true, true, true, false, false]),
            weekday_rule("WKND", [false, false, false, false, false, true, true]),
            CalendarRule {
                service_id: "EXPIRED".to_string(),
                weekdays: [true; 7],
                start_date: 20240101,
                end_date: 20241231,
            },
        ];

        // 2025-06-02 is a Monday
        let monday = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        let active = snapshot.active_service_ids(monday);
        assert!(active.contains("WKDY"));
        assert!(!active.contains("WKND"));
        assert!(!active.contains("EXPIRED"));
    }

    #[test]
    fn exceptions_override_rules() {
        let mut snapshot = ScheduleSnapshot::default();
        snapshot.calendar = vec![weekday_rule("WKDY", [true; 7])];
        snapshot.calendar_dates = vec![
            CalendarException {
                service_id: "WKDY".to_string(),
                date: 20250704,
                exception_type: 2,
            },
            CalendarException {
                service_id: "HOLIDAY".to_string(),
                date: 20250704,
                exception_type: 1,
            },
        ];

        let fourth = NaiveDate::from_ymd_opt(2025, 7, 4).unwrap();
        let active = snapshot.active_service_ids(fourth);
        assert!(!active.contains("WKDY"));
        assert!(active.contains("HOLIDAY"));

        // An ordinary day is untouched by the exceptions
        let fifth = NaiveDate::from_ymd_opt(2025, 7, 5).unwrap();
        let active = snapshot.active_service_ids(fifth);
        assert!(active.contains("WKDY"));
        assert!(!active.contains("HOLIDAY"));
    }
}

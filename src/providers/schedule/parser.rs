use std::collections::HashMap;
use std::io::{Read, Seek};

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};
use tracing::{debug, info, warn};

use super::error::ScheduleError;
use crate::models::{NormalizedLeg, StopCall, TransitMode};
use crate::times::{parse_service_clock, service_secs_to_utc};

/// Maximum allowed total decompressed size for the feed zip (1 GB)
const MAX_DECOMPRESSED_SIZE: u64 = 1024 * 1024 * 1024;

// --- Reference tables ---

#[derive(Debug, Clone)]
pub struct FeedRoute {
    pub short_name: Option<String>,
    pub long_name: Option<String>,
    pub route_type: Option<i32>,
    pub color: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FeedTrip {
    pub route_id: String,
    pub service_id: String,
    pub headsign: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FeedStop {
    pub name: Option<String>,
    pub platform_code: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct ServiceCalendar {
    pub days: [bool; 7], // mon..sun
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

#[derive(Debug, Clone)]
pub struct CalendarException {
    pub date: NaiveDate,
    /// 1 = service added, 2 = service removed
    pub exception_type: i32,
}

/// The small reference tables of the feed, loaded fully before the
/// stop-times passes.
pub struct ReferenceTables {
    pub routes: HashMap<String, FeedRoute>,
    pub trips: HashMap<String, FeedTrip>,
    pub stops: HashMap<String, FeedStop>,
    pub calendars: HashMap<String, ServiceCalendar>,
    pub calendar_dates: HashMap<String, Vec<CalendarException>>,
}

impl ReferenceTables {
    pub fn parse<R: Read + Seek>(
        archive: &mut zip::ZipArchive<R>,
    ) -> Result<Self, ScheduleError> {
        let routes = parse_routes(archive)?;
        info!(count = routes.len(), "Parsed feed routes");

        let trips = parse_trips(archive)?;
        info!(count = trips.len(), "Parsed feed trips");

        let stops = parse_stops(archive)?;
        info!(count = stops.len(), "Parsed feed stops");

        let calendars = parse_calendar(archive);
        info!(count = calendars.len(), "Parsed feed calendar");

        let calendar_dates = parse_calendar_dates(archive);
        let total_exceptions: usize = calendar_dates.values().map(|v| v.len()).sum();
        info!(
            services = calendar_dates.len(),
            total_exceptions, "Parsed feed calendar exceptions"
        );

        Ok(Self {
            routes,
            trips,
            stops,
            calendars,
            calendar_dates,
        })
    }

    /// Check if a service runs on the given date.
    pub fn is_service_active(&self, service_id: &str, date: NaiveDate) -> bool {
        // Exceptions override the regular calendar
        if let Some(exceptions) = self.calendar_dates.get(service_id) {
            for exc in exceptions {
                if exc.date == date {
                    return exc.exception_type == 1;
                }
            }
        }

        if let Some(cal) = self.calendars.get(service_id) {
            if date < cal.start_date || date > cal.end_date {
                return false;
            }
            let day_index = match date.weekday() {
                Weekday::Mon => 0,
                Weekday::Tue => 1,
                Weekday::Wed => 2,
                Weekday::Thu => 3,
                Weekday::Fri => 4,
                Weekday::Sat => 5,
                Weekday::Sun => 6,
            };
            return cal.days[day_index];
        }

        // Services known only through calendar_dates run solely on their
        // explicitly added dates, which were checked above.
        false
    }
}

// --- Two-pass stop-times parse ---

/// Pass-1 state per trip: the departure clock at the lowest stop_sequence
/// seen so far.
#[derive(Debug, Clone, Copy)]
struct FirstDeparture {
    stop_sequence: u32,
    departure_secs: u32,
}

#[derive(Debug, Clone)]
struct StopTimeRow {
    stop_sequence: u32,
    stop_id: String,
    arrival_secs: Option<u32>,
    departure_secs: Option<u32>,
}

#[derive(Debug, Default)]
pub struct ParsedBatch {
    pub legs: Vec<NormalizedLeg>,
    pub dropped: usize,
}

/// Parse the schedule zip into departure legs (blocking, run on a worker
/// thread). Only trips whose first-stop departure falls inside
/// `[now, now + lookahead]` on a candidate service date are materialized,
/// so peak memory tracks the admitted-trip count rather than the feed size.
pub fn parse_feed(
    bytes: &[u8],
    now: DateTime<Utc>,
    lookahead: Duration,
    group_size: usize,
) -> Result<ParsedBatch, ScheduleError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))?;
    check_decompressed_size(&mut archive)?;

    let tables = ReferenceTables::parse(&mut archive)?;
    let candidates = candidate_service_dates(now);

    let admitted = admit_trips(&mut archive, &tables, &candidates, now, lookahead)?;
    info!(trips = admitted.len(), "Admitted schedule trips within lookahead");

    let mut rows = collect_admitted_rows(&mut archive, &admitted)?;

    // Materialize in bounded groups, releasing each trip's rows as it is
    // consumed.
    let mut trip_ids: Vec<&String> = admitted.keys().collect();
    trip_ids.sort();

    let mut batch = ParsedBatch::default();
    let mut unresolved_stops = 0usize;
    for group in trip_ids.chunks(group_size.max(1)) {
        let before = batch.legs.len();
        for &trip_id in group {
            let trip_rows = rows.remove(trip_id).unwrap_or_default();
            for &service_date in &admitted[trip_id] {
                match build_leg(&tables, trip_id, service_date, &trip_rows, &mut unresolved_stops)
                {
                    Some(leg) => batch.legs.push(leg),
                    None => batch.dropped += 1,
                }
            }
        }
        debug!(
            group_trips = group.len(),
            group_legs = batch.legs.len() - before,
            "Materialized schedule leg group"
        );
    }

    if unresolved_stops > 0 {
        warn!(
            skipped = unresolved_stops,
            "Skipped stop_times rows with unresolvable stop references"
        );
    }
    if batch.dropped > 0 {
        warn!(dropped = batch.dropped, "Dropped unmappable schedule trips");
    }

    Ok(batch)
}

/// The service dates a single parse considers: yesterday (for after-midnight
/// rollover trips) and today, both UTC.
fn candidate_service_dates(now: DateTime<Utc>) -> [NaiveDate; 2] {
    let today = now.date_naive();
    [today - Duration::days(1), today]
}

fn check_decompressed_size<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
) -> Result<(), ScheduleError> {
    let mut total_uncompressed: u64 = 0;
    for i in 0..archive.len() {
        if let Ok(entry) = archive.by_index(i) {
            total_uncompressed += entry.size();
        }
    }
    if total_uncompressed > MAX_DECOMPRESSED_SIZE {
        return Err(ScheduleError::ParseError(format!(
            "Feed zip decompressed size {} bytes exceeds limit {} bytes",
            total_uncompressed, MAX_DECOMPRESSED_SIZE
        )));
    }
    Ok(())
}

/// Pass 1: scan stop_times.txt keeping only the first-stop departure clock
/// per service-active trip, then admit the trips departing inside the
/// lookahead on a candidate date.
fn admit_trips<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
    tables: &ReferenceTables,
    candidates: &[NaiveDate],
    now: DateTime<Utc>,
    lookahead: Duration,
) -> Result<HashMap<String, Vec<NaiveDate>>, ScheduleError> {
    let file = archive.by_name("stop_times.txt")?;
    let mut rdr = csv::Reader::from_reader(file);
    let headers = rdr.headers()?.clone();

    let idx_trip = required_column(&headers, "stop_times.txt", "trip_id")?;
    let idx_seq = required_column(&headers, "stop_times.txt", "stop_sequence")?;
    let idx_dep = headers.iter().position(|h| h == "departure_time");

    // service_id -> candidate dates it runs on, resolved once per service
    let mut active_dates: HashMap<String, Vec<NaiveDate>> = HashMap::new();
    let mut first_departures: HashMap<String, FirstDeparture> = HashMap::new();
    let mut skipped = 0usize;

    for result in rdr.records() {
        let record = result?;
        let trip_id = record.get(idx_trip).unwrap_or("");
        if trip_id.is_empty() {
            skipped += 1;
            continue;
        }
        let Some(trip) = tables.trips.get(trip_id) else {
            skipped += 1;
            continue;
        };

        let dates = active_dates
            .entry(trip.service_id.clone())
            .or_insert_with(|| {
                candidates
                    .iter()
                    .copied()
                    .filter(|date| tables.is_service_active(&trip.service_id, *date))
                    .collect()
            });
        if dates.is_empty() {
            continue;
        }

        let Some(seq) = record.get(idx_seq).and_then(|s| s.parse::<u32>().ok()) else {
            skipped += 1;
            continue;
        };
        let Some(secs) = idx_dep
            .and_then(|i| record.get(i))
            .and_then(|s| parse_service_clock(s).ok())
        else {
            continue;
        };

        match first_departures.get(trip_id) {
            Some(current) if current.stop_sequence <= seq => {}
            _ => {
                first_departures.insert(
                    trip_id.to_string(),
                    FirstDeparture {
                        stop_sequence: seq,
                        departure_secs: secs,
                    },
                );
            }
        }
    }

    if skipped > 0 {
        warn!(
            skipped,
            "Skipped stop_times.txt records (empty or unknown trip, bad sequence)"
        );
    }

    let window_end = now + lookahead;
    let mut admitted: HashMap<String, Vec<NaiveDate>> = HashMap::new();
    for (trip_id, first) in first_departures {
        let Some(trip) = tables.trips.get(&trip_id) else {
            continue;
        };
        let Some(dates) = active_dates.get(&trip.service_id) else {
            continue;
        };
        for &date in dates {
            let departure = service_secs_to_utc(date, first.departure_secs);
            if departure >= now && departure <= window_end {
                admitted.entry(trip_id.clone()).or_default().push(date);
            }
        }
    }

    Ok(admitted)
}

/// Pass 2: re-scan stop_times.txt retaining full rows only for admitted
/// trips.
fn collect_admitted_rows<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
    admitted: &HashMap<String, Vec<NaiveDate>>,
) -> Result<HashMap<String, Vec<StopTimeRow>>, ScheduleError> {
    let file = archive.by_name("stop_times.txt")?;
    let mut rdr = csv::Reader::from_reader(file);
    let headers = rdr.headers()?.clone();

    let idx_trip = required_column(&headers, "stop_times.txt", "trip_id")?;
    let idx_seq = required_column(&headers, "stop_times.txt", "stop_sequence")?;
    let idx_stop = required_column(&headers, "stop_times.txt", "stop_id")?;
    let idx_arr = headers.iter().position(|h| h == "arrival_time");
    let idx_dep = headers.iter().position(|h| h == "departure_time");

    let mut rows: HashMap<String, Vec<StopTimeRow>> = HashMap::with_capacity(admitted.len());
    for result in rdr.records() {
        let record = result?;
        let trip_id = record.get(idx_trip).unwrap_or("");
        if !admitted.contains_key(trip_id) {
            continue;
        }
        let Some(seq) = record.get(idx_seq).and_then(|s| s.parse::<u32>().ok()) else {
            continue;
        };
        rows.entry(trip_id.to_string()).or_default().push(StopTimeRow {
            stop_sequence: seq,
            stop_id: record.get(idx_stop).unwrap_or("").to_string(),
            arrival_secs: idx_arr
                .and_then(|i| record.get(i))
                .and_then(|s| parse_service_clock(s).ok()),
            departure_secs: idx_dep
                .and_then(|i| record.get(i))
                .and_then(|s| parse_service_clock(s).ok()),
        });
    }

    for trip_rows in rows.values_mut() {
        trip_rows.sort_by_key(|row| row.stop_sequence);
    }

    Ok(rows)
}

/// Join one admitted (trip, service date) pair against the reference
/// tables. `None` drops the whole leg; an unresolvable stop drops just
/// that stop.
fn build_leg(
    tables: &ReferenceTables,
    trip_id: &str,
    service_date: NaiveDate,
    rows: &[StopTimeRow],
    unresolved_stops: &mut usize,
) -> Option<NormalizedLeg> {
    let trip = tables.trips.get(trip_id)?;
    let route = tables.routes.get(&trip.route_id)?;
    let mode = mode_for_route_type(route.route_type?)?;

    let mut stops = Vec::with_capacity(rows.len());
    for row in rows {
        let Some(stop) = tables.stops.get(&row.stop_id) else {
            *unresolved_stops += 1;
            continue;
        };
        stops.push(StopCall {
            stop_id: row.stop_id.clone(),
            stop_name: stop.name.clone().unwrap_or_else(|| row.stop_id.clone()),
            lat: stop.lat,
            lon: stop.lon,
            arrival_time: row.arrival_secs.map(|s| service_secs_to_utc(service_date, s)),
            departure_time: row
                .departure_secs
                .map(|s| service_secs_to_utc(service_date, s)),
            sequence: row.stop_sequence,
        });
    }
    let first = stops.first()?.clone();
    let last = stops.last()?.clone();
    let dep_scheduled = first.departure_time.or(first.arrival_time)?;

    let mut leg = NormalizedLeg::new(mode, trip_id, service_date);
    leg.origin_code = first.stop_id.clone();
    leg.origin_name = first.stop_name.clone();
    leg.dest_code = last.stop_id.clone();
    leg.dest_name = last.stop_name.clone();
    leg.headsign = trip
        .headsign
        .clone()
        .unwrap_or_else(|| last.stop_name.clone());
    leg.dep_scheduled = Some(dep_scheduled);
    leg.arr_scheduled = last.arrival_time.or(last.departure_time);
    leg.platform = tables
        .stops
        .get(&first.stop_id)
        .and_then(|s| s.platform_code.clone());
    leg.route_short_name = route.short_name.clone().or_else(|| route.long_name.clone());
    leg.route_color = route.color.clone();
    leg.source = "schedule".into();
    leg.stops = stops;
    Some(leg)
}

fn mode_for_route_type(route_type: i32) -> Option<TransitMode> {
    match route_type {
        0 => Some(TransitMode::Tram),
        1 => Some(TransitMode::Metro),
        2 => Some(TransitMode::Train),
        3 => Some(TransitMode::Bus),
        _ => None,
    }
}

// --- CSV parsing helpers ---

fn required_column(
    headers: &csv::StringRecord,
    file: &str,
    name: &str,
) -> Result<usize, ScheduleError> {
    headers
        .iter()
        .position(|h| h == name)
        .ok_or_else(|| ScheduleError::ParseError(format!("{file} missing {name}")))
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

fn parse_routes<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
) -> Result<HashMap<String, FeedRoute>, ScheduleError> {
    let file = archive.by_name("routes.txt")?;
    let mut rdr = csv::Reader::from_reader(file);
    let headers = rdr.headers()?.clone();

    let idx_id = required_column(&headers, "routes.txt", "route_id")?;
    let idx_short = headers.iter().position(|h| h == "route_short_name");
    let idx_long = headers.iter().position(|h| h == "route_long_name");
    let idx_type = headers.iter().position(|h| h == "route_type");
    let idx_color = headers.iter().position(|h| h == "route_color");

    let mut routes = HashMap::new();
    let mut skipped = 0usize;
    for result in rdr.records() {
        let record = result?;
        let route_id = record.get(idx_id).unwrap_or("").to_string();
        if route_id.is_empty() {
            skipped += 1;
            continue;
        }
        routes.insert(
            route_id,
            FeedRoute {
                short_name: idx_short.and_then(|i| record.get(i)).and_then(non_empty),
                long_name: idx_long.and_then(|i| record.get(i)).and_then(non_empty),
                route_type: idx_type
                    .and_then(|i| record.get(i))
                    .and_then(|s| s.parse().ok()),
                color: idx_color.and_then(|i| record.get(i)).and_then(non_empty),
            },
        );
    }
    if skipped > 0 {
        warn!(skipped, "Skipped routes.txt records with empty route_id");
    }
    Ok(routes)
}

fn parse_trips<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
) -> Result<HashMap<String, FeedTrip>, ScheduleError> {
    let file = archive.by_name("trips.txt")?;
    let mut rdr = csv::Reader::from_reader(file);
    let headers = rdr.headers()?.clone();

    let idx_trip = required_column(&headers, "trips.txt", "trip_id")?;
    let idx_route = required_column(&headers, "trips.txt", "route_id")?;
    let idx_service = required_column(&headers, "trips.txt", "service_id")?;
    let idx_headsign = headers.iter().position(|h| h == "trip_headsign");

    let mut trips = HashMap::new();
    let mut skipped = 0usize;
    for result in rdr.records() {
        let record = result?;
        let trip_id = record.get(idx_trip).unwrap_or("").to_string();
        if trip_id.is_empty() {
            skipped += 1;
            continue;
        }
        trips.insert(
            trip_id,
            FeedTrip {
                route_id: record.get(idx_route).unwrap_or("").to_string(),
                service_id: record.get(idx_service).unwrap_or("").to_string(),
                headsign: idx_headsign.and_then(|i| record.get(i)).and_then(non_empty),
            },
        );
    }
    if skipped > 0 {
        warn!(skipped, "Skipped trips.txt records with empty trip_id");
    }
    Ok(trips)
}

fn parse_stops<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
) -> Result<HashMap<String, FeedStop>, ScheduleError> {
    let file = archive.by_name("stops.txt")?;
    let mut rdr = csv::Reader::from_reader(file);
    let headers = rdr.headers()?.clone();

    let idx_id = required_column(&headers, "stops.txt", "stop_id")?;
    let idx_name = headers.iter().position(|h| h == "stop_name");
    let idx_platform = headers.iter().position(|h| h == "platform_code");
    let idx_lat = headers.iter().position(|h| h == "stop_lat");
    let idx_lon = headers.iter().position(|h| h == "stop_lon");

    let mut stops = HashMap::new();
    let mut skipped = 0usize;
    for result in rdr.records() {
        let record = result?;
        let stop_id = record.get(idx_id).unwrap_or("").to_string();
        if stop_id.is_empty() {
            skipped += 1;
            continue;
        }
        stops.insert(
            stop_id,
            FeedStop {
                name: idx_name.and_then(|i| record.get(i)).and_then(non_empty),
                platform_code: idx_platform.and_then(|i| record.get(i)).and_then(non_empty),
                lat: idx_lat
                    .and_then(|i| record.get(i))
                    .and_then(|s| s.parse().ok()),
                lon: idx_lon
                    .and_then(|i| record.get(i))
                    .and_then(|s| s.parse().ok()),
            },
        );
    }
    if skipped > 0 {
        warn!(skipped, "Skipped stops.txt records with empty stop_id");
    }
    Ok(stops)
}

fn parse_calendar<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
) -> HashMap<String, ServiceCalendar> {
    let file = match archive.by_name("calendar.txt") {
        Ok(f) => f,
        Err(_) => {
            info!("No calendar.txt in feed zip (optional file)");
            return HashMap::new();
        }
    };
    let mut rdr = csv::Reader::from_reader(file);
    let headers = match rdr.headers() {
        Ok(h) => h.clone(),
        Err(_) => return HashMap::new(),
    };

    let idx_service = headers.iter().position(|h| h == "service_id");
    let idx_days = [
        "monday", "tuesday", "wednesday", "thursday", "friday", "saturday", "sunday",
    ]
    .map(|day| headers.iter().position(|h| h == day));
    let idx_start = headers.iter().position(|h| h == "start_date");
    let idx_end = headers.iter().position(|h| h == "end_date");

    let Some(idx_service) = idx_service else {
        return HashMap::new();
    };

    let mut calendars = HashMap::new();
    let mut skipped = 0usize;
    for result in rdr.records() {
        let Ok(record) = result else {
            skipped += 1;
            continue;
        };
        let service_id = record.get(idx_service).unwrap_or("").to_string();
        if service_id.is_empty() {
            skipped += 1;
            continue;
        }

        let start_date = idx_start.and_then(|i| record.get(i)).and_then(parse_feed_date);
        let end_date = idx_end.and_then(|i| record.get(i)).and_then(parse_feed_date);
        let (Some(start_date), Some(end_date)) = (start_date, end_date) else {
            skipped += 1;
            continue;
        };

        let days = idx_days.map(|idx| {
            idx.and_then(|i| record.get(i))
                .and_then(|s| s.parse::<i32>().ok())
                .map(|v| v == 1)
                .unwrap_or(false)
        });

        calendars.insert(
            service_id,
            ServiceCalendar {
                days,
                start_date,
                end_date,
            },
        );
    }
    if skipped > 0 {
        warn!(skipped, "Skipped calendar.txt records (empty/unparseable)");
    }
    calendars
}

fn parse_calendar_dates<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
) -> HashMap<String, Vec<CalendarException>> {
    let file = match archive.by_name("calendar_dates.txt") {
        Ok(f) => f,
        Err(_) => {
            info!("No calendar_dates.txt in feed zip (optional file)");
            return HashMap::new();
        }
    };
    let mut rdr = csv::Reader::from_reader(file);
    let headers = match rdr.headers() {
        Ok(h) => h.clone(),
        Err(_) => return HashMap::new(),
    };

    let idx_service = headers.iter().position(|h| h == "service_id");
    let idx_date = headers.iter().position(|h| h == "date");
    let idx_type = headers.iter().position(|h| h == "exception_type");

    let (Some(idx_service), Some(idx_date), Some(idx_type)) = (idx_service, idx_date, idx_type)
    else {
        return HashMap::new();
    };

    let mut dates: HashMap<String, Vec<CalendarException>> = HashMap::new();
    let mut skipped = 0usize;
    for result in rdr.records() {
        let Ok(record) = result else {
            skipped += 1;
            continue;
        };
        let service_id = record.get(idx_service).unwrap_or("").to_string();
        if service_id.is_empty() {
            skipped += 1;
            continue;
        }
        let Some(date) = record.get(idx_date).and_then(parse_feed_date) else {
            skipped += 1;
            continue;
        };
        let exception_type = record.get(idx_type).and_then(|s| s.parse().ok()).unwrap_or(0);

        dates.entry(service_id).or_default().push(CalendarException {
            date,
            exception_type,
        });
    }
    if skipped > 0 {
        warn!(
            skipped,
            "Skipped calendar_dates.txt records (empty/unparseable)"
        );
    }
    dates
}

/// Parse a feed date "YYYYMMDD".
fn parse_feed_date(s: &str) -> Option<NaiveDate> {
    if s.len() != 8 {
        return None;
    }
    let year: i32 = s[0..4].parse().ok()?;
    let month: u32 = s[4..6].parse().ok()?;
    let day: u32 = s[6..8].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

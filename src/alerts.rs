// Alert ticker query: route-filter resolution, text extraction and the
// display-budget truncation.

use std::collections::HashSet;

use gtfs_rt::{Alert, TranslatedString};

use crate::realtime::RealtimeSnapshot;
use crate::schedule::ScheduleSnapshot;

const NO_ALERTS: &str = "No alerts";

/// Rider-facing ticker text for the current alert snapshot, optionally
/// filtered to one route (short name or raw route_id, case-insensitive).
/// Always returns printable text; `"No alerts"` stands in for an absent
/// snapshot or an empty selection.
pub fn alert_text(
    schedule: Option<&ScheduleSnapshot>,
    realtime: Option<&RealtimeSnapshot>,
    route_filter: Option<&str>,
    max_len: usize,
) -> String {
    let Some(realtime) = realtime else {
        return NO_ALERTS.to_string();
    };

    let allowed_route_ids = resolve_route_filter(schedule, route_filter);

    let mut messages = Vec::new();
    for entity in &realtime.alerts.entity {
        let Some(alert) = &entity.alert else {
            continue;
        };
        if !alert_applies(alert, allowed_route_ids.as_ref()) {
            continue;
        }
        if let Some(text) = alert_display_text(alert) {
            messages.push(text);
        }
    }

    if messages.is_empty() {
        return NO_ALERTS.to_string();
    }

    truncate_to(&messages.join(" | "), max_len)
}

/// Resolves a filter string to the set of route_ids it names. `None` means
/// "no filter"; `Some(empty)` means the filter matched nothing, so no
/// alert can apply. A missing routes table disables the filter rather
/// than blanking the ticker.
fn resolve_route_filter(
    schedule: Option<&ScheduleSnapshot>,
    route_filter: Option<&str>,
) -> Option<HashSet<String>> {
    let needle = route_filter?.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }
    let schedule = schedule?;
    if schedule.routes.is_empty() {
        return None;
    }

    let mut matched: HashSet<String> = schedule
        .routes
        .values()
        .filter(|route| {
            route
                .short_name
                .as_deref()
                .is_some_and(|short| short.trim().to_lowercase() == needle)
        })
        .map(|route| route.route_id.clone())
        .collect();

    // Allow passing an actual route_id as the filter as a fallback
    if matched.is_empty() {
        matched = schedule
            .routes
            .values()
            .filter(|route| route.route_id.to_lowercase() == needle)
            .map(|route| route.route_id.clone())
            .collect();
    }

    Some(matched)
}

fn alert_applies(alert: &Alert, allowed_route_ids: Option<&HashSet<String>>) -> bool {
    let Some(allowed) = allowed_route_ids else {
        return true;
    };
    alert.informed_entity.iter().any(|entity| {
        entity
            .route_id
            .as_deref()
            .map(str::trim)
            .is_some_and(|route_id| !route_id.is_empty() && allowed.contains(route_id))
    })
}

fn alert_display_text(alert: &Alert) -> Option<String> {
    first_non_empty_translation(alert.header_text.as_ref())
        .or_else(|| first_non_empty_translation(alert.description_text.as_ref()))
}

fn first_non_empty_translation(text: Option<&TranslatedString>) -> Option<String> {
    text?
        .translation
        .iter()
        .map(|t| t.text.trim())
        .find(|t| !t.is_empty())
        .map(str::to_string)
}

/// Cuts to `max_len` characters, appending a single ellipsis only when
/// something was actually cut.
pub(crate) fn truncate_to(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_len).collect();
    out.push('…');
    out
}

// Final response assembly for the display client. The client formats each
// arrival string into its fixed-width rows itself; this side only
// guarantees the shape.

use serde::Serialize;

use crate::alerts::truncate_to;
use crate::error::TransitError;

const EMPTY_SLOT: &str = "--";
const ERROR_REASON_MAX_LEN: usize = 120;

#[derive(Debug, Serialize)]
pub struct DisplayResponse {
    pub title: String,
    pub lines: [String; 3],
    pub ticker: String,
}

impl DisplayResponse {
    /// `lines[0]` is the title; the two remaining slots take the first two
    /// arrivals, padded with `"--"` when fewer were found.
    pub fn assemble(title: &str, arrivals: &[String], ticker: String) -> Self {
        let slot = |i: usize| {
            arrivals
                .get(i)
                .cloned()
                .unwrap_or_else(|| EMPTY_SLOT.to_string())
        };
        DisplayResponse {
            title: title.to_string(),
            lines: [title.to_string(), slot(0), slot(1)],
            ticker,
        }
    }

    /// Degraded response for a query whose feeds never loaded. Still the
    /// full shape, so the client renders blank slots instead of crashing.
    pub fn fetch_error(title: &str, error: &TransitError) -> Self {
        let reason = truncate_to(&error.to_string(), ERROR_REASON_MAX_LEN);
        DisplayResponse {
            title: title.to_string(),
            lines: [
                title.to_string(),
                EMPTY_SLOT.to_string(),
                EMPTY_SLOT.to_string(),
            ],
            ticker: format!("Fetch error: {}", reason),
        }
    }
}

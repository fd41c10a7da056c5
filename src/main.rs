// Stop-display API server for Sacramento RT GTFS feeds.
// Serves the fixed JSON shape the LCD display client consumes.

use std::env;
use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{App, HttpResponse, HttpServer, middleware, web};
use chrono::Utc;
use chrono_tz::America::Los_Angeles;
use chrono_tz::Tz;
use serde::Deserialize;
use serde_json::json;

mod alerts;
mod arrivals;
mod cache;
mod display;
mod error;
mod fetch;
mod realtime;
mod schedule;

use cache::{FeedUrls, TransitCache};
use display::DisplayResponse;
use fetch::HttpFetcher;

const LOCAL_TZ: Tz = Los_Angeles;
const DEFAULT_TITLE: &str = "39th St WB";
const ARRIVAL_LIMIT: usize = 3;
const TICKER_MAX_LEN: usize = 160;

#[derive(Deserialize)]
struct DisplayQuery {
    stop_id: String,
    title: Option<String>,
    /// Route short name or route_id; filters alerts to this route.
    route: Option<String>,
}

async fn root() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "ok": true }))
}

async fn health(cache: web::Data<TransitCache>) -> HttpResponse {
    let schedule = cache.schedule();
    let realtime = cache.realtime();
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "service": "Sac Transit Display Server",
        "schedule_loaded": schedule.is_some(),
        "stops": schedule.as_ref().map(|s| s.stops.len()).unwrap_or(0),
        "routes": schedule.as_ref().map(|s| s.routes.len()).unwrap_or(0),
        "realtime_loaded": realtime.is_some(),
        "alert_entities": realtime.as_ref().map(|r| r.alerts.entity.len()).unwrap_or(0),
    }))
}

async fn get_display(
    query: web::Query<DisplayQuery>,
    cache: web::Data<TransitCache>,
) -> HttpResponse {
    let title = query.title.as_deref().unwrap_or(DEFAULT_TITLE);
    let response = build_display(&cache, &query.stop_id, title, query.route.as_deref()).await;
    HttpResponse::Ok().json(response)
}

/// Answers one display query. Never fails past this point: feed trouble
/// with no prior snapshot degrades into a well-formed error response.
async fn build_display(
    cache: &TransitCache,
    stop_id: &str,
    title: &str,
    route_filter: Option<&str>,
) -> DisplayResponse {
    let schedule = match cache.ensure_schedule().await {
        Ok(schedule) => schedule,
        Err(e) => {
            log::error!("schedule unavailable: {}", e);
            return DisplayResponse::fetch_error(title, &e);
        }
    };

    // A realtime outage only costs the ticker, not the departures
    let realtime = match cache.ensure_realtime().await {
        Ok(realtime) => Some(realtime),
        Err(e) => {
            log::warn!("realtime unavailable: {}", e);
            None
        }
    };

    let now = Utc::now().with_timezone(&LOCAL_TZ);
    let arrivals = arrivals::next_arrivals(&schedule, stop_id, ARRIVAL_LIMIT, now);
    let ticker = alerts::alert_text(
        Some(&schedule),
        realtime.as_deref(),
        route_filter,
        TICKER_MAX_LEN,
    );

    DisplayResponse::assemble(title, &arrivals, ticker)
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let urls = FeedUrls::from_env();
    let listen_address = env::var("LISTEN_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8000".to_string());

    let fetcher = Arc::new(HttpFetcher);
    let cache = web::Data::new(TransitCache::new(fetcher, urls));

    println!("🚉 Sac Transit Display Server");
    println!("   Listening on: http://{}", listen_address);
    println!("   Display API:  GET /api/display?stop_id=...&title=...&route=...");

    HttpServer::new(move || {
        App::new()
            .app_data(cache.clone())
            .wrap(middleware::Logger::default())
            .wrap(Cors::permissive())
            .route("/", web::get().to(root))
            .route("/health", web::get().to(health))
            .route("/api/display", web::get().to(get_display))
    })
    .bind(listen_address)?
    .run()
    .await
}

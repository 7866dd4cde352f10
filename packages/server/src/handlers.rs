//! HTTP handler functions for the protest map API.

use std::str::FromStr as _;

use actix_web::{HttpResponse, http::header, web};
use async_stream::stream;
use protest_map_hazard_models::{DangerType, Position, safe_zones};
use protest_map_map::{LayerVisibility, feature_collection, render_markers};
use protest_map_routing::{RouteRequest, plan};
use protest_map_server_models::{
    AlertBody, ApiDangerType, ApiEvent, ApiHealth, ApiNearestSafeZone, ApiRecords, ApiSafeZone,
    MapQueryParams, NearestQueryParams, ReportBody, position_of,
};
use protest_map_submission::{ReportForm, SubmitError, dispatch_alert};
use tokio::sync::broadcast::error::RecvError;

use crate::AppState;

/// `GET /api/health`
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    let (reports, alerts) = state.view.sync_status();
    HttpResponse::Ok().json(ApiHealth {
        healthy: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
        reports,
        alerts,
    })
}

/// `GET /api/danger-types`
pub async fn danger_types() -> HttpResponse {
    let types: Vec<ApiDangerType> = DangerType::all()
        .iter()
        .copied()
        .map(ApiDangerType::from)
        .collect();
    HttpResponse::Ok().json(types)
}

/// `GET /api/safe-zones`
pub async fn safe_zones() -> HttpResponse {
    let zones: &[ApiSafeZone] = safe_zones::canonical();
    HttpResponse::Ok().json(zones)
}

/// `GET /api/map`
///
/// Returns the visible markers as a `GeoJSON` `FeatureCollection`.
pub async fn map(state: web::Data<AppState>, params: web::Query<MapQueryParams>) -> HttpResponse {
    let defaults = LayerVisibility::default();
    let layers = LayerVisibility {
        safe_zones: params.safe_zones.unwrap_or(defaults.safe_zones),
        hazards: params.hazards.unwrap_or(defaults.hazards),
        police_blocks: params.police_blocks.unwrap_or(defaults.police_blocks),
    };
    let center =
        position_of(params.lat, params.lng).unwrap_or(state.view.center().position);

    let markers = render_markers(
        center,
        safe_zones::canonical(),
        &state.view.reports(),
        &state.view.alerts(),
        layers,
    );
    HttpResponse::Ok()
        .content_type("application/geo+json")
        .json(feature_collection(&markers))
}

/// `GET /api/reports`
pub async fn reports(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(ApiRecords {
        records: state.view.reports(),
        status: state.view.report_sync().status(),
    })
}

/// `GET /api/alerts`
pub async fn alerts(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(ApiRecords {
        records: state.view.alerts(),
        status: state.view.alert_sync().status(),
    })
}

/// `POST /api/reports`
///
/// Submits a hazard report. Rejected with 400 before reaching the store
/// unless both a location and a danger type are given.
pub async fn submit_report(
    state: web::Data<AppState>,
    body: web::Json<ReportBody>,
) -> HttpResponse {
    let body = body.into_inner();
    let mut form = ReportForm::new();

    if let Some(position) = position_of(body.lat, body.lng) {
        form.pin(position);
    }
    if let Some(label) = body.danger_type.as_deref() {
        match DangerType::from_str(label) {
            Ok(danger_type) => form.select_type(danger_type),
            Err(_) => {
                return HttpResponse::BadRequest().json(serde_json::json!({
                    "error": format!("Unknown danger type: {label}")
                }));
            }
        }
    }
    if let Some(description) = body.description {
        form.set_description(description);
    }

    match form.submit(state.store.as_ref()).await {
        Ok(stored) => HttpResponse::Created().json(stored),
        Err(e @ SubmitError::Incomplete { .. }) => {
            HttpResponse::BadRequest().json(serde_json::json!({ "error": e.to_string() }))
        }
        Err(e) => {
            log::error!("Failed to submit report: {e}");
            HttpResponse::BadGateway().json(serde_json::json!({
                "error": form.last_error().unwrap_or("Failed to submit report")
            }))
        }
    }
}

/// `POST /api/alerts`
///
/// Records a panic alert and returns the dispatch links. A store failure
/// still returns the links, with `recorded: false`.
pub async fn submit_alert(
    state: web::Data<AppState>,
    body: web::Json<AlertBody>,
) -> HttpResponse {
    let body = body.into_inner();
    let position = match position_of(body.lat, body.lng) {
        Some(position) => position,
        None => state.geolocation.get_current_position().await.position,
    };

    let report = dispatch_alert(
        state.store.as_ref(),
        None,
        position,
        body.note.as_deref(),
        &state.panic,
    )
    .await;

    let mut json = match serde_json::to_value(&report) {
        Ok(json) => json,
        Err(e) => {
            log::error!("Failed to serialize dispatch report: {e}");
            return HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Failed to serialize dispatch report"
            }));
        }
    };
    if let Some(map) = json.as_object_mut() {
        map.insert("isRecorded".to_string(), report.is_recorded().into());
    }

    if report.is_recorded() {
        HttpResponse::Created().json(json)
    } else {
        HttpResponse::Ok().json(json)
    }
}

/// `GET /api/nearest-safe-zone`
///
/// Returns the nearest safe zone with the avoid-list, and a route when
/// `route=true` and the routing engine answers.
pub async fn nearest_safe_zone(
    state: web::Data<AppState>,
    params: web::Query<NearestQueryParams>,
) -> HttpResponse {
    let origin: Position = match position_of(params.lat, params.lng) {
        Some(position) => position,
        None => state.view.center().position,
    };

    let Some(request) = RouteRequest::to_nearest(
        origin,
        safe_zones::canonical(),
        &state.view.reports(),
        &state.view.alerts(),
    ) else {
        return HttpResponse::NotFound().json(serde_json::json!({
            "error": "No safe zones configured"
        }));
    };

    let route = match (&state.router, params.route) {
        (Some(router), true) => plan(router.as_ref(), &request).await,
        _ => None,
    };

    HttpResponse::Ok().json(ApiNearestSafeZone { request, route })
}

/// `GET /api/events`
///
/// Server-sent events: a `status` event on connect and on every sync
/// state change, plus `report` and `alert` events for every live insert.
pub async fn events(state: web::Data<AppState>) -> HttpResponse {
    let mut reports = state.view.report_sync().subscribe_inserts();
    let mut alerts = state.view.alert_sync().subscribe_inserts();
    let mut report_status = state.view.report_sync().watch_status();
    let mut alert_status = state.view.alert_sync().watch_status();

    let body = stream! {
        let status = ApiEvent::Status {
            reports: *report_status.borrow_and_update(),
            alerts: *alert_status.borrow_and_update(),
        };
        yield Ok::<_, actix_web::Error>(sse_frame(&status));

        loop {
            let event = tokio::select! {
                r = reports.recv() => match r {
                    Ok(report) => ApiEvent::Report(report),
                    Err(RecvError::Lagged(n)) => {
                        log::warn!("SSE client lagged, skipped {n} reports");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
                a = alerts.recv() => match a {
                    Ok(alert) => ApiEvent::Alert(alert),
                    Err(RecvError::Lagged(n)) => {
                        log::warn!("SSE client lagged, skipped {n} alerts");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
                changed = report_status.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    ApiEvent::Status {
                        reports: *report_status.borrow_and_update(),
                        alerts: *alert_status.borrow(),
                    }
                }
                changed = alert_status.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    ApiEvent::Status {
                        reports: *report_status.borrow(),
                        alerts: *alert_status.borrow_and_update(),
                    }
                }
            };
            yield Ok(sse_frame(&event));
        }
    };

    HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, "text/event-stream"))
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .streaming(body)
}

/// Encodes one server-sent event.
fn sse_frame(event: &ApiEvent) -> web::Bytes {
    let data = serde_json::to_string(event).unwrap_or_else(|e| {
        log::error!("Failed to serialize {} event: {e}", event.name());
        "null".to_string()
    });
    web::Bytes::from(format!("event: {}\ndata: {data}\n\n", event.name()))
}

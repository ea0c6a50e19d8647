use std::io::ErrorKind;
use std::path::Path;

use actix_web::middleware::DefaultHeaders;
use actix_web::{HttpResponse, Responder, get, post, route, web};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tracing::{error, info, warn};

use crate::config::{AppConfig, BRAND_PREFIX, is_valid_product_code};
use crate::error::Stage;
use crate::pipeline::Orchestrator;
use crate::store::CatalogDetails;

const CHUNK: usize = 64 * 1024;

pub struct ApiState {
    cfg: AppConfig,
    orchestrator: Orchestrator,
}

impl ApiState {
    pub fn new(cfg: &AppConfig, orchestrator: Orchestrator) -> Self {
        Self {
            cfg: cfg.clone(),
            orchestrator,
        }
    }
}

// -------------------------
// Request / Response Types
// -------------------------

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ModelResponse {
    model_name: String,
    image_url: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DetailsReq {
    release_type: Option<String>,
    purchase_price: Option<f64>,
    notes: Option<String>,
}

fn error_body(msg: impl Into<String>) -> serde_json::Value {
    serde_json::json!({ "error": msg.into() })
}

/// The front-end is served from another origin.
pub fn cors_headers() -> DefaultHeaders {
    DefaultHeaders::new().add(("Access-Control-Allow-Origin", "*"))
}

/// Registered last so the method-guarded resources above get first pick.
pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(index)
        .service(healthz)
        .service(fetch_model)
        .service(record_details)
        .service(serve_image)
        .service(preflight);
}

// -------------------------
// HTTP Handlers
// -------------------------

#[get("/")]
async fn index() -> impl Responder {
    HttpResponse::Ok().body(
        "diecast_fetch online.\n\
         GET  /api/fetch_model/{code}\n\
         POST /api/models/{code}/details {\"releaseType\":..,\"purchasePrice\":..,\"notes\":..}\n\
         GET  /images/{code}.jpg",
    )
}

#[get("/healthz")]
async fn healthz() -> impl Responder {
    HttpResponse::Ok().body("ok")
}

#[get("/api/fetch_model/{code}")]
async fn fetch_model(state: web::Data<ApiState>, code: web::Path<String>) -> HttpResponse {
    let code = code.into_inner();
    info!(product_code = %code, "fetch_model requested");

    if !is_valid_product_code(&code) {
        return HttpResponse::BadRequest()
            .json(error_body(format!("Invalid model number {code:?}.")));
    }

    if let Err(e) = state.orchestrator.scrape(&code).await {
        if e.stage() == Stage::Store {
            return HttpResponse::InternalServerError().json(error_body("record store unavailable"));
        }
        return HttpResponse::NotFound().json(serde_json::json!({
            "error": format!("Model {code} could not be scraped."),
            "stage": e.stage(),
        }));
    }

    let model_name = match state.orchestrator.store().find(&code).await {
        Ok(rec) => rec
            .and_then(|r| r.display_name)
            .unwrap_or_else(|| format!("{BRAND_PREFIX} {code}")),
        Err(e) => {
            error!(product_code = %code, error = %format!("{e:#}"), "record read failed");
            return HttpResponse::InternalServerError().json(error_body("record store unavailable"));
        }
    };

    HttpResponse::Ok().json(ModelResponse {
        model_name,
        image_url: state.cfg.image_url(&code),
    })
}

#[post("/api/models/{code}/details")]
async fn record_details(
    state: web::Data<ApiState>,
    code: web::Path<String>,
    body: web::Json<DetailsReq>,
) -> HttpResponse {
    let code = code.into_inner();
    let body = body.into_inner();
    let details = CatalogDetails {
        release_type: body.release_type,
        purchase_price: body.purchase_price,
        notes: body.notes,
    };

    let store = state.orchestrator.store();
    match store.record_details(&code, details).await {
        Ok(true) => match store.find(&code).await {
            Ok(Some(rec)) => HttpResponse::Ok().json(rec),
            Ok(None) => HttpResponse::NotFound().json(error_body(format!("Model {code} not found."))),
            Err(e) => {
                error!(product_code = %code, error = %format!("{e:#}"), "record read failed");
                HttpResponse::InternalServerError().json(error_body("record store unavailable"))
            }
        },
        Ok(false) => HttpResponse::NotFound().json(error_body(format!(
            "Model {code} has not been scraped yet."
        ))),
        Err(e) => {
            error!(product_code = %code, error = %format!("{e:#}"), "details update failed");
            HttpResponse::InternalServerError().json(error_body("record store unavailable"))
        }
    }
}

#[get("/images/{filename}")]
async fn serve_image(state: web::Data<ApiState>, filename: web::Path<String>) -> HttpResponse {
    let filename = filename.into_inner();
    if filename.contains(['/', '\\']) || filename.contains("..") {
        warn!(%filename, "rejected image path");
        return HttpResponse::NotFound().finish();
    }

    let path = state.cfg.image_dir.join(&filename);
    let mut file = match tokio::fs::File::open(&path).await {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return HttpResponse::NotFound().finish(),
        Err(e) => {
            error!(path = %path.display(), error = %e, "image open failed");
            return HttpResponse::InternalServerError().finish();
        }
    };

    let stream = async_stream::stream! {
        let mut buf = vec![0u8; CHUNK];
        loop {
            match file.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => yield Ok::<Bytes, actix_web::Error>(Bytes::copy_from_slice(&buf[..n])),
                Err(e) => {
                    yield Err(actix_web::error::ErrorInternalServerError(e));
                    break;
                }
            }
        }
    };

    HttpResponse::Ok()
        .insert_header(("Content-Type", content_type(&path)))
        .streaming(stream)
}

// Browsers send this before a cross-origin JSON POST.
#[route("/{tail:.*}", method = "OPTIONS")]
async fn preflight() -> HttpResponse {
    HttpResponse::NoContent()
        .insert_header(("Access-Control-Allow-Methods", "GET, POST, OPTIONS"))
        .insert_header(("Access-Control-Allow-Headers", "Content-Type"))
        .insert_header(("Access-Control-Max-Age", "86400"))
        .finish()
}

fn content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use actix_web::{App, test};

    use std::sync::Arc;

    use super::*;
    use crate::pipeline::tests::{
        Calls, SEARCH_HIT, SEARCH_MISS, StubDownloader, StubFetcher, StubRenderer, stubbed,
    };
    use crate::store::SqliteRepository;

    fn state(search_page: &'static str, cfg: AppConfig) -> web::Data<ApiState> {
        let (orch, _calls, _store) = stubbed(search_page);
        web::Data::new(ApiState::new(&cfg, orch))
    }

    #[actix_web::test]
    async fn failed_scrape_is_404_naming_the_code() {
        let app = test::init_service(
            App::new()
                .app_data(state(SEARCH_MISS, AppConfig::default()))
                .wrap(cors_headers())
                .configure(routes),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/api/fetch_model/XYZ123")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 404);
        assert_eq!(
            resp.headers().get("Access-Control-Allow-Origin").unwrap(),
            "*"
        );
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert!(body["error"].as_str().unwrap().contains("XYZ123"));
        assert_eq!(body["stage"], "no_product_link");
    }

    #[actix_web::test]
    async fn successful_scrape_returns_name_and_image_url() {
        let app = test::init_service(
            App::new()
                .app_data(state(SEARCH_HIT, AppConfig::default()))
                .configure(routes),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/api/fetch_model/MGT00123")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["modelName"], "Nissan Skyline GT-R R34");
        assert_eq!(body["imageUrl"], "http://localhost:5000/images/MGT00123.jpg");
    }

    #[actix_web::test]
    async fn unsafe_code_is_rejected_before_scraping() {
        let app = test::init_service(
            App::new()
                .app_data(state(SEARCH_HIT, AppConfig::default()))
                .configure(routes),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/api/fetch_model/a.jpg")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
    }

    #[actix_web::test]
    async fn details_need_a_scraped_record() {
        let app = test::init_service(
            App::new()
                .app_data(state(SEARCH_HIT, AppConfig::default()))
                .configure(routes),
        )
        .await;

        let details = serde_json::json!({ "releaseType": "Chase", "purchasePrice": 899.0 });
        let req = test::TestRequest::post()
            .uri("/api/models/MGT00123/details")
            .set_json(&details)
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 404);

        let req = test::TestRequest::get()
            .uri("/api/fetch_model/MGT00123")
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 200);

        let req = test::TestRequest::post()
            .uri("/api/models/MGT00123/details")
            .set_json(&details)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["productCode"], "MGT00123");
    }

    #[actix_web::test]
    async fn serves_stored_images() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("MGT00123.jpg"), b"\xFF\xD8jpeg").unwrap();
        let cfg = AppConfig {
            image_dir: dir.path().to_path_buf(),
            ..AppConfig::default()
        };
        let app = test::init_service(
            App::new()
                .app_data(state(SEARCH_HIT, cfg))
                .configure(routes),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/images/MGT00123.jpg")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.headers().get("Content-Type").unwrap(), "image/jpeg");
        assert_eq!(test::read_body(resp).await.as_ref(), b"\xFF\xD8jpeg");

        let req = test::TestRequest::get().uri("/images/nope.jpg").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 404);

        let req = test::TestRequest::get().uri("/images/..hidden").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 404);
    }

    #[actix_web::test]
    async fn store_failure_after_scrape_is_a_server_error() {
        // Schema never created, so the upsert fails.
        let dir = tempfile::tempdir().unwrap();
        let cfg = AppConfig {
            db_path: dir.path().join("missing-schema.db"),
            ..AppConfig::default()
        };
        let calls = Arc::new(Calls::default());
        let orch = Orchestrator::new(
            &cfg,
            Arc::new(StubRenderer(SEARCH_HIT, calls.clone())),
            Arc::new(StubFetcher(calls.clone())),
            Arc::new(StubDownloader(calls.clone())),
            Arc::new(SqliteRepository::new(&cfg)),
        );
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(ApiState::new(&cfg, orch)))
                .configure(routes),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/api/fetch_model/MGT00123")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 500);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "record store unavailable");
    }

    #[actix_web::test]
    async fn answers_cors_preflight_for_details_post() {
        let app = test::init_service(
            App::new()
                .app_data(state(SEARCH_HIT, AppConfig::default()))
                .wrap(cors_headers())
                .configure(routes),
        )
        .await;

        let req = test::TestRequest::default()
            .method(actix_web::http::Method::OPTIONS)
            .uri("/api/models/MGT00123/details")
            .insert_header(("Origin", "http://localhost:3000"))
            .insert_header(("Access-Control-Request-Method", "POST"))
            .insert_header(("Access-Control-Request-Headers", "content-type"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 204);
        let headers = resp.headers();
        assert_eq!(headers.get("Access-Control-Allow-Origin").unwrap(), "*");
        assert!(
            headers
                .get("Access-Control-Allow-Methods")
                .unwrap()
                .to_str()
                .unwrap()
                .contains("POST")
        );
        assert_eq!(
            headers.get("Access-Control-Allow-Headers").unwrap(),
            "Content-Type"
        );

        // Real requests on the same path still reach their handlers.
        let req = test::TestRequest::get().uri("/healthz").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 200);
    }
}

use log::{info, warn};
use std::sync::Arc;

use actix_web::{HttpRequest, HttpResponse, Responder, guard, http::Method, web};
use actix_ws::{Message, MessageStream, Session};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use crate::error::AppError;
use crate::events::{EventBroadcaster, StateEvent};
use crate::gpio::GpioBackend;
use crate::registry::{NewPin, PinPatch, PinRegistry};

pub struct AppState<B: GpioBackend> {
    pub registry: Arc<PinRegistry<B>>,
    pub events: Arc<EventBroadcaster>,
}

impl<B: GpioBackend> Clone for AppState<B> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            events: Arc::clone(&self.events),
        }
    }
}

#[derive(Deserialize, Default)]
struct HistoryQuery {
    limit: Option<usize>,
}

async fn handle_event_websocket(
    mut session: Session,
    mut client_stream: MessageStream,
    rx: broadcast::Receiver<StateEvent>,
) {
    let mut events = BroadcastStream::new(rx);

    loop {
        tokio::select! {
            msg = client_stream.recv() => {
                let Some(msg) = msg else { break; };

                match msg {
                    Ok(Message::Ping(bytes)) => {
                        let _ = session.pong(&bytes).await;
                    }
                    Ok(Message::Close(reason)) => {
                        let _ = session.close(reason).await;
                        break;
                    }
                    Ok(Message::Text(_))
                    | Ok(Message::Binary(_))
                    | Ok(Message::Pong(_))
                    | Ok(Message::Continuation(_))
                    | Ok(Message::Nop) => {}
                    Err(_) => break,
                }
            }
            event = events.next() => {
                let Some(event) = event else { break; };

                match event {
                    Ok(event) => {
                        if let Ok(text) = serde_json::to_string(&event) {
                            if session.text(text).await.is_err() {
                                warn!("WebSocket client disconnected");
                                break;
                            }
                        }
                    }
                    Err(BroadcastStreamRecvError::Lagged(n)) => {
                        let notice = AppError::Gpio(format!("Event stream lagged by {n} messages"));
                        if session.text(notice.to_string()).await.is_err() {
                            warn!("WebSocket client lagged and disconnected");
                            break;
                        }
                    }
                }
            }
        }
    }
}

impl<B: GpioBackend + 'static> AppState<B> {
    pub fn api_scope(&self, base_path: &str) -> actix_web::Scope {
        api_scope::<B>(base_path)
    }
}

pub fn api_scope<B: GpioBackend + 'static>(base_path: &str) -> actix_web::Scope {
    web::scope(base_path)
        .service(pins_collection::<B>("/pins"))
        .service(pins_collection::<B>("/pins/"))
        .service(
            web::resource("/pins/{id}")
                .route(web::get().to(get_pin::<B>))
                .route(web::put().to(replace_pin::<B>))
                .route(web::patch().to(patch_pin::<B>))
                .route(web::delete().to(delete_pin::<B>))
                .route(
                    web::route()
                        .guard(guard_not_methods(&[
                            Method::GET,
                            Method::PUT,
                            Method::PATCH,
                            Method::DELETE,
                        ]))
                        .to(method_not_allowed),
                ),
        )
        .service(
            web::resource("/events")
                .route(web::get().to(events_ws::<B>))
                .route(
                    web::route()
                        .guard(guard_not_methods(&[Method::GET]))
                        .to(method_not_allowed),
                ),
        )
        .service(
            web::resource("/events/history")
                .route(web::get().to(event_history::<B>))
                .route(
                    web::route()
                        .guard(guard_not_methods(&[Method::GET]))
                        .to(method_not_allowed),
                ),
        )
}

// existing clients address the collection with a trailing slash
fn pins_collection<B: GpioBackend + 'static>(path: &str) -> actix_web::Resource {
    web::resource(path)
        .route(web::get().to(list_pins::<B>))
        .route(web::post().to(create_pin::<B>))
        .route(
            web::route()
                .guard(guard_not_methods(&[Method::GET, Method::POST]))
                .to(method_not_allowed),
        )
}

async fn list_pins<B: GpioBackend + 'static>(
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    Ok(web::Json(state.registry.list_all()))
}

async fn create_pin<B: GpioBackend + 'static>(
    body: web::Bytes,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    let payload: NewPin = parse_json_payload(&body)?;
    let pin = state.registry.create(payload)?;

    Ok(HttpResponse::Created().json(pin))
}

async fn get_pin<B: GpioBackend + 'static>(
    req: HttpRequest,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    let id = parse_pin_id(&req)?;
    let pin = state.registry.get_by_id(id)?;

    Ok(web::Json(pin))
}

async fn replace_pin<B: GpioBackend + 'static>(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    let id = parse_pin_id(&req)?;
    let payload: NewPin = parse_json_payload(&body)?;
    let pin = state.registry.update(id, payload.into())?;

    Ok(web::Json(pin))
}

async fn patch_pin<B: GpioBackend + 'static>(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    let id = parse_pin_id(&req)?;
    let patch: PinPatch = parse_json_payload(&body)?;
    let pin = state.registry.update(id, patch)?;

    Ok(web::Json(pin))
}

async fn delete_pin<B: GpioBackend + 'static>(
    req: HttpRequest,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    let id = parse_pin_id(&req)?;
    state.registry.delete(id)?;

    Ok(HttpResponse::NoContent().finish())
}

async fn event_history<B: GpioBackend + 'static>(
    query: web::Query<HistoryQuery>,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    Ok(web::Json(state.events.history(query.limit)))
}

async fn events_ws<B: GpioBackend + 'static>(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState<B>>,
) -> Result<HttpResponse, AppError> {
    let rx = state.events.subscribe();
    let (response, session, client_stream) = actix_ws::handle(&req, stream)
        .map_err(|e| AppError::InvalidValue(format!("Websocket error: {e}")))?;

    info!("WebSocket subscriber connected");
    actix_web::rt::spawn(async move {
        handle_event_websocket(session, client_stream, rx).await;
    });

    Ok(response)
}

fn parse_pin_id(req: &HttpRequest) -> Result<u32, AppError> {
    let id = req
        .match_info()
        .get("id")
        .ok_or_else(|| AppError::InvalidValue("Missing pin id".into()))?;
    let id = id
        .parse::<u32>()
        .map_err(|_| AppError::InvalidValue("Invalid pin id".into()))?;

    Ok(id)
}

fn parse_json_payload<T: DeserializeOwned>(body: &[u8]) -> Result<T, AppError> {
    if body.is_empty() {
        return Err(AppError::InvalidValue("Empty pin payload".into()));
    }

    serde_json::from_slice(body)
        .map_err(|e| AppError::InvalidValue(format!("Invalid pin payload: {e}")))
}

async fn method_not_allowed() -> HttpResponse {
    HttpResponse::MethodNotAllowed().finish()
}

fn guard_not_methods(methods: &[Method]) -> impl guard::Guard {
    let allowed: Vec<Method> = methods.to_vec();
    guard::fn_guard(move |ctx| !allowed.iter().any(|m| m == ctx.head().method))
}

use crate::metrics;
use crate::middleware::guards::authenticate;
use crate::models::ParticipantProfile;
use crate::state::AppState;
use crate::websocket::message_types::{WsInboundEvent, WsOutboundEvent};
use crate::websocket::{ConnectionRegistry, SubscriberId};
use actix::{Actor, ActorContext, AsyncContext, StreamHandler};
use actix_web::{get, web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_stream::wrappers::UnboundedReceiverStream;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    /// Browsers cannot set headers on a WebSocket handshake.
    pub token: Option<String>,
}

struct WsSession {
    participant: ParticipantProfile,
    subscriber_id: SubscriberId,
    registry: ConnectionRegistry,
    outbound: Option<UnboundedReceiver<String>>,
    hb: Instant,
    heartbeat_interval: Duration,
    client_timeout: Duration,
}

impl WsSession {
    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        let timeout = self.client_timeout;
        ctx.run_interval(self.heartbeat_interval, move |act, ctx| {
            if Instant::now().duration_since(act.hb) > timeout {
                tracing::warn!(participant_id = %act.participant.id, "realtime heartbeat timed out");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn send_control(ctx: &mut ws::WebsocketContext<Self>, frame: &WsOutboundEvent) {
        match serde_json::to_string(frame) {
            Ok(text) => ctx.text(text),
            Err(e) => tracing::warn!(error = %e, "failed to encode control frame"),
        }
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!(
            participant_id = %self.participant.id,
            participant_type = %self.participant.participant_type,
            "realtime session started"
        );
        metrics::realtime_connection_opened();
        self.hb(ctx);

        if let Some(rx) = self.outbound.take() {
            ctx.add_stream(UnboundedReceiverStream::new(rx));
        }
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::info!(participant_id = %self.participant.id, "realtime session stopped");
        metrics::realtime_connection_closed();

        let registry = self.registry.clone();
        let participant_id = self.participant.id.clone();
        let subscriber_id = self.subscriber_id;
        actix::spawn(async move {
            registry
                .remove_subscriber(&participant_id, subscriber_id)
                .await;
        });
    }
}

/// Ledger events queued for this session by the registry.
impl StreamHandler<String> for WsSession {
    fn handle(&mut self, payload: String, ctx: &mut Self::Context) {
        ctx.text(payload);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(bytes)) => {
                self.hb = Instant::now();
                ctx.pong(&bytes);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                self.hb = Instant::now();
                match serde_json::from_str::<WsInboundEvent>(&text) {
                    Ok(WsInboundEvent::Ping) => Self::send_control(ctx, &WsOutboundEvent::Pong),
                    Err(e) => {
                        tracing::debug!(error = %e, "unrecognised realtime frame");
                        Self::send_control(
                            ctx,
                            &WsOutboundEvent::Error {
                                message: "unsupported frame".into(),
                            },
                        );
                    }
                }
            }
            Ok(ws::Message::Binary(_)) => {
                tracing::debug!("binary realtime frames are not supported");
            }
            Ok(ws::Message::Close(reason)) => {
                tracing::debug!(?reason, "realtime close frame received");
                ctx.close(reason);
                ctx.stop();
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "realtime protocol error");
                ctx.stop();
            }
        }
    }
}

/// GET /communication/ws
///
/// Authenticates at handshake time. Events are delivered at most once while
/// the socket is open; clients refetch over HTTP after a reconnect.
#[get("/communication/ws")]
pub async fn ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
    query: web::Query<WsParams>,
) -> Result<HttpResponse, actix_web::Error> {
    let participant = authenticate(&req, query.token.as_deref()).map_err(|e| {
        tracing::debug!(error = %e, "realtime handshake rejected");
        e
    })?;

    let (subscriber_id, rx) = state
        .registry
        .add_subscriber(&participant.id, participant.participant_type)
        .await;

    let session = WsSession {
        participant: participant.clone(),
        subscriber_id,
        registry: state.registry.clone(),
        outbound: Some(rx),
        hb: Instant::now(),
        heartbeat_interval: Duration::from_secs(state.config.ws_heartbeat_interval_secs.max(1)),
        client_timeout: Duration::from_secs(state.config.ws_client_timeout_secs.max(1)),
    };

    match ws::start(session, &req, stream) {
        Ok(resp) => Ok(resp),
        Err(e) => {
            // Handshake failed after registration; undo it.
            state
                .registry
                .remove_subscriber(&participant.id, subscriber_id)
                .await;
            Err(e)
        }
    }
}

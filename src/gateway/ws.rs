//! Per-connection WebSocket handler.
//!
//! The client pings are answered, the server pings every 5s and a connection
//! with no client traffic for 10s is closed. Subscriptions are checked
//! against group membership each time they are requested.

use std::time::{Duration, Instant};

use actix_web::{get, web, HttpRequest, HttpResponse};
use actix_ws::{CloseCode, CloseReason, Closed, Message, MessageStream, ProtocolError, Session};
use tokio::time;
use tracing::{info, warn};

use super::dto::{ClientFrame, ExpenseView, ServerFrame};
use super::AppState;
use crate::auth::check_authorization;
use crate::error::ServiceError;
use crate::hub::{HubEvent, SessionHandle};

#[cfg(not(test))]
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
#[cfg(test)]
const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(50);

#[cfg(not(test))]
const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);
#[cfg(test)]
const CLIENT_TIMEOUT: Duration = Duration::from_millis(100);

/// Upgrades an authenticated request and hands the socket to a session task.
#[get("/ws")]
pub async fn ws_entry(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Payload,
) -> actix_web::Result<HttpResponse> {
    let user = check_authorization(&req, state.authenticator.as_ref())?;
    let (response, session, stream) = actix_ws::handle(&req, body)?;

    let handle = state.hub.connect(user);
    info!(session = handle.id, user = %handle.user_id, "websocket connected");
    actix_web::rt::spawn(async move {
        WsSession { state, handle }.run(session, stream).await;
    });
    Ok(response)
}

enum SessionError {
    ClientClosed(Option<CloseReason>),
    StreamClosed,
    HeartbeatTimeout,
    Protocol(ProtocolError),
    OutboxClosed,
    Network(Closed),
}

struct WsSession {
    state: web::Data<AppState>,
    handle: SessionHandle,
}

impl WsSession {
    async fn run(self, mut session: Session, mut stream: MessageStream) {
        let mut last_heartbeat = Instant::now();
        let mut heartbeat = time::interval(HEARTBEAT_INTERVAL);

        let error = loop {
            let result = tokio::select! {
                _ = heartbeat.tick() => {
                    self.handle_heartbeat_tick(&mut session, &last_heartbeat).await
                }
                message = stream.recv() => {
                    self.handle_stream_message(&mut session, &mut last_heartbeat, message)
                        .await
                }
                event = self.handle.recv() => {
                    self.forward_event(&mut session, event).await
                }
            };
            if let Err(error) = result {
                break error;
            }
        };

        self.state.hub.disconnect(self.handle.id);
        self.log_shutdown_reason(&error);
        if let Some(reason) = close_reason_for(error) {
            if let Err(error) = session.close(reason).await {
                warn!(error = %error, "failed to close websocket session");
            }
        }
    }

    async fn handle_heartbeat_tick(
        &self,
        session: &mut Session,
        last_heartbeat: &Instant,
    ) -> Result<(), SessionError> {
        if Instant::now().duration_since(*last_heartbeat) > CLIENT_TIMEOUT {
            return Err(SessionError::HeartbeatTimeout);
        }
        session.ping(b"").await.map_err(SessionError::Network)
    }

    async fn handle_stream_message(
        &self,
        session: &mut Session,
        last_heartbeat: &mut Instant,
        message: Option<Result<Message, ProtocolError>>,
    ) -> Result<(), SessionError> {
        let Some(message) = message else {
            return Err(SessionError::StreamClosed);
        };
        let message = message.map_err(SessionError::Protocol)?;

        *last_heartbeat = Instant::now();
        match message {
            Message::Ping(payload) => session.pong(&payload).await.map_err(SessionError::Network),
            Message::Text(text) => self.handle_text(session, text.as_ref()).await,
            Message::Close(reason) => Err(SessionError::ClientClosed(reason)),
            Message::Pong(_) | Message::Binary(_) | Message::Continuation(_) | Message::Nop => {
                Ok(())
            }
        }
    }

    async fn handle_text(&self, session: &mut Session, text: &str) -> Result<(), SessionError> {
        let frame = match serde_json::from_str::<ClientFrame>(text) {
            Ok(frame) => frame,
            Err(error) => {
                warn!(session = self.handle.id, error = %error, "rejected malformed websocket frame");
                let reply = ServerFrame::error(&ServiceError::invalid("malformed frame"), None);
                return self.send(session, &reply).await;
            }
        };

        let reply = match frame {
            ClientFrame::Subscribe { group_id } => {
                let subscribed = self
                    .state
                    .hub
                    .subscribe(self.handle.id, &group_id, self.state.service.as_ref())
                    .await;
                match subscribed {
                    Ok(()) => ServerFrame::Subscribed { group_id },
                    Err(err) => ServerFrame::error(&err, Some(group_id)),
                }
            }
            ClientFrame::Unsubscribe { group_id } => {
                self.state.hub.unsubscribe(self.handle.id, &group_id);
                ServerFrame::Unsubscribed { group_id }
            }
        };
        self.send(session, &reply).await
    }

    async fn forward_event(
        &self,
        session: &mut Session,
        event: Option<std::sync::Arc<HubEvent>>,
    ) -> Result<(), SessionError> {
        let Some(event) = event else {
            return Err(SessionError::OutboxClosed);
        };
        let frame = match event.as_ref() {
            HubEvent::ExpenseNew { expense } => ServerFrame::ExpenseNew {
                expense: ExpenseView::from(expense),
            },
            HubEvent::MemberJoined { group_id, member } => ServerFrame::MemberJoined {
                group_id: group_id.clone(),
                member: member.clone(),
            },
        };
        self.send(session, &frame).await
    }

    async fn send(&self, session: &mut Session, frame: &ServerFrame) -> Result<(), SessionError> {
        match serde_json::to_string(frame) {
            Ok(body) => session.text(body).await.map_err(SessionError::Network),
            Err(error) => {
                warn!(error = %error, "failed to serialize websocket frame");
                Ok(())
            }
        }
    }

    fn log_shutdown_reason(&self, error: &SessionError) {
        let session = self.handle.id;
        match error {
            SessionError::HeartbeatTimeout => warn!(session, "websocket heartbeat timeout"),
            SessionError::Protocol(error) => warn!(session, error = %error, "websocket protocol error"),
            SessionError::Network(error) => warn!(session, error = %error, "websocket send failed"),
            SessionError::OutboxClosed
            | SessionError::ClientClosed(_)
            | SessionError::StreamClosed => info!(session, "websocket closed"),
        }
    }
}

fn close_reason_for(error: SessionError) -> Option<Option<CloseReason>> {
    match error {
        SessionError::HeartbeatTimeout => Some(Some(CloseReason {
            code: CloseCode::Normal,
            description: Some("heartbeat timeout".to_owned()),
        })),
        SessionError::Protocol(_) => Some(Some(CloseReason {
            code: CloseCode::Protocol,
            description: Some("protocol error".to_owned()),
        })),
        SessionError::OutboxClosed => Some(Some(CloseReason {
            code: CloseCode::Away,
            description: None,
        })),
        SessionError::ClientClosed(reason) => Some(reason),
        SessionError::StreamClosed | SessionError::Network(_) => None,
    }
}

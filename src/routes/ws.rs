//! WebSocket upgrade + message loop. Each client message is parsed as JSON and
//! forwarded to the engine. We reply with a single JSON message per command;
//! this is the surface a chat-bot bridge would speak.

use axum::{
  extract::{
    ws::{Message, WebSocket},
    State, WebSocketUpgrade,
  },
  response::IntoResponse,
};
use tracing::{debug, error, info, instrument};

use crate::domain::Profile;
use crate::engine::RegisterInput;
use crate::protocol::{
  answer_to_ws, bonus_to_ws, delivery_to_ws, error_code, hint_to_ws, to_player_out,
  ClientWsMessage, ServerWsMessage,
};
use crate::state::AppState;
use crate::util::{trunc_for_log, utc_today};

/// Chat replies stay short: top five rows unless the client asks otherwise.
const CHAT_TOP_N: usize = 5;

#[instrument(level = "info", skip(state))]
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
  info!(target: "riddlewars", "WebSocket upgrade requested");
  ws.on_upgrade(move |socket| handle_ws(socket, state))
}

#[instrument(level = "info", skip(socket, state))]
async fn handle_ws(mut socket: WebSocket, state: AppState) {
  info!(target: "riddlewars", "WebSocket connected");
  while let Some(Ok(msg)) = socket.recv().await {
    match msg {
      Message::Text(txt) => {
        // Parse, dispatch, serialize response.
        let reply_msg = match serde_json::from_str::<ClientWsMessage>(&txt) {
          Ok(incoming) => {
            debug!(target: "riddlewars", msg = %trunc_for_log(&txt, 256), "WS received");
            handle_client_ws(incoming, &state).await
          }
          Err(e) => ServerWsMessage::Error {
            code: "invalid_json",
            message: format!("Invalid JSON: {}", e),
          },
        };

        let out = serde_json::to_string(&reply_msg).unwrap_or_else(|e| {
          serde_json::json!({ "type": "error", "code": "serialization", "message": format!("Serialization error: {}", e) }).to_string()
        });

        if let Err(e) = socket.send(Message::Text(out)).await {
          error!(target: "riddlewars", error = %e, "WS send error");
          break;
        }
      }
      Message::Ping(payload) => { let _ = socket.send(Message::Pong(payload)).await; }
      Message::Close(_) => break,
      _ => {}
    }
  }
  info!(target: "riddlewars", "WebSocket disconnected");
}

fn ws_err(e: crate::engine::EngineError) -> ServerWsMessage {
  ServerWsMessage::Error { code: error_code(&e), message: e.to_string() }
}

#[instrument(level = "info", skip_all)]
async fn handle_client_ws(msg: ClientWsMessage, state: &AppState) -> ServerWsMessage {
  let engine = &state.engine;
  match msg {
    ClientWsMessage::Ping => ServerWsMessage::Pong,

    ClientWsMessage::Register { user_id, name, phone, account_number, bank, referrer_id } => {
      let input = RegisterInput {
        id: user_id.clone(),
        profile: Profile { name, phone, account_number, bank },
        referrer: referrer_id,
      };
      match engine.register(input).await {
        Ok(()) => {
          info!(target: "riddlewars", %user_id, "WS registration");
          ServerWsMessage::Registered { user_id }
        }
        Err(e) => ws_err(e),
      }
    }

    ClientWsMessage::DailyBonus { user_id } => match engine.claim_daily_bonus(&user_id).await {
      Ok(b) => {
        info!(target: "riddlewars", %user_id, streak = b.streak, "WS daily bonus");
        bonus_to_ws(b)
      }
      Err(e) => ws_err(e),
    },

    ClientWsMessage::NextRiddle { user_id, pack } => {
      match engine.next_riddle(&user_id, &pack).await {
        Ok(d) => {
          info!(target: "riddlewars", %user_id, %pack, "WS riddle served");
          delivery_to_ws(&pack, d)
        }
        Err(e) => ws_err(e),
      }
    }

    ClientWsMessage::SubmitAnswer { user_id, pack, answer, used_hint } => {
      match engine.submit_answer(&user_id, &pack, &answer, used_hint).await {
        Ok(a) => {
          info!(target: "riddlewars", %user_id, %pack, correct = a.correct, "WS answer evaluated");
          answer_to_ws(a)
        }
        Err(e) => ws_err(e),
      }
    }

    ClientWsMessage::Hint { user_id, pack } => match engine.buy_hint(&user_id, &pack).await {
      Ok(h) => {
        info!(target: "riddlewars", %user_id, %pack, "WS hint served");
        hint_to_ws(h)
      }
      Err(e) => ws_err(e),
    },

    ClientWsMessage::Leaderboard { scope, pack, limit } => {
      let limit = limit.unwrap_or(CHAT_TOP_N);
      let rows = match (scope.as_str(), pack) {
        ("today", Some(pack)) => engine.leaderboard_for_pack(&pack, utc_today(), limit).await,
        ("today", None) => engine.leaderboard_for_date(utc_today(), limit).await,
        _ => engine.leaderboard_global(limit).await,
      };
      match rows {
        Ok(rows) => ServerWsMessage::Leaderboard { rows },
        Err(e) => ws_err(e),
      }
    }

    ClientWsMessage::Player { user_id } => match engine.get_player(&user_id).await {
      Ok(p) => ServerWsMessage::Player { player: to_player_out(&p) },
      Err(e) => ws_err(e),
    },
  }
}

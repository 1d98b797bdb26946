//! HTTP endpoint handlers. Thin wrappers that forward to the engine and map
//! typed failures onto status codes. The webhook handler is the exception:
//! it always acknowledges with 200 (unless storage is down) because payment
//! providers retry on anything else.

use axum::{
  extract::{Query, State},
  http::StatusCode,
  response::{IntoResponse, Response},
  Json,
};
use tracing::{info, instrument, warn};

use crate::domain::PaymentEvent;
use crate::engine::{EngineError, PaymentOutcome};
use crate::protocol::*;
use crate::state::AppState;
use crate::util::utc_today;

/// Default top-N for HTTP leaderboards and exports.
const HTTP_TOP_N: usize = 10;

/// Engine failure as an HTTP response: status code + {error, message}.
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
  fn from(e: EngineError) -> Self {
    ApiError(e)
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = match &self.0 {
      EngineError::NotRegistered | EngineError::UnknownPack { .. } => StatusCode::NOT_FOUND,
      EngineError::AlreadyRegistered
      | EngineError::AlreadyClaimedToday
      | EngineError::RiddleAlreadySolved
      | EngineError::NoRiddleAvailable
      | EngineError::DuplicatePaymentReference => StatusCode::CONFLICT,
      EngineError::InsufficientCoins { .. } => StatusCode::PAYMENT_REQUIRED,
      EngineError::PackLocked { .. } => StatusCode::FORBIDDEN,
      EngineError::StorageUnavailable => StatusCode::SERVICE_UNAVAILABLE,
    };
    let body = serde_json::json!({
      "error": error_code(&self.0),
      "message": self.0.to_string(),
    });
    (status, Json(body)).into_response()
  }
}

#[instrument(level = "info")]
pub async fn http_health() -> impl IntoResponse {
  Json(HealthOut { ok: true })
}

#[instrument(level = "info", skip(state, body), fields(user_id = %body.user_id))]
pub async fn http_post_register(
  State(state): State<AppState>,
  Json(body): Json<RegisterIn>,
) -> Result<Json<StatusOut>, ApiError> {
  let input = crate::engine::RegisterInput {
    id: body.user_id.clone(),
    profile: crate::domain::Profile {
      name: body.name,
      phone: body.phone,
      account_number: body.account_number,
      bank: body.bank,
    },
    referrer: body.referrer_id,
  };
  match state.engine.register(input).await {
    Ok(()) => Ok(Json(StatusOut { status: "registered" })),
    // Not an error for the end user, just a different message.
    Err(EngineError::AlreadyRegistered) => Ok(Json(StatusOut { status: "already_registered" })),
    Err(e) => Err(e.into()),
  }
}

#[instrument(level = "info", skip(state), fields(user_id = %q.user_id))]
pub async fn http_get_player(
  State(state): State<AppState>,
  Query(q): Query<PlayerQuery>,
) -> Result<Json<PlayerOut>, ApiError> {
  let p = state.engine.get_player(&q.user_id).await?;
  Ok(Json(to_player_out(&p)))
}

#[instrument(level = "info", skip(state), fields(user_id = %q.user_id, pack = %q.pack.clone().unwrap_or_else(|| "free".into())))]
pub async fn http_get_riddle(
  State(state): State<AppState>,
  Query(q): Query<RiddleQuery>,
) -> Result<Json<RiddleOut>, ApiError> {
  let pack = q.pack.unwrap_or_else(|| "free".into());
  let delivery = state.engine.next_riddle(&q.user_id, &pack).await?;
  let out = match delivery {
    crate::engine::RiddleDelivery::Next { riddle, remaining_in_pack } => {
      info!(target: "riddlewars", user_id = %q.user_id, %pack, riddle = %riddle.id, "HTTP riddle served");
      RiddleOut::Riddle {
        riddle_id: riddle.id,
        question: riddle.question,
        has_hint: riddle.has_hint,
        remaining_in_pack,
      }
    }
    crate::engine::RiddleDelivery::PackCompleted => RiddleOut::PackCompleted,
    crate::engine::RiddleDelivery::DailyLimitReached => RiddleOut::DailyLimitReached,
  };
  Ok(Json(out))
}

#[instrument(level = "info", skip(state, body), fields(user_id = %body.user_id, pack = %body.pack, answer_len = body.answer.len()))]
pub async fn http_post_answer(
  State(state): State<AppState>,
  Json(body): Json<AnswerIn>,
) -> Result<Json<AnswerOut>, ApiError> {
  let res = state
    .engine
    .submit_answer(&body.user_id, &body.pack, &body.answer, body.used_hint)
    .await?;
  info!(target: "riddlewars", user_id = %body.user_id, correct = res.correct, points = res.points, "HTTP answer evaluated");
  Ok(Json(AnswerOut {
    correct: res.correct,
    points: res.points,
    total_score: res.total_score,
    question: res.question,
  }))
}

#[instrument(level = "info", skip(state, body), fields(user_id = %body.user_id, pack = %body.pack))]
pub async fn http_post_hint(
  State(state): State<AppState>,
  Json(body): Json<HintIn>,
) -> Result<Json<HintOut>, ApiError> {
  let res = state.engine.buy_hint(&body.user_id, &body.pack).await?;
  Ok(Json(HintOut { text: res.text, coins_left: res.coins_left }))
}

#[instrument(level = "info", skip(state, body), fields(user_id = %body.user_id))]
pub async fn http_post_daily_bonus(
  State(state): State<AppState>,
  Json(body): Json<BonusIn>,
) -> Result<Json<BonusOut>, ApiError> {
  let res = state.engine.claim_daily_bonus(&body.user_id).await?;
  Ok(Json(BonusOut {
    streak: res.streak,
    coins_awarded: res.coins_awarded,
    balance: res.balance,
  }))
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_leaderboard(
  State(state): State<AppState>,
  Query(q): Query<LeaderboardQuery>,
) -> Result<Json<LeaderboardOut>, ApiError> {
  let limit = q.limit.unwrap_or(HTTP_TOP_N);
  let rows = match q.scope.as_deref() {
    Some("today") => match q.pack {
      Some(pack) => state.engine.leaderboard_for_pack(&pack, utc_today(), limit).await?,
      None => {
        state
          .engine
          .leaderboard_for_date(q.date.unwrap_or_else(utc_today), limit)
          .await?
      }
    },
    _ => state.engine.leaderboard_global(limit).await?,
  };
  Ok(Json(LeaderboardOut { rows }))
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_export_winners(
  State(state): State<AppState>,
  Query(q): Query<ExportQuery>,
) -> Result<Json<Vec<crate::engine::WinnerRow>>, ApiError> {
  let rows = state.engine.export_winners(q.top_n.unwrap_or(HTTP_TOP_N)).await?;
  info!(target: "riddlewars", rows = rows.len(), "Winners export served");
  Ok(Json(rows))
}

#[instrument(level = "info", skip(state, body), fields(player_id = %body.player_id, amount = body.amount))]
pub async fn http_post_payout(
  State(state): State<AppState>,
  Json(body): Json<PayoutIn>,
) -> Result<Json<crate::domain::PayoutRecord>, ApiError> {
  let record = state
    .engine
    .record_payout(&body.player_id, body.amount, &body.method)
    .await?;
  Ok(Json(record))
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_payouts(
  State(state): State<AppState>,
) -> Json<Vec<crate::domain::PayoutRecord>> {
  Json(state.engine.list_payouts().await)
}

/// Provider webhook intake. Events arrive already signature-verified; a
/// non-2xx here only triggers provider retries, so business rejections are
/// acknowledged with 200 and described in the body.
#[instrument(level = "info", skip(state, body), fields(player_id = %body.player_id, reference = %body.reference))]
pub async fn http_post_payment_webhook(
  State(state): State<AppState>,
  Json(body): Json<PaymentEvent>,
) -> Response {
  match state.engine.confirm_payment(body).await {
    Ok(PaymentOutcome::Applied { action, .. }) => {
      Json(WebhookAck { status: "applied", detail: Some(action) }).into_response()
    }
    Ok(PaymentOutcome::Ignored { reason }) => {
      Json(WebhookAck { status: "ignored", detail: Some(reason) }).into_response()
    }
    Err(EngineError::StorageUnavailable) => {
      // The one case we want the provider to retry.
      ApiError(EngineError::StorageUnavailable).into_response()
    }
    Err(e) => {
      warn!(target: "payment", error = %e, "Webhook rejected");
      Json(WebhookAck { status: "rejected", detail: Some(error_code(&e).into()) }).into_response()
    }
  }
}

//! Public protocol structs for WebSocket and HTTP endpoints (serde ready).
//! Keep this small and stable to evolve backend and chat clients independently.

use serde::{Deserialize, Serialize};

use crate::domain::Player;
use crate::engine::{
    AnswerResult, BonusResult, EngineError, HintResult, LeaderboardRow, RiddleDelivery,
};

/// Messages a chat client can send over WebSocket. One reply per command.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientWsMessage {
    Ping,
    Register {
        user_id: String,
        name: String,
        phone: String,
        account_number: String,
        bank: String,
        #[serde(default)]
        referrer_id: Option<String>,
    },
    DailyBonus {
        user_id: String,
    },
    NextRiddle {
        user_id: String,
        pack: String,
    },
    SubmitAnswer {
        user_id: String,
        pack: String,
        answer: String,
        #[serde(default)]
        used_hint: bool,
    },
    Hint {
        user_id: String,
        pack: String,
    },
    Leaderboard {
        /// "global" for the all-time paid-tier board, "today" for the
        /// per-pack daily board.
        scope: String,
        #[serde(default)]
        pack: Option<String>,
        #[serde(default)]
        limit: Option<usize>,
    },
    Player {
        user_id: String,
    },
}

/// Messages the server sends back over WebSocket.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerWsMessage {
    Pong,
    Registered {
        user_id: String,
    },
    DailyBonus {
        streak: u32,
        coins_awarded: u64,
        balance: u64,
    },
    Riddle {
        pack: String,
        riddle_id: String,
        question: String,
        has_hint: bool,
        remaining_in_pack: usize,
    },
    PackCompleted {
        pack: String,
    },
    DailyLimitReached {
        pack: String,
    },
    AnswerResult {
        correct: bool,
        points: u64,
        total_score: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        question: Option<String>,
    },
    Hint {
        text: String,
        coins_left: u64,
    },
    Leaderboard {
        rows: Vec<LeaderboardRow>,
    },
    Player {
        player: PlayerOut,
    },
    Error {
        code: &'static str,
        message: String,
    },
}

/// Player DTO for the owner's own view; bank details stay server-side
/// except through the winners export.
#[derive(Debug, Serialize)]
pub struct PlayerOut {
    pub id: String,
    pub name: String,
    pub coins: u64,
    pub is_vip: bool,
    pub is_premium: bool,
    pub score: u64,
    pub streak: u32,
    pub solved_count: usize,
    pub daily_riddles_done: u32,
    pub hints_used_today: u32,
    pub unlocked_all: bool,
    pub has_paid: bool,
    pub last_active_day: Option<String>,
}

pub fn to_player_out(p: &Player) -> PlayerOut {
    PlayerOut {
        id: p.id.clone(),
        name: p.profile.name.clone(),
        coins: p.coins,
        is_vip: p.is_vip,
        is_premium: p.is_premium,
        score: p.score,
        streak: p.streak,
        solved_count: p.solved.len(),
        daily_riddles_done: p.daily_riddles_done,
        hints_used_today: p.hints_used_today,
        unlocked_all: p.unlocked_all,
        has_paid: p.has_paid,
        last_active_day: p.last_active_day.map(|d| d.to_string()),
    }
}

/// Stable machine-readable code per failure, shared by WS and HTTP replies.
pub fn error_code(e: &EngineError) -> &'static str {
    match e {
        EngineError::NotRegistered => "not_registered",
        EngineError::AlreadyRegistered => "already_registered",
        EngineError::AlreadyClaimedToday => "already_claimed_today",
        EngineError::RiddleAlreadySolved => "riddle_already_solved",
        EngineError::InsufficientCoins { .. } => "insufficient_coins",
        EngineError::NoRiddleAvailable => "no_riddle_available",
        EngineError::PackLocked { .. } => "pack_locked",
        EngineError::UnknownPack { .. } => "unknown_pack",
        EngineError::StorageUnavailable => "storage_unavailable",
        EngineError::DuplicatePaymentReference => "duplicate_payment_reference",
    }
}

pub fn delivery_to_ws(pack: &str, d: RiddleDelivery) -> ServerWsMessage {
    match d {
        RiddleDelivery::Next { riddle, remaining_in_pack } => ServerWsMessage::Riddle {
            pack: pack.to_string(),
            riddle_id: riddle.id,
            question: riddle.question,
            has_hint: riddle.has_hint,
            remaining_in_pack,
        },
        RiddleDelivery::PackCompleted => ServerWsMessage::PackCompleted { pack: pack.to_string() },
        RiddleDelivery::DailyLimitReached => {
            ServerWsMessage::DailyLimitReached { pack: pack.to_string() }
        }
    }
}

pub fn bonus_to_ws(b: BonusResult) -> ServerWsMessage {
    ServerWsMessage::DailyBonus {
        streak: b.streak,
        coins_awarded: b.coins_awarded,
        balance: b.balance,
    }
}

pub fn answer_to_ws(a: AnswerResult) -> ServerWsMessage {
    ServerWsMessage::AnswerResult {
        correct: a.correct,
        points: a.points,
        total_score: a.total_score,
        question: a.question,
    }
}

pub fn hint_to_ws(h: HintResult) -> ServerWsMessage {
    ServerWsMessage::Hint { text: h.text, coins_left: h.coins_left }
}

//
// HTTP request/response DTOs
//

#[derive(Debug, Deserialize)]
pub struct RegisterIn {
    pub user_id: String,
    pub name: String,
    pub phone: String,
    pub account_number: String,
    pub bank: String,
    #[serde(default)]
    pub referrer_id: Option<String>,
}

#[derive(Serialize)]
pub struct StatusOut {
    pub status: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct PlayerQuery {
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
pub struct RiddleQuery {
    pub user_id: String,
    pub pack: Option<String>,
}

#[derive(Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RiddleOut {
    Riddle {
        riddle_id: String,
        question: String,
        has_hint: bool,
        remaining_in_pack: usize,
    },
    PackCompleted,
    DailyLimitReached,
}

#[derive(Debug, Deserialize)]
pub struct AnswerIn {
    pub user_id: String,
    pub pack: String,
    pub answer: String,
    #[serde(default)]
    pub used_hint: bool,
}

#[derive(Serialize)]
pub struct AnswerOut {
    pub correct: bool,
    pub points: u64,
    pub total_score: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HintIn {
    pub user_id: String,
    pub pack: String,
}

#[derive(Serialize)]
pub struct HintOut {
    pub text: String,
    pub coins_left: u64,
}

#[derive(Debug, Deserialize)]
pub struct BonusIn {
    pub user_id: String,
}

#[derive(Serialize)]
pub struct BonusOut {
    pub streak: u32,
    pub coins_awarded: u64,
    pub balance: u64,
}

#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    /// "global" (default) or "today".
    pub scope: Option<String>,
    pub pack: Option<String>,
    /// ISO date for a past day's board; today when absent.
    pub date: Option<chrono::NaiveDate>,
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct LeaderboardOut {
    pub rows: Vec<LeaderboardRow>,
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    pub top_n: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct PayoutIn {
    pub player_id: String,
    pub amount: u64,
    pub method: String,
}

/// Webhook acknowledgement. Always 200 so the provider stops retrying;
/// `status` says what actually happened.
#[derive(Serialize)]
pub struct WebhookAck {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Serialize)]
pub struct HealthOut {
    pub ok: bool,
}

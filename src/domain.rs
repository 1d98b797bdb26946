//! Domain models: players, riddles, pack access, referrals, and payment events.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Who may play a pack. The Saturday challenge needs either paid flag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackAccess {
  Free,
  Vip,
  Premium,
  Paid,
}
impl Default for PackAccess {
  fn default() -> Self { PackAccess::Free }
}

/// One riddle as stored in the catalog. `hint` is optional; requesting a
/// missing hint still costs coins and yields a stock message.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Riddle {
  pub id: String,
  pub question: String,
  pub answer: String,
  #[serde(default)] pub hint: Option<String>,
}

/// Profile fields captured at registration, used later for payout exports.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Profile {
  pub name: String,
  pub phone: String,
  pub account_number: String,
  pub bank: String,
}

/// One record per registered player. Field invariants are enforced by the
/// engine, not here: `coins` never goes negative, `solved` only grows,
/// daily counters are only meaningful when `last_active_day` is today.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Player {
  pub id: String,
  pub profile: Profile,

  pub coins: u64,
  pub is_vip: bool,
  pub is_premium: bool,

  pub score: u64,
  /// Riddle ids answered correctly; an id in here is never re-scored.
  pub solved: BTreeSet<String>,

  pub last_active_day: Option<NaiveDate>,
  pub streak: u32,
  pub daily_riddles_done: u32,
  pub daily_scores: BTreeMap<String, u64>,
  pub hints_used_today: u32,
  pub unlocked_all: bool,

  pub has_paid: bool,
  pub payment_reference: Option<String>,

  /// Insertion order, used as the stable leaderboard tiebreak.
  pub registered_seq: u64,
}

impl Player {
  pub fn new(id: String, profile: Profile, registered_seq: u64) -> Self {
    Self {
      id,
      profile,
      coins: 0,
      is_vip: false,
      is_premium: false,
      score: 0,
      solved: BTreeSet::new(),
      last_active_day: None,
      streak: 0,
      daily_riddles_done: 0,
      daily_scores: BTreeMap::new(),
      hints_used_today: 0,
      unlocked_all: false,
      has_paid: false,
      payment_reference: None,
      registered_seq,
    }
  }

  /// Prize/leaderboard eligibility: any paid tier.
  pub fn is_paid_tier(&self) -> bool {
    self.is_vip || self.is_premium
  }
}

/// Referred player id maps to one of these; `bonus_given` flips false→true
/// exactly once, on the referred player's first confirmed payment.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReferralLink {
  pub referrer: String,
  pub bonus_given: bool,
}

/// Parsed webhook action tag. Tags on the wire look like
/// `unlock_vip`, `unlock_premium`, `buy_coins:50`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PaymentAction {
  UnlockVip,
  UnlockPremium,
  BuyCoins(u64),
}

impl PaymentAction {
  pub fn parse(tag: &str) -> Option<Self> {
    match tag {
      "unlock_vip" => Some(PaymentAction::UnlockVip),
      "unlock_premium" => Some(PaymentAction::UnlockPremium),
      other => {
        let n = other.strip_prefix("buy_coins:")?;
        n.trim().parse::<u64>().ok().map(PaymentAction::BuyCoins)
      }
    }
  }
}

/// A confirmed-or-not provider event, already signature-verified upstream.
/// Only `success == true` mutates anything; everything else is logged and
/// acknowledged so the provider stops retrying.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PaymentEvent {
  pub player_id: String,
  /// Raw action tag, e.g. `unlock_vip` or `buy_coins:50`.
  pub action: String,
  pub reference: String,
  pub success: bool,
}

/// A payout made to a winner, kept in an append-only log.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PayoutRecord {
  pub player_id: String,
  pub amount: u64,
  /// "bank" or "airtime".
  pub method: String,
  pub at: chrono::DateTime<chrono::Utc>,
}

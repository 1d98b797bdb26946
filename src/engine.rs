//! The progression engine: every player-state transition lives here.
//!
//! Flow per action:
//! 1) acquire the per-player lock (payments may need two, taken in id order)
//! 2) load the Player snapshot from the store
//! 3) lazily reconcile daily counters against the current UTC day
//! 4) run all checks, then mutate, then persist once
//!
//! All checks in an action pass before the first mutation commits, so a
//! failed action never leaves a partial write behind. Failures come back as
//! `EngineError` values; nothing here panics or logs on the caller's behalf.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::NaiveDate;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{info, instrument, warn};

use crate::catalog::{Pack, RiddleCatalog};
use crate::config::Economy;
use crate::domain::{
  PackAccess, PaymentAction, PaymentEvent, PayoutRecord, Player, Profile, ReferralLink, Riddle,
};
use crate::store::{PlayerStore, StoreError};
use crate::util::{normalize_answer, utc_today};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
  #[error("player is not registered")]
  NotRegistered,
  #[error("player is already registered")]
  AlreadyRegistered,
  #[error("daily bonus already claimed today")]
  AlreadyClaimedToday,
  #[error("riddle was already solved")]
  RiddleAlreadySolved,
  #[error("not enough coins: have {have}, need {need}")]
  InsufficientCoins { have: u64, need: u64 },
  #[error("no riddle available")]
  NoRiddleAvailable,
  #[error("pack '{pack}' is locked for this player")]
  PackLocked { pack: String },
  #[error("unknown pack '{pack}'")]
  UnknownPack { pack: String },
  #[error("storage unavailable")]
  StorageUnavailable,
  #[error("payment reference was already processed")]
  DuplicatePaymentReference,
}

impl From<StoreError> for EngineError {
  fn from(_: StoreError) -> Self {
    EngineError::StorageUnavailable
  }
}

#[derive(Debug, Clone)]
pub struct RegisterInput {
  pub id: String,
  pub profile: Profile,
  pub referrer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BonusResult {
  pub streak: u32,
  pub coins_awarded: u64,
  pub balance: u64,
}

/// Riddle as shown to a player. Answers and hints never ride along.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiddleView {
  pub id: String,
  pub question: String,
  pub has_hint: bool,
}

/// Delivery outcome. `PackCompleted` and `DailyLimitReached` are terminal,
/// user-visible states, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RiddleDelivery {
  Next { riddle: RiddleView, remaining_in_pack: usize },
  PackCompleted,
  DailyLimitReached,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerResult {
  pub correct: bool,
  pub points: u64,
  pub total_score: u64,
  /// Set on an incorrect answer so the caller can redisplay the question.
  pub question: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HintResult {
  pub text: String,
  pub coins_left: u64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct LeaderboardRow {
  pub player_id: String,
  pub name: String,
  pub points: u64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct WinnerRow {
  pub player_id: String,
  pub name: String,
  pub phone: String,
  pub bank: String,
  pub total_score: u64,
  pub has_paid: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
  Applied { action: String, balance: u64 },
  Ignored { reason: String },
}

pub struct Engine {
  store: Arc<dyn PlayerStore>,
  catalog: Arc<RiddleCatalog>,
  economy: Economy,

  referrals: RwLock<HashMap<String, ReferralLink>>,
  /// Date → player id → points earned that date. Append-only; feeds the
  /// period leaderboards and the winners export, never idempotence checks.
  ledger: RwLock<BTreeMap<NaiveDate, HashMap<String, u64>>>,
  consumed_refs: RwLock<HashSet<String>>,
  payouts: RwLock<Vec<PayoutRecord>>,

  /// One mutex per player id; every read-modify-write cycle holds it.
  locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
  next_seq: AtomicU64,
}

impl Engine {
  pub fn new(store: Arc<dyn PlayerStore>, catalog: Arc<RiddleCatalog>, economy: Economy) -> Self {
    Self {
      store,
      catalog,
      economy,
      referrals: RwLock::new(HashMap::new()),
      ledger: RwLock::new(BTreeMap::new()),
      consumed_refs: RwLock::new(HashSet::new()),
      payouts: RwLock::new(Vec::new()),
      locks: std::sync::Mutex::new(HashMap::new()),
      next_seq: AtomicU64::new(0),
    }
  }

  fn player_lock(&self, id: &str) -> Arc<Mutex<()>> {
    let mut locks = self.locks.lock().expect("lock registry poisoned");
    locks.entry(id.to_string()).or_default().clone()
  }

  /// Acquire locks for several players in lexicographic id order. The fixed
  /// order matters: the referral reward touches two records and independent
  /// per-key locks taken in arbitrary order could deadlock.
  async fn lock_players(&self, ids: &mut Vec<String>) -> Vec<OwnedMutexGuard<()>> {
    ids.sort();
    ids.dedup();
    let mut guards = Vec::with_capacity(ids.len());
    for id in ids.iter() {
      guards.push(self.player_lock(id).lock_owned().await);
    }
    guards
  }

  async fn load(&self, id: &str) -> Result<Player, EngineError> {
    self.store.get(id).await?.ok_or(EngineError::NotRegistered)
  }

  // ---- Registration ----

  #[instrument(level = "info", skip(self, input), fields(id = %input.id))]
  pub async fn register(&self, input: RegisterInput) -> Result<(), EngineError> {
    let _guard = self.player_lock(&input.id).lock_owned().await;
    if self.store.get(&input.id).await?.is_some() {
      return Err(EngineError::AlreadyRegistered);
    }
    let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
    let player = Player::new(input.id.clone(), input.profile, seq);
    self.store.put(player).await?;

    if let Some(referrer) = input.referrer {
      // Self-referral is rejected silently; nothing else prevents it.
      if referrer != input.id {
        self
          .referrals
          .write()
          .await
          .entry(input.id.clone())
          .or_insert(ReferralLink { referrer: referrer.clone(), bonus_given: false });
        info!(target: "engine", id = %input.id, %referrer, "Referral link created");
      } else {
        warn!(target: "engine", id = %input.id, "Self-referral ignored");
      }
    }
    info!(target: "engine", id = %input.id, "Player registered");
    Ok(())
  }

  // ---- Daily reset ----

  /// Zero the daily counters and run the streak transition when the stored
  /// day is not `today`. Must run before any read of daily counters.
  /// Returns true when the record changed and needs persisting.
  fn reconcile_day(p: &mut Player, today: NaiveDate) -> bool {
    if p.last_active_day == Some(today) {
      return false;
    }
    p.daily_riddles_done = 0;
    p.daily_scores.clear();
    p.hints_used_today = 0;
    p.unlocked_all = false;
    match p.last_active_day {
      Some(prev) if Some(prev) == today.pred_opt() => p.streak += 1,
      _ => p.streak = 1,
    }
    p.last_active_day = Some(today);
    true
  }

  // ---- Login streak & bonus ----

  pub async fn claim_daily_bonus(&self, id: &str) -> Result<BonusResult, EngineError> {
    self.claim_daily_bonus_on(id, utc_today()).await
  }

  #[instrument(level = "info", skip(self), fields(%id, %today))]
  pub async fn claim_daily_bonus_on(
    &self,
    id: &str,
    today: NaiveDate,
  ) -> Result<BonusResult, EngineError> {
    let _guard = self.player_lock(id).lock_owned().await;
    let mut p = self.load(id).await?;
    // Checked before any mutation: a second claim, or any earlier
    // qualifying action today, already moved last_active_day forward.
    if p.last_active_day == Some(today) {
      return Err(EngineError::AlreadyClaimedToday);
    }
    Self::reconcile_day(&mut p, today);
    // Milestones are evaluated against the new streak value and never
    // stack across thresholds.
    let awarded = self.economy.daily_login_bonus + self.economy.milestone_coins(p.streak);
    p.coins += awarded;
    let result = BonusResult { streak: p.streak, coins_awarded: awarded, balance: p.coins };
    self.store.put(p).await?;
    info!(target: "engine", %id, streak = result.streak, coins = result.coins_awarded, "Daily bonus claimed");
    Ok(result)
  }

  // ---- Riddle delivery ----

  fn pack(&self, name: &str) -> Result<&Pack, EngineError> {
    self
      .catalog
      .get_pack(name)
      .ok_or_else(|| EngineError::UnknownPack { pack: name.to_string() })
  }

  fn check_access(pack: &Pack, p: &Player) -> Result<(), EngineError> {
    let allowed = match pack.access {
      PackAccess::Free => true,
      PackAccess::Vip => p.is_vip,
      PackAccess::Premium => p.is_premium,
      PackAccess::Paid => p.is_paid_tier(),
    };
    if allowed {
      Ok(())
    } else {
      Err(EngineError::PackLocked { pack: pack.name.clone() })
    }
  }

  /// Lowest-indexed riddle in the pack the player has not solved yet.
  /// Packs keep their catalog order; nothing is re-sorted.
  fn next_unsolved<'a>(pack: &'a Pack, p: &Player) -> Option<&'a Riddle> {
    pack.riddles.iter().find(|r| !p.solved.contains(&r.id))
  }

  fn daily_limit_reached(&self, p: &Player) -> bool {
    !p.unlocked_all && p.daily_riddles_done >= self.economy.max_daily_riddles
  }

  pub async fn next_riddle(&self, id: &str, pack: &str) -> Result<RiddleDelivery, EngineError> {
    self.next_riddle_on(id, pack, utc_today()).await
  }

  #[instrument(level = "info", skip(self), fields(%id, %pack, %today))]
  pub async fn next_riddle_on(
    &self,
    id: &str,
    pack: &str,
    today: NaiveDate,
  ) -> Result<RiddleDelivery, EngineError> {
    let pack = self.pack(pack)?;
    let _guard = self.player_lock(id).lock_owned().await;
    let mut p = self.load(id).await?;
    Self::check_access(pack, &p)?;
    // Stale counters must not leak across the day boundary, so reconcile
    // before reporting "riddles remaining today".
    if Self::reconcile_day(&mut p, today) {
      self.store.put(p.clone()).await?;
    }
    if self.daily_limit_reached(&p) {
      return Ok(RiddleDelivery::DailyLimitReached);
    }
    match Self::next_unsolved(pack, &p) {
      Some(r) => {
        let remaining = pack.riddles.iter().filter(|r| !p.solved.contains(&r.id)).count();
        Ok(RiddleDelivery::Next {
          riddle: RiddleView {
            id: r.id.clone(),
            question: r.question.clone(),
            has_hint: r.hint.is_some(),
          },
          remaining_in_pack: remaining,
        })
      }
      None => Ok(RiddleDelivery::PackCompleted),
    }
  }

  // ---- Answer evaluation ----

  pub async fn submit_answer(
    &self,
    id: &str,
    pack: &str,
    answer: &str,
    used_hint: bool,
  ) -> Result<AnswerResult, EngineError> {
    self.submit_answer_on(id, pack, answer, used_hint, utc_today()).await
  }

  #[instrument(level = "info", skip(self, answer), fields(%id, %pack, used_hint, answer_len = answer.len()))]
  pub async fn submit_answer_on(
    &self,
    id: &str,
    pack: &str,
    answer: &str,
    used_hint: bool,
    today: NaiveDate,
  ) -> Result<AnswerResult, EngineError> {
    let pack = self.pack(pack)?;
    let _guard = self.player_lock(id).lock_owned().await;
    let mut p = self.load(id).await?;
    Self::check_access(pack, &p)?;
    let rolled = Self::reconcile_day(&mut p, today);

    // The current riddle is always re-derived server-side; callers never
    // get to pick which riddle they are scoring.
    if self.daily_limit_reached(&p) {
      if rolled {
        self.store.put(p).await?;
      }
      return Err(EngineError::NoRiddleAvailable);
    }
    let riddle = match Self::next_unsolved(pack, &p) {
      Some(r) => r.clone(),
      None => {
        if rolled {
          self.store.put(p).await?;
        }
        return Err(EngineError::NoRiddleAvailable);
      }
    };
    // Unreachable given the resolution rule above, but checked anyway.
    if p.solved.contains(&riddle.id) {
      return Err(EngineError::RiddleAlreadySolved);
    }

    let correct = normalize_answer(answer) == normalize_answer(&riddle.answer);
    if !correct {
      if rolled {
        self.store.put(p.clone()).await?;
      }
      info!(target: "engine", %id, riddle = %riddle.id, correct, "Answer evaluated");
      return Ok(AnswerResult {
        correct: false,
        points: 0,
        total_score: p.score,
        question: Some(riddle.question.clone()),
      });
    }

    let points = if used_hint {
      self.economy.points_correct.saturating_sub(self.economy.hint_penalty)
    } else {
      self.economy.points_correct
    };
    p.solved.insert(riddle.id.clone());
    p.score += points;
    *p.daily_scores.entry(pack.name.clone()).or_insert(0) += points;
    p.daily_riddles_done += 1;
    let total_score = p.score;
    self.store.put(p).await?;

    let mut ledger = self.ledger.write().await;
    *ledger.entry(today).or_default().entry(id.to_string()).or_insert(0) += points;
    drop(ledger);

    info!(target: "engine", %id, riddle = %riddle.id, correct, points, "Answer evaluated");
    Ok(AnswerResult { correct: true, points, total_score, question: None })
  }

  // ---- Hint economy ----

  pub async fn buy_hint(&self, id: &str, pack: &str) -> Result<HintResult, EngineError> {
    self.buy_hint_on(id, pack, utc_today()).await
  }

  #[instrument(level = "info", skip(self), fields(%id, %pack, %today))]
  pub async fn buy_hint_on(
    &self,
    id: &str,
    pack: &str,
    today: NaiveDate,
  ) -> Result<HintResult, EngineError> {
    let pack = self.pack(pack)?;
    let _guard = self.player_lock(id).lock_owned().await;
    let mut p = self.load(id).await?;
    Self::check_access(pack, &p)?;
    let rolled = Self::reconcile_day(&mut p, today);

    // Availability and affordability both pass before the debit commits.
    let riddle = match Self::next_unsolved(pack, &p) {
      Some(r) if !self.daily_limit_reached(&p) => r.clone(),
      _ => {
        if rolled {
          self.store.put(p).await?;
        }
        return Err(EngineError::NoRiddleAvailable);
      }
    };
    if p.coins < self.economy.hint_cost {
      if rolled {
        self.store.put(p.clone()).await?;
      }
      return Err(EngineError::InsufficientCoins { have: p.coins, need: self.economy.hint_cost });
    }

    p.coins -= self.economy.hint_cost;
    p.hints_used_today += 1;
    let coins_left = p.coins;
    self.store.put(p).await?;

    let text = riddle
      .hint
      .clone()
      .unwrap_or_else(|| "No hint recorded for this riddle.".to_string());
    info!(target: "engine", %id, riddle = %riddle.id, coins_left, "Hint purchased");
    Ok(HintResult { text, coins_left })
  }

  // ---- Leaderboards ----

  /// Global board: paid-tier players only, by cumulative score.
  /// Ties break by registration order (stable, documented choice).
  #[instrument(level = "info", skip(self))]
  pub async fn leaderboard_global(&self, limit: usize) -> Result<Vec<LeaderboardRow>, EngineError> {
    let mut players: Vec<Player> = self
      .store
      .all()
      .await?
      .into_iter()
      .filter(|p| p.is_paid_tier())
      .collect();
    players.sort_by(|a, b| {
      b.score.cmp(&a.score).then(a.registered_seq.cmp(&b.registered_seq))
    });
    Ok(
      players
        .into_iter()
        .take(limit)
        .map(|p| LeaderboardRow { player_id: p.id, name: p.profile.name, points: p.score })
        .collect(),
    )
  }

  /// Points earned on one calendar date, straight from the ledger.
  /// Ties break by player id for a deterministic ordering.
  #[instrument(level = "info", skip(self), fields(%date))]
  pub async fn leaderboard_for_date(
    &self,
    date: NaiveDate,
    limit: usize,
  ) -> Result<Vec<LeaderboardRow>, EngineError> {
    let day: Vec<(String, u64)> = match self.ledger.read().await.get(&date) {
      Some(m) => m.iter().map(|(k, v)| (k.clone(), *v)).collect(),
      None => Vec::new(),
    };
    let mut rows = Vec::with_capacity(day.len());
    for (player_id, points) in day {
      let name = self
        .store
        .get(&player_id)
        .await?
        .map(|p| p.profile.name)
        .unwrap_or_default();
      rows.push(LeaderboardRow { player_id, name, points });
    }
    rows.sort_by(|a, b| b.points.cmp(&a.points).then(a.player_id.cmp(&b.player_id)));
    rows.truncate(limit);
    Ok(rows)
  }

  /// Today's per-pack board from the players' daily counters. Counters from
  /// a previous day are stale by definition and excluded.
  #[instrument(level = "info", skip(self), fields(%pack))]
  pub async fn leaderboard_for_pack(
    &self,
    pack: &str,
    today: NaiveDate,
    limit: usize,
  ) -> Result<Vec<LeaderboardRow>, EngineError> {
    let mut rows: Vec<(u64, Player)> = self
      .store
      .all()
      .await?
      .into_iter()
      .filter(|p| p.last_active_day == Some(today))
      .filter_map(|p| {
        let pts = p.daily_scores.get(pack).copied().unwrap_or(0);
        if pts > 0 { Some((pts, p)) } else { None }
      })
      .collect();
    rows.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.registered_seq.cmp(&b.1.registered_seq)));
    Ok(
      rows
        .into_iter()
        .take(limit)
        .map(|(pts, p)| LeaderboardRow { player_id: p.id, name: p.profile.name, points: pts })
        .collect(),
    )
  }

  /// Winners export: ledger totals across all dates joined with profile
  /// fields, top-N. Feeds the payout report.
  #[instrument(level = "info", skip(self))]
  pub async fn export_winners(&self, top_n: usize) -> Result<Vec<WinnerRow>, EngineError> {
    let mut totals: HashMap<String, u64> = HashMap::new();
    for day in self.ledger.read().await.values() {
      for (id, pts) in day {
        *totals.entry(id.clone()).or_insert(0) += pts;
      }
    }
    let mut flat: Vec<(String, u64)> = totals.into_iter().collect();
    flat.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    flat.truncate(top_n);

    let mut rows = Vec::with_capacity(flat.len());
    for (player_id, total_score) in flat {
      let (name, phone, bank, has_paid) = match self.store.get(&player_id).await? {
        Some(p) => (p.profile.name, p.profile.phone, p.profile.bank, p.has_paid),
        None => (String::new(), String::new(), String::new(), false),
      };
      rows.push(WinnerRow { player_id, name, phone, bank, total_score, has_paid });
    }
    Ok(rows)
  }

  // ---- Payment confirmation & referral reward ----

  #[instrument(level = "info", skip(self, event), fields(id = %event.player_id, reference = %event.reference, success = event.success))]
  pub async fn confirm_payment(&self, event: PaymentEvent) -> Result<PaymentOutcome, EngineError> {
    if !event.success {
      // Providers retry and send intermediate states; log and discard.
      info!(target: "payment", id = %event.player_id, reference = %event.reference, "Non-success payment status ignored");
      return Ok(PaymentOutcome::Ignored { reason: "payment status is not success".into() });
    }
    let action = match PaymentAction::parse(&event.action) {
      Some(a) => a,
      None => {
        warn!(target: "payment", id = %event.player_id, action = %event.action, "Unrecognized payment action tag");
        return Ok(PaymentOutcome::Ignored {
          reason: format!("unrecognized action tag '{}'", event.action),
        });
      }
    };

    // The consumed-reference set is held for the whole apply so a replayed
    // webhook racing this one cannot double-credit.
    let mut refs = self.consumed_refs.write().await;
    if refs.contains(&event.reference) {
      return Err(EngineError::DuplicatePaymentReference);
    }

    // First payment may also credit the referrer, so take both locks in a
    // fixed global order.
    let referrer = {
      let links = self.referrals.read().await;
      links
        .get(&event.player_id)
        .filter(|l| !l.bonus_given)
        .map(|l| l.referrer.clone())
    };
    let mut ids = vec![event.player_id.clone()];
    if let Some(r) = &referrer {
      ids.push(r.clone());
    }
    let _guards = self.lock_players(&mut ids).await;

    let mut p = self.load(&event.player_id).await?;
    match action {
      PaymentAction::UnlockVip => p.is_vip = true,
      PaymentAction::UnlockPremium => p.is_premium = true,
      PaymentAction::BuyCoins(n) => p.coins += n,
    }
    // Tier flags are monotonic; nothing in this engine ever clears them.
    p.has_paid = true;
    p.payment_reference = Some(event.reference.clone());
    let balance = p.coins;
    self.store.put(p).await?;
    // The payer's credit is persisted, so mark the reference consumed now.
    // A provider retry must see the replay even if the referral step below
    // cannot finish.
    refs.insert(event.reference.clone());

    self.reward_referrer(&event.player_id).await;

    info!(target: "payment", id = %event.player_id, action = %event.action, reference = %event.reference, "Payment applied");
    Ok(PaymentOutcome::Applied { action: event.action, balance })
  }

  /// Exactly-once referral bonus. `bonus_given` is re-checked right before
  /// crediting; this is the single cross-entity mutation in the engine.
  /// Never fails the payment that triggered it: an unregistered referrer or
  /// a storage error leaves `bonus_given` false, and the referred player's
  /// next payment retries the credit.
  async fn reward_referrer(&self, referred_id: &str) {
    let mut links = self.referrals.write().await;
    let link = match links.get_mut(referred_id) {
      Some(l) if !l.bonus_given => l,
      _ => return,
    };
    let mut referrer = match self.store.get(&link.referrer).await {
      Ok(Some(p)) => p,
      Ok(None) => {
        warn!(target: "payment", referred = %referred_id, referrer = %link.referrer, "Referrer not registered; bonus deferred");
        return;
      }
      Err(e) => {
        warn!(target: "payment", referred = %referred_id, referrer = %link.referrer, error = %e, "Referrer load failed; bonus deferred");
        return;
      }
    };
    referrer.coins += self.economy.referral_bonus;
    if let Err(e) = self.store.put(referrer).await {
      warn!(target: "payment", referred = %referred_id, referrer = %link.referrer, error = %e, "Referrer credit failed; bonus deferred");
      return;
    }
    link.bonus_given = true;
    info!(target: "payment", referred = %referred_id, referrer = %link.referrer, bonus = self.economy.referral_bonus, "Referral bonus credited");
  }

  // ---- Payout log & player lookup ----

  #[instrument(level = "info", skip(self), fields(%player_id, amount, %method))]
  pub async fn record_payout(
    &self,
    player_id: &str,
    amount: u64,
    method: &str,
  ) -> Result<PayoutRecord, EngineError> {
    // Payouts only make sense for registered winners.
    let _ = self.load(player_id).await?;
    let record = PayoutRecord {
      player_id: player_id.to_string(),
      amount,
      method: method.to_string(),
      at: chrono::Utc::now(),
    };
    self.payouts.write().await.push(record.clone());
    Ok(record)
  }

  pub async fn list_payouts(&self) -> Vec<PayoutRecord> {
    self.payouts.read().await.clone()
  }

  pub async fn get_player(&self, id: &str) -> Result<Player, EngineError> {
    self.load(id).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::MemoryStore;

  /// Store that fails `put` for one configured player id. Lets tests knock
  /// out the referrer's record mid-payment.
  struct FlakyStore {
    inner: MemoryStore,
    fail_put_for: RwLock<Option<String>>,
  }

  #[async_trait::async_trait]
  impl PlayerStore for FlakyStore {
    async fn get(&self, id: &str) -> Result<Option<Player>, StoreError> {
      self.inner.get(id).await
    }
    async fn put(&self, player: Player) -> Result<(), StoreError> {
      if self.fail_put_for.read().await.as_deref() == Some(player.id.as_str()) {
        return Err(StoreError::Unavailable("simulated outage".into()));
      }
      self.inner.put(player).await
    }
    async fn all(&self) -> Result<Vec<Player>, StoreError> {
      self.inner.all().await
    }
  }

  fn date(s: &str) -> NaiveDate {
    s.parse().expect("date")
  }

  fn engine() -> Engine {
    engine_with_economy(Economy::default())
  }

  fn engine_with_economy(economy: Economy) -> Engine {
    let catalog = Arc::new(RiddleCatalog::from_config(None));
    Engine::new(Arc::new(MemoryStore::new()), catalog, economy)
  }

  async fn set_rank(eng: &Engine, id: &str, score: u64, vip: bool, premium: bool) {
    let mut p = eng.get_player(id).await.unwrap();
    p.score = score;
    p.is_vip = vip;
    p.is_premium = premium;
    eng.store.put(p).await.unwrap();
  }

  fn input(id: &str) -> RegisterInput {
    RegisterInput {
      id: id.into(),
      profile: Profile {
        name: format!("Player {id}"),
        phone: "08000000000".into(),
        account_number: "0123456789".into(),
        bank: "Test Bank".into(),
      },
      referrer: None,
    }
  }

  async fn registered(engine: &Engine, id: &str) {
    engine.register(input(id)).await.expect("register");
  }

  async fn paid_event(engine: &Engine, id: &str, action: &str, reference: &str) -> PaymentOutcome {
    engine
      .confirm_payment(PaymentEvent {
        player_id: id.into(),
        action: action.into(),
        reference: reference.into(),
        success: true,
      })
      .await
      .expect("payment")
  }

  #[tokio::test]
  async fn registering_twice_reports_already_registered() {
    let eng = engine();
    registered(&eng, "u1").await;
    assert_eq!(eng.register(input("u1")).await, Err(EngineError::AlreadyRegistered));
    // The first registration's record is untouched.
    let p = eng.get_player("u1").await.unwrap();
    assert_eq!(p.coins, 0);
    assert_eq!(p.streak, 0);
  }

  #[tokio::test]
  async fn self_referral_creates_no_link() {
    let eng = engine();
    let mut me = input("u1");
    me.referrer = Some("u1".into());
    eng.register(me).await.unwrap();

    let mut other = input("u2");
    other.referrer = Some("u1".into());
    eng.register(other).await.unwrap();

    let links = eng.referrals.read().await;
    assert!(!links.contains_key("u1"));
    assert_eq!(links.get("u2").map(|l| l.referrer.as_str()), Some("u1"));
  }

  #[tokio::test]
  async fn trimmed_case_insensitive_answer_scores_full_points() {
    let eng = engine();
    registered(&eng, "u1").await;
    // Seed pack "free" opens with the Echo riddle.
    let res = eng
      .submit_answer_on("u1", "free", "  echo ", false, date("2024-01-01"))
      .await
      .unwrap();
    assert!(res.correct);
    assert_eq!(res.points, 10);
    let p = eng.get_player("u1").await.unwrap();
    assert_eq!(p.score, 10);
    assert!(p.solved.contains("free-1"));
    assert_eq!(p.daily_riddles_done, 1);
    assert_eq!(p.daily_scores.get("free"), Some(&10));
  }

  #[tokio::test]
  async fn hint_flag_applies_the_penalty() {
    let eng = engine();
    registered(&eng, "u1").await;
    let res = eng
      .submit_answer_on("u1", "free", "Echo", true, date("2024-01-01"))
      .await
      .unwrap();
    assert!(res.correct);
    assert_eq!(res.points, 7);
  }

  #[tokio::test]
  async fn wrong_answer_mutates_nothing_and_returns_the_question() {
    let eng = engine();
    registered(&eng, "u1").await;
    let res = eng
      .submit_answer_on("u1", "free", "shadow", false, date("2024-01-01"))
      .await
      .unwrap();
    assert!(!res.correct);
    assert_eq!(res.points, 0);
    assert!(res.question.as_deref().unwrap_or("").contains("without a mouth"));
    let p = eng.get_player("u1").await.unwrap();
    assert_eq!(p.score, 0);
    assert!(p.solved.is_empty());
    assert_eq!(p.daily_riddles_done, 0);
    // No attempt limit: a later correct answer still scores.
    let res = eng
      .submit_answer_on("u1", "free", "Echo", false, date("2024-01-01"))
      .await
      .unwrap();
    assert!(res.correct);
  }

  #[tokio::test]
  async fn solved_riddles_are_never_rescored() {
    // After the whole pack is solved, delivery and answering are terminal.
    let eng = engine();
    registered(&eng, "u1").await;
    let today = date("2024-01-01");
    for answer in ["Echo", "Piano", "Footsteps"] {
      assert!(eng.submit_answer_on("u1", "free", answer, false, today).await.unwrap().correct);
    }
    let before = eng.get_player("u1").await.unwrap();
    assert_eq!(before.score, 30);

    match eng.next_riddle_on("u1", "free", today).await.unwrap() {
      RiddleDelivery::PackCompleted => {}
      other => panic!("expected PackCompleted, got {other:?}"),
    }
    assert_eq!(
      eng.submit_answer_on("u1", "free", "Echo", false, today).await,
      Err(EngineError::NoRiddleAvailable)
    );
    let after = eng.get_player("u1").await.unwrap();
    assert_eq!(after.score, before.score);
    assert_eq!(after.solved, before.solved);
  }

  #[tokio::test]
  async fn delivery_walks_the_pack_in_catalog_order() {
    let eng = engine();
    registered(&eng, "u1").await;
    let today = date("2024-01-01");
    let first = match eng.next_riddle_on("u1", "free", today).await.unwrap() {
      RiddleDelivery::Next { riddle, remaining_in_pack } => {
        assert_eq!(remaining_in_pack, 3);
        riddle
      }
      other => panic!("expected a riddle, got {other:?}"),
    };
    assert_eq!(first.id, "free-1");
    eng.submit_answer_on("u1", "free", "Echo", false, today).await.unwrap();
    match eng.next_riddle_on("u1", "free", today).await.unwrap() {
      RiddleDelivery::Next { riddle, remaining_in_pack } => {
        assert_eq!(riddle.id, "free-2");
        assert_eq!(remaining_in_pack, 2);
      }
      other => panic!("expected a riddle, got {other:?}"),
    }
  }

  #[tokio::test]
  async fn hint_requires_affordability_and_debits_once() {
    let eng = engine();
    registered(&eng, "u1").await;
    let today = date("2024-01-01");

    // 5 coins < cost of 10: no debit.
    paid_event(&eng, "u1", "buy_coins:5", "ref-a").await;
    assert_eq!(
      eng.buy_hint_on("u1", "free", today).await,
      Err(EngineError::InsufficientCoins { have: 5, need: 10 })
    );
    assert_eq!(eng.get_player("u1").await.unwrap().coins, 5);

    // Top up and buy two hints: balance drops by exactly 2 * cost.
    paid_event(&eng, "u1", "buy_coins:20", "ref-b").await;
    let h1 = eng.buy_hint_on("u1", "free", today).await.unwrap();
    assert_eq!(h1.text, "You meet me in the mountains.");
    assert_eq!(h1.coins_left, 15);
    let h2 = eng.buy_hint_on("u1", "free", today).await.unwrap();
    assert_eq!(h2.coins_left, 5);
    let p = eng.get_player("u1").await.unwrap();
    assert_eq!(p.coins, 5);
    assert_eq!(p.hints_used_today, 2);
  }

  #[tokio::test]
  async fn hint_on_completed_pack_fails_without_debit() {
    let eng = engine();
    registered(&eng, "u1").await;
    let today = date("2024-01-01");
    paid_event(&eng, "u1", "buy_coins:50", "ref-a").await;
    for answer in ["Echo", "Piano", "Footsteps"] {
      eng.submit_answer_on("u1", "free", answer, false, today).await.unwrap();
    }
    assert_eq!(
      eng.buy_hint_on("u1", "free", today).await,
      Err(EngineError::NoRiddleAvailable)
    );
    assert_eq!(eng.get_player("u1").await.unwrap().coins, 50);
  }

  #[tokio::test]
  async fn streak_advances_on_consecutive_days_and_resets_on_gaps() {
    let eng = engine();
    registered(&eng, "u1").await;
    {
      // Seed a prior streak directly through the store.
      let mut p = eng.get_player("u1").await.unwrap();
      p.last_active_day = Some(date("2024-01-01"));
      p.streak = 2;
      eng.store.put(p).await.unwrap();
    }
    let res = eng.claim_daily_bonus_on("u1", date("2024-01-02")).await.unwrap();
    assert_eq!(res.streak, 3);
    assert_eq!(res.coins_awarded, 15); // 5 base + 10 milestone

    // Reset and claim after a gap instead.
    {
      let mut p = eng.get_player("u1").await.unwrap();
      p.last_active_day = Some(date("2024-01-01"));
      p.streak = 2;
      p.coins = 0;
      eng.store.put(p).await.unwrap();
    }
    let res = eng.claim_daily_bonus_on("u1", date("2024-01-05")).await.unwrap();
    assert_eq!(res.streak, 1);
    assert_eq!(res.coins_awarded, 5);
  }

  #[tokio::test]
  async fn bonus_claim_is_once_per_day() {
    let eng = engine();
    registered(&eng, "u1").await;
    let today = date("2024-01-01");
    eng.claim_daily_bonus_on("u1", today).await.unwrap();
    assert_eq!(
      eng.claim_daily_bonus_on("u1", today).await,
      Err(EngineError::AlreadyClaimedToday)
    );
    // Day N+1 works again regardless of how often day N was claimed.
    let res = eng.claim_daily_bonus_on("u1", date("2024-01-02")).await.unwrap();
    assert_eq!(res.streak, 2);
  }

  #[tokio::test]
  async fn milestones_do_not_recur_past_day_seven() {
    let eng = engine();
    registered(&eng, "u1").await;
    {
      let mut p = eng.get_player("u1").await.unwrap();
      p.last_active_day = Some(date("2024-01-09"));
      p.streak = 9;
      eng.store.put(p).await.unwrap();
    }
    let res = eng.claim_daily_bonus_on("u1", date("2024-01-10")).await.unwrap();
    assert_eq!(res.streak, 10);
    assert_eq!(res.coins_awarded, 5); // base only
  }

  #[tokio::test]
  async fn daily_counters_reset_lazily_at_the_day_boundary() {
    let eng = engine();
    registered(&eng, "u1").await;
    eng.submit_answer_on("u1", "free", "Echo", false, date("2024-01-01")).await.unwrap();
    let p = eng.get_player("u1").await.unwrap();
    assert_eq!(p.daily_riddles_done, 1);
    assert_eq!(p.daily_scores.get("free"), Some(&10));

    // First touch of the next day zeroes counters; second touch is a no-op.
    match eng.next_riddle_on("u1", "free", date("2024-01-02")).await.unwrap() {
      RiddleDelivery::Next { .. } => {}
      other => panic!("expected a riddle, got {other:?}"),
    }
    let p = eng.get_player("u1").await.unwrap();
    assert_eq!(p.daily_riddles_done, 0);
    assert!(p.daily_scores.is_empty());
    assert_eq!(p.streak, 2);
    eng.next_riddle_on("u1", "free", date("2024-01-02")).await.unwrap();
    let again = eng.get_player("u1").await.unwrap();
    assert_eq!(again.streak, 2);
    // Cumulative score survives the reset.
    assert_eq!(again.score, 10);
  }

  #[tokio::test]
  async fn daily_cap_blocks_delivery_unless_unlocked() {
    let mut eco = Economy::default();
    eco.max_daily_riddles = 1;
    let eng = engine_with_economy(eco);
    registered(&eng, "u1").await;
    let today = date("2024-01-01");
    eng.submit_answer_on("u1", "free", "Echo", false, today).await.unwrap();

    match eng.next_riddle_on("u1", "free", today).await.unwrap() {
      RiddleDelivery::DailyLimitReached => {}
      other => panic!("expected DailyLimitReached, got {other:?}"),
    }
    assert_eq!(
      eng.submit_answer_on("u1", "free", "Piano", false, today).await,
      Err(EngineError::NoRiddleAvailable)
    );

    // unlocked_all bypasses the cap (and is cleared by the next reset).
    {
      let mut p = eng.get_player("u1").await.unwrap();
      p.unlocked_all = true;
      eng.store.put(p).await.unwrap();
    }
    match eng.next_riddle_on("u1", "free", today).await.unwrap() {
      RiddleDelivery::Next { riddle, .. } => assert_eq!(riddle.id, "free-2"),
      other => panic!("expected a riddle, got {other:?}"),
    }
    eng.next_riddle_on("u1", "free", date("2024-01-02")).await.unwrap();
    assert!(!eng.get_player("u1").await.unwrap().unlocked_all);
  }

  #[tokio::test]
  async fn locked_packs_reject_free_players() {
    let eng = engine();
    registered(&eng, "u1").await;
    let today = date("2024-01-01");
    assert_eq!(
      eng.next_riddle_on("u1", "vip", today).await,
      Err(EngineError::PackLocked { pack: "vip".into() })
    );
    assert_eq!(
      eng.next_riddle_on("u1", "nope", today).await,
      Err(EngineError::UnknownPack { pack: "nope".into() })
    );

    paid_event(&eng, "u1", "unlock_vip", "ref-a").await;
    assert!(matches!(
      eng.next_riddle_on("u1", "vip", today).await.unwrap(),
      RiddleDelivery::Next { .. }
    ));
    // Saturday challenge accepts either paid tier.
    assert!(matches!(
      eng.next_riddle_on("u1", "saturday", today).await.unwrap(),
      RiddleDelivery::Next { .. }
    ));
    // Premium stays locked for a VIP-only player.
    assert_eq!(
      eng.next_riddle_on("u1", "premium", today).await,
      Err(EngineError::PackLocked { pack: "premium".into() })
    );
  }

  #[tokio::test]
  async fn replayed_payment_reference_credits_once() {
    let eng = engine();
    registered(&eng, "u1").await;
    let out = paid_event(&eng, "u1", "buy_coins:50", "ref-1").await;
    assert!(matches!(out, PaymentOutcome::Applied { balance: 50, .. }));
    assert_eq!(
      eng
        .confirm_payment(PaymentEvent {
          player_id: "u1".into(),
          action: "buy_coins:50".into(),
          reference: "ref-1".into(),
          success: true,
        })
        .await,
      Err(EngineError::DuplicatePaymentReference)
    );
    assert_eq!(eng.get_player("u1").await.unwrap().coins, 50);
  }

  #[tokio::test]
  async fn non_success_and_unknown_tags_are_ignored() {
    let eng = engine();
    registered(&eng, "u1").await;
    let out = eng
      .confirm_payment(PaymentEvent {
        player_id: "u1".into(),
        action: "buy_coins:50".into(),
        reference: "ref-1".into(),
        success: false,
      })
      .await
      .unwrap();
    assert!(matches!(out, PaymentOutcome::Ignored { .. }));
    let out = paid_event(&eng, "u1", "refund:50", "ref-2").await;
    assert!(matches!(out, PaymentOutcome::Ignored { .. }));
    let p = eng.get_player("u1").await.unwrap();
    assert_eq!(p.coins, 0);
    assert!(!p.has_paid);
    // An ignored event does not consume its reference.
    let out = paid_event(&eng, "u1", "buy_coins:50", "ref-1").await;
    assert!(matches!(out, PaymentOutcome::Applied { .. }));
  }

  #[tokio::test]
  async fn unlock_actions_set_monotonic_tier_flags() {
    let eng = engine();
    registered(&eng, "u1").await;
    paid_event(&eng, "u1", "unlock_vip", "ref-1").await;
    let p = eng.get_player("u1").await.unwrap();
    assert!(p.is_vip && !p.is_premium && p.has_paid);
    assert_eq!(p.payment_reference.as_deref(), Some("ref-1"));
    paid_event(&eng, "u1", "unlock_premium", "ref-2").await;
    let p = eng.get_player("u1").await.unwrap();
    assert!(p.is_vip && p.is_premium);
  }

  #[tokio::test]
  async fn referral_bonus_is_paid_exactly_once() {
    let eng = engine();
    registered(&eng, "alice").await;
    let mut bob = input("bob");
    bob.referrer = Some("alice".into());
    eng.register(bob).await.unwrap();

    paid_event(&eng, "bob", "buy_coins:50", "ref-1").await;
    assert_eq!(eng.get_player("alice").await.unwrap().coins, 10);

    // A second, distinct payment must not pay the referrer again.
    paid_event(&eng, "bob", "unlock_vip", "ref-2").await;
    assert_eq!(eng.get_player("alice").await.unwrap().coins, 10);
    assert!(eng.referrals.read().await.get("bob").unwrap().bonus_given);
  }

  #[tokio::test]
  async fn referrer_store_outage_defers_the_bonus_and_keeps_the_reference_consumed() {
    let store = Arc::new(FlakyStore {
      inner: MemoryStore::new(),
      fail_put_for: RwLock::new(None),
    });
    let catalog = Arc::new(RiddleCatalog::from_config(None));
    let eng = Engine::new(store.clone(), catalog, Economy::default());
    registered(&eng, "alice").await;
    let mut bob = input("bob");
    bob.referrer = Some("alice".into());
    eng.register(bob).await.unwrap();

    // Alice's record cannot be written while the payment lands.
    *store.fail_put_for.write().await = Some("alice".into());
    let out = paid_event(&eng, "bob", "buy_coins:50", "ref-1").await;
    assert!(matches!(out, PaymentOutcome::Applied { balance: 50, .. }));
    assert_eq!(eng.get_player("bob").await.unwrap().coins, 50);
    assert!(!eng.referrals.read().await.get("bob").unwrap().bonus_given);

    // After the outage, replaying the same reference must not credit again.
    *store.fail_put_for.write().await = None;
    assert_eq!(
      eng
        .confirm_payment(PaymentEvent {
          player_id: "bob".into(),
          action: "buy_coins:50".into(),
          reference: "ref-1".into(),
          success: true,
        })
        .await,
      Err(EngineError::DuplicatePaymentReference)
    );
    assert_eq!(eng.get_player("bob").await.unwrap().coins, 50);
    assert_eq!(eng.get_player("alice").await.unwrap().coins, 0);

    // The next distinct payment retries the deferred bonus.
    paid_event(&eng, "bob", "unlock_vip", "ref-2").await;
    assert_eq!(eng.get_player("alice").await.unwrap().coins, 10);
    assert!(eng.referrals.read().await.get("bob").unwrap().bonus_given);
  }

  #[tokio::test]
  async fn global_leaderboard_is_paid_tiers_only() {
    let eng = engine();
    for id in ["a", "b", "c"] {
      registered(&eng, id).await;
    }
    set_rank(&eng, "a", 30, true, false).await;
    set_rank(&eng, "b", 50, false, false).await;
    set_rank(&eng, "c", 20, false, true).await;

    let board = eng.leaderboard_global(10).await.unwrap();
    let ids: Vec<&str> = board.iter().map(|r| r.player_id.as_str()).collect();
    assert_eq!(ids, vec!["a", "c"]); // b excluded despite the higher score
  }

  #[tokio::test]
  async fn global_leaderboard_ties_break_by_registration_order() {
    let eng = engine();
    for id in ["first", "second"] {
      registered(&eng, id).await;
      let mut p = eng.get_player(id).await.unwrap();
      p.score = 40;
      p.is_vip = true;
      eng.store.put(p).await.unwrap();
    }
    let board = eng.leaderboard_global(10).await.unwrap();
    assert_eq!(board[0].player_id, "first");
    assert_eq!(board[1].player_id, "second");
  }

  #[tokio::test]
  async fn period_leaderboard_reads_the_ledger() {
    let eng = engine();
    let today = date("2024-01-01");
    for id in ["a", "b"] {
      registered(&eng, id).await;
    }
    eng.submit_answer_on("a", "free", "Echo", false, today).await.unwrap();
    eng.submit_answer_on("b", "free", "Echo", true, today).await.unwrap();
    eng.submit_answer_on("b", "free", "Piano", false, today).await.unwrap();

    let board = eng.leaderboard_for_date(today, 10).await.unwrap();
    assert_eq!(board[0].player_id, "b");
    assert_eq!(board[0].points, 17);
    assert_eq!(board[1].player_id, "a");
    assert_eq!(board[1].points, 10);
    assert!(eng.leaderboard_for_date(date("2024-01-02"), 10).await.unwrap().is_empty());

    let pack_board = eng.leaderboard_for_pack("free", today, 1).await.unwrap();
    assert_eq!(pack_board.len(), 1);
    assert_eq!(pack_board[0].player_id, "b");
  }

  #[tokio::test]
  async fn winners_export_aggregates_across_dates() {
    let eng = engine();
    registered(&eng, "u1").await;
    eng.submit_answer_on("u1", "free", "Echo", false, date("2024-01-01")).await.unwrap();
    eng.submit_answer_on("u1", "free", "Piano", false, date("2024-01-02")).await.unwrap();
    let rows = eng.export_winners(10).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].total_score, 20);
    assert_eq!(rows[0].name, "Player u1");
    assert_eq!(rows[0].bank, "Test Bank");
  }

  #[tokio::test]
  async fn payouts_append_and_require_a_registered_player() {
    let eng = engine();
    registered(&eng, "u1").await;
    assert_eq!(
      eng.record_payout("ghost", 500, "bank").await.map(|_| ()),
      Err(EngineError::NotRegistered)
    );
    eng.record_payout("u1", 500, "bank").await.unwrap();
    eng.record_payout("u1", 200, "airtime").await.unwrap();
    let log = eng.list_payouts().await;
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].amount, 500);
    assert_eq!(log[1].method, "airtime");
  }
}

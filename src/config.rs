//! Loading game configuration (economy constants + optional riddle bank) from TOML.
//!
//! See `GameConfig`, `Economy` and `PackCfg` for the expected schema.

use serde::Deserialize;
use tracing::{error, info};

use crate::domain::PackAccess;

#[derive(Clone, Debug, Deserialize, Default)]
pub struct GameConfig {
  #[serde(default)]
  pub economy: Economy,
  #[serde(default)]
  pub packs: Vec<PackCfg>,
}

/// Riddle pack accepted in TOML configuration. A pack with a name that
/// matches a built-in seed pack replaces it wholesale.
#[derive(Clone, Debug, Deserialize)]
pub struct PackCfg {
  pub name: String,
  #[serde(default)] pub access: PackAccess,
  #[serde(default)] pub riddles: Vec<RiddleCfg>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RiddleCfg {
  #[serde(default)] pub id: Option<String>,
  pub question: String,
  pub answer: String,
  #[serde(default)] pub hint: Option<String>,
}

/// A streak milestone: reaching exactly `streak` consecutive days pays
/// `coins` on top of the base daily bonus. Brackets never stack.
#[derive(Clone, Debug, Deserialize)]
pub struct StreakMilestone {
  pub streak: u32,
  pub coins: u64,
}

/// Economy constants. Defaults match the published fee table.
#[derive(Clone, Debug, Deserialize)]
pub struct Economy {
  pub points_correct: u64,
  pub hint_penalty: u64,
  pub hint_cost: u64,
  pub daily_login_bonus: u64,
  pub referral_bonus: u64,
  pub max_daily_riddles: u32,
  pub streak_milestones: Vec<StreakMilestone>,
}

impl Default for Economy {
  fn default() -> Self {
    Self {
      points_correct: 10,
      hint_penalty: 3,
      hint_cost: 10,
      daily_login_bonus: 5,
      referral_bonus: 10,
      max_daily_riddles: 7,
      streak_milestones: vec![
        StreakMilestone { streak: 3, coins: 10 },
        StreakMilestone { streak: 5, coins: 25 },
        StreakMilestone { streak: 7, coins: 40 },
      ],
    }
  }
}

impl Economy {
  /// Milestone payout for the *new* streak value. Exact match only; values
  /// outside the configured brackets (including beyond day 7) pay nothing
  /// extra. Recurring brackets would be a product decision, not a default.
  pub fn milestone_coins(&self, streak: u32) -> u64 {
    self
      .streak_milestones
      .iter()
      .find(|m| m.streak == streak)
      .map(|m| m.coins)
      .unwrap_or(0)
  }
}

/// Attempt to load `GameConfig` from GAME_CONFIG_PATH. On any parsing/IO
/// error, returns None and the caller falls back to defaults + seed packs.
pub fn load_game_config_from_env() -> Option<GameConfig> {
  let path = std::env::var("GAME_CONFIG_PATH").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match toml::from_str::<GameConfig>(&s) {
      Ok(cfg) => {
        info!(target: "riddlewars", %path, packs = cfg.packs.len(), "Loaded game config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "riddlewars", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "riddlewars", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn economy_defaults_match_fee_tables() {
    let eco = Economy::default();
    assert_eq!(eco.points_correct, 10);
    assert_eq!(eco.hint_cost, 10);
    assert_eq!(eco.points_correct - eco.hint_penalty, 7);
    assert_eq!(eco.milestone_coins(3), 10);
    assert_eq!(eco.milestone_coins(5), 25);
    assert_eq!(eco.milestone_coins(7), 40);
    assert_eq!(eco.milestone_coins(4), 0);
    assert_eq!(eco.milestone_coins(10), 0);
  }

  #[test]
  fn pack_bank_parses_from_toml() {
    let cfg: GameConfig = toml::from_str(
      r#"
      [economy]
      points_correct = 10
      hint_penalty = 3
      hint_cost = 10
      daily_login_bonus = 5
      referral_bonus = 10
      max_daily_riddles = 7
      streak_milestones = [{ streak = 3, coins = 10 }]

      [[packs]]
      name = "free"
      access = "free"
      riddles = [
        { id = "f1", question = "I speak without a mouth. What am I?", answer = "Echo", hint = "You hear me in the hills." },
        { question = "No id needed", answer = "ok" },
      ]
      "#,
    )
    .expect("toml");
    assert_eq!(cfg.packs.len(), 1);
    assert_eq!(cfg.packs[0].riddles.len(), 2);
    assert_eq!(cfg.packs[0].riddles[0].id.as_deref(), Some("f1"));
    assert!(cfg.packs[0].riddles[1].id.is_none());
  }
}

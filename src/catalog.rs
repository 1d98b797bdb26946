//! Riddle catalog: built-in seed packs merged with the TOML bank.
//!
//! Packs are ordered collections; delivery walks a pack front to back and
//! serves the first riddle the player has not solved. The catalog is
//! read-only after startup (no hot reload).

use std::collections::BTreeMap;

use tracing::{info, warn};
use uuid::Uuid;

use crate::config::GameConfig;
use crate::domain::{PackAccess, Riddle};

#[derive(Clone, Debug)]
pub struct Pack {
  pub name: String,
  pub access: PackAccess,
  pub riddles: Vec<Riddle>,
}

pub struct RiddleCatalog {
  packs: BTreeMap<String, Pack>,
}

impl RiddleCatalog {
  /// Start from built-in seeds, then overlay config packs by name.
  /// Config riddles without an id get a generated one.
  pub fn from_config(cfg: Option<&GameConfig>) -> Self {
    let mut packs = BTreeMap::new();
    for p in seed_packs() {
      packs.insert(p.name.clone(), p);
    }

    if let Some(cfg) = cfg {
      for pc in &cfg.packs {
        let riddles: Vec<Riddle> = pc
          .riddles
          .iter()
          .filter_map(|rc| {
            if rc.question.trim().is_empty() || rc.answer.trim().is_empty() {
              warn!(target: "riddlewars", pack = %pc.name, "Skipping bank riddle: empty question or answer");
              return None;
            }
            Some(Riddle {
              id: rc.id.clone().unwrap_or_else(|| Uuid::new_v4().to_string()),
              question: rc.question.clone(),
              answer: rc.answer.clone(),
              hint: rc.hint.clone(),
            })
          })
          .collect();
        if riddles.is_empty() {
          warn!(target: "riddlewars", pack = %pc.name, "Skipping bank pack: no usable riddles");
          continue;
        }
        packs.insert(
          pc.name.clone(),
          Pack { name: pc.name.clone(), access: pc.access, riddles },
        );
      }
    }

    for p in packs.values() {
      info!(target: "riddlewars", pack = %p.name, access = ?p.access, riddles = p.riddles.len(), "Startup pack inventory");
    }
    Self { packs }
  }

  pub fn get_pack(&self, name: &str) -> Option<&Pack> {
    self.packs.get(name)
  }
}

fn riddle(id: &str, question: &str, answer: &str, hint: &str) -> Riddle {
  Riddle {
    id: id.into(),
    question: question.into(),
    answer: answer.into(),
    hint: if hint.is_empty() { None } else { Some(hint.into()) },
  }
}

/// Minimal built-in packs so the service is playable with no config file.
fn seed_packs() -> Vec<Pack> {
  vec![
    Pack {
      name: "free".into(),
      access: PackAccess::Free,
      riddles: vec![
        riddle(
          "free-1",
          "I speak without a mouth and hear without ears. What am I?",
          "Echo",
          "You meet me in the mountains.",
        ),
        riddle(
          "free-2",
          "What has keys but can't open locks?",
          "Piano",
          "It sits in a living room.",
        ),
        riddle(
          "free-3",
          "The more of this you take, the more you leave behind. What is it?",
          "Footsteps",
          "Look down while walking.",
        ),
      ],
    },
    Pack {
      name: "vip".into(),
      access: PackAccess::Vip,
      riddles: vec![
        riddle(
          "vip-1",
          "I am always in front of you but can't be seen. What am I?",
          "Future",
          "Tomorrow knows me well.",
        ),
        riddle(
          "vip-2",
          "What can travel around the world while staying in a corner?",
          "Stamp",
          "It rides on envelopes.",
        ),
      ],
    },
    Pack {
      name: "premium".into(),
      access: PackAccess::Premium,
      riddles: vec![
        riddle(
          "prem-1",
          "What gets wetter the more it dries?",
          "Towel",
          "Hanging in your bathroom.",
        ),
        riddle(
          "prem-2",
          "I have cities but no houses, forests but no trees. What am I?",
          "Map",
          "Folded in a glove box.",
        ),
      ],
    },
    Pack {
      name: "saturday".into(),
      access: PackAccess::Paid,
      riddles: vec![
        riddle(
          "sat-1",
          "The person who makes it sells it. The person who buys it never uses it. What is it?",
          "Coffin",
          "",
        ),
        riddle(
          "sat-2",
          "What breaks yet never falls, and what falls yet never breaks?",
          "Day and night",
          "Think of dawn and dusk.",
        ),
      ],
    },
  ]
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::{GameConfig, PackCfg, RiddleCfg};

  #[test]
  fn seeds_cover_all_four_packs() {
    let cat = RiddleCatalog::from_config(None);
    for name in ["free", "vip", "premium", "saturday"] {
      let pack = cat.get_pack(name).expect(name);
      assert!(!pack.riddles.is_empty());
    }
    assert!(cat.get_pack("nope").is_none());
  }

  #[test]
  fn config_pack_replaces_seed_pack_by_name() {
    let cfg = GameConfig {
      economy: Default::default(),
      packs: vec![PackCfg {
        name: "free".into(),
        access: PackAccess::Free,
        riddles: vec![RiddleCfg {
          id: None,
          question: "Only riddle".into(),
          answer: "Only".into(),
          hint: None,
        }],
      }],
    };
    let cat = RiddleCatalog::from_config(Some(&cfg));
    let free = cat.get_pack("free").unwrap();
    assert_eq!(free.riddles.len(), 1);
    assert!(!free.riddles[0].id.is_empty(), "bank riddle gets a generated id");
  }
}

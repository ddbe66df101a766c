use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Medal {
    None,
    Bronze,
    Silver,
    Gold,
    Platinum,
}

/// Minimum scores for each tier. Cosmetic policy, injected via config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedalThresholds {
    pub bronze: u32,
    pub silver: u32,
    pub gold: u32,
    pub platinum: u32,
}

impl Default for MedalThresholds {
    fn default() -> Self {
        Self {
            bronze: 10,
            silver: 20,
            gold: 30,
            platinum: 40,
        }
    }
}

impl MedalThresholds {
    pub fn medal_for(&self, score: u32) -> Medal {
        if score >= self.platinum {
            Medal::Platinum
        } else if score >= self.gold {
            Medal::Gold
        } else if score >= self.silver {
            Medal::Silver
        } else if score >= self.bronze {
            Medal::Bronze
        } else {
            Medal::None
        }
    }
}

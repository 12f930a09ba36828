// Stat generation for the species catalogs.
//
// Per-tier power ranges, uniform rollers for both catalogs, the adoption
// bonus roll, and the aggregation of base stats with per-instance extras.
// Everything here is a pure function of (inputs, RNG stream).

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::{Anima, UserAnima};

// ── Tiers ────────────────────────────────────────────────────────────

/// Power tier of a creature species. The creature and adversary catalogs
/// use disjoint tier sets and are never mixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnimaLevel {
    Rookie,
    Champion,
    Ultimate,
    Mega,
}

impl AnimaLevel {
    pub const ALL: [AnimaLevel; 4] = [
        AnimaLevel::Rookie,
        AnimaLevel::Champion,
        AnimaLevel::Ultimate,
        AnimaLevel::Mega,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnimaLevel::Rookie => "Rookie",
            AnimaLevel::Champion => "Champion",
            AnimaLevel::Ultimate => "Ultimate",
            AnimaLevel::Mega => "Mega",
        }
    }
}

impl fmt::Display for AnimaLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnimaLevel {
    type Err = RollError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Rookie" => Ok(AnimaLevel::Rookie),
            "Champion" => Ok(AnimaLevel::Champion),
            "Ultimate" => Ok(AnimaLevel::Ultimate),
            "Mega" => Ok(AnimaLevel::Mega),
            other => Err(RollError::UnknownLevel(other.to_string())),
        }
    }
}

/// Difficulty tier of an adversary species.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EnemyLevel {
    Easy,
    Medium,
    Hard,
    Boss,
}

impl EnemyLevel {
    pub const ALL: [EnemyLevel; 4] = [
        EnemyLevel::Easy,
        EnemyLevel::Medium,
        EnemyLevel::Hard,
        EnemyLevel::Boss,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EnemyLevel::Easy => "Easy",
            EnemyLevel::Medium => "Medium",
            EnemyLevel::Hard => "Hard",
            EnemyLevel::Boss => "Boss",
        }
    }
}

impl fmt::Display for EnemyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnemyLevel {
    type Err = RollError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Easy" => Ok(EnemyLevel::Easy),
            "Medium" => Ok(EnemyLevel::Medium),
            "Hard" => Ok(EnemyLevel::Hard),
            "Boss" => Ok(EnemyLevel::Boss),
            other => Err(RollError::UnknownLevel(other.to_string())),
        }
    }
}

// ── Range table ──────────────────────────────────────────────────────

/// Inclusive per-attribute ranges for one creature tier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnimaRanges {
    pub hp: (i64, i64),
    pub atk: (i64, i64),
    pub def: (i64, i64),
    pub spd: (f64, f64),
    pub crit: (i64, i64),
}

/// Inclusive per-attribute ranges for one adversary tier.
/// Defense is derived from an attack roll, so it has no range of its own.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnemyRanges {
    pub hp: (i64, i64),
    pub atk: (i64, i64),
    pub exp: (i64, i64),
    pub bits: (i64, i64),
}

/// Tier → range lookup for both catalogs. `Default` carries the shipped
/// power curve; rolling against a table that lacks the requested tier is
/// an error rather than a fallback.
#[derive(Debug, Clone)]
pub struct RangeTable {
    pub animas: HashMap<AnimaLevel, AnimaRanges>,
    pub enemies: HashMap<EnemyLevel, EnemyRanges>,
}

impl Default for RangeTable {
    fn default() -> Self {
        let mut animas = HashMap::new();
        animas.insert(
            AnimaLevel::Rookie,
            AnimaRanges {
                hp: (80, 150),
                atk: (10, 30),
                def: (5, 20),
                spd: (0.8, 1.5),
                crit: (0, 5),
            },
        );
        animas.insert(
            AnimaLevel::Champion,
            AnimaRanges {
                hp: (200, 450),
                atk: (40, 90),
                def: (30, 70),
                spd: (1.2, 2.2),
                crit: (5, 15),
            },
        );
        animas.insert(
            AnimaLevel::Ultimate,
            AnimaRanges {
                hp: (600, 1100),
                atk: (100, 180),
                def: (80, 140),
                spd: (2.0, 3.5),
                crit: (15, 25),
            },
        );
        animas.insert(
            AnimaLevel::Mega,
            AnimaRanges {
                hp: (1500, 3000),
                atk: (200, 400),
                def: (150, 300),
                spd: (3.0, 5.0),
                crit: (25, 50),
            },
        );

        let mut enemies = HashMap::new();
        enemies.insert(
            EnemyLevel::Easy,
            EnemyRanges {
                hp: (50, 100),
                atk: (5, 15),
                exp: (10, 30),
                bits: (5, 15),
            },
        );
        enemies.insert(
            EnemyLevel::Medium,
            EnemyRanges {
                hp: (150, 300),
                atk: (20, 40),
                exp: (40, 80),
                bits: (20, 50),
            },
        );
        enemies.insert(
            EnemyLevel::Hard,
            EnemyRanges {
                hp: (400, 800),
                atk: (50, 90),
                exp: (100, 200),
                bits: (60, 120),
            },
        );
        enemies.insert(
            EnemyLevel::Boss,
            EnemyRanges {
                hp: (1000, 3000),
                atk: (100, 250),
                exp: (500, 1000),
                bits: (300, 800),
            },
        );

        RangeTable { animas, enemies }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RollError {
    #[error("no stat ranges configured for tier '{0}'")]
    UnknownLevel(String),
}

// ── Rollers ──────────────────────────────────────────────────────────

/// Rolled base stats for a creature species.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnimaStats {
    pub max_health: i64,
    pub attack: i64,
    pub defense: i64,
    pub attack_speed: f64,
    pub critical_chance: i64,
}

/// Rolled base stats for an adversary species. Attack-speed and crit are
/// not rolled; they come from the admin's form payload.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnemyStats {
    pub max_health: i64,
    pub attack: i64,
    pub defense: i64,
    pub reward_exp: i64,
    pub reward_bits: i64,
}

fn round_one_decimal(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

/// Roll one creature stat bundle: each attribute sampled independently and
/// uniformly over its inclusive range. Attack-speed is kept to one decimal
/// place; every other attribute is an integer.
pub fn roll_anima_stats(
    table: &RangeTable,
    level: AnimaLevel,
    rng: &mut impl Rng,
) -> Result<AnimaStats, RollError> {
    let r = table
        .animas
        .get(&level)
        .ok_or_else(|| RollError::UnknownLevel(level.to_string()))?;

    Ok(AnimaStats {
        max_health: rng.gen_range(r.hp.0..=r.hp.1),
        attack: rng.gen_range(r.atk.0..=r.atk.1),
        defense: rng.gen_range(r.def.0..=r.def.1),
        attack_speed: round_one_decimal(rng.gen_range(r.spd.0..=r.spd.1)),
        critical_chance: rng.gen_range(r.crit.0..=r.crit.1),
    })
}

/// Roll one adversary stat bundle. Defense is not sampled from its own
/// range: it is half of a fresh attack roll, floored, so an adversary's
/// defense never exceeds half its tier's attack ceiling.
pub fn roll_enemy_stats(
    table: &RangeTable,
    level: EnemyLevel,
    rng: &mut impl Rng,
) -> Result<EnemyStats, RollError> {
    let r = table
        .enemies
        .get(&level)
        .ok_or_else(|| RollError::UnknownLevel(level.to_string()))?;

    let defense_roll = rng.gen_range(r.atk.0..=r.atk.1);

    Ok(EnemyStats {
        max_health: rng.gen_range(r.hp.0..=r.hp.1),
        attack: rng.gen_range(r.atk.0..=r.atk.1),
        defense: defense_roll / 2,
        reward_exp: rng.gen_range(r.exp.0..=r.exp.1),
        reward_bits: rng.gen_range(r.bits.0..=r.bits.1),
    })
}

// ── Adoption bonus ───────────────────────────────────────────────────

// Upper bounds (exclusive) for the per-adoption bonus roll. Deliberately
// small next to any tier's base stats.
pub const BONUS_ATTACK_MAX: i64 = 15;
pub const BONUS_DEFENSE_MAX: i64 = 15;
pub const BONUS_HEALTH_MAX: i64 = 50;

/// "Genetic" bonus fixed at adoption time, never recomputed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BonusStats {
    pub attack: i64,
    pub defense: i64,
    pub max_health: i64,
}

/// Roll the adoption bonus. Independent of tier and of the range table.
pub fn roll_bonus(rng: &mut impl Rng) -> BonusStats {
    BonusStats {
        attack: rng.gen_range(0..BONUS_ATTACK_MAX),
        defense: rng.gen_range(0..BONUS_DEFENSE_MAX),
        max_health: rng.gen_range(0..BONUS_HEALTH_MAX),
    }
}

// ── Aggregation ──────────────────────────────────────────────────────

/// Displayed totals for one owned instance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EffectiveStats {
    pub max_health: i64,
    pub attack: i64,
    pub defense: i64,
    pub attack_speed: f64,
    pub critical_chance: i64,
}

/// Combine a species' base stats with an instance's extras. Only health,
/// attack and defense carry extras; attack-speed and crit come from the
/// species alone. Neither input is mutated.
pub fn effective_stats(species: &Anima, instance: &UserAnima) -> EffectiveStats {
    EffectiveStats {
        max_health: species.max_health + instance.max_health_extra,
        attack: species.attack + instance.attack_extra,
        defense: species.defense + instance.defense_extra,
        attack_speed: species.attack_speed,
        critical_chance: species.critical_chance,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const ROLLS: usize = 200;

    #[test]
    fn test_anima_rolls_stay_in_range() {
        let table = RangeTable::default();
        let mut rng = StdRng::seed_from_u64(7);

        for level in AnimaLevel::ALL {
            let r = table.animas[&level];
            for _ in 0..ROLLS {
                let s = roll_anima_stats(&table, level, &mut rng).unwrap();
                assert!(s.max_health >= r.hp.0 && s.max_health <= r.hp.1);
                assert!(s.attack >= r.atk.0 && s.attack <= r.atk.1);
                assert!(s.defense >= r.def.0 && s.defense <= r.def.1);
                assert!(s.attack_speed >= r.spd.0 && s.attack_speed <= r.spd.1);
                assert!(s.critical_chance >= r.crit.0 && s.critical_chance <= r.crit.1);
            }
        }
    }

    #[test]
    fn test_attack_speed_has_one_decimal() {
        let table = RangeTable::default();
        let mut rng = StdRng::seed_from_u64(11);

        for _ in 0..ROLLS {
            let s = roll_anima_stats(&table, AnimaLevel::Mega, &mut rng).unwrap();
            let tenths = s.attack_speed * 10.0;
            assert!(
                (tenths - tenths.round()).abs() < 1e-9,
                "attack_speed {} is not one-decimal",
                s.attack_speed
            );
        }
    }

    #[test]
    fn test_enemy_rolls_stay_in_range() {
        let table = RangeTable::default();
        let mut rng = StdRng::seed_from_u64(13);

        for level in EnemyLevel::ALL {
            let r = table.enemies[&level];
            for _ in 0..ROLLS {
                let s = roll_enemy_stats(&table, level, &mut rng).unwrap();
                assert!(s.max_health >= r.hp.0 && s.max_health <= r.hp.1);
                assert!(s.attack >= r.atk.0 && s.attack <= r.atk.1);
                assert!(s.reward_exp >= r.exp.0 && s.reward_exp <= r.exp.1);
                assert!(s.reward_bits >= r.bits.0 && s.reward_bits <= r.bits.1);
            }
        }
    }

    #[test]
    fn test_enemy_defense_is_half_an_attack_roll() {
        let table = RangeTable::default();
        let mut rng = StdRng::seed_from_u64(17);

        for level in EnemyLevel::ALL {
            let r = table.enemies[&level];
            for _ in 0..ROLLS {
                let s = roll_enemy_stats(&table, level, &mut rng).unwrap();
                // floor(0.5 * x) for x within the attack range
                assert!(s.defense >= r.atk.0 / 2);
                assert!(s.defense <= r.atk.1 / 2);
            }
        }
    }

    #[test]
    fn test_roll_is_deterministic_given_seed() {
        let table = RangeTable::default();
        let a = roll_anima_stats(&table, AnimaLevel::Champion, &mut StdRng::seed_from_u64(42))
            .unwrap();
        let b = roll_anima_stats(&table, AnimaLevel::Champion, &mut StdRng::seed_from_u64(42))
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_unknown_tier_fails() {
        let empty = RangeTable {
            animas: HashMap::new(),
            enemies: HashMap::new(),
        };
        let mut rng = StdRng::seed_from_u64(1);

        let err = roll_anima_stats(&empty, AnimaLevel::Rookie, &mut rng).unwrap_err();
        assert_eq!(err, RollError::UnknownLevel("Rookie".to_string()));

        let err = roll_enemy_stats(&empty, EnemyLevel::Boss, &mut rng).unwrap_err();
        assert_eq!(err, RollError::UnknownLevel("Boss".to_string()));
    }

    #[test]
    fn test_level_round_trip() {
        for level in AnimaLevel::ALL {
            assert_eq!(level.as_str().parse::<AnimaLevel>().unwrap(), level);
        }
        for level in EnemyLevel::ALL {
            assert_eq!(level.as_str().parse::<EnemyLevel>().unwrap(), level);
        }
        assert!("Legendary".parse::<AnimaLevel>().is_err());
        assert!("Rookie".parse::<EnemyLevel>().is_err());
    }

    #[test]
    fn test_bonus_roll_bounds() {
        let mut rng = StdRng::seed_from_u64(23);
        for _ in 0..ROLLS {
            let b = roll_bonus(&mut rng);
            assert!(b.attack >= 0 && b.attack < BONUS_ATTACK_MAX);
            assert!(b.defense >= 0 && b.defense < BONUS_DEFENSE_MAX);
            assert!(b.max_health >= 0 && b.max_health < BONUS_HEALTH_MAX);
        }
    }

    fn sample_species() -> Anima {
        Anima {
            id: 1,
            species: "Pyromon".to_string(),
            image_data: String::new(),
            level: "Rookie".to_string(),
            attack: 20,
            defense: 10,
            max_health: 100,
            attack_speed: 1.2,
            critical_chance: 3,
            next_evolution_id: None,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    fn sample_instance() -> UserAnima {
        UserAnima {
            id: 1,
            user_id: 1,
            anima_id: 1,
            nickname: None,
            is_active: true,
            current_exp: 0,
            attack_extra: 7,
            defense_extra: 3,
            max_health_extra: 25,
            created_at: String::new(),
        }
    }

    #[test]
    fn test_effective_stats_adds_extras() {
        let species = sample_species();
        let instance = sample_instance();

        let total = effective_stats(&species, &instance);
        assert_eq!(total.max_health, 125);
        assert_eq!(total.attack, 27);
        assert_eq!(total.defense, 13);
        // Speed and crit are untouched by extras.
        assert_eq!(total.attack_speed, 1.2);
        assert_eq!(total.critical_chance, 3);
    }

    #[test]
    fn test_effective_stats_is_idempotent() {
        let species = sample_species();
        let instance = sample_instance();

        let first = effective_stats(&species, &instance);
        let second = effective_stats(&species, &instance);
        assert_eq!(first, second);
    }
}

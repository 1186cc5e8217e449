//! XP, stars, player level and streak bookkeeping.
//!
//! Everything here is pure: same inputs, same outputs, no I/O.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Fixed XP amounts.
pub struct XpRewards;

impl XpRewards {
    pub const EXERCISE_COMPLETE: u32 = 10;
    pub const EXERCISE_NO_HINTS: u32 = 15;
    pub const EXERCISE_FIRST_TRY: u32 = 20;
    pub const LEVEL_COMPLETE: u32 = 50;
    pub const LEVEL_THREE_STARS: u32 = 100;
    pub const BOSS_COMPLETE: u32 = 200;
    pub const WORLD_COMPLETE: u32 = 500;
    pub const STREAK_DAY: u32 = 25;
    pub const ACHIEVEMENT_UNLOCK: u32 = 50;
}

pub const BONUS_OBJECTIVE_XP: u32 = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExerciseOutcome {
    pub hints_used: u32,
    /// At least 1 for a completed exercise.
    pub attempts: u32,
}

impl ExerciseOutcome {
    pub fn new(hints_used: u32, attempts: u32) -> Self {
        Self { hints_used, attempts: attempts.max(1) }
    }

    pub fn first_try(&self) -> bool {
        self.attempts == 1
    }

    /// First try without hints.
    pub fn perfect(&self) -> bool {
        self.first_try() && self.hints_used == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct XpBreakdown {
    pub exercise_xp: u32,
    pub no_hints_bonus: u32,
    pub first_try_bonus: u32,
    pub level_bonus: u32,
    pub streak_multiplier: f64,
    pub total: u32,
}

impl XpBreakdown {
    /// Sum of the additive components, before the streak multiplier.
    pub fn subtotal(&self) -> u32 {
        self.exercise_xp + self.no_hints_bonus + self.first_try_bonus + self.level_bonus
    }
}

pub fn streak_multiplier(streak_days: u32) -> f64 {
    if streak_days >= 30 {
        2.0
    } else if streak_days >= 14 {
        1.5
    } else if streak_days >= 7 {
        1.25
    } else if streak_days >= 3 {
        1.1
    } else {
        1.0
    }
}

pub fn calculate_exercise_xp(outcome: ExerciseOutcome) -> XpBreakdown {
    let exercise_xp = XpRewards::EXERCISE_COMPLETE;
    let no_hints_bonus = if outcome.hints_used == 0 {
        XpRewards::EXERCISE_NO_HINTS - XpRewards::EXERCISE_COMPLETE
    } else {
        0
    };
    let first_try_bonus = if outcome.perfect() {
        XpRewards::EXERCISE_FIRST_TRY - XpRewards::EXERCISE_NO_HINTS
    } else {
        0
    };
    XpBreakdown {
        exercise_xp,
        no_hints_bonus,
        first_try_bonus,
        level_bonus: 0,
        streak_multiplier: 1.0,
        total: exercise_xp + no_hints_bonus + first_try_bonus,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelResult {
    pub stars: u8,
    pub is_boss: bool,
    pub bonus_objectives_passed: u32,
    pub exercise_outcomes: Vec<ExerciseOutcome>,
    pub streak_days: u32,
}

/// XP for a finished level. Rounds half away from zero.
pub fn calculate_level_xp(level: &LevelResult) -> XpBreakdown {
    let mut breakdown = XpBreakdown {
        exercise_xp: 0,
        no_hints_bonus: 0,
        first_try_bonus: 0,
        level_bonus: 0,
        streak_multiplier: streak_multiplier(level.streak_days),
        total: 0,
    };
    for outcome in &level.exercise_outcomes {
        let xp = calculate_exercise_xp(*outcome);
        breakdown.exercise_xp += xp.exercise_xp;
        breakdown.no_hints_bonus += xp.no_hints_bonus;
        breakdown.first_try_bonus += xp.first_try_bonus;
    }

    breakdown.level_bonus = if level.is_boss {
        XpRewards::BOSS_COMPLETE
    } else if level.stars == 3 {
        XpRewards::LEVEL_THREE_STARS
    } else {
        XpRewards::LEVEL_COMPLETE
    };
    breakdown.level_bonus += level.bonus_objectives_passed * BONUS_OBJECTIVE_XP;

    breakdown.total = (f64::from(breakdown.subtotal()) * breakdown.streak_multiplier).round() as u32;
    breakdown
}

/// 3 stars for >= 80% perfect exercises, 2 for >= 50%, otherwise 1.
pub fn calculate_stars(outcomes: &[ExerciseOutcome]) -> u8 {
    if outcomes.is_empty() {
        return 1;
    }
    let perfect = outcomes.iter().filter(|o| o.perfect()).count();
    let ratio = perfect as f64 / outcomes.len() as f64;
    if ratio >= 0.8 {
        3
    } else if ratio >= 0.5 {
        2
    } else {
        1
    }
}

const PLAYER_LEVELS: &[(u32, &str, u32)] = &[
    (1, "Beginner", 0),
    (2, "Novice", 100),
    (3, "Learner", 250),
    (4, "Apprentice", 500),
    (5, "Coder", 1000),
    (6, "Developer", 2000),
    (7, "Programmer", 3500),
    (8, "Engineer", 5500),
    (9, "Expert", 8000),
    (10, "Pythonista", 12000),
];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerLevel {
    pub level: u32,
    pub title: &'static str,
    pub xp_for_current: u32,
    pub xp_for_next: u32,
    /// 0.0..=1.0 toward the next level.
    pub progress: f64,
    pub is_max_level: bool,
}

pub fn player_level(total_xp: u32) -> PlayerLevel {
    let idx = PLAYER_LEVELS
        .iter()
        .rposition(|(_, _, required)| total_xp >= *required)
        .unwrap_or(0);
    let (level, title, current) = PLAYER_LEVELS[idx];
    match PLAYER_LEVELS.get(idx + 1) {
        Some(&(_, _, next)) => PlayerLevel {
            level,
            title,
            xp_for_current: current,
            xp_for_next: next,
            progress: (f64::from(total_xp - current) / f64::from(next - current)).min(1.0),
            is_max_level: false,
        },
        None => PlayerLevel {
            level,
            title,
            xp_for_current: current,
            xp_for_next: current,
            progress: 1.0,
            is_max_level: true,
        },
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreakData {
    pub current: u32,
    pub longest: u32,
    pub last_activity_date: Option<NaiveDate>,
}

impl StreakData {
    /// Count activity on `today`.
    pub fn record_activity(&mut self, today: NaiveDate) {
        match self.last_activity_date {
            Some(last) if last == today => return,
            Some(last) if (today - last).num_days() == 1 => self.current += 1,
            _ => self.current = 1,
        }
        self.longest = self.longest.max(self.current);
        self.last_activity_date = Some(today);
    }

    /// The streak breaks tomorrow unless there is activity today.
    pub fn is_at_risk(&self, today: NaiveDate) -> bool {
        self.last_activity_date.is_some_and(|last| (today - last).num_days() == 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreakMilestone {
    pub days: u32,
    pub label: &'static str,
}

pub const STREAK_MILESTONES: &[StreakMilestone] = &[
    StreakMilestone { days: 3, label: "3-Day Streak!" },
    StreakMilestone { days: 7, label: "Week Warrior!" },
    StreakMilestone { days: 14, label: "Two-Week Titan!" },
    StreakMilestone { days: 30, label: "Monthly Master!" },
    StreakMilestone { days: 100, label: "Century Champion!" },
];

/// The first milestone crossed going from `previous` to `current`.
pub fn newly_reached_milestone(previous: u32, current: u32) -> Option<StreakMilestone> {
    STREAK_MILESTONES
        .iter()
        .find(|m| previous < m.days && current >= m.days)
        .copied()
}

use lms_common::models::{
    Achievement, AchievementCriteria, AchievementType, Badge, BadgeCategory, BadgeRarity,
    Leaderboard, LeaderboardScope, LeaderboardType, Level, LevelReward, RewardType, Timeframe,
};
use lms_common::time::now_ts;
use serde::Deserialize;

use super::{Document, ensure_own_tenant, require_text};
use crate::access::AuthUser;
use crate::context::Ctx;
use crate::db::LmsDb;
use crate::errors::{LmsError, LmsResult};
use crate::hooks;

fn existing_badge(db: &LmsDb, id: i64) -> LmsResult<Badge> {
    db.get::<Badge>(id)?
        .ok_or_else(|| LmsError::validation(format!("Badge {id} does not exist")))
}

// ── Badges ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct BadgeInput {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icon_id: Option<i64>,
    #[serde(default)]
    pub rarity: Option<BadgeRarity>,
    pub category: BadgeCategory,
    #[serde(default)]
    pub tenant_id: Option<i64>,
    #[serde(default)]
    pub is_global: bool,
}

impl Document for Badge {
    type Input = BadgeInput;

    fn build(input: BadgeInput, user: &AuthUser, now: &str) -> LmsResult<Self> {
        Ok(Badge {
            id: 0,
            name: input.name,
            description: input.description,
            icon_id: input.icon_id,
            rarity: input.rarity.unwrap_or(BadgeRarity::Common),
            category: input.category,
            tenant_id: hooks::resolve_tenant(input.tenant_id, input.is_global, user),
            is_global: input.is_global,
            created_at: now.to_string(),
            updated_at: now.to_string(),
        })
    }

    fn before_change(&mut self, _ctx: Ctx<'_>, user: &AuthUser, _previous: Option<&Self>) -> LmsResult<()> {
        require_text(&self.name, "Name")?;
        if self.is_global {
            self.tenant_id = None;
        }
        ensure_own_tenant(user, self.tenant_id)?;
        self.updated_at = now_ts();
        Ok(())
    }
}

// ── Achievements ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AchievementInput {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub achievement_type: AchievementType,
    pub criteria: AchievementCriteria,
    pub badge_id: i64,
    #[serde(default)]
    pub points: i64,
    #[serde(default)]
    pub secret: bool,
    #[serde(default)]
    pub tenant_id: Option<i64>,
    #[serde(default)]
    pub is_global: bool,
    #[serde(default)]
    pub prerequisites: Vec<i64>,
}

impl Document for Achievement {
    type Input = AchievementInput;

    fn build(input: AchievementInput, user: &AuthUser, now: &str) -> LmsResult<Self> {
        Ok(Achievement {
            id: 0,
            name: input.name,
            description: input.description,
            achievement_type: input.achievement_type,
            criteria: input.criteria,
            badge_id: input.badge_id,
            points: input.points,
            secret: input.secret,
            tenant_id: hooks::resolve_tenant(input.tenant_id, input.is_global, user),
            is_global: input.is_global,
            prerequisites: input.prerequisites,
            created_at: now.to_string(),
            updated_at: now.to_string(),
        })
    }

    fn before_change(&mut self, ctx: Ctx<'_>, user: &AuthUser, _previous: Option<&Self>) -> LmsResult<()> {
        require_text(&self.name, "Name")?;
        if self.points < 0 {
            return Err(LmsError::validation("Points cannot be negative"));
        }
        if self.criteria.threshold < 0.0 {
            return Err(LmsError::validation("Threshold cannot be negative"));
        }
        if self.is_global {
            self.tenant_id = None;
        }
        ensure_own_tenant(user, self.tenant_id)?;
        existing_badge(ctx.db, self.badge_id)?;
        for &id in &self.prerequisites {
            if id == self.id {
                return Err(LmsError::validation(
                    "An achievement cannot be its own prerequisite",
                ));
            }
            if ctx.db.get::<Achievement>(id)?.is_none() {
                return Err(LmsError::validation(format!("Achievement {id} does not exist")));
            }
        }
        self.updated_at = now_ts();
        Ok(())
    }
}

// ── Levels ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct LevelInput {
    pub name: String,
    pub level: i64,
    #[serde(default)]
    pub description: Option<String>,
    pub points_required: i64,
    #[serde(default)]
    pub tenant_id: Option<i64>,
    #[serde(default)]
    pub is_global: bool,
    #[serde(default)]
    pub icon_id: Option<i64>,
    #[serde(default)]
    pub rewards: Vec<LevelReward>,
}

impl Document for Level {
    type Input = LevelInput;

    fn build(input: LevelInput, user: &AuthUser, now: &str) -> LmsResult<Self> {
        Ok(Level {
            id: 0,
            name: input.name,
            level: input.level,
            description: input.description,
            points_required: input.points_required,
            tenant_id: hooks::resolve_tenant(input.tenant_id, input.is_global, user),
            is_global: input.is_global,
            icon_id: input.icon_id,
            rewards: input.rewards,
            created_at: now.to_string(),
            updated_at: now.to_string(),
        })
    }

    fn before_change(&mut self, ctx: Ctx<'_>, user: &AuthUser, previous: Option<&Self>) -> LmsResult<()> {
        require_text(&self.name, "Name")?;
        if self.level < 1 {
            return Err(LmsError::validation("Level must be at least 1"));
        }
        if self.points_required < 0 {
            return Err(LmsError::validation("Points required cannot be negative"));
        }
        if self.is_global {
            self.tenant_id = None;
        }
        ensure_own_tenant(user, self.tenant_id)?;
        for reward in &self.rewards {
            if reward.reward_type == RewardType::Badge {
                let badge_id = reward
                    .badge_id
                    .ok_or_else(|| LmsError::validation("Badge rewards need a badge"))?;
                existing_badge(ctx.db, badge_id)?;
            }
        }

        let siblings: Vec<Level> = ctx
            .db
            .levels_for_tenant(self.tenant_id)?
            .into_iter()
            .filter(|l| l.id != self.id)
            .collect();
        if previous.is_none() && siblings.iter().any(|l| l.level == self.level) {
            return Err(LmsError::Conflict(format!("Level {} already exists", self.level)));
        }
        if let Some(below) = siblings.iter().find(|l| l.level == self.level - 1) {
            if self.points_required <= below.points_required {
                return Err(LmsError::validation(format!(
                    "Points required must exceed level {} ({} points)",
                    below.level, below.points_required
                )));
            }
        }
        self.updated_at = now_ts();
        Ok(())
    }
}

// ── Leaderboards ──────────────────────────────────────────────────────

fn default_display_limit() -> i64 {
    10
}

fn default_refresh_interval() -> i64 {
    3600
}

#[derive(Debug, Deserialize)]
pub struct LeaderboardInput {
    pub name: String,
    #[serde(default)]
    pub tenant_id: Option<i64>,
    #[serde(default)]
    pub is_global: bool,
    pub board_type: LeaderboardType,
    #[serde(default)]
    pub timeframe: Option<Timeframe>,
    #[serde(default)]
    pub scope: LeaderboardScope,
    #[serde(default)]
    pub custom_logic: Option<String>,
    #[serde(default = "default_display_limit")]
    pub display_limit: i64,
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: i64,
}

impl Document for Leaderboard {
    type Input = LeaderboardInput;

    fn build(input: LeaderboardInput, user: &AuthUser, now: &str) -> LmsResult<Self> {
        Ok(Leaderboard {
            id: 0,
            name: input.name,
            tenant_id: hooks::resolve_tenant(input.tenant_id, input.is_global, user),
            is_global: input.is_global,
            board_type: input.board_type,
            timeframe: input.timeframe.unwrap_or(Timeframe::AllTime),
            scope: input.scope,
            custom_logic: input.custom_logic,
            display_limit: input.display_limit,
            refresh_interval: input.refresh_interval,
            created_at: now.to_string(),
            updated_at: now.to_string(),
        })
    }

    fn before_change(&mut self, _ctx: Ctx<'_>, user: &AuthUser, _previous: Option<&Self>) -> LmsResult<()> {
        require_text(&self.name, "Name")?;
        if self.is_global {
            self.tenant_id = None;
        }
        hooks::validate_leaderboard(self)?;
        ensure_own_tenant(user, self.tenant_id)?;
        self.updated_at = now_ts();
        Ok(())
    }
}

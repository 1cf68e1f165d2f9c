//! Badges, achievements, the point ledger, streaks, levels, leaderboards,
//! notifications and the unlock tables.

use anyhow::{Context, Result};
use lms_common::models::{
    Achievement, AchievementType, Badge, Leaderboard, Level, Notification, Point, PointSourceRef,
    PointType, Streak, StreakType, UserAchievement, UserBadge,
};
use rusqlite::{Connection, Row, params, params_from_iter};

use super::{Filters, LmsDb, Record, enum_col, json_col, opt_json_col, to_json};
use crate::access::Collection;

impl Record for Badge {
    const COLLECTION: Collection = Collection::Badges;
    const COLUMNS: &'static str = "id, name, description, icon_id, rarity, category, tenant_id, \
        is_global, created_at, updated_at";

    fn id(&self) -> i64 {
        self.id
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Badge {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            icon_id: row.get(3)?,
            rarity: enum_col(row, 4)?,
            category: enum_col(row, 5)?,
            tenant_id: row.get(6)?,
            is_global: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    fn insert(&self, conn: &Connection) -> rusqlite::Result<usize> {
        conn.execute(
            "INSERT INTO badges (name, description, icon_id, rarity, category, tenant_id,
             is_global, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                self.name,
                self.description,
                self.icon_id,
                self.rarity.as_str(),
                self.category.as_str(),
                self.tenant_id,
                self.is_global,
                self.created_at,
                self.updated_at
            ],
        )
    }

    fn update(&self, conn: &Connection) -> rusqlite::Result<usize> {
        conn.execute(
            "UPDATE badges SET name = ?1, description = ?2, icon_id = ?3, rarity = ?4,
             category = ?5, tenant_id = ?6, is_global = ?7, updated_at = ?8 WHERE id = ?9",
            params![
                self.name,
                self.description,
                self.icon_id,
                self.rarity.as_str(),
                self.category.as_str(),
                self.tenant_id,
                self.is_global,
                self.updated_at,
                self.id
            ],
        )
    }
}

impl Record for Achievement {
    const COLLECTION: Collection = Collection::Achievements;
    const COLUMNS: &'static str = "id, name, description, achievement_type, criteria, badge_id, \
        points, secret, tenant_id, is_global, prerequisites, created_at, updated_at";

    fn id(&self) -> i64 {
        self.id
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Achievement {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            achievement_type: enum_col(row, 3)?,
            criteria: json_col(row, 4)?,
            badge_id: row.get(5)?,
            points: row.get(6)?,
            secret: row.get(7)?,
            tenant_id: row.get(8)?,
            is_global: row.get(9)?,
            prerequisites: json_col(row, 10)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
        })
    }

    fn insert(&self, conn: &Connection) -> rusqlite::Result<usize> {
        conn.execute(
            "INSERT INTO achievements (name, description, achievement_type, criteria, badge_id,
             points, secret, tenant_id, is_global, prerequisites, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                self.name,
                self.description,
                self.achievement_type.as_str(),
                to_json(&self.criteria)?,
                self.badge_id,
                self.points,
                self.secret,
                self.tenant_id,
                self.is_global,
                to_json(&self.prerequisites)?,
                self.created_at,
                self.updated_at
            ],
        )
    }

    fn update(&self, conn: &Connection) -> rusqlite::Result<usize> {
        conn.execute(
            "UPDATE achievements SET name = ?1, description = ?2, achievement_type = ?3,
             criteria = ?4, badge_id = ?5, points = ?6, secret = ?7, tenant_id = ?8,
             is_global = ?9, prerequisites = ?10, updated_at = ?11 WHERE id = ?12",
            params![
                self.name,
                self.description,
                self.achievement_type.as_str(),
                to_json(&self.criteria)?,
                self.badge_id,
                self.points,
                self.secret,
                self.tenant_id,
                self.is_global,
                to_json(&self.prerequisites)?,
                self.updated_at,
                self.id
            ],
        )
    }
}

impl Record for Point {
    const COLLECTION: Collection = Collection::Points;
    const COLUMNS: &'static str =
        "id, student_id, point_type, amount, source_type, source_id, metadata, created_at";

    fn id(&self) -> i64 {
        self.id
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Point {
            id: row.get(0)?,
            student_id: row.get(1)?,
            point_type: enum_col(row, 2)?,
            amount: row.get(3)?,
            source: PointSourceRef {
                source_type: enum_col(row, 4)?,
                id: row.get(5)?,
            },
            metadata: opt_json_col(row, 6)?,
            created_at: row.get(7)?,
        })
    }

    fn insert(&self, conn: &Connection) -> rusqlite::Result<usize> {
        let metadata = self.metadata.as_ref().map(to_json).transpose()?;
        conn.execute(
            "INSERT INTO points (student_id, point_type, amount, source_type, source_id,
             metadata, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                self.student_id,
                self.point_type.as_str(),
                self.amount,
                self.source.source_type.as_str(),
                self.source.id,
                metadata,
                self.created_at
            ],
        )
    }

    fn update(&self, conn: &Connection) -> rusqlite::Result<usize> {
        let metadata = self.metadata.as_ref().map(to_json).transpose()?;
        conn.execute(
            "UPDATE points SET student_id = ?1, point_type = ?2, amount = ?3, source_type = ?4,
             source_id = ?5, metadata = ?6 WHERE id = ?7",
            params![
                self.student_id,
                self.point_type.as_str(),
                self.amount,
                self.source.source_type.as_str(),
                self.source.id,
                metadata,
                self.id
            ],
        )
    }
}

impl Record for Streak {
    const COLLECTION: Collection = Collection::Streaks;
    const COLUMNS: &'static str = "id, student_id, streak_type, current_streak, longest_streak, \
        last_activity, next_required, history, created_at, updated_at";

    fn id(&self) -> i64 {
        self.id
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Streak {
            id: row.get(0)?,
            student_id: row.get(1)?,
            streak_type: enum_col(row, 2)?,
            current_streak: row.get(3)?,
            longest_streak: row.get(4)?,
            last_activity: row.get(5)?,
            next_required: row.get(6)?,
            history: json_col(row, 7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    fn insert(&self, conn: &Connection) -> rusqlite::Result<usize> {
        conn.execute(
            "INSERT INTO streaks (student_id, streak_type, current_streak, longest_streak,
             last_activity, next_required, history, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                self.student_id,
                self.streak_type.as_str(),
                self.current_streak,
                self.longest_streak,
                self.last_activity,
                self.next_required,
                to_json(&self.history)?,
                self.created_at,
                self.updated_at
            ],
        )
    }

    fn update(&self, conn: &Connection) -> rusqlite::Result<usize> {
        conn.execute(
            "UPDATE streaks SET student_id = ?1, streak_type = ?2, current_streak = ?3,
             longest_streak = ?4, last_activity = ?5, next_required = ?6, history = ?7,
             updated_at = ?8 WHERE id = ?9",
            params![
                self.student_id,
                self.streak_type.as_str(),
                self.current_streak,
                self.longest_streak,
                self.last_activity,
                self.next_required,
                to_json(&self.history)?,
                self.updated_at,
                self.id
            ],
        )
    }
}

impl Record for Level {
    const COLLECTION: Collection = Collection::Levels;
    const COLUMNS: &'static str = "id, name, level, description, points_required, tenant_id, \
        is_global, icon_id, rewards, created_at, updated_at";

    fn id(&self) -> i64 {
        self.id
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Level {
            id: row.get(0)?,
            name: row.get(1)?,
            level: row.get(2)?,
            description: row.get(3)?,
            points_required: row.get(4)?,
            tenant_id: row.get(5)?,
            is_global: row.get(6)?,
            icon_id: row.get(7)?,
            rewards: json_col(row, 8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }

    fn insert(&self, conn: &Connection) -> rusqlite::Result<usize> {
        conn.execute(
            "INSERT INTO levels (name, level, description, points_required, tenant_id, is_global,
             icon_id, rewards, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                self.name,
                self.level,
                self.description,
                self.points_required,
                self.tenant_id,
                self.is_global,
                self.icon_id,
                to_json(&self.rewards)?,
                self.created_at,
                self.updated_at
            ],
        )
    }

    fn update(&self, conn: &Connection) -> rusqlite::Result<usize> {
        conn.execute(
            "UPDATE levels SET name = ?1, level = ?2, description = ?3, points_required = ?4,
             tenant_id = ?5, is_global = ?6, icon_id = ?7, rewards = ?8, updated_at = ?9
             WHERE id = ?10",
            params![
                self.name,
                self.level,
                self.description,
                self.points_required,
                self.tenant_id,
                self.is_global,
                self.icon_id,
                to_json(&self.rewards)?,
                self.updated_at,
                self.id
            ],
        )
    }
}

impl Record for Leaderboard {
    const COLLECTION: Collection = Collection::Leaderboards;
    const COLUMNS: &'static str = "id, name, tenant_id, is_global, board_type, timeframe, scope, \
        custom_logic, display_limit, refresh_interval, created_at, updated_at";

    fn id(&self) -> i64 {
        self.id
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Leaderboard {
            id: row.get(0)?,
            name: row.get(1)?,
            tenant_id: row.get(2)?,
            is_global: row.get(3)?,
            board_type: enum_col(row, 4)?,
            timeframe: enum_col(row, 5)?,
            scope: json_col(row, 6)?,
            custom_logic: row.get(7)?,
            display_limit: row.get(8)?,
            refresh_interval: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }

    fn insert(&self, conn: &Connection) -> rusqlite::Result<usize> {
        conn.execute(
            "INSERT INTO leaderboards (name, tenant_id, is_global, board_type, timeframe, scope,
             custom_logic, display_limit, refresh_interval, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                self.name,
                self.tenant_id,
                self.is_global,
                self.board_type.as_str(),
                self.timeframe.as_str(),
                to_json(&self.scope)?,
                self.custom_logic,
                self.display_limit,
                self.refresh_interval,
                self.created_at,
                self.updated_at
            ],
        )
    }

    fn update(&self, conn: &Connection) -> rusqlite::Result<usize> {
        conn.execute(
            "UPDATE leaderboards SET name = ?1, tenant_id = ?2, is_global = ?3, board_type = ?4,
             timeframe = ?5, scope = ?6, custom_logic = ?7, display_limit = ?8,
             refresh_interval = ?9, updated_at = ?10 WHERE id = ?11",
            params![
                self.name,
                self.tenant_id,
                self.is_global,
                self.board_type.as_str(),
                self.timeframe.as_str(),
                to_json(&self.scope)?,
                self.custom_logic,
                self.display_limit,
                self.refresh_interval,
                self.updated_at,
                self.id
            ],
        )
    }
}

impl Record for Notification {
    const COLLECTION: Collection = Collection::Notifications;
    const COLUMNS: &'static str = "id, user_id, notification_type, data, created_at, read_at";

    fn id(&self) -> i64 {
        self.id
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Notification {
            id: row.get(0)?,
            user_id: row.get(1)?,
            notification_type: enum_col(row, 2)?,
            data: json_col(row, 3)?,
            created_at: row.get(4)?,
            read_at: row.get(5)?,
        })
    }

    fn insert(&self, conn: &Connection) -> rusqlite::Result<usize> {
        conn.execute(
            "INSERT INTO notifications (user_id, notification_type, data, created_at, read_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                self.user_id,
                self.notification_type.as_str(),
                to_json(&self.data)?,
                self.created_at,
                self.read_at
            ],
        )
    }

    fn update(&self, conn: &Connection) -> rusqlite::Result<usize> {
        conn.execute(
            "UPDATE notifications SET read_at = ?1 WHERE id = ?2",
            params![self.read_at, self.id],
        )
    }
}

impl LmsDb {
    // ── Point ledger ──────────────────────────────────────────────────

    pub fn sum_points(&self, student_id: i64) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT COALESCE(SUM(amount), 0) FROM points WHERE student_id = ?1",
                params![student_id],
                |row| row.get(0),
            )
            .context("Failed to sum points")
    }

    /// Points earned strictly after `since`, optionally of one type.
    pub fn sum_points_since(
        &self,
        student_id: i64,
        since: &str,
        point_type: Option<PointType>,
    ) -> Result<i64> {
        let mut sql = String::from(
            "SELECT COALESCE(SUM(amount), 0) FROM points WHERE student_id = ?1 AND created_at > ?2",
        );
        let mut values: Vec<rusqlite::types::Value> =
            vec![student_id.into(), since.to_string().into()];
        if let Some(pt) = point_type {
            sql.push_str(" AND point_type = ?3");
            values.push(pt.as_str().to_string().into());
        }
        self.conn
            .query_row(&sql, params_from_iter(values.iter()), |row| row.get(0))
            .context("Failed to sum points in window")
    }

    // ── Streaks ───────────────────────────────────────────────────────

    pub fn streak_for(&self, student_id: i64, streak_type: StreakType) -> Result<Option<Streak>> {
        self.find_one(
            &Filters::new()
                .eq("student_id", student_id)
                .eq("streak_type", streak_type.as_str().to_string()),
        )
    }

    /// The student's oldest streak record, whatever its type.
    pub fn first_streak(&self, student_id: i64) -> Result<Option<Streak>> {
        self.find_one(&Filters::new().eq("student_id", student_id))
    }

    // ── Levels ────────────────────────────────────────────────────────

    /// Levels visible to a tenant (its own plus global), lowest first.
    pub fn levels_for_tenant(&self, tenant_id: Option<i64>) -> Result<Vec<Level>> {
        let filters = match tenant_id {
            Some(t) => Filters::new().clause("(tenant_id = ? OR is_global = 1)", t),
            None => Filters::new().raw("is_global = 1"),
        };
        self.find_all(&filters, "points_required, level")
    }

    // ── Unlocks ───────────────────────────────────────────────────────

    pub fn user_achievement(
        &self,
        user_id: i64,
        achievement_id: i64,
    ) -> Result<Option<UserAchievement>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, user_id, achievement_id, completed_at FROM user_achievements
                 WHERE user_id = ?1 AND achievement_id = ?2",
            )
            .context("Failed to prepare user_achievement")?;
        let mut rows = stmt
            .query_map(params![user_id, achievement_id], |row| {
                Ok(UserAchievement {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    achievement_id: row.get(2)?,
                    completed_at: row.get(3)?,
                })
            })
            .context("Failed to query user achievement")?;
        match rows.next() {
            Some(row) => Ok(Some(row.context("Failed to read user achievement row")?)),
            None => Ok(None),
        }
    }

    /// Record an unlock. Returns false when it already existed.
    pub fn insert_user_achievement(
        &self,
        user_id: i64,
        achievement_id: i64,
        at: &str,
    ) -> Result<bool> {
        let affected = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO user_achievements (user_id, achievement_id, completed_at)
                 VALUES (?1, ?2, ?3)",
                params![user_id, achievement_id, at],
            )
            .context("Failed to insert user achievement")?;
        Ok(affected > 0)
    }

    /// Unlocked achievements, newest first.
    pub fn unlocked_achievements(&self, user_id: i64) -> Result<Vec<(Achievement, String)>> {
        let columns = Achievement::COLUMNS
            .split(", ")
            .map(|c| format!("a.{c}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {columns}, ua.completed_at FROM user_achievements ua
             JOIN achievements a ON a.id = ua.achievement_id
             WHERE ua.user_id = ?1 ORDER BY ua.completed_at DESC, ua.id DESC"
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare unlocked_achievements")?;
        let rows = stmt
            .query_map(params![user_id], |row| {
                Ok((Achievement::from_row(row)?, row.get(13)?))
            })
            .context("Failed to query unlocked achievements")?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("Failed to read unlocked achievement row")?);
        }
        Ok(out)
    }

    pub fn unlocked_achievement_ids(&self, user_id: i64) -> Result<Vec<i64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT achievement_id FROM user_achievements WHERE user_id = ?1 ORDER BY id")
            .context("Failed to prepare unlocked_achievement_ids")?;
        let rows = stmt
            .query_map(params![user_id], |row| row.get(0))
            .context("Failed to query unlocked achievement ids")?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row.context("Failed to read unlocked achievement id")?);
        }
        Ok(ids)
    }

    /// Unlocks strictly after `since`, optionally of one achievement type.
    pub fn count_unlocked_since(
        &self,
        user_id: i64,
        since: &str,
        achievement_type: Option<AchievementType>,
    ) -> Result<i64> {
        let mut sql = String::from(
            "SELECT COUNT(*) FROM user_achievements ua JOIN achievements a ON a.id = ua.achievement_id
             WHERE ua.user_id = ?1 AND ua.completed_at > ?2",
        );
        let mut values: Vec<rusqlite::types::Value> =
            vec![user_id.into(), since.to_string().into()];
        if let Some(t) = achievement_type {
            sql.push_str(" AND a.achievement_type = ?3");
            values.push(t.as_str().to_string().into());
        }
        self.conn
            .query_row(&sql, params_from_iter(values.iter()), |row| row.get(0))
            .context("Failed to count unlocked achievements")
    }

    /// Grant a badge. Returns false when the user already held it.
    pub fn award_badge(&self, user_id: i64, badge_id: i64, at: &str) -> Result<bool> {
        let affected = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO user_badges (user_id, badge_id, awarded_at) VALUES (?1, ?2, ?3)",
                params![user_id, badge_id, at],
            )
            .context("Failed to insert user badge")?;
        Ok(affected > 0)
    }

    pub fn user_badges(&self, user_id: i64) -> Result<Vec<UserBadge>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, user_id, badge_id, awarded_at FROM user_badges WHERE user_id = ?1
                 ORDER BY id",
            )
            .context("Failed to prepare user_badges")?;
        let rows = stmt
            .query_map(params![user_id], |row| {
                Ok(UserBadge {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    badge_id: row.get(2)?,
                    awarded_at: row.get(3)?,
                })
            })
            .context("Failed to query user badges")?;
        let mut badges = Vec::new();
        for row in rows {
            badges.push(row.context("Failed to read user badge row")?);
        }
        Ok(badges)
    }

    // ── Notifications ─────────────────────────────────────────────────

    pub fn mark_notification_read(&self, id: i64, at: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE notifications SET read_at = COALESCE(read_at, ?1) WHERE id = ?2",
                params![at, id],
            )
            .context("Failed to mark notification read")?;
        Ok(())
    }
}

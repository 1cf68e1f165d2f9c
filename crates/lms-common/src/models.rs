use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::str_enum;

// ── Enums ─────────────────────────────────────────────────────────────

str_enum! {
    pub enum Role: "role" {
        Admin => "admin",
        Instructor => "instructor",
        Student => "student",
    }
}

str_enum! {
    pub enum TenantStatus: "tenant status" {
        Active => "active",
        Suspended => "suspended",
        Archived => "archived",
    }
}

str_enum! {
    pub enum Theme: "theme" {
        Light => "light",
        Dark => "dark",
        System => "system",
    }
}

str_enum! {
    pub enum PublishStatus: "publish status" {
        Draft => "draft",
        Published => "published",
        Archived => "archived",
    }
}

str_enum! {
    pub enum LessonType: "lesson type" {
        Video => "video",
        Reading => "reading",
        Quiz => "quiz",
        Assignment => "assignment",
        Discussion => "discussion",
    }
}

str_enum! {
    pub enum EnrollmentStatus: "enrollment status" {
        Active => "active",
        Completed => "completed",
        Dropped => "dropped",
        Pending => "pending",
    }
}

str_enum! {
    pub enum ProgressStatus: "progress status" {
        NotStarted => "not_started",
        InProgress => "in_progress",
        Completed => "completed",
    }
}

str_enum! {
    pub enum BadgeRarity: "badge rarity" {
        Common => "common",
        Uncommon => "uncommon",
        Rare => "rare",
        Epic => "epic",
        Legendary => "legendary",
    }
}

str_enum! {
    pub enum BadgeCategory: "badge category" {
        Progress => "progress",
        Performance => "performance",
        Engagement => "engagement",
        Special => "special",
    }
}

str_enum! {
    pub enum AchievementType: "achievement type" {
        CourseProgress => "course_progress",
        QuizScore => "quiz_score",
        Assignment => "assignment",
        Streak => "streak",
        Discussion => "discussion",
        Custom => "custom",
    }
}

str_enum! {
    pub enum Metric: "metric" {
        Count => "count",
        Score => "score",
        Duration => "duration",
        Custom => "custom",
    }
}

str_enum! {
    pub enum Timeframe: "timeframe" {
        AllTime => "all_time",
        Daily => "daily",
        Weekly => "weekly",
        Monthly => "monthly",
    }
}

impl Default for Timeframe {
    fn default() -> Self {
        Self::AllTime
    }
}

str_enum! {
    pub enum PointType: "point type" {
        LessonComplete => "lesson_complete",
        QuizScore => "quiz_score",
        AssignmentSubmit => "assignment_submit",
        DiscussionPost => "discussion_post",
        StreakBonus => "streak_bonus",
        AchievementUnlock => "achievement_unlock",
    }
}

str_enum! {
    /// Collection a point transaction was generated from.
    pub enum PointSource: "point source" {
        Lessons => "lessons",
        Achievements => "achievements",
        Streaks => "streaks",
    }
}

str_enum! {
    pub enum StreakType: "streak type" {
        Login => "login",
        Progress => "progress",
        Quiz => "quiz",
        Assignment => "assignment",
    }
}

str_enum! {
    pub enum ActivityKind: "activity kind" {
        Course => "course",
        Module => "module",
        Lesson => "lesson",
    }
}

str_enum! {
    pub enum LeaderboardType: "leaderboard type" {
        Points => "points",
        Progress => "progress",
        Achievements => "achievements",
        Custom => "custom",
    }
}

str_enum! {
    pub enum PointTypeFilter: "point type filter" {
        All => "all",
        Lesson => "lesson",
        Quiz => "quiz",
        Assignment => "assignment",
    }
}

impl Default for PointTypeFilter {
    fn default() -> Self {
        Self::All
    }
}

impl PointTypeFilter {
    /// Point types counted by this filter; `None` means every type.
    pub fn point_type(&self) -> Option<PointType> {
        match self {
            Self::All => None,
            Self::Lesson => Some(PointType::LessonComplete),
            Self::Quiz => Some(PointType::QuizScore),
            Self::Assignment => Some(PointType::AssignmentSubmit),
        }
    }
}

str_enum! {
    pub enum AchievementTypeFilter: "achievement type filter" {
        All => "all",
        Course => "course",
        Quiz => "quiz",
        Streak => "streak",
    }
}

impl Default for AchievementTypeFilter {
    fn default() -> Self {
        Self::All
    }
}

impl AchievementTypeFilter {
    pub fn achievement_type(&self) -> Option<AchievementType> {
        match self {
            Self::All => None,
            Self::Course => Some(AchievementType::CourseProgress),
            Self::Quiz => Some(AchievementType::QuizScore),
            Self::Streak => Some(AchievementType::Streak),
        }
    }
}

str_enum! {
    pub enum NotificationType: "notification type" {
        AchievementUnlocked => "achievement_unlocked",
        BadgeAwarded => "badge_awarded",
        LevelUp => "level_up",
        PointsAwarded => "points_awarded",
        StreakMilestone => "streak_milestone",
    }
}

str_enum! {
    pub enum CompletionCriteriaType: "completion criteria" {
        AllLessons => "all_lessons",
        MinScore => "min_score",
        Custom => "custom",
    }
}

str_enum! {
    pub enum RewardType: "reward type" {
        Badge => "badge",
        Feature => "feature",
        Custom => "custom",
    }
}

// ── System collections ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TenantSettings {
    #[serde(default = "default_theme")]
    pub theme: Theme,
    #[serde(default)]
    pub logo_id: Option<i64>,
}

fn default_theme() -> Theme {
    Theme::System
}

impl Default for Theme {
    fn default() -> Self {
        default_theme()
    }
}

impl Default for TenantSettings {
    fn default() -> Self {
        Self {
            theme: Theme::System,
            logo_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub domain: Option<String>,
    pub status: TenantStatus,
    pub settings: TenantSettings,
    pub created_at: String,
    pub updated_at: String,
}

/// A user as exposed over the API. Credentials never leave the storage layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub tenant_id: Option<i64>,
    pub avatar_id: Option<i64>,
    pub verified: bool,
    pub last_active: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmailNotifications {
    #[serde(default = "yes")]
    pub assignments: bool,
    #[serde(default = "yes")]
    pub course_updates: bool,
    #[serde(default = "yes")]
    pub achievements: bool,
}

impl Default for EmailNotifications {
    fn default() -> Self {
        Self {
            assignments: true,
            course_updates: true,
            achievements: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StudentPreferences {
    #[serde(default = "default_theme")]
    pub theme: Theme,
    #[serde(default)]
    pub email_notifications: EmailNotifications,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentSettings {
    pub id: i64,
    pub user_id: i64,
    pub preferences: StudentPreferences,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Media {
    pub id: i64,
    pub filename: String,
    pub mime_type: String,
    pub filesize: i64,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub url: String,
    pub thumbnail_url: Option<String>,
    pub alt: Option<String>,
    pub tenant_id: Option<i64>,
    pub is_global: bool,
    pub created_at: String,
    pub updated_at: String,
}

// ── Learning collections ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Duration {
    #[serde(default)]
    pub hours: u32,
    #[serde(default)]
    pub minutes: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Schedule {
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub enrollment_deadline: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CourseSettings {
    #[serde(default = "yes")]
    pub allow_late_submissions: bool,
    #[serde(default = "yes")]
    pub require_prerequisites: bool,
    #[serde(default = "yes")]
    pub show_progress: bool,
}

impl Default for CourseSettings {
    fn default() -> Self {
        Self {
            allow_late_submissions: true,
            require_prerequisites: true,
            show_progress: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnrollmentSettings {
    /// Maximum active enrollments; 0 means unlimited.
    #[serde(default)]
    pub capacity: u32,
    #[serde(default = "yes")]
    pub allow_self_enrollment: bool,
    #[serde(default = "yes")]
    pub require_prerequisite_completion: bool,
    #[serde(default)]
    pub enrollment_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub enrollment_end: Option<DateTime<Utc>>,
}

impl Default for EnrollmentSettings {
    fn default() -> Self {
        Self {
            capacity: 0,
            allow_self_enrollment: true,
            require_prerequisite_completion: true,
            enrollment_start: None,
            enrollment_end: None,
        }
    }
}

fn yes() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Course {
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub description: String,
    pub tenant_id: Option<i64>,
    pub is_global: bool,
    pub instructor_id: i64,
    pub thumbnail_id: Option<i64>,
    pub status: PublishStatus,
    pub duration: Duration,
    pub schedule: Schedule,
    pub settings: CourseSettings,
    pub enrollment: EnrollmentSettings,
    pub prerequisites: Vec<i64>,
    pub created_at: String,
    pub updated_at: String,
    pub published_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletionCriteria {
    #[serde(rename = "type")]
    pub criteria_type: CompletionCriteriaType,
    #[serde(default)]
    pub minimum_score: Option<u32>,
    #[serde(default)]
    pub custom_rule: Option<String>,
}

impl Default for CompletionCriteria {
    fn default() -> Self {
        Self {
            criteria_type: CompletionCriteriaType::AllLessons,
            minimum_score: None,
            custom_rule: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub course_id: i64,
    pub order: i64,
    pub status: PublishStatus,
    pub duration: Duration,
    pub completion_criteria: CompletionCriteria,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuizOption {
    pub text: String,
    pub correct: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuizQuestion {
    pub question: String,
    /// One of `multiple`, `boolean`, `text`.
    #[serde(rename = "type")]
    pub question_type: String,
    #[serde(default)]
    pub options: Vec<QuizOption>,
    #[serde(default)]
    pub answer: Option<String>,
    pub points: u32,
    #[serde(default)]
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuizSettings {
    #[serde(default)]
    pub time_limit: Option<u32>,
    #[serde(default = "one")]
    pub attempts: u32,
    #[serde(default = "seventy")]
    pub passing_score: u32,
    #[serde(default)]
    pub randomize_questions: bool,
    #[serde(default = "after_submit")]
    pub show_correct_answers: String,
}

fn one() -> u32 {
    1
}

fn seventy() -> u32 {
    70
}

fn after_submit() -> String {
    "after_submit".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RubricCriterion {
    pub criterion: String,
    pub points: u32,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscussionSettings {
    #[serde(default = "yes")]
    pub require_response: bool,
    #[serde(default = "two")]
    pub require_replies: u32,
    #[serde(default)]
    pub minimum_words: Option<u32>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
}

fn two() -> u32 {
    2
}

/// Type-specific lesson payload. The tag must agree with the lesson's type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LessonContent {
    Video {
        url: String,
        /// Minutes.
        duration: u32,
        #[serde(default)]
        transcript: Option<String>,
    },
    Reading {
        body: String,
    },
    Quiz {
        questions: Vec<QuizQuestion>,
        settings: QuizSettings,
    },
    Assignment {
        instructions: String,
        due_date: DateTime<Utc>,
        points: u32,
        #[serde(default)]
        rubric: Vec<RubricCriterion>,
        #[serde(default)]
        allowed_file_types: Vec<String>,
    },
    Discussion {
        prompt: String,
        #[serde(default)]
        guidelines: Vec<String>,
        settings: DiscussionSettings,
    },
}

impl LessonContent {
    pub fn lesson_type(&self) -> LessonType {
        match self {
            Self::Video { .. } => LessonType::Video,
            Self::Reading { .. } => LessonType::Reading,
            Self::Quiz { .. } => LessonType::Quiz,
            Self::Assignment { .. } => LessonType::Assignment,
            Self::Discussion { .. } => LessonType::Discussion,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lesson {
    pub id: i64,
    pub title: String,
    pub module_id: i64,
    pub order: i64,
    pub lesson_type: LessonType,
    pub description: Option<String>,
    pub status: PublishStatus,
    pub content: Option<LessonContent>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: i64,
    pub student_id: i64,
    pub course_id: i64,
    pub status: EnrollmentStatus,
    pub enrolled_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub dropped_at: Option<String>,
    pub expires_at: Option<String>,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuizAttempt {
    pub lesson_id: i64,
    pub score: f64,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscussionEntry {
    pub lesson_id: i64,
    pub participated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssignmentSubmission {
    pub lesson_id: i64,
    #[serde(default)]
    pub grade: Option<f64>,
    #[serde(default)]
    pub feedback: Option<String>,
    pub submitted_at: DateTime<Utc>,
    #[serde(default)]
    pub graded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModuleProgress {
    pub module_id: i64,
    pub status: ProgressStatus,
    pub progress: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Progress {
    pub id: i64,
    pub student_id: i64,
    pub course_id: i64,
    pub status: ProgressStatus,
    /// Percentage, 0..=100.
    pub overall_progress: i64,
    /// Points earned in this course.
    pub points_earned: i64,
    /// Points earned across all courses.
    pub total_points: i64,
    pub is_global: bool,
    pub completed_lessons: Vec<i64>,
    pub module_progress: Vec<ModuleProgress>,
    pub quiz_attempts: Vec<QuizAttempt>,
    pub discussions: Vec<DiscussionEntry>,
    pub assignments: Vec<AssignmentSubmission>,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub last_accessed: String,
    pub created_at: String,
    pub updated_at: String,
}

// ── Gamification collections ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Badge {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub icon_id: Option<i64>,
    pub rarity: BadgeRarity,
    pub category: BadgeCategory,
    pub tenant_id: Option<i64>,
    pub is_global: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AchievementCriteria {
    pub metric: Metric,
    pub threshold: f64,
    #[serde(default)]
    pub timeframe: Timeframe,
    #[serde(default)]
    pub custom_rule: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Achievement {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub achievement_type: AchievementType,
    pub criteria: AchievementCriteria,
    pub badge_id: i64,
    pub points: i64,
    pub secret: bool,
    pub tenant_id: Option<i64>,
    pub is_global: bool,
    /// Achievements that must be unlocked before this one can be.
    pub prerequisites: Vec<i64>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PointSourceRef {
    #[serde(rename = "type")]
    pub source_type: PointSource,
    pub id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Point {
    pub id: i64,
    pub student_id: i64,
    pub point_type: PointType,
    pub amount: i64,
    pub source: PointSourceRef,
    pub metadata: Option<serde_json::Value>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreakHistoryEntry {
    pub date: DateTime<Utc>,
    pub activity_kind: ActivityKind,
    pub activity_id: i64,
    pub points: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Streak {
    pub id: i64,
    pub student_id: i64,
    pub streak_type: StreakType,
    pub current_streak: i64,
    pub longest_streak: i64,
    pub last_activity: String,
    pub next_required: String,
    pub history: Vec<StreakHistoryEntry>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LevelReward {
    #[serde(rename = "type")]
    pub reward_type: RewardType,
    #[serde(default)]
    pub badge_id: Option<i64>,
    #[serde(default)]
    pub feature: Option<String>,
    #[serde(default)]
    pub custom_data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Level {
    pub id: i64,
    pub name: String,
    pub level: i64,
    pub description: Option<String>,
    pub points_required: i64,
    pub tenant_id: Option<i64>,
    pub is_global: bool,
    pub icon_id: Option<i64>,
    pub rewards: Vec<LevelReward>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LeaderboardScope {
    #[serde(default)]
    pub course_id: Option<i64>,
    #[serde(default)]
    pub point_type: PointTypeFilter,
    #[serde(default)]
    pub achievement_type: AchievementTypeFilter,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Leaderboard {
    pub id: i64,
    pub name: String,
    pub tenant_id: Option<i64>,
    pub is_global: bool,
    pub board_type: LeaderboardType,
    pub timeframe: Timeframe,
    pub scope: LeaderboardScope,
    pub custom_logic: Option<String>,
    pub display_limit: i64,
    /// Seconds.
    pub refresh_interval: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub user_id: i64,
    pub notification_type: NotificationType,
    pub data: serde_json::Value,
    pub created_at: String,
    pub read_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAchievement {
    pub id: i64,
    pub user_id: i64,
    pub achievement_id: i64,
    pub completed_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserBadge {
    pub id: i64,
    pub user_id: i64,
    pub badge_id: i64,
    pub awarded_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn achievement_type_parses_snake_case() {
        assert_eq!(
            AchievementType::from_str("course_progress").unwrap(),
            AchievementType::CourseProgress
        );
        assert_eq!(AchievementType::QuizScore.as_str(), "quiz_score");
    }

    #[test]
    fn unknown_enum_value_names_the_kind() {
        let err = Metric::from_str("velocity").unwrap_err();
        assert_eq!(err.to_string(), "Invalid metric: velocity");
    }

    #[test]
    fn serde_names_match_as_str() {
        for tf in Timeframe::ALL {
            let json = serde_json::to_string(tf).unwrap();
            assert_eq!(json, format!("\"{}\"", tf.as_str()));
        }
        for pt in PointType::ALL {
            let json = serde_json::to_string(pt).unwrap();
            assert_eq!(json, format!("\"{}\"", pt.as_str()));
        }
    }

    #[test]
    fn criteria_timeframe_defaults_to_all_time() {
        let criteria: AchievementCriteria =
            serde_json::from_str(r#"{"metric":"count","threshold":3}"#).unwrap();
        assert_eq!(criteria.timeframe, Timeframe::AllTime);
        assert!(criteria.custom_rule.is_none());
    }

    #[test]
    fn student_preferences_default_to_system_theme() {
        let prefs = StudentPreferences::default();
        assert_eq!(prefs.theme, Theme::System);
        assert!(prefs.email_notifications.achievements);

        let parsed: StudentPreferences = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed, prefs);
    }

    #[test]
    fn lesson_content_tag_reports_type() {
        let content: LessonContent = serde_json::from_value(serde_json::json!({
            "type": "video",
            "url": "https://video.example/intro",
            "duration": 12
        }))
        .unwrap();
        assert_eq!(content.lesson_type(), LessonType::Video);
    }

    #[test]
    fn point_filter_maps_to_point_type() {
        assert_eq!(PointTypeFilter::All.point_type(), None);
        assert_eq!(
            PointTypeFilter::Quiz.point_type(),
            Some(PointType::QuizScore)
        );
        assert_eq!(
            AchievementTypeFilter::Course.achievement_type(),
            Some(AchievementType::CourseProgress)
        );
    }
}

//! The point ledger. Only the system writes points; every award cascades
//! into the student's progress totals and may raise their level.

use lms_common::models::{NotificationType, Point, PointSource, PointSourceRef, PointType};
use lms_common::time::now_ts;
use serde_json::json;
use tracing::{info, warn};

use crate::context::Ctx;
use crate::errors::{LmsError, LmsResult};
use crate::{levels, notifications};

/// One point transaction to record.
#[derive(Debug, Clone)]
pub struct PointAward {
    pub student_id: i64,
    pub point_type: PointType,
    pub amount: i64,
    pub source: PointSourceRef,
    pub metadata: Option<serde_json::Value>,
}

/// Insert a point transaction and cascade it.
///
/// The source's course (lessons only) receives the amount in
/// `points_earned`; every progress record of the student receives it in
/// `total_points`.
pub fn award_points(ctx: Ctx<'_>, award: PointAward) -> LmsResult<Point> {
    if award.amount < 0 {
        return Err(LmsError::validation("Point amount cannot be negative"));
    }
    let db = ctx.db;
    let before = db.sum_points(award.student_id)?;
    let now = now_ts();

    let point = db
        .create(&Point {
            id: 0,
            student_id: award.student_id,
            point_type: award.point_type,
            amount: award.amount,
            source: award.source,
            metadata: award.metadata,
            created_at: now.clone(),
        })
        .map_err(LmsError::from_storage)?;

    let course_id = match point.source.source_type {
        PointSource::Lessons => db.course_for_lesson(point.source.id)?,
        PointSource::Achievements | PointSource::Streaks => None,
    };
    match course_id {
        Some(course_id) => match db.progress_for(point.student_id, course_id)? {
            Some(progress) => db.add_points_earned(progress.id, point.amount, &now)?,
            None => warn!(
                student_id = point.student_id,
                course_id, "no progress record for student and course"
            ),
        },
        None => warn!(
            point_id = point.id,
            source = point.source.source_type.as_str(),
            "no course found for point source"
        ),
    }
    db.add_total_points(point.student_id, point.amount, &now)?;

    info!(
        student_id = point.student_id,
        kind = point.point_type.as_str(),
        amount = point.amount,
        "points awarded"
    );
    notifications::create_notification(
        ctx,
        point.student_id,
        NotificationType::PointsAwarded,
        json!({
            "point_id": point.id,
            "type": point.point_type,
            "amount": point.amount,
            "source": point.source,
        }),
    )?;

    levels::on_points_changed(ctx, point.student_id, before, before + point.amount)?;
    Ok(point)
}

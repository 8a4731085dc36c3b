use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{FromRow, SqlitePool};

use crate::{
    domain::Course,
    error::{AppError, Result},
    repository::CourseRepository,
};

#[derive(FromRow)]
struct CourseRow {
    id: i64,
    teacher_id: i64,
    name: String,
    year_month: String,
    fee: f64,
    created_at: NaiveDateTime,
}

pub struct SqliteCourseRepository {
    pool: SqlitePool,
}

impl SqliteCourseRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_course(row: CourseRow) -> Course {
        Course {
            id: row.id,
            teacher_id: row.teacher_id,
            name: row.name,
            year_month: row.year_month,
            fee: row.fee,
            created_at: DateTime::from_naive_utc_and_offset(row.created_at, Utc),
        }
    }
}

#[async_trait]
impl CourseRepository for SqliteCourseRepository {
    async fn find_by_id(&self, id: i64) -> Result<Option<Course>> {
        let row = sqlx::query_as::<_, CourseRow>(
            "SELECT id, teacher_id, name, year_month, fee, created_at \
             FROM courses WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(row.map(Self::row_to_course))
    }

    async fn list_student_ids(&self, course_id: i64) -> Result<Vec<i64>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT student_id FROM course_students WHERE course_id = ? ORDER BY student_id",
        )
        .bind(course_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(ids)
    }
}

use std::collections::HashMap;

use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::dto::pagination::{Page, Paged};
use crate::dto::question_dto::{QuestionListQuery, QuestionPayload, QuestionResponse};
use crate::error::{Error, Result};
use crate::models::level::{Level, LevelMap};
use crate::models::option_set::OptionIdSet;
use crate::models::question::{Question, QuestionOption};
use crate::services::sampling_service::PoolQuestion;

#[derive(Clone)]
pub struct QuestionService {
    pool: PgPool,
}

impl QuestionService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, payload: QuestionPayload) -> Result<QuestionResponse> {
        payload.check()?;
        let mut tx = self.pool.begin().await?;

        let question = sqlx::query_as::<_, Question>(
            r#"
            INSERT INTO questions (text, level, allow_multiple)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(payload.text.trim())
        .bind(payload.level.as_str())
        .bind(payload.allow_multiple)
        .fetch_one(&mut *tx)
        .await?;

        for (position, option) in payload.options.iter().enumerate() {
            sqlx::query(
                r#"INSERT INTO question_options (question_id, text, is_correct, position) VALUES ($1, $2, $3, $4)"#,
            )
            .bind(question.id)
            .bind(option.text.trim())
            .bind(option.is_correct)
            .bind(position as i32)
            .execute(&mut *tx)
            .await?;
        }

        let options = Self::options_for(&mut *tx, question.id).await?;
        tx.commit().await?;

        tracing::info!(question_id = %question.id, level = %payload.level, "question created");
        Ok(QuestionResponse::new(question, options))
    }

    pub async fn get(&self, id: Uuid) -> Result<QuestionResponse> {
        let question = sqlx::query_as::<_, Question>(r#"SELECT * FROM questions WHERE id = $1"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound("Question not found".into()))?;
        let mut conn = self.pool.acquire().await?;
        let options = Self::options_for(&mut *conn, id).await?;
        Ok(QuestionResponse::new(question, options))
    }

    pub async fn list(&self, query: &QuestionListQuery) -> Result<Paged<QuestionResponse>> {
        let page = Page::new(query.page, query.page_size);
        let level = query.level.map(|l| l.as_str());
        let include_archived = query.include_archived.unwrap_or(false);

        let rows = sqlx::query_as::<_, Question>(
            r#"
            SELECT * FROM questions
            WHERE ($1::text IS NULL OR level = $1)
              AND ($2 OR archived = FALSE)
            ORDER BY created_at DESC, id DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(level)
        .bind(include_archived)
        .bind(page.page_size)
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar(
            r#"SELECT COUNT(*) FROM questions WHERE ($1::text IS NULL OR level = $1) AND ($2 OR archived = FALSE)"#,
        )
        .bind(level)
        .bind(include_archived)
        .fetch_one(&self.pool)
        .await?;

        let ids: Vec<Uuid> = rows.iter().map(|q| q.id).collect();
        let mut by_question = self.options_by_question(&ids).await?;
        let items = rows
            .into_iter()
            .map(|q| {
                let options = by_question.remove(&q.id).unwrap_or_default();
                QuestionResponse::new(q, options)
            })
            .collect();

        Ok(Paged::new(items, page, total))
    }

    /// Replaces text, level and flags. Options carrying an id of this question
    /// are edited in place, others are inserted, omitted ones are removed.
    /// Attempts already holding this question keep their frozen snapshots.
    pub async fn update(&self, id: Uuid, payload: QuestionPayload) -> Result<QuestionResponse> {
        payload.check()?;
        let mut tx = self.pool.begin().await?;

        let question = sqlx::query_as::<_, Question>(
            r#"
            UPDATE questions
            SET text = $2, level = $3, allow_multiple = $4, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(payload.text.trim())
        .bind(payload.level.as_str())
        .bind(payload.allow_multiple)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| Error::NotFound("Question not found".into()))?;

        let existing: Vec<Uuid> =
            sqlx::query_scalar(r#"SELECT id FROM question_options WHERE question_id = $1"#)
                .bind(id)
                .fetch_all(&mut *tx)
                .await?;

        let mut kept: Vec<Uuid> = Vec::new();
        for (position, option) in payload.options.iter().enumerate() {
            match option.id.filter(|oid| existing.contains(oid)) {
                Some(option_id) => {
                    sqlx::query(
                        r#"UPDATE question_options SET text = $2, is_correct = $3, position = $4 WHERE id = $1"#,
                    )
                    .bind(option_id)
                    .bind(option.text.trim())
                    .bind(option.is_correct)
                    .bind(position as i32)
                    .execute(&mut *tx)
                    .await?;
                    kept.push(option_id);
                }
                None => {
                    let new_id: Uuid = sqlx::query_scalar(
                        r#"INSERT INTO question_options (question_id, text, is_correct, position) VALUES ($1, $2, $3, $4) RETURNING id"#,
                    )
                    .bind(id)
                    .bind(option.text.trim())
                    .bind(option.is_correct)
                    .bind(position as i32)
                    .fetch_one(&mut *tx)
                    .await?;
                    kept.push(new_id);
                }
            }
        }

        sqlx::query(r#"DELETE FROM question_options WHERE question_id = $1 AND id <> ALL($2)"#)
            .bind(id)
            .bind(&kept[..])
            .execute(&mut *tx)
            .await?;

        let options = Self::options_for(&mut *tx, id).await?;
        tx.commit().await?;

        tracing::info!(question_id = %id, "question updated");
        Ok(QuestionResponse::new(question, options))
    }

    /// Archived questions are never sampled again.
    pub async fn archive(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query(
            r#"UPDATE questions SET archived = TRUE, updated_at = NOW() WHERE id = $1"#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound("Question not found".into()));
        }
        tracing::info!(question_id = %id, "question archived");
        Ok(())
    }

    pub async fn available_by_level(&self) -> Result<LevelMap<i64>> {
        let mut conn = self.pool.acquire().await?;
        Self::count_available(&mut *conn).await
    }

    pub async fn count_available(conn: &mut PgConnection) -> Result<LevelMap<i64>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"SELECT level, COUNT(*) FROM questions WHERE archived = FALSE GROUP BY level"#,
        )
        .fetch_all(&mut *conn)
        .await?;

        let mut counts = LevelMap::default();
        for (level, count) in rows {
            let level: Level = level.parse().map_err(Error::Internal)?;
            *counts.get_mut(level) = count;
        }
        Ok(counts)
    }

    /// Current non-archived questions with option ids and correct subsets,
    /// grouped by level, ready for sampling.
    pub async fn sampling_pool(conn: &mut PgConnection) -> Result<LevelMap<Vec<PoolQuestion>>> {
        let questions = sqlx::query_as::<_, Question>(
            r#"SELECT * FROM questions WHERE archived = FALSE ORDER BY created_at, id"#,
        )
        .fetch_all(&mut *conn)
        .await?;

        let options = sqlx::query_as::<_, QuestionOption>(
            r#"
            SELECT o.* FROM question_options o
            JOIN questions q ON q.id = o.question_id
            WHERE q.archived = FALSE
            ORDER BY o.question_id, o.position
            "#,
        )
        .fetch_all(&mut *conn)
        .await?;

        let mut option_sets: HashMap<Uuid, (OptionIdSet, OptionIdSet)> = HashMap::new();
        for option in options {
            let entry = option_sets.entry(option.question_id).or_default();
            let id = option.id.to_string();
            if option.is_correct {
                entry.1.insert(id.clone());
            }
            entry.0.insert(id);
        }

        let mut pool: LevelMap<Vec<PoolQuestion>> = LevelMap::default();
        for question in questions {
            let level = question.level()?;
            let (option_ids, correct_option_ids) =
                option_sets.remove(&question.id).unwrap_or_default();
            pool.get_mut(level).push(PoolQuestion {
                question_id: question.id,
                allow_multiple: question.allow_multiple,
                option_ids,
                correct_option_ids,
            });
        }
        Ok(pool)
    }

    pub async fn options_by_question(
        &self,
        question_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Vec<QuestionOption>>> {
        if question_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = sqlx::query_as::<_, QuestionOption>(
            r#"SELECT * FROM question_options WHERE question_id = ANY($1) ORDER BY question_id, position"#,
        )
        .bind(question_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut grouped: HashMap<Uuid, Vec<QuestionOption>> = HashMap::new();
        for row in rows {
            grouped.entry(row.question_id).or_default().push(row);
        }
        Ok(grouped)
    }

    async fn options_for(conn: &mut PgConnection, question_id: Uuid) -> Result<Vec<QuestionOption>> {
        let rows = sqlx::query_as::<_, QuestionOption>(
            r#"SELECT * FROM question_options WHERE question_id = $1 ORDER BY position"#,
        )
        .bind(question_id)
        .fetch_all(&mut *conn)
        .await?;
        Ok(rows)
    }
}

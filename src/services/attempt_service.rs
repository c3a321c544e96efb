use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::dto::attempt_dto::{
    AttemptItemView, AttemptResultResponse, AttemptStateResponse, AttemptSummary,
    ItemOptionView, SubmitAttemptResponse,
};
use crate::dto::pagination::{Page, Paged};
use crate::error::{Error, Result};
use crate::models::attempt::{Attempt, AttemptItem, AttemptStatus};
use crate::models::level::{Level, LevelMap};
use crate::models::option_set::OptionIdSet;
use crate::models::question::QuestionOption;
use crate::models::settings::TestSettings;
use crate::services::clock::Clock;
use crate::services::grading_service::GradingService;
use crate::services::question_service::QuestionService;
use crate::services::sampling_service::SamplingService;
use crate::utils::time::{is_expired, remaining_seconds};

/// Owns the attempt state machine: start, answer capture, submission and
/// result lookup. Every operation is scoped to the owning candidate.
#[derive(Clone)]
pub struct AttemptService {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl AttemptService {
    pub fn new(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    pub async fn find_owned(&self, attempt_id: Uuid, user_id: Uuid) -> Result<Attempt> {
        sqlx::query_as::<_, Attempt>(r#"SELECT * FROM attempts WHERE id = $1 AND user_id = $2"#)
            .bind(attempt_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound("Attempt not found".into()))
    }

    async fn lock_owned(conn: &mut PgConnection, attempt_id: Uuid, user_id: Uuid) -> Result<Attempt> {
        sqlx::query_as::<_, Attempt>(
            r#"SELECT * FROM attempts WHERE id = $1 AND user_id = $2 FOR UPDATE"#,
        )
        .bind(attempt_id)
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| Error::NotFound("Attempt not found".into()))
    }

    /// Shared lock: captures run side by side but wait for a submission
    /// holding the row, and a submission waits for captures to commit.
    async fn lock_owned_shared(conn: &mut PgConnection, attempt_id: Uuid, user_id: Uuid) -> Result<Attempt> {
        sqlx::query_as::<_, Attempt>(
            r#"SELECT * FROM attempts WHERE id = $1 AND user_id = $2 FOR SHARE"#,
        )
        .bind(attempt_id)
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| Error::NotFound("Attempt not found".into()))
    }

    pub async fn list_for_user(&self, user_id: Uuid, page: Page) -> Result<Paged<AttemptSummary>> {
        let rows = sqlx::query_as::<_, Attempt>(
            r#"
            SELECT * FROM attempts
            WHERE user_id = $1
            ORDER BY paid_at DESC NULLS LAST, started_at DESC NULLS LAST, id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(page.page_size)
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar(r#"SELECT COUNT(*) FROM attempts WHERE user_id = $1"#)
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(Paged::new(
            rows.into_iter().map(AttemptSummary::from).collect(),
            page,
            total,
        ))
    }

    /// Direct start for deployments without payment gating. Resumes the
    /// candidate's in-progress attempt when there is one.
    pub async fn start_unpaid(
        &self,
        user_id: Uuid,
        settings: &TestSettings,
        require_payment: bool,
    ) -> Result<Attempt> {
        if require_payment {
            return Err(Error::Conflict(
                "Payment is required before starting a test".into(),
            ));
        }

        let mut tx = self.pool.begin().await?;
        // Serialises concurrent starts for one candidate.
        sqlx::query_scalar::<_, Uuid>(r#"SELECT id FROM users WHERE id = $1 FOR UPDATE"#)
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| Error::NotFound("User not found".into()))?;

        let in_progress = sqlx::query_as::<_, Attempt>(
            r#"
            SELECT * FROM attempts
            WHERE user_id = $1 AND status = 'IN_PROGRESS'
            ORDER BY started_at DESC
            LIMIT 1
            FOR UPDATE
            "#,
        )
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;

        let attempt = match in_progress {
            Some(existing) => existing,
            None => {
                sqlx::query_as::<_, Attempt>(
                    r#"
                    INSERT INTO attempts (user_id, status, payment_status)
                    VALUES ($1, 'AWAITING_START', 'NOT_REQUIRED')
                    RETURNING *
                    "#,
                )
                .bind(user_id)
                .fetch_one(&mut *tx)
                .await?
            }
        };

        let started = Self::start_locked(&mut *tx, attempt, &settings.quotas, self.clock.as_ref()).await?;
        tx.commit().await?;
        Ok(started)
    }

    /// Starts the attempt created for a completed checkout session.
    pub async fn claim(
        &self,
        user_id: Uuid,
        stripe_session_id: &str,
        settings: &TestSettings,
    ) -> Result<Attempt> {
        let owner: Option<(Uuid, Uuid)> = sqlx::query_as(
            r#"SELECT id, user_id FROM attempts WHERE stripe_session_id = $1"#,
        )
        .bind(stripe_session_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some((attempt_id, owner_id)) = owner else {
            return Err(Error::Conflict(
                "not_ready: payment has not been confirmed yet".into(),
            ));
        };
        if owner_id != user_id {
            tracing::warn!(%attempt_id, %user_id, "claim of another candidate's checkout session");
            return Err(Error::Forbidden("This checkout belongs to another account".into()));
        }
        self.begin(user_id, attempt_id, settings).await
    }

    /// `AWAITING_START -> IN_PROGRESS`. Repeating the call on an attempt that
    /// is already in progress returns it unchanged.
    pub async fn begin(&self, user_id: Uuid, attempt_id: Uuid, settings: &TestSettings) -> Result<Attempt> {
        let mut tx = self.pool.begin().await?;
        let attempt = Self::lock_owned(&mut *tx, attempt_id, user_id).await?;
        let started = Self::start_locked(&mut *tx, attempt, &settings.quotas, self.clock.as_ref()).await?;
        tx.commit().await?;
        Ok(started)
    }

    async fn start_locked(
        conn: &mut PgConnection,
        attempt: Attempt,
        quotas: &LevelMap<i32>,
        clock: &dyn Clock,
    ) -> Result<Attempt> {
        match attempt.status()? {
            AttemptStatus::Submitted => Err(Error::Conflict("Attempt already submitted".into())),
            AttemptStatus::InProgress => {
                Self::populate_items_if_absent(conn, attempt.id, quotas).await?;
                Ok(attempt)
            }
            AttemptStatus::AwaitingStart => {
                if !attempt.payment_status()?.allows_start() {
                    return Err(Error::Conflict(
                        "Payment has not been confirmed for this attempt".into(),
                    ));
                }
                let created = Self::populate_items_if_absent(conn, attempt.id, quotas).await?;

                let started = sqlx::query_as::<_, Attempt>(
                    r#"
                    UPDATE attempts
                    SET status = 'IN_PROGRESS', started_at = COALESCE(started_at, $2), updated_at = NOW()
                    WHERE id = $1 AND status = 'AWAITING_START'
                    RETURNING *
                    "#,
                )
                .bind(attempt.id)
                .bind(clock.now())
                .fetch_optional(&mut *conn)
                .await?
                .ok_or_else(|| Error::Conflict("Attempt is no longer awaiting start".into()))?;

                tracing::info!(attempt_id = %started.id, user_id = %started.user_id, items = created, "attempt started");
                Ok(started)
            }
        }
    }

    /// Samples and inserts items unless the attempt already has some.
    /// Returns how many items were created by this call.
    pub async fn populate_items_if_absent(
        conn: &mut PgConnection,
        attempt_id: Uuid,
        quotas: &LevelMap<i32>,
    ) -> Result<usize> {
        let existing: i64 =
            sqlx::query_scalar(r#"SELECT COUNT(*) FROM attempt_items WHERE attempt_id = $1"#)
                .bind(attempt_id)
                .fetch_one(&mut *conn)
                .await?;
        if existing > 0 {
            return Ok(0);
        }

        let pool = QuestionService::sampling_pool(&mut *conn).await?;
        let plan = {
            let mut rng = rand::thread_rng();
            SamplingService::plan(&pool, quotas, &mut rng)?
        };

        for item in &plan {
            sqlx::query(
                r#"
                INSERT INTO attempt_items
                    (attempt_id, question_id, level, allow_multiple, option_ids, correct_option_ids, position)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (attempt_id, position) DO NOTHING
                "#,
            )
            .bind(attempt_id)
            .bind(item.question.question_id)
            .bind(item.level.as_str())
            .bind(item.question.allow_multiple)
            .bind(Json(&item.question.option_ids))
            .bind(Json(&item.question.correct_option_ids))
            .bind(item.position)
            .execute(&mut *conn)
            .await?;
        }
        Ok(plan.len())
    }

    /// Current state for the candidate. An in-progress attempt whose time is
    /// up is submitted before the state is returned.
    pub async fn get_state(
        &self,
        user_id: Uuid,
        attempt_id: Uuid,
        settings: &TestSettings,
    ) -> Result<AttemptStateResponse> {
        let mut attempt = self.find_owned(attempt_id, user_id).await?;
        let now = self.clock.now();

        if self.enforce_deadline(&attempt, settings, now).await? {
            attempt = self.find_owned(attempt_id, user_id).await?;
        }

        let remaining = match (attempt.status()?, attempt.started_at) {
            (AttemptStatus::InProgress, Some(started)) => {
                Some(remaining_seconds(settings.duration_min, started, now))
            }
            _ => None,
        };
        let items = self.item_views(attempt.id).await?;

        Ok(AttemptStateResponse {
            id: attempt.id,
            status: attempt.status,
            level: attempt.level,
            duration_min: settings.duration_min,
            started_at: attempt.started_at,
            finished_at: attempt.finished_at,
            remaining_seconds: remaining,
            items,
        })
    }

    /// Forces submission of an overdue in-progress attempt. Returns true when
    /// the attempt was (or concurrently got) submitted by this check.
    async fn enforce_deadline(
        &self,
        attempt: &Attempt,
        settings: &TestSettings,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let Some(started) = attempt.started_at else {
            return Ok(false);
        };
        if attempt.status()? != AttemptStatus::InProgress
            || !is_expired(settings.duration_min, started, now)
        {
            return Ok(false);
        }

        match self
            .finalize_at(attempt.user_id, attempt.id, &settings.thresholds, now)
            .await
        {
            Ok(outcome) => {
                tracing::info!(attempt_id = %attempt.id, level = %outcome.level, "attempt auto-submitted after deadline");
                Ok(true)
            }
            // Another request submitted first.
            Err(Error::Conflict(_)) => Ok(true),
            Err(e) => Err(e),
        }
    }

    /// Records the candidate's selection for one item. Ids outside the
    /// item's frozen option set are dropped; single-select keeps the first.
    pub async fn save_selection(
        &self,
        user_id: Uuid,
        attempt_id: Uuid,
        item_id: Uuid,
        requested: &[String],
        settings: &TestSettings,
    ) -> Result<OptionIdSet> {
        let item = sqlx::query_as::<_, AttemptItem>(
            r#"
            SELECT ai.* FROM attempt_items ai
            JOIN attempts a ON a.id = ai.attempt_id
            WHERE ai.id = $1 AND ai.attempt_id = $2 AND a.user_id = $3
            "#,
        )
        .bind(item_id)
        .bind(attempt_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound("Item not found".into()))?;

        let attempt = self.find_owned(attempt_id, user_id).await?;
        if attempt.status()? != AttemptStatus::InProgress {
            return Err(Error::Conflict("Attempt is not in progress".into()));
        }
        let now = self.clock.now();
        if self.enforce_deadline(&attempt, settings, now).await? {
            return Err(Error::Conflict(
                "Time is up; the attempt has been submitted".into(),
            ));
        }

        let selection = GradingService::normalize_selection(
            requested,
            &item.option_ids.0,
            item.allow_multiple,
        );

        let mut tx = self.pool.begin().await?;
        let locked = Self::lock_owned_shared(&mut *tx, attempt_id, user_id).await?;
        if locked.status()? != AttemptStatus::InProgress {
            return Err(Error::Conflict("Attempt is not in progress".into()));
        }
        if locked
            .started_at
            .is_some_and(|started| is_expired(settings.duration_min, started, now))
        {
            return Err(Error::Conflict("Time is up for this attempt".into()));
        }

        sqlx::query(r#"UPDATE attempt_items SET selected_option_ids = $2 WHERE id = $1"#)
            .bind(item.id)
            .bind(Json(&selection))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(selection)
    }

    pub async fn submit(
        &self,
        user_id: Uuid,
        attempt_id: Uuid,
        settings: &TestSettings,
    ) -> Result<SubmitAttemptResponse> {
        self.finalize(user_id, attempt_id, &settings.thresholds).await
    }

    /// `IN_PROGRESS -> SUBMITTED`. Item flags, status, finish time and level
    /// are written in one transaction with the attempt row locked.
    pub async fn finalize(
        &self,
        user_id: Uuid,
        attempt_id: Uuid,
        thresholds: &LevelMap<i32>,
    ) -> Result<SubmitAttemptResponse> {
        self.finalize_at(user_id, attempt_id, thresholds, self.clock.now())
            .await
    }

    async fn finalize_at(
        &self,
        user_id: Uuid,
        attempt_id: Uuid,
        thresholds: &LevelMap<i32>,
        now: DateTime<Utc>,
    ) -> Result<SubmitAttemptResponse> {
        let mut tx = self.pool.begin().await?;
        let attempt = Self::lock_owned(&mut *tx, attempt_id, user_id).await?;
        let status = attempt.status()?;
        if !status.can_transition_to(AttemptStatus::Submitted) {
            let reason = match status {
                AttemptStatus::AwaitingStart => "Attempt has not been started",
                _ => "Attempt already submitted",
            };
            return Err(Error::Conflict(reason.into()));
        }

        let items = sqlx::query_as::<_, AttemptItem>(
            r#"SELECT * FROM attempt_items WHERE attempt_id = $1 ORDER BY position"#,
        )
        .bind(attempt_id)
        .fetch_all(&mut *tx)
        .await?;

        let mut ids = Vec::with_capacity(items.len());
        let mut flags = Vec::with_capacity(items.len());
        let mut outcomes: Vec<(Level, bool)> = Vec::with_capacity(items.len());
        for item in &items {
            let correct =
                GradingService::is_correct(&item.selected_option_ids.0, &item.correct_option_ids.0);
            ids.push(item.id);
            flags.push(correct);
            outcomes.push((item.level()?, correct));
        }
        let per_level = GradingService::breakdown(&outcomes, thresholds);
        let level = GradingService::evaluate_ladder(&per_level);

        if !ids.is_empty() {
            sqlx::query(
                r#"
                UPDATE attempt_items AS ai
                SET is_correct = data.ok
                FROM UNNEST($1::uuid[], $2::bool[]) AS data(id, ok)
                WHERE ai.id = data.id
                "#,
            )
            .bind(&ids[..])
            .bind(&flags[..])
            .execute(&mut *tx)
            .await?;
        }

        let updated = sqlx::query(
            r#"
            UPDATE attempts
            SET status = 'SUBMITTED', finished_at = $2, level = $3, updated_at = NOW()
            WHERE id = $1 AND status = 'IN_PROGRESS'
            "#,
        )
        .bind(attempt_id)
        .bind(now)
        .bind(level.as_str())
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(Error::Conflict("Attempt already submitted".into()));
        }
        tx.commit().await?;

        tracing::info!(%attempt_id, %user_id, %level, items = items.len(), "attempt submitted");
        Ok(SubmitAttemptResponse {
            ok: true,
            attempt_id,
            level,
            per_level,
        })
    }

    pub async fn result(&self, user_id: Uuid, attempt_id: Uuid) -> Result<AttemptResultResponse> {
        let attempt = self.find_owned(attempt_id, user_id).await?;
        if attempt.status()? != AttemptStatus::Submitted {
            return Err(Error::Conflict(
                "Result is available once the attempt is submitted".into(),
            ));
        }
        let level = attempt.level()?.unwrap_or(Level::A1);
        Ok(AttemptResultResponse {
            id: attempt.id,
            status: attempt.status,
            level,
            label: level.label(),
            finished_at: attempt.finished_at,
            ladder: GradingService::ladder(level),
        })
    }

    async fn item_views(&self, attempt_id: Uuid) -> Result<Vec<AttemptItemView>> {
        let items = sqlx::query_as::<_, AttemptItem>(
            r#"SELECT * FROM attempt_items WHERE attempt_id = $1 ORDER BY position"#,
        )
        .bind(attempt_id)
        .fetch_all(&self.pool)
        .await?;
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let question_ids: Vec<Uuid> = items.iter().map(|i| i.question_id).collect();
        let texts: HashMap<Uuid, String> = sqlx::query_as::<_, (Uuid, String)>(
            r#"SELECT id, text FROM questions WHERE id = ANY($1)"#,
        )
        .bind(&question_ids[..])
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .collect();

        let mut options: HashMap<Uuid, Vec<QuestionOption>> = HashMap::new();
        for option in sqlx::query_as::<_, QuestionOption>(
            r#"SELECT * FROM question_options WHERE question_id = ANY($1) ORDER BY question_id, position"#,
        )
        .bind(&question_ids[..])
        .fetch_all(&self.pool)
        .await?
        {
            options.entry(option.question_id).or_default().push(option);
        }

        Ok(items
            .into_iter()
            .map(|item| {
                let snapshot = &item.option_ids.0;
                let shown = options
                    .get(&item.question_id)
                    .map(|opts| {
                        opts.iter()
                            .filter(|o| snapshot.contains(&o.id.to_string()))
                            .map(|o| ItemOptionView {
                                id: o.id.to_string(),
                                text: o.text.clone(),
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                AttemptItemView {
                    id: item.id,
                    position: item.position,
                    question_id: item.question_id,
                    level: item.level,
                    allow_multiple: item.allow_multiple,
                    text: texts.get(&item.question_id).cloned().unwrap_or_default(),
                    options: shown,
                    selected_option_ids: item.selected_option_ids.0,
                }
            })
            .collect())
    }
}

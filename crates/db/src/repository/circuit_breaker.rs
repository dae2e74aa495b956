//! Persisted circuit breaker counters.
//!
//! A multi-process deployment needs breaker state shared across workers
//! rather than kept per-process. These functions are the Postgres-backed
//! alternative to `engine::circuit::InMemoryBreakerStore`; nothing in this
//! crate or `engine` wires them in by default (see DESIGN.md), but the
//! shape mirrors `CircuitBreakerStateRow` exactly so a future
//! `PostgresBreakerStore` is a thin adapter over these queries.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::{models::CircuitBreakerStateRow, DbError};

/// Fetch the current counter for `executor_name`, if any row exists yet.
pub async fn get_state(
    pool: &PgPool,
    executor_name: &str,
) -> Result<Option<CircuitBreakerStateRow>, DbError> {
    let row = sqlx::query_as!(
        CircuitBreakerStateRow,
        r#"SELECT executor_name, failure_count, opened_at FROM circuit_breaker_state WHERE executor_name = $1"#,
        executor_name,
    )
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Record a failure, incrementing the counter and stamping `opened_at` when
/// `threshold` is crossed.
pub async fn record_failure(
    pool: &PgPool,
    executor_name: &str,
    threshold: i32,
) -> Result<CircuitBreakerStateRow, DbError> {
    let now = Utc::now();
    let row = sqlx::query_as!(
        CircuitBreakerStateRow,
        r#"
        INSERT INTO circuit_breaker_state (executor_name, failure_count, opened_at)
        VALUES ($1, 1, NULL)
        ON CONFLICT (executor_name) DO UPDATE
        SET failure_count = circuit_breaker_state.failure_count + 1,
            opened_at = CASE
                WHEN circuit_breaker_state.failure_count + 1 >= $2 THEN $3
                ELSE circuit_breaker_state.opened_at
            END
        RETURNING executor_name, failure_count, opened_at
        "#,
        executor_name,
        threshold,
        now,
    )
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Reset the counter on a successful attempt.
pub async fn record_success(pool: &PgPool, executor_name: &str) -> Result<(), DbError> {
    sqlx::query!(
        r#"
        INSERT INTO circuit_breaker_state (executor_name, failure_count, opened_at)
        VALUES ($1, 0, NULL)
        ON CONFLICT (executor_name) DO UPDATE
        SET failure_count = 0, opened_at = NULL
        "#,
        executor_name,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Clear `opened_at` once the reset window has elapsed, admitting the next
/// attempt.
pub async fn clear_if_expired(
    pool: &PgPool,
    executor_name: &str,
    now: DateTime<Utc>,
    reset_window_secs: i64,
) -> Result<(), DbError> {
    sqlx::query!(
        r#"
        UPDATE circuit_breaker_state
        SET opened_at = NULL, failure_count = 0
        WHERE executor_name = $1
          AND opened_at IS NOT NULL
          AND $2 - opened_at >= make_interval(secs => $3)
        "#,
        executor_name,
        now,
        reset_window_secs as f64,
    )
    .execute(pool)
    .await?;
    Ok(())
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::EngineError;
use crate::execution::{CloseReason, Position, PositionStatus};
use crate::models::Side;
use crate::persistence::{Journal, TradeRecord};
use crate::scanner::Opportunity;
use crate::Result;

fn to_decimal(value: f64) -> Result<Decimal> {
    Decimal::from_f64(value)
        .ok_or_else(|| EngineError::Persistence(format!("{} does not fit NUMERIC", value)))
}

fn opt_decimal(value: Option<f64>) -> Result<Option<Decimal>> {
    value.map(to_decimal).transpose()
}

fn from_decimal(value: Decimal) -> Result<f64> {
    value
        .to_f64()
        .ok_or_else(|| EngineError::Persistence(format!("{} does not fit f64", value)))
}

/// Postgres journal; schema lives in `migrations/`
pub struct PostgresJournal {
    pool: PgPool,
}

impl PostgresJournal {
    /// Connect and run pending migrations
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::info!("Connected to Postgres journal");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn position_from_row(row: &PgRow) -> Result<Position> {
        let side: String = row.try_get("side")?;
        let status: String = row.try_get("status")?;
        let close_reason: Option<String> = row.try_get("close_reason")?;
        let leverage: i32 = row.try_get("leverage")?;

        let status = match status.as_str() {
            "open" => PositionStatus::Open,
            "closed" => PositionStatus::Closed,
            other => {
                return Err(EngineError::Persistence(format!(
                    "invalid position status: {}",
                    other
                )))
            }
        };
        let close_reason = close_reason
            .map(|r| r.parse::<CloseReason>())
            .transpose()
            .map_err(EngineError::Persistence)?;

        let entry_price = from_decimal(row.try_get("entry_price")?)?;
        let last_price: Option<Decimal> = row.try_get("last_price")?;
        let exit_price: Option<Decimal> = row.try_get("exit_price")?;
        let realized_pnl: Option<Decimal> = row.try_get("realized_pnl")?;

        Ok(Position {
            id: row.try_get("id")?,
            instrument: row.try_get("instrument")?,
            side: side.parse::<Side>().map_err(EngineError::Persistence)?,
            entry_price,
            quantity: from_decimal(row.try_get("quantity")?)?,
            leverage: leverage.max(1) as u32,
            stop_price: from_decimal(row.try_get("stop_price")?)?,
            take_profit_price: from_decimal(row.try_get("take_profit_price")?)?,
            status,
            opened_at: row.try_get::<DateTime<Utc>, _>("opened_at")?,
            closed_at: row.try_get("closed_at")?,
            exit_price: exit_price.map(from_decimal).transpose()?,
            realized_pnl: realized_pnl.map(from_decimal).transpose()?,
            close_reason,
            last_price: last_price.map(from_decimal).transpose()?.unwrap_or(entry_price),
            unrealized_pnl: 0.0,
        })
    }
}

#[async_trait]
impl Journal for PostgresJournal {
    async fn save_opportunity(&self, opportunity: &Opportunity) -> Result<()> {
        let candidates = serde_json::json!({
            "entries": opportunity.entry_candidates,
            "stops": opportunity.stop_candidates,
            "targets": opportunity.target_candidates,
        });
        let structure = serde_json::to_string(&opportunity.structure)
            .map_err(|e| EngineError::Persistence(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO opportunities (
                id, instrument, timeframe, direction, signal_strength, risk_tier,
                reward_risk_ratio, candidates, structure, generated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8::jsonb, $9::jsonb, $10)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&opportunity.instrument)
        .bind(opportunity.timeframe.as_str())
        .bind(opportunity.direction.to_string())
        .bind(to_decimal(opportunity.signal_strength)?)
        .bind(format!("{:?}", opportunity.risk_tier))
        .bind(to_decimal(opportunity.reward_risk_ratio)?)
        .bind(candidates.to_string())
        .bind(structure)
        .bind(opportunity.generated_at)
        .execute(&self.pool)
        .await?;

        tracing::debug!("Saved opportunity for {} to Postgres", opportunity.instrument);
        Ok(())
    }

    async fn save_trade_record(&self, record: &TradeRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trade_records (
                position_id, instrument, side, action, price, quantity, pnl, reason, recorded_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(record.position_id)
        .bind(&record.instrument)
        .bind(record.side.as_str())
        .bind(record.action.to_string())
        .bind(to_decimal(record.price)?)
        .bind(to_decimal(record.quantity)?)
        .bind(opt_decimal(record.pnl)?)
        .bind(record.reason.map(|r| r.as_str()))
        .bind(record.recorded_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn save_position(&self, position: &Position) -> Result<()> {
        let status = match position.status {
            PositionStatus::Open => "open",
            PositionStatus::Closed => "closed",
        };

        sqlx::query(
            r#"
            INSERT INTO positions (
                id, instrument, side, entry_price, quantity, leverage,
                stop_price, take_profit_price, status, opened_at,
                closed_at, exit_price, realized_pnl, close_reason, last_price
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (id) DO UPDATE SET
                stop_price = EXCLUDED.stop_price,
                take_profit_price = EXCLUDED.take_profit_price,
                status = EXCLUDED.status,
                closed_at = EXCLUDED.closed_at,
                exit_price = EXCLUDED.exit_price,
                realized_pnl = EXCLUDED.realized_pnl,
                close_reason = EXCLUDED.close_reason,
                last_price = EXCLUDED.last_price,
                updated_at = NOW()
            "#,
        )
        .bind(position.id)
        .bind(&position.instrument)
        .bind(position.side.as_str())
        .bind(to_decimal(position.entry_price)?)
        .bind(to_decimal(position.quantity)?)
        .bind(position.leverage as i32)
        .bind(to_decimal(position.stop_price)?)
        .bind(to_decimal(position.take_profit_price)?)
        .bind(status)
        .bind(position.opened_at)
        .bind(position.closed_at)
        .bind(opt_decimal(position.exit_price)?)
        .bind(opt_decimal(position.realized_pnl)?)
        .bind(position.close_reason.map(|r| r.as_str()))
        .bind(to_decimal(position.last_price)?)
        .execute(&self.pool)
        .await?;

        tracing::debug!(
            "Saved position {} for {} to Postgres",
            position.id,
            position.instrument
        );
        Ok(())
    }

    async fn load_open_positions(&self) -> Result<Vec<Position>> {
        let rows = sqlx::query(
            r#"
            SELECT id, instrument, side, entry_price, quantity, leverage,
                   stop_price, take_profit_price, status, opened_at,
                   closed_at, exit_price, realized_pnl, close_reason, last_price
            FROM positions
            WHERE status = 'open'
            ORDER BY opened_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let positions = rows
            .iter()
            .map(Self::position_from_row)
            .collect::<Result<Vec<_>>>()?;

        tracing::info!("Loaded {} open positions from Postgres", positions.len());
        Ok(positions)
    }
}

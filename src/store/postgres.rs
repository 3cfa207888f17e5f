use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eyre::{eyre, Result, WrapErr};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use tracing::error;

use super::{quorum_threshold, validate_swap, StoreResult, SwapStore};
use crate::error::StoreError;
use crate::types::{
    NewSwap, Signature, StatusCounts, Swap, SwapStatus, SwapWithSignatures, UnsignedTx,
};

// Amounts are NUMERIC(78,0). Inserts cast text with $n::NUMERIC, reads select
// amount::TEXT so no decimal type is needed on this side.

/// Create a database connection pool
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .wrap_err("Failed to connect to database")
}

/// Run pending migrations (uses the migration files in migrations/)
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .wrap_err("Failed to run database migrations")?;
    Ok(())
}

#[derive(Debug, FromRow)]
struct SwapRow {
    transaction_hash: String,
    from_address: String,
    to_address: String,
    amount: String,
    nonce: i64,
    unsigned_tx: serde_json::Value,
    sequence: i64,
    account_number: i64,
    status: String,
    mint_transaction_hash: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// A swap row joined with its aggregated signatures
#[derive(Debug, FromRow)]
struct QuorumRow {
    #[sqlx(flatten)]
    swap: SwapRow,
    operators: Vec<String>,
    signatures: Vec<String>,
}

impl TryFrom<SwapRow> for Swap {
    type Error = eyre::Report;

    fn try_from(row: SwapRow) -> Result<Self> {
        Ok(Swap {
            amount: row
                .amount
                .parse()
                .wrap_err_with(|| format!("Invalid amount for swap {}", row.transaction_hash))?,
            nonce: to_u64("nonce", row.nonce)?,
            sequence: to_u64("sequence", row.sequence)?,
            account_number: to_u64("account_number", row.account_number)?,
            status: row.status.parse()?,
            unsigned_tx: UnsignedTx(row.unsigned_tx),
            transaction_hash: row.transaction_hash,
            from: row.from_address,
            to: row.to_address,
            mint_transaction_hash: row.mint_transaction_hash,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn to_u64(field: &str, value: i64) -> Result<u64> {
    u64::try_from(value).map_err(|_| eyre!("Negative {} in database: {}", field, value))
}

fn to_i64(field: &str, value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| eyre!("{} {} exceeds BIGINT range", field, value))
}

const SWAP_COLUMNS: &str = r#"s.transaction_hash, s.from_address, s.to_address,
    s.amount::TEXT AS amount, s.nonce, s.unsigned_tx, s.sequence, s.account_number,
    s.status, s.mint_transaction_hash, s.created_at, s.updated_at"#;

/// Postgres-backed swap store
#[derive(Clone)]
pub struct PgSwapStore {
    pool: PgPool,
}

impl PgSwapStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and bring the schema up to date
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = create_pool(database_url).await?;
        run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl SwapStore for PgSwapStore {
    async fn insert_if_absent(&self, swap: &NewSwap) -> StoreResult<()> {
        validate_swap(swap)?;

        let result = sqlx::query(
            r#"
            INSERT INTO swaps (transaction_hash, from_address, to_address, amount, nonce,
                unsigned_tx, sequence, account_number, status)
            VALUES ($1, $2, $3, $4::NUMERIC, $5, $6, $7, $8, $9)
            ON CONFLICT (transaction_hash) DO NOTHING
            "#,
        )
        .bind(&swap.transaction_hash)
        .bind(&swap.from)
        .bind(&swap.to)
        .bind(swap.amount.to_string())
        .bind(to_i64("nonce", swap.nonce)?)
        .bind(&swap.unsigned_tx.0)
        .bind(to_i64("sequence", swap.sequence)?)
        .bind(to_i64("account_number", swap.account_number)?)
        .bind(swap.status.as_str())
        .execute(&self.pool)
        .await
        .wrap_err_with(|| format!("Failed to insert swap {}", swap.transaction_hash))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::DuplicateSwap(swap.transaction_hash.clone()));
        }
        Ok(())
    }

    async fn insert_signature_if_absent(
        &self,
        operator: &str,
        tx_hash: &str,
        signature: &str,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO signatures (signature, operator, transaction_hash)
            VALUES ($1, $2, $3)
            ON CONFLICT (signature) DO NOTHING
            "#,
        )
        .bind(signature)
        .bind(operator)
        .bind(tx_hash)
        .execute(&self.pool)
        .await
        .wrap_err_with(|| format!("Failed to insert signature for {}", tx_hash))?;

        Ok(result.rows_affected() > 0)
    }

    async fn has_signed(&self, operator: &str, tx_hash: &str) -> StoreResult<bool> {
        let row: (bool,) = sqlx::query_as(
            r#"SELECT EXISTS(
                SELECT 1 FROM signatures WHERE operator = $1 AND transaction_hash = $2
            )"#,
        )
        .bind(operator)
        .bind(tx_hash)
        .fetch_one(&self.pool)
        .await
        .wrap_err("Failed to check existing signature")?;

        Ok(row.0)
    }

    async fn fetch_swap(&self, tx_hash: &str) -> StoreResult<Option<Swap>> {
        let row = sqlx::query_as::<_, SwapRow>(&format!(
            "SELECT {} FROM swaps s WHERE s.transaction_hash = $1",
            SWAP_COLUMNS
        ))
        .bind(tx_hash)
        .fetch_optional(&self.pool)
        .await
        .wrap_err_with(|| format!("Failed to fetch swap {}", tx_hash))?;

        Ok(row.map(Swap::try_from).transpose()?)
    }

    async fn find_all_by_status(&self, status: SwapStatus) -> StoreResult<Vec<Swap>> {
        let rows = sqlx::query_as::<_, SwapRow>(&format!(
            "SELECT {} FROM swaps s WHERE s.status = $1 ORDER BY s.sequence",
            SWAP_COLUMNS
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("SQL error getting {} swaps: {:?}", status, e);
            e
        })
        .wrap_err_with(|| format!("Failed to get {} swaps", status))?;

        Ok(rows
            .into_iter()
            .map(Swap::try_from)
            .collect::<Result<Vec<_>>>()?)
    }

    async fn find_above_threshold_unsigned_swaps(
        &self,
        threshold: usize,
    ) -> StoreResult<Vec<SwapWithSignatures>> {
        // One statement so a sweep sees one snapshot of swaps and signatures
        let rows = sqlx::query_as::<_, QuorumRow>(&format!(
            r#"SELECT {},
                   array_agg(g.operator ORDER BY g.created_at, g.signature) AS operators,
                   array_agg(g.signature ORDER BY g.created_at, g.signature) AS signatures
               FROM swaps s
               JOIN signatures g ON g.transaction_hash = s.transaction_hash
               WHERE s.status = 'unsigned'
               GROUP BY s.transaction_hash
               HAVING COUNT(g.signature) >= $1
               ORDER BY s.sequence"#,
            SWAP_COLUMNS
        ))
        .bind(to_i64("threshold", quorum_threshold(threshold) as u64)?)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("SQL error getting quorum swaps: {:?}", e);
            e
        })
        .wrap_err("Failed to get swaps above signature threshold")?;

        let mut result = Vec::with_capacity(rows.len());
        for row in rows {
            let swap = Swap::try_from(row.swap)?;
            let signatures = row
                .operators
                .into_iter()
                .zip(row.signatures)
                .map(|(operator, signature)| Signature {
                    operator,
                    transaction_hash: swap.transaction_hash.clone(),
                    signature,
                })
                .collect();
            result.push(SwapWithSignatures { swap, signatures });
        }
        Ok(result)
    }

    async fn update_swap_status(
        &self,
        tx_hash: &str,
        mint_tx_hash: Option<&str>,
        status: SwapStatus,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE swaps
            SET status = $2, mint_transaction_hash = $3, updated_at = NOW()
            WHERE transaction_hash = $1
            "#,
        )
        .bind(tx_hash)
        .bind(status.as_str())
        .bind(mint_tx_hash)
        .execute(&self.pool)
        .await
        .wrap_err_with(|| format!("Failed to update swap {} to {}", tx_hash, status))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Backend(eyre!("No swap found for tx_hash={}", tx_hash)));
        }
        Ok(())
    }

    async fn count_by_status(&self) -> StoreResult<StatusCounts> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as(r#"SELECT status, COUNT(*) FROM swaps GROUP BY status"#)
                .fetch_all(&self.pool)
                .await
                .wrap_err("Failed to count swaps by status")?;

        let mut counts = StatusCounts::default();
        for (status, count) in rows {
            counts.add(status.parse()?, count);
        }
        Ok(counts)
    }

    async fn last_processed_block(&self, watcher: &str) -> StoreResult<Option<u64>> {
        let row: Option<(i64,)> = sqlx::query_as(
            r#"SELECT last_processed_block FROM watcher_cursors WHERE watcher_name = $1"#,
        )
        .bind(watcher)
        .fetch_optional(&self.pool)
        .await
        .wrap_err("Failed to get last processed block")?;

        Ok(row.map(|r| to_u64("last_processed_block", r.0)).transpose()?)
    }

    async fn set_last_processed_block(&self, watcher: &str, block: u64) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO watcher_cursors (watcher_name, last_processed_block)
            VALUES ($1, $2)
            ON CONFLICT (watcher_name) DO UPDATE SET last_processed_block = $2, updated_at = NOW()
            "#,
        )
        .bind(watcher)
        .bind(to_i64("block", block)?)
        .execute(&self.pool)
        .await
        .wrap_err_with(|| format!("Failed to update cursor for {}", watcher))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(status: &str) -> SwapRow {
        SwapRow {
            transaction_hash: "0x1".to_string(),
            from_address: "0xFFcf8FDEE72ac11b5c542428B35EEF5769C409f0".to_string(),
            to_address: "kamut1recipient".to_string(),
            amount: "340282366920938463463374607431768211455".to_string(),
            nonce: 4,
            unsigned_tx: serde_json::json!({"type": "cosmos-sdk/StdTx"}),
            sequence: 12,
            account_number: 7,
            status: status.to_string(),
            mint_transaction_hash: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_row_conversion() {
        let swap = Swap::try_from(row("submitted")).unwrap();
        assert_eq!(swap.amount, u128::MAX);
        assert_eq!(swap.sequence, 12);
        assert_eq!(swap.status, SwapStatus::Submitted);
    }

    #[test]
    fn test_row_conversion_rejects_bad_values() {
        assert!(Swap::try_from(row("pending")).is_err());

        let mut bad = row("unsigned");
        bad.sequence = -1;
        assert!(Swap::try_from(bad).is_err());
    }

    #[test]
    fn test_i64_bounds() {
        assert_eq!(to_i64("block", 5).unwrap(), 5);
        assert!(to_i64("block", u64::MAX).is_err());
    }
}

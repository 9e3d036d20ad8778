use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::{LoadJob, LoadOutcome, LoadRequest, Warehouse, WarehouseError, WriteDisposition};
use crate::registry::{ColumnSchema, ColumnType};

/// PostgreSQL warehouse: a dataset is a schema, a load replaces one table.
///
/// The dataset schema is created on first use. Each load then runs in a
/// single transaction (`DROP`, `CREATE`, `COPY`, `COMMIT`), so readers see
/// either the previous table or the new one.
#[derive(Clone)]
pub struct PostgresWarehouse {
    pool: PgPool,
}

impl PostgresWarehouse {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Pool that opens connections on first use, so building the warehouse
    /// never touches the database
    pub fn connect_lazy(url: &str, max_connections: u32) -> Result<Self, WarehouseError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_lazy(url)?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

pub fn pg_type(data_type: ColumnType) -> &'static str {
    match data_type {
        ColumnType::String => "TEXT",
        ColumnType::Integer => "BIGINT",
        ColumnType::Float => "DOUBLE PRECISION",
        ColumnType::Boolean => "BOOLEAN",
        ColumnType::Date => "DATE",
        ColumnType::Timestamp => "TIMESTAMP",
    }
}

pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn create_table_sql(table: &str, schema: &[ColumnSchema], if_not_exists: bool) -> String {
    let columns: Vec<String> = schema
        .iter()
        .map(|c| format!("{} {}", quote_ident(&c.name), pg_type(c.data_type)))
        .collect();
    format!(
        "CREATE TABLE {}{} ({})",
        if if_not_exists { "IF NOT EXISTS " } else { "" },
        table,
        columns.join(", ")
    )
}

fn copy_sql(table: &str, schema: &[ColumnSchema]) -> String {
    let columns: Vec<String> = schema.iter().map(|c| quote_ident(&c.name)).collect();
    format!(
        "COPY {} ({}) FROM STDIN WITH (FORMAT csv, HEADER false, DELIMITER ',')",
        table,
        columns.join(", ")
    )
}

/// Create the dataset schema under a per-dataset advisory lock. Concurrent
/// unlocked `CREATE SCHEMA IF NOT EXISTS` can fail on the catalog's unique
/// index.
async fn ensure_schema(pool: &PgPool, dataset: &str) -> Result<(), WarehouseError> {
    let mut tx = pool.begin().await?;
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(format!("schema:{dataset}"))
        .execute(&mut *tx)
        .await?;
    sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(dataset)))
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

async fn run_load(
    pool: PgPool,
    job_id: Uuid,
    request: LoadRequest,
) -> Result<LoadOutcome, WarehouseError> {
    let schema = request.effective_schema()?;
    // Validate and type every row before touching the database
    let rows = request.read_records(&schema)?;

    let mut body = csv::WriterBuilder::new().from_writer(Vec::new());
    for row in &rows {
        body.write_record(row.iter().map(|v| v.to_string()))
            .map_err(|e| WarehouseError::InvalidSource(e.to_string()))?;
    }
    let body = body
        .into_inner()
        .map_err(|e| WarehouseError::InvalidSource(e.to_string()))?;

    let table = format!("{}.{}", quote_ident(&request.dataset), quote_ident(&request.table));

    ensure_schema(&pool, &request.dataset).await?;

    let mut tx = pool.begin().await?;
    // Concurrent loads of the same table queue here instead of racing DROP/CREATE
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(&table)
        .execute(&mut *tx)
        .await?;

    match request.write_disposition {
        WriteDisposition::WriteTruncate => {
            sqlx::query(&format!("DROP TABLE IF EXISTS {table}"))
                .execute(&mut *tx)
                .await?;
            sqlx::query(&create_table_sql(&table, &schema, false))
                .execute(&mut *tx)
                .await?;
        },
        WriteDisposition::WriteEmpty => {
            sqlx::query(&create_table_sql(&table, &schema, true))
                .execute(&mut *tx)
                .await?;
            let (has_rows,): (bool,) =
                sqlx::query_as(&format!("SELECT EXISTS (SELECT 1 FROM {table})"))
                    .fetch_one(&mut *tx)
                    .await?;
            if has_rows {
                return Err(WarehouseError::NotEmpty {
                    table: request.qualified_table(),
                });
            }
        },
    }

    debug!(%table, bytes = body.len(), "Copying rows");
    let mut copy = tx.copy_in_raw(&copy_sql(&table, &schema)).await?;
    copy.send(body).await?;
    let rows_loaded = copy.finish().await?;

    tx.commit().await?;

    info!(%job_id, %table, rows_loaded, "Load committed");

    Ok(LoadOutcome {
        job_id,
        dataset: request.dataset,
        table: request.table,
        rows_loaded,
    })
}

#[async_trait]
impl Warehouse for PostgresWarehouse {
    #[instrument(skip(self, request), fields(table = %request.qualified_table(), source = %request.source_uri))]
    async fn bulk_load(&self, request: LoadRequest) -> Result<LoadJob, WarehouseError> {
        let pool = self.pool.clone();
        let job = LoadJob::spawn(move |job_id| run_load(pool, job_id, request));
        info!(job_id = %job.id(), "Submitted load job");
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("kodas"), "\"kodas\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_create_table_sql_keeps_schema_order() {
        let schema = vec![
            ColumnSchema::new("kodas", ColumnType::Integer),
            ColumnSchema::new("vidutinis_darbo_uzmokestis", ColumnType::Float),
            ColumnSchema::new("periodas", ColumnType::Date),
        ];
        assert_eq!(
            create_table_sql("\"ds\".\"t\"", &schema, false),
            "CREATE TABLE \"ds\".\"t\" (\"kodas\" BIGINT, \"vidutinis_darbo_uzmokestis\" DOUBLE PRECISION, \"periodas\" DATE)"
        );
        assert!(copy_sql("\"ds\".\"t\"", &schema).starts_with("COPY \"ds\".\"t\" (\"kodas\", "));
    }
}

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use super::{LoadJob, LoadOutcome, LoadRequest, Warehouse, WarehouseError, WriteDisposition};
use crate::registry::ColumnSchema;
use crate::table::{Table, Value};

#[derive(Debug, Clone)]
struct StoredTable {
    schema: Vec<ColumnSchema>,
    rows: Vec<Vec<Value>>,
}

#[derive(Debug, Default)]
struct State {
    tables: HashMap<(String, String), StoredTable>,
    failing: HashSet<String>,
    jobs: usize,
}

/// In-process warehouse with the same typing and disposition rules as the
/// database one
#[derive(Debug, Clone, Default)]
pub struct MemoryWarehouse {
    state: Arc<RwLock<State>>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later load into `table` (in any dataset) fail
    pub async fn fail_loads_into(&self, table: impl Into<String>) {
        self.state.write().await.failing.insert(table.into());
    }

    /// Current contents of `dataset.table`
    pub async fn table(&self, dataset: &str, table: &str) -> Option<Table> {
        let state = self.state.read().await;
        let stored = state.tables.get(&(dataset.to_string(), table.to_string()))?;

        let columns = stored.schema.iter().map(|c| c.name.clone()).collect();
        let mut snapshot = Table::new(columns).ok()?;
        for row in &stored.rows {
            snapshot.push_row(row.clone()).ok()?;
        }
        Some(snapshot)
    }

    pub async fn schema(&self, dataset: &str, table: &str) -> Option<Vec<ColumnSchema>> {
        self.state
            .read()
            .await
            .tables
            .get(&(dataset.to_string(), table.to_string()))
            .map(|stored| stored.schema.clone())
    }

    /// Number of load jobs that reached a terminal state
    pub async fn jobs_run(&self) -> usize {
        self.state.read().await.jobs
    }
}

async fn run_load(
    state: Arc<RwLock<State>>,
    job_id: uuid::Uuid,
    request: LoadRequest,
) -> Result<LoadOutcome, WarehouseError> {
    let result: Result<u64, WarehouseError> = async {
        if state.read().await.failing.contains(&request.table) {
            return Err(WarehouseError::JobAborted(format!(
                "load into {} rejected",
                request.qualified_table()
            )));
        }

        let schema = request.effective_schema()?;
        let rows = request.read_records(&schema)?;
        let rows_loaded = rows.len() as u64;
        let key = (request.dataset.clone(), request.table.clone());

        let mut state = state.write().await;
        if request.write_disposition == WriteDisposition::WriteEmpty
            && state.tables.get(&key).is_some_and(|t| !t.rows.is_empty())
        {
            return Err(WarehouseError::NotEmpty {
                table: request.qualified_table(),
            });
        }
        state.tables.insert(key, StoredTable { schema, rows });

        Ok(rows_loaded)
    }
    .await;

    state.write().await.jobs += 1;
    let rows_loaded = result?;

    info!(%job_id, table = %request.qualified_table(), rows_loaded, "Load committed");

    Ok(LoadOutcome {
        job_id,
        dataset: request.dataset,
        table: request.table,
        rows_loaded,
    })
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    async fn bulk_load(&self, request: LoadRequest) -> Result<LoadJob, WarehouseError> {
        let state = self.state.clone();
        Ok(LoadJob::spawn(move |job_id| run_load(state, job_id, request)))
    }
}

use async_trait::async_trait;

use crate::connection::Connection;
use crate::context::ExecutionContext;
use crate::error::Result;
use crate::row::Row;
use crate::value::Value;

/// Something that runs SQL without blocking the caller
#[async_trait]
pub trait Database: Send + Sync {
    fn execution_context(&self) -> &ExecutionContext;

    async fn query_with(&self, sql: &str, binds: &[Value], on_row: &mut (dyn FnMut(Row) + Send)) -> Result<()>;

    async fn query(&self, sql: &str, binds: &[Value]) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        self.query_with(sql, binds, &mut |row: Row| rows.push(row)).await?;
        Ok(rows)
    }

    async fn execute_batch(&self, sql: &str) -> Result<()>;
}

#[async_trait]
impl Database for Connection {
    fn execution_context(&self) -> &ExecutionContext { Connection::execution_context(self) }

    async fn query_with(&self, sql: &str, binds: &[Value], on_row: &mut (dyn FnMut(Row) + Send)) -> Result<()> {
        Connection::query_with(self, sql, binds, on_row).await
    }

    async fn execute_batch(&self, sql: &str) -> Result<()> { Connection::execute_batch(self, sql).await }
}

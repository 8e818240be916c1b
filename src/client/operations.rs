//! Data operations: each builds a request body and hands it to the executor.
//! Writes invalidate cached reads of the affected table once they succeed.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::Client;
use crate::batch::{self, BatchOptions, BatchResult, ParallelOptions, ParallelOutcome};
use crate::error::ClientResult;
use crate::executor::{ExecuteOptions, Response};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchType {
  Equals,
  Contains,
  StartsWith,
  EndsWith,
  GreaterThan,
  GreaterThanEqual,
  LessThan,
  LessThanEqual,
  Between,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
  pub search_attribute: String,
  pub search_type: SearchType,
  pub search_value: Value,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionOperator {
  #[default]
  And,
  Or,
}

/// One unit of work in a parallel job.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParallelOperation {
  Select {
    table: String,
    attribute: String,
    value: Value,
    #[serde(default = "all_attributes")]
    get_attributes: Vec<String>,
  },
  Insert {
    table: String,
    records: Vec<Value>,
  },
  Update {
    table: String,
    records: Vec<Value>,
  },
  Upsert {
    table: String,
    records: Vec<Value>,
  },
  Delete {
    table: String,
    ids: Vec<Value>,
  },
  Sql {
    sql: String,
  },
}

fn all_attributes() -> Vec<String> {
  vec!["*".to_string()]
}

#[derive(Debug, Clone, Copy)]
enum WriteKind {
  Insert,
  Update,
  Upsert,
}

impl WriteKind {
  fn operation(self) -> &'static str {
    match self {
      Self::Insert => "insert",
      Self::Update => "update",
      Self::Upsert => "upsert",
    }
  }
}

fn object(value: Value) -> Map<String, Value> {
  match value {
    Value::Object(map) => map,
    _ => Map::new(),
  }
}

impl Client {
  fn table_body(&self, table: &str) -> Map<String, Value> {
    object(json!({ "schema": self.context.schema, "table": table }))
  }

  async fn run(&self, operation: &str, body: Map<String, Value>) -> ClientResult<Response> {
    self.execute(operation, body, &ExecuteOptions::default()).await
  }

  /// Execute a write and invalidate the table on success.
  async fn write(&self, operation: &str, table: &str, body: Map<String, Value>) -> ClientResult<Response> {
    let response = self.run(operation, body).await?;
    self.invalidate_table(table, None);
    Ok(response)
  }

  fn records_body(&self, table: &str, records: &[Value]) -> Map<String, Value> {
    let mut body = self.table_body(table);
    body.insert("records".to_string(), Value::Array(records.to_vec()));
    body
  }

  fn ids_body(&self, table: &str, ids: &[Value]) -> Map<String, Value> {
    let mut body = self.table_body(table);
    body.insert("hash_values".to_string(), Value::Array(ids.to_vec()));
    body
  }

  // Records

  pub async fn insert(&self, table: &str, records: &[Value]) -> ClientResult<Response> {
    self.write("insert", table, self.records_body(table, records)).await
  }

  pub async fn update(&self, table: &str, records: &[Value]) -> ClientResult<Response> {
    self.write("update", table, self.records_body(table, records)).await
  }

  pub async fn upsert(&self, table: &str, records: &[Value]) -> ClientResult<Response> {
    self.write("upsert", table, self.records_body(table, records)).await
  }

  pub async fn delete(&self, table: &str, ids: &[Value]) -> ClientResult<Response> {
    self.write("delete", table, self.ids_body(table, ids)).await
  }

  // Reads

  pub async fn search_by_hash(
    &self,
    table: &str,
    ids: &[Value],
    get_attributes: &[&str],
  ) -> ClientResult<Response> {
    let mut body = self.ids_body(table, ids);
    body.insert("get_attributes".to_string(), json!(get_attributes));
    self.run("search_by_hash", body).await
  }

  pub async fn search_by_value(
    &self,
    table: &str,
    attribute: &str,
    value: Value,
    get_attributes: &[&str],
  ) -> ClientResult<Response> {
    let mut body = self.table_body(table);
    body.insert("search_attribute".to_string(), json!(attribute));
    body.insert("search_value".to_string(), value);
    body.insert("get_attributes".to_string(), json!(get_attributes));
    self.run("search_by_value", body).await
  }

  pub async fn search_by_conditions(
    &self,
    table: &str,
    conditions: &[Condition],
    operator: ConditionOperator,
    get_attributes: &[&str],
  ) -> ClientResult<Response> {
    let mut body = self.table_body(table);
    body.insert("operator".to_string(), serde_json::to_value(operator)?);
    body.insert("conditions".to_string(), serde_json::to_value(conditions)?);
    body.insert("get_attributes".to_string(), json!(get_attributes));
    self.run("search_by_conditions", body).await
  }

  /// Raw SQL. SELECT results are cacheable; other statements never are.
  pub async fn sql(&self, statement: &str) -> ClientResult<Response> {
    self.run("sql", object(json!({ "sql": statement }))).await
  }

  // Schema management

  pub async fn describe_all(&self) -> ClientResult<Response> {
    self.run("describe_all", Map::new()).await
  }

  pub async fn describe_schema(&self, schema: Option<&str>) -> ClientResult<Response> {
    let schema = schema.unwrap_or(&self.context.schema);
    self.run("describe_schema", object(json!({ "schema": schema }))).await
  }

  pub async fn describe_table(&self, table: &str) -> ClientResult<Response> {
    self.run("describe_table", self.table_body(table)).await
  }

  pub async fn create_schema(&self, schema: &str) -> ClientResult<Response> {
    let response = self.run("create_schema", object(json!({ "schema": schema }))).await?;
    self.executor.cache().invalidate_schema(schema);
    Ok(response)
  }

  pub async fn drop_schema(&self, schema: &str) -> ClientResult<Response> {
    let response = self.run("drop_schema", object(json!({ "schema": schema }))).await?;
    self.executor.cache().invalidate_schema(schema);
    Ok(response)
  }

  pub async fn create_table(&self, table: &str, hash_attribute: &str) -> ClientResult<Response> {
    let mut body = self.table_body(table);
    body.insert("hash_attribute".to_string(), json!(hash_attribute));
    let response = self.run("create_table", body).await?;
    // describe_schema results list tables too.
    self.executor.cache().invalidate_schema(&self.context.schema);
    Ok(response)
  }

  pub async fn drop_table(&self, table: &str) -> ClientResult<Response> {
    let response = self.run("drop_table", self.table_body(table)).await?;
    self.executor.cache().invalidate_schema(&self.context.schema);
    self.invalidate_table(table, None);
    Ok(response)
  }

  pub async fn create_attribute(&self, table: &str, attribute: &str) -> ClientResult<Response> {
    let mut body = self.table_body(table);
    body.insert("attribute".to_string(), json!(attribute));
    self.write("create_attribute", table, body).await
  }

  // Passthrough

  pub async fn list_users(&self) -> ClientResult<Response> {
    self.run("list_users", Map::new()).await
  }

  pub async fn list_roles(&self) -> ClientResult<Response> {
    self.run("list_roles", Map::new()).await
  }

  pub async fn system_information(&self) -> ClientResult<Response> {
    self.run("system_information", Map::new()).await
  }

  // Bulk

  async fn bulk_write(&self, kind: WriteKind, table: &str, records: &[Value], options: &BatchOptions) -> BatchResult {
    let result = batch::run_batched(
      records,
      |group: &[Value]| {
        let body = self.records_body(table, group);
        async move { self.run(kind.operation(), body).await }
      },
      options,
    )
    .await;

    // Once per job rather than per group.
    if result.successful > 0 {
      self.invalidate_table(table, None);
    }
    result
  }

  pub async fn bulk_insert(&self, table: &str, records: &[Value], options: &BatchOptions) -> BatchResult {
    self.bulk_write(WriteKind::Insert, table, records, options).await
  }

  pub async fn bulk_update(&self, table: &str, records: &[Value], options: &BatchOptions) -> BatchResult {
    self.bulk_write(WriteKind::Update, table, records, options).await
  }

  pub async fn bulk_upsert(&self, table: &str, records: &[Value], options: &BatchOptions) -> BatchResult {
    self.bulk_write(WriteKind::Upsert, table, records, options).await
  }

  pub async fn bulk_delete(&self, table: &str, ids: &[Value], options: &BatchOptions) -> BatchResult {
    let result = batch::run_batched(
      ids,
      |group: &[Value]| {
        let body = self.ids_body(table, group);
        async move { self.run("delete", body).await }
      },
      options,
    )
    .await;

    if result.successful > 0 {
      self.invalidate_table(table, None);
    }
    result
  }

  // Parallel

  async fn dispatch(&self, op: ParallelOperation) -> ClientResult<Response> {
    match op {
      ParallelOperation::Select {
        table,
        attribute,
        value,
        get_attributes,
      } => {
        let attrs: Vec<&str> = get_attributes.iter().map(String::as_str).collect();
        self.search_by_value(&table, &attribute, value, &attrs).await
      }
      ParallelOperation::Insert { table, records } => self.insert(&table, &records).await,
      ParallelOperation::Update { table, records } => self.update(&table, &records).await,
      ParallelOperation::Upsert { table, records } => self.upsert(&table, &records).await,
      ParallelOperation::Delete { table, ids } => self.delete(&table, &ids).await,
      ParallelOperation::Sql { sql } => self.sql(&sql).await,
    }
  }

  /// Run heterogeneous operations with at most `options.concurrency` in flight.
  pub async fn parallel(&self, ops: Vec<ParallelOperation>, options: &ParallelOptions) -> ParallelOutcome {
    batch::run_parallel(ops, |op| self.dispatch(op), options).await
  }
}

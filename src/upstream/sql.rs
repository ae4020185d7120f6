//! SQL upstream adapter
//!
//! Opens a connection pool from the configured DSN (the scheme picks the
//! driver at runtime) and registers one tool per declared call. Results are
//! emitted as `[{column: value, ...}, ...]`.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;
use serde_json::{Map, Value, json};
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Column, Row};
use tracing::{debug, info};

use crate::config::{ServiceConfig, SqlCallConfig, SqlPolicyRule, SqlServiceConfig};
use crate::managers::{RegisteredTool, ToolHandler};
use crate::protocol::{ExecutionRequest, Tool, ToolAnnotations, ToolResult};
use crate::{Error, Result};

use super::{HealthChecker, Managers, Registration, Upstream};

/// Adapter for a SQL database
pub struct SqlUpstream {
    name: String,
    service_key: String,
    sql: SqlServiceConfig,
    pool: Mutex<Option<AnyPool>>,
    /// Compiled deny rules, or the compile error re-raised at execute time
    policy: Arc<PolicyState>,
}

/// Outcome of compiling the input policy at construction.
enum PolicyState {
    Rules(Vec<CompiledRule>),
    InitError(String),
}

struct CompiledRule {
    tool_name: Option<Regex>,
    input: Option<Regex>,
}

fn compile_policy(rules: &[SqlPolicyRule]) -> PolicyState {
    let mut compiled = Vec::with_capacity(rules.len());
    for rule in rules {
        let tool_name = match rule.tool_name.as_deref().map(Regex::new) {
            Some(Ok(re)) => Some(re),
            Some(Err(e)) => return PolicyState::InitError(format!("invalid tool_name rule: {e}")),
            None => None,
        };
        let input = match rule.input.as_deref().map(Regex::new) {
            Some(Ok(re)) => Some(re),
            Some(Err(e)) => return PolicyState::InitError(format!("invalid input rule: {e}")),
            None => None,
        };
        compiled.push(CompiledRule { tool_name, input });
    }
    PolicyState::Rules(compiled)
}

impl PolicyState {
    /// Deny when any rule matches. A rule with both patterns requires both
    /// to match; one pattern matches on its own.
    fn check(&self, tool: &str, input: &str) -> Result<()> {
        match self {
            Self::InitError(message) => {
                Err(Error::Sql(format!("input policy failed to compile: {message}")))
            }
            Self::Rules(rules) => {
                for rule in rules {
                    let tool_hit = rule.tool_name.as_ref().is_none_or(|re| re.is_match(tool));
                    let input_hit = rule.input.as_ref().is_none_or(|re| re.is_match(input));
                    let applicable = rule.tool_name.is_some() || rule.input.is_some();
                    if applicable && tool_hit && input_hit {
                        return Err(Error::Sql(format!(
                            "call \"{tool}\" denied by input policy"
                        )));
                    }
                }
                Ok(())
            }
        }
    }
}

impl SqlUpstream {
    /// Create the adapter; the pool is opened in [`Upstream::register`].
    pub fn new(config: ServiceConfig) -> Result<Self> {
        let service_key = config.sanitized_name();
        let sql = config
            .sql
            .ok_or_else(|| Error::Config(format!("service \"{}\" has no sql config", config.name)))?;
        let policy = Arc::new(compile_policy(&sql.input_policy));
        Ok(Self { name: config.name, service_key, sql, pool: Mutex::new(None), policy })
    }

    fn call_tool(&self, call_name: &str, call: &SqlCallConfig) -> Tool {
        let mut properties = Map::new();
        for param in &call.parameter_order {
            properties.insert(param.clone(), json!({}));
        }
        Tool {
            name: call_name.to_string(),
            service_id: self.service_key.clone(),
            title: Some(call_name.to_string()),
            description: Some(format!("Parameterized query against {}", self.name)),
            input_schema: json!({"type": "object", "properties": properties}),
            // results are emitted as a bare array of row objects
            output_schema: Some(json!({"type": "array", "items": {"type": "object"}})),
            annotations: Some(ToolAnnotations {
                read_only_hint: None,
                idempotent_hint: None,
                open_world_hint: Some(true),
            }),
            cache_ttl_secs: call.cache_ttl_secs,
            underlying_method_fqn: None,
        }
    }
}

#[async_trait]
impl Upstream for SqlUpstream {
    async fn register(&self, managers: &Managers, is_reload: bool) -> Result<Registration> {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(5)
            .connect(&self.sql.dsn)
            .await
            .map_err(|e| Error::Sql(format!("failed to connect \"{}\": {e}", self.name)))?;
        *self.pool.lock() = Some(pool.clone());

        let mut tools = Vec::with_capacity(self.sql.calls.len());
        let mut call_names: Vec<&String> = self.sql.calls.keys().collect();
        call_names.sort();
        for call_name in call_names {
            let call = &self.sql.calls[call_name];
            let tool = self.call_tool(call_name, call);
            tools.push(tool.clone());
            managers.tools.add_tool(RegisteredTool::new(
                tool,
                Arc::new(SqlCallHandler {
                    tool_name: call_name.clone(),
                    query: call.query.clone(),
                    parameter_order: call.parameter_order.clone(),
                    pool: pool.clone(),
                    policy: Arc::clone(&self.policy),
                }),
            ));
        }

        if !is_reload {
            info!(service = %self.name, driver = %self.sql.driver, tools = tools.len(), "SQL service registered");
        }

        Ok(Registration { service_key: self.service_key.clone(), tools, resources: Vec::new() })
    }

    async fn shutdown(&self) -> Result<()> {
        let pool = self.pool.lock().take();
        if let Some(pool) = pool {
            pool.close().await;
        }
        Ok(())
    }

    fn health_checker(&self) -> Option<&dyn HealthChecker> {
        Some(self)
    }
}

#[async_trait]
impl HealthChecker for SqlUpstream {
    async fn check_health(&self) -> Result<()> {
        let pool = self
            .pool
            .lock()
            .clone()
            .ok_or_else(|| Error::Sql(format!("service \"{}\" has no open pool", self.name)))?;
        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .map_err(|e| Error::Sql(format!("health probe failed: {e}")))?;
        Ok(())
    }
}

struct SqlCallHandler {
    tool_name: String,
    query: String,
    parameter_order: Vec<String>,
    pool: AnyPool,
    policy: Arc<PolicyState>,
}

#[async_trait]
impl ToolHandler for SqlCallHandler {
    async fn execute(&self, request: ExecutionRequest) -> Result<ToolResult> {
        let input = serde_json::to_string(&request.arguments).unwrap_or_default();
        self.policy.check(&self.tool_name, &input)?;

        let mut query = sqlx::query(&self.query);
        for param in &self.parameter_order {
            query = match request.arguments.get(param) {
                Some(Value::String(s)) => query.bind(s.clone()),
                Some(Value::Bool(b)) => query.bind(*b),
                Some(Value::Number(n)) => {
                    if let Some(i) = n.as_i64() {
                        query.bind(i)
                    } else {
                        query.bind(n.as_f64().unwrap_or_default())
                    }
                }
                Some(Value::Null) | None => query.bind(Option::<String>::None),
                // structured arguments travel as their JSON text
                Some(other) => query.bind(other.to_string()),
            };
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::Sql(format!("call \"{}\" failed: {e}", self.tool_name)))?;

        debug!(tool = %self.tool_name, rows = rows.len(), "Query completed");

        let emitted: Vec<Value> = rows.iter().map(row_to_json).collect();
        Ok(ToolResult::Json(Value::Array(emitted)))
    }
}

fn row_to_json(row: &AnyRow) -> Value {
    let mut out = Map::new();
    for (index, column) in row.columns().iter().enumerate() {
        out.insert(column.name().to_string(), column_value(row, index));
    }
    Value::Object(out)
}

/// Decode one column without driver-specific type knowledge. Byte columns
/// come back as text when they hold valid UTF-8, base64 otherwise.
fn column_value(row: &AnyRow, index: usize) -> Value {
    if let Ok(value) = row.try_get::<Option<i64>, _>(index) {
        return value.map_or(Value::Null, Value::from);
    }
    if let Ok(value) = row.try_get::<Option<f64>, _>(index) {
        return value.map_or(Value::Null, Value::from);
    }
    if let Ok(value) = row.try_get::<Option<bool>, _>(index) {
        return value.map_or(Value::Null, Value::from);
    }
    if let Ok(value) = row.try_get::<Option<String>, _>(index) {
        return value.map_or(Value::Null, Value::from);
    }
    if let Ok(value) = row.try_get::<Option<Vec<u8>>, _>(index) {
        return value.map_or(Value::Null, |bytes| match String::from_utf8(bytes) {
            Ok(text) => Value::String(text),
            Err(e) => {
                use base64::Engine as _;
                Value::String(
                    base64::engine::general_purpose::STANDARD.encode(e.into_bytes()),
                )
            }
        });
    }
    Value::Null
}

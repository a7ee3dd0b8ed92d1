//! Agent-facing tools.
//!
//! Each operation of the [`Retriever`] is wrapped in a [`Tool`]: a name, a
//! description, a JSON Schema for its parameters and an async `execute`.
//! The [`ToolRegistry`] holds the six SOP tools and is shared by both
//! transports: the HTTP API in [`crate::server`] and the MCP stdio bridge
//! in [`crate::mcp`].
//!
//! ```text
//! ┌───────────────────────────────────────────┐
//! │               ToolRegistry                │
//! │  search_sop_documents  get_sop_guidance   │
//! │  list_sop_categories   get_sop_by_category│
//! │  refresh_sop_database  get_server_status  │
//! └──────────────┬────────────────────────────┘
//!                ▼
//!        ToolContext → Retriever → Indexer
//! ```

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::IndexError;
use crate::retriever::Retriever;

/// A tool that agents can discover and call.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Lowercase identifier, used as the route (`POST /tools/{name}`) and
    /// the MCP tool name.
    fn name(&self) -> &str;

    /// One-line description for agent discovery.
    fn description(&self) -> &str;

    /// JSON Schema of the accepted parameters.
    fn parameters_schema(&self) -> Value;

    /// Tools that only read the index. Surfaced as an MCP annotation.
    fn read_only(&self) -> bool {
        true
    }

    /// Run the tool. `params` has already passed [`validate_params`].
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value>;
}

/// Shared state handed to every tool invocation.
#[derive(Clone)]
pub struct ToolContext {
    retriever: Arc<Retriever>,
}

impl ToolContext {
    pub fn new(retriever: Arc<Retriever>) -> Self {
        Self { retriever }
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }
}

/// Optional string parameter; blank counts as absent. Non-blank values
/// pass through verbatim, since category names match exactly.
fn opt_str<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params[key].as_str().filter(|s| !s.trim().is_empty())
}

fn required_str<'a>(params: &'a Value, key: &str) -> Result<&'a str> {
    match opt_str(params, key) {
        Some(s) => Ok(s),
        None => Err(IndexError::InvalidRequest(format!("{} must not be empty", key)).into()),
    }
}

// ============ search_sop_documents ============

pub struct SearchSopDocuments;

#[async_trait]
impl Tool for SearchSopDocuments {
    fn name(&self) -> &str {
        "search_sop_documents"
    }

    fn description(&self) -> &str {
        "Semantic search over SOP documents, optionally restricted to one category"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What you are looking for, in any language"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum number of results (server default if omitted)",
                    "minimum": 1
                },
                "category": {
                    "type": "string",
                    "description": "SOP category (top-level folder name) to search in"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let query = required_str(&params, "query")?;
        let max_results = params["max_results"]
            .as_u64()
            .map(|n| n as usize)
            .unwrap_or_else(|| ctx.retriever().default_max_results());
        let category = opt_str(&params, "category");

        let results = ctx.retriever().search(query, max_results, category).await?;
        Ok(json!({
            "query": query,
            "category": category,
            "results_count": results.len(),
            "results": results,
        }))
    }
}

// ============ get_sop_guidance ============

pub struct GetSopGuidance;

#[async_trait]
impl Tool for GetSopGuidance {
    fn name(&self) -> &str {
        "get_sop_guidance"
    }

    fn description(&self) -> &str {
        "Find the procedures that apply to a situation and return them as ranked evidence"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "situation": {
                    "type": "string",
                    "description": "Description of the situation"
                },
                "category": {
                    "type": "string",
                    "description": "SOP category to focus on"
                }
            },
            "required": ["situation"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let situation = required_str(&params, "situation")?;
        let guidance = ctx
            .retriever()
            .guidance(situation, opt_str(&params, "category"))
            .await?;
        Ok(serde_json::to_value(&guidance)?)
    }
}

// ============ list_sop_categories ============

pub struct ListSopCategories;

#[async_trait]
impl Tool for ListSopCategories {
    fn name(&self) -> &str {
        "list_sop_categories"
    }

    fn description(&self) -> &str {
        "List SOP categories with document and chunk counts"
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<Value> {
        let listing = ctx.retriever().list_categories();
        let mut value = serde_json::to_value(&listing)?;
        value["total_categories"] = json!(listing.categories.len());
        Ok(value)
    }
}

// ============ get_sop_by_category ============

pub struct GetSopByCategory;

#[async_trait]
impl Tool for GetSopByCategory {
    fn name(&self) -> &str {
        "get_sop_by_category"
    }

    fn description(&self) -> &str {
        "List every indexed SOP document in a category"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "category": {
                    "type": "string",
                    "description": "SOP category (top-level folder name)"
                }
            },
            "required": ["category"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let category = required_str(&params, "category")?;
        let sops = ctx.retriever().get_by_category(category).await?;
        Ok(json!({
            "category": category,
            "sop_count": sops.len(),
            "sops": sops,
        }))
    }
}

// ============ refresh_sop_database ============

pub struct RefreshSopDatabase;

#[async_trait]
impl Tool for RefreshSopDatabase {
    fn name(&self) -> &str {
        "refresh_sop_database"
    }

    fn description(&self) -> &str {
        "Re-read and re-embed every SOP document. Expensive; use only after documents change"
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    fn read_only(&self) -> bool {
        false
    }

    async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<Value> {
        let report = ctx.retriever().refresh().await?;
        Ok(json!({
            "message": "SOP database refreshed successfully",
            "documents_processed": report.documents_indexed,
            "report": report,
        }))
    }
}

// ============ get_server_status ============

pub struct GetServerStatus;

#[async_trait]
impl Tool for GetServerStatus {
    fn name(&self) -> &str {
        "get_server_status"
    }

    fn description(&self) -> &str {
        "Index state, model, store location and available categories"
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<Value> {
        Ok(serde_json::to_value(ctx.retriever().status())?)
    }
}

// ============ Registry ============

pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Registry holding the six SOP tools.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(SearchSopDocuments));
        registry.register(Box::new(GetSopGuidance));
        registry.register(Box::new(ListSopCategories));
        registry.register(Box::new(GetSopByCategory));
        registry.register(Box::new(RefreshSopDatabase));
        registry.register(Box::new(GetServerStatus));
        registry
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Check `params` against a tool's schema.
///
/// Verifies required fields, primitive types and integer `minimum`.
/// Omitted optional fields stay omitted so each tool applies its own
/// configured default. Unknown fields pass through untouched.
pub fn validate_params(schema: &Value, params: &Value) -> Result<Value> {
    let params_obj = match params {
        Value::Object(map) => map.clone(),
        Value::Null => serde_json::Map::new(),
        other => bail!("parameters must be a JSON object, got {}", json_type_name(other)),
    };

    let properties = schema
        .get("properties")
        .and_then(|p| p.as_object())
        .cloned()
        .unwrap_or_default();

    let required: Vec<&str> = schema
        .get("required")
        .and_then(|r| r.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();

    for req_field in required {
        if !params_obj.contains_key(req_field) {
            bail!("missing required parameter: {}", req_field);
        }
    }

    for (prop_name, prop_schema) in &properties {
        let Some(value) = params_obj.get(prop_name) else {
            continue;
        };

        if let Some(expected_type) = prop_schema.get("type").and_then(|t| t.as_str()) {
            let type_ok = match expected_type {
                "string" => value.is_string(),
                "integer" => value.is_i64() || value.is_u64(),
                "number" => value.is_number(),
                "boolean" => value.is_boolean(),
                "array" => value.is_array(),
                "object" => value.is_object(),
                _ => true,
            };
            if !type_ok {
                bail!(
                    "parameter '{}' must be of type '{}', got {}",
                    prop_name,
                    expected_type,
                    json_type_name(value)
                );
            }
        }

        if let (Some(min), Some(n)) = (
            prop_schema.get("minimum").and_then(|m| m.as_i64()),
            value.as_i64(),
        ) {
            if n < min {
                bail!("parameter '{}' must be >= {}, got {}", prop_name, min, n);
            }
        }
    }

    Ok(Value::Object(params_obj))
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_has_six_unique_tools() {
        let registry = ToolRegistry::with_builtins();
        assert_eq!(registry.len(), 6);
        let mut names: Vec<&str> = registry.tools().iter().map(|t| t.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 6);
        assert!(registry.find("get_sop_guidance").is_some());
        assert!(registry.find("nope").is_none());
        assert!(!registry.find("refresh_sop_database").unwrap().read_only());
    }

    #[test]
    fn validate_leaves_optional_fields_absent() {
        let search = SearchSopDocuments.parameters_schema();
        let params =
            validate_params(&search, &json!({ "query": "spill", "trace": true })).unwrap();
        assert!(params.get("max_results").is_none());
        assert!(params.get("category").is_none());
        assert_eq!(params["trace"], json!(true));
    }

    #[test]
    fn category_is_passed_through_verbatim() {
        let params = json!({ "category": " Legacy SOPs ", "blank": "  " });
        assert_eq!(opt_str(&params, "category"), Some(" Legacy SOPs "));
        assert_eq!(opt_str(&params, "blank"), None);
        assert_eq!(opt_str(&params, "missing"), None);
    }

    #[test]
    fn blank_required_string_is_invalid_request() {
        let err = required_str(&json!({ "query": "   " }), "query").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IndexError>(),
            Some(IndexError::InvalidRequest(_))
        ));
    }

    #[test]
    fn validate_rejects_missing_and_mistyped() {
        let schema = SearchSopDocuments.parameters_schema();
        let err = validate_params(&schema, &json!({})).unwrap_err();
        assert!(err.to_string().contains("missing required parameter: query"));

        let err = validate_params(&schema, &json!({ "query": 3 })).unwrap_err();
        assert!(err.to_string().contains("must be of type 'string'"));

        let err = validate_params(&schema, &json!({ "query": "q", "max_results": 0 })).unwrap_err();
        assert!(err.to_string().contains(">= 1"));

        let err = validate_params(&schema, &json!(["q"])).unwrap_err();
        assert!(err.to_string().contains("JSON object"));
    }

    #[test]
    fn validate_accepts_null_for_empty_schema() {
        let schema = GetServerStatus.parameters_schema();
        assert_eq!(validate_params(&schema, &Value::Null).unwrap(), json!({}));
    }
}

//! Executor for client-declared function tools.
//!
//! Function tools are declared per request; their execution is delegated to
//! the tool runtime backend, and the result is folded back into the next
//! inference round.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::responses::errors::ResponseError;
use crate::responses::models::ResponseTool;
use crate::responses::ports::ToolRuntimeTrait;

use super::executor::{ToolCallInfo, ToolExecutor, ToolOutput};

pub struct FunctionToolExecutor {
    runtime: Arc<dyn ToolRuntimeTrait>,
    function_names: HashSet<String>,
}

impl FunctionToolExecutor {
    /// Collect the function tool names declared in the request
    pub fn new(runtime: Arc<dyn ToolRuntimeTrait>, tools: &[ResponseTool]) -> Self {
        let function_names = tools
            .iter()
            .filter_map(|tool| match tool {
                ResponseTool::Function { name, .. } => Some(name.clone()),
                _ => None,
            })
            .collect();
        Self {
            runtime,
            function_names,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.function_names.is_empty()
    }
}

#[async_trait]
impl ToolExecutor for FunctionToolExecutor {
    fn name(&self) -> &str {
        "function"
    }

    fn can_handle(&self, tool_name: &str) -> bool {
        self.function_names.contains(tool_name)
    }

    async fn execute(&self, tool_call: &ToolCallInfo) -> Result<ToolOutput, ResponseError> {
        let result = self
            .runtime
            .execute(&tool_call.name, tool_call.arguments.clone())
            .await
            .map_err(|e| ResponseError::ToolExecutionFailed(e.to_string()))?;

        // String results pass through as-is; structured results are folded
        // back as their JSON encoding
        let text = match result {
            serde_json::Value::String(text) => text,
            other => other.to_string(),
        };
        Ok(ToolOutput::Text(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::responses::ports::{MockToolRuntimeTrait, ToolRuntimeError};

    fn tools(names: &[&str]) -> Vec<ResponseTool> {
        names
            .iter()
            .map(|name| ResponseTool::Function {
                name: name.to_string(),
                description: None,
                parameters: None,
            })
            .collect()
    }

    #[test]
    fn test_extracts_declared_function_names() {
        let runtime = Arc::new(MockToolRuntimeTrait::new());
        let executor =
            FunctionToolExecutor::new(runtime, &tools(&["get_weather", "search_database"]));

        assert!(!executor.is_empty());
        assert!(executor.can_handle("get_weather"));
        assert!(executor.can_handle("search_database"));
        assert!(!executor.can_handle("web_search"));
    }

    #[test]
    fn test_empty_when_no_function_tools() {
        let runtime = Arc::new(MockToolRuntimeTrait::new());
        let executor =
            FunctionToolExecutor::new(runtime, &[ResponseTool::WebSearch {}]);
        assert!(executor.is_empty());
    }

    #[tokio::test]
    async fn test_execute_returns_runtime_result() {
        let mut runtime = MockToolRuntimeTrait::new();
        runtime
            .expect_execute()
            .withf(|name, args| name == "get_weather" && args["location"] == "NYC")
            .returning(|_, _| Ok(serde_json::json!({"result": 42})));

        let executor =
            FunctionToolExecutor::new(Arc::new(runtime), &tools(&["get_weather"]));
        let call =
            ToolCallInfo::parse("call_1", "get_weather", r#"{"location": "NYC"}"#).unwrap();

        let output = executor.execute(&call).await.unwrap();
        match output {
            ToolOutput::Text(text) => assert_eq!(text, r#"{"result":42}"#),
            other => panic!("Expected Text, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_string_result_passes_through() {
        let mut runtime = MockToolRuntimeTrait::new();
        runtime
            .expect_execute()
            .returning(|_, _| Ok(serde_json::Value::String("sunny".to_string())));

        let executor =
            FunctionToolExecutor::new(Arc::new(runtime), &tools(&["get_weather"]));
        let call = ToolCallInfo::parse("call_1", "get_weather", "{}").unwrap();

        let output = executor.execute(&call).await.unwrap();
        match output {
            ToolOutput::Text(text) => assert_eq!(text, "sunny"),
            other => panic!("Expected Text, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_runtime_error_is_scoped() {
        let mut runtime = MockToolRuntimeTrait::new();
        runtime.expect_execute().returning(|_, _| {
            Err(ToolRuntimeError::ExecutionFailed("backend down".to_string()))
        });

        let executor =
            FunctionToolExecutor::new(Arc::new(runtime), &tools(&["get_weather"]));
        let call = ToolCallInfo::parse("call_1", "get_weather", "{}").unwrap();

        let result = executor.execute(&call).await;
        assert!(matches!(
            result,
            Err(ResponseError::ToolExecutionFailed(_))
        ));
    }
}

pub mod executor;
pub mod file_search;
pub mod function;
pub mod mcp;
pub mod ports;
pub mod web_search;

pub use executor::{ToolCallInfo, ToolExecutor, ToolOutput, ToolRegistry};
pub use ports::{FileSearchProviderTrait, WebSearchProviderTrait};

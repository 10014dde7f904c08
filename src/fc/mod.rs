pub mod parser;

pub use parser::{parse_tool_call, ToolCallParseError};

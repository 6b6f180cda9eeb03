//! Agent tools over the Power BI flight dataset.
//!
//! Each tool is invoked by the query agent; failures are returned as typed errors
//! and the agent feeds them back into the transcript.

mod compare_dimension;
mod dax_syntax;
mod error;
mod execute_dax;
mod quick_stat;
mod schema_lookup;
mod traits;

pub use compare_dimension::{COMPARE_DIMENSION_TOOL, CompareDimensionTool};
pub use dax_syntax::{DAX_SYNTAX_TOOL, DaxSyntaxTool};
pub use error::{Result, ToolError};
pub use execute_dax::{EXECUTE_DAX_TOOL, ExecuteDaxTool};
pub use quick_stat::{QUICK_STAT_TOOL, QuickStatTool};
pub use schema_lookup::{SCHEMA_LOOKUP_TOOL, SchemaLookupTool};
pub use traits::{Tool, ToolSpec, output_text, to_llm_tool_def};

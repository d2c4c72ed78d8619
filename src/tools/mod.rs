//! Tools the analysis model can invoke.

pub mod calendar;
pub mod datetime;
pub mod registry;
pub mod tool;

pub use calendar::CalendarEventTool;
pub use registry::ToolRegistry;
pub use tool::*;

//! Result type alias for the agent
//!
//! This module provides a convenient Result type alias that uses AgentError
//! as the error type.

use super::errors::AgentError;

/// Result type alias for agent operations
///
/// # Examples
///
/// ```
/// use hostagent::domain::result::Result;
/// use hostagent::domain::errors::AgentError;
///
/// fn example_function() -> Result<String> {
///     Ok("success".to_string())
/// }
///
/// fn failing_function() -> Result<()> {
///     Err(AgentError::Validation("Invalid input".to_string()))
/// }
/// ```
pub type Result<T> = std::result::Result<T, AgentError>;

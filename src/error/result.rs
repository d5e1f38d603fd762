//! Result type alias for chat core operations.

use super::app_error::AppError;
use super::context::ErrorContext;

/// Type alias for Results using AppError.
pub type AppResult<T> = Result<T, AppError>;

/// Extension trait for Result types to add context to errors.
pub trait ResultExt<T> {
    /// Add context to an error if the result is Err.
    fn context(self, ctx: ErrorContext) -> AppResult<T>;

    /// Add context using a closure (only called on error).
    fn with_context<F>(self, f: F) -> AppResult<T>
    where
        F: FnOnce() -> ErrorContext;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: Into<AppError>,
{
    fn context(self, ctx: ErrorContext) -> AppResult<T> {
        self.map_err(|e| e.into().with_context(ctx))
    }

    fn with_context<F>(self, f: F) -> AppResult<T>
    where
        F: FnOnce() -> ErrorContext,
    {
        self.map_err(|e| e.into().with_context(f()))
    }
}

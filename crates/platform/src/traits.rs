//! Core traits for Fynx security modules

use crate::FynxResult;

/// Security module interface
///
/// Long-running Fynx components implement this trait to provide unified
/// lifecycle management.
pub trait SecurityModule: Send + Sync {
    /// Unique module identifier
    fn id(&self) -> &'static str;

    /// Module version
    fn version(&self) -> &'static str;

    /// Module description
    fn description(&self) -> &'static str;

    /// Initialize the module
    ///
    /// # Errors
    ///
    /// Returns an error if initialization fails
    fn init(&mut self) -> FynxResult<()> {
        Ok(())
    }

    /// Shutdown the module
    ///
    /// # Errors
    ///
    /// Returns an error if shutdown fails
    fn shutdown(&mut self) -> FynxResult<()> {
        Ok(())
    }
}

//! Stack programs shipped with the binary.
//!
//! A stack program turns resolved config values into resource declarations.
//! It also knows the schemas of the resource types it uses and how to
//! simulate them, so `validate` and `--simulate` work without a provider.

pub mod wordpress;

use crate::config::{PolicyConfig, StackValues};
use crate::error::Result;
use crate::graph::Stack;
use crate::provider::{MemoryProvider, SchemaRegistry};

/// A declarative stack program.
pub trait StackProgram: Send + Sync {
    /// Program name, as written in `stack.program`.
    fn name(&self) -> &'static str;

    /// Config keys the program cannot run without.
    fn required_keys(&self) -> &'static [&'static str];

    /// Declares every resource and export into `stack`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for missing keys or invalid
    /// declarations.
    fn declare(&self, stack: &mut Stack, values: &StackValues, policy: &PolicyConfig) -> Result<()>;

    /// Schemas of the resource types the program declares.
    fn schemas(&self) -> SchemaRegistry;

    /// An in-process provider that simulates the program's resource types.
    fn simulated_provider(&self) -> MemoryProvider;
}

/// Every bundled program.
#[must_use]
pub fn bundled() -> Vec<&'static dyn StackProgram> {
    vec![&wordpress::Wordpress]
}

/// Looks up a bundled program by name.
#[must_use]
pub fn find(name: &str) -> Option<&'static dyn StackProgram> {
    bundled().into_iter().find(|p| p.name() == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_bundled_program() {
        assert_eq!(find("wordpress").map(|p| p.name()), Some("wordpress"));
        assert!(find("lamp").is_none());
    }
}

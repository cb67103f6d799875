//! Errors that can occur while resolving or mutating bindings

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
/// All the errors that can occur in the binding store
pub enum BindingError {
    /// A namespace component of a dotted name does not exist.
    #[error("can't resolve {name}: no namespace called {component}")]
    NameResolution {
        /// The full name being resolved
        name: String,
        /// The first namespace component that was not found
        component: String,
    },

    /// The name (or one of its components) is empty, e.g. `ms.` or `.DDID`
    #[error("invalid variable name {name:?}")]
    InvalidName {
        /// The offending name
        name: String,
    },

    /// A definition like `NAME=VALUE` could not be parsed
    #[error("invalid definition {definition:?}, expected NAME=VALUE")]
    InvalidDefinition {
        /// The offending definition
        definition: String,
    },
}

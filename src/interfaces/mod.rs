//! Adapters that drive the engine from outside: the command-script CSV format.

pub mod csv;

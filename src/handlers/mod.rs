//! Example domain handlers registered by the server binary.

pub mod prompts;
pub mod resources;
pub mod tools;

use crate::server::DispatchTable;

/// Registers every example tool, resource and prompt on `table`.
pub fn register_all(table: DispatchTable) -> DispatchTable {
    let table = tools::register(table);
    let table = resources::register(table);
    prompts::register(table)
}

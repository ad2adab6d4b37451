pub mod loader;

pub use loader::{load_table, Table, TableFormat};

//! Path utilities for the kitvault library
//!
//! Provides the standard location of the kit library and its database file.

use std::path::PathBuf;

/// Database filename inside the library root
pub const DB_FILENAME: &str = "kitvault.db";

/// Get the default library path
///
/// Returns: `~/Music/kitvault`
pub fn default_library_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Music")
        .join("kitvault")
}

/// Get the default database path
///
/// Returns: `~/Music/kitvault/kitvault.db`
pub fn default_db_path() -> PathBuf {
    default_library_path().join(DB_FILENAME)
}

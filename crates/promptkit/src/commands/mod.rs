//! Command implementations that work outside an initialized project.

pub mod init;

//! CLI subcommands

pub mod settings;
pub mod sync;
pub mod whoami;
pub mod zones;

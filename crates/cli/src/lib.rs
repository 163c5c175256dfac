//! Command-line front end for sigpatch: `patch`, `locate` and `verify`.

pub mod commands;

//! Terminal rendering: tables, colors, and per-command views.

pub mod render;
pub mod styling;
pub mod tables;

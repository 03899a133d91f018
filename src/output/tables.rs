use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color as TableColor, ContentArrangement, Table};

/// Table and cell creation helpers
pub fn create_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

pub fn status_cell(status: &str) -> Cell {
    match status.to_lowercase().as_str() {
        "success" => Cell::new(status).fg(TableColor::Green),
        "failed" => Cell::new(status).fg(TableColor::Red),
        "running" | "pending" => Cell::new(status).fg(TableColor::Yellow),
        "canceled" | "skipped" => Cell::new(status).fg(TableColor::DarkGrey),
        _ => Cell::new(status),
    }
}

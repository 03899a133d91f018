use console::style;

/// Styling helpers for terminal output
pub fn bright_green(text: impl std::fmt::Display) -> console::StyledObject<String> {
    style(text.to_string()).bright().green()
}

pub fn bright_red(text: impl std::fmt::Display) -> console::StyledObject<String> {
    style(text.to_string()).bright().red()
}

pub fn bright_yellow(text: impl std::fmt::Display) -> console::StyledObject<String> {
    style(text.to_string()).bright().yellow()
}

pub fn cyan(text: impl std::fmt::Display) -> console::StyledObject<String> {
    style(text.to_string()).cyan()
}

pub fn dim(text: impl std::fmt::Display) -> console::StyledObject<String> {
    style(text.to_string()).dim()
}

pub fn bold(text: impl std::fmt::Display) -> console::StyledObject<String> {
    style(text.to_string()).bold()
}

/// Status text colored by outcome.
pub fn status_styled(status: &str) -> console::StyledObject<String> {
    match status.to_lowercase().as_str() {
        "success" => bright_green(status),
        "failed" => bright_red(status),
        "running" => bright_yellow(status),
        "canceled" | "skipped" => dim(status),
        _ => style(status.to_string()),
    }
}

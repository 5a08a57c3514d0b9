use comfy_table::{presets::UTF8_FULL, Attribute, Cell, Color, Table};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use montage_core::format_file_size;
use owo_colors::OwoColorize;
use std::time::Duration;

use crate::cache::CachedMedia;

pub fn print_banner() {
    println!();
    println!("{}", "  Montage  ".bold());
    println!("{}", "  collaborative slideshow media pipeline  ".dimmed());
    println!();
}

pub fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
            .template("{spinner:.blue} {msg}")
            .unwrap(),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn create_task_bar(mp: &MultiProgress, file_name: &str, total: u64) -> ProgressBar {
    let pb = mp.add(ProgressBar::new(total));
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} {msg:24!} [{bar:32.cyan/blue}] {bytes}/{total_bytes} ({eta})")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_message(file_name.to_string());
    pb
}

pub fn print_success(message: &str) {
    println!("✅ {}", message.green());
}

pub fn print_error(message: &str) {
    eprintln!("❌ {}", message.red());
}

pub fn print_media_table(entries: &[CachedMedia]) {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(comfy_table::ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("File").add_attribute(Attribute::Bold).fg(Color::Cyan),
        Cell::new("Type").add_attribute(Attribute::Bold).fg(Color::Magenta),
        Cell::new("Size").add_attribute(Attribute::Bold).fg(Color::Green),
        Cell::new("Chapter").add_attribute(Attribute::Bold).fg(Color::Yellow),
        Cell::new("Record").add_attribute(Attribute::Bold),
        Cell::new("URL").add_attribute(Attribute::Bold),
    ]);

    for entry in entries {
        table.add_row(vec![
            Cell::new(&entry.file_name),
            Cell::new(&entry.file_type),
            Cell::new(format_file_size(entry.file_size)),
            Cell::new(entry.chapter.as_deref().unwrap_or("-")),
            Cell::new(entry.record_id.as_deref().unwrap_or("-")),
            Cell::new(&entry.url),
        ]);
    }

    println!("{table}");
}

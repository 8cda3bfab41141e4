//! `refstage catalog` command implementation

use crate::error::Result;
use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};
use refstage_cache::catalog::Layout;
use refstage_cache::{Catalog, CatalogEntry};

/// List every resource kind with its lock and member files
pub fn run() -> Result<()> {
    println!("{}", "Resource Catalog:".cyan().bold());
    println!("{}", render_table(&Catalog::standard()));
    Ok(())
}

fn render_table(catalog: &Catalog) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec!["Kind", "Lock", "Tag", "Marker", "Layout", "Files"]);

    for entry in catalog.entries() {
        let layout = match entry.layout {
            Layout::Prefix => "prefix",
            Layout::Directory => "directory",
        };
        table.add_row(vec![
            entry.kind.to_string(),
            entry.lock_name.clone(),
            entry.detection_suffix.clone(),
            entry.complete_marker.to_string(),
            layout.to_string(),
            describe_files(entry),
        ]);
    }
    table
}

/// Member names one per line, optional ones in brackets
fn describe_files(entry: &CatalogEntry) -> String {
    let name = |member: &String| {
        if member.is_empty() {
            "<source>".to_string()
        } else {
            member.clone()
        }
    };
    entry
        .file_set
        .required
        .iter()
        .map(name)
        .chain(entry.file_set.optional.iter().map(|m| format!("[{}]", name(m))))
        .collect::<Vec<_>>()
        .join("\n")
}

//! Plain-text table layout shared by both engines.

/// Text returned for a result set without rows.
pub const NO_RESULTS: &str = "No results.";

/// Render a header, a dash separator and one line per row.
///
/// Cells are joined by `" | "`. The separator is as long as the header line
/// including its line terminator, so `"id | name"` is followed by ten dashes.
pub fn render_table<H, R, C>(headers: &[H], rows: R) -> String
where
    H: AsRef<str>,
    R: IntoIterator<Item = Vec<C>>,
    C: AsRef<str>,
{
    let header = join_cells(headers);
    let mut out = String::with_capacity(header.len() * 2 + 2);
    out.push_str(&header);
    out.push('\n');
    out.push_str(&"-".repeat(header.chars().count() + 1));
    out.push('\n');

    for row in rows {
        out.push_str(&join_cells(&row));
        out.push('\n');
    }
    out
}

fn join_cells<C: AsRef<str>>(cells: &[C]) -> String {
    cells
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(" | ")
}

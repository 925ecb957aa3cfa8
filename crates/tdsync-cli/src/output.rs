use serde::Serialize;
use tdsync_core::batch::BatchReport;

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{}", json);
    Ok(())
}

pub fn print_table(headers: &[&str], rows: Vec<Vec<String>>) {
    print!("{}", render_table(headers, &rows));
}

/// Left-aligned columns separated by two spaces. The last column is never
/// padded, so long titles and error details do not drag trailing blanks.
fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let line = |cells: Vec<&str>| {
        let last = cells.len().saturating_sub(1);
        let mut out = String::new();
        for (i, cell) in cells.into_iter().enumerate() {
            if i == last {
                out.push_str(cell);
            } else {
                let pad = widths[i].saturating_sub(cell.chars().count());
                out.push_str(cell);
                out.push_str(&" ".repeat(pad + 2));
            }
        }
        out.truncate(out.trim_end().len());
        out.push('\n');
        out
    };

    let rule: Vec<String> = widths.iter().map(|&w| "-".repeat(w)).collect();
    let mut out = line(headers.to_vec());
    out.push_str(&line(rule.iter().map(String::as_str).collect()));
    for row in rows {
        out.push_str(&line(
            row.iter().take(widths.len()).map(String::as_str).collect(),
        ));
    }
    out
}

/// One row per processed item: ok, skipped, then failed.
pub fn print_report(report: &BatchReport) {
    if report.succeeded.is_empty() && report.skipped.is_empty() && report.failed.is_empty() {
        println!("Nothing to do.");
        return;
    }
    let rows = [
        ("ok", &report.succeeded),
        ("skipped", &report.skipped),
        ("failed", &report.failed),
    ]
    .into_iter()
    .flat_map(|(status, outcomes)| {
        outcomes
            .iter()
            .map(move |o| vec![status.to_string(), o.item.clone(), o.detail.clone()])
    })
    .collect();
    print_table(&["STATUS", "ITEM", "DETAIL"], rows);
}

/// Turn per-item failures into a non-zero exit.
pub fn ensure_no_failures(report: &BatchReport) -> anyhow::Result<()> {
    if report.has_failures() {
        anyhow::bail!("{} item(s) failed", report.failed.len());
    }
    Ok(())
}

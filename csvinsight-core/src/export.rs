use crate::partition::{ColumnReport, Report};
use csvinsight_common::{CsvInsightError, Result};
use std::io::Write;
use std::path::Path;

// --- plain-text report ---

pub fn print_report<W: Write>(report: &Report, out: &mut W) -> Result<()> {
    writeln!(out, "CSV Insight Report")?;
    if let Some(path) = &report.path {
        writeln!(out, "Path: {}", path.display())?;
    }
    writeln!(out, "Total # Rows: {}", report.total_rows())?;
    writeln!(out, "Column counts:")?;
    for (num_cols, rows) in report.histogram.by_frequency() {
        writeln!(out, "        {num_cols}  columns ->  {rows} rows")?;
    }
    writeln!(out)?;
    for column in &report.columns {
        print_column(column, out)?;
    }
    Ok(())
}

fn print_column<W: Write>(column: &ColumnReport, out: &mut W) -> Result<()> {
    let s = &column.summary;
    let uniques = if s.num_uniques < 0 {
        "-".to_string()
    } else {
        s.num_uniques.to_string()
    };
    writeln!(
        out,
        "{:3}. {} -> Uniques: {uniques} ; Fills: {} ; Fill Rate: {:.1}%",
        column.number, column.name, s.num_fills, s.fill_rate
    )?;
    writeln!(
        out,
        "       Field Length:  min {}, max {}, avg {:.2}",
        s.min_len, s.max_len, s.avg_len
    )?;
    if s.num_uniques < 0 {
        writeln!(out)?;
        return Ok(());
    }
    writeln!(out, "{:>10}  {:>12}  Field Value", "Counts", "Percent")?;
    let total = s.num_values as f64;
    let mut remainder = s.num_values;
    for entry in &s.most_common {
        let value = if entry.value.is_empty() { "NULL" } else { entry.value.as_str() };
        writeln!(
            out,
            "{:10}  {:10.2} %  {value}",
            entry.frequency,
            entry.frequency as f64 * 100.0 / total
        )?;
        remainder = remainder.saturating_sub(entry.frequency);
    }
    if remainder > 0 {
        writeln!(
            out,
            "{remainder:10}  {:10.2} %  Other",
            remainder as f64 * 100.0 / total
        )?;
    }
    writeln!(out)?;
    Ok(())
}

// --- JSON export ---

pub fn export_json(output_path: &Path, report: &Report) -> Result<()> {
    let file = std::fs::File::create(output_path)?;
    let mut writer = std::io::BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, report)
        .map_err(|e| CsvInsightError::Serialization(e.to_string()))?;
    writer.flush()?;
    Ok(())
}

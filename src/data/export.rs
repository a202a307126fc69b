use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};

use super::trace::{with_values, Element, Trace};

// ---------------------------------------------------------------------------
// CSV export
// ---------------------------------------------------------------------------

/// CSV layout: a header row `row,0,1,…,<cols-1>` (the column indices, i.e.
/// cache sets), then one line per observation prefixed with its row index.
/// Values keep their native formatting (`u8`/`i64` as integers).
pub fn write_trace_csv<W: Write>(trace: &Trace, writer: W) -> Result<()> {
    let mut out = csv::Writer::from_writer(writer);

    let mut header = Vec::with_capacity(trace.cols() + 1);
    header.push("row".to_string());
    header.extend((0..trace.cols()).map(|c| c.to_string()));
    out.write_record(&header).context("writing CSV header")?;

    let (rows, cols) = trace.shape();
    with_values!(trace.values(), v => write_rows(&mut out, v.as_slice(), rows, cols))?;

    out.flush().context("flushing CSV")?;
    Ok(())
}

fn write_rows<W: Write, T: Element + ToString>(
    out: &mut csv::Writer<W>,
    data: &[T],
    rows: usize,
    cols: usize,
) -> Result<()> {
    for (r, row) in super::trace::rows_of(data, rows, cols).enumerate() {
        let record = std::iter::once(r.to_string()).chain(row.iter().map(|v| v.to_string()));
        out.write_record(record)
            .with_context(|| format!("writing CSV row {r}"))?;
    }
    Ok(())
}

/// Export a trace to a CSV file at `path`.
pub fn export_trace_csv(trace: &Trace, path: &Path) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("creating {}", path.display()))?;
    write_trace_csv(trace, file)
}

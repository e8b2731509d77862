//! Result export
//!
//! Writes delimited text from an explicit column list. Each column pairs a
//! header with an accessor; nothing is discovered by reflection.

use crate::core::session::Pin;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// One exported column
pub struct Column<T> {
    /// Header text
    pub name: &'static str,
    /// Cell value for a row
    pub value: fn(&T) -> String,
}

fn pin_name(pin: &Pin) -> String {
    pin.name().to_string()
}

fn pin_result(pin: &Pin) -> String {
    pin.result().to_string()
}

/// Columns of the pin result export
pub const PIN_COLUMNS: [Column<Pin>; 2] = [
    Column {
        name: "Pin",
        value: pin_name,
    },
    Column {
        name: "Test Result",
        value: pin_result,
    },
];

/// Commas would break the column layout
fn sanitize(value: &str) -> String {
    value.replace(',', " ")
}

/// Write `rows` as comma separated text with a header line
pub fn write_csv<T, W: Write>(mut writer: W, columns: &[Column<T>], rows: &[T]) -> io::Result<()> {
    let header: Vec<String> = columns.iter().map(|c| sanitize(c.name)).collect();
    writeln!(writer, "{}", header.join(","))?;

    for row in rows {
        let cells: Vec<String> = columns.iter().map(|c| sanitize(&(c.value)(row))).collect();
        writeln!(writer, "{}", cells.join(","))?;
    }
    writer.flush()
}

/// Export pin results to `path`
pub fn export_pins(path: &Path, pins: &[Pin]) -> io::Result<()> {
    let file = File::create(path)?;
    write_csv(BufWriter::new(file), &PIN_COLUMNS, pins)
}

/// Suggested file name for a named test
pub fn default_file_name(test_name: &str) -> String {
    let name = test_name.trim();
    if name.is_empty() {
        "results.csv".to_string()
    } else {
        format!("{}.csv", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Row {
        label: &'static str,
        count: u32,
    }

    #[test]
    fn test_explicit_columns() {
        let columns = [
            Column::<Row> {
                name: "Label",
                value: |r| r.label.to_string(),
            },
            Column::<Row> {
                name: "Count",
                value: |r| r.count.to_string(),
            },
        ];
        let rows = [Row { label: "a,b", count: 3 }];

        let mut out = Vec::new();
        write_csv(&mut out, &columns, &rows).unwrap();

        assert_eq!(String::from_utf8(out).unwrap(), "Label,Count\na b,3\n");
    }

    #[test]
    fn test_pin_export() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.csv");
        let pins: Vec<Pin> = (0..3).map(Pin::new).collect();

        export_pins(&path, &pins).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "Pin,Test Result\n1,Untested\n2,Untested\n3,Untested\n");
    }

    #[test]
    fn test_default_file_name() {
        assert_eq!(default_file_name("  Harness 7 "), "Harness 7.csv");
        assert_eq!(default_file_name(""), "results.csv");
    }
}

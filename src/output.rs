//! CSV output of unified frames: a `date` column followed by the value
//! columns, empty cells for nulls.

use crate::model::{Result, TimeFrame, DATE_COLUMN};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn write_csv<W: Write>(frame: &TimeFrame, writer: W) -> Result<()> {
    let mut out = csv::Writer::from_writer(writer);

    let header = std::iter::once(DATE_COLUMN).chain(frame.columns.iter().map(String::as_str));
    out.write_record(header).map_err(std::io::Error::from)?;

    for row in &frame.rows {
        let mut record = Vec::with_capacity(row.values.len() + 1);
        record.push(row.timestamp.format(TIMESTAMP_FORMAT).to_string());
        record.extend(
            row.values
                .iter()
                .map(|v| v.as_ref().map(|v| v.to_string()).unwrap_or_default()),
        );
        out.write_record(&record).map_err(std::io::Error::from)?;
    }

    out.flush()?;
    Ok(())
}

/// Writes `<dir>/<code>.csv`, creating `dir` if needed.
pub fn write_station_csv(dir: &Path, code: &str, frame: &TimeFrame) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}.csv", code));
    let file = std::fs::File::create(&path)?;
    write_csv(frame, std::io::BufWriter::new(file))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Value;
    use chrono::NaiveDate;

    #[test]
    fn test_csv_layout() {
        let day = NaiveDate::from_ymd_opt(2023, 6, 1).unwrap();
        let mut frame = TimeFrame::new(["flow", "description"]);
        frame.push(
            day.and_hms_opt(0, 0, 0).unwrap(),
            vec![Some(Value::Number(12.5)), Some(Value::Category("light rain, wind".into()))],
        );
        frame.push(day.and_hms_opt(1, 0, 0).unwrap(), vec![Some(Value::Number(13.0)), None]);

        let mut buf = Vec::new();
        write_csv(&frame, &mut buf).expect("write to memory");
        let text = String::from_utf8(buf).unwrap();

        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "date,flow,description");
        assert_eq!(lines[1], "2023-06-01 00:00:00,12.5,\"light rain, wind\"");
        assert_eq!(lines[2], "2023-06-01 01:00:00,13,");
    }
}

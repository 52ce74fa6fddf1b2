//! Dated-row extraction from noisy provider output.
//!
//! Archive CSVs and scraped tables wrap their data block in disclaimers,
//! column headers and trailing totals. The valid block is bounded by the
//! first row from the top and the first row from the bottom that look
//! dated; everything outside is discarded regardless of content.

use regex::Regex;
use std::sync::LazyLock;

static ROW_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<tr\b[^>]*>(.*?)</tr>").expect("valid row pattern"));
static CELL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<t([hd])\b[^>]*>(.*?)</t[hd]>").expect("valid cell pattern")
});
static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid tag pattern"));
static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid ws pattern"));

/// Returns the inclusive slice between the first and last row satisfying
/// `is_dated`, or an empty slice when no row does.
pub fn extract_range<T>(rows: &[T], is_dated: impl Fn(&T) -> bool) -> &[T] {
    let Some(start) = rows.iter().position(|r| is_dated(r)) else {
        return &[];
    };
    // `start` matched, so the reverse scan always finds something at or after it.
    let end = rows.iter().rposition(|r| is_dated(r)).unwrap_or(start);
    &rows[start..=end]
}

/// Line-oriented extraction: every line of `text` is tested against
/// `date_pattern` (unanchored search).
pub fn extract<'a>(text: &'a str, date_pattern: &Regex) -> Vec<&'a str> {
    let lines: Vec<&str> = text.lines().collect();
    extract_range(&lines, |line| date_pattern.is_match(line)).to_vec()
}

/// Table extraction: the date pattern is tested against each row's first cell.
pub fn extract_rows<'a>(rows: &'a [Vec<String>], date_pattern: &Regex) -> &'a [Vec<String>] {
    extract_range(rows, |row| {
        row.first().is_some_and(|cell| date_pattern.is_match(cell))
    })
}

/// Splits the `<tr>` rows of an HTML table into trimmed cell text.
///
/// Rows without any `<th>`/`<td>` cell are skipped. Nested markup inside a
/// cell is stripped and common entities are decoded.
pub fn html_table_rows(html: &str) -> Vec<Vec<String>> {
    ROW_RE
        .captures_iter(html)
        .filter_map(|row| {
            let cells: Vec<String> = CELL_RE
                .captures_iter(&row[1])
                .map(|cell| cell_text(&cell[2]))
                .collect();
            (!cells.is_empty()).then_some(cells)
        })
        .collect()
}

fn cell_text(inner: &str) -> String {
    let stripped = TAG_RE.replace_all(inner, " ");
    let decoded = stripped
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    WS_RE.replace_all(decoded.trim(), " ").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iso_pattern() -> Regex {
        Regex::new(r"\d{4}-\d{2}-\d{2} \d{2}:\d{2}").unwrap()
    }

    #[test]
    fn test_extract_drops_headers_and_footers() {
        let mut text = String::from(
            "Sistema Automatico de Informacion\nEstacion de aforo 2087\nFecha\tCalidad\tCaudal\n",
        );
        for hour in 0..10 {
            text.push_str(&format!("2023-01-01 {:02}:00\tV\t{}.5\n", hour, hour + 10));
        }
        text.push_str("Total registros: 10\nFin del fichero\n");

        let rows = extract(&text, &iso_pattern());
        assert_eq!(rows.len(), 10, "exactly the dated rows should survive");
        assert!(rows[0].starts_with("2023-01-01 00:00"));
        assert!(rows[9].starts_with("2023-01-01 09:00"));
    }

    #[test]
    fn test_extract_keeps_undated_rows_inside_the_block() {
        let text = "header\n2023-01-01 00:00\t\t1\n-- sensor reset --\n2023-01-01 02:00\t\t3\nfooter";
        let rows = extract(text, &iso_pattern());
        assert_eq!(rows.len(), 3, "noise between dated rows is inside the range");
        assert_eq!(rows[1], "-- sensor reset --");
    }

    #[test]
    fn test_extract_without_any_dated_row_is_empty() {
        let rows = extract("no\ndates\nhere", &iso_pattern());
        assert!(rows.is_empty());
        assert!(extract("", &iso_pattern()).is_empty());
    }

    #[test]
    fn test_extract_single_dated_row() {
        let rows = extract("x\n2023-05-01 10:00\t\t3\ny", &iso_pattern());
        assert_eq!(rows, vec!["2023-05-01 10:00\t\t3"]);
    }

    #[test]
    fn test_html_table_rows_reads_header_and_cells() {
        let html = r#"<table id="DataTables_Table_0">
            <thead><tr><th>Fecha</th><th>Caudal (m&sup3;/s)</th></tr></thead>
            <tbody>
              <tr class="odd"><td>03/06/2023 00:00</td><td> 12,5 </td></tr>
              <tr class="even"><td><span>03/06/2023 01:00</span></td><td>12,7</td></tr>
            </tbody></table>"#;
        let rows = html_table_rows(html);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0][0], "Fecha");
        assert_eq!(rows[1], vec!["03/06/2023 00:00", "12,5"]);
        assert_eq!(rows[2], vec!["03/06/2023 01:00", "12,7"]);
    }

    #[test]
    fn test_extract_rows_matches_on_first_cell() {
        let pattern = Regex::new(r"\d{2}/\d{2}/\d{4} \d{2}:\d{2}").unwrap();
        let rows = vec![
            vec!["Fecha".to_string(), "Valor".to_string()],
            vec!["03/06/2023 00:00".to_string(), "1,0".to_string()],
            vec!["03/06/2023 01:00".to_string(), "1,1".to_string()],
            vec!["Mostrando 2 registros".to_string()],
        ];
        let block = extract_rows(&rows, &pattern);
        assert_eq!(block.len(), 2);
        assert_eq!(block[0][1], "1,0");
    }
}

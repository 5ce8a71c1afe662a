//! China Merchants Bank credit card (招商银行信用卡): the statement is the
//! HTML body itself; extraction turns its transaction table into CSV.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::warn;

use super::{write_artifact, Provider};
use crate::error::{BillError, Result};
use crate::model::{ExtractOptions, Message};

/// CSV header, one column per transaction cell.
pub const CSV_HEADER: [&str; 7] = [
    "交易日",
    "记账日",
    "交易摘要",
    "人民币金额",
    "卡号末四位",
    "交易地金额",
    "交易地",
];

static PERIOD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{4})年(\d{1,2})月").expect("valid regex"));
static PERIOD_LOOSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{4}).*?(\d{1,2})月").expect("valid regex"));

#[derive(Debug, Clone, Copy, Default)]
pub struct Cmbcc;

impl Provider for Cmbcc {
    fn name(&self) -> &'static str {
        "cmbcc"
    }

    fn label(&self) -> &'static str {
        "招商银行信用卡"
    }

    fn artifact_suffix(&self) -> &'static str {
        ".html"
    }

    /// Save the decoded HTML body as `cmbcc_{uid}.html` (UTF-8).
    fn stage(&self, message: &Message, output_dir: &Path) -> Result<Vec<PathBuf>> {
        let html = message
            .html_body()
            .filter(|body| !body.trim().is_empty())
            .ok_or(BillError::NoHtmlBody)?;
        let name = format!("{}.html", message.id);
        let path = write_artifact(output_dir, &self.prefix(), &name, html.as_bytes())?;
        Ok(vec![path])
    }

    /// Write the statement table to `cmbcc_{YYYY}_{MM}.csv`.
    fn unpack(&self, artifact: &Path, extract_dir: &Path, _options: &ExtractOptions) -> Result<Vec<PathBuf>> {
        let bytes = std::fs::read(artifact).map_err(|e| BillError::io(artifact, e))?;
        let html = String::from_utf8_lossy(&bytes);

        let rows = statement_rows(&html);
        if rows.is_empty() {
            warn!(artifact = %artifact.display(), "No transaction rows found");
        }

        std::fs::create_dir_all(extract_dir).map_err(|e| BillError::io(extract_dir, e))?;
        let path = extract_dir.join(format!("{}{}.csv", self.prefix(), statement_period(&html)));
        std::fs::write(&path, render_csv(&rows)).map_err(|e| BillError::io(&path, e))?;
        Ok(vec![path])
    }
}

/// Transaction rows from the statement HTML, seven cells each.
///
/// Transactions sit in `<tr>` elements styled `width:608px` and
/// `height:17px`; each holds a nested table whose first cell is a spacer.
pub fn statement_rows(html: &str) -> Vec<Vec<String>> {
    let document = Html::parse_document(html);
    let tr = selector("tr");
    let table = selector("table");
    let td = selector("td");

    document
        .select(&tr)
        .filter(|row| {
            row.value()
                .attr("style")
                .is_some_and(|s| s.contains("width:608px") && s.contains("height:17px"))
        })
        .filter_map(|row| row.select(&table).next())
        .filter_map(|inner| {
            let cells: Vec<ElementRef<'_>> = inner.select(&td).collect();
            if cells.len() < 7 {
                return None;
            }
            let data: Vec<String> = (1..=7)
                .map(|i| cells.get(i).map(cell_text).unwrap_or_default())
                .collect();
            data.iter().any(|c| !c.is_empty()).then_some(data)
        })
        .collect()
}

/// `YYYY_MM` from the first `YYYY年M月` in the document, `unknown` if none.
pub fn statement_period(html: &str) -> String {
    PERIOD
        .captures(html)
        .or_else(|| PERIOD_LOOSE.captures(html))
        .map(|caps| format!("{}_{:0>2}", &caps[1], &caps[2]))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Header plus rows, CRLF-terminated.
pub fn render_csv(rows: &[Vec<String>]) -> String {
    let mut out = String::new();
    push_row(&mut out, CSV_HEADER.iter().copied());
    for row in rows {
        push_row(&mut out, row.iter().map(String::as_str));
    }
    out
}

fn push_row<'a>(out: &mut String, cells: impl Iterator<Item = &'a str>) {
    let line: Vec<String> = cells.map(csv_escape).collect();
    out.push_str(&line.join(","));
    out.push_str("\r\n");
}

/// Text of a cell with whitespace-only fragments dropped and currency marks removed.
fn cell_text(cell: &ElementRef<'_>) -> String {
    let joined: String = cell.text().map(str::trim).filter(|t| !t.is_empty()).collect();
    joined
        .replace('\r', "")
        .replace('\n', " ")
        .replace(['¥', '￥', '\u{a0}'], "")
        .trim()
        .to_string()
}

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("valid selector")
}

/// Escape a value for CSV (RFC 4180).
///
/// Wraps in double quotes if the value contains commas, quotes, or newlines.
fn csv_escape(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

//! Keypoint log reading.
//!
//! A session carries one table per hand. Each table is CSV with a header row
//! and one row per detected frame:
//! `timestampMs, frameNumber, handedness, confidence, x0, y0, z0, ... x20, y20, z20`.
//! The two tables are merged into a single [`KeypointLog`] keyed by timestamp.

use crate::error::{KeypointParseWarning, LabelError, Result};
use crate::types::{HandLandmarks, Handedness, KeypointFrame, KeypointLog, LANDMARK_COUNT, Landmark};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Leading columns before the landmark block.
const META_COLUMNS: usize = 4;
pub const TABLE_COLUMNS: usize = META_COLUMNS + LANDMARK_COUNT * 3;

#[derive(Debug, Clone, PartialEq)]
pub struct KeypointRow {
    pub timestamp_ms: i64,
    pub frame_number: i64,
    pub confidence: f32,
    pub landmarks: HandLandmarks,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeypointTable {
    pub name: String,
    pub handedness: Handedness,
    pub rows: Vec<KeypointRow>,
    pub warnings: Vec<KeypointParseWarning>,
}

impl KeypointTable {
    pub fn skipped_rows(&self) -> usize {
        self.warnings.len()
    }
}

/// Merged log plus what was dropped on the way.
#[derive(Debug, Clone)]
pub struct KeypointLogReport {
    pub log: KeypointLog,
    pub warnings: Vec<KeypointParseWarning>,
}

impl KeypointLogReport {
    /// Rows skipped from one table, by table name.
    pub fn skipped_rows(&self, table: &str) -> usize {
        self.warnings.iter().filter(|w| w.table == table).count()
    }
}

pub const LEFT_TABLE: &str = "Left Hand";
pub const RIGHT_TABLE: &str = "Right Hand";

pub struct KeypointLogReader;

impl KeypointLogReader {
    pub fn read_files(left: &Path, right: &Path) -> Result<KeypointLogReport> {
        let left_text = read_table_file(left)?;
        let right_text = read_table_file(right)?;
        Self::read_strs(&left_text, &right_text)
    }

    pub fn read_strs(left: &str, right: &str) -> Result<KeypointLogReport> {
        let left = parse_table(LEFT_TABLE, Handedness::Left, left)?;
        let right = parse_table(RIGHT_TABLE, Handedness::Right, right)?;

        info!(
            "Keypoint tables parsed: left {} rows ({} skipped), right {} rows ({} skipped)",
            left.rows.len(),
            left.skipped_rows(),
            right.rows.len(),
            right.skipped_rows()
        );

        let log = merge_tables(&[&left, &right]);
        let warnings = left.warnings.into_iter().chain(right.warnings).collect();

        Ok(KeypointLogReport { log, warnings })
    }
}

fn read_table_file(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(LabelError::InputMissing(path.to_path_buf()));
    }

    fs::read_to_string(path)
        .map_err(|e| LabelError::MediaUnreadable(format!("{}: {}", path.display(), e)))
}

/// Parses one hand table. Only a missing or short header is fatal; bad rows
/// become warnings.
pub fn parse_table(name: &str, handedness: Handedness, text: &str) -> Result<KeypointTable> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());
    let mut records = reader
        .records()
        .filter(|record| !matches!(record, Ok(r) if r.iter().all(str::is_empty)));

    let header = records
        .next()
        .ok_or_else(|| LabelError::MediaUnreadable(format!("{name}: missing header row")))?
        .map_err(|e| LabelError::MediaUnreadable(format!("{name}: unreadable header: {e}")))?;

    let header_columns = header.len();
    if header_columns < TABLE_COLUMNS {
        return Err(LabelError::MediaUnreadable(format!(
            "{name}: header has {header_columns} columns, expected {TABLE_COLUMNS}"
        )));
    }

    let mut rows = Vec::new();
    let mut warnings = Vec::new();
    let mut seen = HashSet::new();

    for record in records {
        let (line_number, parsed) = match record {
            Ok(record) => (line_of(record.position()), parse_row(&record)),
            Err(e) => (line_of(e.position()), Err(e.to_string())),
        };
        let row = match parsed {
            Ok(row) => row,
            Err(reason) => {
                warn!("Skipping {} row {}: {}", name, line_number, reason);
                warnings.push(KeypointParseWarning {
                    table: name.to_string(),
                    line: line_number,
                    reason,
                });
                continue;
            }
        };

        if !seen.insert(row.timestamp_ms) {
            let reason = format!("duplicate timestamp {}", row.timestamp_ms);
            warn!("Skipping {} row {}: {}", name, line_number, reason);
            warnings.push(KeypointParseWarning {
                table: name.to_string(),
                line: line_number,
                reason,
            });
            continue;
        }

        rows.push(row);
    }

    debug!("{}: {} rows, {} warnings", name, rows.len(), warnings.len());

    Ok(KeypointTable {
        name: name.to_string(),
        handedness,
        rows,
        warnings,
    })
}

fn line_of(position: Option<&csv::Position>) -> usize {
    position.map_or(0, |p| p.line() as usize)
}

fn parse_row(record: &csv::StringRecord) -> std::result::Result<KeypointRow, String> {
    let cells: Vec<&str> = record.iter().collect();
    if cells.len() < TABLE_COLUMNS {
        return Err(format!("expected {} columns, found {}", TABLE_COLUMNS, cells.len()));
    }

    let timestamp_ms = parse_integer(cells[0]).ok_or("invalid timestamp")?;
    let frame_number = parse_integer(cells[1]).ok_or("invalid frame number")?;
    let confidence = parse_float(cells[3]).ok_or("invalid confidence")?;

    let mut landmarks = [Landmark::default(); LANDMARK_COUNT];
    for (i, landmark) in landmarks.iter_mut().enumerate() {
        let base = META_COLUMNS + i * 3;
        let (x, y, z) = (
            parse_float(cells[base]),
            parse_float(cells[base + 1]),
            parse_float(cells[base + 2]),
        );
        match (x, y, z) {
            (Some(x), Some(y), Some(z)) => *landmark = Landmark::new(x, y, z),
            _ => return Err(format!("invalid landmark {}", i)),
        }
    }

    Ok(KeypointRow {
        timestamp_ms,
        frame_number,
        confidence,
        landmarks,
    })
}

fn parse_integer(cell: &str) -> Option<i64> {
    if let Ok(v) = cell.parse::<i64>() {
        return Some(v);
    }
    // Spreadsheet exports write integers as floats
    cell.parse::<f64>().ok().filter(|v| v.is_finite()).map(|v| v as i64)
}

fn parse_float(cell: &str) -> Option<f32> {
    cell.parse::<f32>().ok().filter(|v| v.is_finite())
}

/// Builds one frame per distinct timestamp across all tables. Hands appear
/// in table order, so passing `[left, right]` keeps left before right.
pub fn merge_tables(tables: &[&KeypointTable]) -> KeypointLog {
    let mut by_timestamp: BTreeMap<i64, KeypointFrame> = BTreeMap::new();

    for table in tables {
        for row in &table.rows {
            let frame = by_timestamp.entry(row.timestamp_ms).or_insert_with(|| KeypointFrame {
                timestamp_ms: row.timestamp_ms,
                frame_number: row.frame_number,
                hands: Vec::with_capacity(tables.len()),
                hand_labels: Vec::with_capacity(tables.len()),
            });
            frame.hands.push(row.landmarks);
            frame.hand_labels.push(table.handedness);
        }
    }

    KeypointLog::new(by_timestamp.into_values().collect())
}

// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Bounded history of graded items with JSON and CSV export

use std::collections::VecDeque;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sorter_hal::{Grade, GradeRecord};
use tracing::info;

use crate::error::Result;

pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

/// Separator for the defect list inside one CSV field
pub const CSV_DEFECT_SEPARATOR: &str = ";";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    /// `.csv` exports as CSV, anything else as JSON
    pub fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => ExportFormat::Csv,
            _ => ExportFormat::Json,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub sequence_id: u64,
    pub trigger_position: i64,
    pub recorded_at: DateTime<Utc>,
    pub record: GradeRecord,
}

/// One CSV line; defects are joined into a single field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CsvRow {
    pub sequence_id: u64,
    pub trigger_position: i64,
    pub item_id: String,
    pub grade: Grade,
    pub length: f64,
    pub diameter: f64,
    pub defects: String,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

impl From<&HistoryEntry> for CsvRow {
    fn from(entry: &HistoryEntry) -> Self {
        Self {
            sequence_id: entry.sequence_id,
            trigger_position: entry.trigger_position,
            item_id: entry.record.item_id.clone(),
            grade: entry.record.grade,
            length: entry.record.length_mm,
            diameter: entry.record.diameter_mm,
            defects: entry.record.defects.join(CSV_DEFECT_SEPARATOR),
            confidence: entry.record.confidence,
            timestamp: entry.recorded_at,
        }
    }
}

impl CsvRow {
    pub fn defect_list(&self) -> Vec<String> {
        self.defects
            .split(CSV_DEFECT_SEPARATOR)
            .filter(|d| !d.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GradeDistribution {
    pub a: usize,
    pub b: usize,
    pub c: usize,
}

/// Most recent results, oldest evicted first
#[derive(Debug)]
pub struct ResultHistory {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
}

impl ResultHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(DEFAULT_HISTORY_CAPACITY)),
            capacity,
        }
    }

    pub fn push(&mut self, entry: HistoryEntry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Newest last
    pub fn recent(&self, count: usize) -> Vec<HistoryEntry> {
        let skip = self.entries.len().saturating_sub(count);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    pub fn distribution(&self) -> GradeDistribution {
        self.entries
            .iter()
            .fold(GradeDistribution::default(), |mut dist, entry| {
                match entry.record.grade {
                    Grade::A => dist.a += 1,
                    Grade::B => dist.b += 1,
                    Grade::C => dist.c += 1,
                }
                dist
            })
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Export in `format`; returns the entry count
    pub fn export(&self, path: &Path, format: ExportFormat) -> Result<usize> {
        match format {
            ExportFormat::Json => self.export_json(path),
            ExportFormat::Csv => self.export_csv(path),
        }
    }

    /// Write all entries as a pretty JSON array; returns the entry count
    pub fn export_json(&self, path: &Path) -> Result<usize> {
        let writer = BufWriter::new(create_export_file(path)?);
        let entries: Vec<&HistoryEntry> = self.entries.iter().collect();
        serde_json::to_writer_pretty(writer, &entries)?;
        info!(
            "[COORDINATOR] exported {} result(s) to {}",
            entries.len(),
            path.display()
        );
        Ok(entries.len())
    }

    /// Header plus one row per entry, defects joined with `;`
    pub fn export_csv(&self, path: &Path) -> Result<usize> {
        let mut writer = csv::Writer::from_writer(BufWriter::new(create_export_file(path)?));
        for entry in &self.entries {
            writer.serialize(CsvRow::from(entry))?;
        }
        writer.flush()?;
        info!(
            "[COORDINATOR] exported {} result(s) to {}",
            self.entries.len(),
            path.display()
        );
        Ok(self.entries.len())
    }
}

fn create_export_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(File::create(path)?)
}

impl Default for ResultHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

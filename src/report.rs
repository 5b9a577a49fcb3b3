//! The end-of-run leak report.
//!
//! A [`Report`] is a plain snapshot of the registry: the running totals and
//! every record still live. It renders to the fixed text layout printed at
//! exit (through [`fmt::Display`]) and round-trips through JSON.

use std::{
    fmt,
    fs::File,
    io::{self, BufWriter, Write},
    path::Path,
};

use serde::{Deserialize, Serialize};

use crate::{
    alloc::registry::{AllocationRecord, Registry},
    origin::Origin,
    serialize::serde_hex,
};

const BANNER: &str = "========= MEMORY LEAK DETECTOR REPORT =========";
const DETAILS: &str = "======== LEAK DETAILS ========";
const FOOTER: &str = "==============================================";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub allocations: usize,
    pub frees: usize,
    pub total_allocated: usize,
    pub total_freed: usize,
    /// `None` when more was freed than allocated
    pub leaked: Option<usize>,
    pub untracked: usize,
}

impl Summary {
    /// Leaked bytes as a percentage of everything allocated. `None` when
    /// nothing was allocated or the totals do not add up.
    pub fn leak_percentage(&self) -> Option<f64> {
        match self.leaked {
            Some(leaked) if self.total_allocated > 0 => {
                Some(leaked as f64 * 100.0 / self.total_allocated as f64)
            }
            _ => None,
        }
    }
}

/// A live record at the time the report was taken.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeakEntry {
    #[serde(with = "serde_hex")]
    pub address: usize,
    pub size: usize,
    pub origin: Origin,
}

impl From<&AllocationRecord> for LeakEntry {
    fn from(record: &AllocationRecord) -> Self {
        Self {
            address: record.address,
            size: record.size,
            origin: record.origin.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub summary: Summary,
    pub leaks: Vec<LeakEntry>,
}

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum ReportWriteError {
    #[error("i/o error: {0}")]
    IoError(#[from] io::Error),
    #[error("json error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),
}

impl Report {
    pub fn from_registry(registry: &Registry) -> Self {
        let stats = registry.stats();
        Self {
            summary: Summary {
                allocations: stats.allocations,
                frees: stats.frees,
                total_allocated: stats.total_allocated,
                total_freed: stats.total_freed,
                leaked: stats.leaked(),
                untracked: stats.untracked,
            },
            leaks: registry.live().map(LeakEntry::from).collect(),
        }
    }

    /// Render the text report into `w`.
    pub fn write_to(&self, mut w: impl Write) -> io::Result<()> {
        write!(w, "{self}")?;
        w.flush()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ReportWriteError> {
        let mut w = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut w, self)?;
        w.flush()?;
        Ok(())
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = &self.summary;
        writeln!(f)?;
        writeln!(f, "{BANNER}")?;
        writeln!(f, "Total Allocations:      {}", s.allocations)?;
        writeln!(f, "Total Frees:            {}", s.frees)?;
        writeln!(f, "Total Memory Allocated: {} bytes", s.total_allocated)?;
        writeln!(f, "Total Memory Freed:     {} bytes", s.total_freed)?;

        let Some(leaked) = s.leaked else {
            writeln!(
                f,
                "Memory Leaked:          inconsistent ({} bytes more freed than allocated)",
                s.total_freed - s.total_allocated
            )?;
            writeln!(f)?;
            writeln!(f, "Internal consistency error: frees exceed recorded allocations.")?;
            return writeln!(f, "{FOOTER}");
        };

        writeln!(f, "Memory Leaked:          {leaked} bytes")?;
        if let Some(percentage) = s.leak_percentage() {
            writeln!(f, "Leak Percentage:        {percentage:.2}%")?;
        }

        writeln!(f)?;
        if leaked > 0 {
            writeln!(f, "{DETAILS}")?;
            for leak in &self.leaks {
                writeln!(f, "Leaked Memory:")?;
                writeln!(f, "  - Address:  {:#x}", leak.address)?;
                writeln!(f, "  - Size:     {} bytes", leak.size)?;
                writeln!(f, "  - Location: {}", leak.origin)?;
            }
        } else {
            writeln!(f, "No memory leaks detected. All allocations were properly freed!")?;
        }
        writeln!(f, "{FOOTER}")
    }
}

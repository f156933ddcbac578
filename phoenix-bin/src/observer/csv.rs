use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use log::{debug, error, warn};
use phoenix_core::bit_flips::BitFlip;
use phoenix_core::observer::{FuzzPoint, HammerObserver};
use phoenix_core::util::is_root;

/// Column names of the bit flip CSV.
pub const CSV_HEADER: [&str; 13] = [
    "timestamp",
    "reads_per_trefi",
    "sync_cycles_threshold",
    "row_base_offset",
    "virt_addr",
    "subch",
    "rank",
    "bg",
    "bank",
    "row",
    "col",
    "expected_hex",
    "actual_hex",
];

/// Appends every flipped byte to a CSV file.
///
/// The header is written only if the file does not start with it yet, so repeated runs
/// accumulate into one file.
pub struct CsvWriterObserver {
    path: PathBuf,
    writer: csv::Writer<File>,
}

fn has_header(path: &Path) -> bool {
    let Ok(file) = File::open(path) else {
        return false;
    };
    let mut first_line = String::new();
    if BufReader::new(file).read_line(&mut first_line).is_err() {
        return false;
    }
    first_line.starts_with(&CSV_HEADER.join(","))
}

fn chown_to_sudo_user(path: &Path) {
    let ids = std::env::var("SUDO_UID")
        .ok()
        .zip(std::env::var("SUDO_GID").ok());
    let Some((uid, gid)) = ids else {
        warn!("SUDO_UID or SUDO_GID not set");
        return;
    };
    let (Ok(uid), Ok(gid)) = (uid.parse::<u32>(), gid.parse::<u32>()) else {
        warn!("Invalid SUDO_UID/SUDO_GID: {}/{}", uid, gid);
        return;
    };
    if let Err(e) = std::os::unix::fs::chown(path, Some(uid), Some(gid)) {
        warn!("Failed to chown {} to invoking user: {}", path.display(), e);
    }
}

impl CsvWriterObserver {
    /// Opens `path` for appending, creating it and its parent directories.
    ///
    /// When running as root, the file is handed to the user that invoked `sudo`.
    ///
    /// # Errors
    ///
    /// Fails on an empty path or if the file cannot be created or written.
    pub fn new(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            bail!("Empty CSV path");
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Cannot create {}", parent.display()))?;
        }
        let needs_header = !has_header(path);
        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
            .with_context(|| format!("Cannot open {}", path.display()))?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if needs_header {
            writer.write_record(CSV_HEADER)?;
            writer.flush()?;
        }
        if is_root() {
            chown_to_sudo_user(path);
        }
        debug!("Writing bit flips to {}", path.display());
        Ok(CsvWriterObserver {
            path: path.to_owned(),
            writer,
        })
    }

    /// The output file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_flips(&mut self, point: &FuzzPoint, flips: &[BitFlip]) -> anyhow::Result<()> {
        let mut sorted = flips.to_vec();
        sorted.sort_by_key(|f| f.addr);
        let timestamp = chrono::Local::now().format("%Y-%m-%dT%H:%M:%S").to_string();
        for flip in sorted {
            let a = flip.addr;
            self.writer.write_record([
                timestamp.clone(),
                point.reads_per_trefi.to_string(),
                point.self_sync_threshold.to_string(),
                point.agg_base_row.to_string(),
                format!("0x{:X}", flip.virt),
                a.subchannel.to_string(),
                a.rank.to_string(),
                a.bank_group.to_string(),
                a.bank.to_string(),
                a.row.to_string(),
                a.column.to_string(),
                format!("0x{:02X}", flip.expected),
                format!("0x{:02X}", flip.actual),
            ])?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

impl HammerObserver for CsvWriterObserver {
    fn on_post_iteration(&mut self, point: &FuzzPoint, flips: &[BitFlip]) {
        if flips.is_empty() {
            return;
        }
        if let Err(e) = self.write_flips(point, flips) {
            error!("Failed to write bit flips to {}: {:?}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phoenix_core::memory::{BitDef, DramAddr, MemConfiguration};
    use phoenix_core::pattern::{BankAddr, PatternAlgorithm, PatternBuilder, PatternParams};

    fn temp_csv(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("phoenix-test-{}-{}", std::process::id(), name))
            .join("bit_flips.csv")
    }

    fn flip(row: usize, column: usize, actual: u8) -> BitFlip {
        BitFlip {
            addr: DramAddr::new(0, 0, 1, 0, row, column),
            virt: 0x4000_0000 + row * 0x1000 + column,
            expected: 0xAA,
            actual,
        }
    }

    #[test]
    fn header_once_and_sorted_rows() -> anyhow::Result<()> {
        let single = |b| vec![BitDef::Single(b)];
        let mem_config = MemConfiguration::from_bitdefs(
            &single(18),
            &[],
            &single(17),
            &single(16),
            &(8..16).rev().map(BitDef::Single).collect::<Vec<_>>(),
            &(0..8).rev().map(BitDef::Single).collect::<Vec<_>>(),
        )?;
        let pattern = PatternBuilder::new(PatternAlgorithm::SkhMod128)
            .assemble_single_bank_pattern(
                &mem_config,
                BankAddr {
                    subchannel: 0,
                    rank: 0,
                    bank_group: 1,
                    bank: 0,
                },
                &PatternParams {
                    base_row: 0,
                    reads_per_trefi: 88,
                    column_stride: 16,
                    aggressor_spacing: 8,
                    trefi_offset_per_bank: 0,
                },
            )?;
        let point = FuzzPoint {
            iteration: 0,
            total_iterations: 1,
            reads_per_trefi: 88,
            self_sync_threshold: 24000,
            agg_base_row: 0,
            pattern: &pattern,
        };
        let path = temp_csv("header");
        let _ = fs::remove_file(&path);

        let mut csv = CsvWriterObserver::new(&path)?;
        csv.on_post_iteration(&point, &[flip(9, 16, 0xAB), flip(3, 255, 0x2A)]);
        csv.on_post_iteration(&point, &[]);
        drop(csv);
        let mut csv = CsvWriterObserver::new(&path)?;
        csv.on_post_iteration(&point, &[flip(1, 0, 0xEA)]);
        drop(csv);

        let content = fs::read_to_string(&path)?;
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], CSV_HEADER.join(","));
        assert!(lines[1].ends_with(",88,24000,0,0x400030FF,0,0,1,0,3,255,0xAA,0x2A"));
        assert!(lines[2].ends_with(",88,24000,0,0x40009010,0,0,1,0,9,16,0xAA,0xAB"));
        assert!(lines[3].ends_with(",0,0,1,0,1,0,0xAA,0xEA"));
        let timestamp = lines[1].split(',').next().unwrap_or_default();
        assert_eq!(timestamp.len(), "YYYY-MM-DDTHH:MM:SS".len());
        assert_eq!(&timestamp[10..11], "T");

        fs::remove_dir_all(path.parent().expect("parent"))?;
        Ok(())
    }
}

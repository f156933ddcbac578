//! DIMM geometry as reported by `dmidecode -t memory`.

use std::process::Command;

use anyhow::{Context, bail};
use log::debug;

/// Rank count from the first `Rank:` line with a known value.
pub fn parse_ranks(dmidecode: &str) -> Option<usize> {
    dmidecode
        .lines()
        .filter_map(|line| line.split_once("Rank:"))
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty() && *value != "Unknown")
        .find_map(|value| value.parse().ok())
}

/// Smallest installed module size in GiB.
///
/// Empty slots (`No Module Installed`) and zero sizes are skipped. Sizes in MB are
/// rounded down to whole GiB.
pub fn parse_dimm_gib(dmidecode: &str) -> Option<usize> {
    dmidecode
        .lines()
        .filter(|line| !line.contains("No Module"))
        .filter_map(|line| line.split_once("Size:"))
        .filter_map(|(_, value)| {
            let mut parts = value.split_whitespace();
            let size: usize = parts.next()?.parse().ok()?;
            match parts.next() {
                Some("MB") => Some(size / 1024),
                _ => Some(size),
            }
        })
        .filter(|&gib| gib > 0)
        .min()
}

fn dmidecode() -> anyhow::Result<String> {
    let output = Command::new("dmidecode")
        .args(["-t", "memory"])
        .output()
        .context("Failed to run dmidecode")?;
    if !output.status.success() {
        bail!(
            "dmidecode failed ({}): {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Detects the rank count and the size in GiB of the installed DIMMs.
///
/// # Errors
///
/// Fails if `dmidecode` cannot be run or reports no rank or size.
pub fn detect() -> anyhow::Result<(usize, usize)> {
    let out = dmidecode()?;
    debug!("dmidecode:\n{}", out);
    let ranks = parse_ranks(&out).context("No valid Rank found")?;
    let gib = parse_dimm_gib(&out).context("No valid non-zero DIMM size found")?;
    Ok((ranks, gib))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DMIDECODE: &str = "\
# dmidecode 3.5
Handle 0x0010, DMI type 17, 92 bytes
Memory Device
\tTotal Width: Unknown
\tSize: No Module Installed
\tRank: Unknown
Handle 0x0011, DMI type 17, 92 bytes
Memory Device
\tSize: 16 GB
\tForm Factor: DIMM
\tRank: 1
\tVolatile Size: 16 GB
Handle 0x0012, DMI type 17, 92 bytes
Memory Device
\tSize: 32768 MB
\tRank: 2
\tNon-Volatile Size: None
\tCache Size: None
";

    #[test]
    fn ranks_skip_unknown_values() {
        assert_eq!(parse_ranks(DMIDECODE), Some(1));
        assert_eq!(parse_ranks("\tRank: Unknown\n"), None);
    }

    #[test]
    fn size_is_the_smallest_module() {
        assert_eq!(parse_dimm_gib(DMIDECODE), Some(16));
        assert_eq!(parse_dimm_gib("\tSize: 32768 MB\n\tSize: 48 GB\n"), Some(32));
        assert_eq!(parse_dimm_gib("\tSize: 512 MB\n"), None);
        assert_eq!(parse_dimm_gib("\tSize: No Module Installed\n"), None);
    }
}

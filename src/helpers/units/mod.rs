use crate::error::ProvisionError;

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;
const GIB: u64 = 1024 * MIB;
const TIB: u64 = 1024 * GIB;

/// Split "40G" into ("40", GIB). `default_unit` applies to bare numbers.
fn split_unit(input: &str, default_unit: u64) -> Result<(&str, u64), ProvisionError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ProvisionError::InvalidInput("Empty size string".to_string()));
    }

    let upper = trimmed.to_ascii_uppercase();
    let suffixes: [(&str, u64); 9] = [
        ("TB", TIB),
        ("GB", GIB),
        ("MB", MIB),
        ("KB", KIB),
        ("T", TIB),
        ("G", GIB),
        ("M", MIB),
        ("K", KIB),
        ("B", 1),
    ];
    for (suffix, multiplier) in suffixes {
        if upper.ends_with(suffix) {
            return Ok((&trimmed[..trimmed.len() - suffix.len()], multiplier));
        }
    }
    Ok((trimmed, default_unit))
}

fn parse_with_default(input: &str, default_unit: u64) -> Result<u64, ProvisionError> {
    let (number, multiplier) = split_unit(input, default_unit)?;
    let number: f64 = number
        .trim()
        .parse()
        .map_err(|_| ProvisionError::InvalidInput(format!("Invalid number in size: {input}")))?;
    if !number.is_finite() || number <= 0.0 {
        return Err(ProvisionError::InvalidInput(format!("Size must be positive: {input}")));
    }
    Ok((number * multiplier as f64) as u64)
}

/// Parse a disk size string (e.g. "40G", "5120M", "1T"); bare numbers are bytes.
pub fn parse_size(size: &str) -> Result<u64, ProvisionError> {
    parse_with_default(size, 1)
}

/// Parse a memory string (like "2G", "1024M", "512") to bytes; bare numbers
/// are megabytes.
pub fn parse_memory(memory: &str) -> Result<u64, ProvisionError> {
    let bytes = parse_with_default(memory, MIB)?;
    if bytes < MIB {
        return Err(ProvisionError::InvalidInput(format!("Memory must be at least 1M: {memory}")));
    }
    // Hyper-V requires startup memory in whole megabytes.
    Ok(bytes / MIB * MIB)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_with_units() {
        assert_eq!(parse_size("40G").unwrap(), 40 * GIB);
        assert_eq!(parse_size("40gb").unwrap(), 40 * GIB);
        assert_eq!(parse_size("5120M").unwrap(), 5120 * MIB);
        assert_eq!(parse_size("1T").unwrap(), TIB);
        assert_eq!(parse_size("4096").unwrap(), 4096);
    }

    #[test]
    fn memory_defaults_to_megabytes() {
        assert_eq!(parse_memory("2048").unwrap(), 2048 * MIB);
        assert_eq!(parse_memory("4G").unwrap(), 4 * GIB);
        assert_eq!(parse_memory("1.5G").unwrap(), 1536 * MIB);
        assert_eq!(parse_memory("1M").unwrap(), MIB);
    }

    #[test]
    fn memory_below_a_megabyte_is_rejected() {
        for tiny in ["1K", "0.5M", "512KB", "1000B", "0.1"] {
            assert!(parse_memory(tiny).is_err(), "{tiny}");
        }
    }

    #[test]
    fn bad_sizes_are_rejected() {
        for bad in ["", "G", "abc", "-1G", "0"] {
            assert!(parse_size(bad).is_err(), "{bad}");
        }
    }
}

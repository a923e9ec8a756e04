//! VM specification and field validators
//!
//! Numeric fields are read like a lenient base-10 integer prefix: leading
//! whitespace and an optional sign are skipped and the number ends at the
//! first non-digit, so "2048MB" reads as 2048 and "4.5" as 4. Input with no
//! leading digits is invalid.

use std::fmt;

/// Exclusive upper bound for VM ids
pub const MAX_VMID: u32 = 999_999_999;
pub const MAX_NAME_LEN: usize = 64;
pub const MAX_CORES: u32 = 128;
pub const MIN_MEMORY_MB: u32 = 64;
/// 1 TB
pub const MAX_MEMORY_MB: u32 = 1_048_576;
/// Roughly 1 PB
pub const MAX_DISK_GB: u32 = 999_999;

/// Everything needed to provision one VM.
///
/// Built step by step by the wizard and handed to the provisioner by value,
/// so it is consumed exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmSpecification {
    pub vmid: u32,
    pub name: String,
    pub cores: u32,
    pub memory_mb: u32,
    pub disk_gb: u32,
    pub storage: String,
    pub bridge: String,
    /// Install image to attach as CD-ROM (`storage:iso/file.iso`)
    pub iso_volid: Option<String>,
}

impl fmt::Display for VmSpecification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}): {} cores, {} MB, {} GB on {}, {}",
            self.name, self.vmid, self.cores, self.memory_mb, self.disk_gb, self.storage, self.bridge
        )?;
        if let Some(ref iso) = self.iso_volid {
            write!(f, ", iso {}", iso)?;
        }
        Ok(())
    }
}

/// Leading integer of `input`, or `None` when it has no leading digits
fn leading_int(input: &str) -> Option<i64> {
    let s = input.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }
    // Too many digits for i64 is far outside every accepted range
    let n = digits[..end].parse::<i64>().ok()?;
    Some(if negative { -n } else { n })
}

fn in_range(input: &str, min: i64, max: i64) -> bool {
    leading_int(input).is_some_and(|n| (min..=max).contains(&n))
}

/// Value of a field that passed `valid`
fn accepted(input: &str, valid: fn(&str) -> bool) -> Option<u32> {
    if !valid(input) {
        return None;
    }
    leading_int(input).and_then(|n| u32::try_from(n).ok())
}

pub fn is_valid_vmid(input: &str) -> bool {
    in_range(input, 1, i64::from(MAX_VMID) - 1)
}

pub fn is_valid_vm_name(name: &str) -> bool {
    !name.is_empty() && name.chars().count() < MAX_NAME_LEN
}

pub fn is_valid_cores(input: &str) -> bool {
    in_range(input, 1, i64::from(MAX_CORES))
}

pub fn is_valid_memory(input: &str) -> bool {
    in_range(input, i64::from(MIN_MEMORY_MB), i64::from(MAX_MEMORY_MB))
}

pub fn is_valid_disk_size(input: &str) -> bool {
    in_range(input, 1, i64::from(MAX_DISK_GB))
}

pub fn parse_vmid(input: &str) -> Option<u32> {
    accepted(input, is_valid_vmid)
}

pub fn parse_cores(input: &str) -> Option<u32> {
    accepted(input, is_valid_cores)
}

pub fn parse_memory(input: &str) -> Option<u32> {
    accepted(input, is_valid_memory)
}

pub fn parse_disk_size(input: &str) -> Option<u32> {
    accepted(input, is_valid_disk_size)
}

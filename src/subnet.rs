//! Deterministic IPv4/IPv6 subnet allocation for parallel labs.
//!
//! Every lab derives its address range from its own name and device count,
//! with no shared allocation table: lab N takes the Nth subnet-sized slot
//! inside 172.16.0.0/12. Two labs with different indices can never overlap,
//! which is what makes concurrent deploys safe without coordination.

/// Subnet allocation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubnetError {
    #[error("subnet allocation exceeds 172.16.0.0/12 range: lab index {lab_index} with /{prefix} subnets requires more address space (device count: {device_count})")]
    Ipv4RangeExceeded {
        lab_index: u64,
        prefix: u8,
        device_count: u32,
    },
    #[error("lab index {lab_index} exceeds maximum for IPv6 subnet allocation (max 65535)")]
    Ipv6IndexTooLarge { lab_index: u64 },
}

/// First address of the allocatable block (172.16.0.0).
const BASE_IP: u64 = 0xAC10_0000;
/// Last address of the allocatable block (172.31.255.255).
const MAX_IP: u64 = 0xAC1F_FFFF;

/// Smallest prefix length in [16, 30] whose usable host count covers
/// `device_count` plus one gateway address, falling back to /16.
pub fn subnet_prefix(device_count: u32) -> u8 {
    let needed = u64::from(device_count) + 1;
    for prefix in (16..=30u8).rev() {
        let usable = (1u64 << (32 - prefix)) - 2;
        if usable >= needed {
            return prefix;
        }
    }
    16
}

/// Number of addresses in a subnet of the given prefix length.
pub fn subnet_size(prefix: u8) -> u64 {
    1u64 << (32 - prefix)
}

/// Numeric lab index: the integer suffix after the last underscore.
///
/// `"baseline_001"` is lab 1; names without a numeric suffix are lab 0.
pub fn extract_lab_index(lab_name: &str) -> u64 {
    match lab_name.rsplit_once('_') {
        Some((_, suffix)) => suffix.parse().unwrap_or(0),
        None => 0,
    }
}

/// Allocates the lab's IPv4 subnet in dotted `/prefix` notation.
///
/// The subnet starts at `172.16.0.0 + labIndex * subnetSize`, so equal-sized
/// labs occupy disjoint slots by construction. Allocation fails once the
/// subnet's last address would pass 172.31.255.255; wrapping instead would
/// silently collide with live labs.
pub fn generate_subnet(lab_name: &str, device_count: u32) -> Result<String, SubnetError> {
    let prefix = subnet_prefix(device_count);
    let size = subnet_size(prefix);
    let lab_index = extract_lab_index(lab_name);

    let subnet_ip = BASE_IP + lab_index.saturating_mul(size);
    if subnet_ip + size - 1 > MAX_IP {
        return Err(SubnetError::Ipv4RangeExceeded {
            lab_index,
            prefix,
            device_count,
        });
    }

    let ip = subnet_ip as u32;
    Ok(format!(
        "{}.{}.{}.{}/{}",
        (ip >> 24) & 0xFF,
        (ip >> 16) & 0xFF,
        (ip >> 8) & 0xFF,
        ip & 0xFF,
        prefix
    ))
}

/// Allocates the lab's IPv6 subnet as `3fff:172:20:{index:x}::/64`.
///
/// The fourth segment carries the lab index and holds 16 bits.
pub fn generate_ipv6_subnet(lab_name: &str) -> Result<String, SubnetError> {
    let lab_index = extract_lab_index(lab_name);
    if lab_index > 65535 {
        return Err(SubnetError::Ipv6IndexTooLarge { lab_index });
    }
    Ok(format!("3fff:172:20:{lab_index:x}::/64"))
}

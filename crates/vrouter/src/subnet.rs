//! Subnet allocation.
//!
//! Splits a parent block into equally sized, pairwise disjoint child blocks
//! in increasing address order. The host at list position `i` always receives
//! block `i`, so the mapping can be recomputed later and compared against
//! what the registry holds.

use vrouter_common::constants::MAX_BLOCK_PREFIX;
use vrouter_common::{HostAssignment, Result, SubnetBlock, VrouterError};

/// Number of extra prefix bits needed to address `count` blocks.
///
/// At least one bit is always taken so every block is strictly smaller than
/// its parent.
fn extra_bits(count: usize) -> u32 {
    count.next_power_of_two().trailing_zeros().max(1)
}

fn insufficient(parent: SubnetBlock, count: usize) -> VrouterError {
    VrouterError::InsufficientAddressSpace {
        parent: parent.to_string(),
        requested: count,
    }
}

/// Carve `count` blocks of the smallest prefix that fits them
pub fn allocate(parent: SubnetBlock, count: usize) -> Result<Vec<SubnetBlock>> {
    if count == 0 {
        return Err(VrouterError::InvalidInput("host count must be at least 1".to_string()));
    }

    let new_prefix = u32::from(parent.prefix_len()) + extra_bits(count);
    if new_prefix > u32::from(MAX_BLOCK_PREFIX) {
        return Err(insufficient(parent, count));
    }

    carve(parent, count, new_prefix as u8)
}

/// Carve the first `count` blocks of a fixed prefix length
pub fn allocate_fixed(parent: SubnetBlock, count: usize, prefix: u8) -> Result<Vec<SubnetBlock>> {
    if count == 0 {
        return Err(VrouterError::InvalidInput("host count must be at least 1".to_string()));
    }
    if prefix <= parent.prefix_len() {
        return Err(VrouterError::InvalidInput(format!(
            "cell prefix /{prefix} must be longer than parent {parent}"
        )));
    }
    if prefix > MAX_BLOCK_PREFIX {
        return Err(insufficient(parent, count));
    }

    let capacity = 1u64 << u32::from(prefix - parent.prefix_len());
    if count as u64 > capacity {
        return Err(insufficient(parent, count));
    }

    carve(parent, count, prefix)
}

fn carve(parent: SubnetBlock, count: usize, prefix: u8) -> Result<Vec<SubnetBlock>> {
    let subnets = parent
        .as_net()
        .subnets(prefix)
        .map_err(|e| VrouterError::InvalidInput(format!("cannot split {parent} into /{prefix}: {e}")))?;

    let blocks: Vec<SubnetBlock> = subnets.take(count).map(SubnetBlock::from).collect();
    if blocks.len() != count {
        return Err(insufficient(parent, count));
    }
    Ok(blocks)
}

/// Pair hosts with blocks by list position
pub fn assign(hosts: &[String], blocks: &[SubnetBlock]) -> Vec<HostAssignment> {
    hosts
        .iter()
        .zip(blocks)
        .map(|(host, block)| HostAssignment {
            host: host.clone(),
            block: *block,
        })
        .collect()
}

/// A host whose stored block differs from the recomputed one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    pub host: String,
    pub expected: SubnetBlock,
    pub stored: Option<SubnetBlock>,
}

/// Compare stored assignments against a fresh allocation
pub fn verify(expected: &[HostAssignment], stored: &[(String, Option<SubnetBlock>)]) -> Vec<Mismatch> {
    expected
        .iter()
        .filter_map(|want| {
            let found = stored
                .iter()
                .find(|(host, _)| host == &want.host)
                .and_then(|(_, block)| *block);
            (found != Some(want.block)).then(|| Mismatch {
                host: want.host.clone(),
                expected: want.block,
                stored: found,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(s: &str) -> SubnetBlock {
        s.parse().unwrap()
    }

    fn check_partition(parent: SubnetBlock, blocks: &[SubnetBlock], count: usize) {
        assert_eq!(blocks.len(), count);
        let size = blocks[0].size();
        for (i, a) in blocks.iter().enumerate() {
            assert!(parent.strictly_contains(a), "{a} not strictly inside {parent}");
            assert_eq!(a.size(), size);
            for b in &blocks[i + 1..] {
                assert!(!a.overlaps(b), "{a} overlaps {b}");
                assert!(a.network() < b.network(), "blocks out of order");
            }
        }
        let covered: u64 = blocks.iter().map(SubnetBlock::size).sum();
        assert_eq!(covered, count as u64 * size);
    }

    #[test]
    fn test_four_hosts_in_slash_16() {
        let blocks = allocate(block("10.0.0.0/16"), 4).unwrap();
        let rendered: Vec<String> = blocks.iter().map(ToString::to_string).collect();
        assert_eq!(
            rendered,
            vec!["10.0.0.0/18", "10.0.64.0/18", "10.0.128.0/18", "10.0.192.0/18"]
        );

        let hosts: Vec<String> = ["h1", "h2", "h3", "h4"].iter().map(|h| h.to_string()).collect();
        let assigned = assign(&hosts, &blocks);
        assert_eq!(assigned[0].host, "h1");
        assert_eq!(assigned[0].block.to_string(), "10.0.0.0/18");
        assert_eq!(assigned[3].host, "h4");
        assert_eq!(assigned[3].block.to_string(), "10.0.192.0/18");
    }

    #[test]
    fn test_partition_properties() {
        for (cidr, counts) in [
            ("10.0.0.0/16", vec![1usize, 2, 3, 5, 17, 255, 256, 1000]),
            ("192.168.0.0/24", vec![1, 2, 7, 64]),
            ("172.16.0.0/12", vec![3, 4096]),
        ] {
            let parent = block(cidr);
            for count in counts {
                let blocks = allocate(parent, count).unwrap();
                check_partition(parent, &blocks, count);
            }
        }
    }

    #[test]
    fn test_non_power_of_two_rounds_up() {
        let blocks = allocate(block("10.0.0.0/16"), 3).unwrap();
        assert!(blocks.iter().all(|b| b.prefix_len() == 18));
        assert_eq!(blocks[2].to_string(), "10.0.128.0/18");
    }

    #[test]
    fn test_single_host_gets_lower_half() {
        let blocks = allocate(block("10.0.0.0/16"), 1).unwrap();
        assert_eq!(blocks, vec![block("10.0.0.0/17")]);
    }

    #[test]
    fn test_allocation_is_deterministic() {
        let parent = block("10.20.0.0/14");
        assert_eq!(allocate(parent, 37).unwrap(), allocate(parent, 37).unwrap());
    }

    #[test]
    fn test_parent_is_normalized() {
        assert_eq!(
            allocate(block("10.0.9.9/16"), 2).unwrap(),
            allocate(block("10.0.0.0/16"), 2).unwrap()
        );
    }

    #[test]
    fn test_insufficient_address_space() {
        // /24 holds at most 64 /30 blocks
        assert!(allocate(block("10.0.0.0/24"), 64).is_ok());
        let err = allocate(block("10.0.0.0/24"), 65).unwrap_err();
        assert!(matches!(err, VrouterError::InsufficientAddressSpace { requested: 65, .. }));

        assert!(allocate(block("10.0.0.0/30"), 1).is_err());
    }

    #[test]
    fn test_zero_hosts_rejected() {
        assert!(matches!(
            allocate(block("10.0.0.0/16"), 0),
            Err(VrouterError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_fixed_cells() {
        let blocks = allocate_fixed(block("10.0.0.0/16"), 3, 24).unwrap();
        let rendered: Vec<String> = blocks.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["10.0.0.0/24", "10.0.1.0/24", "10.0.2.0/24"]);

        assert!(allocate_fixed(block("10.0.0.0/16"), 256, 24).is_ok());
        assert!(matches!(
            allocate_fixed(block("10.0.0.0/16"), 257, 24),
            Err(VrouterError::InsufficientAddressSpace { .. })
        ));
        assert!(matches!(
            allocate_fixed(block("10.0.0.0/16"), 1, 16),
            Err(VrouterError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_verify_reports_drift() {
        let hosts = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let expected = assign(&hosts, &allocate(block("10.0.0.0/16"), 3).unwrap());
        let stored = vec![
            ("a".to_string(), Some(block("10.0.0.0/18"))),
            ("b".to_string(), Some(block("10.0.128.0/18"))),
            ("c".to_string(), None),
        ];

        let drift = verify(&expected, &stored);
        assert_eq!(drift.len(), 2);
        assert_eq!(drift[0].host, "b");
        assert_eq!(drift[0].expected, block("10.0.64.0/18"));
        assert_eq!(drift[1].host, "c");
        assert_eq!(drift[1].stored, None);
    }
}

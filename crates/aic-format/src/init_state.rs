//! Run-list compression of the L2TCM init image.
//!
//! The init image is mostly zeros: a doorbell window followed by one UDMA
//! descriptor. The runtime clears L2TCM and then copies only the non-zero
//! regions, so long zero runs are cut out. Zero runs of at most
//! [`MIN_ZERO_RUN`] bytes stay inside their neighbouring region because a
//! short copy is cheaper than an extra region.

use crate::metadata::Region;

/// Zero runs must be strictly longer than this to split a region.
pub const MIN_ZERO_RUN: u64 = 128;

fn region(start: u64, end: u64) -> Region {
    Region {
        start,
        end,
        size: end - start,
    }
}

/// Zero runs longer than [`MIN_ZERO_RUN`].
#[must_use]
pub fn zero_regions(data: &[u8]) -> Vec<Region> {
    let mut out = Vec::new();
    let mut run_start: Option<u64> = None;
    for (i, &b) in (0u64..).zip(data) {
        match (b == 0, run_start) {
            (true, None) => run_start = Some(i),
            (false, Some(start)) => {
                if i - start > MIN_ZERO_RUN {
                    out.push(region(start, i));
                }
                run_start = None;
            }
            _ => {}
        }
    }
    if let Some(start) = run_start {
        let end = data.len() as u64;
        if end - start > MIN_ZERO_RUN {
            out.push(region(start, end));
        }
    }
    out
}

/// Complement of `zeros` within `[0, len)`.
#[must_use]
pub fn complement(zeros: &[Region], len: u64) -> Vec<Region> {
    let mut out = Vec::new();
    let mut cursor = 0;
    for z in zeros {
        if z.start > cursor {
            out.push(region(cursor, z.start));
        }
        cursor = z.end;
    }
    if cursor < len {
        out.push(region(cursor, len));
    }
    out
}

/// Regions of `data` the runtime has to copy.
#[must_use]
pub fn non_zero_regions(data: &[u8]) -> Vec<Region> {
    complement(&zero_regions(data), data.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_zero_runs_are_kept() {
        let mut data = vec![1u8; 10];
        data.extend(std::iter::repeat(0).take(128));
        data.push(1);
        assert!(zero_regions(&data).is_empty());
        assert_eq!(non_zero_regions(&data), vec![region(0, 139)]);
    }

    #[test]
    fn long_zero_run_splits() {
        let mut data = vec![1u8; 4];
        data.extend(std::iter::repeat(0).take(129));
        data.extend([2, 3]);
        assert_eq!(zero_regions(&data), vec![region(4, 133)]);
        assert_eq!(
            non_zero_regions(&data),
            vec![region(0, 4), region(133, 135)]
        );
    }

    #[test]
    fn leading_and_trailing_zeros() {
        let mut data = vec![0u8; 1152];
        data.extend([0, 0, 0, 0, 0, 0, 0, 0x80]);
        data.extend([0u8; 8]);
        let nz = non_zero_regions(&data);
        assert_eq!(nz, vec![region(1159, 1168)]);
    }

    #[test]
    fn all_zero_image_has_no_regions() {
        assert!(non_zero_regions(&[0u8; 512]).is_empty());
        assert!(non_zero_regions(&[]).is_empty());
    }

    #[test]
    fn regions_partition_the_image() {
        let mut data = vec![0u8; 300];
        data[0] = 9;
        data[200] = 9;
        data.extend(vec![0u8; 200]);
        let zeros = zero_regions(&data);
        let nz = non_zero_regions(&data);
        let mut all: Vec<Region> = zeros.iter().chain(&nz).copied().collect();
        all.sort_by_key(|r| r.start);
        let mut cursor = 0;
        for r in &all {
            assert_eq!(r.start, cursor);
            cursor = r.end;
        }
        assert_eq!(cursor, data.len() as u64);
        assert!(nz.iter().all(|r| data[r.start as usize..r.end as usize]
            .iter()
            .any(|&b| b != 0)));
    }
}

//! Bucket-fill: level hosts as evenly as possible.
//!
//! Hosts are buckets, new replica-set members are balls. The fill order
//! never gives a host a member while another host's count is strictly
//! lower; once a group of hosts sits at the same level, members go
//! round-robin across that group in ascending-load order.

use tracing::debug;

/// Choose a host for each of `count` new members.
///
/// `loads` maps host → current member count; its order breaks ties among
/// equally loaded hosts (stable, deterministic). The returned sequence
/// has exactly `count` entries. Placing zero members, or placing onto an
/// empty host list, yields an empty sequence.
pub fn bucket_fill(loads: &[(String, u32)], count: u32) -> Vec<String> {
    let mut assigned = Vec::with_capacity(count as usize);
    if loads.is_empty() || count == 0 {
        return assigned;
    }

    // Ascending by current load; stable sort keeps input order on ties.
    let mut order: Vec<usize> = (0..loads.len()).collect();
    order.sort_by_key(|&i| loads[i].1);
    let tags: Vec<&str> = order.iter().map(|&i| loads[i].0.as_str()).collect();
    let mut level: Vec<u32> = order.iter().map(|&i| loads[i].1).collect();

    let n = tags.len();
    let mut remaining = count as usize;

    // Raise the lowest host to the level of the next-lowest one.
    if n > 1 {
        let gap = (level[1] - level[0]) as usize;
        let take = gap.min(remaining);
        for _ in 0..take {
            assigned.push(tags[0].to_string());
            level[0] += 1;
        }
        remaining -= take;
    }

    // Round-robin across the maximal equal-level prefix, widening the
    // prefix each time it catches up with the next host.
    while remaining > 0 {
        let mut prefix = 1;
        while prefix < n && level[prefix] == level[0] {
            prefix += 1;
        }

        if prefix == n {
            // Every host sits at the same level: whole rounds first,
            // then the remainder one host at a time.
            let rounds = remaining / n;
            for _ in 0..rounds {
                for t in 0..n {
                    assigned.push(tags[t].to_string());
                    level[t] += 1;
                }
            }
            remaining -= rounds * n;
            for t in 0..remaining {
                assigned.push(tags[t].to_string());
                level[t] += 1;
            }
            remaining = 0;
        } else {
            // Fill the prefix until it reaches the next host's level or
            // members run out.
            let mut rounds_left = (level[prefix] - level[0]) as usize;
            while rounds_left > 0 && remaining > 0 {
                for t in 0..prefix {
                    if remaining == 0 {
                        break;
                    }
                    assigned.push(tags[t].to_string());
                    level[t] += 1;
                    remaining -= 1;
                }
                rounds_left -= 1;
            }
        }
    }

    debug!(members = count, hosts = n, "bucket fill computed");
    assigned
}

//! Live shard topology: parsing the `listShards` answer.
//!
//! Each registered shard is described as `ShardReplSet<N>/h1:p1,h2:p2,..`:
//! a set name with an embedded numeric index plus a comma-separated
//! member list.

use serde::Deserialize;

use crate::error::{ActuatorError, ActuatorResult};

/// Set-name prefix used by the provisioning scripts.
pub const SET_NAME_PREFIX: &str = "ShardReplSet";

/// One registered shard replica set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaSet {
    /// The numeric index embedded in the set name. Indices grow
    /// monotonically; removal never compacts them.
    pub index: u32,
    /// Member (host, port) pairs in registration order.
    pub members: Vec<(String, u16)>,
}

/// The slice of a `listShards` document the actuator cares about.
#[derive(Debug, Deserialize)]
pub struct ShardDoc {
    pub host: String,
}

/// Parse one `ShardReplSetN/h1:p1,h2:p2` descriptor.
pub fn parse_shard_host(desc: &str) -> ActuatorResult<ReplicaSet> {
    let (set_name, member_list) = desc
        .split_once('/')
        .ok_or_else(|| ActuatorError::Topology(format!("missing '/' in '{desc}'")))?;

    let index = set_name
        .strip_prefix(SET_NAME_PREFIX)
        .and_then(|s| s.parse::<u32>().ok())
        .ok_or_else(|| ActuatorError::Topology(format!("bad set name '{set_name}'")))?;

    let mut members = Vec::new();
    for member in member_list.split(',') {
        let (host, port) = member
            .split_once(':')
            .ok_or_else(|| ActuatorError::Topology(format!("bad member '{member}'")))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| ActuatorError::Topology(format!("bad port in '{member}'")))?;
        members.push((host.to_string(), port));
    }

    Ok(ReplicaSet { index, members })
}

/// Parse the JSON array printed by the `listShards` eval.
pub fn parse_shard_docs(json: &str) -> ActuatorResult<Vec<ReplicaSet>> {
    let docs: Vec<ShardDoc> = serde_json::from_str(json)
        .map_err(|e| ActuatorError::Topology(format!("listShards json: {e}")))?;
    docs.iter().map(|d| parse_shard_host(&d.host)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_descriptor() {
        let set = parse_shard_host("ShardReplSet3/db-1:27106,db-2:27107,db-3:27108").unwrap();
        assert_eq!(set.index, 3);
        assert_eq!(
            set.members,
            vec![
                ("db-1".to_string(), 27106),
                ("db-2".to_string(), 27107),
                ("db-3".to_string(), 27108),
            ]
        );
    }

    #[test]
    fn rejects_malformed_descriptors() {
        assert!(parse_shard_host("ShardReplSet3").is_err());
        assert!(parse_shard_host("OtherSet1/db-1:27106").is_err());
        assert!(parse_shard_host("ShardReplSetX/db-1:27106").is_err());
        assert!(parse_shard_host("ShardReplSet1/db-1").is_err());
        assert!(parse_shard_host("ShardReplSet1/db-1:high").is_err());
    }

    #[test]
    fn parses_listshards_array() {
        let json = r#"[
            {"_id": "ShardReplSet1", "host": "ShardReplSet1/db-1:27100", "state": 1},
            {"_id": "ShardReplSet2", "host": "ShardReplSet2/db-2:27103"}
        ]"#;
        let sets = parse_shard_docs(json).unwrap();
        assert_eq!(sets.len(), 2);
        assert_eq!(sets[1].index, 2);
    }

    #[test]
    fn empty_array_parses_to_no_sets() {
        assert!(parse_shard_docs("[]").unwrap().is_empty());
        assert!(parse_shard_docs("not json").is_err());
    }
}

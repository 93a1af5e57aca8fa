//! The actuator: planning, gated execution, post-hoc validation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use shardpilot_core::config::{ClusterConfig, ScriptsConfig};
use shardpilot_core::Action;
use shardpilot_placement::bucket_fill;
use tracing::{debug, error, info, warn};

use crate::command::{CommandRunner, CommandSpec, ProcessRunner};
use crate::error::{ActuatorError, ActuatorResult};
use crate::topology::{parse_shard_docs, ReplicaSet, SET_NAME_PREFIX};

/// One member of a topology plan: where a shard server runs (or ran).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberSlot {
    pub set_index: u32,
    pub member_index: u32,
    pub host: String,
    pub port: u16,
}

/// Owns cluster topology configuration and executes provisioning plans.
pub struct Actuator {
    cluster: ClusterConfig,
    scripts: ScriptsConfig,
    runner: Arc<dyn CommandRunner>,
    /// The busy/available gate. Exclusive: check-and-set is atomic
    /// because the monitor loop and actuation tasks genuinely interleave.
    available: AtomicBool,
}

/// Releases the gate when the actuation exits, on any path.
struct GateGuard<'a>(&'a AtomicBool);

impl<'a> GateGuard<'a> {
    fn acquire(gate: &'a AtomicBool) -> Option<Self> {
        gate.compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(gate))
    }
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl Actuator {
    pub fn new(cluster: ClusterConfig, scripts: ScriptsConfig) -> Self {
        Self::with_runner(cluster, scripts, Arc::new(ProcessRunner))
    }

    pub fn with_runner(
        cluster: ClusterConfig,
        scripts: ScriptsConfig,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            cluster,
            scripts,
            runner,
            available: AtomicBool::new(true),
        }
    }

    /// True when no actuation is in flight.
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Port of member `member_index` in set `set_index`, both 1-based.
    fn member_port(&self, set_index: u32, member_index: u32) -> ActuatorResult<u16> {
        let port = u32::from(self.cluster.base_shard_port)
            + self.cluster.repl_set_members * (set_index - 1)
            + (member_index - 1);
        u16::try_from(port)
            .map_err(|_| ActuatorError::Topology(format!("port {port} exceeds the u16 range")))
    }

    /// Recover a 1-based member index from a live port.
    fn member_index(&self, port: u16, set_index: u32) -> ActuatorResult<u32> {
        let offset = u32::from(self.cluster.base_shard_port)
            + self.cluster.repl_set_members * (set_index - 1);
        u32::from(port).checked_sub(offset).map(|d| d + 1).ok_or_else(|| {
            ActuatorError::Topology(format!("port {port} below the range of set {set_index}"))
        })
    }

    /// Query live topology. A query or parse failure is logged and
    /// yields "no topology"; callers treat it as empty, not fatal.
    async fn query_shard_sets(&self) -> Vec<ReplicaSet> {
        let spec = CommandSpec::new(
            "mongo",
            vec![
                "admin".into(),
                "--quiet".into(),
                "--host".into(),
                self.cluster.mongos_conn.clone(),
                "--eval".into(),
                r#"JSON.stringify(db.adminCommand({ listShards: 1 })["shards"])"#.into(),
            ],
        );

        let output = match self.runner.run(&spec).await {
            Ok(output) => output,
            Err(e) => {
                error!(error = %e, "topology query failed");
                return Vec::new();
            }
        };
        if output.failed() {
            error!(stderr = %output.stderr.trim(), "topology query reported errors");
            return Vec::new();
        }
        if output.stdout.trim().is_empty() {
            return Vec::new();
        }

        match parse_shard_docs(output.stdout.trim()) {
            Ok(sets) => sets,
            Err(e) => {
                error!(error = %e, result = %output.stdout.trim(), "unparsable topology");
                Vec::new()
            }
        }
    }

    /// Count of shard-bearing replica sets currently registered.
    pub async fn current_shard_number(&self) -> u32 {
        self.query_shard_sets().await.len() as u32
    }

    /// Plan the next replica set: index = max existing + 1, members
    /// placed by bucket-fill over current per-host counts.
    pub async fn plan_add(&self) -> ActuatorResult<Vec<MemberSlot>> {
        let sets = self.query_shard_sets().await;
        let set_index = sets.iter().map(|s| s.index).max().unwrap_or(0) + 1;

        let mut loads: Vec<(String, u32)> = self
            .cluster
            .shard_hosts
            .iter()
            .map(|h| (h.clone(), 0))
            .collect();
        for set in &sets {
            for (host, _) in &set.members {
                match loads.iter_mut().find(|(h, _)| h == host) {
                    Some(entry) => entry.1 += 1,
                    None => debug!(%host, "topology member on an unconfigured host"),
                }
            }
        }

        let mut plan = Vec::new();
        for (i, host) in bucket_fill(&loads, self.cluster.repl_set_members)
            .into_iter()
            .enumerate()
        {
            let member_index = i as u32 + 1;
            plan.push(MemberSlot {
                set_index,
                member_index,
                port: self.member_port(set_index, member_index)?,
                host,
            });
        }
        Ok(plan)
    }

    /// Plan removal of the highest-indexed registered replica set.
    /// Freed indices are never reused.
    pub async fn plan_remove(&self) -> ActuatorResult<Vec<MemberSlot>> {
        let sets = self.query_shard_sets().await;
        let target = sets
            .into_iter()
            .max_by_key(|s| s.index)
            .ok_or(ActuatorError::NoShards)?;

        target
            .members
            .iter()
            .map(|(host, port)| {
                Ok(MemberSlot {
                    set_index: target.index,
                    member_index: self.member_index(*port, target.index)?,
                    host: host.clone(),
                    port: *port,
                })
            })
            .collect()
    }

    fn ensure_actuatable(&self, action: Action) -> ActuatorResult<()> {
        // Only add/rmv can be actuated; nop never reaches execute().
        match action {
            Action::Add | Action::Remove => Ok(()),
            Action::Nop => Err(ActuatorError::Unsupported(action)),
        }
    }

    async fn build_plan(&self, action: Action) -> ActuatorResult<Vec<MemberSlot>> {
        match action {
            Action::Add => self.plan_add().await,
            Action::Remove => self.plan_remove().await,
            Action::Nop => Err(ActuatorError::Unsupported(action)),
        }
    }

    /// Start each new member, then register the set with the router.
    fn add_commands(&self, plan: &[MemberSlot]) -> Vec<CommandSpec> {
        let mut commands: Vec<CommandSpec> = plan
            .iter()
            .map(|slot| {
                CommandSpec::new(
                    &self.scripts.start_shard,
                    vec![
                        "-m".into(),
                        self.scripts.scripts_dir.clone(),
                        "-d".into(),
                        self.scripts.mongodb_dir.clone(),
                        "-r".into(),
                        slot.set_index.to_string(),
                        "-s".into(),
                        slot.member_index.to_string(),
                        "-h".into(),
                        slot.host.clone(),
                        "-p".into(),
                        slot.port.to_string(),
                    ],
                )
            })
            .collect();

        let members = plan
            .iter()
            .map(|s| format!("{}:{}", s.host, s.port))
            .collect::<Vec<_>>()
            .join("|");
        commands.push(CommandSpec::new(
            &self.scripts.add_shard,
            vec![
                "-c".into(),
                self.cluster.mongos_conn.clone(),
                "-r".into(),
                plan[0].set_index.to_string(),
                "-s".into(),
                members,
            ],
        ));
        commands
    }

    /// Deregister the set first, then stop each member, then bounce the
    /// telemetry agents so stale shard metrics disappear.
    fn remove_commands(&self, plan: &[MemberSlot]) -> Vec<CommandSpec> {
        let mut commands = vec![CommandSpec::new(
            &self.scripts.rmv_shard,
            vec![
                "-c".into(),
                self.cluster.mongos_conn.clone(),
                "-r".into(),
                plan[0].set_index.to_string(),
            ],
        )];

        for slot in plan {
            commands.push(CommandSpec::new(
                &self.scripts.stop_shard,
                vec![
                    "-r".into(),
                    slot.set_index.to_string(),
                    "-s".into(),
                    slot.member_index.to_string(),
                    "-h".into(),
                    slot.host.clone(),
                    "-p".into(),
                    slot.port.to_string(),
                ],
            ));
        }

        commands.push(CommandSpec::new(
            &self.scripts.restart_telemetry,
            vec!["-h".into(), self.cluster.shard_hosts.join("|")],
        ));
        commands
    }

    /// Execute one actuation: plan, run the ordered command sequence
    /// fail-fast, then validate by re-deriving the plan from fresh
    /// topology (success = the plan changed).
    ///
    /// Fails immediately with [`ActuatorError::Busy`] when another
    /// actuation holds the gate. The gate is released on every exit
    /// path, including errors.
    pub async fn execute(&self, action: Action, tag: &str, dry_run: bool) -> ActuatorResult<bool> {
        self.ensure_actuatable(action)?;
        let _gate = GateGuard::acquire(&self.available).ok_or(ActuatorError::Busy)?;

        let plan = self.build_plan(action).await?;
        if plan.is_empty() {
            return Err(ActuatorError::NoShards);
        }
        let commands = match action {
            Action::Add => self.add_commands(&plan),
            Action::Remove => self.remove_commands(&plan),
            Action::Nop => unreachable!(),
        };

        info!(action = %action, tag, commands = commands.len(), "actuation starting");

        for command in &commands {
            info!(action = %action, tag, command = %command, "running provisioning command");
            if dry_run {
                continue;
            }

            let output = self.runner.run(command).await?;
            if !output.stdout.is_empty() {
                info!(action = %action, tag, output = %output.stdout.trim(), "command output");
            }
            if output.failed() {
                // Fail fast: remaining commands are skipped.
                error!(action = %action, tag, errors = %output.stderr.trim(), "command failed");
                break;
            }
        }

        // Validation by plan idempotence: a fresh plan that differs from
        // the one just executed means the action took effect.
        let ok = match self.build_plan(action).await {
            Ok(after) => after != plan,
            // Removing the last shard leaves nothing left to plan.
            Err(ActuatorError::NoShards) if action == Action::Remove => true,
            Err(e) => return Err(e),
        };

        if !ok {
            warn!(action = %action, tag, "topology unchanged after actuation");
        }
        Ok(ok)
    }

    /// The set-name the provisioning scripts will use for an index.
    pub fn set_name(index: u32) -> String {
        format!("{SET_NAME_PREFIX}{index}")
    }
}

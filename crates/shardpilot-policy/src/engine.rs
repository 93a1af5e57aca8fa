//! The cluster-scaling MDP: states, rewards, transitions, value iteration.

use shardpilot_core::{Action, MetricScope, ThresholdRule};
use shardpilot_metrics::{MetricValue, MetricsSnapshot};
use tracing::{debug, info};

use crate::error::{PolicyError, PolicyResult};

/// Default discount factor.
pub const DEFAULT_GAMMA: f64 = 0.8;

/// Base reward granted per threshold violation.
const REWARD_DELTA: f64 = 0.01;
/// Add votes weigh more than remove votes.
const ADD_WEIGHT: f64 = 2.5;
/// Remove votes weigh less, and non-violations reward staying put.
const REMOVE_WEIGHT: f64 = 0.8;

/// Smoothed prior for the action statistics.
const PRIOR_ATTEMPTED: u64 = 100;
const PRIOR_SUCCEEDED: u64 = 99;

/// Attempted/succeeded counters per scaling action. Monotonically
/// non-decreasing for the process lifetime, never reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionStats {
    pub add_attempted: u64,
    pub add_succeeded: u64,
    pub rmv_attempted: u64,
    pub rmv_succeeded: u64,
}

impl ActionStats {
    fn prior() -> Self {
        Self {
            add_attempted: PRIOR_ATTEMPTED,
            add_succeeded: PRIOR_SUCCEEDED,
            rmv_attempted: PRIOR_ATTEMPTED,
            rmv_succeeded: PRIOR_SUCCEEDED,
        }
    }

    pub fn add_rate(&self) -> f64 {
        self.add_succeeded as f64 / self.add_attempted as f64
    }

    pub fn rmv_rate(&self) -> f64 {
        self.rmv_succeeded as f64 / self.rmv_attempted as f64
    }
}

/// The MDP over shard-count states.
pub struct ClusterPolicy {
    /// Number of states; state k ↔ index k-1.
    state_count: usize,
    /// Index of the current state.
    current: usize,
    gamma: f64,
    /// Reward per state, rebuilt every cycle.
    reward: Vec<f64>,
    stats: ActionStats,
    /// Empirical success ratios backing the transition model; recomputed
    /// on every commit.
    add_rate: f64,
    rmv_rate: f64,
}

impl ClusterPolicy {
    /// Build the policy for a cluster currently at `current_shards`, with
    /// states 1..=`max_shards`.
    pub fn new(current_shards: u32, max_shards: u32) -> PolicyResult<Self> {
        Self::with_gamma(current_shards, max_shards, DEFAULT_GAMMA)
    }

    pub fn with_gamma(current_shards: u32, max_shards: u32, gamma: f64) -> PolicyResult<Self> {
        if !(gamma > 0.0 && gamma < 1.0) {
            return Err(PolicyError::InvalidDiscount(gamma));
        }
        if current_shards < 1 || current_shards > max_shards {
            return Err(PolicyError::StateOutOfRange {
                state: current_shards,
                max: max_shards,
            });
        }

        let stats = ActionStats::prior();
        let policy = Self {
            state_count: max_shards as usize,
            current: (current_shards - 1) as usize,
            gamma,
            reward: vec![0.0; max_shards as usize],
            add_rate: stats.add_rate(),
            rmv_rate: stats.rmv_rate(),
            stats,
        };

        info!(shards = current_shards, "initial state");
        Ok(policy)
    }

    /// The shard count the policy believes the cluster has.
    pub fn current_shards(&self) -> u32 {
        self.current as u32 + 1
    }

    pub fn stats(&self) -> &ActionStats {
        &self.stats
    }

    /// Actions legal at a state: the minimum state cannot remove, the
    /// maximum cannot add. Listed order resolves argmax ties.
    fn legal_actions(&self, index: usize) -> &'static [Action] {
        let last = self.state_count - 1;
        if index == 0 && index == last {
            &[Action::Nop]
        } else if index == 0 {
            &[Action::Nop, Action::Add]
        } else if index == last {
            &[Action::Nop, Action::Remove]
        } else {
            &[Action::Nop, Action::Remove, Action::Add]
        }
    }

    fn transition_at(&self, index: usize, action: Action) -> Vec<(f64, usize)> {
        match action {
            Action::Nop => vec![(1.0, index)],
            Action::Add => vec![(1.0 - self.add_rate, index), (self.add_rate, index + 1)],
            Action::Remove => vec![(self.rmv_rate, index - 1), (1.0 - self.rmv_rate, index)],
        }
    }

    /// The successor-state distribution for a (state, action) pair, or
    /// `None` when the action is illegal there.
    pub fn transition(&self, state: u32, action: Action) -> Option<Vec<(f64, u32)>> {
        if state < 1 || state as usize > self.state_count {
            return None;
        }
        let index = (state - 1) as usize;
        if !self.legal_actions(index).contains(&action) {
            return None;
        }
        Some(
            self.transition_at(index, action)
                .into_iter()
                .map(|(p, i)| (p, i as u32 + 1))
                .collect(),
        )
    }

    /// Rebuild the reward vector from threshold violations.
    ///
    /// The current state and its immediate neighbors are zeroed first;
    /// every other state keeps whatever transient reward it had, exactly
    /// the window value iteration can reach in one step.
    pub fn calc_reward(
        &mut self,
        snapshot: &MetricsSnapshot,
        add_rules: &[ThresholdRule],
        remove_rules: &[ThresholdRule],
    ) {
        self.reward[self.current] = 0.0;
        if self.current > 0 {
            self.reward[self.current - 1] = 0.0;
        }
        if self.current + 1 < self.state_count {
            self.reward[self.current + 1] = 0.0;
        }

        self.score_rules(snapshot, add_rules, Action::Add);
        self.score_rules(snapshot, remove_rules, Action::Remove);

        let dump: Vec<String> = self
            .reward
            .iter()
            .enumerate()
            .map(|(i, r)| format!("\"{}\": {:.4}", i + 1, r))
            .collect();
        debug!(
            state = self.current_shards(),
            rewards = %format!("{{{}}}", dump.join(", ")),
            "reward recomputed"
        );
    }

    /// Scan every (host, shard) pair against one rule set and push reward
    /// toward the state the rules vote for.
    fn score_rules(&mut self, snapshot: &MetricsSnapshot, rules: &[ThresholdRule], action: Action) {
        let (next, weight, reward_stay) = match action {
            Action::Add => (self.current as isize + 1, ADD_WEIGHT, false),
            Action::Remove => (self.current as isize - 1, REMOVE_WEIGHT, true),
            Action::Nop => return,
        };
        // Votes for a state outside the range are silently ignored.
        if next < 0 || next >= self.state_count as isize {
            return;
        }
        let next = next as usize;

        for rule in rules {
            for (host, host_metrics) in &snapshot.hosts {
                for (shard, shard_metrics) in &host_metrics.shards {
                    let observed = match rule.scope {
                        MetricScope::Host => host_metrics.host_value(&rule.metric),
                        MetricScope::Shard => {
                            shard_metrics.get(&rule.metric).and_then(MetricValue::as_f64)
                        }
                    };
                    let Some(observed) = observed else {
                        debug!(%host, %shard, metric = %rule.metric, "metric absent, rule skipped");
                        continue;
                    };

                    if rule.violated(observed) {
                        debug!(
                            %host, %shard,
                            metric = %rule.metric,
                            observed,
                            threshold = rule.value,
                            vote = %action,
                            "threshold violated"
                        );
                        self.reward[next] += REWARD_DELTA * weight;
                    } else if reward_stay {
                        self.reward[self.current] += REWARD_DELTA;
                    }
                }
            }
        }
    }

    /// Expected value of taking `action` at `index` under value vector `u`.
    fn expected(&self, u: &[f64], index: usize, action: Action) -> f64 {
        self.transition_at(index, action)
            .iter()
            .map(|&(p, next)| p * u[next])
            .sum()
    }

    /// Solve by synchronous Bellman sweeps until the largest per-sweep
    /// change drops to `epsilon * (1 - gamma) / gamma`.
    pub fn value_iteration(&self, epsilon: f64) -> Vec<f64> {
        debug!("value iteration started");
        let mut u1 = vec![0.0; self.state_count];
        loop {
            let u = u1.clone();
            let mut delta: f64 = 0.0;
            for s in 0..self.state_count {
                let best = self
                    .legal_actions(s)
                    .iter()
                    .map(|&a| self.expected(&u, s, a))
                    .fold(f64::NEG_INFINITY, f64::max);
                u1[s] = self.reward[s] + self.gamma * best;
                delta = delta.max((u1[s] - u[s]).abs());
            }
            if delta <= epsilon * (1.0 - self.gamma) / self.gamma {
                debug!("value iteration done");
                return u1;
            }
        }
    }

    /// Best action per state under value vector `u`; the first maximal
    /// action in listed order wins ties.
    pub fn best_policy(&self, u: &[f64]) -> Vec<Action> {
        (0..self.state_count)
            .map(|s| {
                let actions = self.legal_actions(s);
                let mut best = actions[0];
                let mut best_value = self.expected(u, s, best);
                for &a in &actions[1..] {
                    let value = self.expected(u, s, a);
                    if value > best_value {
                        best = a;
                        best_value = value;
                    }
                }
                best
            })
            .collect()
    }

    /// The chosen action for the current state only.
    pub fn solve(&self) -> Action {
        let u = self.value_iteration(0.001);
        self.best_policy(&u)[self.current]
    }

    /// Record the outcome of a completed actuation.
    ///
    /// Attempted counters always move; the current state and the
    /// succeeded counter move only on success. Success ratios are
    /// recomputed either way. Committing an action that would leave the
    /// state range is a caller bug and leaves all statistics untouched.
    pub fn commit_action_result(&mut self, ok: bool, action: Action) -> PolicyResult<()> {
        let next = match action {
            Action::Nop => return Ok(()),
            Action::Add => self.current as isize + 1,
            Action::Remove => self.current as isize - 1,
        };
        if next < 0 || next >= self.state_count as isize {
            return Err(PolicyError::InvalidTransition {
                state: self.current_shards(),
                action,
            });
        }

        match action {
            Action::Add => {
                self.stats.add_attempted += 1;
                if ok {
                    self.stats.add_succeeded += 1;
                }
            }
            Action::Remove => {
                self.stats.rmv_attempted += 1;
                if ok {
                    self.stats.rmv_succeeded += 1;
                }
            }
            Action::Nop => unreachable!(),
        }

        if ok {
            self.current = next as usize;
            info!(shards = self.current_shards(), "transition to new state");
        }

        self.add_rate = self.stats.add_rate();
        self.rmv_rate = self.stats.rmv_rate();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardpilot_core::Trigger;

    fn shard_rule(metric: &str, trigger: Trigger, value: f64) -> ThresholdRule {
        ThresholdRule {
            metric: metric.to_string(),
            scope: MetricScope::Shard,
            trigger,
            value,
        }
    }

    fn snapshot_with(metric: &str, value: f64) -> MetricsSnapshot {
        let mut snap = MetricsSnapshot::default();
        snap.insert_metric("db-1", &format!("shard1_{metric}"), MetricValue::Float(value));
        snap
    }

    #[test]
    fn construction_rejects_bad_inputs() {
        assert!(matches!(
            ClusterPolicy::new(0, 10),
            Err(PolicyError::StateOutOfRange { .. })
        ));
        assert!(matches!(
            ClusterPolicy::new(11, 10),
            Err(PolicyError::StateOutOfRange { .. })
        ));
        assert!(matches!(
            ClusterPolicy::with_gamma(3, 10, 1.0),
            Err(PolicyError::InvalidDiscount(_))
        ));
    }

    #[test]
    fn legal_actions_respect_boundaries() {
        let policy = ClusterPolicy::new(1, 10).unwrap();
        assert!(policy.transition(1, Action::Remove).is_none());
        assert!(policy.transition(1, Action::Add).is_some());
        assert!(policy.transition(10, Action::Add).is_none());
        assert!(policy.transition(10, Action::Remove).is_some());
        assert!(policy.transition(5, Action::Add).is_some());
        assert!(policy.transition(11, Action::Nop).is_none());
    }

    #[test]
    fn transition_distributions_sum_to_one() {
        let mut policy = ClusterPolicy::new(5, 10).unwrap();
        // Walk the success rates away from the prior.
        for ok in [true, false, false, true, true] {
            policy.commit_action_result(ok, Action::Add).unwrap();
            policy.commit_action_result(!ok, Action::Remove).unwrap();
        }

        for state in 1..=10 {
            for action in [Action::Nop, Action::Add, Action::Remove] {
                if let Some(dist) = policy.transition(state, action) {
                    let total: f64 = dist.iter().map(|(p, _)| p).sum();
                    assert!(
                        (total - 1.0).abs() < 0.001,
                        "state {state} action {action}: sum {total}"
                    );
                }
            }
        }
    }

    #[test]
    fn zero_reward_solves_to_nop_everywhere() {
        for state in 1..=10 {
            let policy = ClusterPolicy::new(state, 10).unwrap();
            let u = policy.value_iteration(0.001);
            assert!(u.iter().all(|&v| v == 0.0), "state {state}: {u:?}");
            assert_eq!(policy.solve(), Action::Nop, "state {state}");
        }
    }

    #[test]
    fn successful_add_advances_state() {
        let mut policy = ClusterPolicy::new(3, 10).unwrap();
        let attempted_before = policy.stats().add_attempted;

        policy.commit_action_result(true, Action::Add).unwrap();
        assert_eq!(policy.current_shards(), 4);
        assert_eq!(policy.stats().add_attempted, attempted_before + 1);
    }

    #[test]
    fn failed_add_keeps_state_but_counts_attempt() {
        let mut policy = ClusterPolicy::new(3, 10).unwrap();
        let attempted_before = policy.stats().add_attempted;
        let succeeded_before = policy.stats().add_succeeded;

        policy.commit_action_result(false, Action::Add).unwrap();
        assert_eq!(policy.current_shards(), 3);
        assert_eq!(policy.stats().add_attempted, attempted_before + 1);
        assert_eq!(policy.stats().add_succeeded, succeeded_before);
    }

    #[test]
    fn boundary_commits_rejected_without_touching_stats() {
        let mut policy = ClusterPolicy::new(10, 10).unwrap();
        let stats_before = *policy.stats();
        assert!(matches!(
            policy.commit_action_result(true, Action::Add),
            Err(PolicyError::InvalidTransition { .. })
        ));
        assert_eq!(*policy.stats(), stats_before);
        assert_eq!(policy.current_shards(), 10);

        let mut policy = ClusterPolicy::new(1, 10).unwrap();
        let stats_before = *policy.stats();
        assert!(matches!(
            policy.commit_action_result(true, Action::Remove),
            Err(PolicyError::InvalidTransition { .. })
        ));
        assert_eq!(*policy.stats(), stats_before);
    }

    #[test]
    fn nop_commit_changes_nothing() {
        let mut policy = ClusterPolicy::new(5, 10).unwrap();
        let stats_before = *policy.stats();
        policy.commit_action_result(true, Action::Nop).unwrap();
        assert_eq!(policy.current_shards(), 5);
        assert_eq!(*policy.stats(), stats_before);
    }

    #[test]
    fn overload_votes_for_add() {
        let mut policy = ClusterPolicy::new(3, 10).unwrap();
        let rules = vec![shard_rule("op_count_query", Trigger::Above, 500.0)];
        let snap = snapshot_with("op_count_query", 900.0);

        policy.calc_reward(&snap, &rules, &[]);
        assert_eq!(policy.solve(), Action::Add);
    }

    #[test]
    fn idle_cluster_votes_for_remove() {
        let mut policy = ClusterPolicy::new(3, 10).unwrap();
        let rules = vec![shard_rule("op_count_query", Trigger::Below, 50.0)];
        let snap = snapshot_with("op_count_query", 2.0);

        policy.calc_reward(&snap, &[], &rules);
        assert_eq!(policy.solve(), Action::Remove);
    }

    #[test]
    fn satisfied_remove_rules_bias_toward_staying() {
        let mut policy = ClusterPolicy::new(3, 10).unwrap();
        let rules = vec![shard_rule("op_count_query", Trigger::Below, 50.0)];
        let snap = snapshot_with("op_count_query", 300.0);

        policy.calc_reward(&snap, &[], &rules);
        assert_eq!(policy.solve(), Action::Nop);
    }

    #[test]
    fn add_votes_at_max_state_are_ignored() {
        let mut policy = ClusterPolicy::new(10, 10).unwrap();
        let rules = vec![shard_rule("op_count_query", Trigger::Above, 500.0)];
        let snap = snapshot_with("op_count_query", 900.0);

        policy.calc_reward(&snap, &rules, &[]);
        assert_eq!(policy.solve(), Action::Nop);
    }

    #[test]
    fn host_scoped_rules_read_host_metrics() {
        let mut policy = ClusterPolicy::new(3, 10).unwrap();
        let rules = vec![ThresholdRule {
            metric: "load_one".to_string(),
            scope: MetricScope::Host,
            trigger: Trigger::Above,
            value: 4.0,
        }];

        let mut snap = MetricsSnapshot::default();
        snap.insert_metric("db-1", "load_one", MetricValue::Float(9.0));
        // Host metrics only count on hosts that carry shards.
        snap.insert_metric("db-1", "shard1_ops", MetricValue::Int(1));

        policy.calc_reward(&snap, &rules, &[]);
        assert_eq!(policy.solve(), Action::Add);
    }

    #[test]
    fn reward_window_resets_each_cycle() {
        let mut policy = ClusterPolicy::new(3, 10).unwrap();
        let rules = vec![shard_rule("op_count_query", Trigger::Above, 500.0)];

        policy.calc_reward(&snapshot_with("op_count_query", 900.0), &rules, &[]);
        assert_eq!(policy.solve(), Action::Add);

        // The violation clears; the next cycle must not inherit it.
        policy.calc_reward(&snapshot_with("op_count_query", 100.0), &rules, &[]);
        assert_eq!(policy.solve(), Action::Nop);
    }

    #[test]
    fn single_state_space_only_nops() {
        let policy = ClusterPolicy::new(1, 1).unwrap();
        assert_eq!(policy.solve(), Action::Nop);
        assert!(policy.transition(1, Action::Add).is_none());
        assert!(policy.transition(1, Action::Remove).is_none());
    }
}

//! The Training Validator (spec §4.10): learning/stagnation detection,
//! convergence, baseline gating, issue flags, and early-stop
//! recommendations over the stream of `TrainingCycleMetrics` and
//! `PolicyUpdateResult` the orchestrator produces each cycle.
//!
//! No teacher analog exists (the teacher has no cycle-based training
//! loop to validate); built as a plain struct holding small sliding
//! `VecDeque` windows, matching the teacher's preference for owned
//! ring-style buffers (`crate::ds::RingBuffer`) over pulling in a stats
//! crate for anything beyond mean/stddev/slope.

use std::collections::VecDeque;

use crate::config::{IssueThresholds, TrainingConfig};
use crate::metrics::{PolicyUpdateResult, TrainingCycleMetrics};

/// Classification of the performance-score trend over the sliding window
/// (spec §4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LearningStatus {
    Learning,
    SlowImprovement,
    Stagnant,
    Declining,
    Unstable,
    InsufficientData,
}

/// Issues the validator can flag from one cycle's metrics (spec §4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Issue {
    ExplodingGradients,
    VanishingGradients,
    PolicyCollapse,
    NumericalInstability,
    ExplorationInsufficient,
    Critical,
}

/// Per-opponent baseline evaluation scores plus the weighted aggregate
/// (spec §4.10 baseline gating: `0.2*random + 0.5*heuristic + 0.3*material`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BaselineScore {
    pub random: f32,
    pub heuristic: f32,
    pub material: f32,
}

impl BaselineScore {
    pub fn aggregate(&self) -> f32 {
        0.2 * self.random + 0.5 * self.heuristic + 0.3 * self.material
    }
}

/// What `TrainingValidator::validate` returns each cycle (spec §4.10).
#[derive(Debug, Clone)]
pub struct ValidatorReport {
    pub is_valid: bool,
    pub should_stop: bool,
    pub learning_status: LearningStatus,
    pub issues: Vec<Issue>,
    pub recommendations: Vec<String>,
}

/// Thresholds governing trend classification, beyond the per-metric
/// `IssueThresholds` already in `TrainingConfig` (spec §4.10: "configurable
/// thresholds", not pinned to one numeric scheme by the spec).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidatorConfig {
    /// Sliding window size for the OLS trend and convergence checks.
    pub window: usize,
    /// Cycles a stagnant/declining trend may persist before `shouldStop`
    /// becomes eligible (still gated on baseline non-improvement too).
    pub stagnation_patience: usize,
    /// Number of consecutive non-improving baselines before early
    /// stopping is eligible.
    pub baseline_patience: usize,
    pub issue_thresholds: IssueThresholds,
    /// Slope above which the trend is classified `LEARNING`.
    pub learning_slope_threshold: f32,
    /// Slope above which (but below `learning_slope_threshold`) the trend
    /// is `SLOW_IMPROVEMENT` rather than `STAGNANT`.
    pub slow_improvement_slope_threshold: f32,
    /// Slope below which the trend is classified `DECLINING`.
    pub declining_slope_threshold: f32,
    /// stddev/|mean| above which a window too noisy to trust a slope
    /// reading is classified `UNSTABLE` rather than `STAGNANT`.
    pub instability_cv_threshold: f32,
    /// Stability (`1 / (1 + cv)`) above which a near-zero slope window
    /// is flagged as converged (spec §4.10 "convergence").
    pub convergence_stability_threshold: f32,
}

impl ValidatorConfig {
    pub fn from_training_config(config: &TrainingConfig) -> Self {
        Self {
            window: 10,
            stagnation_patience: config.stagnation_patience,
            baseline_patience: 3,
            issue_thresholds: config.issue_thresholds,
            learning_slope_threshold: 0.01,
            slow_improvement_slope_threshold: 0.002,
            declining_slope_threshold: -0.01,
            instability_cv_threshold: 0.75,
            convergence_stability_threshold: 0.95,
        }
    }
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            window: 10,
            stagnation_patience: 10,
            baseline_patience: 3,
            issue_thresholds: IssueThresholds::default(),
            learning_slope_threshold: 0.01,
            slow_improvement_slope_threshold: 0.002,
            declining_slope_threshold: -0.01,
            instability_cv_threshold: 0.75,
            convergence_stability_threshold: 0.95,
        }
    }
}

/// Ordinary-least-squares slope of `ys` against `x = 0..ys.len()`.
fn ols_slope(ys: &[f32]) -> f32 {
    let n = ys.len() as f32;
    if n < 2.0 {
        return 0.0;
    }
    let xs: Vec<f32> = (0..ys.len()).map(|i| i as f32).collect();
    let x_mean = xs.iter().sum::<f32>() / n;
    let y_mean = ys.iter().sum::<f32>() / n;
    let mut cov = 0.0f32;
    let mut var = 0.0f32;
    for (x, y) in xs.iter().zip(ys) {
        cov += (x - x_mean) * (y - y_mean);
        var += (x - x_mean).powi(2);
    }
    if var.abs() < f32::EPSILON {
        0.0
    } else {
        cov / var
    }
}

fn mean(xs: &[f32]) -> f32 {
    xs.iter().sum::<f32>() / xs.len().max(1) as f32
}

fn stddev(xs: &[f32], m: f32) -> f32 {
    if xs.len() < 2 {
        return 0.0;
    }
    let var = xs.iter().map(|x| (x - m).powi(2)).sum::<f32>() / xs.len() as f32;
    var.sqrt()
}

/// Consumes `TrainingCycleMetrics`/`PolicyUpdateResult` pairs and emits a
/// [`ValidatorReport`] each cycle (spec §4.10).
pub struct TrainingValidator {
    config: ValidatorConfig,
    scores: VecDeque<f32>,
    cycles: VecDeque<TrainingCycleMetrics>,
    policy_results: VecDeque<PolicyUpdateResult>,
    stagnant_cycles: usize,
    numerical_instability_failures: usize,
    baseline_history: Vec<BaselineScore>,
    baselines_since_improvement: usize,
}

impl TrainingValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self {
            config,
            scores: VecDeque::new(),
            cycles: VecDeque::new(),
            policy_results: VecDeque::new(),
            stagnant_cycles: 0,
            numerical_instability_failures: 0,
            baseline_history: Vec::new(),
            baselines_since_improvement: 0,
        }
    }

    /// A single scalar performance proxy for the OLS trend: `avgReward`,
    /// the field spec §3's `TrainingCycleMetrics` names specifically as a
    /// per-cycle scalar (win/draw/loss rates are reported too, but as a
    /// vector of three; `avg_reward` is spec's own single number).
    fn performance_score(metrics: &TrainingCycleMetrics) -> f32 {
        metrics.avg_reward
    }

    /// Feed one cycle's metrics and update result through the validator,
    /// returning the report for that cycle.
    pub fn validate(
        &mut self,
        metrics: TrainingCycleMetrics,
        policy_result: PolicyUpdateResult,
    ) -> ValidatorReport {
        let window = self.config.window.max(2);
        self.scores.push_back(Self::performance_score(&metrics));
        while self.scores.len() > window {
            self.scores.pop_front();
        }
        self.cycles.push_back(metrics.clone());
        while self.cycles.len() > window {
            self.cycles.pop_front();
        }
        self.policy_results.push_back(policy_result);
        while self.policy_results.len() > window {
            self.policy_results.pop_front();
        }

        let mut issues = self.detect_issues(&metrics, &policy_result);

        // Sustained NUMERICAL_INSTABILITY across a full window escalates
        // to CRITICAL (spec §4.6: "sustained failures trip a validator
        // rule").
        if self.numerical_instability_failures >= window && !issues.contains(&Issue::Critical) {
            issues.push(Issue::Critical);
        }

        let learning_status = if self.scores.len() < window {
            LearningStatus::InsufficientData
        } else {
            self.classify_trend()
        };

        match learning_status {
            LearningStatus::Stagnant | LearningStatus::Declining => self.stagnant_cycles += 1,
            LearningStatus::Learning | LearningStatus::SlowImprovement => self.stagnant_cycles = 0,
            LearningStatus::Unstable | LearningStatus::InsufficientData => {}
        }

        if !policy_result.avg_loss.is_finite()
            || !policy_result.gradient_norm.is_finite()
            || !metrics.avg_reward.is_finite()
        {
            if !issues.contains(&Issue::Critical) {
                issues.push(Issue::Critical);
            }
        }

        let is_valid = !issues.contains(&Issue::Critical);
        let critical = issues.contains(&Issue::Critical);
        let stagnation_exhausted = self.stagnant_cycles > self.config.stagnation_patience
            && self.baselines_since_improvement >= self.config.baseline_patience;
        let should_stop = critical || stagnation_exhausted;

        if !issues.is_empty() {
            log::warn!("cycle {}: validator flagged {:?}", metrics.cycle, issues);
        }
        if should_stop {
            log::warn!(
                "cycle {}: recommending early stop (critical: {critical}, stagnant cycles: {})",
                metrics.cycle,
                self.stagnant_cycles
            );
        }

        let recommendations = self.recommendations(&issues, learning_status);

        ValidatorReport {
            is_valid,
            should_stop,
            learning_status,
            issues,
            recommendations,
        }
    }

    fn detect_issues(
        &mut self,
        metrics: &TrainingCycleMetrics,
        policy_result: &PolicyUpdateResult,
    ) -> Vec<Issue> {
        let t = &self.config.issue_thresholds;
        let mut issues = Vec::new();

        if policy_result.trained {
            if policy_result.gradient_norm > t.gradient_high {
                issues.push(Issue::ExplodingGradients);
            } else if policy_result.gradient_norm < t.gradient_low {
                issues.push(Issue::VanishingGradients);
            }
            if policy_result.policy_entropy < t.entropy_low {
                issues.push(Issue::PolicyCollapse);
            }
        }

        // "sustained variance in loss > mean*0.5" (spec §4.10): a majority
        // of the window's cycles exceeding that ratio, not just this one.
        let unstable_cycles = self
            .cycles
            .iter()
            .chain(std::iter::once(metrics))
            .filter(|c| c.avg_loss > f32::EPSILON && c.loss_variance > c.avg_loss * 0.5)
            .count();
        let total = self.cycles.len() + 1;
        let sustained_variance = unstable_cycles * 2 > total;
        let loss_magnitude_unstable = metrics.avg_loss > t.loss_high;
        if sustained_variance || loss_magnitude_unstable {
            issues.push(Issue::NumericalInstability);
            self.numerical_instability_failures += 1;
        } else {
            self.numerical_instability_failures = 0;
        }

        if self.cycles.len() + 1 >= self.config.window {
            let win_rates: Vec<f32> = self
                .cycles
                .iter()
                .chain(std::iter::once(metrics))
                .rev()
                .take(self.config.window)
                .map(|c| (c.matchup.white_win_rate + c.matchup.black_win_rate) / 2.0)
                .collect();
            let m = mean(&win_rates);
            let sd = stddev(&win_rates, m);
            if sd < 1e-4 && m < t.winrate_low {
                issues.push(Issue::ExplorationInsufficient);
            }
        }

        issues
    }

    fn classify_trend(&self) -> LearningStatus {
        let scores: Vec<f32> = self.scores.iter().copied().collect();
        let slope = ols_slope(&scores);
        let m = mean(&scores);
        let sd = stddev(&scores, m);
        let cv = sd / m.abs().max(1e-6);

        if slope > self.config.learning_slope_threshold {
            LearningStatus::Learning
        } else if slope > self.config.slow_improvement_slope_threshold {
            LearningStatus::SlowImprovement
        } else if slope < self.config.declining_slope_threshold {
            LearningStatus::Declining
        } else if cv > self.config.instability_cv_threshold {
            LearningStatus::Unstable
        } else {
            // Near-zero slope, low cv: this is the stagnation/convergence
            // region. `is_converged` reports the stricter "stability >
            // 0.95" case (spec §4.10) separately for callers that only
            // care about convergence, not the full trend classification.
            LearningStatus::Stagnant
        }
    }

    /// Whether the window is converged: high stability and a near-zero
    /// slope (spec §4.10 "convergence").
    pub fn is_converged(&self) -> bool {
        if self.scores.len() < self.config.window {
            return false;
        }
        let scores: Vec<f32> = self.scores.iter().copied().collect();
        let slope = ols_slope(&scores);
        let m = mean(&scores);
        let sd = stddev(&scores, m);
        let stability = 1.0 / (1.0 + sd / m.abs().max(1e-6));
        stability > self.config.convergence_stability_threshold && slope.abs() < 1e-3
    }

    /// Record one baseline evaluation's scores. No auto-promotion occurs
    /// on the first baseline (spec §4.10); returns whether this baseline
    /// improved over the previous one.
    pub fn record_baseline(&mut self, score: BaselineScore) -> Option<bool> {
        let improved = self
            .baseline_history
            .last()
            .map(|prev| score.aggregate() > prev.aggregate());
        match improved {
            None => {
                self.baseline_history.push(score);
                None
            }
            Some(true) => {
                self.baselines_since_improvement = 0;
                self.baseline_history.push(score);
                Some(true)
            }
            Some(false) => {
                self.baselines_since_improvement += 1;
                self.baseline_history.push(score);
                Some(false)
            }
        }
    }

    fn recommendations(&self, issues: &[Issue], status: LearningStatus) -> Vec<String> {
        let mut recs = Vec::new();
        // Priority-bucketed: CRITICAL first, then the rest in detection order.
        if issues.contains(&Issue::Critical) {
            recs.push("halt training: a non-finite metric was reported this cycle".to_string());
        }
        for issue in issues {
            let msg = match issue {
                Issue::ExplodingGradients => {
                    "reduce the learning rate or enable gradient clipping"
                }
                Issue::VanishingGradients => {
                    "increase the learning rate or review weight initialization"
                }
                Issue::PolicyCollapse => {
                    "raise the exploration rate (epsilon/temperature) to restore entropy"
                }
                Issue::NumericalInstability => {
                    "reduce the learning rate or the loss's sensitivity to outlier targets"
                }
                Issue::ExplorationInsufficient => {
                    "increase exploration or check for an unvarying self-play matchup"
                }
                Issue::Critical => continue,
            };
            recs.push(msg.to_string());
        }
        match status {
            LearningStatus::Stagnant => {
                recs.push("performance has plateaued; consider a baseline evaluation".to_string())
            }
            LearningStatus::Declining => recs.push(
                "performance is declining; consider reverting to the best checkpoint".to_string(),
            ),
            _ => {}
        }
        recs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MatchupDiagnostics;

    fn cycle(cycle: usize, avg_reward: f32) -> TrainingCycleMetrics {
        TrainingCycleMetrics {
            cycle,
            games_played: 4,
            avg_game_length: 20.0,
            experiences_collected: 80,
            matchup: MatchupDiagnostics {
                white_win_rate: 0.5,
                black_win_rate: 0.5,
                draw_rate: 0.0,
                avg_game_length: 20.0,
                color_bias: 0.0,
                step_limit_ratio: 0.0,
                avg_reward,
                reward_variance: 0.1,
            },
            avg_reward,
            reward_variance: 0.1,
            batch_updates: 1,
            avg_loss: 1.0,
            loss_variance: 0.1,
            policy_entropy: 1.0,
            gradient_norm: 1.0,
            game_quality: 0.5,
            move_accuracy: 0.5,
            efficiency: 1.0,
            throughput: 1.0,
        }
    }

    fn trained_result() -> PolicyUpdateResult {
        PolicyUpdateResult {
            avg_loss: 1.0,
            gradient_norm: 1.0,
            policy_entropy: 1.0,
            q_value_mean: 0.0,
            target_value_mean: 0.0,
            trained: true,
            numerical_instability: false,
        }
    }

    #[test]
    fn insufficient_data_before_window_fills() {
        let mut v = TrainingValidator::new(ValidatorConfig::default());
        let report = v.validate(cycle(0, 0.0), trained_result());
        assert_eq!(report.learning_status, LearningStatus::InsufficientData);
    }

    #[test]
    fn rising_rewards_classify_as_learning() {
        let mut v = TrainingValidator::new(ValidatorConfig::default());
        let mut report = None;
        for i in 0..12 {
            report = Some(v.validate(cycle(i, i as f32 * 0.5), trained_result()));
        }
        assert_eq!(report.unwrap().learning_status, LearningStatus::Learning);
    }

    #[test]
    fn flat_rewards_classify_as_stagnant() {
        let mut v = TrainingValidator::new(ValidatorConfig::default());
        let mut report = None;
        for i in 0..12 {
            report = Some(v.validate(cycle(i, 1.0), trained_result()));
        }
        assert_eq!(report.unwrap().learning_status, LearningStatus::Stagnant);
    }

    #[test]
    fn exploding_gradient_flags_issue_and_can_stop() {
        let mut config = ValidatorConfig::default();
        config.stagnation_patience = 0;
        config.baseline_patience = 0;
        let mut v = TrainingValidator::new(config);
        let mut last = None;
        for i in 0..12 {
            let mut result = trained_result();
            result.gradient_norm = 1000.0;
            last = Some(v.validate(cycle(i, 1.0), result));
        }
        let report = last.unwrap();
        assert!(report.issues.contains(&Issue::ExplodingGradients));
    }

    #[test]
    fn non_finite_metric_is_critical_and_stops() {
        let mut v = TrainingValidator::new(ValidatorConfig::default());
        let mut result = trained_result();
        result.avg_loss = f32::NAN;
        let report = v.validate(cycle(0, 0.0), result);
        assert!(report.issues.contains(&Issue::Critical));
        assert!(report.should_stop);
        assert!(!report.is_valid);
    }

    #[test]
    fn first_baseline_reports_no_improvement_signal() {
        let mut v = TrainingValidator::new(ValidatorConfig::default());
        let improved = v.record_baseline(BaselineScore {
            random: 0.8,
            heuristic: 0.3,
            material: 0.4,
        });
        assert_eq!(improved, None);
    }

    #[test]
    fn subsequent_baseline_detects_improvement() {
        let mut v = TrainingValidator::new(ValidatorConfig::default());
        v.record_baseline(BaselineScore {
            random: 0.5,
            heuristic: 0.3,
            material: 0.3,
        });
        let improved = v.record_baseline(BaselineScore {
            random: 0.9,
            heuristic: 0.6,
            material: 0.6,
        });
        assert_eq!(improved, Some(true));
    }
}

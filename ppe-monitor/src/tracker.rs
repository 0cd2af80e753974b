// 违规持续判定
//
// 连续不合规达到阈值时才确认违规，过滤单帧抖动。每段连续不合规
// 最多确认一次；状态一旦离开不合规立即复位。

use common::ComplianceStatus;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// 默认持续阈值
pub const DEFAULT_PERSIST: Duration = Duration::from_secs(3);

/// 违规状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationState {
    /// 无违规
    Clear,
    /// 违规开始，尚未达到阈值
    Pending { since: Instant },
    /// 本段违规已确认
    Triggered { since: Instant },
}

#[derive(Debug)]
pub struct ViolationTracker {
    threshold: Duration,
    state: ViolationState,
}

impl Default for ViolationTracker {
    fn default() -> Self {
        Self::new(DEFAULT_PERSIST)
    }
}

impl ViolationTracker {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            state: ViolationState::Clear,
        }
    }

    /// 输入一次状态
    ///
    /// # 返回
    ///
    /// 仅在本段违规被确认的那一次返回true
    pub fn observe(&mut self, status: ComplianceStatus, now: Instant) -> bool {
        if !status.is_violation() {
            if self.state != ViolationState::Clear {
                debug!("Violation episode ended ({})", status);
            }
            self.state = ViolationState::Clear;
            return false;
        }

        match self.state {
            ViolationState::Clear => {
                debug!("Violation episode started");
                self.state = ViolationState::Pending { since: now };
                false
            }
            ViolationState::Pending { since } => {
                if now.saturating_duration_since(since) >= self.threshold {
                    info!(
                        "Violation confirmed after {:.1}s",
                        now.saturating_duration_since(since).as_secs_f64()
                    );
                    self.state = ViolationState::Triggered { since };
                    true
                } else {
                    false
                }
            }
            ViolationState::Triggered { .. } => false,
        }
    }

    pub fn state(&self) -> ViolationState {
        self.state
    }

    /// 当前违规段的开始时间
    pub fn episode_start(&self) -> Option<Instant> {
        match self.state {
            ViolationState::Clear => None,
            ViolationState::Pending { since } | ViolationState::Triggered { since } => Some(since),
        }
    }

    pub fn is_triggered(&self) -> bool {
        matches!(self.state, ViolationState::Triggered { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK: Duration = Duration::from_millis(100);

    /// 以10Hz输入状态序列，返回确认次数
    fn run(tracker: &mut ViolationTracker, start: Instant, statuses: &[ComplianceStatus]) -> usize {
        statuses
            .iter()
            .enumerate()
            .filter(|(i, status)| tracker.observe(**status, start + TICK * (*i as u32)))
            .count()
    }

    fn repeat(status: ComplianceStatus, ticks: usize) -> Vec<ComplianceStatus> {
        vec![status; ticks]
    }

    #[test]
    fn test_sustained_violation_confirms_once() {
        let mut tracker = ViolationTracker::default();
        // 31个tick，跨度3.0s
        let statuses = repeat(ComplianceStatus::NonCompliant, 31);
        assert_eq!(run(&mut tracker, Instant::now(), &statuses), 1);
        assert!(tracker.is_triggered());
    }

    #[test]
    fn test_interrupted_runs_never_confirm() {
        let mut tracker = ViolationTracker::default();
        let mut statuses = repeat(ComplianceStatus::NonCompliant, 20);
        statuses.push(ComplianceStatus::Compliant);
        statuses.extend(repeat(ComplianceStatus::NonCompliant, 25));

        assert_eq!(run(&mut tracker, Instant::now(), &statuses), 0);
        assert!(!tracker.is_triggered());
    }

    #[test]
    fn test_short_run_does_not_confirm() {
        let mut tracker = ViolationTracker::default();
        let statuses = repeat(ComplianceStatus::NonCompliant, 30);
        assert_eq!(run(&mut tracker, Instant::now(), &statuses), 0);
        assert!(matches!(tracker.state(), ViolationState::Pending { .. }));
    }

    #[test]
    fn test_long_run_does_not_repeat() {
        let mut tracker = ViolationTracker::default();
        let statuses = repeat(ComplianceStatus::NonCompliant, 200);
        assert_eq!(run(&mut tracker, Instant::now(), &statuses), 1);
    }

    #[test]
    fn test_each_episode_confirms_independently() {
        let mut tracker = ViolationTracker::default();
        let mut statuses = repeat(ComplianceStatus::NonCompliant, 40);
        statuses.push(ComplianceStatus::Inconclusive);
        statuses.extend(repeat(ComplianceStatus::NonCompliant, 40));
        statuses.extend(repeat(ComplianceStatus::NoDetection, 5));
        statuses.extend(repeat(ComplianceStatus::NonCompliant, 10));

        assert_eq!(run(&mut tracker, Instant::now(), &statuses), 2);
    }

    #[test]
    fn test_other_statuses_never_confirm() {
        let mut tracker = ViolationTracker::default();
        let mut statuses = repeat(ComplianceStatus::Compliant, 50);
        statuses.extend(repeat(ComplianceStatus::Inconclusive, 50));
        statuses.extend(repeat(ComplianceStatus::NoDetection, 50));

        assert_eq!(run(&mut tracker, Instant::now(), &statuses), 0);
        assert_eq!(tracker.state(), ViolationState::Clear);
    }

    #[test]
    fn test_episode_start_tracks_first_tick() {
        let mut tracker = ViolationTracker::new(Duration::from_secs(1));
        let start = Instant::now();

        assert!(tracker.episode_start().is_none());
        tracker.observe(ComplianceStatus::NonCompliant, start);
        tracker.observe(ComplianceStatus::NonCompliant, start + Duration::from_millis(500));
        assert_eq!(tracker.episode_start(), Some(start));

        assert!(tracker.observe(ComplianceStatus::NonCompliant, start + Duration::from_secs(1)));
        assert_eq!(tracker.episode_start(), Some(start));

        tracker.observe(ComplianceStatus::Compliant, start + Duration::from_secs(2));
        assert!(tracker.episode_start().is_none());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        const INTERRUPTIONS: [ComplianceStatus; 3] = [
            ComplianceStatus::Compliant,
            ComplianceStatus::Inconclusive,
            ComplianceStatus::NoDetection,
        ];

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(200))]

            // 每段连续不合规（10Hz下至少31个tick即跨度3s）恰好确认一次
            #[test]
            fn test_one_confirmation_per_long_run(
                runs in prop::collection::vec((1usize..60, 0usize..3), 0..12)
            ) {
                let mut statuses = Vec::new();
                for (len, interruption) in &runs {
                    statuses.extend(repeat(ComplianceStatus::NonCompliant, *len));
                    statuses.push(INTERRUPTIONS[*interruption]);
                }

                let expected = runs.iter().filter(|(len, _)| *len >= 31).count();
                let mut tracker = ViolationTracker::default();
                prop_assert_eq!(run(&mut tracker, Instant::now(), &statuses), expected);
                prop_assert_eq!(tracker.state(), ViolationState::Clear);
            }
        }
    }
}

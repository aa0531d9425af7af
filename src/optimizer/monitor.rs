//! Search monitors: hooks the branch-and-bound loop polls to decide whether to keep going.
//!
//! Exact search over module subsets can take arbitrarily long on large catalogs. A caller bounds
//! it with a [TimeLimitMonitor], an [InterruptMonitor] driven from another thread, or both.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchCommand {
    Continue,
    Terminate(String),
}

pub trait SearchMonitor: Send {
    fn name(&self) -> &str;

    fn on_enter_search(&mut self) {}

    /// Called once per search node, after [SearchMonitor::search_command].
    fn on_step(&mut self) {}

    fn on_solution(&mut self, _objective: i64) {}

    fn search_command(&self) -> SearchCommand;
}

/// Stops the search once a wall-clock budget is spent.
///
/// The clock is read only when `steps & clock_check_mask == 0`, i.e. on the very first node
/// and then every `mask + 1` nodes.
#[derive(Debug, Clone)]
pub struct TimeLimitMonitor {
    clock_check_mask: u64,
    steps: u64,
    time_limit: Duration,
    start_time: Instant,
}

impl TimeLimitMonitor {
    /// Check every 4,096 nodes.
    const DEFAULT_CLOCK_CHECK_MASK: u64 = 0x0FFF;

    pub fn new(time_limit: Duration) -> Self {
        Self::with_clock_check_mask(time_limit, Self::DEFAULT_CLOCK_CHECK_MASK)
    }

    pub fn with_clock_check_mask(time_limit: Duration, clock_check_mask: u64) -> Self {
        Self {
            clock_check_mask,
            steps: 0,
            time_limit,
            start_time: Instant::now(),
        }
    }
}

impl SearchMonitor for TimeLimitMonitor {
    fn name(&self) -> &str {
        "TimeLimitMonitor"
    }

    fn on_enter_search(&mut self) {
        self.start_time = Instant::now();
        self.steps = 0;
    }

    #[inline]
    fn on_step(&mut self) {
        self.steps = self.steps.wrapping_add(1);
    }

    #[inline]
    fn search_command(&self) -> SearchCommand {
        if (self.steps & self.clock_check_mask) == 0 && self.start_time.elapsed() >= self.time_limit
        {
            return SearchCommand::Terminate("time limit reached".to_string());
        }
        SearchCommand::Continue
    }
}

/// Stops the search when a shared flag is raised.
#[derive(Debug, Clone)]
pub struct InterruptMonitor {
    stop_flag: Arc<AtomicBool>,
}

impl InterruptMonitor {
    pub fn new(stop_flag: Arc<AtomicBool>) -> Self {
        Self { stop_flag }
    }
}

impl SearchMonitor for InterruptMonitor {
    fn name(&self) -> &str {
        "InterruptMonitor"
    }

    fn search_command(&self) -> SearchCommand {
        if self.stop_flag.load(Ordering::Relaxed) {
            SearchCommand::Terminate("interrupt signal received".to_string())
        } else {
            SearchCommand::Continue
        }
    }
}

/// Stops the search once a number of improving solutions has been found.
#[derive(Debug, Clone)]
pub struct SolutionLimitMonitor {
    solutions_found: u64,
    solution_limit: u64,
}

impl SolutionLimitMonitor {
    pub fn new(solution_limit: u64) -> Self {
        Self {
            solutions_found: 0,
            solution_limit,
        }
    }
}

impl SearchMonitor for SolutionLimitMonitor {
    fn name(&self) -> &str {
        "SolutionLimitMonitor"
    }

    fn on_enter_search(&mut self) {
        self.solutions_found = 0;
    }

    fn on_solution(&mut self, _objective: i64) {
        self.solutions_found += 1;
    }

    fn search_command(&self) -> SearchCommand {
        if self.solutions_found >= self.solution_limit {
            SearchCommand::Terminate("solution limit reached".to_string())
        } else {
            SearchCommand::Continue
        }
    }
}

/// Emits a trace event for every improving solution.
#[derive(Debug, Default, Clone)]
pub struct LogMonitor {
    improvements: u64,
}

impl SearchMonitor for LogMonitor {
    fn name(&self) -> &str {
        "LogMonitor"
    }

    fn on_solution(&mut self, objective: i64) {
        self.improvements += 1;
        tracing::debug!(objective, improvements = self.improvements, "new incumbent");
    }

    fn search_command(&self) -> SearchCommand {
        SearchCommand::Continue
    }
}

/// Fans hooks out to several monitors. The first monitor asking to terminate wins.
#[derive(Default)]
pub struct CompositeMonitor {
    monitors: Vec<Box<dyn SearchMonitor>>,
}

impl CompositeMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, monitor: Box<dyn SearchMonitor>) {
        self.monitors.push(monitor);
    }

    pub fn len(&self) -> usize {
        self.monitors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.monitors.is_empty()
    }
}

impl SearchMonitor for CompositeMonitor {
    fn name(&self) -> &str {
        "CompositeMonitor"
    }

    fn on_enter_search(&mut self) {
        self.monitors.iter_mut().for_each(|m| m.on_enter_search());
    }

    fn on_step(&mut self) {
        self.monitors.iter_mut().for_each(|m| m.on_step());
    }

    fn on_solution(&mut self, objective: i64) {
        self.monitors
            .iter_mut()
            .for_each(|m| m.on_solution(objective));
    }

    fn search_command(&self) -> SearchCommand {
        self.monitors
            .iter()
            .map(|m| m.search_command())
            .find(|command| matches!(command, SearchCommand::Terminate(_)))
            .unwrap_or(SearchCommand::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupt_monitor_follows_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        let monitor = InterruptMonitor::new(Arc::clone(&flag));
        assert_eq!(monitor.search_command(), SearchCommand::Continue);
        flag.store(true, Ordering::Relaxed);
        assert_eq!(
            monitor.search_command(),
            SearchCommand::Terminate("interrupt signal received".to_string())
        );
    }

    #[test]
    fn zero_time_limit_terminates_on_first_check() {
        let mut monitor = TimeLimitMonitor::new(Duration::ZERO);
        monitor.on_enter_search();
        assert!(matches!(
            monitor.search_command(),
            SearchCommand::Terminate(_)
        ));
    }

    #[test]
    fn clock_is_only_read_on_masked_steps() {
        let mut monitor = TimeLimitMonitor::with_clock_check_mask(Duration::ZERO, 0b11);
        monitor.on_enter_search();
        monitor.on_step();
        assert_eq!(monitor.search_command(), SearchCommand::Continue);
        monitor.on_step();
        monitor.on_step();
        monitor.on_step();
        assert!(matches!(
            monitor.search_command(),
            SearchCommand::Terminate(_)
        ));
    }

    #[test]
    fn solution_limit_counts_improvements() {
        let mut monitor = SolutionLimitMonitor::new(2);
        monitor.on_enter_search();
        monitor.on_solution(10);
        assert_eq!(monitor.search_command(), SearchCommand::Continue);
        monitor.on_solution(12);
        assert_eq!(
            monitor.search_command(),
            SearchCommand::Terminate("solution limit reached".to_string())
        );
        monitor.on_enter_search();
        assert_eq!(monitor.search_command(), SearchCommand::Continue);
    }

    #[test]
    fn generous_time_limit_continues() {
        let mut monitor = TimeLimitMonitor::new(Duration::from_secs(3600));
        monitor.on_enter_search();
        assert_eq!(monitor.search_command(), SearchCommand::Continue);
    }

    #[test]
    fn composite_terminates_when_any_member_does() {
        let flag = Arc::new(AtomicBool::new(true));
        let mut composite = CompositeMonitor::new();
        composite.add(Box::new(LogMonitor::default()));
        composite.add(Box::new(TimeLimitMonitor::new(Duration::from_secs(3600))));
        assert_eq!(composite.search_command(), SearchCommand::Continue);
        composite.add(Box::new(InterruptMonitor::new(flag)));
        assert_eq!(composite.len(), 3);
        assert!(matches!(
            composite.search_command(),
            SearchCommand::Terminate(_)
        ));
    }
}

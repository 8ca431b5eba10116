//! Provider Routing Policy
//!
//! Orders the provider chain for each request. Eligibility is capability
//! based; ranking ascends by estimated cost with unpriceable providers
//! last, then reorders by monitor weight, and finally moves unhealthy
//! providers behind everything usable. An explicit caller preference
//! short-circuits ranking when the preferred provider is eligible.

use std::cmp::Ordering;
use std::sync::Arc;

use tracing::debug;

use super::monitor::PerformanceMonitor;
use crate::provider::ProviderEntry;
use crate::types::TaskRequest;

/// Ranks eligible providers per request
pub struct PolicyEngine {
    monitor: Arc<PerformanceMonitor>,
}

impl PolicyEngine {
    pub fn new(monitor: Arc<PerformanceMonitor>) -> Self {
        Self { monitor }
    }

    /// Produce the ordered chain for one request.
    ///
    /// The first entry is primary; the rest are strictly ordered fallbacks.
    pub fn order(&self, request: &TaskRequest, entries: &[ProviderEntry]) -> Vec<ProviderEntry> {
        let mut eligible: Vec<ProviderEntry> = entries
            .iter()
            .filter(|e| e.descriptor.supports(request.task_type))
            .cloned()
            .collect();

        // Cost ascending; estimation failures sort last but stay eligible
        let mut priced: Vec<(ProviderEntry, Option<f64>)> = eligible
            .drain(..)
            .map(|e| {
                let cost = e.provider.estimate_cost(request).ok();
                (e, cost)
            })
            .collect();
        priced.sort_by(|(_, a), (_, b)| match (a, b) {
            (Some(x), Some(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        });
        let mut ordered: Vec<ProviderEntry> = priced.into_iter().map(|(e, _)| e).collect();

        // Weight reorder: quantized so small fluctuations keep the cost order
        ordered.sort_by(|a, b| {
            let wa = (self.monitor.weight(a.id()) * 10.0).round() as i64;
            let wb = (self.monitor.weight(b.id()) * 10.0).round() as i64;
            wb.cmp(&wa)
        });

        // Usable providers ahead of unhealthy ones, order otherwise preserved
        let (usable, unhealthy): (Vec<ProviderEntry>, Vec<ProviderEntry>) = ordered
            .into_iter()
            .partition(|e| e.descriptor.health().is_usable());
        let mut ordered: Vec<ProviderEntry> = usable;
        ordered.extend(unhealthy);

        // Caller preference jumps the queue when eligible and usable
        if let Some(preferred) = &request.preferred_provider
            && let Some(pos) = ordered
                .iter()
                .position(|e| e.id() == preferred && e.descriptor.health().is_usable())
            && pos > 0
        {
            let entry = ordered.remove(pos);
            ordered.insert(0, entry);
        }

        debug!(
            task = %request.task_type,
            chain = ?ordered.iter().map(|e| e.id()).collect::<Vec<_>>(),
            "Provider chain ordered"
        );
        ordered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::monitor::MonitorConfig;
    use crate::provider::{Provider, ProviderResponse, SharedProvider};
    use crate::types::{
        GatewayError, HealthStatus, ProviderDescriptor, Result, TaskType,
    };
    use async_trait::async_trait;
    use dashmap::DashMap;
    use serde_json::json;

    struct StubProvider {
        id: String,
        cost: Option<f64>,
        capabilities: Vec<TaskType>,
    }

    #[async_trait]
    impl Provider for StubProvider {
        async fn execute(&self, _request: &TaskRequest) -> Result<ProviderResponse> {
            Ok(ProviderResponse::content_only(json!({}), self.id.clone()))
        }

        fn name(&self) -> &str {
            &self.id
        }

        fn model(&self) -> &str {
            "stub"
        }

        fn capabilities(&self) -> &[TaskType] {
            &self.capabilities
        }

        fn estimate_cost(&self, _request: &TaskRequest) -> Result<f64> {
            self.cost.ok_or_else(|| GatewayError::Estimation {
                provider: self.id.clone(),
                reason: "no cost table".to_string(),
            })
        }

        async fn health_check(&self) -> Result<bool> {
            Ok(true)
        }
    }

    fn entry(id: &str, cost: Option<f64>, capabilities: Vec<TaskType>) -> ProviderEntry {
        let provider: SharedProvider = Arc::new(StubProvider {
            id: id.to_string(),
            cost,
            capabilities: capabilities.clone(),
        });
        ProviderEntry::new(
            provider,
            ProviderDescriptor::new(id, id, capabilities),
        )
    }

    fn engine() -> PolicyEngine {
        PolicyEngine::new(Arc::new(PerformanceMonitor::new(
            Arc::new(DashMap::new()),
            MonitorConfig::default(),
        )))
    }

    fn all_tasks() -> Vec<TaskType> {
        vec![
            TaskType::SimilaritySearch,
            TaskType::Analysis,
            TaskType::Suggestion,
            TaskType::Completion,
        ]
    }

    #[test]
    fn test_capability_filter() {
        let entries = vec![
            entry("search-only", Some(0.1), vec![TaskType::SimilaritySearch]),
            entry("general", Some(0.2), all_tasks()),
        ];
        let request = TaskRequest::new(TaskType::Analysis);

        let ordered = engine().order(&request, &entries);
        assert_eq!(ordered.len(), 1);
        assert_eq!(ordered[0].id(), "general");
    }

    #[test]
    fn test_cost_ascending_with_estimation_failures_last() {
        let entries = vec![
            entry("pricey", Some(1.0), all_tasks()),
            entry("unknown-cost", None, all_tasks()),
            entry("cheap", Some(0.01), all_tasks()),
        ];
        let request = TaskRequest::new(TaskType::Completion);

        let ordered = engine().order(&request, &entries);
        let ids: Vec<&str> = ordered.iter().map(|e| e.id()).collect();
        assert_eq!(ids, vec!["cheap", "pricey", "unknown-cost"]);
    }

    #[test]
    fn test_unhealthy_provider_sorts_last() {
        let entries = vec![
            entry("a", Some(0.01), all_tasks()),
            entry("b", Some(0.5), all_tasks()),
        ];
        entries[0].descriptor.set_health(HealthStatus::Unhealthy);

        let request = TaskRequest::new(TaskType::Analysis);
        let ordered = engine().order(&request, &entries);
        assert_eq!(ordered[0].id(), "b");
        assert_eq!(ordered[1].id(), "a");
    }

    #[test]
    fn test_preference_short_circuits() {
        let entries = vec![
            entry("cheap", Some(0.01), all_tasks()),
            entry("preferred", Some(2.0), all_tasks()),
        ];
        let request = TaskRequest::new(TaskType::Analysis).with_preference("preferred");

        let ordered = engine().order(&request, &entries);
        assert_eq!(ordered[0].id(), "preferred");
    }

    #[test]
    fn test_unhealthy_preference_is_ignored() {
        let entries = vec![
            entry("cheap", Some(0.01), all_tasks()),
            entry("preferred", Some(2.0), all_tasks()),
        ];
        entries[1].descriptor.set_health(HealthStatus::Unhealthy);
        let request = TaskRequest::new(TaskType::Analysis).with_preference("preferred");

        let ordered = engine().order(&request, &entries);
        assert_eq!(ordered[0].id(), "cheap");
    }

    #[test]
    fn test_weight_reorders_within_quantum() {
        let breakers: Arc<DashMap<String, crate::provider::CircuitBreaker>> =
            Arc::new(DashMap::new());
        let monitor = Arc::new(PerformanceMonitor::new(
            Arc::clone(&breakers),
            MonitorConfig {
                recompute_interval: std::time::Duration::ZERO,
                ..Default::default()
            },
        ));
        // "cheap" keeps failing; "steady" is reliable
        for _ in 0..10 {
            monitor.record("cheap", 100, false, 0.0);
            monitor.record("steady", 100, true, 0.0);
        }
        monitor.recompute();

        let engine = PolicyEngine::new(monitor);
        let entries = vec![
            entry("cheap", Some(0.01), all_tasks()),
            entry("steady", Some(0.5), all_tasks()),
        ];
        let request = TaskRequest::new(TaskType::Analysis);

        let ordered = engine.order(&request, &entries);
        assert_eq!(ordered[0].id(), "steady");
    }
}

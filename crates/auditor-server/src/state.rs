//! Shared application state.

use std::sync::Arc;

use auditor_accounting::{BudgetGate, KeyRegistry, MetricsAssembler, PricingTable, UsageLedger};
use auditor_config::AuditorConfig;
use auditor_core::AuditStore;
use auditor_telemetry::Metrics;

use crate::auth::TokenService;
use crate::error::ServerError;
use crate::upstream::UpstreamClient;

/// Everything a handler needs, cloned per request.
#[derive(Clone)]
pub struct AppState {
    /// Loaded configuration
    pub config: Arc<AuditorConfig>,
    /// Persistence
    pub store: Arc<dyn AuditStore>,
    /// Virtual key registry
    pub registry: KeyRegistry,
    /// Usage ledger
    pub ledger: UsageLedger,
    /// Dashboard overview
    pub assembler: Arc<MetricsAssembler>,
    /// Per-key budget gate
    pub budget: Arc<BudgetGate>,
    /// Model prices
    pub pricing: Arc<PricingTable>,
    /// Provider client
    pub upstream: UpstreamClient,
    /// Session tokens
    pub tokens: Arc<TokenService>,
    /// Prometheus collectors
    pub metrics: Arc<Metrics>,
}

impl AppState {
    /// Wire every service over `store`
    pub fn new(config: AuditorConfig, store: Arc<dyn AuditStore>) -> Result<Self, ServerError> {
        let registry = KeyRegistry::new(Arc::clone(&store));
        let ledger = UsageLedger::from_config(Arc::clone(&store), &config.accounting);
        let assembler = MetricsAssembler::new(Arc::clone(&store), &config.accounting);
        let budget = BudgetGate::new(Arc::clone(&store));
        let pricing = PricingTable::from_config(&config.pricing);
        let upstream = UpstreamClient::new(config.upstream.clone())?;
        let tokens = TokenService::new(&config.auth.jwt_secret, config.auth.jwt_expiration);
        let metrics = Metrics::new()?;

        Ok(Self {
            config: Arc::new(config),
            store,
            registry,
            ledger,
            assembler: Arc::new(assembler),
            budget: Arc::new(budget),
            pricing: Arc::new(pricing),
            upstream,
            tokens: Arc::new(tokens),
            metrics: Arc::new(metrics),
        })
    }
}

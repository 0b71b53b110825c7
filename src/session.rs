//! Query sessions.
//!
//! A [`Session`] owns everything one connection needs: configuration, the
//! registered providers, credentials state, the plan cache and the
//! transaction counter. Sessions never share mutable state with each other.

use std::sync::Arc;

use crate::analyzer::Analyzer;
use crate::auth::GoogleAuthenticator;
use crate::config::RuntimeConfig;
use crate::discovery::{DiscoveryStore, GOOGLE_DIRECTORY_URL};
use crate::error::{CloudqlError, CloudqlResult};
use crate::output::ExecutorOutput;
use crate::parser;
use crate::plan::{CacheStats, Plan, PlanCache, TxnCounter, build_primitive};
use crate::primitive::{ExecContext, ProgressFn};
use crate::provider::{GoogleProvider, Provider};
use crate::taxonomy::{self, ProviderMap};
use crate::transport::{HttpTransport, ReqwestTransport};

pub struct Session {
    config: RuntimeConfig,
    providers: ProviderMap,
    ctx: ExecContext,
    plans: PlanCache,
    txn: TxnCounter,
}

impl Session {
    /// Session talking to the real provider APIs.
    pub fn new(config: RuntimeConfig) -> CloudqlResult<Self> {
        let transport: Arc<dyn HttpTransport> =
            Arc::new(ReqwestTransport::new(config.request_timeout())?);
        let store = DiscoveryStore::new(
            GoogleProvider::NAME,
            GOOGLE_DIRECTORY_URL,
            &config.provider_root,
            config.metadata_ttl(),
            config.offline,
            Arc::clone(&transport),
        );
        let google: Arc<dyn Provider> = Arc::new(GoogleProvider::new(
            store,
            Arc::new(GoogleAuthenticator::new(Arc::clone(&transport))),
            config.use_non_preferred_apis,
        ));
        let providers = ProviderMap::from([(GoogleProvider::NAME.to_string(), google)]);
        Ok(Self::with_providers(config, transport, providers))
    }

    /// Session over the given transport and providers.
    pub fn with_providers(
        config: RuntimeConfig,
        transport: Arc<dyn HttpTransport>,
        providers: ProviderMap,
    ) -> Self {
        let mut ctx = ExecContext::new(transport, config.provider.clone());
        ctx.key_file_path = config.key_file_path.clone();
        ctx.poll_interval = config.poll_interval();
        ctx.dry_run = config.dry_run;
        ctx.page_limit = config.page_limit;
        let plans = PlanCache::new(config.query_cache_size);
        Self {
            config,
            providers,
            ctx,
            plans,
            txn: TxnCounter::new(),
        }
    }

    /// Receive progress lines (monitor polls) as they happen.
    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.ctx.progress = Some(progress);
        self
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn current_provider(&self) -> &str {
        &self.ctx.current_provider
    }

    pub fn context(&self) -> &ExecContext {
        &self.ctx
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.plans.stats()
    }

    /// The cached plan for a statement's text, if any.
    pub fn cached_plan(&self, text: &str) -> Option<Arc<Plan>> {
        self.plans.get(text)
    }

    /// Build a plan for one statement, without consulting the cache.
    async fn build_plan(&self, text: &str, txn_id: u64) -> CloudqlResult<Plan> {
        let statement = parser::parse(text)?;
        for name in statement.provider_strings() {
            taxonomy::provider(&self.providers, &name)?;
        }
        let analysis = Analyzer::new(&self.providers, &self.ctx.current_provider)
            .with_max_results(self.config.max_results)
            .analyze(&statement)
            .await?;
        let instructions = build_primitive(analysis)?;
        Ok(Plan::new(statement.kind(), text, instructions, txn_id))
    }

    /// Cached plan with a fresh transaction id, or a newly built one.
    pub async fn plan(&self, text: &str) -> CloudqlResult<Arc<Plan>> {
        let txn_id = self.txn.next();
        if let Some(plan) = self.plans.get(text) {
            tracing::info!("Retrieving query plan from cache");
            plan.rebind(txn_id);
            return Ok(plan);
        }
        let plan = Arc::new(self.build_plan(text, txn_id).await?);
        self.plans.insert(text, Arc::clone(&plan));
        Ok(plan)
    }

    /// Run one statement. Failures become error outputs.
    pub async fn execute_statement(&mut self, text: &str) -> ExecutorOutput {
        let plan = match self.plan(text).await {
            Ok(plan) => plan,
            Err(e) => {
                tracing::debug!("Plan for '{}' failed: {}", text, e);
                let mut output = ExecutorOutput::error(e);
                output.txn_id = self.txn.current();
                return output;
            }
        };

        let provider_before = self.ctx.current_provider.clone();
        let output = plan.execute(&mut self.ctx).await;
        if self.ctx.current_provider != provider_before {
            // cached plans were resolved against the previous provider
            self.plans.clear();
        }
        output
    }

    /// Run every `;`-separated statement in `query`, in order.
    pub async fn execute(&mut self, query: &str) -> Vec<ExecutorOutput> {
        let statements = parser::split_statements(query);
        let mut outputs = Vec::with_capacity(statements.len());
        for text in statements {
            tracing::info!("Executing: {}", text);
            outputs.push(self.execute_statement(&text).await);
        }
        outputs
    }

    /// Plan summary of every statement in `query`. Nothing is sent.
    pub async fn explain(&self, query: &str) -> CloudqlResult<Vec<String>> {
        let statements = parser::split_statements(query);
        if statements.is_empty() {
            return Err(CloudqlError::parse(0, "empty statement"));
        }
        let mut lines = Vec::with_capacity(statements.len());
        for text in statements {
            let plan = self.plan(&text).await?;
            let mut line = format!("{}: {}", plan.statement_type, plan.instructions.describe());
            if let Some(body) = plan
                .instructions
                .prepared_request()
                .and_then(|r| r.body_json())
            {
                line.push_str(&format!(" body={}", body));
            }
            lines.push(line);
        }
        Ok(lines)
    }
}

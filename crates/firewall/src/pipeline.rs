//! Priority-ordered filter execution.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::{FilterContext, FirewallError, FirewallMode, tokenizer::Tokenizer};

/// Which phases a filter participates in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDirection {
    /// Runs on the request body only.
    Input,
    /// Runs on the response body only.
    Output,
    /// Runs on both phases.
    Both,
}

impl FilterDirection {
    fn applies_to_input(self) -> bool {
        matches!(self, Self::Input | Self::Both)
    }

    fn applies_to_output(self) -> bool {
        matches!(self, Self::Output | Self::Both)
    }
}

/// A pluggable inspection/mutation unit.
///
/// A filter returns an error only for its *own* failure; refusing a
/// request is done by setting `ctx.block`. Errors are logged by the
/// pipeline and the filter is skipped.
#[async_trait]
pub trait Filter: Send + Sync {
    /// Stable filter name used in detections and logs.
    fn name(&self) -> &str;

    /// Position in the chain; lower runs earlier. Ties keep insertion
    /// order.
    fn priority(&self) -> i32;

    /// Phases this filter participates in.
    fn direction(&self) -> FilterDirection;

    /// Inspect or annotate the request.
    async fn apply_input(&self, _ctx: &mut FilterContext) -> crate::Result<()> {
        Ok(())
    }

    /// Inspect or annotate the response.
    async fn apply_output(&self, _ctx: &mut FilterContext) -> crate::Result<()> {
        Ok(())
    }
}

/// Ordered collection of filters and the controller that runs them under
/// one of four operating modes.
pub struct FirewallPipeline {
    filters: RwLock<Vec<Arc<dyn Filter>>>,
    mode: RwLock<FirewallMode>,
    tokenizer: Arc<Tokenizer>,
}

impl FirewallPipeline {
    /// Create an empty pipeline in the given mode.
    pub fn new(mode: FirewallMode, tokenizer: Arc<Tokenizer>) -> Self {
        Self {
            filters: RwLock::new(Vec::new()),
            mode: RwLock::new(mode),
            tokenizer,
        }
    }

    /// The tokenizer activated on contexts in redact mode.
    pub fn tokenizer(&self) -> &Arc<Tokenizer> {
        &self.tokenizer
    }

    /// Current operating mode.
    pub fn mode(&self) -> FirewallMode {
        *self.mode.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Change the operating mode.
    pub fn set_mode(&self, mode: FirewallMode) {
        *self.mode.write().unwrap_or_else(|e| e.into_inner()) = mode;
    }

    /// Register a filter, keeping the chain sorted by ascending priority
    /// with ties broken by insertion order.
    pub fn register(&self, filter: Arc<dyn Filter>) {
        let mut filters = self.filters.write().unwrap_or_else(|e| e.into_inner());
        filters.push(filter);
        filters.sort_by_key(|f| f.priority());
    }

    fn snapshot(&self) -> Vec<Arc<dyn Filter>> {
        self.filters.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Run the input phase over the request.
    ///
    /// Every filter observes the *original* body; a filter's
    /// `modified_request_body` is swapped into `request_body` only after
    /// all filters have run, so later filters never re-detect
    /// already-tokenized values.
    pub async fn process_input(&self, ctx: &mut FilterContext) -> crate::Result<()> {
        let mode = self.mode();

        if mode == FirewallMode::Disabled {
            return Ok(());
        }

        ctx.mode = mode;

        if mode == FirewallMode::Redact {
            ctx.tokenizer = Some(self.tokenizer.clone());
        }

        for filter in self.snapshot() {
            if !filter.direction().applies_to_input() {
                continue;
            }

            if let Err(e) = filter.apply_input(ctx).await {
                log::warn!("Input filter '{}' failed, skipping: {e}", filter.name());
                continue;
            }

            if ctx.block && matches!(mode, FirewallMode::Enforce | FirewallMode::Redact) {
                let reason = ctx.block_reason.clone().unwrap_or_else(|| "blocked by filter".to_string());
                return Err(FirewallError::Blocked(reason));
            }
        }

        if let Some(modified) = ctx.modified_request_body.take() {
            ctx.request_body = modified;
        }

        Ok(())
    }

    /// Run the output phase over the response.
    pub async fn process_output(&self, ctx: &mut FilterContext) -> crate::Result<()> {
        let mode = self.mode();

        if mode == FirewallMode::Disabled {
            return Ok(());
        }

        ctx.mode = mode;

        if mode == FirewallMode::Redact && ctx.tokenizer.is_none() {
            ctx.tokenizer = Some(self.tokenizer.clone());
        }

        for filter in self.snapshot() {
            if !filter.direction().applies_to_output() {
                continue;
            }

            if let Err(e) = filter.apply_output(ctx).await {
                log::warn!("Output filter '{}' failed, skipping: {e}", filter.name());
                continue;
            }

            if ctx.block && matches!(mode, FirewallMode::Enforce | FirewallMode::Redact) {
                let reason = ctx.block_reason.clone().unwrap_or_else(|| "blocked by filter".to_string());
                return Err(FirewallError::Blocked(reason));
            }
        }

        if let Some(modified) = ctx.modified_response_body.take() {
            ctx.response_body = Some(modified);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use super::*;
    use crate::store::MemoryTokenStore;

    fn pipeline(mode: FirewallMode) -> FirewallPipeline {
        let store = Arc::new(MemoryTokenStore::new(Duration::from_secs(60)));
        FirewallPipeline::new(mode, Arc::new(Tokenizer::new(store)))
    }

    struct RecordingFilter {
        name: String,
        priority: i32,
        order: Arc<std::sync::Mutex<Vec<String>>>,
        block: bool,
        fail: bool,
    }

    #[async_trait]
    impl Filter for RecordingFilter {
        fn name(&self) -> &str {
            &self.name
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        fn direction(&self) -> FilterDirection {
            FilterDirection::Input
        }

        async fn apply_input(&self, ctx: &mut FilterContext) -> crate::Result<()> {
            if self.fail {
                return Err(FirewallError::Filter {
                    name: self.name.clone(),
                    message: "boom".to_string(),
                });
            }

            self.order.lock().unwrap().push(self.name.clone());

            if self.block {
                ctx.set_block(format!("{} said no", self.name));
            }

            Ok(())
        }
    }

    fn recording(
        name: &str,
        priority: i32,
        order: &Arc<std::sync::Mutex<Vec<String>>>,
    ) -> Arc<RecordingFilter> {
        Arc::new(RecordingFilter {
            name: name.to_string(),
            priority,
            order: order.clone(),
            block: false,
            fail: false,
        })
    }

    #[tokio::test]
    async fn filters_run_in_ascending_priority_order() {
        let pipeline = pipeline(FirewallMode::Monitor);
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        pipeline.register(recording("third", 30, &order));
        pipeline.register(recording("first", 10, &order));
        pipeline.register(recording("second", 20, &order));

        let mut ctx = FilterContext::default();
        pipeline.process_input(&mut ctx).await.unwrap();

        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn ties_keep_insertion_order() {
        let pipeline = pipeline(FirewallMode::Monitor);
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        pipeline.register(recording("a", 10, &order));
        pipeline.register(recording("b", 10, &order));

        let mut ctx = FilterContext::default();
        pipeline.process_input(&mut ctx).await.unwrap();

        assert_eq!(*order.lock().unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn disabled_mode_runs_nothing() {
        let pipeline = pipeline(FirewallMode::Disabled);
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        pipeline.register(recording("only", 10, &order));

        let mut ctx = FilterContext::default();
        pipeline.process_input(&mut ctx).await.unwrap();

        assert!(order.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn enforce_mode_stops_at_the_first_block() {
        let pipeline = pipeline(FirewallMode::Enforce);
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        pipeline.register(recording("before", 10, &order));
        pipeline.register(Arc::new(RecordingFilter {
            name: "blocker".to_string(),
            priority: 20,
            order: order.clone(),
            block: true,
            fail: false,
        }));
        pipeline.register(recording("after", 30, &order));

        let mut ctx = FilterContext::default();
        let error = pipeline.process_input(&mut ctx).await.unwrap_err();

        assert!(matches!(error, FirewallError::Blocked(reason) if reason == "blocker said no"));
        assert_eq!(*order.lock().unwrap(), vec!["before", "blocker"]);
    }

    #[tokio::test]
    async fn monitor_mode_never_propagates_blocks() {
        let pipeline = pipeline(FirewallMode::Monitor);
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        pipeline.register(Arc::new(RecordingFilter {
            name: "blocker".to_string(),
            priority: 10,
            order: order.clone(),
            block: true,
            fail: false,
        }));
        pipeline.register(recording("after", 20, &order));

        let mut ctx = FilterContext::default();
        pipeline.process_input(&mut ctx).await.unwrap();

        assert!(ctx.block);
        assert_eq!(*order.lock().unwrap(), vec!["blocker", "after"]);
    }

    #[tokio::test]
    async fn failing_filters_are_skipped() {
        let pipeline = pipeline(FirewallMode::Enforce);
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        pipeline.register(Arc::new(RecordingFilter {
            name: "broken".to_string(),
            priority: 10,
            order: order.clone(),
            block: false,
            fail: true,
        }));
        pipeline.register(recording("healthy", 20, &order));

        let mut ctx = FilterContext::default();
        pipeline.process_input(&mut ctx).await.unwrap();

        assert_eq!(*order.lock().unwrap(), vec!["healthy"]);
    }

    struct BodyRewriter {
        seen: Arc<std::sync::Mutex<Vec<String>>>,
        replacement: String,
    }

    #[async_trait]
    impl Filter for BodyRewriter {
        fn name(&self) -> &str {
            "rewriter"
        }

        fn priority(&self) -> i32 {
            10
        }

        fn direction(&self) -> FilterDirection {
            FilterDirection::Input
        }

        async fn apply_input(&self, ctx: &mut FilterContext) -> crate::Result<()> {
            self.seen.lock().unwrap().push(ctx.request_body.clone());
            ctx.modified_request_body = Some(self.replacement.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn modified_body_is_swapped_in_only_after_the_pass() {
        let pipeline = pipeline(FirewallMode::Redact);
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));

        pipeline.register(Arc::new(BodyRewriter {
            seen: seen.clone(),
            replacement: "first rewrite".to_string(),
        }));
        pipeline.register(Arc::new(BodyRewriter {
            seen: seen.clone(),
            replacement: "second rewrite".to_string(),
        }));

        let mut ctx = FilterContext {
            request_body: "original".to_string(),
            ..Default::default()
        };

        pipeline.process_input(&mut ctx).await.unwrap();

        // Both filters observed the original body; the last rewrite wins.
        assert_eq!(*seen.lock().unwrap(), vec!["original", "original"]);
        assert_eq!(ctx.request_body, "second rewrite");
    }

    #[tokio::test]
    async fn redact_mode_activates_the_tokenizer() {
        let pipeline = pipeline(FirewallMode::Redact);

        let mut ctx = FilterContext::default();
        pipeline.process_input(&mut ctx).await.unwrap();
        assert!(ctx.tokenizer.is_some());

        let pipeline = self::pipeline(FirewallMode::Enforce);
        let mut ctx = FilterContext::default();
        pipeline.process_input(&mut ctx).await.unwrap();
        assert!(ctx.tokenizer.is_none());
    }

    struct CountingOutputFilter {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Filter for CountingOutputFilter {
        fn name(&self) -> &str {
            "counting"
        }

        fn priority(&self) -> i32 {
            10
        }

        fn direction(&self) -> FilterDirection {
            FilterDirection::Output
        }

        async fn apply_output(&self, ctx: &mut FilterContext) -> crate::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            ctx.modified_response_body = Some("rewritten".to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn output_phase_swaps_the_response_body() {
        let pipeline = pipeline(FirewallMode::Monitor);
        let calls = Arc::new(AtomicUsize::new(0));

        pipeline.register(Arc::new(CountingOutputFilter { calls: calls.clone() }));

        let mut ctx = FilterContext {
            response_body: Some("upstream".to_string()),
            ..Default::default()
        };

        pipeline.process_output(&mut ctx).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.response_body.as_deref(), Some("rewritten"));
    }

    #[tokio::test]
    async fn output_filters_do_not_run_in_the_input_phase() {
        let pipeline = pipeline(FirewallMode::Monitor);
        let calls = Arc::new(AtomicUsize::new(0));

        pipeline.register(Arc::new(CountingOutputFilter { calls: calls.clone() }));

        let mut ctx = FilterContext::default();
        pipeline.process_input(&mut ctx).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}

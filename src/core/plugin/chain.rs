//! Chain building and execution.
//!
//! A chain is built once per request from the snapshot's instance list:
//! an instance is included iff its scope admits the matched route/service
//! pair, then the chain is sorted ascending by priority (stable on ties).
//! BeforeRequest walks the chain forward; AfterResponse walks the same
//! chain in reverse, LIFO around the proxy step.
use std::sync::Arc;

use crate::core::{
    entities::{PluginScope, Route, Service},
    plugin::{Phase, PluginError, PluginInstance, context::RequestContext},
};

/// An ordered set of plugin instances applicable to one request.
#[derive(Debug, Default)]
pub struct Chain {
    plugins: Vec<PluginInstance>,
}

impl Chain {
    /// Select the instances whose scope admits this route/service pair and
    /// order them by priority.
    ///
    /// Consumer-scoped instances are always excluded in this phase of the
    /// system.
    pub fn build(
        all: &[PluginInstance],
        route: &Arc<Route>,
        service: &Arc<Service>,
    ) -> Self {
        let mut plugins: Vec<PluginInstance> = all
            .iter()
            .filter(|instance| Self::admits(instance, route, service))
            .cloned()
            .collect();

        // Stable sort keeps insertion order on equal priorities.
        plugins.sort_by_key(|p| p.priority);

        tracing::debug!(
            route_id = %route.id,
            service_id = %service.id,
            plugins = plugins.len(),
            "plugin chain built"
        );

        Self { plugins }
    }

    fn admits(instance: &PluginInstance, route: &Route, service: &Service) -> bool {
        match instance.scope {
            PluginScope::Global => true,
            PluginScope::Service => instance
                .config
                .service_id
                .as_deref()
                .is_some_and(|id| id == service.id),
            PluginScope::Route => instance
                .config
                .route_id
                .as_deref()
                .is_some_and(|id| id == route.id),
            PluginScope::Consumer => false,
        }
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Run the chain for the phase recorded on the context.
    ///
    /// Rules:
    /// - BeforeRequest executes ascending, AfterResponse descending.
    /// - An abort set by any plugin stops the remaining plugins in the
    ///   current phase.
    /// - A critical plugin error stops the chain and is surfaced to the
    ///   dispatcher; a non-critical error is logged and the chain goes on.
    pub async fn execute(&self, ctx: &mut RequestContext) -> Result<(), PluginError> {
        if self.plugins.is_empty() {
            return Ok(());
        }

        let forward = ctx.phase == Phase::BeforeRequest;
        let order: Vec<&PluginInstance> = if forward {
            self.plugins.iter().collect()
        } else {
            self.plugins.iter().rev().collect()
        };

        for instance in order {
            // An abort from an earlier BeforeRequest plugin short-circuits
            // the rest of that phase. AfterResponse always starts fresh so
            // observers still see aborted outcomes.
            if forward && ctx.is_aborted() {
                tracing::debug!(
                    phase = %ctx.phase,
                    status = ctx.abort_status().map(|s| s.as_u16()),
                    "chain stopped: request aborted"
                );
                return Ok(());
            }

            let name = instance.plugin.name().to_string();
            if let Err(err) = instance.plugin.execute(ctx).await {
                if instance.critical {
                    tracing::error!(
                        plugin = %name,
                        phase = %ctx.phase,
                        request_id = %ctx.request_id,
                        error = %err,
                        "critical plugin failed, stopping chain"
                    );
                    return Err(PluginError {
                        plugin: name,
                        phase: ctx.phase,
                        critical: true,
                        source: err,
                    });
                }

                tracing::warn!(
                    plugin = %name,
                    phase = %ctx.phase,
                    request_id = %ctx.request_id,
                    error = %err,
                    "plugin failed, continuing chain"
                );
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use axum::body::Body;
    use chrono::Utc;
    use http::{Request, StatusCode};

    use super::*;
    use crate::core::{
        entities::PluginConfig,
        plugin::{Plugin, context::test_support},
    };

    /// Records execution order into a shared log; optionally aborts or
    /// fails on a chosen phase.
    struct Probe {
        name: String,
        log: Arc<Mutex<Vec<String>>>,
        abort_in_before: bool,
        fail_in_before: bool,
    }

    #[async_trait]
    impl Plugin for Probe {
        fn name(&self) -> &str {
            &self.name
        }

        async fn execute(&self, ctx: &mut RequestContext) -> eyre::Result<()> {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.name, ctx.phase));
            if ctx.phase == Phase::BeforeRequest {
                if self.fail_in_before {
                    eyre::bail!("probe failure");
                }
                if self.abort_in_before {
                    ctx.abort(StatusCode::FORBIDDEN, "denied");
                }
            }
            Ok(())
        }
    }

    fn plugin_config(scope: PluginScope, priority: i32) -> PluginConfig {
        PluginConfig {
            id: format!("cfg-{priority}"),
            name: "probe".into(),
            scope,
            service_id: None,
            route_id: None,
            consumer_id: None,
            config: serde_json::json!({}),
            priority,
            enabled: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn instance(
        name: &str,
        priority: i32,
        critical: bool,
        log: &Arc<Mutex<Vec<String>>>,
        abort: bool,
        fail: bool,
    ) -> PluginInstance {
        PluginInstance {
            plugin: Arc::new(Probe {
                name: name.into(),
                log: log.clone(),
                abort_in_before: abort,
                fail_in_before: fail,
            }),
            config: Arc::new(plugin_config(PluginScope::Global, priority)),
            scope: PluginScope::Global,
            priority,
            critical,
        }
    }

    fn ctx() -> RequestContext {
        test_support::context_for(
            Request::builder()
                .uri("/api")
                .body(Body::empty())
                .unwrap(),
        )
    }

    async fn run_both_phases(chain: &Chain, ctx: &mut RequestContext) {
        ctx.phase = Phase::BeforeRequest;
        chain.execute(ctx).await.unwrap();
        ctx.phase = Phase::AfterResponse;
        chain.execute(ctx).await.unwrap();
    }

    #[tokio::test]
    async fn before_ascending_after_descending() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let all = vec![
            instance("p10", 10, false, &log, false, false),
            instance("p5", 5, false, &log, false, false),
            instance("p15", 15, false, &log, false, false),
        ];
        let route = Arc::new(test_support::test_route());
        let service = Arc::new(test_support::test_service());
        let chain = Chain::build(&all, &route, &service);

        let mut ctx = ctx();
        run_both_phases(&chain, &mut ctx).await;

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "p5:before_request",
                "p10:before_request",
                "p15:before_request",
                "p15:after_response",
                "p10:after_response",
                "p5:after_response",
            ]
        );
    }

    #[tokio::test]
    async fn abort_skips_remaining_before_but_not_after() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let all = vec![
            instance("p5", 5, false, &log, false, false),
            instance("p10", 10, false, &log, true, false),
            instance("p15", 15, false, &log, false, false),
        ];
        let route = Arc::new(test_support::test_route());
        let service = Arc::new(test_support::test_service());
        let chain = Chain::build(&all, &route, &service);

        let mut ctx = ctx();
        run_both_phases(&chain, &mut ctx).await;

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "p5:before_request",
                "p10:before_request",
                // p15 never ran in BeforeRequest.
                "p15:after_response",
                "p10:after_response",
                "p5:after_response",
            ]
        );
        assert_eq!(ctx.abort_status(), Some(StatusCode::FORBIDDEN));
    }

    #[tokio::test]
    async fn non_critical_error_continues_the_chain() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let all = vec![
            instance("flaky", 5, false, &log, false, true),
            instance("steady", 10, false, &log, false, false),
        ];
        let route = Arc::new(test_support::test_route());
        let service = Arc::new(test_support::test_service());
        let chain = Chain::build(&all, &route, &service);

        let mut ctx = ctx();
        ctx.phase = Phase::BeforeRequest;
        chain.execute(&mut ctx).await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["flaky:before_request", "steady:before_request"]
        );
        assert!(!ctx.is_aborted());
    }

    #[tokio::test]
    async fn critical_error_stops_the_chain() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let all = vec![
            instance("fatal", 5, true, &log, false, true),
            instance("never", 10, false, &log, false, false),
        ];
        let route = Arc::new(test_support::test_route());
        let service = Arc::new(test_support::test_service());
        let chain = Chain::build(&all, &route, &service);

        let mut ctx = ctx();
        ctx.phase = Phase::BeforeRequest;
        let err = chain.execute(&mut ctx).await.unwrap_err();

        assert_eq!(err.plugin, "fatal");
        assert!(err.critical);
        assert_eq!(*log.lock().unwrap(), vec!["fatal:before_request"]);
    }

    #[tokio::test]
    async fn scope_admission() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let route = Arc::new(test_support::test_route());
        let service = Arc::new(test_support::test_service());

        let mut svc_cfg = plugin_config(PluginScope::Service, 1);
        svc_cfg.service_id = Some(service.id.clone());
        let mut other_svc_cfg = plugin_config(PluginScope::Service, 2);
        other_svc_cfg.service_id = Some("other".into());
        let mut route_cfg = plugin_config(PluginScope::Route, 3);
        route_cfg.route_id = Some(route.id.clone());
        let consumer_cfg = plugin_config(PluginScope::Consumer, 4);

        let mk = |name: &str, cfg: PluginConfig| PluginInstance {
            plugin: Arc::new(Probe {
                name: name.into(),
                log: log.clone(),
                abort_in_before: false,
                fail_in_before: false,
            }),
            scope: cfg.scope,
            priority: cfg.priority,
            critical: false,
            config: Arc::new(cfg),
        };

        let all = vec![
            mk("global", plugin_config(PluginScope::Global, 0)),
            mk("svc", svc_cfg),
            mk("other-svc", other_svc_cfg),
            mk("route", route_cfg),
            mk("consumer", consumer_cfg),
        ];

        let chain = Chain::build(&all, &route, &service);
        assert_eq!(chain.len(), 3); // global + matching service + matching route
    }

    #[tokio::test]
    async fn stable_order_on_priority_ties() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let all = vec![
            instance("first", 5, false, &log, false, false),
            instance("second", 5, false, &log, false, false),
        ];
        let route = Arc::new(test_support::test_route());
        let service = Arc::new(test_support::test_service());
        let chain = Chain::build(&all, &route, &service);

        let mut ctx = ctx();
        ctx.phase = Phase::BeforeRequest;
        chain.execute(&mut ctx).await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["first:before_request", "second:before_request"]
        );
    }
}

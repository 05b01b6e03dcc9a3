//! Integration tests for the HTTP executor, webhook and suite
//!
//! Every test talks to a local `wiremock` server.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use serpbench_core::{
    execute_in_slot, AlertEngine, AlertPolicy, AlertRule, HarnessConfig, LoadGenerator,
    MemorySink, RequestOutcome, SlotGauge, StatusClass, WorkSource,
};
use serpbench_loadtest::{
    BenchConfig, HttpExecutor, KeywordOrder, KeywordPool, MarkdownWebhook, ReportStyle,
    RequestTemplate, ResponseCheck, RetryPolicy, Suite, TargetConfig, TargetSource,
    WebhookConfig, ATTEMPTS_FIELD,
};
use tokio::sync::Semaphore;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn serp_check() -> ResponseCheck {
    ResponseCheck::json_api()
        .requiring_any(["organic_results", "answer_box"])
        .extracting("search_id", "/search_metadata/id")
}

async fn run_against(
    template: RequestTemplate,
    check: ResponseCheck,
    config: HarnessConfig,
) -> (serpbench_core::RunSummary, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let pool = Arc::new(KeywordPool::new(["Apple", "Bread"], KeywordOrder::RoundRobin));
    let summary = LoadGenerator::new(
        config,
        HttpExecutor::new(check).unwrap(),
        TargetSource::new(template, Some(pool)),
    )
    .unwrap()
    .with_label("mock")
    .with_sink(sink.clone())
    .run()
    .await
    .unwrap();
    (summary, sink)
}

/// Send a single request to `uri` through the slot and timeout machinery
async fn send_one(executor: &HttpExecutor, uri: String, timeout: Duration) -> RequestOutcome {
    let source = TargetSource::new(RequestTemplate::get(uri), None);
    execute_in_slot(
        executor,
        source.next_item(0),
        0,
        timeout,
        &Arc::new(Semaphore::new(1)),
        &Arc::new(SlotGauge::default()),
    )
    .await
}

/// A local address nothing listens on
fn closed_port_uri() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let uri = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);
    uri
}

fn attempts(outcome: &RequestOutcome) -> Option<&str> {
    outcome.fields.get(ATTEMPTS_FIELD).map(String::as_str)
}

mod executor_tests {
    use super::*;

    #[tokio::test]
    async fn test_successful_json_responses() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("engine", "google"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "search_metadata": {"id": "s-1"},
                "organic_results": [{"title": "x"}],
            })))
            .expect(20)
            .mount(&server)
            .await;

        let template = RequestTemplate::get(format!("{}/search", server.uri()))
            .with_param("engine", "google")
            .with_query_param("q");
        let (summary, sink) =
            run_against(template, serp_check(), HarnessConfig::for_count(4, 20)).await;

        let stats = &summary.statistics;
        assert_eq!(stats.total, 20);
        assert_eq!(stats.success_count, 20);
        assert_eq!(stats.status_counts.get(&200), Some(&20));
        assert!(stats.avg_success_size > 0.0);
        assert_eq!(sink.final_reports().len(), 1);

        let requests = server.received_requests().await.unwrap();
        let apples = requests
            .iter()
            .filter(|r| r.url.query().unwrap_or_default().contains("q=Apple"))
            .count();
        assert_eq!(apples, 10);
    }

    #[tokio::test]
    async fn test_server_errors_are_http_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let (summary, _) = run_against(
            RequestTemplate::get(server.uri()),
            serp_check(),
            HarnessConfig::for_count(2, 6),
        )
        .await;

        assert_eq!(summary.statistics.http_errors, 6);
        assert_eq!(summary.statistics.status_counts.get(&503), Some(&6));
        assert_eq!(summary.statistics.latency.samples, 0);
    }

    #[tokio::test]
    async fn test_slow_responses_time_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"organic_results": []}))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let mut config = HarnessConfig::for_count(2, 4);
        config.request_timeout_secs = 0.2;
        let (summary, _) =
            run_against(RequestTemplate::get(server.uri()), serp_check(), config).await;

        assert_eq!(summary.statistics.timeouts, 4);
        assert!(summary.statistics.failure_latency_max_secs < 1.5);
    }

    #[tokio::test]
    async fn test_rejected_bodies_are_transport_errors() {
        let server = MockServer::start().await;
        Mock::given(path("/error"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"error": "Invalid API key"})),
            )
            .mount(&server)
            .await;
        Mock::given(path("/html"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw("<html>captcha</html>", "text/html"),
            )
            .mount(&server)
            .await;

        for route in ["/error", "/html"] {
            let (summary, _) = run_against(
                RequestTemplate::get(format!("{}{}", server.uri(), route)),
                serp_check(),
                HarnessConfig::for_count(1, 3),
            )
            .await;
            assert_eq!(summary.statistics.transport_errors, 3, "route {}", route);
            // The status code is still counted
            assert_eq!(summary.statistics.status_counts.get(&200), Some(&3));
        }
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let executor = HttpExecutor::new(ResponseCheck::default()).unwrap();
        let outcome = send_one(&executor, closed_port_uri(), Duration::from_secs(2)).await;
        assert_eq!(outcome.status_class, StatusClass::TransportError);
        assert_eq!(attempts(&outcome), Some("1"));
    }
}

mod retry_tests {
    use super::*;

    fn retrying(retries: u32, backoff_secs: f64) -> HttpExecutor {
        HttpExecutor::new(serp_check())
            .unwrap()
            .with_retry(RetryPolicy::new(retries, backoff_secs))
    }

    #[tokio::test]
    async fn test_retry_recovers_after_rejected_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"error": "busy"})))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"organic_results": []})))
            .with_priority(2)
            .mount(&server)
            .await;

        let outcome = send_one(&retrying(2, 0.01), server.uri(), Duration::from_secs(5)).await;

        assert!(outcome.is_success(), "{:?}", outcome.error_detail);
        assert_eq!(attempts(&outcome), Some("2"));
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"error": "busy"})))
            .mount(&server)
            .await;

        let outcome = send_one(&retrying(2, 0.01), server.uri(), Duration::from_secs(5)).await;

        assert_eq!(outcome.status_class, StatusClass::TransportError);
        assert_eq!(outcome.error_detail.as_deref(), Some("busy"));
        assert_eq!(attempts(&outcome), Some("3"));
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_http_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let outcome = send_one(&retrying(3, 0.01), server.uri(), Duration::from_secs(5)).await;

        assert_eq!(outcome.status_class, StatusClass::HttpError);
        assert_eq!(attempts(&outcome), Some("1"));
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_backoff_past_the_timeout_ends_retries() {
        // The first pause would be 2s, longer than the whole request timeout
        let outcome = send_one(&retrying(5, 1.0), closed_port_uri(), Duration::from_secs(1)).await;

        assert_eq!(outcome.status_class, StatusClass::TransportError);
        assert_eq!(attempts(&outcome), Some("1"));
        assert!(outcome.latency < Duration::from_secs(1));
    }
}

mod webhook_tests {
    use super::*;

    #[tokio::test]
    async fn test_alert_reaches_webhook_once() {
        let api = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&api)
            .await;

        let robot = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/robot/send"))
            .and(body_partial_json(json!({"msgtype": "markdown"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"errcode": 0})))
            .expect(1)
            .mount(&robot)
            .await;

        let robot_url = format!("{}/robot/send", robot.uri());
        let webhook = MarkdownWebhook::new(WebhookConfig::new(robot_url)).unwrap();
        let policy = AlertPolicy::new(AlertEngine::new(
            "mock",
            vec![AlertRule::consecutive_server_errors(3)],
        ))
        .with_hook(Arc::new(webhook));

        let summary = LoadGenerator::new(
            HarnessConfig::for_count(1, 8),
            HttpExecutor::new(ResponseCheck::default()).unwrap(),
            TargetSource::new(RequestTemplate::get(api.uri()), None),
        )
        .unwrap()
        .with_alerts(policy)
        .run()
        .await
        .unwrap();

        assert_eq!(summary.alerts_fired, 1);
    }

    #[tokio::test]
    async fn test_webhook_failure_does_not_abort_run() {
        let api = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&api)
            .await;
        let robot = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&robot)
            .await;

        let webhook = MarkdownWebhook::new(WebhookConfig::new(robot.uri())).unwrap();
        let policy = AlertPolicy::new(AlertEngine::new(
            "mock",
            vec![AlertRule::consecutive_server_errors(1)],
        ))
        .with_hook(Arc::new(webhook));

        let summary = LoadGenerator::new(
            HarnessConfig::for_count(1, 3),
            HttpExecutor::new(ResponseCheck::default()).unwrap(),
            TargetSource::new(RequestTemplate::get(api.uri()), None),
        )
        .unwrap()
        .with_alerts(policy)
        .run()
        .await
        .unwrap();

        // Streak of 1 fires on the first 5xx and stays silent while it lasts
        assert_eq!(summary.alerts_fired, 1);
        assert_eq!(summary.recorded, 3);
    }
}

mod suite_tests {
    use super::*;

    fn suite_config(server: &MockServer, dir: &std::path::Path) -> BenchConfig {
        let mut target = TargetConfig::new(
            "google",
            RequestTemplate::get(format!("{}/search", server.uri())).with_query_param("q"),
        );
        target.check = serp_check();

        let mut config = BenchConfig {
            harness: HarnessConfig::for_count(1, 5),
            steps: vec![1, 2],
            keywords: Some(KeywordPool::new(["Cheese"], KeywordOrder::Random)),
            targets: vec![target],
            ..Default::default()
        };
        config.output.summary_csv = Some(dir.join("summary.csv"));
        config.output.json = Some(dir.join("summary.json"));
        config.output.details_dir = Some(dir.join("details"));
        config
    }

    async fn mount_search(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("q", "Cheese"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "search_metadata": {"id": "s-9"},
                "answer_box": {},
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_run_once_writes_outputs_per_step() {
        let server = MockServer::start().await;
        mount_search(&server).await;
        let dir = tempfile::tempdir().unwrap();

        let suite = Suite::new(suite_config(&server, dir.path()), ReportStyle::Log).unwrap();
        let rows = suite.run_once().await.unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].concurrency, 1);
        assert_eq!(rows[1].concurrency, 2);
        assert!(rows.iter().all(|r| r.total == 5 && r.success == 5));

        let csv = std::fs::read_to_string(dir.path().join("summary.csv")).unwrap();
        assert_eq!(csv.lines().count(), 3);

        let json: Vec<serde_json::Value> =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("summary.json")).unwrap())
                .unwrap();
        assert_eq!(json.len(), 2);
        assert_eq!(json[0]["target"], "google");

        let details: Vec<_> = std::fs::read_dir(dir.path().join("details"))
            .unwrap()
            .collect();
        assert_eq!(details.len(), 2);
    }

    #[tokio::test]
    async fn test_monitor_runs_bounded_cycles_and_posts_summaries() {
        let server = MockServer::start().await;
        mount_search(&server).await;
        let robot = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"msgtype": "markdown"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(4)
            .mount(&robot)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut config = suite_config(&server, dir.path());
        config.output.details_dir = None;
        config.monitor.interval_secs = 1;
        config.monitor.cycles = Some(2);
        let mut webhook = WebhookConfig::new(robot.uri());
        webhook.send_summary = true;
        config.webhook = Some(webhook);

        let suite = Suite::new(config, ReportStyle::Log).unwrap();
        let cycles = suite.monitor(std::future::pending()).await.unwrap();
        assert_eq!(cycles, 2);

        // Two cycles, two steps each, appended to the same file
        let csv = std::fs::read_to_string(dir.path().join("summary.csv")).unwrap();
        assert_eq!(csv.lines().count(), 5);
    }

    #[tokio::test]
    async fn test_monitor_stops_on_shutdown() {
        let server = MockServer::start().await;
        mount_search(&server).await;
        let dir = tempfile::tempdir().unwrap();
        let mut config = suite_config(&server, dir.path());
        config.monitor.interval_secs = 3600;

        let suite = Suite::new(config, ReportStyle::Log).unwrap();
        let cycles = suite
            .monitor(tokio::time::sleep(Duration::from_millis(1500)))
            .await
            .unwrap();
        assert_eq!(cycles, 1);
    }

    #[test]
    fn test_invalid_suite_is_rejected() {
        assert!(Suite::new(BenchConfig::default(), ReportStyle::Log).is_err());
    }
}

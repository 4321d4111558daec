// tests/pipeline_scenarios.rs
mod common;

use template_aggregator::config::PipelineConfig;
use template_aggregator::normalize::NormalizeWarning;
use template_aggregator::validate::summarize;
use template_aggregator::{
    run_pipeline, DedupPolicy, FetchError, FetchStatus, PipelineError, Severity,
};

use common::{source, MapFetcher};

const ALPHA: &str = r#"[{"name":"Redis","image":"redis:7"},{"name":"redis","image":"redis:6"}]"#;

#[tokio::test]
async fn scenario_a_duplicate_and_unreachable_source() {
    let sources = vec![
        source("alpha", "https://alpha.test/t.json"),
        source("beta", "https://beta.test/t.json"),
    ];
    let fetcher = MapFetcher::new()
        .ok("alpha", ALPHA)
        .fail("beta", FetchError::Timeout);

    let out = run_pipeline(&PipelineConfig::default(), &sources, &fetcher, &[])
        .await
        .unwrap();

    assert_eq!(out.templates().len(), 1);
    let redis = &out.templates()[0];
    assert_eq!(redis.dedup_key, "redis");
    assert_eq!(redis.image(), Some("redis:7"));
    assert_eq!(out.merged.collisions.len(), 1);

    let beta = &out.report.per_source_health["beta"];
    assert_eq!(beta.status, FetchStatus::Failed);
    assert_eq!(beta.error.as_deref(), Some("Timeout"));
    assert_eq!(beta.record_count, 0);
    assert_eq!(out.report.per_source_health["alpha"].record_count, 1);

    // warnings only: the run is a success
    assert!(!summarize(out.templates().len(), &out.issues).has_errors());
}

#[tokio::test]
async fn fetched_records_are_credited_to_the_serving_source() {
    let sources = vec![source("alpha", "https://alpha.test/t.json")];
    let fetcher = MapFetcher::new().ok(
        "alpha",
        r#"[{"title":"Redis","image":"redis:7","_source":{"name":"elsewhere"}}]"#,
    );

    let out = run_pipeline(&PipelineConfig::default(), &sources, &fetcher, &[])
        .await
        .unwrap();

    let redis = &out.templates()[0];
    assert_eq!(redis.source.name, "alpha");
    assert_eq!(redis.source.url, "https://alpha.test/t.json");
    assert_eq!(out.report.per_source_health["alpha"].record_count, 1);
    assert!(!out.report.per_source_health.contains_key("elsewhere"));
}

#[tokio::test]
async fn last_wins_policy_keeps_later_record() {
    let sources = vec![source("alpha", "https://alpha.test/t.json")];
    let fetcher = MapFetcher::new().ok("alpha", ALPHA);
    let cfg = PipelineConfig {
        dedup_policy: DedupPolicy::LastWins,
        ..PipelineConfig::default()
    };
    let out = run_pipeline(&cfg, &sources, &fetcher, &[]).await.unwrap();
    assert_eq!(out.templates()[0].image(), Some("redis:6"));
}

#[tokio::test]
async fn scenario_b_container_without_image_is_dropped() {
    let sources = vec![source("alpha", "https://alpha.test/t.json")];
    let fetcher = MapFetcher::new().ok(
        "alpha",
        r#"[{"type":1,"title":"Imageless"},{"type":1,"title":"Nginx","image":"nginx:1.25"}]"#,
    );
    let out = run_pipeline(&PipelineConfig::default(), &sources, &fetcher, &[])
        .await
        .unwrap();

    assert_eq!(out.templates().len(), 1);
    assert_eq!(out.templates()[0].title, "Nginx");
    assert!(matches!(
        &out.normalize_warnings[..],
        [NormalizeWarning::MissingImage { title, .. }] if title == "Imageless"
    ));
    assert!(out.issues.iter().all(|i| i.field != "image" || i.severity != Severity::Error));
}

#[tokio::test]
async fn scenario_c_bare_port_warns_but_record_stays() {
    let sources = vec![source("alpha", "https://alpha.test/t.json")];
    let fetcher = MapFetcher::new().ok(
        "alpha",
        r#"{"title":"Web","image":"nginx:1.25","platform":"linux","categories":["Web"],"ports":["80/tcp"]}"#,
    );
    let out = run_pipeline(&PipelineConfig::default(), &sources, &fetcher, &[])
        .await
        .unwrap();

    assert_eq!(out.templates().len(), 1);
    assert_eq!(out.templates()[0].ports(), ["80/tcp".to_string()]);
    assert_eq!(out.issues.len(), 1);
    assert_eq!(out.issues[0].severity, Severity::Warning);
    assert_eq!(out.issues[0].field, "ports");
    assert_eq!(out.report.warnings, 1);
}

#[tokio::test]
async fn scenario_d_empty_source_list_is_fatal() {
    let err = run_pipeline(&PipelineConfig::default(), &[], &MapFetcher::new(), &[])
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::NoSources));
}

#[tokio::test]
async fn all_sources_failing_means_nothing_to_merge() {
    let sources = vec![source("beta", "https://beta.test/t.json")];
    let fetcher = MapFetcher::new().fail("beta", FetchError::HttpStatus(500));
    let err = run_pipeline(&PipelineConfig::default(), &sources, &fetcher, &[])
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::NothingToMerge(_)));
}

#[tokio::test]
async fn failing_source_does_not_reduce_others() {
    let alpha = r#"[{"title":"A","image":"a:1"},{"title":"B","image":"b:1"}]"#;
    let gamma = r#"{"templates":[{"title":"C","image":"c:1"}]}"#;

    let healthy = vec![
        source("alpha", "https://alpha.test"),
        source("gamma", "https://gamma.test"),
    ];
    let mut with_broken = healthy.clone();
    with_broken.insert(1, source("beta", "https://beta.test"));

    let f1 = MapFetcher::new().ok("alpha", alpha).ok("gamma", gamma);
    let f2 = MapFetcher::new()
        .ok("alpha", alpha)
        .ok("gamma", gamma)
        .fail("beta", FetchError::Connect("refused".into()));

    let cfg = PipelineConfig::default();
    let a = run_pipeline(&cfg, &healthy, &f1, &[]).await.unwrap();
    let b = run_pipeline(&cfg, &with_broken, &f2, &[]).await.unwrap();

    for name in ["alpha", "gamma"] {
        assert_eq!(
            a.report.per_source_health[name].record_count,
            b.report.per_source_health[name].record_count
        );
    }
    assert_eq!(b.report.per_source_health["beta"].record_count, 0);
}

#[tokio::test]
async fn merged_output_is_reproducible() {
    let sources = vec![
        source("alpha", "https://alpha.test"),
        source("beta", "https://beta.test"),
    ];
    let fetcher = MapFetcher::new()
        .ok(
            "alpha",
            r#"[{"title":"Zeta","image":"z:1","categories":["Tools"]},{"title":"Redis","image":"redis:7","categories":["Database"]}]"#,
        )
        .ok(
            "beta",
            r#"[{"title":"redis ","image":"redis:6"},{"title":"Adminer","image":"adminer:4","categories":["Database"]}]"#,
        );
    let cfg = PipelineConfig::default();
    let one = run_pipeline(&cfg, &sources, &fetcher, &[]).await.unwrap();
    let two = run_pipeline(&cfg, &sources, &fetcher, &[]).await.unwrap();

    let a = serde_json::to_vec(one.templates()).unwrap();
    let b = serde_json::to_vec(two.templates()).unwrap();
    assert_eq!(a, b);
    let titles: Vec<&str> = one.templates().iter().map(|t| t.title.as_str()).collect();
    assert_eq!(titles, vec!["Adminer", "Redis", "Zeta"]);
}

#[tokio::test]
async fn category_filter_applies_before_merge() {
    let sources = vec![source("alpha", "https://alpha.test")];
    let fetcher = MapFetcher::new().ok(
        "alpha",
        r#"[{"title":"A","image":"a:1","categories":["Media"]},{"title":"B","image":"b:1","categories":["Tools"]}]"#,
    );
    let out = run_pipeline(
        &PipelineConfig::default(),
        &sources,
        &fetcher,
        &["media".to_string()],
    )
    .await
    .unwrap();
    assert_eq!(out.templates().len(), 1);
    assert_eq!(out.templates()[0].title, "A");
}

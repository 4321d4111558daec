// tests/artifacts_roundtrip.rs
use std::collections::BTreeMap;

use chrono::Utc;
use template_aggregator::artifacts::{
    read_merged, write_markdown, write_merged, write_statistics, write_validation_report,
};
use template_aggregator::normalize::normalize;
use template_aggregator::template::SourceAttribution;
use template_aggregator::validate::summarize;
use template_aggregator::{report, validate, FetchError, RawPayload, Source};

fn src(name: &str) -> Source {
    Source {
        name: name.into(),
        url: format!("https://{name}.test/t.json"),
        description: String::new(),
        category: String::new(),
        active: true,
    }
}

const BODY: &[u8] = br#"[
  {"title":"Nginx","image":"nginx:1.25","platform":"linux","categories":["Web"],"ports":["8080:80/tcp"]},
  {"type":3,"title":"Stack","repository":{"url":"https://git.test/s","stackfile":"docker-compose.yml"}}
]"#;

#[test]
fn merged_artifact_reads_back_identically() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("merged").join("master_templates.json");
    let attr = SourceAttribution {
        name: "alpha".into(),
        url: "https://alpha.test/t.json".into(),
    };
    let templates = normalize(&attr, BODY).templates;

    write_merged(&path, "2", &templates).unwrap();
    let back = read_merged(&path).unwrap();
    assert_eq!(back.version, "2");
    assert!(back.warnings.is_empty());
    assert_eq!(back.templates, templates);

    let doc: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(doc["templates"][0]["_source"]["name"], "alpha");
    assert_eq!(doc["templates"][0]["type"], 1);
    assert_eq!(doc["templates"][1]["type"], 3);
    assert!(back.templates.iter().all(|t| t.declared_type.is_none()));
}

#[test]
fn statistics_validation_and_readme_are_written() {
    let dir = tempfile::tempdir().unwrap();
    let attr = SourceAttribution {
        name: "alpha".into(),
        url: "https://alpha.test/t.json".into(),
    };
    let templates = normalize(&attr, BODY).templates;
    let issues = validate(&templates);

    let mut health = BTreeMap::new();
    health.insert("alpha".to_string(), RawPayload::success(&src("alpha"), BODY.to_vec()));
    health.insert(
        "beta".to_string(),
        RawPayload::failed(&src("beta"), &FetchError::Timeout),
    );
    let r = report(&templates, &issues, &health);
    let now = Utc::now();

    let stats = dir.path().join("statistics.json");
    write_statistics(&stats, &r, now).unwrap();
    let v: serde_json::Value = serde_json::from_slice(&std::fs::read(&stats).unwrap()).unwrap();
    assert_eq!(v["total_records"], 2);
    assert_eq!(v["per_type"]["stack"], 1);
    assert_eq!(v["per_source_health"]["beta"]["status"], "failed");
    assert_eq!(v["per_source_health"]["beta"]["error"], "Timeout");
    assert!(v["generated_at"].is_string());

    let vr = dir.path().join("reports").join("validation_report.json");
    write_validation_report(&vr, &summarize(templates.len(), &issues), &issues, now).unwrap();
    let v: serde_json::Value = serde_json::from_slice(&std::fs::read(&vr).unwrap()).unwrap();
    assert_eq!(v["issues"].as_array().unwrap().len(), issues.len());
    assert_eq!(v["summary"]["records"], 2);

    let md = dir.path().join("reports").join("README.md");
    write_markdown(&md, &r, now).unwrap();
    let text = std::fs::read_to_string(&md).unwrap();
    assert!(text.contains("# Template Collection"));
    assert!(text.contains("| beta | failed | 0 | Timeout |"));
    assert!(text.contains("| nginx | 1 |"));
}

use nsenso::core::{Category, CheckResult, Finding, HostInfo, ScanReport, Severity};
use nsenso::ui::UiConfig;

fn sample_report() -> ScanReport {
    let findings = vec![
        Finding::new(
            "users",
            Category::Users,
            Severity::Critical,
            "empty-password:guest",
            "Account 'guest' has an empty password",
        )
        .with_description("The password field for 'guest' in /etc/shadow is empty")
        .with_remediation("passwd -l guest")
        .with_command("read /etc/shadow"),
        Finding::new(
            "users",
            Category::Users,
            Severity::Warning,
            "passwd-hash:legacy",
            "Password hash for 'legacy' stored in /etc/passwd",
        ),
        Finding::new(
            "users",
            Category::Users,
            Severity::Info,
            "shadow-unreadable",
            "Cannot read /etc/shadow (requires elevated privileges)",
        )
        .with_output((0..30).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n")),
    ];

    ScanReport {
        schema_version: "1.0".to_string(),
        tool_version: "0.1.0".to_string(),
        timestamp: "2026-01-01T00:00:00Z".to_string(),
        host: HostInfo {
            hostname: "box".to_string(),
            os_name: "Alpine Linux".to_string(),
            kernel_release: "6.6.0".to_string(),
            euid: 1000,
            is_root: false,
        },
        results: vec![
            CheckResult {
                check: "users".to_string(),
                title: "User and credential audit".to_string(),
                category: Category::Users,
                findings,
            },
            CheckResult {
                check: "kernel".to_string(),
                title: "Kernel hardening".to_string(),
                category: Category::Kernel,
                findings: vec![],
            },
        ],
    }
}

#[test]
fn text_and_json_render_the_same_findings() {
    let report = sample_report();

    let mut json_buf = Vec::new();
    nsenso::report::write_json(&mut json_buf, &report).expect("json");
    let v: serde_json::Value = serde_json::from_slice(&json_buf).expect("parse json");
    let json_findings = v["findings"].as_array().expect("findings array");

    let mut text_buf = Vec::new();
    nsenso::ui::write_text_report(
        &mut text_buf,
        &report,
        &UiConfig {
            color: false,
            verbose: false,
        },
    )
    .expect("text");
    let text = String::from_utf8(text_buf).expect("utf8");

    assert_eq!(json_findings.len(), report.findings().count());

    for (finding, json) in report.findings().zip(json_findings) {
        assert_eq!(json["severity"], finding.severity.as_str());
        assert_eq!(json["description"], finding.description.as_str());
        match &finding.command {
            Some(command) => {
                assert_eq!(json["command"], command.as_str());
                assert!(text.contains(&format!("Command: {command}")), "{text}");
            }
            None => assert!(json["command"].is_null()),
        }
        assert!(text.contains(&finding.title), "missing title in text: {}", finding.title);
        assert!(
            text.contains(&finding.description),
            "missing description in text: {}",
            finding.description
        );
    }

    for severity in Severity::ALL {
        let in_json = json_findings
            .iter()
            .filter(|f| f["severity"] == severity.as_str())
            .count();
        let in_text = text
            .lines()
            .filter(|l| l.trim_start().starts_with(&format!("{} ", severity.label())))
            .count();
        // Findings plus the summary row.
        assert_eq!(in_text, in_json + 1, "severity {severity}: {text}");
    }
}

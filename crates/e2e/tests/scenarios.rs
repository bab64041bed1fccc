//! The shipped scenario files parse, validate and expand

use std::path::PathBuf;

use uiflow_e2e::scenario::Placeholders;
use uiflow_e2e::{HarnessConfig, Scenario};

fn scenarios_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../scenarios")
}

#[test]
fn test_shipped_scenarios_load_and_expand() {
    let scenarios = Scenario::load_all(&scenarios_dir()).unwrap();
    assert!(scenarios.len() >= 8, "found {}", scenarios.len());

    let mut config = HarnessConfig::default();
    config.credentials.email = "user@example.com".into();
    config.credentials.password = "Secr3t!23".into();
    config.credentials.admin_email = "admin@example.com".into();
    config.credentials.admin_password = "Adm1n!23".into();
    let placeholders = Placeholders::new(config.template_vars());

    for scenario in &scenarios {
        assert!(scenario.source.is_some(), "{}", scenario.name);
        let expanded = scenario
            .expand(&placeholders)
            .unwrap_or_else(|e| panic!("{}: {}", scenario.name, e));
        let yaml = serde_yaml::to_string(&expanded).unwrap();
        assert!(!yaml.contains("${"), "{} left a placeholder", scenario.name);
    }
}

#[test]
fn test_tag_filters_select_smoke_suite() {
    let scenarios = Scenario::load_all(&scenarios_dir()).unwrap();
    let smoke: Vec<&str> = scenarios
        .iter()
        .filter(|s| s.matches(Some("smoke"), None))
        .map(|s| s.name.as_str())
        .collect();

    assert!(smoke.contains(&"sign-in-with-code"));
    assert!(smoke.contains(&"protected-route-redirect"));
    assert!(!smoke.contains(&"bucket-crud"));
}

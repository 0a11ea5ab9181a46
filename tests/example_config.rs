use std::path::Path;

use pricegrab::config::{Config, MatchBy, SiteKind};

#[tokio::test]
async fn test_example_config_loads() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("pricegrab.example.json");
    let config = Config::load_from_path(&path).await.unwrap();

    assert_eq!(config.sites.len(), 4);
    assert!(config.output_dir.ends_with("output"));

    let kinds: Vec<&str> = config.sites.iter().map(|s| s.kind.label()).collect();
    assert_eq!(
        kinds,
        ["published_prices", "json_api", "embedded_json", "browser_table"]
    );
    assert_eq!(config.sites[0].effective_match_by(), MatchBy::Filename);
    assert_eq!(config.sites[3].effective_match_by(), MatchBy::Timestamp);

    match &config.sites[1].kind {
        SiteKind::JsonApi(api) => assert_eq!(api.resolve_field.as_deref(), Some("SPath")),
        other => panic!("unexpected kind {}", other.label()),
    }
}

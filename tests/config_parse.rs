use markbridge::config::Config;

#[test]
fn parse_example_config() {
    let raw = include_str!("../markbridge.example.toml");
    let cfg: Config = toml::from_str(raw).expect("parse TOML");
    assert!(cfg.global.jobs >= 1);
    assert!(!cfg.paths.envs_dir.is_empty());
    assert_eq!(cfg.conversion.overwrite, "overwrite");
}

#[test]
fn defaults_are_usable() {
    let cfg = Config::default();
    assert!(cfg.limits.docling_timeout_seconds > 0);
    assert!(!cfg.paths.work_dir.is_empty());
}

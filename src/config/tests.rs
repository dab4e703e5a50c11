use super::AppConfig;

fn write_temp(content: &str) -> tempfile_path::TempFile {
    tempfile_path::TempFile::new(content)
}

// Minimal self-contained temp-file helper — avoids pulling in a `tempfile`
// dependency for a handful of config-loading tests.
mod tempfile_path {
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static COUNTER: AtomicUsize = AtomicUsize::new(0);

    pub struct TempFile {
        pub path: PathBuf,
    }

    impl TempFile {
        pub fn new(content: &str) -> Self {
            let n = COUNTER.fetch_add(1, Ordering::Relaxed);
            let mut path = std::env::temp_dir();
            path.push(format!(
                "syncer-config-test-{}-{}.yaml",
                std::process::id(),
                n
            ));
            std::fs::write(&path, content).unwrap();
            Self { path }
        }
    }

    impl Drop for TempFile {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

#[test]
fn load_rejects_missing_api_key() {
    let file = write_temp("listen: 0.0.0.0:9000\napi_key: \"\"\n");
    let err = AppConfig::load(&file.path).unwrap_err();
    assert!(err.to_string().contains("api_key"));
}

#[test]
fn load_rejects_invalid_schedule() {
    let yaml = r#"
api_key: secret
targets:
  - discovery: nacos-1
    gateway: apisix-1
    fetch_interval: "not a schedule"
"#;
    let file = write_temp(yaml);
    let err = AppConfig::load(&file.path).unwrap_err();
    assert!(err.to_string().contains("fetch_interval"));
}

#[test]
fn load_rejects_duplicate_target_ids() {
    let yaml = r#"
api_key: secret
targets:
  - id: same-id
    discovery: nacos-1
    gateway: apisix-1
    fetch_interval: "@hourly"
  - id: same-id
    discovery: nacos-2
    gateway: apisix-1
    fetch_interval: "@hourly"
"#;
    let file = write_temp(yaml);
    let err = AppConfig::load(&file.path).unwrap_err();
    assert!(err.to_string().contains("duplicate target id"));
}

#[test]
fn load_accepts_well_formed_config() {
    let yaml = r#"
api_key: secret
targets:
  - discovery: nacos-1
    gateway: apisix-1
    fetch_interval: "@every 30s"
discovery:
  nacos-1:
    type: nacos
    host: http://nacos:8848
gateway:
  apisix-1:
    type: apisix
    base_url: http://apisix-admin:9180
    api_key: edd1c9f034335f136f87ad84b625c8f1
"#;
    let file = write_temp(yaml);
    let cfg = AppConfig::load(&file.path).unwrap();
    assert_eq!(cfg.targets.len(), 1);
}

#[test]
fn env_override_takes_precedence_over_file() {
    std::env::set_var("SYNCER_API_KEY", "from-env");
    let file = write_temp("api_key: from-file\n");
    let cfg = AppConfig::load(&file.path).unwrap();
    assert_eq!(cfg.api_key, "from-env");
    std::env::remove_var("SYNCER_API_KEY");
}

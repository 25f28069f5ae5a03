use super::*;

#[test]
fn test_defaults() {
    let cfg = Config::default();
    assert_eq!(cfg.gateway.name, "wagate");
    assert_eq!(cfg.gateway.data_dir, "~/.wagate");
    assert_eq!(cfg.api.host, "127.0.0.1");
    assert_eq!(cfg.api.port, 3000);
    assert!(cfg.api.api_key.is_empty());
    assert_eq!(cfg.whatsapp.device_name, "WAGATE");
    assert!(cfg.whatsapp.allowed_numbers.is_empty());
    assert_eq!(cfg.webhook.timeout_secs, 10);
}

#[test]
fn test_parse_full_toml() {
    let toml_str = r#"
        [gateway]
        name = "gw-1"
        data_dir = "/var/lib/wagate"
        log_level = "debug"

        [api]
        host = "0.0.0.0"
        port = 8080
        api_key = "secret"

        [whatsapp]
        device_name = "GW BOT"
        allowed_numbers = ["5511999887766"]

        [webhook]
        timeout_secs = 5
    "#;
    let cfg: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(cfg.gateway.name, "gw-1");
    assert_eq!(cfg.gateway.data_dir, "/var/lib/wagate");
    assert_eq!(cfg.api.port, 8080);
    assert_eq!(cfg.api.api_key, "secret");
    assert_eq!(cfg.whatsapp.device_name, "GW BOT");
    assert_eq!(cfg.whatsapp.allowed_numbers, vec!["5511999887766"]);
    assert_eq!(cfg.webhook.timeout_secs, 5);
}

#[test]
fn test_partial_toml_fills_defaults() {
    let toml_str = r#"
        [api]
        port = 9000
    "#;
    let cfg: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(cfg.api.port, 9000);
    assert_eq!(cfg.api.host, "127.0.0.1", "missing host should default");
    assert_eq!(cfg.gateway.name, "wagate", "missing section should default");
    assert_eq!(cfg.webhook.timeout_secs, 10);
}

#[test]
fn test_load_missing_file_uses_defaults() {
    let cfg = load("/nonexistent/wagate-config.toml").unwrap();
    assert_eq!(cfg.api.port, 3000);
}

#[test]
fn test_shellexpand_home() {
    std::env::set_var("HOME", "/home/tester");
    assert_eq!(shellexpand("~/.wagate"), "/home/tester/.wagate");
    assert_eq!(shellexpand("/abs/path"), "/abs/path");
    assert_eq!(shellexpand("relative"), "relative");
}

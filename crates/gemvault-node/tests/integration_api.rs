//! Integration tests for the JSON operation surface and configuration loading

use gemvault_node::{handle_json, ApiReply, RewardService, ServiceConfig};
use serde_json::{json, Value};
use std::io::Write;

fn call(service: &RewardService, request: Value) -> ApiReply {
    handle_json(service, &request.to_string())
}

fn ok(service: &RewardService, request: Value) -> Value {
    let reply = call(service, request.clone());
    assert!(reply.ok, "{request} failed: {:?}", reply.error);
    reply.result.unwrap_or(Value::Null)
}

mod api_tests {
    use super::*;

    #[test]
    fn test_scripted_session() {
        let service = RewardService::new(ServiceConfig::default()).unwrap();

        ok(&service, json!({"op": "account.open", "params": {"account_id": "ada", "tier": "premium"}}));
        let grant = ok(
            &service,
            json!({"op": "reward.grant", "params": {
                "account_id": "ada", "action_type": "share", "is_external": true, "correlation_id": "s1"
            }}),
        );
        assert_eq!(grant["quote"]["points"], 150);
        assert_eq!(grant["quote"]["keys"], 8);
        assert_eq!(grant["balances_after"]["points"], 150);

        ok(&service, json!({"op": "ledger.credit", "params": {
            "account_id": "ada", "currency": "gems", "amount": 200, "correlation_id": "topup"
        }}));
        let position = ok(&service, json!({"op": "stake.create", "params": {
            "account_id": "ada", "gems": 100, "lock_days": 30
        }}));
        assert_eq!(position["lock_days"], 30);
        assert_eq!(position["status"], "active");

        let early = call(&service, json!({"op": "stake.withdraw", "params": {
            "position_id": position["position_id"]
        }}));
        assert_eq!(early.error_kind(), Some("not_matured"));

        let account = ok(&service, json!({"op": "account.get", "params": {"account_id": "ada"}}));
        assert_eq!(account["tier"], "premium");
        assert_eq!(account["balances"]["gems"], 100);
        assert_eq!(account["escrowed_gems"], 100);
        assert_eq!(account["shield"]["coverage_percent"], 80);

        let audit = ok(&service, json!({"op": "ledger.audit", "params": {"account_id": "ada"}}));
        assert_eq!(audit["entry_count"], 4);
    }

    #[test]
    fn test_debit_rejection_leaves_balance() {
        let service = RewardService::new(ServiceConfig::default()).unwrap();
        ok(&service, json!({"op": "account.open", "params": {"account_id": "bo"}}));

        let reply = call(&service, json!({"op": "ledger.debit", "params": {
            "account_id": "bo", "currency": "gold", "amount": 1, "correlation_id": "d1"
        }}));
        let error = reply.error.unwrap();
        assert_eq!(error.code, 1001);
        assert_eq!(error.kind, "insufficient_balance");

        let entries = ok(&service, json!({"op": "ledger.entries", "params": {"account_id": "bo"}}));
        assert_eq!(entries, json!([]));
    }

    #[test]
    fn test_moves_and_redemption_over_json() {
        let service = RewardService::new(ServiceConfig::default()).unwrap();
        ok(&service, json!({"op": "account.open", "params": {"account_id": "brand"}}));
        ok(&service, json!({"op": "account.open", "params": {"account_id": "fan"}}));

        ok(&service, json!({"op": "moves.open", "params": {"advertiser_id": "brand", "allotted": 2}}));
        let consumed = ok(&service, json!({"op": "moves.consume", "params": {"advertiser_id": "brand"}}));
        assert_eq!(consumed["remaining"], 1);
        let exhausted = call(&service, json!({"op": "moves.consume", "params": {"advertiser_id": "brand", "amount": 2}}));
        assert_eq!(exhausted.error_kind(), Some("quota_exhausted"));

        let purchase = call(&service, json!({"op": "moves.purchase", "params": {"advertiser_id": "brand", "plan": "growth"}}));
        assert_eq!(purchase.error_kind(), Some("insufficient_balance"));

        ok(&service, json!({"op": "reward.register_pool", "params": {"source": "launch", "supply": 1}}));
        let first = ok(&service, json!({"op": "reward.assign", "params": {
            "account_id": "fan", "source": "launch", "reward_type": "coupon", "face_value": 5
        }}));
        let second = ok(&service, json!({"op": "reward.assign", "params": {
            "account_id": "fan", "source": "launch", "reward_type": "coupon", "face_value": 5
        }}));

        let redeemed = ok(&service, json!({"op": "reward.redeem", "params": {"assignment_id": first["assignment_id"]}}));
        assert_eq!(redeemed["status"], "redeemed");
        let depleted = call(&service, json!({"op": "reward.redeem", "params": {"assignment_id": second["assignment_id"]}}));
        assert_eq!(depleted.error_kind(), Some("depleted"));
    }

    #[test]
    fn test_metrics_render_counts_operations() {
        let service = RewardService::new(ServiceConfig::default()).unwrap();
        ok(&service, json!({"op": "account.open", "params": {"account_id": "m"}}));
        call(&service, json!({"op": "account.open", "params": {"account_id": "m"}}));

        let text = ok(&service, json!({"op": "metrics.render"}));
        let text = text.as_str().unwrap();
        assert!(text.contains(r#"gemvault_operations_total{op="account.open",outcome="ok"} 1"#));
        assert!(text.contains(r#"gemvault_operations_total{op="account.open",outcome="error"} 1"#));
    }
}

mod config_tests {
    use super::*;
    use gemvault_node::ConfigError;

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[tiers]
premium = 3.0

[shield]
free = 60

[redemption.pools]
launch = 10
"#
        )
        .unwrap();

        let config = ServiceConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.tiers.premium, 3.0);
        assert_eq!(config.tiers.free, 1.0);
        assert_eq!(config.shield.free, 60);
        assert_eq!(config.redemption.pools.get("launch"), Some(&10));

        let service = RewardService::new(config).unwrap();
        let reply = call(&service, json!({"op": "reward.compute", "params": {"action_type": "share", "tier": "premium"}}));
        assert_eq!(reply.result.unwrap()["points"], 30);
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[rewards]\nkeys_divisor = 0").unwrap();

        assert!(matches!(
            ServiceConfig::load(Some(file.path())),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        assert!(matches!(
            ServiceConfig::load(Some(&missing)),
            Err(ConfigError::Load(_))
        ));
    }

    #[test]
    fn test_rendered_default_loads_back() {
        let rendered = ServiceConfig::default().to_toml().unwrap();
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(rendered.as_bytes()).unwrap();

        let loaded = ServiceConfig::load(Some(file.path())).unwrap();
        assert_eq!(loaded.moves.scale, ServiceConfig::default().moves.scale);
        assert_eq!(loaded.shield.bonus_90d, 15);
    }
}

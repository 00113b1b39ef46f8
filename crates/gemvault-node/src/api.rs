//! # JSON Operation Surface
//!
//! Request/response contract used by every caller of the service:
//!
//! ```text
//! request  {"op": "reward.grant", "params": {"account_id": "fan", "action_type": "share"}}
//! reply    {"ok": true, "result": {...}}
//!          {"ok": false, "error": {"code": 5001, "kind": "quota_exhausted", "message": "..."}}
//! ```
//!
//! Error codes come from [`VaultError::code`]; malformed requests use
//! [`INVALID_REQUEST_CODE`].

use crate::service::{GrantRequest, RewardService};
use gemvault_core::{AccountId, Currency, ReasonCode, Tier, VaultError};
use gemvault_economics::{ActionType, AdvertiserPlan, RewardType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Code for requests that could not be parsed
pub const INVALID_REQUEST_CODE: u32 = 9001;

fn default_reason() -> String {
    "manual".to_string()
}

fn default_amount() -> u64 {
    1
}

/// Operation request
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "params")]
pub enum Request {
    #[serde(rename = "account.open")]
    AccountOpen {
        account_id: AccountId,
        #[serde(default)]
        tier: Option<String>,
    },
    #[serde(rename = "account.get")]
    AccountGet { account_id: AccountId },
    #[serde(rename = "account.set_tier")]
    AccountSetTier { account_id: AccountId, tier: String },

    /// Quote only; the tier falls back to the account's tier
    #[serde(rename = "reward.compute")]
    RewardCompute {
        #[serde(default)]
        account_id: Option<AccountId>,
        action_type: ActionType,
        #[serde(default)]
        is_external: bool,
        #[serde(default)]
        tier: Option<String>,
    },
    #[serde(rename = "reward.grant")]
    RewardGrant(GrantRequest),
    #[serde(rename = "reward.assign")]
    RewardAssign {
        account_id: AccountId,
        source: String,
        reward_type: RewardType,
        #[serde(default)]
        face_value: u64,
        #[serde(default)]
        ttl_days: Option<i64>,
        #[serde(default)]
        correlation_id: Option<String>,
    },
    #[serde(rename = "reward.redeem")]
    RewardRedeem { assignment_id: Uuid },
    #[serde(rename = "reward.expire_due")]
    RewardExpireDue {},
    #[serde(rename = "reward.register_pool")]
    RewardRegisterPool { source: String, supply: u64 },

    #[serde(rename = "ledger.credit")]
    LedgerCredit {
        account_id: AccountId,
        currency: Currency,
        amount: u64,
        #[serde(default = "default_reason")]
        reason: String,
        correlation_id: String,
    },
    #[serde(rename = "ledger.debit")]
    LedgerDebit {
        account_id: AccountId,
        currency: Currency,
        amount: u64,
        #[serde(default = "default_reason")]
        reason: String,
        correlation_id: String,
    },
    #[serde(rename = "ledger.entries")]
    LedgerEntries { account_id: AccountId },
    #[serde(rename = "ledger.audit")]
    LedgerAudit { account_id: AccountId },

    #[serde(rename = "stake.create")]
    StakeCreate {
        account_id: AccountId,
        gems: u64,
        lock_days: u32,
        #[serde(default)]
        correlation_id: Option<String>,
    },
    #[serde(rename = "stake.withdraw")]
    StakeWithdraw { position_id: Uuid },
    #[serde(rename = "stake.get")]
    StakeGet { position_id: Uuid },

    #[serde(rename = "shield.evaluate")]
    ShieldEvaluate {
        account_id: AccountId,
        expected: u64,
        actual_verified: u64,
        #[serde(default)]
        correlation_id: Option<String>,
    },
    #[serde(rename = "shield.fund")]
    ShieldFund {
        account_id: AccountId,
        gems: u64,
        #[serde(default)]
        correlation_id: Option<String>,
    },
    #[serde(rename = "shield.get")]
    ShieldGet { account_id: AccountId },

    #[serde(rename = "moves.open")]
    MovesOpen { advertiser_id: AccountId, allotted: u64 },
    #[serde(rename = "moves.purchase")]
    MovesPurchase {
        advertiser_id: AccountId,
        plan: AdvertiserPlan,
        #[serde(default)]
        correlation_id: Option<String>,
    },
    #[serde(rename = "moves.consume")]
    MovesConsume {
        advertiser_id: AccountId,
        #[serde(default = "default_amount")]
        amount: u64,
    },
    #[serde(rename = "moves.reset")]
    MovesReset { advertiser_id: AccountId },
    #[serde(rename = "moves.get")]
    MovesGet { advertiser_id: AccountId },

    #[serde(rename = "metrics.render")]
    MetricsRender {},
}

impl Request {
    /// Operation name as it appears in the `op` field
    pub fn op(&self) -> &'static str {
        match self {
            Self::AccountOpen { .. } => "account.open",
            Self::AccountGet { .. } => "account.get",
            Self::AccountSetTier { .. } => "account.set_tier",
            Self::RewardCompute { .. } => "reward.compute",
            Self::RewardGrant(_) => "reward.grant",
            Self::RewardAssign { .. } => "reward.assign",
            Self::RewardRedeem { .. } => "reward.redeem",
            Self::RewardExpireDue {} => "reward.expire_due",
            Self::RewardRegisterPool { .. } => "reward.register_pool",
            Self::LedgerCredit { .. } => "ledger.credit",
            Self::LedgerDebit { .. } => "ledger.debit",
            Self::LedgerEntries { .. } => "ledger.entries",
            Self::LedgerAudit { .. } => "ledger.audit",
            Self::StakeCreate { .. } => "stake.create",
            Self::StakeWithdraw { .. } => "stake.withdraw",
            Self::StakeGet { .. } => "stake.get",
            Self::ShieldEvaluate { .. } => "shield.evaluate",
            Self::ShieldFund { .. } => "shield.fund",
            Self::ShieldGet { .. } => "shield.get",
            Self::MovesOpen { .. } => "moves.open",
            Self::MovesPurchase { .. } => "moves.purchase",
            Self::MovesConsume { .. } => "moves.consume",
            Self::MovesReset { .. } => "moves.reset",
            Self::MovesGet { .. } => "moves.get",
            Self::MetricsRender {} => "metrics.render",
        }
    }
}

/// Error body of a failed reply
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: u32,
    pub kind: String,
    pub message: String,
}

impl From<&VaultError> for ApiError {
    fn from(err: &VaultError) -> Self {
        Self {
            code: err.code(),
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// Reply envelope
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApiReply {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

impl ApiReply {
    pub fn success(result: Value) -> Self {
        Self {
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(error: ApiError) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(error),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::failure(ApiError {
            code: INVALID_REQUEST_CODE,
            kind: "invalid_request".to_string(),
            message: message.into(),
        })
    }

    /// Error kind of a failed reply
    pub fn error_kind(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.kind.as_str())
    }
}

/// Parse one JSON request and handle it
///
/// `params` may be omitted for operations without parameters.
pub fn handle_json(service: &RewardService, input: &str) -> ApiReply {
    let mut value: Value = match serde_json::from_str(input) {
        Ok(value) => value,
        Err(err) => return ApiReply::invalid_request(format!("malformed JSON: {err}")),
    };
    if let Value::Object(map) = &mut value {
        map.entry("params")
            .or_insert_with(|| Value::Object(Default::default()));
    }
    match serde_json::from_value::<Request>(value) {
        Ok(request) => handle(service, request),
        Err(err) => ApiReply::invalid_request(err.to_string()),
    }
}

/// Handle one parsed request
pub fn handle(service: &RewardService, request: Request) -> ApiReply {
    let op = request.op();
    let span = tracing::debug_span!("request", op);
    let _entered = span.enter();

    let result = dispatch(service, request);
    service.record(op, result.is_ok());

    match result {
        Ok(value) => ApiReply::success(value),
        Err(Rejection::Vault(err)) => {
            if err.is_recoverable() {
                tracing::debug!(op, error = %err, "Operation rejected");
            } else {
                tracing::error!(op, error = %err, "Operation failed");
            }
            ApiReply::failure(ApiError::from(&err))
        }
        Err(Rejection::Invalid(message)) => ApiReply::invalid_request(message),
    }
}

enum Rejection {
    Vault(VaultError),
    Invalid(String),
}

impl From<VaultError> for Rejection {
    fn from(err: VaultError) -> Self {
        Self::Vault(err)
    }
}

fn to_json<T: Serialize>(value: T) -> Result<Value, Rejection> {
    serde_json::to_value(value).map_err(|err| Rejection::Invalid(err.to_string()))
}

/// Tier names are parsed here rather than by serde so an unknown name
/// reports `unknown_tier`
fn parse_tier(name: Option<&str>) -> Result<Option<Tier>, VaultError> {
    name.map(str::parse).transpose()
}

fn dispatch(service: &RewardService, request: Request) -> Result<Value, Rejection> {
    match request {
        Request::AccountOpen { account_id, tier } => {
            let tier = parse_tier(tier.as_deref())?.unwrap_or(Tier::Free);
            to_json(service.open_account(account_id, tier)?)
        }
        Request::AccountGet { account_id } => to_json(service.account(&account_id)?),
        Request::AccountSetTier { account_id, tier } => {
            to_json(service.set_tier(&account_id, tier.parse()?)?)
        }

        Request::RewardCompute {
            account_id,
            action_type,
            is_external,
            tier,
        } => {
            let tier = match (parse_tier(tier.as_deref())?, account_id) {
                (Some(tier), _) => tier,
                (None, Some(account_id)) => service.account(&account_id)?.account.tier,
                (None, None) => {
                    return Err(Rejection::Invalid(
                        "reward.compute needs a tier or an account_id".to_string(),
                    ))
                }
            };
            to_json(service.compute_reward(action_type, is_external, tier)?)
        }
        Request::RewardGrant(grant) => to_json(service.grant_reward(grant)?),
        Request::RewardAssign {
            account_id,
            source,
            reward_type,
            face_value,
            ttl_days,
            correlation_id,
        } => to_json(service.assign_reward(
            &account_id,
            &source,
            reward_type,
            face_value,
            ttl_days,
            correlation_id.as_deref(),
        )?),
        Request::RewardRedeem { assignment_id } => to_json(service.redeem_reward(&assignment_id)?),
        Request::RewardExpireDue {} => to_json(service.expire_due()),
        Request::RewardRegisterPool { source, supply } => {
            service.register_pool(&source, supply);
            to_json(serde_json::json!({ "source": source, "remaining": supply }))
        }

        Request::LedgerCredit {
            account_id,
            currency,
            amount,
            reason,
            correlation_id,
        } => to_json(service.credit(
            &account_id,
            currency,
            amount,
            ReasonCode::from(reason),
            &correlation_id,
        )?),
        Request::LedgerDebit {
            account_id,
            currency,
            amount,
            reason,
            correlation_id,
        } => to_json(service.debit(
            &account_id,
            currency,
            amount,
            ReasonCode::from(reason),
            &correlation_id,
        )?),
        Request::LedgerEntries { account_id } => to_json(service.ledger().entries(&account_id)?),
        Request::LedgerAudit { account_id } => to_json(service.audit(&account_id)?),

        Request::StakeCreate {
            account_id,
            gems,
            lock_days,
            correlation_id,
        } => to_json(service.create_stake(&account_id, gems, lock_days, correlation_id)?),
        Request::StakeWithdraw { position_id } => to_json(service.withdraw_stake(&position_id)?),
        Request::StakeGet { position_id } => to_json(service.stake(&position_id)?),

        Request::ShieldEvaluate {
            account_id,
            expected,
            actual_verified,
            correlation_id,
        } => to_json(service.evaluate_shield(&account_id, expected, actual_verified, correlation_id)?),
        Request::ShieldFund {
            account_id,
            gems,
            correlation_id,
        } => to_json(service.fund_shield(&account_id, gems, correlation_id)?),
        Request::ShieldGet { account_id } => to_json(service.shield_policy(&account_id)?),

        Request::MovesOpen {
            advertiser_id,
            allotted,
        } => to_json(service.open_moves(&advertiser_id, allotted)?),
        Request::MovesPurchase {
            advertiser_id,
            plan,
            correlation_id,
        } => to_json(service.purchase_moves(&advertiser_id, plan, correlation_id)?),
        Request::MovesConsume {
            advertiser_id,
            amount,
        } => {
            let remaining = service.consume_moves(&advertiser_id, amount)?;
            to_json(serde_json::json!({ "advertiser_id": advertiser_id, "remaining": remaining }))
        }
        Request::MovesReset { advertiser_id } => to_json(service.reset_moves(&advertiser_id)?),
        Request::MovesGet { advertiser_id } => to_json(service.moves_quota(&advertiser_id)?),

        Request::MetricsRender {} => to_json(service.render_metrics()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;

    fn service() -> RewardService {
        RewardService::new(ServiceConfig::default()).unwrap()
    }

    #[test]
    fn test_request_wire_format() {
        let request: Request = serde_json::from_str(
            r#"{"op": "stake.create", "params": {"account_id": "fan", "gems": 10, "lock_days": 60}}"#,
        )
        .unwrap();
        assert_eq!(
            request,
            Request::StakeCreate {
                account_id: AccountId::new("fan"),
                gems: 10,
                lock_days: 60,
                correlation_id: None,
            }
        );
        assert_eq!(request.op(), "stake.create");
    }

    #[test]
    fn test_params_may_be_omitted() {
        let service = service();
        let reply = handle_json(&service, r#"{"op": "reward.expire_due"}"#);
        assert!(reply.ok);
        assert_eq!(reply.result, Some(Value::Array(vec![])));
    }

    #[test]
    fn test_malformed_requests() {
        let service = service();
        let reply = handle_json(&service, "{not json");
        assert_eq!(reply.error_kind(), Some("invalid_request"));

        let reply = handle_json(&service, r#"{"op": "account.delete", "params": {}}"#);
        assert_eq!(reply.error.unwrap().code, INVALID_REQUEST_CODE);
    }

    #[test]
    fn test_unknown_tier_is_reported_as_such() {
        let service = service();
        let reply = handle_json(
            &service,
            r#"{"op": "account.open", "params": {"account_id": "a", "tier": "platinum"}}"#,
        );
        let error = reply.error.unwrap();
        assert_eq!(error.code, 2001);
        assert_eq!(error.kind, "unknown_tier");

        let reply = handle_json(
            &service,
            r#"{"op": "reward.compute", "params": {"action_type": "share", "tier": "platinum"}}"#,
        );
        assert_eq!(reply.error_kind(), Some("unknown_tier"));

        handle_json(&service, r#"{"op": "account.open", "params": {"account_id": "b"}}"#);
        let reply = handle_json(
            &service,
            r#"{"op": "account.set_tier", "params": {"account_id": "b", "tier": "gold"}}"#,
        );
        assert_eq!(reply.error.unwrap().code, 2001);

        let reply = handle_json(
            &service,
            r#"{"op": "account.set_tier", "params": {"account_id": "b", "tier": "Super"}}"#,
        );
        assert_eq!(reply.result.unwrap()["tier"], "super");
    }

    #[test]
    fn test_error_envelope_carries_code_and_kind() {
        let service = service();
        let reply = handle_json(&service, r#"{"op": "account.get", "params": {"account_id": "ghost"}}"#);
        let error = reply.error.unwrap();
        assert_eq!(error.code, 1002);
        assert_eq!(error.kind, "account_not_found");

        let rendered = serde_json::to_value(ApiReply::success(Value::Null)).unwrap();
        assert!(rendered.get("error").is_none());
    }

    #[test]
    fn test_compute_falls_back_to_account_tier() {
        let service = service();
        handle_json(&service, r#"{"op": "account.open", "params": {"account_id": "vip", "tier": "premium"}}"#);
        let reply = handle_json(
            &service,
            r#"{"op": "reward.compute", "params": {"account_id": "vip", "action_type": "share", "is_external": true}}"#,
        );
        let result = reply.result.unwrap();
        assert_eq!(result["points"], 150);
        assert_eq!(result["keys"], 8);

        let reply = handle_json(&service, r#"{"op": "reward.compute", "params": {"action_type": "share"}}"#);
        assert_eq!(reply.error_kind(), Some("invalid_request"));
    }

    #[test]
    fn test_assign_retry_with_correlation_id() {
        let service = service();
        handle_json(&service, r#"{"op": "account.open", "params": {"account_id": "fan"}}"#);
        let assign = r#"{"op": "reward.assign", "params": {"account_id": "fan", "source": "drop", "reward_type": "coupon", "correlation_id": "drop-fan"}}"#;
        let first = handle_json(&service, assign).result.unwrap();
        let second = handle_json(&service, assign).result.unwrap();
        assert_eq!(first["assignment_id"], second["assignment_id"]);

        let reply = handle_json(
            &service,
            r#"{"op": "reward.assign", "params": {"account_id": "fan", "source": "drop", "reward_type": "giveaway", "correlation_id": "drop-fan"}}"#,
        );
        assert_eq!(reply.error_kind(), Some("idempotency_conflict"));
    }
}

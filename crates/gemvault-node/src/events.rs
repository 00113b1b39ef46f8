//! Service events
//!
//! Every state change a downstream consumer may care about (notifications,
//! analytics, presentation) is published on a broadcast channel instead of
//! being handled inline.

use chrono::{DateTime, Utc};
use gemvault_core::{AccountId, Tier};
use gemvault_economics::{ActionType, RewardType};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Events emitted by the reward service
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VaultEvent {
    /// Reward credited for an action
    RewardGranted {
        account_id: AccountId,
        action: ActionType,
        is_external: bool,
        campaign: Option<AccountId>,
        points: u64,
        gems: u64,
        keys: u64,
        correlation_id: String,
    },
    TierChanged {
        account_id: AccountId,
        from: Tier,
        to: Tier,
    },
    StakeCreated {
        account_id: AccountId,
        position_id: Uuid,
        principal_gems: u64,
        lock_days: u32,
        matures_at: DateTime<Utc>,
    },
    StakeWithdrawn {
        account_id: AccountId,
        position_id: Uuid,
        payout_gems: u64,
    },
    /// Shortfall top-up paid
    ShieldPaid {
        account_id: AccountId,
        correlation_id: String,
        shortfall: u64,
        covered: u64,
        pool_remaining: u64,
    },
    /// Pool could not cover the owed share
    ShieldPoolDepleted {
        account_id: AccountId,
        correlation_id: String,
        owed: u64,
        paid: u64,
    },
    /// Advertiser quota used up
    MovesExhausted {
        advertiser_id: AccountId,
        allotted: u64,
    },
    RewardRedeemed {
        account_id: AccountId,
        assignment_id: Uuid,
        reward_type: RewardType,
        face_value: u64,
    },
    RewardExpired {
        account_id: AccountId,
        assignment_id: Uuid,
    },
}

impl VaultEvent {
    /// Event name as serialized in the `type` tag
    pub fn name(&self) -> &'static str {
        match self {
            Self::RewardGranted { .. } => "reward_granted",
            Self::TierChanged { .. } => "tier_changed",
            Self::StakeCreated { .. } => "stake_created",
            Self::StakeWithdrawn { .. } => "stake_withdrawn",
            Self::ShieldPaid { .. } => "shield_paid",
            Self::ShieldPoolDepleted { .. } => "shield_pool_depleted",
            Self::MovesExhausted { .. } => "moves_exhausted",
            Self::RewardRedeemed { .. } => "reward_redeemed",
            Self::RewardExpired { .. } => "reward_expired",
        }
    }
}

/// Broadcast bus for [`VaultEvent`]s
#[derive(Clone)]
pub struct EventBus {
    event_tx: broadcast::Sender<VaultEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(capacity.max(1));
        Self { event_tx }
    }

    /// Get event receiver
    pub fn subscribe(&self) -> broadcast::Receiver<VaultEvent> {
        self.event_tx.subscribe()
    }

    /// Publish to current subscribers, returning how many received it
    pub fn publish(&self, event: VaultEvent) -> usize {
        let name = event.name();
        match self.event_tx.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                tracing::trace!(event = name, "No event subscribers");
                0
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.event_tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new(8);
        let delivered = bus.publish(VaultEvent::MovesExhausted {
            advertiser_id: AccountId::new("brand"),
            allotted: 100,
        });
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        let event = VaultEvent::RewardExpired {
            account_id: AccountId::new("fan"),
            assignment_id: Uuid::new_v4(),
        };
        assert_eq!(bus.publish(event.clone()), 1);
        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[test]
    fn test_serialized_tag_matches_name() {
        let event = VaultEvent::TierChanged {
            account_id: AccountId::new("fan"),
            from: Tier::Free,
            to: Tier::Super,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], event.name());
        assert_eq!(json["to"], "super");
    }
}

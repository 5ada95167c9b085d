//! Local queue vocabulary to wire vocabulary

use crate::models::{EntityType, OfflineQueueItem, QueueAction};
use crate::transport::{ActionType, SyncAction};

/// Wire action for a local action; anything without a direct counterpart is an update
pub const fn action_type_for(action: QueueAction) -> ActionType {
    match action {
        QueueAction::Create | QueueAction::Checkout => ActionType::Create,
        QueueAction::Delete => ActionType::Delete,
        QueueAction::Update
        | QueueAction::StockAdjust
        | QueueAction::Checkin
        | QueueAction::PickItem => ActionType::Update,
    }
}

pub fn to_sync_action(item: &OfflineQueueItem) -> SyncAction {
    SyncAction {
        id: item.id.clone(),
        entity_type: EntityType::from_local(&item.entity_type),
        entity_id: item.entity_id.clone(),
        action_type: action_type_for(item.action),
        payload: item.payload.clone(),
        client_timestamp: item.timestamp,
        client_version: item.client_version(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_action_table() {
        assert_eq!(action_type_for(QueueAction::Create), ActionType::Create);
        assert_eq!(action_type_for(QueueAction::Update), ActionType::Update);
        assert_eq!(action_type_for(QueueAction::Delete), ActionType::Delete);
        assert_eq!(action_type_for(QueueAction::Checkout), ActionType::Create);
        assert_eq!(action_type_for(QueueAction::StockAdjust), ActionType::Update);
        assert_eq!(action_type_for(QueueAction::Checkin), ActionType::Update);
        assert_eq!(action_type_for(QueueAction::PickItem), ActionType::Update);
    }

    #[test]
    fn test_stock_adjust_maps_to_stock_level_update() {
        let item = OfflineQueueItem::new(
            QueueAction::StockAdjust,
            "stock",
            "item-42",
            json!({"delta": -5}),
        );
        let action = to_sync_action(&item);

        assert_eq!(action.id, item.id);
        assert_eq!(action.entity_type, EntityType::StockLevel);
        assert_eq!(action.action_type, ActionType::Update);
        assert_eq!(action.entity_id, "item-42");
        assert_eq!(action.client_timestamp, item.timestamp);
        assert_eq!(action.client_version, None);
    }

    #[test]
    fn test_unknown_entity_type_maps_to_item() {
        let item = OfflineQueueItem::new(
            QueueAction::Update,
            "location",
            "loc-1",
            json!({"version": 3}),
        );
        let action = to_sync_action(&item);
        assert_eq!(action.entity_type, EntityType::Item);
        assert_eq!(action.client_version, Some(3));
    }
}

// GTFS-realtime snapshot: the decoded trip-update and alert feed messages.

use bytes::Bytes;
use gtfs_rt::FeedMessage;
use prost::Message;

use crate::error::Result;

/// One paired realtime refresh. The two feeds are always decoded together
/// so queries never observe a trip-update message from one fetch alongside
/// an alert message from another.
#[derive(Debug, Clone)]
pub struct RealtimeSnapshot {
    pub trip_updates: FeedMessage,
    pub alerts: FeedMessage,
}

impl RealtimeSnapshot {
    pub fn decode(trips_bin: &Bytes, alerts_bin: &Bytes) -> Result<Self> {
        let trip_updates = FeedMessage::decode(&trips_bin[..])?;
        let alerts = FeedMessage::decode(&alerts_bin[..])?;

        log::info!(
            "GTFS-RT loaded: trips={}, alerts={}",
            trip_updates.entity.len(),
            alerts.entity.len()
        );

        Ok(RealtimeSnapshot {
            trip_updates,
            alerts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransitError;
    use gtfs_rt::{Alert, FeedEntity, FeedHeader};

    fn feed(entities: Vec<FeedEntity>) -> FeedMessage {
        FeedMessage {
            header: FeedHeader {
                gtfs_realtime_version: "2.0".to_string(),
                ..Default::default()
            },
            entity: entities,
        }
    }

    #[test]
    fn decodes_both_feeds() {
        let trips = feed(vec![]);
        let alerts = feed(vec![FeedEntity {
            id: "a1".to_string(),
            alert: Some(Alert::default()),
            ..Default::default()
        }]);

        let snapshot = RealtimeSnapshot::decode(
            &Bytes::from(trips.encode_to_vec()),
            &Bytes::from(alerts.encode_to_vec()),
        )
        .unwrap();

        assert!(snapshot.trip_updates.entity.is_empty());
        assert_eq!(snapshot.alerts.entity.len(), 1);
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let trips = Bytes::from(feed(vec![]).encode_to_vec());
        let garbage = Bytes::from_static(&[0xff, 0xff, 0xff, 0xff]);
        let err = RealtimeSnapshot::decode(&trips, &garbage).unwrap_err();
        assert!(matches!(err, TransitError::Decode(_)));
    }
}

//! External channel broker interface (§6 "Broker interface").
//!
//! This crate only *consumes* a broker — registering interest and
//! reacting to its notifications — it never implements channel
//! discovery itself (§4's Non-goals). Callers plug in whatever
//! directory service their deployment already has (a registry service,
//! a config file watch, a control-plane RPC) by implementing
//! [`ChannelBroker`].

use crate::error::DataBlockResult;

/// A notification pushed by the broker about a channel this process
/// has registered interest in.
#[derive(Debug, Clone)]
pub enum BrokerNotification {
    /// The peer side is tearing the channel down; in-flight slots may
    /// still be drained, but no new ones should be started.
    ChannelClosing { channel: String },
    /// The peer attached (or re-attached) with a schema hash that does
    /// not match what this process expects.
    SchemaMismatch { channel: String, region: &'static str },
    /// A registered consumer's heartbeat has gone stale and it has been
    /// reaped.
    ConsumerDied { channel: String, pid: u32 },
}

/// What this process tells the broker about a channel it owns or
/// depends on.
pub trait ChannelBroker {
    /// Announce that `segment_name` is available, so other processes
    /// can discover it without being told the name out of band.
    fn register_channel(&self, segment_name: &str) -> DataBlockResult<()>;

    /// Look up the segment name behind a logical channel name. Returns
    /// `Ok(None)` if no producer has registered it yet.
    fn discover_channel(&self, channel: &str) -> DataBlockResult<Option<String>>;

    /// Withdraw a previously registered channel (called on producer
    /// shutdown).
    fn deregister_channel(&self, segment_name: &str) -> DataBlockResult<()>;

    /// Deliver a notification. The default implementation only logs;
    /// implementors that care about a specific variant should override.
    fn on_notification(&self, notification: &BrokerNotification) {
        tracing::debug!(?notification, "broker notification (unhandled)");
    }
}

/// A broker that does nothing: channels must be discovered by
/// out-of-band naming convention instead. Useful for tests and for
/// deployments with exactly one producer and a fixed segment name.
pub struct NullBroker;

impl ChannelBroker for NullBroker {
    fn register_channel(&self, _segment_name: &str) -> DataBlockResult<()> {
        Ok(())
    }

    fn discover_channel(&self, _channel: &str) -> DataBlockResult<Option<String>> {
        Ok(None)
    }

    fn deregister_channel(&self, _segment_name: &str) -> DataBlockResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_broker_never_discovers_anything() {
        let broker = NullBroker;
        assert!(broker.register_channel("seg").is_ok());
        assert_eq!(broker.discover_channel("seg").unwrap(), None);
        assert!(broker.deregister_channel("seg").is_ok());
    }

    #[test]
    fn null_broker_default_notification_handler_does_not_panic() {
        let broker = NullBroker;
        broker.on_notification(&BrokerNotification::ChannelClosing {
            channel: "seg".into(),
        });
    }
}

use libp2p::relay;

use crate::network::events::NetworkEvent;

impl From<relay::client::Event> for NetworkEvent {
    fn from(event: relay::client::Event) -> Self {
        NetworkEvent::Relay(event)
    }
}

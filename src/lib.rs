// Compose Bridge - Library
// Cross-chain asset transfers carrying composed destination instructions

pub mod protocol {
    pub mod codec {
        include!("../protocol/codec/mod.rs");
    }

    pub mod options {
        include!("../protocol/options/mod.rs");
    }

    pub mod config {
        include!("../protocol/config/mod.rs");
    }

    pub mod router {
        include!("../protocol/router/mod.rs");

        pub mod registry {
            include!("../protocol/router/registry.rs");
        }

        pub mod ledger {
            include!("../protocol/router/ledger.rs");
        }

        pub mod transport {
            include!("../protocol/router/transport.rs");
        }

        pub mod sender {
            include!("../protocol/router/sender.rs");
        }

        pub mod composer {
            include!("../protocol/router/composer.rs");
        }
    }
}

pub mod local_network {
    include!("../local-network/mod.rs");
}

// Re-exports for convenience
pub use local_network::{Delivery, FeeSchedule, LocalNetwork, Packet};
pub use protocol::codec::{ComposedMessage, InnerPayload, MessageType};
pub use protocol::config::{init_logging, BridgeConfig, LoggingConfig};
pub use protocol::options::{ExecutionOption, OptionsBuilder};
pub use protocol::router::{
    Address, AssetLedger, BridgeError, BridgeEvent, BridgeOutcome, BridgeRequest, BridgeSender,
    CallContext, ChainId, Composer, EventLog, InMemoryLedger, InboundCompose, RouteRegistry,
    Transport, H256, U256,
};

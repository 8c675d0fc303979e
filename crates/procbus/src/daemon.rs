use std::net::SocketAddr;
use std::sync::Arc;

use procbus_frame::BufferPool;
use procbus_peer::{Result, Router, RouterHandle, RouterStats, TcpConnectionFactory};
use procbus_routing::{Address, RoutingTable};
use tracing::info;

use crate::config::BusConfig;

/// A running bus daemon: TCP registration, routing table and router.
///
/// Frames received from any registered process are routed by destination
/// and forwarded to the connection of the target process.
pub struct Daemon {
    router: RouterHandle,
    factory: Arc<TcpConnectionFactory>,
    routing: Arc<RoutingTable>,
}

impl Daemon {
    /// Bind the listen address and start routing.
    pub async fn start(config: &BusConfig) -> Result<Self> {
        let routing = Arc::new(RoutingTable::from_update(&config.routing));
        let router = Router::new(config.router_config());

        let factory = Arc::new(
            TcpConnectionFactory::bind(
                config.listen.as_str(),
                router.inbound(),
                BufferPool::for_frames(),
                BufferPool::for_io(),
                config.connection_config(),
            )
            .await?,
        );
        let handle = router.spawn(routing.clone(), factory.clone());

        info!(
            listen = %factory.local_addr(),
            node_id = config.node_id,
            rules = routing.len(),
            "bus daemon started"
        );

        Ok(Self {
            router: handle,
            factory,
            routing,
        })
    }

    /// Address processes connect to.
    pub fn local_addr(&self) -> SocketAddr {
        self.factory.local_addr()
    }

    /// Live routing table. Changes apply to streams opened afterwards.
    pub fn routing(&self) -> &Arc<RoutingTable> {
        &self.routing
    }

    /// Currently registered processes.
    pub fn connections(&self) -> Vec<Address> {
        self.factory.addresses()
    }

    /// Stop routing, close every connection and wait for the router to exit.
    pub async fn shutdown(self) -> Result<RouterStats> {
        self.router.stop();
        self.factory.shutdown();
        let stats = self.router.join().await?;
        info!(
            delivered = stats.delivered,
            dropped = stats.dropped,
            "bus daemon stopped"
        );
        Ok(stats)
    }
}

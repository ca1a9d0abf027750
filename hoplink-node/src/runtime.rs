use anyhow::{Context, Result};
use hoplink_core::activity::ActiveOperations;
use hoplink_core::address::Address;
use hoplink_core::codec::{DESTINATION_OFFSET, LEGACY_DESTINATION_OFFSET, MTU};
use hoplink_core::control::{AccessLists, InterfaceDiscovery, NodeConfig};
use hoplink_core::forwarder::MeshForwarder;
use hoplink_core::interface::{ChannelInterface, LocalInterface};
use hoplink_core::listener::InboundListener;
use hoplink_core::radio::{MeshRadio, Presence, UdpRadio};
use hoplink_core::relay::{RelayLoop, RelayStats};
use hoplink_core::transmitter::HopTransmitter;
use hoplink_core::RelayError;
use std::sync::Arc;
use tokio::sync::watch;

pub type LogFn = Box<dyn Fn(String) + Send + Sync + 'static>;

/// Queue depth of the in-memory interface used when no TUN device is enabled
const RELAY_ONLY_QUEUE: usize = 64;

/// Run a node until `stop` is set or Ctrl+C is received.
///
/// With `enable_tun` the local interface is a Linux TUN device; otherwise the
/// node runs relay-only, forwarding mesh traffic without a host interface.
pub async fn run_node(cfg: NodeConfig, stop: watch::Receiver<bool>, log: LogFn) -> Result<()> {
    let log = Arc::new(log);

    if cfg.enable_tun {
        #[cfg(target_os = "linux")]
        {
            return run_node_tun_mode(cfg, stop, log).await;
        }

        #[cfg(not(target_os = "linux"))]
        {
            let _ = stop;
            anyhow::bail!("enable_tun=true is currently only supported on Linux");
        }
    }

    (log.as_ref())("TUN disabled, running relay-only".to_string());
    let (iface, mut remote) = ChannelInterface::new("relay0", MTU, RELAY_ONLY_QUEUE);

    // With no host stack behind the interface, locally addressed packets end here.
    let sink = tokio::spawn(async move {
        while let Some(packet) = remote.delivered().await {
            tracing::debug!(bytes = packet.len(), "Relay-only node discarded local packet");
        }
    });

    let result = run(cfg, Arc::new(iface), stop, log).await;
    sink.abort();
    result
}

/// Run a node on a caller-supplied local interface.
pub async fn run_node_with<I: LocalInterface>(
    cfg: NodeConfig,
    interface: Arc<I>,
    stop: watch::Receiver<bool>,
    log: LogFn,
) -> Result<()> {
    run(cfg, interface, stop, Arc::new(log)).await
}

#[cfg(target_os = "linux")]
async fn run_node_tun_mode(
    cfg: NodeConfig,
    stop: watch::Receiver<bool>,
    log: Arc<LogFn>,
) -> Result<()> {
    use hoplink_core::interface::TunInterface;

    (log.as_ref())(format!(
        "Node starting TUN mode: tun_device={} tun_mtu={}",
        cfg.tun_device_name, cfg.tun_mtu
    ));

    let tun = TunInterface::new(&cfg.tun_device_name, cfg.tun_mtu)
        .map_err(RelayError::DeviceUnavailable)
        .with_context(|| format!("failed to create TUN device '{}'", cfg.tun_device_name))?;

    (log.as_ref())(format!(
        "Linux TUN device created: name='{}' mtu={}",
        tun.name(),
        tun.mtu()
    ));

    if cfg.auto_config_tun {
        if let Some(ip) = cfg.tun_ipv6_addr {
            crate::linux_tun_config::configure_linux_tun(
                tun.name(),
                tun.mtu(),
                ip,
                cfg.tun_ipv6_prefix,
                &|m| (log.as_ref())(m),
            )?;
        } else {
            (log.as_ref())(
                "auto_config_tun=true but tun_ipv6_addr is not set; skipping auto config"
                    .to_string(),
            );
        }
    }

    run(cfg, Arc::new(tun), stop, log).await
}

/// The configured local address, or the host's first link-local one.
pub fn resolve_local_address(cfg: &NodeConfig) -> Result<Address, RelayError> {
    cfg.local_address
        .or_else(InterfaceDiscovery::first_link_local)
        .ok_or_else(|| {
            RelayError::FatalStartupFailure(
                "no local_address configured and no link-local IPv6 address found".to_string(),
            )
        })
}

/// One line per configured route, ordered by destination.
pub fn route_summary(cfg: &NodeConfig) -> Result<Vec<String>> {
    let table = cfg.routing_table().context("invalid routing table")?;

    let mut routes: Vec<_> = table.iter().collect();
    routes.sort_by_key(|(destination, _)| *destination);

    Ok(routes
        .into_iter()
        .map(|(destination, path)| {
            let hops: Vec<String> = path.iter().map(ToString::to_string).collect();
            format!("{destination}: {}", hops.join(" -> "))
        })
        .collect())
}

async fn run<I: LocalInterface>(
    cfg: NodeConfig,
    interface: Arc<I>,
    mut stop: watch::Receiver<bool>,
    log: Arc<LogFn>,
) -> Result<()> {
    let local = resolve_local_address(&cfg)?;

    let routes = cfg
        .routing_table()
        .map_err(|e| RelayError::FatalStartupFailure(format!("invalid routing table: {e}")))?;
    let routes = Arc::new(routes);

    if !cfg.destination_offset_is_valid() {
        return Err(RelayError::FatalStartupFailure(format!(
            "destination_offset {} does not leave room for an address in the IPv6 header",
            cfg.destination_offset
        ))
        .into());
    }
    if cfg.destination_offset == LEGACY_DESTINATION_OFFSET {
        (log.as_ref())(format!(
            "Warning: destination_offset={LEGACY_DESTINATION_OFFSET} reads destinations one byte early (legacy layout); standard is {DESTINATION_OFFSET}"
        ));
    }

    // Open once up front so a missing device stops the node instead of the
    // relay loop retrying it forever.
    let probe = interface
        .open()
        .await
        .map_err(RelayError::DeviceUnavailable)
        .with_context(|| format!("startup probe of interface '{}' failed", interface.name()))?;
    drop(probe);

    let neighbors = cfg
        .radio
        .neighbors
        .iter()
        .map(|n| (n.address, n.endpoint))
        .collect();
    let radio = UdpRadio::bind(local, cfg.radio.bind, neighbors, cfg.radio.beacon_interval)
        .await
        .with_context(|| format!("failed to bind radio socket to {}", cfg.radio.bind))?;
    let radio = Arc::new(radio);

    let presence = radio
        .advertise(Presence::Receive)
        .context("failed to start receive advertisement")?;

    (log.as_ref())(format!(
        "Node config: local={local} role={:?} interface='{}' radio={} neighbors={} routes={} health_interval={:?}",
        cfg.role,
        interface.name(),
        radio.local_endpoint()?,
        cfg.radio.neighbors.len(),
        routes.len(),
        cfg.health_interval
    ));

    let access = Arc::new(AccessLists::from_config(&cfg));
    let stats = Arc::new(RelayStats::new());
    let activity = ActiveOperations::new();

    let transmitter = HopTransmitter::new(Arc::clone(&radio), local, activity.clone())
        .with_timeout(cfg.transmit_timeout);

    let relay = RelayLoop::new(
        InboundListener::new(Arc::clone(&interface), activity.clone()),
        transmitter.clone(),
        Arc::clone(&routes),
        local,
    )
    .with_access_lists(Arc::clone(&access))
    .with_stats(Arc::clone(&stats))
    .with_listen_timeout(cfg.listen_timeout)
    .with_destination_offset(cfg.destination_offset);

    let forwarder = MeshForwarder::new(
        Arc::clone(&interface),
        transmitter,
        Arc::clone(&routes),
        local,
        activity.clone(),
    )
    .with_access_lists(access)
    .with_stats(Arc::clone(&stats))
    .with_destination_offset(cfg.destination_offset);

    let (workers_stop_tx, workers_stop_rx) = watch::channel(false);
    let relay_state = relay.state();
    let relay_task = relay.spawn(workers_stop_rx.clone());
    let forwarder_task = forwarder.spawn(workers_stop_rx);

    (log.as_ref())("Relay loop and mesh forwarder started".to_string());

    let mut tick = tokio::time::interval(cfg.health_interval);

    loop {
        tokio::select! {
            _ = tick.tick() => {
                (log.as_ref())(format!(
                    "Health tick: state={:?} active_operations={} {}",
                    *relay_state.borrow(),
                    activity.current(),
                    stats.snapshot()
                ));
            }
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    (log.as_ref())("Stop requested".to_string());
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                (log.as_ref())("Ctrl+C received".to_string());
                break;
            }
        }
    }

    // The relay loop only sees the flag between cycles, so this can take up
    // to one listen plus one hop attempt.
    workers_stop_tx.send_replace(true);
    if let Err(e) = relay_task.await {
        (log.as_ref())(format!("Relay loop task failed: {e}"));
    }
    if let Err(e) = forwarder_task.await {
        (log.as_ref())(format!("Mesh forwarder task failed: {e}"));
    }

    drop(presence);
    activity.wait_drained().await;

    (log.as_ref())(format!("Node stopped: {}", stats.snapshot()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hoplink_core::control::RouteConfig;

    fn addr(s: &str) -> Address {
        s.parse().unwrap()
    }

    #[test]
    fn test_configured_local_address_wins() {
        let cfg = NodeConfig {
            local_address: Some(addr("fe80::1%3")),
            ..Default::default()
        };
        assert_eq!(resolve_local_address(&cfg).unwrap(), addr("fe80::1%3"));
    }

    #[test]
    fn test_route_summary_is_sorted() {
        let cfg = NodeConfig {
            routes: vec![
                RouteConfig {
                    destination: addr("fe80::3"),
                    path: vec![addr("fe80::1"), addr("fe80::2"), addr("fe80::3")],
                },
                RouteConfig {
                    destination: addr("fe80::2"),
                    path: vec![addr("fe80::1"), addr("fe80::2")],
                },
            ],
            ..Default::default()
        };

        assert_eq!(
            route_summary(&cfg).unwrap(),
            vec![
                "fe80::2: fe80::1 -> fe80::2".to_string(),
                "fe80::3: fe80::1 -> fe80::2 -> fe80::3".to_string(),
            ]
        );
    }

    #[test]
    fn test_route_summary_rejects_bad_path() {
        let cfg = NodeConfig {
            routes: vec![RouteConfig {
                destination: addr("fe80::3"),
                path: vec![addr("fe80::1"), addr("fe80::2")],
            }],
            ..Default::default()
        };
        assert!(route_summary(&cfg).is_err());
    }
}

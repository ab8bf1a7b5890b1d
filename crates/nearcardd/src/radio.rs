//! Radio over link-local IPv6 multicast.
//!
//! Each advert is one UDP datagram, `service_id(16) || frame`, sent to
//! ff02::1. While an advert is held it is re-sent every advertise interval,
//! the way a low-energy advertiser repeats its payload until stopped.
//! Multicast loopback is off, so a device never hears its own adverts.

use std::io;
use std::net::{Ipv6Addr, SocketAddrV6};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use zerocopy::FromBytes;

use nearcard_core::config::RadioConfig;
use nearcard_core::wire::MAX_FRAME_LEN;
use nearcard_core::ServiceId;
use nearcard_services::{
    AdvertiseSettings, FrameSink, Radio, RadioError, ScanFilter, ScanSettings,
};

/// All-nodes link-local group.
pub const MULTICAST_ADDR: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 1);

const SERVICE_ID_LEN: usize = 16;

pub struct MulticastRadio {
    socket: Arc<Socket>,
    dest: SocketAddrV6,
    interface_index: u32,
    port: u16,
    advert: Arc<Mutex<Option<Vec<u8>>>>,
    runtime: Handle,
    repeater: JoinHandle<()>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl MulticastRadio {
    /// Open the radio on the configured interface. Must be called from
    /// within a tokio runtime.
    pub fn open(config: &RadioConfig) -> Result<Self> {
        let interface_index = if_index(&config.interface)?;
        let socket = Arc::new(
            make_sender_socket(interface_index)
                .context("failed to create multicast advert socket")?,
        );
        let dest = SocketAddrV6::new(MULTICAST_ADDR, config.port, 0, interface_index);
        let advert = Arc::new(Mutex::new(None));

        let runtime = Handle::current();
        let repeater = runtime.spawn(repeat_loop(
            socket.clone(),
            dest,
            advert.clone(),
            config.advertise_interval(),
        ));

        tracing::info!(
            interface = %config.interface,
            interface_index,
            port = config.port,
            "multicast radio open"
        );

        Ok(Self {
            socket,
            dest,
            interface_index,
            port: config.port,
            advert,
            runtime,
            repeater,
            listener: Mutex::new(None),
        })
    }
}

impl Radio for MulticastRadio {
    fn start_advertising(
        &self,
        settings: &AdvertiseSettings,
        service: &ServiceId,
        payload: &[u8],
    ) -> Result<(), RadioError> {
        if payload.len() > MAX_FRAME_LEN {
            return Err(RadioError::DataTooLarge(payload.len()));
        }

        let mut advert = lock(&self.advert);
        if advert.is_some() {
            return Err(RadioError::AlreadyStarted);
        }

        let datagram = datagram(service, payload);
        self.socket.send_to(&datagram, &self.dest.into())?;
        tracing::trace!(bytes = datagram.len(), mode = ?settings.mode, "advert on air");
        *advert = Some(datagram);
        Ok(())
    }

    fn stop_advertising(&self) {
        lock(&self.advert).take();
    }

    fn start_scan(
        &self,
        filter: &ScanFilter,
        settings: &ScanSettings,
        sink: FrameSink,
    ) -> Result<(), RadioError> {
        let socket = make_listener_socket(self.port, self.interface_index)?;
        let socket = {
            let _guard = self.runtime.enter();
            UdpSocket::from_std(socket)?
        };

        let task = self.runtime.spawn(listen_loop(socket, filter.clone(), sink));
        if let Some(old) = lock(&self.listener).replace(task) {
            old.abort();
        }
        tracing::debug!(port = self.port, mode = ?settings.mode, "multicast scan started");
        Ok(())
    }

    fn stop_scan(&self) {
        if let Some(task) = lock(&self.listener).take() {
            task.abort();
        }
    }
}

impl Drop for MulticastRadio {
    fn drop(&mut self) {
        self.repeater.abort();
        self.stop_scan();
    }
}

/// Re-send the held advert until the task is aborted.
async fn repeat_loop(
    socket: Arc<Socket>,
    dest: SocketAddrV6,
    advert: Arc<Mutex<Option<Vec<u8>>>>,
    every: Duration,
) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let Some(datagram) = lock(&advert).clone() else {
            continue;
        };
        if let Err(e) = socket.send_to(&datagram, &dest.into()) {
            tracing::warn!(error = %e, "advert send failed");
        }
    }
}

/// Hand every datagram under a matching service to `sink`.
async fn listen_loop(socket: UdpSocket, filter: ScanFilter, sink: FrameSink) {
    let mut buf = vec![0u8; 1024];

    loop {
        let (len, from) = match socket.recv_from(&mut buf).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "recv_from failed");
                continue;
            }
        };

        match split_datagram(&buf[..len]) {
            Some((service, frame)) if filter.matches(&service) => sink(&service, frame),
            Some(_) => tracing::trace!(addr = %from, "advert for another service"),
            None => tracing::trace!(addr = %from, bytes = len, "datagram too short"),
        }
    }
}

fn datagram(service: &ServiceId, frame: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(SERVICE_ID_LEN + frame.len());
    out.extend_from_slice(service.as_bytes());
    out.extend_from_slice(frame);
    out
}

/// Split a datagram into its service id and frame.
fn split_datagram(datagram: &[u8]) -> Option<(ServiceId, &[u8])> {
    let id = <[u8; SERVICE_ID_LEN]>::read_from_prefix(datagram)?;
    Some((ServiceId(id), &datagram[SERVICE_ID_LEN..]))
}

fn make_sender_socket(interface_index: u32) -> Result<Socket> {
    let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP)).context("socket()")?;

    socket.set_reuse_address(true).context("SO_REUSEADDR")?;
    socket
        .set_multicast_if_v6(interface_index)
        .context("IPV6_MULTICAST_IF")?;
    // Link-local only.
    socket.set_multicast_hops_v6(1).context("IPV6_MULTICAST_HOPS")?;
    socket
        .set_multicast_loop_v6(false)
        .context("IPV6_MULTICAST_LOOP")?;

    Ok(socket)
}

fn make_listener_socket(port: u16, interface_index: u32) -> io::Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))?;

    socket.set_reuse_address(true)?;
    socket.set_only_v6(true)?;
    socket.set_nonblocking(true)?;

    let bind_addr = SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, port, 0, 0);
    socket.bind(&bind_addr.into())?;
    socket.join_multicast_v6(&MULTICAST_ADDR, interface_index)?;

    Ok(socket.into())
}

/// Get the OS interface index for a named network interface.
pub fn if_index(name: &str) -> Result<u32> {
    let name_cstr = std::ffi::CString::new(name).context("interface name contains null byte")?;
    let index = unsafe { libc::if_nametoindex(name_cstr.as_ptr()) };
    if index == 0 {
        anyhow::bail!("interface '{}' not found", name);
    }
    Ok(index)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

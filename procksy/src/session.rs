//! The per-connection session engine: one state machine per
//! accepted client, driving the codec and the socket shim through
//! ACCEPT -> FILTER_SRC -> METHOD_SEL -> AUTH -> REQUEST -> CONNECT -> RELAY.
//! Every branch that can fail terminates the session locally; nothing here
//! propagates an error up to the acceptor.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, trace, warn};
use procksy_proto::{
    build_server_basic_auth_status, build_server_method_selection, build_server_reply,
    parse_client_basic_auth, parse_client_method_selection, parse_client_request, Address,
    AuthStatus, ClientRequest, Command, Error as ProtoError, Method, Reply,
    ServerBasicAuthStatus, ServerMethodSelection, ServerReply, ATYP_DOMAINNAME,
};
use tokio::net::TcpStream;

use crate::config::ServerConfig;
use crate::signal::TerminationSignal;
use crate::socket;

/// Drives a single accepted connection end to end. Never returns an error:
/// every rejection path sends whatever reply the protocol calls for (or
/// none, for a client-filter denial at FILTER_SRC) and simply returns.
pub async fn handle_connection(
    mut client: TcpStream,
    peer: SocketAddr,
    config: Arc<ServerConfig>,
    signal: TerminationSignal,
) {
    let timeout = Duration::from_secs(config.sock_timeout_secs);
    trace!("{peer}: FILTER_SRC");

    if !config.client_filter.is_allowed(&peer.ip().to_string(), None) {
        warn!("client {peer} rejected by client filter");
        let reply = ServerMethodSelection {
            method: Method::NoAcceptable,
        };
        socket::send_all(&mut client, &build_server_method_selection(&reply), timeout).await;
        return;
    }

    trace!("{peer}: METHOD_SEL");
    let method = match negotiate_method(&mut client, &config, timeout).await {
        Some(method) => method,
        None => return,
    };

    if method == Method::NoAcceptable {
        return;
    }

    if method == Method::UsernamePassword {
        trace!("{peer}: AUTH");
        if !authenticate(&mut client, &config, timeout).await {
            return;
        }
    }

    trace!("{peer}: REQUEST");
    let request = match read_client_request(&mut client, timeout).await {
        Ok(request) => request,
        Err(reply) => {
            reject_request(&mut client, reply, timeout).await;
            return;
        }
    };

    if request.command != Command::Connect {
        warn!("client {peer} requested unsupported command {:?}", request.command);
        reject_request(&mut client, Reply::CommandNotSupported, timeout).await;
        return;
    }

    let host = match &request.address {
        Address::Ipv4(ip) => ip.to_string(),
        Address::Domain(name) => name.clone(),
        Address::Ipv6(_) => {
            warn!("client {peer} requested an IPv6 target, which is not supported");
            reject_request(&mut client, Reply::AddrTypeNotSupported, timeout).await;
            return;
        }
    };

    if !config.target_filter.is_allowed(&host, Some(request.port)) {
        warn!("target {host}:{} rejected by target filter", request.port);
        // Folded into SERVER_FAILURE rather than the more accurate
        // CONNECTION_NOT_ALLOWED; preserved as designed.
        reject_request(&mut client, Reply::ServerFailure, timeout).await;
        return;
    }

    trace!("{peer}: CONNECT target={host}:{}", request.port);
    let Some(mut upstream) = socket::connect(&host, request.port, timeout).await else {
        reject_request(&mut client, Reply::ServerFailure, timeout).await;
        return;
    };

    let bnd = match upstream.local_addr() {
        Ok(addr) => bound_ipv4(addr),
        Err(err) => {
            error!("failed to read upstream local address: {err}");
            reject_request(&mut client, Reply::ServerFailure, timeout).await;
            return;
        }
    };
    let reply = ServerReply {
        reply: Reply::Succeeded,
        address: Address::Ipv4(bnd.0),
        port: bnd.1,
    };
    if !socket::send_all(&mut client, &build_server_reply(&reply), timeout).await {
        return;
    }

    info!("relaying {peer} <-> {host}:{}", request.port);
    relay(&mut client, &mut upstream, config.buffer_size, &signal).await;
}

/// METHOD_SEL: reads the client's offered methods and picks the strongest
/// one the server can actually satisfy. Returns `None` if the
/// frame could not be read at all.
async fn negotiate_method(
    client: &mut TcpStream,
    config: &ServerConfig,
    timeout: Duration,
) -> Option<Method> {
    let header = socket::recv_exact(client, 2, timeout).await?;
    let nmethods = header[1] as usize;
    let body = socket::recv_exact(client, nmethods, timeout).await?;
    let mut frame = header;
    frame.extend_from_slice(&body);
    let offer = match parse_client_method_selection(&frame) {
        Ok(offer) => offer,
        Err(err) => {
            warn!("malformed method selection: {err}");
            return None;
        }
    };

    let chosen = if config.authenticator.enabled() {
        if offer.methods.contains(&Method::UsernamePassword) {
            Method::UsernamePassword
        } else {
            Method::NoAcceptable
        }
    } else if offer.methods.contains(&Method::NoAuth) {
        Method::NoAuth
    } else {
        Method::NoAcceptable
    };

    let reply = ServerMethodSelection { method: chosen };
    if !socket::send_all(client, &build_server_method_selection(&reply), timeout).await {
        return None;
    }
    Some(chosen)
}

/// AUTH: RFC 1929 username/password subnegotiation.
async fn authenticate(client: &mut TcpStream, config: &ServerConfig, timeout: Duration) -> bool {
    let header = match socket::recv_exact(client, 2, timeout).await {
        Some(h) => h,
        None => return false,
    };
    let ulen = header[1] as usize;
    let Some(username) = socket::recv_exact(client, ulen, timeout).await else {
        return false;
    };
    let Some(plen_byte) = socket::recv_u8(client, timeout).await else {
        return false;
    };
    let Some(password) = socket::recv_exact(client, plen_byte as usize, timeout).await else {
        return false;
    };

    let mut frame = header;
    frame.extend_from_slice(&username);
    frame.push(plen_byte);
    frame.extend_from_slice(&password);
    let request = match parse_client_basic_auth(&frame) {
        Ok(request) => request,
        Err(err) => {
            warn!("malformed basic auth frame: {err}");
            return false;
        }
    };

    let allowed = config
        .authenticator
        .is_allowed(&request.username, &request.password);
    let status = ServerBasicAuthStatus {
        status: if allowed {
            AuthStatus::Success
        } else {
            AuthStatus::Failure
        },
    };
    if !socket::send_all(client, &build_server_basic_auth_status(&status), timeout).await {
        return false;
    }
    allowed
}

/// Reads a CONNECT/BIND/UDP_ASSOCIATE request frame, whose body length
/// depends on ATYP and so cannot be read in one fixed-size `recv`. A
/// version mismatch or truncation maps to `ServerFailure`; an address type
/// this server doesn't even attempt to parse maps to `AddrTypeNotSupported`
/// directly, since without a known length there is no further frame to
/// drain.
async fn read_client_request(
    client: &mut TcpStream,
    timeout: Duration,
) -> Result<ClientRequest, Reply> {
    let header = socket::recv_exact(client, 4, timeout)
        .await
        .ok_or(Reply::ServerFailure)?;
    let atyp = header[3];

    let mut frame = header;
    match atyp {
        procksy_proto::ATYP_IPV4 => {
            let body = socket::recv_exact(client, 4, timeout)
                .await
                .ok_or(Reply::ServerFailure)?;
            frame.extend_from_slice(&body);
        }
        procksy_proto::ATYP_IPV6 => {
            let body = socket::recv_exact(client, 16, timeout)
                .await
                .ok_or(Reply::ServerFailure)?;
            frame.extend_from_slice(&body);
        }
        ATYP_DOMAINNAME => {
            let len = socket::recv_u8(client, timeout)
                .await
                .ok_or(Reply::ServerFailure)?;
            let body = socket::recv_exact(client, len as usize, timeout)
                .await
                .ok_or(Reply::ServerFailure)?;
            frame.push(len);
            frame.extend_from_slice(&body);
        }
        _ => return Err(Reply::AddrTypeNotSupported),
    }

    let port = socket::recv_exact(client, 2, timeout)
        .await
        .ok_or(Reply::ServerFailure)?;
    frame.extend_from_slice(&port);

    parse_client_request(&frame).map_err(|err| match err {
        ProtoError::UnknownCommand(_) => Reply::CommandNotSupported,
        ProtoError::UnknownAddressType(_) => Reply::AddrTypeNotSupported,
        _ => Reply::ServerFailure,
    })
}

/// Reduces the upstream socket's local address to the IPv4 pair the
/// SUCCEEDED reply's BND.ADDR/BND.PORT carries: the upstream socket's own
/// local bound address and port, encoded as IPv4. An IPv6 local address
/// can't occur here since `connect` only ever dials IPv4 literals or
/// OS-resolved DOMAINNAME targets reached over IPv4 in this deployment;
/// fall back to the unspecified address rather than guess.
fn bound_ipv4(addr: SocketAddr) -> (Ipv4Addr, u16) {
    match addr.ip() {
        IpAddr::V4(ip) => (ip, addr.port()),
        IpAddr::V6(_) => (Ipv4Addr::UNSPECIFIED, 0),
    }
}

async fn reject_request(client: &mut TcpStream, reply: Reply, timeout: Duration) {
    let msg = ServerReply {
        reply,
        address: Address::unspecified(),
        port: 0,
    };
    socket::send_all(client, &build_server_reply(&msg), timeout).await;
}

/// RELAY: pumps both directions until either side closes or the
/// termination signal fires, checked once per idle second.
async fn relay(
    client: &mut TcpStream,
    upstream: &mut TcpStream,
    buffer_size: usize,
    signal: &TerminationSignal,
) {
    let mut client_buf = vec![0u8; buffer_size];
    let mut upstream_buf = vec![0u8; buffer_size];
    loop {
        if signal.is_set() {
            return;
        }
        match socket::pump_step(client, upstream, &mut client_buf, &mut upstream_buf).await {
            socket::PumpOutcome::Progressed => continue,
            socket::PumpOutcome::BothIdle => continue,
            socket::PumpOutcome::Closed => return,
        }
    }
}

//! Pure byte-level serialization/parsing for the SOCKS5 subset this proxy
//! speaks (RFC 1928 method selection/request/reply, RFC 1929 basic auth).
//!
//! Nothing in this module touches a socket: `build_*` turns a message into
//! bytes, `parse_*` turns bytes back into a message, and every parser
//! requires the input slice to be exactly one frame — no trailing bytes, no
//! partial reads. Callers (the socket shim) are responsible for getting
//! exactly the right number of bytes off the wire before calling in here.

use std::net::{Ipv4Addr, Ipv6Addr};

use bytes::{BufMut, BytesMut};

use crate::Error;

/// SOCKS protocol version used by every non-auth frame.
pub const VER_SOCKS5: u8 = 0x05;
/// Version byte used by RFC 1929 username/password subnegotiation frames.
pub const VER_AUTH: u8 = 0x01;

pub const METHOD_NO_AUTH: u8 = 0x00;
pub const METHOD_GSSAPI: u8 = 0x01;
pub const METHOD_USERNAME_PASSWORD: u8 = 0x02;
pub const METHOD_NO_ACCEPTABLE: u8 = 0xff;

pub const CMD_CONNECT: u8 = 0x01;
pub const CMD_BIND: u8 = 0x02;
pub const CMD_UDP_ASSOCIATE: u8 = 0x03;

pub const ATYP_IPV4: u8 = 0x01;
pub const ATYP_DOMAINNAME: u8 = 0x03;
pub const ATYP_IPV6: u8 = 0x04;

pub const REP_SUCCEEDED: u8 = 0x00;
pub const REP_SERVER_FAILURE: u8 = 0x01;
pub const REP_CONNECTION_NOT_ALLOWED: u8 = 0x02;
pub const REP_NETWORK_UNREACHABLE: u8 = 0x03;
pub const REP_HOST_UNREACHABLE: u8 = 0x04;
pub const REP_CONNECTION_REFUSED: u8 = 0x05;
pub const REP_TTL_EXPIRED: u8 = 0x06;
pub const REP_COMMAND_NOT_SUPPORTED: u8 = 0x07;
pub const REP_ADDR_TYPE_NOT_SUPPORTED: u8 = 0x08;

pub const AUTH_STATUS_SUCCESS: u8 = 0x00;
pub const AUTH_STATUS_FAILURE: u8 = 0xff;

/// A SOCKS5 auth method identifier. The method space is the full `u8` range
/// (RFC 1928 §3), so unlike [`Command`]/[`Reply`] this is total: every byte
/// is a valid, if sometimes unsupported, method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    NoAuth,
    Gssapi,
    UsernamePassword,
    NoAcceptable,
    Other(u8),
}

impl Method {
    pub fn from_u8(b: u8) -> Self {
        match b {
            METHOD_NO_AUTH => Method::NoAuth,
            METHOD_GSSAPI => Method::Gssapi,
            METHOD_USERNAME_PASSWORD => Method::UsernamePassword,
            METHOD_NO_ACCEPTABLE => Method::NoAcceptable,
            other => Method::Other(other),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            Method::NoAuth => METHOD_NO_AUTH,
            Method::Gssapi => METHOD_GSSAPI,
            Method::UsernamePassword => METHOD_USERNAME_PASSWORD,
            Method::NoAcceptable => METHOD_NO_ACCEPTABLE,
            Method::Other(b) => b,
        }
    }
}

/// CMD field of a [`ClientRequest`]. Only the three RFC-assigned values
/// parse; everything else is a protocol error. `Bind` and `UdpAssociate`
/// parse successfully even though the session engine rejects them —
/// recognizing a valid-but-unsupported command is a session policy
/// decision, not a codec one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Bind,
    UdpAssociate,
}

impl Command {
    fn from_u8(b: u8) -> Result<Self, Error> {
        match b {
            CMD_CONNECT => Ok(Command::Connect),
            CMD_BIND => Ok(Command::Bind),
            CMD_UDP_ASSOCIATE => Ok(Command::UdpAssociate),
            other => Err(Error::UnknownCommand(other)),
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            Command::Connect => CMD_CONNECT,
            Command::Bind => CMD_BIND,
            Command::UdpAssociate => CMD_UDP_ASSOCIATE,
        }
    }
}

/// REP field of a [`ServerReply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Succeeded,
    ServerFailure,
    ConnectionNotAllowed,
    NetworkUnreachable,
    HostUnreachable,
    ConnectionRefused,
    TtlExpired,
    CommandNotSupported,
    AddrTypeNotSupported,
}

impl Reply {
    fn from_u8(b: u8) -> Result<Self, Error> {
        Ok(match b {
            REP_SUCCEEDED => Reply::Succeeded,
            REP_SERVER_FAILURE => Reply::ServerFailure,
            REP_CONNECTION_NOT_ALLOWED => Reply::ConnectionNotAllowed,
            REP_NETWORK_UNREACHABLE => Reply::NetworkUnreachable,
            REP_HOST_UNREACHABLE => Reply::HostUnreachable,
            REP_CONNECTION_REFUSED => Reply::ConnectionRefused,
            REP_TTL_EXPIRED => Reply::TtlExpired,
            REP_COMMAND_NOT_SUPPORTED => Reply::CommandNotSupported,
            REP_ADDR_TYPE_NOT_SUPPORTED => Reply::AddrTypeNotSupported,
            other => return Err(Error::UnknownReply(other)),
        })
    }

    fn to_u8(self) -> u8 {
        match self {
            Reply::Succeeded => REP_SUCCEEDED,
            Reply::ServerFailure => REP_SERVER_FAILURE,
            Reply::ConnectionNotAllowed => REP_CONNECTION_NOT_ALLOWED,
            Reply::NetworkUnreachable => REP_NETWORK_UNREACHABLE,
            Reply::HostUnreachable => REP_HOST_UNREACHABLE,
            Reply::ConnectionRefused => REP_CONNECTION_REFUSED,
            Reply::TtlExpired => REP_TTL_EXPIRED,
            Reply::CommandNotSupported => REP_COMMAND_NOT_SUPPORTED,
            Reply::AddrTypeNotSupported => REP_ADDR_TYPE_NOT_SUPPORTED,
        }
    }
}

/// STATUS field of a [`ServerBasicAuthStatus`]. RFC 1929 only mandates that
/// any non-zero value means failure; this server always emits 0xFF for the
/// failure case (see the open question recorded in DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    Success,
    Failure,
}

impl AuthStatus {
    pub fn from_u8(b: u8) -> Self {
        if b == AUTH_STATUS_SUCCESS {
            AuthStatus::Success
        } else {
            AuthStatus::Failure
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            AuthStatus::Success => AUTH_STATUS_SUCCESS,
            AuthStatus::Failure => AUTH_STATUS_FAILURE,
        }
    }
}

/// DST.ADDR / BND.ADDR, tagged with the ATYP it was (or will be) carried
/// under. IPv6 parses here so the request decoder can see and reject it
/// explicitly rather than failing to parse at all; only IPv4 and
/// DOMAINNAME targets are actually relayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Ipv4(Ipv4Addr),
    Domain(String),
    Ipv6(Ipv6Addr),
}

impl Address {
    pub fn addr_type(&self) -> u8 {
        match self {
            Address::Ipv4(_) => ATYP_IPV4,
            Address::Domain(_) => ATYP_DOMAINNAME,
            Address::Ipv6(_) => ATYP_IPV6,
        }
    }

    /// The semantically-null address used on rejection replies:
    /// `0.0.0.0`, ATYP=IPv4.
    pub fn unspecified() -> Self {
        Address::Ipv4(Ipv4Addr::UNSPECIFIED)
    }
}

/// Client's version/method selection message (RFC 1928 §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientMethodSelection {
    pub methods: Vec<Method>,
}

/// Server's chosen method, or [`Method::NoAcceptable`] if none fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerMethodSelection {
    pub method: Method,
}

/// Client's username/password subnegotiation message (RFC 1929 §2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientBasicAuth {
    pub username: Vec<u8>,
    pub password: Vec<u8>,
}

/// Server's basic-auth outcome (RFC 1929 §2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerBasicAuthStatus {
    pub status: AuthStatus,
}

/// Client's CONNECT/BIND/UDP_ASSOCIATE request (RFC 1928 §4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRequest {
    pub command: Command,
    pub address: Address,
    pub port: u16,
}

/// Server's reply to a [`ClientRequest`] (RFC 1928 §6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerReply {
    pub reply: Reply,
    pub address: Address,
    pub port: u16,
}

fn expect_exact(consumed: usize, total: usize) -> Result<(), Error> {
    if consumed < total {
        Err(Error::Truncated {
            needed: total,
            got: consumed,
        })
    } else if consumed > total {
        Err(Error::TrailingBytes(consumed - total))
    } else {
        Ok(())
    }
}

fn take(buf: &[u8], n: usize, pos: usize) -> Result<&[u8], Error> {
    if buf.len() < pos + n {
        Err(Error::Truncated {
            needed: pos + n,
            got: buf.len(),
        })
    } else {
        Ok(&buf[pos..pos + n])
    }
}

fn parse_address(buf: &[u8], pos: &mut usize, atyp: u8) -> Result<Address, Error> {
    match atyp {
        ATYP_IPV4 => {
            let raw = take(buf, 4, *pos)?;
            *pos += 4;
            Ok(Address::Ipv4(Ipv4Addr::new(raw[0], raw[1], raw[2], raw[3])))
        }
        ATYP_IPV6 => {
            let raw = take(buf, 16, *pos)?;
            *pos += 16;
            let mut octets = [0u8; 16];
            octets.copy_from_slice(raw);
            Ok(Address::Ipv6(Ipv6Addr::from(octets)))
        }
        ATYP_DOMAINNAME => {
            let len = take(buf, 1, *pos)?[0] as usize;
            *pos += 1;
            let raw = take(buf, len, *pos)?;
            *pos += len;
            let domain = std::str::from_utf8(raw)
                .map_err(|_| Error::InvalidDomain)?
                .to_owned();
            Ok(Address::Domain(domain))
        }
        other => Err(Error::UnknownAddressType(other)),
    }
}

fn build_address(addr: &Address, dst: &mut BytesMut) {
    dst.put_u8(addr.addr_type());
    match addr {
        Address::Ipv4(ip) => dst.put_slice(&ip.octets()),
        Address::Ipv6(ip) => dst.put_slice(&ip.octets()),
        Address::Domain(name) => {
            dst.put_u8(name.len() as u8);
            dst.put_slice(name.as_bytes());
        }
    }
}

fn check_version(buf: &[u8], pos: &mut usize, expected: u8) -> Result<(), Error> {
    let got = take(buf, 1, *pos)?[0];
    *pos += 1;
    if got != expected {
        return Err(Error::InvalidVersion {
            expected,
            found: got,
        });
    }
    Ok(())
}

fn check_reserved(buf: &[u8], pos: &mut usize) -> Result<(), Error> {
    let got = take(buf, 1, *pos)?[0];
    *pos += 1;
    if got != 0x00 {
        return Err(Error::ReservedByteNotZero(got));
    }
    Ok(())
}

pub fn parse_client_method_selection(buf: &[u8]) -> Result<ClientMethodSelection, Error> {
    let mut pos = 0;
    check_version(buf, &mut pos, VER_SOCKS5)?;
    let nmethods = take(buf, 1, pos)?[0] as usize;
    pos += 1;
    let raw = take(buf, nmethods, pos)?;
    pos += nmethods;
    expect_exact(pos, buf.len())?;
    Ok(ClientMethodSelection {
        methods: raw.iter().copied().map(Method::from_u8).collect(),
    })
}

pub fn build_client_method_selection(msg: &ClientMethodSelection) -> BytesMut {
    let mut dst = BytesMut::with_capacity(2 + msg.methods.len());
    dst.put_u8(VER_SOCKS5);
    dst.put_u8(msg.methods.len() as u8);
    for m in &msg.methods {
        dst.put_u8(m.to_u8());
    }
    dst
}

pub fn parse_server_method_selection(buf: &[u8]) -> Result<ServerMethodSelection, Error> {
    let mut pos = 0;
    check_version(buf, &mut pos, VER_SOCKS5)?;
    let method = take(buf, 1, pos)?[0];
    pos += 1;
    expect_exact(pos, buf.len())?;
    Ok(ServerMethodSelection {
        method: Method::from_u8(method),
    })
}

pub fn build_server_method_selection(msg: &ServerMethodSelection) -> BytesMut {
    let mut dst = BytesMut::with_capacity(2);
    dst.put_u8(VER_SOCKS5);
    dst.put_u8(msg.method.to_u8());
    dst
}

pub fn parse_client_basic_auth(buf: &[u8]) -> Result<ClientBasicAuth, Error> {
    let mut pos = 0;
    check_version(buf, &mut pos, VER_AUTH)?;
    let ulen = take(buf, 1, pos)?[0] as usize;
    pos += 1;
    let username = take(buf, ulen, pos)?.to_vec();
    pos += ulen;
    let plen = take(buf, 1, pos)?[0] as usize;
    pos += 1;
    let password = take(buf, plen, pos)?.to_vec();
    pos += plen;
    expect_exact(pos, buf.len())?;
    Ok(ClientBasicAuth { username, password })
}

pub fn build_client_basic_auth(msg: &ClientBasicAuth) -> BytesMut {
    let mut dst = BytesMut::with_capacity(3 + msg.username.len() + msg.password.len());
    dst.put_u8(VER_AUTH);
    dst.put_u8(msg.username.len() as u8);
    dst.put_slice(&msg.username);
    dst.put_u8(msg.password.len() as u8);
    dst.put_slice(&msg.password);
    dst
}

pub fn parse_server_basic_auth_status(buf: &[u8]) -> Result<ServerBasicAuthStatus, Error> {
    let mut pos = 0;
    check_version(buf, &mut pos, VER_AUTH)?;
    let status = take(buf, 1, pos)?[0];
    pos += 1;
    expect_exact(pos, buf.len())?;
    Ok(ServerBasicAuthStatus {
        status: AuthStatus::from_u8(status),
    })
}

pub fn build_server_basic_auth_status(msg: &ServerBasicAuthStatus) -> BytesMut {
    let mut dst = BytesMut::with_capacity(2);
    dst.put_u8(VER_AUTH);
    dst.put_u8(msg.status.to_u8());
    dst
}

pub fn parse_client_request(buf: &[u8]) -> Result<ClientRequest, Error> {
    let mut pos = 0;
    check_version(buf, &mut pos, VER_SOCKS5)?;
    let command = Command::from_u8(take(buf, 1, pos)?[0])?;
    pos += 1;
    check_reserved(buf, &mut pos)?;
    let atyp = take(buf, 1, pos)?[0];
    pos += 1;
    let address = parse_address(buf, &mut pos, atyp)?;
    let port_raw = take(buf, 2, pos)?;
    let port = u16::from_be_bytes([port_raw[0], port_raw[1]]);
    pos += 2;
    expect_exact(pos, buf.len())?;
    Ok(ClientRequest {
        command,
        address,
        port,
    })
}

pub fn build_client_request(msg: &ClientRequest) -> BytesMut {
    let mut dst = BytesMut::with_capacity(8);
    dst.put_u8(VER_SOCKS5);
    dst.put_u8(msg.command.to_u8());
    dst.put_u8(0x00);
    build_address(&msg.address, &mut dst);
    dst.put_u16(msg.port);
    dst
}

pub fn parse_server_reply(buf: &[u8]) -> Result<ServerReply, Error> {
    let mut pos = 0;
    check_version(buf, &mut pos, VER_SOCKS5)?;
    let reply = Reply::from_u8(take(buf, 1, pos)?[0])?;
    pos += 1;
    check_reserved(buf, &mut pos)?;
    let atyp = take(buf, 1, pos)?[0];
    pos += 1;
    let address = parse_address(buf, &mut pos, atyp)?;
    let port_raw = take(buf, 2, pos)?;
    let port = u16::from_be_bytes([port_raw[0], port_raw[1]]);
    pos += 2;
    expect_exact(pos, buf.len())?;
    Ok(ServerReply {
        reply,
        address,
        port,
    })
}

pub fn build_server_reply(msg: &ServerReply) -> BytesMut {
    let mut dst = BytesMut::with_capacity(10);
    dst.put_u8(VER_SOCKS5);
    dst.put_u8(msg.reply.to_u8());
    dst.put_u8(0x00);
    build_address(&msg.address, &mut dst);
    dst.put_u16(msg.port);
    dst
}

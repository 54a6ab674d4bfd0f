// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::io;
use std::mem;
use std::net::Ipv4Addr;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::Path;

use bytes::BytesMut;

use crate::IpEndpoint;

/// Creates a non-blocking, close-on-exec socket.
fn new_socket(domain: libc::c_int, kind: libc::c_int) -> io::Result<OwnedFd> {
    // SAFETY: No pointer arguments.
    let fd = unsafe {
        libc::socket(
            domain,
            kind | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            0,
        )
    };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }

    // SAFETY: socket() returned a fresh descriptor that nothing else owns.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

pub(crate) fn new_tcp() -> io::Result<OwnedFd> {
    new_socket(libc::AF_INET, libc::SOCK_STREAM)
}

pub(crate) fn new_udp() -> io::Result<OwnedFd> {
    new_socket(libc::AF_INET, libc::SOCK_DGRAM)
}

pub(crate) fn new_unix_stream() -> io::Result<OwnedFd> {
    new_socket(libc::AF_UNIX, libc::SOCK_STREAM)
}

pub(crate) fn new_unix_seqpacket() -> io::Result<OwnedFd> {
    new_socket(libc::AF_UNIX, libc::SOCK_SEQPACKET)
}

pub(crate) fn endpoint_to_sockaddr(endpoint: IpEndpoint) -> libc::sockaddr_in {
    // SAFETY: sockaddr_in is a plain-old-data struct; all-zeroes is valid.
    let mut addr: libc::sockaddr_in = unsafe { mem::zeroed() };
    addr.sin_family = libc::sa_family_t::try_from(libc::AF_INET).unwrap_or_default();
    addr.sin_port = endpoint.port().to_be();
    addr.sin_addr.s_addr = u32::from(endpoint.address()).to_be();
    addr
}

pub(crate) fn sockaddr_to_endpoint(addr: &libc::sockaddr_in) -> IpEndpoint {
    IpEndpoint::new(
        Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr)),
        u16::from_be(addr.sin_port),
    )
}

fn sockaddr_un(path: &Path) -> io::Result<(libc::sockaddr_un, libc::socklen_t)> {
    // SAFETY: sockaddr_un is a plain-old-data struct; all-zeroes is valid.
    let mut addr: libc::sockaddr_un = unsafe { mem::zeroed() };
    addr.sun_family = libc::sa_family_t::try_from(libc::AF_UNIX).unwrap_or_default();

    let bytes = path.as_os_str().as_encoded_bytes();
    if bytes.is_empty() || bytes.len() >= addr.sun_path.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "pipe name does not fit a socket address",
        ));
    }
    for (dst, src) in addr.sun_path.iter_mut().zip(bytes) {
        *dst = *src as libc::c_char;
    }

    let len = mem::offset_of!(libc::sockaddr_un, sun_path) + bytes.len() + 1;
    Ok((addr, libc::socklen_t::try_from(len).unwrap_or(0)))
}

fn check(rc: libc::c_int) -> io::Result<()> {
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn check_len(rc: isize) -> io::Result<usize> {
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(usize::try_from(rc).unwrap_or(0))
}

pub(crate) fn bind_ipv4(fd: RawFd, endpoint: IpEndpoint) -> io::Result<()> {
    let addr = endpoint_to_sockaddr(endpoint);

    // SAFETY: The address outlives the call and the length matches the struct.
    check(unsafe {
        libc::bind(
            fd,
            (&raw const addr).cast(),
            libc::socklen_t::try_from(mem::size_of::<libc::sockaddr_in>()).unwrap_or(0),
        )
    })
}

pub(crate) fn bind_unix(fd: RawFd, path: &Path) -> io::Result<()> {
    let (addr, len) = sockaddr_un(path)?;

    // SAFETY: The address outlives the call and `len` covers the filled part.
    check(unsafe { libc::bind(fd, (&raw const addr).cast(), len) })
}

pub(crate) fn listen(fd: RawFd, backlog: i32) -> io::Result<()> {
    // SAFETY: No pointer arguments.
    check(unsafe { libc::listen(fd, backlog) })
}

pub(crate) fn connect_ipv4(fd: RawFd, endpoint: IpEndpoint) -> io::Result<()> {
    let addr = endpoint_to_sockaddr(endpoint);

    // SAFETY: The address outlives the call and the length matches the struct.
    check(unsafe {
        libc::connect(
            fd,
            (&raw const addr).cast(),
            libc::socklen_t::try_from(mem::size_of::<libc::sockaddr_in>()).unwrap_or(0),
        )
    })
}

pub(crate) fn connect_unix(fd: RawFd, path: &Path) -> io::Result<()> {
    let (addr, len) = sockaddr_un(path)?;

    // SAFETY: The address outlives the call and `len` covers the filled part.
    check(unsafe { libc::connect(fd, (&raw const addr).cast(), len) })
}

/// Accepts one pending IPv4 connection, returning the connection descriptor
/// and the peer endpoint. The connection inherits non-blocking mode.
pub(crate) fn accept_ipv4(fd: RawFd) -> io::Result<(OwnedFd, IpEndpoint)> {
    // SAFETY: sockaddr_in is a plain-old-data struct; all-zeroes is valid.
    let mut addr: libc::sockaddr_in = unsafe { mem::zeroed() };
    let mut len = libc::socklen_t::try_from(mem::size_of::<libc::sockaddr_in>()).unwrap_or(0);

    // SAFETY: The address buffer and its length outlive the call.
    let conn = unsafe {
        libc::accept4(
            fd,
            (&raw mut addr).cast(),
            &raw mut len,
            libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
        )
    };
    if conn < 0 {
        return Err(io::Error::last_os_error());
    }

    // SAFETY: accept4 returned a fresh descriptor that nothing else owns.
    Ok((unsafe { OwnedFd::from_raw_fd(conn) }, sockaddr_to_endpoint(&addr)))
}

/// Accepts one pending connection on a local (pipe) listener.
pub(crate) fn accept_unix(fd: RawFd) -> io::Result<OwnedFd> {
    // SAFETY: Null address output is allowed; we do not need the peer name.
    let conn = unsafe {
        libc::accept4(
            fd,
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
        )
    };
    if conn < 0 {
        return Err(io::Error::last_os_error());
    }

    // SAFETY: accept4 returned a fresh descriptor that nothing else owns.
    Ok(unsafe { OwnedFd::from_raw_fd(conn) })
}

/// Retrieves and clears the deferred error of a non-blocking connect.
/// Returns `None` when the connect actually succeeded.
pub(crate) fn take_socket_error(fd: RawFd) -> io::Result<Option<io::Error>> {
    let mut error: libc::c_int = 0;
    let mut len = libc::socklen_t::try_from(mem::size_of::<libc::c_int>()).unwrap_or(0);

    // SAFETY: The output buffer and its length outlive the call.
    check(unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            (&raw mut error).cast(),
            &raw mut len,
        )
    })?;

    if error == 0 {
        return Ok(None);
    }
    Ok(Some(io::Error::from_raw_os_error(error)))
}

pub(crate) fn local_endpoint(fd: RawFd) -> io::Result<IpEndpoint> {
    // SAFETY: sockaddr_in is a plain-old-data struct; all-zeroes is valid.
    let mut addr: libc::sockaddr_in = unsafe { mem::zeroed() };
    let mut len = libc::socklen_t::try_from(mem::size_of::<libc::sockaddr_in>()).unwrap_or(0);

    // SAFETY: The address buffer and its length outlive the call.
    check(unsafe { libc::getsockname(fd, (&raw mut addr).cast(), &raw mut len) })?;
    Ok(sockaddr_to_endpoint(&addr))
}

/// Sends one chunk. Partial transfers are reported, never retried here.
pub(crate) fn send(fd: RawFd, data: &[u8]) -> io::Result<usize> {
    // SAFETY: The data slice outlives the call and the length matches.
    // MSG_NOSIGNAL turns a dead peer into an error return instead of SIGPIPE.
    check_len(unsafe {
        libc::send(fd, data.as_ptr().cast(), data.len(), libc::MSG_NOSIGNAL)
    })
}

pub(crate) fn send_to(fd: RawFd, data: &[u8], endpoint: IpEndpoint) -> io::Result<usize> {
    let addr = endpoint_to_sockaddr(endpoint);

    // SAFETY: The data slice and the address outlive the call; the lengths match.
    check_len(unsafe {
        libc::sendto(
            fd,
            data.as_ptr().cast(),
            data.len(),
            libc::MSG_NOSIGNAL,
            (&raw const addr).cast(),
            libc::socklen_t::try_from(mem::size_of::<libc::sockaddr_in>()).unwrap_or(0),
        )
    })
}

/// Receives one chunk into the spare capacity of `buffer`, growing its length
/// by the number of bytes transferred. A return of zero on a stream socket is
/// the peer's graceful close.
pub(crate) fn recv(fd: RawFd, buffer: &mut BytesMut) -> io::Result<usize> {
    let spare = buffer.spare_capacity_mut();

    // SAFETY: The spare-capacity region outlives the call and the kernel
    // writes at most `spare.len()` bytes into it.
    let n = check_len(unsafe {
        libc::recv(fd, spare.as_mut_ptr().cast(), spare.len(), 0)
    })?;

    // SAFETY: The kernel initialized exactly `n` bytes past the current length.
    unsafe { buffer.set_len(buffer.len() + n) };
    Ok(n)
}

pub(crate) fn recv_from(fd: RawFd, buffer: &mut BytesMut) -> io::Result<(usize, IpEndpoint)> {
    // SAFETY: sockaddr_in is a plain-old-data struct; all-zeroes is valid.
    let mut addr: libc::sockaddr_in = unsafe { mem::zeroed() };
    let mut len = libc::socklen_t::try_from(mem::size_of::<libc::sockaddr_in>()).unwrap_or(0);

    let spare = buffer.spare_capacity_mut();

    // SAFETY: The spare-capacity region, the address buffer and its length
    // all outlive the call; the kernel writes at most `spare.len()` bytes.
    let n = check_len(unsafe {
        libc::recvfrom(
            fd,
            spare.as_mut_ptr().cast(),
            spare.len(),
            0,
            (&raw mut addr).cast(),
            &raw mut len,
        )
    })?;

    // SAFETY: The kernel initialized exactly `n` bytes past the current length.
    unsafe { buffer.set_len(buffer.len() + n) };
    Ok((n, sockaddr_to_endpoint(&addr)))
}

/// Copies up to the spare capacity of `buffer` without consuming anything and
/// reports the full length of the next message (which may exceed the copy).
pub(crate) fn peek_message(fd: RawFd, buffer: &mut BytesMut) -> io::Result<(usize, usize)> {
    let spare = buffer.spare_capacity_mut();

    // SAFETY: The spare-capacity region outlives the call. With MSG_TRUNC the
    // return value is the real message length, but the kernel still writes at
    // most `spare.len()` bytes.
    let full = check_len(unsafe {
        libc::recv(
            fd,
            spare.as_mut_ptr().cast(),
            spare.len(),
            libc::MSG_PEEK | libc::MSG_TRUNC | libc::MSG_DONTWAIT,
        )
    })?;

    let copied = full.min(buffer.capacity() - buffer.len());
    // SAFETY: The kernel initialized exactly `copied` bytes past the current length.
    unsafe { buffer.set_len(buffer.len() + copied) };
    Ok((full, copied))
}

/// Copies up to the spare capacity of `buffer` from a byte stream without
/// consuming anything.
pub(crate) fn peek_stream(fd: RawFd, buffer: &mut BytesMut) -> io::Result<usize> {
    let spare = buffer.spare_capacity_mut();

    // SAFETY: The spare-capacity region outlives the call and the kernel
    // writes at most `spare.len()` bytes into it.
    let n = check_len(unsafe {
        libc::recv(
            fd,
            spare.as_mut_ptr().cast(),
            spare.len(),
            libc::MSG_PEEK | libc::MSG_DONTWAIT,
        )
    })?;

    // SAFETY: The kernel initialized exactly `n` bytes past the current length.
    unsafe { buffer.set_len(buffer.len() + n) };
    Ok(n)
}

/// Number of bytes that can be read without blocking (for message sockets,
/// the size of the next message).
pub(crate) fn bytes_available(fd: RawFd) -> io::Result<usize> {
    let mut available: libc::c_int = 0;

    // SAFETY: The output buffer outlives the call.
    check(unsafe { libc::ioctl(fd, libc::FIONREAD, &raw mut available) })?;
    Ok(usize::try_from(available).unwrap_or(0))
}

pub(crate) fn shutdown(fd: RawFd, how: libc::c_int) -> io::Result<()> {
    // SAFETY: No pointer arguments.
    check(unsafe { libc::shutdown(fd, how) })
}

pub(crate) fn set_buffer_sizes(fd: RawFd, send: usize, recv: usize) -> io::Result<()> {
    for (option, size) in [(libc::SO_SNDBUF, send), (libc::SO_RCVBUF, recv)] {
        if size == 0 {
            continue;
        }
        let value = libc::c_int::try_from(size).unwrap_or(libc::c_int::MAX);

        // SAFETY: The value outlives the call and the length matches.
        check(unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                option,
                (&raw const value).cast(),
                libc::socklen_t::try_from(mem::size_of::<libc::c_int>()).unwrap_or(0),
            )
        })?;
    }
    Ok(())
}

/// Replaces the open file description behind `target` with the one behind
/// `replacement`, keeping the descriptor number stable.
///
/// This is how an accepted connection is transplanted into a pre-created
/// socket object and how a disconnected socket is atomically renewed for
/// reuse: everything holding the old descriptor number now refers to the new
/// description.
pub(crate) fn transplant(target: RawFd, replacement: OwnedFd) -> io::Result<()> {
    // SAFETY: Both descriptors are valid; dup2 atomically closes the old
    // description behind `target`.
    let rc = unsafe { libc::dup2(replacement.as_raw_fd(), target) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }

    // The replacement served its purpose; its original number closes here.
    drop(replacement);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_sockaddr_round_trip() {
        let original = IpEndpoint::new(Ipv4Addr::new(192, 168, 4, 17), 8080);

        let addr = endpoint_to_sockaddr(original);
        assert_eq!(sockaddr_to_endpoint(&addr), original);
    }

    #[test]
    fn unix_address_rejects_oversized_name() {
        let long = "x".repeat(200);
        let error = sockaddr_un(Path::new(&long)).unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn tcp_socket_is_nonblocking() {
        let fd = new_tcp().unwrap();

        // SAFETY: No pointer arguments.
        let flags = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_GETFL) };
        assert!(flags & libc::O_NONBLOCK != 0);
    }

    #[test]
    fn loopback_bind_reports_local_endpoint() {
        let fd = new_udp().unwrap();
        bind_ipv4(fd.as_raw_fd(), IpEndpoint::loopback(0)).unwrap();

        let local = local_endpoint(fd.as_raw_fd()).unwrap();
        assert_eq!(local.address(), Ipv4Addr::LOCALHOST);
        assert_ne!(local.port(), 0);
    }
}

//! `SCM_RIGHTS` descriptor passing over Unix stream sockets.
//!
//! The kernel installs a fresh duplicate of every attached descriptor in the
//! receiving process. The sender's descriptors are only borrowed for the
//! duration of the call and stay open afterwards.

use std::io;
use std::os::unix::io::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd};
use std::os::unix::net::UnixStream;

/// Ancillary buffer size for `count` descriptors.
fn cmsg_space(count: usize) -> usize {
    let bytes = (count * std::mem::size_of::<libc::c_int>()) as libc::c_uint;
    // SAFETY: CMSG_SPACE is pure arithmetic on its argument.
    unsafe { libc::CMSG_SPACE(bytes) as usize }
}

/// Send `data` with `fds` attached as `SCM_RIGHTS`, in one `sendmsg` call.
///
/// Uses `MSG_NOSIGNAL`, so a closed peer yields `EPIPE`. Returns the number
/// of bytes the kernel accepted; callers that need the message delivered
/// whole must compare it with `data.len()`.
pub fn send_with_fds(stream: &UnixStream, data: &[u8], fds: &[BorrowedFd<'_>]) -> io::Result<usize> {
    let sock_fd = stream.as_raw_fd();
    let space = if fds.is_empty() { 0 } else { cmsg_space(fds.len()) };
    // u64 backing keeps the buffer aligned for cmsghdr.
    let mut cmsg_buf = vec![0u64; space.div_ceil(8)];

    let mut iov = libc::iovec {
        iov_base: data.as_ptr() as *mut libc::c_void,
        iov_len: data.len(),
    };

    // SAFETY: msghdr is plain data; all-zero is a valid empty header.
    let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;

    if !fds.is_empty() {
        msg.msg_control = cmsg_buf.as_mut_ptr().cast::<libc::c_void>();
        msg.msg_controllen = space as _;

        let fd_bytes = (fds.len() * std::mem::size_of::<libc::c_int>()) as libc::c_uint;
        // SAFETY: msg_control points at `space` zeroed, aligned bytes, which
        // CMSG_SPACE sized for exactly one header carrying `fds.len()` ints.
        unsafe {
            let cmsg = libc::CMSG_FIRSTHDR(&msg);
            (*cmsg).cmsg_level = libc::SOL_SOCKET;
            (*cmsg).cmsg_type = libc::SCM_RIGHTS;
            (*cmsg).cmsg_len = libc::CMSG_LEN(fd_bytes) as _;
            let data_ptr = libc::CMSG_DATA(cmsg).cast::<libc::c_int>();
            for (i, fd) in fds.iter().enumerate() {
                std::ptr::write_unaligned(data_ptr.add(i), fd.as_raw_fd());
            }
        }
    }

    loop {
        // SAFETY: every pointer in `msg` refers to buffers that live until
        // the call returns.
        let n = unsafe { libc::sendmsg(sock_fd, &msg, libc::MSG_NOSIGNAL) };
        if n >= 0 {
            return Ok(n as usize);
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

/// Receive up to `max_bytes` from `stream`, collecting up to `max_fds`
/// descriptors passed via `SCM_RIGHTS`.
///
/// Received descriptors are close-on-exec and owned by the caller. If the
/// sender attached more than `max_fds`, the kernel truncates the list and
/// this returns `InvalidData` (the descriptors that did arrive are closed).
pub fn recv_with_fds(
    stream: &UnixStream,
    max_bytes: usize,
    max_fds: usize,
) -> io::Result<(Vec<u8>, Vec<OwnedFd>)> {
    let sock_fd = stream.as_raw_fd();
    let mut data_buf = vec![0u8; max_bytes];
    let space = cmsg_space(max_fds.max(1));
    let mut cmsg_buf = vec![0u64; space.div_ceil(8)];

    let mut iov = libc::iovec {
        iov_base: data_buf.as_mut_ptr().cast::<libc::c_void>(),
        iov_len: data_buf.len(),
    };
    // SAFETY: msghdr is plain data; all-zero is a valid empty header.
    let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = cmsg_buf.as_mut_ptr().cast::<libc::c_void>();
    msg.msg_controllen = space as _;

    let n = loop {
        // SAFETY: `msg` points at `data_buf` and `cmsg_buf`, both alive for
        // the duration of the call.
        let n = unsafe { libc::recvmsg(sock_fd, &mut msg, libc::MSG_CMSG_CLOEXEC) };
        if n >= 0 {
            break n as usize;
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    };
    data_buf.truncate(n);

    // Extract FDs from ancillary data.
    let mut fds = Vec::new();
    // SAFETY: the kernel filled `msg_control`/`msg_controllen`; the CMSG
    // macros walk only within that range, and each SCM_RIGHTS payload holds
    // freshly installed descriptors that nothing else owns yet.
    unsafe {
        let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
        while !cmsg.is_null() {
            if (*cmsg).cmsg_level == libc::SOL_SOCKET && (*cmsg).cmsg_type == libc::SCM_RIGHTS {
                let data = libc::CMSG_DATA(cmsg).cast::<libc::c_int>();
                let fd_count = ((*cmsg).cmsg_len as usize - libc::CMSG_LEN(0) as usize)
                    / std::mem::size_of::<libc::c_int>();
                for i in 0..fd_count {
                    let fd = std::ptr::read_unaligned(data.add(i));
                    fds.push(OwnedFd::from_raw_fd(fd));
                }
            }
            cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
        }
    }

    if msg.msg_flags & libc::MSG_CTRUNC != 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("ancillary data truncated, more than {max_fds} descriptors sent"),
        ));
    }

    Ok((data_buf, fds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::os::unix::io::AsFd;

    /// Create a `pipe()` pair as owned descriptors.
    fn make_pipe() -> (std::fs::File, std::fs::File) {
        let mut fds = [0i32; 2];
        // SAFETY: `pipe` writes exactly two valid FDs into `fds` on success.
        let ret = unsafe { libc::pipe(fds.as_mut_ptr()) };
        assert_eq!(ret, 0, "pipe() failed: {}", io::Error::last_os_error());
        // SAFETY: both descriptors were just created and are owned by nobody else.
        unsafe {
            (
                std::fs::File::from_raw_fd(fds[0]),
                std::fs::File::from_raw_fd(fds[1]),
            )
        }
    }

    #[test]
    fn passes_descriptors_in_order() {
        let (sender, receiver) = UnixStream::pair().expect("pair");
        let (read_a, mut write_a) = make_pipe();
        let (read_b, mut write_b) = make_pipe();

        let n = send_with_fds(&sender, b"two fds", &[read_a.as_fd(), read_b.as_fd()])
            .expect("send");
        assert_eq!(n, 7);

        let (data, fds) = recv_with_fds(&receiver, 64, 4).expect("recv");
        assert_eq!(&data, b"two fds");
        assert_eq!(fds.len(), 2);

        write_a.write_all(b"A").expect("write a");
        write_b.write_all(b"B").expect("write b");
        let mut got_a = std::fs::File::from(fds[0].try_clone().expect("dup"));
        let mut got_b = std::fs::File::from(fds[1].try_clone().expect("dup"));
        let mut byte = [0u8; 1];
        got_a.read_exact(&mut byte).expect("read a");
        assert_eq!(&byte, b"A");
        got_b.read_exact(&mut byte).expect("read b");
        assert_eq!(&byte, b"B");
    }

    #[test]
    fn sender_keeps_its_descriptor() {
        let (sender, receiver) = UnixStream::pair().expect("pair");
        let (read_end, mut write_end) = make_pipe();

        send_with_fds(&sender, b"x", &[read_end.as_fd()]).expect("send");
        let (_data, fds) = recv_with_fds(&receiver, 16, 1).expect("recv");
        drop(fds);

        // Receiver closed its duplicate; the original still works.
        write_end.write_all(b"still here").expect("write");
        let mut buf = [0u8; 10];
        (&read_end).read_exact(&mut buf).expect("read original");
        assert_eq!(&buf, b"still here");
    }

    #[test]
    fn plain_message_without_descriptors() {
        let (sender, receiver) = UnixStream::pair().expect("pair");
        send_with_fds(&sender, b"no fds", &[]).expect("send");
        let (data, fds) = recv_with_fds(&receiver, 16, 0).expect("recv");
        assert_eq!(&data, b"no fds");
        assert!(fds.is_empty());
    }

    #[test]
    fn closed_peer_is_epipe() {
        let (sender, receiver) = UnixStream::pair().expect("pair");
        drop(receiver);
        let (read_end, _write_end) = make_pipe();
        let err = send_with_fds(&sender, b"x", &[read_end.as_fd()]).expect_err("closed");
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}

//! FUSE device transport: framed reads and vectored, atomic reply writes.
//!
//! The device handle is an already-open descriptor to the kernel's FUSE
//! character device; mounting and obtaining it happen outside this crate.
//! Reads and writes on the device are independent, so the handle is shared
//! between one reader and one writer half. Each half runs a blocking loop on
//! its own OS thread, bridged to the async dispatcher through the queues.
//!
//! All multi-byte integers are little endian on the wire.

use std::{
    io::{IoSlice, IoSliceMut},
    os::fd::{FromRawFd, OwnedFd, RawFd},
    sync::Arc,
};

use bytes::{Bytes, BytesMut};
use nix::{
    errno::Errno,
    sys::uio::{readv, writev},
};
use sinter_proto::{HeaderError, MIN_RECV_BUFFER, RequestHeader, ResponseHeader};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::dispatch::{Reply, ReplyBody};

/// Errors surfaced by the device transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The kernel tore down the mount (`ENODEV`). This ends the session
    /// cleanly; it is not a failure of the filesystem.
    #[error("filesystem was unmounted")]
    Unmounted,

    /// The device handle reported end of file.
    #[error("device handle closed")]
    Closed,

    /// No usable device descriptor could be produced from the given source.
    #[error("no usable device descriptor in {0}")]
    BadDescriptor(String),

    /// Receive buffer below the kernel minimum.
    #[error("receive buffer of {0} bytes is below the {MIN_RECV_BUFFER}-byte minimum")]
    BufferTooSmall(usize),

    /// A read returned fewer bytes than a request header.
    #[error("short read: {0} bytes is less than a request header")]
    ShortRead(usize),

    /// The follow-up read did not return the advertised remainder.
    #[error("remainder read returned {actual} bytes, expected {expected}")]
    ShortRemainder {
        /// Bytes the frame length still promised
        expected: usize,
        /// Bytes the read produced
        actual: usize,
    },

    /// A reply write was torn across the frame boundary.
    #[error("short write: {actual} of {expected} bytes")]
    ShortWrite {
        /// Full frame length
        expected: usize,
        /// Bytes the write accepted
        actual: usize,
    },

    /// Malformed request header.
    #[error(transparent)]
    Header(#[from] HeaderError),

    /// Any other I/O failure on the device handle.
    #[error("device I/O failed: {0}")]
    Io(Errno),
}

fn map_errno(errno: Errno) -> TransportError {
    if errno == Errno::ENODEV { TransportError::Unmounted } else { TransportError::Io(errno) }
}

/// Owned handle to the FUSE character device.
///
/// [`split`](Self::split) produces the reader and writer halves used by the
/// two I/O loops.
#[derive(Debug)]
pub struct FuseDevice {
    fd: Arc<OwnedFd>,
    bufsize: usize,
}

impl FuseDevice {
    /// Wrap an already-open device handle with the default receive buffer.
    #[must_use]
    pub fn new(fd: OwnedFd) -> Self {
        Self { fd: Arc::new(fd), bufsize: MIN_RECV_BUFFER }
    }

    /// Wrap a handle with a custom receive buffer size.
    ///
    /// # Errors
    ///
    /// - [`TransportError::BufferTooSmall`] below the 8192-byte minimum
    pub fn with_buffer_size(fd: OwnedFd, bufsize: usize) -> Result<Self, TransportError> {
        if bufsize < MIN_RECV_BUFFER {
            return Err(TransportError::BufferTooSmall(bufsize));
        }
        Ok(Self { fd: Arc::new(fd), bufsize })
    }

    /// Take ownership of a raw descriptor number.
    ///
    /// # Errors
    ///
    /// - [`TransportError::BadDescriptor`] for a negative descriptor
    /// - [`TransportError::BufferTooSmall`] below the 8192-byte minimum
    pub fn from_raw(fd: RawFd, bufsize: usize) -> Result<Self, TransportError> {
        if fd < 0 {
            return Err(TransportError::BadDescriptor(fd.to_string()));
        }
        // SAFETY: the caller hands over this descriptor for exclusive use,
        // the way the kernel mount helper does; nothing else in the process
        // owns it.
        #[allow(unsafe_code)]
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };
        Self::with_buffer_size(fd, bufsize)
    }

    /// Take the descriptor number from the environment variable `var`.
    ///
    /// # Errors
    ///
    /// - [`TransportError::BadDescriptor`] if the variable is missing or does
    ///   not hold a descriptor number
    /// - [`TransportError::BufferTooSmall`] below the 8192-byte minimum
    pub fn from_env(var: &str, bufsize: usize) -> Result<Self, TransportError> {
        let raw: RawFd = std::env::var(var)
            .ok()
            .and_then(|value| value.parse().ok())
            .ok_or_else(|| TransportError::BadDescriptor(format!("${var}")))?;
        Self::from_raw(raw, bufsize)
    }

    /// Split into the receive and send halves used by the two I/O loops.
    #[must_use]
    pub fn split(self) -> (DeviceReader, DeviceWriter) {
        let reader = DeviceReader { fd: Arc::clone(&self.fd), buf: vec![0; self.bufsize] };
        let writer = DeviceWriter { fd: self.fd, scratch: [0; ResponseHeader::SIZE] };
        (reader, writer)
    }
}

/// Receive half: owns the receive buffer exclusively.
#[derive(Debug)]
pub struct DeviceReader {
    fd: Arc<OwnedFd>,
    buf: Vec<u8>,
}

impl DeviceReader {
    /// Read one framed request. Blocks until the kernel produces one.
    ///
    /// The body is copied out of the shared buffer, so it stays valid across
    /// later receives. A frame larger than the buffer is completed with a
    /// second read, into the buffer when the remainder fits and into a fresh
    /// allocation otherwise.
    ///
    /// # Errors
    ///
    /// - [`TransportError::Unmounted`] when the device reports `ENODEV`
    /// - [`TransportError::Closed`] on end of file
    /// - [`TransportError::ShortRead`] / [`TransportError::ShortRemainder`]
    ///   on truncated frames
    /// - [`TransportError::Io`] for any other device failure
    pub fn receive(&mut self) -> Result<(RequestHeader, Bytes), TransportError> {
        let got = read_into(&self.fd, &mut self.buf)?;
        if got == 0 {
            return Err(TransportError::Closed);
        }
        if got < RequestHeader::SIZE {
            return Err(TransportError::ShortRead(got));
        }

        let header = *RequestHeader::from_prefix(&self.buf[..got])?;
        let total = header.total_len() as usize;

        let first = got.min(total);
        let mut body = BytesMut::with_capacity(total - RequestHeader::SIZE);
        body.extend_from_slice(&self.buf[RequestHeader::SIZE..first]);

        if total > got {
            let remainder = total - got;
            if remainder <= self.buf.len() {
                let extra = read_into(&self.fd, &mut self.buf[..remainder])?;
                if extra != remainder {
                    return Err(TransportError::ShortRemainder {
                        expected: remainder,
                        actual: extra,
                    });
                }
                body.extend_from_slice(&self.buf[..remainder]);
            } else {
                let mut spill = vec![0u8; remainder];
                let extra = read_into(&self.fd, &mut spill)?;
                if extra != remainder {
                    return Err(TransportError::ShortRemainder {
                        expected: remainder,
                        actual: extra,
                    });
                }
                body.extend_from_slice(&spill);
            }
        }

        Ok((header, body.freeze()))
    }

    /// Receive loop: push frames onto `inbound` until stop or failure.
    ///
    /// Exits cleanly when the dispatcher drops the inbound queue. Unmount
    /// and other device errors are returned to the session runner.
    ///
    /// # Errors
    ///
    /// Any [`TransportError`] from [`Self::receive`].
    pub fn run(mut self, inbound: mpsc::Sender<(RequestHeader, Bytes)>) -> Result<(), TransportError> {
        loop {
            match self.receive() {
                Ok(message) => {
                    if inbound.blocking_send(message).is_err() {
                        tracing::debug!("inbound queue closed; receive loop exiting");
                        return Ok(());
                    }
                }
                Err(err) => {
                    match &err {
                        TransportError::Unmounted => tracing::info!("device unmounted"),
                        TransportError::Closed => tracing::info!("device handle closed"),
                        other => tracing::error!(%other, "receive loop failed"),
                    }
                    return Err(err);
                }
            }
        }
    }
}

/// Send half: owns the 16-byte header scratch. The send loop is the only
/// writer, which keeps reply frames whole and in enqueue order.
#[derive(Debug)]
pub struct DeviceWriter {
    fd: Arc<OwnedFd>,
    scratch: [u8; ResponseHeader::SIZE],
}

impl DeviceWriter {
    /// Write one framed reply. The no-reply marker writes nothing.
    ///
    /// Header and body go out in a single vectored write so the frame cannot
    /// be torn by a concurrent writer.
    ///
    /// # Errors
    ///
    /// - [`TransportError::Unmounted`] when the device reports `ENODEV`
    /// - [`TransportError::ShortWrite`] if the write was not accepted whole
    /// - [`TransportError::Io`] for any other device failure
    pub fn send(&mut self, reply: &Reply) -> Result<(), TransportError> {
        let body = match &reply.body {
            ReplyBody::NoReply => return Ok(()),
            ReplyBody::Bytes(bytes) => bytes,
        };

        let header = ResponseHeader::new(reply.errno, reply.header.unique(), body.len());
        self.scratch = header.to_bytes();

        let total = ResponseHeader::SIZE + body.len();
        let iov = [IoSlice::new(&self.scratch), IoSlice::new(body)];
        let sent = loop {
            match writev(&self.fd, &iov) {
                Ok(sent) => break sent,
                Err(Errno::EINTR) => {}
                Err(err) => return Err(map_errno(err)),
            }
        };

        if sent != total {
            return Err(TransportError::ShortWrite { expected: total, actual: sent });
        }
        Ok(())
    }

    /// Send loop: drain `outbound` until it closes or the device fails.
    ///
    /// # Errors
    ///
    /// Any [`TransportError`] from [`Self::send`].
    pub fn run(mut self, mut outbound: mpsc::Receiver<Reply>) -> Result<(), TransportError> {
        while let Some(reply) = outbound.blocking_recv() {
            if let Err(err) = self.send(&reply) {
                match &err {
                    TransportError::Unmounted => tracing::info!("device unmounted"),
                    other => tracing::error!(%other, "send loop failed"),
                }
                return Err(err);
            }
        }
        tracing::debug!("outbound queue drained; send loop exiting");
        Ok(())
    }
}

fn read_into(fd: &OwnedFd, buf: &mut [u8]) -> Result<usize, TransportError> {
    let mut iov = [IoSliceMut::new(buf)];
    loop {
        match readv(fd, &mut iov) {
            Ok(got) => return Ok(got),
            Err(Errno::EINTR) => {}
            Err(err) => return Err(map_errno(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::{Read, Write},
        os::unix::net::UnixStream,
    };

    use super::*;

    fn device_pair() -> (FuseDevice, UnixStream) {
        let (ours, kernel) = UnixStream::pair().unwrap();
        (FuseDevice::new(OwnedFd::from(ours)), kernel)
    }

    fn frame(opcode: u32, unique: u64, nodeid: u64, body: &[u8]) -> Vec<u8> {
        let mut header = RequestHeader::new(opcode, unique.to_le_bytes(), nodeid);
        header.set_total_len((RequestHeader::SIZE + body.len()) as u32);
        let mut bytes = header.to_bytes().to_vec();
        bytes.extend_from_slice(body);
        bytes
    }

    #[test]
    fn rejects_small_buffer() {
        let (ours, _kernel) = UnixStream::pair().unwrap();
        let result = FuseDevice::with_buffer_size(OwnedFd::from(ours), 512);
        assert_eq!(result.unwrap_err(), TransportError::BufferTooSmall(512));
    }

    #[test]
    fn from_env_rejects_garbage() {
        let err = FuseDevice::from_env("SINTER_TEST_NO_SUCH_VAR", MIN_RECV_BUFFER).unwrap_err();
        assert_eq!(err, TransportError::BadDescriptor("$SINTER_TEST_NO_SUCH_VAR".to_string()));
    }

    #[test]
    fn from_raw_rejects_negative() {
        let err = FuseDevice::from_raw(-1, MIN_RECV_BUFFER).unwrap_err();
        assert_eq!(err, TransportError::BadDescriptor("-1".to_string()));
    }

    #[test]
    fn receives_one_frame() {
        let (device, mut kernel) = device_pair();
        let (mut reader, _writer) = device.split();

        kernel.write_all(&frame(1, 7, 1, b"hello\0")).unwrap();

        let (header, body) = reader.receive().unwrap();
        assert_eq!(header.opcode(), 1);
        assert_eq!(header.unique(), 7u64.to_le_bytes());
        assert_eq!(header.nodeid(), 1);
        assert_eq!(body.as_ref(), b"hello\0");
    }

    #[test]
    fn received_body_outlives_next_receive() {
        let (device, mut kernel) = device_pair();
        let (mut reader, _writer) = device.split();

        kernel.write_all(&frame(1, 1, 1, b"first\0")).unwrap();
        let (_header, first) = reader.receive().unwrap();

        kernel.write_all(&frame(1, 2, 1, b"second\0")).unwrap();
        let (_header, second) = reader.receive().unwrap();

        assert_eq!(first.as_ref(), b"first\0");
        assert_eq!(second.as_ref(), b"second\0");
    }

    #[test]
    fn receive_reports_closed_on_eof() {
        let (device, kernel) = device_pair();
        let (mut reader, _writer) = device.split();
        drop(kernel);

        assert_eq!(reader.receive().unwrap_err(), TransportError::Closed);
    }

    #[test]
    fn receive_rejects_runt_frame() {
        let (device, mut kernel) = device_pair();
        let (mut reader, _writer) = device.split();

        kernel.write_all(&[1, 2, 3]).unwrap();
        assert_eq!(reader.receive().unwrap_err(), TransportError::ShortRead(3));
    }

    #[test]
    fn send_frames_header_and_body_atomically() {
        let (device, mut kernel) = device_pair();
        let (_reader, mut writer) = device.split();

        let request = RequestHeader::new(1, 9u64.to_le_bytes(), 1);
        let reply = Reply {
            header: request,
            errno: 0,
            body: ReplyBody::Bytes(Bytes::from_static(b"abcd")),
        };
        writer.send(&reply).unwrap();

        let mut wire = [0u8; 20];
        kernel.read_exact(&mut wire).unwrap();
        assert_eq!(&wire[0..4], &20u32.to_le_bytes());
        assert_eq!(&wire[4..8], &0i32.to_le_bytes());
        assert_eq!(&wire[8..16], &9u64.to_le_bytes());
        assert_eq!(&wire[16..20], b"abcd");
    }

    #[test]
    fn send_negates_errno_on_the_wire() {
        let (device, mut kernel) = device_pair();
        let (_reader, mut writer) = device.split();

        let request = RequestHeader::new(1, 3u64.to_le_bytes(), 1);
        let reply = Reply { header: request, errno: 2, body: ReplyBody::Bytes(Bytes::new()) };
        writer.send(&reply).unwrap();

        let mut wire = [0u8; 16];
        kernel.read_exact(&mut wire).unwrap();
        assert_eq!(&wire[0..4], &16u32.to_le_bytes());
        assert_eq!(&wire[4..8], &[0xfe, 0xff, 0xff, 0xff]);
        assert_eq!(&wire[8..16], &3u64.to_le_bytes());
    }

    #[test]
    fn no_reply_marker_writes_nothing() {
        let (device, mut kernel) = device_pair();
        let (_reader, mut writer) = device.split();

        let request = RequestHeader::new(2, 4u64.to_le_bytes(), 1);
        writer.send(&Reply { header: request, errno: 0, body: ReplyBody::NoReply }).unwrap();

        // A follow-up real reply is the first thing on the wire.
        let reply = Reply { header: request, errno: 0, body: ReplyBody::Bytes(Bytes::new()) };
        writer.send(&reply).unwrap();

        let mut wire = [0u8; 16];
        kernel.read_exact(&mut wire).unwrap();
        assert_eq!(&wire[0..4], &16u32.to_le_bytes());
    }

    #[test]
    fn enodev_maps_to_unmounted() {
        assert_eq!(map_errno(Errno::ENODEV), TransportError::Unmounted);
        assert_eq!(map_errno(Errno::EIO), TransportError::Io(Errno::EIO));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn loops_bridge_to_queues() {
        let (device, mut kernel) = device_pair();
        let (reader, writer) = device.split();

        let (inbound_tx, mut inbound_rx) = mpsc::channel(8);
        let (outbound_tx, outbound_rx) = mpsc::channel(8);

        let reader_thread = std::thread::spawn(move || reader.run(inbound_tx));
        let writer_thread = std::thread::spawn(move || writer.run(outbound_rx));

        kernel.write_all(&frame(3, 11, 1, b"")).unwrap();
        let (header, body) = inbound_rx.recv().await.unwrap();
        assert_eq!(header.opcode(), 3);
        assert!(body.is_empty());

        outbound_tx
            .send(Reply { header, errno: 0, body: ReplyBody::Bytes(Bytes::from_static(b"ok")) })
            .await
            .unwrap();

        let mut wire = [0u8; 18];
        kernel.read_exact(&mut wire).unwrap();
        assert_eq!(&wire[0..4], &18u32.to_le_bytes());
        assert_eq!(&wire[8..16], &11u64.to_le_bytes());
        assert_eq!(&wire[16..18], b"ok");

        // Closing the queues ends the loops.
        drop(inbound_rx);
        drop(outbound_tx);
        kernel.write_all(&frame(3, 12, 1, b"")).unwrap();

        assert!(reader_thread.join().unwrap().is_ok());
        assert!(writer_thread.join().unwrap().is_ok());
    }
}

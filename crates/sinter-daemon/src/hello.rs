//! The built-in hello filesystem: one file under the root.
//!
//! Serves a single read-only file `hello` containing `hello, world`. Small
//! enough to read in one sitting, but it exercises the whole pipeline:
//! C-string lookup, nested attr structs, dirent lists and the no-reply path.

use nix::errno::Errno;
use sinter_core::{FuseError, HandlerTable, Response, no_reply};
use sinter_proto::{FieldMap, ROOT_INODE, RequestHeader};

/// Name of the single file.
pub const HELLO_NAME: &[u8] = b"hello";

/// Content of the single file.
pub const HELLO_CONTENT: &[u8] = b"hello, world";

/// Node id of the single file.
pub const HELLO_INODE: u64 = ROOT_INODE + 1;

const DIR_MODE: u32 = 0o040_755;
const FILE_MODE: u32 = 0o100_644;

fn attrs(ino: u64, size: u64, mode: u32, nlink: u32) -> FieldMap {
    FieldMap::new()
        .with("ino", ino)
        .with("size", size)
        .with("blocks", 1u64)
        .with("timeandmode", FieldMap::new().with("mode", mode))
        .with("nlink", nlink)
        .with("blksize", 512u32)
}

fn root_attrs() -> FieldMap {
    attrs(ROOT_INODE, 0, DIR_MODE, 1)
}

fn hello_attrs() -> FieldMap {
    attrs(HELLO_INODE, HELLO_CONTENT.len() as u64, FILE_MODE, 1)
}

/// Static version reply; no real negotiation.
async fn init(_header: RequestHeader, request: FieldMap) -> Result<(i32, Response), FuseError> {
    tracing::debug!(
        major = request.uint("major"),
        minor = request.uint("minor"),
        "kernel offered protocol version"
    );
    Ok((
        0,
        Response::Fields(
            FieldMap::new()
                .with("major", 7u32)
                .with("minor", 31u32)
                .with("maxReadAhead", u32::MAX)
                .with("flags", 0u32)
                .with("maxBackground", 4u32)
                .with("congestionThreshold", 4u32)
                .with("maxWrite", 4096u32)
                .with("timeGran", 1u32)
                .with("maxPages", 16u32),
        ),
    ))
}

async fn getattr(header: RequestHeader, _request: FieldMap) -> Result<(i32, Response), FuseError> {
    let attr = if header.nodeid() == ROOT_INODE { root_attrs() } else { hello_attrs() };
    Ok((0, Response::Fields(FieldMap::new().with("attr", attr))))
}

async fn lookup(header: RequestHeader, request: FieldMap) -> Result<(i32, Response), FuseError> {
    if header.nodeid() != ROOT_INODE || request.bytes("name") != Some(HELLO_NAME) {
        return Err(FuseError::from(Errno::ENOENT));
    }
    let entry = FieldMap::new().with("nodeId", HELLO_INODE).with("attr", hello_attrs());
    Ok((0, Response::Fields(FieldMap::new().with("entry", entry))))
}

async fn open(header: RequestHeader, _request: FieldMap) -> Result<(i32, Response), FuseError> {
    Ok((0, Response::Fields(FieldMap::new().with("fh", header.nodeid()))))
}

async fn readdir(header: RequestHeader, request: FieldMap) -> Result<(i32, Response), FuseError> {
    if header.nodeid() != ROOT_INODE {
        return Err(FuseError::from(Errno::ENOENT));
    }
    if request.uint("cookie") != Some(0) {
        // Listing exhausted.
        return Ok((0, Response::Fields(FieldMap::new())));
    }

    let entry = FieldMap::new()
        .with("ino", HELLO_INODE)
        .with("cookie", 1u64)
        .with("namelen", HELLO_NAME.len() as u32)
        .with("type", FILE_MODE >> 12)
        .with("name", HELLO_NAME);
    Ok((0, Response::Fields(FieldMap::new().with("data", vec![entry]))))
}

async fn read(_header: RequestHeader, _request: FieldMap) -> Result<(i32, Response), FuseError> {
    Ok((0, Response::Fields(FieldMap::new().with("data", HELLO_CONTENT))))
}

/// Handler table for the hello filesystem.
#[must_use]
pub fn handlers() -> HandlerTable {
    let mut table = HandlerTable::new();
    table.register("FUSE_INIT", init);
    table.register("FUSE_GETATTR", getattr);
    table.register("FUSE_LOOKUP", lookup);
    table.register("FUSE_OPEN", open);
    table.register("FUSE_OPENDIR", open);
    table.register("FUSE_READDIR", readdir);
    table.register("FUSE_READ", read);
    table.register_nop("FUSE_RELEASE");
    table.register_nop("FUSE_RELEASEDIR");
    table.register_nop("FUSE_FLUSH");
    table.register_nop("FUSE_GETXATTR");
    table.register_nop("FUSE_LISTXATTR");
    table.register("FUSE_FORGET", no_reply);
    table.register("FUSE_BATCH_FORGET", no_reply);
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lookup_rejects_unknown_names() {
        let header = RequestHeader::new(1, [0; 8], ROOT_INODE);
        let request = FieldMap::new().with("name", &b"nope"[..]);
        assert_eq!(lookup(header, request).await, Err(FuseError::new(Errno::ENOENT as i32)));
    }

    #[tokio::test]
    async fn lookup_finds_hello() {
        let header = RequestHeader::new(1, [0; 8], ROOT_INODE);
        let request = FieldMap::new().with("name", HELLO_NAME);

        let (errno, response) = lookup(header, request).await.unwrap();
        assert_eq!(errno, 0);
        let Response::Fields(fields) = response else {
            unreachable!("lookup replies with fields")
        };
        assert_eq!(fields.map("entry").unwrap().uint("nodeId"), Some(HELLO_INODE));
    }

    #[tokio::test]
    async fn readdir_lists_once() {
        let header = RequestHeader::new(28, [0; 8], ROOT_INODE);

        let (_, response) = readdir(header, FieldMap::new().with("cookie", 0u64)).await.unwrap();
        let Response::Fields(fields) = response else {
            unreachable!("readdir replies with fields")
        };
        assert_eq!(fields.list("data").unwrap().len(), 1);

        let (_, response) = readdir(header, FieldMap::new().with("cookie", 1u64)).await.unwrap();
        let Response::Fields(fields) = response else {
            unreachable!("readdir replies with fields")
        };
        assert!(fields.list("data").is_none());
    }
}

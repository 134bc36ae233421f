use crc::crc32::{Digest, Hasher32, IEEE};

pub(crate) fn from_bytes(buf: impl AsRef<[u8]>) -> u32 {
    let mut digest = Digest::new(IEEE);
    digest.write(buf.as_ref());
    digest.sum32()
}

//! Inode derivation.
//!
//! The kernel wants a stable 64-bit identifier per filesystem object. We
//! derive it from the remote entity id with 32-bit FNV-1a widened to 64, so
//! the same entity reports the same inode across lookups and restarts.

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

pub fn inode(id: &str) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in id.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    u64::from(hash)
}

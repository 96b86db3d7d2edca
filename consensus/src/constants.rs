/// Single-byte key-space prefixes of the consensus column families inside
/// the shared database. Values are stable across versions; never reuse a
/// retired prefix.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum StorePrefix {
    BlockIndex = 1,
    UtxoSet = 2,
    UtxoMeta = 3,
    FileInfo = 4,
    MempoolImage = 5,
    ChainTip = 6,
}

impl From<StorePrefix> for Vec<u8> {
    fn from(prefix: StorePrefix) -> Self {
        vec![prefix as u8]
    }
}

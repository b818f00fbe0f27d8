use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame too large: {len} bytes (max {max})")]
    FrameTooLarge { len: usize, max: usize },

    #[error("failed to encode packet: {0}")]
    Encode(bincode::Error),

    #[error("failed to decode packet: {0}")]
    Decode(bincode::Error),

    #[error("not a map file (magic {0:?})")]
    BadMagic([u8; 4]),

    #[error("map file truncated: header declares {declared} bytes, {available} present")]
    Truncated { declared: usize, available: usize },

    #[error("map file does not contain a map definition")]
    NotAMap,
}

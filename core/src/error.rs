use thiserror::Error;

/// Fatal faults. Asset data is trusted to be well formed and complete, so
/// there is no recovery path anywhere in this crate; the driving binary is
/// expected to abort with the message.
#[derive(Debug, Error)]
pub enum Error {
    #[error("bank {bank}: {need} bytes do not fit the {capacity} byte bank arena")]
    ArenaOverflow {
        bank: u16,
        need: usize,
        capacity: usize,
    },

    #[error("bank {bank}: live bank table is full")]
    BankTableFull { bank: u16 },

    #[error("bad CRC for {name}")]
    BadCrc { name: String },

    #[error("unexpected size {size} for '{name}'")]
    UnexpectedSize { name: String, size: usize },

    #[error("unexpected entry count {count} in {name}")]
    BadEntryCount { name: &'static str, count: u32 },

    #[error("stale bank handle")]
    InvalidBankHandle,

    #[error("invalid room {room}")]
    InvalidRoom { room: u16 },

    #[error("I/O error when reading '{name}'")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot open '{name}'")]
    MissingResource { name: String },
}

pub type Result<T> = core::result::Result<T, Error>;

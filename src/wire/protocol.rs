use crate::core::stats::{JobStats, ServerStats};

/// A command sent by the client to the server (`spec.md` §6 grammar).
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Command {
    /// `put <pri> <delay> <ttr> <bytes>\r\n<body>\r\n`
    Put {
        pri: u32,
        delay: u32,
        ttr: u32,
        n_bytes: u32,
    },
    /// `reserve\r\n`
    Reserve,
    /// `delete <id>\r\n`
    Delete { id: u64 },
    /// `release <id> <pri> <delay>\r\n`
    Release { id: u64, pri: u32, delay: u32 },
    /// `bury <id> <pri>\r\n`
    Bury { id: u64, pri: u32 },
    /// `touch <id>\r\n` (supplemented from the original protocol, see
    /// `SPEC_FULL.md` §10).
    Touch { id: u64 },
    /// `kick <n>\r\n`
    Kick { bound: u32 },
    /// `peek\r\n`
    Peek,
    /// `peek <id>\r\n`
    PeekId { id: u64 },
    /// `stats\r\n`
    Stats,
    /// `stats <id>\r\n`
    StatsJob { id: u64 },
    /// `quit\r\n` — not in `spec.md`'s grammar, but every line-oriented
    /// client protocol in this family needs a clean-disconnect verb; closing
    /// the socket works too, this just avoids relying on a RST/FIN race.
    Quit,
}

/// All possible replies to a command (`spec.md` §4.3, §6).
#[derive(Debug, PartialEq)]
pub enum Response {
    /// `SERVER_ERROR 1 internal error\r\n`
    InternalError,
    /// `CLIENT_ERROR 0 bad command line format\r\n`
    BadFormat,
    /// `CLIENT_ERROR 1 unknown command\r\n`
    UnknownCommand,
    /// `INSERTED <id>\r\n`
    Inserted { id: u64 },
    /// `BURIED <id>\r\n` (put/release queue-full fallback).
    BuriedId { id: u64 },
    /// `BURIED\r\n` (bury verb success).
    Buried,
    /// `CLIENT_ERROR 2 expected CR-LF after job body\r\n`
    ExpectedCrlf,
    /// `CLIENT_ERROR 3 job too big\r\n`
    JobTooBig,
    /// `SERVER_ERROR 2 draining\r\n`
    Draining,
    /// `RESERVED <id> <pri> <bytes>\r\n`, followed by the job body and then
    /// a `JobEnd` segment.
    Reserved { id: u64, pri: u32, n_bytes: u32 },
    /// `FOUND <id> <pri> <bytes>\r\n`, followed by the job body and `JobEnd`.
    Found { id: u64, pri: u32, n_bytes: u32 },
    JobBody(bytes::Bytes),
    JobEnd,
    /// `NOT_FOUND\r\n`
    NotFound,
    /// `DELETED\r\n`
    Deleted,
    /// `RELEASED\r\n`
    Released,
    /// `TOUCHED\r\n`
    Touched,
    /// `KICKED <n>\r\n`
    Kicked { count: u32 },
    /// `OK <bytes>\r\n<yaml>\r\n`
    OkStats(Box<ServerStats>),
    OkStatsJob(Box<JobStats>),
}

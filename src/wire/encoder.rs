use std::{error, fmt, io};

use bytes::BufMut;
use serde::ser;
use tokio_util::codec;

use super::protocol::Response;

/// An encoder for server replies.
#[derive(Debug, Default)]
pub struct Encoder {}

impl codec::Encoder<Response> for Encoder {
    type Error = Error;

    fn encode(
        &mut self,
        item: Response,
        dst: &mut bytes::BytesMut,
    ) -> Result<(), Self::Error> {
        use Response::*;

        fn put_ok_and_data(
            dst: &mut bytes::BytesMut,
            data: impl ser::Serialize,
        ) -> serde_yaml::Result<()> {
            //! Serialises data into dst as `OK {data.len()}\r\n{data}\r\n`.
            //! On serialisation failure, sends `INTERNAL_ERROR` to the client
            //! and returns the error.
            match serde_yaml::to_string(&data) {
                Ok(data) => {
                    let data = data.into_bytes();

                    let len_str = data.len().to_string().into_bytes();
                    // "OK {len}\r\n{data}\r\n"
                    dst.reserve(3 + len_str.len() + 2 + data.len() + 2);

                    dst.put_slice(b"OK ");
                    dst.extend(len_str);
                    dst.put_slice(b"\r\n");
                    dst.extend(data);
                    dst.put_slice(b"\r\n");

                    Ok(())
                },
                Err(err) => {
                    dst.put_slice(b"INTERNAL_ERROR\r\n");
                    Err(err)
                },
            }
        }

        fn put_str_and_u64(dst: &mut bytes::BytesMut, str: &[u8], num: u64) {
            //! Writes `"{str} {num}\r\n"` to `dst`
            let num_str = num.to_string().into_bytes();
            dst.reserve(str.len() + 1 + num_str.len() + 2);

            dst.put_slice(str);
            dst.put_slice(b" ");
            dst.extend(num_str);
            dst.put_slice(b"\r\n");
        }

        fn put_reply_line(
            dst: &mut bytes::BytesMut,
            word: &[u8],
            id: u64,
            pri: u32,
            n_bytes: u32,
        ) {
            //! Writes `"{word} {id} {pri} {n_bytes}\r\n"` to `dst`.
            let id_str = id.to_string().into_bytes();
            let pri_str = pri.to_string().into_bytes();
            let len_str = n_bytes.to_string().into_bytes();
            dst.reserve(
                word.len() + 1 + id_str.len() + 1 + pri_str.len() + 1 + len_str.len() + 2,
            );

            dst.put_slice(word);
            dst.put_slice(b" ");
            dst.extend(id_str);
            dst.put_slice(b" ");
            dst.extend(pri_str);
            dst.put_slice(b" ");
            dst.extend(len_str);
            dst.put_slice(b"\r\n");
        }

        Ok(match item {
            InternalError => dst.put_slice(b"SERVER_ERROR 1 internal error\r\n"),
            BadFormat => dst.put_slice(b"CLIENT_ERROR 0 bad command line format\r\n"),
            UnknownCommand => dst.put_slice(b"CLIENT_ERROR 1 unknown command\r\n"),
            Buried => dst.put_slice(b"BURIED\r\n"),
            ExpectedCrlf => dst.put_slice(b"CLIENT_ERROR 2 expected CR-LF after job body\r\n"),
            JobTooBig => dst.put_slice(b"CLIENT_ERROR 3 job too big\r\n"),
            Draining => dst.put_slice(b"SERVER_ERROR 2 draining\r\n"),
            NotFound => dst.put_slice(b"NOT_FOUND\r\n"),
            Deleted => dst.put_slice(b"DELETED\r\n"),
            Released => dst.put_slice(b"RELEASED\r\n"),
            Touched => dst.put_slice(b"TOUCHED\r\n"),
            JobEnd => dst.put_slice(b"\r\n"),

            BuriedId { id } => put_str_and_u64(dst, b"BURIED", id),
            Inserted { id } => put_str_and_u64(dst, b"INSERTED", id),
            Kicked { count } => put_str_and_u64(dst, b"KICKED", count as u64),

            Reserved { id, pri, n_bytes } => put_reply_line(dst, b"RESERVED", id, pri, n_bytes),
            Found { id, pri, n_bytes } => put_reply_line(dst, b"FOUND", id, pri, n_bytes),
            JobBody(data) => dst.extend(data),

            OkStatsJob(data) => put_ok_and_data(dst, data)?,
            OkStats(data) => put_ok_and_data(dst, data)?,
        })
    }
}

#[derive(Debug)]
pub enum Error {
    IO(io::Error),
    Serde(serde_yaml::Error),
}

impl error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        Self::IO(value)
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(value: serde_yaml::Error) -> Self {
        Self::Serde(value)
    }
}

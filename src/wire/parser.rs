//! Parses one already-CRLF-stripped command line into a [`Command`].
//!
//! Grounded in the original implementation's `prot.c` dispatch table: the
//! first whitespace-separated token selects the verb; an unrecognised verb
//! is `CLIENT_ERROR 1 unknown command`, while a recognised verb with the
//! wrong number of arguments or non-numeric/out-of-range arguments is
//! `CLIENT_ERROR 0 bad command line format`.

use super::protocol::{Command, Response};

impl TryFrom<&[u8]> for Command {
    type Error = Response;

    fn try_from(line: &[u8]) -> Result<Self, Self::Error> {
        let line = std::str::from_utf8(line).map_err(|_| Response::BadFormat)?;
        let mut parts = line.split(' ').filter(|s| !s.is_empty());

        let verb = parts.next().ok_or(Response::UnknownCommand)?;

        match verb {
            "put" => {
                let pri = next_u32(&mut parts)?;
                let delay = next_u32(&mut parts)?;
                let ttr = next_u32(&mut parts)?;
                let n_bytes = next_u32(&mut parts)?;
                end(parts)?;
                Ok(Command::Put {
                    pri,
                    delay,
                    ttr,
                    n_bytes,
                })
            },
            "reserve" => {
                end(parts)?;
                Ok(Command::Reserve)
            },
            "delete" => {
                let id = next_u64(&mut parts)?;
                end(parts)?;
                Ok(Command::Delete { id })
            },
            "release" => {
                let id = next_u64(&mut parts)?;
                let pri = next_u32(&mut parts)?;
                let delay = next_u32(&mut parts)?;
                end(parts)?;
                Ok(Command::Release { id, pri, delay })
            },
            "bury" => {
                let id = next_u64(&mut parts)?;
                let pri = next_u32(&mut parts)?;
                end(parts)?;
                Ok(Command::Bury { id, pri })
            },
            "touch" => {
                let id = next_u64(&mut parts)?;
                end(parts)?;
                Ok(Command::Touch { id })
            },
            "kick" => {
                let bound = next_u32(&mut parts)?;
                end(parts)?;
                Ok(Command::Kick { bound })
            },
            "peek" => match parts.next() {
                None => Ok(Command::Peek),
                Some(tok) => {
                    let id = tok.parse::<u64>().map_err(|_| Response::BadFormat)?;
                    end(parts)?;
                    Ok(Command::PeekId { id })
                },
            },
            "stats" => match parts.next() {
                None => Ok(Command::Stats),
                Some(tok) => {
                    let id = tok.parse::<u64>().map_err(|_| Response::BadFormat)?;
                    end(parts)?;
                    Ok(Command::StatsJob { id })
                },
            },
            "quit" => {
                end(parts)?;
                Ok(Command::Quit)
            },
            _ => Err(Response::UnknownCommand),
        }
    }
}

fn next_u32<'a>(parts: &mut impl Iterator<Item = &'a str>) -> Result<u32, Response> {
    parts
        .next()
        .ok_or(Response::BadFormat)?
        .parse::<u32>()
        .map_err(|_| Response::BadFormat)
}

fn next_u64<'a>(parts: &mut impl Iterator<Item = &'a str>) -> Result<u64, Response> {
    parts
        .next()
        .ok_or(Response::BadFormat)?
        .parse::<u64>()
        .map_err(|_| Response::BadFormat)
}

fn end<'a>(mut parts: impl Iterator<Item = &'a str>) -> Result<(), Response> {
    match parts.next() {
        None => Ok(()),
        Some(_) => Err(Response::BadFormat),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> Result<Command, Response> {
        s.as_bytes().try_into()
    }

    #[test]
    fn parses_put() {
        assert_eq!(
            parse("put 10 0 60 5"),
            Ok(Command::Put {
                pri: 10,
                delay: 0,
                ttr: 60,
                n_bytes: 5,
            })
        );
    }

    #[test]
    fn parses_reserve() {
        assert_eq!(parse("reserve"), Ok(Command::Reserve));
    }

    #[test]
    fn parses_peek_variants() {
        assert_eq!(parse("peek"), Ok(Command::Peek));
        assert_eq!(parse("peek 7"), Ok(Command::PeekId { id: 7 }));
    }

    #[test]
    fn unknown_verb_is_unknown_command() {
        assert_eq!(parse("frobnicate"), Err(Response::UnknownCommand));
    }

    #[test]
    fn wrong_arity_is_bad_format() {
        assert_eq!(parse("put 10 0 60"), Err(Response::BadFormat));
        assert_eq!(parse("delete 1 2"), Err(Response::BadFormat));
    }

    #[test]
    fn non_numeric_argument_is_bad_format() {
        assert_eq!(parse("delete abc"), Err(Response::BadFormat));
    }

    #[test]
    fn negative_number_is_bad_format() {
        assert_eq!(parse("kick -1"), Err(Response::BadFormat));
    }
}

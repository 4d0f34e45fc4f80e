//! Plain text request reader, one command per `\n` terminated line.
//!
//! Tokens are separated by spaces and may be wrapped in `'` or `"`. Inside
//! quotes `\n`, `\r` and `\t` are unescaped and any other escaped byte is
//! taken as is.

use super::{Command, ProtocolError, Step};
use std::mem;

pub(super) fn read_command(buf: &[u8]) -> Result<Step, ProtocolError> {
    let Some(lf) = buf.iter().position(|&b| b == b'\n') else {
        return Ok(Step::Incomplete);
    };
    let line = match &buf[..lf] {
        [line @ .., b'\r'] => line,
        line => line,
    };

    let args = split_line(line)?;
    if args.is_empty() {
        return Ok(Step::Skip(lf + 1));
    }
    Ok(Step::Command(Command::from_args(args), lf + 1))
}

fn split_line(line: &[u8]) -> Result<Vec<Vec<u8>>, ProtocolError> {
    let mut args = Vec::new();
    let mut token = Vec::new();
    let mut quote: Option<u8> = None;
    let mut escape = false;

    for (i, &c) in line.iter().enumerate() {
        match quote {
            None => match c {
                b' ' => {
                    if !token.is_empty() {
                        args.push(mem::take(&mut token));
                    }
                }
                b'"' | b'\'' => {
                    // A quote may only open a token.
                    if !token.is_empty() {
                        return Err(ProtocolError::UnbalancedQuotes);
                    }
                    quote = Some(c);
                }
                _ => token.push(c),
            },
            Some(q) => {
                if escape {
                    escape = false;
                    token.push(match c {
                        b'n' => b'\n',
                        b'r' => b'\r',
                        b't' => b'\t',
                        other => other,
                    });
                } else if c == q {
                    quote = None;
                    args.push(mem::take(&mut token));
                    if line.get(i + 1).is_some_and(|&next| next != b' ') {
                        return Err(ProtocolError::UnbalancedQuotes);
                    }
                } else if c == b'\\' {
                    escape = true;
                } else {
                    token.push(c);
                }
            }
        }
    }

    if quote.is_some() {
        return Err(ProtocolError::UnbalancedQuotes);
    }
    if !token.is_empty() {
        args.push(token);
    }
    Ok(args)
}

//! Wire codec for the signalbus protocol.
//!
//! One logical message is exactly one line of UTF-8 text:
//!
//! | frame | syntax | example |
//! |---|---|---|
//! | signal | `$<name>=<value>` | `$D2816=false`, `$Note="line1\nline2"` |
//! | command | `#<name>` | `#RESET_SYSTEM` |
//! | plain text | anything else | `Hello, server!` |
//!
//! Text payloads never contain real line breaks on the wire; CRLF, LF and CR
//! are carried as the two-character literal `\n`. A human with `nc` can watch
//! and inject traffic, which is the point of keeping the protocol textual.

pub mod frame;

pub use frame::{
    convert, decode, encode_command, encode_signal, encode_text, escape, unescape, Frame,
};
